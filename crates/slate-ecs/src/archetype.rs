//! Archetype storage - groups of entities sharing one component set.
//!
//! An archetype owns a growable list of fixed-size memory blocks that all
//! share one column layout. Appends go to the tail block, allocating a new
//! block on overflow; erases keep the blocks packed by moving the
//! archetype's globally last entity into the freed slot.

use std::{fmt, sync::Arc};

use hashbrown::HashMap;
use tracing::debug;

use crate::{
    block::{BlockLayout, MemBlock},
    component::{Bundle, Component, ComponentId, ComponentMetaSet, ComponentSet},
    entity::Entity,
    error::EcsResult,
};

/// Unique identifier for an archetype within one world.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ArchetypeId(u32);

impl ArchetypeId {
    /// Create an archetype id from a raw value.
    #[must_use]
    pub const fn from_raw(id: u32) -> Self {
        Self(id)
    }

    /// Get the raw id value.
    #[must_use]
    pub const fn as_raw(self) -> u32 {
        self.0
    }
}

impl fmt::Debug for ArchetypeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ArchetypeId({})", self.0)
    }
}

/// Storage for all entities sharing one specific set of component types.
///
/// Invariants:
/// - there is always at least one block;
/// - every block except the tail is full;
/// - the tail block is empty only when the archetype is empty.
pub struct Archetype {
    id: ArchetypeId,
    /// Component metadata in column order.
    components: ComponentMetaSet,
    /// Column layout shared by every block.
    layout: Arc<BlockLayout>,
    /// Memory blocks; the last one is the append target.
    blocks: Vec<MemBlock>,
}

impl Archetype {
    /// Create an empty archetype for the given component set.
    ///
    /// Fails when a single entry's aligned footprint exceeds the block
    /// size.
    pub(crate) fn new(id: ArchetypeId, components: ComponentMetaSet) -> EcsResult<Self> {
        let layout = Arc::new(BlockLayout::new(&components)?);
        let blocks = vec![MemBlock::new(Arc::clone(&layout))];

        Ok(Self {
            id,
            components,
            layout,
            blocks,
        })
    }

    /// Get the archetype id.
    #[must_use]
    pub const fn id(&self) -> ArchetypeId {
        self.id
    }

    /// Component metadata of this archetype, in column order.
    #[must_use]
    pub fn components(&self) -> &ComponentMetaSet {
        &self.components
    }

    /// Entities one memory block can hold.
    #[must_use]
    pub fn block_capacity(&self) -> usize {
        self.layout.capacity()
    }

    /// Number of entities across all blocks.
    #[must_use]
    pub fn len(&self) -> usize {
        // All blocks but the tail are full.
        (self.blocks.len() - 1) * self.layout.capacity() + self.blocks[self.blocks.len() - 1].len()
    }

    /// Check if the archetype holds no entities.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.blocks.len() == 1 && self.blocks[0].is_empty()
    }

    /// Check whether the component set contains `id`.
    #[must_use]
    pub fn contains(&self, id: ComponentId) -> bool {
        self.components.contains(id)
    }

    /// The memory blocks, for iteration.
    #[must_use]
    pub fn blocks(&self) -> &[MemBlock] {
        &self.blocks
    }

    /// Append an entity with its component bundle.
    ///
    /// Returns the `(block_index, row)` the entry landed at. `ids` are the
    /// bundle's component ids in tuple order.
    pub(crate) fn push<B: Bundle>(
        &mut self,
        entity: Entity,
        bundle: B,
        ids: &[ComponentId],
    ) -> (usize, usize) {
        if self.blocks[self.blocks.len() - 1].is_full() {
            self.blocks.push(MemBlock::new(Arc::clone(&self.layout)));
        }

        let block_index = self.blocks.len() - 1;
        let row = self.blocks[block_index].push(entity, bundle, ids);
        (block_index, row)
    }

    /// Erase the entry at `(block_index, row)`.
    ///
    /// The archetype's globally last entity is moved into the freed slot
    /// so every block except the tail stays full; an emptied tail block is
    /// dropped unless it is the only one. Returns the moved entity, or
    /// `None` when the erased entry was itself the last.
    pub(crate) fn erase_and_fill(&mut self, block_index: usize, row: usize) -> Option<Entity> {
        let tail_index = self.blocks.len() - 1;
        debug_assert!(block_index <= tail_index, "block index out of bounds");

        let moved = if block_index == tail_index {
            self.blocks[tail_index].erase_within(row)
        } else {
            let (head, tail) = self.blocks.split_at_mut(tail_index);
            Some(head[block_index].erase_and_fill_from(row, &mut tail[0]))
        };

        if self.blocks.len() > 1 && self.blocks[self.blocks.len() - 1].is_empty() {
            self.blocks.pop();
        }

        moved
    }

    /// Reference to the `T` component at a location.
    #[must_use]
    pub fn get<T: Component>(&self, id: ComponentId, block_index: usize, row: usize) -> Option<&T> {
        self.blocks.get(block_index)?.get(id, row)
    }

    /// Mutable reference to the `T` component at a location.
    #[must_use]
    pub fn get_mut<T: Component>(
        &mut self,
        id: ComponentId,
        block_index: usize,
        row: usize,
    ) -> Option<&mut T> {
        self.blocks.get_mut(block_index)?.get_mut(id, row)
    }
}

impl fmt::Debug for Archetype {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Archetype")
            .field("id", &self.id)
            .field("components", &self.components)
            .field("blocks", &self.blocks.len())
            .field("entity_count", &self.len())
            .finish()
    }
}

/// Storage mapping each distinct component set to its unique archetype.
///
/// Archetypes are created lazily and never removed.
pub struct ArchetypeStorage {
    /// All archetypes, indexed by [`ArchetypeId`].
    archetypes: Vec<Archetype>,
    /// Map from component set to archetype id.
    index: HashMap<ComponentSet, ArchetypeId>,
}

impl Default for ArchetypeStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl ArchetypeStorage {
    /// Create empty storage.
    #[must_use]
    pub fn new() -> Self {
        Self {
            archetypes: Vec::new(),
            index: HashMap::new(),
        }
    }

    /// Get or create the archetype for a component set.
    pub(crate) fn ensure(&mut self, components: ComponentMetaSet) -> EcsResult<ArchetypeId> {
        if let Some(&id) = self.index.get(components.ids()) {
            return Ok(id);
        }

        let id = ArchetypeId::from_raw(self.archetypes.len() as u32);
        let key = components.ids().clone();
        let archetype = Archetype::new(id, components)?;

        debug!(
            archetype = id.as_raw(),
            components = archetype.components().len(),
            block_capacity = archetype.block_capacity(),
            "created archetype"
        );

        self.index.insert(key, id);
        self.archetypes.push(archetype);

        Ok(id)
    }

    /// Get an archetype by id.
    #[must_use]
    pub fn get(&self, id: ArchetypeId) -> Option<&Archetype> {
        self.archetypes.get(id.as_raw() as usize)
    }

    /// Get a mutable archetype by id.
    #[must_use]
    pub fn get_mut(&mut self, id: ArchetypeId) -> Option<&mut Archetype> {
        self.archetypes.get_mut(id.as_raw() as usize)
    }

    /// Number of archetypes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.archetypes.len()
    }

    /// Check if no archetype exists yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.archetypes.is_empty()
    }

    /// Iterate over all archetypes.
    pub fn iter(&self) -> impl Iterator<Item = &Archetype> {
        self.archetypes.iter()
    }

    /// Iterate over archetypes whose component set contains all of
    /// `required`.
    pub fn iter_matching<'a>(
        &'a self,
        required: &ComponentSet,
    ) -> impl Iterator<Item = &'a Archetype> {
        self.archetypes
            .iter()
            .filter(move |archetype| archetype.components().ids().contains_all(required))
    }
}

impl fmt::Debug for ArchetypeStorage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ArchetypeStorage")
            .field("archetype_count", &self.archetypes.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::component::ComponentRegistry;
    use crate::error::EcsError;

    struct Position {
        #[allow(dead_code)]
        x: f32,
        #[allow(dead_code)]
        y: f32,
    }

    struct Velocity {
        #[allow(dead_code)]
        x: f32,
        #[allow(dead_code)]
        y: f32,
    }

    #[test]
    fn test_archetype_creation() {
        let mut registry = ComponentRegistry::new();
        let metas = <(Position, Velocity)>::metas(&mut registry).unwrap();
        let pos_id = registry.lookup::<Position>().unwrap();
        let vel_id = registry.lookup::<Velocity>().unwrap();

        let archetype = Archetype::new(ArchetypeId::from_raw(0), metas).unwrap();

        assert!(archetype.contains(pos_id));
        assert!(archetype.contains(vel_id));
        assert!(archetype.is_empty());
        assert_eq!(archetype.blocks().len(), 1);
        assert!(archetype.block_capacity() >= 1);
    }

    #[test]
    fn test_storage_is_unique_per_component_set() {
        let mut registry = ComponentRegistry::new();
        let mut storage = ArchetypeStorage::new();

        let a = storage
            .ensure(<(Position,)>::metas(&mut registry).unwrap())
            .unwrap();
        let b = storage
            .ensure(<(Position, Velocity)>::metas(&mut registry).unwrap())
            .unwrap();
        // Insertion order must not matter for identity.
        let c = storage
            .ensure(<(Velocity, Position)>::metas(&mut registry).unwrap())
            .unwrap();

        assert_ne!(a, b);
        assert_eq!(b, c);
        assert_eq!(storage.len(), 2);
    }

    #[test]
    fn test_storage_rejects_oversized_set() {
        let mut registry = ComponentRegistry::new();
        let mut storage = ArchetypeStorage::new();

        let result = storage.ensure(<([u8; 64 * 1024],)>::metas(&mut registry).unwrap());
        assert!(matches!(result, Err(EcsError::LayoutOverflow { .. })));
    }

    #[test]
    fn test_push_spills_into_new_block() {
        // 4 KiB payload: three entries per block.
        struct Big(#[allow(dead_code)] [u8; 4096]);

        let mut registry = ComponentRegistry::new();
        let metas = <(Big,)>::metas(&mut registry).unwrap();
        let ids = <(Big,)>::component_ids(&mut registry);
        let mut archetype = Archetype::new(ArchetypeId::from_raw(0), metas).unwrap();

        let capacity = archetype.block_capacity();
        assert_eq!(capacity, 3);

        for n in 0..(capacity + 1) as u32 {
            archetype.push(Entity::new(n, 0), (Big([0; 4096]),), &ids);
        }

        assert_eq!(archetype.blocks().len(), 2);
        assert_eq!(archetype.len(), capacity + 1);
        assert!(archetype.blocks()[0].is_full());
        assert_eq!(archetype.blocks()[1].len(), 1);
    }

    #[test]
    fn test_erase_keeps_head_blocks_full() {
        struct Big(#[allow(dead_code)] [u8; 4096]);

        let mut registry = ComponentRegistry::new();
        let metas = <(Big,)>::metas(&mut registry).unwrap();
        let ids = <(Big,)>::component_ids(&mut registry);
        let mut archetype = Archetype::new(ArchetypeId::from_raw(0), metas).unwrap();

        for n in 0..5u32 {
            archetype.push(Entity::new(n, 0), (Big([0; 4096]),), &ids);
        }
        assert_eq!(archetype.blocks().len(), 2);

        // Erase in the head block: filled from the tail, which empties
        // and gets dropped.
        let moved = archetype.erase_and_fill(0, 1);
        assert_eq!(moved, Some(Entity::new(4, 0)));
        assert_eq!(archetype.blocks().len(), 2);
        assert!(archetype.blocks()[0].is_full());
        assert_eq!(archetype.blocks()[1].len(), 1);

        let moved = archetype.erase_and_fill(1, 0);
        assert_eq!(moved, None);
        assert_eq!(archetype.blocks().len(), 1);
        assert!(archetype.blocks()[0].is_full());

        // Erasing the last entry of the only block keeps the block.
        for _ in 0..3 {
            archetype.erase_and_fill(0, archetype.blocks()[0].len() - 1);
        }
        assert!(archetype.is_empty());
        assert_eq!(archetype.blocks().len(), 1);
    }
}
