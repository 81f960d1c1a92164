//! World - the top-level facade over entity, component, and archetype
//! storage.
//!
//! The world owns the entity pool, the component registry, every
//! archetype, and the `entity id -> location` table that ties them
//! together. It drives the create/destroy/get/has primitives and hands
//! out views.
//!
//! Contract violations (using a dead entity, asking for a component the
//! archetype does not carry, repeating a component type) are caller bugs:
//! the primary methods panic with a message naming the problem, and each
//! has a `try_` sibling returning [`EcsError`] for callers that prefer to
//! match.

use std::any::TypeId;

use smallvec::SmallVec;
use tracing::trace;

use crate::{
    archetype::{ArchetypeId, ArchetypeStorage},
    component::{Bundle, Component, ComponentRegistry},
    entity::{Entity, EntityPool},
    error::{EcsError, EcsResult},
    sparse::SparseMap,
    view::{Query, ReadOnlyQuery, View},
};

/// Location of a live entity inside the archetype storage.
///
/// The archetype is named by id and resolved through the world's
/// archetype storage, which outlives every location.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EntityLocation {
    /// The archetype storing this entity.
    pub archetype: ArchetypeId,
    /// Memory block index within the archetype.
    pub block: usize,
    /// Entry index within the memory block.
    pub row: usize,
}

/// The ECS world - container for all entities and components.
pub struct World {
    /// Entity handle pool.
    entities: EntityPool,
    /// Component type registry.
    components: ComponentRegistry,
    /// Archetype storage.
    archetypes: ArchetypeStorage,
    /// Location of every live entity, keyed by entity id.
    locations: SparseMap<EntityLocation>,
}

impl Default for World {
    fn default() -> Self {
        Self::new()
    }
}

impl World {
    /// Create an empty world.
    #[must_use]
    pub fn new() -> Self {
        Self {
            entities: EntityPool::new(),
            components: ComponentRegistry::new(),
            archetypes: ArchetypeStorage::new(),
            locations: SparseMap::new(),
        }
    }

    // ==================== Entity Operations ====================

    /// Spawn an entity with a bundle of components.
    ///
    /// ```ignore
    /// let e = world.spawn((Position { x: 0.0, y: 0.0 }, Velocity { x: 1.0, y: 0.0 }));
    /// ```
    ///
    /// # Panics
    ///
    /// Panics when the bundle repeats a component type, or when a single
    /// entry of the component set does not fit in one memory block.
    pub fn spawn<B: Bundle>(&mut self, bundle: B) -> Entity {
        self.try_spawn(bundle).unwrap_or_else(|err| panic!("{err}"))
    }

    /// Fallible form of [`spawn`](Self::spawn).
    pub fn try_spawn<B: Bundle>(&mut self, bundle: B) -> EcsResult<Entity> {
        let metas = B::metas(&mut self.components)?;
        let ids = B::component_ids(&mut self.components);
        let archetype_id = self.archetypes.ensure(metas)?;

        let entity = self.entities.create();
        let archetype = self
            .archetypes
            .get_mut(archetype_id)
            .expect("ensured archetype must exist");
        let (block, row) = archetype.push(entity, bundle, &ids);

        self.locations.insert(
            entity.id(),
            EntityLocation {
                archetype: archetype_id,
                block,
                row,
            },
        );

        trace!(entity = %entity, archetype = archetype_id.as_raw(), "spawned entity");
        Ok(entity)
    }

    /// Despawn an entity, destroying all its components.
    ///
    /// The archetype's last entity is moved into the freed slot and its
    /// recorded location is updated; the despawned id is recycled.
    ///
    /// # Panics
    ///
    /// Panics when the entity is not alive.
    pub fn despawn(&mut self, entity: Entity) {
        self.try_despawn(entity)
            .unwrap_or_else(|err| panic!("{err}"));
    }

    /// Fallible form of [`despawn`](Self::despawn).
    pub fn try_despawn(&mut self, entity: Entity) -> EcsResult<()> {
        if !self.alive(entity) {
            return Err(EcsError::EntityNotAlive(entity));
        }

        let location = self
            .locations
            .remove(entity.id())
            .expect("live entity must have a recorded location");
        let archetype = self
            .archetypes
            .get_mut(location.archetype)
            .expect("location names an existing archetype");

        let moved = archetype.erase_and_fill(location.block, location.row);

        if let Some(moved) = moved {
            // The moved entity now lives in the freed slot.
            let slot = self
                .locations
                .get_mut(moved.id())
                .expect("moved entity must have a recorded location");
            slot.block = location.block;
            slot.row = location.row;
        }

        self.entities.recycle(entity);
        trace!(entity = %entity, "despawned entity");
        Ok(())
    }

    /// Check if an entity is alive.
    #[must_use]
    pub fn alive(&self, entity: Entity) -> bool {
        self.entities.alive(entity)
    }

    /// Number of alive entities.
    #[must_use]
    pub fn entity_count(&self) -> u32 {
        self.entities.alive_count()
    }

    /// Number of archetypes created so far.
    #[must_use]
    pub fn archetype_count(&self) -> usize {
        self.archetypes.len()
    }

    /// The archetype storage, for iteration and inspection.
    #[must_use]
    pub fn archetypes(&self) -> &ArchetypeStorage {
        &self.archetypes
    }

    // ==================== Component Access ====================

    /// Reference to an entity's `C` component.
    ///
    /// # Panics
    ///
    /// Panics when the entity is not alive or its archetype does not
    /// carry `C`.
    #[must_use]
    pub fn get<C: Component>(&self, entity: Entity) -> &C {
        self.try_get(entity).unwrap_or_else(|err| panic!("{err}"))
    }

    /// Fallible form of [`get`](Self::get).
    pub fn try_get<C: Component>(&self, entity: Entity) -> EcsResult<&C> {
        let location = self.location(entity)?;
        let archetype = self
            .archetypes
            .get(location.archetype)
            .expect("location names an existing archetype");
        let id = self
            .components
            .lookup::<C>()
            .ok_or(EcsError::MissingComponent {
                name: std::any::type_name::<C>(),
            })?;

        archetype
            .get::<C>(id, location.block, location.row)
            .ok_or(EcsError::MissingComponent {
                name: std::any::type_name::<C>(),
            })
    }

    /// Mutable reference to an entity's `C` component.
    ///
    /// # Panics
    ///
    /// Panics when the entity is not alive or its archetype does not
    /// carry `C`.
    #[must_use]
    pub fn get_mut<C: Component>(&mut self, entity: Entity) -> &mut C {
        self.try_get_mut(entity)
            .unwrap_or_else(|err| panic!("{err}"))
    }

    /// Fallible form of [`get_mut`](Self::get_mut).
    pub fn try_get_mut<C: Component>(&mut self, entity: Entity) -> EcsResult<&mut C> {
        let location = self.location(entity)?;
        let id = self
            .components
            .lookup::<C>()
            .ok_or(EcsError::MissingComponent {
                name: std::any::type_name::<C>(),
            })?;
        let archetype = self
            .archetypes
            .get_mut(location.archetype)
            .expect("location names an existing archetype");

        archetype
            .get_mut::<C>(id, location.block, location.row)
            .ok_or(EcsError::MissingComponent {
                name: std::any::type_name::<C>(),
            })
    }

    /// Tuple of component references for one entity.
    ///
    /// ```ignore
    /// let (pos, vel) = world.fetch::<(&Position, &Velocity)>(e);
    /// ```
    ///
    /// # Panics
    ///
    /// Panics when the entity is not alive or a queried component is not
    /// in its archetype.
    #[must_use]
    pub fn fetch<Q: ReadOnlyQuery>(&self, entity: Entity) -> Q::Item<'_> {
        self.fetch_impl::<Q>(entity)
            .unwrap_or_else(|err| panic!("{err}"))
    }

    /// Tuple of component references with write access for one entity.
    ///
    /// ```ignore
    /// let (pos, vel) = world.fetch_mut::<(&mut Position, &Velocity)>(e);
    /// ```
    ///
    /// # Panics
    ///
    /// Panics when the entity is not alive, a queried component is not in
    /// its archetype, or the tuple repeats a component type.
    #[must_use]
    pub fn fetch_mut<Q: Query>(&mut self, entity: Entity) -> Q::Item<'_> {
        self.fetch_impl::<Q>(entity)
            .unwrap_or_else(|err| panic!("{err}"))
    }

    /// Check if an entity's archetype carries component `C`.
    ///
    /// The entity type itself always counts as present.
    ///
    /// # Panics
    ///
    /// Panics when the entity is not alive.
    #[must_use]
    pub fn has<C: Component>(&self, entity: Entity) -> bool {
        let location = self
            .location(entity)
            .unwrap_or_else(|err| panic!("{err}"));

        if TypeId::of::<C>() == TypeId::of::<Entity>() {
            return true;
        }

        let Some(id) = self.components.lookup::<C>() else {
            return false;
        };
        self.archetypes
            .get(location.archetype)
            .expect("location names an existing archetype")
            .contains(id)
    }

    // ==================== Views ====================

    /// Read-only view over every entity carrying all of `Q`'s components.
    #[must_use]
    pub fn view<Q: ReadOnlyQuery>(&self) -> View<'_, Q> {
        View::new(&self.archetypes, &self.components)
    }

    /// View with write access over every entity carrying all of `Q`'s
    /// components.
    ///
    /// # Panics
    ///
    /// Panics when the tuple repeats a component type: two mutable
    /// references to the same column may not coexist.
    #[must_use]
    pub fn view_mut<Q: Query>(&mut self) -> View<'_, Q> {
        View::new(&self.archetypes, &self.components)
    }

    /// Invoke `f` with the component tuple of every matching entity.
    pub fn each<'w, Q: ReadOnlyQuery, F: FnMut(Q::Item<'w>)>(&'w self, f: F) {
        self.view::<Q>().each(f);
    }

    /// Invoke `f` with write access for every matching entity.
    pub fn each_mut<'w, Q: Query, F: FnMut(Q::Item<'w>)>(&'w mut self, f: F) {
        self.view_mut::<Q>().each(f);
    }

    // ==================== Internals ====================

    fn location(&self, entity: Entity) -> EcsResult<EntityLocation> {
        if !self.alive(entity) {
            return Err(EcsError::EntityNotAlive(entity));
        }
        Ok(*self
            .locations
            .get(entity.id())
            .expect("live entity must have a recorded location"))
    }

    fn fetch_impl<Q: Query>(&self, entity: Entity) -> EcsResult<Q::Item<'_>> {
        if Q::MUTABLE {
            if let Some(name) = Q::duplicate() {
                return Err(EcsError::DuplicateComponent { name });
            }
        }

        let location = self.location(entity)?;
        let archetype = self
            .archetypes
            .get(location.archetype)
            .expect("location names an existing archetype");
        let block = &archetype.blocks()[location.block];

        let ids = Q::component_ids(&self.components)?;
        let names = Q::component_names();
        let mut bases: SmallVec<[*mut u8; 8]> = SmallVec::with_capacity(ids.len());
        for (index, &id) in ids.iter().enumerate() {
            let base = block
                .column_ptr(id)
                .ok_or(EcsError::MissingComponent { name: names[index] })?;
            bases.push(base);
        }

        // SAFETY: the location row is live, duplicate mutable columns were
        // rejected above, and exclusivity comes from the borrow of self
        // the caller holds.
        Ok(unsafe { Q::fetch(&bases, location.row) })
    }
}

impl std::fmt::Debug for World {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("World")
            .field("entities", &self.entities.alive_count())
            .field("archetypes", &self.archetypes.len())
            .finish()
    }
}
