//! Component type identity, metadata, and component sets.
//!
//! Components are plain data types attached to entities. Each distinct
//! component type is assigned a small serial number on first use from a
//! process-wide counter. Type metadata (layout + drop glue) is not stored
//! centrally: it travels alongside the id in [`ComponentMetaSet`] entries
//! into the archetypes that lay out and destroy the values.

use std::{
    alloc::Layout,
    any::TypeId,
    collections::HashMap,
    fmt,
    num::NonZeroU32,
    sync::atomic::{AtomicU32, Ordering},
};

use smallvec::SmallVec;

use crate::{
    bitset::DynamicBitset,
    error::{EcsError, EcsResult},
};

/// Marker trait for types that can be used as components.
///
/// Rust values are relocatable by construction, so any sized
/// `Send + Sync + 'static` type qualifies.
pub trait Component: Send + Sync + 'static {}

// Blanket implementation for all suitable types
impl<T: Send + Sync + 'static> Component for T {}

/// Identifier a component type receives on first use.
///
/// Serials start at 1 and are never reused, so `Option<ComponentId>` is
/// no larger than the id itself; [`index`](Self::index) gives the
/// zero-based position used for bit-set membership and column tables.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct ComponentId(NonZeroU32);

impl ComponentId {
    fn from_serial(serial: u32) -> Self {
        Self(NonZeroU32::new(serial).expect("component id counter overflowed"))
    }

    /// Zero-based dense index of this id.
    #[must_use]
    pub const fn index(self) -> usize {
        (self.0.get() - 1) as usize
    }
}

/// Type-erased description of one component type: everything block
/// storage needs to place, relocate, and destroy values without knowing
/// the concrete type.
#[derive(Clone, Copy)]
pub struct TypeMeta {
    /// Type name for diagnostics.
    name: &'static str,
    /// Memory layout of one value.
    layout: Layout,
    /// Rust type identity, for debug type checks.
    type_id: TypeId,
    /// Drop glue; `None` for plain-data types.
    drop: Option<unsafe fn(*mut u8)>,
}

impl TypeMeta {
    /// Describe component type `T`.
    #[must_use]
    pub fn of<T: Component>() -> Self {
        let drop = if std::mem::needs_drop::<T>() {
            unsafe fn drop_value<C>(ptr: *mut u8) {
                // SAFETY: caller passes a pointer to a live `C`.
                unsafe { std::ptr::drop_in_place(ptr.cast::<C>()) }
            }
            Some(drop_value::<T> as unsafe fn(*mut u8))
        } else {
            None
        };

        Self {
            name: std::any::type_name::<T>(),
            layout: Layout::new::<T>(),
            type_id: TypeId::of::<T>(),
            drop,
        }
    }

    /// Memory layout of one value.
    #[must_use]
    pub const fn layout(&self) -> Layout {
        self.layout
    }

    /// Type name for diagnostics.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        self.name
    }

    /// Whether values of the type have drop glue.
    #[must_use]
    pub const fn needs_drop(&self) -> bool {
        self.drop.is_some()
    }

    /// Check whether this metadata describes `T`.
    #[must_use]
    pub fn is<T: 'static>(&self) -> bool {
        self.type_id == TypeId::of::<T>()
    }

    /// Drop `count` consecutive values starting at `ptr`.
    ///
    /// No-op for types without drop glue.
    ///
    /// # Safety
    ///
    /// `ptr` must point to `count` initialized values of the described
    /// type laid out back to back, and they must not be used afterwards.
    pub unsafe fn drop_values(&self, ptr: *mut u8, count: usize) {
        let Some(drop) = self.drop else { return };
        for i in 0..count {
            // SAFETY: caller guarantees `count` live values at `ptr`.
            unsafe { drop(ptr.add(i * self.layout.size())) };
        }
    }
}

impl fmt::Debug for TypeMeta {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TypeMeta({}, {} bytes)", self.name, self.layout.size())
    }
}

/// One entry of a [`ComponentMetaSet`]: a component id paired with the
/// metadata of its type.
#[derive(Clone, Copy, Debug)]
pub struct ComponentMeta {
    /// Id the component type registered under.
    pub id: ComponentId,
    /// Metadata driving layout and destruction.
    pub meta: TypeMeta,
}

/// Process-wide counter behind component id assignment.
///
/// Serials begin at 1 and are never reused, so every world in the
/// process agrees on which serial a type owns.
static NEXT_COMPONENT_SERIAL: AtomicU32 = AtomicU32::new(1);

/// World-owned table memoizing which id each component type was assigned.
///
/// Assignment itself goes through the process-wide serial counter; the
/// table only remembers outcomes. It stores no type metadata - that
/// travels with [`ComponentMetaSet`] entries into the archetypes that
/// consume it.
#[derive(Default, Debug)]
pub struct ComponentRegistry {
    assigned: HashMap<TypeId, ComponentId>,
}

impl ComponentRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Id for `T`, assigning the next free serial on first use.
    pub fn id_of<T: Component>(&mut self) -> ComponentId {
        *self.assigned.entry(TypeId::of::<T>()).or_insert_with(|| {
            ComponentId::from_serial(NEXT_COMPONENT_SERIAL.fetch_add(1, Ordering::Relaxed))
        })
    }

    /// Id for `T`, if the type was ever used in this world.
    #[must_use]
    pub fn lookup<T: Component>(&self) -> Option<ComponentId> {
        self.assigned.get(&TypeId::of::<T>()).copied()
    }

    /// Number of component types this world has seen.
    #[must_use]
    pub fn len(&self) -> usize {
        self.assigned.len()
    }

    /// Check if no component type was used yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.assigned.is_empty()
    }
}

/// A set of component ids backed by a bit-set.
///
/// Used as the archetype key: equality and hashing are structural over
/// the bit blocks.
#[derive(Clone, Default, PartialEq, Eq, Hash)]
pub struct ComponentSet {
    bits: DynamicBitset,
}

impl ComponentSet {
    /// Create an empty set.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            bits: DynamicBitset::new(),
        }
    }

    /// Insert a component id.
    pub fn insert(&mut self, id: ComponentId) {
        self.bits.set(id.index(), true);
    }

    /// Remove a component id.
    pub fn remove(&mut self, id: ComponentId) {
        self.bits.set(id.index(), false);
    }

    /// Check whether the set contains `id`.
    #[must_use]
    pub fn contains(&self, id: ComponentId) -> bool {
        self.bits.test(id.index())
    }

    /// Check whether every id in `other` is present in `self`.
    #[must_use]
    pub fn contains_all(&self, other: &ComponentSet) -> bool {
        self.bits.is_superset(&other.bits)
    }

    /// Remove every id.
    pub fn clear(&mut self) {
        self.bits.clear();
    }

    /// Check whether the set is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bits.is_empty()
    }

    /// Number of ids in the set.
    #[must_use]
    pub fn len(&self) -> usize {
        self.bits.count()
    }
}

impl fmt::Debug for ComponentSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ComponentSet{:?}", self.bits)
    }
}

/// A component set paired with an insertion-ordered list of metadata.
///
/// The ordered entries are the layout input to archetype construction:
/// column order inside a memory block is the insertion order here.
#[derive(Clone, Default)]
pub struct ComponentMetaSet {
    ids: ComponentSet,
    entries: Vec<ComponentMeta>,
}

impl ComponentMetaSet {
    /// Create an empty meta set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an entry.
    ///
    /// Returns `false` without modifying the set if the component id is
    /// already present.
    pub fn insert(&mut self, entry: ComponentMeta) -> bool {
        if self.ids.contains(entry.id) {
            return false;
        }
        self.ids.insert(entry.id);
        self.entries.push(entry);
        true
    }

    /// Remove a component by id, returning whether it was present.
    pub fn remove(&mut self, id: ComponentId) -> bool {
        if !self.ids.contains(id) {
            return false;
        }
        self.ids.remove(id);
        self.entries.retain(|entry| entry.id != id);
        true
    }

    /// Check whether the set contains `id`.
    #[must_use]
    pub fn contains(&self, id: ComponentId) -> bool {
        self.ids.contains(id)
    }

    /// The id bit-set of this meta set.
    #[must_use]
    pub fn ids(&self) -> &ComponentSet {
        &self.ids
    }

    /// Number of components in the set.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check whether the set is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate over entries in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &ComponentMeta> {
        self.entries.iter()
    }
}

impl PartialEq for ComponentMetaSet {
    fn eq(&self, other: &Self) -> bool {
        self.ids == other.ids
    }
}

impl Eq for ComponentMetaSet {}

impl fmt::Debug for ComponentMetaSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.entries.iter().map(|entry| entry.meta.name()))
            .finish()
    }
}

/// A statically-typed set of component values that can be spawned together.
///
/// Implemented for tuples of 1 to 8 components. The component types of one
/// bundle must be pairwise distinct; materializing the meta set reports a
/// duplicate as [`EcsError::DuplicateComponent`].
pub trait Bundle {
    /// Number of components in the bundle.
    const LEN: usize;

    /// Register every component type and build the insertion-ordered meta
    /// set describing this bundle.
    fn metas(registry: &mut ComponentRegistry) -> EcsResult<ComponentMetaSet>;

    /// Component ids in tuple order.
    fn component_ids(registry: &mut ComponentRegistry) -> SmallVec<[ComponentId; 8]>;

    /// Move every component value to its destination, consuming the bundle.
    ///
    /// # Safety
    ///
    /// `ptrs` must hold one pointer per component in tuple order, each
    /// valid for a write of the corresponding component type.
    unsafe fn write(self, ptrs: &[*mut u8]);
}

macro_rules! impl_bundle {
    ($count:literal; $($T:ident),+) => {
        impl<$($T: Component),+> Bundle for ($($T,)+) {
            const LEN: usize = $count;

            fn metas(registry: &mut ComponentRegistry) -> EcsResult<ComponentMetaSet> {
                let mut metas = ComponentMetaSet::new();
                $(
                    let entry = ComponentMeta {
                        id: registry.id_of::<$T>(),
                        meta: TypeMeta::of::<$T>(),
                    };
                    if !metas.insert(entry) {
                        return Err(EcsError::DuplicateComponent {
                            name: std::any::type_name::<$T>(),
                        });
                    }
                )+
                Ok(metas)
            }

            fn component_ids(registry: &mut ComponentRegistry) -> SmallVec<[ComponentId; 8]> {
                let mut ids = SmallVec::new();
                $(ids.push(registry.id_of::<$T>());)+
                ids
            }

            #[allow(non_snake_case)]
            unsafe fn write(self, ptrs: &[*mut u8]) {
                debug_assert_eq!(ptrs.len(), Self::LEN);
                let ($($T,)+) = self;
                let mut index = 0;
                $(
                    // SAFETY: caller provides one valid destination per
                    // component, in tuple order.
                    unsafe { std::ptr::write(ptrs[index].cast::<$T>(), $T); }
                    #[allow(unused_assignments)]
                    { index += 1; }
                )+
            }
        }
    };
}

impl_bundle!(1; A);
impl_bundle!(2; A, B);
impl_bundle!(3; A, B, C);
impl_bundle!(4; A, B, C, D);
impl_bundle!(5; A, B, C, D, E);
impl_bundle!(6; A, B, C, D, E, F);
impl_bundle!(7; A, B, C, D, E, F, G);
impl_bundle!(8; A, B, C, D, E, F, G, H);
