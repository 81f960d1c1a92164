//! Slate ECS - archetype-based entity-component storage.
//!
//! Entities carrying the same set of component types are grouped into an
//! archetype, which stores them in fixed-size 16 KiB memory blocks laid
//! out Struct-of-Arrays: one packed column per component type, plus a
//! read-only entity column. Views iterate those columns in lockstep at
//! near-memory-bandwidth speed.
//!
//! # Key Concepts
//!
//! - **Entity**: an opaque `(id, generation)` handle; recycled ids bump
//!   the generation so stale handles are detectable
//! - **Component**: a plain data type attached to an entity
//! - **Archetype**: the storage bucket for one exact combination of
//!   component types
//! - **Memory block**: a 16 KiB fixed-capacity SoA buffer; erasing swaps
//!   the archetype's last entity into the gap to keep blocks packed
//! - **View**: a lazy join over all entities whose archetype carries the
//!   queried components
//!
//! # Example
//!
//! ```ignore
//! use slate_ecs::prelude::*;
//!
//! struct Position { x: f32, y: f32 }
//! struct Velocity { x: f32, y: f32 }
//!
//! let mut world = World::new();
//! let e = world.spawn((Position { x: 0.0, y: 0.0 }, Velocity { x: 1.0, y: 0.5 }));
//!
//! world.view_mut::<(&mut Position, &Velocity)>().each(|(pos, vel)| {
//!     pos.x += vel.x;
//!     pos.y += vel.y;
//! });
//!
//! assert_eq!(world.get::<Position>(e).x, 1.0);
//! world.despawn(e);
//! assert!(!world.alive(e));
//! ```
//!
//! Structural changes on a live entity (adding or removing components)
//! are not supported: an entity keeps its archetype for its lifetime.

mod archetype;
mod bitset;
mod block;
mod component;
mod entity;
mod error;
mod sparse;
mod view;
mod world;

pub use archetype::{Archetype, ArchetypeId, ArchetypeStorage};
pub use bitset::DynamicBitset;
pub use block::{BLOCK_SIZE, MemBlock};
pub use component::{
    Bundle, Component, ComponentId, ComponentMeta, ComponentMetaSet, ComponentRegistry,
    ComponentSet, TypeMeta,
};
pub use entity::{Entity, EntityId, EntityPool, Generation};
pub use error::{EcsError, EcsResult};
pub use sparse::SparseMap;
pub use view::{Query, QueryRef, ReadOnlyQuery, ReadOnlyRef, View, ViewIter};
pub use world::{EntityLocation, World};

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::{Bundle, Component, EcsError, Entity, World};
}
