//! Engine error types.

use thiserror::Error;

use crate::entity::Entity;

/// Engine error type.
///
/// Every variant describes a programmer-contract violation; none of them
/// is recoverable by retrying. The panicking entry points on
/// [`World`](crate::World) surface these via their `Display` messages,
/// while the `try_*` variants return them for callers that want to match.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum EcsError {
    /// The entity handle is stale or was never issued.
    #[error("entity not alive: {0}")]
    EntityNotAlive(Entity),

    /// The entity's archetype does not carry the requested component.
    #[error("component not found: {name}")]
    MissingComponent {
        /// Type name of the missing component.
        name: &'static str,
    },

    /// The same component type appears more than once in a bundle or in a
    /// query tuple with write access.
    #[error("duplicate component type: {name}")]
    DuplicateComponent {
        /// Type name of the duplicated component.
        name: &'static str,
    },

    /// A single entry's aligned footprint does not fit in one memory block.
    #[error("component set too large for a memory block: {needed} bytes needed, {available} available")]
    LayoutOverflow {
        /// Aligned size of one entity row, entity column included.
        needed: usize,
        /// Size of a memory block in bytes.
        available: usize,
    },
}

/// Result type for engine operations.
pub type EcsResult<T> = Result<T, EcsError>;
