use std::time::Duration;

use framekeep_buffer::{BackendError, BufferError, FrameTicket};
use framekeep_common::{BufferKind, ConfigError, EntityId};
use framekeep_registry::RegistryError;

/// Errors that stop the render thread.
#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error(transparent)]
    Buffer(#[from] BufferError),
    #[error("backend error: {0}")]
    Backend(#[from] BackendError),
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("{kind} offset {offset} does not fit the 32-bit mapping record")]
    OffsetOverflow { kind: BufferKind, offset: u64 },
    /// The same entity was spawned twice: the scene broke id uniqueness.
    #[error("spawn of {entity_id}, which already exists")]
    DuplicateSpawn { entity_id: EntityId },
    #[error("frame {ticket:?} did not complete within {timeout:?}")]
    FrameTimeout {
        ticket: FrameTicket,
        timeout: Duration,
    },
    #[error("failed to start render thread: {0}")]
    Spawn(#[from] std::io::Error),
}

impl RenderError {
    /// Whether the error is a buffer running out of space.
    pub fn is_capacity(&self) -> bool {
        match self {
            Self::Registry(err) => err.is_capacity(),
            Self::Buffer(err) => err.is_capacity(),
            _ => false,
        }
    }
}
