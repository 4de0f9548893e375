use framekeep_buffer::{BackendError, BufferError};
use framekeep_common::{BufferKind, SlotKey};

/// Errors from acquiring or releasing shared resources.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error(transparent)]
    Buffer(#[from] BufferError),
    #[error("backend error: {0}")]
    Backend(#[from] BackendError),
    /// Released more often than acquired: a double delete somewhere upstream.
    #[error("release of {key:?} with no outstanding references")]
    UnderflowRelease { key: SlotKey },
}

impl RegistryError {
    /// Whether the request failed for lack of buffer space.
    pub fn is_capacity(&self) -> bool {
        matches!(self, Self::Buffer(err) if err.is_capacity())
    }

    /// The buffer that ran out of space, if that is why the request failed.
    pub fn exhausted(&self) -> Option<BufferKind> {
        match self {
            Self::Buffer(BufferError::OutOfSpace { kind, .. }) => Some(*kind),
            _ => None,
        }
    }
}
