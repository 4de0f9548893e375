use framekeep_common::{BufferKind, SlotKey};

use crate::backend::BackendError;

/// Errors from slot allocation and slot writes.
///
/// Everything except [`BufferError::OutOfSpace`] means an invariant was
/// broken elsewhere (double spawn, double delete, bad configuration).
#[derive(Debug, thiserror::Error)]
pub enum BufferError {
    #[error("{kind} buffer already holds a slot for {key:?}")]
    DuplicateSlot { kind: BufferKind, key: SlotKey },
    #[error("{kind} buffer has no slot for {key:?}")]
    SlotNotFound { kind: BufferKind, key: SlotKey },
    #[error("{kind} buffer cannot fit {requested} bytes (largest free range {largest_free})")]
    OutOfSpace {
        kind: BufferKind,
        requested: u64,
        largest_free: u64,
    },
    #[error("{kind} buffer alignment {alignment} is not a power of two")]
    MisalignedCapacity { kind: BufferKind, alignment: u64 },
    #[error("{kind} buffer refuses a zero-sized slot for {key:?}")]
    ZeroSizedSlot { kind: BufferKind, key: SlotKey },
    #[error("{kind} buffer cannot shrink from {current} to {requested} bytes")]
    ShrinkRejected {
        kind: BufferKind,
        current: u64,
        requested: u64,
    },
    #[error("write of {len} bytes overflows the {size}-byte {kind} slot for {key:?}")]
    WriteOverflow {
        kind: BufferKind,
        key: SlotKey,
        len: u64,
        size: u64,
    },
    #[error("{kind} buffer free list corrupted: {detail}")]
    Corrupted { kind: BufferKind, detail: String },
    #[error("backend error: {0}")]
    Backend(#[from] BackendError),
}

impl BufferError {
    /// Whether the caller may recover by growing the buffer or refusing the request.
    pub fn is_capacity(&self) -> bool {
        matches!(self, Self::OutOfSpace { .. })
    }
}
