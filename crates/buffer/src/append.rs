use std::collections::HashMap;

use framekeep_common::{BufferKind, SlotKey};

use crate::backend::GraphicsBackend;
use crate::error::BufferError;

/// Buffer of fixed-size records that only ever grows.
///
/// Used for data written once and never reclaimed, such as the per-entity
/// offset table the GPU reads every frame. Stale records left behind by
/// deleted entities are never read again, so there is no free list.
#[derive(Debug, Clone)]
pub struct AppendOnlyBuffer {
    kind: BufferKind,
    offsets: HashMap<SlotKey, u64>,
    cursor: u64,
    slot_size: u64,
    capacity: u64,
}

impl AppendOnlyBuffer {
    pub fn new(kind: BufferKind, capacity: u64, slot_size: u64) -> Self {
        Self {
            kind,
            offsets: HashMap::new(),
            cursor: 0,
            slot_size,
            capacity,
        }
    }

    pub fn kind(&self) -> BufferKind {
        self.kind
    }

    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    pub fn slot_size(&self) -> u64 {
        self.slot_size
    }

    /// Bytes consumed so far.
    pub fn filled_bytes(&self) -> u64 {
        self.cursor
    }

    /// Number of records appended over the buffer's lifetime.
    pub fn len(&self) -> usize {
        self.offsets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.offsets.is_empty()
    }

    /// No record is left to append.
    pub fn is_full(&self) -> bool {
        self.cursor + self.slot_size > self.capacity
    }

    /// Claim the next record for `key` and return its offset.
    pub fn append(&mut self, key: impl Into<SlotKey>) -> Result<u64, BufferError> {
        let key = key.into();
        if self.offsets.contains_key(&key) {
            return Err(BufferError::DuplicateSlot {
                kind: self.kind,
                key,
            });
        }
        let end = self.cursor + self.slot_size;
        if end > self.capacity {
            return Err(BufferError::OutOfSpace {
                kind: self.kind,
                requested: self.slot_size,
                largest_free: self.capacity - self.cursor,
            });
        }
        let offset = self.cursor;
        self.cursor = end;
        self.offsets.insert(key, offset);
        Ok(offset)
    }

    pub fn get_offset(&self, key: impl Into<SlotKey>) -> Result<u64, BufferError> {
        let key = key.into();
        self.offsets
            .get(&key)
            .copied()
            .ok_or(BufferError::SlotNotFound {
                kind: self.kind,
                key,
            })
    }

    /// Write `key`'s record. `bytes` must fit in one slot.
    pub fn write<B: GraphicsBackend + ?Sized>(
        &self,
        backend: &mut B,
        key: impl Into<SlotKey>,
        bytes: &[u8],
    ) -> Result<(), BufferError> {
        let key = key.into();
        let offset = self.get_offset(key)?;
        let len = bytes.len() as u64;
        if len > self.slot_size {
            return Err(BufferError::WriteOverflow {
                kind: self.kind,
                key,
                len,
                size: self.slot_size,
            });
        }
        backend.copy_bytes_to_region(self.kind, offset, bytes)?;
        Ok(())
    }
}
