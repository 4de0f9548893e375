use std::collections::{BTreeMap, HashMap};

use framekeep_common::{BufferKind, SlotKey};

use crate::backend::GraphicsBackend;
use crate::error::BufferError;

/// A named byte range inside a [`GpuBuffer`].
///
/// For filled slots `size` is the requested length and `capacity` the
/// aligned footprint. Free ranges always have `size == capacity`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Slot {
    pub offset: u64,
    pub size: u64,
    pub capacity: u64,
}

impl Slot {
    fn free_range(offset: u64, size: u64) -> Self {
        Self {
            offset,
            size,
            capacity: size,
        }
    }

    /// One past the last byte of the slot's footprint.
    pub fn end(&self) -> u64 {
        self.offset + self.capacity
    }
}

/// Occupancy counters for one buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BufferStats {
    pub capacity: u64,
    pub filled_slots: usize,
    pub filled_bytes: u64,
    pub free_bytes: u64,
    pub free_ranges: usize,
    pub largest_free: u64,
    /// Successful `reserve_slot` calls over the buffer's lifetime.
    pub reservations: u64,
    /// Successful `free_slot` calls over the buffer's lifetime.
    pub frees: u64,
}

/// Round `size` up to the next multiple of a power-of-two `alignment`.
///
/// Returns `None` if the rounded value does not fit in a `u64`.
pub fn align_up(size: u64, alignment: u64) -> Option<u64> {
    debug_assert!(alignment.is_power_of_two());
    size.checked_add(alignment - 1).map(|v| v & !(alignment - 1))
}

/// First-fit packing allocator over one fixed-capacity GPU buffer.
///
/// Filled slots never move, so offsets handed out may be cached across
/// frames. Freed slots are coalesced with both neighbours: the free list
/// never holds two touching ranges.
#[derive(Debug, Clone)]
pub struct GpuBuffer {
    kind: BufferKind,
    filled: HashMap<SlotKey, Slot>,
    /// Free ranges keyed by offset.
    free: BTreeMap<u64, Slot>,
    capacity: u64,
    alignment: u64,
    filled_bytes: u64,
    reservations: u64,
    frees: u64,
}

impl GpuBuffer {
    /// An empty buffer: a single free range spanning `[0, capacity)`.
    pub fn new(kind: BufferKind, capacity: u64, alignment: u64) -> Result<Self, BufferError> {
        if !alignment.is_power_of_two() {
            return Err(BufferError::MisalignedCapacity { kind, alignment });
        }
        let mut free = BTreeMap::new();
        if capacity > 0 {
            free.insert(0, Slot::free_range(0, capacity));
        }
        Ok(Self {
            kind,
            filled: HashMap::new(),
            free,
            capacity,
            alignment,
            filled_bytes: 0,
            reservations: 0,
            frees: 0,
        })
    }

    pub fn kind(&self) -> BufferKind {
        self.kind
    }

    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    pub fn alignment(&self) -> u64 {
        self.alignment
    }

    pub fn filled_bytes(&self) -> u64 {
        self.filled_bytes
    }

    /// Number of filled slots.
    pub fn len(&self) -> usize {
        self.filled.len()
    }

    pub fn is_empty(&self) -> bool {
        self.filled.is_empty()
    }

    pub fn contains(&self, key: impl Into<SlotKey>) -> bool {
        self.filled.contains_key(&key.into())
    }

    /// Reserve an aligned slot for `key` and return its offset.
    ///
    /// Picks the lowest-offset free range that fits; any remainder stays free.
    pub fn reserve_slot(
        &mut self,
        key: impl Into<SlotKey>,
        requested_size: u64,
    ) -> Result<u64, BufferError> {
        let key = key.into();
        let kind = self.kind;
        if self.filled.contains_key(&key) {
            return Err(BufferError::DuplicateSlot { kind, key });
        }
        if requested_size == 0 {
            return Err(BufferError::ZeroSizedSlot { kind, key });
        }
        let out_of_space = |buffer: &Self| BufferError::OutOfSpace {
            kind,
            requested: requested_size,
            largest_free: buffer.largest_free(),
        };
        let Some(capacity) = align_up(requested_size, self.alignment) else {
            return Err(out_of_space(self));
        };
        let Some(chosen) = self
            .free
            .values()
            .find(|range| range.size >= capacity)
            .copied()
        else {
            return Err(out_of_space(self));
        };

        self.free.remove(&chosen.offset);
        if chosen.size > capacity {
            let rest = chosen.offset + capacity;
            self.free
                .insert(rest, Slot::free_range(rest, chosen.size - capacity));
        }

        let slot = Slot {
            offset: chosen.offset,
            size: requested_size,
            capacity,
        };
        self.filled.insert(key, slot);
        self.filled_bytes += capacity;
        self.reservations += 1;
        tracing::trace!(%kind, ?key, offset = slot.offset, capacity, "slot reserved");
        Ok(slot.offset)
    }

    /// Release `key`'s slot and merge it with adjacent free ranges.
    pub fn free_slot(&mut self, key: impl Into<SlotKey>) -> Result<(), BufferError> {
        let key = key.into();
        let slot = self.filled.remove(&key).ok_or(BufferError::SlotNotFound {
            kind: self.kind,
            key,
        })?;
        self.filled_bytes -= slot.capacity;
        self.frees += 1;
        // The logical size is discarded; the whole footprint goes back.
        self.insert_free(Slot::free_range(slot.offset, slot.capacity));
        tracing::trace!(kind = %self.kind, ?key, offset = slot.offset, "slot freed");
        Ok(())
    }

    /// Insert a free range, coalescing with the range that starts where it
    /// ends and the range that ends where it starts.
    fn insert_free(&mut self, mut range: Slot) {
        if let Some(after) = self.free.remove(&range.end()) {
            range.size += after.size;
        }
        let before = self
            .free
            .range(..range.offset)
            .next_back()
            .filter(|(_, prev)| prev.end() == range.offset)
            .map(|(&offset, _)| offset);
        if let Some(offset) = before {
            if let Some(prev) = self.free.remove(&offset) {
                range.offset = prev.offset;
                range.size += prev.size;
            }
        }
        range.capacity = range.size;
        self.free.insert(range.offset, range);
    }

    /// Extend the buffer to `new_capacity` bytes. Filled offsets are untouched;
    /// the new tail joins the free list.
    pub fn grow(&mut self, new_capacity: u64) -> Result<(), BufferError> {
        if new_capacity < self.capacity {
            return Err(BufferError::ShrinkRejected {
                kind: self.kind,
                current: self.capacity,
                requested: new_capacity,
            });
        }
        if new_capacity > self.capacity {
            let tail = Slot::free_range(self.capacity, new_capacity - self.capacity);
            self.capacity = new_capacity;
            self.insert_free(tail);
            tracing::debug!(kind = %self.kind, capacity = new_capacity, "buffer grown");
        }
        Ok(())
    }

    pub fn get_offset(&self, key: impl Into<SlotKey>) -> Result<u64, BufferError> {
        self.get_slot(key).map(|slot| slot.offset)
    }

    pub fn get_slot(&self, key: impl Into<SlotKey>) -> Result<Slot, BufferError> {
        let key = key.into();
        self.filled
            .get(&key)
            .copied()
            .ok_or(BufferError::SlotNotFound {
                kind: self.kind,
                key,
            })
    }

    /// Expose `key`'s slot for a data copy. The returned guard is the mapping;
    /// dropping it unmaps. While it lives the buffer cannot be mutated.
    pub fn map_for_write(&self, key: impl Into<SlotKey>) -> Result<MappedSlot<'_>, BufferError> {
        let key = key.into();
        let slot = self.get_slot(key)?;
        Ok(MappedSlot {
            buffer: self,
            key,
            slot,
        })
    }

    /// Filled slots in offset order.
    pub fn filled_slots(&self) -> Vec<(SlotKey, Slot)> {
        let mut slots: Vec<_> = self.filled.iter().map(|(k, s)| (*k, *s)).collect();
        slots.sort_by_key(|(_, slot)| slot.offset);
        slots
    }

    /// Free ranges in offset order.
    pub fn free_ranges(&self) -> impl Iterator<Item = &Slot> {
        self.free.values()
    }

    pub fn largest_free(&self) -> u64 {
        self.free.values().map(|range| range.size).max().unwrap_or(0)
    }

    pub fn stats(&self) -> BufferStats {
        BufferStats {
            capacity: self.capacity,
            filled_slots: self.filled.len(),
            filled_bytes: self.filled_bytes,
            free_bytes: self.free.values().map(|range| range.size).sum(),
            free_ranges: self.free.len(),
            largest_free: self.largest_free(),
            reservations: self.reservations,
            frees: self.frees,
        }
    }

    /// Verify the free-list and accounting invariants.
    pub fn check_invariants(&self) -> Result<(), BufferError> {
        let corrupted = |detail: String| BufferError::Corrupted {
            kind: self.kind,
            detail,
        };
        let mut prev_end: Option<u64> = None;
        let mut free_bytes = 0u64;
        for (&offset, range) in &self.free {
            if offset != range.offset || range.size != range.capacity || range.size == 0 {
                return Err(corrupted(format!("malformed free range at {offset}")));
            }
            if let Some(end) = prev_end {
                if end > offset {
                    return Err(corrupted(format!("free ranges overlap at {offset}")));
                }
                if end == offset {
                    return Err(corrupted(format!("free ranges touch at {offset}")));
                }
            }
            prev_end = Some(range.end());
            free_bytes += range.size;
        }
        if prev_end.is_some_and(|end| end > self.capacity) {
            return Err(corrupted("free range past capacity".into()));
        }
        let filled: u64 = self.filled.values().map(|slot| slot.capacity).sum();
        if filled != self.filled_bytes {
            return Err(corrupted(format!(
                "filled accounting {} != {filled}",
                self.filled_bytes
            )));
        }
        if filled + free_bytes != self.capacity {
            return Err(corrupted(format!(
                "filled {filled} + free {free_bytes} != capacity {}",
                self.capacity
            )));
        }
        Ok(())
    }
}

/// Write access to one filled slot, valid until dropped.
#[derive(Debug)]
pub struct MappedSlot<'a> {
    buffer: &'a GpuBuffer,
    key: SlotKey,
    slot: Slot,
}

impl MappedSlot<'_> {
    pub fn slot(&self) -> Slot {
        self.slot
    }

    /// Copy `bytes` to the start of the slot.
    pub fn write<B: GraphicsBackend + ?Sized>(
        &self,
        backend: &mut B,
        bytes: &[u8],
    ) -> Result<(), BufferError> {
        self.write_at(backend, 0, bytes)
    }

    /// Copy `bytes` into the slot starting `at` bytes past its offset.
    pub fn write_at<B: GraphicsBackend + ?Sized>(
        &self,
        backend: &mut B,
        at: u64,
        bytes: &[u8],
    ) -> Result<(), BufferError> {
        let len = at.saturating_add(bytes.len() as u64);
        if len > self.slot.size {
            return Err(BufferError::WriteOverflow {
                kind: self.buffer.kind,
                key: self.key,
                len,
                size: self.slot.size,
            });
        }
        backend.copy_bytes_to_region(self.buffer.kind, self.slot.offset + at, bytes)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use framekeep_common::{EntityId, MeshId};

    fn key(n: u64) -> SlotKey {
        SlotKey::Entity(EntityId(n))
    }

    fn buffer(capacity: u64, alignment: u64) -> GpuBuffer {
        GpuBuffer::new(BufferKind::Vertex, capacity, alignment).unwrap()
    }

    #[test]
    fn new_buffer_is_one_free_range() {
        let b = buffer(100, 1);
        let ranges: Vec<_> = b.free_ranges().copied().collect();
        assert_eq!(ranges, vec![Slot::free_range(0, 100)]);
        assert!(b.is_empty());
        b.check_invariants().unwrap();
    }

    #[test]
    fn non_power_of_two_alignment_rejected() {
        let err = GpuBuffer::new(BufferKind::Index, 100, 3).unwrap_err();
        assert!(matches!(err, BufferError::MisalignedCapacity { alignment: 3, .. }));
        assert!(GpuBuffer::new(BufferKind::Index, 100, 0).is_err());
    }

    #[test]
    fn unaligned_packing_scenario() {
        let mut b = buffer(100, 1);
        assert_eq!(b.reserve_slot(key(0), 10).unwrap(), 0);
        assert_eq!(b.reserve_slot(key(1), 30).unwrap(), 10);
        assert_eq!(b.reserve_slot(key(2), 30).unwrap(), 40);

        b.free_slot(key(1)).unwrap();
        // 30 free at 10 and 30 free at 70, not contiguous
        let err = b.reserve_slot(key(3), 60).unwrap_err();
        assert!(matches!(
            err,
            BufferError::OutOfSpace {
                requested: 60,
                largest_free: 30,
                ..
            }
        ));
        b.check_invariants().unwrap();

        b.free_slot(key(0)).unwrap();
        b.free_slot(key(2)).unwrap();
        assert_eq!(b.reserve_slot(key(4), 100).unwrap(), 0);
        b.check_invariants().unwrap();
    }

    #[test]
    fn aligned_packing_scenario() {
        let mut b = buffer(100, 4);
        assert_eq!(b.reserve_slot(key(0), 10).unwrap(), 0);
        assert_eq!(b.get_slot(key(0)).unwrap().capacity, 12);
        assert_eq!(b.reserve_slot(key(1), 30).unwrap(), 12);
        assert_eq!(b.get_slot(key(1)).unwrap().capacity, 32);
        // 100 - 44 = 56 remaining, 24 rounds to 24
        assert_eq!(b.reserve_slot(key(2), 24).unwrap(), 44);
        assert_eq!(b.get_slot(key(2)).unwrap().size, 24);
        assert_eq!(b.stats().free_bytes, 32);

        // 32 free; 33 rounds to 36 and no longer fits
        assert!(b.reserve_slot(key(3), 33).unwrap_err().is_capacity());
        assert_eq!(b.reserve_slot(key(3), 29).unwrap(), 68);
        b.check_invariants().unwrap();
    }

    #[test]
    fn capacity_is_smallest_aligned_multiple() {
        for alignment in [1u64, 2, 4, 16, 256] {
            for size in 1..=600u64 {
                let mut b = buffer(4096, alignment);
                b.reserve_slot(key(0), size).unwrap();
                let cap = b.get_slot(key(0)).unwrap().capacity;
                assert_eq!(cap % alignment, 0);
                assert!(cap >= size);
                assert!(cap - size < alignment, "size {size} align {alignment} cap {cap}");
            }
        }
    }

    #[test]
    fn duplicate_and_missing_slots_rejected() {
        let mut b = buffer(64, 1);
        b.reserve_slot(key(1), 8).unwrap();
        assert!(matches!(
            b.reserve_slot(key(1), 8),
            Err(BufferError::DuplicateSlot { .. })
        ));
        assert!(matches!(
            b.free_slot(key(2)),
            Err(BufferError::SlotNotFound { .. })
        ));
        assert!(matches!(
            b.get_offset(key(2)),
            Err(BufferError::SlotNotFound { .. })
        ));
        assert!(matches!(
            b.reserve_slot(key(3), 0),
            Err(BufferError::ZeroSizedSlot { .. })
        ));
    }

    #[test]
    fn keys_of_different_classes_do_not_collide() {
        let mut b = buffer(64, 1);
        b.reserve_slot(EntityId(1), 8).unwrap();
        b.reserve_slot(MeshId(1), 8).unwrap();
        assert_eq!(b.len(), 2);
    }

    #[test]
    fn free_merges_with_following_range() {
        let mut b = buffer(30, 1);
        b.reserve_slot(key(0), 10).unwrap();
        b.reserve_slot(key(1), 10).unwrap();
        b.free_slot(key(0)).unwrap();
        // [0,10) free, [10,20) filled, [20,30) free
        b.free_slot(key(1)).unwrap();
        let ranges: Vec<_> = b.free_ranges().copied().collect();
        assert_eq!(ranges, vec![Slot::free_range(0, 30)]);
    }

    #[test]
    fn free_merges_with_preceding_range() {
        let mut b = buffer(30, 1);
        b.reserve_slot(key(0), 10).unwrap();
        b.reserve_slot(key(1), 10).unwrap();
        b.reserve_slot(key(2), 10).unwrap();
        b.free_slot(key(0)).unwrap();
        b.free_slot(key(1)).unwrap();
        let ranges: Vec<_> = b.free_ranges().copied().collect();
        assert_eq!(ranges, vec![Slot::free_range(0, 20)]);
        b.check_invariants().unwrap();
    }

    #[test]
    fn free_discards_logical_size() {
        let mut b = buffer(32, 8);
        b.reserve_slot(key(0), 3).unwrap();
        b.reserve_slot(key(1), 3).unwrap();
        b.free_slot(key(0)).unwrap();
        let first = *b.free_ranges().next().unwrap();
        assert_eq!(first, Slot::free_range(0, 8));
        // the freed footprint is reusable at full capacity
        assert_eq!(b.reserve_slot(key(2), 8).unwrap(), 0);
    }

    #[test]
    fn offsets_stable_under_churn() {
        let mut b = buffer(1 << 16, 16);
        let mut live: Vec<(SlotKey, u64)> = Vec::new();
        let mut state = 0x2545_f491_4f6c_dd1du64;
        let mut next = 0u64;
        for _ in 0..5_000 {
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            if state % 3 != 0 || live.is_empty() {
                let size = 1 + state % 700;
                let k = key(next);
                next += 1;
                if let Ok(offset) = b.reserve_slot(k, size) {
                    live.push((k, offset));
                }
            } else {
                let idx = (state as usize / 3) % live.len();
                let (k, _) = live.swap_remove(idx);
                b.free_slot(k).unwrap();
            }
            for (k, offset) in &live {
                assert_eq!(b.get_offset(*k).unwrap(), *offset);
            }
        }
        b.check_invariants().unwrap();

        for (k, _) in live.drain(..) {
            b.free_slot(k).unwrap();
        }
        let ranges: Vec<_> = b.free_ranges().copied().collect();
        assert_eq!(ranges, vec![Slot::free_range(0, 1 << 16)]);
    }

    #[test]
    fn grow_extends_trailing_free_range() {
        let mut b = buffer(32, 4);
        b.reserve_slot(key(0), 16).unwrap();
        b.grow(64).unwrap();
        let ranges: Vec<_> = b.free_ranges().copied().collect();
        assert_eq!(ranges, vec![Slot::free_range(16, 48)]);
        assert_eq!(b.get_offset(key(0)).unwrap(), 0);
        b.check_invariants().unwrap();

        assert!(matches!(
            b.grow(16),
            Err(BufferError::ShrinkRejected { .. })
        ));
    }

    #[test]
    fn grow_full_buffer_adds_new_range() {
        let mut b = buffer(16, 4);
        b.reserve_slot(key(0), 16).unwrap();
        assert_eq!(b.free_ranges().count(), 0);
        b.grow(32).unwrap();
        assert_eq!(b.reserve_slot(key(1), 16).unwrap(), 16);
        b.check_invariants().unwrap();
    }

    #[test]
    fn stats_track_lifetime_counters() {
        let mut b = buffer(100, 1);
        b.reserve_slot(key(0), 10).unwrap();
        b.reserve_slot(key(1), 10).unwrap();
        b.free_slot(key(0)).unwrap();
        let stats = b.stats();
        assert_eq!(stats.reservations, 2);
        assert_eq!(stats.frees, 1);
        assert_eq!(stats.filled_slots, 1);
        assert_eq!(stats.filled_bytes, 10);
        assert_eq!(stats.free_bytes, 90);
        assert_eq!(stats.free_ranges, 2);
        assert_eq!(stats.largest_free, 80);
    }

    #[test]
    fn filled_slots_sorted_by_offset() {
        let mut b = buffer(100, 1);
        b.reserve_slot(key(5), 10).unwrap();
        b.reserve_slot(key(1), 10).unwrap();
        let offsets: Vec<u64> = b.filled_slots().iter().map(|(_, s)| s.offset).collect();
        assert_eq!(offsets, vec![0, 10]);
    }
}
