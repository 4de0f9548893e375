use std::collections::{HashSet, VecDeque};

use framekeep_common::EntityId;

/// A deleted entity waiting for the GPU to stop reading its resources.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeletionRequest {
    pub entity_id: EntityId,
    /// Completed-frame epoch observed before the delete was issued.
    pub requested_epoch: u64,
}

/// FIFO of deletion requests gated on the completed-frame epoch.
///
/// A request observed at epoch `e` is safe once more than
/// `e + frames_in_flight` frames have completed: every frame that could
/// have been recorded with the entity (the ones in flight at `e`, plus the
/// one being built when the delete was issued) is then done.
#[derive(Debug, Clone)]
pub struct DeletionTracker {
    queue: VecDeque<DeletionRequest>,
    queued: HashSet<EntityId>,
    frames_in_flight: u64,
}

impl DeletionTracker {
    pub fn new(frames_in_flight: u64) -> Self {
        Self {
            queue: VecDeque::new(),
            queued: HashSet::new(),
            frames_in_flight,
        }
    }

    pub fn frames_in_flight(&self) -> u64 {
        self.frames_in_flight
    }

    /// Queue `entity_id`. Returns `false` if it is already queued.
    pub fn push(&mut self, entity_id: EntityId, observed_epoch: u64) -> bool {
        if !self.queued.insert(entity_id) {
            return false;
        }
        debug_assert!(
            self.queue
                .back()
                .is_none_or(|last| last.requested_epoch <= observed_epoch),
            "epoch went backwards"
        );
        self.queue.push_back(DeletionRequest {
            entity_id,
            requested_epoch: observed_epoch,
        });
        true
    }

    /// Whether `request` may be finalized once `completed` frames are done.
    pub fn is_safe(&self, request: &DeletionRequest, completed: u64) -> bool {
        request.requested_epoch.saturating_add(self.frames_in_flight) < completed
    }

    /// The oldest request, if it is safe at `completed`.
    pub fn next_ready(&self, completed: u64) -> Option<DeletionRequest> {
        self.queue
            .front()
            .copied()
            .filter(|front| self.is_safe(front, completed))
    }

    pub fn pop_front(&mut self) -> Option<DeletionRequest> {
        let request = self.queue.pop_front()?;
        self.queued.remove(&request.entity_id);
        Some(request)
    }

    /// Pop every request that is safe at `completed`, oldest first.
    ///
    /// Stops at the first request that is not yet safe, so an older request
    /// is never skipped by a newer one.
    pub fn ready(&mut self, completed: u64) -> Vec<DeletionRequest> {
        let mut ready = Vec::new();
        while self.next_ready(completed).is_some() {
            ready.extend(self.pop_front());
        }
        ready
    }

    pub fn contains(&self, entity_id: EntityId) -> bool {
        self.queued.contains(&entity_id)
    }

    pub fn front(&self) -> Option<&DeletionRequest> {
        self.queue.front()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_waits_for_frames_in_flight() {
        let mut t = DeletionTracker::new(2);
        assert!(t.push(EntityId(1), 5));
        // frames 5 and 6 may be in flight, frame 7 may be in recording
        assert!(t.ready(5).is_empty());
        assert!(t.ready(7).is_empty());
        let ready = t.ready(8);
        assert_eq!(
            ready,
            vec![DeletionRequest {
                entity_id: EntityId(1),
                requested_epoch: 5
            }]
        );
        assert!(t.is_empty());
    }

    #[test]
    fn never_finalized_before_requested_epoch() {
        for fif in 1..4 {
            let mut t = DeletionTracker::new(fif);
            for e in 0..10 {
                t.push(EntityId(e), e);
            }
            for completed in 0..20 {
                for req in t.ready(completed) {
                    assert!(completed > req.requested_epoch);
                    assert!(completed > req.requested_epoch + fif);
                }
            }
            assert!(t.is_empty());
        }
    }

    #[test]
    fn fifo_stops_at_first_unsafe() {
        let mut t = DeletionTracker::new(1);
        t.push(EntityId(1), 0);
        t.push(EntityId(2), 3);
        t.push(EntityId(3), 3);
        let first = t.ready(4);
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].entity_id, EntityId(1));
        assert_eq!(t.front().map(|r| r.entity_id), Some(EntityId(2)));

        let rest: Vec<_> = t.ready(5).into_iter().map(|r| r.entity_id).collect();
        assert_eq!(rest, vec![EntityId(2), EntityId(3)]);
    }

    #[test]
    fn duplicate_push_rejected() {
        let mut t = DeletionTracker::new(1);
        assert!(t.push(EntityId(4), 0));
        assert!(!t.push(EntityId(4), 1));
        assert_eq!(t.len(), 1);
        assert!(t.contains(EntityId(4)));
        t.ready(10);
        assert!(!t.contains(EntityId(4)));
        assert!(t.pop_front().is_none());
        // requeue after finalization is allowed
        assert!(t.push(EntityId(4), 10));
    }

    #[test]
    fn next_ready_peeks_without_popping() {
        let mut t = DeletionTracker::new(1);
        t.push(EntityId(1), 0);
        assert_eq!(t.next_ready(1), None);
        assert_eq!(t.next_ready(2).map(|r| r.entity_id), Some(EntityId(1)));
        assert_eq!(t.len(), 1);
        assert!(t.contains(EntityId(1)));
        assert_eq!(t.pop_front().map(|r| r.entity_id), Some(EntityId(1)));
        assert!(!t.contains(EntityId(1)));
    }
}
