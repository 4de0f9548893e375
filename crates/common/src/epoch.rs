use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Writer half of the completed-frame counter. Owned by the render thread.
///
/// Deliberately not `Clone`: exactly one thread may advance the epoch.
#[derive(Debug)]
pub struct FrameEpoch {
    completed: Arc<AtomicU64>,
}

/// Reader half of the completed-frame counter. Cheap to clone and share.
#[derive(Debug, Clone)]
pub struct EpochReader {
    completed: Arc<AtomicU64>,
}

impl FrameEpoch {
    /// Create a counter at epoch 0 along with a reader for it.
    pub fn new() -> (Self, EpochReader) {
        let completed = Arc::new(AtomicU64::new(0));
        let reader = EpochReader {
            completed: Arc::clone(&completed),
        };
        (Self { completed }, reader)
    }

    /// Record one more fully completed frame and return the new epoch.
    ///
    /// Must only be called once the backend has confirmed the frame's GPU
    /// work is done. Release ordering pairs with [`EpochReader::completed`].
    pub fn advance(&self) -> u64 {
        self.completed.fetch_add(1, Ordering::Release) + 1
    }

    /// Current epoch as seen by the writer.
    pub fn current(&self) -> u64 {
        self.completed.load(Ordering::Relaxed)
    }

    /// Another reader for this counter.
    pub fn reader(&self) -> EpochReader {
        EpochReader {
            completed: Arc::clone(&self.completed),
        }
    }
}

impl EpochReader {
    /// Number of frames the render thread has confirmed complete.
    pub fn completed(&self) -> u64 {
        self.completed.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_at_zero() {
        let (epoch, reader) = FrameEpoch::new();
        assert_eq!(epoch.current(), 0);
        assert_eq!(reader.completed(), 0);
    }

    #[test]
    fn advance_is_visible_to_readers() {
        let (epoch, reader) = FrameEpoch::new();
        let other = epoch.reader();
        assert_eq!(epoch.advance(), 1);
        assert_eq!(epoch.advance(), 2);
        assert_eq!(reader.completed(), 2);
        assert_eq!(other.completed(), 2);
    }

    #[test]
    fn advance_across_threads() {
        let (epoch, reader) = FrameEpoch::new();
        let handle = std::thread::spawn(move || {
            for _ in 0..1000 {
                epoch.advance();
            }
        });
        let mut last = 0;
        while last < 1000 {
            let now = reader.completed();
            assert!(now >= last, "epoch went backwards: {last} -> {now}");
            last = now;
            std::thread::yield_now();
        }
        handle.join().unwrap();
        assert_eq!(reader.completed(), 1000);
    }
}
