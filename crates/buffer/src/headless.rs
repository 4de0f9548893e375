use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use framekeep_common::{BufferKind, EntityId};
use parking_lot::Mutex;

use crate::backend::{BackendError, DrawItem, FrameDesc, FrameTicket, GraphicsBackend};

/// A copy recorded by the headless backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CopyRecord {
    pub kind: BufferKind,
    pub offset: u64,
    pub len: u64,
}

/// A frame recorded by the headless backend.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameRecord {
    pub ticket: FrameTicket,
    pub draws: Vec<DrawItem>,
    pub wireframe: bool,
    pub preview: Option<(u32, Vec<EntityId>)>,
}

/// Everything the headless backend has been asked to do.
#[derive(Debug, Default)]
pub struct HeadlessLog {
    memory: HashMap<BufferKind, Vec<u8>>,
    pub creates: Vec<(BufferKind, u64)>,
    pub copies: Vec<CopyRecord>,
    pub frames: Vec<FrameRecord>,
    /// Buffers recreated while a submitted frame was still pending.
    pub creates_in_flight: usize,
    /// Instance writes that landed on a uniform a pending frame draws with.
    pub writes_in_flight: usize,
}

impl HeadlessLog {
    /// Bytes currently stored in `kind`'s buffer at `offset..offset + len`.
    pub fn read(&self, kind: BufferKind, offset: u64, len: u64) -> Option<Vec<u8>> {
        let memory = self.memory.get(&kind)?;
        let start = usize::try_from(offset).ok()?;
        let end = usize::try_from(offset + len).ok()?;
        memory.get(start..end).map(<[u8]>::to_vec)
    }

    /// Copies targeting `kind`.
    pub fn copies_to(&self, kind: BufferKind) -> usize {
        self.copies.iter().filter(|c| c.kind == kind).count()
    }
}

/// Shared, thread-safe view of a [`HeadlessBackend`]'s log.
#[derive(Debug, Clone, Default)]
pub struct HeadlessProbe(Arc<Mutex<HeadlessLog>>);

impl HeadlessProbe {
    /// Run `f` with the log locked.
    pub fn with<R>(&self, f: impl FnOnce(&HeadlessLog) -> R) -> R {
        f(&self.0.lock())
    }

    pub fn frame_count(&self) -> usize {
        self.0.lock().frames.len()
    }

    pub fn copy_count(&self) -> usize {
        self.0.lock().copies.len()
    }

    pub fn last_frame(&self) -> Option<FrameRecord> {
        self.0.lock().frames.last().cloned()
    }
}

#[derive(Debug)]
struct PendingFrame {
    done_at: u64,
    instance_offsets: Vec<u64>,
}

/// Backend that keeps buffer contents in host memory and simulates GPU latency.
///
/// The simulated GPU advances one step per submit and per completion poll;
/// a frame completes `latency` steps after it was submitted. Latency 0 means
/// frames complete as soon as they are submitted.
///
/// A frame counts as pending until a completion poll has reported it done.
/// Recreating a buffer or overwriting a drawn uniform while any frame is
/// pending is counted in the log, never refused.
#[derive(Debug)]
pub struct HeadlessBackend {
    log: HeadlessProbe,
    latency: u64,
    gpu_clock: u64,
    next_ticket: u64,
    pending: BTreeMap<FrameTicket, PendingFrame>,
}

impl HeadlessBackend {
    pub fn new(latency: u64) -> Self {
        Self {
            log: HeadlessProbe::default(),
            latency,
            gpu_clock: 0,
            next_ticket: 0,
            pending: BTreeMap::new(),
        }
    }

    /// A handle for inspecting what the backend recorded, from any thread.
    pub fn probe(&self) -> HeadlessProbe {
        self.log.clone()
    }
}

impl Default for HeadlessBackend {
    fn default() -> Self {
        Self::new(1)
    }
}

impl GraphicsBackend for HeadlessBackend {
    fn create_buffer(&mut self, kind: BufferKind, capacity: u64) -> Result<(), BackendError> {
        let len = usize::try_from(capacity)
            .map_err(|_| BackendError::DeviceLost(format!("{kind} buffer too large")))?;
        let mut log = self.log.0.lock();
        if log.memory.contains_key(&kind) && !self.pending.is_empty() {
            log.creates_in_flight += 1;
        }
        log.memory.insert(kind, vec![0; len]);
        log.creates.push((kind, capacity));
        Ok(())
    }

    fn copy_bytes_to_region(
        &mut self,
        kind: BufferKind,
        offset: u64,
        bytes: &[u8],
    ) -> Result<(), BackendError> {
        let mut log = self.log.0.lock();
        let memory = log
            .memory
            .get_mut(&kind)
            .ok_or(BackendError::MissingBuffer { kind })?;
        let end = offset + bytes.len() as u64;
        let capacity = memory.len() as u64;
        if end > capacity {
            return Err(BackendError::OutOfBounds {
                kind,
                offset,
                end,
                capacity,
            });
        }
        // Bounds were checked against a `usize`-sized Vec above.
        memory[offset as usize..end as usize].copy_from_slice(bytes);
        if kind == BufferKind::Instance
            && self.pending.values().any(|frame| {
                frame
                    .instance_offsets
                    .iter()
                    .any(|&read| read >= offset && read < end)
            })
        {
            log.writes_in_flight += 1;
        }
        log.copies.push(CopyRecord {
            kind,
            offset,
            len: bytes.len() as u64,
        });
        Ok(())
    }

    fn submit_frame(&mut self, frame: FrameDesc<'_>) -> Result<FrameTicket, BackendError> {
        let ticket = FrameTicket(self.next_ticket);
        self.next_ticket += 1;
        self.gpu_clock += 1;
        self.pending.insert(
            ticket,
            PendingFrame {
                done_at: self.gpu_clock + self.latency,
                instance_offsets: frame.draws.iter().map(|d| d.instance_offset).collect(),
            },
        );
        self.log.0.lock().frames.push(FrameRecord {
            ticket,
            draws: frame.draws.to_vec(),
            wireframe: frame.wireframe,
            preview: frame
                .preview
                .map(|pass| (pass.target, pass.entities.to_vec())),
        });
        Ok(ticket)
    }

    fn is_frame_complete(&mut self, ticket: FrameTicket) -> bool {
        self.gpu_clock += 1;
        match self.pending.get(&ticket) {
            Some(frame) if frame.done_at <= self.gpu_clock => {
                self.pending.remove(&ticket);
                true
            }
            Some(_) => false,
            // Unknown tickets were already retired.
            None => true,
        }
    }
}
