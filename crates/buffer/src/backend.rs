use framekeep_common::{BufferKind, EntityId};

/// Opaque handle to a submitted frame, used to poll for GPU completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FrameTicket(pub u64);

/// One draw in a frame's draw list.
///
/// Offsets are cached from the allocator; they stay valid for as long as the
/// entity is drawn because filled slots never move.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DrawItem {
    pub entity_id: EntityId,
    pub vertex_offset: u64,
    pub index_offset: u64,
    pub index_count: u32,
    pub instance_offset: u64,
    pub material_offset: u64,
    /// Drawn with the highlight outline pass.
    pub stenciled: bool,
}

/// Everything the backend needs to record and submit one frame.
#[derive(Debug, Clone, Copy)]
pub struct FrameDesc<'a> {
    pub draws: &'a [DrawItem],
    pub wireframe: bool,
    /// Offscreen preview pass, if one is active.
    pub preview: Option<PreviewPass<'a>>,
}

/// Offscreen pass that renders a subset of entities into a GUI target.
#[derive(Debug, Clone, Copy)]
pub struct PreviewPass<'a> {
    pub target: u32,
    pub entities: &'a [EntityId],
}

/// Errors reported by a graphics backend.
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("{kind} buffer has not been created")]
    MissingBuffer { kind: BufferKind },
    #[error("copy to {kind} buffer range {offset}..{end} exceeds capacity {capacity}")]
    OutOfBounds {
        kind: BufferKind,
        offset: u64,
        end: u64,
        capacity: u64,
    },
    #[error("device lost: {0}")]
    DeviceLost(String),
}

/// The concrete graphics API, seen only through the operations the
/// resource core needs. Implemented per API; owned by the render thread.
pub trait GraphicsBackend {
    /// Create (or recreate, discarding contents) the buffer backing `kind`.
    ///
    /// Callers must not recreate a buffer while a submitted frame is still
    /// pending; the old buffer is released immediately.
    fn create_buffer(&mut self, kind: BufferKind, capacity: u64) -> Result<(), BackendError>;

    /// Copy `bytes` into `kind`'s buffer starting at `offset`. The range must
    /// not be read by a pending frame.
    fn copy_bytes_to_region(
        &mut self,
        kind: BufferKind,
        offset: u64,
        bytes: &[u8],
    ) -> Result<(), BackendError>;

    /// Record and submit one frame. The returned ticket is polled with
    /// [`GraphicsBackend::is_frame_complete`].
    fn submit_frame(&mut self, frame: FrameDesc<'_>) -> Result<FrameTicket, BackendError>;

    /// Whether the GPU has finished every command of the ticket's frame.
    fn is_frame_complete(&mut self, ticket: FrameTicket) -> bool;
}

impl<B: GraphicsBackend + ?Sized> GraphicsBackend for Box<B> {
    fn create_buffer(&mut self, kind: BufferKind, capacity: u64) -> Result<(), BackendError> {
        (**self).create_buffer(kind, capacity)
    }

    fn copy_bytes_to_region(
        &mut self,
        kind: BufferKind,
        offset: u64,
        bytes: &[u8],
    ) -> Result<(), BackendError> {
        (**self).copy_bytes_to_region(kind, offset, bytes)
    }

    fn submit_frame(&mut self, frame: FrameDesc<'_>) -> Result<FrameTicket, BackendError> {
        (**self).submit_frame(frame)
    }

    fn is_frame_complete(&mut self, ticket: FrameTicket) -> bool {
        (**self).is_frame_complete(ticket)
    }
}
