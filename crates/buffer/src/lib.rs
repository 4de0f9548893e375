//! GPU buffer slot allocation.
//!
//! A [`GpuBuffer`] packs variably sized resources into one fixed-capacity
//! buffer; an [`AppendOnlyBuffer`] hands out fixed-size records that are
//! never reclaimed. Neither type is thread-aware: the render thread owns them.
//!
//! # Invariants
//! - Filled slots never move while filled.
//! - Free ranges are disjoint, sorted by offset, and never touch.
//! - Filled capacity plus free bytes equals total capacity.
//!
//! The [`GraphicsBackend`] trait is the seam to the concrete graphics API;
//! [`HeadlessBackend`] implements it in host memory for tools and tests.

mod append;
mod backend;
mod error;
mod headless;
mod slot;

pub use append::AppendOnlyBuffer;
pub use backend::{BackendError, DrawItem, FrameDesc, FrameTicket, GraphicsBackend, PreviewPass};
pub use error::BufferError;
pub use headless::{CopyRecord, FrameRecord, HeadlessBackend, HeadlessLog, HeadlessProbe};
pub use slot::{BufferStats, GpuBuffer, MappedSlot, Slot, align_up};

pub fn crate_info() -> &'static str {
    "framekeep-buffer v0.1.0"
}
