//! Shared vocabulary for the framekeep workspace.
//!
//! # Invariants
//! - Identifiers are plain values; no component holds a reference to another.
//! - The epoch counter only moves forward and has exactly one writer.

mod config;
mod epoch;
mod types;

pub use config::{BufferConfig, ConfigError, RenderConfig};
pub use epoch::{EpochReader, FrameEpoch};
pub use types::{BufferKind, EntityId, MaterialId, MeshId, SlotKey, Transform};

pub fn crate_info() -> &'static str {
    "framekeep-common v0.1.0"
}
