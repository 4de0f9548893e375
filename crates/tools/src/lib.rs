//! Developer tooling: read-only reports over render-thread state.

mod inspector;

pub use inspector::{BufferInspector, BufferReport, WorldSummary};

pub fn crate_info() -> &'static str {
    "framekeep-tools v0.1.0"
}
