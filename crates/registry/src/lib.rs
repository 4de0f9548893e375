//! Shared Resource Registry: refcounted meshes and materials.
//!
//! # Invariants
//! - Every resident resource has a refcount of at least 1; a zero count
//!   never exists, the entry and its slots go away together.
//! - A resource's bytes are uploaded once per residency.

mod error;
mod registry;

pub use error::RegistryError;
pub use registry::{Acquired, MeshSlots, Release, SharedResourceRegistry};

pub fn crate_info() -> &'static str {
    "framekeep-registry v0.1.0"
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crate_loads() {
        assert!(crate_info().contains("registry"));
    }
}
