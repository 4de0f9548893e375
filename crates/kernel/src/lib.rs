//! Simulation-side entity lifecycle.
//!
//! [`Scene`] owns entity records and turns every mutation into a render
//! command. [`DeletionTracker`] holds deleted entities back until the
//! completed-frame epoch proves no in-flight frame can still read them.
//!
//! # Invariants
//! - Entity ids are never reused.
//! - A deletion is finalized only after `requested_epoch + frames_in_flight`
//!   frames have completed, and in the order deletions were issued.

pub mod deletion;
pub mod scene;

pub use deletion::{DeletionRequest, DeletionTracker};
pub use scene::{EntityHandle, EntityRecord, EntityState, Scene, SceneError, TickReport, connect};

pub fn crate_info() -> &'static str {
    "framekeep-kernel v0.1.0"
}

#[cfg(test)]
mod tests {
    use super::*;
    use framekeep_assets::{MaterialSource, MeshSource};
    use framekeep_buffer::HeadlessBackend;
    use framekeep_common::{BufferKind, MaterialId, MeshId, RenderConfig, Transform};
    use framekeep_render::spawn_render_thread;
    use std::sync::Arc;

    #[test]
    fn crate_loads() {
        assert!(crate_info().contains("kernel"));
    }

    /// Simulation and render threads running spawn/delete cycles concurrently.
    #[test]
    fn two_thread_lifecycle_leaves_buffers_empty() {
        let config = RenderConfig {
            frames_in_flight: 3,
            ..RenderConfig::default()
        };
        let (mut scene, world) = connect(&config, HeadlessBackend::new(2), None).unwrap();
        let handle = spawn_render_thread(world).unwrap();

        let meshes: Vec<MeshSource> = (0..4)
            .map(|i| MeshSource {
                id: MeshId(i),
                vertex_bytes: Arc::from(vec![i as u8; 72 + i as usize * 24]),
                index_bytes: Arc::from(vec![0u8; 36]),
                index_count: 9,
            })
            .collect();
        let materials: Vec<MaterialSource> = (0..2)
            .map(|i| MaterialSource {
                id: MaterialId(i),
                bytes: Arc::from(vec![i as u8; 48]),
            })
            .collect();

        let mut live = Vec::new();
        let mut reclaimed = 0;
        for round in 0..200usize {
            let id = scene
                .spawn(
                    Transform::default(),
                    vec![meshes[round % 4].clone()],
                    vec![materials[round % 2].clone()],
                )
                .unwrap();
            live.push(id);
            if round % 3 == 0 {
                scene.highlight(id).unwrap();
            }
            if live.len() > 8 {
                let victim = live.remove(0);
                scene.delete(victim).unwrap();
            }
            reclaimed += scene.tick().unwrap().reclaimed.len();
            std::thread::yield_now();
        }
        for id in live.drain(..) {
            scene.delete(id).unwrap();
        }
        while scene.pending_deletions() > 0 {
            reclaimed += scene.tick().unwrap().reclaimed.len();
            std::thread::yield_now();
        }
        assert_eq!(reclaimed, 200);
        assert_eq!(scene.entity_count(), 0);
        scene.shutdown().unwrap();

        let world = handle.join().unwrap().unwrap();
        assert_eq!(world.drawable_count(), 0);
        assert_eq!(world.retired_count(), 0);
        assert!(world.registry().resident_meshes().is_empty());
        assert!(world.registry().resident_materials().is_empty());
        assert!(world.instances().is_empty());
        world.instances().check_invariants().unwrap();
        for kind in [BufferKind::Vertex, BufferKind::Index, BufferKind::Material] {
            let buffer = world.registry().buffer(kind).unwrap();
            buffer.check_invariants().unwrap();
            assert_eq!(buffer.free_ranges().count(), 1);
        }
        assert_eq!(world.mapping().len(), 200);
    }
}
