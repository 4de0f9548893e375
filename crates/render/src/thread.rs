use std::thread::JoinHandle;

use framekeep_buffer::GraphicsBackend;

use crate::error::RenderError;
use crate::world::RenderWorld;

/// Run `world` on its own thread: drain commands, render, repeat.
///
/// The loop ends at `Shutdown` (or when every sender is dropped). Outstanding
/// frames are waited for before the world is handed back through the handle.
pub fn spawn_render_thread<B>(
    mut world: RenderWorld<B>,
) -> Result<JoinHandle<Result<RenderWorld<B>, RenderError>>, RenderError>
where
    B: GraphicsBackend + Send + 'static,
{
    let handle = std::thread::Builder::new()
        .name("render".into())
        .spawn(move || -> Result<RenderWorld<B>, RenderError> {
            tracing::info!("render thread started");
            loop {
                let report = world.drain_and_apply()?;
                if report.shutdown {
                    break;
                }
                world.render_frame()?;
                std::thread::yield_now();
            }
            world.wait_idle()?;
            tracing::info!(frames = world.frames_submitted(), "render thread stopped");
            Ok(world)
        })?;
    Ok(handle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::{Command, SpawnRequest, command_channel, feedback_channel};
    use framekeep_assets::{MaterialSource, MeshSource};
    use framekeep_buffer::HeadlessBackend;
    use framekeep_common::{
        BufferConfig, BufferKind, EntityId, MaterialId, MeshId, RenderConfig, Transform,
    };
    use glam::Vec3;
    use std::sync::Arc;

    #[test]
    fn thread_runs_until_shutdown() {
        let backend = HeadlessBackend::new(2);
        let probe = backend.probe();
        let (tx, rx) = command_channel();
        let (fb_tx, _fb_rx) = feedback_channel();
        let (world, epoch) = RenderWorld::new(&RenderConfig::default(), backend, rx, fb_tx).unwrap();

        let handle = spawn_render_thread(world).unwrap();
        while epoch.completed() < 3 {
            std::thread::yield_now();
        }
        tx.enqueue(Command::ToggleWireframe);
        tx.enqueue(Command::Shutdown);

        let world = handle.join().unwrap().unwrap();
        assert!(world.wireframe());
        assert_eq!(world.frames_outstanding(), 0);
        assert_eq!(epoch.completed(), world.frames_submitted());
        assert_eq!(probe.frame_count() as u64, world.frames_submitted());
    }

    #[test]
    fn pipelined_frames_never_see_shared_memory_change() {
        let config = RenderConfig {
            frames_in_flight: 3,
            vertex: BufferConfig::new(128, 16),
            ..RenderConfig::default()
        };
        let backend = HeadlessBackend::new(3);
        let probe = backend.probe();
        let (tx, rx) = command_channel();
        let (fb_tx, _fb_rx) = feedback_channel();
        let (world, epoch) = RenderWorld::new(&config, backend, rx, fb_tx).unwrap();
        let handle = spawn_render_thread(world).unwrap();

        for i in 0..24u64 {
            tx.enqueue(Command::Spawn(SpawnRequest {
                entity_id: EntityId(i),
                transform: Transform::default(),
                meshes: vec![MeshSource {
                    id: MeshId(i),
                    vertex_bytes: Arc::from(vec![i as u8; 64]),
                    index_bytes: Arc::from(vec![0u8; 12]),
                    index_count: 3,
                }],
                materials: vec![MaterialSource {
                    id: MaterialId(0),
                    bytes: Arc::from(vec![0u8; 48]),
                }],
            }));
            for target in 0..=i {
                tx.enqueue(Command::SetTransform {
                    entity_id: EntityId(target),
                    transform: Transform::from_position(Vec3::splat(i as f32)),
                });
            }
            let seen = epoch.completed();
            while epoch.completed() == seen {
                std::thread::yield_now();
            }
        }
        tx.enqueue(Command::Shutdown);

        let world = handle.join().unwrap().unwrap();
        assert_eq!(world.drawable_count(), 24);
        assert!(world.registry().buffer(BufferKind::Vertex).unwrap().capacity() > 128);
        assert_eq!(probe.with(|log| log.creates_in_flight), 0);
        assert_eq!(probe.with(|log| log.writes_in_flight), 0);
    }
}
