use std::fmt;

use framekeep_buffer::{AppendOnlyBuffer, GpuBuffer, GraphicsBackend};
use framekeep_common::BufferKind;
use framekeep_render::RenderWorld;

/// Buffer inspector for developer tooling.
///
/// Read-only queries against render-thread state. Call it from the render
/// thread, or on a world handed back by the render thread's join handle.
pub struct BufferInspector;

impl BufferInspector {
    /// Occupancy of every buffer the world owns, in [`BufferKind`] order.
    pub fn reports<B: GraphicsBackend>(world: &RenderWorld<B>) -> Vec<BufferReport> {
        let registry = world.registry();
        let shared = [BufferKind::Vertex, BufferKind::Index, BufferKind::Material];
        let mut reports: Vec<BufferReport> = shared
            .into_iter()
            .filter_map(|kind| registry.buffer(kind))
            .map(BufferReport::from_buffer)
            .collect();
        reports.push(BufferReport::from_buffer(world.instances()));
        reports.push(BufferReport::from_append_only(world.mapping()));
        reports.sort_by_key(|r| r.kind);
        reports
    }

    pub fn summary<B: GraphicsBackend>(world: &RenderWorld<B>) -> WorldSummary {
        let registry = world.registry();
        WorldSummary {
            frames_submitted: world.frames_submitted(),
            frames_outstanding: world.frames_outstanding(),
            completed_epoch: world.epoch_reader().completed(),
            drawables: world.drawable_count(),
            retired: world.retired_count(),
            resident_meshes: registry.resident_meshes().len(),
            resident_materials: registry.resident_materials().len(),
            uploads: registry.uploads(),
        }
    }
}

/// Occupancy of one buffer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BufferReport {
    pub kind: BufferKind,
    pub capacity: u64,
    pub filled_slots: usize,
    pub filled_bytes: u64,
    pub free_ranges: usize,
    pub largest_free: u64,
    /// Share of free bytes outside the largest free range, 0.0 to 1.0.
    pub fragmentation: f64,
}

impl BufferReport {
    pub fn from_buffer(buffer: &GpuBuffer) -> Self {
        let stats = buffer.stats();
        let fragmentation = if stats.free_bytes == 0 {
            0.0
        } else {
            1.0 - stats.largest_free as f64 / stats.free_bytes as f64
        };
        Self {
            kind: buffer.kind(),
            capacity: stats.capacity,
            filled_slots: stats.filled_slots,
            filled_bytes: stats.filled_bytes,
            free_ranges: stats.free_ranges,
            largest_free: stats.largest_free,
            fragmentation,
        }
    }

    /// Append-only buffers have one free range: the tail past the cursor.
    pub fn from_append_only(buffer: &AppendOnlyBuffer) -> Self {
        let tail = buffer.capacity() - buffer.filled_bytes();
        Self {
            kind: buffer.kind(),
            capacity: buffer.capacity(),
            filled_slots: buffer.len(),
            filled_bytes: buffer.filled_bytes(),
            free_ranges: usize::from(tail > 0),
            largest_free: tail,
            fragmentation: 0.0,
        }
    }

    pub fn occupancy(&self) -> f64 {
        if self.capacity == 0 {
            return 0.0;
        }
        self.filled_bytes as f64 / self.capacity as f64
    }
}

impl fmt::Display for BufferReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:<8} {:>6} slots {:>10}/{:<10} bytes ({:>5.1}%) free_ranges={} largest_free={} frag={:.2}",
            self.kind.to_string(),
            self.filled_slots,
            self.filled_bytes,
            self.capacity,
            self.occupancy() * 100.0,
            self.free_ranges,
            self.largest_free,
            self.fragmentation,
        )
    }
}

/// Summary of render-thread state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorldSummary {
    pub frames_submitted: u64,
    pub frames_outstanding: usize,
    pub completed_epoch: u64,
    pub drawables: usize,
    pub retired: usize,
    pub resident_meshes: usize,
    pub resident_materials: usize,
    pub uploads: u64,
}

impl fmt::Display for WorldSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Render: frames={} outstanding={} epoch={} drawables={} retired={} meshes={} materials={} uploads={}",
            self.frames_submitted,
            self.frames_outstanding,
            self.completed_epoch,
            self.drawables,
            self.retired,
            self.resident_meshes,
            self.resident_materials,
            self.uploads,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use framekeep_assets::{MaterialSource, MeshSource};
    use framekeep_buffer::HeadlessBackend;
    use framekeep_common::{EntityId, MaterialId, MeshId, RenderConfig, Transform};
    use framekeep_render::{Command, SpawnRequest, command_channel, feedback_channel};
    use std::sync::Arc;

    fn world_with(entities: u64) -> RenderWorld<HeadlessBackend> {
        let (tx, rx) = command_channel();
        let (fb_tx, _fb_rx) = feedback_channel();
        let (mut world, _epoch) =
            RenderWorld::new(&RenderConfig::default(), HeadlessBackend::new(0), rx, fb_tx).unwrap();
        for i in 0..entities {
            tx.enqueue(Command::Spawn(SpawnRequest {
                entity_id: EntityId(i),
                transform: Transform::default(),
                meshes: vec![MeshSource {
                    id: MeshId(i % 2),
                    vertex_bytes: Arc::from(vec![0u8; 48]),
                    index_bytes: Arc::from(vec![0u8; 12]),
                    index_count: 3,
                }],
                materials: vec![MaterialSource {
                    id: MaterialId(0),
                    bytes: Arc::from(vec![0u8; 48]),
                }],
            }));
        }
        world.drain_and_apply().unwrap();
        world
    }

    #[test]
    fn summary_empty_world() {
        let world = world_with(0);
        let summary = BufferInspector::summary(&world);
        assert_eq!(summary.drawables, 0);
        assert_eq!(summary.uploads, 0);
        assert!(summary.to_string().contains("frames=0"));
    }

    #[test]
    fn summary_counts_shared_resources() {
        let world = world_with(5);
        let summary = BufferInspector::summary(&world);
        assert_eq!(summary.drawables, 5);
        assert_eq!(summary.resident_meshes, 2);
        assert_eq!(summary.resident_materials, 1);
        assert_eq!(summary.uploads, 3);
    }

    #[test]
    fn reports_cover_every_buffer() {
        let world = world_with(3);
        let reports = BufferInspector::reports(&world);
        let kinds: Vec<_> = reports.iter().map(|r| r.kind).collect();
        assert_eq!(
            kinds,
            vec![
                BufferKind::Vertex,
                BufferKind::Index,
                BufferKind::Instance,
                BufferKind::Material,
                BufferKind::Mapping,
            ]
        );
        let instance = reports[2];
        assert_eq!(instance.filled_slots, 3);
        assert_eq!(instance.free_ranges, 1);
        assert_eq!(instance.fragmentation, 0.0);
    }

    #[test]
    fn fragmentation_reflects_holes() {
        let mut buffer = GpuBuffer::new(BufferKind::Vertex, 100, 1).unwrap();
        for i in 0..4 {
            buffer.reserve_slot(EntityId(i), 20).unwrap();
        }
        buffer.free_slot(EntityId(1)).unwrap();
        let report = BufferReport::from_buffer(&buffer);
        // 20 free in the hole, 20 free at the tail
        assert_eq!(report.free_ranges, 2);
        assert!((report.fragmentation - 0.5).abs() < 1e-9);
        assert!(report.to_string().contains("vertex"));
    }
}
