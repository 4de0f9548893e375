use bytemuck::{Pod, Zeroable};
use framekeep_common::Transform;

/// Per-entity record in the append-only mapping buffer. The GPU reads it
/// every frame to find the entity's geometry, uniforms and material.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
pub struct BufferMapEntry {
    pub vertex_offset: u32,
    pub index_offset: u32,
    pub uniform_offset: u32,
    pub material_offset: u32,
}

/// Per-instance uniform data.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct InstanceUniform {
    pub model: [[f32; 4]; 4],
}

impl InstanceUniform {
    pub fn from_transform(transform: &Transform) -> Self {
        Self {
            model: transform.model_matrix().to_cols_array_2d(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec3;

    #[test]
    fn layouts_match_gpu_expectations() {
        assert_eq!(std::mem::size_of::<BufferMapEntry>(), 16);
        assert_eq!(std::mem::size_of::<InstanceUniform>(), 64);
    }

    #[test]
    fn uniform_carries_translation() {
        let u = InstanceUniform::from_transform(&Transform::from_position(Vec3::new(1.0, 2.0, 3.0)));
        assert_eq!(u.model[3], [1.0, 2.0, 3.0, 1.0]);
    }
}
