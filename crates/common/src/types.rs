use glam::{Mat4, Quat, Vec3};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Unique identifier for a drawable entity.
///
/// Allocated sequentially by the scene arena and never reused within a
/// process, so a stale command can always be told apart from a live entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityId(pub u64);

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "entity#{}", self.0)
    }
}

/// Content-addressed identifier of a mesh shared by any number of entities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MeshId(pub u64);

/// Content-addressed identifier of a material shared by any number of entities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MaterialId(pub u64);

/// Key of a slot inside a GPU buffer.
///
/// Entities, meshes and materials live in different buffers, but keeping a
/// single key type lets the allocator stay non-generic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum SlotKey {
    Entity(EntityId),
    Mesh(MeshId),
    Material(MaterialId),
}

impl From<EntityId> for SlotKey {
    fn from(id: EntityId) -> Self {
        Self::Entity(id)
    }
}

impl From<MeshId> for SlotKey {
    fn from(id: MeshId) -> Self {
        Self::Mesh(id)
    }
}

impl From<MaterialId> for SlotKey {
    fn from(id: MaterialId) -> Self {
        Self::Material(id)
    }
}

/// The resource class a GPU buffer holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum BufferKind {
    Vertex,
    Index,
    /// Per-instance uniforms (one slot per spawned entity).
    Instance,
    Material,
    /// Append-only entity -> offsets table read by the GPU every frame.
    Mapping,
}

impl fmt::Display for BufferKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Vertex => "vertex",
            Self::Index => "index",
            Self::Instance => "instance",
            Self::Material => "material",
            Self::Mapping => "mapping",
        };
        f.write_str(name)
    }
}

/// Spatial transform: position, rotation, scale.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Transform {
    pub position: Vec3,
    pub rotation: Quat,
    pub scale: Vec3,
}

impl Transform {
    /// Transform placed at `position` with identity rotation and unit scale.
    pub fn from_position(position: Vec3) -> Self {
        Self {
            position,
            ..Self::default()
        }
    }

    /// Column-major model matrix (scale, then rotate, then translate).
    pub fn model_matrix(&self) -> Mat4 {
        Mat4::from_scale_rotation_translation(self.scale, self.rotation, self.position)
    }
}

impl Default for Transform {
    fn default() -> Self {
        Self {
            position: Vec3::ZERO,
            rotation: Quat::IDENTITY,
            scale: Vec3::ONE,
        }
    }
}
