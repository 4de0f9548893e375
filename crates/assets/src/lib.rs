//! Asset store: content-addressed meshes and materials.
//!
//! The simulation thread registers asset data here and turns it into
//! immutable [`MeshSource`] / [`MaterialSource`] payloads that travel inside
//! spawn commands. Identical content yields an identical id, which is what
//! lets the render thread share one GPU copy between many entities.

use bytemuck::{Pod, Zeroable};
use framekeep_common::{MaterialId, MeshId};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

/// GPU vertex layout.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable, Serialize, Deserialize)]
pub struct Vertex {
    pub position: [f32; 3],
    pub normal: [f32; 3],
}

/// A mesh as authored: vertices plus a triangle index list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Mesh {
    pub name: String,
    pub vertices: Vec<Vertex>,
    pub indices: Vec<u32>,
}

/// GPU material layout.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable, Serialize, Deserialize)]
pub struct MaterialParams {
    pub base_color: [f32; 4],
    pub metallic: f32,
    pub roughness: f32,
    pub _pad: [f32; 2],
}

/// A material as authored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Material {
    pub name: String,
    pub params: MaterialParams,
}

impl Default for Material {
    fn default() -> Self {
        Self {
            name: "default".into(),
            params: MaterialParams {
                base_color: [0.8, 0.8, 0.8, 1.0],
                metallic: 0.0,
                roughness: 0.5,
                _pad: [0.0; 2],
            },
        }
    }
}

/// Upload payload for one mesh. Cheap to clone; the bytes are shared.
#[derive(Debug, Clone)]
pub struct MeshSource {
    pub id: MeshId,
    pub vertex_bytes: Arc<[u8]>,
    pub index_bytes: Arc<[u8]>,
    pub index_count: u32,
}

/// Upload payload for one material.
#[derive(Debug, Clone)]
pub struct MaterialSource {
    pub id: MaterialId,
    pub bytes: Arc<[u8]>,
}

/// Errors from asset operations.
#[derive(Debug, thiserror::Error)]
pub enum AssetError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("mesh not found: {0:?}")]
    MeshNotFound(MeshId),
    #[error("material not found: {0:?}")]
    MaterialNotFound(MaterialId),
    #[error("mesh {0:?} has no vertices or no indices")]
    EmptyMesh(String),
    #[error("mesh {name:?} index {index} out of range for {vertex_count} vertices")]
    IndexOutOfRange {
        name: String,
        index: u32,
        vertex_count: usize,
    },
}

/// Content-addressed asset registry.
///
/// Persisted as JSON so catalogs can be authored and inspected outside the engine.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AssetStore {
    meshes: BTreeMap<MeshId, Mesh>,
    materials: BTreeMap<MaterialId, Material>,
}

impl AssetStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate and register a mesh; returns its content id.
    pub fn register_mesh(&mut self, mesh: Mesh) -> Result<MeshId, AssetError> {
        if mesh.vertices.is_empty() || mesh.indices.is_empty() {
            return Err(AssetError::EmptyMesh(mesh.name));
        }
        if let Some(&index) = mesh
            .indices
            .iter()
            .find(|&&i| i as usize >= mesh.vertices.len())
        {
            return Err(AssetError::IndexOutOfRange {
                name: mesh.name,
                index,
                vertex_count: mesh.vertices.len(),
            });
        }
        let id = MeshId(content_hash(&[
            bytemuck::cast_slice(&mesh.vertices),
            bytemuck::cast_slice(&mesh.indices),
        ]));
        tracing::debug!(name = %mesh.name, ?id, "mesh registered");
        self.meshes.insert(id, mesh);
        Ok(id)
    }

    /// Register a material; returns its content id.
    pub fn register_material(&mut self, material: Material) -> MaterialId {
        let id = MaterialId(content_hash(&[bytemuck::bytes_of(&material.params)]));
        tracing::debug!(name = %material.name, ?id, "material registered");
        self.materials.insert(id, material);
        id
    }

    pub fn get_mesh(&self, id: MeshId) -> Option<&Mesh> {
        self.meshes.get(&id)
    }

    pub fn get_material(&self, id: MaterialId) -> Option<&Material> {
        self.materials.get(&id)
    }

    /// Upload payload for a registered mesh.
    pub fn mesh_source(&self, id: MeshId) -> Result<MeshSource, AssetError> {
        let mesh = self.meshes.get(&id).ok_or(AssetError::MeshNotFound(id))?;
        Ok(MeshSource {
            id,
            vertex_bytes: Arc::from(bytemuck::cast_slice::<Vertex, u8>(&mesh.vertices)),
            index_bytes: Arc::from(bytemuck::cast_slice::<u32, u8>(&mesh.indices)),
            index_count: mesh.indices.len() as u32,
        })
    }

    /// Upload payload for a registered material.
    pub fn material_source(&self, id: MaterialId) -> Result<MaterialSource, AssetError> {
        let material = self
            .materials
            .get(&id)
            .ok_or(AssetError::MaterialNotFound(id))?;
        Ok(MaterialSource {
            id,
            bytes: Arc::from(bytemuck::bytes_of(&material.params)),
        })
    }

    pub fn mesh_count(&self) -> usize {
        self.meshes.len()
    }

    pub fn material_count(&self) -> usize {
        self.materials.len()
    }

    /// Number of registered assets of either kind.
    pub fn len(&self) -> usize {
        self.meshes.len() + self.materials.len()
    }

    pub fn is_empty(&self) -> bool {
        self.meshes.is_empty() && self.materials.is_empty()
    }

    /// Register a unit cube mesh (24 vertices, 36 indices).
    pub fn register_default_cube(&mut self) -> Result<MeshId, AssetError> {
        self.register_mesh(cube_mesh(0.5))
    }

    /// Register a flat quad in the XZ plane.
    pub fn register_default_quad(&mut self) -> Result<MeshId, AssetError> {
        let normal = [0.0, 1.0, 0.0];
        let p = 0.5;
        self.register_mesh(Mesh {
            name: "unit_quad".into(),
            vertices: vec![
                Vertex { position: [-p, 0.0, -p], normal },
                Vertex { position: [p, 0.0, -p], normal },
                Vertex { position: [p, 0.0, p], normal },
                Vertex { position: [-p, 0.0, p], normal },
            ],
            indices: vec![0, 1, 2, 2, 3, 0],
        })
    }

    /// Register the default grey material.
    pub fn register_default_material(&mut self) -> MaterialId {
        self.register_material(Material::default())
    }

    /// Save the store to a JSON file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), AssetError> {
        let file = std::fs::File::create(path)?;
        serde_json::to_writer_pretty(file, self)?;
        Ok(())
    }

    /// Load a store from a JSON file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, AssetError> {
        let file = std::fs::File::open(path)?;
        let store: Self = serde_json::from_reader(file)?;
        Ok(store)
    }
}

/// Axis-aligned cube with per-face normals.
fn cube_mesh(half: f32) -> Mesh {
    let faces: [([f32; 3], [[f32; 3]; 4]); 6] = [
        ([0.0, 0.0, 1.0], [[-1.0, -1.0, 1.0], [1.0, -1.0, 1.0], [1.0, 1.0, 1.0], [-1.0, 1.0, 1.0]]),
        ([0.0, 0.0, -1.0], [[1.0, -1.0, -1.0], [-1.0, -1.0, -1.0], [-1.0, 1.0, -1.0], [1.0, 1.0, -1.0]]),
        ([1.0, 0.0, 0.0], [[1.0, -1.0, 1.0], [1.0, -1.0, -1.0], [1.0, 1.0, -1.0], [1.0, 1.0, 1.0]]),
        ([-1.0, 0.0, 0.0], [[-1.0, -1.0, -1.0], [-1.0, -1.0, 1.0], [-1.0, 1.0, 1.0], [-1.0, 1.0, -1.0]]),
        ([0.0, 1.0, 0.0], [[-1.0, 1.0, 1.0], [1.0, 1.0, 1.0], [1.0, 1.0, -1.0], [-1.0, 1.0, -1.0]]),
        ([0.0, -1.0, 0.0], [[-1.0, -1.0, -1.0], [1.0, -1.0, -1.0], [1.0, -1.0, 1.0], [-1.0, -1.0, 1.0]]),
    ];
    let mut vertices = Vec::with_capacity(24);
    let mut indices = Vec::with_capacity(36);
    for (normal, corners) in faces {
        let base = vertices.len() as u32;
        for c in corners {
            vertices.push(Vertex {
                position: [c[0] * half, c[1] * half, c[2] * half],
                normal,
            });
        }
        indices.extend_from_slice(&[base, base + 1, base + 2, base + 2, base + 3, base]);
    }
    Mesh {
        name: "unit_cube".into(),
        vertices,
        indices,
    }
}

/// SHA-256 over the concatenated parts, truncated to 64 bits.
fn content_hash(parts: &[&[u8]]) -> u64 {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update((part.len() as u64).to_le_bytes());
        hasher.update(part);
    }
    let result = hasher.finalize();
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&result[..8]);
    u64::from_le_bytes(bytes)
}

pub fn crate_info() -> &'static str {
    "framekeep-assets v0.1.0"
}

#[cfg(test)]
mod tests {
    use super::*;

    fn triangle(name: &str) -> Mesh {
        let normal = [0.0, 0.0, 1.0];
        Mesh {
            name: name.into(),
            vertices: vec![
                Vertex { position: [0.0, 0.0, 0.0], normal },
                Vertex { position: [1.0, 0.0, 0.0], normal },
                Vertex { position: [0.0, 1.0, 0.0], normal },
            ],
            indices: vec![0, 1, 2],
        }
    }

    #[test]
    fn register_mesh() {
        let mut store = AssetStore::new();
        let id = store.register_mesh(triangle("tri")).unwrap();
        assert!(store.get_mesh(id).is_some());
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn content_addressed_dedup() {
        let mut store = AssetStore::new();
        // same geometry under a different name is the same GPU resource
        let id1 = store.register_mesh(triangle("a")).unwrap();
        let id2 = store.register_mesh(triangle("b")).unwrap();
        assert_eq!(id1, id2);
        assert_eq!(store.mesh_count(), 1);
    }

    #[test]
    fn empty_and_broken_meshes_rejected() {
        let mut store = AssetStore::new();
        let mut empty = triangle("empty");
        empty.indices.clear();
        assert!(matches!(
            store.register_mesh(empty),
            Err(AssetError::EmptyMesh(_))
        ));

        let mut broken = triangle("broken");
        broken.indices[2] = 3;
        assert!(matches!(
            store.register_mesh(broken),
            Err(AssetError::IndexOutOfRange { index: 3, .. })
        ));
    }

    #[test]
    fn mesh_source_carries_gpu_bytes() {
        let mut store = AssetStore::new();
        let id = store.register_default_cube().unwrap();
        let source = store.mesh_source(id).unwrap();
        assert_eq!(source.id, id);
        assert_eq!(source.index_count, 36);
        assert_eq!(source.vertex_bytes.len(), 24 * std::mem::size_of::<Vertex>());
        assert_eq!(source.index_bytes.len(), 36 * 4);
    }

    #[test]
    fn material_source_and_dedup() {
        let mut store = AssetStore::new();
        let id = store.register_default_material();
        let again = store.register_material(Material {
            name: "renamed".into(),
            ..Material::default()
        });
        assert_eq!(id, again);
        let source = store.material_source(id).unwrap();
        assert_eq!(source.bytes.len(), std::mem::size_of::<MaterialParams>());
    }

    #[test]
    fn missing_sources_reported() {
        let store = AssetStore::new();
        assert!(matches!(
            store.mesh_source(MeshId(1)),
            Err(AssetError::MeshNotFound(_))
        ));
        assert!(matches!(
            store.material_source(MaterialId(1)),
            Err(AssetError::MaterialNotFound(_))
        ));
    }

    #[test]
    fn default_shapes_are_distinct() {
        let mut store = AssetStore::new();
        let cube = store.register_default_cube().unwrap();
        let quad = store.register_default_quad().unwrap();
        assert_ne!(cube, quad);
        assert_eq!(store.mesh_count(), 2);
    }

    #[test]
    fn save_and_load() {
        let tmp = tempfile::NamedTempFile::new().unwrap();
        let mut store = AssetStore::new();
        let cube = store.register_default_cube().unwrap();
        store.register_default_material();
        store.save(tmp.path()).unwrap();

        let loaded = AssetStore::load(tmp.path()).unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded.get_mesh(cube), store.get_mesh(cube));
    }
}
