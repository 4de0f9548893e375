use std::collections::HashMap;

use framekeep_assets::{MaterialSource, MeshSource};
use framekeep_buffer::{BufferError, GpuBuffer, GraphicsBackend};
use framekeep_common::{BufferKind, MaterialId, MeshId, RenderConfig, SlotKey};

use crate::error::RegistryError;

/// Outcome of an acquire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Acquired {
    /// First reference: slots were reserved and the bytes uploaded.
    Uploaded,
    /// Already resident; only the refcount moved.
    Shared { refs: u32 },
}

/// Outcome of a release.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Release {
    /// Last reference dropped; the slots are free again.
    Released,
    StillReferenced { refs: u32 },
}

/// Where a resident mesh lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MeshSlots {
    pub vertex_offset: u64,
    pub index_offset: u64,
    pub index_count: u32,
}

#[derive(Debug)]
struct MeshEntry {
    refs: u32,
    source: MeshSource,
}

#[derive(Debug)]
struct MaterialEntry {
    refs: u32,
    source: MaterialSource,
}

/// Reference counts for meshes and materials drawn by many entities.
///
/// Owned by the render thread. A resource is uploaded once, on its first
/// reference, and its slots are freed when the last reference is released.
/// Sources are retained while resident so a grown buffer can be refilled.
#[derive(Debug)]
pub struct SharedResourceRegistry {
    vertex: GpuBuffer,
    index: GpuBuffer,
    material: GpuBuffer,
    meshes: HashMap<MeshId, MeshEntry>,
    materials: HashMap<MaterialId, MaterialEntry>,
    grow_on_exhaustion: bool,
    max_capacity: u64,
    uploads: u64,
}

impl SharedResourceRegistry {
    /// Create the vertex, index and material buffers on `backend`.
    pub fn new<B: GraphicsBackend + ?Sized>(
        config: &RenderConfig,
        backend: &mut B,
    ) -> Result<Self, RegistryError> {
        let mut create = |kind: BufferKind| -> Result<GpuBuffer, RegistryError> {
            let cfg = config.buffer(kind);
            let buffer = GpuBuffer::new(kind, cfg.capacity, cfg.alignment)?;
            backend.create_buffer(kind, cfg.capacity)?;
            Ok(buffer)
        };
        Ok(Self {
            vertex: create(BufferKind::Vertex)?,
            index: create(BufferKind::Index)?,
            material: create(BufferKind::Material)?,
            meshes: HashMap::new(),
            materials: HashMap::new(),
            grow_on_exhaustion: config.grow_on_exhaustion,
            max_capacity: config.max_capacity,
            uploads: 0,
        })
    }

    /// Take a reference to a mesh, uploading it if this is the first one.
    ///
    /// A full buffer fails with [`RegistryError::exhausted`] naming it and
    /// leaves nothing reserved; the caller decides whether to grow and retry.
    pub fn acquire_mesh<B: GraphicsBackend + ?Sized>(
        &mut self,
        source: &MeshSource,
        backend: &mut B,
    ) -> Result<Acquired, RegistryError> {
        if let Some(entry) = self.meshes.get_mut(&source.id) {
            entry.refs += 1;
            return Ok(Acquired::Shared { refs: entry.refs });
        }

        let key = SlotKey::Mesh(source.id);
        self.reserve(BufferKind::Vertex, key, source.vertex_bytes.len() as u64)?;
        if let Err(err) = self.reserve(BufferKind::Index, key, source.index_bytes.len() as u64) {
            self.vertex.free_slot(key)?;
            return Err(err);
        }
        let uploaded = self
            .vertex
            .map_for_write(key)
            .and_then(|slot| slot.write(backend, &source.vertex_bytes))
            .and_then(|()| self.index.map_for_write(key))
            .and_then(|slot| slot.write(backend, &source.index_bytes));
        if let Err(err) = uploaded {
            self.vertex.free_slot(key)?;
            self.index.free_slot(key)?;
            return Err(err.into());
        }

        self.meshes.insert(
            source.id,
            MeshEntry {
                refs: 1,
                source: source.clone(),
            },
        );
        self.uploads += 1;
        tracing::debug!(mesh = ?source.id, "mesh uploaded");
        Ok(Acquired::Uploaded)
    }

    /// Take a reference to a material, uploading it if this is the first one.
    pub fn acquire_material<B: GraphicsBackend + ?Sized>(
        &mut self,
        source: &MaterialSource,
        backend: &mut B,
    ) -> Result<Acquired, RegistryError> {
        if let Some(entry) = self.materials.get_mut(&source.id) {
            entry.refs += 1;
            return Ok(Acquired::Shared { refs: entry.refs });
        }

        let key = SlotKey::Material(source.id);
        self.reserve(BufferKind::Material, key, source.bytes.len() as u64)?;
        let uploaded = self
            .material
            .map_for_write(key)
            .and_then(|slot| slot.write(backend, &source.bytes));
        if let Err(err) = uploaded {
            self.material.free_slot(key)?;
            return Err(err.into());
        }

        self.materials.insert(
            source.id,
            MaterialEntry {
                refs: 1,
                source: source.clone(),
            },
        );
        self.uploads += 1;
        tracing::debug!(material = ?source.id, "material uploaded");
        Ok(Acquired::Uploaded)
    }

    /// Drop one reference to a mesh, freeing its slots on the last one.
    pub fn release_mesh(&mut self, id: MeshId) -> Result<Release, RegistryError> {
        let key = SlotKey::Mesh(id);
        let entry = self
            .meshes
            .get_mut(&id)
            .ok_or(RegistryError::UnderflowRelease { key })?;
        entry.refs -= 1;
        if entry.refs > 0 {
            return Ok(Release::StillReferenced { refs: entry.refs });
        }
        self.meshes.remove(&id);
        self.vertex.free_slot(key)?;
        self.index.free_slot(key)?;
        tracing::debug!(mesh = ?id, "mesh released");
        Ok(Release::Released)
    }

    /// Drop one reference to a material, freeing its slot on the last one.
    pub fn release_material(&mut self, id: MaterialId) -> Result<Release, RegistryError> {
        let key = SlotKey::Material(id);
        let entry = self
            .materials
            .get_mut(&id)
            .ok_or(RegistryError::UnderflowRelease { key })?;
        entry.refs -= 1;
        if entry.refs > 0 {
            return Ok(Release::StillReferenced { refs: entry.refs });
        }
        self.materials.remove(&id);
        self.material.free_slot(key)?;
        tracing::debug!(material = ?id, "material released");
        Ok(Release::Released)
    }

    pub fn mesh_slots(&self, id: MeshId) -> Option<MeshSlots> {
        let entry = self.meshes.get(&id)?;
        let key = SlotKey::Mesh(id);
        Some(MeshSlots {
            vertex_offset: self.vertex.get_offset(key).ok()?,
            index_offset: self.index.get_offset(key).ok()?,
            index_count: entry.source.index_count,
        })
    }

    pub fn material_offset(&self, id: MaterialId) -> Option<u64> {
        self.materials.get(&id)?;
        self.material.get_offset(id).ok()
    }

    /// Outstanding references to a mesh or material; 0 when not resident.
    pub fn refs(&self, key: impl Into<SlotKey>) -> u32 {
        match key.into() {
            SlotKey::Mesh(id) => self.meshes.get(&id).map_or(0, |e| e.refs),
            SlotKey::Material(id) => self.materials.get(&id).map_or(0, |e| e.refs),
            SlotKey::Entity(_) => 0,
        }
    }

    /// Resident meshes in id order.
    pub fn resident_meshes(&self) -> Vec<MeshId> {
        let mut ids: Vec<_> = self.meshes.keys().copied().collect();
        ids.sort();
        ids
    }

    /// Resident materials in id order.
    pub fn resident_materials(&self) -> Vec<MaterialId> {
        let mut ids: Vec<_> = self.materials.keys().copied().collect();
        ids.sort();
        ids
    }

    /// Resources uploaded over the registry's lifetime. Growth re-uploads
    /// are not counted.
    pub fn uploads(&self) -> u64 {
        self.uploads
    }

    /// The buffer holding `kind`, if the registry owns one.
    pub fn buffer(&self, kind: BufferKind) -> Option<&GpuBuffer> {
        match kind {
            BufferKind::Vertex => Some(&self.vertex),
            BufferKind::Index => Some(&self.index),
            BufferKind::Material => Some(&self.material),
            BufferKind::Instance | BufferKind::Mapping => None,
        }
    }

    fn buffer_mut(&mut self, kind: BufferKind) -> &mut GpuBuffer {
        match kind {
            BufferKind::Index => &mut self.index,
            BufferKind::Material => &mut self.material,
            _ => &mut self.vertex,
        }
    }

    fn reserve(&mut self, kind: BufferKind, key: SlotKey, size: u64) -> Result<u64, RegistryError> {
        Ok(self.buffer_mut(kind).reserve_slot(key, size)?)
    }

    /// Whether [`SharedResourceRegistry::grow`] would enlarge `kind`'s buffer.
    pub fn can_grow(&self, kind: BufferKind) -> bool {
        self.grow_on_exhaustion
            && self
                .buffer(kind)
                .is_some_and(|buffer| buffer.capacity() < self.max_capacity)
    }

    /// Double `kind`'s buffer (capped at `max_capacity`), recreate it on the
    /// backend and re-upload everything resident in it. Returns `false` when
    /// growth is disabled or the buffer is already at its cap.
    ///
    /// Recreating drops the old backend buffer, so no submitted frame may
    /// still be reading it. Slot offsets are kept.
    pub fn grow<B: GraphicsBackend + ?Sized>(
        &mut self,
        kind: BufferKind,
        backend: &mut B,
    ) -> Result<bool, RegistryError> {
        if !self.can_grow(kind) {
            tracing::warn!(%kind, "buffer cannot grow");
            return Ok(false);
        }
        let max = self.max_capacity;
        let buffer = self.buffer_mut(kind);
        let current = buffer.capacity();
        let target = current.saturating_mul(2).max(buffer.alignment()).min(max);
        buffer.grow(target)?;
        backend.create_buffer(kind, target)?;
        self.reupload(kind, backend)?;
        tracing::info!(%kind, from = current, to = target, "buffer grown and refilled");
        Ok(true)
    }

    fn reupload<B: GraphicsBackend + ?Sized>(
        &self,
        kind: BufferKind,
        backend: &mut B,
    ) -> Result<(), BufferError> {
        match kind {
            BufferKind::Vertex | BufferKind::Index => {
                let buffer = if kind == BufferKind::Vertex {
                    &self.vertex
                } else {
                    &self.index
                };
                for (id, entry) in &self.meshes {
                    let bytes = if kind == BufferKind::Vertex {
                        &entry.source.vertex_bytes
                    } else {
                        &entry.source.index_bytes
                    };
                    buffer.map_for_write(*id)?.write(backend, bytes)?;
                }
            }
            BufferKind::Material => {
                for (id, entry) in &self.materials {
                    self.material
                        .map_for_write(*id)?
                        .write(backend, &entry.source.bytes)?;
                }
            }
            BufferKind::Instance | BufferKind::Mapping => {}
        }
        Ok(())
    }
}
