use std::collections::{BTreeMap, HashMap, VecDeque};
use std::time::{Duration, Instant};

use crossbeam_channel::Sender;
use framekeep_assets::{MaterialSource, MeshSource};
use framekeep_buffer::{
    AppendOnlyBuffer, BufferError, DrawItem, FrameDesc, FrameTicket, GpuBuffer, GraphicsBackend,
    PreviewPass,
};
use framekeep_common::{
    BufferKind, EntityId, EpochReader, FrameEpoch, MaterialId, MeshId, RenderConfig, Transform,
};
use framekeep_registry::{RegistryError, SharedResourceRegistry};

use crate::command::{Command, CommandReceiver, Poll, RenderFeedback, SpawnRequest};
use crate::error::RenderError;
use crate::gpu::{BufferMapEntry, InstanceUniform};

/// What one `drain_and_apply` call did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainReport {
    pub applied: usize,
    /// `Shutdown` was applied, or every sender is gone.
    pub shutdown: bool,
}

/// Render-thread view of one spawned entity.
#[derive(Debug, Clone)]
struct Drawable {
    transform: Transform,
    /// Bumped on every transform change.
    revision: u64,
    /// Revision held by each per-frame uniform copy.
    written: Vec<u64>,
    /// One entry per acquire, so duplicates are released as often as acquired.
    meshes: Vec<MeshId>,
    materials: Vec<MaterialId>,
    /// Cached at spawn; slots never move while filled.
    draws: Vec<DrawItem>,
    stenciled: bool,
}

/// References taken so far by an in-progress spawn.
#[derive(Debug, Default)]
struct Held {
    meshes: Vec<MeshId>,
    materials: Vec<MaterialId>,
    instance: bool,
}

/// Everything the render thread owns: the backend, the shared-resource
/// registry, per-entity buffers and the frames still on the GPU.
///
/// Each entity's instance slot holds one uniform copy per frame in flight,
/// `instance_stride` bytes apart. Frame `n` draws with copy
/// `n % frames_in_flight`, which no outstanding frame can be reading.
#[derive(Debug)]
pub struct RenderWorld<B> {
    backend: B,
    registry: SharedResourceRegistry,
    instances: GpuBuffer,
    instance_stride: u64,
    mapping: AppendOnlyBuffer,
    drawables: BTreeMap<EntityId, Drawable>,
    /// Deleted entities whose resources wait for `Reclaim`.
    retired: HashMap<EntityId, Drawable>,
    wireframe: bool,
    preview: Option<(u32, Vec<EntityId>)>,
    rt_rebuilds: u64,
    command_buffer_updates: u64,
    in_flight: VecDeque<FrameTicket>,
    frames_in_flight: u64,
    frames_submitted: u64,
    frame_timeout: Duration,
    epoch: FrameEpoch,
    commands: CommandReceiver,
    feedback: Sender<RenderFeedback>,
    closed: bool,
}

impl<B: GraphicsBackend> RenderWorld<B> {
    /// Create the render-thread state and the buffers it owns.
    ///
    /// Returns the reader for the completed-frame epoch, for the simulation thread.
    pub fn new(
        config: &RenderConfig,
        mut backend: B,
        commands: CommandReceiver,
        feedback: Sender<RenderFeedback>,
    ) -> Result<(Self, EpochReader), RenderError> {
        config.validate()?;
        let registry = SharedResourceRegistry::new(config, &mut backend)?;

        let instance_cfg = config.buffer(BufferKind::Instance);
        let instances = GpuBuffer::new(
            BufferKind::Instance,
            instance_cfg.capacity,
            instance_cfg.alignment,
        )?;
        backend.create_buffer(BufferKind::Instance, instance_cfg.capacity)?;
        let instance_stride =
            (std::mem::size_of::<InstanceUniform>() as u64).next_multiple_of(instance_cfg.alignment);

        let mapping_cfg = config.buffer(BufferKind::Mapping);
        let record = (std::mem::size_of::<BufferMapEntry>() as u64).max(mapping_cfg.alignment);
        let mapping = AppendOnlyBuffer::new(BufferKind::Mapping, mapping_cfg.capacity, record);
        backend.create_buffer(BufferKind::Mapping, mapping_cfg.capacity)?;

        let (epoch, reader) = FrameEpoch::new();
        let world = Self {
            backend,
            registry,
            instances,
            instance_stride,
            mapping,
            drawables: BTreeMap::new(),
            retired: HashMap::new(),
            wireframe: false,
            preview: None,
            rt_rebuilds: 0,
            command_buffer_updates: 0,
            in_flight: VecDeque::new(),
            frames_in_flight: config.frames_in_flight,
            frames_submitted: 0,
            frame_timeout: config.frame_timeout(),
            epoch,
            commands,
            feedback,
            closed: false,
        };
        Ok((world, reader))
    }

    /// Apply every command queued at the time of the call, in order.
    ///
    /// Stops early at `Shutdown`; anything queued behind it is never applied.
    pub fn drain_and_apply(&mut self) -> Result<DrainReport, RenderError> {
        let _span = tracing::info_span!("drain_and_apply").entered();
        let mut report = DrainReport::default();
        let queued = self.commands.pending();
        for _ in 0..queued.max(1) {
            match self.commands.poll() {
                Poll::Ready(Command::Shutdown) => {
                    tracing::debug!("shutdown requested");
                    report.applied += 1;
                    report.shutdown = true;
                    break;
                }
                Poll::Ready(command) => {
                    self.apply(command)?;
                    report.applied += 1;
                }
                Poll::Empty => break,
                Poll::Closed => {
                    if !self.closed {
                        tracing::warn!("command channel closed without shutdown");
                        self.closed = true;
                    }
                    report.shutdown = true;
                    break;
                }
            }
        }
        Ok(report)
    }

    fn apply(&mut self, command: Command) -> Result<(), RenderError> {
        tracing::debug!(command = command.name(), entity = ?command.entity(), "apply");
        match command {
            Command::Spawn(request) => self.spawn(request)?,
            Command::Delete { entity_id } => match self.drawables.remove(&entity_id) {
                Some(drawable) => {
                    if let Some((_, entities)) = &mut self.preview {
                        entities.retain(|&e| e != entity_id);
                    }
                    self.retired.insert(entity_id, drawable);
                }
                None => stale("delete", entity_id),
            },
            Command::Stencil { entity_id } => self.set_stencil(entity_id, true),
            Command::UnStencil { entity_id } => self.set_stencil(entity_id, false),
            Command::SetTransform {
                entity_id,
                transform,
            } => match self.drawables.get_mut(&entity_id) {
                // Uniform copies are refreshed as frames are recorded.
                Some(drawable) => {
                    drawable.transform = transform;
                    drawable.revision += 1;
                }
                None => stale("set_transform", entity_id),
            },
            Command::ToggleWireframe => {
                self.wireframe = !self.wireframe;
            }
            Command::UpdateRayTracing => {
                self.rt_rebuilds += 1;
            }
            Command::UpdateCommandBuffer => {
                self.command_buffer_updates += 1;
            }
            Command::PreviewObjects { entities, target } => {
                let known: Vec<EntityId> = entities
                    .into_iter()
                    .filter(|id| {
                        let drawn = self.drawables.contains_key(id);
                        if !drawn {
                            tracing::warn!(entity = %id, "preview of unknown entity skipped");
                        }
                        drawn
                    })
                    .collect();
                self.preview = (!known.is_empty()).then_some((target, known));
            }
            Command::Reclaim { entity_id } => self.reclaim(entity_id)?,
            Command::Shutdown => {}
        }
        Ok(())
    }

    fn set_stencil(&mut self, entity_id: EntityId, on: bool) {
        match self.drawables.get_mut(&entity_id) {
            Some(drawable) => drawable.stenciled = on,
            None => stale(if on { "stencil" } else { "unstencil" }, entity_id),
        }
    }

    fn spawn(&mut self, request: SpawnRequest) -> Result<(), RenderError> {
        let id = request.entity_id;
        if self.drawables.contains_key(&id) || self.retired.contains_key(&id) {
            return Err(RenderError::DuplicateSpawn { entity_id: id });
        }
        if request.meshes.is_empty() || request.materials.is_empty() {
            self.reject(id, "spawn needs at least one mesh and one material".into());
            return Ok(());
        }
        if self.mapping.is_full() {
            self.reject(id, format!("{} buffer is full", BufferKind::Mapping));
            return Ok(());
        }

        let mut held = Held::default();
        match self.try_spawn(&request, &mut held) {
            Ok(drawable) => {
                tracing::debug!(entity = %id, parts = drawable.draws.len(), "entity spawned");
                self.drawables.insert(id, drawable);
                Ok(())
            }
            Err(err) => {
                self.release(id, &held.meshes, &held.materials, held.instance)?;
                if err.is_capacity() {
                    self.reject(id, err.to_string());
                    Ok(())
                } else {
                    Err(err)
                }
            }
        }
    }

    fn try_spawn(&mut self, request: &SpawnRequest, held: &mut Held) -> Result<Drawable, RenderError> {
        let id = request.entity_id;
        for mesh in &request.meshes {
            self.acquire_mesh(mesh)?;
            held.meshes.push(mesh.id);
        }
        for material in &request.materials {
            self.acquire_material(material)?;
            held.materials.push(material.id);
        }

        // The slot is fresh, so every copy can be written now.
        let uniform = InstanceUniform::from_transform(&request.transform);
        let copies = self.frames_in_flight;
        let size =
            self.instance_stride * (copies - 1) + std::mem::size_of::<InstanceUniform>() as u64;
        let instance_offset = self.instances.reserve_slot(id, size)?;
        held.instance = true;
        let slot = self.instances.map_for_write(id)?;
        for copy in 0..copies {
            slot.write_at(
                &mut self.backend,
                copy * self.instance_stride,
                bytemuck::bytes_of(&uniform),
            )?;
        }

        let mut draws = Vec::with_capacity(request.meshes.len());
        for (i, mesh) in request.meshes.iter().enumerate() {
            let material = held.materials[i.min(held.materials.len() - 1)];
            let slots = self
                .registry
                .mesh_slots(mesh.id)
                .ok_or(BufferError::SlotNotFound {
                    kind: BufferKind::Vertex,
                    key: mesh.id.into(),
                })?;
            let material_offset =
                self.registry
                    .material_offset(material)
                    .ok_or(BufferError::SlotNotFound {
                        kind: BufferKind::Material,
                        key: material.into(),
                    })?;
            draws.push(DrawItem {
                entity_id: id,
                vertex_offset: slots.vertex_offset,
                index_offset: slots.index_offset,
                index_count: slots.index_count,
                instance_offset,
                material_offset,
                stenciled: false,
            });
        }

        // Append-only: the record outlives the entity, so it goes last.
        let first = draws[0];
        let entry = BufferMapEntry {
            vertex_offset: narrow(BufferKind::Vertex, first.vertex_offset)?,
            index_offset: narrow(BufferKind::Index, first.index_offset)?,
            uniform_offset: narrow(BufferKind::Instance, instance_offset)?,
            material_offset: narrow(BufferKind::Material, first.material_offset)?,
        };
        self.mapping.append(id)?;
        self.mapping
            .write(&mut self.backend, id, bytemuck::bytes_of(&entry))?;

        Ok(Drawable {
            transform: request.transform,
            revision: 0,
            written: vec![0; copies as usize],
            meshes: held.meshes.clone(),
            materials: held.materials.clone(),
            draws,
            stenciled: false,
        })
    }

    fn acquire_mesh(&mut self, source: &MeshSource) -> Result<(), RenderError> {
        loop {
            match self.registry.acquire_mesh(source, &mut self.backend) {
                Ok(_) => return Ok(()),
                Err(err) => self.grow_for(err)?,
            }
        }
    }

    fn acquire_material(&mut self, source: &MaterialSource) -> Result<(), RenderError> {
        loop {
            match self.registry.acquire_material(source, &mut self.backend) {
                Ok(_) => return Ok(()),
                Err(err) => self.grow_for(err)?,
            }
        }
    }

    /// Grow the buffer `err` ran out of, or hand `err` back.
    ///
    /// Growth recreates the backend buffer, so every outstanding frame is
    /// waited for first.
    fn grow_for(&mut self, err: RegistryError) -> Result<(), RenderError> {
        let Some(kind) = err.exhausted().filter(|&kind| self.registry.can_grow(kind)) else {
            return Err(err.into());
        };
        if !self.in_flight.is_empty() {
            tracing::debug!(
                %kind,
                outstanding = self.in_flight.len(),
                "waiting for GPU before growth"
            );
            self.wait_idle()?;
        }
        if self.registry.grow(kind, &mut self.backend)? {
            Ok(())
        } else {
            Err(err.into())
        }
    }

    fn reject(&self, entity_id: EntityId, reason: String) {
        tracing::warn!(entity = %entity_id, %reason, "spawn rejected");
        // The simulation thread may already be gone.
        let _ = self
            .feedback
            .send(RenderFeedback::SpawnRejected { entity_id, reason });
    }

    fn reclaim(&mut self, entity_id: EntityId) -> Result<(), RenderError> {
        let _span = tracing::info_span!("reclaim", entity = %entity_id).entered();
        let Some(drawable) = self.retired.remove(&entity_id) else {
            stale("reclaim", entity_id);
            return Ok(());
        };
        self.release(entity_id, &drawable.meshes, &drawable.materials, true)
    }

    fn release(
        &mut self,
        entity_id: EntityId,
        meshes: &[MeshId],
        materials: &[MaterialId],
        instance: bool,
    ) -> Result<(), RenderError> {
        for &mesh in meshes {
            self.registry.release_mesh(mesh)?;
        }
        for &material in materials {
            self.registry.release_material(material)?;
        }
        if instance {
            self.instances.free_slot(entity_id)?;
        }
        Ok(())
    }

    /// Build and submit one frame.
    ///
    /// Completed frames advance the epoch first; if `frames_in_flight` frames
    /// are still outstanding, waits on the backend for the oldest one.
    pub fn render_frame(&mut self) -> Result<FrameTicket, RenderError> {
        let _span = tracing::info_span!("render_frame", frame = self.frames_submitted).entered();
        self.poll_completed();
        while self.in_flight.len() as u64 >= self.frames_in_flight {
            self.wait_oldest()?;
        }

        let copy = self.frames_submitted % self.frames_in_flight;
        self.refresh_uniforms(copy)?;
        let copy_offset = copy * self.instance_stride;
        let draws: Vec<DrawItem> = self
            .drawables
            .values()
            .flat_map(|d| {
                d.draws.iter().map(move |item| DrawItem {
                    instance_offset: item.instance_offset + copy_offset,
                    stenciled: d.stenciled,
                    ..*item
                })
            })
            .collect();
        let preview = self.preview.as_ref().map(|(target, entities)| PreviewPass {
            target: *target,
            entities,
        });
        let ticket = self.backend.submit_frame(FrameDesc {
            draws: &draws,
            wireframe: self.wireframe,
            preview,
        })?;
        self.in_flight.push_back(ticket);
        self.frames_submitted += 1;
        tracing::trace!(?ticket, draws = draws.len(), "frame submitted");
        Ok(ticket)
    }

    /// Bring uniform copy `copy` up to date for every drawable.
    fn refresh_uniforms(&mut self, copy: u64) -> Result<(), RenderError> {
        let at = copy * self.instance_stride;
        for (&id, drawable) in &mut self.drawables {
            let written = &mut drawable.written[copy as usize];
            if *written == drawable.revision {
                continue;
            }
            let uniform = InstanceUniform::from_transform(&drawable.transform);
            self.instances
                .map_for_write(id)?
                .write_at(&mut self.backend, at, bytemuck::bytes_of(&uniform))?;
            *written = drawable.revision;
        }
        Ok(())
    }

    /// Retire finished frames in submission order, one epoch each.
    pub fn poll_completed(&mut self) -> usize {
        let mut retired = 0;
        while let Some(&ticket) = self.in_flight.front() {
            if !self.backend.is_frame_complete(ticket) {
                break;
            }
            self.in_flight.pop_front();
            let epoch = self.epoch.advance();
            tracing::trace!(?ticket, epoch, "frame complete");
            retired += 1;
        }
        retired
    }

    /// Block on the oldest outstanding frame, up to the frame timeout.
    fn wait_oldest(&mut self) -> Result<(), RenderError> {
        let Some(&ticket) = self.in_flight.front() else {
            return Ok(());
        };
        let started = Instant::now();
        while !self.backend.is_frame_complete(ticket) {
            if started.elapsed() >= self.frame_timeout {
                tracing::error!(?ticket, timeout = ?self.frame_timeout, "frame never completed");
                return Err(RenderError::FrameTimeout {
                    ticket,
                    timeout: self.frame_timeout,
                });
            }
            std::thread::yield_now();
        }
        self.in_flight.pop_front();
        let epoch = self.epoch.advance();
        tracing::trace!(?ticket, epoch, "frame complete");
        Ok(())
    }

    /// Wait until no frame is outstanding.
    pub fn wait_idle(&mut self) -> Result<(), RenderError> {
        while !self.in_flight.is_empty() {
            self.wait_oldest()?;
        }
        Ok(())
    }

    pub fn is_drawn(&self, id: EntityId) -> bool {
        self.drawables.contains_key(&id)
    }

    /// Deleted but not yet reclaimed.
    pub fn is_retired(&self, id: EntityId) -> bool {
        self.retired.contains_key(&id)
    }

    pub fn is_stenciled(&self, id: EntityId) -> bool {
        self.drawables.get(&id).is_some_and(|d| d.stenciled)
    }

    pub fn transform(&self, id: EntityId) -> Option<Transform> {
        self.drawables.get(&id).map(|d| d.transform)
    }

    pub fn drawable_count(&self) -> usize {
        self.drawables.len()
    }

    pub fn retired_count(&self) -> usize {
        self.retired.len()
    }

    pub fn wireframe(&self) -> bool {
        self.wireframe
    }

    pub fn preview(&self) -> Option<(u32, &[EntityId])> {
        self.preview
            .as_ref()
            .map(|(target, entities)| (*target, entities.as_slice()))
    }

    pub fn rt_rebuilds(&self) -> u64 {
        self.rt_rebuilds
    }

    pub fn command_buffer_updates(&self) -> u64 {
        self.command_buffer_updates
    }

    pub fn frames_submitted(&self) -> u64 {
        self.frames_submitted
    }

    pub fn frames_outstanding(&self) -> usize {
        self.in_flight.len()
    }

    pub fn epoch_reader(&self) -> EpochReader {
        self.epoch.reader()
    }

    pub fn registry(&self) -> &SharedResourceRegistry {
        &self.registry
    }

    pub fn instances(&self) -> &GpuBuffer {
        &self.instances
    }

    pub fn mapping(&self) -> &AppendOnlyBuffer {
        &self.mapping
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }
}

fn stale(command: &'static str, entity_id: EntityId) {
    tracing::debug!(command, entity = %entity_id, "stale command ignored");
}

fn narrow(kind: BufferKind, offset: u64) -> Result<u32, RenderError> {
    u32::try_from(offset).map_err(|_| RenderError::OffsetOverflow { kind, offset })
}
