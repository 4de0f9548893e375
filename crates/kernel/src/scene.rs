use std::collections::BTreeMap;

use crossbeam_channel::Receiver;
use framekeep_assets::{AssetError, AssetStore, MaterialSource, MeshSource};
use framekeep_buffer::GraphicsBackend;
use framekeep_common::{EntityId, EpochReader, MaterialId, MeshId, RenderConfig, Transform};
use framekeep_render::{
    Command, CommandSender, RenderError, RenderFeedback, RenderWorld, SpawnRequest,
    command_channel, command_channel_bounded, feedback_channel,
};

use crate::deletion::DeletionTracker;

/// Scene-facing name for an entity.
pub type EntityHandle = EntityId;

/// Errors from scene operations.
#[derive(Debug, thiserror::Error)]
pub enum SceneError {
    #[error("{0} does not exist")]
    NotFound(EntityId),
    #[error("{0} is already being deleted")]
    PendingDeletion(EntityId),
    #[error("scene has been shut down")]
    ShutDown,
    #[error("render thread is gone")]
    RendererGone,
    #[error(transparent)]
    Asset(#[from] AssetError),
}

/// Lifecycle state of an entity record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityState {
    Live,
    /// Deleted; the record stays until its resources are reclaimed.
    PendingDeletion { requested_epoch: u64 },
}

/// Simulation-side record of one entity.
#[derive(Debug, Clone)]
pub struct EntityRecord {
    pub transform: Transform,
    pub meshes: Vec<MeshId>,
    pub materials: Vec<MaterialId>,
    pub highlighted: bool,
    pub state: EntityState,
}

/// What one [`Scene::tick`] did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    pub tick: u64,
    pub reclaimed: Vec<EntityId>,
    /// Spawns the render thread refused; their records are gone.
    pub rejected: Vec<EntityId>,
}

/// The simulation thread's entity arena.
///
/// Every mutation becomes a [`Command`] for the render thread. Deleted
/// entities are kept until the completed-frame epoch shows the GPU is done
/// with them, then reclaimed through the same channel.
#[derive(Debug)]
pub struct Scene {
    entities: BTreeMap<EntityId, EntityRecord>,
    next_id: u64,
    tick: u64,
    commands: CommandSender,
    feedback: Receiver<RenderFeedback>,
    epoch: EpochReader,
    deletions: DeletionTracker,
    shut_down: bool,
}

/// Wire a scene to a new render world over `backend`.
///
/// The world is returned unstarted; run it with
/// [`framekeep_render::spawn_render_thread`] or drive it by hand.
pub fn connect<B: GraphicsBackend>(
    config: &RenderConfig,
    backend: B,
    channel_bound: Option<usize>,
) -> Result<(Scene, RenderWorld<B>), RenderError> {
    let (commands, receiver) = match channel_bound {
        Some(cap) => command_channel_bounded(cap),
        None => command_channel(),
    };
    let (feedback_tx, feedback_rx) = feedback_channel();
    let (world, epoch) = RenderWorld::new(config, backend, receiver, feedback_tx)?;
    let scene = Scene::new(commands, feedback_rx, epoch, config.frames_in_flight);
    Ok((scene, world))
}

impl Scene {
    pub fn new(
        commands: CommandSender,
        feedback: Receiver<RenderFeedback>,
        epoch: EpochReader,
        frames_in_flight: u64,
    ) -> Self {
        Self {
            entities: BTreeMap::new(),
            next_id: 0,
            tick: 0,
            commands,
            feedback,
            epoch,
            deletions: DeletionTracker::new(frames_in_flight),
            shut_down: false,
        }
    }

    fn send(&self, command: Command) -> Result<(), SceneError> {
        if self.shut_down {
            return Err(SceneError::ShutDown);
        }
        if self.commands.enqueue(command) {
            Ok(())
        } else {
            Err(SceneError::RendererGone)
        }
    }

    fn live(&self, id: EntityId) -> Result<&EntityRecord, SceneError> {
        let record = self.entities.get(&id).ok_or(SceneError::NotFound(id))?;
        match record.state {
            EntityState::Live => Ok(record),
            EntityState::PendingDeletion { .. } => Err(SceneError::PendingDeletion(id)),
        }
    }

    /// Create an entity drawn with `meshes` and `materials`.
    pub fn spawn(
        &mut self,
        transform: Transform,
        meshes: Vec<MeshSource>,
        materials: Vec<MaterialSource>,
    ) -> Result<EntityHandle, SceneError> {
        let id = EntityId(self.next_id);
        let record = EntityRecord {
            transform,
            meshes: meshes.iter().map(|m| m.id).collect(),
            materials: materials.iter().map(|m| m.id).collect(),
            highlighted: false,
            state: EntityState::Live,
        };
        self.send(Command::Spawn(SpawnRequest {
            entity_id: id,
            transform,
            meshes,
            materials,
        }))?;
        self.next_id += 1;
        self.entities.insert(id, record);
        tracing::debug!(entity = %id, "spawn queued");
        Ok(id)
    }

    /// Spawn from assets registered in `store`.
    pub fn spawn_assets(
        &mut self,
        store: &AssetStore,
        transform: Transform,
        meshes: &[MeshId],
        materials: &[MaterialId],
    ) -> Result<EntityHandle, SceneError> {
        let meshes = meshes
            .iter()
            .map(|&id| store.mesh_source(id))
            .collect::<Result<Vec<_>, _>>()?;
        let materials = materials
            .iter()
            .map(|&id| store.material_source(id))
            .collect::<Result<Vec<_>, _>>()?;
        self.spawn(transform, meshes, materials)
    }

    /// Stop drawing `id` now and reclaim its resources once the GPU is done.
    pub fn delete(&mut self, id: EntityHandle) -> Result<(), SceneError> {
        self.live(id)?;
        // Snapshot before the delete becomes visible to the render thread.
        let requested_epoch = self.epoch.completed();
        self.send(Command::Delete { entity_id: id })?;
        if !self.deletions.push(id, requested_epoch) {
            return Err(SceneError::PendingDeletion(id));
        }
        if let Some(record) = self.entities.get_mut(&id) {
            record.state = EntityState::PendingDeletion { requested_epoch };
        }
        tracing::debug!(entity = %id, requested_epoch, "delete queued");
        Ok(())
    }

    pub fn highlight(&mut self, id: EntityHandle) -> Result<(), SceneError> {
        self.set_highlight(id, true)
    }

    pub fn unhighlight(&mut self, id: EntityHandle) -> Result<(), SceneError> {
        self.set_highlight(id, false)
    }

    fn set_highlight(&mut self, id: EntityId, on: bool) -> Result<(), SceneError> {
        self.live(id)?;
        let command = if on {
            Command::Stencil { entity_id: id }
        } else {
            Command::UnStencil { entity_id: id }
        };
        self.send(command)?;
        if let Some(record) = self.entities.get_mut(&id) {
            record.highlighted = on;
        }
        Ok(())
    }

    pub fn set_transform(&mut self, id: EntityHandle, transform: Transform) -> Result<(), SceneError> {
        self.live(id)?;
        self.send(Command::SetTransform {
            entity_id: id,
            transform,
        })?;
        if let Some(record) = self.entities.get_mut(&id) {
            record.transform = transform;
        }
        Ok(())
    }

    pub fn toggle_wireframe(&mut self) -> Result<(), SceneError> {
        self.send(Command::ToggleWireframe)
    }

    pub fn update_ray_tracing(&mut self) -> Result<(), SceneError> {
        self.send(Command::UpdateRayTracing)
    }

    pub fn update_command_buffer(&mut self) -> Result<(), SceneError> {
        self.send(Command::UpdateCommandBuffer)
    }

    /// Show `entities` in the GUI preview target. Unknown ids are skipped by
    /// the render thread; an empty list ends the preview.
    pub fn preview(&mut self, entities: Vec<EntityHandle>, target: u32) -> Result<(), SceneError> {
        self.send(Command::PreviewObjects { entities, target })
    }

    /// Ask the render thread to stop after everything queued so far.
    pub fn shutdown(&mut self) -> Result<(), SceneError> {
        self.send(Command::Shutdown)?;
        self.shut_down = true;
        tracing::info!(pending_deletions = self.deletions.len(), "shutdown queued");
        Ok(())
    }

    /// One simulation tick: absorb render feedback, then reclaim.
    pub fn tick(&mut self) -> Result<TickReport, SceneError> {
        self.tick += 1;
        let rejected = self.absorb_feedback();
        let reclaimed = self.reclaim()?;
        Ok(TickReport {
            tick: self.tick,
            reclaimed,
            rejected,
        })
    }

    fn absorb_feedback(&mut self) -> Vec<EntityId> {
        let mut rejected = Vec::new();
        while let Ok(RenderFeedback::SpawnRejected { entity_id, reason }) = self.feedback.try_recv()
        {
            tracing::warn!(entity = %entity_id, %reason, "spawn rejected by renderer");
            // a pending deletion still goes through the reclaim path
            if self
                .entities
                .get(&entity_id)
                .is_some_and(|r| r.state == EntityState::Live)
            {
                self.entities.remove(&entity_id);
                rejected.push(entity_id);
            }
        }
        rejected
    }

    /// Finalize every deletion the completed-frame epoch has made safe.
    ///
    /// The release itself runs on the render thread via `Reclaim`.
    pub fn reclaim(&mut self) -> Result<Vec<EntityId>, SceneError> {
        let completed = self.epoch.completed();
        let _span = tracing::info_span!("reclaim", completed).entered();
        if self.shut_down {
            return Ok(Vec::new());
        }
        let mut reclaimed = Vec::new();
        // Popped only once the reclaim is queued, so a failed send loses nothing.
        while let Some(request) = self.deletions.next_ready(completed) {
            self.send(Command::Reclaim {
                entity_id: request.entity_id,
            })?;
            self.deletions.pop_front();
            self.entities.remove(&request.entity_id);
            reclaimed.push(request.entity_id);
        }
        if !reclaimed.is_empty() {
            tracing::debug!(count = reclaimed.len(), "entities reclaimed");
        }
        Ok(reclaimed)
    }

    pub fn get(&self, id: EntityHandle) -> Option<&EntityRecord> {
        self.entities.get(&id)
    }

    /// All records, live and pending deletion, in id order.
    pub fn entities(&self) -> &BTreeMap<EntityId, EntityRecord> {
        &self.entities
    }

    pub fn entity_count(&self) -> usize {
        self.entities.len()
    }

    pub fn live_count(&self) -> usize {
        self.entities
            .values()
            .filter(|r| r.state == EntityState::Live)
            .count()
    }

    pub fn pending_deletions(&self) -> usize {
        self.deletions.len()
    }

    pub fn completed_epoch(&self) -> u64 {
        self.epoch.completed()
    }

    pub fn current_tick(&self) -> u64 {
        self.tick
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down
    }
}
