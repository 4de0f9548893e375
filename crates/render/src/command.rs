use crossbeam_channel::{Receiver, Sender, TryRecvError};
use framekeep_assets::{MaterialSource, MeshSource};
use framekeep_common::{EntityId, Transform};

/// Everything the render thread needs to make an entity drawable.
///
/// Draw part `i` pairs `meshes[i]` with `materials[i]`, or with the last
/// material when there are fewer materials than meshes.
#[derive(Debug, Clone)]
pub struct SpawnRequest {
    pub entity_id: EntityId,
    pub transform: Transform,
    pub meshes: Vec<MeshSource>,
    pub materials: Vec<MaterialSource>,
}

/// One-shot intent from the simulation thread, applied once by the render thread.
#[derive(Debug, Clone)]
pub enum Command {
    Spawn(SpawnRequest),
    /// Stop drawing the entity. Its resources stay resident until `Reclaim`.
    Delete { entity_id: EntityId },
    /// Draw the entity with the highlight outline.
    Stencil { entity_id: EntityId },
    UnStencil { entity_id: EntityId },
    SetTransform {
        entity_id: EntityId,
        transform: Transform,
    },
    ToggleWireframe,
    /// Rebuild the ray-tracing acceleration structures.
    UpdateRayTracing,
    /// Re-record the static command buffers.
    UpdateCommandBuffer,
    /// Render `entities` into the offscreen GUI target `target`. An empty
    /// list ends the preview.
    PreviewObjects {
        entities: Vec<EntityId>,
        target: u32,
    },
    /// Release a deleted entity's shared resources and instance slot.
    Reclaim { entity_id: EntityId },
    Shutdown,
}

impl Command {
    /// The entity this command targets, if any.
    pub fn entity(&self) -> Option<EntityId> {
        match self {
            Self::Spawn(req) => Some(req.entity_id),
            Self::Delete { entity_id }
            | Self::Stencil { entity_id }
            | Self::UnStencil { entity_id }
            | Self::SetTransform { entity_id, .. }
            | Self::Reclaim { entity_id } => Some(*entity_id),
            Self::ToggleWireframe
            | Self::UpdateRayTracing
            | Self::UpdateCommandBuffer
            | Self::PreviewObjects { .. }
            | Self::Shutdown => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Spawn(_) => "spawn",
            Self::Delete { .. } => "delete",
            Self::Stencil { .. } => "stencil",
            Self::UnStencil { .. } => "unstencil",
            Self::SetTransform { .. } => "set_transform",
            Self::ToggleWireframe => "toggle_wireframe",
            Self::UpdateRayTracing => "update_ray_tracing",
            Self::UpdateCommandBuffer => "update_command_buffer",
            Self::PreviewObjects { .. } => "preview_objects",
            Self::Reclaim { .. } => "reclaim",
            Self::Shutdown => "shutdown",
        }
    }
}

/// Producer half of the command channel, held by the simulation thread.
#[derive(Debug, Clone)]
pub struct CommandSender {
    sender: Sender<Command>,
}

impl CommandSender {
    /// Queue `command` for the next drain.
    ///
    /// Returns `false` when the render thread is gone; the command is dropped.
    /// On a bounded channel this waits for room.
    pub fn enqueue(&self, command: Command) -> bool {
        match self.sender.send(command) {
            Ok(()) => true,
            Err(err) => {
                tracing::warn!(command = err.0.name(), "render thread gone, command dropped");
                false
            }
        }
    }

    /// Commands queued and not yet drained.
    pub fn pending(&self) -> usize {
        self.sender.len()
    }
}

/// Consumer half of the command channel, owned by the render thread.
#[derive(Debug)]
pub struct CommandReceiver {
    receiver: Receiver<Command>,
}

/// Result of a non-blocking poll of the channel.
#[derive(Debug)]
pub enum Poll {
    Ready(Command),
    Empty,
    /// Every sender is gone and the queue is drained.
    Closed,
}

impl CommandReceiver {
    pub fn poll(&self) -> Poll {
        match self.receiver.try_recv() {
            Ok(command) => Poll::Ready(command),
            Err(TryRecvError::Empty) => Poll::Empty,
            Err(TryRecvError::Disconnected) => Poll::Closed,
        }
    }

    pub fn pending(&self) -> usize {
        self.receiver.len()
    }
}

/// Unbounded command channel. The producer never waits.
pub fn command_channel() -> (CommandSender, CommandReceiver) {
    let (sender, receiver) = crossbeam_channel::unbounded();
    (CommandSender { sender }, CommandReceiver { receiver })
}

/// Bounded command channel: `enqueue` waits while `capacity` commands are queued.
pub fn command_channel_bounded(capacity: usize) -> (CommandSender, CommandReceiver) {
    let (sender, receiver) = crossbeam_channel::bounded(capacity);
    (CommandSender { sender }, CommandReceiver { receiver })
}

/// Reports from the render thread back to the simulation thread.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RenderFeedback {
    /// The spawn was rolled back; the entity will never be drawn.
    SpawnRejected { entity_id: EntityId, reason: String },
}

/// Unbounded feedback channel from the render thread.
pub fn feedback_channel() -> (Sender<RenderFeedback>, Receiver<RenderFeedback>) {
    crossbeam_channel::unbounded()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn commands_arrive_in_order() {
        let (tx, rx) = command_channel();
        assert!(tx.enqueue(Command::Delete {
            entity_id: EntityId(1)
        }));
        assert!(tx.enqueue(Command::ToggleWireframe));
        assert_eq!(rx.pending(), 2);
        assert!(matches!(rx.poll(), Poll::Ready(Command::Delete { .. })));
        assert!(matches!(rx.poll(), Poll::Ready(Command::ToggleWireframe)));
        assert!(matches!(rx.poll(), Poll::Empty));
    }

    #[test]
    fn enqueue_after_receiver_dropped_returns_false() {
        let (tx, rx) = command_channel();
        drop(rx);
        assert!(!tx.enqueue(Command::Shutdown));
    }

    #[test]
    fn closed_after_senders_dropped_and_drained() {
        let (tx, rx) = command_channel_bounded(4);
        tx.enqueue(Command::UpdateRayTracing);
        drop(tx);
        assert!(matches!(rx.poll(), Poll::Ready(Command::UpdateRayTracing)));
        assert!(matches!(rx.poll(), Poll::Closed));
    }

    #[test]
    fn command_entity_and_name() {
        let cmd = Command::Reclaim {
            entity_id: EntityId(4),
        };
        assert_eq!(cmd.entity(), Some(EntityId(4)));
        assert_eq!(cmd.name(), "reclaim");
        assert_eq!(Command::Shutdown.entity(), None);
    }
}
