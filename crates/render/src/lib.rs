//! Render thread: command channel, resource state and frame pacing.
//!
//! The simulation thread sends [`Command`]s through a [`CommandSender`]; the
//! render thread applies them with [`RenderWorld::drain_and_apply`] once per
//! frame, strictly in order, before building the frame's draw list.
//!
//! # Invariants
//! - Only the render thread mutates slots and refcounts.
//! - The epoch advances once per frame the backend reports complete, in
//!   submission order.
//! - At most `frames_in_flight` frames are outstanding.
//! - Nothing an outstanding frame reads is rewritten or recreated: uniforms
//!   are kept per frame in flight, and buffer growth waits for idle.

mod command;
mod error;
mod gpu;
mod thread;
mod world;

pub use command::{
    Command, CommandReceiver, CommandSender, Poll, RenderFeedback, SpawnRequest, command_channel,
    command_channel_bounded, feedback_channel,
};
pub use error::RenderError;
pub use gpu::{BufferMapEntry, InstanceUniform};
pub use thread::spawn_render_thread;
pub use world::{DrainReport, RenderWorld};

pub fn crate_info() -> &'static str {
    "framekeep-render v0.1.0"
}
