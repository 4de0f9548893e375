use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::BufferKind;

/// Errors from loading or validating a [`RenderConfig`].
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("frames_in_flight must be at least 1")]
    NoFramesInFlight,
    #[error("{kind} buffer alignment {alignment} is not a power of two")]
    Alignment { kind: BufferKind, alignment: u64 },
    #[error("{kind} buffer capacity {capacity} is not a multiple of its alignment")]
    Capacity { kind: BufferKind, capacity: u64 },
    #[error("max_capacity {max} is smaller than the {kind} buffer capacity {capacity}")]
    MaxCapacity {
        kind: BufferKind,
        capacity: u64,
        max: u64,
    },
}

/// Size and alignment of one fixed GPU buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BufferConfig {
    /// Total capacity in bytes.
    pub capacity: u64,
    /// Slot alignment in bytes; must be a power of two.
    pub alignment: u64,
}

impl BufferConfig {
    pub const fn new(capacity: u64, alignment: u64) -> Self {
        Self {
            capacity,
            alignment,
        }
    }
}

/// Startup configuration for the render-resource core.
///
/// Loaded once from JSON (or defaulted) and handed to both threads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderConfig {
    /// Pipelining depth of the render thread: how many submitted frames may
    /// be outstanding before it waits on the oldest one.
    pub frames_in_flight: u64,
    /// How long the render thread waits on one frame before treating the
    /// device as lost, in milliseconds.
    pub frame_timeout_ms: u64,
    /// Double a shared-resource buffer on exhaustion instead of rejecting the spawn.
    pub grow_on_exhaustion: bool,
    /// Upper bound for buffer growth, in bytes.
    pub max_capacity: u64,
    pub vertex: BufferConfig,
    pub index: BufferConfig,
    pub instance: BufferConfig,
    pub material: BufferConfig,
    pub mapping: BufferConfig,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            frames_in_flight: 2,
            frame_timeout_ms: 5_000,
            grow_on_exhaustion: true,
            max_capacity: 256 << 20,
            vertex: BufferConfig::new(16 << 20, 16),
            index: BufferConfig::new(8 << 20, 4),
            instance: BufferConfig::new(1 << 20, 256),
            material: BufferConfig::new(1 << 20, 256),
            mapping: BufferConfig::new(1 << 20, 16),
        }
    }
}

impl RenderConfig {
    /// Configuration of the buffer holding `kind`.
    pub fn buffer(&self, kind: BufferKind) -> BufferConfig {
        match kind {
            BufferKind::Vertex => self.vertex,
            BufferKind::Index => self.index,
            BufferKind::Instance => self.instance,
            BufferKind::Material => self.material,
            BufferKind::Mapping => self.mapping,
        }
    }

    pub fn frame_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.frame_timeout_ms)
    }

    /// Check the constraints the allocator and deletion tracker rely on.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.frames_in_flight == 0 {
            return Err(ConfigError::NoFramesInFlight);
        }
        for kind in [
            BufferKind::Vertex,
            BufferKind::Index,
            BufferKind::Instance,
            BufferKind::Material,
            BufferKind::Mapping,
        ] {
            let BufferConfig {
                capacity,
                alignment,
            } = self.buffer(kind);
            if !alignment.is_power_of_two() {
                return Err(ConfigError::Alignment { kind, alignment });
            }
            if capacity % alignment != 0 {
                return Err(ConfigError::Capacity { kind, capacity });
            }
            if kind != BufferKind::Mapping && self.max_capacity < capacity {
                return Err(ConfigError::MaxCapacity {
                    kind,
                    capacity,
                    max: self.max_capacity,
                });
            }
        }
        Ok(())
    }

    /// Load and validate a configuration from a JSON file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let file = std::fs::File::open(path)?;
        let config: Self = serde_json::from_reader(file)?;
        config.validate()?;
        Ok(config)
    }

    /// Save the configuration to a JSON file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let file = std::fs::File::create(path)?;
        serde_json::to_writer_pretty(file, self)?;
        Ok(())
    }
}
