//! Runtime configuration.
//!
//! Every section has defaults, so an empty TOML file (or none at all) is a
//! valid configuration:
//!
//! ```toml
//! [capture]
//! snaplen = 1600
//! filter = "tcp port 3724 or tcp port 1119"
//!
//! [reassembly]
//! idle_timeout_secs = 60
//!
//! [framing]
//! max_type = 500
//! excluded_types = [220, 221]
//! max_payload_len = 9000   # 0 removes the cap
//! tick_interval_ms = 16
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;

pub const DEFAULT_FILTER: &str = "tcp port 3724 or tcp port 1119";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid TOML: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("invalid value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PipelineConfig {
    pub capture: CaptureConfig,
    pub reassembly: ReassemblyConfig,
    pub framing: FramingRules,
    pub sink: SinkConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CaptureConfig {
    /// Bytes kept per captured packet.
    pub snaplen: i32,
    /// BPF expression applied to live captures. Empty means no filter.
    pub filter: String,
    pub promiscuous: bool,
    /// Read timeout of live handles; bounds how long a stop request waits.
    pub read_timeout_ms: i32,
    /// Capacity of the fan-in queue between capture threads and dispatch.
    pub queue_capacity: usize,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            snaplen: 1600,
            filter: DEFAULT_FILTER.to_string(),
            promiscuous: true,
            read_timeout_ms: 250,
            queue_capacity: 4096,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ReassemblyConfig {
    /// Directions silent for longer than this are force-closed.
    pub idle_timeout_secs: u64,
    /// How often the idle sweep runs.
    pub sweep_interval_secs: u64,
    /// Out-of-order bytes held per direction before the gap is skipped.
    pub max_buffered_bytes: usize,
}

impl Default for ReassemblyConfig {
    fn default() -> Self {
        Self {
            idle_timeout_secs: 60,
            sweep_interval_secs: 60,
            max_buffered_bytes: 4 * 1024 * 1024,
        }
    }
}

impl ReassemblyConfig {
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

/// Validation rules and pacing for frame extraction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FramingRules {
    pub min_type: u32,
    /// Inclusive upper bound of accepted type codes.
    pub max_type: u32,
    /// Control codes (keep-alives and the like) that end extraction.
    pub excluded_types: Vec<u32>,
    #[serde(deserialize_with = "payload_cap")]
    pub max_payload_len: Option<u32>,
    pub tick_interval_ms: u64,
    /// Reassembled chunks queued per direction before dispatch waits.
    pub chunk_queue_capacity: usize,
}

impl Default for FramingRules {
    fn default() -> Self {
        Self {
            min_type: 0,
            max_type: 500,
            excluded_types: Vec::new(),
            max_payload_len: Some(9000),
            tick_interval_ms: 16,
            chunk_queue_capacity: 64,
        }
    }
}

impl FramingRules {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }
}

fn payload_cap<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<u32>, D::Error> {
    let cap = u32::deserialize(deserializer)?;
    Ok((cap > 0).then_some(cap))
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SinkConfig {
    /// Frames waiting for the writer before submitters are held back.
    pub queue_capacity: usize,
    pub max_retries: u32,
    /// Backoff unit; attempt `n` waits `n * retry_backoff_ms`.
    pub retry_backoff_ms: u64,
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 1024,
            max_retries: 3,
            retry_backoff_ms: 100,
        }
    }
}

impl PipelineConfig {
    /// Read and validate a TOML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |field, reason: &str| {
            Err(ConfigError::Invalid {
                field,
                reason: reason.to_string(),
            })
        };
        if self.capture.snaplen <= 0 {
            return invalid("capture.snaplen", "must be positive");
        }
        if self.capture.read_timeout_ms <= 0 {
            return invalid("capture.read_timeout_ms", "must be positive");
        }
        if self.capture.queue_capacity == 0 {
            return invalid("capture.queue_capacity", "must be at least 1");
        }
        if self.reassembly.idle_timeout_secs == 0 {
            return invalid("reassembly.idle_timeout_secs", "must be at least 1");
        }
        if self.reassembly.sweep_interval_secs == 0 {
            return invalid("reassembly.sweep_interval_secs", "must be at least 1");
        }
        if self.reassembly.max_buffered_bytes == 0 {
            return invalid("reassembly.max_buffered_bytes", "must be at least 1");
        }
        if self.framing.min_type > self.framing.max_type {
            return invalid("framing.min_type", "must not exceed framing.max_type");
        }
        if self.framing.tick_interval_ms == 0 {
            return invalid("framing.tick_interval_ms", "must be at least 1");
        }
        if self.framing.chunk_queue_capacity == 0 {
            return invalid("framing.chunk_queue_capacity", "must be at least 1");
        }
        if self.sink.queue_capacity == 0 {
            return invalid("sink.queue_capacity", "must be at least 1");
        }
        Ok(())
    }
}
