// Response settings
//
// Server-wide defaults for the response document and per-request overrides,
// plus the buffered writer's sizing.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::common::BufferPool;
use crate::common::types::{DEFAULT_BUFFER_CAPACITY, DEFAULT_POOL_SIZE};
use crate::index::ScanConsistency;

/// How much profiling information a response carries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Profile {
    #[default]
    Off,
    /// Phase times, counts and operators
    Phases,
    /// Phases plus per-operator execution timings
    Timings,
}

/// Configuration for the buffered response writer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriterConfig {
    /// Buffered bytes beyond which the writer flushes
    pub buffer_capacity: usize,
    /// Minimum time between two time-triggered flushes
    pub flush_interval: Duration,
    /// Idle buffers kept by the pool
    pub pool_size: usize,
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            buffer_capacity: DEFAULT_BUFFER_CAPACITY,
            flush_interval: Duration::from_millis(100),
            pool_size: DEFAULT_POOL_SIZE,
        }
    }
}

/// Server-wide response defaults
#[derive(Clone)]
pub struct ServerSettings {
    pub pretty: bool,
    pub metrics: bool,
    pub signature: bool,
    pub controls: bool,
    pub profile: Profile,
    writer: WriterConfig,
    pool: Arc<BufferPool>,
}

impl ServerSettings {
    pub fn new() -> Self {
        Self {
            pretty: false,
            metrics: true,
            signature: true,
            controls: false,
            profile: Profile::Off,
            writer: WriterConfig::default(),
            pool: BufferPool::shared(),
        }
    }

    /// Use a dedicated buffer pool sized after `config`
    pub fn with_writer(mut self, config: WriterConfig) -> Self {
        self.pool = Arc::new(BufferPool::new(config.buffer_capacity, config.pool_size));
        self.writer = config;
        self
    }

    pub fn writer(&self) -> &WriterConfig {
        &self.writer
    }

    pub fn pool(&self) -> &Arc<BufferPool> {
        &self.pool
    }
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self::new()
    }
}

/// Per-request options; unset switches fall back to the server settings
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    pub pretty: Option<bool>,
    pub metrics: Option<bool>,
    pub signature: Option<bool>,
    pub controls: Option<bool>,
    pub profile: Option<Profile>,
    pub client_context_id: Option<String>,
    pub named_args: Map<String, Value>,
    pub positional_args: Vec<Value>,
    pub timeout: Option<Duration>,
    pub consistency: ScanConsistency,
}

impl RequestOptions {
    pub fn pretty(&self, settings: &ServerSettings) -> bool {
        self.pretty.unwrap_or(settings.pretty)
    }

    pub fn metrics(&self, settings: &ServerSettings) -> bool {
        self.metrics.unwrap_or(settings.metrics)
    }

    pub fn signature(&self, settings: &ServerSettings) -> bool {
        self.signature.unwrap_or(settings.signature)
    }

    pub fn controls(&self, settings: &ServerSettings) -> bool {
        self.controls.unwrap_or(settings.controls)
    }

    pub fn profile(&self, settings: &ServerSettings) -> Profile {
        self.profile.unwrap_or(settings.profile)
    }
}
