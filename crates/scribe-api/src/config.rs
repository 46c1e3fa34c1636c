// Process configuration, loaded from the environment

use std::path::PathBuf;
use std::time::Duration;

use scribe_ingest::IngestConfig;
use scribe_storage::DEFAULT_HEARTBEAT_INTERVAL;

/// Top-level configuration for the scribed binary.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// HTTP bind address
    pub bind_addr: String,

    /// Root for the SQLite files
    pub data_dir: PathBuf,

    /// Heartbeat cadence for the liveness rows
    pub heartbeat_interval: Duration,

    pub ingest: IngestConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:8600".to_string(),
            data_dir: PathBuf::from("data"),
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            ingest: IngestConfig::default(),
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Self {
        let mut config = Self {
            ingest: IngestConfig::from_env(),
            ..Self::default()
        };

        if let Ok(addr) = std::env::var("SCRIBE_BIND") {
            config.bind_addr = addr;
        }
        if let Ok(dir) = std::env::var("SCRIBE_DATA_DIR") {
            config.data_dir = PathBuf::from(&dir);
            // Keep blob and artifact dirs under the data root unless
            // explicitly overridden
            if std::env::var("SCRIBE_CHUNKS_DIR").is_err() {
                config.ingest.chunks_dir = config.data_dir.join("chunks");
            }
            if std::env::var("SCRIBE_WORK_DIR").is_err() {
                config.ingest.work_dir = config.data_dir.join("work");
            }
        }
        if let Some(secs) = std::env::var("SCRIBE_HEARTBEAT_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
        {
            config.heartbeat_interval = Duration::from_secs(secs);
        }

        config
    }

    /// Main datastore: jobs, dossiers, uploads, blobs, documents.
    pub fn main_db_url(&self) -> String {
        format!("sqlite:{}", self.data_dir.join("scribe.db").display())
    }

    /// Step trace datastore.
    pub fn trace_db_url(&self) -> String {
        format!("sqlite:{}", self.data_dir.join("trace.db").display())
    }

    /// Observability datastore: heartbeats, audit events.
    pub fn observability_db_url(&self) -> String {
        format!("sqlite:{}", self.data_dir.join("observability.db").display())
    }
}
