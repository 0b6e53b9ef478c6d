//! # Configuration
//!
//! Loads `archgov.toml` and turns it into the pieces the pipeline needs:
//! an [`AdapterConfig`], a [`Reasoner`] and a [`RecordStore`].
//!
//! ```toml
//! [pipeline]
//! retry_bound = 1
//! timeout_secs = 30
//!
//! [reasoner]
//! kind = "builtin"        # or "http"
//! endpoint = "http://localhost:11434/v1/chat/completions"
//! model = "llama3"
//! api_key_env = "ARCHGOV_REASONER_KEY"
//! temperature = 0.0
//!
//! [store]
//! backend = "memory"      # or "redb"
//! path = "archgov.db"
//! catalog = "catalog.json"
//! ```
//!
//! Every section and key is optional.

use crate::reasoner_http::{HttpReasoner, HttpReasonerConfig};
use archgov_core::{
    AdapterConfig, DEFAULT_RETRY_BOUND, GovernanceError, MemoryRecordStore, Reasoner,
    RecordStore, RedbRecordStore, RuleBasedReasoner,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// Config file looked up in the working directory when `--config` is absent.
pub const DEFAULT_CONFIG_FILE: &str = "archgov.toml";

/// Maximum config file size (1 MB).
const MAX_CONFIG_FILE_SIZE: u64 = 1024 * 1024;

// =============================================================================
// SECTIONS
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PipelineSection {
    /// Additional attempts after the first.
    pub retry_bound: u32,
    /// Per reasoning call.
    pub timeout_secs: u64,
}

impl Default for PipelineSection {
    fn default() -> Self {
        Self {
            retry_bound: DEFAULT_RETRY_BOUND,
            timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReasonerKind {
    #[default]
    Builtin,
    Http,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ReasonerSection {
    pub kind: ReasonerKind,
    pub endpoint: String,
    pub model: String,
    /// Name of the environment variable holding the bearer token.
    pub api_key_env: Option<String>,
    pub temperature: f32,
}

impl Default for ReasonerSection {
    fn default() -> Self {
        Self {
            kind: ReasonerKind::Builtin,
            endpoint: "http://localhost:11434/v1/chat/completions".to_string(),
            model: "llama3".to_string(),
            api_key_env: None,
            temperature: 0.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    #[default]
    Memory,
    Redb,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StoreSection {
    pub backend: StoreBackend,
    /// redb database file.
    pub path: PathBuf,
    /// JSON catalog loaded by the memory backend. The sample catalog is used
    /// when unset.
    pub catalog: Option<PathBuf>,
}

impl Default for StoreSection {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Memory,
            path: PathBuf::from("archgov.db"),
            catalog: None,
        }
    }
}

// =============================================================================
// APP CONFIG
// =============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AppConfig {
    pub pipeline: PipelineSection,
    pub reasoner: ReasonerSection,
    pub store: StoreSection,
}

impl AppConfig {
    /// Parse a TOML document.
    pub fn from_toml(text: &str) -> Result<Self, GovernanceError> {
        toml::from_str(text).map_err(|e| GovernanceError::Serialization(format!("config: {e}")))
    }

    /// Load `path`, or [`DEFAULT_CONFIG_FILE`] if it exists, or defaults.
    ///
    /// An explicit path that does not exist is an error.
    pub fn load(path: Option<&Path>) -> Result<Self, GovernanceError> {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => {
                let default = PathBuf::from(DEFAULT_CONFIG_FILE);
                if !default.is_file() {
                    tracing::debug!("no config file, using defaults");
                    return Ok(Self::default());
                }
                default
            }
        };

        let metadata = std::fs::metadata(&path).map_err(|e| {
            GovernanceError::Io(format!("Cannot read config '{}': {}", path.display(), e))
        })?;
        if metadata.len() > MAX_CONFIG_FILE_SIZE {
            return Err(GovernanceError::Io(format!(
                "Config file size {} bytes exceeds maximum allowed {} bytes",
                metadata.len(),
                MAX_CONFIG_FILE_SIZE
            )));
        }
        let text = std::fs::read_to_string(&path)
            .map_err(|e| GovernanceError::Io(format!("Read config: {e}")))?;

        tracing::info!(path = %path.display(), "config loaded");
        Self::from_toml(&text)
    }

    #[must_use]
    pub fn adapter_config(&self) -> AdapterConfig {
        AdapterConfig::new(
            self.pipeline.retry_bound,
            Duration::from_secs(self.pipeline.timeout_secs.max(1)),
        )
    }

    /// Build the configured reasoning provider.
    pub fn build_reasoner(&self) -> Result<Arc<dyn Reasoner>, GovernanceError> {
        match self.reasoner.kind {
            ReasonerKind::Builtin => Ok(Arc::new(RuleBasedReasoner)),
            ReasonerKind::Http => {
                let api_key = match &self.reasoner.api_key_env {
                    Some(var) => {
                        let key = std::env::var(var).ok().filter(|k| !k.is_empty());
                        if key.is_none() {
                            tracing::warn!(var = %var, "reasoner API key variable is not set");
                        }
                        key
                    }
                    None => None,
                };
                let reasoner = HttpReasoner::new(HttpReasonerConfig {
                    endpoint: self.reasoner.endpoint.clone(),
                    api_key,
                    model: self.reasoner.model.clone(),
                    temperature: self.reasoner.temperature,
                })?;
                Ok(Arc::new(reasoner))
            }
        }
    }

    /// Open the configured record store. `database` forces the redb backend.
    pub fn open_store(
        &self,
        database: Option<&Path>,
    ) -> Result<Arc<dyn RecordStore>, GovernanceError> {
        if let Some(path) = database {
            return Ok(Arc::new(RedbRecordStore::open(path)?));
        }
        match self.store.backend {
            StoreBackend::Redb => Ok(Arc::new(RedbRecordStore::open(&self.store.path)?)),
            StoreBackend::Memory => match &self.store.catalog {
                Some(catalog) => {
                    let data = std::fs::read(catalog).map_err(|e| {
                        GovernanceError::Io(format!(
                            "Read catalog '{}': {}",
                            catalog.display(),
                            e
                        ))
                    })?;
                    Ok(Arc::new(MemoryRecordStore::from_json(&data)?))
                }
                None => Ok(Arc::new(MemoryRecordStore::sample())),
            },
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================
