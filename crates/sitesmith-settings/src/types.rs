//! Settings type definitions.
//!
//! All types use camelCase JSON keys and `#[serde(default)]`, so a partial
//! settings file only needs to name the values it changes.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Root settings type.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SitesmithSettings {
    pub server: ServerSettings,
    pub generation: GenerationSettings,
    pub workspace: WorkspaceSettings,
    pub storage: StorageSettings,
    pub logging: LoggingSettings,
}

impl SitesmithSettings {
    /// Reject values the pipeline cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.generation.max_tokens == 0 {
            return Err(SettingsError::InvalidValue(
                "generation.maxTokens must be positive".into(),
            ));
        }
        if !(0.0..=2.0).contains(&self.generation.temperature) {
            return Err(SettingsError::InvalidValue(format!(
                "generation.temperature {} outside 0.0..=2.0",
                self.generation.temperature
            )));
        }
        if self.generation.timeout_ms == 0 {
            return Err(SettingsError::InvalidValue(
                "generation.timeoutMs must be positive".into(),
            ));
        }
        if self.workspace.modify_keywords.iter().any(|k| k.trim().is_empty()) {
            return Err(SettingsError::InvalidValue(
                "workspace.modifyKeywords must not contain blank entries".into(),
            ));
        }
        Ok(())
    }
}

/// HTTP / WebSocket listener settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    /// Bind address.
    pub host: String,
    /// Listen port. `0` picks a free port.
    pub port: u16,
    /// Absolute base used to build `livePreviewUrl`. Defaults to
    /// `http://localhost:{port}` when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub public_base_url: Option<String>,
    /// Per-client outbound WebSocket queue length.
    pub max_send_queue: usize,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3002,
            public_base_url: None,
            max_send_queue: 256,
        }
    }
}

impl ServerSettings {
    pub fn public_base_url(&self) -> String {
        self.public_base_url
            .clone()
            .unwrap_or_else(|| format!("http://localhost:{}", self.port))
            .trim_end_matches('/')
            .to_string()
    }
}

/// External generation service settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GenerationSettings {
    /// OpenAI-compatible chat completions endpoint.
    pub api_url: String,
    pub model: String,
    /// Name of the environment variable holding the API key.
    pub api_key_env: String,
    pub max_tokens: u32,
    pub temperature: f64,
    /// Upper bound on one generation call, in milliseconds.
    pub timeout_ms: u64,
    /// How much of the current document is sent along with a modification.
    pub modify_context_chars: usize,
}

impl Default for GenerationSettings {
    fn default() -> Self {
        Self {
            api_url: "https://api.groq.com/openai/v1/chat/completions".to_string(),
            model: "llama-3.3-70b-versatile".to_string(),
            api_key_env: "GROQ_API_KEY".to_string(),
            max_tokens: 6000,
            temperature: 0.7,
            timeout_ms: 60_000,
            modify_context_chars: 1500,
        }
    }
}

/// Workspace pipeline heuristics.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WorkspaceSettings {
    /// Minimum spacing between two generation calls of one workspace.
    pub cooldown_ms: u64,
    /// A workspace document must be longer than this to be modified in place.
    pub min_modify_chars: usize,
    /// Lower-case phrases that mark a command as a modification candidate.
    pub modify_keywords: Vec<String>,
}

impl Default for WorkspaceSettings {
    fn default() -> Self {
        Self {
            cooldown_ms: 3000,
            min_modify_chars: 100,
            modify_keywords: [
                "change", "modify", "move", "update", "add to", "remove", "make", "adjust", "edit",
            ]
            .iter()
            .map(ToString::to_string)
            .collect(),
        }
    }
}

/// Durable storage settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StorageSettings {
    /// SQLite database path, relative to the data directory unless absolute.
    pub db_path: String,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            db_path: "database/sitesmith.db".to_string(),
        }
    }
}

/// Logging settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Default level; `RUST_LOG` takes precedence.
    pub level: String,
    /// Emit JSON lines instead of human-readable output.
    pub json: bool,
    /// Persist WARN and above to a SQLite log database.
    pub persist_warnings: bool,
    /// Log database path, relative to the data directory unless absolute.
    pub log_db_path: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
            persist_warnings: true,
            log_db_path: "database/sitesmith-logs.db".to_string(),
        }
    }
}

/// Resolve a configured path against the data directory.
pub fn resolve_path(data_dir: &Path, configured: &str) -> PathBuf {
    let path = Path::new(configured);
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        data_dir.join(path)
    }
}
