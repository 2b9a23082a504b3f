//! `~/.colloquy/config.toml` discovery and parsing.
//!
//! ```toml
//! [session]
//! model = "gpt-4o"
//! temperature = 0.7
//! stop_sequences = ["\n\nUser:"]
//! initial_system_message = "You are a terse assistant."
//!
//! [backend]
//! base_url = "https://api.openai.com/v1"
//! api_key = "${OPENAI_API_KEY}"
//! idle_timeout_secs = 60
//!
//! [store]
//! path = "/var/lib/colloquy/sessions.db"
//!
//! [models."my-finetune"]
//! context_window = 32000
//! max_output = 4096
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use std::{env, fs};

use serde::Deserialize;

use colloquy_types::CompletionSettings;

/// Overrides the config file location when set.
pub const CONFIG_PATH_ENV: &str = "COLLOQUY_CONFIG";
/// Consulted when `[backend] api_key` is absent or expands to nothing.
pub const API_KEY_ENV: &str = "OPENAI_API_KEY";

const CONFIG_DIR: &str = ".colloquy";
const DEFAULT_IDLE_TIMEOUT_SECS: u64 = 60;

#[derive(Debug, Default, Deserialize)]
pub struct ColloquyConfig {
    /// Defaults for sessions opened on first contact.
    pub session: Option<CompletionSettings>,
    pub backend: Option<BackendConfig>,
    pub store: Option<StoreConfig>,
    /// Per-model budget overrides, keyed by exact model name.
    #[serde(default)]
    pub models: BTreeMap<String, ModelOverride>,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config at {}: {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse config at {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

impl ConfigError {
    #[must_use]
    pub fn path(&self) -> &Path {
        match self {
            ConfigError::Read { path, .. } | ConfigError::Parse { path, .. } => path,
        }
    }
}

#[derive(Default, Deserialize)]
pub struct BackendConfig {
    pub base_url: Option<String>,
    /// May reference environment variables as `${NAME}`.
    pub api_key: Option<String>,
    pub idle_timeout_secs: Option<u64>,
}

// Manual Debug impl to prevent leaking API keys in logs.
impl std::fmt::Debug for BackendConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let key = if self.api_key.is_some() {
            "[REDACTED]"
        } else {
            "None"
        };
        f.debug_struct("BackendConfig")
            .field("base_url", &self.base_url)
            .field("api_key", &key)
            .field("idle_timeout_secs", &self.idle_timeout_secs)
            .finish()
    }
}

impl BackendConfig {
    /// The configured key with `${VAR}` references expanded, falling back to
    /// `$OPENAI_API_KEY`. `None` when neither yields a non-blank value.
    #[must_use]
    pub fn resolved_api_key(&self) -> Option<String> {
        self.api_key
            .as_deref()
            .map(expand_env_vars)
            .filter(|key| !key.trim().is_empty())
            .or_else(|| env::var(API_KEY_ENV).ok().filter(|k| !k.trim().is_empty()))
            .map(|key| key.trim().to_string())
    }

    #[must_use]
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(
            self.idle_timeout_secs
                .filter(|secs| *secs > 0)
                .unwrap_or(DEFAULT_IDLE_TIMEOUT_SECS),
        )
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct StoreConfig {
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct ModelOverride {
    pub context_window: u32,
    pub max_output: u32,
}

/// Replace every `${NAME}` with the value of that environment variable.
///
/// Unset variables expand to the empty string. An unterminated `${` and the
/// empty reference `${}` are left as written.
#[must_use]
pub fn expand_env_vars(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut rest = value;

    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find('}') {
            Some(0) => {
                out.push_str("${}");
                rest = &after[1..];
            }
            Some(end) => {
                out.push_str(&env::var(&after[..end]).unwrap_or_default());
                rest = &after[end + 1..];
            }
            None => {
                out.push_str(&rest[start..]);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out
}

impl ColloquyConfig {
    /// Load from [`ColloquyConfig::path`]. `Ok(None)` when there is no file.
    pub fn load() -> Result<Option<Self>, ConfigError> {
        let Some(path) = Self::path() else {
            return Ok(None);
        };
        if !path.exists() {
            tracing::debug!("No config file at {}", path.display());
            return Ok(None);
        }
        Self::load_from(&path).map(Some)
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| {
            tracing::warn!("Failed to read config at {}: {source}", path.display());
            ConfigError::Read {
                path: path.to_path_buf(),
                source,
            }
        })?;

        toml::from_str(&content).map_err(|source| {
            tracing::warn!("Failed to parse config at {}: {source}", path.display());
            ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            }
        })
    }

    /// `$COLLOQUY_CONFIG` if set, else `~/.colloquy/config.toml`.
    #[must_use]
    pub fn path() -> Option<PathBuf> {
        env::var_os(CONFIG_PATH_ENV)
            .filter(|p| !p.is_empty())
            .map(PathBuf::from)
            .or_else(|| dirs::home_dir().map(|home| home.join(CONFIG_DIR).join("config.toml")))
    }

    #[must_use]
    pub fn completion_settings(&self) -> CompletionSettings {
        self.session.clone().unwrap_or_default()
    }

    /// Configured store path, else `~/.colloquy/sessions.db`.
    #[must_use]
    pub fn store_path(&self) -> Option<PathBuf> {
        self.store
            .as_ref()
            .and_then(|store| store.path.clone())
            .or_else(|| dirs::home_dir().map(|home| home.join(CONFIG_DIR).join("sessions.db")))
    }
}
