//! Workspace configuration loaded from the environment, plus the per-user TOML file.

use crate::controller::{ControllerOptions, DEFAULT_LANGUAGE};
use crate::error::ConfigError;
use crate::layout::{LayoutConfig, Size};
use crate::persistence::WORKSPACES;
use crate::selection::ACTIVE_SET_CAPACITY;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

const DEFAULT_VIEWPORT_WIDTH: f64 = 1440.0;
const DEFAULT_VIEWPORT_HEIGHT: f64 = 900.0;
const DEFAULT_AUTOSAVE_MS: u64 = 1000;
const DEFAULT_STORE_PATH: &str = "./data/aura_store";

/// Runtime configuration.
///
/// | Env | Default | Description |
/// |-----|---------|-------------|
/// | AURA_VIEWPORT_WIDTH / AURA_VIEWPORT_HEIGHT | 1440 / 900 | Viewport used for placement until the client reports its own. |
/// | AURA_AUTOSAVE_DEBOUNCE_MS | 1000 | Quiet period before the workspace is persisted. |
/// | AURA_ACTIVE_SET_CAPACITY | 5 | Recently used widget types that get a ranking boost. |
/// | AURA_AUTO_PLACE | true | Grid-search placement for widgets without a start position. |
/// | AURA_DEFAULT_LANGUAGE | en | Language tag of a fresh workspace. |
/// | AURA_STORE_PATH | ./data/aura_store | sled directory. |
/// | AURA_SESSION_COLLECTION | workspaces | Collection holding serialized workspaces. |
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkspaceConfig {
    pub viewport_width: f64,
    pub viewport_height: f64,
    pub autosave_debounce_ms: u64,
    pub active_set_capacity: usize,
    pub auto_place: bool,
    pub default_language: String,
    pub store_path: String,
    pub session_collection: String,
}

impl Default for WorkspaceConfig {
    fn default() -> Self {
        Self {
            viewport_width: DEFAULT_VIEWPORT_WIDTH,
            viewport_height: DEFAULT_VIEWPORT_HEIGHT,
            autosave_debounce_ms: DEFAULT_AUTOSAVE_MS,
            active_set_capacity: ACTIVE_SET_CAPACITY,
            auto_place: true,
            default_language: DEFAULT_LANGUAGE.to_string(),
            store_path: DEFAULT_STORE_PATH.to_string(),
            session_collection: WORKSPACES.to_string(),
        }
    }
}

impl WorkspaceConfig {
    /// Unset or invalid values fall back to the defaults above.
    pub fn from_env() -> Self {
        Self {
            viewport_width: env_positive_f64("AURA_VIEWPORT_WIDTH", DEFAULT_VIEWPORT_WIDTH),
            viewport_height: env_positive_f64("AURA_VIEWPORT_HEIGHT", DEFAULT_VIEWPORT_HEIGHT),
            autosave_debounce_ms: env_parse("AURA_AUTOSAVE_DEBOUNCE_MS", DEFAULT_AUTOSAVE_MS),
            active_set_capacity: env_parse("AURA_ACTIVE_SET_CAPACITY", ACTIVE_SET_CAPACITY).max(1),
            auto_place: env_bool("AURA_AUTO_PLACE", true),
            default_language: env_opt_string("AURA_DEFAULT_LANGUAGE")
                .unwrap_or_else(|| DEFAULT_LANGUAGE.to_string()),
            store_path: env_opt_string("AURA_STORE_PATH")
                .unwrap_or_else(|| DEFAULT_STORE_PATH.to_string()),
            session_collection: env_opt_string("AURA_SESSION_COLLECTION")
                .unwrap_or_else(|| WORKSPACES.to_string()),
        }
    }

    pub fn viewport(&self) -> Size {
        Size::new(self.viewport_width, self.viewport_height)
    }

    pub fn autosave_debounce(&self) -> Duration {
        Duration::from_millis(self.autosave_debounce_ms)
    }

    pub fn controller_options(&self) -> ControllerOptions {
        ControllerOptions {
            viewport: self.viewport(),
            layout: LayoutConfig::default(),
            auto_place: self.auto_place,
            language: self.default_language.clone(),
        }
    }
}

fn env_bool(name: &str, default: bool) -> bool {
    match std::env::var(name) {
        Ok(v) if v.trim().is_empty() => default,
        Ok(v) => matches!(v.trim().to_ascii_lowercase().as_str(), "true" | "1" | "yes" | "on"),
        Err(_) => default,
    }
}

fn env_parse<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn env_positive_f64(name: &str, default: f64) -> f64 {
    let v: f64 = env_parse(name, default);
    if v.is_finite() && v > 0.0 {
        v
    } else {
        default
    }
}

fn env_opt_string(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

fn default_true() -> bool {
    true
}

/// Per-user settings stored in `aura_config.toml` (LLM credentials and preferences).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserConfig {
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub llm_model: Option<String>,
    #[serde(default)]
    pub llm_api_url: Option<String>,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default = "default_true")]
    pub first_run: bool,
}

impl UserConfig {
    pub fn default_path() -> PathBuf {
        PathBuf::from("aura_config.toml")
    }

    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from_path(&Self::default_path())
    }

    /// Reads the file, creating a default one on first run.
    pub fn load_from_path(path: &Path) -> Result<Self, ConfigError> {
        if path.exists() {
            let content = fs::read_to_string(path)?;
            Ok(toml::from_str(&content)?)
        } else {
            let config = UserConfig {
                first_run: true,
                ..Default::default()
            };
            config.save_to_path(path)?;
            Ok(config)
        }
    }

    pub fn save_to_path(&self, path: &Path) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self)?;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, content)?;
        Ok(())
    }

    /// Priority: file > AURA_LLM_API_KEY > OPENROUTER_API_KEY.
    pub fn get_api_key(&self) -> Option<String> {
        self.api_key
            .clone()
            .or_else(|| std::env::var("AURA_LLM_API_KEY").ok())
            .or_else(|| std::env::var("OPENROUTER_API_KEY").ok())
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
    }

    pub fn get_llm_model(&self) -> Option<String> {
        self.llm_model
            .clone()
            .or_else(|| std::env::var("AURA_LLM_MODEL").ok())
            .filter(|s| !s.trim().is_empty())
    }

    pub fn get_llm_api_url(&self) -> Option<String> {
        self.llm_api_url
            .clone()
            .or_else(|| std::env::var("AURA_LLM_API_URL").ok())
            .filter(|s| !s.trim().is_empty())
    }

    pub fn is_first_run(&self) -> bool {
        self.first_run || self.api_key.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_controller_defaults() {
        let config = WorkspaceConfig::default();
        let options = config.controller_options();
        assert_eq!(options.viewport, Size::new(1440.0, 900.0));
        assert!(options.auto_place);
        assert_eq!(config.autosave_debounce(), Duration::from_secs(1));
        assert_eq!(config.session_collection, "workspaces");
    }

    #[test]
    fn user_config_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("aura_config.toml");

        let fresh = UserConfig::load_from_path(&path).unwrap();
        assert!(fresh.first_run);
        assert!(path.exists());

        let config = UserConfig {
            api_key: Some("sk-test".into()),
            llm_model: Some("meta-llama/llama-3.3-70b-instruct".into()),
            first_run: false,
            ..Default::default()
        };
        config.save_to_path(&path).unwrap();
        let loaded = UserConfig::load_from_path(&path).unwrap();
        assert_eq!(loaded, config);
        assert_eq!(loaded.get_api_key().as_deref(), Some("sk-test"));
        assert!(!loaded.is_first_run());
    }

    #[test]
    fn malformed_user_config_is_a_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("aura_config.toml");
        fs::write(&path, "api_key = [").unwrap();
        assert!(matches!(UserConfig::load_from_path(&path), Err(ConfigError::Parse(_))));
    }
}
