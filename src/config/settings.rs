use super::paths::resolve_relative;
use super::ConfigError;
use crate::shared::ids::{ChainId, TaskId};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

pub const DEFAULT_MIN_SIMILARITY: f32 = 0.55;
pub const DEFAULT_FALLBACK_TASK_ID: &str = "echo_fields";
pub const DEFAULT_FALLBACK_CHAIN_ID: &str = "no_match_chain";

fn default_min_similarity() -> f32 {
    DEFAULT_MIN_SIMILARITY
}

fn default_fallback_task_id() -> String {
    DEFAULT_FALLBACK_TASK_ID.to_string()
}

fn default_fallback_chain_id() -> String {
    DEFAULT_FALLBACK_CHAIN_ID.to_string()
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Settings {
    #[serde(default)]
    pub catalog_path: Option<PathBuf>,
    #[serde(default)]
    pub routing: RoutingConfig,
    #[serde(default)]
    pub fallback: FallbackConfig,
    #[serde(default)]
    pub state_root: Option<PathBuf>,
    #[serde(default)]
    pub templates_dir: Option<PathBuf>,
    #[serde(default)]
    pub run_timeout_seconds: Option<u64>,
    #[serde(skip)]
    base_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RoutingConfig {
    #[serde(default = "default_min_similarity")]
    pub min_similarity: f32,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            min_similarity: DEFAULT_MIN_SIMILARITY,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FallbackConfig {
    #[serde(default = "default_fallback_task_id")]
    pub task_id: String,
    #[serde(default = "default_fallback_chain_id")]
    pub chain_id: String,
}

impl Default for FallbackConfig {
    fn default() -> Self {
        Self {
            task_id: default_fallback_task_id(),
            chain_id: default_fallback_chain_id(),
        }
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            catalog_path: None,
            routing: RoutingConfig::default(),
            fallback: FallbackConfig::default(),
            state_root: None,
            templates_dir: None,
            run_timeout_seconds: None,
            base_dir: None,
        }
    }
}

impl Settings {
    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let mut settings: Self =
            serde_yaml::from_str(&raw).map_err(|source| ConfigError::Parse {
                path: path.display().to_string(),
                source,
            })?;
        settings.base_dir = path.parent().map(Path::to_path_buf);
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let min = self.routing.min_similarity;
        if !min.is_finite() || !(0.0..=1.0).contains(&min) {
            return Err(ConfigError::Settings(format!(
                "`routing.min_similarity` must be within [0, 1], got {min}"
            )));
        }
        TaskId::parse(&self.fallback.task_id)
            .map_err(|err| ConfigError::Settings(format!("`fallback.task_id`: {err}")))?;
        ChainId::parse(&self.fallback.chain_id)
            .map_err(|err| ConfigError::Settings(format!("`fallback.chain_id`: {err}")))?;
        if self.run_timeout_seconds == Some(0) {
            return Err(ConfigError::Settings(
                "`run_timeout_seconds` must be >= 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn resolved_catalog_path(&self) -> Option<PathBuf> {
        self.catalog_path
            .as_deref()
            .map(|path| resolve_relative(self.base_dir.as_deref(), path))
    }

    pub fn resolved_state_root(&self) -> Option<PathBuf> {
        self.state_root
            .as_deref()
            .map(|path| resolve_relative(self.base_dir.as_deref(), path))
    }

    pub fn resolved_templates_dir(&self) -> Option<PathBuf> {
        self.templates_dir
            .as_deref()
            .map(|path| resolve_relative(self.base_dir.as_deref(), path))
    }
}
