use super::ConfigError;
use std::path::{Path, PathBuf};

pub const SETTINGS_ENV_VAR: &str = "TASKFLOW_CONFIG";
pub const GLOBAL_STATE_DIR: &str = ".taskflow";
pub const GLOBAL_SETTINGS_FILE_NAME: &str = "settings.yaml";

pub fn default_settings_path() -> Result<PathBuf, ConfigError> {
    if let Some(explicit) = std::env::var_os(SETTINGS_ENV_VAR).filter(|v| !v.is_empty()) {
        return Ok(PathBuf::from(explicit));
    }
    let home = std::env::var_os("HOME")
        .filter(|v| !v.is_empty())
        .ok_or(ConfigError::HomeDirectoryUnavailable)?;
    Ok(PathBuf::from(home)
        .join(GLOBAL_STATE_DIR)
        .join(GLOBAL_SETTINGS_FILE_NAME))
}

/// Resolves `path` against `base_dir` unless it is already absolute.
pub fn resolve_relative(base_dir: Option<&Path>, path: &Path) -> PathBuf {
    if path.is_absolute() {
        return path.to_path_buf();
    }
    match base_dir {
        Some(base) => base.join(path),
        None => path.to_path_buf(),
    }
}
