pub mod catalog;
pub mod error;
pub mod load;
pub mod paths;
pub mod settings;

pub use catalog::{
    CatalogFileStore, ChainKind, ChainRow, ConfigStore, ManifestRow, MemoryConfigStore,
};
pub use error::ConfigError;
pub use load::load_settings;
pub use paths::{
    default_settings_path, resolve_relative, GLOBAL_SETTINGS_FILE_NAME, GLOBAL_STATE_DIR,
    SETTINGS_ENV_VAR,
};
pub use settings::{
    FallbackConfig, RoutingConfig, Settings, DEFAULT_FALLBACK_CHAIN_ID, DEFAULT_FALLBACK_TASK_ID,
    DEFAULT_MIN_SIMILARITY,
};
