//! Configuration loading helpers
//!
//! Merges a configuration file (format chosen by extension) with prefixed
//! environment variables. Nested keys use `__` as separator, so
//! `COMSRV_LOGGING__LEVEL=debug` overrides `logging.level`.

use std::path::Path;

use errors::{TmsError, TmsResult};
use figment::{
    providers::{Env, Format, Json, Toml, Yaml},
    Figment,
};
use serde::de::DeserializeOwned;
use tracing::debug;

/// Build a figment from `path` plus `env_prefix` variables
pub fn figment_for(path: &Path, env_prefix: &str) -> TmsResult<Figment> {
    if !path.exists() {
        return Err(TmsError::MissingConfig(path.display().to_string()));
    }

    let extension = path
        .extension()
        .and_then(|s| s.to_str())
        .ok_or_else(|| TmsError::Configuration("Invalid file extension".to_string()))?;

    let figment = match extension {
        "json" => Figment::new().merge(Json::file(path)),
        "toml" => Figment::new().merge(Toml::file(path)),
        "yaml" | "yml" => Figment::new().merge(Yaml::file(path)),
        _ => {
            return Err(TmsError::Configuration(format!(
                "Unsupported config format: {}",
                extension
            )))
        },
    };

    debug!("Loading configuration from {}", path.display());
    Ok(figment.merge(Env::prefixed(env_prefix).split("__")))
}

/// Load and deserialize a configuration file
pub fn load_config<T: DeserializeOwned>(path: &Path, env_prefix: &str) -> TmsResult<T> {
    figment_for(path, env_prefix)?
        .extract()
        .map_err(|e| TmsError::Configuration(format!("Failed to parse config: {}", e)))
}
