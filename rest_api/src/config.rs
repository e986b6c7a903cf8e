// rest_api/src/config.rs

use std::env;
use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::Deserialize;

use storage::StoreConfig;

const DEFAULT_PORT: u16 = 8082;
const DEFAULT_HOST: &str = "127.0.0.1";

/// Configuration for the REST API server itself.
#[derive(Debug, Deserialize)]
pub struct RestApiConfig {
    pub port: u16,
    pub host: String,
}

/// Loads the REST API configuration. Environment variables win over the
/// built-in defaults; there is no config file for the thin HTTP layer.
pub fn load_rest_api_config() -> Result<RestApiConfig> {
    let port = match env::var("SCHED_API_PORT") {
        Ok(raw) => raw
            .parse::<u16>()
            .context("SCHED_API_PORT is not a valid port number")?,
        Err(_) => DEFAULT_PORT,
    };
    let host = env::var("SCHED_API_HOST").unwrap_or_else(|_| DEFAULT_HOST.to_string());
    Ok(RestApiConfig { port, host })
}

/// Mirrors the content under the 'storage:' key in storage_config.yaml.
#[derive(Debug, Deserialize)]
struct StorageSettings {
    data_directory: PathBuf,
    #[serde(default)]
    use_compression: bool,
    #[serde(default)]
    cache_capacity: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct StorageSettingsWrapper {
    storage: StorageSettings,
}

/// Loads the storage configuration from `storage/storage_config.yaml`,
/// falling back to the defaults when the file is absent.
pub fn load_storage_config(config_file_path: Option<PathBuf>) -> Result<StoreConfig> {
    let default_config_path = PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .parent()
        .context("failed to get parent directory of the rest_api crate")?
        .join("storage")
        .join("storage_config.yaml");
    let path_to_use = config_file_path.unwrap_or(default_config_path);

    if !path_to_use.exists() {
        tracing::warn!(
            "Storage config {} not found, using defaults",
            path_to_use.display()
        );
        return Ok(StoreConfig::default());
    }

    let config_content = fs::read_to_string(&path_to_use)
        .with_context(|| format!("failed to read storage config file {}", path_to_use.display()))?;
    let wrapper: StorageSettingsWrapper = serde_yaml2::from_str(&config_content)
        .map_err(|e| {
            anyhow::anyhow!(
                "failed to parse storage config file {}: {}",
                path_to_use.display(),
                e
            )
        })?;

    Ok(StoreConfig {
        data_directory: wrapper.storage.data_directory,
        use_compression: wrapper.storage.use_compression,
        cache_capacity: wrapper.storage.cache_capacity,
    })
}
