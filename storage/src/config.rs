// storage/src/config.rs
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Configuration for the sled-backed store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    pub data_directory: PathBuf,
    pub use_compression: bool,
    pub cache_capacity: Option<u64>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        StoreConfig {
            data_directory: PathBuf::from("/tmp/scheduling_data"),
            use_compression: false,
            cache_capacity: None,
        }
    }
}

impl StoreConfig {
    pub fn at(path: impl Into<PathBuf>) -> Self {
        StoreConfig {
            data_directory: path.into(),
            ..StoreConfig::default()
        }
    }
}
