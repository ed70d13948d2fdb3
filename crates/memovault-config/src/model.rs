use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub log_level: Option<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            storage: StorageConfig::default(),
            log_level: Some("info".to_string()),
        }
    }
}

/// Where the store lives on disk and where migration state is recorded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Directory holding the database file. Defaults to `<config_dir>/data`.
    #[serde(default)]
    pub data_dir: Option<PathBuf>,

    #[serde(default = "default_database_file")]
    pub database_file: String,

    /// Name of the table recording each table's applied schema version.
    #[serde(default = "default_metadata_table")]
    pub metadata_table: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: None,
            database_file: default_database_file(),
            metadata_table: default_metadata_table(),
        }
    }
}

fn default_database_file() -> String {
    "memovault.sqlite3".to_string()
}

fn default_metadata_table() -> String {
    "_schema_migrations".to_string()
}
