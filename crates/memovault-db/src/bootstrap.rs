use std::sync::Arc;

use memovault_common::Result;
use memovault_config::{AppConfig, ConfigLoader};
use tracing::{error, info};

use crate::migrations::{ExecutionResult, MigrationError, MigrationManager, MigrationRegistry};
use crate::sqlite_store::SqliteStore;
use crate::store::StoreConnection;

/// A store whose schema has been migrated and validated.
pub struct ReadyStore {
    pub store: SqliteStore,
    /// Batches applied while opening; empty when the schema was already current.
    pub applied: Vec<ExecutionResult>,
}

/// Opens the configured store and brings its schema to the latest version.
/// The store is only returned once validation has passed.
pub async fn open_store(loader: &ConfigLoader, config: &AppConfig) -> Result<ReadyStore> {
    loader.ensure_dirs(config)?;
    let store = SqliteStore::open(&loader.database_path(config))?;
    let applied = migrate_store(&store, &config.storage.metadata_table).await?;
    Ok(ReadyStore { store, applied })
}

/// Runs the built-in migrations against `connection` and validates the result.
pub async fn migrate_store(
    connection: &dyn StoreConnection,
    metadata_table: &str,
) -> Result<Vec<ExecutionResult>> {
    let registry = Arc::new(MigrationRegistry::builtin()?);
    let mut manager = MigrationManager::new(registry).with_metadata_table(metadata_table);

    match manager.run(connection).await {
        Ok(results) => {
            let applied: usize = results.iter().map(|r| r.executed_migrations.len()).sum();
            info!(
                applied,
                tables = manager.registry().all_table_names().len(),
                "store schema is up to date"
            );
            Ok(results)
        }
        Err(err) => {
            match &err {
                MigrationError::Execution {
                    table_name,
                    version,
                    description,
                    source,
                } => error!(
                    table = %table_name,
                    version,
                    description = %description,
                    "refusing to start: migration failed: {source}"
                ),
                MigrationError::Record {
                    table_name,
                    version,
                    description,
                    source,
                } => error!(
                    table = %table_name,
                    version,
                    description = %description,
                    "refusing to start: migration applied but not recorded: {source}"
                ),
                MigrationError::Lookup { table_name, source } => error!(
                    table = %table_name,
                    "refusing to start: could not read recorded version: {source}"
                ),
                MigrationError::Validation(errors) => {
                    for message in errors {
                        error!("refusing to start: {message}");
                    }
                }
                other => error!("refusing to start: {other}"),
            }
            Err(err.into())
        }
    }
}
