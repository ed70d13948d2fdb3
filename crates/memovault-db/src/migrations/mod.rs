//! Versioned schema migrations for a store without transactional DDL.
//!
//! Each logical table carries its own version line. Applied versions are
//! recorded in a metadata table and every migration tolerates being re-run, so
//! a crash between a schema change and its metadata write is repaired by the
//! next boot re-applying the same version.

pub mod catalog;
mod error;
mod executor;
mod manager;
mod metadata;
mod registry;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::store::{NewColumn, StoreConnection, StoreResult, TableSchema};

pub use error::MigrationError;
pub use executor::{ExecutionResult, MigrationExecutor};
pub use manager::{ManagerState, MigrationManager, TableStatus, ValidationReport};
pub use metadata::{DEFAULT_METADATA_TABLE, MetadataStore, TableMigrationRecord};
pub use registry::{MigrationRegistry, MigrationSummary};

/// Hand-written schema or data change for cases the declarative actions do not
/// cover. Implementations must treat an already-applied state as success.
#[async_trait]
pub trait MigrationStep: Send + Sync {
    async fn apply(&self, connection: &dyn StoreConnection) -> StoreResult<()>;
}

#[derive(Clone)]
pub enum MigrationAction {
    CreateTable(TableSchema),
    AddColumns(Vec<NewColumn>),
    Custom(Arc<dyn MigrationStep>),
}

impl fmt::Debug for MigrationAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CreateTable(schema) => f.debug_tuple("CreateTable").field(schema).finish(),
            Self::AddColumns(columns) => f.debug_tuple("AddColumns").field(columns).finish(),
            Self::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

/// One published schema change for one table. Once released, a version's
/// behavior never changes; new behavior gets a new, higher version.
#[derive(Debug, Clone)]
pub struct Migration {
    pub version: u32,
    pub table_name: String,
    pub description: String,
    pub action: MigrationAction,
}

impl Migration {
    pub fn create_table(
        version: u32,
        table_name: impl Into<String>,
        description: impl Into<String>,
        schema: TableSchema,
    ) -> Self {
        Self {
            version,
            table_name: table_name.into(),
            description: description.into(),
            action: MigrationAction::CreateTable(schema),
        }
    }

    pub fn add_columns(
        version: u32,
        table_name: impl Into<String>,
        description: impl Into<String>,
        columns: Vec<NewColumn>,
    ) -> Self {
        Self {
            version,
            table_name: table_name.into(),
            description: description.into(),
            action: MigrationAction::AddColumns(columns),
        }
    }

    pub fn custom(
        version: u32,
        table_name: impl Into<String>,
        description: impl Into<String>,
        step: impl MigrationStep + 'static,
    ) -> Self {
        Self {
            version,
            table_name: table_name.into(),
            description: description.into(),
            action: MigrationAction::Custom(Arc::new(step)),
        }
    }

    /// Applies the change. An already-applied condition reported by the store
    /// counts as success, so this is safe to call any number of times.
    pub async fn apply(&self, connection: &dyn StoreConnection) -> StoreResult<()> {
        let outcome = match &self.action {
            MigrationAction::CreateTable(schema) => {
                self.apply_create_table(connection, schema).await
            }
            MigrationAction::AddColumns(columns) => {
                self.apply_add_columns(connection, columns).await
            }
            MigrationAction::Custom(step) => step.apply(connection).await,
        };

        match outcome {
            Err(err) if err.is_already_applied() => {
                debug!(
                    table = %self.table_name,
                    version = self.version,
                    "migration already applied: {err}"
                );
                Ok(())
            }
            other => other,
        }
    }

    async fn apply_create_table(
        &self,
        connection: &dyn StoreConnection,
        schema: &TableSchema,
    ) -> StoreResult<()> {
        let existing = connection.table_names().await?;
        if existing.iter().any(|name| name == &self.table_name) {
            debug!(table = %self.table_name, "table already exists, skipping create");
            return Ok(());
        }
        connection.create_empty_table(&self.table_name, schema).await?;
        Ok(())
    }

    async fn apply_add_columns(
        &self,
        connection: &dyn StoreConnection,
        columns: &[NewColumn],
    ) -> StoreResult<()> {
        let table = connection.open_table(&self.table_name).await?;
        let schema = table.schema().await?;
        let missing: Vec<NewColumn> = columns
            .iter()
            .filter(|column| !schema.contains(&column.name))
            .cloned()
            .collect();

        if missing.is_empty() {
            debug!(table = %self.table_name, "columns already present, skipping add");
            return Ok(());
        }
        table.add_columns(&missing).await
    }
}
