use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, error, info, warn};

use super::{
    DEFAULT_METADATA_TABLE, ExecutionResult, MetadataStore, MigrationError, MigrationExecutor,
    MigrationRegistry,
};
use crate::store::StoreConnection;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ManagerState {
    Uninitialized,
    MetadataEnsured,
    Diffing,
    Applying,
    Validated,
    Ready,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationReport {
    pub valid: bool,
    pub errors: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TableStatus {
    pub table_name: String,
    pub current_version: u32,
    pub latest_version: u32,
    pub pending: usize,
}

/// Boot-time orchestrator: brings every registered table up to its latest
/// version, one table at a time in declaration order, and aborts on the first
/// failure.
pub struct MigrationManager {
    registry: Arc<MigrationRegistry>,
    metadata_table: String,
    state: ManagerState,
}

impl MigrationManager {
    pub fn new(registry: Arc<MigrationRegistry>) -> Self {
        Self {
            registry,
            metadata_table: DEFAULT_METADATA_TABLE.to_string(),
            state: ManagerState::Uninitialized,
        }
    }

    pub fn with_metadata_table(mut self, metadata_table: impl Into<String>) -> Self {
        self.metadata_table = metadata_table.into();
        self
    }

    pub fn state(&self) -> ManagerState {
        self.state
    }

    pub fn registry(&self) -> &MigrationRegistry {
        &self.registry
    }

    pub fn metadata_table(&self) -> &str {
        &self.metadata_table
    }

    /// Applies all pending migrations. Tables declared after a failing table
    /// are not attempted.
    pub async fn initialize(
        &mut self,
        connection: &dyn StoreConnection,
    ) -> Result<Vec<ExecutionResult>, MigrationError> {
        let metadata = MetadataStore::ensure(connection, &self.metadata_table).await?;
        self.state = ManagerState::MetadataEnsured;

        let registry = Arc::clone(&self.registry);
        let mut results = Vec::new();
        for table_name in registry.all_table_names() {
            match self.migrate_table(connection, &metadata, table_name).await {
                Ok(Some(result)) => results.push(result),
                Ok(None) => {}
                Err(err) => {
                    self.state = ManagerState::Failed;
                    error!("schema migration aborted at table {table_name}: {err}");
                    return Err(err);
                }
            }
        }

        self.state = ManagerState::Applying;
        info!(
            tables = registry.all_table_names().len(),
            migrated = results.len(),
            "schema migrations complete"
        );
        Ok(results)
    }

    async fn migrate_table(
        &mut self,
        connection: &dyn StoreConnection,
        metadata: &MetadataStore,
        table_name: &str,
    ) -> Result<Option<ExecutionResult>, MigrationError> {
        self.state = ManagerState::Diffing;
        let current = metadata
            .current_version(table_name)
            .await
            .map_err(|err| err.reading(table_name))?;
        let pending = self.registry.migrations_from_version(table_name, current);
        if pending.is_empty() {
            debug!(table = %table_name, version = current, "table is up to date");
            return Ok(None);
        }

        self.state = ManagerState::Applying;
        let result = MigrationExecutor::new(connection, metadata)
            .execute_migrations(&pending)
            .await?;
        info!(
            table = %table_name,
            from = result.from_version,
            to = result.to_version,
            applied = ?result.executed_migrations,
            "table migrated"
        );
        Ok(Some(result))
    }

    /// Compares each table's recorded version with the latest registered one.
    /// Reads only; a missing metadata table counts as every table at 0.
    pub async fn validate(
        &mut self,
        connection: &dyn StoreConnection,
    ) -> Result<ValidationReport, MigrationError> {
        let statuses = match self.status(connection).await {
            Ok(statuses) => statuses,
            Err(err) => {
                self.state = ManagerState::Failed;
                return Err(err);
            }
        };

        let errors: Vec<String> = statuses
            .iter()
            .filter(|s| s.current_version != s.latest_version)
            .map(|s| {
                format!(
                    "{}: recorded version {} != latest registered version {}",
                    s.table_name, s.current_version, s.latest_version
                )
            })
            .collect();

        for message in &errors {
            warn!("schema validation mismatch: {message}");
        }

        let report = ValidationReport {
            valid: errors.is_empty(),
            errors,
        };
        self.state = if report.valid {
            ManagerState::Validated
        } else {
            ManagerState::Failed
        };
        Ok(report)
    }

    /// `initialize` followed by `validate`; an invalid report is an error.
    pub async fn run(
        &mut self,
        connection: &dyn StoreConnection,
    ) -> Result<Vec<ExecutionResult>, MigrationError> {
        let results = self.initialize(connection).await?;
        let report = self.validate(connection).await?;
        if !report.valid {
            return Err(MigrationError::Validation(report.errors));
        }
        self.state = ManagerState::Ready;
        Ok(results)
    }

    /// Per-table versions and pending counts, without applying anything.
    pub async fn status(
        &self,
        connection: &dyn StoreConnection,
    ) -> Result<Vec<TableStatus>, MigrationError> {
        let metadata = MetadataStore::open_existing(connection, &self.metadata_table).await?;

        let mut statuses = Vec::with_capacity(self.registry.all_table_names().len());
        for table_name in self.registry.all_table_names() {
            let current_version = match &metadata {
                Some(metadata) => metadata
                    .current_version(table_name)
                    .await
                    .map_err(|err| err.reading(table_name))?,
                None => 0,
            };
            statuses.push(TableStatus {
                table_name: table_name.clone(),
                current_version,
                latest_version: self.registry.latest_version(table_name),
                pending: self
                    .registry
                    .migrations_from_version(table_name, current_version)
                    .len(),
            });
        }
        Ok(statuses)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::{ManagerState, MigrationManager};
    use crate::migrations::{MetadataStore, Migration, MigrationError, MigrationRegistry};
    use crate::sqlite_store::SqliteStore;
    use crate::store::{ColumnDef, ColumnType, NewColumn, TableSchema};

    fn registry() -> Arc<MigrationRegistry> {
        Arc::new(
            MigrationRegistry::new(vec![
                Migration::create_table(
                    1,
                    "memos",
                    "create memos table",
                    TableSchema::new(vec![ColumnDef::required("id", ColumnType::Utf8)]),
                ),
                Migration::add_columns(
                    2,
                    "memos",
                    "add type column",
                    vec![NewColumn::new("type", ColumnType::Utf8, "'text'")],
                ),
            ])
            .expect("registry should be valid"),
        )
    }

    #[tokio::test]
    async fn run_walks_states_to_ready() {
        let store = SqliteStore::in_memory().expect("failed to create in-memory store");
        let mut manager = MigrationManager::new(registry());
        assert_eq!(manager.state(), ManagerState::Uninitialized);

        manager.initialize(&store).await.expect("initialize");
        assert_eq!(manager.state(), ManagerState::Applying);

        let report = manager.validate(&store).await.expect("validate");
        assert!(report.valid);
        assert_eq!(manager.state(), ManagerState::Validated);

        let mut manager = MigrationManager::new(registry());
        manager.run(&store).await.expect("run");
        assert_eq!(manager.state(), ManagerState::Ready);
    }

    #[tokio::test]
    async fn validate_before_initialize_reports_every_table_and_creates_nothing() {
        let store = SqliteStore::in_memory().expect("failed to create in-memory store");
        let mut manager = MigrationManager::new(registry());

        let report = manager.validate(&store).await.expect("validate");
        assert!(!report.valid);
        assert_eq!(
            report.errors,
            vec!["memos: recorded version 0 != latest registered version 2".to_string()]
        );
        assert_eq!(manager.state(), ManagerState::Failed);

        let metadata = MetadataStore::open_existing(&store, manager.metadata_table())
            .await
            .expect("lookup");
        assert!(metadata.is_none());
    }

    #[tokio::test]
    async fn status_reports_pending_counts() {
        let store = SqliteStore::in_memory().expect("failed to create in-memory store");
        let manager = MigrationManager::new(registry());

        let before = manager.status(&store).await.expect("status");
        assert_eq!(before[0].current_version, 0);
        assert_eq!(before[0].latest_version, 2);
        assert_eq!(before[0].pending, 2);

        let mut manager = manager;
        manager.initialize(&store).await.expect("initialize");
        let after = manager.status(&store).await.expect("status");
        assert_eq!(after[0].current_version, 2);
        assert_eq!(after[0].pending, 0);
    }

    #[tokio::test]
    async fn run_fails_when_metadata_is_ahead_of_registry() {
        let store = SqliteStore::in_memory().expect("failed to create in-memory store");
        let mut manager = MigrationManager::new(registry()).with_metadata_table("schema_versions");
        manager.initialize(&store).await.expect("initialize");

        let metadata = MetadataStore::ensure(&store, "schema_versions")
            .await
            .expect("ensure");
        metadata
            .set_version("memos", 5, chrono::Utc::now())
            .await
            .expect("corrupt version");

        let mut manager = MigrationManager::new(registry()).with_metadata_table("schema_versions");
        let err = manager.run(&store).await.expect_err("run should fail");
        assert!(matches!(err, MigrationError::Validation(errors) if errors.len() == 1));
        assert_eq!(manager.state(), ManagerState::Failed);
    }
}
