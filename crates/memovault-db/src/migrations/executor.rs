use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::info;

use super::{MetadataStore, Migration, MigrationError, TableMigrationRecord};
use crate::store::StoreConnection;

/// What one batch did to one table. Returned for logging, never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExecutionResult {
    pub table_name: String,
    pub from_version: u32,
    pub to_version: u32,
    pub executed_migrations: Vec<u32>,
    pub executed_at: DateTime<Utc>,
}

/// Applies migrations and advances the metadata ledger after each success.
pub struct MigrationExecutor<'a> {
    connection: &'a dyn StoreConnection,
    metadata: &'a MetadataStore,
}

impl<'a> MigrationExecutor<'a> {
    pub fn new(connection: &'a dyn StoreConnection, metadata: &'a MetadataStore) -> Self {
        Self {
            connection,
            metadata,
        }
    }

    /// Applies one migration, then records its version. On failure the
    /// metadata record is left untouched.
    pub async fn execute_migration(
        &self,
        migration: &Migration,
    ) -> Result<TableMigrationRecord, MigrationError> {
        info!(
            table = %migration.table_name,
            version = migration.version,
            "applying migration: {}",
            migration.description
        );

        if let Err(source) = migration.apply(self.connection).await {
            return Err(MigrationError::Execution {
                table_name: migration.table_name.clone(),
                version: migration.version,
                description: migration.description.clone(),
                source,
            });
        }

        self.metadata
            .set_version(&migration.table_name, migration.version, Utc::now())
            .await
            .map_err(|err| err.recording(migration))
    }

    /// Applies a batch for a single table in ascending order, stopping at the
    /// first failure. Migrations already applied in the batch stay applied.
    pub async fn execute_migrations(
        &self,
        migrations: &[&Migration],
    ) -> Result<ExecutionResult, MigrationError> {
        let Some(first) = migrations.first() else {
            return Err(MigrationError::InvalidBatch("batch is empty".into()));
        };
        let table_name = first.table_name.as_str();

        for pair in migrations.windows(2) {
            if pair[1].table_name != table_name {
                return Err(MigrationError::InvalidBatch(format!(
                    "batch mixes tables {table_name} and {}",
                    pair[1].table_name
                )));
            }
            if pair[1].version <= pair[0].version {
                return Err(MigrationError::InvalidBatch(format!(
                    "{table_name}: v{} does not follow v{}",
                    pair[1].version, pair[0].version
                )));
            }
        }

        let from_version = self
            .metadata
            .current_version(table_name)
            .await
            .map_err(|err| err.reading(table_name))?;
        let mut executed = Vec::with_capacity(migrations.len());
        for migration in migrations {
            self.execute_migration(migration).await?;
            executed.push(migration.version);
        }

        Ok(ExecutionResult {
            table_name: table_name.to_string(),
            from_version,
            to_version: executed.last().copied().unwrap_or(from_version),
            executed_migrations: executed,
            executed_at: Utc::now(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::MigrationExecutor;
    use crate::migrations::{
        DEFAULT_METADATA_TABLE, MetadataStore, Migration, MigrationError, MigrationStep,
    };
    use crate::sqlite_store::SqliteStore;
    use crate::store::{
        ColumnDef, ColumnType, NewColumn, StoreConnection, StoreError, StoreResult, TableSchema,
    };
    use async_trait::async_trait;

    struct Broken;

    #[async_trait]
    impl MigrationStep for Broken {
        async fn apply(&self, _connection: &dyn StoreConnection) -> StoreResult<()> {
            Err(StoreError::Backend("constraint failed".into()))
        }
    }

    fn create_memos() -> Migration {
        Migration::create_table(
            1,
            "memos",
            "create memos table",
            TableSchema::new(vec![ColumnDef::required("id", ColumnType::Utf8)]),
        )
    }

    fn add_type() -> Migration {
        Migration::add_columns(
            3,
            "memos",
            "add type column",
            vec![NewColumn::new("type", ColumnType::Utf8, "'text'")],
        )
    }

    #[tokio::test]
    async fn execute_migrations_applies_in_order_and_records_versions() {
        let store = SqliteStore::in_memory().expect("failed to create in-memory store");
        let metadata = MetadataStore::ensure(&store, DEFAULT_METADATA_TABLE)
            .await
            .expect("ensure metadata");
        let executor = MigrationExecutor::new(&store, &metadata);

        let (v1, v3) = (create_memos(), add_type());
        let result = executor
            .execute_migrations(&[&v1, &v3])
            .await
            .expect("batch should succeed");

        assert_eq!(result.table_name, "memos");
        assert_eq!(result.from_version, 0);
        assert_eq!(result.to_version, 3);
        assert_eq!(result.executed_migrations, vec![1, 3]);
        assert_eq!(metadata.current_version("memos").await.expect("read"), 3);
    }

    #[tokio::test]
    async fn failure_stops_batch_and_keeps_last_good_version() {
        let store = SqliteStore::in_memory().expect("failed to create in-memory store");
        let metadata = MetadataStore::ensure(&store, DEFAULT_METADATA_TABLE)
            .await
            .expect("ensure metadata");
        let executor = MigrationExecutor::new(&store, &metadata);

        let v1 = create_memos();
        let v2 = Migration::custom(2, "memos", "backfill memo types", Broken);
        let v3 = add_type();
        let err = executor
            .execute_migrations(&[&v1, &v2, &v3])
            .await
            .expect_err("batch should fail at v2");

        match err {
            MigrationError::Execution {
                table_name,
                version,
                description,
                source,
            } => {
                assert_eq!(table_name, "memos");
                assert_eq!(version, 2);
                assert_eq!(description, "backfill memo types");
                assert!(source.to_string().contains("constraint failed"));
            }
            other => panic!("unexpected error: {other}"),
        }

        assert_eq!(metadata.current_version("memos").await.expect("read"), 1);
        let table = store.open_table("memos").await.expect("open memos");
        assert!(!table.schema().await.expect("schema").contains("type"));
    }

    #[tokio::test]
    async fn rejects_mixed_or_unordered_batches() {
        let store = SqliteStore::in_memory().expect("failed to create in-memory store");
        let metadata = MetadataStore::ensure(&store, DEFAULT_METADATA_TABLE)
            .await
            .expect("ensure metadata");
        let executor = MigrationExecutor::new(&store, &metadata);

        let (v1, v3) = (create_memos(), add_type());
        let err = executor
            .execute_migrations(&[&v3, &v1])
            .await
            .expect_err("descending batch");
        assert!(matches!(err, MigrationError::InvalidBatch(_)));

        let tags = Migration::create_table(
            2,
            "tags",
            "create tags",
            TableSchema::new(vec![ColumnDef::required("id", ColumnType::Utf8)]),
        );
        let err = executor
            .execute_migrations(&[&v1, &tags])
            .await
            .expect_err("mixed batch");
        assert!(matches!(err, MigrationError::InvalidBatch(_)));

        let err = executor
            .execute_migrations(&[])
            .await
            .expect_err("empty batch");
        assert!(matches!(err, MigrationError::InvalidBatch(_)));

        assert!(metadata.records().await.expect("records").is_empty());
    }
}
