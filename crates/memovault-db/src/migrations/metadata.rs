use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::info;

use super::MigrationError;
use crate::store::{
    ColumnDef, ColumnType, Row, StoreConnection, StoreError, StoreTable, TableSchema, predicate,
};

pub const DEFAULT_METADATA_TABLE: &str = "_schema_migrations";

/// Applied version of one logical table. A missing record means version 0.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableMigrationRecord {
    pub table_name: String,
    pub current_version: u32,
    pub last_migrated_at: DateTime<Utc>,
}

/// Version ledger stored as an ordinary table in the store.
pub struct MetadataStore {
    table: Box<dyn StoreTable>,
}

impl MetadataStore {
    pub fn schema() -> TableSchema {
        TableSchema::new(vec![
            ColumnDef::required("table_name", ColumnType::Utf8),
            ColumnDef::required("current_version", ColumnType::Int64),
            ColumnDef::required("last_migrated_at", ColumnType::Int64),
        ])
    }

    /// Opens the metadata table, creating it on first boot.
    pub async fn ensure(
        connection: &dyn StoreConnection,
        table_name: &str,
    ) -> Result<Self, MigrationError> {
        if let Some(existing) = Self::open_existing(connection, table_name).await? {
            return Ok(existing);
        }

        let table = match connection
            .create_empty_table(table_name, &Self::schema())
            .await
        {
            Ok(table) => {
                info!("created migration metadata table {table_name}");
                table
            }
            Err(err) if err.is_already_applied() => connection.open_table(table_name).await?,
            Err(err) => return Err(err.into()),
        };
        Ok(Self { table })
    }

    /// Opens the metadata table only if it already exists.
    pub async fn open_existing(
        connection: &dyn StoreConnection,
        table_name: &str,
    ) -> Result<Option<Self>, MigrationError> {
        let names = connection.table_names().await?;
        if !names.iter().any(|name| name == table_name) {
            return Ok(None);
        }
        let table = connection.open_table(table_name).await?;
        Ok(Some(Self { table }))
    }

    pub fn table_name(&self) -> &str {
        self.table.name()
    }

    pub async fn current_version(&self, table_name: &str) -> Result<u32, MigrationError> {
        Ok(self
            .record(table_name)
            .await?
            .map_or(0, |record| record.current_version))
    }

    pub async fn record(
        &self,
        table_name: &str,
    ) -> Result<Option<TableMigrationRecord>, MigrationError> {
        let rows = self
            .table
            .query()
            .filter(predicate::eq_str("table_name", table_name))
            .to_vec()
            .await?;

        let mut records = rows
            .iter()
            .map(row_to_record)
            .collect::<Result<Vec<_>, _>>()?;
        records.sort_by_key(|r| r.current_version);
        Ok(records.pop())
    }

    pub async fn records(&self) -> Result<Vec<TableMigrationRecord>, MigrationError> {
        let rows = self.table.query().to_vec().await?;
        let mut records = rows
            .iter()
            .map(row_to_record)
            .collect::<Result<Vec<_>, _>>()?;
        records.sort_by(|a, b| a.table_name.cmp(&b.table_name));
        Ok(records)
    }

    /// Replaces the record for `table_name`. The store has no update, so the
    /// row is deleted and re-added; the record is briefly absent in between.
    pub async fn set_version(
        &self,
        table_name: &str,
        version: u32,
        at: DateTime<Utc>,
    ) -> Result<TableMigrationRecord, MigrationError> {
        let record = TableMigrationRecord {
            table_name: table_name.to_string(),
            current_version: version,
            last_migrated_at: at,
        };

        self.table
            .delete(&predicate::eq_str("table_name", table_name))
            .await?;
        self.table.add(vec![record_to_row(&record)]).await?;
        Ok(record)
    }
}

fn record_to_row(record: &TableMigrationRecord) -> Row {
    let mut row = Row::new();
    row.insert("table_name".into(), json!(record.table_name));
    row.insert("current_version".into(), json!(record.current_version));
    row.insert(
        "last_migrated_at".into(),
        json!(record.last_migrated_at.timestamp_millis()),
    );
    row
}

fn row_to_record(row: &Row) -> Result<TableMigrationRecord, StoreError> {
    let table_name = row
        .get("table_name")
        .and_then(Value::as_str)
        .ok_or_else(|| invalid_row("table_name", row))?
        .to_string();
    let current_version = row
        .get("current_version")
        .and_then(Value::as_i64)
        .and_then(|v| u32::try_from(v).ok())
        .ok_or_else(|| invalid_row("current_version", row))?;
    let last_migrated_at = row
        .get("last_migrated_at")
        .and_then(Value::as_i64)
        .and_then(DateTime::from_timestamp_millis)
        .ok_or_else(|| invalid_row("last_migrated_at", row))?;

    Ok(TableMigrationRecord {
        table_name,
        current_version,
        last_migrated_at,
    })
}

fn invalid_row(field: &str, row: &Row) -> StoreError {
    StoreError::InvalidArgument(format!(
        "metadata row has invalid {field}: {}",
        Value::Object(row.clone())
    ))
}

#[cfg(test)]
mod tests {
    use super::{DEFAULT_METADATA_TABLE, MetadataStore};
    use crate::sqlite_store::SqliteStore;
    use crate::store::StoreConnection;
    use chrono::{TimeZone, Utc};

    #[tokio::test]
    async fn ensure_creates_table_once() {
        let store = SqliteStore::in_memory().expect("failed to create in-memory store");
        MetadataStore::ensure(&store, DEFAULT_METADATA_TABLE)
            .await
            .expect("first ensure");
        MetadataStore::ensure(&store, DEFAULT_METADATA_TABLE)
            .await
            .expect("second ensure is a no-op");

        assert_eq!(
            store.table_names().await.expect("list tables"),
            vec![DEFAULT_METADATA_TABLE.to_string()]
        );
    }

    #[tokio::test]
    async fn open_existing_returns_none_before_first_boot() {
        let store = SqliteStore::in_memory().expect("failed to create in-memory store");
        let metadata = MetadataStore::open_existing(&store, DEFAULT_METADATA_TABLE)
            .await
            .expect("lookup should succeed");
        assert!(metadata.is_none());
        assert!(store.table_names().await.expect("list tables").is_empty());
    }

    #[tokio::test]
    async fn missing_record_reads_as_version_zero() {
        let store = SqliteStore::in_memory().expect("failed to create in-memory store");
        let metadata = MetadataStore::ensure(&store, DEFAULT_METADATA_TABLE)
            .await
            .expect("ensure");

        assert_eq!(metadata.current_version("memos").await.expect("read"), 0);
        assert!(metadata.record("memos").await.expect("read").is_none());
    }

    #[tokio::test]
    async fn set_version_replaces_the_single_record() {
        let store = SqliteStore::in_memory().expect("failed to create in-memory store");
        let metadata = MetadataStore::ensure(&store, DEFAULT_METADATA_TABLE)
            .await
            .expect("ensure");
        let first = Utc.with_ymd_and_hms(2026, 1, 2, 3, 4, 5).unwrap();
        let second = Utc.with_ymd_and_hms(2026, 2, 3, 4, 5, 6).unwrap();

        metadata.set_version("memos", 1, first).await.expect("v1");
        metadata.set_version("memos", 3, second).await.expect("v3");
        metadata.set_version("tags", 1, first).await.expect("tags v1");

        let records = metadata.records().await.expect("records");
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].table_name, "memos");
        assert_eq!(records[0].current_version, 3);
        assert_eq!(records[0].last_migrated_at, second);
        assert_eq!(metadata.current_version("tags").await.expect("read"), 1);
    }

    #[tokio::test]
    async fn table_names_with_quotes_are_escaped() {
        let store = SqliteStore::in_memory().expect("failed to create in-memory store");
        let metadata = MetadataStore::ensure(&store, DEFAULT_METADATA_TABLE)
            .await
            .expect("ensure");

        metadata
            .set_version("o'hara", 2, Utc::now())
            .await
            .expect("set version");
        assert_eq!(metadata.current_version("o'hara").await.expect("read"), 2);
    }
}
