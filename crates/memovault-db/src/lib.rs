pub mod bootstrap;
pub mod migrations;
pub mod sqlite_store;
pub mod store;

pub use bootstrap::{ReadyStore, migrate_store, open_store};
pub use migrations::{
    ExecutionResult, ManagerState, MetadataStore, Migration, MigrationAction, MigrationError,
    MigrationExecutor, MigrationManager, MigrationRegistry, MigrationStep, TableMigrationRecord,
    TableStatus, ValidationReport,
};
pub use sqlite_store::SqliteStore;
pub use store::{
    ColumnDef, ColumnType, NewColumn, Row, StoreConnection, StoreError, StoreResult, StoreTable,
    TableSchema,
};
