//! The narrow storage interface the migration engine is written against.
//!
//! Any embedded table store that can list, open and create tables, append
//! columns with a default, and query/add/delete rows by predicate can sit
//! behind these traits. There is deliberately no UPDATE: callers replace rows
//! with delete-then-add.

use async_trait::async_trait;
use serde_json::{Map, Value};
use thiserror::Error;

/// A single row, keyed by column name. Vectors are JSON arrays of numbers.
pub type Row = Map<String, Value>;

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Substrings that identify an already-applied schema change in backend
/// messages that carry no structured kind.
const ALREADY_APPLIED_MARKERS: &[&str] = &["already exists", "duplicate"];

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("{0} already exists")]
    AlreadyExists(String),

    #[error("table not found: {0}")]
    TableNotFound(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("store backend error: {0}")]
    Backend(String),
}

impl StoreError {
    /// True when the error means the change being applied is already in place.
    ///
    /// The structured kind is authoritative; message matching is only used for
    /// opaque backend errors.
    pub fn is_already_applied(&self) -> bool {
        match self {
            Self::AlreadyExists(_) => true,
            Self::Backend(message) => {
                let message = message.to_lowercase();
                ALREADY_APPLIED_MARKERS
                    .iter()
                    .any(|marker| message.contains(marker))
            }
            Self::TableNotFound(_) | Self::InvalidArgument(_) => false,
        }
    }
}

impl From<StoreError> for memovault_common::Error {
    fn from(err: StoreError) -> Self {
        memovault_common::Error::Database(err.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ColumnType {
    Utf8,
    Int64,
    Float64,
    Boolean,
    Json,
    /// Fixed-size `f32` vector of the given dimension.
    Vector(usize),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnDef {
    pub name: String,
    pub data_type: ColumnType,
    pub nullable: bool,
}

impl ColumnDef {
    pub fn required(name: impl Into<String>, data_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            data_type,
            nullable: false,
        }
    }

    pub fn optional(name: impl Into<String>, data_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            data_type,
            nullable: true,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TableSchema {
    pub columns: Vec<ColumnDef>,
}

impl TableSchema {
    pub fn new(columns: Vec<ColumnDef>) -> Self {
        Self { columns }
    }

    pub fn column(&self, name: &str) -> Option<&ColumnDef> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.column(name).is_some()
    }
}

/// A column appended to an existing table. Existing rows receive the value of
/// `default_expression`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewColumn {
    pub name: String,
    pub data_type: ColumnType,
    pub default_expression: String,
}

impl NewColumn {
    pub fn new(
        name: impl Into<String>,
        data_type: ColumnType,
        default_expression: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            data_type,
            default_expression: default_expression.into(),
        }
    }
}

#[async_trait]
pub trait StoreConnection: Send + Sync {
    async fn table_names(&self) -> StoreResult<Vec<String>>;
    async fn open_table(&self, name: &str) -> StoreResult<Box<dyn StoreTable>>;
    async fn create_empty_table(
        &self,
        name: &str,
        schema: &TableSchema,
    ) -> StoreResult<Box<dyn StoreTable>>;
}

#[async_trait]
pub trait StoreTable: Send + Sync {
    fn name(&self) -> &str;
    async fn schema(&self) -> StoreResult<TableSchema>;
    async fn add_columns(&self, columns: &[NewColumn]) -> StoreResult<()>;
    async fn execute_query(
        &self,
        predicate: Option<&str>,
        limit: Option<usize>,
    ) -> StoreResult<Vec<Row>>;
    async fn add(&self, rows: Vec<Row>) -> StoreResult<()>;
    /// Removes every row matching `predicate`, returning how many were removed.
    async fn delete(&self, predicate: &str) -> StoreResult<usize>;
}

impl<'t> dyn StoreTable + 't {
    pub fn query(&self) -> Query<'_> {
        Query {
            table: self,
            predicate: None,
            limit: None,
        }
    }
}

/// Row query builder: `table.query().filter(expr).to_vec().await`.
pub struct Query<'a> {
    table: &'a dyn StoreTable,
    predicate: Option<String>,
    limit: Option<usize>,
}

impl Query<'_> {
    pub fn filter(mut self, predicate: impl Into<String>) -> Self {
        self.predicate = Some(predicate.into());
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub async fn to_vec(self) -> StoreResult<Vec<Row>> {
        self.table
            .execute_query(self.predicate.as_deref(), self.limit)
            .await
    }
}

/// Builders for filter expressions with escaped literals.
pub mod predicate {
    pub fn eq_str(column: &str, value: &str) -> String {
        format!("{column} = '{}'", value.replace('\'', "''"))
    }
}
