use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use memovault_common::{Error, Result};
use rusqlite::Connection;
use rusqlite::types::{Value as SqlValue, ValueRef};
use serde_json::{Number, Value};
use tracing::info;

use crate::store::{
    ColumnDef, ColumnType, NewColumn, Row, StoreConnection, StoreError, StoreResult, StoreTable,
    TableSchema,
};

/// File-backed table store on top of SQLite, exposed only through the narrow
/// [`StoreConnection`] interface.
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    pub fn open(db_path: &Path) -> Result<Self> {
        info!("opening store at {}", db_path.display());
        let conn = Connection::open(db_path)
            .map_err(|e| Error::Database(format!("failed to open database: {e}")))?;

        conn.execute_batch("PRAGMA journal_mode=WAL;")
            .map_err(|e| Error::Database(format!("failed to set pragmas: {e}")))?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| Error::Database(format!("failed to open in-memory database: {e}")))?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn table_names_sync(&self) -> StoreResult<Vec<String>> {
        let conn = lock(&self.conn)?;
        let mut stmt = conn
            .prepare(
                "SELECT name FROM sqlite_master
                 WHERE type = 'table' AND name NOT LIKE 'sqlite_%'
                 ORDER BY name",
            )
            .map_err(|e| backend("failed to prepare table listing", e))?;

        let names = stmt
            .query_map([], |row| row.get::<_, String>(0))
            .map_err(|e| backend("failed to list tables", e))?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| backend("failed to collect table names", e))?;
        Ok(names)
    }

    fn open_table_sync(&self, name: &str) -> StoreResult<Box<dyn StoreTable>> {
        validate_identifier(name)?;
        let conn = lock(&self.conn)?;
        if !table_exists(&conn, name)? {
            return Err(StoreError::TableNotFound(name.to_string()));
        }
        Ok(Box::new(SqliteTable {
            conn: Arc::clone(&self.conn),
            name: name.to_string(),
        }))
    }

    fn create_empty_table_sync(
        &self,
        name: &str,
        schema: &TableSchema,
    ) -> StoreResult<Box<dyn StoreTable>> {
        validate_identifier(name)?;
        if schema.columns.is_empty() {
            return Err(StoreError::InvalidArgument(format!(
                "table {name} needs at least one column"
            )));
        }

        let mut columns = Vec::with_capacity(schema.columns.len());
        for column in &schema.columns {
            validate_identifier(&column.name)?;
            let not_null = if column.nullable { "" } else { " NOT NULL" };
            columns.push(format!(
                "\"{}\" {}{not_null}",
                column.name,
                declared_type(&column.data_type)
            ));
        }

        let conn = lock(&self.conn)?;
        conn.execute_batch(&format!(
            "CREATE TABLE \"{name}\" ({});",
            columns.join(", ")
        ))
        .map_err(|e| classify(e, &format!("table {name}")))?;

        Ok(Box::new(SqliteTable {
            conn: Arc::clone(&self.conn),
            name: name.to_string(),
        }))
    }
}

#[async_trait]
impl StoreConnection for SqliteStore {
    async fn table_names(&self) -> StoreResult<Vec<String>> {
        self.table_names_sync()
    }

    async fn open_table(&self, name: &str) -> StoreResult<Box<dyn StoreTable>> {
        self.open_table_sync(name)
    }

    async fn create_empty_table(
        &self,
        name: &str,
        schema: &TableSchema,
    ) -> StoreResult<Box<dyn StoreTable>> {
        self.create_empty_table_sync(name, schema)
    }
}

pub struct SqliteTable {
    conn: Arc<Mutex<Connection>>,
    name: String,
}

impl SqliteTable {
    fn schema_sync(&self) -> StoreResult<TableSchema> {
        let conn = lock(&self.conn)?;
        read_schema(&conn, &self.name)
    }

    fn add_columns_sync(&self, columns: &[NewColumn]) -> StoreResult<()> {
        if columns.is_empty() {
            return Ok(());
        }
        for column in columns {
            validate_identifier(&column.name)?;
        }

        let mut conn = lock(&self.conn)?;
        let tx = conn
            .transaction()
            .map_err(|e| backend("failed to begin transaction", e))?;
        for column in columns {
            tx.execute_batch(&format!(
                "ALTER TABLE \"{}\" ADD COLUMN \"{}\" {} DEFAULT {};",
                self.name,
                column.name,
                declared_type(&column.data_type),
                column.default_expression
            ))
            .map_err(|e| classify(e, &format!("column {}.{}", self.name, column.name)))?;
        }
        tx.commit()
            .map_err(|e| backend("failed to commit column changes", e))
    }

    fn execute_query_sync(
        &self,
        predicate: Option<&str>,
        limit: Option<usize>,
    ) -> StoreResult<Vec<Row>> {
        let conn = lock(&self.conn)?;
        let types: HashMap<String, ColumnType> = read_schema(&conn, &self.name)?
            .columns
            .into_iter()
            .map(|c| (c.name, c.data_type))
            .collect();

        let mut sql = format!("SELECT * FROM \"{}\"", self.name);
        if let Some(predicate) = predicate {
            sql.push_str(&format!(" WHERE {predicate}"));
        }
        if let Some(limit) = limit {
            sql.push_str(&format!(" LIMIT {limit}"));
        }

        let mut stmt = conn
            .prepare(&sql)
            .map_err(|e| classify(e, &format!("table {}", self.name)))?;
        let names: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();

        let mut rows = stmt
            .query([])
            .map_err(|e| backend("failed to execute query", e))?;
        let mut out = Vec::new();
        while let Some(row) = rows.next().map_err(|e| backend("failed to read row", e))? {
            let mut record = Row::new();
            for (idx, name) in names.iter().enumerate() {
                let raw = row
                    .get_ref(idx)
                    .map_err(|e| backend("failed to read column", e))?;
                record.insert(name.clone(), sql_to_json(raw, types.get(name))?);
            }
            out.push(record);
        }
        Ok(out)
    }

    fn add_sync(&self, rows: Vec<Row>) -> StoreResult<()> {
        if rows.is_empty() {
            return Ok(());
        }

        let mut conn = lock(&self.conn)?;
        let schema = read_schema(&conn, &self.name)?;
        let tx = conn
            .transaction()
            .map_err(|e| backend("failed to begin transaction", e))?;

        for row in rows {
            let mut columns = Vec::with_capacity(row.len());
            let mut values = Vec::with_capacity(row.len());
            for (name, value) in row {
                let column = schema.column(&name).ok_or_else(|| {
                    StoreError::InvalidArgument(format!(
                        "unknown column {name} in table {}",
                        self.name
                    ))
                })?;
                values.push(json_to_sql(value, column)?);
                columns.push(format!("\"{name}\""));
            }

            let placeholders: Vec<String> = (1..=columns.len()).map(|i| format!("?{i}")).collect();
            tx.execute(
                &format!(
                    "INSERT INTO \"{}\" ({}) VALUES ({})",
                    self.name,
                    columns.join(", "),
                    placeholders.join(", ")
                ),
                rusqlite::params_from_iter(values),
            )
            .map_err(|e| classify(e, &format!("row in {}", self.name)))?;
        }

        tx.commit().map_err(|e| backend("failed to commit rows", e))
    }

    fn delete_sync(&self, predicate: &str) -> StoreResult<usize> {
        let conn = lock(&self.conn)?;
        conn.execute(
            &format!("DELETE FROM \"{}\" WHERE {predicate}", self.name),
            [],
        )
        .map_err(|e| classify(e, &format!("table {}", self.name)))
    }
}

#[async_trait]
impl StoreTable for SqliteTable {
    fn name(&self) -> &str {
        &self.name
    }

    async fn schema(&self) -> StoreResult<TableSchema> {
        self.schema_sync()
    }

    async fn add_columns(&self, columns: &[NewColumn]) -> StoreResult<()> {
        self.add_columns_sync(columns)
    }

    async fn execute_query(
        &self,
        predicate: Option<&str>,
        limit: Option<usize>,
    ) -> StoreResult<Vec<Row>> {
        self.execute_query_sync(predicate, limit)
    }

    async fn add(&self, rows: Vec<Row>) -> StoreResult<()> {
        self.add_sync(rows)
    }

    async fn delete(&self, predicate: &str) -> StoreResult<usize> {
        self.delete_sync(predicate)
    }
}

fn lock(conn: &Mutex<Connection>) -> StoreResult<MutexGuard<'_, Connection>> {
    conn.lock()
        .map_err(|_| StoreError::Backend("store lock poisoned".into()))
}

fn backend(context: &str, err: rusqlite::Error) -> StoreError {
    StoreError::Backend(format!("{context}: {err}"))
}

/// Maps SQLite's message-only errors onto structured kinds.
fn classify(err: rusqlite::Error, subject: &str) -> StoreError {
    let message = err.to_string();
    let lower = message.to_lowercase();
    if lower.contains("already exists") || lower.contains("duplicate column") {
        StoreError::AlreadyExists(subject.to_string())
    } else if lower.contains("no such table") {
        StoreError::TableNotFound(subject.to_string())
    } else {
        StoreError::Backend(message)
    }
}

fn validate_identifier(name: &str) -> StoreResult<()> {
    let mut chars = name.chars();
    let valid = match chars.next() {
        Some(first) => {
            (first.is_ascii_alphabetic() || first == '_')
                && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        None => false,
    };
    if valid {
        Ok(())
    } else {
        Err(StoreError::InvalidArgument(format!(
            "invalid identifier: {name:?}"
        )))
    }
}

fn table_exists(conn: &Connection, name: &str) -> StoreResult<bool> {
    let count: i64 = conn
        .query_row(
            "SELECT count(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
            [name],
            |row| row.get(0),
        )
        .map_err(|e| backend("failed to query sqlite_master", e))?;
    Ok(count > 0)
}

fn read_schema(conn: &Connection, table: &str) -> StoreResult<TableSchema> {
    let mut stmt = conn
        .prepare(&format!("PRAGMA table_info(\"{table}\")"))
        .map_err(|e| backend("failed to prepare table_info", e))?;

    let columns = stmt
        .query_map([], |row| {
            let name: String = row.get(1)?;
            let declared: String = row.get(2)?;
            let not_null: i64 = row.get(3)?;
            Ok(ColumnDef {
                name,
                data_type: parse_declared_type(&declared),
                nullable: not_null == 0,
            })
        })
        .map_err(|e| backend("failed to read table_info", e))?
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| backend("failed to collect table_info", e))?;

    if columns.is_empty() {
        return Err(StoreError::TableNotFound(table.to_string()));
    }
    Ok(TableSchema::new(columns))
}

fn declared_type(data_type: &ColumnType) -> String {
    match data_type {
        ColumnType::Utf8 => "TEXT".to_string(),
        ColumnType::Int64 => "INTEGER".to_string(),
        ColumnType::Float64 => "REAL".to_string(),
        ColumnType::Boolean => "BOOLEAN".to_string(),
        ColumnType::Json => "JSON".to_string(),
        ColumnType::Vector(dim) => format!("VECTOR({dim})"),
    }
}

fn parse_declared_type(declared: &str) -> ColumnType {
    let upper = declared.trim().to_ascii_uppercase();
    if let Some(dim) = upper
        .strip_prefix("VECTOR(")
        .and_then(|rest| rest.strip_suffix(')'))
        .and_then(|dim| dim.trim().parse().ok())
    {
        return ColumnType::Vector(dim);
    }
    match upper.as_str() {
        "INTEGER" => ColumnType::Int64,
        "REAL" => ColumnType::Float64,
        "BOOLEAN" => ColumnType::Boolean,
        "JSON" => ColumnType::Json,
        _ => ColumnType::Utf8,
    }
}

fn json_to_sql(value: Value, column: &ColumnDef) -> StoreResult<SqlValue> {
    if value.is_null() {
        return Ok(SqlValue::Null);
    }

    match (&column.data_type, value) {
        (ColumnType::Json, value) => Ok(SqlValue::Text(value.to_string())),
        (ColumnType::Vector(dim), Value::Array(items)) => {
            if items.len() != *dim {
                return Err(StoreError::InvalidArgument(format!(
                    "column {} expects a vector of {dim} values, got {}",
                    column.name,
                    items.len()
                )));
            }
            let vector = items
                .iter()
                .map(|v| v.as_f64().map(|f| f as f32))
                .collect::<Option<Vec<f32>>>()
                .ok_or_else(|| {
                    StoreError::InvalidArgument(format!(
                        "column {} expects numeric vector values",
                        column.name
                    ))
                })?;
            Ok(SqlValue::Blob(vector_to_blob(&vector)))
        }
        (_, Value::Bool(b)) => Ok(SqlValue::Integer(i64::from(b))),
        (_, Value::Number(n)) => match n.as_i64() {
            Some(i) => Ok(SqlValue::Integer(i)),
            None => Ok(SqlValue::Real(n.as_f64().unwrap_or_default())),
        },
        (_, Value::String(s)) => Ok(SqlValue::Text(s)),
        (_, other) => Err(StoreError::InvalidArgument(format!(
            "column {} cannot hold {other}",
            column.name
        ))),
    }
}

fn sql_to_json(raw: ValueRef<'_>, data_type: Option<&ColumnType>) -> StoreResult<Value> {
    let value = match (raw, data_type) {
        (ValueRef::Null, _) => Value::Null,
        (ValueRef::Integer(i), Some(ColumnType::Boolean)) => Value::Bool(i != 0),
        (ValueRef::Integer(i), _) => Value::from(i),
        (ValueRef::Real(f), _) => Number::from_f64(f).map_or(Value::Null, Value::Number),
        (ValueRef::Text(bytes), Some(ColumnType::Json)) => {
            let text = String::from_utf8_lossy(bytes);
            serde_json::from_str(&text).unwrap_or(Value::String(text.into_owned()))
        }
        (ValueRef::Text(bytes), _) => Value::String(String::from_utf8_lossy(bytes).into_owned()),
        (ValueRef::Blob(bytes), Some(ColumnType::Vector(_))) => Value::Array(
            blob_to_vector(bytes)?
                .into_iter()
                .map(|v| Number::from_f64(f64::from(v)).map_or(Value::Null, Value::Number))
                .collect(),
        ),
        (ValueRef::Blob(bytes), _) => Value::Array(bytes.iter().map(|b| Value::from(*b)).collect()),
    };
    Ok(value)
}

fn vector_to_blob(vector: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vector.len() * 4);
    for v in vector {
        bytes.extend(v.to_le_bytes());
    }
    bytes
}

fn blob_to_vector(blob: &[u8]) -> StoreResult<Vec<f32>> {
    if blob.len() % 4 != 0 {
        return Err(StoreError::Backend("invalid vector blob length".into()));
    }

    let mut out = Vec::with_capacity(blob.len() / 4);
    for chunk in blob.chunks_exact(4) {
        out.push(f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]));
    }
    Ok(out)
}
