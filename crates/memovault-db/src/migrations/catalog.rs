//! Published schema history of the application's tables.
//!
//! Append only. Never edit or reorder an existing entry; add a new version.

use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;

use super::{Migration, MigrationStep};
use crate::store::{
    ColumnDef, ColumnType, NewColumn, Row, StoreConnection, StoreResult, TableSchema, predicate,
};

pub const MEMOS: &str = "memos";
pub const CATEGORIES: &str = "categories";
pub const TAGS: &str = "tags";
pub const MEMO_TAGS: &str = "memo_tags";
pub const ATTACHMENTS: &str = "attachments";

pub const EMBEDDING_DIM: usize = 384;

pub const INBOX_CATEGORY_ID: &str = "inbox";

pub fn migrations() -> Vec<Migration> {
    vec![
        Migration::create_table(
            1,
            MEMOS,
            "create memos table",
            TableSchema::new(vec![
                ColumnDef::required("id", ColumnType::Utf8),
                ColumnDef::required("content", ColumnType::Utf8),
                ColumnDef::required("created_at", ColumnType::Int64),
                ColumnDef::required("updated_at", ColumnType::Int64),
                ColumnDef::optional("embedding", ColumnType::Vector(EMBEDDING_DIM)),
            ]),
        ),
        Migration::add_columns(
            2,
            MEMOS,
            "add memo type, defaulting to text",
            vec![NewColumn::new("type", ColumnType::Utf8, "'text'")],
        ),
        Migration::add_columns(
            3,
            MEMOS,
            "add pinned and archived flags",
            vec![
                NewColumn::new("is_pinned", ColumnType::Boolean, "false"),
                NewColumn::new("is_archived", ColumnType::Boolean, "false"),
            ],
        ),
        Migration::add_columns(
            4,
            MEMOS,
            "add category reference",
            vec![NewColumn::new("category_id", ColumnType::Utf8, "NULL")],
        ),
        Migration::create_table(
            1,
            CATEGORIES,
            "create categories table",
            TableSchema::new(vec![
                ColumnDef::required("id", ColumnType::Utf8),
                ColumnDef::required("name", ColumnType::Utf8),
                ColumnDef::required("created_at", ColumnType::Int64),
            ]),
        ),
        Migration::add_columns(
            2,
            CATEGORIES,
            "add category color",
            vec![NewColumn::new("color", ColumnType::Utf8, "'#808080'")],
        ),
        Migration::add_columns(
            3,
            CATEGORIES,
            "add category sort order",
            vec![NewColumn::new("sort_order", ColumnType::Int64, "0")],
        ),
        Migration::custom(4, CATEGORIES, "seed the inbox category", SeedInboxCategory),
        Migration::create_table(
            1,
            TAGS,
            "create tags table",
            TableSchema::new(vec![
                ColumnDef::required("id", ColumnType::Utf8),
                ColumnDef::required("name", ColumnType::Utf8),
                ColumnDef::required("created_at", ColumnType::Int64),
            ]),
        ),
        Migration::add_columns(
            2,
            TAGS,
            "add tag usage count",
            vec![NewColumn::new("usage_count", ColumnType::Int64, "0")],
        ),
        Migration::create_table(
            1,
            MEMO_TAGS,
            "create memo/tag link table",
            TableSchema::new(vec![
                ColumnDef::required("memo_id", ColumnType::Utf8),
                ColumnDef::required("tag_id", ColumnType::Utf8),
                ColumnDef::required("created_at", ColumnType::Int64),
            ]),
        ),
        Migration::create_table(
            1,
            ATTACHMENTS,
            "create attachments table",
            TableSchema::new(vec![
                ColumnDef::required("id", ColumnType::Utf8),
                ColumnDef::required("memo_id", ColumnType::Utf8),
                ColumnDef::required("file_name", ColumnType::Utf8),
                ColumnDef::required("created_at", ColumnType::Int64),
            ]),
        ),
        Migration::add_columns(
            2,
            ATTACHMENTS,
            "add attachment mime type",
            vec![NewColumn::new(
                "mime_type",
                ColumnType::Utf8,
                "'application/octet-stream'",
            )],
        ),
        Migration::add_columns(
            3,
            ATTACHMENTS,
            "add attachment size",
            vec![NewColumn::new("size_bytes", ColumnType::Int64, "0")],
        ),
        Migration::add_columns(
            4,
            ATTACHMENTS,
            "add attachment checksum",
            vec![NewColumn::new("sha256", ColumnType::Utf8, "NULL")],
        ),
        Migration::add_columns(
            5,
            ATTACHMENTS,
            "add extracted attachment text",
            vec![NewColumn::new("extracted_text", ColumnType::Utf8, "NULL")],
        ),
        Migration::add_columns(
            6,
            ATTACHMENTS,
            "add attachment thumbnail path",
            vec![NewColumn::new("thumbnail_path", ColumnType::Utf8, "NULL")],
        ),
        Migration::add_columns(
            7,
            ATTACHMENTS,
            "add attachment text embedding",
            vec![NewColumn::new(
                "text_embedding",
                ColumnType::Vector(EMBEDDING_DIM),
                "NULL",
            )],
        ),
    ]
}

/// Inserts the default category unless a row with its id already exists.
struct SeedInboxCategory;

#[async_trait]
impl MigrationStep for SeedInboxCategory {
    async fn apply(&self, connection: &dyn StoreConnection) -> StoreResult<()> {
        let table = connection.open_table(CATEGORIES).await?;
        let existing = table
            .query()
            .filter(predicate::eq_str("id", INBOX_CATEGORY_ID))
            .limit(1)
            .to_vec()
            .await?;
        if !existing.is_empty() {
            return Ok(());
        }

        let mut row = Row::new();
        row.insert("id".into(), json!(INBOX_CATEGORY_ID));
        row.insert("name".into(), json!("Inbox"));
        row.insert("created_at".into(), json!(Utc::now().timestamp_millis()));
        row.insert("sort_order".into(), json!(0));
        table.add(vec![row]).await
    }
}
