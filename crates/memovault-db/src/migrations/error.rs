use thiserror::Error;

use super::Migration;
use crate::store::StoreError;

#[derive(Error, Debug)]
pub enum MigrationError {
    /// A migration's change could not be applied. The metadata record for the
    /// table still names the last version that succeeded.
    #[error("migration {table_name} v{version} ({description}) failed: {source}")]
    Execution {
        table_name: String,
        version: u32,
        description: String,
        #[source]
        source: StoreError,
    },

    /// The migration's change is in the store but its version was not
    /// recorded. The next boot re-applies it, which must be a no-op.
    #[error("migration {table_name} v{version} ({description}) applied but not recorded: {source}")]
    Record {
        table_name: String,
        version: u32,
        description: String,
        #[source]
        source: StoreError,
    },

    #[error("reading recorded version of {table_name} failed: {source}")]
    Lookup {
        table_name: String,
        #[source]
        source: StoreError,
    },

    #[error("migration metadata error: {0}")]
    Metadata(#[from] StoreError),

    #[error("invalid migration registry: {0}")]
    InvalidRegistry(String),

    #[error("invalid migration batch: {0}")]
    InvalidBatch(String),

    #[error("schema validation failed: {}", .0.join("; "))]
    Validation(Vec<String>),
}

impl MigrationError {
    /// Attaches `migration` to a metadata failure raised while recording it.
    pub(crate) fn recording(self, migration: &Migration) -> Self {
        match self {
            Self::Metadata(source) => Self::Record {
                table_name: migration.table_name.clone(),
                version: migration.version,
                description: migration.description.clone(),
                source,
            },
            other => other,
        }
    }

    /// Attaches `table_name` to a metadata failure raised while reading its version.
    pub(crate) fn reading(self, table_name: &str) -> Self {
        match self {
            Self::Metadata(source) => Self::Lookup {
                table_name: table_name.to_string(),
                source,
            },
            other => other,
        }
    }
}

impl From<MigrationError> for memovault_common::Error {
    fn from(err: MigrationError) -> Self {
        memovault_common::Error::Migration(err.to_string())
    }
}
