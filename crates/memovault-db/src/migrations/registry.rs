use std::collections::HashSet;

use serde::Serialize;

use super::{Migration, MigrationError, catalog};

/// Identifying fields of a registered migration, for logs and listings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MigrationSummary {
    pub table_name: String,
    pub version: u32,
    pub description: String,
}

/// Read-only, declaration-ordered collection of every known migration.
#[derive(Debug, Clone)]
pub struct MigrationRegistry {
    migrations: Vec<Migration>,
    tables: Vec<String>,
}

impl MigrationRegistry {
    /// Builds a registry, rejecting empty table names, version 0 and duplicate
    /// versions within a table.
    pub fn new(migrations: Vec<Migration>) -> Result<Self, MigrationError> {
        let mut seen = HashSet::new();
        let mut tables: Vec<String> = Vec::new();

        for migration in &migrations {
            if migration.table_name.trim().is_empty() {
                return Err(MigrationError::InvalidRegistry(format!(
                    "migration v{} has an empty table name",
                    migration.version
                )));
            }
            if migration.version == 0 {
                return Err(MigrationError::InvalidRegistry(format!(
                    "{}: versions start at 1",
                    migration.table_name
                )));
            }
            if !seen.insert((migration.table_name.as_str(), migration.version)) {
                return Err(MigrationError::InvalidRegistry(format!(
                    "{}: duplicate version {}",
                    migration.table_name, migration.version
                )));
            }
            if !tables.contains(&migration.table_name) {
                tables.push(migration.table_name.clone());
            }
        }

        Ok(Self { migrations, tables })
    }

    /// The application's published migrations.
    pub fn builtin() -> Result<Self, MigrationError> {
        Self::new(catalog::migrations())
    }

    /// Every migration for `table_name`, ascending by version.
    pub fn migrations_for_table(&self, table_name: &str) -> Vec<&Migration> {
        let mut found: Vec<&Migration> = self
            .migrations
            .iter()
            .filter(|m| m.table_name == table_name)
            .collect();
        found.sort_by_key(|m| m.version);
        found
    }

    /// Pending work for a table currently at `from_version`: every migration
    /// with a higher version, ascending.
    pub fn migrations_from_version(&self, table_name: &str, from_version: u32) -> Vec<&Migration> {
        self.migrations_for_table(table_name)
            .into_iter()
            .filter(|m| m.version > from_version)
            .collect()
    }

    /// Highest registered version for `table_name`, or 0 when none exist.
    pub fn latest_version(&self, table_name: &str) -> u32 {
        self.migrations
            .iter()
            .filter(|m| m.table_name == table_name)
            .map(|m| m.version)
            .max()
            .unwrap_or(0)
    }

    /// Distinct table names in the order they were first declared.
    pub fn all_table_names(&self) -> &[String] {
        &self.tables
    }

    pub fn manifest(&self) -> Vec<MigrationSummary> {
        self.migrations
            .iter()
            .map(|m| MigrationSummary {
                table_name: m.table_name.clone(),
                version: m.version,
                description: m.description.clone(),
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.migrations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.migrations.is_empty()
    }
}
