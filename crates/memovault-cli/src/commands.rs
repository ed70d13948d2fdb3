use std::sync::Arc;

use anyhow::{Context, Result};
use memovault_config::{AppConfig, ConfigLoader};
use memovault_db::migrations::MigrationSummary;
use memovault_db::{
    ExecutionResult, MigrationManager, MigrationRegistry, SqliteStore, TableStatus,
    ValidationReport,
};

pub async fn migrate(loader: &ConfigLoader, config: &AppConfig) -> Result<Vec<ExecutionResult>> {
    let ready = memovault_db::open_store(loader, config)
        .await
        .with_context(|| {
            format!(
                "failed to migrate store at {}",
                loader.database_path(config).display()
            )
        })?;
    Ok(ready.applied)
}

pub async fn status(loader: &ConfigLoader, config: &AppConfig) -> Result<Vec<TableStatus>> {
    let store = open_read_only(loader, config)?;
    let manager = manager(config)?;
    Ok(manager.status(&store).await?)
}

pub async fn validate(loader: &ConfigLoader, config: &AppConfig) -> Result<ValidationReport> {
    let store = open_read_only(loader, config)?;
    let mut manager = manager(config)?;
    Ok(manager.validate(&store).await?)
}

pub fn list() -> Result<Vec<MigrationSummary>> {
    Ok(MigrationRegistry::builtin()?.manifest())
}

fn manager(config: &AppConfig) -> Result<MigrationManager> {
    let registry = Arc::new(MigrationRegistry::builtin()?);
    Ok(MigrationManager::new(registry).with_metadata_table(&config.storage.metadata_table))
}

/// Opens the configured store for inspection. A store that was never created
/// is inspected as an empty in-memory one so no file appears on disk.
fn open_read_only(loader: &ConfigLoader, config: &AppConfig) -> Result<SqliteStore> {
    let path = loader.database_path(config);
    if path.exists() {
        Ok(SqliteStore::open(&path)?)
    } else {
        Ok(SqliteStore::in_memory()?)
    }
}

pub fn render_migrations(results: &[ExecutionResult]) -> String {
    if results.is_empty() {
        return "No pending migrations.".to_string();
    }

    let mut out = String::from("Applied migrations:");
    for result in results {
        let versions: Vec<String> = result
            .executed_migrations
            .iter()
            .map(|v| format!("v{v}"))
            .collect();
        out.push_str(&format!(
            "\n  {:<16} {} -> {} ({})",
            result.table_name,
            result.from_version,
            result.to_version,
            versions.join(", ")
        ));
    }
    out
}

pub fn render_status(statuses: &[TableStatus]) -> String {
    let mut out = format!(
        "{:<16} {:>7} {:>7} {:>7}",
        "TABLE", "CURRENT", "LATEST", "PENDING"
    );
    for status in statuses {
        out.push_str(&format!(
            "\n{:<16} {:>7} {:>7} {:>7}",
            status.table_name, status.current_version, status.latest_version, status.pending
        ));
    }
    out
}

pub fn render_manifest(manifest: &[MigrationSummary]) -> String {
    manifest
        .iter()
        .map(|m| format!("{:<16} v{:<3} {}", m.table_name, m.version, m.description))
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::{list, migrate, render_migrations, render_status, status, validate};
    use memovault_config::{AppConfig, ConfigLoader};

    #[tokio::test]
    async fn status_on_missing_store_shows_everything_pending_without_creating_it() {
        let dir = tempfile::tempdir().expect("tempdir");
        let loader = ConfigLoader::with_dir(dir.path());
        let config = AppConfig::default();

        let statuses = status(&loader, &config).await.expect("status");
        assert!(statuses.iter().all(|s| s.current_version == 0));
        assert!(statuses.iter().all(|s| s.pending > 0));
        assert!(!loader.database_path(&config).exists());
    }

    #[tokio::test]
    async fn migrate_then_validate_passes() {
        let dir = tempfile::tempdir().expect("tempdir");
        let loader = ConfigLoader::with_dir(dir.path());
        let config = AppConfig::default();

        let before = validate(&loader, &config).await.expect("validate");
        assert!(!before.valid);

        let results = migrate(&loader, &config).await.expect("migrate");
        assert!(render_migrations(&results).starts_with("Applied migrations:"));

        let after = validate(&loader, &config).await.expect("validate");
        assert!(after.valid, "unexpected errors: {:?}", after.errors);

        let again = migrate(&loader, &config).await.expect("migrate again");
        assert_eq!(render_migrations(&again), "No pending migrations.");
    }

    #[tokio::test]
    async fn render_status_lists_each_table() {
        let dir = tempfile::tempdir().expect("tempdir");
        let loader = ConfigLoader::with_dir(dir.path());
        let config = AppConfig::default();
        migrate(&loader, &config).await.expect("migrate");

        let rendered = render_status(&status(&loader, &config).await.expect("status"));
        let lines: Vec<&str> = rendered.lines().collect();
        assert!(lines[0].starts_with("TABLE"));
        assert!(lines.iter().any(|l| l.starts_with("attachments") && l.contains('7')));
    }

    #[test]
    fn list_matches_registry_declaration_order() {
        let manifest = list().expect("list");
        assert_eq!(manifest[0].table_name, "memos");
        assert_eq!(manifest[0].version, 1);
    }
}
