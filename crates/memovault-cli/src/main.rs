mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, fmt, reload};

#[derive(Parser)]
#[command(
    name = "memovault",
    version,
    about = "MemoVault - store schema maintenance"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config directory (defaults to the XDG config dir or ~/.memovault)
    #[arg(long, global = true, env = "MEMOVAULT_CONFIG_DIR")]
    config_dir: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true)]
    log_level: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply pending migrations and validate the result
    Migrate,

    /// Show applied and latest versions per table
    Status {
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Check every table is at its latest version
    Validate,

    /// List registered migrations in declaration order
    List {
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let (filter, overridden) = startup_filter(
        EnvFilter::try_from_default_env().ok(),
        cli.log_level.as_deref(),
    );
    let (filter, filter_handle) = reload::Layer::new(filter);
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .init();

    let config_loader = match &cli.config_dir {
        Some(dir) => memovault_config::ConfigLoader::with_dir(dir),
        None => memovault_config::ConfigLoader::new(),
    };
    let config = config_loader.load()?;

    if !overridden {
        if let Some(level) = &config.log_level {
            filter_handle.reload(EnvFilter::new(level))?;
        }
    }
    tracing::debug!(
        config_dir = %config_loader.config_dir().display(),
        found = config_loader.config_file_exists(),
        "configuration loaded"
    );

    match cli.command {
        Commands::Migrate => {
            let results = commands::migrate(&config_loader, &config).await?;
            println!("{}", commands::render_migrations(&results));
        }
        Commands::Status { json } => {
            let statuses = commands::status(&config_loader, &config).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&statuses)?);
            } else {
                println!("{}", commands::render_status(&statuses));
            }
        }
        Commands::Validate => {
            let report = commands::validate(&config_loader, &config).await?;
            if !report.valid {
                for message in &report.errors {
                    println!("  - {message}");
                }
                anyhow::bail!(
                    "schema validation failed ({} mismatch(es))",
                    report.errors.len()
                );
            }
            println!("Schema is up to date.");
        }
        Commands::List { json } => {
            let manifest = commands::list()?;
            if json {
                println!("{}", serde_json::to_string_pretty(&manifest)?);
            } else {
                println!("{}", commands::render_manifest(&manifest));
            }
        }
    }

    Ok(())
}

/// Filter installed before the config is read. `RUST_LOG` wins, then
/// `--log-level`; the flag reports whether either was given, since the config
/// file's level only applies when neither was.
fn startup_filter(env: Option<EnvFilter>, flag: Option<&str>) -> (EnvFilter, bool) {
    match (env, flag) {
        (Some(env), _) => (env, true),
        (None, Some(level)) => (EnvFilter::new(level), true),
        (None, None) => (EnvFilter::new("info"), false),
    }
}
