//! `enc` - puppet external node classifier admin.
//!
//! Loads the configuration and schema descriptor, builds the per-column
//! options from the schema, then runs the selected action.

use anyhow::{Context, Result};
use tracing::debug;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use enc_cli::Cli;
use enc_table::{EncConfig, TableSchema};

fn main() -> Result<()> {
    let config = EncConfig::from_env().context("failed to load configuration")?;
    let schema = TableSchema::from_descriptor_file(&config.db_conf)
        .with_context(|| format!("failed to load schema from {}", config.db_conf.display()))?;
    schema.primary_key()?;

    let cli = Cli::parse_for_schema(&schema, std::env::args_os()).unwrap_or_else(|e| e.exit());

    // Logs go to stderr; stdout carries lookup YAML, tables and templates.
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(cli.log_level())))
        .init();
    debug!(?cli, ?config, "Parsed arguments");

    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    enc_cli::run(&cli, &config, &schema, &mut out)
}
