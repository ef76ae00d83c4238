//! # enc-cli
//!
//! Command-line admin for the puppet external node classifier registry.
//!
//! Without an action flag the single node argument is looked up and its
//! classification YAML printed, which is how puppetserver invokes it:
//!
//! ```text
//! enc host1.example.com
//! enc --add host1.example.com --role web
//! enc --change --yaml changes.yaml
//! enc --list web
//! enc --restore 20240101-120000.sql.gz
//! ```
//!
//! Every column of the schema descriptor becomes a `--<column>` option.
//!
//! ## Configuration
//!
//! - `PUP_ENC_DIR` - base directory holding `config.toml` and `tables.yaml`
//! - `ENC_DB_CONF`, `ENC_DB_FILE`, `ENC_BKUP_DIR`, `ENC_ROLE_MODEL` - overrides
//! - `RUST_LOG` - log filter, takes precedence over `--verbose`/`--debug`

#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]

pub mod render;

use std::collections::BTreeMap;
use std::io::Write;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Arg, ArgGroup, CommandFactory, FromArgMatches, Parser};
use tracing::debug;

use enc_table::{ChangeInput, EncConfig, NodeRegistry, TableSchema};

const COLUMN_ID_PREFIX: &str = "column:";

/// Manage Puppet ENC database.
#[derive(Debug, Parser)]
#[command(name = "enc")]
#[command(author, version, about, long_about = None)]
#[command(group(
    ArgGroup::new("action")
        .multiple(false)
        .args([
            "add", "change", "delete", "list", "lookup", "production", "test",
            "topic", "bkup", "restore", "init", "mkyaml", "mkcsv",
        ])
))]
pub struct Cli {
    /// Source data for add/change/delete: YAML hash of fqdn -> node parameters.
    #[arg(long, value_name = "FILENAME")]
    pub yaml: Option<PathBuf>,

    /// Source data for add/change/delete: CSV with a header row.
    #[arg(long, value_name = "FILENAME")]
    pub csv: Option<PathBuf>,

    /// Log at debug level.
    #[arg(long, short = 'd')]
    pub debug: bool,

    /// Log at info level.
    #[arg(long, short = 'v')]
    pub verbose: bool,

    /// Add new nodes. Data is taken from --yaml, --csv or the command line.
    #[arg(long, help_heading = "Action")]
    pub add: bool,

    /// Change the given nodes (exact primary-key match).
    #[arg(long, visible_alias = "ch", help_heading = "Action")]
    pub change: bool,

    /// Delete the given nodes (exact primary-key match).
    #[arg(long, visible_alias = "del", help_heading = "Action")]
    pub delete: bool,

    /// List rows matching NODELIST, or all rows if NODELIST is empty.
    #[arg(long, short = 'l', visible_alias = "ls", help_heading = "Action")]
    pub list: bool,

    /// Print puppetserver YAML for a single node. This is the default action.
    #[arg(long, help_heading = "Action")]
    pub lookup: bool,

    /// Shortcut for "--change --environment production".
    #[arg(long, visible_alias = "prod", help_heading = "Action")]
    pub production: bool,

    /// Shortcut for "--change --environment test".
    #[arg(long, help_heading = "Action")]
    pub test: bool,

    /// Shortcut for "--change --environment TOPIC".
    #[arg(long, value_name = "TOPIC", help_heading = "Action")]
    pub topic: Option<String>,

    /// Write a backup to the configured backup directory.
    #[arg(long, help_heading = "Action")]
    pub bkup: bool,

    /// Restore the database from the backup named in NODELIST.
    #[arg(long, help_heading = "Action")]
    pub restore: bool,

    /// Drop and recreate the node table.
    #[arg(long, help_heading = "Action")]
    pub init: bool,

    /// Print a YAML template.
    #[arg(long, help_heading = "Action")]
    pub mkyaml: bool,

    /// Print a CSV template.
    #[arg(long, help_heading = "Action")]
    pub mkcsv: bool,

    /// Node names (or name fragments for --list) to operate on.
    #[arg(value_name = "NODELIST")]
    pub nodelist: Vec<String>,

    /// Values of the per-column options that were given.
    #[arg(skip)]
    pub columns: BTreeMap<String, String>,
}

/// Every top-level action the CLI can take.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Add,
    Change,
    Delete,
    List,
    Lookup,
    Backup,
    Restore,
    Init,
    MkYaml,
    MkCsv,
    Production,
    Test,
    Topic(String),
}

impl Cli {
    /// Parses `args`, adding a `--<column>` option for every schema column.
    pub fn parse_for_schema<I, T>(schema: &TableSchema, args: I) -> Result<Self, clap::Error>
    where
        I: IntoIterator<Item = T>,
        T: Into<std::ffi::OsString> + Clone,
    {
        let mut cmd = Self::command();
        for col in schema.column_names() {
            let taken = cmd.get_arguments().any(|a| {
                a.get_long() == Some(col)
                    || a.get_visible_aliases().is_some_and(|aliases| aliases.contains(&col))
            });
            if taken {
                return Err(cmd.error(
                    clap::error::ErrorKind::ArgumentConflict,
                    format!("schema column '{col}' clashes with a built-in option"),
                ));
            }
            cmd = cmd.arg(
                Arg::new(format!("{COLUMN_ID_PREFIX}{col}"))
                    .long(col.to_string())
                    .value_name("VALUE")
                    .help_heading("Node parameters (command-line changes only)"),
            );
        }

        let matches = cmd.try_get_matches_from(args)?;
        let mut cli = Self::from_arg_matches(&matches)?;
        for col in schema.column_names() {
            if let Some(v) = matches.get_one::<String>(&format!("{COLUMN_ID_PREFIX}{col}")) {
                cli.columns.insert(col.to_string(), v.clone());
            }
        }
        Ok(cli)
    }

    pub fn action(&self) -> Action {
        if let Some(topic) = &self.topic {
            return Action::Topic(topic.clone());
        }
        let flags = [
            (self.add, Action::Add),
            (self.change, Action::Change),
            (self.delete, Action::Delete),
            (self.list, Action::List),
            (self.production, Action::Production),
            (self.test, Action::Test),
            (self.bkup, Action::Backup),
            (self.restore, Action::Restore),
            (self.init, Action::Init),
            (self.mkyaml, Action::MkYaml),
            (self.mkcsv, Action::MkCsv),
        ];
        flags
            .into_iter()
            .find_map(|(set, action)| set.then_some(action))
            .unwrap_or(Action::Lookup)
    }

    /// The change-set sources given on the command line.
    pub fn change_input(&self) -> ChangeInput {
        ChangeInput {
            structured: self.yaml.clone(),
            tabular: self.csv.clone(),
            nodes: self.nodelist.clone(),
            values: self.columns.clone(),
        }
    }

    /// Log filter implied by `--debug`/`--verbose`.
    pub fn log_level(&self) -> &'static str {
        if self.debug {
            "debug"
        } else if self.verbose {
            "info"
        } else {
            "error"
        }
    }
}

/// Runs the selected action, writing any report to `out`.
///
/// The database is only opened by actions that need it.
pub fn run(cli: &Cli, config: &EncConfig, schema: &TableSchema, out: &mut impl Write) -> Result<()> {
    let action = cli.action();
    debug!(?action, "Dispatching");

    let open = || {
        NodeRegistry::open_with_schema(config, schema.clone())
            .with_context(|| format!("failed to open registry at {}", config.db_file.display()))
    };
    let input = cli.change_input();

    match action {
        Action::Add => {
            open()?.add(&input)?;
        }
        Action::Change => {
            open()?.change(&input)?;
        }
        Action::Delete => {
            open()?.delete(&input)?;
        }
        Action::Production => {
            open()?.change_environment(&input, "production")?;
        }
        Action::Test => {
            open()?.change_environment(&input, "test")?;
        }
        Action::Topic(topic) => {
            open()?.change_environment(&input, &topic)?;
        }
        Action::List => {
            let registry = open()?;
            let records = registry.list(&cli.nodelist)?;
            render::list_table(schema, &records, out)?;
        }
        Action::Lookup => {
            let enc = open()?.lookup(&cli.nodelist)?;
            render::classification(&enc, out)?;
        }
        Action::Backup => {
            open()?.backup()?;
        }
        Action::Restore => {
            open()?.restore(&cli.nodelist)?;
        }
        Action::Init => {
            open()?.init()?;
        }
        Action::MkYaml => render::yaml_template(schema, out)?,
        Action::MkCsv => render::csv_template(schema, out)?,
    }
    Ok(())
}
