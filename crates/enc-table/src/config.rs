//! Registry configuration loaded from `<base>/config.toml` plus environment
//! overrides.
//!
//! The base directory comes from `PUP_ENC_DIR` (default `/etc/puppetlabs/enc`).
//! Every key of the `[enc]` table is optional:
//!
//! | Key          | Override         | Default                    | Description                          |
//! |--------------|------------------|----------------------------|--------------------------------------|
//! | `db_conf`    | `ENC_DB_CONF`    | `tables.yaml`              | Schema descriptor (YAML)             |
//! | `db_file`    | `ENC_DB_FILE`    | `puppet_enc.sqlite`        | SQLite database file                 |
//! | `bkup_dir`   | `ENC_BKUP_DIR`   | `/var/backups/puppet_enc`  | Directory holding `*.sql.gz` backups |
//! | `role_model` | `ENC_ROLE_MODEL` | `module`                   | `module` or `hiera`                  |
//!
//! Relative paths are resolved against the base directory.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::Deserialize;
use tracing::debug;

use crate::error::EncError;

pub const BASE_DIR_VAR: &str = "PUP_ENC_DIR";
pub const DEFAULT_BASE_DIR: &str = "/etc/puppetlabs/enc";
const CONFIG_FILE: &str = "config.toml";

/// How node roles are delivered to the configuration-management system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RoleModel {
    /// Roles are puppet modules; lookups emit a `classes` list.
    #[default]
    Module,
    /// Roles are resolved through hiera; lookups carry no `classes`.
    Hiera,
}

impl FromStr for RoleModel {
    type Err = EncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "module" => Ok(Self::Module),
            "hiera" => Ok(Self::Hiera),
            other => Err(EncError::Config(format!("Invalid role_model '{other}'"))),
        }
    }
}

impl fmt::Display for RoleModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Module => f.write_str("module"),
            Self::Hiera => f.write_str("hiera"),
        }
    }
}

/// Resolved runtime configuration for one invocation.
#[derive(Debug, Clone)]
pub struct EncConfig {
    /// Directory every relative path is resolved against.
    pub base_dir: PathBuf,
    /// Schema descriptor file.
    pub db_conf: PathBuf,
    /// SQLite database file.
    pub db_file: PathBuf,
    /// Backup directory.
    pub bkup_dir: PathBuf,
    pub role_model: RoleModel,
}

#[derive(Debug, Default, Deserialize)]
struct ConfigFile {
    #[serde(default)]
    enc: EncSection,
}

#[derive(Debug, Default, Deserialize)]
struct EncSection {
    db_conf: Option<String>,
    db_file: Option<String>,
    bkup_dir: Option<String>,
    role_model: Option<String>,
}

impl EncConfig {
    /// Load configuration for the base directory named by `PUP_ENC_DIR`.
    pub fn from_env() -> Result<Self, EncError> {
        let base = std::env::var(BASE_DIR_VAR).unwrap_or_else(|_| DEFAULT_BASE_DIR.to_string());
        Self::load(Path::new(&base))
    }

    /// Load `<base>/config.toml` (if present), then apply `ENC_*` overrides.
    pub fn load(base_dir: &Path) -> Result<Self, EncError> {
        Self::from_file(base_dir)?.with_overrides(|key| std::env::var(key).ok())
    }

    /// Load `<base>/config.toml` without consulting the environment.
    pub fn from_file(base_dir: &Path) -> Result<Self, EncError> {
        let path = base_dir.join(CONFIG_FILE);
        let file: ConfigFile = match std::fs::read_to_string(&path) {
            Ok(text) => toml::from_str(&text).map_err(|e| EncError::parse(&path, e))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No config file at {}, using defaults", path.display());
                ConfigFile::default()
            }
            Err(e) => return Err(EncError::io(&path, e)),
        };

        let section = file.enc;
        let role_model = match section.role_model {
            Some(s) => s.parse()?,
            None => RoleModel::default(),
        };
        Ok(Self {
            base_dir: base_dir.to_path_buf(),
            db_conf: resolve(base_dir, section.db_conf.as_deref().unwrap_or("tables.yaml")),
            db_file: resolve(base_dir, section.db_file.as_deref().unwrap_or("puppet_enc.sqlite")),
            bkup_dir: resolve(
                base_dir,
                section.bkup_dir.as_deref().unwrap_or("/var/backups/puppet_enc"),
            ),
            role_model,
        })
    }

    fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<Self, EncError> {
        if let Some(v) = lookup("ENC_DB_CONF") {
            self.db_conf = resolve(&self.base_dir, &v);
        }
        if let Some(v) = lookup("ENC_DB_FILE") {
            self.db_file = resolve(&self.base_dir, &v);
        }
        if let Some(v) = lookup("ENC_BKUP_DIR") {
            self.bkup_dir = resolve(&self.base_dir, &v);
        }
        if let Some(v) = lookup("ENC_ROLE_MODEL") {
            self.role_model = v.parse()?;
        }
        Ok(self)
    }
}

fn resolve(base: &Path, value: &str) -> PathBuf {
    let path = PathBuf::from(value);
    if path.is_absolute() {
        path
    } else {
        base.join(path)
    }
}
