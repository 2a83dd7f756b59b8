//! TRB configuration.
//!
//! Loaded from `~/.trb/config.toml`. Every key is optional and a missing file
//! means defaults.

use std::path::{Path, PathBuf};
use std::{env, fs, io};

use serde::{Deserialize, Serialize};

use crate::storage::{Error, Result, Storage};

/// Environment variable overriding the database path.
pub const DATABASE_ENV: &str = "TRB_DATABASE";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Config {
    /// Database file. Defaults to `~/.trb/trb.sqlite`.
    pub database: Option<PathBuf>,

    /// Who signs completions when `--as` is not given.
    pub default_identity: Option<String>,

    /// Log filter directive, e.g. `trb=info`. `TRB_LOG` takes precedence.
    pub log: Option<String>,
}

impl Config {
    /// Load config from `~/.trb/config.toml`, or defaults if it does not exist.
    pub fn load() -> Result<Self> {
        match Self::path() {
            Some(path) => Self::load_from(&path),
            None => Ok(Self::default()),
        }
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let contents = match fs::read_to_string(path) {
            Ok(s) => s,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => return Err(e.into()),
        };
        toml::from_str(&contents)
            .map_err(|e| Error::Validation(format!("invalid config at {}: {e}", path.display())))
    }

    /// The config file path: `~/.trb/config.toml`.
    pub fn path() -> Option<PathBuf> {
        dirs::home_dir().map(|h| h.join(".trb").join("config.toml"))
    }

    /// Resolve the database path: `--db`, then `TRB_DATABASE`, then config,
    /// then the default location.
    pub fn database_path(&self, explicit: Option<&Path>) -> Option<PathBuf> {
        let from_env = env::var_os(DATABASE_ENV)
            .filter(|v| !v.is_empty())
            .map(PathBuf::from);
        resolve_database(explicit, from_env, self.database.clone())
    }
}

fn resolve_database(
    explicit: Option<&Path>,
    from_env: Option<PathBuf>,
    configured: Option<PathBuf>,
) -> Option<PathBuf> {
    explicit
        .map(Path::to_path_buf)
        .or(from_env)
        .or(configured)
        .or_else(Storage::default_path)
}

#[cfg(test)]
mod tests {
    use super::*;

    use tempfile::TempDir;

    #[test]
    fn missing_file_is_defaults() {
        let dir = TempDir::new().unwrap();
        let config = Config::load_from(&dir.path().join("config.toml")).unwrap();
        assert!(config.database.is_none());
        assert!(config.default_identity.is_none());
        assert!(config.log.is_none());
    }

    #[test]
    fn reads_kebab_case_keys() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(
            &path,
            "database = \"/srv/trb/records.sqlite\"\n\
             default-identity = \"Master J. Silva\"\n\
             log = \"trb=debug\"\n",
        )
        .unwrap();

        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.database, Some(PathBuf::from("/srv/trb/records.sqlite")));
        assert_eq!(config.default_identity.as_deref(), Some("Master J. Silva"));
        assert_eq!(config.log.as_deref(), Some("trb=debug"));
    }

    #[test]
    fn invalid_file_is_validation_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "database = [").unwrap();
        assert!(matches!(Config::load_from(&path), Err(Error::Validation(_))));
    }

    #[test]
    fn database_precedence() {
        let flag = PathBuf::from("/flag.sqlite");
        let env = PathBuf::from("/env.sqlite");
        let cfg = PathBuf::from("/cfg.sqlite");

        assert_eq!(
            resolve_database(Some(&flag), Some(env.clone()), Some(cfg.clone())),
            Some(flag)
        );
        assert_eq!(
            resolve_database(None, Some(env.clone()), Some(cfg.clone())),
            Some(env)
        );
        assert_eq!(resolve_database(None, None, Some(cfg.clone())), Some(cfg));
        assert_eq!(resolve_database(None, None, None), Storage::default_path());
    }
}
