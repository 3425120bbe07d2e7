//! Configuration management for the daemon.

use std::env;
use std::path::PathBuf;

use tidemark_engine::{FsPath, JournalOptions, PathCase, PreviousFallback};

/// Daemon configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Listen address
    pub host: String,
    /// Listen port
    pub port: u16,
    /// Root of the synchronized tree
    pub sync_root: FsPath,
    /// Where the journal snapshot is kept between runs
    pub state_path: PathBuf,
    pub case_sensitive: bool,
    /// Turn renames of unknown sources into placeholder creations
    pub allow_placeholders: bool,
    /// Bearer token required on every request, if set
    pub auth_token: Option<String>,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration from any key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let host = lookup("HOST").unwrap_or_else(|| "127.0.0.1".to_string());

        let port = match lookup("PORT") {
            Some(value) => value.parse().map_err(|_| ConfigError::InvalidPort(value))?,
            None => 7420,
        };

        let root = lookup("SYNC_ROOT").ok_or(ConfigError::MissingSyncRoot)?;
        let sync_root = match FsPath::parse(&root) {
            Ok(path) if !path.is_root() => path,
            _ => return Err(ConfigError::InvalidSyncRoot(root)),
        };

        let state_path = lookup("STATE_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("tidemark-state.json"));

        let case_sensitive = flag(&lookup, "CASE_SENSITIVE")?;
        let allow_placeholders = flag(&lookup, "ALLOW_PLACEHOLDERS")?;

        let auth_token = lookup("AUTH_TOKEN").filter(|token| !token.is_empty());

        Ok(Self {
            host,
            port,
            sync_root,
            state_path,
            case_sensitive,
            allow_placeholders,
            auth_token,
        })
    }

    /// Options the journal is opened with.
    pub fn journal_options(&self) -> JournalOptions {
        JournalOptions {
            case: if self.case_sensitive {
                PathCase::Sensitive
            } else {
                PathCase::Insensitive
            },
            placeholders: if self.allow_placeholders {
                PreviousFallback::Placeholder
            } else {
                PreviousFallback::Fail
            },
        }
    }
}

fn flag(lookup: &impl Fn(&str) -> Option<String>, key: &'static str) -> Result<bool, ConfigError> {
    match lookup(key).as_deref().map(str::to_ascii_lowercase).as_deref() {
        None | Some("") | Some("0") | Some("false") | Some("no") => Ok(false),
        Some("1") | Some("true") | Some("yes") => Ok(true),
        Some(_) => Err(ConfigError::InvalidFlag(key)),
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("SYNC_ROOT environment variable is required")]
    MissingSyncRoot,

    #[error("invalid SYNC_ROOT value: {0:?}")]
    InvalidSyncRoot(String),

    #[error("invalid PORT value: {0:?}")]
    InvalidPort(String),

    #[error("{0} must be true or false")]
    InvalidFlag(&'static str),
}
