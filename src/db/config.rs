//! Connection strings.
//!
//! ```text
//! memory://[name][?max_connections=N]
//! git://<path>[?create_if_missing=true|false]
//! ```

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::Serialize;

use crate::backend::DEFAULT_MAX_CONNECTIONS;
use crate::transaction::TxError;

/// Name used for a memory backend when the connection string omits one.
pub const DEFAULT_MEMORY_NAME: &str = "default";

/// Which backend a connection string points at.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "scheme", rename_all = "lowercase")]
pub enum BackendKind {
    /// In-process backend.
    Memory { name: String },
    /// Git repository on disk.
    Git { path: PathBuf },
}

/// Parsed connection string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectionConfig {
    /// Target backend.
    pub kind: BackendKind,
    /// Pool size for the memory backend.
    pub max_connections: usize,
    /// Initialize the git repository if it doesn't exist.
    pub create_if_missing: bool,
}

impl ConnectionConfig {
    fn with_kind(kind: BackendKind) -> Self {
        Self {
            kind,
            max_connections: DEFAULT_MAX_CONNECTIONS,
            create_if_missing: true,
        }
    }

    /// Configuration for a named memory backend.
    pub fn memory(name: impl Into<String>) -> Self {
        Self::with_kind(BackendKind::Memory { name: name.into() })
    }

    /// Configuration for a git backend at the given path.
    pub fn git(path: impl Into<PathBuf>) -> Self {
        Self::with_kind(BackendKind::Git { path: path.into() })
    }

    /// Set max_connections.
    pub fn max_connections(mut self, value: usize) -> Self {
        self.max_connections = value;
        self
    }

    /// Set create_if_missing flag.
    pub fn create_if_missing(mut self, value: bool) -> Self {
        self.create_if_missing = value;
        self
    }
}

fn invalid(input: &str, reason: impl fmt::Display) -> TxError {
    TxError::InvalidConnectionString(format!("{}: {}", input, reason))
}

fn parse_bool(input: &str, key: &str, value: &str) -> Result<bool, TxError> {
    match value {
        "true" | "1" => Ok(true),
        "false" | "0" => Ok(false),
        _ => Err(invalid(input, format!("{} must be true or false", key))),
    }
}

impl FromStr for ConnectionConfig {
    type Err = TxError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let (scheme, rest) = input
            .split_once("://")
            .ok_or_else(|| invalid(input, "missing scheme"))?;
        let (target, options) = match rest.split_once('?') {
            Some((target, options)) => (target, Some(options)),
            None => (rest, None),
        };

        let mut config = match scheme {
            "memory" => {
                let name = if target.is_empty() {
                    DEFAULT_MEMORY_NAME
                } else {
                    target
                };
                Self::memory(name)
            }
            "git" => {
                if target.is_empty() {
                    return Err(invalid(input, "git:// requires a repository path"));
                }
                Self::git(target)
            }
            other => return Err(invalid(input, format!("unknown scheme '{}'", other))),
        };

        for pair in options.into_iter().flat_map(|o| o.split('&')) {
            if pair.is_empty() {
                continue;
            }
            let (key, value) = pair
                .split_once('=')
                .ok_or_else(|| invalid(input, format!("option '{}' has no value", pair)))?;

            match (&config.kind, key) {
                (BackendKind::Memory { .. }, "max_connections") => {
                    let max = value
                        .parse::<usize>()
                        .ok()
                        .filter(|n| *n > 0)
                        .ok_or_else(|| {
                            invalid(input, "max_connections must be a positive integer")
                        })?;
                    config.max_connections = max;
                }
                (BackendKind::Git { .. }, "create_if_missing") => {
                    config.create_if_missing = parse_bool(input, key, value)?;
                }
                _ => {
                    return Err(invalid(
                        input,
                        format!("unknown option '{}' for {}://", key, scheme),
                    ))
                }
            }
        }

        Ok(config)
    }
}

impl fmt::Display for ConnectionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            BackendKind::Memory { name } => write!(
                f,
                "memory://{}?max_connections={}",
                name, self.max_connections
            ),
            BackendKind::Git { path } => write!(
                f,
                "git://{}?create_if_missing={}",
                path.display(),
                self.create_if_missing
            ),
        }
    }
}
