//! Configuration file for gatekeep.
//!
//! The file lives at `~/.gatekeep/config.toml` unless a path is given
//! explicitly. Only `[guard].transform_timeout_ms` is mandatory; everything
//! else has a documented default.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use gatekeep_types::{AuthAssumption, RouteMeta, RoutePath};

pub const DEFAULT_LOGIN_PATH: &str = "/login";
pub const DEFAULT_PUBLIC_LANDING: &str = "/login";

fn default_login_path() -> RoutePath {
    RoutePath::new(DEFAULT_LOGIN_PATH).expect("DEFAULT_LOGIN_PATH must be non-empty")
}

fn default_public_landing() -> RoutePath {
    RoutePath::new(DEFAULT_PUBLIC_LANDING).expect("DEFAULT_PUBLIC_LANDING must be non-empty")
}

#[derive(Debug, Clone, Deserialize)]
pub struct GatekeepConfig {
    pub guard: GuardSection,
    /// Declared routes for the static route table.
    #[serde(default)]
    pub routes: Vec<RouteEntry>,
    pub logging: Option<LoggingConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GuardSection {
    /// Any path containing this text is treated as the login page.
    #[serde(default = "default_login_path")]
    pub login_path: RoutePath,
    /// Where to send a user once they are signed in.
    pub post_auth_path: Option<RoutePath>,
    /// Where to send a user who just signed out.
    #[serde(default = "default_public_landing")]
    pub public_landing: RoutePath,
    #[serde(default)]
    pub assume_if_undefined: AuthAssumption,
    /// Deadline for the user-model transform. Required.
    pub transform_timeout_ms: u64,
}

impl GuardSection {
    #[must_use]
    pub fn transform_timeout(&self) -> Duration {
        Duration::from_millis(self.transform_timeout_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RouteEntry {
    pub path: RoutePath,
    pub requires_auth: Option<bool>,
}

impl RouteEntry {
    #[must_use]
    pub fn meta(&self) -> RouteMeta {
        RouteMeta {
            requires_auth: self.requires_auth,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LoggingConfig {
    /// `tracing_subscriber::EnvFilter` directive, used when `RUST_LOG` is unset.
    pub filter: Option<String>,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config at {}: {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse config at {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

impl ConfigError {
    pub fn path(&self) -> &PathBuf {
        match self {
            ConfigError::Read { path, .. } | ConfigError::Parse { path, .. } => path,
        }
    }
}

/// Non-fatal configuration problems. The guard still installs, but some
/// behaviour is degraded until the file is fixed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigWarning {
    #[error("post_auth_path is not set; redirects after sign-in will do nothing")]
    MissingPostAuthPath,
    #[error("transform_timeout_ms is 0; every user-model transform will time out")]
    ZeroTransformTimeout,
    #[error("route {path} is declared more than once; the first entry wins")]
    DuplicateRoute { path: String },
}

impl GatekeepConfig {
    pub fn load() -> Result<Option<Self>, ConfigError> {
        let path = match config_path() {
            Some(path) => path,
            None => return Ok(None),
        };
        if !path.exists() {
            return Ok(None);
        }
        Self::load_from(&path).map(Some)
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(err) => {
                tracing::warn!("Failed to read config at {:?}: {}", path, err);
                return Err(ConfigError::Read {
                    path: path.to_path_buf(),
                    source: err,
                });
            }
        };
        Self::parse(&content).map_err(|err| match err {
            ConfigError::Parse { source, .. } => {
                tracing::warn!("Failed to parse config at {:?}: {}", path, source);
                ConfigError::Parse {
                    path: path.to_path_buf(),
                    source,
                }
            }
            other => other,
        })
    }

    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|source| ConfigError::Parse {
            path: PathBuf::new(),
            source,
        })
    }

    #[must_use]
    pub fn path() -> Option<PathBuf> {
        config_path()
    }

    /// Collect every non-fatal problem, in file order.
    #[must_use]
    pub fn validate(&self) -> Vec<ConfigWarning> {
        let mut warnings = Vec::new();
        if self.guard.post_auth_path.is_none() {
            warnings.push(ConfigWarning::MissingPostAuthPath);
        }
        if self.guard.transform_timeout_ms == 0 {
            warnings.push(ConfigWarning::ZeroTransformTimeout);
        }
        let mut seen = HashSet::new();
        for route in &self.routes {
            let key = route.path.path().to_string();
            if !seen.insert(key.clone()) {
                warnings.push(ConfigWarning::DuplicateRoute { path: key });
            }
        }
        warnings
    }

    /// Log every validation warning once. Returns the warnings for callers
    /// that also want to surface them elsewhere.
    pub fn report_warnings(&self) -> Vec<ConfigWarning> {
        let warnings = self.validate();
        for warning in &warnings {
            tracing::warn!("{warning}");
        }
        warnings
    }

    #[must_use]
    pub fn log_filter(&self) -> Option<&str> {
        self.logging.as_ref().and_then(|l| l.filter.as_deref())
    }
}

#[must_use]
pub fn config_path() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".gatekeep").join("config.toml"))
}
