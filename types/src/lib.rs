//! Core domain types for gatekeep.
//!
//! This crate contains pure domain types with no IO, no async, and minimal dependencies.
//! Everything here can be used from any layer of the integration.

// Pedantic lint configuration - these are intentional design choices
#![allow(clippy::missing_errors_doc)] // Result-returning functions are self-explanatory

mod ids;
pub use ids::SubscriptionId;

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

// ============================================================================
// Route Paths
// ============================================================================

/// A navigation target, guaranteed to be non-empty (after trimming).
///
/// The raw text is kept as given, including any query string or fragment;
/// [`RoutePath::path`] returns the part used for route-table lookups.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RoutePath(String);

#[derive(Debug, Error, PartialEq, Eq)]
#[error("route path must not be empty")]
pub struct RoutePathError;

impl RoutePath {
    pub fn new(value: impl Into<String>) -> Result<Self, RoutePathError> {
        let value = value.into();
        if value.trim().is_empty() {
            Err(RoutePathError)
        } else {
            Ok(Self(value))
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The path with query string and fragment stripped.
    #[must_use]
    pub fn path(&self) -> &str {
        let end = self.0.find(['?', '#']).unwrap_or(self.0.len());
        &self.0[..end]
    }

    /// Substring match, used to recognise a login page such as `/login?next=/x`.
    #[must_use]
    pub fn contains(&self, segment: &str) -> bool {
        self.0.contains(segment)
    }
}

impl TryFrom<String> for RoutePath {
    type Error = RoutePathError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl TryFrom<&str> for RoutePath {
    type Error = RoutePathError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<RoutePath> for String {
    fn from(value: RoutePath) -> Self {
        value.0
    }
}

impl std::ops::Deref for RoutePath {
    type Target = str;

    fn deref(&self) -> &Self::Target {
        self.as_str()
    }
}

impl AsRef<str> for RoutePath {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

impl fmt::Display for RoutePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ============================================================================
// Route Classification
// ============================================================================

/// What to assume about a route that declares no `requires_auth` metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthAssumption {
    /// Undeclared routes require a signed-in user.
    #[default]
    Auth,
    /// Undeclared routes are open to guests.
    Public,
}

impl AuthAssumption {
    #[must_use]
    pub const fn requires_auth(self) -> bool {
        matches!(self, Self::Auth)
    }
}

/// Metadata a route table reports for a resolved route.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RouteMeta {
    /// Explicit declaration; `None` defers to the configured [`AuthAssumption`].
    #[serde(default)]
    pub requires_auth: Option<bool>,
}

impl RouteMeta {
    #[must_use]
    pub const fn protected() -> Self {
        Self {
            requires_auth: Some(true),
        }
    }

    #[must_use]
    pub const fn public() -> Self {
        Self {
            requires_auth: Some(false),
        }
    }

    #[must_use]
    pub const fn undeclared() -> Self {
        Self {
            requires_auth: None,
        }
    }
}

// ============================================================================
// Decisions
// ============================================================================

/// Outcome of authorizing a route transition.
///
/// Policy denial is never an error: it is always expressed as a redirect.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "decision", content = "to", rename_all = "snake_case")]
pub enum Decision {
    Allow,
    RedirectTo(RoutePath),
}

impl Decision {
    #[must_use]
    pub fn redirect_target(&self) -> Option<&RoutePath> {
        match self {
            Self::Allow => None,
            Self::RedirectTo(path) => Some(path),
        }
    }
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Allow => f.write_str("allow"),
            Self::RedirectTo(path) => write!(f, "redirect to {path}"),
        }
    }
}
