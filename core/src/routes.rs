//! Route classification and the navigation sink.

use std::collections::HashMap;
use std::fmt;

use gatekeep_config::RouteEntry;
use gatekeep_types::{AuthAssumption, RouteMeta, RoutePath};

/// Resolves a path to the metadata the host router declares for it.
pub trait RouteTable {
    /// `None` when the path matches no declared route.
    fn resolve(&self, path: &RoutePath) -> Option<RouteMeta>;
}

impl<F> RouteTable for F
where
    F: Fn(&RoutePath) -> Option<RouteMeta>,
{
    fn resolve(&self, path: &RoutePath) -> Option<RouteMeta> {
        self(path)
    }
}

/// Route table from declared entries, matched on the bare path.
#[derive(Debug, Clone, Default)]
pub struct StaticRouteTable {
    routes: HashMap<String, RouteMeta>,
}

impl StaticRouteTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from config entries. The first entry for a path wins.
    #[must_use]
    pub fn from_entries(entries: &[RouteEntry]) -> Self {
        let mut table = Self::new();
        for entry in entries {
            table
                .routes
                .entry(entry.path.path().to_string())
                .or_insert_with(|| entry.meta());
        }
        table
    }

    pub fn insert(&mut self, path: &RoutePath, meta: RouteMeta) {
        self.routes.insert(path.path().to_string(), meta);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.routes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

impl RouteTable for StaticRouteTable {
    fn resolve(&self, path: &RoutePath) -> Option<RouteMeta> {
        self.routes.get(path.path()).copied()
    }
}

/// Applies the login-page rule and the undeclared-route assumption on top
/// of a [`RouteTable`].
pub struct RouteClassifier {
    table: Box<dyn RouteTable>,
    login_path: RoutePath,
    assumption: AuthAssumption,
}

impl fmt::Debug for RouteClassifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RouteClassifier")
            .field("login_path", &self.login_path)
            .field("assumption", &self.assumption)
            .finish_non_exhaustive()
    }
}

impl RouteClassifier {
    pub fn new(
        table: impl RouteTable + 'static,
        login_path: RoutePath,
        assumption: AuthAssumption,
    ) -> Self {
        Self {
            table: Box::new(table),
            login_path,
            assumption,
        }
    }

    #[must_use]
    pub fn login_path(&self) -> &RoutePath {
        &self.login_path
    }

    /// Any path containing the configured login path counts as the login page.
    #[must_use]
    pub fn is_login_page(&self, path: &RoutePath) -> bool {
        path.contains(self.login_path.path())
    }

    /// Login page: never. Declared routes: their flag. Anything else: the
    /// configured assumption.
    #[must_use]
    pub fn requires_auth(&self, path: &RoutePath) -> bool {
        if self.is_login_page(path) {
            return false;
        }
        self.table
            .resolve(path)
            .and_then(|meta| meta.requires_auth)
            .unwrap_or(self.assumption.requires_auth())
    }

    #[must_use]
    pub fn is_public(&self, path: &RoutePath) -> bool {
        !self.requires_auth(path)
    }
}

/// Where the guard sends redirects, and where it reads the current location.
pub trait Navigator {
    fn current_path(&self) -> RoutePath;

    /// Fire-and-forget push to a new location.
    fn redirect_to(&mut self, path: &RoutePath);
}

/// In-memory navigator that records every redirect and treats it as
/// committed.
#[derive(Debug, Clone)]
pub struct HistoryNavigator {
    current: RoutePath,
    redirects: Vec<RoutePath>,
}

impl HistoryNavigator {
    #[must_use]
    pub fn new(start: RoutePath) -> Self {
        Self {
            current: start,
            redirects: Vec::new(),
        }
    }

    /// Commit a navigation that happened outside the guard (an allowed transition).
    pub fn commit(&mut self, path: RoutePath) {
        self.current = path;
    }

    #[must_use]
    pub fn redirects(&self) -> &[RoutePath] {
        &self.redirects
    }

    pub fn take_redirects(&mut self) -> Vec<RoutePath> {
        std::mem::take(&mut self.redirects)
    }
}

impl Navigator for HistoryNavigator {
    fn current_path(&self) -> RoutePath {
        self.current.clone()
    }

    fn redirect_to(&mut self, path: &RoutePath) {
        tracing::debug!(to = %path, from = %self.current, "redirect");
        self.current = path.clone();
        self.redirects.push(path.clone());
    }
}
