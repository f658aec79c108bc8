//! Shared test utilities and fixtures
//!
//! A small route table, a guard wired to a recording navigator, and a
//! decision sink that stands in for the router's `next` callback.

#![allow(dead_code)]

use std::cell::RefCell;
use std::rc::Rc;

use gatekeep_core::{
    GuardOptions, HistoryNavigator, NavigationGuard, SessionStore, StaticRouteTable,
};
use gatekeep_types::{Decision, RouteMeta, RoutePath};

pub type Guard = NavigationGuard<String, HistoryNavigator>;

pub fn path(value: &str) -> RoutePath {
    RoutePath::new(value).expect("test paths are non-empty")
}

/// `/dashboard` and `/settings` are protected, `/about` is public, and
/// `/help` is declared without a flag.
pub fn app_routes() -> StaticRouteTable {
    let mut table = StaticRouteTable::new();
    table.insert(&path("/dashboard"), RouteMeta::protected());
    table.insert(&path("/settings"), RouteMeta::protected());
    table.insert(&path("/about"), RouteMeta::public());
    table.insert(&path("/help"), RouteMeta::undeclared());
    table
}

pub fn options() -> GuardOptions<String> {
    GuardOptions::default().with_post_auth_path(path("/dashboard"))
}

pub fn install(options: GuardOptions<String>) -> (Guard, SessionStore<String>) {
    let session = SessionStore::new();
    let guard = NavigationGuard::install(
        options,
        app_routes(),
        session.clone(),
        HistoryNavigator::new(path("/")),
    );
    (guard, session)
}

/// Records every decision handed to the callbacks it creates.
#[derive(Debug, Clone, Default)]
pub struct DecisionSink {
    seen: Rc<RefCell<Vec<(String, Decision)>>>,
}

impl DecisionSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// A decision callback tagged with `label`.
    pub fn callback(&self, label: &str) -> impl FnOnce(Decision) + 'static {
        let seen = Rc::clone(&self.seen);
        let label = label.to_string();
        move |decision| seen.borrow_mut().push((label, decision))
    }

    pub fn decisions(&self) -> Vec<(String, Decision)> {
        self.seen.borrow().clone()
    }

    pub fn for_label(&self, label: &str) -> Vec<Decision> {
        self.seen
            .borrow()
            .iter()
            .filter(|(l, _)| l == label)
            .map(|(_, d)| d.clone())
            .collect()
    }
}
