//! Navigation authorization while the session check is pending.
//!
//! # States
//!
//! ```text
//! Unchecked --(first session notification)--> Checked
//! ```
//!
//! While `Unchecked`, every transition request is parked in a single slot
//! (latest request wins) and its decision callback is held back. The first
//! session notification flips the guard to `Checked`, resolves the parked
//! request (or pushes a default destination when nothing was parked), and
//! announces "session checked" once. After that, transitions are decided
//! synchronously and later notifications are treated as sign-in / sign-out.
//!
//! `Checked` is terminal. Re-initializing the [`SessionStore`] does not
//! send the guard back to `Unchecked`; the store's next first check is
//! handled like any other session change.

use std::fmt;
use std::future::Future;
use std::rc::Rc;

use futures_util::FutureExt;
use futures_util::future::LocalBoxFuture;
use thiserror::Error;

use gatekeep_config::{ConfigWarning, DEFAULT_LOGIN_PATH, DEFAULT_PUBLIC_LANDING, GuardSection};
use gatekeep_types::{AuthAssumption, Decision, RoutePath, SubscriptionId};

use crate::dispatcher::{Delivery, DispatchError, EventDispatcher, SubscribeOptions};
use crate::routes::{Navigator, RouteClassifier, RouteTable};
use crate::session::{SessionError, SessionStore, SessionTransition};

/// Snapshot handed to a post-auth resolver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GuardContext {
    pub current_path: RoutePath,
    pub login_path: RoutePath,
    pub public_landing: RoutePath,
}

pub type PostAuthResolver<U> =
    Rc<dyn Fn(GuardContext, Rc<U>) -> LocalBoxFuture<'static, anyhow::Result<RoutePath>>>;

/// Where a freshly signed-in user goes.
pub enum PostAuthPath<U> {
    Path(RoutePath),
    /// Computed per user, e.g. for role-based landing pages.
    Resolver(PostAuthResolver<U>),
}

impl<U> Clone for PostAuthPath<U> {
    fn clone(&self) -> Self {
        match self {
            Self::Path(path) => Self::Path(path.clone()),
            Self::Resolver(resolver) => Self::Resolver(Rc::clone(resolver)),
        }
    }
}

impl<U> fmt::Debug for PostAuthPath<U> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Path(path) => f.debug_tuple("Path").field(path).finish(),
            Self::Resolver(_) => f.write_str("Resolver(..)"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct GuardOptions<U> {
    pub login_path: RoutePath,
    pub post_auth_path: Option<PostAuthPath<U>>,
    pub public_landing: RoutePath,
    pub assume_if_undefined: AuthAssumption,
}

impl<U> Default for GuardOptions<U> {
    fn default() -> Self {
        Self {
            login_path: RoutePath::new(DEFAULT_LOGIN_PATH)
                .expect("DEFAULT_LOGIN_PATH must be non-empty"),
            post_auth_path: None,
            public_landing: RoutePath::new(DEFAULT_PUBLIC_LANDING)
                .expect("DEFAULT_PUBLIC_LANDING must be non-empty"),
            assume_if_undefined: AuthAssumption::default(),
        }
    }
}

impl<U: 'static> GuardOptions<U> {
    #[must_use]
    pub fn from_config(section: &GuardSection) -> Self {
        Self {
            login_path: section.login_path.clone(),
            post_auth_path: section.post_auth_path.clone().map(PostAuthPath::Path),
            public_landing: section.public_landing.clone(),
            assume_if_undefined: section.assume_if_undefined,
        }
    }

    pub fn with_post_auth_path(mut self, path: RoutePath) -> Self {
        self.post_auth_path = Some(PostAuthPath::Path(path));
        self
    }

    pub fn with_post_auth_resolver<F, Fut>(mut self, resolver: F) -> Self
    where
        F: Fn(GuardContext, Rc<U>) -> Fut + 'static,
        Fut: Future<Output = anyhow::Result<RoutePath>> + 'static,
    {
        self.post_auth_path = Some(PostAuthPath::Resolver(Rc::new(move |ctx, user| {
            resolver(ctx, user).boxed_local()
        })));
        self
    }

    #[must_use]
    pub fn warnings(&self) -> Vec<ConfigWarning> {
        if self.post_auth_path.is_none() {
            vec![ConfigWarning::MissingPostAuthPath]
        } else {
            Vec::new()
        }
    }
}

/// Decision callback supplied by the router for one transition.
pub type Decide = Box<dyn FnOnce(Decision)>;

/// A transition parked until the session check completes.
pub struct DeferredNavigation {
    pub to: RoutePath,
    pub from: RoutePath,
    decide: Decide,
}

impl fmt::Debug for DeferredNavigation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeferredNavigation")
            .field("to", &self.to)
            .field("from", &self.from)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardPhase {
    Unchecked,
    Checked,
}

/// What completing the session check did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resumption {
    /// The parked transition was resolved with this decision.
    Replayed { to: RoutePath, decision: Decision },
    /// Nothing was parked; the guard pushed the default destination.
    Redirected(RoutePath),
    /// Nothing was parked and no post-auth destination could be resolved.
    Stranded,
}

#[derive(Debug, Error)]
pub enum GuardError {
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error("session-checked listener failed")]
    Dispatch(#[from] DispatchError),
}

pub struct NavigationGuard<U, N> {
    options: GuardOptions<U>,
    classifier: RouteClassifier,
    session: SessionStore<U>,
    navigator: N,
    deferred: Option<DeferredNavigation>,
    phase: GuardPhase,
    session_checked: EventDispatcher<Option<Rc<U>>>,
}

impl<U, N> fmt::Debug for NavigationGuard<U, N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NavigationGuard")
            .field("classifier", &self.classifier)
            .field("session", &self.session)
            .field("deferred", &self.deferred)
            .field("phase", &self.phase)
            .finish_non_exhaustive()
    }
}

impl<U: 'static, N: Navigator> NavigationGuard<U, N> {
    /// Build the guard and initialize `session`. Configuration problems are
    /// logged once here and never fail installation.
    pub fn install(
        options: GuardOptions<U>,
        routes: impl RouteTable + 'static,
        session: SessionStore<U>,
        navigator: N,
    ) -> Self {
        for warning in options.warnings() {
            tracing::warn!("{warning}");
        }
        session.init();
        let classifier = RouteClassifier::new(
            routes,
            options.login_path.clone(),
            options.assume_if_undefined,
        );
        Self {
            options,
            classifier,
            session,
            navigator,
            deferred: None,
            phase: GuardPhase::Unchecked,
            session_checked: EventDispatcher::new(),
        }
    }

    #[must_use]
    pub fn phase(&self) -> GuardPhase {
        self.phase
    }

    #[must_use]
    pub fn classifier(&self) -> &RouteClassifier {
        &self.classifier
    }

    #[must_use]
    pub fn session(&self) -> &SessionStore<U> {
        &self.session
    }

    #[must_use]
    pub fn navigator(&self) -> &N {
        &self.navigator
    }

    pub fn navigator_mut(&mut self) -> &mut N {
        &mut self.navigator
    }

    #[must_use]
    pub fn deferred(&self) -> Option<&DeferredNavigation> {
        self.deferred.as_ref()
    }

    /// Run `callback` once the session check completes, or right away if
    /// it already has.
    pub fn on_session_checked<F>(&self, callback: F) -> Result<SubscriptionId, DispatchError>
    where
        F: Fn(Option<&Rc<U>>) -> Delivery + 'static,
    {
        self.session_checked.subscribe(
            move |_, user: &Option<Rc<U>>| callback(user.as_ref()),
            SubscribeOptions::default().once(),
        )
    }

    /// Register a callback-less waiter for the session check.
    pub fn mount(&self) -> Result<SubscriptionId, DispatchError> {
        self.session_checked
            .subscribe_passive(SubscribeOptions::default().once())
    }

    #[must_use]
    pub fn session_checked_events(&self) -> &EventDispatcher<Option<Rc<U>>> {
        &self.session_checked
    }

    /// Decide a transition against the current session. Never fails: denial
    /// is a redirect to the login path.
    #[must_use]
    pub fn authorize(&self, to: &RoutePath, from: &RoutePath) -> Decision {
        let requires_auth = self.classifier.requires_auth(to);
        let decision = if !requires_auth || self.session.is_authenticated() {
            Decision::Allow
        } else {
            Decision::RedirectTo(self.options.login_path.clone())
        };
        tracing::debug!(%to, %from, requires_auth, %decision, "authorized transition");
        decision
    }

    /// Router hook for every attempted navigation. Returns the decision when
    /// it was made immediately, `None` when the transition was parked.
    pub fn guard_transition<F>(
        &mut self,
        to: RoutePath,
        from: RoutePath,
        decide: F,
    ) -> Option<Decision>
    where
        F: FnOnce(Decision) + 'static,
    {
        if self.phase == GuardPhase::Checked {
            let decision = self.authorize(&to, &from);
            decide(decision.clone());
            return Some(decision);
        }

        tracing::debug!(%to, %from, "session check pending; deferring navigation");
        let parked = DeferredNavigation {
            to,
            from,
            decide: Box::new(decide),
        };
        if let Some(superseded) = self.deferred.replace(parked) {
            tracing::debug!(dropped = %superseded.to, "deferred navigation superseded");
        }
        None
    }

    /// Entry point for the auth source. The first call completes the session
    /// check; later calls react to sign-in and sign-out, whatever the store
    /// reports as its transition.
    pub async fn on_session_change(
        &mut self,
        user: Option<U>,
    ) -> Result<SessionTransition, GuardError> {
        let transition = self.session.apply(user)?;
        if self.phase == GuardPhase::Unchecked {
            self.resume_deferred().await?;
            return Ok(transition);
        }

        let current = self.navigator.current_path();
        match self.session.current_user() {
            Some(user) if self.classifier.is_public(&current) => {
                tracing::info!(from = %current, "user signed in on a public route");
                if let Some(destination) = self.post_auth_destination(&user).await {
                    self.navigator.redirect_to(&destination);
                }
            }
            Some(_) => {}
            None => {
                tracing::info!(from = %current, "user signed out");
                let landing = self.options.public_landing.clone();
                self.navigator.redirect_to(&landing);
            }
        }
        Ok(transition)
    }

    /// Settle whatever was parked while the session check was pending, then
    /// announce the check. Moves the guard to `Checked` and runs at most
    /// once; later calls (and calls before the store has seen a session
    /// notification) return `Ok(None)`.
    pub async fn resume_deferred(&mut self) -> Result<Option<Resumption>, GuardError> {
        if self.phase == GuardPhase::Checked || !self.session.is_checked() {
            return Ok(None);
        }
        self.phase = GuardPhase::Checked;

        let user = self.session.current_user();
        let resumption = match self.deferred.take() {
            Some(parked) => {
                let DeferredNavigation { to, from, decide } = parked;
                let decision = match &user {
                    // Don't bounce a signed-in user onto the login page.
                    Some(user) if self.classifier.is_login_page(&to) => {
                        match self.post_auth_destination(user).await {
                            Some(destination) => Decision::RedirectTo(destination),
                            None => self.authorize(&to, &from),
                        }
                    }
                    // A protected target with no user resolves to the login
                    // redirect here.
                    _ => self.authorize(&to, &from),
                };
                tracing::info!(%to, %decision, "resuming deferred navigation");
                decide(decision.clone());
                Resumption::Replayed { to, decision }
            }
            None => {
                let destination = match &user {
                    Some(user) => self.post_auth_destination(user).await,
                    None => Some(self.options.login_path.clone()),
                };
                match destination {
                    Some(destination) => {
                        tracing::info!(
                            to = %destination,
                            authenticated = user.is_some(),
                            "session checked; no deferred navigation"
                        );
                        self.navigator.redirect_to(&destination);
                        Resumption::Redirected(destination)
                    }
                    None => Resumption::Stranded,
                }
            }
        };

        self.session_checked.dispatch(user)?;
        Ok(Some(resumption))
    }

    fn context(&self) -> GuardContext {
        GuardContext {
            current_path: self.navigator.current_path(),
            login_path: self.options.login_path.clone(),
            public_landing: self.options.public_landing.clone(),
        }
    }

    async fn post_auth_destination(&self, user: &Rc<U>) -> Option<RoutePath> {
        match &self.options.post_auth_path {
            None => {
                tracing::warn!("{}", ConfigWarning::MissingPostAuthPath);
                None
            }
            Some(PostAuthPath::Path(path)) => Some(path.clone()),
            Some(PostAuthPath::Resolver(resolver)) => {
                let resolver = Rc::clone(resolver);
                match resolver(self.context(), Rc::clone(user)).await {
                    Ok(path) => Some(path),
                    Err(err) => {
                        tracing::warn!(error = %err, "post-auth resolver failed");
                        None
                    }
                }
            }
        }
    }
}
