//! Keeps an application-level user model in step with the session.
//!
//! A [`UserModelSync`] follows its [`SessionStore`]: every session update
//! marks the profile stale and wakes whoever is driving the sync through
//! [`UserModelSync::next_change`], [`UserModelSync::run`] or
//! [`UserModelSync::sync_pending`]. On each refresh the auth half of the
//! profile is updated from the store and announced; the model half is then
//! rebuilt by the configured builder under a [`BoundedWait`] deadline.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::future::Future;
use std::rc::Rc;

use futures_util::FutureExt;
use futures_util::future::LocalBoxFuture;
use thiserror::Error;
use tokio::sync::Notify;

use gatekeep_config::GuardSection;
use gatekeep_types::SubscriptionId;

use crate::dispatcher::{Delivery, DispatchError, EventDispatcher, SubscribeOptions};
use crate::race::{BoundedWait, RaceError};
use crate::session::SessionStore;

const TRANSFORM_OPERATION: &str = "user model transform";

/// Builds the application model for a signed-in user. `Ok(None)` counts as
/// a failed transform.
pub type ModelBuilder<U, M> =
    Rc<dyn Fn(Rc<U>) -> LocalBoxFuture<'static, anyhow::Result<Option<M>>>>;

#[derive(Debug)]
pub struct UserProfile<U, M> {
    pub auth: Option<Rc<U>>,
    /// `None` while signed out or until the transform resolves.
    pub model: Option<Rc<M>>,
    pub logged_in: bool,
}

impl<U, M> Clone for UserProfile<U, M> {
    fn clone(&self) -> Self {
        Self {
            auth: self.auth.clone(),
            model: self.model.clone(),
            logged_in: self.logged_in,
        }
    }
}

impl<U, M> Default for UserProfile<U, M> {
    fn default() -> Self {
        Self {
            auth: None,
            model: None,
            logged_in: false,
        }
    }
}

/// Subscriber-owned cell that every profile dispatch writes into before the
/// callback runs.
pub struct ProfileSlot<U, M>(Rc<RefCell<Option<UserProfile<U, M>>>>);

impl<U, M> ProfileSlot<U, M> {
    #[must_use]
    pub fn new() -> Self {
        Self(Rc::new(RefCell::new(None)))
    }

    #[must_use]
    pub fn get(&self) -> Option<UserProfile<U, M>> {
        self.0.borrow().clone()
    }

    #[must_use]
    pub fn is_bound(&self) -> bool {
        self.0.borrow().is_some()
    }

    fn bind(&self, profile: &UserProfile<U, M>) {
        *self.0.borrow_mut() = Some(profile.clone());
    }
}

impl<U, M> Clone for ProfileSlot<U, M> {
    fn clone(&self) -> Self {
        Self(Rc::clone(&self.0))
    }
}

impl<U, M> Default for ProfileSlot<U, M> {
    fn default() -> Self {
        Self::new()
    }
}

impl<U, M> fmt::Debug for ProfileSlot<U, M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProfileSlot")
            .field("bound", &self.is_bound())
            .finish()
    }
}

fn bind_profile<U, M>(slot: &ProfileSlot<U, M>, profile: &UserProfile<U, M>) {
    slot.bind(profile);
}

#[derive(Debug, Error)]
pub enum ProfileError {
    #[error(transparent)]
    Transform(#[from] RaceError),
    #[error("profile listener failed")]
    Dispatch(#[from] DispatchError),
}

type ProfileEvents<U, M> = EventDispatcher<UserProfile<U, M>, ProfileSlot<U, M>>;

pub struct UserModelSync<U, M> {
    session: SessionStore<U>,
    builder: Option<ModelBuilder<U, M>>,
    wait: BoundedWait,
    profile: RefCell<UserProfile<U, M>>,
    auth_state_changed: ProfileEvents<U, M>,
    model_changed: ProfileEvents<U, M>,
    /// Set by the session follower, cleared when a refresh starts.
    pending: Rc<Cell<bool>>,
    notify: Rc<Notify>,
    follower: Cell<Option<SubscriptionId>>,
}

impl<U, M> Drop for UserModelSync<U, M> {
    fn drop(&mut self) {
        if let Some(id) = self.follower.take() {
            self.session.checked_events().unsubscribe(id);
        }
    }
}

impl<U, M> fmt::Debug for UserModelSync<U, M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let profile = self.profile.borrow();
        f.debug_struct("UserModelSync")
            .field("has_builder", &self.builder.is_some())
            .field("timeout", &self.wait.timeout())
            .field("logged_in", &profile.logged_in)
            .field("model_resolved", &profile.model.is_some())
            .field("pending", &self.pending.get())
            .finish_non_exhaustive()
    }
}

impl<U: 'static, M: 'static> UserModelSync<U, M> {
    /// A sync that follows `session` from now on. If the session is
    /// already checked, the current state is pending straight away.
    #[must_use]
    pub fn new(session: SessionStore<U>, wait: BoundedWait) -> Self {
        let sync = Self {
            session,
            builder: None,
            wait,
            profile: RefCell::new(UserProfile::default()),
            auth_state_changed: EventDispatcher::new(),
            model_changed: EventDispatcher::new(),
            pending: Rc::new(Cell::new(false)),
            notify: Rc::new(Notify::new()),
            follower: Cell::new(None),
        };
        if let Err(err) = sync.follow() {
            tracing::warn!(error = %err, "user model sync could not follow the session");
        }
        sync
    }

    #[must_use]
    pub fn from_config(session: SessionStore<U>, section: &GuardSection) -> Self {
        Self::new(session, BoundedWait::new(section.transform_timeout()))
    }

    pub fn with_builder<F, Fut>(mut self, builder: F) -> Self
    where
        F: Fn(Rc<U>) -> Fut + 'static,
        Fut: Future<Output = anyhow::Result<Option<M>>> + 'static,
    {
        self.builder = Some(Rc::new(move |user| builder(user).boxed_local()));
        self
    }

    #[must_use]
    pub fn has_builder(&self) -> bool {
        self.builder.is_some()
    }

    #[must_use]
    pub fn wait(&self) -> &BoundedWait {
        &self.wait
    }

    #[must_use]
    pub fn profile(&self) -> UserProfile<U, M> {
        self.profile.borrow().clone()
    }

    /// Subscribe to the session's check events. A no-op while the existing
    /// subscription is live; call again after the store has been disposed
    /// and re-initialized.
    pub fn follow(&self) -> Result<SubscriptionId, DispatchError> {
        if let Some(id) = self.follower.get()
            && self.session.checked_events().is_subscribed(id)
        {
            return Ok(id);
        }
        let pending = Rc::clone(&self.pending);
        let notify = Rc::clone(&self.notify);
        let id = self.session.on_checked(move |_| {
            pending.set(true);
            notify.notify_one();
            Ok(())
        })?;
        self.follower.set(Some(id));
        Ok(id)
    }

    #[must_use]
    pub fn is_following(&self) -> bool {
        self.follower
            .get()
            .is_some_and(|id| self.session.checked_events().is_subscribed(id))
    }

    /// True when the session changed since the last refresh started.
    #[must_use]
    pub fn has_pending_change(&self) -> bool {
        self.pending.get()
    }

    /// Refresh if the session changed since the last refresh, otherwise
    /// `None`.
    pub async fn sync_pending(&self) -> Option<Result<UserProfile<U, M>, ProfileError>> {
        if !self.pending.get() {
            return None;
        }
        Some(self.refresh().await)
    }

    /// Wait for the next session change and refresh for it. Returns at once
    /// when a change is already pending.
    pub async fn next_change(&self) -> Result<UserProfile<U, M>, ProfileError> {
        loop {
            if let Some(result) = self.sync_pending().await {
                return result;
            }
            self.notify.notified().await;
        }
    }

    /// Refresh on every session change until a profile listener fails.
    /// Transform failures are logged by the refresh and do not stop the loop.
    pub async fn run(&self) -> Result<(), ProfileError> {
        loop {
            match self.next_change().await {
                Ok(_) | Err(ProfileError::Transform(_)) => {}
                Err(err @ ProfileError::Dispatch(_)) => return Err(err),
            }
        }
    }

    /// Pull the current user from the session and bring the profile up to
    /// date. A transform failure is logged and returned; the auth half of
    /// the profile is already updated by then and the model stays unset.
    pub async fn refresh(&self) -> Result<UserProfile<U, M>, ProfileError> {
        self.pending.set(false);
        let user = self.session.current_user();
        let snapshot = {
            let mut profile = self.profile.borrow_mut();
            profile.logged_in = user.is_some();
            profile.auth.clone_from(&user);
            profile.model = None;
            profile.clone()
        };
        self.auth_state_changed
            .dispatch_with(snapshot.clone(), bind_profile::<U, M>)?;

        let Some(user) = user else {
            self.model_changed
                .dispatch_with(snapshot.clone(), bind_profile::<U, M>)?;
            return Ok(snapshot);
        };
        let Some(builder) = self.builder.clone() else {
            return Ok(snapshot);
        };

        let build = builder(Rc::clone(&user));
        let model = match self.wait.race(TRANSFORM_OPERATION, build).await {
            Ok(model) => model,
            Err(err) => {
                tracing::error!(
                    error = %err,
                    timeout = ?self.wait.timeout(),
                    "user model transform failed"
                );
                return Err(err.into());
            }
        };

        let snapshot = {
            let mut profile = self.profile.borrow_mut();
            let current = profile.auth.as_ref().is_some_and(|auth| Rc::ptr_eq(auth, &user));
            if !current {
                tracing::debug!("discarding model built for a superseded session");
                return Ok(profile.clone());
            }
            profile.model = Some(Rc::new(model));
            profile.clone()
        };
        self.model_changed
            .dispatch_with(snapshot.clone(), bind_profile::<U, M>)?;
        Ok(snapshot)
    }

    pub fn on_auth_state_changed<F>(&self, callback: F) -> Result<SubscriptionId, DispatchError>
    where
        F: Fn(&UserProfile<U, M>) -> Delivery + 'static,
    {
        self.auth_state_changed
            .subscribe(move |_, profile| callback(profile), SubscribeOptions::default())
    }

    pub fn on_model_changed<F>(&self, callback: F) -> Result<SubscriptionId, DispatchError>
    where
        F: Fn(&UserProfile<U, M>) -> Delivery + 'static,
    {
        if self.builder.is_none() {
            tracing::warn!(
                "model change listener registered without a model builder; \
                 it will only see sign-outs"
            );
        }
        self.model_changed
            .subscribe(move |_, profile| callback(profile), SubscribeOptions::default())
    }

    /// Bind `slot` to the next model change (or the latest one, if any).
    pub fn mount(&self, slot: ProfileSlot<U, M>) -> Result<SubscriptionId, DispatchError> {
        self.model_changed
            .subscribe_passive(SubscribeOptions::with_context(slot).once())
    }

    #[must_use]
    pub fn auth_state_events(&self) -> &ProfileEvents<U, M> {
        &self.auth_state_changed
    }

    #[must_use]
    pub fn model_events(&self) -> &ProfileEvents<U, M> {
        &self.model_changed
    }
}
