//! Owned session state with auth lifecycle events.
//!
//! A [`SessionStore`] is constructed explicitly and handed to every
//! collaborator that needs the signed-in user. Clones share state.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use thiserror::Error;

use gatekeep_types::SubscriptionId;

use crate::dispatcher::{
    Delivery, DeliveryPolicy, DispatchError, EventDispatcher, SubscribeOptions,
};

/// What a session update meant relative to the previous state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionTransition {
    /// The first update ever received: the session check is complete.
    FirstCheck,
    SignedIn,
    SignedOut,
    /// Same presence as before (token refresh, profile change, repeat sign-out).
    Refreshed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lifecycle {
    Idle,
    Active,
    Disposed,
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("session store is not initialized")]
    Inactive,
    #[error(transparent)]
    Dispatch(#[from] DispatchError),
}

struct SessionState<U> {
    lifecycle: Lifecycle,
    checked: bool,
    user: Option<Rc<U>>,
}

pub struct SessionStore<U> {
    state: Rc<RefCell<SessionState<U>>>,
    on_auth: EventDispatcher<Rc<U>>,
    on_unauth: EventDispatcher<()>,
    on_checked: EventDispatcher<Option<Rc<U>>>,
}

impl<U> Clone for SessionStore<U> {
    fn clone(&self) -> Self {
        Self {
            state: Rc::clone(&self.state),
            on_auth: self.on_auth.clone(),
            on_unauth: self.on_unauth.clone(),
            on_checked: self.on_checked.clone(),
        }
    }
}

impl<U: 'static> Default for SessionStore<U> {
    fn default() -> Self {
        Self::new()
    }
}

impl<U> fmt::Debug for SessionStore<U> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.borrow();
        f.debug_struct("SessionStore")
            .field("lifecycle", &state.lifecycle)
            .field("checked", &state.checked)
            .field("authenticated", &state.user.is_some())
            .finish_non_exhaustive()
    }
}

impl<U: 'static> SessionStore<U> {
    /// A store that ignores updates until [`init`](Self::init) is called.
    /// Lifecycle subscribers are isolated from each other: one failing
    /// listener never blocks the session update.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Rc::new(RefCell::new(SessionState {
                lifecycle: Lifecycle::Idle,
                checked: false,
                user: None,
            })),
            on_auth: EventDispatcher::with_policy(DeliveryPolicy::Isolate),
            on_unauth: EventDispatcher::with_policy(DeliveryPolicy::Isolate),
            on_checked: EventDispatcher::with_policy(DeliveryPolicy::Isolate),
        }
    }

    pub fn init(&self) {
        let mut state = self.state.borrow_mut();
        if state.lifecycle == Lifecycle::Active {
            tracing::debug!("session store already initialized");
            return;
        }
        state.lifecycle = Lifecycle::Active;
        state.checked = false;
        state.user = None;
    }

    /// Forget the user and every lifecycle subscription. Updates are ignored
    /// until the next `init`.
    pub fn dispose(&self) {
        {
            let mut state = self.state.borrow_mut();
            state.lifecycle = Lifecycle::Disposed;
            state.checked = false;
            state.user = None;
        }
        self.on_auth.clear();
        self.on_unauth.clear();
        self.on_checked.clear();
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.state.borrow().lifecycle == Lifecycle::Active
    }

    #[must_use]
    pub fn is_checked(&self) -> bool {
        self.state.borrow().checked
    }

    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.state.borrow().user.is_some()
    }

    #[must_use]
    pub fn current_user(&self) -> Option<Rc<U>> {
        self.state.borrow().user.clone()
    }

    /// Record a session notification and announce it.
    pub fn apply(&self, user: Option<U>) -> Result<SessionTransition, SessionError> {
        let user = user.map(Rc::new);
        let transition = {
            let mut state = self.state.borrow_mut();
            if state.lifecycle != Lifecycle::Active {
                tracing::warn!("session update ignored: store is not initialized");
                return Err(SessionError::Inactive);
            }
            let transition = match (state.checked, state.user.is_some(), user.is_some()) {
                (false, _, _) => SessionTransition::FirstCheck,
                (true, false, true) => SessionTransition::SignedIn,
                (true, true, false) => SessionTransition::SignedOut,
                (true, _, _) => SessionTransition::Refreshed,
            };
            state.checked = true;
            state.user.clone_from(&user);
            transition
        };
        tracing::info!(?transition, authenticated = user.is_some(), "session updated");

        match &user {
            Some(user) => {
                self.on_auth.dispatch(Rc::clone(user))?;
            }
            None => {
                self.on_unauth.dispatch(())?;
            }
        }
        self.on_checked.dispatch(user)?;
        Ok(transition)
    }

    /// Called with the user whenever one is present. Late subscribers get
    /// the most recent sign-in replayed.
    pub fn on_auth<F>(&self, callback: F) -> Result<SubscriptionId, DispatchError>
    where
        F: Fn(&Rc<U>) -> Delivery + 'static,
    {
        self.on_auth
            .subscribe(move |_, user| callback(user), SubscribeOptions::default())
    }

    pub fn on_unauth<F>(&self, callback: F) -> Result<SubscriptionId, DispatchError>
    where
        F: Fn() -> Delivery + 'static,
    {
        self.on_unauth
            .subscribe(move |_, _: &()| callback(), SubscribeOptions::default())
    }

    /// Called after every session update, signed in or not.
    pub fn on_checked<F>(&self, callback: F) -> Result<SubscriptionId, DispatchError>
    where
        F: Fn(Option<&Rc<U>>) -> Delivery + 'static,
    {
        self.on_checked.subscribe(
            move |_, user: &Option<Rc<U>>| callback(user.as_ref()),
            SubscribeOptions::default(),
        )
    }
}

impl<U> SessionStore<U> {
    #[must_use]
    pub fn auth_events(&self) -> &EventDispatcher<Rc<U>> {
        &self.on_auth
    }

    #[must_use]
    pub fn unauth_events(&self) -> &EventDispatcher<()> {
        &self.on_unauth
    }

    #[must_use]
    pub fn checked_events(&self) -> &EventDispatcher<Option<Rc<U>>> {
        &self.on_checked
    }
}
