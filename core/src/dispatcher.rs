//! Event dispatch with once-semantics and last-event replay.
//!
//! An [`EventDispatcher`] is a cheap, cloneable handle to a shared registry
//! of subscriptions. Subscribers may hold a clone and call back into
//! `subscribe`, `unsubscribe` or `dispatch` while being delivered to.
//!
//! # Pass discipline
//!
//! A dispatch pass delivers to the subscriptions that were live when the
//! pass started, in registration order. Subscriptions are never removed
//! while any pass is running: `once` deliveries and `unsubscribe` only mark
//! an entry, and marked entries are purged when the outermost pass ends.
//! A subscription added mid-pass is not part of that pass.
//!
//! # Late subscribers
//!
//! Once at least one event has been dispatched, a new subscription is
//! handed the most recent `(payload, side effect)` pair inline, before
//! `subscribe` returns, unless it asked to ignore previous calls.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

use thiserror::Error;

use gatekeep_types::SubscriptionId;

/// Result returned by a subscriber callback.
pub type Delivery = anyhow::Result<()>;

type Callback<T, C> = Rc<dyn Fn(&C, &T) -> Delivery>;

/// Per-subscriber hook passed to [`EventDispatcher::dispatch`]. Runs against
/// each subscriber's context before its callback, even when it has none.
pub type SideEffect<T, C> = Rc<dyn Fn(&C, &T)>;

/// What a dispatch pass does when a subscriber returns an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeliveryPolicy {
    /// Abort the rest of the pass and return the error.
    #[default]
    Propagate,
    /// Log the failure, keep delivering, and report it in the [`DispatchReport`].
    Isolate,
}

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("subscriber {id} failed: {source}")]
    Subscriber {
        id: SubscriptionId,
        source: Box<dyn std::error::Error + Send + Sync + 'static>,
    },
}

impl DispatchError {
    #[must_use]
    pub fn subscription(&self) -> SubscriptionId {
        match self {
            Self::Subscriber { id, .. } => *id,
        }
    }
}

/// A subscriber failure swallowed under [`DeliveryPolicy::Isolate`].
#[derive(Debug)]
pub struct SubscriberFailure {
    pub id: SubscriptionId,
    pub error: anyhow::Error,
}

#[derive(Debug, Default)]
pub struct DispatchReport {
    /// Subscriptions visited (callback or side effect ran).
    pub delivered: usize,
    pub failures: Vec<SubscriberFailure>,
}

/// Options for a new subscription.
#[derive(Debug, Clone)]
pub struct SubscribeOptions<C> {
    /// Deliver a single event, then drop the subscription.
    pub once: bool,
    /// Skip the replay of the most recent event at subscribe time.
    pub ignore_previous_calls: bool,
    /// Value handed to the callback and to dispatch side effects.
    pub context: C,
}

impl<C: Default> Default for SubscribeOptions<C> {
    fn default() -> Self {
        Self::with_context(C::default())
    }
}

impl<C> SubscribeOptions<C> {
    pub fn with_context(context: C) -> Self {
        Self {
            once: false,
            ignore_previous_calls: false,
            context,
        }
    }

    pub fn once(mut self) -> Self {
        self.once = true;
        self
    }

    pub fn ignore_previous_calls(mut self) -> Self {
        self.ignore_previous_calls = true;
        self
    }
}

struct Subscription<T, C> {
    callback: Option<Callback<T, C>>,
    once: bool,
    context: Rc<C>,
    marked_for_removal: bool,
}

struct LastEvent<T, C> {
    payload: Rc<T>,
    side_effect: Option<SideEffect<T, C>>,
}

impl<T, C> Clone for LastEvent<T, C> {
    fn clone(&self) -> Self {
        Self {
            payload: Rc::clone(&self.payload),
            side_effect: self.side_effect.clone(),
        }
    }
}

struct Registry<T, C> {
    subscriptions: BTreeMap<SubscriptionId, Subscription<T, C>>,
    pending_removal: Vec<SubscriptionId>,
    last_event: Option<LastEvent<T, C>>,
    next_id: SubscriptionId,
    /// Number of passes (dispatch or replay) currently on the stack.
    depth: usize,
    policy: DeliveryPolicy,
}

impl<T, C> Registry<T, C> {
    fn mark(&mut self, id: SubscriptionId) -> bool {
        match self.subscriptions.get_mut(&id) {
            Some(sub) if !sub.marked_for_removal => {
                sub.marked_for_removal = true;
                self.pending_removal.push(id);
                true
            }
            _ => false,
        }
    }

    fn purge_if_idle(&mut self) {
        if self.depth > 0 {
            return;
        }
        for id in self.pending_removal.drain(..) {
            self.subscriptions.remove(&id);
        }
    }
}

/// Ends a pass: pops the depth counter and purges once no pass is left.
/// Runs on early return too, so an aborted pass still purges.
struct PassScope<'a, T, C> {
    registry: &'a RefCell<Registry<T, C>>,
}

impl<'a, T, C> PassScope<'a, T, C> {
    fn enter(registry: &'a RefCell<Registry<T, C>>) -> Self {
        registry.borrow_mut().depth += 1;
        Self { registry }
    }
}

impl<T, C> Drop for PassScope<'_, T, C> {
    fn drop(&mut self) {
        let mut registry = self.registry.borrow_mut();
        registry.depth = registry.depth.saturating_sub(1);
        registry.purge_if_idle();
    }
}

pub struct EventDispatcher<T, C = ()> {
    inner: Rc<RefCell<Registry<T, C>>>,
}

impl<T, C> Clone for EventDispatcher<T, C> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T, C> Default for EventDispatcher<T, C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T, C> fmt::Debug for EventDispatcher<T, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let registry = self.inner.borrow();
        f.debug_struct("EventDispatcher")
            .field("subscriptions", &registry.subscriptions.len())
            .field("pending_removal", &registry.pending_removal.len())
            .field("has_fired", &registry.last_event.is_some())
            .field("policy", &registry.policy)
            .finish()
    }
}

impl<T, C> EventDispatcher<T, C> {
    #[must_use]
    pub fn new() -> Self {
        Self::with_policy(DeliveryPolicy::default())
    }

    #[must_use]
    pub fn with_policy(policy: DeliveryPolicy) -> Self {
        Self {
            inner: Rc::new(RefCell::new(Registry {
                subscriptions: BTreeMap::new(),
                pending_removal: Vec::new(),
                last_event: None,
                next_id: SubscriptionId::new(1),
                depth: 0,
                policy,
            })),
        }
    }

    #[must_use]
    pub fn policy(&self) -> DeliveryPolicy {
        self.inner.borrow().policy
    }

    /// Register `callback`. A late subscriber gets the last event replayed
    /// before this returns; a replay failure under
    /// [`DeliveryPolicy::Propagate`] is returned, but the subscription stays
    /// registered.
    pub fn subscribe<F>(
        &self,
        callback: F,
        options: SubscribeOptions<C>,
    ) -> Result<SubscriptionId, DispatchError>
    where
        F: Fn(&C, &T) -> Delivery + 'static,
    {
        self.register(Some(Rc::new(callback)), options)
    }

    /// Register a subscription with no callback. It still receives dispatch
    /// side effects against its context, and still counts as delivered for
    /// `once`.
    pub fn subscribe_passive(
        &self,
        options: SubscribeOptions<C>,
    ) -> Result<SubscriptionId, DispatchError> {
        self.register(None, options)
    }

    fn register(
        &self,
        callback: Option<Callback<T, C>>,
        options: SubscribeOptions<C>,
    ) -> Result<SubscriptionId, DispatchError> {
        let (id, replay) = {
            let mut registry = self.inner.borrow_mut();
            let id = registry.next_id;
            registry.next_id = id.next();
            registry.subscriptions.insert(
                id,
                Subscription {
                    callback,
                    once: options.once,
                    context: Rc::new(options.context),
                    marked_for_removal: false,
                },
            );
            let replay = if options.ignore_previous_calls {
                None
            } else {
                registry.last_event.clone()
            };
            (id, replay)
        };

        if let Some(event) = replay {
            tracing::debug!(%id, "replaying last event to late subscriber");
            let _pass = PassScope::enter(&self.inner);
            if let Err(error) = self.deliver(id, &event.payload, event.side_effect.as_ref()) {
                self.handle_failure(id, error, None)?;
            }
        }
        Ok(id)
    }

    /// Deliver `payload` to every live subscription, in registration order.
    pub fn dispatch(&self, payload: T) -> Result<DispatchReport, DispatchError> {
        self.run(payload, None)
    }

    /// Like [`dispatch`](Self::dispatch), running `side_effect` against each
    /// subscriber's context before its callback.
    pub fn dispatch_with<S>(
        &self,
        payload: T,
        side_effect: S,
    ) -> Result<DispatchReport, DispatchError>
    where
        S: Fn(&C, &T) + 'static,
    {
        self.run(payload, Some(Rc::new(side_effect)))
    }

    fn run(
        &self,
        payload: T,
        side_effect: Option<SideEffect<T, C>>,
    ) -> Result<DispatchReport, DispatchError> {
        let payload = Rc::new(payload);
        let _pass = PassScope::enter(&self.inner);
        let ids: Vec<SubscriptionId> = self
            .inner
            .borrow()
            .subscriptions
            .iter()
            .filter(|(_, sub)| !sub.marked_for_removal)
            .map(|(id, _)| *id)
            .collect();

        let mut report = DispatchReport::default();
        for id in ids {
            match self.deliver(id, &payload, side_effect.as_ref()) {
                Ok(true) => report.delivered += 1,
                Ok(false) => {}
                Err(error) => {
                    report.delivered += 1;
                    self.handle_failure(id, error, Some(&mut report))?;
                }
            }
        }

        self.inner.borrow_mut().last_event = Some(LastEvent {
            payload,
            side_effect,
        });
        Ok(report)
    }

    /// Deliver to one subscription. Returns `Ok(false)` if it is gone or
    /// already marked. The registry is not borrowed while user code runs.
    fn deliver(
        &self,
        id: SubscriptionId,
        payload: &T,
        side_effect: Option<&SideEffect<T, C>>,
    ) -> anyhow::Result<bool> {
        let (callback, context) = {
            let mut registry = self.inner.borrow_mut();
            let (callback, context, once) = match registry.subscriptions.get(&id) {
                Some(sub) if !sub.marked_for_removal => {
                    (sub.callback.clone(), Rc::clone(&sub.context), sub.once)
                }
                _ => return Ok(false),
            };
            // Marked before running so a nested pass cannot deliver twice.
            if once {
                registry.mark(id);
            }
            (callback, context)
        };

        if let Some(side_effect) = side_effect {
            side_effect(&context, payload);
        }
        if let Some(callback) = callback {
            callback(&context, payload)?;
        }
        Ok(true)
    }

    fn handle_failure(
        &self,
        id: SubscriptionId,
        error: anyhow::Error,
        report: Option<&mut DispatchReport>,
    ) -> Result<(), DispatchError> {
        match self.policy() {
            DeliveryPolicy::Propagate => Err(DispatchError::Subscriber {
                id,
                source: error.into(),
            }),
            DeliveryPolicy::Isolate => {
                tracing::warn!(%id, error = %error, "subscriber failed; continuing pass");
                if let Some(report) = report {
                    report.failures.push(SubscriberFailure { id, error });
                }
                Ok(())
            }
        }
    }

    /// Remove a subscription. Inside a pass it is only marked and purged
    /// when the outermost pass ends. Returns false if it was not live.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut registry = self.inner.borrow_mut();
        let marked = registry.mark(id);
        registry.purge_if_idle();
        marked
    }

    /// Drop every subscription and forget the last event.
    pub fn clear(&self) {
        let mut registry = self.inner.borrow_mut();
        let ids: Vec<SubscriptionId> = registry.subscriptions.keys().copied().collect();
        for id in ids {
            registry.mark(id);
        }
        registry.last_event = None;
        registry.purge_if_idle();
    }

    /// Live (unmarked) subscriptions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner
            .borrow()
            .subscriptions
            .values()
            .filter(|sub| !sub.marked_for_removal)
            .count()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub fn is_subscribed(&self, id: SubscriptionId) -> bool {
        self.inner
            .borrow()
            .subscriptions
            .get(&id)
            .is_some_and(|sub| !sub.marked_for_removal)
    }

    #[must_use]
    pub fn has_fired(&self) -> bool {
        self.inner.borrow().last_event.is_some()
    }

    #[must_use]
    pub fn last_payload(&self) -> Option<Rc<T>> {
        self.inner
            .borrow()
            .last_event
            .as_ref()
            .map(|event| Rc::clone(&event.payload))
    }
}
