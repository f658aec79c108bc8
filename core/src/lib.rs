//! Navigation guard core for gatekeep.
//!
//! The pieces compose bottom-up: an [`EventDispatcher`] with replay for late
//! subscribers, a [`BoundedWait`] deadline race, a [`SessionStore`] fed by
//! the auth source, and the [`NavigationGuard`] that parks router
//! transitions until the first session notification arrives.
//!
//! Everything here is single-threaded (`Rc`, `RefCell`); run it on a
//! current-thread runtime or a `LocalSet`.

pub mod dispatcher;
pub mod guard;
pub mod profile;
pub mod race;
pub mod routes;
pub mod session;

pub use dispatcher::{
    Delivery, DeliveryPolicy, DispatchError, DispatchReport, EventDispatcher, SideEffect,
    SubscribeOptions, SubscriberFailure,
};
pub use guard::{
    Decide, DeferredNavigation, GuardContext, GuardError, GuardOptions, GuardPhase,
    NavigationGuard, PostAuthPath, PostAuthResolver, Resumption,
};
pub use profile::{ModelBuilder, ProfileError, ProfileSlot, UserModelSync, UserProfile};
pub use race::{BoundedWait, RaceError};
pub use routes::{HistoryNavigator, Navigator, RouteClassifier, RouteTable, StaticRouteTable};
pub use session::{SessionError, SessionStore, SessionTransition};
