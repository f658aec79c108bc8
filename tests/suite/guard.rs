//! Navigation guard behaviour across the session check.

use std::cell::Cell;
use std::rc::Rc;

use gatekeep_core::{GuardOptions, GuardPhase, Navigator, Resumption, SessionTransition};
use gatekeep_types::{AuthAssumption, Decision, RoutePath};

use crate::common::{DecisionSink, install, options, path};

#[tokio::test]
async fn only_latest_pending_transition_is_decided() {
    let (mut guard, _session) = install(options());
    let sink = DecisionSink::new();

    let first = guard.guard_transition(path("/dashboard"), path("/"), sink.callback("first"));
    let second = guard.guard_transition(path("/settings"), path("/"), sink.callback("second"));
    assert!(first.is_none());
    assert!(second.is_none());
    assert!(sink.decisions().is_empty());

    guard.on_session_change(None).await.unwrap();

    assert!(sink.for_label("first").is_empty());
    assert_eq!(sink.for_label("second"), vec![Decision::RedirectTo(path("/login"))]);
}

#[tokio::test]
async fn login_page_is_always_allowed() {
    let (mut guard, _session) = install(GuardOptions {
        assume_if_undefined: AuthAssumption::Auth,
        ..options()
    });
    guard.on_session_change(None).await.unwrap();

    assert_eq!(guard.authorize(&path("/login"), &path("/dashboard")), Decision::Allow);
    assert_eq!(
        guard.authorize(&path("/login?redirect=/settings"), &path("/")),
        Decision::Allow
    );
}

#[tokio::test]
async fn undeclared_routes_follow_assumption() {
    let (mut strict, _) = install(options());
    strict.on_session_change(None).await.unwrap();
    assert_eq!(
        strict.authorize(&path("/help"), &path("/")),
        Decision::RedirectTo(path("/login"))
    );
    assert_eq!(strict.authorize(&path("/about"), &path("/")), Decision::Allow);

    let (mut lenient, _) = install(GuardOptions {
        assume_if_undefined: AuthAssumption::Public,
        ..options()
    });
    lenient.on_session_change(None).await.unwrap();
    assert_eq!(lenient.authorize(&path("/help"), &path("/")), Decision::Allow);
    assert_eq!(
        lenient.authorize(&path("/dashboard"), &path("/")),
        Decision::RedirectTo(path("/login"))
    );
}

#[tokio::test]
async fn full_sign_in_sign_out_cycle() {
    let (mut guard, session) = install(GuardOptions {
        public_landing: path("/about"),
        ..options()
    });
    let sink = DecisionSink::new();
    guard.guard_transition(path("/settings"), path("/"), sink.callback("boot"));
    assert_eq!(guard.phase(), GuardPhase::Unchecked);

    // Cold start, nobody signed in.
    assert_eq!(
        guard.on_session_change(None).await.unwrap(),
        SessionTransition::FirstCheck
    );
    assert_eq!(guard.phase(), GuardPhase::Checked);
    assert_eq!(sink.for_label("boot"), vec![Decision::RedirectTo(path("/login"))]);
    guard.navigator_mut().commit(path("/login"));

    // Sign-in from the login page lands on the post-auth path.
    assert_eq!(
        guard.on_session_change(Some("ada".to_string())).await.unwrap(),
        SessionTransition::SignedIn
    );
    assert_eq!(guard.navigator().current_path(), path("/dashboard"));
    assert!(session.is_authenticated());

    let decided =
        guard.guard_transition(path("/settings"), path("/dashboard"), sink.callback("nav"));
    assert_eq!(decided, Some(Decision::Allow));

    // Sign-out goes to the public landing page.
    assert_eq!(
        guard.on_session_change(None).await.unwrap(),
        SessionTransition::SignedOut
    );
    assert_eq!(guard.navigator().current_path(), path("/about"));
    assert_eq!(
        guard.navigator().redirects(),
        &[path("/dashboard"), path("/about")]
    );
}

#[tokio::test]
async fn resume_runs_once() {
    let (mut guard, _session) = install(options());
    let checked = Rc::new(Cell::new(0));
    let count = Rc::clone(&checked);
    guard
        .on_session_checked(move |_| {
            count.set(count.get() + 1);
            Ok(())
        })
        .unwrap();

    assert_eq!(guard.resume_deferred().await.unwrap(), None);

    guard.on_session_change(Some("ada".to_string())).await.unwrap();
    assert_eq!(guard.resume_deferred().await.unwrap(), None);
    assert_eq!(guard.resume_deferred().await.unwrap(), None);

    assert_eq!(checked.get(), 1);
    assert_eq!(guard.navigator().redirects(), &[path("/dashboard")]);
}

#[tokio::test]
async fn resumption_reports_what_happened() {
    let (mut guard, session) = install(options());
    let sink = DecisionSink::new();
    guard.guard_transition(path("/about"), path("/"), sink.callback("about"));

    // Driving the session directly leaves the resume to the caller.
    session.apply(None).unwrap();
    let resumption = guard.resume_deferred().await.unwrap();
    assert_eq!(
        resumption,
        Some(Resumption::Replayed {
            to: path("/about"),
            decision: Decision::Allow,
        })
    );
    assert_eq!(sink.for_label("about"), vec![Decision::Allow]);
}

#[tokio::test]
async fn failing_resolver_leaves_user_in_place() {
    let options = GuardOptions::<String>::default().with_post_auth_resolver(|_, _| async {
        Err::<RoutePath, _>(anyhow::anyhow!("role lookup failed"))
    });
    let (mut guard, _session) = install(options);

    guard.on_session_change(Some("ada".to_string())).await.unwrap();
    assert!(guard.navigator().redirects().is_empty());
    assert_eq!(guard.phase(), GuardPhase::Checked);
}

#[tokio::test]
async fn session_checked_listener_error_surfaces() {
    let (mut guard, session) = install(options());
    guard
        .on_session_checked(|_| Err(anyhow::anyhow!("listener broke")))
        .unwrap();

    let err = guard.on_session_change(None).await.unwrap_err();
    assert!(err.to_string().contains("session-checked"));
    // The session update itself still landed.
    assert!(session.is_checked());
}

#[tokio::test]
async fn reinitialized_store_keeps_guard_checked() {
    let (mut guard, session) = install(options());
    guard.on_session_change(None).await.unwrap();
    assert_eq!(guard.navigator().current_path(), path("/login"));

    session.dispose();
    session.init();
    assert!(!session.is_checked());
    assert_eq!(guard.phase(), GuardPhase::Checked);

    let sink = DecisionSink::new();
    let decided = guard.guard_transition(path("/settings"), path("/"), sink.callback("settings"));
    assert_eq!(decided, Some(Decision::RedirectTo(path("/login"))));
    assert_eq!(sink.for_label("settings"), vec![Decision::RedirectTo(path("/login"))]);
    assert!(guard.deferred().is_none());

    let transition = guard.on_session_change(Some("ada".to_string())).await.unwrap();
    assert_eq!(transition, SessionTransition::FirstCheck);
    assert_eq!(guard.phase(), GuardPhase::Checked);
    assert_eq!(guard.resume_deferred().await.unwrap(), None);
    assert_eq!(guard.navigator().current_path(), path("/dashboard"));
    assert_eq!(sink.decisions().len(), 1);
}
