//! User model sync driven by a live session.

use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

use gatekeep_core::{BoundedWait, ProfileError, ProfileSlot, SessionStore, UserModelSync};

#[derive(Debug, PartialEq, Eq)]
struct Member {
    handle: String,
}

fn member_sync(
    session: SessionStore<String>,
    timeout_ms: u64,
    delay_ms: u64,
) -> UserModelSync<String, Member> {
    UserModelSync::new(session, BoundedWait::from_millis(timeout_ms)).with_builder(
        move |user: Rc<String>| async move {
            tokio::time::sleep(Duration::from_millis(delay_ms)).await;
            Ok::<_, anyhow::Error>(Some(Member {
                handle: format!("@{user}"),
            }))
        },
    )
}

fn record_models(sync: &UserModelSync<String, Member>) -> Rc<RefCell<Vec<Option<String>>>> {
    let events = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&events);
    sync.on_model_changed(move |profile| {
        sink.borrow_mut()
            .push(profile.model.as_ref().map(|m| m.handle.clone()));
        Ok(())
    })
    .unwrap();
    events
}

#[tokio::test(start_paused = true)]
async fn profile_follows_session_changes() {
    let session = SessionStore::new();
    session.init();
    let sync = member_sync(session.clone(), 50, 5);
    let events = record_models(&sync);

    session.apply(Some("ada".to_string())).unwrap();
    sync.next_change().await.unwrap();
    session.apply(None).unwrap();
    sync.next_change().await.unwrap();
    session.apply(Some("grace".to_string())).unwrap();
    sync.sync_pending().await.unwrap().unwrap();
    assert!(sync.sync_pending().await.is_none());

    assert_eq!(
        *events.borrow(),
        vec![Some("@ada".to_string()), None, Some("@grace".to_string())]
    );
}

#[tokio::test(start_paused = true)]
async fn next_change_waits_for_the_session() {
    let session = SessionStore::new();
    session.init();
    let sync = member_sync(session.clone(), 50, 5);

    let (profile, ()) = tokio::join!(sync.next_change(), async {
        tokio::time::sleep(Duration::from_millis(30)).await;
        session.apply(Some("ada".to_string())).unwrap();
    });

    let profile = profile.unwrap();
    assert!(profile.logged_in);
    assert_eq!(profile.model.map(|m| m.handle.clone()), Some("@ada".to_string()));
}

#[tokio::test(start_paused = true)]
async fn run_keeps_profile_current() {
    let session = SessionStore::new();
    session.init();
    let sync = member_sync(session.clone(), 50, 5);
    let events = record_models(&sync);

    let driver = async {
        session.apply(Some("ada".to_string())).unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        session.apply(None).unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
    };
    tokio::select! {
        result = sync.run() => panic!("sync loop stopped: {result:?}"),
        () = driver => {}
    }

    assert_eq!(*events.borrow(), vec![Some("@ada".to_string()), None]);
    assert!(!sync.profile().logged_in);
}

#[tokio::test(start_paused = true)]
async fn follow_reattaches_after_store_reinit() {
    let session = SessionStore::new();
    session.init();
    session.apply(Some("ada".to_string())).unwrap();
    let sync = member_sync(session.clone(), 50, 5);
    sync.next_change().await.unwrap();

    session.dispose();
    assert!(!sync.is_following());
    session.init();
    sync.follow().unwrap();
    assert!(sync.is_following());

    session.apply(Some("grace".to_string())).unwrap();
    let profile = sync.next_change().await.unwrap();
    assert_eq!(profile.model.map(|m| m.handle.clone()), Some("@grace".to_string()));
}

#[tokio::test(start_paused = true)]
async fn slow_builder_fails_with_timeout_class_error() {
    let session = SessionStore::new();
    session.init();
    session.apply(Some("ada".to_string())).unwrap();
    let sync = member_sync(session, 50, 200);
    let slot = ProfileSlot::new();
    sync.mount(slot.clone()).unwrap();

    match sync.refresh().await {
        Err(ProfileError::Transform(err)) => assert!(err.is_timeout()),
        other => panic!("expected transform timeout, got {other:?}"),
    }
    assert!(!slot.is_bound());
    assert!(sync.profile().logged_in);
    assert_eq!(sync.wait().armed_timers(), 0);
}
