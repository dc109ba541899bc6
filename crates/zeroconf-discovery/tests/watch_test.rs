//! Browser-side behaviour: event de-duplication, resolve pacing and teardown

mod common;

use common::*;
use std::sync::atomic::Ordering;
use std::time::Duration;
use tokio::time::Instant;
use zeroconf_core::types::AddressFamily;
use zeroconf_discovery::{BrowseEvent, Delivery, SessionManager, WatchState};

const HTTP: &str = "_http._tcp.";

async fn start_watch(
    manager: &SessionManager,
) -> async_channel::Receiver<Delivery> {
    let (cb, rx) = callback();
    manager
        .watch(HTTP, "local.", AddressFamily::Any, cb)
        .await
        .unwrap();
    assert_eq!(next(&rx).await, Delivery::NoResult);
    rx
}

fn event(action: &str, name: &str) -> (String, String) {
    (action.to_string(), name.to_string())
}

#[tokio::test(start_paused = true)]
async fn test_burst_resolves_fifo_with_settle_delay() {
    let (manager, factory) = manager();
    let platform = factory.latest();
    let rx = start_watch(&manager).await;

    platform.emit(HTTP, BrowseEvent::Found(record("A"))).await;
    platform.emit(HTTP, BrowseEvent::Found(record("B"))).await;
    assert_eq!(next_event(&rx).await, event("added", "A"));
    assert_eq!(next_event(&rx).await, event("added", "B"));

    let a = platform.next_resolve().await;
    assert_eq!(a.record.name, "A");
    assert_eq!(platform.pending_resolves(), 0);

    let completed_at = Instant::now();
    a.complete();
    match next(&rx).await {
        Delivery::Event(value) => {
            assert_eq!(value["action"], "resolved");
            assert_eq!(value["service"]["name"], "A");
            assert_eq!(value["service"]["type"], "_http._tcp.");
            assert_eq!(value["service"]["domain"], "local.");
            assert_eq!(value["service"]["hostname"], "10.0.0.7");
            assert_eq!(value["service"]["port"], 8080);
            assert_eq!(value["service"]["txtRecord"]["path"], "/");
        }
        other => panic!("unexpected delivery: {:?}", other),
    }

    let b = platform.next_resolve().await;
    assert_eq!(b.record.name, "B");
    assert!(b.started_at.duration_since(completed_at) >= Duration::from_secs(1));
    b.complete();
    assert_eq!(next_event(&rx).await, event("resolved", "B"));

    assert_eq!(platform.resolved_names(), vec!["A", "B"]);
    assert_eq!(platform.max_concurrent_resolves(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_large_burst_keeps_one_resolve_in_flight() {
    let (manager, factory) = manager();
    let platform = factory.latest();
    let rx = start_watch(&manager).await;

    let names: Vec<String> = (0..8).map(|i| format!("svc-{}", i)).collect();
    for name in &names {
        platform.emit(HTTP, BrowseEvent::Found(record(name))).await;
    }

    for name in &names {
        let pending = platform.next_resolve().await;
        assert_eq!(&pending.record.name, name);
        pending.complete();
    }

    for name in &names {
        assert_eq!(next_event(&rx).await, event("added", name));
    }
    for name in &names {
        assert_eq!(next_event(&rx).await, event("resolved", name));
    }

    assert_eq!(platform.resolved_names(), names);
    assert_eq!(platform.max_concurrent_resolves(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_lost_before_resolution_is_never_resolved() {
    let (manager, factory) = manager();
    let platform = factory.latest();
    let rx = start_watch(&manager).await;

    platform.emit(HTTP, BrowseEvent::Found(record("A"))).await;
    platform.emit(HTTP, BrowseEvent::Found(record("X"))).await;
    platform.emit(HTTP, BrowseEvent::Lost(record("X"))).await;

    assert_eq!(next_event(&rx).await, event("added", "A"));
    assert_eq!(next_event(&rx).await, event("added", "X"));
    assert_eq!(next_event(&rx).await, event("removed", "X"));

    platform.next_resolve().await.complete();
    assert_eq!(next_event(&rx).await, event("resolved", "A"));

    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(platform.resolved_names(), vec!["A"]);
    assert!(rx.try_recv().is_err());
}

#[tokio::test(start_paused = true)]
async fn test_lost_while_resolving_suppresses_result() {
    let (manager, factory) = manager();
    let platform = factory.latest();
    let rx = start_watch(&manager).await;

    platform.emit(HTTP, BrowseEvent::Found(record("A"))).await;
    let pending = platform.next_resolve().await;
    platform.emit(HTTP, BrowseEvent::Lost(record("A"))).await;

    assert_eq!(next_event(&rx).await, event("added", "A"));
    assert_eq!(next_event(&rx).await, event("removed", "A"));

    // Answered only after the loss has been processed.
    pending.complete();
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert!(rx.try_recv().is_err());
}

#[tokio::test(start_paused = true)]
async fn test_duplicate_platform_events_are_collapsed() {
    let (manager, factory) = manager();
    let platform = factory.latest();
    let rx = start_watch(&manager).await;

    platform.emit(HTTP, BrowseEvent::Found(record("A"))).await;
    platform.emit(HTTP, BrowseEvent::Found(record("A"))).await;
    platform.emit(HTTP, BrowseEvent::Lost(record("ghost"))).await;
    platform.emit(HTTP, BrowseEvent::Lost(record("A"))).await;
    platform.emit(HTTP, BrowseEvent::Lost(record("A"))).await;

    assert_eq!(next_event(&rx).await, event("added", "A"));
    assert_eq!(next_event(&rx).await, event("removed", "A"));

    platform.next_resolve().await.complete();
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert!(rx.try_recv().is_err());
    assert_eq!(platform.resolved_names(), vec!["A"]);
}

#[tokio::test(start_paused = true)]
async fn test_failed_resolve_does_not_stop_queue() {
    let (manager, factory) = manager();
    let platform = factory.latest();
    let rx = start_watch(&manager).await;

    platform.emit(HTTP, BrowseEvent::Found(record("A"))).await;
    platform.emit(HTTP, BrowseEvent::Found(record("B"))).await;
    assert_eq!(next_event(&rx).await, event("added", "A"));
    assert_eq!(next_event(&rx).await, event("added", "B"));

    let failed_at = Instant::now();
    platform.next_resolve().await.fail();

    let b = platform.next_resolve().await;
    assert_eq!(b.record.name, "B");
    assert!(b.started_at.duration_since(failed_at) >= Duration::from_secs(1));
    b.complete();

    assert_eq!(next_event(&rx).await, event("resolved", "B"));
    assert!(rx.try_recv().is_err());
}

#[tokio::test(start_paused = true)]
async fn test_zero_settle_delay_resolves_back_to_back() {
    let (manager, factory) = manager_with(config_with_settle(Duration::ZERO), Some("testhost"));
    let platform = factory.latest();
    let _rx = start_watch(&manager).await;

    platform.emit(HTTP, BrowseEvent::Found(record("A"))).await;
    platform.emit(HTTP, BrowseEvent::Found(record("B"))).await;

    let a = platform.next_resolve().await;
    let completed_at = Instant::now();
    a.complete();
    let b = platform.next_resolve().await;
    assert_eq!(b.started_at, completed_at);
    assert_eq!(platform.max_concurrent_resolves(), 1);
}

#[tokio::test]
async fn test_duplicate_watch_is_rejected() {
    let (manager, factory) = manager();
    let _first = start_watch(&manager).await;

    let (cb, rx) = callback();
    manager
        .watch(HTTP, "local.", AddressFamily::Ipv4, cb)
        .await
        .unwrap();
    assert_eq!(next(&rx).await, Delivery::NoResult);
    assert_eq!(next_error_code(&rx).await, "duplicate_registration");

    assert_eq!(manager.status().await.watches.len(), 1);
    assert_eq!(
        factory
            .latest()
            .count(|call| matches!(call, Call::Discover(_))),
        1
    );
}

#[tokio::test]
async fn test_failed_discover_removes_watch() {
    let (manager, factory) = manager();
    factory.latest().fail_discover.store(true, Ordering::SeqCst);

    let (cb, rx) = callback();
    manager
        .watch(HTTP, "local.", AddressFamily::Any, cb)
        .await
        .unwrap();
    assert_eq!(next(&rx).await, Delivery::NoResult);
    assert_eq!(next_error_code(&rx).await, "collaborator_failure");
    assert!(manager.status().await.watches.is_empty());
}

#[tokio::test]
async fn test_discovery_failure_ends_watch_with_error() {
    let (manager, factory) = manager();
    let platform = factory.latest();
    let rx = start_watch(&manager).await;

    platform
        .emit(
            HTTP,
            BrowseEvent::Failed {
                code: "0".to_string(),
                message: "internal error".to_string(),
            },
        )
        .await;

    assert_eq!(next_error_code(&rx).await, "collaborator_failure");
    assert!(rx.recv().await.is_err());
    assert!(manager.status().await.watches.is_empty());
    assert_eq!(platform.active_browsers(), 0);
    assert_eq!(
        platform.count(|call| matches!(call, Call::StopDiscovery(_))),
        1
    );

    // The type can be watched again.
    let _rx = start_watch(&manager).await;
    let status = manager.status().await;
    assert_eq!(status.watches.len(), 1);
    assert_eq!(status.watches[0].state, WatchState::Watching);
}

#[tokio::test]
async fn test_closed_subscription_releases_watch() {
    let (manager, factory) = manager();
    let platform = factory.latest();
    let rx = start_watch(&manager).await;

    platform.close_browse(HTTP);

    assert_eq!(next_error_code(&rx).await, "collaborator_failure");
    assert!(rx.recv().await.is_err());
    assert!(manager.status().await.watches.is_empty());
    assert_eq!(platform.active_browsers(), 0);

    let _rx = start_watch(&manager).await;
    let status = manager.status().await;
    assert_eq!(status.watches.len(), 1);
    assert_eq!(status.watches[0].state, WatchState::Watching);
    assert_eq!(platform.count(|call| matches!(call, Call::Discover(_))), 2);
}

#[tokio::test]
async fn test_unwatch_ends_stream() {
    let (manager, factory) = manager();
    let platform = factory.latest();
    let events = start_watch(&manager).await;
    assert_eq!(platform.active_browsers(), 1);

    let (cb, rx) = callback();
    manager.unwatch(HTTP, "local.", cb).await.unwrap();
    assert_eq!(next(&rx).await, Delivery::Success(None));

    assert!(events.recv().await.is_err());
    assert_eq!(platform.active_browsers(), 0);
    assert_eq!(
        platform.count(|call| matches!(call, Call::StopDiscovery(_))),
        1
    );
    assert!(manager.status().await.watches.is_empty());
}

#[tokio::test]
async fn test_unwatch_unknown_is_not_found() {
    let (manager, factory) = manager();
    let _events = start_watch(&manager).await;

    let (cb, rx) = callback();
    manager.unwatch("_ipp._tcp.", "local.", cb).await.unwrap();
    assert_eq!(next_error_code(&rx).await, "not_found");

    assert_eq!(manager.status().await.watches.len(), 1);
    assert_eq!(
        factory
            .latest()
            .count(|call| matches!(call, Call::StopDiscovery(_))),
        0
    );
}

#[tokio::test(start_paused = true)]
async fn test_unwatch_discards_in_flight_resolve() {
    let (manager, factory) = manager();
    let platform = factory.latest();
    let events = start_watch(&manager).await;

    platform.emit(HTTP, BrowseEvent::Found(record("A"))).await;
    assert_eq!(next_event(&events).await, event("added", "A"));
    let pending = platform.next_resolve().await;

    let (cb, rx) = callback();
    manager.unwatch(HTTP, "local.", cb).await.unwrap();
    assert_eq!(next(&rx).await, Delivery::Success(None));

    pending.complete();
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert!(events.recv().await.is_err());
}

#[tokio::test]
async fn test_close_stops_every_watch() {
    let (manager, factory) = manager();
    let platform = factory.latest();

    let http = start_watch(&manager).await;
    let (cb, ipp) = callback();
    manager
        .watch("_ipp._tcp.", "local.", AddressFamily::Any, cb)
        .await
        .unwrap();
    assert_eq!(next(&ipp).await, Delivery::NoResult);

    let (cb, rx) = callback();
    manager.close(cb).await.unwrap();
    assert_eq!(next(&rx).await, Delivery::Success(None));
    assert!(rx.try_recv().is_err());

    assert!(http.recv().await.is_err());
    assert!(ipp.recv().await.is_err());
    assert_eq!(
        platform.count(|call| matches!(call, Call::StopDiscovery(_))),
        2
    );
    assert!(manager.status().await.watches.is_empty());
}

#[tokio::test]
async fn test_watches_are_independent_of_publications() {
    let (manager, _factory) = manager();

    let (cb, rx) = callback();
    manager.register(descriptor("web"), cb).await.unwrap();
    next(&rx).await;
    let _events = start_watch(&manager).await;

    let (cb, rx) = callback();
    manager.close(cb).await.unwrap();
    next(&rx).await;

    let status = manager.status().await;
    assert_eq!(status.publications.len(), 1);
    assert!(status.watches.is_empty());
}
