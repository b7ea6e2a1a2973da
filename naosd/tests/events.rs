//! Scenario F and Testable Property 7: a subscriber falling behind a burst
//! of events caps at 256 real frames plus exactly one overflow marker,
//! exercised through the production forwarder task rather than by poking
//! [`naos_core::events::BoundedSubscriber`] directly.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use naos_core::events::{Event, Frame, Severity};
use parking_lot::Mutex;

#[path = "support/mod.rs"]
mod support;
use support::build_test_app;

#[tokio::test]
async fn flood_caps_subscriber_at_256_plus_one_overflow_frame() -> Result<()> {
    let app = build_test_app().await?;
    let subscriber = Arc::new(naos_core::events::BoundedSubscriber::new(256));
    let categories: naosd::live_push::CategoryFilter = Arc::new(Mutex::new(Vec::new()));
    let forwarder = naosd::live_push::spawn_forwarder(app.state.events.clone(), subscriber.clone(), categories);

    for i in 0..300u64 {
        app.state.events.publish(Event::new("disk_added", Severity::Info, format!("event {i}"))).await;
    }

    // Give the forwarder task a chance to drain the broadcast channel; it
    // has nothing else competing for the runtime in this test.
    tokio::time::sleep(Duration::from_millis(200)).await;
    forwarder.abort();

    let mut real = 0;
    let mut overflow = 0;
    while let Some(frame) = subscriber.try_pop() {
        match frame {
            Frame::Event(_) => real += 1,
            Frame::Overflow(_) => overflow += 1,
        }
    }
    assert_eq!(real, 256);
    assert_eq!(overflow, 1);
    Ok(())
}

/// A subscriber that never fills stays empty of overflow frames, and every
/// event it does see carries a strictly increasing sequence number.
#[tokio::test]
async fn light_traffic_has_no_overflow_and_preserves_order() -> Result<()> {
    let app = build_test_app().await?;
    let subscriber = Arc::new(naos_core::events::BoundedSubscriber::new(256));
    let categories: naosd::live_push::CategoryFilter = Arc::new(Mutex::new(Vec::new()));
    let forwarder = naosd::live_push::spawn_forwarder(app.state.events.clone(), subscriber.clone(), categories);

    for i in 0..10u64 {
        app.state.events.publish(Event::new("disk_added", Severity::Info, format!("event {i}"))).await;
    }
    tokio::time::sleep(Duration::from_millis(100)).await;
    forwarder.abort();

    let mut last_sequence = None;
    let mut count = 0;
    while let Some(frame) = subscriber.try_pop() {
        match frame {
            Frame::Event(event) => {
                if let Some(prev) = last_sequence {
                    assert!(event.sequence > prev);
                }
                last_sequence = Some(event.sequence);
                count += 1;
            }
            Frame::Overflow(_) => panic!("unexpected overflow frame under light traffic"),
        }
    }
    assert_eq!(count, 10);
    Ok(())
}

/// A subscriber registered with a category allow-list never sees events
/// outside it, except criticals which always bypass the filter.
#[tokio::test]
async fn category_filter_admits_only_listed_categories_plus_critical() -> Result<()> {
    let app = build_test_app().await?;
    let subscriber = Arc::new(naos_core::events::BoundedSubscriber::new(256));
    let categories: naosd::live_push::CategoryFilter = Arc::new(Mutex::new(vec!["disk_added".to_string()]));
    let forwarder = naosd::live_push::spawn_forwarder(app.state.events.clone(), subscriber.clone(), categories);

    app.state.events.publish(Event::new("disk_added", Severity::Info, "disk0 added")).await;
    app.state.events.publish(Event::new("disk_removed", Severity::Info, "disk1 removed")).await;
    app.state.events.publish(Event::new("zfs_checksum", Severity::Critical, "checksum errors")).await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    forwarder.abort();

    let mut seen_categories = Vec::new();
    while let Some(Frame::Event(event)) = subscriber.try_pop() {
        seen_categories.push(event.category);
    }
    assert_eq!(seen_categories, vec!["disk_added".to_string(), "zfs_checksum".to_string()]);
    Ok(())
}
