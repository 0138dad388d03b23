use std::time::Duration;

use tokio::time::timeout;
use tokio_stream::StreamExt;

use opizontas_registry::services::event::{EventConfig, ServiceEventKind};
use opizontas_registry::services::registry::RegistryConfig;
use opizontas_registry::{ModuleId, Properties, ServiceObject, ServiceRegistry};

const PUBLISHER: ModuleId = ModuleId(1);
const SUBSCRIBER: ModuleId = ModuleId(2);

#[tokio::test]
async fn test_subscribe_receives_filtered_events() {
    let registry = ServiceRegistry::default();
    let mut stream = registry
        .subscribe(SUBSCRIBER, Some("(objectClass=Foo)"))
        .expect("Failed to subscribe");

    let foo = registry
        .register_service(PUBLISHER, ["Foo"], ServiceObject::new(1u8), Properties::new())
        .expect("Failed to register Foo");
    registry
        .register_service(PUBLISHER, ["Bar"], ServiceObject::new(2u8), Properties::new())
        .expect("Failed to register Bar");
    registry
        .unregister_service(PUBLISHER, &foo)
        .expect("Failed to unregister Foo");

    let registered = timeout(Duration::from_secs(1), stream.next())
        .await
        .expect("Timeout waiting for event")
        .expect("Stream ended unexpectedly");
    assert_eq!(registered.kind, ServiceEventKind::Registered);
    assert_eq!(registered.reference, foo.reference());

    let unregistering = timeout(Duration::from_secs(1), stream.next())
        .await
        .expect("Timeout waiting for event")
        .expect("Stream ended unexpectedly");
    assert_eq!(unregistering.kind, ServiceEventKind::Unregistering);
    assert_eq!(unregistering.reference.id(), foo.id());

    assert!(
        timeout(Duration::from_millis(50), stream.next())
            .await
            .is_err()
    );
}

#[tokio::test]
async fn test_event_stats() {
    let registry = ServiceRegistry::default();
    let stream = registry
        .subscribe(SUBSCRIBER, Some("(objectClass=Foo)"))
        .expect("Failed to subscribe");
    assert_eq!(stream.consumer(), SUBSCRIBER);

    registry
        .register_service(PUBLISHER, ["Foo"], ServiceObject::new(()), Properties::new())
        .expect("Failed to register Foo");
    registry
        .register_service(PUBLISHER, ["Bar"], ServiceObject::new(()), Properties::new())
        .expect("Failed to register Bar");

    let stats = registry.event_stats();
    assert_eq!(stats.events_published, 2);
    assert_eq!(stats.events_delivered, 1);
    assert_eq!(stats.delivery_failures, 0);
    assert_eq!(stats.active_listeners, 1);

    assert!(registry.unsubscribe(&stream));
    assert!(!registry.unsubscribe(&stream));
    assert_eq!(registry.event_stats().active_listeners, 0);
}

#[tokio::test]
async fn test_full_stream_drops_events() {
    let events = EventConfig {
        stream_capacity: 1,
        ..Default::default()
    };
    let registry = ServiceRegistry::new(RegistryConfig::default(), events);
    let mut stream = registry
        .subscribe(SUBSCRIBER, None)
        .expect("Failed to subscribe");

    for i in 0..3u8 {
        registry
            .register_service(PUBLISHER, ["Foo"], ServiceObject::new(i), Properties::new())
            .expect("Failed to register service");
    }

    let stats = registry.event_stats();
    assert_eq!(stats.events_published, 3);
    assert_eq!(stats.events_delivered, 1);
    assert_eq!(stats.delivery_failures, 2);

    let first = timeout(Duration::from_secs(1), stream.next())
        .await
        .expect("Timeout waiting for event")
        .expect("Stream ended unexpectedly");
    assert_eq!(first.reference.id(), 1);
}

#[tokio::test]
async fn test_dropped_events_not_counted_without_metrics() {
    let events = EventConfig {
        stream_capacity: 1,
        enable_metrics: false,
    };
    let registry = ServiceRegistry::new(RegistryConfig::default(), events);
    let mut stream = registry
        .subscribe(SUBSCRIBER, None)
        .expect("Failed to subscribe");

    for i in 0..3u8 {
        registry
            .register_service(PUBLISHER, ["Foo"], ServiceObject::new(i), Properties::new())
            .expect("Failed to register service");
    }

    let stats = registry.event_stats();
    assert_eq!(stats.events_published, 0);
    assert_eq!(stats.events_delivered, 0);
    assert_eq!(stats.delivery_failures, 0);
    assert_eq!(stats.active_listeners, 1);

    let first = timeout(Duration::from_secs(1), stream.next())
        .await
        .expect("Timeout waiting for event")
        .expect("Stream ended unexpectedly");
    assert_eq!(first.reference.id(), 1);
}

#[tokio::test]
async fn test_stream_reports_modified_end_match() {
    let registry = ServiceRegistry::default();
    let mut stream = registry
        .subscribe(SUBSCRIBER, Some("(service.ranking>=10)"))
        .expect("Failed to subscribe");

    let registration = registry
        .register_service(
            PUBLISHER,
            ["Foo"],
            ServiceObject::new(()),
            Properties::new().with("service.ranking", 10),
        )
        .expect("Failed to register Foo");
    registry
        .set_properties(&registration, Properties::new().with("service.ranking", 11))
        .expect("Failed to set properties");
    registry
        .set_properties(&registration, Properties::new().with("service.ranking", 1))
        .expect("Failed to set properties");

    let mut kinds = Vec::new();
    for _ in 0..3 {
        let event = timeout(Duration::from_secs(1), stream.next())
            .await
            .expect("Timeout waiting for event")
            .expect("Stream ended unexpectedly");
        kinds.push(event.kind);
    }
    assert_eq!(
        kinds,
        vec![
            ServiceEventKind::Registered,
            ServiceEventKind::Modified,
            ServiceEventKind::ModifiedEndMatch,
        ]
    );
}

#[tokio::test]
async fn test_stream_ends_after_shutdown() {
    let registry = ServiceRegistry::default();
    let mut stream = registry
        .subscribe(SUBSCRIBER, None)
        .expect("Failed to subscribe");
    registry
        .register_service(PUBLISHER, ["Foo"], ServiceObject::new(()), Properties::new())
        .expect("Failed to register Foo");

    registry.shutdown();

    let mut kinds = Vec::new();
    while let Some(event) = timeout(Duration::from_secs(1), stream.next())
        .await
        .expect("Timeout waiting for stream to end")
    {
        kinds.push(event.kind);
    }
    assert_eq!(
        kinds,
        vec![ServiceEventKind::Registered, ServiceEventKind::Unregistering]
    );
    assert!(registry.subscribe(SUBSCRIBER, None).is_err());
}
