//! Message Bus Integration Tests
//!
//! End-to-end behaviour of the in-memory bus through its public API:
//! fan-out, lifecycle errors, failure isolation and graceful shutdown.

mod common;

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::sync::{Barrier, Notify};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use common::*;
use messagebus_core::events::UserCreatedEvent;
use messagebus_core::handlers::UserCreatedHandler;
use messagebus_core::messagebus::{
    BusState, EventContext, HandlerFn, InMemoryMessageBus, MessageBus, MessageBusModule,
    Publisher, PublisherExt, Subscriber,
};
use messagebus_core::services::{CreateUserRequest, InMemoryUserRepository, UserService};
use messagebus_core::{HandlerError, MessageBusError};

#[tokio::test]
async fn fan_out_delivers_once_per_handler() {
    let (tx, mut rx) = delivery_channel();
    let mut module = MessageBusModule::new(test_config());
    for label in ["a", "b", "c", "d"] {
        module = module.with_handler(RecordingHandler::new(label, "order.placed", tx.clone()));
    }
    let handle = module.start().unwrap();

    let payload = json!({"order_id": 42, "total": "19.99"});
    let message_id = handle
        .publisher()
        .publish_raw(
            EventContext::new(),
            "order.placed",
            serde_json::to_vec(&payload).unwrap(),
        )
        .await
        .unwrap();

    let mut deliveries = collect(&mut rx, 4).await;
    handle.stop().await.unwrap();
    assert!(rx.try_recv().is_err(), "no duplicate deliveries");

    deliveries.sort_by(|a, b| a.handler.cmp(&b.handler));
    let handlers: Vec<_> = deliveries.iter().map(|d| d.handler.as_str()).collect();
    assert_eq!(handlers, vec!["a", "b", "c", "d"]);
    for delivery in deliveries {
        assert_eq!(delivery.message_id, message_id);
        assert_eq!(delivery.topic, "order.placed");
        let decoded: serde_json::Value = serde_json::from_slice(&delivery.payload).unwrap();
        assert_eq!(decoded, payload);
    }
}

#[tokio::test]
async fn user_created_scenario_single_handler() {
    let (tx, mut rx) = delivery_channel();
    let handle = MessageBusModule::new(test_config())
        .with_handler(RecordingHandler::new("A", "user.created", tx))
        .start()
        .unwrap();

    handle
        .publisher()
        .publish_raw(
            EventContext::new(),
            "user.created",
            br#"{"user_id":"u1","name":"Ann"}"#.to_vec(),
        )
        .await
        .unwrap();

    let deliveries = collect(&mut rx, 1).await;
    handle.stop().await.unwrap();
    assert!(rx.try_recv().is_err());

    let decoded: serde_json::Value = serde_json::from_slice(&deliveries[0].payload).unwrap();
    assert_eq!(decoded, json!({"user_id": "u1", "name": "Ann"}));
}

#[tokio::test]
async fn user_created_scenario_two_handlers() {
    let (tx, mut rx) = delivery_channel();
    let handle = MessageBusModule::new(test_config())
        .with_handler(RecordingHandler::new("A", "user.created", tx.clone()))
        .with_handler(RecordingHandler::new("B", "user.created", tx))
        .start()
        .unwrap();

    handle
        .publisher()
        .publish_raw(
            EventContext::new(),
            "user.created",
            br#"{"user_id":"u1","name":"Ann"}"#.to_vec(),
        )
        .await
        .unwrap();

    let mut deliveries = collect(&mut rx, 2).await;
    handle.stop().await.unwrap();
    assert!(rx.try_recv().is_err());

    deliveries.sort_by(|a, b| a.handler.cmp(&b.handler));
    assert_eq!(deliveries[0].handler, "A");
    assert_eq!(deliveries[1].handler, "B");
}

#[tokio::test]
async fn publish_without_handlers_succeeds() {
    let (tx, mut rx) = delivery_channel();
    let handle = MessageBusModule::new(test_config())
        .with_handler(RecordingHandler::new("A", "user.created", tx))
        .start()
        .unwrap();

    handle
        .publisher()
        .publish_raw(EventContext::new(), "order.cancelled", b"{}".to_vec())
        .await
        .unwrap();

    let bus = handle.bus().clone();
    handle.stop().await.unwrap();

    assert!(rx.try_recv().is_err());
    let stats = bus.statistics();
    assert_eq!(stats.events_published, 1);
    assert_eq!(stats.events_without_handlers, 1);
    assert_eq!(stats.handler_invocations, 0);
}

#[tokio::test]
async fn subscribe_allowed_only_before_start() {
    let bus = InMemoryMessageBus::new(test_config()).unwrap();
    let (tx, _rx) = delivery_channel();
    bus.subscribe(RecordingHandler::new("A", "user.created", tx.clone()))
        .unwrap();

    let dispatch = bus.start(CancellationToken::new()).unwrap();
    let err = bus
        .subscribe(RecordingHandler::new("B", "user.created", tx.clone()))
        .unwrap_err();
    assert!(matches!(
        err,
        MessageBusError::AlreadyRunning {
            state: BusState::Running
        }
    ));
    assert!(err.is_lifecycle_error());

    let task = tokio::spawn(dispatch.run());
    bus.close().await.unwrap();
    task.await.unwrap().unwrap();

    let err = bus
        .subscribe(RecordingHandler::new("C", "user.created", tx))
        .unwrap_err();
    assert!(matches!(
        err,
        MessageBusError::AlreadyRunning {
            state: BusState::Closed
        }
    ));
}

#[tokio::test]
async fn publish_rejected_after_close() {
    let handle = MessageBusModule::new(test_config()).start().unwrap();
    let publisher = handle.publisher();

    assert!(publisher
        .publish_raw(EventContext::new(), "user.created", b"{}".to_vec())
        .await
        .is_ok());

    publisher.close().await.unwrap();
    assert!(matches!(
        publisher
            .publish_raw(EventContext::new(), "user.created", b"{}".to_vec())
            .await,
        Err(MessageBusError::BrokerClosed)
    ));

    handle.stop().await.unwrap();
}

#[tokio::test]
async fn close_twice_is_safe() {
    let handle = MessageBusModule::new(test_config()).start().unwrap();
    let bus = handle.bus().clone();

    bus.close().await.unwrap();
    bus.close().await.unwrap();
    handle.stop().await.unwrap();
    assert_eq!(bus.state(), BusState::Closed);
}

#[tokio::test]
async fn concurrent_close_calls_all_return() {
    let handle = MessageBusModule::new(test_config()).start().unwrap();
    let bus = handle.bus().clone();

    let closers: Vec<_> = (0..4)
        .map(|_| {
            let bus = bus.clone();
            tokio::spawn(async move { bus.close().await })
        })
        .collect();
    for closer in closers {
        tokio::time::timeout(DELIVERY_TIMEOUT, closer)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
    }
    handle.stop().await.unwrap();
}

#[tokio::test]
async fn failing_handler_does_not_block_siblings_or_later_events() {
    let (tx, mut rx) = delivery_channel();
    let handle = MessageBusModule::new(test_config())
        .with_handler(FailingHandler::new("user.created"))
        .with_handler(RecordingHandler::new("ok", "user.created", tx))
        .start()
        .unwrap();
    let publisher = handle.publisher();

    for n in 0..3 {
        publisher
            .publish_raw(
                EventContext::new(),
                "user.created",
                serde_json::to_vec(&json!({ "n": n })).unwrap(),
            )
            .await
            .unwrap();
    }

    let deliveries = collect(&mut rx, 3).await;
    assert!(deliveries.iter().all(|d| d.handler == "ok"));

    let bus = handle.bus().clone();
    handle.stop().await.unwrap();
    let stats = bus.statistics();
    assert_eq!(stats.handler_errors, 3);
    assert_eq!(stats.handler_successes, 3);
    assert_eq!(stats.in_flight, 0);
}

#[tokio::test]
async fn panicking_handler_does_not_crash_bus() {
    let (tx, mut rx) = delivery_channel();
    let handle = MessageBusModule::new(test_config())
        .with_handler(PanickingHandler::new("user.created"))
        .with_handler(RecordingHandler::new("ok", "user.created", tx))
        .start()
        .unwrap();
    let publisher = handle.publisher();

    publisher
        .publish_raw(EventContext::new(), "user.created", b"{}".to_vec())
        .await
        .unwrap();
    publisher
        .publish_raw(EventContext::new(), "user.created", b"{}".to_vec())
        .await
        .unwrap();

    collect(&mut rx, 2).await;
    assert!(handle.is_running());

    let bus = handle.bus().clone();
    handle.stop().await.unwrap();
    assert_eq!(bus.statistics().handler_panics, 2);
}

#[tokio::test]
async fn handlers_for_one_event_run_concurrently() {
    // each handler waits for the other; sequential dispatch would hang
    let barrier = Arc::new(Barrier::new(2));
    let (tx, mut rx) = delivery_channel();

    let mut module = MessageBusModule::new(test_config());
    for label in ["left", "right"] {
        let barrier = Arc::clone(&barrier);
        let tx = tx.clone();
        module = module.with_handler(Arc::new(HandlerFn::new("sync.point", move |ctx, _payload| {
            let barrier = Arc::clone(&barrier);
            let tx = tx.clone();
            async move {
                barrier.wait().await;
                let _ = tx.send(Delivery {
                    handler: label.to_string(),
                    topic: ctx.topic().to_string(),
                    payload: Vec::new(),
                    message_id: ctx.message_id(),
                    correlation_id: ctx.correlation_id(),
                });
                Ok::<(), HandlerError>(())
            }
        })));
    }
    let handle = module.start().unwrap();

    handle
        .publisher()
        .publish_raw(EventContext::new(), "sync.point", b"{}".to_vec())
        .await
        .unwrap();

    collect(&mut rx, 2).await;
    handle.stop().await.unwrap();
}

#[tokio::test]
async fn slow_handler_does_not_block_publisher() {
    let release = Arc::new(Notify::new());
    let gate = Arc::clone(&release);
    let handle = MessageBusModule::new(test_config())
        .with_handler(Arc::new(HandlerFn::new("report.requested", move |_ctx, _payload| {
            let gate = Arc::clone(&gate);
            async move {
                gate.notified().await;
                Ok::<(), HandlerError>(())
            }
        })))
        .start()
        .unwrap();
    let publisher = handle.publisher();

    let publishes = async {
        for _ in 0..10 {
            publisher
                .publish_raw(EventContext::new(), "report.requested", b"{}".to_vec())
                .await
                .unwrap();
        }
    };
    tokio::time::timeout(Duration::from_secs(1), publishes)
        .await
        .expect("publish waited on a handler");

    let bus = handle.bus().clone();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(bus.statistics().in_flight, 10);

    // release every waiting handler, then drain
    let releaser = tokio::spawn({
        let release = Arc::clone(&release);
        async move {
            loop {
                release.notify_waiters();
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        }
    });
    handle.stop().await.unwrap();
    releaser.abort();

    assert_eq!(bus.statistics().handler_successes, 10);
}

#[tokio::test]
async fn shutdown_drains_queued_events() {
    let (tx, mut rx) = delivery_channel();
    let handle = MessageBusModule::new(test_config())
        .with_handler(Arc::new(HandlerFn::new("batch.item", move |ctx, payload| {
            let tx = tx.clone();
            async move {
                tokio::time::sleep(Duration::from_millis(5)).await;
                let _ = tx.send(Delivery {
                    handler: "slow".to_string(),
                    topic: ctx.topic().to_string(),
                    payload: payload.to_vec(),
                    message_id: ctx.message_id(),
                    correlation_id: ctx.correlation_id(),
                });
                Ok::<(), HandlerError>(())
            }
        })))
        .start()
        .unwrap();
    let publisher = handle.publisher();

    for n in 0..20 {
        publisher
            .publish_raw(
                EventContext::new(),
                "batch.item",
                serde_json::to_vec(&json!({ "n": n })).unwrap(),
            )
            .await
            .unwrap();
    }
    handle.stop().await.unwrap();

    // every accepted event was handled before stop returned
    let mut handled = 0;
    while rx.try_recv().is_ok() {
        handled += 1;
    }
    assert_eq!(handled, 20);
}

#[tokio::test]
async fn correlation_id_reaches_handler() {
    let (tx, mut rx) = delivery_channel();
    let handle = MessageBusModule::new(test_config())
        .with_handler(RecordingHandler::new("A", "user.created", tx))
        .start()
        .unwrap();

    let correlation_id = Uuid::new_v4();
    handle
        .publisher()
        .publish_raw(
            EventContext::new().with_correlation_id(correlation_id),
            "user.created",
            b"{}".to_vec(),
        )
        .await
        .unwrap();

    let deliveries = collect(&mut rx, 1).await;
    handle.stop().await.unwrap();
    assert_eq!(deliveries[0].correlation_id, correlation_id);
}

#[tokio::test]
async fn typed_publish_round_trips_through_handler() {
    let handler = Arc::new(UserCreatedHandler::new());
    let handle = MessageBusModule::new(test_config())
        .with_handler(handler.clone())
        .start()
        .unwrap();

    let event = UserCreatedEvent::new(Uuid::new_v4(), "Ann", "ann@example.com");
    handle
        .publisher()
        .publish(EventContext::new(), &event)
        .await
        .unwrap();

    handle.stop().await.unwrap();
    assert_eq!(handler.received(), 1);
}

#[tokio::test]
async fn user_service_announces_new_users() {
    let handler = Arc::new(UserCreatedHandler::new());
    let handle = MessageBusModule::new(test_config())
        .with_handler(handler.clone())
        .start()
        .unwrap();

    let users = UserService::new(Arc::new(InMemoryUserRepository::new()), handle.publisher());
    let ann = users
        .create_user(
            EventContext::new(),
            CreateUserRequest::new("Ann", "ann@example.com"),
        )
        .await
        .unwrap();
    users
        .create_user(
            EventContext::new(),
            CreateUserRequest::new("Bob", "bob@example.com"),
        )
        .await
        .unwrap();

    assert_eq!(users.get_user(&ann.id.to_string()).await.unwrap(), ann);
    assert_eq!(users.list_users().await.unwrap().len(), 2);

    handle.stop().await.unwrap();
    assert_eq!(handler.received(), 2);

    // publishing fails once the bus is closed, creation still succeeds
    let carol = users
        .create_user(
            EventContext::new(),
            CreateUserRequest::new("Carol", "carol@example.com"),
        )
        .await;
    assert!(carol.is_ok());
    assert_eq!(handler.received(), 2);
}

async fn run_through_trait<B: MessageBus + Clone + 'static>(bus: B, rx: &mut DeliveryReceiver) {
    let shutdown = CancellationToken::new();
    let runner = tokio::spawn({
        let bus = bus.clone();
        let shutdown = shutdown.clone();
        async move { bus.run(shutdown).await }
    });

    // the spawned run may not have started yet; events published while
    // `new` are queued and delivered once it does
    bus.publish_raw(EventContext::new(), "user.created", b"{}".to_vec())
        .await
        .unwrap();
    collect(rx, 1).await;

    shutdown.cancel();
    tokio::time::timeout(DELIVERY_TIMEOUT, runner)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
}

#[tokio::test]
async fn bus_usable_through_message_bus_trait() {
    let bus = InMemoryMessageBus::new(test_config()).unwrap();
    let (tx, mut rx) = delivery_channel();
    bus.subscribe(RecordingHandler::new("A", "user.created", tx))
        .unwrap();

    run_through_trait(bus.clone(), &mut rx).await;
    assert_eq!(bus.state(), BusState::Closed);
}
