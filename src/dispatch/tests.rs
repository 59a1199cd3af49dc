//! Dispatch Module Tests
//!
//! Exercises the queues and the single-writer loop end to end on a tokio runtime.
//!
//! ## Test Scopes
//! - **Queues**: capacities, backpressure and closed-queue errors.
//! - **Dispatch Semantics**: registration, removal, package rendering and queries.
//! - **Loop Behaviour**: per-queue FIFO, fairness, exactly-once delivery and drain on close.

#[cfg(test)]
mod tests {
    use crate::dispatch::dispatcher::{DispatchError, Dispatcher};
    use crate::dispatch::queue::{EventProducer, QueueCapacities, QueueKind, event_queues};
    use crate::dispatch::sink::{OutputSink, SinkRecord, SinkRejection};
    use crate::dispatch::types::{
        Event, InboundMessage, InboundPackage, MembershipQuery, MessageKind, body_length,
    };
    use crate::error::NodeError;
    use crate::membership::table::ClusterMembership;
    use crate::membership::types::{ServerDescriptor, ServerId};
    use std::collections::HashSet;
    use std::time::Duration;
    use tokio::sync::{mpsc, oneshot};
    use tokio::task::JoinHandle;

    struct Harness {
        producer: EventProducer,
        close: oneshot::Sender<()>,
        dispatcher: JoinHandle<ClusterMembership>,
        sink_rx: mpsc::Receiver<SinkRecord>,
    }

    fn spawn_dispatcher(capacities: QueueCapacities, sink_capacity: usize) -> Harness {
        let (producer, receivers) = event_queues(capacities);
        let (sink, sink_rx) = OutputSink::channel(sink_capacity);
        let (close, close_rx) = oneshot::channel();
        let dispatcher = tokio::spawn(Dispatcher::new(receivers, sink).run(close_rx));

        Harness {
            producer,
            close,
            dispatcher,
            sink_rx,
        }
    }

    async fn stop(harness: Harness) -> (ClusterMembership, mpsc::Receiver<SinkRecord>) {
        harness.close.send(()).unwrap();
        let membership = harness.dispatcher.await.unwrap();
        (membership, harness.sink_rx)
    }

    fn s1() -> ServerDescriptor {
        ServerDescriptor::new("s1", "10.0.0.1", 9000, false)
    }

    fn message(summary: String) -> InboundMessage {
        InboundMessage::new(MessageKind::ToGate, summary, vec![])
    }

    // ============================================================
    // QUEUE TESTS
    // ============================================================

    #[test]
    fn test_default_capacities() {
        let capacities = QueueCapacities::default();

        assert_eq!(capacities.registration, 10);
        assert_eq!(capacities.removal, 10);
        assert_eq!(capacities.message, 10_000);
        assert_eq!(capacities.package, 1_000);
        assert!(capacities.validate().is_ok());
    }

    #[test]
    fn test_zero_capacity_is_rejected() {
        let capacities = QueueCapacities {
            package: 0,
            ..QueueCapacities::default()
        };

        let err = capacities.validate().unwrap_err();
        assert!(err.to_string().contains("package queue capacity"));
    }

    #[tokio::test]
    async fn test_producer_blocks_when_queue_is_full() {
        // ARRANGE: registration queue holding two events, no dispatcher running
        let capacities = QueueCapacities {
            registration: 2,
            ..QueueCapacities::default()
        };
        let (producer, mut receivers) = event_queues(capacities);

        for i in 0..2 {
            producer
                .register(ServerDescriptor::new(format!("s{}", i), "10.0.0.1", 9000, false))
                .await
                .unwrap();
        }
        assert_eq!(producer.available(QueueKind::Registration), 0);

        // ACT: a third send must suspend
        let blocked = {
            let producer = producer.clone();
            tokio::spawn(async move {
                producer
                    .register(ServerDescriptor::new("s2", "10.0.0.1", 9000, false))
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!blocked.is_finished(), "Producer should block on a full queue");

        // ASSERT: making room releases the producer and nothing is dropped or reordered
        let first = receivers.registration.recv().await.unwrap();
        tokio::time::timeout(Duration::from_secs(1), blocked)
            .await
            .expect("Producer should resume once room is made")
            .unwrap()
            .unwrap();

        let second = receivers.registration.recv().await.unwrap();
        let third = receivers.registration.recv().await.unwrap();
        assert_eq!(first.id.as_str(), "s0");
        assert_eq!(second.id.as_str(), "s1");
        assert_eq!(third.id.as_str(), "s2");
    }

    #[tokio::test]
    async fn test_send_after_close_returns_queue_closed() {
        let harness = spawn_dispatcher(QueueCapacities::default(), 16);
        let producer = harness.producer.clone();

        let _ = stop(harness).await;

        assert!(producer.is_closed());
        let err = producer.register(s1()).await.unwrap_err();
        assert!(matches!(err, NodeError::QueueClosed(QueueKind::Registration)));
        let err = producer.remove(ServerId::from("s1")).await.unwrap_err();
        assert!(matches!(err, NodeError::QueueClosed(QueueKind::Removal)));
        let err = producer.members().await.unwrap_err();
        assert!(matches!(err, NodeError::QueueClosed(QueueKind::Query)));
    }

    // ============================================================
    // DISPATCH SEMANTICS (no runtime loop)
    // ============================================================

    #[test]
    fn test_dispatch_register_then_remove() {
        let (_producer, receivers) = event_queues(QueueCapacities::default());
        let (sink, _sink_rx) = OutputSink::channel(4);
        let mut dispatcher = Dispatcher::new(receivers, sink);

        dispatcher.dispatch(Event::Register(s1())).unwrap();
        assert_eq!(dispatcher.membership().get(&ServerId::from("s1")), Some(&s1()));

        dispatcher.dispatch(Event::Remove(ServerId::from("s1"))).unwrap();
        dispatcher.dispatch(Event::Remove(ServerId::from("s1"))).unwrap();

        assert!(dispatcher.membership().is_empty());
        assert_eq!(dispatcher.stats().registrations, 1);
        assert_eq!(dispatcher.stats().removals, 2);
    }

    #[test]
    fn test_dispatch_matches_sequential_replay() {
        let (_producer, receivers) = event_queues(QueueCapacities::default());
        let (sink, _sink_rx) = OutputSink::channel(4);
        let mut dispatcher = Dispatcher::new(receivers, sink);
        let mut expected = ClusterMembership::new();

        let sequence = vec![
            Event::Register(ServerDescriptor::new("a", "10.0.0.1", 1, false)),
            Event::Register(ServerDescriptor::new("b", "10.0.0.2", 2, true)),
            Event::Remove(ServerId::from("a")),
            Event::Register(ServerDescriptor::new("b", "10.0.0.3", 3, false)),
            Event::Remove(ServerId::from("zzz")),
            Event::Register(ServerDescriptor::new("a", "10.0.0.4", 4, false)),
        ];

        for event in sequence {
            match &event {
                Event::Register(descriptor) => {
                    expected.register(descriptor.clone());
                }
                Event::Remove(id) => {
                    expected.remove(id);
                }
                _ => unreachable!(),
            }
            dispatcher.dispatch(event).unwrap();
        }

        assert_eq!(dispatcher.membership(), &expected);
        assert_eq!(
            dispatcher.membership().get(&ServerId::from("b")).unwrap().port,
            3
        );
    }

    #[test]
    fn test_full_sink_drops_and_counts() {
        let (_producer, receivers) = event_queues(QueueCapacities::default());
        let (sink, _sink_rx) = OutputSink::channel(1);
        let counter = sink.clone();
        let mut dispatcher = Dispatcher::new(receivers, sink);

        dispatcher
            .dispatch(Event::Message(message("first".to_string())))
            .unwrap();
        let err = dispatcher
            .dispatch(Event::Message(message("second".to_string())))
            .unwrap_err();

        assert_eq!(err, DispatchError::Sink(SinkRejection::Full));
        assert_eq!(counter.dropped(), 1);
        assert_eq!(dispatcher.stats().messages, 2);
    }

    #[test]
    fn test_abandoned_query_is_reported_not_fatal() {
        let (_producer, receivers) = event_queues(QueueCapacities::default());
        let (sink, _sink_rx) = OutputSink::channel(1);
        let mut dispatcher = Dispatcher::new(receivers, sink);

        let (reply_tx, reply_rx) = oneshot::channel();
        drop(reply_rx);

        let err = dispatcher
            .dispatch(Event::Query(MembershipQuery::Count(reply_tx)))
            .unwrap_err();
        assert_eq!(err, DispatchError::QueryAbandoned);

        dispatcher.dispatch(Event::Register(s1())).unwrap();
        assert_eq!(dispatcher.membership().len(), 1);
    }

    #[test]
    fn test_package_rendering() {
        let package = InboundPackage::new(7, b"hello".to_vec()).unwrap();

        assert_eq!(package.length(), 5);
        assert_eq!(package.render(), "type: 7, length: 5, data: hello");
    }

    #[test]
    fn test_sink_rejections_render_as_dispatch_errors() {
        assert_eq!(
            DispatchError::Sink(SinkRejection::Full).to_string(),
            "output sink is full"
        );
        assert_eq!(
            DispatchError::Sink(SinkRejection::Closed).to_string(),
            "output sink is closed"
        );
    }

    #[tokio::test]
    async fn test_spawned_sink_writes_and_stops_when_dropped() {
        let (sink, worker) = OutputSink::spawn(4);

        sink.forward(SinkRecord::Package("type: 1, length: 0, data: ".to_string()))
            .unwrap();
        sink.forward(SinkRecord::Message("[to_gate] hi (0 bytes)".to_string()))
            .unwrap();
        drop(sink);

        tokio::time::timeout(Duration::from_secs(2), worker)
            .await
            .expect("Worker should exit once every sink handle is gone")
            .unwrap();
    }

    #[cfg(target_pointer_width = "64")]
    #[test]
    fn test_oversized_body_length_is_an_error_not_a_truncation() {
        assert_eq!(body_length(u32::MAX as usize).unwrap(), u32::MAX);

        let err = body_length(u32::MAX as usize + 1).unwrap_err();
        assert!(matches!(err, NodeError::PackageTooLarge(len) if len == u32::MAX as usize + 1));
    }

    #[test]
    fn test_package_rendering_tolerates_invalid_utf8() {
        let package = InboundPackage::new(1, vec![0xff, b'o', b'k']).unwrap();

        assert_eq!(package.length(), 3);
        assert!(package.render().ends_with("data: \u{fffd}ok"));
    }

    // ============================================================
    // LOOP SCENARIOS
    // ============================================================

    #[tokio::test]
    async fn test_register_then_query_membership() {
        let harness = spawn_dispatcher(QueueCapacities::default(), 16);

        harness.producer.register(s1()).await.unwrap();
        let members = harness.producer.members().await.unwrap();

        assert_eq!(members, vec![s1()]);
        assert_eq!(
            harness.producer.lookup(ServerId::from("s1")).await.unwrap(),
            Some(s1())
        );
        assert_eq!(harness.producer.count().await.unwrap(), 1);

        let (membership, _) = stop(harness).await;
        assert_eq!(membership.snapshot(), vec![s1()]);
    }

    #[tokio::test]
    async fn test_query_always_sees_callers_earlier_registration() {
        // Repeated on fresh dispatchers: the loop picks ready queues at random, so a single run
        // could pass by luck.
        for round in 0..200 {
            let harness = spawn_dispatcher(QueueCapacities::default(), 16);

            harness.producer.register(s1()).await.unwrap();
            let members = harness.producer.members().await.unwrap();

            assert_eq!(members, vec![s1()], "Registration not visible in round {}", round);
            let _ = stop(harness).await;
        }
    }

    #[test]
    fn test_query_applies_buffered_control_events_first() {
        // ARRANGE: events sit in the queues, nothing has been dispatched yet
        let (producer, receivers) = event_queues(QueueCapacities::default());
        let (sink, _sink_rx) = OutputSink::channel(4);
        let mut dispatcher = Dispatcher::new(receivers, sink);

        let runtime = tokio::runtime::Builder::new_current_thread().build().unwrap();
        runtime.block_on(async {
            producer.register(s1()).await.unwrap();
            producer
                .register(ServerDescriptor::new("s2", "10.0.0.2", 9000, true))
                .await
                .unwrap();
            producer.remove(ServerId::from("s2")).await.unwrap();
        });

        // ACT
        let (reply_tx, mut reply_rx) = oneshot::channel();
        dispatcher
            .dispatch(Event::Query(MembershipQuery::Snapshot(reply_tx)))
            .unwrap();

        // ASSERT
        assert_eq!(reply_rx.try_recv().unwrap(), vec![s1()]);
        assert_eq!(dispatcher.stats().registrations, 2);
        assert_eq!(dispatcher.stats().removals, 1);
        assert_eq!(producer.available(QueueKind::Registration), 10);
    }

    #[tokio::test]
    async fn test_register_then_remove_leaves_empty_membership() {
        let harness = spawn_dispatcher(QueueCapacities::default(), 16);

        harness.producer.register(s1()).await.unwrap();
        assert_eq!(harness.producer.count().await.unwrap(), 1);
        harness.producer.remove(ServerId::from("s1")).await.unwrap();
        assert_eq!(harness.producer.count().await.unwrap(), 0);

        let (membership, _) = stop(harness).await;
        assert!(membership.is_empty());
    }

    #[tokio::test]
    async fn test_registrations_are_last_write_wins_in_queue_order() {
        let harness = spawn_dispatcher(QueueCapacities::default(), 16);
        let d1 = ServerDescriptor::new("A", "10.0.0.1", 9000, false);
        let d2 = ServerDescriptor::new("A", "10.0.0.2", 9001, false);

        harness.producer.register(d1).await.unwrap();
        harness.producer.register(d2.clone()).await.unwrap();

        let (membership, _) = stop(harness).await;
        assert_eq!(membership.get(&ServerId::from("A")), Some(&d2));
    }

    #[tokio::test]
    async fn test_package_is_forwarded_to_sink() {
        let harness = spawn_dispatcher(QueueCapacities::default(), 16);

        harness
            .producer
            .push_package(InboundPackage::new(7, b"hello".to_vec()).unwrap())
            .await
            .unwrap();

        let (_, mut sink_rx) = stop(harness).await;
        let record = sink_rx.recv().await.unwrap();

        match record {
            SinkRecord::Package(text) => {
                assert!(text.contains("type: 7"));
                assert!(text.contains("length: 5"));
                assert!(text.contains("data: hello"));
            }
            other => panic!("Expected a package record, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_fifo_within_a_queue_under_concurrent_load() {
        let mut harness = spawn_dispatcher(QueueCapacities::default(), 4_096);

        let noise = {
            let producer = harness.producer.clone();
            tokio::spawn(async move {
                for i in 0..500 {
                    producer.push_message(message(format!("noise-{}", i))).await.unwrap();
                }
            })
        };

        for i in 0..500u32 {
            harness
                .producer
                .push_package(InboundPackage::new(i, b"x".to_vec()).unwrap())
                .await
                .unwrap();
        }
        noise.await.unwrap();

        let mut packages = Vec::new();
        while packages.len() < 500 {
            match harness.sink_rx.recv().await.unwrap() {
                SinkRecord::Package(text) => packages.push(text),
                SinkRecord::Message(_) => {}
            }
        }

        for (i, text) in packages.iter().enumerate() {
            assert!(
                text.starts_with(&format!("type: {},", i)),
                "Package {} dispatched out of order: {}",
                i,
                text
            );
        }

        let _ = stop(harness).await;
    }

    #[tokio::test]
    async fn test_no_queue_is_starved() {
        // ARRANGE: both data-plane queues are full before the loop starts
        let capacities = QueueCapacities {
            message: 1_000,
            package: 1_000,
            ..QueueCapacities::default()
        };
        let (producer, receivers) = event_queues(capacities);
        for i in 0..1_000u32 {
            producer.push_message(message(format!("m-{}", i))).await.unwrap();
            producer
                .push_package(InboundPackage::new(i, vec![]).unwrap())
                .await
                .unwrap();
        }

        let (sink, mut sink_rx) = OutputSink::channel(2_000);
        let (close, close_rx) = oneshot::channel();
        let dispatcher = tokio::spawn(Dispatcher::new(receivers, sink).run(close_rx));

        // ACT: look at the first hundred forwarded records
        let mut messages = 0;
        let mut packages = 0;
        for _ in 0..100 {
            match sink_rx.recv().await.unwrap() {
                SinkRecord::Message(_) => messages += 1,
                SinkRecord::Package(_) => packages += 1,
            }
        }

        // ASSERT: both queues were being served
        assert!(messages > 0, "Message queue was starved");
        assert!(packages > 0, "Package queue was starved");

        close.send(()).unwrap();
        dispatcher.await.unwrap();
    }

    #[tokio::test]
    async fn test_concurrent_messages_dispatched_exactly_once() {
        // ARRANGE: a shallow message queue and no dispatcher yet
        const CAPACITY: usize = 10;
        let capacities = QueueCapacities {
            message: CAPACITY,
            ..QueueCapacities::default()
        };
        let (producer, receivers) = event_queues(capacities);

        let mut producers = Vec::new();
        for p in 0..50 {
            let producer = producer.clone();
            producers.push(tokio::spawn(async move {
                for i in 0..200 {
                    producer
                        .push_message(message(format!("p{}-m{}", p, i)))
                        .await
                        .unwrap();
                }
            }));
        }
        tokio::time::sleep(Duration::from_millis(100)).await;

        // ASSERT: the queue holds exactly its capacity and every producer is suspended
        assert_eq!(producer.max_capacity(QueueKind::Message), CAPACITY);
        assert_eq!(producer.available(QueueKind::Message), 0);
        assert_eq!(receivers.message.len(), CAPACITY);
        for handle in &producers {
            assert!(!handle.is_finished(), "Producers must block on a full queue");
        }

        // ACT: release the dispatcher
        let (sink, mut sink_rx) = OutputSink::channel(10_000);
        let (close, close_rx) = oneshot::channel();
        let dispatcher = tokio::spawn(Dispatcher::new(receivers, sink).run(close_rx));

        let collector = tokio::spawn(async move {
            let mut seen = HashSet::new();
            let mut total = 0;
            while total < 10_000 {
                match sink_rx.recv().await {
                    Some(SinkRecord::Message(text)) => {
                        total += 1;
                        seen.insert(text);
                    }
                    Some(SinkRecord::Package(_)) => {}
                    None => break,
                }
            }
            (total, seen)
        });

        for handle in producers {
            handle.await.unwrap();
        }

        let (total, seen) = tokio::time::timeout(Duration::from_secs(10), collector)
            .await
            .expect("All messages should be dispatched")
            .unwrap();

        // ASSERT: all 50 x 200 arrived, each exactly once
        assert_eq!(total, 10_000);
        assert_eq!(seen.len(), 10_000, "Every message must be dispatched exactly once");

        close.send(()).unwrap();
        dispatcher.await.unwrap();
    }

    #[tokio::test]
    async fn test_concurrent_control_events_are_neither_lost_nor_duplicated() {
        let harness = spawn_dispatcher(QueueCapacities::default(), 16);

        let mut producers = Vec::new();
        for p in 0..20 {
            let producer = harness.producer.clone();
            producers.push(tokio::spawn(async move {
                for i in 0..5 {
                    let id = format!("p{}-s{}", p, i);
                    producer
                        .register(ServerDescriptor::new(id.as_str(), "10.0.0.1", 9000 + i, false))
                        .await
                        .unwrap();

                    // Odd servers are retired right after their registration is visible.
                    if i % 2 == 1 {
                        let seen = producer.lookup(ServerId::from(id.as_str())).await.unwrap();
                        assert!(seen.is_some(), "Own registration of {} not visible", id);
                        producer.remove(ServerId::from(id.as_str())).await.unwrap();
                    }
                }
            }));
        }
        for handle in producers {
            handle.await.unwrap();
        }

        let (membership, _) = stop(harness).await;

        assert_eq!(membership.len(), 20 * 3);
        for p in 0..20 {
            for i in 0..5 {
                let id = ServerId(format!("p{}-s{}", p, i));
                assert_eq!(membership.contains(&id), i % 2 == 0, "Unexpected state for {}", id);
            }
        }
    }

    #[tokio::test]
    async fn test_close_drains_buffered_events() {
        // ARRANGE: fill queues, then ask the dispatcher to stop before it ever runs
        let (producer, receivers) = event_queues(QueueCapacities::default());
        for i in 0..10 {
            producer
                .register(ServerDescriptor::new(format!("s{}", i), "10.0.0.1", 9000, false))
                .await
                .unwrap();
        }
        for i in 0..50u32 {
            producer
                .push_package(InboundPackage::new(i, vec![]).unwrap())
                .await
                .unwrap();
        }

        let (sink, mut sink_rx) = OutputSink::channel(64);
        let (close, close_rx) = oneshot::channel();
        close.send(()).unwrap();

        // ACT
        let membership = Dispatcher::new(receivers, sink).run(close_rx).await;

        // ASSERT: every buffered event was applied or forwarded
        assert_eq!(membership.len(), 10);
        let mut forwarded = 0;
        while let Ok(record) = sink_rx.try_recv() {
            assert!(matches!(record, SinkRecord::Package(_)));
            forwarded += 1;
        }
        assert_eq!(forwarded, 50);
        assert!(producer.is_closed());
    }
}
