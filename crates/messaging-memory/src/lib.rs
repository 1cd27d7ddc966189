//! In-memory implementation of the messaging crate.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod broker;
mod error;
mod transport;

pub use broker::MemoryBroker;
pub use error::Error;
pub use transport::{MemoryTransport, MemoryTransportOptions};

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use bytes::Bytes;
    use courier_messaging::{Envelope, EnvelopeHandler, Transport};
    use serde_json::json;
    use tokio::time::Instant;

    fn transport(broker: &MemoryBroker, group: &str) -> MemoryTransport {
        MemoryTransport::new(
            broker.clone(),
            MemoryTransportOptions {
                group_id: group.to_string(),
                consume_timeout: Duration::from_millis(50),
                max_batch_size: 10,
            },
        )
    }

    fn topics(names: &[&str]) -> Vec<String> {
        names.iter().map(ToString::to_string).collect()
    }

    #[derive(Default)]
    struct CountingHandler {
        count: AtomicUsize,
    }

    #[async_trait]
    impl EnvelopeHandler for CountingHandler {
        async fn handle(&self, _envelope: Envelope) -> bool {
            self.count.fetch_add(1, Ordering::SeqCst);
            true
        }
    }

    #[tokio::test]
    async fn test_publish_then_consume() {
        let broker = MemoryBroker::new();
        let consumer = transport(&broker, "g1");
        let producer = transport(&broker, "producer");

        consumer.subscribe(&topics(&["replies"])).await.unwrap();
        producer
            .publish("replies", &Envelope::new("abc", json!({"results": "hello"})))
            .await
            .unwrap();

        let envelopes = consumer.consume().await.unwrap();
        assert_eq!(envelopes.len(), 1);
        assert_eq!(envelopes[0].id, "abc");
        assert_eq!(envelopes[0].message, json!({"results": "hello"}));
    }

    #[tokio::test]
    async fn test_consume_times_out_empty() {
        let broker = MemoryBroker::new();
        let consumer = transport(&broker, "g1");
        consumer.subscribe(&topics(&["replies"])).await.unwrap();

        let started = Instant::now();
        let envelopes = consumer.consume().await.unwrap();

        assert!(envelopes.is_empty());
        assert!(started.elapsed() >= Duration::from_millis(50));
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_consume_wakes_on_publish() {
        let broker = MemoryBroker::new();
        let consumer = Arc::new(MemoryTransport::new(
            broker.clone(),
            MemoryTransportOptions {
                group_id: "g1".to_string(),
                consume_timeout: Duration::from_secs(5),
                max_batch_size: 10,
            },
        ));
        consumer.subscribe(&topics(&["replies"])).await.unwrap();

        let waiting = tokio::spawn({
            let consumer = consumer.clone();
            async move { consumer.consume().await }
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        broker.publish_raw(
            "replies",
            Bytes::try_from(&Envelope::new("late", json!({}))).unwrap(),
        );

        let envelopes = tokio::time::timeout(Duration::from_secs(1), waiting)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(envelopes[0].id, "late");
    }

    #[tokio::test]
    async fn test_distinct_groups_each_receive() {
        let broker = MemoryBroker::new();
        let first = transport(&broker, "sdk-a");
        let second = transport(&broker, "sdk-b");
        first.subscribe(&topics(&["replies"])).await.unwrap();
        second.subscribe(&topics(&["replies"])).await.unwrap();

        first
            .publish("replies", &Envelope::new("x", json!({})))
            .await
            .unwrap();

        assert_eq!(first.consume().await.unwrap().len(), 1);
        assert_eq!(second.consume().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_shared_group_competes() {
        let broker = MemoryBroker::new();
        let first = transport(&broker, "shared");
        let second = transport(&broker, "shared");
        first.subscribe(&topics(&["replies"])).await.unwrap();
        second.subscribe(&topics(&["replies"])).await.unwrap();

        for i in 0..4 {
            first
                .publish("replies", &Envelope::new(i.to_string(), json!({})))
                .await
                .unwrap();
        }

        let taken_by_first = first.consume().await.unwrap().len();
        let taken_by_second = second.consume().await.unwrap().len();

        assert_eq!(taken_by_first + taken_by_second, 4);
        assert_eq!(broker.backlog("replies", "shared"), 0);
    }

    #[tokio::test]
    async fn test_batch_size_is_bounded() {
        let broker = MemoryBroker::new();
        let consumer = MemoryTransport::new(
            broker.clone(),
            MemoryTransportOptions {
                group_id: "g".to_string(),
                consume_timeout: Duration::from_millis(20),
                max_batch_size: 2,
            },
        );
        consumer.subscribe(&topics(&["replies"])).await.unwrap();

        for i in 0..5 {
            consumer
                .publish("replies", &Envelope::new(i.to_string(), json!({})))
                .await
                .unwrap();
        }

        assert_eq!(consumer.consume().await.unwrap().len(), 2);
        assert_eq!(broker.backlog("replies", "g"), 3);
    }

    #[tokio::test]
    async fn test_undecodable_message_is_skipped() {
        let broker = MemoryBroker::new();
        let consumer = transport(&broker, "g");
        let handler = Arc::new(CountingHandler::default());
        consumer.register_handler(handler.clone());
        consumer.subscribe(&topics(&["replies"])).await.unwrap();

        broker.publish_raw("replies", Bytes::from_static(b"garbage"));
        consumer
            .publish("replies", &Envelope::new("ok", json!({})))
            .await
            .unwrap();

        let envelopes = consumer.consume().await.unwrap();
        assert_eq!(envelopes.len(), 1);
        assert_eq!(handler.count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_subscribe_is_idempotent() {
        let broker = MemoryBroker::new();
        let consumer = transport(&broker, "g");
        consumer.subscribe(&topics(&["replies"])).await.unwrap();
        consumer.subscribe(&topics(&["replies"])).await.unwrap();

        consumer
            .publish("replies", &Envelope::new("once", json!({})))
            .await
            .unwrap();

        assert_eq!(consumer.consume().await.unwrap().len(), 1);
        assert!(consumer.consume().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unsubscribed_topic_drops_messages() {
        let broker = MemoryBroker::new();
        let producer = transport(&broker, "p");
        producer
            .publish("nobody-listens", &Envelope::new("lost", json!({})))
            .await
            .unwrap();

        let consumer = transport(&broker, "g");
        consumer.subscribe(&topics(&["nobody-listens"])).await.unwrap();
        assert!(consumer.consume().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_close_is_idempotent_and_final() {
        let broker = MemoryBroker::new();
        let consumer = transport(&broker, "g");

        consumer.close().await.unwrap();
        consumer.close().await.unwrap();

        assert!(matches!(consumer.consume().await, Err(Error::Closed)));
        assert!(matches!(
            consumer.publish("t", &Envelope::new("x", json!({}))).await,
            Err(Error::Closed)
        ));
    }

    #[tokio::test]
    async fn test_closed_transport_stops_receiving() {
        let broker = MemoryBroker::new();
        let producer = transport(&broker, "producer");

        for i in 0..5 {
            let consumer = transport(&broker, &format!("sdk-{i}"));
            consumer.subscribe(&topics(&["replies"])).await.unwrap();
            consumer.close().await.unwrap();
        }

        for i in 0..100 {
            producer
                .publish("replies", &Envelope::new(i.to_string(), json!({})))
                .await
                .unwrap();
        }

        for i in 0..5 {
            assert_eq!(broker.backlog("replies", &format!("sdk-{i}")), 0);
        }
    }

    #[tokio::test]
    async fn test_group_queue_outlives_one_member() {
        let broker = MemoryBroker::new();
        let first = transport(&broker, "shared");
        let second = transport(&broker, "shared");
        first.subscribe(&topics(&["replies"])).await.unwrap();
        second.subscribe(&topics(&["replies"])).await.unwrap();

        first.close().await.unwrap();
        transport(&broker, "producer")
            .publish("replies", &Envelope::new("kept", json!({})))
            .await
            .unwrap();

        assert_eq!(broker.backlog("replies", "shared"), 1);
        let envelopes = second.consume().await.unwrap();
        assert_eq!(envelopes[0].id, "kept");
    }

    #[tokio::test]
    async fn test_invalid_topic() {
        let broker = MemoryBroker::new();
        let consumer = transport(&broker, "g");

        assert!(matches!(
            consumer.subscribe(&topics(&["replies.>"])).await,
            Err(Error::InvalidTopic(_))
        ));
        assert!(matches!(
            consumer.subscribe(&topics(&[""])).await,
            Err(Error::InvalidTopic(_))
        ));
    }
}
