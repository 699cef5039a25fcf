//! Integration tests for the in-memory pipeline and its test handlers.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)] // Test code can use unwrap/expect/panic

use msgpoll_core::message::{Message, MessageHeaders, MessageId, TransportMessage};
use msgpoll_core::pipeline::{HandlerError, MessageContext, MessageHandler, Pipeline};
use msgpoll_testing::{
    CountingHandler, DEFAULT_MAX_ATTEMPTS, InMemoryPipeline, PublishingHandler, SlowHandler,
};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct PlaceOrder {
    sku: String,
}

impl Message for PlaceOrder {
    const MESSAGE_TYPE: &'static str = "PlaceOrder.v1";
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct OrderPlaced {
    sku: String,
}

impl Message for OrderPlaced {
    const MESSAGE_TYPE: &'static str = "OrderPlaced.v1";
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ShipOrder;

impl Message for ShipOrder {
    const MESSAGE_TYPE: &'static str = "ShipOrder.v1";
}

/// Records the headers of every message it handles.
#[derive(Default)]
struct HeaderRecorder {
    seen: Mutex<Vec<MessageHeaders>>,
}

impl MessageHandler for HeaderRecorder {
    fn handle<'a>(
        &'a self,
        message: &'a TransportMessage,
        _context: &'a MessageContext,
    ) -> Pin<Box<dyn Future<Output = Result<(), HandlerError>> + Send + 'a>> {
        self.seen.lock().unwrap().push(message.headers.clone());
        Box::pin(async { Ok(()) })
    }
}

async fn settle() {
    tokio::time::sleep(Duration::from_millis(150)).await;
}

#[tokio::test]
async fn test_published_events_carry_the_conversation_id() {
    let recorder = Arc::new(HeaderRecorder::default());

    let mut pipeline = InMemoryPipeline::new();
    pipeline.register_handler(
        PlaceOrder::MESSAGE_TYPE,
        Arc::new(PublishingHandler::new(|message: &TransportMessage| OrderPlaced {
            sku: message.decode::<PlaceOrder>().unwrap().sku,
        })),
    );
    pipeline.register_handler(
        OrderPlaced::MESSAGE_TYPE,
        Arc::new(PublishingHandler::publishing(ShipOrder)),
    );
    pipeline.register_handler(OrderPlaced::MESSAGE_TYPE, recorder.clone());
    pipeline.register_handler(ShipOrder::MESSAGE_TYPE, recorder.clone());
    let running = pipeline.start();

    let order_id = running
        .send(&PlaceOrder {
            sku: "sku-42".to_string(),
        })
        .await
        .unwrap();
    settle().await;

    let seen = recorder.seen.lock().unwrap().clone();
    assert_eq!(seen.len(), 2);
    for headers in &seen {
        assert_eq!(headers.correlation_id, Some(order_id));
        assert_ne!(headers.message_id, order_id);
    }

    running.shutdown().await;
}

#[tokio::test]
async fn test_messages_are_processed_concurrently() {
    let slow = Arc::new(SlowHandler::new(Duration::from_millis(300)));

    let mut pipeline = InMemoryPipeline::new();
    pipeline.register_handler(ShipOrder::MESSAGE_TYPE, slow.clone());
    let running = pipeline.start();

    for _ in 0..3 {
        running.send(&ShipOrder).await.unwrap();
    }
    settle().await;

    // All three started although none has finished.
    assert_eq!(slow.calls(), 3);

    running.shutdown().await;
}

#[tokio::test]
async fn test_explicit_headers_are_kept() {
    let recorder = Arc::new(HeaderRecorder::default());
    let counter = Arc::new(CountingHandler::new());

    let mut pipeline = InMemoryPipeline::new();
    pipeline.register_handler(ShipOrder::MESSAGE_TYPE, recorder.clone());
    pipeline.register_handler(ShipOrder::MESSAGE_TYPE, counter.clone());
    let running = pipeline.start();

    let id = MessageId::new();
    let origin = MessageId::new();
    let sent = running
        .send_with_headers(
            &ShipOrder,
            MessageHeaders::new(id)
                .with_correlation_id(origin)
                .with_header("tenant", "acme"),
        )
        .await
        .unwrap();
    settle().await;

    assert_eq!(sent, id);
    assert_eq!(counter.count(), 1);
    let seen = recorder.seen.lock().unwrap().clone();
    assert_eq!(seen[0].message_id, id);
    assert_eq!(seen[0].correlation_id, Some(origin));
    assert_eq!(
        seen[0].extra.get("tenant").map(String::as_str),
        Some("acme")
    );

    running.shutdown().await;
}

#[test]
fn test_default_attempts() {
    assert_eq!(InMemoryPipeline::new().max_attempts(), DEFAULT_MAX_ATTEMPTS);
    assert_eq!(
        InMemoryPipeline::new().with_max_attempts(0).max_attempts(),
        1
    );
}
