//! Shared mock adapters for integration testing.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;

use relaylog::client::{
    BrokerAdapter, BrokerError, BrokerMessage, Delivery, HttpAdapter, HttpError, HttpRequest,
    HttpResponse, KeyValueAdapter, KvCommand, KvReply, MessageHandler, StoreError,
};
use relaylog::logging::MemoryTransport;
use relaylog::{Adapters, Relay, RelayConfig};

/// HTTP adapter that records requests and answers 200 after `delay`.
#[derive(Default)]
pub struct MockHttp {
    pub requests: Mutex<Vec<HttpRequest>>,
    pub delay: Duration,
}

impl MockHttp {
    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay,
            ..Default::default()
        }
    }

    pub fn correlation_ids(&self) -> Vec<Option<String>> {
        self.requests
            .lock()
            .iter()
            .map(|r| r.header_value("x-correlation-id").map(str::to_string))
            .collect()
    }
}

#[async_trait]
impl HttpAdapter for MockHttp {
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse, HttpError> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.requests.lock().push(request);
        Ok(HttpResponse::new(200))
    }
}

/// Broker adapter that keeps subscription handlers so tests can push
/// messages through them. `disconnect` can be made to hang forever.
#[derive(Default)]
pub struct MockBroker {
    pub hang_on_disconnect: bool,
    pub disconnects: AtomicUsize,
    pub published: Mutex<Vec<(String, BrokerMessage)>>,
    handlers: Mutex<HashMap<String, MessageHandler>>,
}

impl MockBroker {
    pub fn hanging() -> Self {
        Self {
            hang_on_disconnect: true,
            ..Default::default()
        }
    }

    pub fn has_subscriber(&self, topic: &str) -> bool {
        self.handlers.lock().contains_key(topic)
    }

    /// Deliver messages in order, the way a consumer loop would. Stops at
    /// the first handler error, like a loop that does not catch them.
    pub async fn deliver(&self, topic: &str, messages: Vec<BrokerMessage>) -> usize {
        let handler = self
            .handlers
            .lock()
            .get(topic)
            .cloned()
            .expect("no subscriber for topic");
        let mut delivered = 0;
        for message in messages {
            if handler(Delivery::new(topic, message)).await.is_err() {
                break;
            }
            delivered += 1;
        }
        delivered
    }
}

#[async_trait]
impl BrokerAdapter for MockBroker {
    async fn connect(&self) -> Result<(), BrokerError> {
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), BrokerError> {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
        if self.hang_on_disconnect {
            std::future::pending::<()>().await;
        }
        Ok(())
    }

    async fn publish(&self, topic: &str, message: BrokerMessage) -> Result<(), BrokerError> {
        self.published.lock().push((topic.to_string(), message));
        Ok(())
    }

    async fn subscribe(&self, topic: &str, handler: MessageHandler) -> Result<(), BrokerError> {
        self.handlers.lock().insert(topic.to_string(), handler);
        Ok(())
    }
}

/// In-memory key-value adapter. `connect` can be made to never settle.
#[derive(Default)]
pub struct MockStore {
    pub hang_on_connect: bool,
    pub data: Mutex<HashMap<String, Bytes>>,
    pub quits: AtomicUsize,
}

impl MockStore {
    pub fn stalled() -> Self {
        Self {
            hang_on_connect: true,
            ..Default::default()
        }
    }
}

#[async_trait]
impl KeyValueAdapter for MockStore {
    async fn connect(&self) -> Result<(), StoreError> {
        if self.hang_on_connect {
            std::future::pending::<()>().await;
        }
        Ok(())
    }

    async fn quit(&self) -> Result<(), StoreError> {
        self.quits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn execute(&self, command: KvCommand) -> Result<KvReply, StoreError> {
        let mut data = self.data.lock();
        Ok(match command {
            KvCommand::Ping => KvReply::Bulk(Bytes::from_static(b"PONG")),
            KvCommand::Get { key } => data.get(&key).cloned().map_or(KvReply::Nil, KvReply::Bulk),
            KvCommand::Set { key, value, .. } => {
                data.insert(key, value);
                KvReply::Ok
            }
            KvCommand::Del { keys } => {
                KvReply::Int(keys.iter().filter(|k| data.remove(*k).is_some()).count() as i64)
            }
            _ => KvReply::Nil,
        })
    }
}

/// Build and initialize a relay that logs into a memory transport.
pub async fn start_relay(config: RelayConfig, adapters: Adapters) -> (Relay, Arc<MemoryTransport>) {
    let memory = Arc::new(MemoryTransport::new());
    let relay = Relay::builder(config)
        .adapters(adapters)
        .transport(memory.clone())
        .build()
        .unwrap();
    relay.initialize().await.unwrap();
    (relay, memory)
}
