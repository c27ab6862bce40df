//! Common test helpers for oscroute tests
//!
//! - Condition-based waiting (no hardcoded sleeps)
//! - A test server bound to an ephemeral port, with a connected sender
//! - A message collector usable as a handler

use oscroute_core::Message;
use oscroute_router::{Dispatcher, Handler, OscSender, Server, ServerConfig, StatsSnapshot};
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Default test timeout
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default condition check interval
pub const DEFAULT_CHECK_INTERVAL: Duration = Duration::from_millis(10);

// ============================================================================
// Condition-Based Waiting
// ============================================================================

/// Wait for a condition with timeout - condition-based, not time-based
pub async fn wait_for<F, Fut>(check: F, interval: Duration, max_wait: Duration) -> bool
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let start = Instant::now();
    while start.elapsed() < max_wait {
        if check().await {
            return true;
        }
        tokio::time::sleep(interval).await;
    }
    false
}

/// Wait for an atomic counter to reach a target value
pub async fn wait_for_count(counter: &AtomicU32, target: u32, max_wait: Duration) -> bool {
    wait_for(
        || async { counter.load(Ordering::SeqCst) >= target },
        DEFAULT_CHECK_INTERVAL,
        max_wait,
    )
    .await
}

/// Wait for a boolean flag to become true
pub async fn wait_for_flag(flag: &AtomicBool, max_wait: Duration) -> bool {
    wait_for(
        || async { flag.load(Ordering::SeqCst) },
        DEFAULT_CHECK_INTERVAL,
        max_wait,
    )
    .await
}

/// Wait for server counters to satisfy `check`
pub async fn wait_for_stats<F>(server: &Server, check: F, max_wait: Duration) -> bool
where
    F: Fn(&StatsSnapshot) -> bool,
{
    wait_for(
        || {
            let ok = check(&server.stats());
            async move { ok }
        },
        DEFAULT_CHECK_INTERVAL,
        max_wait,
    )
    .await
}

// ============================================================================
// Test Server
// ============================================================================

/// A server on 127.0.0.1 with an ephemeral port and a sender aimed at it
pub struct TestServer {
    pub server: Server,
    pub sender: OscSender,
}

impl TestServer {
    /// Start with default settings and an empty dispatcher
    pub async fn start() -> Self {
        Self::start_with(Dispatcher::new(), |_| {}).await
    }

    /// Start with `dispatcher`, letting `configure` adjust the config
    pub async fn start_with<F>(dispatcher: Dispatcher, configure: F) -> Self
    where
        F: FnOnce(&mut ServerConfig),
    {
        let mut config = ServerConfig::new("127.0.0.1", 0);
        configure(&mut config);
        let server = Server::listen(config, dispatcher).await.unwrap();
        let sender = Self::sender_for(&server).await;
        Self { server, sender }
    }

    /// Wrap an already started server
    pub async fn from_server(server: Server) -> Self {
        let sender = Self::sender_for(&server).await;
        Self { server, sender }
    }

    async fn sender_for(server: &Server) -> OscSender {
        OscSender::connect(&server.local_addr().to_string())
            .await
            .unwrap()
    }

    pub fn addr(&self) -> SocketAddr {
        self.server.local_addr()
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        self.server.dispatcher()
    }

    /// Send one message to the server
    pub async fn send(&self, message: &Message) {
        self.sender.send(message).await.unwrap();
    }

    /// Send raw bytes as one datagram
    pub async fn send_raw(&self, data: &[u8]) {
        self.sender.send_raw(data).await.unwrap();
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.server.stats()
    }

    pub async fn shutdown(self) {
        self.server.shutdown().await.unwrap();
    }
}

// ============================================================================
// Message Collector - for verifying delivered messages
// ============================================================================

/// Records every message delivered to its handler
#[derive(Clone)]
pub struct MessageCollector {
    messages: Arc<Mutex<Vec<Message>>>,
    count: Arc<AtomicU32>,
}

impl MessageCollector {
    pub fn new() -> Self {
        Self {
            messages: Arc::new(Mutex::new(Vec::new())),
            count: Arc::new(AtomicU32::new(0)),
        }
    }

    /// Handler that records into this collector
    pub fn handler(&self) -> impl Handler {
        let messages = self.messages.clone();
        let count = self.count.clone();

        move |message: &Message| {
            messages.lock().push(message.clone());
            count.fetch_add(1, Ordering::SeqCst);
        }
    }

    /// Get the count of received messages
    pub fn count(&self) -> u32 {
        self.count.load(Ordering::SeqCst)
    }

    /// Wait for at least n messages to be received
    pub async fn wait_for_count(&self, n: u32, max_wait: Duration) -> bool {
        wait_for_count(&self.count, n, max_wait).await
    }

    /// All collected messages, in delivery order
    pub fn messages(&self) -> Vec<Message> {
        self.messages.lock().clone()
    }

    pub fn addresses(&self) -> Vec<String> {
        self.messages.lock().iter().map(|m| m.address.clone()).collect()
    }

    /// Get the last message received
    pub fn last(&self) -> Option<Message> {
        self.messages.lock().last().cloned()
    }
}

impl Default for MessageCollector {
    fn default() -> Self {
        Self::new()
    }
}
