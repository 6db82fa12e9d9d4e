//! Network boundary for replaying mutations.
//!
//! Each queued mutation is replayed as exactly one request carrying its
//! recorded method, endpoint and JSON body. Only the response status is
//! kept; the body is discarded.

use crate::error::{OutboxError, OutboxResult};
use crate::mutation::{Method, MutationId, PendingMutation};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Boxed future returned by [`MutationTransport::replay`].
pub type ReplayFuture<'a> = Pin<Box<dyn Future<Output = OutboxResult<ReplayResponse>> + Send + 'a>>;

/// One replay request.
#[derive(Debug, Clone, PartialEq)]
pub struct ReplayRequest {
    /// Id of the mutation being replayed.
    pub mutation_id: MutationId,
    /// HTTP method.
    pub method: Method,
    /// Endpoint path, relative to the server base URL.
    pub endpoint: String,
    /// JSON request body.
    pub body: Value,
}

impl ReplayRequest {
    /// Builds the request for `mutation`.
    pub fn for_mutation(mutation: &PendingMutation) -> Self {
        Self {
            mutation_id: mutation.id().clone(),
            method: mutation.method(),
            endpoint: mutation.endpoint().to_string(),
            body: mutation.payload().clone(),
        }
    }
}

/// The part of a response the outbox looks at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReplayResponse {
    /// HTTP status code.
    pub status: u16,
}

/// Sends replay requests to the server.
///
/// Implementations return `Ok` for any response that arrived, whatever its
/// status, and `Err` only when no response was obtained.
pub trait MutationTransport: Send + Sync {
    /// Sends one request.
    fn replay<'a>(&'a self, request: &'a ReplayRequest) -> ReplayFuture<'a>;
}

impl<T: MutationTransport + ?Sized> MutationTransport for Arc<T> {
    fn replay<'a>(&'a self, request: &'a ReplayRequest) -> ReplayFuture<'a> {
        (**self).replay(request)
    }
}

/// A scripted reply for [`MockTransport`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockReply {
    /// Respond with this status.
    Status(u16),
    /// Fail without a response.
    TransportError(String),
    /// Never respond; the engine's request timeout decides.
    Hang,
}

#[derive(Debug, Default)]
struct MockScript {
    by_endpoint: HashMap<String, VecDeque<MockReply>>,
    fallback: VecDeque<MockReply>,
}

/// A mock transport for testing.
///
/// Replies are taken from the per-endpoint script first, then from the
/// general script, and default to `200`. Every request that reaches the
/// mock is recorded, including ones that fail.
#[derive(Debug)]
pub struct MockTransport {
    reachable: AtomicBool,
    script: Mutex<MockScript>,
    requests: Mutex<Vec<ReplayRequest>>,
    delay: Mutex<Option<Duration>>,
}

impl MockTransport {
    /// Creates a reachable mock that answers `200` to everything.
    pub fn new() -> Self {
        Self {
            reachable: AtomicBool::new(true),
            script: Mutex::new(MockScript::default()),
            requests: Mutex::new(Vec::new()),
            delay: Mutex::new(None),
        }
    }

    /// Queues a reply for the next request to any endpoint.
    pub fn push_reply(&self, reply: MockReply) {
        self.script.lock().fallback.push_back(reply);
    }

    /// Queues a reply for the next request to `endpoint`.
    pub fn push_reply_for(&self, endpoint: impl Into<String>, reply: MockReply) {
        self.script
            .lock()
            .by_endpoint
            .entry(endpoint.into())
            .or_default()
            .push_back(reply);
    }

    /// Makes every request fail with a connection error while `false`.
    pub fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::SeqCst);
    }

    /// Delays every reply by `delay`.
    pub fn set_delay(&self, delay: Option<Duration>) {
        *self.delay.lock() = delay;
    }

    /// Returns every request received so far.
    pub fn requests(&self) -> Vec<ReplayRequest> {
        self.requests.lock().clone()
    }

    /// Returns how many requests were received.
    pub fn request_count(&self) -> usize {
        self.requests.lock().len()
    }

    fn next_reply(&self, endpoint: &str) -> MockReply {
        let mut script = self.script.lock();
        if let Some(reply) = script
            .by_endpoint
            .get_mut(endpoint)
            .and_then(VecDeque::pop_front)
        {
            return reply;
        }
        script.fallback.pop_front().unwrap_or(MockReply::Status(200))
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl MutationTransport for MockTransport {
    fn replay<'a>(&'a self, request: &'a ReplayRequest) -> ReplayFuture<'a> {
        Box::pin(async move {
            self.requests.lock().push(request.clone());

            let delay = *self.delay.lock();
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }

            if !self.reachable.load(Ordering::SeqCst) {
                return Err(OutboxError::transport_retryable("connection refused"));
            }

            match self.next_reply(&request.endpoint) {
                MockReply::Status(status) => Ok(ReplayResponse { status }),
                MockReply::TransportError(message) => {
                    Err(OutboxError::transport_retryable(message))
                }
                MockReply::Hang => std::future::pending().await,
            }
        })
    }
}
