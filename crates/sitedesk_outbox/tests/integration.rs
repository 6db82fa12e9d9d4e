//! Integration tests for the outbox against an in-memory API server.

use parking_lot::Mutex;
use serde_json::{json, Value};
use sitedesk_outbox::{
    Connectivity, CorruptionPolicy, DeadLetterReason, DrainOutcome, FileLogStore,
    GenerationInvalidator, MemoryLogStore, Method, MutationTransport, Outbox, OutboxConfig,
    OutboxError, ReplayFuture, ReplayRequest, ReplayResponse, RetryConfig, SkipReason, SyncState,
};
use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// A tiny REST server that keeps JSON documents by path.
#[derive(Default)]
struct InMemoryServer {
    documents: Mutex<BTreeMap<String, Value>>,
    applied: Mutex<Vec<(Method, String)>>,
    failing: Mutex<HashSet<String>>,
    rejecting: Mutex<HashSet<String>>,
    down: AtomicBool,
}

impl InMemoryServer {
    fn fail_endpoint(&self, endpoint: &str) {
        self.failing.lock().insert(endpoint.to_string());
    }

    fn heal_endpoint(&self, endpoint: &str) {
        self.failing.lock().remove(endpoint);
    }

    fn reject_endpoint(&self, endpoint: &str) {
        self.rejecting.lock().insert(endpoint.to_string());
    }

    fn set_down(&self, down: bool) {
        self.down.store(down, Ordering::SeqCst);
    }

    fn applied(&self) -> Vec<(Method, String)> {
        self.applied.lock().clone()
    }

    fn document(&self, path: &str) -> Option<Value> {
        self.documents.lock().get(path).cloned()
    }

    fn handle(&self, request: &ReplayRequest) -> Result<u16, OutboxError> {
        if self.down.load(Ordering::SeqCst) {
            return Err(OutboxError::transport_retryable("connection refused"));
        }
        if self.failing.lock().contains(&request.endpoint) {
            return Err(OutboxError::transport_retryable("connection reset"));
        }
        if self.rejecting.lock().contains(&request.endpoint) {
            return Ok(422);
        }

        let mut documents = self.documents.lock();
        let status = match request.method {
            Method::Post | Method::Put => {
                documents.insert(request.endpoint.clone(), request.body.clone());
                201
            }
            Method::Patch => match documents.get_mut(&request.endpoint) {
                Some(Value::Object(existing)) => {
                    if let Value::Object(patch) = &request.body {
                        for (k, v) in patch {
                            existing.insert(k.clone(), v.clone());
                        }
                    }
                    200
                }
                _ => 404,
            },
            Method::Delete => {
                if documents.remove(&request.endpoint).is_some() {
                    204
                } else {
                    404
                }
            }
        };
        if (200..300).contains(&status) {
            self.applied
                .lock()
                .push((request.method, request.endpoint.clone()));
        }
        Ok(status)
    }
}

struct ServerTransport {
    server: Arc<InMemoryServer>,
}

impl MutationTransport for ServerTransport {
    fn replay<'a>(&'a self, request: &'a ReplayRequest) -> ReplayFuture<'a> {
        Box::pin(async move {
            tokio::task::yield_now().await;
            self.server
                .handle(request)
                .map(|status| ReplayResponse { status })
        })
    }
}

fn config() -> OutboxConfig {
    OutboxConfig::new().with_retry(
        RetryConfig::new(5)
            .with_initial_delay(Duration::from_millis(100))
            .with_jitter(false),
    )
}

fn offline_outbox(server: &Arc<InMemoryServer>) -> Outbox {
    Outbox::builder(ServerTransport {
        server: Arc::clone(server),
    })
    .config(config())
    .connectivity(Connectivity::Offline)
    .open()
    .unwrap()
}

#[tokio::test]
async fn offline_enqueue_then_reconnect() {
    let server = Arc::new(InMemoryServer::default());
    let outbox = offline_outbox(&server);

    outbox
        .enqueue("/widgets", Method::Post, json!({"name": "x"}))
        .unwrap();

    let status = outbox.status();
    assert_eq!(status.pending_count, 1);
    assert_eq!(status.status_label, "1 changes pending");
    assert!(!status.is_syncing);

    outbox.set_connectivity(Connectivity::Online);
    outbox.drain().await;

    let status = outbox.status();
    assert_eq!(status.pending_count, 0);
    assert_eq!(status.status_label, "All changes synced");
    assert_eq!(server.document("/widgets"), Some(json!({"name": "x"})));
}

#[tokio::test]
async fn one_failure_out_of_three() {
    let server = Arc::new(InMemoryServer::default());
    let outbox = offline_outbox(&server);

    outbox.enqueue("/widgets", Method::Post, json!({"n": 1})).unwrap();
    outbox.enqueue("/staff", Method::Post, json!({"n": 2})).unwrap();
    outbox.enqueue("/sites", Method::Post, json!({"n": 3})).unwrap();
    server.fail_endpoint("/sites");

    outbox.set_connectivity(Connectivity::Online);
    let outcome = outbox.drain().await;
    let report = outcome.report().unwrap();
    assert_eq!(report.applied, 2);
    assert_eq!(report.retried, 1);

    let status = outbox.status();
    assert_eq!(status.pending_count, 1);
    assert_eq!(status.status_label, "Sync failed: 1 changes pending");
    assert_eq!(outbox.state(), SyncState::PartiallySynced);
}

#[tokio::test(start_paused = true)]
async fn online_enqueue_wakes_worker() {
    let server = Arc::new(InMemoryServer::default());
    let outbox = Outbox::builder(ServerTransport {
        server: Arc::clone(&server),
    })
    .config(config().with_poll_interval(Duration::from_secs(3600)))
    .open()
    .unwrap();
    let worker = outbox.spawn_worker();
    tokio::task::yield_now().await;

    outbox
        .enqueue("/assets", Method::Post, json!({"tag": "A-1"}))
        .unwrap();
    tokio::time::sleep(Duration::from_millis(10)).await;

    assert!(outbox.is_empty());
    assert_eq!(server.applied(), vec![(Method::Post, "/assets".to_string())]);
    worker.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn reconnect_wakes_worker() {
    let server = Arc::new(InMemoryServer::default());
    let outbox = offline_outbox(&server);
    let worker = outbox.spawn_worker();

    outbox.enqueue("/widgets", Method::Post, json!({})).unwrap();
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(outbox.len(), 1);

    outbox.set_connectivity(Connectivity::Online);
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert!(outbox.is_empty());
    worker.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn worker_retries_after_backoff() {
    let server = Arc::new(InMemoryServer::default());
    let outbox = offline_outbox(&server);
    let worker = outbox.spawn_worker();

    outbox.enqueue("/staff", Method::Post, json!({"name": "Ada"})).unwrap();
    server.fail_endpoint("/staff");
    outbox.set_connectivity(Connectivity::Online);
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(outbox.len(), 1);

    server.heal_endpoint("/staff");
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(outbox.is_empty());
    assert_eq!(outbox.status().status_label, "All changes synced");
    worker.shutdown().await;
}

#[tokio::test]
async fn simultaneous_drains_send_each_mutation_once() {
    let server = Arc::new(InMemoryServer::default());
    let outbox = offline_outbox(&server);
    for i in 0..10 {
        outbox
            .enqueue(format!("/widgets/{i}"), Method::Put, json!({"i": i}))
            .unwrap();
    }
    outbox.set_connectivity(Connectivity::Online);

    let (a, b) = tokio::join!(outbox.drain(), outbox.drain());
    let skipped: Vec<_> = [a, b].into_iter().filter(DrainOutcome::is_skipped).collect();
    assert_eq!(skipped, vec![DrainOutcome::Skipped(SkipReason::AlreadySyncing)]);

    assert_eq!(server.applied().len(), 10);
    assert!(outbox.is_empty());
}

#[tokio::test]
async fn replay_preserves_enqueue_order() {
    let server = Arc::new(InMemoryServer::default());
    let outbox = offline_outbox(&server);

    outbox.enqueue("/widgets/1", Method::Post, json!({"name": "a", "qty": 1})).unwrap();
    outbox.enqueue("/widgets/1", Method::Patch, json!({"qty": 2})).unwrap();
    outbox.enqueue("/staff/9", Method::Post, json!({"name": "b"})).unwrap();
    outbox.enqueue("/staff/9", Method::Delete, Value::Null).unwrap();

    outbox.set_connectivity(Connectivity::Online);
    outbox.drain().await;

    assert_eq!(
        server.applied(),
        vec![
            (Method::Post, "/widgets/1".to_string()),
            (Method::Patch, "/widgets/1".to_string()),
            (Method::Post, "/staff/9".to_string()),
            (Method::Delete, "/staff/9".to_string()),
        ]
    );
    assert_eq!(server.document("/widgets/1"), Some(json!({"name": "a", "qty": 2})));
    assert_eq!(server.document("/staff/9"), None);
}

#[tokio::test]
async fn failed_create_holds_back_its_update() {
    let server = Arc::new(InMemoryServer::default());
    let outbox = offline_outbox(&server);

    outbox.enqueue("/widgets", Method::Post, json!({"name": "x"})).unwrap();
    outbox.enqueue("/widgets/1", Method::Patch, json!({"name": "y"})).unwrap();
    outbox.enqueue("/sites", Method::Post, json!({})).unwrap();
    server.fail_endpoint("/widgets");

    outbox.set_connectivity(Connectivity::Online);
    let report = outbox.drain().await.report().cloned().unwrap();

    assert_eq!(report.deferred, 1);
    assert_eq!(server.applied(), vec![(Method::Post, "/sites".to_string())]);
    let pending: Vec<_> = outbox
        .pending()
        .iter()
        .map(|e| e.mutation.endpoint().to_string())
        .collect();
    assert_eq!(pending, vec!["/widgets", "/widgets/1"]);
}

#[tokio::test]
async fn rejected_mutation_is_dead_lettered_and_can_be_requeued() {
    let server = Arc::new(InMemoryServer::default());
    let outbox = offline_outbox(&server);

    let id = outbox.enqueue("/staff", Method::Post, json!({"email": "?"})).unwrap();
    server.reject_endpoint("/staff");
    outbox.set_connectivity(Connectivity::Online);
    outbox.drain().await;

    let dead = outbox.dead_letters();
    assert_eq!(dead.len(), 1);
    assert_eq!(dead[0].reason, DeadLetterReason::Rejected { status: 422 });
    assert_eq!(outbox.status().dead_letter_count, 1);
    assert_eq!(outbox.status().status_label, "All changes synced");

    server.rejecting.lock().clear();
    outbox.requeue_dead_letter(&id).unwrap();
    assert_eq!(outbox.len(), 1);
    outbox.drain().await;
    assert!(outbox.is_empty());
    assert!(outbox.dead_letters().is_empty());
}

#[tokio::test]
async fn invalidates_once_per_pass() {
    let server = Arc::new(InMemoryServer::default());
    let invalidator = Arc::new(GenerationInvalidator::new());
    let outbox = Outbox::builder(ServerTransport {
        server: Arc::clone(&server),
    })
    .invalidator(Arc::clone(&invalidator))
    .connectivity(Connectivity::Offline)
    .open()
    .unwrap();

    for i in 0..3 {
        outbox.enqueue(format!("/sites/{i}"), Method::Put, json!({})).unwrap();
    }
    outbox.set_connectivity(Connectivity::Online);
    outbox.drain().await;
    assert_eq!(invalidator.generation(), 1);

    // A pass that applies nothing does not invalidate.
    server.set_down(true);
    outbox.enqueue("/sites/9", Method::Put, json!({})).unwrap();
    outbox.drain().await;
    assert_eq!(invalidator.generation(), 1);
}

#[tokio::test]
async fn journal_file_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("outbox.journal");
    let server = Arc::new(InMemoryServer::default());

    {
        let outbox = Outbox::builder(ServerTransport {
            server: Arc::clone(&server),
        })
        .journal_file(&path)
        .connectivity(Connectivity::Offline)
        .open()
        .unwrap();
        outbox.enqueue("/widgets", Method::Post, json!({"name": "x"})).unwrap();
        outbox.enqueue("/staff", Method::Post, json!({"name": "y"})).unwrap();
    }

    let outbox = Outbox::builder(ServerTransport {
        server: Arc::clone(&server),
    })
    .journal_file(&path)
    .open()
    .unwrap();
    assert_eq!(outbox.len(), 2);

    outbox.drain().await;
    assert!(outbox.is_empty());
    drop(outbox);

    let reopened = Outbox::builder(ServerTransport { server })
        .journal_file(&path)
        .open()
        .unwrap();
    assert!(reopened.is_empty());
}

#[test]
fn second_process_cannot_open_journal() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("outbox.journal");
    let server = Arc::new(InMemoryServer::default());

    let _first = Outbox::builder(ServerTransport {
        server: Arc::clone(&server),
    })
    .journal_file(&path)
    .open()
    .unwrap();

    let second = Outbox::builder(ServerTransport { server })
        .journal_file(&path)
        .open();
    assert!(matches!(second, Err(OutboxError::JournalLocked)));
}

#[test]
fn corrupt_journal_is_reported_or_truncated() {
    let store = MemoryLogStore::new();
    let server = Arc::new(InMemoryServer::default());
    {
        let outbox = Outbox::builder(ServerTransport {
            server: Arc::clone(&server),
        })
        .journal(store.clone())
        .connectivity(Connectivity::Offline)
        .open()
        .unwrap();
        outbox.enqueue("/a", Method::Post, json!({})).unwrap();
        outbox.enqueue("/b", Method::Post, json!({})).unwrap();
    }
    let last = store.data().len() - 1;
    store.poke(last, store.data()[last] ^ 0xFF);

    let strict = Outbox::builder(ServerTransport {
        server: Arc::clone(&server),
    })
    .journal(store.clone())
    .open();
    assert!(matches!(strict, Err(e) if e.is_corruption()));

    let lenient = Outbox::builder(ServerTransport { server })
        .config(OutboxConfig::new().with_corruption_policy(CorruptionPolicy::TruncateAtCorruption))
        .journal(store.clone())
        .open()
        .unwrap();
    assert_eq!(lenient.len(), 1);
}

#[test]
fn file_store_can_be_passed_directly() {
    let dir = tempfile::tempdir().unwrap();
    let store = FileLogStore::open(&dir.path().join("j")).unwrap();
    let outbox = Outbox::builder(ServerTransport {
        server: Arc::new(InMemoryServer::default()),
    })
    .journal(store)
    .connectivity(Connectivity::Offline)
    .open()
    .unwrap();
    outbox.enqueue("/x", Method::Post, json!({})).unwrap();
    assert_eq!(outbox.len(), 1);
}

#[tokio::test]
async fn status_channel_reports_sync_lifecycle() {
    let server = Arc::new(InMemoryServer::default());
    let outbox = offline_outbox(&server);
    let mut rx = outbox.subscribe_status();

    outbox.enqueue("/widgets", Method::Post, json!({})).unwrap();
    rx.changed().await.unwrap();
    assert_eq!(rx.borrow_and_update().status_label, "1 changes pending");

    outbox.set_connectivity(Connectivity::Online);
    outbox.drain().await;
    assert!(rx.has_changed().unwrap());
    let latest = rx.borrow_and_update().clone();
    assert_eq!(latest.status_label, "All changes synced");
    assert_eq!(latest.connectivity, Connectivity::Online);
    assert!(!latest.is_syncing);
}
