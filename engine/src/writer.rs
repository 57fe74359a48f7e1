use error::{ErrorKind, TransferError};
use std::sync::Arc;
use std::time::{Duration, Instant};
use store::DocStore;
use throttle::{RetryPolicy, ThrottleController};
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};
use value::Value;
use value::coerce::json_safe;

/// Outcome of one concurrent upsert batch.
#[derive(Debug, Default)]
pub struct BatchOutcome {
    pub total: usize,
    pub successful: usize,
    pub failed: usize,
    pub failed_ids: Vec<String>,
    pub ru: f64,
    pub retries: u64,
    pub elapsed: Duration,
}

/// Upserts documents through a bounded worker pool. Workers drain a task
/// channel; the shared throttle controller hears about every success and
/// throttle so concurrency adapts across batches.
pub struct DocStoreWriter {
    store: Arc<dyn DocStore>,
    container: String,
    partition_path: Option<String>,
    controller: Arc<ThrottleController>,
    retry: RetryPolicy,
    cancel: CancellationToken,
}

impl DocStoreWriter {
    pub fn new(
        store: Arc<dyn DocStore>,
        container: &str,
        partition_path: Option<String>,
        controller: Arc<ThrottleController>,
        cancel: CancellationToken,
    ) -> Self {
        DocStoreWriter {
            store,
            container: container.to_string(),
            partition_path,
            controller,
            retry: RetryPolicy::default(),
            cancel,
        }
    }

    /// Upserts the batch with bounded concurrency. Per-document failures never
    /// abort the batch; they are counted and sampled. Cancellation turns the
    /// remaining documents into failures.
    pub async fn upsert_batch(&self, docs: Vec<Value>) -> BatchOutcome {
        let started = Instant::now();
        let total = docs.len();
        if total == 0 {
            return BatchOutcome::default();
        }

        let concurrency = self.controller.concurrency().min(total).max(1);
        let (tx, rx) = flume::bounded::<Value>(concurrency * 2);

        let mut workers = Vec::with_capacity(concurrency);
        for worker in 0..concurrency {
            let rx = rx.clone();
            let store = self.store.clone();
            let container = self.container.clone();
            let partition_path = self.partition_path.clone();
            let controller = self.controller.clone();
            let cancel = self.cancel.clone();
            let max_retries = self.retry.max_retries;
            let base = self.retry.base;
            let max = self.retry.max;

            workers.push(tokio::spawn(async move {
                let retry = RetryPolicy::new(max_retries, base, max);
                let mut outcome = BatchOutcome::default();
                loop {
                    let doc = tokio::select! {
                        _ = cancel.cancelled() => break,
                        received = rx.recv_async() => match received {
                            Ok(doc) => doc,
                            Err(_) => break,
                        },
                    };
                    upsert_one(
                        &*store,
                        &container,
                        partition_path.as_deref(),
                        &controller,
                        &retry,
                        &cancel,
                        doc,
                        &mut outcome,
                    )
                    .await;
                }
                debug!(worker, done = outcome.successful + outcome.failed, "worker drained");
                outcome
            }));
        }
        drop(rx);

        for doc in docs {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                sent = tx.send_async(doc) => {
                    if sent.is_err() {
                        break;
                    }
                }
            }
        }
        drop(tx);

        let mut combined = BatchOutcome {
            total,
            ..Default::default()
        };
        for worker in workers {
            if let Ok(outcome) = worker.await {
                combined.successful += outcome.successful;
                combined.ru += outcome.ru;
                combined.retries += outcome.retries;
                combined.failed_ids.extend(outcome.failed_ids);
            }
        }
        // everything not upserted, including cancelled or unsent documents
        combined.failed = total - combined.successful;
        combined.elapsed = started.elapsed();
        combined
    }
}

/// Upserts one document: partition key extracted for observability, value
/// coerced JSON-safe, then retried per class. Rate limits honor the server
/// hint and notify the controller; timeouts, unavailability and the sink's
/// occasional 500 take plain exponential backoff.
#[allow(clippy::too_many_arguments)]
async fn upsert_one(
    store: &dyn DocStore,
    container: &str,
    partition_path: Option<&str>,
    controller: &ThrottleController,
    retry: &RetryPolicy,
    cancel: &CancellationToken,
    doc: Value,
    outcome: &mut BatchOutcome,
) {
    let doc = json_safe(doc);
    let partition_key = extract_partition_key(&doc, partition_path);
    debug!(container, partition_key = %partition_key, "upserting");

    let mut attempt = 0;
    loop {
        let result = tokio::select! {
            _ = cancel.cancelled() => {
                Err(TransferError::Terminal("upsert aborted by cancellation".to_string()))
            }
            result = store.upsert(container, &doc) => result,
        };

        match result {
            Ok(receipt) => {
                controller.report_success();
                outcome.successful += 1;
                outcome.ru += receipt.ru_charge;
                return;
            }
            Err(err) => {
                let retryable = err.is_retryable() || is_server_fault(&err);
                if !retryable || attempt >= retry.max_retries || cancel.is_cancelled() {
                    error!(container, %err, "upsert failed");
                    outcome.failed += 1;
                    outcome.failed_ids.push(doc_id(&doc));
                    return;
                }

                let wait = if err.kind() == ErrorKind::RateLimited {
                    controller.report_throttle();
                    retry.wait_for(&err, attempt).unwrap_or_else(|| retry.backoff(attempt))
                } else {
                    retry.backoff(attempt)
                };
                warn!(container, attempt, ?wait, %err, "upsert retrying");
                outcome.retries += 1;
                sleep(wait).await;
                attempt += 1;
            }
        }
    }
}

/// The sink retries its own 500s on upsert, beyond the shared taxonomy.
fn is_server_fault(err: &TransferError) -> bool {
    matches!(err, TransferError::Terminal(msg) if msg.contains("status 500"))
}

/// Walks the dotted/slashed partition path; the first non-mapping value wins,
/// with the document id as fallback.
fn extract_partition_key(doc: &Value, partition_path: Option<&str>) -> Value {
    let fallback = || doc.get("id").cloned().unwrap_or(Value::Null);
    let Some(path) = partition_path else {
        return fallback();
    };

    let mut current = doc;
    for segment in path.trim_matches('/').split('/') {
        match current.get(segment) {
            Some(next) => {
                current = next;
                if !current.is_dict() {
                    break;
                }
            }
            None => return fallback(),
        }
    }
    if current.is_dict() {
        fallback()
    } else {
        current.clone()
    }
}

fn doc_id(doc: &Value) -> String {
    doc.get("id")
        .map(|id| id.to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use store::{MemoryDocStore, ThroughputInfo, ThroughputLevel};
    use throttle::CapacityMode;

    fn setup(docs: usize) -> (Arc<MemoryDocStore>, DocStoreWriter, Vec<Value>) {
        let store = Arc::new(MemoryDocStore::new());
        store.add_container(
            "sink",
            vec!["/id".to_string()],
            ThroughputInfo::manual(1000, ThroughputLevel::Container),
        );
        let controller = Arc::new(ThrottleController::new(CapacityMode::Manual, 50, 8));
        let writer = DocStoreWriter::new(
            store.clone(),
            "sink",
            Some("/id".to_string()),
            controller,
            CancellationToken::new(),
        );
        let batch: Vec<Value> = (0..docs)
            .map(|i| Value::from_json(&format!(r#"{{"id":"{i}","n":{i}}}"#)).unwrap())
            .collect();
        (store, writer, batch)
    }

    #[tokio::test]
    async fn concurrent_upserts_land() {
        let (store, writer, docs) = setup(25);
        let outcome = writer.upsert_batch(docs).await;
        assert_eq!(outcome.successful, 25);
        assert_eq!(outcome.failed, 0);
        assert!(outcome.ru > 0.0);
        assert_eq!(store.docs("sink").len(), 25);
    }

    #[tokio::test]
    async fn throttled_upserts_recover_and_report() {
        let (store, writer, docs) = setup(5);
        store.fail_next_upsert(TransferError::from_status(
            429,
            "too many requests",
            Some(Duration::from_millis(1)),
        ));
        store.fail_next_upsert(TransferError::from_status(
            429,
            "too many requests",
            Some(Duration::from_millis(1)),
        ));

        let outcome = writer.upsert_batch(docs).await;
        assert_eq!(outcome.successful, 5);
        assert!(writer.controller.total_throttles() >= 2);
    }

    #[tokio::test]
    async fn terminal_failures_are_sampled_not_fatal() {
        let (store, writer, docs) = setup(4);
        store.fail_next_upsert(TransferError::from("constraint violated"));

        let outcome = writer.upsert_batch(docs).await;
        assert_eq!(outcome.successful, 3);
        assert_eq!(outcome.failed, 1);
        assert_eq!(outcome.failed_ids.len(), 1);
    }

    #[tokio::test]
    async fn server_faults_are_retried() {
        let (store, writer, docs) = setup(2);
        store.fail_next_upsert(TransferError::from_status(500, "blip", None));

        let outcome = writer.upsert_batch(docs).await;
        assert_eq!(outcome.successful, 2);
    }

    #[tokio::test]
    async fn cancellation_fails_the_remainder() {
        let (_, writer, docs) = setup(10);
        writer.cancel.cancel();
        let outcome = writer.upsert_batch(docs).await;
        assert_eq!(outcome.successful, 0);
        assert_eq!(outcome.failed, 10);
    }

    #[test]
    fn partition_key_walks_and_falls_back() {
        let doc = Value::from_json(r#"{"id":"d1","user":{"id":"u1","meta":{"x":1}}}"#).unwrap();
        assert_eq!(
            extract_partition_key(&doc, Some("/user/id")),
            Value::text("u1")
        );
        // path ends on a mapping: fall back to the document id
        assert_eq!(
            extract_partition_key(&doc, Some("/user")),
            Value::text("d1")
        );
        assert_eq!(
            extract_partition_key(&doc, Some("/missing")),
            Value::text("d1")
        );
        assert_eq!(extract_partition_key(&doc, None), Value::text("d1"));
    }
}
