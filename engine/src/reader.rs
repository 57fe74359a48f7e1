use error::TransferError;
use futures::StreamExt;
use std::collections::VecDeque;
use std::sync::Arc;
use store::{DocStore, PageStream};
use throttle::{RateLimiter, RetryPolicy};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use value::Value;
use value::coerce::strip_system_fields_keep_rid;

struct QueryJob {
    sql: String,
    params: Vec<(String, Value)>,
    cross_partition: bool,
    label: String,
}

/// Streams batches of documents out of a container: one point query per
/// partition value, or one cross-partition scan. Every page's billed cost
/// goes through the rate limiter before the next page is pulled.
pub struct DocStoreReader {
    store: Arc<dyn DocStore>,
    container: String,
    batch_size: usize,
    limiter: RateLimiter,
    retry: RetryPolicy,
    cancel: CancellationToken,
    pending: VecDeque<QueryJob>,
    current: Option<(PageStream, String, usize)>,
    buffer: VecDeque<Value>,
    docs_read: usize,
    pages_read: usize,
    aborted_partitions: usize,
}

impl DocStoreReader {
    pub fn new(
        store: Arc<dyn DocStore>,
        container: &str,
        partition: Option<&(String, Vec<Value>)>,
        batch_size: usize,
        limiter: RateLimiter,
        cancel: CancellationToken,
    ) -> Self {
        let pending = match partition {
            Some((path, values)) => {
                let field = path.trim_matches('/').replace('/', ".");
                values
                    .iter()
                    .map(|value| QueryJob {
                        sql: format!("SELECT * FROM c WHERE c.{field} = @pv"),
                        params: vec![("@pv".to_string(), value.clone())],
                        cross_partition: false,
                        label: format!("{field}={value}"),
                    })
                    .collect()
            }
            None => VecDeque::from([QueryJob {
                sql: "SELECT * FROM c".to_string(),
                params: vec![],
                cross_partition: true,
                label: "cross-partition".to_string(),
            }]),
        };

        DocStoreReader {
            store,
            container: container.to_string(),
            batch_size: batch_size.max(1),
            limiter,
            retry: RetryPolicy::default(),
            cancel,
            pending,
            current: None,
            buffer: VecDeque::new(),
            docs_read: 0,
            pages_read: 0,
            aborted_partitions: 0,
        }
    }

    pub fn docs_read(&self) -> usize {
        self.docs_read
    }

    pub fn pages_read(&self) -> usize {
        self.pages_read
    }

    pub fn aborted_partitions(&self) -> usize {
        self.aborted_partitions
    }

    pub fn ru_consumed(&self) -> f64 {
        self.limiter.total_consumed()
    }

    pub fn retry_count(&self) -> u64 {
        self.retry.total_retries()
    }

    /// The next batch of at most `batch_size` documents, or `None` when every
    /// partition value is drained (or cancellation was requested). A batch
    /// never mixes documents of two partition values.
    pub async fn next_batch(&mut self) -> Result<Option<Vec<Value>>, TransferError> {
        loop {
            if self.cancel.is_cancelled() {
                info!(container = %self.container, "read cancelled");
                return Ok(self.drain_buffer(true));
            }
            if self.buffer.len() >= self.batch_size {
                return Ok(self.drain_buffer(false));
            }

            match &mut self.current {
                None => {
                    let Some(job) = self.pending.pop_front() else {
                        return Ok(self.drain_buffer(true));
                    };
                    let stream = self.open(&job).await?;
                    self.current = Some((stream, job.label, 0));
                }
                Some((stream, label, rows)) => match stream.next().await {
                    Some(Ok(page)) => {
                        self.pages_read += 1;
                        *rows += page.docs.len();
                        for doc in &page.docs {
                            self.buffer.push_back(strip_system_fields_keep_rid(doc));
                        }
                        self.docs_read += page.docs.len();
                        self.limiter.consume(page.ru_charge).await;
                    }
                    Some(Err(err)) => {
                        // a page failure mid-stream abandons this partition
                        error!(container = %self.container, %label, %err, "page failed, aborting partition");
                        self.aborted_partitions += 1;
                        self.current = None;
                    }
                    None => {
                        if *rows == 0 {
                            info!(container = %self.container, %label, "no rows for partition value");
                        }
                        self.current = None;
                        // batches never straddle partition values
                        if !self.buffer.is_empty() {
                            return Ok(self.drain_buffer(true));
                        }
                    }
                },
            }
        }
    }

    /// Only the query open is retried; pages fail their partition instead.
    async fn open(&self, job: &QueryJob) -> Result<PageStream, TransferError> {
        let store = self.store.clone();
        let container = self.container.clone();
        self.retry
            .execute(&job.label, || {
                store.query(
                    &container,
                    &job.sql,
                    &job.params,
                    job.cross_partition,
                    self.batch_size,
                )
            })
            .await
    }

    fn drain_buffer(&mut self, all: bool) -> Option<Vec<Value>> {
        if self.buffer.is_empty() {
            return None;
        }
        let take = if all {
            self.buffer.len()
        } else {
            self.batch_size.min(self.buffer.len())
        };
        Some(self.buffer.drain(..take).collect())
    }
}
