use crate::config::ImportConfig;
use crate::export::{capacity_mode, mode_name};
use crate::report::{Report, ReportDraft};
use crate::writer::DocStoreWriter;
use error::TransferError;
use std::sync::Arc;
use store::{DocStore, ObjectStore, ThroughputInfo};
use tabular::table::{organize_child_csvs, parent_file};
use tabular::{ChildCsv, CsvTableReader, StitchState};
use throttle::ThrottleController;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use value::Value;

/// Rows sampled off the top of the parent file to estimate document size.
const SIZE_SAMPLE_ROWS: usize = 100;

/// Streams the table family back into a container: read parents → stitch
/// children → concurrent upsert. Batches run strictly in file order; only the
/// upserts within a batch are concurrent.
pub struct ImportPipeline {
    docstore: Arc<dyn DocStore>,
    objectstore: Arc<dyn ObjectStore>,
    config: ImportConfig,
    cancel: CancellationToken,
}

impl ImportPipeline {
    pub fn new(
        docstore: Arc<dyn DocStore>,
        objectstore: Arc<dyn ObjectStore>,
        config: ImportConfig,
        cancel: CancellationToken,
    ) -> Self {
        ImportPipeline {
            docstore,
            objectstore,
            config,
            cancel,
        }
    }

    pub async fn run(self) -> Result<Report, TransferError> {
        let container = self.config.connection.container.clone();
        let mut draft = ReportDraft::start("import", &container);
        draft.batch_size = self.config.batch_size;

        if self.config.truncate {
            self.truncate_container(&container).await?;
        }

        let export_root = self.config.connection.export_root();
        let parent_path = parent_file(&export_root, &container);

        let reader = CsvTableReader::new(&*self.objectstore);
        let total_parent_rows = reader.count_rows(&parent_path).await?;
        draft.parent_rows = total_parent_rows;

        let child_csvs = self.discover_child_csvs(&export_root, &container).await?;
        draft.child_tables = child_csvs.len();

        let avg_doc_kb = self.sample_doc_size(&reader, &parent_path).await?;

        let throughput = self.docstore.read_throughput(&container).await?;
        draft.throughput_mode = mode_name(&throughput).to_string();
        let controller = Arc::new(self.controller_for(&throughput, avg_doc_kb, total_parent_rows));
        draft.max_concurrent = controller.concurrency();

        info!(
            %container,
            total_parent_rows,
            child_tables = child_csvs.len(),
            avg_doc_kb,
            concurrency = controller.concurrency(),
            "starting import"
        );

        let partition_path = self
            .docstore
            .read_container(&container)
            .await?
            .partition_key_paths
            .first()
            .cloned();

        let writer = DocStoreWriter::new(
            self.docstore.clone(),
            &container,
            partition_path,
            controller.clone(),
            self.cancel.clone(),
        );

        let mut skip = 0usize;
        while skip < total_parent_rows && !self.cancel.is_cancelled() {
            let parents = reader
                .read(&parent_path, skip, Some(self.config.batch_size))
                .await?;
            if parents.is_empty() {
                break;
            }
            skip += parents.len();

            let documents = self
                .stitch_batch(parents, &child_csvs, &mut draft)
                .await?;
            draft.documents += documents.len();

            let outcome = writer.upsert_batch(documents).await;
            draft.successful += outcome.successful;
            draft.failed += outcome.failed;
            draft.total_ru += outcome.ru;
            draft.retry_count += outcome.retries;
            draft.record_failed_ids(&outcome.failed_ids);
            draft.batches += 1;

            debug!(
                batch = draft.batches,
                upserted = outcome.successful,
                failed = outcome.failed,
                "import batch done"
            );
        }

        draft.throttle_count = controller.total_throttles();

        let report = draft.finish();
        info!(
            %container,
            documents = report.documents,
            successful = report.successful,
            failed = report.failed,
            status = %report.status,
            "import finished"
        );
        Ok(report)
    }

    /// Rebuilds the documents of one parent batch from the child table family.
    async fn stitch_batch(
        &self,
        parents: Vec<tabular::Row>,
        child_csvs: &[ChildCsv],
        draft: &mut ReportDraft,
    ) -> Result<Vec<Value>, TransferError> {
        let mut state = StitchState::new(parents);
        let reader = CsvTableReader::new(&*self.objectstore);

        for csv in child_csvs {
            let filter = state.filter_rids(&csv.table_path, csv.depth);
            if filter.is_empty() {
                continue;
            }

            let mut chunks = match reader.chunks(&csv.full_path).await {
                Ok(chunks) => chunks,
                Err(err) => {
                    warn!(path = %csv.full_path, %err, "skipping unreadable child file");
                    continue;
                }
            };
            while let Some(chunk) = chunks.next_chunk() {
                match chunk {
                    Ok(rows) => {
                        state.ingest_children(&csv.table_path, csv.depth, rows, &filter)
                    }
                    Err(err) => {
                        // a malformed chunk is logged and skipped, the rest of
                        // the file still loads
                        warn!(path = %csv.full_path, %err, "skipping malformed chunk");
                    }
                }
            }
        }

        let outcome = state.finish();
        draft.child_rows += outcome.child_rows;
        draft.dropped += outcome.orphans + outcome.data_errors;
        Ok(outcome.documents)
    }

    /// Lists the export directory and orders the child CSVs shallowest first.
    /// Per-batch parent files from a separate-files export are not tables.
    async fn discover_child_csvs(
        &self,
        export_root: &str,
        container: &str,
    ) -> Result<Vec<ChildCsv>, TransferError> {
        let batch_prefix = format!("{export_root}/{container}_batch_");
        let paths: Vec<String> = self
            .objectstore
            .list_paths(export_root)
            .await?
            .into_iter()
            .filter(|p| !p.starts_with(&batch_prefix))
            .collect();

        let by_depth = organize_child_csvs(&paths, export_root, container);
        Ok(by_depth.into_values().flatten().collect())
    }

    async fn sample_doc_size(
        &self,
        reader: &CsvTableReader<'_>,
        parent_path: &str,
    ) -> Result<f64, TransferError> {
        let sample = reader.read(parent_path, 0, Some(SIZE_SAMPLE_ROWS)).await?;
        if sample.is_empty() {
            return Ok(1.0);
        }
        let total_bytes: usize = sample
            .iter()
            .map(|row| serde_json::to_string(row).map(|s| s.len()).unwrap_or(0))
            .sum();
        Ok(total_bytes as f64 / sample.len() as f64 / 1024.0)
    }

    fn controller_for(
        &self,
        throughput: &ThroughputInfo,
        avg_doc_kb: f64,
        total_rows: usize,
    ) -> ThrottleController {
        match throughput.ru_per_sec {
            Some(ru) => {
                ThrottleController::sized_for(capacity_mode(throughput), ru as f64, avg_doc_kb)
            }
            None => {
                // no throughput signal: fall back to the document-count tiers
                let tier = ThrottleController::concurrency_for_count(total_rows);
                ThrottleController::new(capacity_mode(throughput), tier, tier)
            }
        }
    }

    /// Deletes and recreates the container, preserving its partition key and
    /// throughput offer. Truncating a container that does not exist is a
    /// configuration error, since there is nothing to copy the settings from.
    async fn truncate_container(&self, container: &str) -> Result<(), TransferError> {
        let properties = self.docstore.read_container(container).await.map_err(|err| {
            match err {
                TransferError::NotFound(_) => TransferError::Config(format!(
                    "truncate_sink_before_write is true, but container '{container}' does not exist"
                )),
                other => other,
            }
        })?;
        let throughput = self
            .docstore
            .read_throughput(container)
            .await
            .unwrap_or_else(|_| ThroughputInfo::serverless());

        info!(
            %container,
            paths = ?properties.partition_key_paths,
            "truncating container"
        );
        self.docstore.delete_container(container).await?;
        self.docstore
            .create_container(container, &properties, &throughput)
            .await?;
        Ok(())
    }
}
