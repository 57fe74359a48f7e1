use crate::config::ExportConfig;
use crate::reader::DocStoreReader;
use crate::report::{Report, ReportDraft};
use error::TransferError;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use store::{DocStore, ObjectStore, ThroughputInfo};
use tabular::table::{child_file, parent_batch_file, parent_file};
use tabular::{CsvTableWriter, Shredder, WriteMode};
use throttle::{CapacityMode, RateLimiter};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Streams a container into its table family: read → shred → append.
/// Single-threaded and deterministic; the only suspensions are store I/O and
/// rate-limiter sleeps.
pub struct ExportPipeline {
    docstore: Arc<dyn DocStore>,
    objectstore: Arc<dyn ObjectStore>,
    config: ExportConfig,
    cancel: CancellationToken,
}

impl ExportPipeline {
    pub fn new(
        docstore: Arc<dyn DocStore>,
        objectstore: Arc<dyn ObjectStore>,
        config: ExportConfig,
        cancel: CancellationToken,
    ) -> Self {
        ExportPipeline {
            docstore,
            objectstore,
            config,
            cancel,
        }
    }

    pub async fn run(self) -> Result<Report, TransferError> {
        let container = self.config.connection.container.clone();
        let mut draft = ReportDraft::start("export", &container);
        draft.batch_size = self.config.batch_size;

        self.validate_partition().await?;
        draft.partition_count = self
            .config
            .partition
            .as_ref()
            .map(|(_, values)| values.len())
            .unwrap_or(1);

        let throughput = self.docstore.read_throughput(&container).await?;
        let provisioned = throughput.ru_per_sec.unwrap_or(400);
        draft.throughput_mode = mode_name(&throughput).to_string();
        info!(
            %container,
            provisioned,
            mode = %draft.throughput_mode,
            "starting export"
        );

        let export_root = self.config.connection.export_root();
        self.objectstore.ensure_dir(&export_root).await?;

        let limiter = RateLimiter::with_default_reserve(provisioned as f64);
        let mut reader = DocStoreReader::new(
            self.docstore.clone(),
            &container,
            self.config.partition.as_ref(),
            self.config.batch_size,
            limiter,
            self.cancel.clone(),
        );

        let csv = CsvTableWriter::new(&*self.objectstore);
        let mut shredder = Shredder::new();
        let mut parent_known: BTreeSet<String> = BTreeSet::new();
        let mut child_known: HashMap<String, BTreeSet<String>> = HashMap::new();
        let mut tables_seen: BTreeSet<String> = BTreeSet::new();
        let mut batch_index = 0usize;

        while let Some(docs) = reader.next_batch().await? {
            let shredded = shredder.shred_batch(&docs)?;
            draft.documents += docs.len();
            draft.parent_rows += shredded.parents.len();
            draft.dropped += shredded.dropped;

            if self.config.separate_files_per_batch {
                let path = parent_batch_file(&export_root, &container, batch_index);
                csv.write(&path, &shredded.parents, WriteMode::Overwrite, &BTreeSet::new())
                    .await?;
            } else {
                let mode = if batch_index == 0 {
                    WriteMode::Overwrite
                } else {
                    WriteMode::Append
                };
                let path = parent_file(&export_root, &container);
                parent_known = csv
                    .write(&path, &shredded.parents, mode, &parent_known)
                    .await?;
            }

            for (table, rows) in &shredded.children {
                draft.child_rows += rows.len();
                tables_seen.insert(table.clone());
                let path = if self.config.separate_files_per_batch {
                    batch_child_file(&export_root, table, batch_index)
                } else {
                    child_file(&export_root, table)
                };
                if self.config.separate_files_per_batch {
                    csv.write(&path, rows, WriteMode::Overwrite, &BTreeSet::new())
                        .await?;
                } else {
                    // first sight of a table overwrites any stale file
                    let (mode, known) = match child_known.get(table) {
                        Some(known) => (WriteMode::Append, known.clone()),
                        None => (WriteMode::Overwrite, BTreeSet::new()),
                    };
                    let columns = csv.write(&path, rows, mode, &known).await?;
                    child_known.insert(table.clone(), columns);
                }
            }

            debug!(batch = batch_index, docs = docs.len(), "exported batch");
            batch_index += 1;
        }

        draft.batches = batch_index;
        draft.child_tables = tables_seen.len();
        draft.successful = draft.documents - draft.dropped;
        draft.total_ru = reader.ru_consumed();
        draft.retry_count = reader.retry_count();

        let report = draft.finish();
        info!(
            %container,
            documents = report.documents,
            batches = report.batches,
            status = %report.status,
            "export finished"
        );
        Ok(report)
    }

    /// The supplied partition path must be one of the container's, and every
    /// supplied value must actually occur — checked before anything is
    /// written.
    async fn validate_partition(&self) -> Result<(), TransferError> {
        let Some((path, values)) = &self.config.partition else {
            return Ok(());
        };

        let known_paths = self
            .docstore
            .partition_key_paths(&self.config.connection.container)
            .await?;
        if !known_paths.iter().any(|p| p == path) {
            return Err(TransferError::Config(format!(
                "partition key path '{path}' is not one of the container's paths {known_paths:?}"
            )));
        }

        let existing = self
            .docstore
            .distinct_partition_values(&self.config.connection.container, path)
            .await?;
        for value in values {
            if !existing.contains(value) {
                return Err(TransferError::Config(format!(
                    "partition value '{value}' not present in container"
                )));
            }
        }
        Ok(())
    }
}

/// In separate-files mode the child tables are suffixed like the parent.
fn batch_child_file(export_root: &str, table_path: &str, batch: usize) -> String {
    let base = child_file(export_root, table_path);
    match base.strip_suffix(".csv") {
        Some(stem) => format!("{stem}_batch_{batch:03}.csv"),
        None => base,
    }
}

pub fn mode_name(info: &ThroughputInfo) -> &'static str {
    match capacity_mode(info) {
        CapacityMode::Autoscale => "autoscale",
        CapacityMode::Serverless => "serverless",
        CapacityMode::Manual => "manual",
    }
}

pub fn capacity_mode(info: &ThroughputInfo) -> CapacityMode {
    if info.is_serverless() {
        CapacityMode::Serverless
    } else if info.is_autoscale {
        CapacityMode::Autoscale
    } else {
        CapacityMode::Manual
    }
}
