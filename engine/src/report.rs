use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::Instant;

/// Failed-document ids are sampled up to this many per run.
pub const FAILED_SAMPLE_CAP: usize = 20;

/// The user-visible outcome of one pipeline run.
#[derive(Debug, Clone, Serialize)]
pub struct Report {
    pub status: String,
    pub operation: String,
    pub container: String,
    pub throughput_mode: String,
    pub partition_count: usize,
    pub batch_size: usize,
    pub max_concurrent: usize,
    pub batches: usize,
    pub documents: usize,
    pub parent_rows: usize,
    pub child_rows: usize,
    pub child_tables: usize,
    pub successful: usize,
    pub failed: usize,
    pub dropped: usize,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub elapsed_seconds: f64,
    pub documents_per_second: f64,
    pub total_ru: f64,
    pub ru_per_second: f64,
    pub avg_ru_per_document: f64,
    pub throttle_count: u64,
    pub retry_count: u64,
    pub failed_document_ids: Vec<String>,
}

/// Accumulates counters while a pipeline runs; `finish` derives the rates.
pub struct ReportDraft {
    started_at: DateTime<Utc>,
    timer: Instant,
    pub operation: String,
    pub container: String,
    pub throughput_mode: String,
    pub partition_count: usize,
    pub batch_size: usize,
    pub max_concurrent: usize,
    pub batches: usize,
    pub documents: usize,
    pub parent_rows: usize,
    pub child_rows: usize,
    pub child_tables: usize,
    pub successful: usize,
    pub failed: usize,
    pub dropped: usize,
    pub total_ru: f64,
    pub throttle_count: u64,
    pub retry_count: u64,
    pub failed_document_ids: Vec<String>,
}

impl ReportDraft {
    pub fn start(operation: &str, container: &str) -> Self {
        ReportDraft {
            started_at: Utc::now(),
            timer: Instant::now(),
            operation: operation.to_string(),
            container: container.to_string(),
            throughput_mode: "unknown".to_string(),
            partition_count: 1,
            batch_size: 0,
            max_concurrent: 1,
            batches: 0,
            documents: 0,
            parent_rows: 0,
            child_rows: 0,
            child_tables: 0,
            successful: 0,
            failed: 0,
            dropped: 0,
            total_ru: 0.0,
            throttle_count: 0,
            retry_count: 0,
            failed_document_ids: vec![],
        }
    }

    pub fn record_failed_ids(&mut self, ids: &[String]) {
        for id in ids {
            if self.failed_document_ids.len() >= FAILED_SAMPLE_CAP {
                break;
            }
            self.failed_document_ids.push(id.clone());
        }
    }

    pub fn finish(self) -> Report {
        let elapsed = self.timer.elapsed().as_secs_f64();
        let status = if self.failed > 0 || self.dropped > 0 {
            "completed_with_errors"
        } else {
            "completed"
        };

        Report {
            status: status.to_string(),
            operation: self.operation,
            container: self.container,
            throughput_mode: self.throughput_mode,
            partition_count: self.partition_count,
            batch_size: self.batch_size,
            max_concurrent: self.max_concurrent,
            batches: self.batches,
            documents: self.documents,
            parent_rows: self.parent_rows,
            child_rows: self.child_rows,
            child_tables: self.child_tables,
            successful: self.successful,
            failed: self.failed,
            dropped: self.dropped,
            started_at: self.started_at,
            finished_at: Utc::now(),
            elapsed_seconds: elapsed,
            documents_per_second: rate(self.documents as f64, elapsed),
            total_ru: self.total_ru,
            ru_per_second: rate(self.total_ru, elapsed),
            avg_ru_per_document: rate(self.total_ru, self.documents as f64),
            throttle_count: self.throttle_count,
            retry_count: self.retry_count,
            failed_document_ids: self.failed_document_ids,
        }
    }
}

fn rate(amount: f64, per: f64) -> f64 {
    if per > 0.0 { amount / per } else { 0.0 }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_reflects_failures() {
        let clean = ReportDraft::start("import", "orders").finish();
        assert_eq!(clean.status, "completed");

        let mut draft = ReportDraft::start("import", "orders");
        draft.failed = 2;
        assert_eq!(draft.finish().status, "completed_with_errors");
    }

    #[test]
    fn failed_ids_are_capped() {
        let mut draft = ReportDraft::start("import", "orders");
        let ids: Vec<String> = (0..50).map(|i| format!("doc-{i}")).collect();
        draft.record_failed_ids(&ids);
        assert_eq!(draft.failed_document_ids.len(), FAILED_SAMPLE_CAP);
    }

    #[test]
    fn report_serializes_to_json() {
        let report = ReportDraft::start("export", "orders").finish();
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["operation"], "export");
        assert_eq!(json["status"], "completed");
        assert!(json["elapsed_seconds"].is_number());
    }
}
