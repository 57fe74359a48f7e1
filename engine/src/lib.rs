pub use config::{ConnectionConfig, ExportConfig, ImportConfig, TransferParams};
pub use export::ExportPipeline;
pub use import::ImportPipeline;
pub use job::Job;
pub use reader::DocStoreReader;
pub use report::{Report, ReportDraft};
pub use writer::{BatchOutcome, DocStoreWriter};

pub mod config;
pub mod export;
pub mod import;
pub mod job;
pub mod reader;
pub mod report;
pub mod writer;

#[cfg(test)]
mod tests;
