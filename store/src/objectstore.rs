use async_trait::async_trait;
use error::TransferError;

#[derive(Debug, Clone)]
pub struct FileProperties {
    pub size: u64,
}

/// The object-store seam: a hierarchical namespace of append-mode files, the
/// shape of a data-lake filesystem API.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn ensure_dir(&self, path: &str) -> Result<(), TransferError>;

    /// `None` when the file does not exist.
    async fn file_properties(&self, path: &str)
    -> Result<Option<FileProperties>, TransferError>;

    async fn create_file(&self, path: &str) -> Result<(), TransferError>;

    async fn append(&self, path: &str, bytes: &[u8], offset: u64) -> Result<(), TransferError>;

    async fn flush(&self, path: &str, total_size: u64) -> Result<(), TransferError>;

    async fn delete_file(&self, path: &str) -> Result<(), TransferError>;

    async fn download(&self, path: &str) -> Result<Vec<u8>, TransferError>;

    /// All file paths below `dir`, recursively.
    async fn list_paths(&self, dir: &str) -> Result<Vec<String>, TransferError>;
}
