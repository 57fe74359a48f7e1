use crate::objectstore::{FileProperties, ObjectStore};
use async_trait::async_trait;
use error::TransferError;
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::{AsyncSeekExt, AsyncWriteExt};

/// Object store backed by a local directory tree. Useful for development runs
/// and for exercising the real filesystem in tests.
pub struct FsObjectStore {
    root: PathBuf,
}

impl FsObjectStore {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        FsObjectStore {
            root: root.as_ref().to_path_buf(),
        }
    }

    fn resolve(&self, path: &str) -> PathBuf {
        self.root.join(path.trim_matches('/'))
    }
}

#[async_trait]
impl ObjectStore for FsObjectStore {
    async fn ensure_dir(&self, path: &str) -> Result<(), TransferError> {
        fs::create_dir_all(self.resolve(path)).await?;
        Ok(())
    }

    async fn file_properties(
        &self,
        path: &str,
    ) -> Result<Option<FileProperties>, TransferError> {
        match fs::metadata(self.resolve(path)).await {
            Ok(meta) => Ok(Some(FileProperties { size: meta.len() })),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    async fn create_file(&self, path: &str) -> Result<(), TransferError> {
        let full = self.resolve(path);
        if let Some(parent) = full.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::File::create(full).await?;
        Ok(())
    }

    async fn append(&self, path: &str, bytes: &[u8], offset: u64) -> Result<(), TransferError> {
        let mut file = fs::OpenOptions::new()
            .write(true)
            .open(self.resolve(path))
            .await?;
        file.seek(SeekFrom::Start(offset)).await?;
        file.write_all(bytes).await?;
        file.flush().await?;
        Ok(())
    }

    async fn flush(&self, path: &str, total_size: u64) -> Result<(), TransferError> {
        let file = fs::OpenOptions::new()
            .write(true)
            .open(self.resolve(path))
            .await?;
        file.set_len(total_size).await?;
        Ok(())
    }

    async fn delete_file(&self, path: &str) -> Result<(), TransferError> {
        fs::remove_file(self.resolve(path)).await?;
        Ok(())
    }

    async fn download(&self, path: &str) -> Result<Vec<u8>, TransferError> {
        match fs::read(self.resolve(path)).await {
            Ok(bytes) => Ok(bytes),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                Err(TransferError::NotFound(format!("file '{path}'")))
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn list_paths(&self, dir: &str) -> Result<Vec<String>, TransferError> {
        let base = self.resolve(dir);
        let mut found = vec![];
        let mut pending = vec![base.clone()];

        while let Some(current) = pending.pop() {
            let mut entries = match fs::read_dir(&current).await {
                Ok(entries) => entries,
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => continue,
                Err(err) => return Err(err.into()),
            };
            while let Some(entry) = entries.next_entry().await? {
                let path = entry.path();
                if entry.file_type().await?.is_dir() {
                    pending.push(path);
                } else if let Ok(rel) = path.strip_prefix(&self.root) {
                    found.push(rel.to_string_lossy().replace('\\', "/"));
                }
            }
        }
        found.sort();
        Ok(found)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn round_trips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsObjectStore::new(dir.path());

        store.ensure_dir("export/orders").await.unwrap();
        store.create_file("export/orders/orders.csv").await.unwrap();
        store
            .append("export/orders/orders.csv", b"id|x\n1|2\n", 0)
            .await
            .unwrap();
        store.flush("export/orders/orders.csv", 9).await.unwrap();

        assert_eq!(
            store.download("export/orders/orders.csv").await.unwrap(),
            b"id|x\n1|2\n"
        );
        assert_eq!(
            store
                .file_properties("export/orders/orders.csv")
                .await
                .unwrap()
                .unwrap()
                .size,
            9
        );

        store.create_file("export/orders/items/items.csv").await.unwrap();
        let paths = store.list_paths("export").await.unwrap();
        assert_eq!(
            paths,
            vec![
                "export/orders/items/items.csv".to_string(),
                "export/orders/orders.csv".to_string(),
            ]
        );

        store.delete_file("export/orders/orders.csv").await.unwrap();
        assert!(store.file_properties("export/orders/orders.csv").await.unwrap().is_none());
    }
}
