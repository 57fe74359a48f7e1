pub use docstore::{
    ContainerProperties, DocStore, PageStream, QueryPage, ThroughputInfo, ThroughputLevel,
    UpsertReceipt, value_at_slash_path,
};
pub use memory::{MemoryConnector, MemoryDocStore, MemoryObjectStore};
pub use objectstore::{FileProperties, ObjectStore};
pub use secret::{EnvSecrets, SecretProvider, StaticSecrets};

mod docstore;
pub mod fs;
mod memory;
mod objectstore;
mod secret;

use async_trait::async_trait;
use error::TransferError;
use std::sync::Arc;

/// Builds the two store handles from resolved connection parameters. Real
/// deployments put the SDK clients behind this; tests hand out fakes.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn docstore(&self, url: &str, key: &str) -> Result<Arc<dyn DocStore>, TransferError>;

    async fn objectstore(
        &self,
        account: &str,
        file_system: &str,
    ) -> Result<Arc<dyn ObjectStore>, TransferError>;
}
