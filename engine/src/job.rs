use crate::config::{ConnectionConfig, ExportConfig, ImportConfig, TransferParams};
use crate::export::ExportPipeline;
use crate::import::ImportPipeline;
use crate::report::Report;
use error::TransferError;
use std::sync::Arc;
use store::{Connector, DocStore, ObjectStore, SecretProvider};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Entry point for a transfer in either direction. Resolves the secret,
/// builds the store handles through the connector, validates the connections
/// and runs the pipeline. One job can serve many runs; each run gets a child
/// cancellation token.
pub struct Job {
    secrets: Arc<dyn SecretProvider>,
    connector: Arc<dyn Connector>,
    cancel: CancellationToken,
}

impl Job {
    pub fn new(secrets: Arc<dyn SecretProvider>, connector: Arc<dyn Connector>) -> Self {
        Job {
            secrets,
            connector,
            cancel: CancellationToken::new(),
        }
    }

    /// Cancels every run started from this job.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub async fn run_export(&self, params: &TransferParams) -> Result<Report, TransferError> {
        let config = ExportConfig::resolve(params)?;
        let (docstore, objectstore) = self.connect(&config.connection).await?;
        self.validate(&*docstore, &*objectstore, &config.connection, false)
            .await?;

        ExportPipeline::new(docstore, objectstore, config, self.cancel.child_token())
            .run()
            .await
    }

    pub async fn run_import(&self, params: &TransferParams) -> Result<Report, TransferError> {
        let config = ImportConfig::resolve(params)?;
        let (docstore, objectstore) = self.connect(&config.connection).await?;
        self.validate(&*docstore, &*objectstore, &config.connection, config.truncate)
            .await?;

        ImportPipeline::new(docstore, objectstore, config, self.cancel.child_token())
            .run()
            .await
    }

    async fn connect(
        &self,
        connection: &ConnectionConfig,
    ) -> Result<(Arc<dyn DocStore>, Arc<dyn ObjectStore>), TransferError> {
        let key = self
            .secrets
            .get(&connection.key_vault, &connection.secret_name)
            .await?;
        debug!(vault = %connection.key_vault, "resolved store secret");

        let docstore = self.connector.docstore(&connection.url, &key).await?;
        let objectstore = self
            .connector
            .objectstore(&connection.adls_account, &connection.adls_file_system)
            .await?;
        Ok((docstore, objectstore))
    }

    /// Cheap probes against both stores so auth and addressing problems
    /// surface as structured errors before any data moves. A missing
    /// container is tolerated when truncate will recreate it anyway — the
    /// truncate step itself rejects that case with a clearer message.
    async fn validate(
        &self,
        docstore: &dyn DocStore,
        objectstore: &dyn ObjectStore,
        connection: &ConnectionConfig,
        truncating: bool,
    ) -> Result<(), TransferError> {
        match docstore.read_container(&connection.container).await {
            Ok(_) => {}
            Err(TransferError::NotFound(_)) if truncating => {}
            Err(err) => return Err(err),
        }
        objectstore.list_paths(&connection.export_root()).await?;
        info!(container = %connection.container, "connections validated");
        Ok(())
    }
}
