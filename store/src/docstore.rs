use async_trait::async_trait;
use error::TransferError;
use futures::stream::BoxStream;
use value::Value;

/// One server-driven page of query results, with its billed cost attached so
/// callers can account for capacity as they consume the stream.
#[derive(Debug, Clone)]
pub struct QueryPage {
    pub docs: Vec<Value>,
    pub ru_charge: f64,
}

pub type PageStream = BoxStream<'static, Result<QueryPage, TransferError>>;

#[derive(Debug, Clone)]
pub struct UpsertReceipt {
    pub ru_charge: f64,
}

/// Where a throughput offer was found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThroughputLevel {
    Container,
    Database,
    /// No offer at either level, which the document store bills on demand.
    Serverless,
}

#[derive(Debug, Clone)]
pub struct ThroughputInfo {
    pub ru_per_sec: Option<u32>,
    pub is_autoscale: bool,
    pub level: ThroughputLevel,
}

impl ThroughputInfo {
    pub fn serverless() -> Self {
        ThroughputInfo {
            ru_per_sec: None,
            is_autoscale: false,
            level: ThroughputLevel::Serverless,
        }
    }

    pub fn manual(ru_per_sec: u32, level: ThroughputLevel) -> Self {
        ThroughputInfo {
            ru_per_sec: Some(ru_per_sec),
            is_autoscale: false,
            level,
        }
    }

    pub fn autoscale(max_ru: u32, level: ThroughputLevel) -> Self {
        ThroughputInfo {
            ru_per_sec: Some(max_ru),
            is_autoscale: true,
            level,
        }
    }

    pub fn is_serverless(&self) -> bool {
        self.level == ThroughputLevel::Serverless
    }
}

#[derive(Debug, Clone)]
pub struct ContainerProperties {
    pub partition_key_paths: Vec<String>,
}

/// The document-store seam. Adapters for a concrete SDK implement this; the
/// engine only ever talks to the trait.
///
/// Adapter obligations beyond the signatures: `distinct_partition_values`
/// must fall back to a plain select plus client-side dedupe when the backend
/// rejects DISTINCT, and upsert errors must carry the HTTP status and any
/// server retry hint (see `TransferError::from_status`).
#[async_trait]
pub trait DocStore: Send + Sync {
    async fn read_container(&self, container: &str) -> Result<ContainerProperties, TransferError>;

    async fn create_container(
        &self,
        container: &str,
        properties: &ContainerProperties,
        throughput: &ThroughputInfo,
    ) -> Result<(), TransferError>;

    async fn delete_container(&self, container: &str) -> Result<(), TransferError>;

    async fn partition_key_paths(&self, container: &str) -> Result<Vec<String>, TransferError>;

    async fn distinct_partition_values(
        &self,
        container: &str,
        path: &str,
    ) -> Result<Vec<Value>, TransferError>;

    /// Opens a query and returns its page stream. Each page reports the billed
    /// cost of producing it.
    async fn query(
        &self,
        container: &str,
        sql: &str,
        params: &[(String, Value)],
        cross_partition: bool,
        page_size: usize,
    ) -> Result<PageStream, TransferError>;

    async fn upsert(&self, container: &str, doc: &Value) -> Result<UpsertReceipt, TransferError>;

    async fn read_throughput(&self, container: &str) -> Result<ThroughputInfo, TransferError>;
}

/// Navigates a document along a `/seg/seg` partition-key path.
pub fn value_at_slash_path<'a>(doc: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = doc;
    for segment in path.trim_matches('/').split('/') {
        current = current.get(segment)?;
    }
    Some(current)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slash_path_navigation() {
        let doc = Value::from_json(r#"{"user":{"id":"u1"},"id":"d1"}"#).unwrap();
        assert_eq!(
            value_at_slash_path(&doc, "/user/id"),
            Some(&Value::text("u1"))
        );
        assert_eq!(value_at_slash_path(&doc, "/id"), Some(&Value::text("d1")));
        assert_eq!(value_at_slash_path(&doc, "/missing"), None);
    }
}
