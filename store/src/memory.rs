use crate::docstore::{
    ContainerProperties, DocStore, PageStream, QueryPage, ThroughputInfo, UpsertReceipt,
    value_at_slash_path,
};
use crate::objectstore::{FileProperties, ObjectStore};
use crate::Connector;
use async_trait::async_trait;
use error::TransferError;
use futures::StreamExt;
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::sync::Arc;
use tracing::debug;
use value::Value;

struct ContainerState {
    properties: ContainerProperties,
    throughput: ThroughputInfo,
    docs: Vec<Value>,
}

/// In-memory document store for tests. Supports the two query shapes the
/// engine issues, per-operation billed costs, and scripted upsert/query
/// failures.
#[derive(Clone)]
pub struct MemoryDocStore {
    state: Arc<Mutex<HashMap<String, ContainerState>>>,
    fail_upserts: Arc<Mutex<VecDeque<TransferError>>>,
    fail_queries: Arc<Mutex<VecDeque<TransferError>>>,
    upsert_ru: f64,
    page_ru: f64,
}

impl Default for MemoryDocStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryDocStore {
    pub fn new() -> Self {
        MemoryDocStore {
            state: Arc::new(Mutex::new(HashMap::new())),
            fail_upserts: Arc::new(Mutex::new(VecDeque::new())),
            fail_queries: Arc::new(Mutex::new(VecDeque::new())),
            upsert_ru: 10.4,
            page_ru: 2.9,
        }
    }

    pub fn add_container(
        &self,
        name: &str,
        partition_key_paths: Vec<String>,
        throughput: ThroughputInfo,
    ) {
        self.state.lock().insert(
            name.to_string(),
            ContainerState {
                properties: ContainerProperties {
                    partition_key_paths,
                },
                throughput,
                docs: vec![],
            },
        );
    }

    pub fn insert_docs(&self, container: &str, docs: Vec<Value>) {
        let mut state = self.state.lock();
        let entry = state
            .get_mut(container)
            .unwrap_or_else(|| panic!("unknown container {container}"));
        entry.docs.extend(docs);
    }

    pub fn docs(&self, container: &str) -> Vec<Value> {
        self.state
            .lock()
            .get(container)
            .map(|c| c.docs.clone())
            .unwrap_or_default()
    }

    /// Queues an error for the next upsert; queued errors are consumed in order.
    pub fn fail_next_upsert(&self, err: TransferError) {
        self.fail_upserts.lock().push_back(err);
    }

    pub fn fail_next_query(&self, err: TransferError) {
        self.fail_queries.lock().push_back(err);
    }

    fn with_container<T>(
        &self,
        container: &str,
        f: impl FnOnce(&ContainerState) -> T,
    ) -> Result<T, TransferError> {
        let state = self.state.lock();
        state
            .get(container)
            .map(f)
            .ok_or_else(|| TransferError::NotFound(format!("container '{container}'")))
    }
}

#[async_trait]
impl DocStore for MemoryDocStore {
    async fn read_container(&self, container: &str) -> Result<ContainerProperties, TransferError> {
        self.with_container(container, |c| c.properties.clone())
    }

    async fn create_container(
        &self,
        container: &str,
        properties: &ContainerProperties,
        throughput: &ThroughputInfo,
    ) -> Result<(), TransferError> {
        let mut state = self.state.lock();
        state
            .entry(container.to_string())
            .or_insert_with(|| ContainerState {
                properties: properties.clone(),
                throughput: throughput.clone(),
                docs: vec![],
            });
        Ok(())
    }

    async fn delete_container(&self, container: &str) -> Result<(), TransferError> {
        self.state
            .lock()
            .remove(container)
            .map(|_| ())
            .ok_or_else(|| TransferError::NotFound(format!("container '{container}'")))
    }

    async fn partition_key_paths(&self, container: &str) -> Result<Vec<String>, TransferError> {
        self.with_container(container, |c| c.properties.partition_key_paths.clone())
    }

    async fn distinct_partition_values(
        &self,
        container: &str,
        path: &str,
    ) -> Result<Vec<Value>, TransferError> {
        self.with_container(container, |c| {
            let mut values: Vec<Value> = vec![];
            for doc in &c.docs {
                if let Some(v) = value_at_slash_path(doc, path)
                    && !values.contains(v)
                {
                    values.push(v.clone());
                }
            }
            values
        })
    }

    async fn query(
        &self,
        container: &str,
        sql: &str,
        params: &[(String, Value)],
        _cross_partition: bool,
        page_size: usize,
    ) -> Result<PageStream, TransferError> {
        if let Some(err) = self.fail_queries.lock().pop_front() {
            return Err(err);
        }

        let docs = self.with_container(container, |c| c.docs.clone())?;
        let filtered = filter_by_sql(docs, sql, params)?;
        debug!(container, sql, rows = filtered.len(), "memory query");

        let page_ru = self.page_ru;
        let pages: Vec<Result<QueryPage, TransferError>> = filtered
            .chunks(page_size.max(1))
            .map(|chunk| {
                Ok(QueryPage {
                    docs: chunk.to_vec(),
                    ru_charge: page_ru,
                })
            })
            .collect();
        Ok(futures::stream::iter(pages).boxed())
    }

    async fn upsert(&self, container: &str, doc: &Value) -> Result<UpsertReceipt, TransferError> {
        if let Some(err) = self.fail_upserts.lock().pop_front() {
            return Err(err);
        }

        let id = doc.get("id").cloned();
        let mut state = self.state.lock();
        let entry = state
            .get_mut(container)
            .ok_or_else(|| TransferError::NotFound(format!("container '{container}'")))?;

        match id {
            Some(id) => {
                if let Some(existing) = entry
                    .docs
                    .iter_mut()
                    .find(|d| d.get("id") == Some(&id))
                {
                    *existing = doc.clone();
                } else {
                    entry.docs.push(doc.clone());
                }
            }
            None => entry.docs.push(doc.clone()),
        }
        Ok(UpsertReceipt {
            ru_charge: self.upsert_ru,
        })
    }

    async fn read_throughput(&self, container: &str) -> Result<ThroughputInfo, TransferError> {
        self.with_container(container, |c| c.throughput.clone())
    }
}

/// Interprets the two SQL shapes the engine generates: a bare scan and a
/// single-field equality filter bound to one parameter.
fn filter_by_sql(
    docs: Vec<Value>,
    sql: &str,
    params: &[(String, Value)],
) -> Result<Vec<Value>, TransferError> {
    let sql = sql.trim();
    let Some(rest) = sql.strip_prefix("SELECT * FROM c") else {
        return Err(TransferError::Terminal(format!("unsupported query: {sql}")));
    };
    let rest = rest.trim();
    if rest.is_empty() {
        return Ok(docs);
    }

    let Some(condition) = rest.strip_prefix("WHERE c.") else {
        return Err(TransferError::Terminal(format!("unsupported query: {sql}")));
    };
    let mut split = condition.splitn(2, '=');
    let field = split.next().unwrap_or("").trim();
    let param_name = split.next().unwrap_or("").trim();
    let expected = params
        .iter()
        .find(|(name, _)| name == param_name)
        .map(|(_, v)| v)
        .ok_or_else(|| TransferError::Terminal(format!("unbound parameter {param_name}")))?;

    let slash_path = field.replace('.', "/");
    Ok(docs
        .into_iter()
        .filter(|doc| value_at_slash_path(doc, &slash_path) == Some(expected))
        .collect())
}

/// In-memory object store mirroring the data-lake filesystem semantics the
/// engine relies on: explicit creation, offset appends, flush-to-length.
#[derive(Clone, Default)]
pub struct MemoryObjectStore {
    files: Arc<Mutex<BTreeMap<String, Vec<u8>>>>,
    dirs: Arc<Mutex<BTreeSet<String>>>,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn file(&self, path: &str) -> Option<Vec<u8>> {
        self.files.lock().get(&normalize(path)).cloned()
    }

    pub fn file_text(&self, path: &str) -> Option<String> {
        self.file(path)
            .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
    }

    pub fn put_file(&self, path: &str, bytes: &[u8]) {
        self.files.lock().insert(normalize(path), bytes.to_vec());
    }

    pub fn paths(&self) -> Vec<String> {
        self.files.lock().keys().cloned().collect()
    }
}

fn normalize(path: &str) -> String {
    path.trim_matches('/').to_string()
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn ensure_dir(&self, path: &str) -> Result<(), TransferError> {
        self.dirs.lock().insert(normalize(path));
        Ok(())
    }

    async fn file_properties(
        &self,
        path: &str,
    ) -> Result<Option<FileProperties>, TransferError> {
        Ok(self
            .files
            .lock()
            .get(&normalize(path))
            .map(|bytes| FileProperties {
                size: bytes.len() as u64,
            }))
    }

    async fn create_file(&self, path: &str) -> Result<(), TransferError> {
        self.files.lock().insert(normalize(path), vec![]);
        Ok(())
    }

    async fn append(&self, path: &str, bytes: &[u8], offset: u64) -> Result<(), TransferError> {
        let mut files = self.files.lock();
        let file = files
            .get_mut(&normalize(path))
            .ok_or_else(|| TransferError::NotFound(format!("file '{path}'")))?;
        let offset = offset as usize;
        if file.len() < offset {
            file.resize(offset, 0);
        }
        file.truncate(offset);
        file.extend_from_slice(bytes);
        Ok(())
    }

    async fn flush(&self, path: &str, total_size: u64) -> Result<(), TransferError> {
        let mut files = self.files.lock();
        let file = files
            .get_mut(&normalize(path))
            .ok_or_else(|| TransferError::NotFound(format!("file '{path}'")))?;
        file.truncate(total_size as usize);
        Ok(())
    }

    async fn delete_file(&self, path: &str) -> Result<(), TransferError> {
        self.files
            .lock()
            .remove(&normalize(path))
            .map(|_| ())
            .ok_or_else(|| TransferError::NotFound(format!("file '{path}'")))
    }

    async fn download(&self, path: &str) -> Result<Vec<u8>, TransferError> {
        self.files
            .lock()
            .get(&normalize(path))
            .cloned()
            .ok_or_else(|| TransferError::NotFound(format!("file '{path}'")))
    }

    async fn list_paths(&self, dir: &str) -> Result<Vec<String>, TransferError> {
        let prefix = format!("{}/", normalize(dir));
        Ok(self
            .files
            .lock()
            .keys()
            .filter(|path| path.starts_with(&prefix))
            .cloned()
            .collect())
    }
}

/// Hands out shared fakes regardless of the requested endpoints.
#[derive(Clone)]
pub struct MemoryConnector {
    pub docstore: Arc<MemoryDocStore>,
    pub objectstore: Arc<MemoryObjectStore>,
}

impl MemoryConnector {
    pub fn new(docstore: MemoryDocStore, objectstore: MemoryObjectStore) -> Self {
        MemoryConnector {
            docstore: Arc::new(docstore),
            objectstore: Arc::new(objectstore),
        }
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn docstore(&self, _url: &str, _key: &str) -> Result<Arc<dyn DocStore>, TransferError> {
        Ok(self.docstore.clone())
    }

    async fn objectstore(
        &self,
        _account: &str,
        _file_system: &str,
    ) -> Result<Arc<dyn ObjectStore>, TransferError> {
        Ok(self.objectstore.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::docstore::ThroughputLevel;
    use futures::StreamExt;

    fn store_with_docs() -> MemoryDocStore {
        let store = MemoryDocStore::new();
        store.add_container(
            "orders",
            vec!["/region".to_string()],
            ThroughputInfo::manual(400, ThroughputLevel::Container),
        );
        store.insert_docs(
            "orders",
            vec![
                Value::from_json(r#"{"id":"1","region":"eu"}"#).unwrap(),
                Value::from_json(r#"{"id":"2","region":"us"}"#).unwrap(),
                Value::from_json(r#"{"id":"3","region":"eu"}"#).unwrap(),
            ],
        );
        store
    }

    #[tokio::test]
    async fn scan_query_pages() {
        let store = store_with_docs();
        let mut pages = store
            .query("orders", "SELECT * FROM c", &[], true, 2)
            .await
            .unwrap();

        let first = pages.next().await.unwrap().unwrap();
        assert_eq!(first.docs.len(), 2);
        assert!(first.ru_charge > 0.0);
        let second = pages.next().await.unwrap().unwrap();
        assert_eq!(second.docs.len(), 1);
        assert!(pages.next().await.is_none());
    }

    #[tokio::test]
    async fn filtered_query_binds_parameter() {
        let store = store_with_docs();
        let mut pages = store
            .query(
                "orders",
                "SELECT * FROM c WHERE c.region = @pv",
                &[("@pv".to_string(), Value::text("eu"))],
                false,
                10,
            )
            .await
            .unwrap();
        let page = pages.next().await.unwrap().unwrap();
        assert_eq!(page.docs.len(), 2);
    }

    #[tokio::test]
    async fn distinct_values_dedupe() {
        let store = store_with_docs();
        let values = store
            .distinct_partition_values("orders", "/region")
            .await
            .unwrap();
        assert_eq!(values, vec![Value::text("eu"), Value::text("us")]);
    }

    #[tokio::test]
    async fn upsert_replaces_by_id() {
        let store = store_with_docs();
        store
            .upsert("orders", &Value::from_json(r#"{"id":"1","region":"apac"}"#).unwrap())
            .await
            .unwrap();
        assert_eq!(store.docs("orders").len(), 3);
        assert_eq!(
            store.docs("orders")[0].get("region").unwrap(),
            &Value::text("apac")
        );
    }

    #[tokio::test]
    async fn object_store_append_and_flush() {
        let files = MemoryObjectStore::new();
        files.create_file("dir/a.csv").await.unwrap();
        files.append("dir/a.csv", b"one", 0).await.unwrap();
        files.append("dir/a.csv", b"two", 3).await.unwrap();
        files.flush("dir/a.csv", 6).await.unwrap();
        assert_eq!(files.file_text("dir/a.csv").unwrap(), "onetwo");

        files.create_file("dir/sub/b.csv").await.unwrap();
        let listed = files.list_paths("dir").await.unwrap();
        assert_eq!(listed, vec!["dir/a.csv".to_string(), "dir/sub/b.csv".to_string()]);
    }
}
