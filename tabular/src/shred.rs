use crate::table::{self, Row};
use error::TransferError;
use indexmap::IndexMap;
use std::collections::{HashSet, VecDeque};
use tracing::{debug, warn};
use uuid::Uuid;
use value::Value;
use value::flatten::flatten_shallow;

/// Child rows are buffered and materialized into the table accumulator in
/// slices of this size, which caps the transient per-table buffer.
pub const ARRAY_BATCH: usize = 2000;

/// The flat output of shredding one batch of documents.
#[derive(Debug, Default)]
pub struct ShreddedBatch {
    pub parents: Vec<Row>,
    /// Child rows per dotted table path, in discovery order.
    pub children: IndexMap<String, Vec<Row>>,
    /// Documents rejected with a data error and dropped.
    pub dropped: usize,
}

/// Converts nested documents into a parent row plus child-table rows linked by
/// surrogate ids. Iterative over a work queue, so document depth never turns
/// into recursion depth.
pub struct Shredder {
    array_batch: usize,
    seen_rids: HashSet<String>,
    warned_mixed: HashSet<String>,
}

impl Default for Shredder {
    fn default() -> Self {
        Self::new()
    }
}

struct QueueItem {
    object: Row,
    table_path: String,
    rid: String,
    parent_rid: String,
}

impl Shredder {
    pub fn new() -> Self {
        Shredder {
            array_batch: ARRAY_BATCH,
            seen_rids: HashSet::new(),
            warned_mixed: HashSet::new(),
        }
    }

    /// Shreds a batch; documents failing with a data error are dropped and
    /// counted, everything else propagates.
    pub fn shred_batch(&mut self, docs: &[Value]) -> Result<ShreddedBatch, TransferError> {
        let mut batch = ShreddedBatch::default();
        for doc in docs {
            match self.shred(doc) {
                Ok((parent, children)) => {
                    batch.parents.push(parent);
                    for (table, rows) in children {
                        batch.children.entry(table).or_default().extend(rows);
                    }
                }
                Err(TransferError::Data(msg)) => {
                    warn!(%msg, "dropping document");
                    batch.dropped += 1;
                }
                Err(other) => return Err(other),
            }
        }
        Ok(batch)
    }

    /// Shreds one document into its parent row and child tables.
    pub fn shred(
        &mut self,
        doc: &Value,
    ) -> Result<(Row, IndexMap<String, Vec<Row>>), TransferError> {
        let dict = doc
            .as_dict()
            .map_err(|_| TransferError::Data(format!("document is {}", doc.type_name())))?;

        let root_rid = match dict.get(table::RID) {
            Some(Value::Text(rid)) => rid.clone(),
            Some(other) => other.to_string(),
            None => Uuid::new_v4().to_string(),
        };
        if !self.seen_rids.insert(root_rid.clone()) {
            return Err(TransferError::Data(format!("duplicate rid '{root_rid}'")));
        }

        let mut parent = Row::new();
        parent.insert(table::RID.to_string(), Value::text(&root_rid));

        let mut queue: VecDeque<QueueItem> = VecDeque::new();
        let mut buffers: IndexMap<String, Vec<Row>> = IndexMap::new();
        let mut tables: IndexMap<String, Vec<Row>> = IndexMap::new();

        for (key, value) in flatten_shallow(dict) {
            if key == table::RID {
                continue;
            }
            self.place(value, key, &root_rid, "", &mut parent, &mut queue)?;
        }

        while let Some(item) = queue.pop_front() {
            let mut row = Row::new();
            row.insert(table::RID.to_string(), Value::text(&item.rid));
            row.insert(table::PARENT_RID.to_string(), Value::text(&item.parent_rid));

            for (key, value) in flatten_shallow(&item.object) {
                self.place(value, key, &item.rid, &item.table_path, &mut row, &mut queue)?;
            }

            let buffer = buffers.entry(item.table_path.clone()).or_default();
            buffer.push(row);
            if buffer.len() >= self.array_batch {
                debug!(table = %item.table_path, rows = buffer.len(), "materializing child buffer");
                tables
                    .entry(item.table_path)
                    .or_default()
                    .extend(buffer.drain(..));
            }
        }

        for (table_path, mut buffer) in buffers {
            tables.entry(table_path).or_default().extend(buffer.drain(..));
        }

        Ok((parent, tables))
    }

    /// Routes one flattened field into the row or, for object-arrays, into the
    /// child queue with a marker left behind.
    fn place(
        &mut self,
        value: Value,
        key: String,
        rid: &str,
        table_path: &str,
        row: &mut Row,
        queue: &mut VecDeque<QueueItem>,
    ) -> Result<(), TransferError> {
        let elements = match value {
            Value::Array(elements) => elements,
            other => {
                row.insert(key, other);
                return Ok(());
            }
        };

        let (objects, primitives): (Vec<Value>, Vec<Value>) =
            elements.into_iter().partition(Value::is_dict);

        if objects.is_empty() {
            // primitive (or empty) arrays stay in place
            row.insert(key, Value::Array(primitives));
            return Ok(());
        }

        let child_table = if table_path.is_empty() {
            key.clone()
        } else {
            format!("{table_path}.{key}")
        };

        if !primitives.is_empty() && self.warned_mixed.insert(child_table.clone()) {
            warn!(
                table = %child_table,
                dropped = primitives.len(),
                "mixed array: primitive elements are dropped"
            );
        }

        row.insert(table::marker_key(&key), Value::bool(true));

        for object in objects {
            let child_rid = Uuid::new_v4().to_string();
            queue.push_back(QueueItem {
                object: object.into_dict().map_err(|e| TransferError::Data(e.to_string()))?,
                table_path: child_table.clone(),
                rid: child_rid,
                parent_rid: rid.to_string(),
            });
        }
        Ok(())
    }
}
