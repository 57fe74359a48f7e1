use crate::csv::codec::{parse_row, split_line};
use crate::table::Row;
use error::TransferError;
use store::ObjectStore;
use tracing::debug;

/// Rows parsed per streamed chunk.
pub const DEFAULT_CHUNK: usize = 10_000;
/// Coarser chunk for pure counting passes.
pub const COUNT_CHUNK: usize = 50_000;

/// Chunked reader mirroring the writer's wire format.
pub struct CsvTableReader<'a> {
    store: &'a dyn ObjectStore,
    chunk_size: usize,
}

impl<'a> CsvTableReader<'a> {
    pub fn new(store: &'a dyn ObjectStore) -> Self {
        CsvTableReader {
            store,
            chunk_size: DEFAULT_CHUNK,
        }
    }

    pub fn with_chunk_size(store: &'a dyn ObjectStore, chunk_size: usize) -> Self {
        CsvTableReader {
            store,
            chunk_size: chunk_size.max(1),
        }
    }

    /// Total data rows in the file, counted in chunks without parsing cells.
    pub async fn count_rows(&self, path: &str) -> Result<usize, TransferError> {
        let lines = self.data_lines(path).await?.1;
        let mut total = 0;
        for chunk in lines.chunks(COUNT_CHUNK) {
            total += chunk.len();
        }
        Ok(total)
    }

    /// Reads up to `limit` rows after skipping `skip` data rows.
    pub async fn read(
        &self,
        path: &str,
        skip: usize,
        limit: Option<usize>,
    ) -> Result<Vec<Row>, TransferError> {
        let (columns, lines) = self.data_lines(path).await?;
        let end = match limit {
            Some(limit) => (skip + limit).min(lines.len()),
            None => lines.len(),
        };
        if skip >= lines.len() {
            return Ok(vec![]);
        }

        let mut rows = Vec::with_capacity(end - skip);
        for line in &lines[skip..end] {
            rows.push(parse_row(&columns, line)?);
        }
        debug!(path, skip, rows = rows.len(), "read parent rows");
        Ok(rows)
    }

    /// Opens the file for chunk-at-a-time iteration. A malformed row fails
    /// only its own chunk, so callers can log and move on.
    pub async fn chunks(&self, path: &str) -> Result<CsvChunks, TransferError> {
        let (columns, lines) = self.data_lines(path).await?;
        Ok(CsvChunks {
            columns,
            lines,
            pos: 0,
            chunk_size: self.chunk_size,
        })
    }

    async fn data_lines(&self, path: &str) -> Result<(Vec<String>, Vec<String>), TransferError> {
        let bytes = self.store.download(path).await?;
        let text = String::from_utf8(bytes)
            .map_err(|e| TransferError::Serialization(format!("{path}: {e}")))?;

        let mut lines = text.split('\n').filter(|l| !l.is_empty());
        let columns = match lines.next() {
            Some(header) => split_line(header),
            None => return Ok((vec![], vec![])),
        };
        Ok((columns, lines.map(str::to_string).collect()))
    }
}

pub struct CsvChunks {
    columns: Vec<String>,
    lines: Vec<String>,
    pos: usize,
    chunk_size: usize,
}

impl CsvChunks {
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// The next chunk of parsed rows; `None` when the file is exhausted. An
    /// error consumes the chunk it occurred in.
    pub fn next_chunk(&mut self) -> Option<Result<Vec<Row>, TransferError>> {
        if self.pos >= self.lines.len() {
            return None;
        }
        let end = (self.pos + self.chunk_size).min(self.lines.len());
        let slice = &self.lines[self.pos..end];
        self.pos = end;

        let mut rows = Vec::with_capacity(slice.len());
        for line in slice {
            match parse_row(&self.columns, line) {
                Ok(row) => rows.push(row),
                Err(err) => return Some(Err(err)),
            }
        }
        Some(Ok(rows))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use store::MemoryObjectStore;
    use value::Value;

    fn seeded() -> MemoryObjectStore {
        let store = MemoryObjectStore::new();
        store.put_file("t.csv", b"id|x\n1|a\n2|b\n3|c\n4|d\n");
        store
    }

    #[tokio::test]
    async fn counts_rows() {
        let store = seeded();
        let reader = CsvTableReader::new(&store);
        assert_eq!(reader.count_rows("t.csv").await.unwrap(), 4);
    }

    #[tokio::test]
    async fn skip_and_limit() {
        let store = seeded();
        let reader = CsvTableReader::new(&store);
        let rows = reader.read("t.csv", 1, Some(2)).await.unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].get("id").unwrap(), &Value::int(2));
        assert_eq!(rows[1].get("x").unwrap(), &Value::text("c"));

        assert!(reader.read("t.csv", 10, Some(5)).await.unwrap().is_empty());
        let tail = reader.read("t.csv", 3, Some(100)).await.unwrap();
        assert_eq!(tail.len(), 1);
    }

    #[tokio::test]
    async fn chunked_iteration() {
        let store = seeded();
        let reader = CsvTableReader::with_chunk_size(&store, 3);
        let mut chunks = reader.chunks("t.csv").await.unwrap();

        assert_eq!(chunks.next_chunk().unwrap().unwrap().len(), 3);
        assert_eq!(chunks.next_chunk().unwrap().unwrap().len(), 1);
        assert!(chunks.next_chunk().is_none());
    }

    #[tokio::test]
    async fn bad_chunk_is_skippable() {
        let store = MemoryObjectStore::new();
        store.put_file("t.csv", b"id|x\n1|a\nbroken|row|extra\n3|c\n");
        let reader = CsvTableReader::with_chunk_size(&store, 2);
        let mut chunks = reader.chunks("t.csv").await.unwrap();

        assert!(chunks.next_chunk().unwrap().is_err());
        let tail = chunks.next_chunk().unwrap().unwrap();
        assert_eq!(tail.len(), 1);
        assert_eq!(tail[0].get("id").unwrap(), &Value::int(3));
    }

    #[tokio::test]
    async fn empty_file_counts_zero() {
        let store = MemoryObjectStore::new();
        store.put_file("empty.csv", b"");
        let reader = CsvTableReader::new(&store);
        assert_eq!(reader.count_rows("empty.csv").await.unwrap(), 0);
        assert!(reader.read("empty.csv", 0, None).await.unwrap().is_empty());
    }
}
