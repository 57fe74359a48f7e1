use crate::csv::codec::{render_header, render_row, split_line, split_line_raw};
use crate::table::{Row, columns_of};
use error::TransferError;
use std::collections::BTreeSet;
use store::ObjectStore;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    Overwrite,
    Append,
}

/// Schema-tracking CSV writer. The header is the alphabetical union of every
/// column ever written; appending rows that introduce new columns triggers a
/// read–merge–rewrite of the whole file.
pub struct CsvTableWriter<'a> {
    store: &'a dyn ObjectStore,
}

impl<'a> CsvTableWriter<'a> {
    pub fn new(store: &'a dyn ObjectStore) -> Self {
        CsvTableWriter { store }
    }

    /// Writes `rows` to `path` and returns the column set now on disk, which
    /// the caller passes back as `known` on the next append.
    pub async fn write(
        &self,
        path: &str,
        rows: &[Row],
        mode: WriteMode,
        known: &BTreeSet<String>,
    ) -> Result<BTreeSet<String>, TransferError> {
        let mut columns: BTreeSet<String> = known.clone();
        columns.extend(columns_of(rows));

        let existing = self.store.file_properties(path).await?;

        match (mode, existing) {
            (WriteMode::Overwrite, existing) => {
                if existing.is_some() {
                    self.store.delete_file(path).await?;
                }
                self.create_with_header(path, &columns, rows).await?;
            }
            (WriteMode::Append, None) => {
                self.create_with_header(path, &columns, rows).await?;
            }
            (WriteMode::Append, Some(props)) => {
                if columns.len() > known.len() {
                    columns = self.merge_rewrite(path, &columns, rows).await?;
                } else {
                    let ordered: Vec<String> = columns.iter().cloned().collect();
                    let body = render_body(&ordered, rows);
                    self.store.append(path, body.as_bytes(), props.size).await?;
                    self.store
                        .flush(path, props.size + body.len() as u64)
                        .await?;
                    debug!(path, rows = rows.len(), "appended rows");
                }
            }
        }
        Ok(columns)
    }

    async fn create_with_header(
        &self,
        path: &str,
        columns: &BTreeSet<String>,
        rows: &[Row],
    ) -> Result<(), TransferError> {
        let ordered: Vec<String> = columns.iter().cloned().collect();
        let mut content = render_header(&ordered);
        content.push('\n');
        content.push_str(&render_body(&ordered, rows));

        self.store.create_file(path).await?;
        self.store.append(path, content.as_bytes(), 0).await?;
        self.store.flush(path, content.len() as u64).await?;
        debug!(path, rows = rows.len(), columns = ordered.len(), "wrote file");
        Ok(())
    }

    /// Downloads the file, widens every existing row to the union schema, and
    /// rewrites everything under a single header.
    async fn merge_rewrite(
        &self,
        path: &str,
        columns: &BTreeSet<String>,
        rows: &[Row],
    ) -> Result<BTreeSet<String>, TransferError> {
        let bytes = self.store.download(path).await?;
        let text = String::from_utf8(bytes)
            .map_err(|e| TransferError::Serialization(format!("{path}: {e}")))?;

        let mut lines = text.split('\n').filter(|l| !l.is_empty());
        let old_columns: Vec<String> = match lines.next() {
            Some(header) => split_line(header),
            None => vec![],
        };

        let mut union: BTreeSet<String> = columns.clone();
        union.extend(old_columns.iter().cloned());
        let ordered: Vec<String> = union.iter().cloned().collect();

        info!(
            path,
            old = old_columns.len(),
            new = ordered.len(),
            "schema drift, rewriting file"
        );

        let mut content = render_header(&ordered);
        content.push('\n');
        // remap existing rows cell-by-cell so their textual form is untouched
        for line in lines {
            let cells = split_line_raw(line);
            let remapped: Vec<String> = ordered
                .iter()
                .map(|column| {
                    old_columns
                        .iter()
                        .position(|c| c == column)
                        .and_then(|i| cells.get(i))
                        .cloned()
                        .unwrap_or_default()
                })
                .collect();
            content.push_str(&remapped.join("|"));
            content.push('\n');
        }
        content.push_str(&render_body(&ordered, rows));

        self.store.delete_file(path).await?;
        self.store.create_file(path).await?;
        self.store.append(path, content.as_bytes(), 0).await?;
        self.store.flush(path, content.len() as u64).await?;
        Ok(union)
    }
}

fn render_body(columns: &[String], rows: &[Row]) -> String {
    let mut body = String::new();
    for row in rows {
        body.push_str(&render_row(columns, row));
        body.push('\n');
    }
    body
}

#[cfg(test)]
mod tests {
    use super::*;
    use store::MemoryObjectStore;
    use value::Value;

    fn row(pairs: Vec<(&str, Value)>) -> Row {
        pairs
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect()
    }

    #[tokio::test]
    async fn overwrite_then_append_without_drift() {
        let store = MemoryObjectStore::new();
        let writer = CsvTableWriter::new(&store);

        let known = writer
            .write(
                "t.csv",
                &[row(vec![("id", 1.into()), ("x", 2.into())])],
                WriteMode::Overwrite,
                &BTreeSet::new(),
            )
            .await
            .unwrap();
        writer
            .write(
                "t.csv",
                &[row(vec![("id", 2.into()), ("x", 3.into())])],
                WriteMode::Append,
                &known,
            )
            .await
            .unwrap();

        assert_eq!(store.file_text("t.csv").unwrap(), "id|x\n1|2\n2|3\n");
    }

    #[tokio::test]
    async fn append_with_drift_rewrites_union_schema() {
        let store = MemoryObjectStore::new();
        let writer = CsvTableWriter::new(&store);

        let known = writer
            .write(
                "t.csv",
                &[row(vec![("id", 1.into()), ("x", 10.into())])],
                WriteMode::Overwrite,
                &BTreeSet::new(),
            )
            .await
            .unwrap();
        let known = writer
            .write(
                "t.csv",
                &[row(vec![("id", 2.into()), ("y", 20.into())])],
                WriteMode::Append,
                &known,
            )
            .await
            .unwrap();

        assert_eq!(
            known,
            BTreeSet::from(["id".to_string(), "x".to_string(), "y".to_string()])
        );
        // batch 1 rows get a null y, batch 2 rows a null x
        assert_eq!(store.file_text("t.csv").unwrap(), "id|x|y\n1|10|\n2||20\n");
    }

    #[tokio::test]
    async fn append_to_missing_file_creates_with_header() {
        let store = MemoryObjectStore::new();
        let writer = CsvTableWriter::new(&store);

        writer
            .write(
                "fresh.csv",
                &[row(vec![("a", "x".into())])],
                WriteMode::Append,
                &BTreeSet::new(),
            )
            .await
            .unwrap();
        assert_eq!(store.file_text("fresh.csv").unwrap(), "a\nx\n");
    }

    #[tokio::test]
    async fn overwrite_replaces_content() {
        let store = MemoryObjectStore::new();
        store.put_file("t.csv", b"old|stuff\n1|2\n");
        let writer = CsvTableWriter::new(&store);

        writer
            .write(
                "t.csv",
                &[row(vec![("id", 1.into())])],
                WriteMode::Overwrite,
                &BTreeSet::new(),
            )
            .await
            .unwrap();
        assert_eq!(store.file_text("t.csv").unwrap(), "id\n1\n");
    }

    #[tokio::test]
    async fn rewrite_preserves_existing_cell_text() {
        let store = MemoryObjectStore::new();
        let writer = CsvTableWriter::new(&store);

        let known = writer
            .write(
                "t.csv",
                &[row(vec![("id", 1.into()), ("tags", Value::array(vec![1.into(), 2.into()]))])],
                WriteMode::Overwrite,
                &BTreeSet::new(),
            )
            .await
            .unwrap();
        writer
            .write(
                "t.csv",
                &[row(vec![("id", 2.into()), ("z", "q".into())])],
                WriteMode::Append,
                &known,
            )
            .await
            .unwrap();

        assert_eq!(
            store.file_text("t.csv").unwrap(),
            "id|tags|z\n1|[1,2]|\n2||q\n"
        );
    }
}
