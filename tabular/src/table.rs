use std::collections::{BTreeMap, BTreeSet};
use value::Value;

/// Surrogate id column, present on every row.
pub const RID: &str = "_rid";
/// Link to the enclosing row's rid; present on child-table rows only.
pub const PARENT_RID: &str = "_parent_rid";
/// Prefix of the synthetic boolean columns recording extracted object-arrays.
pub const MARKER_PREFIX: &str = "_has_array_";

/// One flat table row. Keys are dotted paths; absent keys read as null.
pub type Row = BTreeMap<String, Value>;

pub fn marker_key(path: &str) -> String {
    format!("{MARKER_PREFIX}{path}")
}

pub fn marker_path(column: &str) -> Option<&str> {
    column.strip_prefix(MARKER_PREFIX)
}

pub fn is_system_column(column: &str) -> bool {
    column == RID || column == PARENT_RID || column.starts_with(MARKER_PREFIX)
}

/// Nesting depth of a dotted table path; direct children of the parent are 0.
pub fn path_depth(table_path: &str) -> usize {
    table_path.matches('.').count()
}

/// Sorted union of the keys appearing in any of the rows.
pub fn columns_of(rows: &[Row]) -> BTreeSet<String> {
    let mut columns = BTreeSet::new();
    for row in rows {
        columns.extend(row.keys().cloned());
    }
    columns
}

/// `<export_root>/<container>.csv`
pub fn parent_file(export_root: &str, container: &str) -> String {
    format!("{export_root}/{container}.csv")
}

/// `<export_root>/<container>_batch_NNN.csv`
pub fn parent_batch_file(export_root: &str, container: &str, batch: usize) -> String {
    format!("{export_root}/{container}_batch_{batch:03}.csv")
}

/// `<export_root>/<segments…>/<last>.csv` — the dotted table path split into
/// directories, the file named after the last segment.
pub fn child_file(export_root: &str, table_path: &str) -> String {
    let last = table_path.rsplit('.').next().unwrap_or(table_path);
    let dirs = table_path.replace('.', "/");
    format!("{export_root}/{dirs}/{last}.csv")
}

/// A child CSV discovered in the object store, located in the table family.
#[derive(Debug, Clone)]
pub struct ChildCsv {
    pub full_path: String,
    pub table_path: String,
    pub depth: usize,
}

/// Groups the listed CSV paths by nesting depth, skipping the parent file.
/// The table path is reconstructed from the directory segments below the
/// export root.
pub fn organize_child_csvs(
    paths: &[String],
    export_root: &str,
    container: &str,
) -> BTreeMap<usize, Vec<ChildCsv>> {
    let parent = parent_file(export_root, container);
    let prefix = format!("{}/", export_root.trim_end_matches('/'));

    let mut sorted: Vec<&String> = paths.iter().collect();
    sorted.sort();

    let mut by_depth: BTreeMap<usize, Vec<ChildCsv>> = BTreeMap::new();
    for path in sorted {
        if !path.ends_with(".csv") || **path == parent {
            continue;
        }
        let rel = match path.strip_prefix(&prefix) {
            Some(rel) => rel,
            None => path,
        };
        let segments: Vec<&str> = rel.split('/').filter(|s| !s.is_empty()).collect();
        if segments.is_empty() {
            continue;
        }
        let table_path = if segments.len() > 1 {
            segments[..segments.len() - 1].join(".")
        } else {
            segments[0].trim_end_matches(".csv").to_string()
        };
        let depth = path_depth(&table_path);
        by_depth.entry(depth).or_default().push(ChildCsv {
            full_path: path.clone(),
            table_path,
            depth,
        });
    }
    by_depth
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_layout() {
        assert_eq!(parent_file("exp/orders", "orders"), "exp/orders/orders.csv");
        assert_eq!(
            parent_batch_file("exp/orders", "orders", 7),
            "exp/orders/orders_batch_007.csv"
        );
        assert_eq!(
            child_file("exp/orders", "orders.items"),
            "exp/orders/orders/items/items.csv"
        );
        assert_eq!(child_file("exp/orders", "tags"), "exp/orders/tags/tags.csv");
    }

    #[test]
    fn organizes_children_by_depth() {
        let paths = vec![
            "exp/orders/orders.csv".to_string(),
            "exp/orders/items/items.csv".to_string(),
            "exp/orders/items/tags/tags.csv".to_string(),
            "exp/orders/notes/notes.csv".to_string(),
            "exp/orders/readme.txt".to_string(),
        ];
        let by_depth = organize_child_csvs(&paths, "exp/orders", "orders");

        let depth0: Vec<&str> = by_depth[&0].iter().map(|c| c.table_path.as_str()).collect();
        assert_eq!(depth0, vec!["items", "notes"]);
        let depth1: Vec<&str> = by_depth[&1].iter().map(|c| c.table_path.as_str()).collect();
        assert_eq!(depth1, vec!["items.tags"]);
        assert!(!by_depth.contains_key(&2));
    }

    #[test]
    fn marker_helpers() {
        assert_eq!(marker_key("orders.items"), "_has_array_orders.items");
        assert_eq!(marker_path("_has_array_tags"), Some("tags"));
        assert!(is_system_column("_rid"));
        assert!(is_system_column("_has_array_x"));
        assert!(!is_system_column("name"));
    }

    #[test]
    fn column_union() {
        let rows = vec![
            Row::from([("id".to_string(), Value::int(1))]),
            Row::from([("x".to_string(), Value::int(2))]),
        ];
        let columns: Vec<String> = columns_of(&rows).into_iter().collect();
        assert_eq!(columns, vec!["id".to_string(), "x".to_string()]);
    }
}
