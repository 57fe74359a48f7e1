use crate::table::{self, Row};
use indexmap::IndexMap;
use std::collections::{BTreeMap, HashMap, HashSet};
use tracing::{debug, warn};
use value::Value;
use value::coerce::strip_fields;
use value::flatten::unflatten;

/// The result of stitching one parent batch back together.
#[derive(Debug)]
pub struct StitchOutcome {
    /// Reconstructed documents, in parent-row order, system fields stripped.
    pub documents: Vec<Value>,
    pub child_rows: usize,
    /// Child rows whose parent rid resolved to nothing.
    pub orphans: usize,
    /// Rows or markers that violated the data model and were skipped.
    pub data_errors: usize,
}

type Object = BTreeMap<String, Value>;

/// Rebuilds nested documents from a batch of parent rows and the child rows
/// streamed in for them. Children arrive grouped by table, shallowest depth
/// first; `finish` performs marker-driven array initialization and attachment.
pub struct StitchState {
    /// All objects of the batch. Entries are taken out as they are attached.
    objects: Vec<Option<Object>>,
    by_rid: HashMap<String, usize>,
    parent_count: usize,
    parent_rids: HashSet<String>,
    /// Rids introduced at each linkage depth; parents are depth 0.
    rids_by_depth: HashMap<usize, HashSet<String>>,
    children_by_table: IndexMap<String, Vec<usize>>,
    child_rows: usize,
    orphans: usize,
    data_errors: usize,
}

impl StitchState {
    /// Indexes a batch of parent rows. Rows are unflattened immediately;
    /// markers and `_rid` stay on the object until `finish`.
    pub fn new(parent_rows: Vec<Row>) -> Self {
        let mut state = StitchState {
            objects: vec![],
            by_rid: HashMap::new(),
            parent_count: parent_rows.len(),
            parent_rids: HashSet::new(),
            rids_by_depth: HashMap::new(),
            children_by_table: IndexMap::new(),
            child_rows: 0,
            orphans: 0,
            data_errors: 0,
        };

        for row in parent_rows {
            let object = build_object(row, false);
            let idx = state.objects.len();
            if let Some(rid) = rid_of(&object) {
                state.by_rid.insert(rid.clone(), idx);
                state.parent_rids.insert(rid);
            }
            state.objects.push(Some(object));
        }
        state
            .rids_by_depth
            .insert(0, state.parent_rids.clone());
        state
    }

    pub fn parent_rids(&self) -> &HashSet<String> {
        &self.parent_rids
    }

    /// The rids whose rows should receive children from the given table,
    /// derived from array markers. Markers are matched at every suffix of the
    /// table path, which covers markers recorded relative to a nested row.
    /// Falls back to every rid at the nearest populated depth.
    pub fn filter_rids(&self, table_path: &str, depth: usize) -> HashSet<String> {
        let parts: Vec<&str> = table_path.split('.').collect();

        for start in 0..parts.len() {
            let marker = table::marker_key(&parts[start..].join("."));
            let with_marker: HashSet<String> = self
                .by_rid
                .iter()
                .filter(|(_, idx)| {
                    self.objects[**idx]
                        .as_ref()
                        .is_some_and(|obj| obj.contains_key(&marker))
                })
                .map(|(rid, _)| rid.clone())
                .collect();
            if with_marker.is_empty() {
                continue;
            }

            let valid: HashSet<String> = if depth == 0 {
                with_marker.intersection(&self.parent_rids).cloned().collect()
            } else {
                let mut reachable = HashSet::new();
                for d in 0..=depth {
                    if let Some(rids) = self.rids_by_depth.get(&d) {
                        reachable.extend(rids.iter().cloned());
                    }
                }
                with_marker.intersection(&reachable).cloned().collect()
            };
            if !valid.is_empty() {
                return valid;
            }
        }

        // no marker matched anywhere: widest sensible filter
        if depth == 0 {
            return self.parent_rids.clone();
        }
        for d in (0..=depth).rev() {
            if let Some(rids) = self.rids_by_depth.get(&d)
                && !rids.is_empty()
            {
                return rids.clone();
            }
        }
        HashSet::new()
    }

    /// Takes one streamed chunk of child rows, keeps the ones whose parent rid
    /// is in `filter`, and indexes them for attachment.
    pub fn ingest_children(
        &mut self,
        table_path: &str,
        depth: usize,
        rows: Vec<Row>,
        filter: &HashSet<String>,
    ) {
        for row in rows {
            let parent_rid = match row.get(table::PARENT_RID) {
                Some(Value::Text(rid)) => rid.clone(),
                Some(Value::Null) | None => {
                    self.data_errors += 1;
                    continue;
                }
                Some(other) => other.to_string(),
            };
            if !filter.contains(&parent_rid) {
                continue;
            }

            let object = build_object(row, true);
            let idx = self.objects.len();
            if let Some(rid) = rid_of(&object) {
                self.by_rid.insert(rid.clone(), idx);
                self.rids_by_depth
                    .entry(depth + 1)
                    .or_default()
                    .insert(rid);
            }
            self.objects.push(Some(object));
            self.children_by_table
                .entry(table_path.to_string())
                .or_default()
                .push(idx);
            self.child_rows += 1;
        }
    }

    /// Initializes arrays from markers, attaches children deepest-first and
    /// returns the finished documents.
    pub fn finish(mut self) -> StitchOutcome {
        // which rids carry which marker paths, before markers are consumed
        let mut markers_of: HashMap<String, Vec<String>> = HashMap::new();
        for (rid, idx) in &self.by_rid {
            if let Some(object) = &self.objects[*idx] {
                let paths: Vec<String> = object
                    .keys()
                    .filter_map(|k| table::marker_path(k))
                    .map(str::to_string)
                    .collect();
                if !paths.is_empty() {
                    markers_of.insert(rid.clone(), paths);
                }
            }
        }

        self.initialize_arrays();
        self.attach_children(&markers_of);

        let mut documents = Vec::with_capacity(self.parent_count);
        for idx in 0..self.parent_count {
            let object = self.objects[idx].take().unwrap_or_default();
            documents.push(strip_fields(&Value::Dict(object), &|key| {
                table::is_system_column(key)
            }));
        }

        StitchOutcome {
            documents,
            child_rows: self.child_rows,
            orphans: self.orphans,
            data_errors: self.data_errors,
        }
    }

    /// For every marker on every object, navigate (creating mappings) to the
    /// marked path and seed an empty array, then drop the marker. Empty
    /// object-arrays are represented by the marker alone, so this is where
    /// they come back to life.
    fn initialize_arrays(&mut self) {
        for slot in &mut self.objects {
            let Some(object) = slot else { continue };
            let marker_keys: Vec<String> = object
                .keys()
                .filter(|k| k.starts_with(table::MARKER_PREFIX))
                .cloned()
                .collect();

            for key in marker_keys {
                let path = table::marker_path(&key).unwrap_or_default().to_string();
                object.remove(&key);
                if !ensure_array_slot(object, &path) {
                    warn!(%path, "array marker navigates into a scalar");
                    self.data_errors += 1;
                }
            }
        }
    }

    /// Attaches child objects into their parents, deepest tables first so a
    /// child is complete before it is moved into place.
    fn attach_children(&mut self, markers_of: &HashMap<String, Vec<String>>) {
        let mut tables: Vec<String> = self.children_by_table.keys().cloned().collect();
        tables.sort_by_key(|t| std::cmp::Reverse(table::path_depth(t)));

        for table_path in tables {
            let indices = self.children_by_table.shift_remove(&table_path).unwrap_or_default();

            let mut grouped: IndexMap<String, Vec<usize>> = IndexMap::new();
            for idx in indices {
                let Some(object) = &self.objects[idx] else { continue };
                match object.get(table::PARENT_RID) {
                    Some(Value::Text(rid)) => {
                        grouped.entry(rid.clone()).or_default().push(idx)
                    }
                    _ => continue,
                }
            }

            for (parent_rid, child_indices) in grouped {
                let Some(&parent_idx) = self.by_rid.get(&parent_rid) else {
                    self.orphans += child_indices.len();
                    debug!(%table_path, %parent_rid, "dropping orphaned children");
                    continue;
                };

                let children: Vec<Value> = child_indices
                    .into_iter()
                    .filter_map(|idx| self.objects[idx].take())
                    .map(|object| {
                        Value::Dict(
                            object
                                .into_iter()
                                .filter(|(k, _)| !table::is_system_column(k))
                                .collect(),
                        )
                    })
                    .collect();

                let marker = resolve_marker(&table_path, markers_of.get(&parent_rid));
                let Some(parent) = self.objects[parent_idx].as_mut() else {
                    self.orphans += children.len();
                    continue;
                };

                match marker {
                    Some(path) => {
                        if !extend_array_at(parent, &path, children) {
                            warn!(%table_path, %path, "attachment path blocked by a scalar");
                            self.data_errors += 1;
                        }
                    }
                    None => {
                        // no marker anywhere on the parent: attach at the top
                        // level under the final path segment
                        let key = table_path.rsplit('.').next().unwrap_or(&table_path);
                        debug!(%table_path, key, "no matching marker, attaching at top level");
                        extend_array_at(parent, key, children);
                    }
                }
            }
        }
    }
}

/// Converts a flat row into a nested object. Markers stay top-level, as do
/// `_rid` and (for children) `_parent_rid`; everything else is unflattened.
fn build_object(row: Row, child: bool) -> Object {
    let mut markers: Vec<(String, Value)> = vec![];
    let mut system: Vec<(String, Value)> = vec![];
    let mut regular: Vec<(String, Value)> = vec![];

    for (key, value) in row {
        if key.starts_with(table::MARKER_PREFIX) {
            markers.push((key, value));
        } else if key == table::RID || (child && key == table::PARENT_RID) {
            system.push((key, value));
        } else if key == table::PARENT_RID {
            // stray parent link on a parent row
        } else {
            regular.push((key, value));
        }
    }

    let mut object = unflatten(regular);
    object.extend(markers);
    object.extend(system);
    object
}

fn rid_of(object: &Object) -> Option<String> {
    match object.get(table::RID) {
        Some(Value::Text(rid)) => Some(rid.clone()),
        Some(Value::Null) | None => None,
        Some(other) => Some(other.to_string()),
    }
}

/// Picks the marker path governing an attachment: the exact table path when
/// the parent carries it, else any parent marker that is a dot-aligned suffix
/// of the table path.
fn resolve_marker(table_path: &str, parent_markers: Option<&Vec<String>>) -> Option<String> {
    let markers = parent_markers?;
    if markers.iter().any(|m| m == table_path) {
        return Some(table_path.to_string());
    }
    markers
        .iter()
        .find(|m| table_path.ends_with(&format!(".{m}")))
        .cloned()
}

/// Creates mappings along `path` and makes sure the final key holds an array.
/// Returns false when a non-mapping blocks the way.
fn ensure_array_slot(object: &mut Object, path: &str) -> bool {
    let parts: Vec<&str> = path.split('.').collect();
    let mut current = object;
    for part in &parts[..parts.len() - 1] {
        let entry = current
            .entry(part.to_string())
            .or_insert_with(|| Value::Dict(BTreeMap::new()));
        match entry {
            Value::Dict(inner) => current = inner,
            _ => return false,
        }
    }
    current
        .entry(parts[parts.len() - 1].to_string())
        .or_insert_with(|| Value::Array(vec![]));
    true
}

/// Extends the array at `path` with `children`, creating it if needed. A
/// non-array already at the final key is replaced. Returns false when an
/// intermediate scalar blocks navigation.
fn extend_array_at(object: &mut Object, path: &str, children: Vec<Value>) -> bool {
    let parts: Vec<&str> = path.split('.').collect();
    let mut current = object;
    for part in &parts[..parts.len() - 1] {
        let entry = current
            .entry(part.to_string())
            .or_insert_with(|| Value::Dict(BTreeMap::new()));
        match entry {
            Value::Dict(inner) => current = inner,
            _ => return false,
        }
    }

    let slot = current
        .entry(parts[parts.len() - 1].to_string())
        .or_insert_with(|| Value::Array(vec![]));
    match slot {
        Value::Array(existing) => existing.extend(children),
        other => *other = Value::Array(children),
    }
    true
}
