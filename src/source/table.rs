use std::collections::HashMap;

use indexmap::IndexMap;

use crate::model::node::Lineage;
use crate::model::path::{child_path, rebase};
use crate::model::record::{NodeId, NodeRecord};
use crate::source::{DataSource, DataSourceError, RootFilter};

/// Authoritative in-memory record table.
///
/// Plays the server's part: paths are derived from parent links on load,
/// child counts are computed on every read, and a reparent that would
/// create a cycle is refused. Insertion order is the presentation order.
#[derive(Debug, Clone, Default)]
pub struct RecordTable {
    records: IndexMap<NodeId, NodeRecord>,
}

impl RecordTable {
    /// Build a table from raw records, validating the parent links.
    /// Stored paths and counts are ignored and recomputed.
    pub fn from_records(records: Vec<NodeRecord>) -> Result<Self, DataSourceError> {
        let mut map = IndexMap::with_capacity(records.len());
        for mut rec in records {
            rec.child_count = None;
            let id = rec.id;
            if map.insert(id, rec).is_some() {
                return Err(DataSourceError::Inconsistent(format!(
                    "duplicate record id {}",
                    id
                )));
            }
        }
        let mut table = RecordTable { records: map };
        table.recompute_paths()?;
        Ok(table)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn get(&self, id: NodeId) -> Option<&NodeRecord> {
        self.records.get(&id)
    }

    /// All records in table order, without computed counts.
    pub fn to_records(&self) -> Vec<NodeRecord> {
        self.records.values().cloned().collect()
    }

    fn recompute_paths(&mut self) -> Result<(), DataSourceError> {
        let mut paths = Vec::with_capacity(self.records.len());
        for id in self.records.keys() {
            paths.push(self.path_of(*id)?);
        }
        for (rec, path) in self.records.values_mut().zip(paths) {
            rec.parent_path = path;
        }
        Ok(())
    }

    /// Walk the parent links of `id` up to its root.
    fn path_of(&self, id: NodeId) -> Result<String, DataSourceError> {
        let mut chain = Vec::new();
        let mut cursor = self.records.get(&id).and_then(|r| r.parent_id);
        while let Some(parent_id) = cursor {
            if parent_id == id || chain.contains(&parent_id) {
                return Err(DataSourceError::Inconsistent(format!(
                    "record {} is its own ancestor",
                    id
                )));
            }
            let parent = self.records.get(&parent_id).ok_or_else(|| {
                DataSourceError::Inconsistent(format!(
                    "record {} has unknown parent {}",
                    id, parent_id
                ))
            })?;
            chain.push(parent_id);
            cursor = parent.parent_id;
        }
        Ok(chain
            .iter()
            .rev()
            .fold(String::new(), |path, ancestor| child_path(&path, *ancestor)))
    }

    fn child_counts(&self) -> HashMap<NodeId, usize> {
        let mut counts = HashMap::new();
        for rec in self.records.values() {
            if let Some(parent) = rec.parent_id {
                *counts.entry(parent).or_insert(0) += 1;
            }
        }
        counts
    }

    fn with_count(rec: &NodeRecord, counts: &HashMap<NodeId, usize>) -> NodeRecord {
        let mut out = rec.clone();
        out.child_count = Some(counts.get(&rec.id).copied().unwrap_or(0));
        out
    }
}

impl DataSource for RecordTable {
    fn fetch_roots(&mut self, filter: &RootFilter) -> Result<Vec<NodeRecord>, DataSourceError> {
        let counts = self.child_counts();
        Ok(self
            .records
            .values()
            .filter(|r| r.parent_id.is_none() && filter.matches(r))
            .map(|r| Self::with_count(r, &counts))
            .collect())
    }

    fn fetch_children(&mut self, parent: NodeId) -> Result<Vec<NodeRecord>, DataSourceError> {
        if !self.records.contains_key(&parent) {
            return Err(DataSourceError::Missing(parent));
        }
        let counts = self.child_counts();
        Ok(self
            .records
            .values()
            .filter(|r| r.parent_id == Some(parent))
            .map(|r| Self::with_count(r, &counts))
            .collect())
    }

    fn persist_reparent(&mut self, node: NodeId, new_parent: NodeId) -> Result<(), DataSourceError> {
        let moved = self.records.get(&node).ok_or(DataSourceError::Missing(node))?;
        let target = self
            .records
            .get(&new_parent)
            .ok_or(DataSourceError::Missing(new_parent))?;

        if node == new_parent || moved.is_ancestor_of(target) {
            return Err(DataSourceError::Rejected(format!(
                "cannot move {} under its own descendant {}",
                node, new_parent
            )));
        }

        let old_prefix = moved.own_path();
        let new_path = target.own_path();
        let new_prefix = child_path(&new_path, node);

        for rec in self.records.values_mut() {
            if let Some(path) = rebase(&rec.parent_path, &old_prefix, &new_prefix) {
                rec.parent_path = path;
            }
        }
        if let Some(moved) = self.records.get_mut(&node) {
            moved.parent_id = Some(new_parent);
            moved.parent_path = new_path;
        }
        Ok(())
    }

    fn fetch_one(&mut self, node: NodeId) -> Result<NodeRecord, DataSourceError> {
        let rec = self.records.get(&node).ok_or(DataSourceError::Missing(node))?;
        let count = self
            .records
            .values()
            .filter(|r| r.parent_id == Some(node))
            .count();
        let mut out = rec.clone();
        out.child_count = Some(count);
        Ok(out)
    }
}
