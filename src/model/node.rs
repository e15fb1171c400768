use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::model::path::child_path;
use crate::model::record::{NodeId, NodeRecord};

/// Load state of a node's children
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "ids", rename_all = "lowercase")]
pub enum Children {
    /// Never queried; expanding must fetch.
    Unloaded,
    /// Fetched. An empty list is a known leaf and is not fetched again.
    Loaded(Vec<NodeId>),
}

impl Children {
    pub fn is_loaded(&self) -> bool {
        matches!(self, Children::Loaded(_))
    }

    pub fn ids(&self) -> &[NodeId] {
        match self {
            Children::Unloaded => &[],
            Children::Loaded(ids) => ids,
        }
    }
}

/// Ancestry queries shared by in-memory nodes and wire records.
///
/// Drop validation runs on the dragged record straight from the payload,
/// so both sides of a drop need the same answers without a lookup.
pub trait Lineage {
    fn node_id(&self) -> NodeId;
    fn parent(&self) -> Option<NodeId>;
    fn parent_path(&self) -> &str;

    /// The path this node's children store.
    fn own_path(&self) -> String {
        child_path(self.parent_path(), self.node_id())
    }

    /// True iff `other` sits somewhere below this node.
    fn is_ancestor_of<L: Lineage + ?Sized>(&self, other: &L) -> bool {
        other.parent_path().starts_with(&self.own_path())
    }

    /// True if `other` is this node or one of its direct children.
    /// Dropping `other` onto this node would change nothing.
    fn is_same_or_parent_of<L: Lineage + ?Sized>(&self, other: &L) -> bool {
        other.node_id() == self.node_id() || other.parent() == Some(self.node_id())
    }
}

/// One entry of the in-memory hierarchy
#[derive(Debug, Clone, PartialEq)]
pub struct TreeNode {
    pub id: NodeId,
    pub parent_id: Option<NodeId>,
    pub parent_path: String,
    pub name: String,
    /// Count reported by the source; lets a leaf skip the fetch entirely.
    pub child_count: Option<usize>,
    pub children: Children,
    pub is_expanded: bool,
    pub fields: BTreeMap<String, Value>,
}

impl TreeNode {
    /// Build a collapsed node from a fetched record. A record that already
    /// reports zero children starts out loaded-empty.
    pub fn from_record(record: NodeRecord) -> Self {
        let children = if record.child_count == Some(0) {
            Children::Loaded(Vec::new())
        } else {
            Children::Unloaded
        };
        TreeNode {
            id: record.id,
            parent_id: record.parent_id,
            parent_path: record.parent_path,
            name: record.name,
            child_count: record.child_count,
            children,
            is_expanded: false,
            fields: record.fields,
        }
    }

    /// Overwrite the record-backed fields, keeping children and expansion.
    pub fn apply_record(&mut self, record: NodeRecord) {
        self.parent_id = record.parent_id;
        self.parent_path = record.parent_path;
        self.name = record.name;
        self.child_count = record.child_count;
        self.fields = record.fields;
    }

    /// Snapshot as a wire record (drag payload).
    pub fn to_record(&self) -> NodeRecord {
        NodeRecord {
            id: self.id,
            parent_id: self.parent_id,
            parent_path: self.parent_path.clone(),
            child_count: self.child_count,
            name: self.name.clone(),
            fields: self.fields.clone(),
        }
    }

    /// Whether activating this node can reveal anything.
    pub fn is_expandable(&self) -> bool {
        match &self.children {
            Children::Loaded(ids) => !ids.is_empty(),
            Children::Unloaded => self.child_count != Some(0),
        }
    }
}

impl Lineage for TreeNode {
    fn node_id(&self) -> NodeId {
        self.id
    }

    fn parent(&self) -> Option<NodeId> {
        self.parent_id
    }

    fn parent_path(&self) -> &str {
        &self.parent_path
    }
}

impl Lineage for NodeRecord {
    fn node_id(&self) -> NodeId {
        self.id
    }

    fn parent(&self) -> Option<NodeId> {
        self.parent_id
    }

    fn parent_path(&self) -> &str {
        &self.parent_path
    }
}
