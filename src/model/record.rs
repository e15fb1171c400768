use std::collections::BTreeMap;
use std::fmt;
use std::num::ParseIntError;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Identifier of a record in the hierarchy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(pub u64);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for NodeId {
    type Err = ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().parse::<u64>().map(NodeId)
    }
}

/// A record as exchanged with the data source, and as carried in a drag payload.
///
/// Columns other than the hierarchy bookkeeping land in `fields`, so a
/// record file can carry whatever the view needs (`count_field`, root
/// filter columns) without this type knowing about them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeRecord {
    pub id: NodeId,
    #[serde(default)]
    pub parent_id: Option<NodeId>,
    /// Ancestor ids, root first, each followed by `/`. Empty for roots.
    #[serde(default)]
    pub parent_path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub child_count: Option<usize>,
    #[serde(default)]
    pub name: String,
    #[serde(flatten)]
    pub fields: BTreeMap<String, Value>,
}

impl NodeRecord {
    pub fn new(id: NodeId, parent_id: Option<NodeId>, name: impl Into<String>) -> Self {
        NodeRecord {
            id,
            parent_id,
            parent_path: String::new(),
            child_count: None,
            name: name.into(),
            fields: BTreeMap::new(),
        }
    }

    /// Look up a column by name, including the built-in ones.
    pub fn field(&self, key: &str) -> Option<Value> {
        match key {
            "id" => Some(Value::from(self.id.0)),
            "name" => Some(Value::from(self.name.clone())),
            "parent_id" => Some(self.parent_id.map_or(Value::Null, |p| Value::from(p.0))),
            "parent_path" => Some(Value::from(self.parent_path.clone())),
            _ => self.fields.get(key).cloned(),
        }
    }
}
