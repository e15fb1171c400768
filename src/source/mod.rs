//! Backing data source boundary.
//!
//! The tree store never owns the authoritative hierarchy; it reads and
//! writes through a [`DataSource`] handed to it at construction.

pub mod json_file;
pub mod table;

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde_json::Value;

use crate::model::record::{NodeId, NodeRecord};

pub use json_file::JsonFileSource;
pub use table::RecordTable;

/// Error type for data source calls
#[derive(Debug, thiserror::Error)]
pub enum DataSourceError {
    #[error("record {0} does not exist")]
    Missing(NodeId),
    #[error("rejected by the data source: {0}")]
    Rejected(String),
    #[error("could not access {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("malformed record data: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("inconsistent hierarchy: {0}")]
    Inconsistent(String),
}

/// Equality conditions a root record must satisfy
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RootFilter {
    conditions: BTreeMap<String, Value>,
}

impl RootFilter {
    pub fn new(conditions: BTreeMap<String, Value>) -> Self {
        RootFilter { conditions }
    }

    pub fn with(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.conditions.insert(field.into(), value.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty()
    }

    /// A record matches when every condition equals its column. A missing
    /// column only matches a `null` condition.
    pub fn matches(&self, record: &NodeRecord) -> bool {
        self.conditions
            .iter()
            .all(|(field, want)| record.field(field).unwrap_or(Value::Null) == *want)
    }
}

/// The four calls the tree needs from wherever the records live.
///
/// Every call is a suspension point of the single thread driving the
/// tree: it completes, successfully or not, before the caller touches the
/// in-memory tree again. Records come back in the order the source
/// wants them shown.
pub trait DataSource {
    /// Top-level records matching `filter`.
    fn fetch_roots(&mut self, filter: &RootFilter) -> Result<Vec<NodeRecord>, DataSourceError>;

    /// Direct children of `parent`.
    fn fetch_children(&mut self, parent: NodeId) -> Result<Vec<NodeRecord>, DataSourceError>;

    /// Make `new_parent` the parent of `node`. Must be applied at most once.
    fn persist_reparent(&mut self, node: NodeId, new_parent: NodeId) -> Result<(), DataSourceError>;

    /// Current state of a single record.
    fn fetch_one(&mut self, node: NodeId) -> Result<NodeRecord, DataSourceError>;
}
