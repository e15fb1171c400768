use std::fs;
use std::path::{Path, PathBuf};

use crate::io::recovery::atomic_write;
use crate::model::record::{NodeId, NodeRecord};
use crate::source::{DataSource, DataSourceError, RecordTable, RootFilter};

/// A [`RecordTable`] persisted as a JSON array of records.
///
/// Reads are served from memory. A reparent is applied to a copy of the
/// table, written atomically, and only then adopted, so a failed write
/// leaves both the file and the in-memory table untouched.
pub struct JsonFileSource {
    path: PathBuf,
    table: RecordTable,
}

impl JsonFileSource {
    pub fn open(path: &Path) -> Result<Self, DataSourceError> {
        let text = fs::read_to_string(path).map_err(|e| DataSourceError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        let records: Vec<NodeRecord> = serde_json::from_str(&text)?;
        let table = RecordTable::from_records(records)?;
        Ok(JsonFileSource {
            path: path.to_path_buf(),
            table,
        })
    }

    /// Write an empty record file, replacing whatever is there.
    pub fn create_empty(path: &Path) -> Result<Self, DataSourceError> {
        let source = JsonFileSource {
            path: path.to_path_buf(),
            table: RecordTable::default(),
        };
        write_table(&source.path, &source.table)?;
        Ok(source)
    }

    pub fn table(&self) -> &RecordTable {
        &self.table
    }
}

fn write_table(path: &Path, table: &RecordTable) -> Result<(), DataSourceError> {
    let mut text = serde_json::to_string_pretty(&table.to_records())?;
    text.push('\n');
    atomic_write(path, text.as_bytes()).map_err(|e| DataSourceError::Io {
        path: path.to_path_buf(),
        source: e,
    })
}

impl DataSource for JsonFileSource {
    fn fetch_roots(&mut self, filter: &RootFilter) -> Result<Vec<NodeRecord>, DataSourceError> {
        self.table.fetch_roots(filter)
    }

    fn fetch_children(&mut self, parent: NodeId) -> Result<Vec<NodeRecord>, DataSourceError> {
        self.table.fetch_children(parent)
    }

    fn persist_reparent(&mut self, node: NodeId, new_parent: NodeId) -> Result<(), DataSourceError> {
        let mut next = self.table.clone();
        next.persist_reparent(node, new_parent)?;
        write_table(&self.path, &next)?;
        self.table = next;
        Ok(())
    }

    fn fetch_one(&mut self, node: NodeId) -> Result<NodeRecord, DataSourceError> {
        self.table.fetch_one(node)
    }
}
