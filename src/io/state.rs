use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::model::record::NodeId;

/// Persisted view state (written to .state.json)
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct UiState {
    /// Expanded nodes, parents before their descendants
    #[serde(default)]
    pub expanded: Vec<NodeId>,
}

/// Read .state.json from the tree directory
pub fn read_ui_state(tree_dir: &Path) -> Option<UiState> {
    let path = tree_dir.join(".state.json");
    let content = fs::read_to_string(&path).ok()?;
    serde_json::from_str(&content).ok()
}

/// Write .state.json to the tree directory
pub fn write_ui_state(tree_dir: &Path, state: &UiState) -> Result<(), std::io::Error> {
    let path = tree_dir.join(".state.json");
    let content = serde_json::to_string_pretty(state)?;
    fs::write(&path, content)
}
