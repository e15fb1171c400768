use std::fs;
use std::path::{Path, PathBuf};

use crate::model::config::TreeConfig;
use crate::source::{DataSourceError, JsonFileSource, RootFilter};

/// Directory holding the view config, records and UI state
pub const TREE_DIR: &str = "tree";
pub const CONFIG_FILE: &str = "view.toml";
pub const RECORDS_FILE: &str = "records.json";

/// Error type for workspace I/O operations
#[derive(Debug, thiserror::Error)]
pub enum WorkspaceError {
    #[error("not a tree workspace: no tree/view.toml found")]
    NotAWorkspace,
    #[error("could not read {path}: {source}")]
    ReadError {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("could not write {path}: {source}")]
    WriteError {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("could not parse view.toml: {0}")]
    ConfigParseError(#[from] toml::de::Error),
    #[error("could not edit view.toml: {0}")]
    ConfigEditError(#[from] toml_edit::TomlError),
    #[error("unknown view option: {0}")]
    UnknownOption(String),
    #[error("option {key} expects true or false, got {value:?}")]
    InvalidOptionValue { key: String, value: String },
    #[error("{0}")]
    DataSource(#[from] DataSourceError),
}

/// A discovered workspace with its parsed config
#[derive(Debug, Clone)]
pub struct Workspace {
    pub tree_dir: PathBuf,
    pub config: TreeConfig,
}

impl Workspace {
    pub fn records_path(&self) -> PathBuf {
        self.tree_dir.join(RECORDS_FILE)
    }

    pub fn open_source(&self) -> Result<JsonFileSource, WorkspaceError> {
        Ok(JsonFileSource::open(&self.records_path())?)
    }

    pub fn root_filter(&self) -> RootFilter {
        RootFilter::new(self.config.filter.clone())
    }
}

/// Walk up from `start` looking for a `tree/` directory with a config.
pub fn discover_workspace(start: &Path) -> Result<PathBuf, WorkspaceError> {
    let mut current = start.to_path_buf();
    loop {
        let tree_dir = current.join(TREE_DIR);
        if tree_dir.is_dir() && tree_dir.join(CONFIG_FILE).exists() {
            return Ok(current);
        }
        if !current.pop() {
            return Err(WorkspaceError::NotAWorkspace);
        }
    }
}

/// Load the workspace rooted at `root`.
pub fn load_workspace(root: &Path) -> Result<Workspace, WorkspaceError> {
    let tree_dir = root.join(TREE_DIR);
    if !tree_dir.is_dir() {
        return Err(WorkspaceError::NotAWorkspace);
    }

    let config_path = tree_dir.join(CONFIG_FILE);
    let config_text = fs::read_to_string(&config_path).map_err(|e| WorkspaceError::ReadError {
        path: config_path.clone(),
        source: e,
    })?;
    let config: TreeConfig = toml::from_str(&config_text)?;

    Ok(Workspace {
        tree_dir,
        config,
    })
}
