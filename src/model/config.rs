use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Configuration from view.toml
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TreeConfig {
    pub view: ViewOptions,
    /// Views records can be opened in
    #[serde(default)]
    pub views: Vec<ActionView>,
    /// Equality conditions applied when fetching the roots
    #[serde(default)]
    pub filter: BTreeMap<String, Value>,
    /// Named parameters forwarded when a record is opened
    #[serde(default)]
    pub context: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ViewOptions {
    /// Model the records belong to, e.g. `stock.location`
    pub model: String,
    /// Record column shown as `(N)` after the name. Empty shows nothing.
    #[serde(default)]
    pub count_field: String,
    #[serde(default)]
    pub disable_drag_drop: bool,
    /// Expand every node when the view opens
    #[serde(default)]
    pub start_unfolded: bool,
    #[serde(default = "default_true")]
    pub show_form_button: bool,
}

impl ViewOptions {
    pub fn new(model: impl Into<String>) -> Self {
        ViewOptions {
            model: model.into(),
            count_field: String::new(),
            disable_drag_drop: false,
            start_unfolded: false,
            show_form_button: true,
        }
    }
}

fn default_true() -> bool {
    true
}

/// A view configured for the model
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionView {
    pub id: String,
    pub kind: ViewKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ViewKind {
    Form,
    List,
    Kanban,
    Tree,
}
