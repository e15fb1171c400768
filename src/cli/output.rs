use serde::Serialize;
use serde_json::Value;
use unicode_width::UnicodeWidthStr;

use crate::io::recovery::RecoveryEntry;
use crate::model::node::TreeNode;
use crate::model::record::NodeId;
use crate::ops::{DropOutcome, OpenOutcome, OpenRequest};

// ---------------------------------------------------------------------------
// JSON output structs
// ---------------------------------------------------------------------------

#[derive(Serialize)]
pub struct NodeJson {
    pub id: NodeId,
    pub name: String,
    pub depth: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<NodeId>,
    pub expandable: bool,
    pub expanded: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub count: Option<Value>,
}

#[derive(Serialize)]
pub struct TreeJson {
    pub model: String,
    pub nodes: Vec<NodeJson>,
}

#[derive(Serialize)]
pub struct MoveJson {
    pub outcome: &'static str,
    pub node: NodeId,
    pub parent: NodeId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub old_parent: Option<NodeId>,
}

#[derive(Serialize)]
pub struct OpenJson {
    pub outcome: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request: Option<OpenRequest>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub found: Option<usize>,
}

#[derive(Serialize)]
pub struct RecoveryEntryJson {
    pub timestamp: String,
    pub category: String,
    pub description: String,
    pub fields: Vec<(String, String)>,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub body: String,
}

// ---------------------------------------------------------------------------
// Conversions
// ---------------------------------------------------------------------------

/// The configured count column of a node, if it holds something printable.
fn count_value<'a>(node: &'a TreeNode, count_field: &str) -> Option<&'a Value> {
    if count_field.is_empty() {
        return None;
    }
    node.fields
        .get(count_field)
        .filter(|v| v.is_number() || v.is_string() || v.is_boolean())
}

pub fn tree_to_json(model: &str, rows: &[(usize, &TreeNode)], count_field: &str) -> TreeJson {
    TreeJson {
        model: model.to_string(),
        nodes: rows
            .iter()
            .map(|(depth, node)| NodeJson {
                id: node.id,
                name: node.name.clone(),
                depth: *depth,
                parent_id: node.parent_id,
                expandable: node.is_expandable(),
                expanded: node.is_expanded,
                count: count_value(node, count_field).cloned(),
            })
            .collect(),
    }
}

pub fn move_to_json(outcome: &DropOutcome, node: NodeId, parent: NodeId) -> MoveJson {
    let (label, old_parent) = match outcome {
        DropOutcome::Moved { old_parent, .. } => ("moved", *old_parent),
        DropOutcome::NoOpMove => ("no_op", None),
        DropOutcome::CyclicMoveRejected => ("cyclic", None),
        DropOutcome::DragDropDisabled => ("disabled", None),
    };
    MoveJson {
        outcome: label,
        node,
        parent,
        old_parent,
    }
}

pub fn open_to_json(outcome: &OpenOutcome) -> OpenJson {
    match outcome {
        OpenOutcome::Navigated(request) => OpenJson {
            outcome: "navigated",
            request: Some(request.clone()),
            found: None,
        },
        OpenOutcome::FormButtonHidden => OpenJson {
            outcome: "form_button_hidden",
            request: None,
            found: None,
        },
        OpenOutcome::NoUniqueFormView { found } => OpenJson {
            outcome: "no_unique_form_view",
            request: None,
            found: Some(*found),
        },
    }
}

pub fn recovery_to_json(entry: &RecoveryEntry) -> RecoveryEntryJson {
    RecoveryEntryJson {
        timestamp: entry
            .timestamp
            .to_rfc3339_opts(chrono::SecondsFormat::Secs, true),
        category: entry.category.to_string(),
        description: entry.description.clone(),
        fields: entry.fields.clone(),
        body: entry.body.clone(),
    }
}

// ---------------------------------------------------------------------------
// Human-readable formatting
// ---------------------------------------------------------------------------

fn marker(node: &TreeNode) -> char {
    if node.is_expanded && !node.children.ids().is_empty() {
        '▾'
    } else if node.is_expandable() {
        '▸'
    } else {
        '·'
    }
}

fn format_count(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// One line per visible row, indented by depth. Counts line up in a
/// column after the widest label.
pub fn format_tree(rows: &[(usize, &TreeNode)], count_field: &str) -> Vec<String> {
    let labels: Vec<String> = rows
        .iter()
        .map(|(depth, node)| {
            format!(
                "{}{} {} [{}]",
                "  ".repeat(*depth),
                marker(node),
                node.name,
                node.id
            )
        })
        .collect();
    let column = labels.iter().map(|l| l.width()).max().unwrap_or(0) + 2;

    labels
        .into_iter()
        .zip(rows)
        .map(|(label, (_, node))| match count_value(node, count_field) {
            Some(value) => {
                let pad = column - label.width();
                format!("{}{}({})", label, " ".repeat(pad), format_count(value))
            }
            None => label,
        })
        .collect()
}

pub fn format_move(outcome: &DropOutcome, node: NodeId, parent: NodeId) -> String {
    match outcome {
        DropOutcome::Moved {
            old_parent: Some(old),
            ..
        } => format!("moved {} from {} to {}", node, old, parent),
        DropOutcome::Moved { .. } => format!("moved {} to {}", node, parent),
        DropOutcome::NoOpMove => format!("{} is already under {}; nothing to do", node, parent),
        DropOutcome::CyclicMoveRejected => {
            format!("cannot move {} into its own subtree ({})", node, parent)
        }
        DropOutcome::DragDropDisabled => "moving nodes is disabled for this view".to_string(),
    }
}

pub fn format_open(outcome: &OpenOutcome) -> String {
    match outcome {
        OpenOutcome::Navigated(request) => {
            format!("{} {} via {}", request.model, request.res_id, request.view_id)
        }
        OpenOutcome::FormButtonHidden => "opening records is disabled for this view".to_string(),
        OpenOutcome::NoUniqueFormView { found } => format!(
            "could not find a suitable form view for this model ({} configured)",
            found
        ),
    }
}

pub fn format_recovery_entry(entry: &RecoveryEntry) -> Vec<String> {
    let mut lines = vec![format!(
        "{} {}: {}",
        entry
            .timestamp
            .to_rfc3339_opts(chrono::SecondsFormat::Secs, true),
        entry.category,
        entry.description
    )];
    for (key, value) in &entry.fields {
        lines.push(format!("  {}: {}", key, value));
    }
    lines
}
