use clap::{Args, Parser, Subcommand};

use crate::model::record::NodeId;

#[derive(Parser)]
#[command(name = "ht", about = concat!("ht v", env!("CARGO_PKG_VERSION"), " - browse and rearrange a record hierarchy"), version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Output as JSON
    #[arg(long, global = true)]
    pub json: bool,

    /// Run against a different workspace directory
    #[arg(short = 'C', long = "workspace-dir", global = true)]
    pub workspace_dir: Option<String>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Create tree/ with a template view config and an empty record file
    Init(InitArgs),
    /// Show the tree as it was last left, plus any extra expansions
    Show(ShowArgs),
    /// Expand or collapse a node
    Toggle(ToggleArgs),
    /// Move a node under a new parent
    Mv(MvArgs),
    /// Open a record in the configured form view
    Open(OpenArgs),
    /// Show the view options, or set one
    Config(ConfigArgs),
    /// List moves that did not complete cleanly
    Recovery(RecoveryArgs),
}

#[derive(Args)]
pub struct InitArgs {
    /// Model name written to the view config
    #[arg(long, default_value = "stock.location")]
    pub model: String,
    /// Overwrite an existing tree/view.toml (records are kept)
    #[arg(long)]
    pub force: bool,
}

#[derive(Args)]
pub struct ShowArgs {
    /// Also expand this node (repeatable)
    #[arg(long = "expand", value_name = "ID")]
    pub expand: Vec<NodeId>,
}

#[derive(Args)]
pub struct ToggleArgs {
    pub id: NodeId,
}

#[derive(Args)]
pub struct MvArgs {
    /// Node to move
    pub id: NodeId,
    /// New parent
    pub parent: NodeId,
}

#[derive(Args)]
pub struct OpenArgs {
    pub id: NodeId,
}

#[derive(Args)]
pub struct ConfigArgs {
    /// Option to set (model, count_field, disable_drag_drop, start_unfolded, show_form_button)
    #[arg(requires = "value")]
    pub key: Option<String>,
    pub value: Option<String>,
}

#[derive(Args)]
pub struct RecoveryArgs {
    /// Show at most this many entries
    #[arg(long)]
    pub limit: Option<usize>,
}
