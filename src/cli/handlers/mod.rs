mod init;
pub use init::cmd_init;

use std::path::Path;

use chrono::Utc;
use tracing::{debug, warn};

use crate::cli::commands::*;
use crate::cli::output::*;
use crate::io::config_io;
use crate::io::lock::TreeLock;
use crate::io::recovery::{self, RecoveryCategory, RecoveryEntry};
use crate::io::state::{self, UiState};
use crate::io::workspace_io::{self, Workspace};
use crate::model::record::NodeId;
use crate::ops::{
    Controller, DropEvent, Navigator, OpenOutcome, OpenRequest, TreeError, TreeStore, ViewRefresh,
};
use crate::source::{JsonFileSource, RecordTable};

type CmdResult = Result<(), Box<dyn std::error::Error>>;

// ---------------------------------------------------------------------------
// Dispatch
// ---------------------------------------------------------------------------

pub fn dispatch(cli: Cli) -> CmdResult {
    let json = cli.json;

    let start = match cli.workspace_dir {
        Some(ref dir) => std::fs::canonicalize(dir)
            .map_err(|e| format!("cannot resolve -C path '{}': {}", dir, e))?,
        None => std::env::current_dir()?,
    };

    match cli.command {
        Commands::Init(args) => cmd_init(args, &start),
        Commands::Show(args) => cmd_show(args, &start, json),
        Commands::Toggle(args) => cmd_toggle(args, &start, json),
        Commands::Mv(args) => cmd_mv(args, &start, json),
        Commands::Open(args) => cmd_open(args, &start, json),
        Commands::Config(args) => cmd_config(args, &start, json),
        Commands::Recovery(args) => cmd_recovery(args, &start, json),
    }
}

// ---------------------------------------------------------------------------
// View and navigation for a one-shot process
// ---------------------------------------------------------------------------

/// Counts redraw requests; the command prints the tree once at the end if
/// any were made.
#[derive(Default)]
pub struct CliView {
    requests: usize,
}

impl ViewRefresh for CliView {
    fn request_update(&mut self, partial: bool) {
        debug!(partial, "redraw requested");
        self.requests += 1;
    }
}

/// Prints the navigation target instead of switching views.
pub struct CliNavigator {
    json: bool,
}

impl Navigator for CliNavigator {
    fn navigate(&mut self, request: &OpenRequest) {
        if let Err(e) = print_open(&OpenOutcome::Navigated(request.clone()), self.json) {
            warn!(error = %e, "could not print open request");
        }
    }
}

type CliController = Controller<JsonFileSource, CliView, CliNavigator>;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn load_workspace_from(start: &Path) -> Result<Workspace, workspace_io::WorkspaceError> {
    let root = workspace_io::discover_workspace(start)?;
    workspace_io::load_workspace(&root)
}

/// Open the view and re-expand whatever was expanded last time.
fn open_session(workspace: &Workspace, json: bool) -> Result<CliController, Box<dyn std::error::Error>> {
    let store = TreeStore::new(workspace.open_source()?, workspace.root_filter());
    let mut controller = Controller::new(
        store,
        CliView::default(),
        CliNavigator { json },
        workspace.config.clone(),
    );
    controller.open_view()?;

    if let Some(saved) = state::read_ui_state(&workspace.tree_dir) {
        let restored = controller.store_mut().restore_expanded(&saved.expanded)?;
        debug!(restored, saved = saved.expanded.len(), "restored expanded nodes");
    }
    Ok(controller)
}

fn save_state(workspace: &Workspace, controller: &CliController) -> Result<(), std::io::Error> {
    let ui_state = UiState {
        expanded: controller.store().expanded_ids(),
    };
    state::write_ui_state(&workspace.tree_dir, &ui_state)
}

fn print_tree(controller: &CliController, json: bool) -> Result<(), serde_json::Error> {
    let options = controller.options();
    let rows = controller.store().visible();
    if json {
        let tree = tree_to_json(&options.model, &rows, &options.count_field);
        println!("{}", serde_json::to_string_pretty(&tree)?);
    } else if rows.is_empty() {
        println!("(no records)");
    } else {
        for line in format_tree(&rows, &options.count_field) {
            println!("{}", line);
        }
    }
    Ok(())
}

fn print_open(outcome: &OpenOutcome, json: bool) -> Result<(), serde_json::Error> {
    if json {
        println!("{}", serde_json::to_string_pretty(&open_to_json(outcome))?);
    } else {
        println!("{}", format_open(outcome));
    }
    Ok(())
}

/// Record a move that failed after reaching the data source.
fn log_failed_move(
    workspace: &Workspace,
    controller: &CliController,
    event: &DropEvent,
    error: &dyn std::error::Error,
) {
    let entry = failed_move_entry(controller.store().source().table(), event, error);
    recovery::log_recovery(&workspace.tree_dir, entry);
}

/// A failed move is a `refresh` problem if the source already holds the
/// new parent, and a `move` problem otherwise.
fn failed_move_category(table: &RecordTable, event: &DropEvent) -> RecoveryCategory {
    let persisted = table
        .get(event.item_moved.id)
        .is_some_and(|r| r.parent_id == Some(event.new_parent.id));
    if persisted {
        RecoveryCategory::Refresh
    } else {
        RecoveryCategory::Move
    }
}

fn failed_move_entry(
    table: &RecordTable,
    event: &DropEvent,
    error: &dyn std::error::Error,
) -> RecoveryEntry {
    let node = event.item_moved.id;
    let target = event.new_parent.id;
    let category = failed_move_category(table, event);
    let description = match category {
        RecoveryCategory::Refresh => {
            format!("{} moved under {} but the view could not be refreshed", node, target)
        }
        RecoveryCategory::Move => format!("{} could not be moved under {}", node, target),
    };

    let from = event
        .item_moved
        .parent_id
        .map_or_else(|| "root".to_string(), |p| p.to_string());
    RecoveryEntry {
        timestamp: Utc::now(),
        category,
        description,
        fields: vec![
            ("Node".to_string(), node.to_string()),
            ("From".to_string(), from),
            ("To".to_string(), target.to_string()),
            ("Error".to_string(), error.to_string()),
        ],
        body: event.encode().unwrap_or_default(),
    }
}

// ---------------------------------------------------------------------------
// Read commands
// ---------------------------------------------------------------------------

fn cmd_show(args: ShowArgs, start: &Path, json: bool) -> CmdResult {
    let workspace = load_workspace_from(start)?;
    let _lock = TreeLock::acquire_default(&workspace.tree_dir, "show")?;
    let mut controller = open_session(&workspace, json)?;

    for id in args.expand {
        let store = controller.store_mut();
        store.reveal(id)?;
        store.expand_children_of(id)?;
    }

    save_state(&workspace, &controller)?;
    print_tree(&controller, json)?;
    Ok(())
}

fn cmd_open(args: OpenArgs, start: &Path, json: bool) -> CmdResult {
    let workspace = load_workspace_from(start)?;
    let source = workspace.open_source()?;
    if source.table().get(args.id).is_none() {
        return Err(format!("node not found: {}", args.id).into());
    }

    let store = TreeStore::new(source, workspace.root_filter());
    let mut controller = Controller::new(
        store,
        CliView::default(),
        CliNavigator { json },
        workspace.config.clone(),
    );
    let outcome = controller.open_record(args.id);
    // a successful open was already printed by the navigator
    if !matches!(outcome, OpenOutcome::Navigated(_)) {
        print_open(&outcome, json)?;
    }
    Ok(())
}

fn cmd_config(args: ConfigArgs, start: &Path, json: bool) -> CmdResult {
    let workspace = load_workspace_from(start)?;

    if let (Some(key), Some(value)) = (args.key, args.value) {
        let _lock = TreeLock::acquire_default(&workspace.tree_dir, "config")?;
        let (_, mut doc) = config_io::read_config(&workspace.tree_dir)?;
        config_io::set_view_option(&mut doc, &key, &value)?;
        config_io::write_config(&workspace.tree_dir, &doc)?;
        println!("{} = {}", key, value);
        return Ok(());
    }

    let pairs = config_io::view_option_pairs(&workspace.config);
    if json {
        let map: serde_json::Map<String, serde_json::Value> = pairs
            .into_iter()
            .map(|(k, v)| (k.to_string(), serde_json::Value::String(v)))
            .collect();
        println!("{}", serde_json::to_string_pretty(&map)?);
    } else {
        for (key, value) in pairs {
            println!("{} = {}", key, value);
        }
    }
    Ok(())
}

fn cmd_recovery(args: RecoveryArgs, start: &Path, json: bool) -> CmdResult {
    let workspace = load_workspace_from(start)?;
    let entries = recovery::read_recovery_entries(&workspace.tree_dir, args.limit);

    if json {
        let out: Vec<RecoveryEntryJson> = entries.iter().map(recovery_to_json).collect();
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }
    if entries.is_empty() {
        println!("no recovery entries");
        return Ok(());
    }
    for (i, entry) in entries.iter().enumerate() {
        if i > 0 {
            println!();
        }
        for line in format_recovery_entry(entry) {
            println!("{}", line);
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Write commands
// ---------------------------------------------------------------------------

fn cmd_toggle(args: ToggleArgs, start: &Path, json: bool) -> CmdResult {
    let workspace = load_workspace_from(start)?;
    let _lock = TreeLock::acquire_default(&workspace.tree_dir, "toggle")?;
    let mut controller = open_session(&workspace, json)?;
    let before = controller.view().requests;

    controller.store_mut().reveal(args.id)?;
    controller.node_activated(args.id)?;

    save_state(&workspace, &controller)?;
    if controller.view().requests > before {
        print_tree(&controller, json)?;
    }
    Ok(())
}

fn cmd_mv(args: MvArgs, start: &Path, json: bool) -> CmdResult {
    let workspace = load_workspace_from(start)?;
    let _lock = TreeLock::acquire_default(&workspace.tree_dir, "mv")?;
    let mut controller = open_session(&workspace, json)?;
    let before = controller.view().requests;

    let event = drop_event(&mut controller, args.id, args.parent)?;
    let outcome = match controller.node_dropped(&event) {
        Ok(outcome) => outcome,
        Err(e) => {
            log_failed_move(&workspace, &controller, &event, &e);
            return Err(e.into());
        }
    };

    save_state(&workspace, &controller)?;
    if json {
        let out = move_to_json(&outcome, args.id, args.parent);
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    println!("{}", format_move(&outcome, args.id, args.parent));
    if controller.view().requests > before {
        print_tree(&controller, false)?;
    }
    Ok(())
}

/// Build the payload a drag of `id` onto `parent` would carry, loading
/// both nodes first.
fn drop_event(
    controller: &mut CliController,
    id: NodeId,
    parent: NodeId,
) -> Result<DropEvent, TreeError> {
    let store = controller.store_mut();
    let item_moved = store.reveal(id)?.to_record();
    let new_parent = store.reveal(parent)?.to_record();
    Ok(DropEvent {
        item_moved,
        new_parent,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::DataSource;
    use crate::source::testing::rec;
    use pretty_assertions::assert_eq;
    use std::fs;
    use tempfile::TempDir;

    fn warehouse_table() -> RecordTable {
        RecordTable::from_records(vec![
            rec(1, None, "Warehouse"),
            rec(2, Some(1), "Stock"),
            rec(3, Some(1), "Output"),
            rec(5, Some(3), "Dock"),
        ])
        .unwrap()
    }

    fn event_for(table: &mut RecordTable, node: u64, parent: u64) -> DropEvent {
        DropEvent {
            item_moved: table.fetch_one(NodeId(node)).unwrap(),
            new_parent: table.fetch_one(NodeId(parent)).unwrap(),
        }
    }

    #[test]
    fn refused_move_is_a_move_entry() {
        let mut table = warehouse_table();
        let event = event_for(&mut table, 5, 2);
        let err = std::io::Error::other("disk full");

        let entry = failed_move_entry(&table, &event, &err);
        assert_eq!(entry.category, RecoveryCategory::Move);
        assert_eq!(entry.description, "5 could not be moved under 2");
        assert_eq!(
            entry.fields,
            vec![
                ("Node".to_string(), "5".to_string()),
                ("From".to_string(), "3".to_string()),
                ("To".to_string(), "2".to_string()),
                ("Error".to_string(), "disk full".to_string()),
            ]
        );
        assert_eq!(DropEvent::decode(&entry.body).unwrap(), event);
    }

    #[test]
    fn persisted_move_is_a_refresh_entry() {
        let mut table = warehouse_table();
        let event = event_for(&mut table, 5, 2);
        table.persist_reparent(NodeId(5), NodeId(2)).unwrap();
        let err = std::io::Error::other("record 3 does not exist");

        let entry = failed_move_entry(&table, &event, &err);
        assert_eq!(entry.category, RecoveryCategory::Refresh);
        assert_eq!(
            entry.description,
            "5 moved under 2 but the view could not be refreshed"
        );
    }

    #[test]
    fn failed_persist_is_appended_to_recovery_log() {
        let tmp = TempDir::new().unwrap();
        let tree_dir = tmp.path().join("tree");
        fs::create_dir_all(&tree_dir).unwrap();
        fs::write(
            tree_dir.join("view.toml"),
            "[view]\nmodel = \"stock.location\"\n",
        )
        .unwrap();
        fs::write(
            tree_dir.join("records.json"),
            r#"[
  {"id": 1, "name": "Warehouse"},
  {"id": 2, "parent_id": 1, "name": "Stock"},
  {"id": 3, "parent_id": 1, "name": "Output"}
]"#,
        )
        .unwrap();

        let workspace = load_workspace_from(tmp.path()).unwrap();
        let mut controller = open_session(&workspace, false).unwrap();
        controller.store_mut().expand_children_of(NodeId(1)).unwrap();
        let event = drop_event(&mut controller, NodeId(2), NodeId(3)).unwrap();

        // another writer puts 3 under 2 behind this session's back
        controller
            .store_mut()
            .source_mut()
            .persist_reparent(NodeId(3), NodeId(2))
            .unwrap();

        let err = controller.node_dropped(&event).unwrap_err();
        log_failed_move(&workspace, &controller, &event, &err);

        let entries = recovery::read_recovery_entries(&tree_dir, None);
        assert_eq!(entries.len(), 1);
        let entry = &entries[0];
        assert_eq!(entry.category, RecoveryCategory::Move);
        assert_eq!(entry.description, "2 could not be moved under 3");
        assert_eq!(entry.fields[0], ("Node".to_string(), "2".to_string()));
        assert_eq!(entry.fields[1], ("From".to_string(), "1".to_string()));
        assert_eq!(entry.fields[2], ("To".to_string(), "3".to_string()));
        assert_eq!(entry.fields[3], ("Error".to_string(), err.to_string()));
        assert_eq!(DropEvent::decode(&entry.body).unwrap(), event);
    }
}
