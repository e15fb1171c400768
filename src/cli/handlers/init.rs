use std::fs;
use std::path::Path;

use crate::cli::commands::InitArgs;
use crate::io::workspace_io::{self, CONFIG_FILE, RECORDS_FILE, TREE_DIR};
use crate::source::JsonFileSource;

const VIEW_TOML_TEMPLATE: &str = r##"[view]
model = "{model}"
# Field shown as "(N)" after each name; empty for none
count_field = ""
disable_drag_drop = false
start_unfolded = false
show_form_button = true

# --- Detail views ---
# `ht open` needs exactly one form view.
[[views]]
id = "{model}.form"
kind = "form"

# --- Root filter ---
# Equality conditions a root record must satisfy, e.g.
# usage = "internal"
[filter]

# --- Open context ---
# Passed along with every open request.
[context]
"##;

/// Model names are dotted lowercase identifiers, e.g. `stock.location`.
fn validate_model(model: &str) -> Result<(), String> {
    let valid = !model.is_empty()
        && model
            .split('.')
            .all(|part| !part.is_empty() && part.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_'));
    if !valid {
        return Err(format!(
            "invalid model name \"{}\": use dotted lowercase words (e.g. \"stock.location\")",
            model
        ));
    }
    Ok(())
}

fn render_view_toml(model: &str) -> String {
    VIEW_TOML_TEMPLATE.replace("{model}", model)
}

pub fn cmd_init(args: InitArgs, start: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let tree_dir = start.join(TREE_DIR);
    let config_path = tree_dir.join(CONFIG_FILE);

    if config_path.exists() && !args.force {
        return Err("tree workspace already exists in ./tree/ (use --force to rewrite view.toml)".into());
    }
    validate_model(&args.model)?;

    if let Some(parent) = start.parent()
        && let Ok(parent_root) = workspace_io::discover_workspace(parent)
    {
        eprintln!("Note: enclosing workspace found at {}/", parent_root.join(TREE_DIR).display());
        eprintln!("Creating new workspace in ./tree/");
    }

    fs::create_dir_all(&tree_dir)?;
    fs::write(&config_path, render_view_toml(&args.model))?;

    let records_path = tree_dir.join(RECORDS_FILE);
    let kept = records_path.exists();
    if !kept {
        JsonFileSource::create_empty(&records_path)?;
    }

    println!("Initialized tree workspace: {}", args.model);
    if kept {
        println!("  kept existing {}", RECORDS_FILE);
    }
    Ok(())
}
