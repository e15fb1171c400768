use std::fs;
use std::path::Path;

use crate::io::recovery::atomic_write;
use crate::io::workspace_io::{CONFIG_FILE, WorkspaceError};
use crate::model::config::TreeConfig;

/// `[view]` keys that hold booleans
const BOOL_OPTIONS: &[&str] = &["disable_drag_drop", "start_unfolded", "show_form_button"];
/// `[view]` keys that hold strings
const STRING_OPTIONS: &[&str] = &["model", "count_field"];

/// Read the view config, returning both the parsed config and the raw
/// toml_edit Document for round-trip-safe editing.
pub fn read_config(tree_dir: &Path) -> Result<(TreeConfig, toml_edit::DocumentMut), WorkspaceError> {
    let config_path = tree_dir.join(CONFIG_FILE);
    let config_text = fs::read_to_string(&config_path).map_err(|e| WorkspaceError::ReadError {
        path: config_path.clone(),
        source: e,
    })?;
    let config: TreeConfig = toml::from_str(&config_text)?;
    let doc: toml_edit::DocumentMut = config_text.parse()?;
    Ok((config, doc))
}

/// Write the config document back to disk, preserving formatting.
pub fn write_config(tree_dir: &Path, doc: &toml_edit::DocumentMut) -> Result<(), WorkspaceError> {
    let config_path = tree_dir.join(CONFIG_FILE);
    atomic_write(&config_path, doc.to_string().as_bytes()).map_err(|e| {
        WorkspaceError::WriteError {
            path: config_path,
            source: e,
        }
    })
}

/// Set one `[view]` option in the config document
pub fn set_view_option(
    doc: &mut toml_edit::DocumentMut,
    key: &str,
    value: &str,
) -> Result<(), WorkspaceError> {
    let item = if BOOL_OPTIONS.contains(&key) {
        let flag = match value {
            "true" => true,
            "false" => false,
            _ => {
                return Err(WorkspaceError::InvalidOptionValue {
                    key: key.to_string(),
                    value: value.to_string(),
                });
            }
        };
        toml_edit::value(flag)
    } else if STRING_OPTIONS.contains(&key) {
        toml_edit::value(value)
    } else {
        return Err(WorkspaceError::UnknownOption(key.to_string()));
    };

    if !doc.contains_key("view") {
        doc["view"] = toml_edit::Item::Table(toml_edit::Table::new());
    }
    doc["view"][key] = item;
    Ok(())
}

/// Every `[view]` option as `(key, value)` text pairs, in a fixed order
pub fn view_option_pairs(config: &TreeConfig) -> Vec<(&'static str, String)> {
    let view = &config.view;
    vec![
        ("model", view.model.clone()),
        ("count_field", view.count_field.clone()),
        ("disable_drag_drop", view.disable_drag_drop.to_string()),
        ("start_unfolded", view.start_unfolded.to_string()),
        ("show_form_button", view.show_form_button.to_string()),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sample_config() -> &'static str {
        r#"# location hierarchy
[view]
model = "stock.location"
count_field = "product_count"   # shown next to the name

[[views]]
id = "stock.location.form"
kind = "form"
"#
    }

    #[test]
    fn round_trip_config() {
        let tmp = TempDir::new().unwrap();
        let config_path = tmp.path().join(CONFIG_FILE);
        fs::write(&config_path, sample_config()).unwrap();

        let (config, doc) = read_config(tmp.path()).unwrap();
        assert_eq!(config.views.len(), 1);
        write_config(tmp.path(), &doc).unwrap();

        let written = fs::read_to_string(&config_path).unwrap();
        assert_eq!(written, sample_config());
    }

    #[test]
    fn failed_write_is_reported_as_write() {
        let tmp = TempDir::new().unwrap();
        let doc: toml_edit::DocumentMut = sample_config().parse().unwrap();
        let missing = tmp.path().join("gone");
        let err = write_config(&missing, &doc).unwrap_err();
        assert!(matches!(&err, WorkspaceError::WriteError { path, .. } if path.ends_with(CONFIG_FILE)));
        assert!(err.to_string().starts_with("could not write "));
    }

    #[test]
    fn set_bool_option_keeps_comments() {
        let mut doc: toml_edit::DocumentMut = sample_config().parse().unwrap();
        set_view_option(&mut doc, "start_unfolded", "true").unwrap();
        let result = doc.to_string();
        assert!(result.contains("start_unfolded = true"));
        assert!(result.contains("# shown next to the name"));

        let config: TreeConfig = toml::from_str(&result).unwrap();
        assert!(config.view.start_unfolded);
    }

    #[test]
    fn set_string_option() {
        let mut doc: toml_edit::DocumentMut = sample_config().parse().unwrap();
        set_view_option(&mut doc, "count_field", "quant_count").unwrap();
        let config: TreeConfig = toml::from_str(&doc.to_string()).unwrap();
        assert_eq!(config.view.count_field, "quant_count");
    }

    #[test]
    fn rejects_unknown_key_and_bad_bool() {
        let mut doc: toml_edit::DocumentMut = sample_config().parse().unwrap();
        assert!(matches!(
            set_view_option(&mut doc, "colour", "red"),
            Err(WorkspaceError::UnknownOption(_))
        ));
        assert!(matches!(
            set_view_option(&mut doc, "show_form_button", "yes"),
            Err(WorkspaceError::InvalidOptionValue { .. })
        ));
    }

    #[test]
    fn option_pairs_in_fixed_order() {
        let config: TreeConfig = toml::from_str(sample_config()).unwrap();
        let keys: Vec<&str> = view_option_pairs(&config).iter().map(|(k, _)| *k).collect();
        assert_eq!(
            keys,
            vec!["model", "count_field", "disable_drag_drop", "start_unfolded", "show_form_button"]
        );
    }
}
