use std::fmt;
use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use tempfile::NamedTempFile;

/// Past this size the oldest entries are dropped before the next append.
const MAX_LOG_SIZE: u64 = 1024 * 1024;

/// Written at the top of a new recovery log.
const FILE_HEADER: &str = "\
<!-- ht recovery log: moves that did not complete cleanly.
     Each entry keeps the drop payload so the move can be replayed.
     View with: ht recovery
     Safe to delete once reviewed. -->

---
";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryCategory {
    /// The backend refused or failed to persist the move
    Move,
    /// The move was persisted but re-reading the affected nodes failed
    Refresh,
}

impl fmt::Display for RecoveryCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecoveryCategory::Move => write!(f, "move"),
            RecoveryCategory::Refresh => write!(f, "refresh"),
        }
    }
}

impl RecoveryCategory {
    pub fn parse_category(s: &str) -> Option<Self> {
        match s {
            "move" => Some(RecoveryCategory::Move),
            "refresh" => Some(RecoveryCategory::Refresh),
            _ => None,
        }
    }
}

/// A single entry in the recovery log.
#[derive(Debug, Clone, PartialEq)]
pub struct RecoveryEntry {
    pub timestamp: DateTime<Utc>,
    pub category: RecoveryCategory,
    pub description: String,
    pub fields: Vec<(String, String)>,
    pub body: String,
}

pub fn recovery_log_path(tree_dir: &Path) -> PathBuf {
    tree_dir.join(".recovery.log")
}

/// Write `content` to `path` atomically using a temp file + rename.
pub fn atomic_write(path: &Path, content: &[u8]) -> io::Result<()> {
    let dir = path.parent().unwrap_or(Path::new("."));
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(content)?;
    tmp.flush()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

impl RecoveryEntry {
    fn to_markdown(&self) -> String {
        let mut out = format!(
            "## {} {}: {}\n\n",
            self.timestamp
                .to_rfc3339_opts(chrono::SecondsFormat::Secs, true),
            self.category,
            self.description,
        );

        for (key, value) in &self.fields {
            out.push_str(&format!("{}: {}\n", key, value));
        }

        if !self.body.is_empty() {
            out.push_str("\n```json\n");
            out.push_str(&self.body);
            if !self.body.ends_with('\n') {
                out.push('\n');
            }
            out.push_str("```\n");
        }

        out.push_str("\n---\n");
        out
    }
}

/// Append an entry to the log. Failures only produce a warning.
pub fn log_recovery(tree_dir: &Path, entry: RecoveryEntry) {
    if let Err(e) = log_recovery_inner(tree_dir, &entry, MAX_LOG_SIZE) {
        tracing::warn!(error = %e, "could not write to recovery log");
    }
}

fn log_recovery_inner(tree_dir: &Path, entry: &RecoveryEntry, max_size: u64) -> io::Result<()> {
    let path = recovery_log_path(tree_dir);
    let size = std::fs::metadata(&path).map_or(0, |m| m.len());
    if size > max_size {
        let content = std::fs::read_to_string(&path)?;
        let trimmed = trim_oldest(&content, max_size as usize / 2);
        tracing::info!(from = size, to = trimmed.len(), "trimmed recovery log");
        atomic_write(&path, trimmed.as_bytes())?;
    }
    let needs_header = std::fs::metadata(&path).map_or(true, |m| m.len() == 0);

    let mut file = OpenOptions::new().create(true).append(true).open(&path)?;
    if needs_header {
        file.write_all(FILE_HEADER.as_bytes())?;
    }
    file.write_all(entry.to_markdown().as_bytes())?;
    Ok(())
}

/// Keep the newest entries that fit in `budget` bytes, under a fresh
/// header. An entry starts at a `## ` line.
fn trim_oldest(content: &str, budget: usize) -> String {
    let keep_from = content
        .match_indices("## ")
        .map(|(i, _)| i)
        .filter(|&i| i == 0 || content.as_bytes()[i - 1] == b'\n')
        .find(|&i| content.len() - i <= budget)
        .unwrap_or(content.len());
    format!("{}{}", FILE_HEADER, &content[keep_from..])
}

/// Read entries from the log, most recent first.
pub fn read_recovery_entries(tree_dir: &Path, limit: Option<usize>) -> Vec<RecoveryEntry> {
    let Ok(content) = std::fs::read_to_string(recovery_log_path(tree_dir)) else {
        return Vec::new();
    };

    let mut entries = parse_entries(&content);
    if let Some(n) = limit {
        let skip = entries.len().saturating_sub(n);
        entries = entries.split_off(skip);
    }
    entries.reverse();
    entries
}

fn parse_entries(content: &str) -> Vec<RecoveryEntry> {
    let mut entries = Vec::new();
    let mut lines = content.lines();

    while let Some(line) = lines.next() {
        let Some(mut entry) = line.strip_prefix("## ").and_then(parse_entry_header) else {
            continue;
        };

        let mut in_code_block = false;
        for line in lines.by_ref() {
            if in_code_block {
                if line == "```" {
                    in_code_block = false;
                } else {
                    if !entry.body.is_empty() {
                        entry.body.push('\n');
                    }
                    entry.body.push_str(line);
                }
            } else if line == "---" {
                break;
            } else if line.starts_with("```") {
                in_code_block = true;
            } else if let Some((key, value)) = line.split_once(": ") {
                entry.fields.push((key.to_string(), value.to_string()));
            }
        }
        entries.push(entry);
    }

    entries
}

/// Parse `<timestamp> <category>: <description>`
fn parse_entry_header(header: &str) -> Option<RecoveryEntry> {
    let (timestamp, rest) = header.split_once(' ')?;
    let (category, description) = rest.split_once(": ")?;
    Some(RecoveryEntry {
        timestamp: DateTime::parse_from_rfc3339(timestamp)
            .ok()?
            .with_timezone(&Utc),
        category: RecoveryCategory::parse_category(category)?,
        description: description.to_string(),
        fields: Vec::new(),
        body: String::new(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn entry(minute: u32, category: RecoveryCategory) -> RecoveryEntry {
        RecoveryEntry {
            timestamp: Utc.with_ymd_and_hms(2026, 3, 1, 12, minute, 0).unwrap(),
            category,
            description: format!("move of 5 at minute {}", minute),
            fields: vec![
                ("Node".to_string(), "5".to_string()),
                ("To".to_string(), "2".to_string()),
            ],
            body: "{\n  \"item_moved\": {\"id\": 5}\n}".to_string(),
        }
    }

    #[test]
    fn atomic_write_replaces_content() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("records.json");
        atomic_write(&path, b"[1]").unwrap();
        atomic_write(&path, b"[2]").unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "[2]");
    }

    #[test]
    fn logged_entries_read_back_newest_first() {
        let tmp = TempDir::new().unwrap();
        log_recovery(tmp.path(), entry(1, RecoveryCategory::Move));
        log_recovery(tmp.path(), entry(2, RecoveryCategory::Refresh));

        let content = std::fs::read_to_string(recovery_log_path(tmp.path())).unwrap();
        assert!(content.starts_with("<!-- ht recovery log"));

        let entries = read_recovery_entries(tmp.path(), None);
        assert_eq!(
            entries,
            vec![entry(2, RecoveryCategory::Refresh), entry(1, RecoveryCategory::Move)]
        );
    }

    #[test]
    fn limit_keeps_most_recent() {
        let tmp = TempDir::new().unwrap();
        for minute in 0..4 {
            log_recovery(tmp.path(), entry(minute, RecoveryCategory::Move));
        }
        let entries = read_recovery_entries(tmp.path(), Some(2));
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0], entry(3, RecoveryCategory::Move));
        assert_eq!(entries[1], entry(2, RecoveryCategory::Move));
    }

    #[test]
    fn oversized_log_drops_oldest_entries() {
        let tmp = TempDir::new().unwrap();
        let entry_size = entry(0, RecoveryCategory::Move).to_markdown().len() as u64;
        let cap = FILE_HEADER.len() as u64 + 4 * entry_size;
        for minute in 0..10 {
            log_recovery_inner(tmp.path(), &entry(minute, RecoveryCategory::Move), cap).unwrap();
        }

        let content = std::fs::read_to_string(recovery_log_path(tmp.path())).unwrap();
        assert!(content.starts_with(FILE_HEADER));
        assert!(content.len() as u64 <= cap + entry_size);

        let entries = read_recovery_entries(tmp.path(), None);
        assert!(entries.len() < 10);
        assert_eq!(entries[0], entry(9, RecoveryCategory::Move));
        let minutes: Vec<String> = entries.iter().map(|e| e.description.clone()).collect();
        assert!(!minutes.contains(&entry(0, RecoveryCategory::Move).description));
    }

    #[test]
    fn trim_cuts_at_entry_boundaries() {
        let mut content = FILE_HEADER.to_string();
        for minute in 0..3 {
            content.push_str(&entry(minute, RecoveryCategory::Move).to_markdown());
        }
        let last = entry(2, RecoveryCategory::Move).to_markdown();
        let trimmed = trim_oldest(&content, last.len() + 1);
        assert_eq!(trimmed, format!("{}{}", FILE_HEADER, last));
        assert_eq!(parse_entries(&trimmed), vec![entry(2, RecoveryCategory::Move)]);
    }

    #[test]
    fn missing_log_reads_empty() {
        let tmp = TempDir::new().unwrap();
        assert!(read_recovery_entries(tmp.path(), None).is_empty());
    }

    #[test]
    fn header_with_unknown_category_is_skipped() {
        let content = "## 2026-03-01T12:00:00Z parser: old entry\n\n---\n";
        assert!(parse_entries(content).is_empty());
    }
}
