//! Materialized-path helpers.
//!
//! A path lists ancestor ids root first, each terminated by
//! [`PATH_SEPARATOR`]: node 9 under 4 under 1 stores `"1/4/"`. Because
//! every id is terminated, a prefix test on whole paths never confuses
//! `1/` with `11/`.

use std::num::ParseIntError;

use crate::model::record::NodeId;

pub const PATH_SEPARATOR: char = '/';

/// Path stored by a child of the node `id` whose own path is `parent_path`.
pub fn child_path(parent_path: &str, id: NodeId) -> String {
    format!("{}{}{}", parent_path, id, PATH_SEPARATOR)
}

/// Replace `old_prefix` at the start of `path` with `new_prefix`.
/// Returns `None` when `path` does not start with `old_prefix`.
pub fn rebase(path: &str, old_prefix: &str, new_prefix: &str) -> Option<String> {
    let rest = path.strip_prefix(old_prefix)?;
    Some(format!("{}{}", new_prefix, rest))
}

/// The ancestor ids encoded in a path, root first.
pub fn ancestor_ids(path: &str) -> Result<Vec<NodeId>, ParseIntError> {
    path.split(PATH_SEPARATOR)
        .filter(|seg| !seg.is_empty())
        .map(|seg| seg.parse::<NodeId>())
        .collect()
}
