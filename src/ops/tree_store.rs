use indexmap::IndexMap;
use tracing::{debug, info};

use crate::model::node::{Children, Lineage, TreeNode};
use crate::model::path::{ancestor_ids, rebase};
use crate::model::record::{NodeId, NodeRecord};
use crate::source::{DataSource, DataSourceError, RootFilter};

/// Error type for tree operations
#[derive(Debug, thiserror::Error)]
pub enum TreeError {
    #[error("data source error: {0}")]
    DataSource(#[from] DataSourceError),
    #[error("node not found: {0}")]
    NodeNotFound(NodeId),
    #[error("malformed drag payload: {0}")]
    MalformedPayload(#[from] serde_json::Error),
}

/// Result of a reparent request that did not fail
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoveOutcome {
    Moved {
        node: NodeId,
        old_parent: Option<NodeId>,
        new_parent: NodeId,
    },
    /// Target is the node itself or already its parent.
    NoOpMove,
    /// Target lies inside the moved subtree.
    CyclicMoveRejected,
}

/// In-memory view of the hierarchy, filled lazily from a [`DataSource`].
///
/// Nodes live in an arena keyed by id; structure is carried by each
/// node's `children` list and by `roots`. Nodes are only ever added by a
/// fetch and are dropped together on a root reload.
pub struct TreeStore<S> {
    source: S,
    filter: RootFilter,
    nodes: IndexMap<NodeId, TreeNode>,
    roots: Vec<NodeId>,
}

impl<S: DataSource> TreeStore<S> {
    pub fn new(source: S, filter: RootFilter) -> Self {
        TreeStore {
            source,
            filter,
            nodes: IndexMap::new(),
            roots: Vec::new(),
        }
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn source_mut(&mut self) -> &mut S {
        &mut self.source
    }

    pub fn roots(&self) -> &[NodeId] {
        &self.roots
    }

    pub fn node(&self, id: NodeId) -> Option<&TreeNode> {
        self.nodes.get(&id)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Loaded children of `id`, in source order.
    pub fn children_of(&self, id: NodeId) -> Vec<&TreeNode> {
        match self.nodes.get(&id) {
            Some(node) => self.collect(node.children.ids()),
            None => Vec::new(),
        }
    }

    fn collect(&self, ids: &[NodeId]) -> Vec<&TreeNode> {
        ids.iter().filter_map(|id| self.nodes.get(id)).collect()
    }

    // -----------------------------------------------------------------------
    // Loading
    // -----------------------------------------------------------------------

    /// Replace the whole tree with a fresh set of roots. On failure the
    /// previous tree is kept as it was.
    pub fn load_roots(&mut self) -> Result<Vec<&TreeNode>, TreeError> {
        let records = self.source.fetch_roots(&self.filter)?;
        debug!(count = records.len(), "loaded roots");

        self.nodes.clear();
        self.roots.clear();
        for record in records {
            self.roots.push(record.id);
            self.nodes.insert(record.id, TreeNode::from_record(record));
        }
        Ok(self.collect(&self.roots))
    }

    /// Expand `id`, fetching its children the first time. A node whose
    /// children are already loaded (even if empty) is only marked expanded.
    pub fn expand_children_of(&mut self, id: NodeId) -> Result<Vec<&TreeNode>, TreeError> {
        self.load_children(id)?;
        self.node_mut(id)?.is_expanded = true;
        Ok(self.children_of(id))
    }

    /// Fetch the children of `id` if they are not loaded yet. The
    /// expansion flag is left alone.
    fn load_children(&mut self, id: NodeId) -> Result<(), TreeError> {
        let node = self.nodes.get(&id).ok_or(TreeError::NodeNotFound(id))?;
        if node.children.is_loaded() {
            return Ok(());
        }

        let records = self.source.fetch_children(id)?;
        debug!(node = %id, count = records.len(), "fetched children");

        let ids: Vec<NodeId> = records.iter().map(|r| r.id).collect();
        for record in records {
            self.apply_fresh(record);
        }
        let node = self.node_mut(id)?;
        node.child_count = Some(ids.len());
        node.children = Children::Loaded(ids);
        Ok(())
    }

    /// Flip the expansion flag without touching the children.
    /// Returns the new state.
    pub fn toggle_children_visible_for_item(&mut self, id: NodeId) -> Result<bool, TreeError> {
        let node = self.node_mut(id)?;
        node.is_expanded = !node.is_expanded;
        Ok(node.is_expanded)
    }

    /// Expand every expandable node, level by level. Returns how many
    /// nodes were expanded.
    pub fn expand_all(&mut self) -> Result<usize, TreeError> {
        let mut queue: Vec<NodeId> = self.roots.clone();
        let mut expanded = 0;
        while let Some(id) = queue.pop() {
            let expandable = self.nodes.get(&id).is_some_and(|n| n.is_expandable());
            if !expandable {
                continue;
            }
            let children: Vec<NodeId> = self.expand_children_of(id)?.iter().map(|n| n.id).collect();
            expanded += 1;
            queue.extend(children.into_iter().rev());
        }
        Ok(expanded)
    }

    /// Make sure `id` is in memory by expanding every ancestor on its path,
    /// root first.
    pub fn reveal(&mut self, id: NodeId) -> Result<&TreeNode, TreeError> {
        if !self.nodes.contains_key(&id) {
            for ancestor in self.ancestors_of(id)? {
                self.expand_children_of(ancestor)?;
            }
        }
        self.nodes.get(&id).ok_or(TreeError::NodeNotFound(id))
    }

    /// Ancestor ids of `id` as the source reports them, root first.
    fn ancestors_of(&mut self, id: NodeId) -> Result<Vec<NodeId>, TreeError> {
        let record = self.source.fetch_one(id)?;
        let ancestors = ancestor_ids(&record.parent_path).map_err(|_| {
            DataSourceError::Inconsistent(format!(
                "record {} has unreadable path {:?}",
                id, record.parent_path
            ))
        })?;
        Ok(ancestors)
    }

    /// Re-read a single node from the source and replace its record data.
    ///
    /// Descendants are not re-read. If the source now reports a different
    /// number of children than the loaded list holds, the list is dropped
    /// so the next expand fetches it again.
    pub fn refresh_node(&mut self, id: NodeId) -> Result<&TreeNode, TreeError> {
        let before = self.nodes.get(&id).ok_or(TreeError::NodeNotFound(id))?.parent_id;
        let record = self.source.fetch_one(id)?;
        self.apply_fresh(record);

        let node = self.node_mut(id)?;
        let after = node.parent_id;
        if let Some(count) = node.child_count
            && node.children.is_loaded()
            && node.children.ids().len() != count
        {
            debug!(
                node = %id,
                loaded = node.children.ids().len(),
                reported = count,
                "children invalidated"
            );
            node.children = Children::Unloaded;
            node.is_expanded = false;
        }

        if before != after {
            match after {
                Some(parent) => {
                    if let Some(parent) = self.nodes.get_mut(&parent)
                        && parent.children.is_loaded()
                    {
                        parent.children = Children::Unloaded;
                        parent.is_expanded = false;
                    }
                }
                None => {
                    let shown = self
                        .nodes
                        .get(&id)
                        .is_some_and(|node| self.filter.matches(&node.to_record()));
                    if shown && !self.roots.contains(&id) {
                        self.roots.push(id);
                    } else if !shown {
                        debug!(node = %id, "new root is outside the root filter");
                    }
                }
            }
        }

        self.nodes.get(&id).ok_or(TreeError::NodeNotFound(id))
    }

    // -----------------------------------------------------------------------
    // Reparenting
    // -----------------------------------------------------------------------

    /// Move `moved` (with its subtree) under `new_parent`.
    ///
    /// Illegal moves are reported as outcomes and touch nothing. The source
    /// is written first; if it refuses, the in-memory tree is unchanged and
    /// the move is not retried.
    pub fn change_parent(
        &mut self,
        moved: NodeId,
        new_parent: NodeId,
    ) -> Result<MoveOutcome, TreeError> {
        let node = self.nodes.get(&moved).ok_or(TreeError::NodeNotFound(moved))?;
        let target = self
            .nodes
            .get(&new_parent)
            .ok_or(TreeError::NodeNotFound(new_parent))?;

        if target.is_same_or_parent_of(node) {
            debug!(node = %moved, target = %new_parent, "move is a no-op");
            return Ok(MoveOutcome::NoOpMove);
        }
        if node.is_ancestor_of(target) {
            debug!(node = %moved, target = %new_parent, "move would create a cycle");
            return Ok(MoveOutcome::CyclicMoveRejected);
        }

        let old_parent = node.parent_id;
        let old_prefix = node.own_path();
        let new_path = target.own_path();

        self.source.persist_reparent(moved, new_parent)?;

        self.detach(moved, old_parent);
        if let Some(parent) = old_parent.and_then(|p| self.nodes.get_mut(&p)) {
            parent.child_count = parent.child_count.map(|c| c.saturating_sub(1));
        }
        if let Some(target) = self.nodes.get_mut(&new_parent) {
            if let Children::Loaded(ids) = &mut target.children {
                ids.push(moved);
            }
            target.child_count = target.child_count.map(|c| c + 1);
        }

        let node = self.node_mut(moved)?;
        node.parent_id = Some(new_parent);
        node.parent_path = new_path;
        let new_prefix = node.own_path();
        let rewritten = self.rebase_descendants(moved, &old_prefix, &new_prefix);

        info!(
            node = %moved,
            from = ?old_parent,
            to = %new_parent,
            descendants = rewritten,
            "moved node"
        );
        Ok(MoveOutcome::Moved {
            node: moved,
            old_parent,
            new_parent,
        })
    }

    // -----------------------------------------------------------------------
    // Views over the tree
    // -----------------------------------------------------------------------

    /// Nodes currently on screen with their depth, in display order.
    pub fn visible(&self) -> Vec<(usize, &TreeNode)> {
        let mut out = Vec::new();
        let mut stack: Vec<(usize, NodeId)> = self.roots.iter().rev().map(|id| (0, *id)).collect();
        while let Some((depth, id)) = stack.pop() {
            let Some(node) = self.nodes.get(&id) else {
                continue;
            };
            out.push((depth, node));
            if node.is_expanded {
                stack.extend(node.children.ids().iter().rev().map(|c| (depth + 1, *c)));
            }
        }
        out
    }

    /// Every expanded node reachable through loaded children, parents
    /// before their descendants.
    pub fn expanded_ids(&self) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack: Vec<NodeId> = self.roots.iter().rev().copied().collect();
        while let Some(id) = stack.pop() {
            let Some(node) = self.nodes.get(&id) else {
                continue;
            };
            if node.is_expanded {
                out.push(id);
            }
            stack.extend(node.children.ids().iter().rev());
        }
        out
    }

    /// Re-expand nodes from a saved `expanded_ids` list.
    ///
    /// A node below a collapsed ancestor is brought into memory by loading
    /// the children along its path; those ancestors stay collapsed. Ids the
    /// source no longer knows, or that sit outside the loaded roots, are
    /// skipped. Returns how many were expanded.
    pub fn restore_expanded(&mut self, ids: &[NodeId]) -> Result<usize, TreeError> {
        let mut restored = 0;
        for id in ids {
            if !self.nodes.contains_key(id) {
                match self.load_path_to(*id) {
                    Ok(()) => {}
                    Err(TreeError::DataSource(DataSourceError::Missing(_)))
                    | Err(TreeError::NodeNotFound(_)) => {
                        debug!(node = %id, "skipping stale expanded node");
                        continue;
                    }
                    Err(e) => return Err(e),
                }
            }
            self.expand_children_of(*id)?;
            restored += 1;
        }
        Ok(restored)
    }

    fn load_path_to(&mut self, id: NodeId) -> Result<(), TreeError> {
        for ancestor in self.ancestors_of(id)? {
            self.load_children(ancestor)?;
        }
        if self.nodes.contains_key(&id) {
            Ok(())
        } else {
            Err(TreeError::NodeNotFound(id))
        }
    }

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    fn node_mut(&mut self, id: NodeId) -> Result<&mut TreeNode, TreeError> {
        self.nodes.get_mut(&id).ok_or(TreeError::NodeNotFound(id))
    }

    /// Insert a fetched record, or merge it into the node already in
    /// memory (keeping that node's children and expansion).
    fn apply_fresh(&mut self, record: NodeRecord) {
        let id = record.id;
        let Some(node) = self.nodes.get_mut(&id) else {
            self.nodes.insert(id, TreeNode::from_record(record));
            return;
        };
        let old_parent = node.parent_id;
        let old_prefix = node.own_path();
        node.apply_record(record);
        let new_parent = node.parent_id;
        let new_prefix = node.own_path();

        if old_parent != new_parent {
            self.detach(id, old_parent);
        }
        if old_prefix != new_prefix {
            self.rebase_descendants(id, &old_prefix, &new_prefix);
        }
    }

    /// Remove `id` from its parent's loaded children, or from the roots.
    fn detach(&mut self, id: NodeId, parent: Option<NodeId>) {
        match parent {
            Some(parent) => {
                if let Some(Children::Loaded(ids)) =
                    self.nodes.get_mut(&parent).map(|p| &mut p.children)
                {
                    ids.retain(|c| *c != id);
                }
            }
            None => self.roots.retain(|r| *r != id),
        }
    }

    /// Rewrite the stored paths of every loaded descendant of `id`.
    /// Returns how many nodes changed.
    fn rebase_descendants(&mut self, id: NodeId, old_prefix: &str, new_prefix: &str) -> usize {
        let mut stack: Vec<NodeId> = self
            .nodes
            .get(&id)
            .map(|n| n.children.ids().to_vec())
            .unwrap_or_default();
        let mut rewritten = 0;
        while let Some(child) = stack.pop() {
            let Some(node) = self.nodes.get_mut(&child) else {
                continue;
            };
            // A child whose path does not carry the prefix is not really
            // below `id` any more; leave it and its subtree alone.
            if let Some(path) = rebase(&node.parent_path, old_prefix, new_prefix) {
                node.parent_path = path;
                rewritten += 1;
                stack.extend(node.children.ids().iter().copied());
            }
        }
        rewritten
    }

    #[cfg(test)]
    fn snapshot(&self) -> (Vec<NodeId>, Vec<TreeNode>) {
        (self.roots.clone(), self.nodes.values().cloned().collect())
    }
}
