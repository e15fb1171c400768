use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};

use crate::model::config::{ActionView, TreeConfig, ViewKind, ViewOptions};
use crate::model::node::Lineage;
use crate::model::record::{NodeId, NodeRecord};
use crate::ops::tree_store::{MoveOutcome, TreeError, TreeStore};
use crate::source::DataSource;

/// Where the controller asks for a redraw.
pub trait ViewRefresh {
    /// `partial` redraws from the in-memory tree only; a full update may
    /// also reload unrelated data.
    fn request_update(&mut self, partial: bool);
}

/// Where the controller sends "open this record" requests.
pub trait Navigator {
    fn navigate(&mut self, request: &OpenRequest);
}

/// A request to show one record in a detail view
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpenRequest {
    pub res_id: NodeId,
    pub model: String,
    pub view_id: String,
    /// Named parameters passed as data
    #[serde(default)]
    pub context: BTreeMap<String, Value>,
}

/// Result of an open-record gesture
#[derive(Debug, Clone, PartialEq)]
pub enum OpenOutcome {
    Navigated(OpenRequest),
    /// The view does not offer opening records.
    FormButtonHidden,
    /// Zero or several form views are configured; none is picked.
    NoUniqueFormView { found: usize },
}

/// Payload of a drop gesture: both records as the view knew them
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DropEvent {
    pub item_moved: NodeRecord,
    pub new_parent: NodeRecord,
}

impl DropEvent {
    pub fn decode(payload: &str) -> Result<Self, TreeError> {
        Ok(serde_json::from_str(payload)?)
    }

    pub fn encode(&self) -> Result<String, TreeError> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Result of a drop gesture that did not fail
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropOutcome {
    Moved {
        node: NodeId,
        old_parent: Option<NodeId>,
        new_parent: NodeId,
    },
    NoOpMove,
    CyclicMoveRejected,
    DragDropDisabled,
}

impl From<MoveOutcome> for DropOutcome {
    fn from(outcome: MoveOutcome) -> Self {
        match outcome {
            MoveOutcome::Moved {
                node,
                old_parent,
                new_parent,
            } => DropOutcome::Moved {
                node,
                old_parent,
                new_parent,
            },
            MoveOutcome::NoOpMove => DropOutcome::NoOpMove,
            MoveOutcome::CyclicMoveRejected => DropOutcome::CyclicMoveRejected,
        }
    }
}

/// Turns view gestures into tree store calls and redraw requests.
/// Holds no tree state of its own.
pub struct Controller<S, V, N> {
    store: TreeStore<S>,
    view: V,
    navigator: N,
    options: ViewOptions,
    views: Vec<ActionView>,
    context: BTreeMap<String, Value>,
}

impl<S: DataSource, V: ViewRefresh, N: Navigator> Controller<S, V, N> {
    pub fn new(store: TreeStore<S>, view: V, navigator: N, config: TreeConfig) -> Self {
        Controller {
            store,
            view,
            navigator,
            options: config.view,
            views: config.views,
            context: config.context,
        }
    }

    pub fn store(&self) -> &TreeStore<S> {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut TreeStore<S> {
        &mut self.store
    }

    pub fn view(&self) -> &V {
        &self.view
    }

    pub fn navigator(&self) -> &N {
        &self.navigator
    }

    pub fn options(&self) -> &ViewOptions {
        &self.options
    }

    /// Load the roots (unfolding everything if configured) and draw.
    pub fn open_view(&mut self) -> Result<(), TreeError> {
        self.store.load_roots()?;
        if self.options.start_unfolded {
            self.store.expand_all()?;
        }
        self.view.request_update(false);
        Ok(())
    }

    /// Click on a node's expand affordance.
    pub fn node_activated(&mut self, id: NodeId) -> Result<(), TreeError> {
        let node = self.store.node(id).ok_or(TreeError::NodeNotFound(id))?;
        if node.children.is_loaded() {
            self.store.toggle_children_visible_for_item(id)?;
        } else {
            self.store.expand_children_of(id)?;
        }
        self.view.request_update(true);
        Ok(())
    }

    /// Open `id` in the model's form view, when exactly one is configured.
    pub fn open_record(&mut self, id: NodeId) -> OpenOutcome {
        if !self.options.show_form_button {
            warn!(node = %id, "opening records is disabled for this view");
            return OpenOutcome::FormButtonHidden;
        }

        let forms: Vec<&ActionView> = self
            .views
            .iter()
            .filter(|v| v.kind == ViewKind::Form)
            .collect();
        let [form] = forms.as_slice() else {
            warn!(
                model = %self.options.model,
                found = forms.len(),
                "could not find a suitable form view for this model"
            );
            return OpenOutcome::NoUniqueFormView { found: forms.len() };
        };

        let request = OpenRequest {
            res_id: id,
            model: self.options.model.clone(),
            view_id: form.id.clone(),
            context: self.context.clone(),
        };
        self.navigator.navigate(&request);
        OpenOutcome::Navigated(request)
    }

    /// Drop of one node onto another.
    ///
    /// Pointless and cyclic drops are answered from the payload alone and
    /// never reach the data source. After a successful move both parents
    /// are brought up to date before the single redraw.
    pub fn node_dropped(&mut self, event: &DropEvent) -> Result<DropOutcome, TreeError> {
        let dragged = &event.item_moved;
        let target = &event.new_parent;

        if self.options.disable_drag_drop {
            warn!(node = %dragged.id, target = %target.id, "drag and drop is disabled");
            return Ok(DropOutcome::DragDropDisabled);
        }
        if target.is_same_or_parent_of(dragged) {
            info!(
                node = %dragged.id,
                target = %target.id,
                "dropping a node onto itself or its parent has no effect"
            );
            return Ok(DropOutcome::NoOpMove);
        }
        if dragged.is_ancestor_of(target) {
            info!(
                node = %dragged.id,
                target = %target.id,
                "dropping a node inside its own subtree is invalid"
            );
            return Ok(DropOutcome::CyclicMoveRejected);
        }

        let outcome = self.store.change_parent(dragged.id, target.id)?;
        let MoveOutcome::Moved {
            old_parent,
            new_parent,
            ..
        } = outcome
        else {
            return Ok(outcome.into());
        };

        if let Some(old_parent) = old_parent {
            self.store.refresh_node(old_parent)?;
            self.store.expand_children_of(old_parent)?;
        }
        self.store.expand_children_of(new_parent)?;
        self.view.request_update(true);
        Ok(outcome.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::node::Children;
    use crate::source::RootFilter;
    use crate::source::testing::{Call, ScriptedSource, rec, warehouse};
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[derive(Default)]
    struct Redraws(Vec<bool>);

    impl ViewRefresh for Redraws {
        fn request_update(&mut self, partial: bool) {
            self.0.push(partial);
        }
    }

    #[derive(Default)]
    struct Opened(Vec<OpenRequest>);

    impl Navigator for Opened {
        fn navigate(&mut self, request: &OpenRequest) {
            self.0.push(request.clone());
        }
    }

    type TestController = Controller<ScriptedSource, Redraws, Opened>;

    fn form(id: &str) -> ActionView {
        ActionView {
            id: id.to_string(),
            kind: ViewKind::Form,
        }
    }

    fn config() -> TreeConfig {
        TreeConfig {
            view: ViewOptions::new("stock.location"),
            views: vec![form("location.form")],
            filter: BTreeMap::new(),
            context: BTreeMap::from([("default_usage".to_string(), json!("internal"))]),
        }
    }

    fn controller_with(source: ScriptedSource, config: TreeConfig) -> TestController {
        let store = TreeStore::new(source, RootFilter::default());
        let mut ctl = Controller::new(store, Redraws::default(), Opened::default(), config);
        ctl.open_view().unwrap();
        ctl
    }

    fn controller() -> TestController {
        controller_with(warehouse(), config())
    }

    fn record_of(ctl: &TestController, id: u64) -> NodeRecord {
        ctl.store().node(NodeId(id)).unwrap().to_record()
    }

    fn drop_event(ctl: &TestController, moved: u64, onto: u64) -> DropEvent {
        DropEvent {
            item_moved: record_of(ctl, moved),
            new_parent: record_of(ctl, onto),
        }
    }

    #[test]
    fn open_view_requests_full_update() {
        let ctl = controller();
        assert_eq!(ctl.view().0, vec![false]);
        assert_eq!(ctl.store().roots(), &[NodeId(1), NodeId(7)]);
    }

    #[test]
    fn open_view_unfolds_when_configured() {
        let mut cfg = config();
        cfg.view.start_unfolded = true;
        let ctl = controller_with(warehouse(), cfg);
        assert_eq!(ctl.store().visible().len(), 7);
    }

    #[test]
    fn activation_expands_then_toggles() {
        let mut ctl = controller();
        ctl.node_activated(NodeId(1)).unwrap();
        assert!(ctl.store().node(NodeId(1)).unwrap().is_expanded);

        ctl.node_activated(NodeId(1)).unwrap();
        assert!(!ctl.store().node(NodeId(1)).unwrap().is_expanded);

        ctl.node_activated(NodeId(1)).unwrap();
        assert!(ctl.store().node(NodeId(1)).unwrap().is_expanded);

        assert_eq!(ctl.store().source().count(Call::Children(NodeId(1))), 1);
        assert_eq!(ctl.view().0, vec![false, true, true, true]);
    }

    #[test]
    fn activation_failure_surfaces_and_skips_redraw() {
        let mut ctl = controller();
        ctl.store_mut().source_mut().fail_children = true;
        assert!(matches!(
            ctl.node_activated(NodeId(1)),
            Err(TreeError::DataSource(_))
        ));
        assert_eq!(ctl.view().0, vec![false]);
        assert_eq!(
            ctl.store().node(NodeId(1)).unwrap().children,
            Children::Unloaded
        );
    }

    #[test]
    fn open_record_with_single_form_view() {
        let mut ctl = controller();
        let outcome = ctl.open_record(NodeId(3));
        let expected = OpenRequest {
            res_id: NodeId(3),
            model: "stock.location".into(),
            view_id: "location.form".into(),
            context: BTreeMap::from([("default_usage".to_string(), json!("internal"))]),
        };
        assert_eq!(outcome, OpenOutcome::Navigated(expected.clone()));
        assert_eq!(ctl.navigator().0, vec![expected]);
    }

    #[test]
    fn open_record_refuses_ambiguous_views() {
        let mut none = config();
        none.views.clear();
        let mut ctl = controller_with(warehouse(), none);
        assert_eq!(
            ctl.open_record(NodeId(1)),
            OpenOutcome::NoUniqueFormView { found: 0 }
        );

        let mut two = config();
        two.views.push(form("location.form.alt"));
        two.views.push(ActionView {
            id: "location.list".into(),
            kind: ViewKind::List,
        });
        let mut ctl = controller_with(warehouse(), two);
        assert_eq!(
            ctl.open_record(NodeId(1)),
            OpenOutcome::NoUniqueFormView { found: 2 }
        );
        assert!(ctl.navigator().0.is_empty());
    }

    #[test]
    fn open_record_hidden_button() {
        let mut cfg = config();
        cfg.view.show_form_button = false;
        let mut ctl = controller_with(warehouse(), cfg);
        assert_eq!(ctl.open_record(NodeId(1)), OpenOutcome::FormButtonHidden);
        assert!(ctl.navigator().0.is_empty());
    }

    #[test]
    fn drop_moves_and_refreshes_both_parents() {
        let source = ScriptedSource::new(vec![
            rec(1, None, "one"),
            rec(2, Some(1), "two"),
            rec(3, Some(1), "three"),
        ]);
        let mut ctl = controller_with(source, config());
        ctl.node_activated(NodeId(1)).unwrap();

        let payload = drop_event(&ctl, 3, 2).encode().unwrap();
        let event = DropEvent::decode(&payload).unwrap();
        assert_eq!(event.item_moved.parent_path, "1/");

        let outcome = ctl.node_dropped(&event).unwrap();
        assert_eq!(
            outcome,
            DropOutcome::Moved {
                node: NodeId(3),
                old_parent: Some(NodeId(1)),
                new_parent: NodeId(2),
            }
        );

        let store = ctl.store();
        assert_eq!(store.node(NodeId(3)).unwrap().parent_path, "1/2/");
        assert_eq!(store.node(NodeId(1)).unwrap().children.ids(), &[NodeId(2)]);
        assert_eq!(store.node(NodeId(2)).unwrap().children.ids(), &[NodeId(3)]);
        assert!(store.node(NodeId(1)).unwrap().is_expanded);
        assert!(store.node(NodeId(2)).unwrap().is_expanded);

        let calls = &store.source().calls;
        let persist = calls
            .iter()
            .position(|c| *c == Call::Reparent(NodeId(3), NodeId(2)))
            .unwrap();
        let refresh = calls.iter().position(|c| *c == Call::One(NodeId(1))).unwrap();
        assert!(persist < refresh);
        assert_eq!(ctl.view().0.last(), Some(&true));
    }

    #[test]
    fn drop_onto_self_or_parent_is_ignored() {
        let mut ctl = controller();
        ctl.node_activated(NodeId(1)).unwrap();
        let redraws = ctl.view().0.len();

        let onto_self = drop_event(&ctl, 2, 2);
        assert_eq!(ctl.node_dropped(&onto_self).unwrap(), DropOutcome::NoOpMove);
        let onto_parent = drop_event(&ctl, 2, 1);
        assert_eq!(ctl.node_dropped(&onto_parent).unwrap(), DropOutcome::NoOpMove);

        assert_eq!(ctl.store().source().reparent_calls(), 0);
        assert_eq!(ctl.view().0.len(), redraws);
    }

    #[test]
    fn drop_into_own_subtree_is_rejected() {
        let mut ctl = controller();
        ctl.node_activated(NodeId(1)).unwrap();
        let event = drop_event(&ctl, 1, 3);
        assert_eq!(
            ctl.node_dropped(&event).unwrap(),
            DropOutcome::CyclicMoveRejected
        );
        assert_eq!(ctl.store().source().reparent_calls(), 0);
        assert_eq!(ctl.store().roots(), &[NodeId(1), NodeId(7)]);
    }

    #[test]
    fn drop_with_disabled_drag_and_drop() {
        let mut cfg = config();
        cfg.view.disable_drag_drop = true;
        let mut ctl = controller_with(warehouse(), cfg);
        ctl.node_activated(NodeId(1)).unwrap();
        let event = drop_event(&ctl, 3, 2);
        assert_eq!(ctl.node_dropped(&event).unwrap(), DropOutcome::DragDropDisabled);
        assert_eq!(ctl.store().source().reparent_calls(), 0);
    }

    #[test]
    fn rejected_persist_surfaces_error_and_keeps_tree() {
        let mut ctl = controller();
        ctl.node_activated(NodeId(1)).unwrap();
        let before: Vec<_> = ctl
            .store()
            .visible()
            .iter()
            .map(|(d, n)| (*d, (*n).clone()))
            .collect();
        let redraws = ctl.view().0.len();

        ctl.store_mut().source_mut().fail_reparent = true;
        let event = drop_event(&ctl, 3, 2);
        assert!(matches!(
            ctl.node_dropped(&event),
            Err(TreeError::DataSource(_))
        ));

        let after: Vec<_> = ctl
            .store()
            .visible()
            .iter()
            .map(|(d, n)| (*d, (*n).clone()))
            .collect();
        assert_eq!(after, before);
        assert_eq!(ctl.store().source().reparent_calls(), 1);
        assert_eq!(ctl.view().0.len(), redraws);
    }

    #[test]
    fn stale_payload_is_caught_by_the_store() {
        let mut ctl = controller();
        ctl.node_activated(NodeId(1)).unwrap();
        // payload claims 2 is a root, the tree knows it sits under 1
        let mut event = drop_event(&ctl, 2, 1);
        event.item_moved.parent_id = None;
        event.item_moved.parent_path = String::new();
        assert_eq!(ctl.node_dropped(&event).unwrap(), DropOutcome::NoOpMove);
        assert_eq!(ctl.store().source().reparent_calls(), 0);
    }

    #[test]
    fn malformed_payload() {
        assert!(matches!(
            DropEvent::decode("{\"item_moved\": 3}"),
            Err(TreeError::MalformedPayload(_))
        ));
    }
}
