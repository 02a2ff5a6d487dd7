//! Selection model.
//!
//! Holds only identifiers, never entity data. The highlight set is derived
//! from the selection on demand unless a caller installed an explicit one
//! (search results); any selection change drops the explicit highlight.

use serde::{Deserialize, Serialize};

use crate::edge::EdgeId;
use crate::node::NodeId;
use crate::store::EntityStore;

/// Reference to a selectable entity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum EntityRef {
    /// A node.
    Node(NodeId),
    /// An edge.
    Edge(EdgeId),
}

impl EntityRef {
    /// The node id, if this is a node reference.
    #[must_use]
    pub const fn as_node(&self) -> Option<&NodeId> {
        match self {
            Self::Node(id) => Some(id),
            Self::Edge(_) => None,
        }
    }

    /// The edge id, if this is an edge reference.
    #[must_use]
    pub const fn as_edge(&self) -> Option<&EdgeId> {
        match self {
            Self::Edge(id) => Some(id),
            Self::Node(_) => None,
        }
    }

    /// Returns true if the referenced entity is in `store`.
    #[must_use]
    pub fn exists_in(&self, store: &EntityStore) -> bool {
        match self {
            Self::Node(id) => store.contains_node(id),
            Self::Edge(id) => store.contains_edge(id),
        }
    }
}

impl From<NodeId> for EntityRef {
    fn from(id: NodeId) -> Self {
        Self::Node(id)
    }
}

impl From<EdgeId> for EntityRef {
    fn from(id: EdgeId) -> Self {
        Self::Edge(id)
    }
}

/// Selection cardinality.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionState {
    /// Nothing selected.
    Empty,
    /// Exactly one entity selected.
    Single,
    /// Two or more entities selected.
    Multi,
}

/// Ordered set of selected entities plus an optional explicit highlight.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SelectionModel {
    selected: Vec<EntityRef>,
    explicit_highlight: Option<Vec<NodeId>>,
    // Position of the last ref removed by `toggle`, so toggling it back
    // restores the previous order.
    last_removed: Option<(usize, EntityRef)>,
}

impl SelectionModel {
    /// Create an empty selection.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Current cardinality.
    #[must_use]
    pub fn state(&self) -> SelectionState {
        match self.selected.len() {
            0 => SelectionState::Empty,
            1 => SelectionState::Single,
            _ => SelectionState::Multi,
        }
    }

    /// Selected refs in selection order.
    #[must_use]
    pub fn selected(&self) -> &[EntityRef] {
        &self.selected
    }

    /// Returns true if nothing is selected.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.selected.is_empty()
    }

    /// Returns true if `entity` is selected.
    #[must_use]
    pub fn is_selected(&self, entity: &EntityRef) -> bool {
        self.selected.contains(entity)
    }

    /// Returns true if the node is selected.
    #[must_use]
    pub fn is_node_selected(&self, id: &NodeId) -> bool {
        self.selected.iter().any(|r| r.as_node() == Some(id))
    }

    /// Returns true if the edge is selected.
    #[must_use]
    pub fn is_edge_selected(&self, id: &EdgeId) -> bool {
        self.selected.iter().any(|r| r.as_edge() == Some(id))
    }

    /// Replaces the selection with exactly `entity`.
    pub fn select_single(&mut self, entity: impl Into<EntityRef>) {
        self.selected.clear();
        self.selected.push(entity.into());
        self.selection_changed();
    }

    /// Adds `entity`, or removes it if already selected.
    ///
    /// Two toggles of the same ref leave the selection as it was.
    pub fn toggle(&mut self, entity: impl Into<EntityRef>) {
        let entity = entity.into();
        if let Some(pos) = self.selected.iter().position(|r| *r == entity) {
            let removed = self.selected.remove(pos);
            self.explicit_highlight = None;
            self.last_removed = Some((pos, removed));
            return;
        }

        let pos = match self.last_removed.take() {
            Some((pos, prev)) if prev == entity => pos.min(self.selected.len()),
            _ => self.selected.len(),
        };
        self.selected.insert(pos, entity);
        self.explicit_highlight = None;
    }

    /// Clears the selection and any highlight.
    pub fn clear(&mut self) {
        self.selected.clear();
        self.selection_changed();
    }

    /// Installs an explicit display-only highlight.
    pub fn set_highlight(&mut self, ids: impl IntoIterator<Item = NodeId>) {
        let mut out: Vec<NodeId> = Vec::new();
        for id in ids {
            if !out.contains(&id) {
                out.push(id);
            }
        }
        self.explicit_highlight = Some(out);
    }

    /// Returns true if an explicit highlight is installed.
    #[must_use]
    pub fn has_explicit_highlight(&self) -> bool {
        self.explicit_highlight.is_some()
    }

    /// Node ids to highlight.
    ///
    /// The explicit highlight if one is set; otherwise every selected node
    /// and both endpoints of every selected edge, in selection order without
    /// duplicates. Edges missing from `store` contribute nothing.
    #[must_use]
    pub fn highlighted(&self, store: &EntityStore) -> Vec<NodeId> {
        if let Some(explicit) = &self.explicit_highlight {
            return explicit.clone();
        }

        let mut out: Vec<NodeId> = Vec::new();
        let mut push = |id: &NodeId| {
            if !out.contains(id) {
                out.push(id.clone());
            }
        };
        for entity in &self.selected {
            match entity {
                EntityRef::Node(id) => push(id),
                EntityRef::Edge(id) => {
                    if let Ok(edge) = store.get_edge(id) {
                        push(&edge.source);
                        push(&edge.target);
                    }
                }
            }
        }
        out
    }

    /// Drops refs to entities no longer in `store`. Returns how many were dropped.
    pub fn prune(&mut self, store: &EntityStore) -> usize {
        let before = self.selected.len();
        self.selected.retain(|r| r.exists_in(store));
        if let Some(explicit) = self.explicit_highlight.as_mut() {
            explicit.retain(|id| store.contains_node(id));
        }
        let dropped = before - self.selected.len();
        if dropped > 0 {
            self.last_removed = None;
        }
        dropped
    }

    /// The `(first, second)` node pair when exactly two nodes are selected.
    #[must_use]
    pub fn merge_candidates(&self) -> Option<(&NodeId, &NodeId)> {
        match self.selected.as_slice() {
            [EntityRef::Node(a), EntityRef::Node(b)] => Some((a, b)),
            _ => None,
        }
    }

    fn selection_changed(&mut self) {
        self.explicit_highlight = None;
        self.last_removed = None;
    }
}
