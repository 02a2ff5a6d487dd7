//! View graph derivation.
//!
//! `derive_view_graph` is a pure function of the store, the filter, the
//! selection and the calendar day. It holds no memo between calls; callers
//! that want change detection compare results structurally or watch
//! [`crate::store::EntityStore::revision`].
//!
//! Stage order is fixed: type visibility, endpoint pruning, temporal,
//! attribute, decoration.

use std::collections::{BTreeMap, HashSet};

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::edge::{Edge, EdgeId, EdgeKind, EdgeStatus};
use crate::filter::FilterConfig;
use crate::node::{FlowStats, Node, NodeId, NodeKind};
use crate::selection::SelectionModel;
use crate::store::EntityStore;

/// Visible-node count above which renderers should switch to a cheaper mode.
pub const DEFAULT_HIGH_DENSITY_THRESHOLD: usize = 2000;

/// Opacity of a selected edge.
pub const SELECTED_EDGE_OPACITY: f64 = 1.0;
/// Opacity of an unselected edge.
pub const EDGE_OPACITY: f64 = 0.3;
/// Width of a selected edge.
pub const SELECTED_EDGE_WIDTH: u32 = 3;
/// Width of an unselected edge.
pub const EDGE_WIDTH: u32 = 1;

/// Display color class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColorClass {
    /// Selected or highlighted entity.
    Selected,
    /// Central company node.
    CentralCompany,
    /// Job node.
    Job,
    /// Vendor node.
    Vendor,
    /// Invoice edge.
    Invoice,
    /// Payment edge.
    Payment,
}

impl ColorClass {
    /// Color class for an unselected node.
    #[must_use]
    pub const fn for_node(kind: NodeKind) -> Self {
        match kind {
            NodeKind::CentralCompany => Self::CentralCompany,
            NodeKind::Job => Self::Job,
            NodeKind::Vendor => Self::Vendor,
        }
    }

    /// Color class for an unselected edge.
    #[must_use]
    pub const fn for_edge(kind: EdgeKind) -> Self {
        match kind {
            EdgeKind::Invoice => Self::Invoice,
            EdgeKind::Payment => Self::Payment,
        }
    }

    /// Default palette.
    #[must_use]
    pub const fn hex(self) -> &'static str {
        match self {
            Self::Selected => "#3498DB",
            Self::CentralCompany => "#FFFFFF",
            Self::Job => "#4A90E2",
            Self::Vendor => "#F5A623",
            Self::Invoice => "#E74C3C",
            Self::Payment => "#2ECC71",
        }
    }
}

/// Rendered size of a node kind.
#[must_use]
pub const fn node_size(kind: NodeKind) -> u32 {
    match kind {
        NodeKind::CentralCompany => 30,
        NodeKind::Job => 15,
        NodeKind::Vendor => 10,
    }
}

/// A visible node with its decoration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ViewNode {
    /// Node id.
    pub id: NodeId,
    /// Node kind.
    pub kind: NodeKind,
    /// Display label.
    pub label: String,
    /// Aggregates, if known.
    pub stats: Option<FlowStats>,
    /// In the selection.
    pub selected: bool,
    /// In the highlight set.
    pub highlighted: bool,
    /// Color class.
    pub color: ColorClass,
    /// Size class.
    pub size: u32,
}

/// A visible edge with its decoration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ViewEdge {
    /// Edge id.
    pub id: EdgeId,
    /// Edge kind.
    pub kind: EdgeKind,
    /// Source node.
    pub source: NodeId,
    /// Target node.
    pub target: NodeId,
    /// Amount.
    pub amount: f64,
    /// Date, if known.
    pub date: Option<NaiveDate>,
    /// Status, if known.
    pub status: Option<EdgeStatus>,
    /// In the selection.
    pub selected: bool,
    /// Color class.
    pub color: ColorClass,
    /// Opacity in `[0, 1]`.
    pub opacity: f64,
    /// Stroke width.
    pub width: u32,
}

/// The filtered, decorated subset of the store shown to a renderer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ViewGraph {
    /// Visible nodes, in store order.
    pub nodes: Vec<ViewNode>,
    /// Visible edges, in store order.
    pub edges: Vec<ViewEdge>,
    /// More visible nodes than the density threshold.
    pub high_density: bool,
}

impl ViewGraph {
    /// Sum of visible edge amounts.
    #[must_use]
    pub fn total_amount(&self) -> f64 {
        self.edges.iter().map(|e| e.amount).sum()
    }

    /// Visible node count per kind.
    #[must_use]
    pub fn node_counts(&self) -> BTreeMap<NodeKind, usize> {
        let mut counts = BTreeMap::new();
        for node in &self.nodes {
            *counts.entry(node.kind).or_insert(0) += 1;
        }
        counts
    }

    /// Visible edge count per kind.
    #[must_use]
    pub fn edge_counts(&self) -> BTreeMap<EdgeKind, usize> {
        let mut counts = BTreeMap::new();
        for edge in &self.edges {
            *counts.entry(edge.kind).or_insert(0) += 1;
        }
        counts
    }

    /// Looks up a visible node.
    #[must_use]
    pub fn node(&self, id: &NodeId) -> Option<&ViewNode> {
        self.nodes.iter().find(|n| &n.id == id)
    }

    /// Looks up a visible edge.
    #[must_use]
    pub fn edge(&self, id: &EdgeId) -> Option<&ViewEdge> {
        self.edges.iter().find(|e| &e.id == id)
    }
}

/// Derives the view graph with the default density threshold.
///
/// # Examples
///
/// ```
/// use chrono::NaiveDate;
/// use spendgraph::{derive_view_graph, EntityStore, FilterConfig, Node, NodeId, NodeKind, SelectionModel};
///
/// let mut store = EntityStore::new();
/// store.upsert_node(Node::new(NodeId::vendor(1), NodeKind::Vendor, "Acme"));
///
/// let today = NaiveDate::from_ymd_opt(2024, 6, 1).unwrap();
/// let view = derive_view_graph(&store, &FilterConfig::default(), &SelectionModel::new(), today);
/// assert_eq!(view.nodes.len(), 1);
/// assert_eq!(view.nodes[0].size, 10);
/// ```
#[must_use]
pub fn derive_view_graph(
    store: &EntityStore,
    config: &FilterConfig,
    selection: &SelectionModel,
    today: NaiveDate,
) -> ViewGraph {
    derive_view_graph_with_threshold(store, config, selection, today, DEFAULT_HIGH_DENSITY_THRESHOLD)
}

/// Derives the view graph, flagging high density above `threshold` nodes.
#[must_use]
pub fn derive_view_graph_with_threshold(
    store: &EntityStore,
    config: &FilterConfig,
    selection: &SelectionModel,
    today: NaiveDate,
    threshold: usize,
) -> ViewGraph {
    // Stage 1: type visibility.
    let visible_nodes: Vec<&Node> = store.nodes().filter(|n| config.is_visible(n.kind)).collect();
    let visible_ids: HashSet<&NodeId> = visible_nodes.iter().map(|n| &n.id).collect();

    let visible_edges = store
        .edges()
        .filter(|e| config.is_visible(e.kind))
        // Stage 2: endpoint pruning.
        .filter(|e| visible_ids.contains(&e.source) && visible_ids.contains(&e.target))
        // Stage 3: temporal.
        .filter(|e| config.passes_temporal(e, today))
        // Stage 4: attribute.
        .filter(|e| config.passes_attributes(e));

    // Stage 5: decoration.
    let highlighted: HashSet<NodeId> = selection.highlighted(store).into_iter().collect();
    let edges: Vec<ViewEdge> = visible_edges.map(|e| decorate_edge(e, selection)).collect();
    let nodes: Vec<ViewNode> = visible_nodes
        .into_iter()
        .map(|n| decorate_node(n, selection, &highlighted))
        .collect();

    ViewGraph {
        high_density: nodes.len() > threshold,
        nodes,
        edges,
    }
}

fn decorate_node(node: &Node, selection: &SelectionModel, highlighted: &HashSet<NodeId>) -> ViewNode {
    let selected = selection.is_node_selected(&node.id);
    let is_highlighted = highlighted.contains(&node.id);
    let color = if selected || is_highlighted {
        ColorClass::Selected
    } else {
        ColorClass::for_node(node.kind)
    };
    ViewNode {
        id: node.id.clone(),
        kind: node.kind,
        label: node.display_name().to_string(),
        stats: node.stats,
        selected,
        highlighted: is_highlighted,
        color,
        size: node_size(node.kind),
    }
}

fn decorate_edge(edge: &Edge, selection: &SelectionModel) -> ViewEdge {
    let selected = selection.is_edge_selected(&edge.id);
    let (color, opacity, width) = if selected {
        (ColorClass::Selected, SELECTED_EDGE_OPACITY, SELECTED_EDGE_WIDTH)
    } else {
        (ColorClass::for_edge(edge.kind), EDGE_OPACITY, EDGE_WIDTH)
    };
    ViewEdge {
        id: edge.id.clone(),
        kind: edge.kind,
        source: edge.source.clone(),
        target: edge.target.clone(),
        amount: edge.amount(),
        date: edge.date(),
        status: edge.attributes.status,
        selected,
        color,
        opacity,
        width,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::filter::AmountRange;

    fn ymd(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn today() -> NaiveDate {
        ymd(2024, 6, 15)
    }

    fn store() -> EntityStore {
        let (store, report) = EntityStore::from_dataset(
            vec![
                Node::new(NodeId::company("apw"), NodeKind::CentralCompany, "APW"),
                Node::new(NodeId::job(1), NodeKind::Job, "Riverside"),
                Node::new(NodeId::vendor(1), NodeKind::Vendor, "Acme"),
            ],
            vec![
                Edge::new(EdgeId::new("inv").unwrap(), EdgeKind::Invoice, NodeId::vendor(1), NodeId::job(1))
                    .with_amount(1000.0)
                    .with_date(ymd(2024, 6, 1))
                    .with_status(EdgeStatus::Pending),
                Edge::new(EdgeId::new("pay").unwrap(), EdgeKind::Payment, NodeId::company("apw"), NodeId::vendor(1))
                    .with_amount(250.0)
                    .with_status(EdgeStatus::Approved),
            ],
        );
        assert!(report.is_clean());
        store
    }

    #[test]
    fn test_hidden_edge_kind_leaves_other_edges() {
        let store = store();
        let mut config = FilterConfig::default();
        config.set_visibility(EdgeKind::Invoice, false);

        let view = derive_view_graph(&store, &config, &SelectionModel::new(), today());
        assert_eq!(view.edges.len(), 1);
        assert_eq!(view.edges[0].kind, EdgeKind::Payment);
        assert!(view.node(&view.edges[0].source).is_some());
        assert!(view.node(&view.edges[0].target).is_some());
        assert_eq!(view.nodes.len(), 3);
    }

    #[test]
    fn test_hidden_node_kind_prunes_incident_edges() {
        let store = store();
        let mut config = FilterConfig::default();
        config.set_visibility(NodeKind::Job, false);

        let view = derive_view_graph(&store, &config, &SelectionModel::new(), today());
        assert!(view.node(&NodeId::job(1)).is_none());
        assert!(view.edge(&EdgeId::new("inv").unwrap()).is_none());
        assert!(view.edge(&EdgeId::new("pay").unwrap()).is_some());
        // Pruning is view-only.
        assert!(store.contains_edge(&EdgeId::new("inv").unwrap()));
    }

    #[test]
    fn test_amount_and_status_stages() {
        let store = store();
        let mut config = FilterConfig::default();
        config
            .set_amount_range(AmountRange::new(Some(500.0), None).unwrap())
            .unwrap();
        let view = derive_view_graph(&store, &config, &SelectionModel::new(), today());
        assert_eq!(view.edges.len(), 1);
        assert_eq!(view.total_amount(), 1000.0);

        let mut config = FilterConfig::default();
        config.set_statuses([EdgeStatus::Approved]);
        let view = derive_view_graph(&store, &config, &SelectionModel::new(), today());
        assert_eq!(view.edge_counts().get(&EdgeKind::Payment), Some(&1));
        assert_eq!(view.edge_counts().get(&EdgeKind::Invoice), None);
    }

    #[test]
    fn test_edge_selection_decoration() {
        let store = store();
        let mut selection = SelectionModel::new();
        selection.select_single(EdgeId::new("inv").unwrap());

        let view = derive_view_graph(&store, &FilterConfig::default(), &selection, today());
        let inv = view.edge(&EdgeId::new("inv").unwrap()).unwrap();
        assert!(inv.selected);
        assert_eq!(inv.color, ColorClass::Selected);
        assert_eq!(inv.opacity, SELECTED_EDGE_OPACITY);
        assert_eq!(inv.width, SELECTED_EDGE_WIDTH);

        let pay = view.edge(&EdgeId::new("pay").unwrap()).unwrap();
        assert_eq!(pay.color, ColorClass::Payment);
        assert_eq!(pay.opacity, EDGE_OPACITY);
        assert_eq!(pay.width, EDGE_WIDTH);

        let vendor = view.node(&NodeId::vendor(1)).unwrap();
        assert!(vendor.highlighted);
        assert!(!vendor.selected);
        assert_eq!(vendor.color, ColorClass::Selected);

        let company = view.node(&NodeId::company("apw")).unwrap();
        assert!(!company.highlighted);
        assert_eq!(company.color, ColorClass::CentralCompany);
        assert_eq!(company.size, 30);
    }

    #[test]
    fn test_high_density_threshold() {
        let store = store();
        let selection = SelectionModel::new();
        let config = FilterConfig::default();
        assert!(!derive_view_graph(&store, &config, &selection, today()).high_density);
        assert!(derive_view_graph_with_threshold(&store, &config, &selection, today(), 2).high_density);
        assert!(!derive_view_graph_with_threshold(&store, &config, &selection, today(), 3).high_density);
    }

    #[test]
    fn test_derivation_is_pure() {
        let store = store();
        let mut selection = SelectionModel::new();
        selection.toggle(NodeId::job(1));
        let config = FilterConfig::default();
        let a = derive_view_graph(&store, &config, &selection, today());
        let b = derive_view_graph(&store, &config, &selection, today());
        assert_eq!(a, b);
        assert_eq!(a.node_counts().values().sum::<usize>(), 3);
    }

    #[test]
    fn test_palette() {
        assert_eq!(ColorClass::Selected.hex(), "#3498DB");
        assert_eq!(ColorClass::for_edge(EdgeKind::Invoice).hex(), "#E74C3C");
        assert_eq!(node_size(NodeKind::Job), 15);
    }
}
