//! In-memory entity store.
//!
//! The store is the single source of truth for the loaded dataset. It keeps
//! nodes and edges in insertion order (so every read is deterministic) and an
//! incidence index from node id to the edges touching it, which is what makes
//! the referential-integrity checks cheap.
//!
//! Invariant: every stored edge has both endpoints stored. `load` repairs
//! inconsistent input by dropping offending edges; `upsert_edge` and
//! `delete_node` refuse to break it.

use std::collections::{BTreeMap, HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::edge::{Edge, EdgeId};
use crate::error::{GraphError, GraphResult, StoreError};
use crate::node::{Node, NodeId};

fn normalize_key(s: &str) -> String {
    s.trim().to_lowercase()
}

#[derive(Debug, Clone)]
struct Slot<T> {
    seq: u64,
    value: T,
}

/// Why `load` left a record out.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum DroppedRecord {
    /// The edge named an endpoint that is not in the dataset.
    DanglingEdge {
        /// The edge.
        edge: EdgeId,
        /// The first missing endpoint.
        missing: NodeId,
    },
    /// The edge failed value validation.
    InvalidEdge {
        /// The edge.
        edge: EdgeId,
        /// Validation message.
        message: String,
    },
}

/// Outcome of a full dataset load.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadReport {
    /// Nodes in the store after the load.
    pub nodes: usize,
    /// Edges in the store after the load.
    pub edges: usize,
    /// Node records that repeated an earlier id (last value wins).
    pub duplicate_nodes: usize,
    /// Edge records that repeated an earlier id (last value wins).
    pub duplicate_edges: usize,
    /// Records that were not admitted.
    pub dropped: Vec<DroppedRecord>,
}

impl LoadReport {
    /// Returns true if the input needed no repair.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.duplicate_nodes == 0 && self.duplicate_edges == 0 && self.dropped.is_empty()
    }
}

/// Owned copy of the store contents, in insertion order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoreSnapshot {
    /// All nodes.
    pub nodes: Vec<Node>,
    /// All edges.
    pub edges: Vec<Edge>,
}

/// Canonical mapping of node id → node and edge id → edge.
#[derive(Debug, Clone, Default)]
pub struct EntityStore {
    nodes: HashMap<NodeId, Slot<Node>>,
    node_order: BTreeMap<u64, NodeId>,
    edges: HashMap<EdgeId, Slot<Edge>>,
    edge_order: BTreeMap<u64, EdgeId>,
    incident: HashMap<NodeId, HashSet<EdgeId>>,
    next_seq: u64,
    revision: u64,
}

impl EntityStore {
    /// Create a new empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a store from a dataset, repairing it as `load` does.
    #[must_use]
    pub fn from_dataset(nodes: Vec<Node>, edges: Vec<Edge>) -> (Self, LoadReport) {
        let mut store = Self::new();
        let report = store.load(nodes, edges);
        (store, report)
    }

    /// Replaces the whole dataset.
    ///
    /// The new state is built separately and swapped in, so no reader can see
    /// a half-loaded store. Edges with a missing endpoint or an invalid amount
    /// are dropped and listed in the report; duplicate ids keep their first
    /// position and their last value.
    pub fn load(&mut self, nodes: Vec<Node>, edges: Vec<Edge>) -> LoadReport {
        let mut fresh = Self::new();
        let mut report = LoadReport::default();

        for node in nodes {
            if fresh.insert_node(node).is_some() {
                report.duplicate_nodes += 1;
            }
        }

        for edge in edges {
            if let Err(e) = edge.validate() {
                report.dropped.push(DroppedRecord::InvalidEdge {
                    edge: edge.id.clone(),
                    message: e.to_string(),
                });
                continue;
            }
            if let Some(missing) = fresh.missing_endpoint(&edge) {
                report.dropped.push(DroppedRecord::DanglingEdge {
                    edge: edge.id.clone(),
                    missing: missing.clone(),
                });
                continue;
            }
            if fresh.insert_edge(edge).is_some() {
                report.duplicate_edges += 1;
            }
        }

        report.nodes = fresh.nodes.len();
        report.edges = fresh.edges.len();
        fresh.revision = self.revision + 1;
        *self = fresh;

        if report.dropped.is_empty() {
            tracing::debug!(nodes = report.nodes, edges = report.edges, "dataset loaded");
        } else {
            tracing::warn!(
                nodes = report.nodes,
                edges = report.edges,
                dropped = report.dropped.len(),
                "dataset loaded with repairs"
            );
        }
        report
    }

    /// Inserts or replaces a node. A replaced node keeps its position.
    ///
    /// Returns the previous value, if any.
    pub fn upsert_node(&mut self, node: Node) -> Option<Node> {
        self.revision += 1;
        self.insert_node(node)
    }

    /// Inserts or replaces an edge. A replaced edge keeps its position.
    ///
    /// # Errors
    ///
    /// - `ValidationError::InvalidAmount` for negative or non-finite amounts
    /// - `StoreError::DanglingEdge` if an endpoint is missing
    pub fn upsert_edge(&mut self, edge: Edge) -> GraphResult<Option<Edge>> {
        edge.validate()?;
        if let Some(missing) = self.missing_endpoint(&edge) {
            return Err(StoreError::DanglingEdge {
                edge: edge.id.clone(),
                missing: missing.clone(),
            }
            .into());
        }
        self.revision += 1;
        Ok(self.insert_edge(edge))
    }

    /// Removes a node that no edge references.
    ///
    /// # Errors
    ///
    /// - `StoreError::NodeNotFound` if absent
    /// - `StoreError::ReferentialIntegrity` if edges still reference it
    pub fn delete_node(&mut self, id: &NodeId) -> Result<Node, StoreError> {
        if !self.nodes.contains_key(id) {
            return Err(StoreError::NodeNotFound(id.clone()));
        }
        let referencing = self.incident_ids(id);
        if !referencing.is_empty() {
            return Err(StoreError::ReferentialIntegrity {
                node: id.clone(),
                edges: referencing,
            });
        }

        let slot = self
            .nodes
            .remove(id)
            .ok_or_else(|| StoreError::NodeNotFound(id.clone()))?;
        self.node_order.remove(&slot.seq);
        self.incident.remove(id);
        self.revision += 1;
        Ok(slot.value)
    }

    /// Removes an edge.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::EdgeNotFound` if absent.
    pub fn delete_edge(&mut self, id: &EdgeId) -> Result<Edge, StoreError> {
        let slot = self
            .edges
            .remove(id)
            .ok_or_else(|| StoreError::EdgeNotFound(id.clone()))?;
        self.edge_order.remove(&slot.seq);
        self.unindex_edge(&slot.value);
        self.revision += 1;
        Ok(slot.value)
    }

    /// Looks up a node.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NodeNotFound` if absent.
    pub fn get_node(&self, id: &NodeId) -> Result<&Node, StoreError> {
        self.nodes
            .get(id)
            .map(|slot| &slot.value)
            .ok_or_else(|| StoreError::NodeNotFound(id.clone()))
    }

    /// Looks up an edge.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::EdgeNotFound` if absent.
    pub fn get_edge(&self, id: &EdgeId) -> Result<&Edge, StoreError> {
        self.edges
            .get(id)
            .map(|slot| &slot.value)
            .ok_or_else(|| StoreError::EdgeNotFound(id.clone()))
    }

    /// Returns true if the node exists.
    #[must_use]
    pub fn contains_node(&self, id: &NodeId) -> bool {
        self.nodes.contains_key(id)
    }

    /// Returns true if the edge exists.
    #[must_use]
    pub fn contains_edge(&self, id: &EdgeId) -> bool {
        self.edges.contains_key(id)
    }

    /// Number of nodes.
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Number of edges.
    #[must_use]
    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    /// Mutation counter; changes whenever the contents may have changed.
    #[must_use]
    pub const fn revision(&self) -> u64 {
        self.revision
    }

    /// Nodes in insertion order.
    pub fn nodes(&self) -> impl Iterator<Item = &Node> + '_ {
        self.node_order
            .values()
            .filter_map(|id| self.nodes.get(id).map(|slot| &slot.value))
    }

    /// Edges in insertion order.
    pub fn edges(&self) -> impl Iterator<Item = &Edge> + '_ {
        self.edge_order
            .values()
            .filter_map(|id| self.edges.get(id).map(|slot| &slot.value))
    }

    /// Edges with `node` as source or target, in insertion order.
    #[must_use]
    pub fn edges_of(&self, node: &NodeId) -> Vec<&Edge> {
        let Some(ids) = self.incident.get(node) else {
            return Vec::new();
        };
        let mut slots: Vec<&Slot<Edge>> = ids.iter().filter_map(|id| self.edges.get(id)).collect();
        slots.sort_by_key(|slot| slot.seq);
        slots.into_iter().map(|slot| &slot.value).collect()
    }

    /// Owned copy of everything, in insertion order.
    #[must_use]
    pub fn snapshot(&self) -> StoreSnapshot {
        StoreSnapshot {
            nodes: self.nodes().cloned().collect(),
            edges: self.edges().cloned().collect(),
        }
    }

    /// Case-insensitive node search over label, id and kind.
    ///
    /// Ranking: exact label, then label prefix, then any other match, then
    /// label order. A blank query returns the first `limit` nodes.
    #[must_use]
    pub fn search(&self, query: &str, limit: usize) -> Vec<&Node> {
        let query_key = normalize_key(query);
        if query_key.is_empty() {
            return self.nodes().take(limit).collect();
        }

        let mut scored: Vec<(u8, String, &Node)> = Vec::new();
        for node in self.nodes() {
            let label = normalize_key(node.display_name());
            let score = if label == query_key {
                3
            } else if label.starts_with(&query_key) {
                2
            } else if label.contains(&query_key)
                || normalize_key(node.id.as_str()).contains(&query_key)
                || normalize_key(node.kind.as_str()).contains(&query_key)
            {
                1
            } else {
                continue;
            };
            scored.push((score, label, node));
        }

        scored.sort_by(|(sa, la, _), (sb, lb, _)| sb.cmp(sa).then_with(|| la.cmp(lb)));
        scored.into_iter().take(limit).map(|(_, _, node)| node).collect()
    }

    /// Runs `f` against a staged copy and commits it only if `f` succeeds.
    ///
    /// On error the store is left exactly as it was.
    ///
    /// # Errors
    ///
    /// Propagates whatever `f` returns.
    pub fn transaction<T>(
        &mut self,
        f: impl FnOnce(&mut EntityStore) -> GraphResult<T>,
    ) -> GraphResult<T> {
        let mut staged = self.clone();
        let out = f(&mut staged)?;
        *self = staged;
        Ok(out)
    }

    /// Moves every endpoint equal to `from` onto `to`. Returns the touched edges.
    pub(crate) fn repoint_edges(&mut self, from: &NodeId, to: &NodeId) -> GraphResult<Vec<EdgeId>> {
        if !self.nodes.contains_key(to) {
            return Err(StoreError::NodeNotFound(to.clone()).into());
        }
        let mut touched: Vec<(u64, EdgeId)> = self
            .incident
            .get(from)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| self.edges.get(id).map(|slot| (slot, id)))
                    .filter(|(slot, _)| slot.value.touches(from))
                    .map(|(slot, id)| (slot.seq, id.clone()))
                    .collect()
            })
            .unwrap_or_default();
        touched.sort();

        for (_, id) in &touched {
            let Some(slot) = self.edges.get_mut(id) else {
                return Err(GraphError::internal(format!("incidence index names missing edge {id}")));
            };
            if &slot.value.source == from {
                slot.value.source = to.clone();
            }
            if &slot.value.target == from {
                slot.value.target = to.clone();
            }
            self.incident.entry(to.clone()).or_default().insert(id.clone());
        }
        self.incident.remove(from);
        self.revision += 1;
        Ok(touched.into_iter().map(|(_, id)| id).collect())
    }

    fn missing_endpoint<'a>(&self, edge: &'a Edge) -> Option<&'a NodeId> {
        [&edge.source, &edge.target]
            .into_iter()
            .find(|id| !self.nodes.contains_key(*id))
    }

    fn incident_ids(&self, node: &NodeId) -> Vec<EdgeId> {
        self.edges_of(node).into_iter().map(|edge| edge.id.clone()).collect()
    }

    fn insert_node(&mut self, node: Node) -> Option<Node> {
        if let Some(slot) = self.nodes.get_mut(&node.id) {
            return Some(std::mem::replace(&mut slot.value, node));
        }
        let seq = self.bump_seq();
        self.node_order.insert(seq, node.id.clone());
        self.nodes.insert(node.id.clone(), Slot { seq, value: node });
        None
    }

    fn insert_edge(&mut self, edge: Edge) -> Option<Edge> {
        let previous = if let Some(slot) = self.edges.get_mut(&edge.id) {
            Some(std::mem::replace(&mut slot.value, edge.clone()))
        } else {
            let seq = self.bump_seq();
            self.edge_order.insert(seq, edge.id.clone());
            self.edges.insert(edge.id.clone(), Slot { seq, value: edge.clone() });
            None
        };
        if let Some(prev) = previous.as_ref() {
            self.unindex_edge(prev);
        }
        for endpoint in [&edge.source, &edge.target] {
            self.incident.entry(endpoint.clone()).or_default().insert(edge.id.clone());
        }
        previous
    }

    fn unindex_edge(&mut self, edge: &Edge) {
        for endpoint in [&edge.source, &edge.target] {
            if let Some(set) = self.incident.get_mut(endpoint) {
                set.remove(&edge.id);
                if set.is_empty() {
                    self.incident.remove(endpoint);
                }
            }
        }
    }

    fn bump_seq(&mut self) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        seq
    }
}
