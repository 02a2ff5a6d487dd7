//! Node types: the business entities of the graph.
//!
//! Node ids are namespaced strings (`node:vendor:5000`) issued by the
//! transport. They never change; merges delete the victim id instead of
//! renaming anything.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::ValidationError;

/// Stable node identifier.
///
/// # Examples
///
/// ```
/// use spendgraph::NodeId;
///
/// let id = NodeId::vendor("5000");
/// assert_eq!(id.as_str(), "node:vendor:5000");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct NodeId(String);

impl NodeId {
    /// Creates a node id from any non-blank string.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError::EmptyId` if the value is blank.
    pub fn new(value: impl Into<String>) -> Result<Self, ValidationError> {
        let value = value.into();
        let trimmed = value.trim();
        if trimmed.is_empty() {
            return Err(ValidationError::EmptyId { field: "node id" });
        }
        if trimmed.len() == value.len() {
            Ok(Self(value))
        } else {
            Ok(Self(trimmed.to_string()))
        }
    }

    /// `node:vendor:<suffix>`
    #[must_use]
    pub fn vendor(suffix: impl fmt::Display) -> Self {
        Self(format!("node:vendor:{suffix}"))
    }

    /// `node:job:<suffix>`
    #[must_use]
    pub fn job(suffix: impl fmt::Display) -> Self {
        Self(format!("node:job:{suffix}"))
    }

    /// `node:company:<suffix>`
    #[must_use]
    pub fn company(suffix: impl fmt::Display) -> Self {
        Self(format!("node:company:{suffix}"))
    }

    /// Returns the id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for NodeId {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<NodeId> for String {
    fn from(id: NodeId) -> Self {
        id.0
    }
}

/// Classification of graph nodes.
///
/// The set is closed: every filter and decoration site matches on it
/// exhaustively, so a new kind is a compile error until each site handles it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum NodeKind {
    /// The company that owns the jobs.
    CentralCompany,
    /// A job (project) that spends money.
    Job,
    /// A vendor that is paid.
    Vendor,
}

impl NodeKind {
    /// Every node kind, in display order.
    pub const ALL: [Self; 3] = [Self::CentralCompany, Self::Job, Self::Vendor];

    /// Returns the canonical wire name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::CentralCompany => "CentralCompany",
            Self::Job => "Job",
            Self::Vendor => "Vendor",
        }
    }
}

impl TryFrom<String> for NodeKind {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl std::str::FromStr for NodeKind {
    type Err = ValidationError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let value = value.trim();
        if value.eq_ignore_ascii_case("centralcompany") || value.eq_ignore_ascii_case("central_company") {
            Ok(Self::CentralCompany)
        } else if value.eq_ignore_ascii_case("job") {
            Ok(Self::Job)
        } else if value.eq_ignore_ascii_case("vendor") {
            Ok(Self::Vendor)
        } else {
            Err(ValidationError::UnknownKind {
                what: "node kind",
                value: value.to_string(),
            })
        }
    }
}

impl From<NodeKind> for String {
    fn from(kind: NodeKind) -> Self {
        kind.as_str().to_string()
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Aggregated money flow for a node.
///
/// Derived data supplied by the transport; it can lag behind the edges.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct FlowStats {
    /// Sum of incoming transaction amounts.
    #[serde(default)]
    pub total_inflow: f64,
    /// Sum of outgoing transaction amounts.
    #[serde(default)]
    pub total_outflow: f64,
    /// `total_inflow - total_outflow`.
    #[serde(default)]
    pub net_flow: f64,
    /// Number of transactions touching the node.
    #[serde(default)]
    pub transaction_count: u64,
}

impl FlowStats {
    /// Builds stats from raw flows; `net_flow` is derived.
    #[must_use]
    pub fn new(total_inflow: f64, total_outflow: f64, transaction_count: u64) -> Self {
        Self {
            total_inflow,
            total_outflow,
            net_flow: total_inflow - total_outflow,
            transaction_count,
        }
    }

    /// Adds two aggregates.
    ///
    /// Inflow, outflow and count are summed; `net_flow` is recomputed from the
    /// sums rather than added, so a stale `net_flow` on either side is dropped.
    #[must_use]
    pub fn combine(&self, other: &Self) -> Self {
        Self::new(
            self.total_inflow + other.total_inflow,
            self.total_outflow + other.total_outflow,
            self.transaction_count + other.transaction_count,
        )
    }
}

/// A business entity in the graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    /// Globally unique identifier.
    pub id: NodeId,

    /// Kind of entity.
    #[serde(rename = "type")]
    pub kind: NodeKind,

    /// Display label.
    #[serde(default)]
    pub label: String,

    /// Kind-specific attributes (budgets for jobs, names/aliases for vendors).
    #[serde(default)]
    pub attributes: Map<String, Value>,

    /// Aggregated flows, if the transport supplied them.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stats: Option<FlowStats>,
}

impl Node {
    /// Creates a node with no attributes or stats.
    #[must_use]
    pub fn new(id: NodeId, kind: NodeKind, label: impl Into<String>) -> Self {
        Self {
            id,
            kind,
            label: label.into(),
            attributes: Map::new(),
            stats: None,
        }
    }

    /// Sets one attribute.
    #[must_use]
    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    /// Sets the aggregated stats.
    #[must_use]
    pub fn with_stats(mut self, stats: FlowStats) -> Self {
        self.stats = Some(stats);
        self
    }

    /// Looks up an attribute.
    #[must_use]
    pub fn attribute(&self, key: &str) -> Option<&Value> {
        self.attributes.get(key)
    }

    /// Stats, with missing stats treated as zero.
    #[must_use]
    pub fn stats_or_default(&self) -> FlowStats {
        self.stats.unwrap_or_default()
    }

    /// Label, falling back to the id when the label is blank.
    #[must_use]
    pub fn display_name(&self) -> &str {
        if self.label.trim().is_empty() {
            self.id.as_str()
        } else {
            &self.label
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_id_rejects_blank() {
        assert!(NodeId::new("").is_err());
        assert!(NodeId::new("   ").is_err());
        assert_eq!(NodeId::new(" node:job:1 ").unwrap().as_str(), "node:job:1");
    }

    #[test]
    fn test_node_id_namespaces() {
        assert_eq!(NodeId::vendor(5000).as_str(), "node:vendor:5000");
        assert_eq!(NodeId::job("12").as_str(), "node:job:12");
        assert_eq!(NodeId::company("apw").as_str(), "node:company:apw");
    }

    #[test]
    fn test_node_kind_parse_is_case_insensitive() {
        assert_eq!("vendor".parse::<NodeKind>().unwrap(), NodeKind::Vendor);
        assert_eq!("JOB".parse::<NodeKind>().unwrap(), NodeKind::Job);
        assert_eq!(
            "CentralCompany".parse::<NodeKind>().unwrap(),
            NodeKind::CentralCompany
        );
        assert!("warehouse".parse::<NodeKind>().is_err());
    }

    #[test]
    fn test_node_kind_serde_is_string() {
        let json = serde_json::to_value(NodeKind::CentralCompany).unwrap();
        assert_eq!(json, Value::String("CentralCompany".to_string()));

        let parsed: NodeKind = serde_json::from_str("\"vendor\"").unwrap();
        assert_eq!(parsed, NodeKind::Vendor);

        let unknown: Result<NodeKind, _> = serde_json::from_str("\"Vendr\"");
        assert!(unknown.is_err());
    }

    #[test]
    fn test_flow_stats_combine_recomputes_net() {
        let a = FlowStats {
            total_inflow: 100.0,
            total_outflow: 40.0,
            // Deliberately wrong: combine must not trust it.
            net_flow: 9999.0,
            transaction_count: 2,
        };
        let b = FlowStats::new(0.0, 500.0, 1);
        let c = a.combine(&b);
        assert_eq!(c.total_inflow, 100.0);
        assert_eq!(c.total_outflow, 540.0);
        assert_eq!(c.net_flow, -440.0);
        assert_eq!(c.transaction_count, 3);
    }

    #[test]
    fn test_node_deserializes_transport_shape() {
        let json = r#"{
            "id": "node:job:7",
            "type": "Job",
            "label": "Riverside Remodel",
            "attributes": {"original_budget": 120000, "current_budget": 135000, "completion": 0.4},
            "stats": {"total_inflow": 0, "total_outflow": 5000, "net_flow": -5000, "transaction_count": 3}
        }"#;
        let node: Node = serde_json::from_str(json).unwrap();
        assert_eq!(node.kind, NodeKind::Job);
        assert_eq!(node.attribute("completion"), Some(&serde_json::json!(0.4)));
        assert_eq!(node.stats.unwrap().transaction_count, 3);
    }

    #[test]
    fn test_node_rejects_empty_id_on_deserialize() {
        let json = r#"{"id": "", "type": "Vendor"}"#;
        assert!(serde_json::from_str::<Node>(json).is_err());
    }

    #[test]
    fn test_display_name_falls_back_to_id() {
        let node = Node::new(NodeId::vendor(1), NodeKind::Vendor, " ");
        assert_eq!(node.display_name(), "node:vendor:1");
    }
}
