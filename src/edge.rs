//! Edge types: directed financial transactions between nodes.

use std::fmt;

use chrono::NaiveDate;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::error::ValidationError;
use crate::node::NodeId;

/// Stable edge identifier.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct EdgeId(String);

impl EdgeId {
    /// Creates an edge id from any non-blank string.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError::EmptyId` if the value is blank.
    pub fn new(value: impl Into<String>) -> Result<Self, ValidationError> {
        let value = value.into();
        let trimmed = value.trim();
        if trimmed.is_empty() {
            return Err(ValidationError::EmptyId { field: "edge id" });
        }
        Ok(Self(trimmed.to_string()))
    }

    /// Generates a fresh `edge:txn:<uuid>` id.
    #[must_use]
    pub fn generate() -> Self {
        Self(format!("edge:txn:{}", Uuid::new_v4()))
    }

    /// Returns the id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EdgeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for EdgeId {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<EdgeId> for String {
    fn from(id: EdgeId) -> Self {
        id.0
    }
}

/// Classification of transactions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum EdgeKind {
    /// A vendor invoice against a job.
    Invoice,
    /// A payment.
    Payment,
}

impl EdgeKind {
    /// Every edge kind, in display order.
    pub const ALL: [Self; 2] = [Self::Invoice, Self::Payment];

    /// Returns the canonical wire name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Invoice => "Invoice",
            Self::Payment => "Payment",
        }
    }
}

impl std::str::FromStr for EdgeKind {
    type Err = ValidationError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let value = value.trim();
        if value.eq_ignore_ascii_case("invoice") {
            Ok(Self::Invoice)
        } else if value.eq_ignore_ascii_case("payment") {
            Ok(Self::Payment)
        } else {
            Err(ValidationError::UnknownKind {
                what: "edge kind",
                value: value.to_string(),
            })
        }
    }
}

impl TryFrom<String> for EdgeKind {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<EdgeKind> for String {
    fn from(kind: EdgeKind) -> Self {
        kind.as_str().to_string()
    }
}

impl fmt::Display for EdgeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Approval status of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeStatus {
    /// Awaiting review.
    Pending,
    /// Approved for payment.
    Approved,
    /// Reviewed and not approved.
    Unapproved,
}

impl EdgeStatus {
    /// Every status.
    pub const ALL: [Self; 3] = [Self::Pending, Self::Approved, Self::Unapproved];
}

impl fmt::Display for EdgeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Approved => write!(f, "approved"),
            Self::Unapproved => write!(f, "unapproved"),
        }
    }
}

/// Accepts `YYYY-MM-DD` or any ISO-8601 timestamp starting with one; blank is `None`.
fn deserialize_date<'de, D>(deserializer: D) -> Result<Option<NaiveDate>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    let Some(raw) = raw else {
        return Ok(None);
    };
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(None);
    }
    let day = raw.get(..10).unwrap_or(raw);
    NaiveDate::parse_from_str(day, "%Y-%m-%d")
        .map(Some)
        .map_err(|e| serde::de::Error::custom(format!("invalid date {raw:?}: {e}")))
}

/// Transaction attributes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EdgeAttributes {
    /// Transaction amount; never negative.
    #[serde(default)]
    pub amount: f64,

    /// Calendar date of the transaction. Dateless edges are never time-filtered.
    #[serde(
        default,
        deserialize_with = "deserialize_date",
        skip_serializing_if = "Option::is_none"
    )]
    pub date: Option<NaiveDate>,

    /// Approval status.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<EdgeStatus>,

    /// Everything else the transport sent (currency, source ids, ...).
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A directed transaction between two nodes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Edge {
    /// Globally unique identifier.
    pub id: EdgeId,

    /// Kind of transaction.
    #[serde(rename = "type")]
    pub kind: EdgeKind,

    /// Paying / originating node.
    #[serde(alias = "from_node")]
    pub source: NodeId,

    /// Receiving node.
    #[serde(alias = "to_node")]
    pub target: NodeId,

    /// Amount, date, status and extras.
    #[serde(default)]
    pub attributes: EdgeAttributes,
}

impl Edge {
    /// Creates an edge with zero amount, no date and no status.
    #[must_use]
    pub fn new(id: EdgeId, kind: EdgeKind, source: NodeId, target: NodeId) -> Self {
        Self {
            id,
            kind,
            source,
            target,
            attributes: EdgeAttributes::default(),
        }
    }

    /// Sets the amount.
    #[must_use]
    pub fn with_amount(mut self, amount: f64) -> Self {
        self.attributes.amount = amount;
        self
    }

    /// Sets the date.
    #[must_use]
    pub fn with_date(mut self, date: NaiveDate) -> Self {
        self.attributes.date = Some(date);
        self
    }

    /// Sets the status.
    #[must_use]
    pub fn with_status(mut self, status: EdgeStatus) -> Self {
        self.attributes.status = Some(status);
        self
    }

    /// Sets one extra attribute.
    #[must_use]
    pub fn with_extra(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.attributes.extra.insert(key.into(), value.into());
        self
    }

    /// Amount of the transaction.
    #[must_use]
    pub fn amount(&self) -> f64 {
        self.attributes.amount
    }

    /// Date of the transaction, if known.
    #[must_use]
    pub fn date(&self) -> Option<NaiveDate> {
        self.attributes.date
    }

    /// Returns true if either endpoint is `node`.
    #[must_use]
    pub fn touches(&self, node: &NodeId) -> bool {
        &self.source == node || &self.target == node
    }

    /// Checks value constraints that serde cannot express.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError::InvalidAmount` for negative or non-finite amounts.
    pub fn validate(&self) -> Result<(), ValidationError> {
        let amount = self.attributes.amount;
        if !amount.is_finite() || amount < 0.0 {
            return Err(ValidationError::InvalidAmount { value: amount });
        }
        Ok(())
    }
}
