//! Filter configuration.
//!
//! A `FilterConfig` is plain session state: created with defaults, mutated by
//! user actions through validating setters, never persisted. The predicates
//! here are the per-stage tests used by [`crate::view::derive_view_graph`].

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::edge::{Edge, EdgeKind, EdgeStatus};
use crate::error::ValidationError;
use crate::node::NodeKind;
use crate::time::{rolling_cutoff, validate_window, DateRange, MAX_WINDOW_MONTHS};
use crate::transport::EdgeQuery;

/// Key of the type-visibility map: a node kind or an edge kind.
///
/// Serialized as the bare kind name; node and edge kind names never collide.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum KindKey {
    /// A node kind.
    Node(NodeKind),
    /// An edge kind.
    Edge(EdgeKind),
}

impl From<NodeKind> for KindKey {
    fn from(kind: NodeKind) -> Self {
        Self::Node(kind)
    }
}

impl From<EdgeKind> for KindKey {
    fn from(kind: EdgeKind) -> Self {
        Self::Edge(kind)
    }
}

impl std::str::FromStr for KindKey {
    type Err = ValidationError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        if let Ok(kind) = value.parse::<NodeKind>() {
            return Ok(Self::Node(kind));
        }
        if let Ok(kind) = value.parse::<EdgeKind>() {
            return Ok(Self::Edge(kind));
        }
        Err(ValidationError::UnknownKind {
            what: "node or edge kind",
            value: value.trim().to_string(),
        })
    }
}

impl TryFrom<String> for KindKey {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<KindKey> for String {
    fn from(key: KindKey) -> Self {
        key.to_string()
    }
}

impl fmt::Display for KindKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Node(kind) => f.write_str(kind.as_str()),
            Self::Edge(kind) => f.write_str(kind.as_str()),
        }
    }
}

/// Inclusive amount bounds. Either bound may be open.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct AmountRange {
    /// Smallest included amount.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    /// Largest included amount.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
}

impl AmountRange {
    /// Creates a validated range.
    ///
    /// # Errors
    ///
    /// - `ValidationError::InvalidAmount` for a negative or non-finite bound
    /// - `ValidationError::InvalidAmountRange` if `min > max`
    pub fn new(min: Option<f64>, max: Option<f64>) -> Result<Self, ValidationError> {
        let range = Self { min, max };
        range.validate()?;
        Ok(range)
    }

    /// A range with no bounds.
    #[must_use]
    pub const fn unbounded() -> Self {
        Self { min: None, max: None }
    }

    /// Returns true if neither bound is set.
    #[must_use]
    pub const fn is_unbounded(&self) -> bool {
        self.min.is_none() && self.max.is_none()
    }

    /// Returns true if `amount` lies within both bounds.
    #[must_use]
    pub fn contains(&self, amount: f64) -> bool {
        self.min.map_or(true, |min| amount >= min) && self.max.map_or(true, |max| amount <= max)
    }

    /// Checks bound values and ordering.
    ///
    /// # Errors
    ///
    /// See [`AmountRange::new`].
    pub fn validate(&self) -> Result<(), ValidationError> {
        for value in [self.min, self.max].into_iter().flatten() {
            if !value.is_finite() || value < 0.0 {
                return Err(ValidationError::InvalidAmount { value });
            }
        }
        match (self.min, self.max) {
            (Some(min), Some(max)) if min > max => Err(ValidationError::InvalidAmountRange { min, max }),
            _ => Ok(()),
        }
    }
}

fn default_window() -> u32 {
    MAX_WINDOW_MONTHS
}

fn default_statuses() -> BTreeSet<EdgeStatus> {
    EdgeStatus::ALL.into_iter().collect()
}

/// User-adjustable filter dimensions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterConfig {
    /// Trailing window, in months (`1..=12`).
    #[serde(default = "default_window")]
    pub rolling_window_months: u32,

    /// Statuses shown. Edges without a status always pass.
    #[serde(default = "default_statuses")]
    pub statuses: BTreeSet<EdgeStatus>,

    /// Per-kind visibility. A kind with no entry is visible.
    #[serde(default)]
    pub type_visibility: BTreeMap<KindKey, bool>,

    /// Absolute date bounds, conjunctive with the rolling window.
    #[serde(default)]
    pub date_range: DateRange,

    /// Amount bounds.
    #[serde(default)]
    pub amount_range: AmountRange,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            type_visibility: BTreeMap::new(),
            rolling_window_months: default_window(),
            date_range: DateRange::unbounded(),
            amount_range: AmountRange::unbounded(),
            statuses: default_statuses(),
        }
    }
}

impl FilterConfig {
    /// Shows or hides a kind.
    pub fn set_visibility(&mut self, key: impl Into<KindKey>, visible: bool) {
        self.type_visibility.insert(key.into(), visible);
    }

    /// Returns true unless the kind is explicitly hidden.
    #[must_use]
    pub fn is_visible(&self, key: impl Into<KindKey>) -> bool {
        self.type_visibility.get(&key.into()).copied().unwrap_or(true)
    }

    /// Sets the rolling window.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError::WindowOutOfRange` outside `1..=12`; the
    /// config is unchanged.
    pub fn set_rolling_window(&mut self, months: u32) -> Result<(), ValidationError> {
        self.rolling_window_months = validate_window(months)?;
        Ok(())
    }

    /// Sets the absolute date range.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError::InvalidDateRange` if inverted.
    pub fn set_date_range(&mut self, range: DateRange) -> Result<(), ValidationError> {
        range.validate()?;
        self.date_range = range;
        Ok(())
    }

    /// Sets the amount range.
    ///
    /// # Errors
    ///
    /// See [`AmountRange::new`].
    pub fn set_amount_range(&mut self, range: AmountRange) -> Result<(), ValidationError> {
        range.validate()?;
        self.amount_range = range;
        Ok(())
    }

    /// Replaces the shown status set.
    pub fn set_statuses(&mut self, statuses: impl IntoIterator<Item = EdgeStatus>) {
        self.statuses = statuses.into_iter().collect();
    }

    /// Checks every dimension; used after deserializing.
    ///
    /// # Errors
    ///
    /// Returns the first invalid dimension.
    pub fn validate(&self) -> Result<(), ValidationError> {
        validate_window(self.rolling_window_months)?;
        self.date_range.validate()?;
        self.amount_range.validate()
    }

    /// Dated edges must fall inside the rolling window and the absolute
    /// range. Dateless edges always pass.
    #[must_use]
    pub fn passes_temporal(&self, edge: &Edge, today: NaiveDate) -> bool {
        let Some(date) = edge.date() else {
            return true;
        };
        date >= rolling_cutoff(today, self.rolling_window_months) && self.date_range.contains(date)
    }

    /// Amount range, then status set.
    #[must_use]
    pub fn passes_attributes(&self, edge: &Edge) -> bool {
        if !self.amount_range.contains(edge.amount()) {
            return false;
        }
        edge.attributes
            .status
            .map_or(true, |status| self.statuses.contains(&status))
    }

    /// The part of this filter a transport can apply server-side.
    #[must_use]
    pub fn edge_query(&self) -> EdgeQuery {
        EdgeQuery {
            date_range: self.date_range,
            amount_range: self.amount_range,
        }
    }
}
