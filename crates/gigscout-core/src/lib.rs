//! Core domain model for the gig discovery pipeline.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const CRATE_NAME: &str = "gigscout-core";

/// Listings per page, shared by the initial load and every continuation.
pub const PAGE_SIZE: usize = 20;

const EARTH_RADIUS_KM: f64 = 6371.0;

/// A point on the globe in decimal degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    pub latitude: f64,
    pub longitude: f64,
}

impl Coordinate {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }
}

/// Great-circle distance in kilometres using the haversine formula.
///
/// Coordinates are not range-checked.
pub fn distance_km(a: Coordinate, b: Coordinate) -> f64 {
    let dlat = (b.latitude - a.latitude).to_radians();
    let dlng = (b.longitude - a.longitude).to_radians();

    let h = (dlat / 2.0).sin().powi(2)
        + a.latitude.to_radians().cos() * b.latitude.to_radians().cos() * (dlng / 2.0).sin().powi(2);

    let c = 2.0 * h.sqrt().atan2((1.0 - h).sqrt());

    EARTH_RADIUS_KM * c
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ListingStatus {
    #[default]
    Open,
    Reviewing,
    Closed,
}

impl ListingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Reviewing => "reviewing",
            Self::Closed => "closed",
        }
    }
}

impl fmt::Display for ListingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkType {
    Remote,
    Physical,
    Hybrid,
}

/// A gig post as the pipeline sees it, after boundary normalization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Listing {
    pub id: String,
    pub title: String,
    pub description: String,
    pub category: String,
    pub location_name: String,
    pub coordinate: Option<Coordinate>,
    pub budget: f64,
    pub duration: String,
    pub skills: Vec<String>,
    pub work_type: Option<WorkType>,
    pub status: ListingStatus,
    pub max_applications: Option<u32>,
    pub deadline: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Listing {
    /// Stable id for listings that never came from the remote source.
    pub fn synthetic_id(seed: &str) -> String {
        Uuid::new_v5(&Uuid::NAMESPACE_OID, seed.as_bytes()).to_string()
    }
}

/// Opaque continuation token handed out by a listing source.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Cursor(String);

impl Cursor {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum WorkTypeFilter {
    #[default]
    All,
    Remote,
    Physical,
}

impl WorkTypeFilter {
    pub fn accepts(&self, work_type: Option<WorkType>) -> bool {
        match self {
            Self::All => true,
            Self::Remote => work_type == Some(WorkType::Remote),
            Self::Physical => work_type == Some(WorkType::Physical),
        }
    }
}

/// Deadline window, measured in whole calendar days from now.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Urgency {
    #[default]
    All,
    Urgent,
    Week,
    Month,
}

impl Urgency {
    pub fn day_limit(&self) -> Option<i64> {
        match self {
            Self::All => None,
            Self::Urgent => Some(3),
            Self::Week => Some(7),
            Self::Month => Some(30),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SortCriterion {
    Newest,
    Oldest,
    BudgetHigh,
    BudgetLow,
    DeadlineSoon,
    MostApplications,
    LeastApplications,
}

impl SortCriterion {
    pub const ALL: [SortCriterion; 7] = [
        Self::Newest,
        Self::Oldest,
        Self::BudgetHigh,
        Self::BudgetLow,
        Self::DeadlineSoon,
        Self::MostApplications,
        Self::LeastApplications,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Newest => "newest",
            Self::Oldest => "oldest",
            Self::BudgetHigh => "budget-high",
            Self::BudgetLow => "budget-low",
            Self::DeadlineSoon => "deadline-soon",
            Self::MostApplications => "most-applications",
            Self::LeastApplications => "least-applications",
        }
    }
}

impl fmt::Display for SortCriterion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SortCriterion {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase().replace('_', "-");
        Self::ALL
            .into_iter()
            .find(|c| c.as_str() == wanted)
            .ok_or_else(|| format!("unknown sort criterion: {s}"))
    }
}

/// Everything the actor has chosen about which listings to see.
///
/// Empty `durations` / `skills` mean no restriction on that axis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterCriteria {
    pub search_term: String,
    /// `None` selects every category.
    pub category: Option<String>,
    pub budget_min: Option<f64>,
    pub budget_max: Option<f64>,
    pub durations: BTreeSet<String>,
    pub work_type: WorkTypeFilter,
    pub urgency: Urgency,
    pub skills: Vec<String>,
    pub nearby_only: bool,
    pub radius_km: f64,
}

impl Default for FilterCriteria {
    fn default() -> Self {
        Self {
            search_term: String::new(),
            category: None,
            budget_min: None,
            budget_max: None,
            durations: BTreeSet::new(),
            work_type: WorkTypeFilter::All,
            urgency: Urgency::All,
            skills: Vec::new(),
            nearby_only: false,
            radius_km: 50.0,
        }
    }
}

impl FilterCriteria {
    /// Search term with surrounding whitespace removed; `None` when blank.
    pub fn active_search_term(&self) -> Option<&str> {
        let term = self.search_term.trim();
        (!term.is_empty()).then_some(term)
    }

    /// Number of client-side axes currently restricting results.
    pub fn active_filter_count(&self) -> usize {
        [
            self.category.is_some(),
            self.budget_min.is_some() || self.budget_max.is_some(),
            !self.durations.is_empty(),
            self.work_type != WorkTypeFilter::All,
            self.urgency != Urgency::All,
            !self.skills.is_empty(),
            self.nearby_only,
        ]
        .into_iter()
        .filter(|active| *active)
        .count()
    }

    /// Reset the local axes; search term, category and radius are kept.
    pub fn clear_local(&mut self) {
        let radius_km = self.radius_km;
        *self = Self {
            search_term: std::mem::take(&mut self.search_term),
            category: self.category.take(),
            radius_km,
            ..Self::default()
        };
    }
}

/// The parts of a query that change what the remote source returns.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BaseQuery {
    pub status: ListingStatus,
    pub search_term: Option<String>,
    pub category: Option<String>,
}

impl BaseQuery {
    /// The unsearched, uncategorised open listing feed.
    pub fn is_default_feed(&self) -> bool {
        self.status == ListingStatus::Open && self.search_term.is_none() && self.category.is_none()
    }
}

/// Complete, serializable query intent owned by the controller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct QueryState {
    pub status: ListingStatus,
    pub criteria: FilterCriteria,
    pub sort: Option<SortCriterion>,
}

impl QueryState {
    pub fn base(&self) -> BaseQuery {
        BaseQuery {
            status: self.status,
            search_term: self.criteria.active_search_term().map(str::to_string),
            category: self.criteria.category.clone(),
        }
    }
}
