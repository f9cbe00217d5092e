//! External collaborator contracts + fixture, HTTP and fallback implementations.

use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, Utc};
use gigscout_core::{Coordinate, Cursor, Listing, ListingStatus, WorkType};
use gigscout_storage::{ApiClient, FetchError, HttpClientConfig, Url};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

pub const CRATE_NAME: &str = "gigscout-adapters";

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("listing source unavailable: {0}")]
    Unavailable(String),
    #[error("malformed listing record {id}: {reason}")]
    Decode { id: String, reason: String },
    #[error("not found: {0}")]
    NotFound(String),
    #[error("unknown cursor {0}")]
    InvalidCursor(String),
}

impl From<FetchError> for SourceError {
    fn from(err: FetchError) -> Self {
        if err.is_not_found() {
            Self::NotFound(err.to_string())
        } else {
            Self::Unavailable(err.to_string())
        }
    }
}

/// One page of a status-filtered listing feed.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ListingPage {
    pub listings: Vec<Listing>,
    pub cursor: Option<Cursor>,
}

/// Remote store of listings, searched and paged by the discovery pipeline.
#[async_trait]
pub trait ListingSource: Send + Sync {
    fn source_id(&self) -> &'static str;

    async fn fetch_by_status(
        &self,
        status: ListingStatus,
        page_size: usize,
        cursor: Option<&Cursor>,
    ) -> Result<ListingPage, SourceError>;

    async fn search(
        &self,
        term: &str,
        category: Option<&str>,
        limit: usize,
    ) -> Result<Vec<Listing>, SourceError>;

    async fn count_applications(&self, listing_id: &str) -> Result<u32, SourceError>;

    async fn has_applied(&self, listing_id: &str, actor_id: &str) -> Result<bool, SourceError>;

    /// Continuation token that resumes the feed right after `listing`.
    fn cursor_after(&self, listing: &Listing) -> Option<Cursor> {
        Some(Cursor::new(listing.id.clone()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LocationPermission {
    Granted,
    Denied,
    Pending,
}

#[async_trait]
pub trait LocationService: Send + Sync {
    async fn permission(&self) -> LocationPermission;

    /// `None` whenever permission is not granted or no fix is available.
    async fn current_coordinate(&self) -> Option<Coordinate>;
}

/// Location service with a fixed answer, for the CLI and tests.
#[derive(Debug, Clone, Copy)]
pub struct StaticLocation {
    permission: LocationPermission,
    coordinate: Option<Coordinate>,
}

impl StaticLocation {
    pub fn granted(coordinate: Coordinate) -> Self {
        Self {
            permission: LocationPermission::Granted,
            coordinate: Some(coordinate),
        }
    }

    pub fn denied() -> Self {
        Self {
            permission: LocationPermission::Denied,
            coordinate: None,
        }
    }

    pub fn pending() -> Self {
        Self {
            permission: LocationPermission::Pending,
            coordinate: None,
        }
    }
}

#[async_trait]
impl LocationService for StaticLocation {
    async fn permission(&self) -> LocationPermission {
        self.permission
    }

    async fn current_coordinate(&self) -> Option<Coordinate> {
        match self.permission {
            LocationPermission::Granted => self.coordinate,
            _ => None,
        }
    }
}

/// Supplies the listings shown when the source cannot be reached.
pub trait FallbackProvider: Send + Sync {
    fn fallback_listings(&self, now: DateTime<Utc>) -> Vec<Listing>;
}

/// Fallback that yields nothing; the view then reports no matches.
#[derive(Debug, Default, Clone, Copy)]
pub struct DisabledFallback;

impl FallbackProvider for DisabledFallback {
    fn fallback_listings(&self, _now: DateTime<Utc>) -> Vec<Listing> {
        Vec::new()
    }
}

/// Built-in demo listings. Same `now`, same output.
#[derive(Debug, Default, Clone, Copy)]
pub struct DemoFallback;

struct DemoSeed {
    title: &'static str,
    category: &'static str,
    location: &'static str,
    coordinate: Option<(f64, f64)>,
    budget: f64,
    duration: &'static str,
    skills: &'static [&'static str],
    work_type: WorkType,
    deadline_days: Option<i64>,
    age_days: i64,
}

const DEMO_SEEDS: &[DemoSeed] = &[
    DemoSeed {
        title: "Website landing page refresh",
        category: "tech",
        location: "Remote",
        coordinate: None,
        budget: 8000.0,
        duration: "1 week",
        skills: &["HTML", "CSS", "Figma"],
        work_type: WorkType::Remote,
        deadline_days: Some(5),
        age_days: 1,
    },
    DemoSeed {
        title: "Garden clean-up in Sandton",
        category: "home",
        location: "Johannesburg",
        coordinate: Some((-26.1076, 28.0567)),
        budget: 1500.0,
        duration: "1 day",
        skills: &["Gardening"],
        work_type: WorkType::Physical,
        deadline_days: Some(2),
        age_days: 2,
    },
    DemoSeed {
        title: "Event photographer for product launch",
        category: "creative",
        location: "Cape Town",
        coordinate: Some((-33.9249, 18.4241)),
        budget: 6500.0,
        duration: "1 day",
        skills: &["Photography", "Lightroom"],
        work_type: WorkType::Physical,
        deadline_days: Some(12),
        age_days: 3,
    },
    DemoSeed {
        title: "Maths tutor for grade 11 learner",
        category: "education",
        location: "Pretoria",
        coordinate: Some((-25.7479, 28.2293)),
        budget: 3500.0,
        duration: "1 month",
        skills: &["Mathematics", "Tutoring"],
        work_type: WorkType::Hybrid,
        deadline_days: None,
        age_days: 4,
    },
    DemoSeed {
        title: "Social media content calendar",
        category: "marketing",
        location: "Remote",
        coordinate: None,
        budget: 5000.0,
        duration: "2 weeks",
        skills: &["Copywriting", "Canva"],
        work_type: WorkType::Remote,
        deadline_days: Some(20),
        age_days: 5,
    },
    DemoSeed {
        title: "Delivery driver for weekend market",
        category: "transport",
        location: "Durban",
        coordinate: Some((-29.8587, 31.0218)),
        budget: 1200.0,
        duration: "1 day",
        skills: &["Driving"],
        work_type: WorkType::Physical,
        deadline_days: Some(1),
        age_days: 6,
    },
];

impl FallbackProvider for DemoFallback {
    fn fallback_listings(&self, now: DateTime<Utc>) -> Vec<Listing> {
        DEMO_SEEDS
            .iter()
            .map(|seed| {
                let created_at = now - Duration::days(seed.age_days);
                Listing {
                    id: Listing::synthetic_id(seed.title),
                    title: seed.title.to_string(),
                    description: format!("{} ({})", seed.title, seed.location),
                    category: seed.category.to_string(),
                    location_name: seed.location.to_string(),
                    coordinate: seed.coordinate.map(|(lat, lng)| Coordinate::new(lat, lng)),
                    budget: seed.budget,
                    duration: seed.duration.to_string(),
                    skills: seed.skills.iter().map(|s| s.to_string()).collect(),
                    work_type: Some(seed.work_type),
                    status: ListingStatus::Open,
                    max_applications: None,
                    deadline: seed.deadline_days.map(|days| now + Duration::days(days)),
                    created_at,
                    updated_at: created_at,
                }
            })
            .collect()
    }
}

/// Fallback listings loaded once from a YAML list of listing records.
#[derive(Debug, Clone)]
pub struct YamlFallback {
    listings: Vec<Listing>,
}

impl YamlFallback {
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
        let records: Vec<ListingRecord> =
            serde_yaml::from_str(&text).with_context(|| format!("parsing {}", path.display()))?;
        let listings = records
            .into_iter()
            .map(ListingRecord::into_listing)
            .collect::<Result<Vec<_>, _>>()
            .with_context(|| format!("normalizing {}", path.display()))?;
        Ok(Self { listings })
    }
}

impl FallbackProvider for YamlFallback {
    fn fallback_listings(&self, _now: DateTime<Utc>) -> Vec<Listing> {
        self.listings.clone()
    }
}

/// Timestamp shapes seen on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawTimestamp {
    Parts {
        seconds: i64,
        #[serde(default, alias = "nanoseconds")]
        nanos: u32,
    },
    Millis(i64),
    Text(String),
}

/// Normalize any wire timestamp to a UTC instant; `None` if unparseable.
pub fn to_instant(value: &RawTimestamp) -> Option<DateTime<Utc>> {
    match value {
        RawTimestamp::Parts { seconds, nanos } => DateTime::from_timestamp(*seconds, *nanos),
        RawTimestamp::Millis(ms) => DateTime::from_timestamp_millis(*ms),
        RawTimestamp::Text(text) => {
            let text = text.trim();
            if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
                return Some(dt.with_timezone(&Utc));
            }
            if let Ok(naive) = NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S") {
                return Some(naive.and_utc());
            }
            NaiveDate::parse_from_str(text, "%Y-%m-%d")
                .ok()
                .and_then(|date| date.and_hms_opt(0, 0, 0))
                .map(|naive| naive.and_utc())
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawCoordinates {
    #[serde(default, alias = "latitude")]
    pub lat: Option<f64>,
    #[serde(default, alias = "longitude", alias = "lon")]
    pub lng: Option<f64>,
}

/// Listing as delivered by a source, before normalization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListingRecord {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub location: String,
    #[serde(default)]
    pub coordinates: Option<RawCoordinates>,
    #[serde(default)]
    pub budget: f64,
    #[serde(default)]
    pub duration: String,
    #[serde(default)]
    pub skills: Vec<String>,
    #[serde(default)]
    pub work_type: Option<WorkType>,
    #[serde(default)]
    pub status: ListingStatus,
    #[serde(default)]
    pub max_applications: Option<u32>,
    #[serde(default)]
    pub deadline: Option<RawTimestamp>,
    #[serde(default)]
    pub created_at: Option<RawTimestamp>,
    #[serde(default)]
    pub updated_at: Option<RawTimestamp>,
}

impl ListingRecord {
    pub fn into_listing(self) -> Result<Listing, SourceError> {
        if !self.budget.is_finite() || self.budget < 0.0 {
            return Err(SourceError::Decode {
                id: self.id,
                reason: format!("budget {} is not a non-negative amount", self.budget),
            });
        }

        let coordinate = match self.coordinates {
            Some(RawCoordinates {
                lat: Some(lat),
                lng: Some(lng),
            }) => Some(Coordinate::new(lat, lng)),
            _ => None,
        };

        let deadline = match &self.deadline {
            Some(raw) => Some(to_instant(raw).ok_or_else(|| SourceError::Decode {
                id: self.id.clone(),
                reason: format!("unparseable deadline {raw:?}"),
            })?),
            None => None,
        };
        let created_at = self
            .created_at
            .as_ref()
            .and_then(to_instant)
            .unwrap_or(DateTime::<Utc>::UNIX_EPOCH);
        let updated_at = self
            .updated_at
            .as_ref()
            .and_then(to_instant)
            .unwrap_or(created_at);

        Ok(Listing {
            id: self.id,
            title: self.title,
            description: self.description,
            category: self.category,
            location_name: self.location,
            coordinate,
            budget: self.budget,
            duration: self.duration,
            skills: self.skills,
            work_type: self.work_type,
            status: self.status,
            max_applications: self.max_applications,
            deadline,
            created_at,
            updated_at,
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct FixtureFile {
    pub listings: Vec<ListingRecord>,
    /// Listing id to the actors who applied to it.
    #[serde(default)]
    pub applications: HashMap<String, Vec<String>>,
}

/// In-memory source backed by a JSON fixture file.
///
/// Feeds are ordered newest first; cursors are listing ids.
#[derive(Debug, Clone, Default)]
pub struct FixtureListingSource {
    listings: Vec<Listing>,
    applications: HashMap<String, HashSet<String>>,
}

impl FixtureListingSource {
    pub fn new(mut listings: Vec<Listing>, applications: HashMap<String, Vec<String>>) -> Self {
        listings.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        let applications = applications
            .into_iter()
            .map(|(id, actors)| (id, actors.into_iter().collect()))
            .collect();
        Self {
            listings,
            applications,
        }
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file: FixtureFile = read_json_file(path)?;
        let listings = file
            .listings
            .into_iter()
            .map(ListingRecord::into_listing)
            .collect::<Result<Vec<_>, _>>()
            .with_context(|| format!("normalizing {}", path.display()))?;
        Ok(Self::new(listings, file.applications))
    }

    pub fn len(&self) -> usize {
        self.listings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.listings.is_empty()
    }
}

fn read_json_file<T: DeserializeOwned>(path: impl AsRef<Path>) -> Result<T> {
    let path = path.as_ref();
    let data = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&data).with_context(|| format!("parsing {}", path.display()))
}

fn listing_mentions(listing: &Listing, needle_lower: &str) -> bool {
    [
        listing.title.as_str(),
        listing.description.as_str(),
        listing.category.as_str(),
        listing.location_name.as_str(),
    ]
    .into_iter()
    .chain(listing.skills.iter().map(String::as_str))
    .any(|text| text.to_lowercase().contains(needle_lower))
}

#[async_trait]
impl ListingSource for FixtureListingSource {
    fn source_id(&self) -> &'static str {
        "fixture"
    }

    async fn fetch_by_status(
        &self,
        status: ListingStatus,
        page_size: usize,
        cursor: Option<&Cursor>,
    ) -> Result<ListingPage, SourceError> {
        let feed: Vec<&Listing> = self.listings.iter().filter(|l| l.status == status).collect();
        let start = match cursor {
            None => 0,
            Some(cursor) => feed
                .iter()
                .position(|l| l.id == cursor.as_str())
                .map(|idx| idx + 1)
                .ok_or_else(|| SourceError::InvalidCursor(cursor.as_str().to_string()))?,
        };

        let listings: Vec<Listing> = feed
            .iter()
            .skip(start)
            .take(page_size)
            .map(|l| (*l).clone())
            .collect();
        let cursor = if start + listings.len() < feed.len() {
            listings.last().and_then(|l| self.cursor_after(l))
        } else {
            None
        };
        debug!(%status, start, returned = listings.len(), "fixture page served");
        Ok(ListingPage { listings, cursor })
    }

    async fn search(
        &self,
        term: &str,
        category: Option<&str>,
        limit: usize,
    ) -> Result<Vec<Listing>, SourceError> {
        let needle = term.trim().to_lowercase();
        Ok(self
            .listings
            .iter()
            .filter(|l| l.status == ListingStatus::Open)
            .filter(|l| category.map_or(true, |c| l.category == c))
            .filter(|l| listing_mentions(l, &needle))
            .take(limit)
            .cloned()
            .collect())
    }

    async fn count_applications(&self, listing_id: &str) -> Result<u32, SourceError> {
        Ok(self
            .applications
            .get(listing_id)
            .map_or(0, |actors| actors.len() as u32))
    }

    async fn has_applied(&self, listing_id: &str, actor_id: &str) -> Result<bool, SourceError> {
        Ok(self
            .applications
            .get(listing_id)
            .is_some_and(|actors| actors.contains(actor_id)))
    }
}

#[derive(Debug, Deserialize)]
struct PageResponse {
    listings: Vec<ListingRecord>,
    #[serde(default)]
    next_cursor: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    listings: Vec<ListingRecord>,
}

#[derive(Debug, Deserialize)]
struct CountResponse {
    count: u32,
}

#[derive(Debug, Deserialize)]
struct AppliedResponse {
    applied: bool,
}

/// Listing source speaking the JSON REST contract of the listings service.
#[derive(Debug, Clone)]
pub struct HttpListingSource {
    base_url: Url,
    client: ApiClient,
}

impl HttpListingSource {
    pub fn new(base_url: impl Into<String>, config: HttpClientConfig) -> Result<Self> {
        let raw = base_url.into();
        let base_url = Url::parse(raw.trim()).with_context(|| format!("parsing base url {raw}"))?;
        if base_url.cannot_be_a_base() {
            anyhow::bail!("base url {raw} cannot carry a path");
        }
        let client = ApiClient::new(config)?;
        Ok(Self { base_url, client })
    }

    pub fn base_url(&self) -> &str {
        self.base_url.as_str()
    }

    /// Append percent-encoded path segments to the base url.
    fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }
}

/// Malformed records are dropped so one bad row cannot sink a page.
fn normalize_records(records: Vec<ListingRecord>) -> Vec<Listing> {
    records
        .into_iter()
        .filter_map(|record| match record.into_listing() {
            Ok(listing) => Some(listing),
            Err(err) => {
                warn!(error = %err, "skipping malformed listing record");
                None
            }
        })
        .collect()
}

#[async_trait]
impl ListingSource for HttpListingSource {
    fn source_id(&self) -> &'static str {
        "http"
    }

    async fn fetch_by_status(
        &self,
        status: ListingStatus,
        page_size: usize,
        cursor: Option<&Cursor>,
    ) -> Result<ListingPage, SourceError> {
        let mut query = vec![
            ("status", status.as_str().to_string()),
            ("limit", page_size.to_string()),
        ];
        if let Some(cursor) = cursor {
            query.push(("cursor", cursor.as_str().to_string()));
        }
        let url = self.endpoint(&["listings"]);
        let resp: PageResponse = self.client.get_json(url.as_str(), &query).await?;
        Ok(ListingPage {
            listings: normalize_records(resp.listings),
            cursor: resp.next_cursor.map(Cursor::new),
        })
    }

    async fn search(
        &self,
        term: &str,
        category: Option<&str>,
        limit: usize,
    ) -> Result<Vec<Listing>, SourceError> {
        let mut query = vec![("q", term.to_string()), ("limit", limit.to_string())];
        if let Some(category) = category {
            query.push(("category", category.to_string()));
        }
        let url = self.endpoint(&["listings", "search"]);
        let resp: SearchResponse = self.client.get_json(url.as_str(), &query).await?;
        Ok(normalize_records(resp.listings))
    }

    async fn count_applications(&self, listing_id: &str) -> Result<u32, SourceError> {
        let url = self.endpoint(&["listings", listing_id, "applications", "count"]);
        let resp: CountResponse = self.client.get_json(url.as_str(), &[]).await?;
        Ok(resp.count)
    }

    async fn has_applied(&self, listing_id: &str, actor_id: &str) -> Result<bool, SourceError> {
        let url = self.endpoint(&["listings", listing_id, "applications", actor_id]);
        match self.client.get_json::<AppliedResponse>(url.as_str(), &[]).await {
            Ok(resp) => Ok(resp.applied),
            Err(err) if err.is_not_found() => Ok(false),
            Err(err) => Err(err.into()),
        }
    }
}
