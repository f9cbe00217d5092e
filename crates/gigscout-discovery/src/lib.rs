//! Gig discovery pipeline: filtering, sorting, pagination, caching and the
//! debounced query controller that ties them together.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use gigscout_adapters::{
    DemoFallback, FallbackProvider, FixtureListingSource, HttpListingSource, ListingSource,
    LocationService, StaticLocation, YamlFallback,
};
use gigscout_core::Coordinate;
use gigscout_storage::HttpClientConfig;
use tracing::info;

pub mod auxiliary;
pub mod controller;
pub mod debounce;
pub mod filter;
pub mod pagination;
pub mod sort;

pub use auxiliary::AuxiliaryData;
pub use controller::{
    ControllerDeps, DiscoveryController, ListingView, LoadMoreOutcome, ViewModel, ViewState,
};
pub use debounce::Concern;
pub use filter::FilterContext;
pub use pagination::{PageState, Paginator};

pub const CRATE_NAME: &str = "gigscout-discovery";

#[derive(Debug, Clone)]
pub struct DiscoveryConfig {
    pub cache_ttl: Duration,
    pub search_debounce: Duration,
    pub location_debounce: Duration,
    pub filter_debounce: Duration,
    pub default_radius_km: f64,
    pub actor_id: Option<String>,
    pub source_url: Option<String>,
    pub fixture_path: PathBuf,
    pub fallback_path: Option<PathBuf>,
    /// Stand-in for a device location fix; permission is denied when unset.
    pub reference_coordinate: Option<Coordinate>,
    pub http_timeout_secs: u64,
    pub user_agent: String,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            cache_ttl: Duration::from_secs(300),
            search_debounce: Duration::from_millis(500),
            location_debounce: Duration::from_millis(300),
            filter_debounce: Duration::from_millis(150),
            default_radius_km: 50.0,
            actor_id: None,
            source_url: None,
            fixture_path: PathBuf::from("fixtures/listings.json"),
            fallback_path: None,
            reference_coordinate: None,
            http_timeout_secs: 20,
            user_agent: "gigscout/0.1".to_string(),
        }
    }
}

fn env_millis(name: &str, default: Duration) -> Duration {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .map(Duration::from_millis)
        .unwrap_or(default)
}

fn env_nonempty(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Parse `"lat,lng"`.
pub fn parse_coordinate(text: &str) -> Option<Coordinate> {
    let (lat, lng) = text.split_once(',')?;
    Some(Coordinate::new(lat.trim().parse().ok()?, lng.trim().parse().ok()?))
}

impl DiscoveryConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            cache_ttl: std::env::var("GIGSCOUT_CACHE_TTL_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.cache_ttl),
            search_debounce: env_millis("GIGSCOUT_SEARCH_DEBOUNCE_MS", defaults.search_debounce),
            location_debounce: env_millis(
                "GIGSCOUT_LOCATION_DEBOUNCE_MS",
                defaults.location_debounce,
            ),
            filter_debounce: env_millis("GIGSCOUT_FILTER_DEBOUNCE_MS", defaults.filter_debounce),
            default_radius_km: std::env::var("GIGSCOUT_DEFAULT_RADIUS_KM")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.default_radius_km),
            actor_id: env_nonempty("GIGSCOUT_ACTOR_ID"),
            source_url: env_nonempty("GIGSCOUT_SOURCE_URL"),
            fixture_path: env_nonempty("GIGSCOUT_FIXTURE_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.fixture_path),
            fallback_path: env_nonempty("GIGSCOUT_FALLBACK_PATH").map(PathBuf::from),
            reference_coordinate: env_nonempty("GIGSCOUT_REFERENCE_COORDINATE")
                .as_deref()
                .and_then(parse_coordinate),
            http_timeout_secs: std::env::var("GIGSCOUT_HTTP_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.http_timeout_secs),
            user_agent: env_nonempty("GIGSCOUT_USER_AGENT").unwrap_or(defaults.user_agent),
        }
    }

    pub fn build_source(&self) -> Result<Arc<dyn ListingSource>> {
        match &self.source_url {
            Some(url) => {
                let http = HttpClientConfig {
                    timeout: Duration::from_secs(self.http_timeout_secs),
                    user_agent: Some(self.user_agent.clone()),
                    ..Default::default()
                };
                let source = HttpListingSource::new(url.clone(), http)
                    .with_context(|| format!("configuring listing source {url}"))?;
                info!(url = source.base_url(), "using http listing source");
                Ok(Arc::new(source))
            }
            None => {
                let source = FixtureListingSource::from_path(&self.fixture_path)?;
                info!(
                    path = %self.fixture_path.display(),
                    listings = source.len(),
                    "using fixture listing source"
                );
                Ok(Arc::new(source))
            }
        }
    }

    pub fn build_fallback(&self) -> Result<Arc<dyn FallbackProvider>> {
        match &self.fallback_path {
            Some(path) => Ok(Arc::new(YamlFallback::from_path(path)?)),
            None => Ok(Arc::new(DemoFallback)),
        }
    }

    pub fn build_location(&self) -> Arc<dyn LocationService> {
        match self.reference_coordinate {
            Some(coordinate) => Arc::new(StaticLocation::granted(coordinate)),
            None => Arc::new(StaticLocation::denied()),
        }
    }

    pub fn build_controller(self) -> Result<DiscoveryController> {
        let deps = ControllerDeps {
            source: self.build_source()?,
            location: self.build_location(),
            fallback: self.build_fallback()?,
        };
        Ok(DiscoveryController::new(self, deps))
    }
}
