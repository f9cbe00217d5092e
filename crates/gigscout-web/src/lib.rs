//! Axum JSON surface over the discovery controller.

use std::collections::BTreeSet;
use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use gigscout_core::{QueryState, SortCriterion, Urgency, WorkTypeFilter};
use gigscout_discovery::{DiscoveryConfig, DiscoveryController, LoadMoreOutcome, ViewModel};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tracing::info;

pub const CRATE_NAME: &str = "gigscout-web";

#[derive(Clone)]
pub struct AppState {
    pub controller: DiscoveryController,
}

impl AppState {
    pub fn new(controller: DiscoveryController) -> Self {
        Self { controller }
    }
}

#[derive(Debug, Deserialize)]
struct SearchBody {
    term: String,
}

#[derive(Debug, Deserialize)]
struct CategoryBody {
    category: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SortBody {
    sort: Option<SortCriterion>,
}

#[derive(Debug, Deserialize)]
struct NearbyBody {
    enabled: Option<bool>,
    radius_km: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct BudgetRange {
    min: Option<f64>,
    max: Option<f64>,
}

/// Absent fields leave the corresponding axis untouched.
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct FilterPatch {
    budget: Option<BudgetRange>,
    durations: Option<BTreeSet<String>>,
    work_type: Option<WorkTypeFilter>,
    urgency: Option<Urgency>,
    skills: Option<Vec<String>>,
}

#[derive(Debug, Serialize)]
struct LoadMoreResponse {
    #[serde(flatten)]
    outcome: LoadMoreOutcome,
    view: ViewModel,
}

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz_handler))
        .route("/api/view", get(view_handler))
        .route("/api/query", get(query_handler).post(apply_query_handler))
        .route("/api/query/search", post(search_handler))
        .route("/api/query/category", post(category_handler))
        .route("/api/query/filters", post(filters_handler))
        .route("/api/query/sort", post(sort_handler))
        .route("/api/query/nearby", post(nearby_handler))
        .route("/api/query/clear", post(clear_handler))
        .route("/api/listings/load-more", post(load_more_handler))
        .with_state(Arc::new(state))
}

pub async fn serve_from_env() -> anyhow::Result<()> {
    let port: u16 = std::env::var("GIGSCOUT_WEB_PORT")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(8000);
    let controller = DiscoveryConfig::from_env().build_controller()?;
    controller.start().await;

    let listener = TcpListener::bind(("0.0.0.0", port)).await?;
    info!(port, "serving discovery api");
    axum::serve(listener, app(AppState::new(controller))).await?;
    Ok(())
}

/// Debounced intents answer before the recomputation lands.
fn accepted(view: ViewModel) -> Response {
    (StatusCode::ACCEPTED, Json(view)).into_response()
}

async fn healthz_handler() -> &'static str {
    "ok"
}

async fn view_handler(State(state): State<Arc<AppState>>) -> Json<ViewModel> {
    Json(state.controller.view())
}

async fn query_handler(State(state): State<Arc<AppState>>) -> Json<QueryState> {
    Json(state.controller.query().await)
}

async fn apply_query_handler(
    State(state): State<Arc<AppState>>,
    Json(query): Json<QueryState>,
) -> Json<ViewModel> {
    state.controller.apply_query(query).await;
    Json(state.controller.view())
}

async fn search_handler(
    State(state): State<Arc<AppState>>,
    Json(body): Json<SearchBody>,
) -> Response {
    state.controller.set_search_term(body.term).await;
    accepted(state.controller.view())
}

async fn category_handler(
    State(state): State<Arc<AppState>>,
    Json(body): Json<CategoryBody>,
) -> Json<ViewModel> {
    let category = body.category.filter(|c| !c.trim().is_empty() && c != "all");
    state.controller.set_category(category).await;
    Json(state.controller.view())
}

async fn filters_handler(
    State(state): State<Arc<AppState>>,
    Json(patch): Json<FilterPatch>,
) -> Response {
    let controller = &state.controller;
    if let Some(budget) = patch.budget {
        if let (Some(min), Some(max)) = (budget.min, budget.max) {
            if min > max {
                return (StatusCode::UNPROCESSABLE_ENTITY, "budget min exceeds max").into_response();
            }
        }
        controller.set_budget_range(budget.min, budget.max).await;
    }
    if let Some(durations) = patch.durations {
        controller.set_durations(durations).await;
    }
    if let Some(work_type) = patch.work_type {
        controller.set_work_type(work_type).await;
    }
    if let Some(urgency) = patch.urgency {
        controller.set_urgency(urgency).await;
    }
    if let Some(skills) = patch.skills {
        controller.set_skills(skills).await;
    }
    accepted(controller.view())
}

async fn sort_handler(State(state): State<Arc<AppState>>, Json(body): Json<SortBody>) -> Response {
    state.controller.set_sort(body.sort).await;
    accepted(state.controller.view())
}

async fn nearby_handler(
    State(state): State<Arc<AppState>>,
    Json(body): Json<NearbyBody>,
) -> Response {
    if let Some(radius_km) = body.radius_km {
        if !radius_km.is_finite() || radius_km < 0.0 {
            return (StatusCode::UNPROCESSABLE_ENTITY, "radius must be a non-negative number")
                .into_response();
        }
        state.controller.set_radius_km(radius_km).await;
    }
    if let Some(enabled) = body.enabled {
        state.controller.set_nearby_only(enabled).await;
    }
    accepted(state.controller.view())
}

async fn clear_handler(State(state): State<Arc<AppState>>) -> Response {
    state.controller.clear_filters().await;
    accepted(state.controller.view())
}

async fn load_more_handler(State(state): State<Arc<AppState>>) -> Json<LoadMoreResponse> {
    let outcome = state.controller.load_more().await;
    Json(LoadMoreResponse {
        outcome,
        view: state.controller.view(),
    })
}
