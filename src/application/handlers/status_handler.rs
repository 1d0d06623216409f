use std::sync::Arc;

use axum::{
    extract::{Path, Query, Request, State},
    http::StatusCode,
    middleware::{self, Next},
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::trace::TraceLayer;
use tracing::{error, warn};

use crate::application::scheduler::{CycleReport, Scheduler, SchedulerState};
use crate::domain::entities::agent::AgentId;
use crate::domain::entities::portfolio::PortfolioView;
use crate::domain::entities::quote::{prices_of, PriceBar, PriceMap};
use crate::domain::errors::LedgerError;
use crate::domain::repositories::ledger::Ledger;
use crate::domain::services::portfolio::{
    aggregated_portfolio, leaderboard, AggregatedPortfolio, LeaderboardEntry,
};
use crate::domain::services::quote_cache::QuoteCache;
use crate::rate_limit::{rate_limit_middleware, SharedRateLimiter};

/// Shared state behind the status endpoints
#[derive(Clone)]
pub struct StatusState {
    pub scheduler: Arc<Scheduler>,
    pub ledger: Arc<dyn Ledger>,
    pub quotes: Arc<QuoteCache>,
    pub instruments: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub scheduler: SchedulerState,
    pub cycles_completed: u64,
    pub current_backoff_seconds: u64,
    pub last_cycle: Option<CycleReport>,
}

/// Error response
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn api_error(status: StatusCode, message: impl Into<String>) -> ApiError {
    (
        status,
        Json(ErrorResponse {
            error: message.into(),
        }),
    )
}

/// Read-only router. No endpoint mutates the ledger.
pub fn status_router(state: StatusState, limiter: Option<SharedRateLimiter>) -> Router {
    let router = Router::new()
        .route("/health", get(get_health))
        .route("/agents/:id/portfolio", get(get_agent_portfolio))
        .route("/portfolio/aggregate", get(get_aggregated_portfolio))
        .route("/leaderboard", get(get_leaderboard))
        .route("/market/:instrument/history", get(get_market_history))
        .with_state(state);

    let router = match limiter {
        Some(limiter) => router.layer(middleware::from_fn(move |request: Request, next: Next| {
            rate_limit_middleware(limiter.clone(), request, next)
        })),
        None => router,
    };

    router.layer(TraceLayer::new_for_http())
}

/// Scheduler state and last cycle counts
pub async fn get_health(State(state): State<StatusState>) -> Json<HealthResponse> {
    let scheduler = &state.scheduler;
    Json(HealthResponse {
        status: "ok",
        scheduler: scheduler.state(),
        cycles_completed: scheduler.cycles_completed(),
        current_backoff_seconds: scheduler.current_backoff().await.as_secs(),
        last_cycle: scheduler.last_report().await,
    })
}

/// Cached quotes for the tracked instruments, or no prices when no quote
/// source answers. Positions are then valued at cost.
async fn current_prices(state: &StatusState) -> PriceMap {
    match state.quotes.get_quotes(&state.instruments).await {
        Ok(quotes) => prices_of(&quotes),
        Err(e) => {
            warn!("Quotes unavailable for portfolio view: {}", e);
            PriceMap::new()
        }
    }
}

/// Live portfolio valued at cached quotes.
pub async fn get_agent_portfolio(
    State(state): State<StatusState>,
    Path(agent_id): Path<AgentId>,
) -> Result<Json<PortfolioView>, ApiError> {
    let prices = current_prices(&state).await;

    match state.ledger.get_portfolio(agent_id, &prices).await {
        Ok(portfolio) => Ok(Json(portfolio)),
        Err(LedgerError::AgentNotFound(id)) => Err(api_error(
            StatusCode::NOT_FOUND,
            format!("Agent not found: {}", id),
        )),
        Err(e) => {
            error!(agent_id, "Failed to load portfolio: {}", e);
            Err(api_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))
        }
    }
}

/// Every agent's portfolio combined
pub async fn get_aggregated_portfolio(
    State(state): State<StatusState>,
) -> Result<Json<AggregatedPortfolio>, ApiError> {
    let prices = current_prices(&state).await;
    aggregated_portfolio(state.ledger.as_ref(), &prices)
        .await
        .map(Json)
        .map_err(|e| {
            error!("Failed to aggregate portfolios: {}", e);
            api_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        })
}

pub async fn get_leaderboard(
    State(state): State<StatusState>,
) -> Result<Json<Vec<LeaderboardEntry>>, ApiError> {
    let prices = current_prices(&state).await;
    leaderboard(state.ledger.as_ref(), &prices)
        .await
        .map(Json)
        .map_err(|e| {
            error!("Failed to build leaderboard: {}", e);
            api_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        })
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub resolution: Option<i64>,
    pub limit: Option<i64>,
}

/// Stored market history, oldest first. Defaults: 60s resolution, 100 rows.
pub async fn get_market_history(
    State(state): State<StatusState>,
    Path(instrument): Path<String>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<Vec<PriceBar>>, ApiError> {
    let instrument = instrument.to_uppercase();
    let resolution = query.resolution.unwrap_or(60).max(1);
    let limit = query.limit.unwrap_or(100).clamp(1, 1000);

    state
        .ledger
        .market_history(&instrument, resolution, limit)
        .await
        .map(Json)
        .map_err(|e| {
            error!(instrument = %instrument, "Failed to load market history: {}", e);
            api_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        })
}
