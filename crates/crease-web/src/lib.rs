//! JSON API over the ingestion coordinator and the canonical store.

use std::fmt::Display;

use anyhow::Context;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use crease_core::{Match, MatchStatus, Player, PlayerMetric};
use crease_sync::store::{DEFAULT_LEADERBOARD_LIMIT, DEFAULT_MATCH_LIMIT, DEFAULT_PLAYER_LIMIT};
use crease_sync::{IngestCoordinator, SyncConfig, TeamStats, TeamSummary, TriggerResponse};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tracing::{error, info};

pub const CRATE_NAME: &str = "crease-web";

const MAX_LIMIT: i64 = 500;

#[derive(Clone)]
pub struct AppState {
    pub coordinator: IngestCoordinator,
}

impl AppState {
    pub fn new(coordinator: IngestCoordinator) -> Self {
        Self { coordinator }
    }
}

#[derive(Debug, Serialize)]
pub struct HealthBody {
    pub status: &'static str,
    pub time: DateTime<Utc>,
    pub last_update: Option<DateTime<Utc>>,
    pub scraping: bool,
}

#[derive(Debug, Serialize)]
pub struct AdminStatusBody {
    pub scraping: bool,
    pub last_update: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub teams_count: i64,
    pub players_count: i64,
    pub matches_count: i64,
    pub live_count: i64,
}

#[derive(Debug, Deserialize, Default)]
struct MatchesQuery {
    status: Option<String>,
    limit: Option<i64>,
}

#[derive(Debug, Deserialize, Default)]
struct PlayersQuery {
    team_id: Option<i64>,
    limit: Option<i64>,
}

#[derive(Debug, Deserialize, Default)]
struct TopPlayersQuery {
    by: Option<String>,
    limit: Option<i64>,
}

#[derive(Debug)]
struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }

    fn not_found(what: &str) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            message: format!("{what} not found"),
        }
    }

    fn internal(err: impl Display) -> Self {
        error!(error = %err, "request failed");
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: "internal error".to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(serde_json::json!({ "error": self.message }))).into_response()
    }
}

type ApiResult<T> = Result<Json<T>, ApiError>;

pub fn app(state: AppState) -> Router {
    let api = Router::new()
        .route("/health", get(health_handler))
        .route("/admin/status", get(admin_status_handler))
        .route("/admin/update", post(admin_update_handler))
        .route("/matches", get(matches_handler))
        .route("/matches/{id}", get(match_detail_handler))
        .route("/teams", get(teams_handler))
        .route("/teams/{id}", get(team_detail_handler))
        .route("/players", get(players_handler))
        .route("/players/top", get(top_players_handler))
        .route("/players/{id}", get(player_detail_handler));
    Router::new().nest("/api/v1", api).with_state(state)
}

fn clamp_limit(limit: Option<i64>, default: i64) -> i64 {
    limit.unwrap_or(default).clamp(1, MAX_LIMIT)
}

async fn health_handler(State(state): State<AppState>) -> Json<HealthBody> {
    let status = state.coordinator.run_status().await;
    Json(HealthBody {
        status: "healthy",
        time: Utc::now(),
        last_update: status.last_update,
        scraping: status.running,
    })
}

async fn admin_status_handler(State(state): State<AppState>) -> ApiResult<AdminStatusBody> {
    let status = state.coordinator.run_status().await;
    let counts = state
        .coordinator
        .store()
        .counts()
        .await
        .map_err(ApiError::internal)?;
    Ok(Json(AdminStatusBody {
        scraping: status.running,
        last_update: status.last_update,
        last_error: status.last_error,
        teams_count: counts.teams,
        players_count: counts.players,
        matches_count: counts.matches,
        live_count: counts.live,
    }))
}

async fn admin_update_handler(
    State(state): State<AppState>,
) -> (StatusCode, Json<TriggerResponse>) {
    let response = state.coordinator.trigger_run();
    let status = if response.accepted {
        StatusCode::ACCEPTED
    } else {
        StatusCode::CONFLICT
    };
    (status, Json(response))
}

async fn matches_handler(
    State(state): State<AppState>,
    Query(query): Query<MatchesQuery>,
) -> ApiResult<Vec<Match>> {
    let status = query
        .status
        .as_deref()
        .filter(|s| !s.trim().is_empty())
        .map(str::parse::<MatchStatus>)
        .transpose()
        .map_err(|err| ApiError::bad_request(err.to_string()))?;
    let matches = state
        .coordinator
        .store()
        .list_matches(status, clamp_limit(query.limit, DEFAULT_MATCH_LIMIT))
        .await
        .map_err(ApiError::internal)?;
    Ok(Json(matches))
}

async fn match_detail_handler(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<Match> {
    state
        .coordinator
        .store()
        .get_match(id)
        .await
        .map_err(ApiError::internal)?
        .map(Json)
        .ok_or_else(|| ApiError::not_found("match"))
}

async fn teams_handler(State(state): State<AppState>) -> ApiResult<Vec<TeamSummary>> {
    let teams = state
        .coordinator
        .store()
        .list_teams()
        .await
        .map_err(ApiError::internal)?;
    Ok(Json(teams))
}

async fn team_detail_handler(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<TeamStats> {
    state
        .coordinator
        .store()
        .team_stats(id)
        .await
        .map_err(ApiError::internal)?
        .map(Json)
        .ok_or_else(|| ApiError::not_found("team"))
}

async fn players_handler(
    State(state): State<AppState>,
    Query(query): Query<PlayersQuery>,
) -> ApiResult<Vec<Player>> {
    let players = state
        .coordinator
        .store()
        .list_players(query.team_id, clamp_limit(query.limit, DEFAULT_PLAYER_LIMIT))
        .await
        .map_err(ApiError::internal)?;
    Ok(Json(players))
}

async fn top_players_handler(
    State(state): State<AppState>,
    Query(query): Query<TopPlayersQuery>,
) -> ApiResult<Vec<Player>> {
    let metric = match query.by.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        Some(raw) => raw
            .parse::<PlayerMetric>()
            .map_err(|err| ApiError::bad_request(err.to_string()))?,
        None => PlayerMetric::default(),
    };
    let players = state
        .coordinator
        .store()
        .top_players(metric, clamp_limit(query.limit, DEFAULT_LEADERBOARD_LIMIT))
        .await
        .map_err(ApiError::internal)?;
    Ok(Json(players))
}

async fn player_detail_handler(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<Player> {
    state
        .coordinator
        .store()
        .get_player(id)
        .await
        .map_err(ApiError::internal)?
        .map(Json)
        .ok_or_else(|| ApiError::not_found("player"))
}

/// Builds the coordinator, starts the scheduler when enabled and serves
/// until ctrl-c.
pub async fn serve(config: SyncConfig) -> anyhow::Result<()> {
    let coordinator = crease_sync::build_coordinator(&config).await?;
    let mut scheduler = if config.scheduler_enabled {
        Some(
            coordinator
                .start_scheduler(config.sync_interval, config.sweep_interval)
                .await?,
        )
    } else {
        None
    };

    let listener = TcpListener::bind(("0.0.0.0", config.web_port))
        .await
        .with_context(|| format!("binding port {}", config.web_port))?;
    info!(port = config.web_port, scheduler = scheduler.is_some(), "serving api");

    axum::serve(listener, app(AppState::new(coordinator)))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await
        .context("serving api")?;

    if let Some(sched) = scheduler.as_mut() {
        sched.shutdown().await.context("stopping scheduler")?;
    }
    Ok(())
}

pub async fn serve_from_env() -> anyhow::Result<()> {
    serve(SyncConfig::from_env()?).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::Request;
    use crease_adapters::{
        AdapterContext, AdapterError, CollectedBatch, SourceAdapter, SyntheticAdapter,
    };
    use crease_sync::Store;
    use http_body_util::BodyExt;
    use serde_json::Value;
    use tokio::sync::Notify;
    use tower::ServiceExt;

    async fn seeded_store() -> Store {
        let store = Store::in_memory().await.unwrap();
        store.migrate().await.unwrap();
        store.seed_sample_data().await.unwrap();
        store
    }

    async fn test_app() -> Router {
        let coordinator = IngestCoordinator::new(
            seeded_store().await,
            vec![Box::new(SyntheticAdapter::new(Some(11)))],
            chrono::Duration::hours(8),
        );
        app(AppState::new(coordinator))
    }

    async fn get_json(app: &Router, uri: &str) -> (StatusCode, Value) {
        let resp = app
            .clone()
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = resp.status();
        let body = resp.into_body().collect().await.unwrap().to_bytes();
        (status, serde_json::from_slice(&body).unwrap())
    }

    async fn post_update(app: &Router) -> (StatusCode, Value) {
        let resp = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/v1/admin/update")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let status = resp.status();
        let body = resp.into_body().collect().await.unwrap().to_bytes();
        (status, serde_json::from_slice(&body).unwrap())
    }

    #[tokio::test]
    async fn health_reports_idle_coordinator() {
        let app = test_app().await;
        let (status, body) = get_json(&app, "/api/v1/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["scraping"], false);
        assert!(body["last_update"].is_null());
    }

    #[tokio::test]
    async fn admin_status_counts_sample_data() {
        let app = test_app().await;
        let (status, body) = get_json(&app, "/api/v1/admin/status").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["teams_count"], 4);
        assert_eq!(body["players_count"], 4);
        assert_eq!(body["matches_count"], 1);
        assert_eq!(body["live_count"], 0);
        assert!(body["last_error"].is_null());
    }

    #[tokio::test]
    async fn match_listing_filters_and_validates_status() {
        let app = test_app().await;
        let (status, body) = get_json(&app, "/api/v1/matches?status=completed").await;
        assert_eq!(status, StatusCode::OK);
        let id = body[0]["id"].as_i64().unwrap();
        assert_eq!(body[0]["team1_name"], "India");
        assert_eq!(body[0]["format"], "ODI");

        let (status, _) = get_json(&app, "/api/v1/matches?status=live").await;
        assert_eq!(status, StatusCode::OK);
        let (status, body) = get_json(&app, "/api/v1/matches?status=abandoned").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("abandoned"));

        let (status, body) = get_json(&app, &format!("/api/v1/matches/{id}")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["result"], "India won by 37 runs");
        let (status, _) = get_json(&app, "/api/v1/matches/9999").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn teams_and_players_are_browsable() {
        let app = test_app().await;
        let (_, teams) = get_json(&app, "/api/v1/teams").await;
        let india = teams
            .as_array()
            .unwrap()
            .iter()
            .find(|t| t["name"] == "India")
            .unwrap();
        assert_eq!(india["player_count"], 2);
        let india_id = india["id"].as_i64().unwrap();

        let (status, stats) = get_json(&app, &format!("/api/v1/teams/{india_id}")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(stats["matches_won"], 1);
        assert_eq!(stats["top_batsmen"][0]["full_name"], "Virat Kohli");

        let uri = format!("/api/v1/players?team_id={india_id}&limit=1");
        let (_, players) = get_json(&app, &uri).await;
        assert_eq!(players.as_array().unwrap().len(), 1);
        let player_id = players[0]["id"].as_i64().unwrap();
        let (status, player) = get_json(&app, &format!("/api/v1/players/{player_id}")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(player["role"], "batsman");

        let (status, _) = get_json(&app, "/api/v1/teams/424242").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn leaderboard_ranks_by_requested_metric() {
        let app = test_app().await;
        let (status, body) = get_json(&app, "/api/v1/players/top").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.as_array().unwrap().len(), 4);
        assert_eq!(body[0]["full_name"], "Virat Kohli");

        let (status, body) = get_json(&app, "/api/v1/players/top?by=wickets&limit=1").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.as_array().unwrap().len(), 1);
        assert_eq!(body[0]["full_name"], "Pat Cummins");

        let (status, body) = get_json(&app, "/api/v1/players/top?by=economy").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("economy"));
    }

    struct GatedAdapter {
        release: Arc<Notify>,
    }

    #[async_trait]
    impl SourceAdapter for GatedAdapter {
        fn source_id(&self) -> &str {
            "gated"
        }

        async fn collect(&self, _ctx: &AdapterContext) -> Result<CollectedBatch, AdapterError> {
            self.release.notified().await;
            Ok(CollectedBatch::new("gated"))
        }
    }

    #[tokio::test]
    async fn update_is_single_flight() {
        let release = Arc::new(Notify::new());
        let coordinator = IngestCoordinator::new(
            seeded_store().await,
            vec![Box::new(GatedAdapter {
                release: release.clone(),
            })],
            chrono::Duration::hours(8),
        );
        let app = app(AppState::new(coordinator.clone()));

        let (status, body) = post_update(&app).await;
        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(body["accepted"], true);

        let (status, body) = post_update(&app).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["accepted"], false);
        let (_, health) = get_json(&app, "/api/v1/health").await;
        assert_eq!(health["scraping"], true);

        release.notify_one();
        tokio::time::timeout(Duration::from_secs(5), async {
            while coordinator.is_running() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
        let (_, health) = get_json(&app, "/api/v1/health").await;
        assert_eq!(health["scraping"], false);
        assert!(health["last_update"].is_string());
    }
}
