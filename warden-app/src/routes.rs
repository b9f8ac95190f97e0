//! HTTP surface: ingest, auth, dashboard reads, source operations, alert
//! egress, and health.
//!
//! The ingest endpoint is public (agents authenticate by machine identity);
//! everything dashboard-facing requires a bearer token.

use axum::extract::{ConnectInfo, Path, Query, State};
use axum::http::{header, HeaderMap};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::info;
use warden_core::auth::{verify_credential, TokenAuthority, TokenClaims};
use warden_core::config_loader::WardenConfig;
use warden_core::error::{WardenError, WardenResult};
use warden_core::live::LiveFabric;
use warden_core::store::{MemoryStore, SortOrder, StoreGateway};
use warden_core::types::{now_ms, Alert, AlertLevel, EventKind, SourceAnalysisSummary};
use warden_ingest::pipeline::IngestPipeline;
use warden_ingest::validator::IngestBatch;
use warden_source::monitor::SourceMonitor;

use crate::alert_egress::AlertEgress;
use crate::live_ws;

const DEFAULT_PAGE_SIZE: usize = 50;
const MAX_PAGE_SIZE: usize = 200;
const MAX_SUSPICIOUS_LIMIT: usize = 50;
const SOURCE_OVERVIEW_LIMIT: usize = 50;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<MemoryStore>,
    pub fabric: Arc<LiveFabric>,
    pub pipeline: Arc<IngestPipeline>,
    pub monitor: Option<Arc<SourceMonitor>>,
    pub auth: Arc<TokenAuthority>,
    pub config: Arc<WardenConfig>,
    pub egress: Arc<AlertEgress>,
    pub started_at: i64,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/events", post(ingest_events))
        .route("/api/auth/login", post(login))
        .route("/api/participants", get(list_participants))
        .route("/api/participant/{id}", get(participant_detail))
        .route("/api/analytics/suspicious", get(analytics_suspicious))
        .route("/api/analytics/overview", get(analytics_overview))
        .route("/api/source/register", post(source_register))
        .route("/api/source/sync/{participant_id}", post(source_sync))
        .route("/api/source/participant/{id}/analysis", get(source_analysis))
        .route("/api/source/participant/{id}/commits", get(source_commits))
        .route("/api/source/compare", post(source_compare))
        .route("/api/source/overview", get(source_overview))
        .route("/api/alerts", post(submit_alert))
        .route("/ws", get(live_ws::ws_handler))
        .route("/health", get(health))
        .with_state(state)
}

fn require_auth(state: &AppState, headers: &HeaderMap) -> WardenResult<TokenClaims> {
    let raw = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| WardenError::Unauthenticated("missing bearer token".into()))?;
    let token = raw
        .strip_prefix("Bearer ")
        .ok_or_else(|| WardenError::Unauthenticated("malformed authorization header".into()))?;
    state.auth.verify(token)
}

fn monitor_of(state: &AppState) -> WardenResult<Arc<SourceMonitor>> {
    state.monitor.clone().ok_or_else(|| {
        WardenError::RemoteUnavailable("source monitoring disabled (no source token configured)".into())
    })
}

// ── Ingest ───────────────────────────────────────────────────────────────────

async fn ingest_events(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Json(batch): Json<IngestBatch>,
) -> WardenResult<Json<serde_json::Value>> {
    let peer = addr.ip().to_string();
    let outcome = state.pipeline.ingest(batch, Some(&peer))?;
    if let Some(ref alert) = outcome.alert {
        state.egress.log_alert(alert);
    }
    Ok(Json(json!({
        "success": true,
        "message": format!("{} events processed", outcome.processed),
        "participantScore": outcome.participant_score,
    })))
}

// ── Auth ─────────────────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct LoginBody {
    username: String,
    password: String,
}

async fn login(
    State(state): State<AppState>,
    Json(body): Json<LoginBody>,
) -> WardenResult<Json<serde_json::Value>> {
    let auth_config = &state.config.auth;
    if body.username != auth_config.admin_username
        || !verify_credential(&body.password, &auth_config.admin_password)
    {
        return Err(WardenError::Unauthenticated("bad credentials".into()));
    }
    let (token, expires_at) = state.auth.mint(&body.username, "admin")?;
    info!(username = %body.username, "Dashboard login");
    Ok(Json(json!({ "token": token, "expiresAt": expires_at })))
}

// ── Dashboard reads ──────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct ListQuery {
    sort: Option<String>,
    order: Option<String>,
    limit: Option<usize>,
    offset: Option<usize>,
}

async fn list_participants(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<ListQuery>,
) -> WardenResult<Json<serde_json::Value>> {
    require_auth(&state, &headers)?;
    let sort = query.sort.as_deref().unwrap_or("suspicionScore").to_string();
    let order = SortOrder::parse(query.order.as_deref().unwrap_or("desc"));
    let limit = query.limit.unwrap_or(DEFAULT_PAGE_SIZE).min(MAX_PAGE_SIZE);
    let offset = query.offset.unwrap_or(0);
    let (participants, total) = state.store.list_participants(&sort, order, limit, offset);
    Ok(Json(json!({
        "participants": participants,
        "total": total,
        "limit": limit,
        "offset": offset,
    })))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct DetailQuery {
    events_limit: Option<usize>,
    events_offset: Option<usize>,
    event_kind: Option<String>,
    flagged_only: Option<bool>,
}

async fn participant_detail(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Query(query): Query<DetailQuery>,
) -> WardenResult<Json<serde_json::Value>> {
    require_auth(&state, &headers)?;
    let participant = state
        .store
        .get_participant(&id)
        .ok_or_else(|| WardenError::NotFound(format!("participant {}", id)))?;

    let kind = match query.event_kind.as_deref() {
        None | Some("") => None,
        Some(raw) => Some(EventKind::parse(raw).ok_or_else(|| {
            WardenError::ValidationFailed {
                violations: vec![warden_core::error::FieldViolation::new(
                    "eventKind",
                    format!("unknown kind '{}'", raw),
                )],
            }
        })?),
    };
    let limit = query.events_limit.unwrap_or(DEFAULT_PAGE_SIZE).min(MAX_PAGE_SIZE);
    let offset = query.events_offset.unwrap_or(0);
    let flagged_only = query.flagged_only.unwrap_or(false);

    let (events, event_count) =
        state.store.participant_events(&id, limit, offset, kind, flagged_only);
    let typing_pattern = state.store.typing_pattern(&id);
    let suspicion_breakdown = state.store.suspicion_breakdown(&id);

    Ok(Json(json!({
        "participant": participant,
        "events": events,
        "eventCount": event_count,
        "typingPattern": typing_pattern,
        "suspicionBreakdown": suspicion_breakdown,
    })))
}

#[derive(Deserialize)]
struct LimitQuery {
    limit: Option<usize>,
}

async fn analytics_suspicious(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<LimitQuery>,
) -> WardenResult<Json<serde_json::Value>> {
    require_auth(&state, &headers)?;
    let limit = query.limit.unwrap_or(MAX_SUSPICIOUS_LIMIT).min(MAX_SUSPICIOUS_LIMIT);
    let participants = state.store.suspicious_participants(limit);
    Ok(Json(json!({ "participants": participants, "limit": limit })))
}

async fn analytics_overview(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> WardenResult<Json<serde_json::Value>> {
    require_auth(&state, &headers)?;
    Ok(Json(serde_json::to_value(state.store.overview())?))
}

// ── Source monitoring ────────────────────────────────────────────────────────

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RegisterBody {
    participant_id: String,
    owner: String,
    repo: String,
}

async fn source_register(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<RegisterBody>,
) -> WardenResult<Json<serde_json::Value>> {
    require_auth(&state, &headers)?;
    let monitor = monitor_of(&state)?;
    let record = monitor.register(&body.participant_id, &body.owner, &body.repo).await?;
    // The repo owner doubles as the participant's external identity.
    state.store.update_participant(&body.participant_id, &mut |p| {
        p.external_account_name = Some(body.owner.clone());
    });
    Ok(Json(json!({
        "success": true,
        "analysis": SourceAnalysisSummary::from(&record),
    })))
}

async fn source_sync(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(participant_id): Path<String>,
) -> WardenResult<Json<serde_json::Value>> {
    require_auth(&state, &headers)?;
    let monitor = monitor_of(&state)?;
    let record = monitor.monitor_repository(&participant_id).await?;
    Ok(Json(json!({
        "success": true,
        "analysis": SourceAnalysisSummary::from(&record),
    })))
}

async fn source_analysis(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> WardenResult<Json<serde_json::Value>> {
    require_auth(&state, &headers)?;
    let record = state
        .store
        .get_source_analysis(&id)
        .ok_or_else(|| WardenError::NotFound(format!("source analysis for {}", id)))?;
    Ok(Json(serde_json::to_value(record)?))
}

async fn source_commits(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> WardenResult<Json<serde_json::Value>> {
    require_auth(&state, &headers)?;
    let record = state
        .store
        .get_source_analysis(&id)
        .ok_or_else(|| WardenError::NotFound(format!("source analysis for {}", id)))?;
    Ok(Json(json!({
        "commitStats": record.commit_stats,
        "timing": record.timing,
        "suspiciousCommits": record.suspicious_commits,
        "burstCommits": record.burst_commits,
        "idleBursts": record.idle_bursts,
        "lastProcessedCommitId": record.last_processed_commit_id,
        "lastSyncAt": record.last_sync_at,
    })))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CompareBody {
    participant_id1: String,
    participant_id2: String,
    threshold: Option<f64>,
}

async fn source_compare(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<CompareBody>,
) -> WardenResult<Json<serde_json::Value>> {
    require_auth(&state, &headers)?;
    let monitor = monitor_of(&state)?;
    let matches = monitor
        .compare_pair(&body.participant_id1, &body.participant_id2, body.threshold)
        .await?;
    Ok(Json(json!({ "matches": matches, "matchCount": matches.len() })))
}

async fn source_overview(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> WardenResult<Json<serde_json::Value>> {
    require_auth(&state, &headers)?;
    let records = state.store.source_overview(SOURCE_OVERVIEW_LIMIT);
    let summaries: Vec<SourceAnalysisSummary> =
        records.iter().map(SourceAnalysisSummary::from).collect();
    Ok(Json(json!({ "analyses": summaries })))
}

// ── Alert egress ─────────────────────────────────────────────────────────────

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AlertSubmission {
    participant_id: String,
    display_name: Option<String>,
    level: AlertLevel,
    #[serde(default)]
    reasons: Vec<String>,
    score: Option<f64>,
}

async fn submit_alert(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<AlertSubmission>,
) -> WardenResult<Json<serde_json::Value>> {
    require_auth(&state, &headers)?;
    let alert = Alert {
        id: uuid::Uuid::new_v4().to_string(),
        participant_id: body.participant_id.clone(),
        display_name: body.display_name.unwrap_or(body.participant_id),
        level: body.level,
        reasons: body.reasons,
        score: body.score.unwrap_or(0.0),
        timestamp: now_ms(),
    };
    state.fabric.publish_alert(&alert);
    state.egress.log_alert(&alert);
    let channels = state.egress.dispatch(&alert).await;
    Ok(Json(json!({ "success": true, "alert": alert, "channels": channels })))
}

// ── Health ───────────────────────────────────────────────────────────────────

async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    let uptime_sec = (now_ms() - state.started_at) / 1000;
    Json(json!({
        "status": "ok",
        "uptimeSec": uptime_sec,
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "store": state.store.counts(),
        "observers": state.fabric.observer_count(),
    }))
}
