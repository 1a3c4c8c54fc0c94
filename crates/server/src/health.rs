//! `GET /health`: database reachability, workflow schema presence and live notification sessions.

use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use chrono::Utc;
use reserva_db::DbPool;
use serde::Serialize;

use crate::notifications::NotificationHub;

#[derive(Clone)]
pub struct HealthState {
    db_pool: DbPool,
    hub: NotificationHub,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ComponentStatus {
    pub status: &'static str,
    pub detail: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub database: ComponentStatus,
    pub workflow_schema: ComponentStatus,
    pub pending_reservations: Option<i64>,
    pub notification_sessions: usize,
    pub checked_at: String,
}

pub fn router(db_pool: DbPool, hub: NotificationHub) -> Router {
    Router::new().route("/health", get(health)).with_state(HealthState { db_pool, hub })
}

pub async fn health(State(state): State<HealthState>) -> (StatusCode, Json<HealthResponse>) {
    let database = match reserva_db::ping(&state.db_pool).await {
        Ok(()) => ready("database query succeeded"),
        Err(error) => degraded(format!("database query failed: {error}")),
    };

    let (workflow_schema, pending_reservations) = if database.status == "ready" {
        match pending_count(&state.db_pool).await {
            Ok(count) => (ready("reservation tables present"), Some(count)),
            Err(error) => (degraded(format!("reservation tables unavailable: {error}")), None),
        }
    } else {
        (degraded("skipped: database unreachable".to_string()), None)
    };

    let is_ready = database.status == "ready" && workflow_schema.status == "ready";
    let payload = HealthResponse {
        status: if is_ready { "ready" } else { "degraded" },
        database,
        workflow_schema,
        pending_reservations,
        notification_sessions: state.hub.connected_count(),
        checked_at: Utc::now().to_rfc3339(),
    };

    let status_code = if is_ready { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    (status_code, Json(payload))
}

async fn pending_count(pool: &DbPool) -> Result<i64, sqlx::Error> {
    sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM reservation WHERE status = 'pending'")
        .fetch_one(pool)
        .await
}

fn ready(detail: &str) -> ComponentStatus {
    ComponentStatus { status: "ready", detail: detail.to_string() }
}

fn degraded(detail: String) -> ComponentStatus {
    ComponentStatus { status: "degraded", detail }
}
