//! JSON routes over the reservation engine.
//!
//! - `POST   /api/resources`                          register a resource
//! - `GET    /api/resources/{id}/workflow`            read its approval chain
//! - `PUT    /api/resources/{id}/workflow`            replace its approval chain
//! - `DELETE /api/resources/{id}/workflow`            clear its approval chain
//! - `POST   /api/reservations`                       request a reservation
//! - `POST   /api/reservations/check-availability`    dry-run conflict check
//! - `GET    /api/reservations/{id}`                  reservation, slots and steps
//! - `POST   /api/reservations/{id}/cancel`           requester cancellation
//! - `GET    /api/reservations/{id}/history`          activity log
//! - `POST   /api/approval-steps/{id}/act`            approve or reject a step
//! - `GET    /api/approvers/{id}/pending`             approver inbox
//! - `GET    /api/approvers/{id}/decisions`           approval log
//! - `GET    /api/calendar`                           active reservations in a date range
//! - `POST   /admin/sweep`                            run the expiry sweep now
//! - `GET    /ws?user_id=`                            notification socket

use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket},
        Path, Query, State, WebSocketUpgrade,
    },
    http::{header::AUTHORIZATION, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use reserva_core::clock::Clock;
use reserva_core::config::AppConfig;
use reserva_core::domain::slot::{parse_date, parse_time};
use reserva_core::{
    ActOnStepRequest, ApplicationError, ApprovalStepId, CalendarQuery, CancelReservationRequest,
    ConflictList, CreateReservationRequest, InterfaceError, ReservationEngine, ReservationError,
    ReservationId, ResourceId, StepAction, TimeSlot, UserId, WorkflowStep,
    DEFAULT_STATS_PERIOD_DAYS,
};
use reserva_db::SqlReservationStore;

use crate::notifications::NotificationHub;

pub type AppEngine = ReservationEngine<SqlReservationStore, NotificationHub, Arc<dyn Clock>>;

#[derive(Clone)]
pub struct ApiState {
    engine: Arc<AppEngine>,
    hub: NotificationHub,
    config: Arc<AppConfig>,
}

impl ApiState {
    pub fn new(engine: Arc<AppEngine>, hub: NotificationHub, config: Arc<AppConfig>) -> Self {
        Self { engine, hub, config }
    }
}

// ---------------------------------------------------------------------------
// Request / Response types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct SlotInput {
    pub date: String,
    pub start_time: String,
    pub end_time: String,
}

#[derive(Debug, Deserialize)]
pub struct CreateReservationBody {
    pub resource_id: i64,
    pub requester_id: String,
    pub purpose: String,
    pub slots: Vec<SlotInput>,
}

#[derive(Debug, Deserialize)]
pub struct AvailabilityBody {
    pub resource_id: i64,
    pub slots: Vec<SlotInput>,
}

#[derive(Debug, Deserialize)]
pub struct CancelBody {
    pub requester_id: String,
    pub comment: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ActBody {
    pub approver_id: String,
    pub action: String,
    pub comment: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RegisterResourceBody {
    pub name: String,
    #[serde(default)]
    pub category: String,
}

#[derive(Debug, Deserialize)]
pub struct WorkflowBody {
    pub steps: Vec<WorkflowStep>,
}

#[derive(Debug, Deserialize)]
pub struct CalendarParams {
    pub from: String,
    pub to: String,
    pub resource_id: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct StatsParams {
    pub period_days: Option<u32>,
}

#[derive(Debug, Deserialize)]
pub struct SocketParams {
    pub user_id: String,
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: &'static str,
    pub message: String,
    pub user_message: &'static str,
    pub correlation_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conflicts: Option<ConflictList>,
}

#[derive(Debug)]
pub struct ApiError {
    kind: &'static str,
    inner: InterfaceError,
}

impl ApiError {
    fn new(error: ReservationError, correlation_id: &str) -> Self {
        let kind = error.kind();
        if kind == "internal" {
            error!(
                event_name = "api.request_failed",
                correlation_id,
                error_kind = kind,
                error = %error,
                "request failed"
            );
        } else {
            debug!(
                event_name = "api.request_rejected",
                correlation_id,
                error_kind = kind,
                error = %error,
                "request rejected"
            );
        }
        Self { kind, inner: ApplicationError::from(error).into_interface(correlation_id) }
    }

    fn forbidden(message: &str, correlation_id: &str) -> Self {
        warn!(event_name = "api.forbidden", correlation_id, "{message}");
        Self {
            kind: "forbidden",
            inner: InterfaceError::Forbidden {
                message: message.to_owned(),
                correlation_id: correlation_id.to_owned(),
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.inner.status_code())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let conflicts = match &self.inner {
            InterfaceError::Conflict { conflicts, .. } if !conflicts.is_empty() => {
                Some(conflicts.clone())
            }
            _ => None,
        };
        let body = ErrorBody {
            error: self.kind,
            message: self.inner.message().to_owned(),
            user_message: self.inner.user_message(),
            correlation_id: self.inner.correlation_id().to_owned(),
            conflicts,
        };
        (status, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

fn correlation_id() -> String {
    Uuid::new_v4().to_string()
}

fn parse_slots(slots: &[SlotInput]) -> Result<Vec<TimeSlot>, ReservationError> {
    slots
        .iter()
        .map(|slot| {
            let date = parse_date(&slot.date).ok_or_else(|| {
                ReservationError::validation(format!("invalid date `{}`", slot.date))
            })?;
            let start = parse_time(&slot.start_time).ok_or_else(|| {
                ReservationError::validation(format!("invalid start time `{}`", slot.start_time))
            })?;
            let end = parse_time(&slot.end_time).ok_or_else(|| {
                ReservationError::validation(format!("invalid end time `{}`", slot.end_time))
            })?;
            Ok(TimeSlot::new(date, start, end))
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/api/resources", post(register_resource))
        .route(
            "/api/resources/{id}/workflow",
            get(get_workflow).put(set_workflow).delete(clear_workflow),
        )
        .route("/api/reservations", post(create_reservation))
        .route("/api/reservations/check-availability", post(check_availability))
        .route("/api/reservations/{id}", get(reservation_detail))
        .route("/api/reservations/{id}/cancel", post(cancel_reservation))
        .route("/api/reservations/{id}/history", get(reservation_history))
        .route("/api/approval-steps/{id}/act", post(act_on_step))
        .route("/api/approvers/{id}/pending", get(pending_for_approver))
        .route("/api/approvers/{id}/decisions", get(decisions_by_approver))
        .route("/api/approvers/{id}/stats", get(decision_stats))
        .route("/api/requesters/{id}/reservations", get(reservations_for_requester))
        .route("/api/calendar", get(calendar))
        .route("/admin/sweep", post(run_sweep))
        .route("/ws", get(notification_socket))
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Resource and workflow handlers
// ---------------------------------------------------------------------------

async fn register_resource(
    State(state): State<ApiState>,
    Json(body): Json<RegisterResourceBody>,
) -> ApiResult<impl IntoResponse> {
    let correlation_id = correlation_id();
    let resource = state
        .engine
        .register_resource(&body.name, &body.category)
        .await
        .map_err(|e| ApiError::new(e, &correlation_id))?;
    Ok((StatusCode::CREATED, Json(resource)))
}

async fn get_workflow(
    Path(id): Path<i64>,
    State(state): State<ApiState>,
) -> ApiResult<Json<Vec<WorkflowStep>>> {
    let correlation_id = correlation_id();
    let steps = state
        .engine
        .get_workflow(ResourceId(id))
        .await
        .map_err(|e| ApiError::new(e, &correlation_id))?;
    Ok(Json(steps))
}

async fn set_workflow(
    Path(id): Path<i64>,
    State(state): State<ApiState>,
    Json(body): Json<WorkflowBody>,
) -> ApiResult<Json<Vec<WorkflowStep>>> {
    let correlation_id = correlation_id();
    let steps = state
        .engine
        .set_workflow(ResourceId(id), body.steps)
        .await
        .map_err(|e| ApiError::new(e, &correlation_id))?;
    Ok(Json(steps))
}

async fn clear_workflow(
    Path(id): Path<i64>,
    State(state): State<ApiState>,
) -> ApiResult<StatusCode> {
    let correlation_id = correlation_id();
    state
        .engine
        .clear_workflow(ResourceId(id))
        .await
        .map_err(|e| ApiError::new(e, &correlation_id))?;
    Ok(StatusCode::NO_CONTENT)
}

// ---------------------------------------------------------------------------
// Reservation handlers
// ---------------------------------------------------------------------------

async fn create_reservation(
    State(state): State<ApiState>,
    Json(body): Json<CreateReservationBody>,
) -> ApiResult<impl IntoResponse> {
    let correlation_id = correlation_id();
    let slots = parse_slots(&body.slots).map_err(|e| ApiError::new(e, &correlation_id))?;
    let created = state
        .engine
        .create_reservation(CreateReservationRequest {
            resource_id: ResourceId(body.resource_id),
            requester_id: UserId::new(body.requester_id),
            purpose: body.purpose,
            slots,
        })
        .await
        .map_err(|e| ApiError::new(e, &correlation_id))?;

    info!(
        event_name = "api.reservation_created",
        correlation_id = %correlation_id,
        reservation_id = created.reservation_id.0,
        "reservation request accepted"
    );
    Ok((StatusCode::CREATED, Json(created)))
}

async fn check_availability(
    State(state): State<ApiState>,
    Json(body): Json<AvailabilityBody>,
) -> ApiResult<impl IntoResponse> {
    let correlation_id = correlation_id();
    let slots = parse_slots(&body.slots).map_err(|e| ApiError::new(e, &correlation_id))?;
    let report = state
        .engine
        .check_availability(ResourceId(body.resource_id), &slots)
        .await
        .map_err(|e| ApiError::new(e, &correlation_id))?;
    Ok(Json(report))
}

async fn reservation_detail(
    Path(id): Path<i64>,
    State(state): State<ApiState>,
) -> ApiResult<impl IntoResponse> {
    let correlation_id = correlation_id();
    let detail = state
        .engine
        .reservation_detail(ReservationId(id))
        .await
        .map_err(|e| ApiError::new(e, &correlation_id))?;
    Ok(Json(detail))
}

async fn cancel_reservation(
    Path(id): Path<i64>,
    State(state): State<ApiState>,
    Json(body): Json<CancelBody>,
) -> ApiResult<impl IntoResponse> {
    let correlation_id = correlation_id();
    let cancelled = state
        .engine
        .cancel_reservation(CancelReservationRequest {
            reservation_id: ReservationId(id),
            requester_id: UserId::new(body.requester_id),
            comment: body.comment,
        })
        .await
        .map_err(|e| ApiError::new(e, &correlation_id))?;
    Ok(Json(cancelled))
}

async fn reservation_history(
    Path(id): Path<i64>,
    State(state): State<ApiState>,
) -> ApiResult<impl IntoResponse> {
    let correlation_id = correlation_id();
    let history = state
        .engine
        .reservation_history(ReservationId(id))
        .await
        .map_err(|e| ApiError::new(e, &correlation_id))?;
    Ok(Json(history))
}

// ---------------------------------------------------------------------------
// Approval handlers
// ---------------------------------------------------------------------------

async fn act_on_step(
    Path(id): Path<i64>,
    State(state): State<ApiState>,
    Json(body): Json<ActBody>,
) -> ApiResult<impl IntoResponse> {
    let correlation_id = correlation_id();
    let action = StepAction::parse(&body.action).ok_or_else(|| {
        ApiError::new(
            ReservationError::validation(format!(
                "action must be `approve` or `reject`, got `{}`",
                body.action
            )),
            &correlation_id,
        )
    })?;

    let acted = state
        .engine
        .act_on_step(ActOnStepRequest {
            approval_step_id: ApprovalStepId(id),
            approver_id: UserId::new(body.approver_id),
            action,
            comment: body.comment,
        })
        .await
        .map_err(|e| ApiError::new(e, &correlation_id))?;
    Ok(Json(acted))
}

async fn pending_for_approver(
    Path(id): Path<String>,
    State(state): State<ApiState>,
) -> ApiResult<impl IntoResponse> {
    let correlation_id = correlation_id();
    let pending = state
        .engine
        .pending_for_approver(&UserId::new(id))
        .await
        .map_err(|e| ApiError::new(e, &correlation_id))?;
    Ok(Json(pending))
}

async fn decisions_by_approver(
    Path(id): Path<String>,
    State(state): State<ApiState>,
) -> ApiResult<impl IntoResponse> {
    let correlation_id = correlation_id();
    let decisions = state
        .engine
        .decisions_by_approver(&UserId::new(id))
        .await
        .map_err(|e| ApiError::new(e, &correlation_id))?;
    Ok(Json(decisions))
}

async fn decision_stats(
    Path(id): Path<String>,
    Query(params): Query<StatsParams>,
    State(state): State<ApiState>,
) -> ApiResult<impl IntoResponse> {
    let correlation_id = correlation_id();
    let period_days = params.period_days.unwrap_or(DEFAULT_STATS_PERIOD_DAYS);
    let stats = state
        .engine
        .decision_stats(&UserId::new(id), period_days)
        .await
        .map_err(|e| ApiError::new(e, &correlation_id))?;
    Ok(Json(stats))
}

async fn reservations_for_requester(
    Path(id): Path<String>,
    State(state): State<ApiState>,
) -> ApiResult<impl IntoResponse> {
    let correlation_id = correlation_id();
    let reservations = state
        .engine
        .reservations_for_requester(&UserId::new(id))
        .await
        .map_err(|e| ApiError::new(e, &correlation_id))?;
    Ok(Json(reservations))
}

async fn calendar(
    Query(params): Query<CalendarParams>,
    State(state): State<ApiState>,
) -> ApiResult<impl IntoResponse> {
    let correlation_id = correlation_id();
    let (from, to) = match (parse_date(&params.from), parse_date(&params.to)) {
        (Some(from), Some(to)) => (from, to),
        _ => {
            return Err(ApiError::new(
                ReservationError::validation("`from` and `to` must be YYYY-MM-DD dates"),
                &correlation_id,
            ))
        }
    };
    let entries = state
        .engine
        .calendar(&CalendarQuery { from, to, resource_id: params.resource_id.map(ResourceId) })
        .await
        .map_err(|e| ApiError::new(e, &correlation_id))?;
    Ok(Json(entries))
}

// ---------------------------------------------------------------------------
// Admin and socket handlers
// ---------------------------------------------------------------------------

async fn run_sweep(headers: HeaderMap, State(state): State<ApiState>) -> ApiResult<impl IntoResponse> {
    let correlation_id = correlation_id();
    let token = headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .unwrap_or_default();
    if !state.config.admin_token_matches(token) {
        return Err(ApiError::forbidden("admin token missing or invalid", &correlation_id));
    }

    let report =
        state.engine.sweep_expired().await.map_err(|e| ApiError::new(e, &correlation_id))?;
    info!(
        event_name = "api.sweep_triggered",
        correlation_id = %correlation_id,
        cancelled_count = report.cancelled_count,
        failed_count = report.failed_count,
        "manual sweep finished"
    );
    Ok(Json(report))
}

async fn notification_socket(
    ws: WebSocketUpgrade,
    Query(params): Query<SocketParams>,
    State(state): State<ApiState>,
) -> Response {
    let user_id = params.user_id.trim().to_owned();
    if user_id.is_empty() {
        return ApiError::new(ReservationError::validation("user_id is required"), &correlation_id())
            .into_response();
    }
    let hub = state.hub.clone();
    ws.on_upgrade(move |socket| forward_notifications(socket, UserId::new(user_id), hub))
}

async fn forward_notifications(socket: WebSocket, user: UserId, hub: NotificationHub) {
    let (connection_id, mut outgoing) = hub.connect(user.clone());
    let (mut sender, mut receiver) = socket.split();
    info!(
        event_name = "notification.socket_connected",
        user_id = %user,
        connection_id,
        connected = hub.connected_count(),
        "notification socket connected"
    );

    loop {
        tokio::select! {
            notification = outgoing.recv() => {
                let Some(notification) = notification else {
                    break;
                };
                let json = match serde_json::to_string(&notification) {
                    Ok(json) => json,
                    Err(err) => {
                        warn!(
                            event_name = "notification.encode_failed",
                            user_id = %user,
                            error = %err,
                            "could not encode notification"
                        );
                        continue;
                    }
                };
                if sender.send(Message::Text(json.into())).await.is_err() {
                    break;
                }
            }
            incoming = receiver.next() => {
                match incoming {
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    Some(Ok(_)) => {}
                }
            }
        }
    }

    hub.disconnect(&user, connection_id);
    info!(
        event_name = "notification.socket_closed",
        user_id = %user,
        connection_id,
        "notification socket closed"
    );
}
