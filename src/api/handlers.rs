use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use serde::Serialize;
use serde_json::Value;

use crate::contracts::{Fields, Record, RecordId, RecordUpdate, Sequencer, SequencerError};
use crate::metrics::{MetricsSnapshot, SequencerMetrics};
use crate::sequencer::parse_order;

/// Application state shared across handlers.
pub struct AppState<Q: Sequencer> {
    pub sequencer: Arc<Q>,
    pub metrics: Arc<SequencerMetrics>,
}

impl<Q: Sequencer> AppState<Q> {
    pub fn new(sequencer: Arc<Q>, metrics: Arc<SequencerMetrics>) -> Self {
        Self { sequencer, metrics }
    }

    /// Counts the failure and converts it for the response.
    fn reject(&self, e: impl Into<ApiError>) -> ApiError {
        self.metrics.record_error();
        e.into()
    }
}

/// Error response body.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

/// API error type.
#[derive(Debug)]
pub enum ApiError {
    Sequencer(SequencerError),
    BadRequest(String),
    NotFound(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let (status, error_response) = match self {
            ApiError::Sequencer(SequencerError::NotFound(id)) => (
                StatusCode::NOT_FOUND,
                ErrorResponse {
                    error: format!("Event not found: {}", id),
                    code: "NOT_FOUND".into(),
                },
            ),
            ApiError::NotFound(msg) => (
                StatusCode::NOT_FOUND,
                ErrorResponse {
                    error: msg,
                    code: "NOT_FOUND".into(),
                },
            ),
            ApiError::Sequencer(SequencerError::InvalidArgument(msg)) | ApiError::BadRequest(msg) => (
                StatusCode::BAD_REQUEST,
                ErrorResponse {
                    error: msg,
                    code: "BAD_REQUEST".into(),
                },
            ),
            ApiError::Sequencer(e @ SequencerError::Storage(_)) => {
                tracing::error!(error = %e, "Request failed in storage");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ErrorResponse {
                        error: e.to_string(),
                        code: "STORAGE_ERROR".into(),
                    },
                )
            }
        };

        (status, Json(error_response)).into_response()
    }
}

impl From<SequencerError> for ApiError {
    fn from(e: SequencerError) -> Self {
        ApiError::Sequencer(e)
    }
}

/// Parses a request body that must be a JSON object.
fn parse_object(body: &Bytes) -> Result<Fields, ApiError> {
    match serde_json::from_slice::<Value>(body) {
        Ok(Value::Object(fields)) => Ok(fields),
        Ok(other) => Err(ApiError::BadRequest(format!(
            "Request body must be a JSON object, got {}",
            json_kind(&other)
        ))),
        Err(e) => Err(ApiError::BadRequest(format!("Invalid JSON: {}", e))),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Removes `order` from the body. `null` counts as absent.
fn take_order(fields: &mut Fields) -> Result<Option<i64>, ApiError> {
    match fields.remove("order") {
        None | Some(Value::Null) => Ok(None),
        Some(value) => Ok(Some(parse_order(&value)?)),
    }
}

fn parse_id(raw: &str) -> Result<RecordId, ApiError> {
    raw.parse()
        .map_err(|_| ApiError::BadRequest(format!("Invalid event id: {}", raw)))
}

/// Response for inserts.
#[derive(Debug, Serialize)]
pub struct InsertResponse {
    pub message: String,
    pub event: Record,
    pub shifted: usize,
}

/// Response for updates and moves.
#[derive(Debug, Serialize)]
pub struct UpdateResponse {
    pub message: String,
    pub event: Record,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteResponse {
    pub message: String,
    pub deleted_order: u64,
    /// Number of events pulled one position earlier.
    pub shifted_down: usize,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReorderResponse {
    pub message: String,
    pub events_reordered: usize,
    pub total_events: usize,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NextOrderResponse {
    pub next_order: u64,
    pub total_events: u64,
}

/// GET /timeline
/// All events sorted by order.
pub async fn list_records<Q: Sequencer>(
    State(state): State<Arc<AppState<Q>>>,
) -> Result<Json<Vec<Record>>, ApiError> {
    let records = state
        .sequencer
        .list()
        .await
        .map_err(|e| state.reject(e))?;
    Ok(Json(records))
}

/// POST /timeline
/// Creates an event. The body is the event object; an optional `order`
/// places it, otherwise it is appended.
pub async fn insert_record<Q: Sequencer>(
    State(state): State<Arc<AppState<Q>>>,
    body: Bytes,
) -> Result<(StatusCode, Json<InsertResponse>), ApiError> {
    let mut fields = parse_object(&body).map_err(|e| state.reject(e))?;
    let order = take_order(&mut fields).map_err(|e| state.reject(e))?;

    let placement = state
        .sequencer
        .insert_at(order, fields)
        .await
        .map_err(|e| state.reject(e))?;

    let order = placement.record.order;
    let message = if placement.shifted > 0 {
        format!(
            "Event created at order {}. {} events were shifted up.",
            order, placement.shifted
        )
    } else {
        format!("Event created at order {}.", order)
    };

    Ok((
        StatusCode::CREATED,
        Json(InsertResponse {
            message,
            event: placement.record,
            shifted: placement.shifted,
        }),
    ))
}

/// GET /timeline/next-order
pub async fn next_order<Q: Sequencer>(
    State(state): State<Arc<AppState<Q>>>,
) -> Result<Json<NextOrderResponse>, ApiError> {
    let next = state
        .sequencer
        .next_order()
        .await
        .map_err(|e| state.reject(e))?;
    Ok(Json(NextOrderResponse {
        next_order: next.next_order,
        total_events: next.total,
    }))
}

/// POST /timeline/reorder
/// Renumbers every event to its position.
pub async fn reorder<Q: Sequencer>(
    State(state): State<Arc<AppState<Q>>>,
) -> Result<Json<ReorderResponse>, ApiError> {
    let events_reordered = state
        .sequencer
        .renumber_all()
        .await
        .map_err(|e| state.reject(e))?;
    let total_events = state
        .sequencer
        .list()
        .await
        .map_err(|e| state.reject(e))?
        .len();

    Ok(Json(ReorderResponse {
        message: "Events reordered successfully.".into(),
        events_reordered,
        total_events,
    }))
}

/// GET /timeline/at/:order
pub async fn record_at<Q: Sequencer>(
    State(state): State<Arc<AppState<Q>>>,
    Path(raw): Path<String>,
) -> Result<Json<Record>, ApiError> {
    let order: u64 = raw
        .parse()
        .map_err(|_| state.reject(ApiError::BadRequest(format!("Invalid order: {}", raw))))?;

    match state
        .sequencer
        .record_at(order)
        .await
        .map_err(|e| state.reject(e))?
    {
        Some(record) => Ok(Json(record)),
        None => Err(state.reject(ApiError::NotFound(format!(
            "No event at order {}",
            order
        )))),
    }
}

/// GET /timeline/:id
pub async fn get_record<Q: Sequencer>(
    State(state): State<Arc<AppState<Q>>>,
    Path(raw): Path<String>,
) -> Result<Json<Record>, ApiError> {
    let id = parse_id(&raw).map_err(|e| state.reject(e))?;
    let record = state.sequencer.get(id).await.map_err(|e| state.reject(e))?;
    Ok(Json(record))
}

/// PUT /timeline/:id
/// Patches fields and, when `order` is present, moves the event.
pub async fn update_record<Q: Sequencer>(
    State(state): State<Arc<AppState<Q>>>,
    Path(raw): Path<String>,
    body: Bytes,
) -> Result<Json<UpdateResponse>, ApiError> {
    let id = parse_id(&raw).map_err(|e| state.reject(e))?;
    let mut fields = parse_object(&body).map_err(|e| state.reject(e))?;
    let order = take_order(&mut fields).map_err(|e| state.reject(e))?;

    let update = RecordUpdate {
        order,
        fields: (!fields.is_empty()).then_some(fields),
    };
    let moved = state
        .sequencer
        .update(id, update)
        .await
        .map_err(|e| state.reject(e))?;

    let message = if moved.order_changed() {
        format!(
            "Event updated. Order moved from {} to {}.",
            moved.previous_order, moved.record.order
        )
    } else {
        "Event updated.".to_string()
    };

    Ok(Json(UpdateResponse {
        message,
        event: moved.record,
    }))
}

/// DELETE /timeline/:id
pub async fn delete_record<Q: Sequencer>(
    State(state): State<Arc<AppState<Q>>>,
    Path(raw): Path<String>,
) -> Result<Json<DeleteResponse>, ApiError> {
    let id = parse_id(&raw).map_err(|e| state.reject(e))?;
    let removal = state
        .sequencer
        .delete_at(id)
        .await
        .map_err(|e| state.reject(e))?;

    Ok(Json(DeleteResponse {
        message: format!(
            "Event deleted successfully. Events after order {} were shifted down.",
            removal.order
        ),
        deleted_order: removal.order,
        shifted_down: removal.shifted,
    }))
}

/// GET /health
pub async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy"
    }))
}

/// Response for the stats endpoint.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsResponse {
    pub total_events: u64,
    pub next_order: u64,
    /// Whether stored orders are exactly `1..=totalEvents`.
    pub dense: bool,
    pub metrics: MetricsSnapshot,
}

/// GET /stats
/// Collection summary plus operation counters.
pub async fn get_stats<Q: Sequencer>(
    State(state): State<Arc<AppState<Q>>>,
) -> Result<Json<StatsResponse>, ApiError> {
    let next = state
        .sequencer
        .next_order()
        .await
        .map_err(|e| state.reject(e))?;
    let violation = state
        .sequencer
        .verify()
        .await
        .map_err(|e| state.reject(e))?;

    if let Some(violation) = &violation {
        tracing::warn!(%violation, "Stats found a non-dense collection");
    }

    Ok(Json(StatsResponse {
        total_events: next.total,
        next_order: next.next_order,
        dense: violation.is_none(),
        metrics: state.metrics.snapshot(),
    }))
}

/// GET /metrics
/// Returns metrics in Prometheus text exposition format.
pub async fn metrics<Q: Sequencer>(State(state): State<Arc<AppState<Q>>>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
        state.metrics.format_prometheus(),
    )
}
