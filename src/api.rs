//! HTTP surface

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use uuid::Uuid;
use validator::{Validate, ValidationErrors};

use crate::domain::aggregates::{Notification, Order, OrderItem};
use crate::gateway::GatewayError;
use crate::services::orchestrator::CancellationError;
use crate::services::outbox::OutboxEntry;
use crate::Services;

pub fn router(services: Services) -> Router {
    Router::new()
        .route("/health", get(|| async { Json(serde_json::json!({"status": "healthy", "service": "marketplace-orders"})) }))
        .route("/api/v1/orders/:id", get(get_order))
        .route("/api/v1/orders/:id/cancel", post(cancel_order))
        .route("/api/v1/orders/:id/outbox", get(order_outbox))
        .route("/api/v1/notifications/:recipient", get(list_notifications))
        .route("/api/v1/notifications/:id/read", post(mark_read))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(services)
}

#[derive(Debug)]
pub enum ApiError {
    Cancellation(CancellationError),
    Validation(ValidationErrors),
    Gateway(GatewayError),
    NotFound(String),
}

impl From<CancellationError> for ApiError {
    fn from(e: CancellationError) -> Self { ApiError::Cancellation(e) }
}

impl From<GatewayError> for ApiError {
    fn from(e: GatewayError) -> Self { ApiError::Gateway(e) }
}

impl From<ValidationErrors> for ApiError {
    fn from(e: ValidationErrors) -> Self { ApiError::Validation(e) }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::Cancellation(e) => {
                let status = match &e {
                    CancellationError::NotFound(_) => StatusCode::NOT_FOUND,
                    CancellationError::Rejected(_) | CancellationError::Conflict(_) => StatusCode::CONFLICT,
                    CancellationError::InvalidReason(_) => StatusCode::UNPROCESSABLE_ENTITY,
                    CancellationError::Gateway(g) => {
                        tracing::error!(error = %g, "Cancellation failed on the data gateway");
                        StatusCode::INTERNAL_SERVER_ERROR
                    }
                };
                (status, e.to_string())
            }
            ApiError::Validation(e) => (StatusCode::UNPROCESSABLE_ENTITY, e.to_string()),
            ApiError::Gateway(e) => {
                tracing::error!(error = %e, "Data gateway error");
                (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
            }
            ApiError::NotFound(what) => (StatusCode::NOT_FOUND, format!("{what} not found")),
        };
        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}

#[derive(Debug, Serialize)]
pub struct OrderView {
    #[serde(flatten)]
    pub order: Order,
    pub items: Vec<OrderItem>,
}

impl From<Order> for OrderView {
    fn from(order: Order) -> Self {
        let items = order.items().to_vec();
        Self { order, items }
    }
}

#[derive(Debug, Deserialize, Validate)]
pub struct CancelOrderRequest {
    #[validate(length(min = 1, max = 500))]
    pub reason: String,
    pub actor_id: Uuid,
}

#[derive(Debug, Deserialize)]
pub struct NotificationParams { pub unread_only: Option<bool> }

async fn get_order(State(s): State<Services>, Path(id): Path<Uuid>) -> Result<Json<OrderView>, ApiError> {
    Ok(Json(s.orchestrator.load(id).await?.into()))
}

async fn cancel_order(
    State(s): State<Services>,
    Path(id): Path<Uuid>,
    Json(r): Json<CancelOrderRequest>,
) -> Result<Json<OrderView>, ApiError> {
    r.validate()?;
    let order = s.orchestrator.cancel_order(id, &r.reason, r.actor_id).await?;
    Ok(Json(order.into()))
}

async fn order_outbox(State(s): State<Services>, Path(id): Path<Uuid>) -> Result<Json<Vec<OutboxEntry>>, ApiError> {
    Ok(Json(s.relay.entries_for(id).await?))
}

async fn list_notifications(
    State(s): State<Services>,
    Path(recipient): Path<Uuid>,
    Query(p): Query<NotificationParams>,
) -> Result<Json<Vec<Notification>>, ApiError> {
    Ok(Json(s.notifications.list_for(recipient, p.unread_only.unwrap_or(false)).await?))
}

async fn mark_read(State(s): State<Services>, Path(id): Path<Uuid>) -> Result<StatusCode, ApiError> {
    if s.notifications.mark_read(id).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::NotFound(format!("Notification {id}")))
    }
}
