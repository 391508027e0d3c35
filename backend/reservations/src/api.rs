//! Axum REST API handlers.

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Redirect, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use hosted_checkout::FieldMap;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use tracing::{error, warn};
use url::form_urlencoded;

use crate::db;
use crate::errors::{AppError, Result};
use crate::facade::{BillingAddress, InitiatedCheckout, PaymentService};
use crate::gateway::CardDetails;
use crate::models::{Reservation, Room, DEFAULT_CURRENCY};
use crate::payments;
use crate::reservations::{self, NewReservation};

#[derive(Clone)]
pub struct ApiState {
    pub pool: SqlitePool,
    pub payments: PaymentService,
}

pub fn router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/rooms", get(list_rooms).post(create_room))
        .route("/api/rooms/:id", get(get_room))
        .route("/api/reservations", get(list_reservations).post(create_reservation))
        .route("/api/reservations/:id", get(get_reservation))
        .route("/api/reservations/:id/cancel", post(cancel_reservation))
        .route("/api/reservations/:id/confirm", post(confirm_reservation))
        .route("/api/payments", get(list_payments))
        .route("/api/payments/stats", get(payment_stats))
        .route("/api/payments/initiate", post(initiate_payment))
        .route("/api/payments/callback", post(payment_callback))
        .route("/api/payments/cancel", post(payment_cancel))
        .route("/api/payments/mock-checkout", post(mock_checkout))
        .route("/api/payments/charge", post(charge))
        .route("/api/payments/reservation/:id", get(reservation_payments))
        .route("/api/payments/:id", get(get_payment))
        .route("/api/payments/:id/refund", post(refund))
        .with_state(state)
}

// ─────────────────────────────────────────────────────────
// Response shapes
// ─────────────────────────────────────────────────────────

#[derive(Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: T,
}

fn ok<T: Serialize>(data: T) -> Json<ApiResponse<T>> {
    Json(ApiResponse {
        success: true,
        data,
    })
}

#[derive(Serialize)]
pub struct ListResponse<T> {
    pub count: usize,
    pub items: Vec<T>,
}

impl<T> From<Vec<T>> for ListResponse<T> {
    fn from(items: Vec<T>) -> Self {
        Self {
            count: items.len(),
            items,
        }
    }
}

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub gateway: &'static str,
    pub simulated: bool,
}

#[derive(Serialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub code: &'static str,
    pub error: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatedReservation {
    pub reservation: Reservation,
    /// Absent when the checkout could not be opened right away; the client
    /// can retry through `/api/payments/initiate`.
    pub checkout: Option<InitiatedCheckout>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match &self {
            AppError::Validation(_) | AppError::InvalidSignature => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::GatewayDecline { .. } => StatusCode::PAYMENT_REQUIRED,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            error!(error = %self, "Request failed");
        }
        (
            status,
            Json(ErrorResponse {
                success: false,
                code: self.code(),
                error: self.public_message(),
            }),
        )
            .into_response()
    }
}

// ─────────────────────────────────────────────────────────
// Request shapes
// ─────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateRoom {
    pub number: String,
    pub name: String,
    pub price: Decimal,
    #[serde(default)]
    pub currency: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitiatePayment {
    pub reservation_id: String,
    #[serde(default)]
    pub billing: BillingAddress,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChargeCard {
    pub reservation_id: String,
    pub card: CardDetails,
    #[serde(default)]
    pub billing: BillingAddress,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefundPayment {
    #[serde(default)]
    pub amount: Option<Decimal>,
    #[serde(default)]
    pub reason: Option<String>,
}

/// Processor callbacks are urlencoded forms. Whatever arrives is parsed; the
/// signature check decides what it is worth.
fn form_fields(body: &Bytes) -> FieldMap {
    form_urlencoded::parse(body).into_owned().collect()
}

// ─────────────────────────────────────────────────────────
// Handlers
// ─────────────────────────────────────────────────────────

/// `GET /health`
pub async fn health(State(state): State<Arc<ApiState>>) -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        gateway: state.payments.gateway().name(),
        simulated: state.payments.gateway().is_simulated(),
    })
}

/// `POST /api/rooms`
pub async fn create_room(
    State(state): State<Arc<ApiState>>,
    Json(body): Json<CreateRoom>,
) -> Result<impl IntoResponse> {
    if body.number.trim().is_empty() || body.name.trim().is_empty() {
        return Err(AppError::Validation("room number and name are required".to_string()));
    }
    if body.price <= Decimal::ZERO {
        return Err(AppError::Validation("room price must be positive".to_string()));
    }
    let room = Room {
        id: uuid::Uuid::new_v4().to_string(),
        number: body.number.trim().to_string(),
        name: body.name.trim().to_string(),
        price: body.price,
        currency: body.currency.unwrap_or_else(|| DEFAULT_CURRENCY.to_string()),
        created_at: Utc::now().timestamp(),
    };
    match db::insert_room(&state.pool, &room).await {
        Ok(()) => Ok((StatusCode::CREATED, ok(room))),
        Err(AppError::Database(e)) if db::is_unique_violation(&e) => Err(AppError::Conflict(
            format!("room {} already exists", room.number),
        )),
        Err(e) => Err(e),
    }
}

/// `GET /api/rooms`
pub async fn list_rooms(State(state): State<Arc<ApiState>>) -> Result<impl IntoResponse> {
    Ok(ok(ListResponse::from(db::list_rooms(&state.pool).await?)))
}

/// `GET /api/rooms/:id`
pub async fn get_room(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse> {
    let room = db::get_room(&state.pool, &id)
        .await?
        .ok_or_else(|| AppError::NotFound("Room".to_string()))?;
    Ok(ok(room))
}

/// `POST /api/reservations`
///
/// Creates the reservation and opens its checkout in one call.
pub async fn create_reservation(
    State(state): State<Arc<ApiState>>,
    Json(body): Json<NewReservation>,
) -> Result<impl IntoResponse> {
    let reservation =
        reservations::create_reservation(&state.pool, body, Utc::now().timestamp()).await?;

    let checkout = match state
        .payments
        .initiate_redirect(&reservation.id, BillingAddress::default())
        .await
    {
        Ok(checkout) => Some(checkout),
        Err(e) => {
            warn!(reservation_id = %reservation.id, error = %e, "Checkout not opened at creation");
            None
        }
    };
    let reservation = match &checkout {
        Some(c) => c.reservation.clone(),
        None => reservation,
    };

    Ok((
        StatusCode::CREATED,
        ok(CreatedReservation {
            reservation,
            checkout,
        }),
    ))
}

/// `GET /api/reservations`
pub async fn list_reservations(State(state): State<Arc<ApiState>>) -> Result<impl IntoResponse> {
    Ok(ok(ListResponse::from(db::list_reservations(&state.pool).await?)))
}

/// `GET /api/reservations/:id`
pub async fn get_reservation(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse> {
    Ok(ok(reservations::get_reservation(&state.pool, &id).await?))
}

/// `POST /api/reservations/:id/cancel`
pub async fn cancel_reservation(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse> {
    let reservation =
        reservations::cancel_reservation(&state.pool, &id, Utc::now().timestamp()).await?;
    Ok(ok(reservation))
}

/// `POST /api/reservations/:id/confirm`
pub async fn confirm_reservation(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse> {
    let reservation =
        reservations::confirm_reservation(&state.pool, &id, Utc::now().timestamp()).await?;
    Ok(ok(reservation))
}

/// `POST /api/payments/initiate`
pub async fn initiate_payment(
    State(state): State<Arc<ApiState>>,
    Json(body): Json<InitiatePayment>,
) -> Result<impl IntoResponse> {
    let checkout = state
        .payments
        .initiate_redirect(&body.reservation_id, body.billing)
        .await?;
    Ok(ok(checkout))
}

/// `POST /api/payments/callback`: processor receipt page.
pub async fn payment_callback(State(state): State<Arc<ApiState>>, body: Bytes) -> Redirect {
    let url = state.payments.handle_callback(&form_fields(&body)).await;
    Redirect::to(&url)
}

/// `POST /api/payments/cancel`: processor cancel page.
pub async fn payment_cancel(State(state): State<Arc<ApiState>>, body: Bytes) -> Redirect {
    let url = state.payments.handle_cancel(&form_fields(&body)).await;
    Redirect::to(&url)
}

/// `POST /api/payments/mock-checkout`: the simulated hosted page.
pub async fn mock_checkout(
    State(state): State<Arc<ApiState>>,
    body: Bytes,
) -> Result<Redirect> {
    let url = state.payments.simulate_checkout(&form_fields(&body)).await?;
    Ok(Redirect::to(&url))
}

/// `POST /api/payments/charge`
pub async fn charge(
    State(state): State<Arc<ApiState>>,
    Json(body): Json<ChargeCard>,
) -> Result<impl IntoResponse> {
    let receipt = state
        .payments
        .process_payment(&body.reservation_id, body.card, body.billing)
        .await?;
    Ok(ok(receipt))
}

/// `POST /api/payments/:id/refund`
pub async fn refund(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<String>,
    body: Option<Json<RefundPayment>>,
) -> Result<impl IntoResponse> {
    let Json(body) = body.unwrap_or_default();
    let refund = state
        .payments
        .process_refund(&id, body.amount, body.reason)
        .await?;
    Ok((StatusCode::CREATED, ok(refund)))
}

/// `GET /api/payments`
pub async fn list_payments(State(state): State<Arc<ApiState>>) -> Result<impl IntoResponse> {
    let payments = db::list_payments(&state.pool).await?;
    Ok(ok(ListResponse::from(payments)))
}

/// `GET /api/payments/stats`
pub async fn payment_stats(State(state): State<Arc<ApiState>>) -> Result<impl IntoResponse> {
    Ok(ok(payments::payment_stats(&state.pool).await?))
}

/// `GET /api/payments/:id`
pub async fn get_payment(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse> {
    let payment = db::get_payment(&state.pool, &id)
        .await?
        .ok_or_else(|| AppError::NotFound("Payment".to_string()))?;
    Ok(ok(payment))
}

/// `GET /api/payments/reservation/:id`
pub async fn reservation_payments(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse> {
    reservations::get_reservation(&state.pool, &id).await?;
    let payments = db::list_payments_for_reservation(&state.pool, &id).await?;
    Ok(ok(ListResponse::from(payments)))
}
