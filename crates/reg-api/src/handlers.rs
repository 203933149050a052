//! # Request Handlers
//!
//! Axum request handlers for the registration API.
//! Caller identity comes from the `Actor` extractor; every domain error is
//! mapped through `PackageError::status_code()`.

use crate::extract::Actor;
use crate::state::AppState;
use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use reg_core::{
    BatchInput, PackageError, PackageResult, ParticipantPayload, PaymentMethod, ReconcileOutcome,
};
use reg_mercadopago::WebhookNotification;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

// =============================================================================
// Request/Response Types
// =============================================================================

/// Create package / add registration request
#[derive(Debug, Deserialize)]
pub struct RegistrationRequest {
    /// Event the participant registers for
    pub event_id: Uuid,
    #[serde(flatten)]
    pub participant: ParticipantPayload,
}

/// Create payment intent request
#[derive(Debug, Deserialize)]
pub struct PaymentRequest {
    /// "pix" or "credit_card"
    pub payment_method: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct RevertQuery {
    /// Only this package; every pending package when absent
    #[serde(default)]
    pub package_id: Option<Uuid>,
}

/// Error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>, code: u16) -> Self {
        Self {
            error: error.into(),
            code,
            details: None,
        }
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }
}

pub type ApiError = (StatusCode, Json<ErrorResponse>);

fn error_body(err: &PackageError) -> ErrorResponse {
    let response = ErrorResponse::new(err.to_string(), err.status_code());
    match err.validation_errors() {
        Some(fields) => response.with_details(json!(fields)),
        None => response,
    }
}

pub(crate) fn package_error_to_response(err: PackageError) -> ApiError {
    let code = err.status_code();
    (
        StatusCode::from_u16(code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
        Json(error_body(&err)),
    )
}

/// Webhook answer for a reconciliation result.
///
/// Errors that may clear up later answer non-2xx so Mercado Pago redelivers;
/// errors that never will answer 200 so it stops.
pub(crate) fn webhook_disposition(result: PackageResult<ReconcileOutcome>) -> Response {
    match result {
        Ok(outcome) => {
            info!(
                package_number = %outcome.package_number(),
                "Webhook reconciled: {:?}",
                outcome
            );
            (
                StatusCode::OK,
                Json(json!({ "status": "processed", "result": outcome })),
            )
                .into_response()
        }
        Err(e) if e.is_retryable() => {
            warn!("Webhook reconcile failed, asking for redelivery: {}", e);
            package_error_to_response(e).into_response()
        }
        Err(e) => {
            error!("Webhook reconcile rejected: {}", e);
            (
                StatusCode::OK,
                Json(json!({ "status": "rejected", "error": error_body(&e) })),
            )
                .into_response()
        }
    }
}

// =============================================================================
// Handlers
// =============================================================================

/// Health check endpoint
pub async fn health() -> impl IntoResponse {
    Json(json!({
        "status": "healthy",
        "service": "regpack",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// Events with their currently active batch
pub async fn list_events(State(state): State<AppState>) -> impl IntoResponse {
    let events = state.catalog.listings(state.clock.today());
    Json(json!({
        "events": events,
        "count": events.len()
    }))
}

pub async fn list_batches(
    State(state): State<AppState>,
    Path(event_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let batches = state
        .catalog
        .batches(event_id)
        .map_err(package_error_to_response)?;
    Ok(Json(json!({
        "event_id": event_id,
        "batches": batches,
        "count": batches.len()
    })))
}

#[instrument(skip(state, actor, input), fields(user_id = %actor.0.user_id))]
pub async fn create_batch(
    State(state): State<AppState>,
    actor: Actor,
    Path(event_id): Path<Uuid>,
    Json(input): Json<BatchInput>,
) -> Result<impl IntoResponse, ApiError> {
    let batch = state
        .catalog
        .create_batch(&actor.0, event_id, input)
        .map_err(package_error_to_response)?;
    Ok((StatusCode::CREATED, Json(batch)))
}

#[instrument(skip(state, actor, input), fields(user_id = %actor.0.user_id))]
pub async fn update_batch(
    State(state): State<AppState>,
    actor: Actor,
    Path((event_id, batch_id)): Path<(Uuid, Uuid)>,
    Json(input): Json<BatchInput>,
) -> Result<impl IntoResponse, ApiError> {
    let batch = state
        .catalog
        .update_batch(&actor.0, event_id, batch_id, input)
        .map_err(package_error_to_response)?;
    Ok(Json(batch))
}

#[instrument(skip(state, actor), fields(user_id = %actor.0.user_id))]
pub async fn delete_batch(
    State(state): State<AppState>,
    actor: Actor,
    Path((event_id, batch_id)): Path<(Uuid, Uuid)>,
) -> Result<StatusCode, ApiError> {
    state
        .catalog
        .delete_batch(&actor.0, event_id, batch_id)
        .map_err(package_error_to_response)?;
    Ok(StatusCode::NO_CONTENT)
}

/// Create a package holding its first registration
#[instrument(skip(state, actor, request), fields(user_id = %actor.0.user_id, event_id = %request.event_id))]
pub async fn create_package(
    State(state): State<AppState>,
    actor: Actor,
    Json(request): Json<RegistrationRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let admission = state
        .registrations
        .add_registration(&actor.0, None, request.event_id, request.participant)
        .await
        .map_err(package_error_to_response)?;
    Ok((StatusCode::CREATED, Json(admission)))
}

pub async fn list_packages(State(state): State<AppState>, actor: Actor) -> impl IntoResponse {
    let packages = state.registrations.list_packages(&actor.0);
    Json(json!({
        "packages": packages,
        "count": packages.len()
    }))
}

pub async fn get_package(
    State(state): State<AppState>,
    actor: Actor,
    Path(package_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let view = state
        .registrations
        .get_package(&actor.0, package_id)
        .await
        .map_err(package_error_to_response)?;
    Ok(Json(view))
}

pub async fn get_total(
    State(state): State<AppState>,
    actor: Actor,
    Path(package_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let total = state
        .registrations
        .get_total(&actor.0, package_id)
        .await
        .map_err(package_error_to_response)?;
    Ok(Json(json!({
        "package_id": package_id,
        "total_amount": total
    })))
}

#[instrument(skip(state, actor, request), fields(user_id = %actor.0.user_id, event_id = %request.event_id))]
pub async fn add_registration(
    State(state): State<AppState>,
    actor: Actor,
    Path(package_id): Path<Uuid>,
    Json(request): Json<RegistrationRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let admission = state
        .registrations
        .add_registration(&actor.0, Some(package_id), request.event_id, request.participant)
        .await
        .map_err(package_error_to_response)?;
    Ok((StatusCode::CREATED, Json(admission)))
}

#[instrument(skip(state, actor), fields(user_id = %actor.0.user_id))]
pub async fn remove_registration(
    State(state): State<AppState>,
    actor: Actor,
    Path((package_id, registration_id)): Path<(Uuid, Uuid)>,
) -> Result<impl IntoResponse, ApiError> {
    let outcome = state
        .registrations
        .remove_registration(&actor.0, package_id, registration_id)
        .await
        .map_err(package_error_to_response)?;
    Ok(Json(outcome))
}

/// Start checkout for a draft package
#[instrument(skip(state, actor, request), fields(user_id = %actor.0.user_id, method = %request.payment_method))]
pub async fn create_payment(
    State(state): State<AppState>,
    actor: Actor,
    Path(package_id): Path<Uuid>,
    Json(request): Json<PaymentRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let method: PaymentMethod = request
        .payment_method
        .parse()
        .map_err(package_error_to_response)?;

    let intent = state
        .orchestrator
        .create_payment_intent(&actor.0, package_id, method)
        .await
        .map_err(|e| {
            error!("Failed to create payment intent: {}", e);
            package_error_to_response(e)
        })?;

    info!(
        package_number = %intent.package_number(),
        "Created {} payment intent",
        intent.method()
    );
    Ok(Json(intent))
}

/// Put pending packages back to draft (administrators)
#[instrument(skip(state, actor), fields(user_id = %actor.0.user_id))]
pub async fn revert_pending(
    State(state): State<AppState>,
    actor: Actor,
    Query(query): Query<RevertQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let reports = state
        .orchestrator
        .revert_pending_to_draft(&actor.0, query.package_id)
        .await
        .map_err(package_error_to_response)?;
    let reverted = reports.iter().filter(|r| r.reverted).count();
    Ok(Json(json!({
        "packages": reports,
        "reverted": reverted
    })))
}

/// Handle Mercado Pago webhook
#[instrument(skip(state, headers, query, body))]
pub async fn mercadopago_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<HashMap<String, String>>,
    body: Bytes,
) -> Response {
    let payload: Value = if body.is_empty() {
        Value::Null
    } else {
        match serde_json::from_slice(&body) {
            Ok(value) => value,
            Err(e) => {
                warn!("Webhook body is not JSON: {}", e);
                Value::Null
            }
        }
    };

    let notification = match WebhookNotification::parse(&payload, &query) {
        Ok(notification) => notification,
        Err(e) => {
            error!("Webhook notification rejected: {}", e);
            return package_error_to_response(PackageError::CallbackValidation(e.to_string()))
                .into_response();
        }
    };

    let signature = headers.get("x-signature").and_then(|v| v.to_str().ok());
    let request_id = headers.get("x-request-id").and_then(|v| v.to_str().ok());

    if let Err(e) = state.verifier.verify(
        signature,
        request_id,
        &notification.signature_data_id(),
        state.clock.now(),
    ) {
        error!("Webhook verification failed: {}", e);
        return (
            StatusCode::UNAUTHORIZED,
            Json(ErrorResponse::new(
                format!("webhook verification failed: {e}"),
                401,
            )),
        )
            .into_response();
    }

    info!(
        "Received webhook: topic={:?}, payment_id={:?}",
        notification.topic, notification.payment_id
    );

    if !notification.is_payment() {
        return (
            StatusCode::OK,
            Json(json!({ "status": "ignored", "topic": notification.topic })),
        )
            .into_response();
    }

    let result = match notification.payment_id.as_deref() {
        Some(payment_id) => state.orchestrator.reconcile(payment_id).await,
        None => Err(PackageError::CallbackValidation(
            "notification carries no payment id".to_string(),
        )),
    };

    webhook_disposition(result)
}

/// Return page after hosted checkout (success, failure or pending)
pub async fn payment_return(
    Path((outcome, package_id)): Path<(String, Uuid)>,
) -> Result<impl IntoResponse, ApiError> {
    let message = match outcome.as_str() {
        "success" => "Payment received. Your confirmation will arrive by email.",
        "failure" => "Payment was not completed. You can try again from your package.",
        "pending" => "Payment is being processed. We will email you once it clears.",
        other => {
            return Err((
                StatusCode::NOT_FOUND,
                Json(ErrorResponse::new(
                    format!("Unknown payment outcome: {}", other),
                    404,
                )),
            ))
        }
    };

    Ok(Json(json!({
        "package_id": package_id,
        "result": outcome,
        "message": message
    })))
}
