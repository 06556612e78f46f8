//! HTTP request handlers with OpenAPI documentation.

use std::sync::Arc;

use axum::{
    Json,
    body::Bytes,
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
};
use tracing::{error, info, warn};
use utoipa::OpenApi;
use validator::Validate;

use crate::app::{AppState, SignatureError};
use crate::domain::{
    AppError, BookingState, ConfirmBookingRequest, DatabaseError, EmailWebhookEvent, ErrorDetail,
    ErrorResponse, ExternalServiceError, FulfillmentOutcome, FulfillmentRequest,
    FulfillmentResponse, FulfillmentStatus, HealthResponse, HealthStatus, ListFulfillmentParams,
    PaymentWebhookEvent, RateLimitResponse, TimeSlot, ValidationError, WebhookAck,
};

/// OpenAPI documentation structure
#[derive(OpenApi)]
#[openapi(
    info(
        title = "Fulfillment Relay API",
        version = "0.1.0",
        description = "Webhook intake that turns payments into field-service CRM jobs and routes inbound email to content processors",
        license(
            name = "MIT"
        )
    ),
    paths(
        email_webhook_handler,
        payment_webhook_handler,
        confirm_booking_handler,
        get_fulfillment_request_handler,
        list_fulfillment_requests_handler,
        retry_fulfillment_handler,
        health_check_handler,
        liveness_handler,
        readiness_handler,
    ),
    components(
        schemas(
            EmailWebhookEvent,
            crate::domain::InboundEmailEvent,
            crate::domain::AttachmentDescriptor,
            ConfirmBookingRequest,
            FulfillmentResponse,
            BookingState,
            FulfillmentRequest,
            FulfillmentStatus,
            TimeSlot,
            ListFulfillmentParams,
            WebhookAck,
            HealthResponse,
            HealthStatus,
            ErrorResponse,
            ErrorDetail,
            RateLimitResponse,
        )
    ),
    tags(
        (name = "webhooks", description = "Signed inbound webhooks"),
        (name = "bookings", description = "Booking confirmation"),
        (name = "fulfillment", description = "Fulfillment record inspection and retry"),
        (name = "health", description = "Health check endpoints")
    )
)]
pub struct ApiDoc;

/// `200` for a settled job, `202` while the conversion is pending or failed
fn booking_response(outcome: &FulfillmentOutcome) -> (StatusCode, Json<FulfillmentResponse>) {
    let body = FulfillmentResponse::from_outcome(outcome);
    let status = match body.status {
        BookingState::Confirmed => StatusCode::OK,
        BookingState::Processing => StatusCode::ACCEPTED,
    };
    (status, Json(body))
}

fn processing_response(key: String) -> (StatusCode, Json<FulfillmentResponse>) {
    (
        StatusCode::ACCEPTED,
        Json(FulfillmentResponse::processing(key)),
    )
}

/// Receive an inbound email
///
/// The signature is checked before anything else. Every request that passes
/// is acknowledged with `200`, including unsupported event types and routing
/// failures, so the provider never redelivers.
#[utoipa::path(
    post,
    path = "/webhooks/email",
    tag = "webhooks",
    request_body = EmailWebhookEvent,
    responses(
        (status = 200, description = "Event received", body = WebhookAck),
        (status = 400, description = "Missing or invalid signature headers", body = ErrorResponse),
        (status = 500, description = "Verifier misconfigured", body = ErrorResponse)
    )
)]
pub async fn email_webhook_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<WebhookAck>, AppError> {
    let event = match state.email_verifier.verify(&headers, &body) {
        Ok(event) => event,
        Err(SignatureError::MalformedPayload(message)) => {
            warn!(error = %message, "Signed email webhook with unreadable body, acknowledging");
            return Ok(Json(WebhookAck::received()));
        }
        Err(e) => {
            warn!(error = %e, "Email webhook rejected");
            return Err(e.into());
        }
    };

    let raw = String::from_utf8_lossy(&body);
    let report = state.email.ingest(&event, &raw).await;
    info!(
        email_id = %event.data.email_id,
        ignored = report.ignored,
        dispatched = report.dispatched.len(),
        "Email webhook handled"
    );
    Ok(Json(WebhookAck::received()))
}

/// Receive a payment gateway event
///
/// `checkout.session.completed` runs fulfillment. Once the outcome is
/// recorded the event is acknowledged even if the CRM step failed; store or
/// gateway outages answer `5xx` so the gateway redelivers.
#[utoipa::path(
    post,
    path = "/webhooks/payment",
    tag = "webhooks",
    request_body(content = String, content_type = "application/json"),
    responses(
        (status = 200, description = "Event received", body = WebhookAck),
        (status = 400, description = "Missing or invalid signature", body = ErrorResponse),
        (status = 501, description = "Payment webhook not configured", body = ErrorResponse),
        (status = 502, description = "Payment gateway unavailable", body = ErrorResponse),
        (status = 503, description = "Store unavailable", body = ErrorResponse)
    )
)]
pub async fn payment_webhook_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<WebhookAck>, AppError> {
    let verifier = state
        .payment_verifier
        .as_ref()
        .ok_or_else(|| AppError::NotSupported("payment webhook secret not configured".to_string()))?;

    let event: PaymentWebhookEvent = verifier.verify(&headers, &body).map_err(|e| {
        warn!(error = %e, "Payment webhook rejected");
        AppError::from(e)
    })?;

    if event.event_type != PaymentWebhookEvent::CHECKOUT_COMPLETED {
        info!(event_id = %event.id, event_type = %event.event_type, "Ignoring payment event type");
        return Ok(Json(WebhookAck::received()));
    }

    let session_id = event.session_id().ok_or_else(|| {
        AppError::Validation(ValidationError::MissingField("data.object.id".to_string()))
    })?;

    match state.fulfillment.fulfill_session(session_id).await {
        Ok(outcome) => {
            info!(
                event_id = %event.id,
                job_number = ?outcome.job_number(),
                "Payment webhook fulfilled"
            );
        }
        Err(AppError::FulfillmentFailed(key)) => {
            warn!(event_id = %event.id, idempotency_key = %key, "Fulfillment failed and was recorded");
        }
        Err(AppError::Validation(e)) => {
            warn!(event_id = %event.id, error = %e, "Session is not paid, acknowledging");
        }
        Err(e) => return Err(e),
    }
    Ok(Json(WebhookAck::received()))
}

/// Confirm a booking after checkout
///
/// Called by the browser on the success page. The session is checked with
/// the payment gateway before anything is created.
#[utoipa::path(
    post,
    path = "/bookings/confirm",
    tag = "bookings",
    request_body = ConfirmBookingRequest,
    responses(
        (status = 200, description = "Job created", body = FulfillmentResponse),
        (status = 202, description = "Still processing", body = FulfillmentResponse),
        (status = 400, description = "Invalid request or unpaid session", body = ErrorResponse),
        (status = 404, description = "Unknown session", body = ErrorResponse),
        (status = 429, description = "Rate limit exceeded", body = RateLimitResponse),
        (status = 502, description = "Payment gateway unavailable", body = ErrorResponse)
    )
)]
pub async fn confirm_booking_handler(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<ConfirmBookingRequest>,
) -> Result<(StatusCode, Json<FulfillmentResponse>), AppError> {
    payload
        .validate()
        .map_err(|e| AppError::Validation(ValidationError::Multiple(e.to_string())))?;

    match state.fulfillment.fulfill_session(&payload.session_id).await {
        Ok(outcome) => Ok(booking_response(&outcome)),
        Err(AppError::FulfillmentFailed(key)) => Ok(processing_response(key)),
        Err(e) => Err(e),
    }
}

/// Get a fulfillment record by idempotency key
#[utoipa::path(
    get,
    path = "/fulfillment-requests/{key}",
    tag = "fulfillment",
    params(
        ("key" = String, Path, description = "Payment transaction id")
    ),
    responses(
        (status = 200, description = "Record found", body = FulfillmentRequest),
        (status = 404, description = "Record not found", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    )
)]
pub async fn get_fulfillment_request_handler(
    State(state): State<Arc<AppState>>,
    Path(key): Path<String>,
) -> Result<Json<FulfillmentRequest>, AppError> {
    let record = state.fulfillment.get(&key).await?;
    Ok(Json(record))
}

/// List fulfillment records by status
#[utoipa::path(
    get,
    path = "/fulfillment-requests",
    tag = "fulfillment",
    params(
        ("status" = Option<FulfillmentStatus>, Query, description = "Status filter (default: failed)"),
        ("limit" = Option<i64>, Query, description = "Maximum number of records (1-100, default: 20)")
    ),
    responses(
        (status = 200, description = "Matching records, newest first", body = Vec<FulfillmentRequest>),
        (status = 400, description = "Invalid parameters", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    )
)]
pub async fn list_fulfillment_requests_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ListFulfillmentParams>,
) -> Result<Json<Vec<FulfillmentRequest>>, AppError> {
    params
        .validate()
        .map_err(|e| AppError::Validation(ValidationError::Multiple(e.to_string())))?;
    let records = state.fulfillment.list(params.status, params.limit).await?;
    Ok(Json(records))
}

/// Retry a failed fulfillment
#[utoipa::path(
    post,
    path = "/fulfillment-requests/{key}/retry",
    tag = "fulfillment",
    params(
        ("key" = String, Path, description = "Payment transaction id")
    ),
    responses(
        (status = 200, description = "Job created", body = FulfillmentResponse),
        (status = 202, description = "Retry failed again or is still processing", body = FulfillmentResponse),
        (status = 400, description = "Record is not failed", body = ErrorResponse),
        (status = 404, description = "Record not found", body = ErrorResponse)
    )
)]
pub async fn retry_fulfillment_handler(
    State(state): State<Arc<AppState>>,
    Path(key): Path<String>,
) -> Result<(StatusCode, Json<FulfillmentResponse>), AppError> {
    match state.fulfillment.retry(&key).await {
        Ok(outcome) => Ok(booking_response(&outcome)),
        Err(AppError::FulfillmentFailed(key)) => Ok(processing_response(key)),
        Err(e) => Err(e),
    }
}

/// Detailed health check
#[utoipa::path(
    get,
    path = "/health",
    tag = "health",
    responses(
        (status = 200, description = "Health status", body = HealthResponse)
    )
)]
pub async fn health_check_handler(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(state.health().await)
}

/// Kubernetes liveness probe
#[utoipa::path(
    get,
    path = "/health/live",
    tag = "health",
    responses(
        (status = 200, description = "Application is alive")
    )
)]
pub async fn liveness_handler() -> StatusCode {
    StatusCode::OK
}

/// Kubernetes readiness probe
#[utoipa::path(
    get,
    path = "/health/ready",
    tag = "health",
    responses(
        (status = 200, description = "Application is ready to serve traffic"),
        (status = 503, description = "Application is not ready")
    )
)]
pub async fn readiness_handler(State(state): State<Arc<AppState>>) -> StatusCode {
    match state.health().await.status {
        HealthStatus::Healthy | HealthStatus::Degraded => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let (status, error_type, message) = match &self {
            AppError::Database(db_err) => match db_err {
                DatabaseError::Connection(_) => (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "database_error",
                    self.to_string(),
                ),
                DatabaseError::NotFound(_) => {
                    (StatusCode::NOT_FOUND, "not_found", self.to_string())
                }
                DatabaseError::Duplicate(_) => {
                    (StatusCode::CONFLICT, "duplicate", self.to_string())
                }
                _ => (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "database_error",
                    self.to_string(),
                ),
            },
            AppError::ExternalService(ext_err) => match ext_err {
                ExternalServiceError::Timeout(_) => {
                    (StatusCode::GATEWAY_TIMEOUT, "timeout", self.to_string())
                }
                ExternalServiceError::RateLimited(_) => (
                    StatusCode::TOO_MANY_REQUESTS,
                    "rate_limited",
                    self.to_string(),
                ),
                _ => (
                    StatusCode::BAD_GATEWAY,
                    "external_service_error",
                    self.to_string(),
                ),
            },
            AppError::Config(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "configuration_error",
                self.to_string(),
            ),
            AppError::Validation(_) => (
                StatusCode::BAD_REQUEST,
                "validation_error",
                self.to_string(),
            ),
            AppError::Authentication(_) => (
                StatusCode::BAD_REQUEST,
                "invalid_signature",
                self.to_string(),
            ),
            AppError::ResourceNotFound(_) => {
                (StatusCode::NOT_FOUND, "not_found", self.to_string())
            }
            AppError::FulfillmentFailed(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "fulfillment_failed",
                self.to_string(),
            ),
            AppError::Serialization(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "serialization_error",
                self.to_string(),
            ),
            AppError::Deserialization(_) => (
                StatusCode::BAD_REQUEST,
                "deserialization_error",
                self.to_string(),
            ),
            AppError::Internal(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal_error",
                self.to_string(),
            ),
            AppError::NotSupported(_) => (
                StatusCode::NOT_IMPLEMENTED,
                "not_supported",
                self.to_string(),
            ),
            AppError::RateLimited => (
                StatusCode::TOO_MANY_REQUESTS,
                "rate_limited",
                "Rate limit exceeded".to_string(),
            ),
        };

        if status.is_server_error() {
            error!(error_type = %error_type, message = %message, "Server error");
        }

        let body = Json(ErrorResponse {
            error: ErrorDetail {
                r#type: error_type.to_string(),
                message,
            },
        });

        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::BodyExt;

    async fn error_body(err: AppError) -> (StatusCode, ErrorResponse) {
        let response = err.into_response();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn test_authentication_maps_to_bad_request() {
        let (status, body) = error_body(AppError::Authentication("no match".to_string())).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body.error.r#type, "invalid_signature");
    }

    #[tokio::test]
    async fn test_upstream_errors_map_to_gateway_statuses() {
        let (status, _) = error_body(AppError::ExternalService(
            ExternalServiceError::Unavailable("crm".to_string()),
        ))
        .await;
        assert_eq!(status, StatusCode::BAD_GATEWAY);

        let (status, _) = error_body(AppError::ExternalService(
            ExternalServiceError::RateLimited("crm".to_string()),
        ))
        .await;
        assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    }

    #[tokio::test]
    async fn test_resource_not_found_maps_to_404() {
        let (status, body) = error_body(AppError::ResourceNotFound("x".to_string())).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body.error.r#type, "not_found");
    }

    #[test]
    fn test_openapi_lists_webhook_paths() {
        let doc = ApiDoc::openapi();
        assert!(doc.paths.paths.contains_key("/webhooks/email"));
        assert!(doc.paths.paths.contains_key("/bookings/confirm"));
    }

    #[test]
    fn test_openapi_payment_webhook_takes_raw_json_body() {
        let doc = ApiDoc::openapi();
        let operation = doc.paths.paths["/webhooks/payment"].post.as_ref().unwrap();
        let body = operation.request_body.as_ref().unwrap();
        assert!(body.content.contains_key("application/json"));
    }
}
