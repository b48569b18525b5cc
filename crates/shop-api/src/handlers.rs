//! # Request Handlers
//!
//! Axum request handlers for the storefront API: CSRF issuance, checkout,
//! the Stripe webhook and token-gated downloads.

use crate::state::AppState;
use axum::{
    body::{Body, Bytes},
    extract::{rejection::JsonRejection, ConnectInfo, Path, Query, Request, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{Html, IntoResponse, Response},
    Json,
};
use chrono::Utc;
use futures::{stream, StreamExt};
use serde::{Deserialize, Serialize};
use shop_core::{redact, OrderRequest, ShopError, WebhookOutcome};
use std::net::SocketAddr;
use tracing::{error, info, instrument, warn};

/// Header carrying the CSRF token on checkout requests
pub const CSRF_HEADER: &str = "x-csrf-token";

// =============================================================================
// Request/Response Types
// =============================================================================

#[derive(Debug, Serialize, Deserialize)]
pub struct CsrfTokenResponse {
    pub token: String,
}

/// Create checkout response
#[derive(Debug, Serialize, Deserialize)]
pub struct CreateCheckoutResponse {
    /// Hosted checkout URL (redirect user here)
    pub url: String,
}

/// Error response
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: u16,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>, code: u16) -> Self {
        Self {
            error: error.into(),
            code,
        }
    }
}

pub type ApiError = (StatusCode, Json<ErrorResponse>);

fn error_response(status: StatusCode, message: impl Into<String>) -> ApiError {
    (status, Json(ErrorResponse::new(message, status.as_u16())))
}

fn shop_error_to_response(err: ShopError) -> ApiError {
    let status =
        StatusCode::from_u16(err.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    error_response(status, err.public_message())
}

// =============================================================================
// Checkout
// =============================================================================

/// Issue a single-use CSRF token for the checkout form
#[instrument(skip(state, request))]
pub async fn csrf_token(
    State(state): State<AppState>,
    request: Request,
) -> Result<Json<CsrfTokenResponse>, ApiError> {
    let client = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string());

    if !state.csrf_limiter.check(&client) {
        warn!(client = %client, "CSRF token rate limit exceeded");
        return Err(error_response(
            StatusCode::TOO_MANY_REQUESTS,
            "Too many requests, please try again later.",
        ));
    }

    let token = state.orchestrator.csrf().issue();
    Ok(Json(CsrfTokenResponse { token }))
}

/// Create a hosted checkout session for the submitted cart
#[instrument(skip(state, headers, payload))]
pub async fn create_checkout_session(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: Result<Json<OrderRequest>, JsonRejection>,
) -> Result<Json<CreateCheckoutResponse>, ApiError> {
    let Json(request) = payload.map_err(|e| {
        warn!("Malformed checkout request: {}", e);
        error_response(StatusCode::BAD_REQUEST, "Invalid request body")
    })?;

    let csrf_token = headers.get(CSRF_HEADER).and_then(|v| v.to_str().ok());

    let session = state
        .orchestrator
        .create_session(&request, csrf_token)
        .await
        .map_err(shop_error_to_response)?;

    Ok(Json(CreateCheckoutResponse {
        url: session.checkout_url,
    }))
}

/// Handle Stripe webhook
#[instrument(skip(state, headers, body))]
pub async fn stripe_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<serde_json::Value>, ApiError> {
    let signature = headers
        .get("stripe-signature")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| {
            warn!("Webhook without Stripe-Signature header");
            error_response(StatusCode::BAD_REQUEST, "Missing Stripe-Signature header")
        })?;

    let event = state
        .orchestrator
        .strategy()
        .verify_webhook(&body, signature)
        .await
        .map_err(|e| {
            error!("Webhook verification failed: {}", e);
            shop_error_to_response(e)
        })?;

    info!(
        "Received webhook: type={:?}, id={}",
        event.event_type, event.event_id
    );

    // Verified events are always acknowledged.
    match state.orchestrator.handle_webhook_event(event).await {
        Ok(WebhookOutcome::Fulfilled {
            order_id,
            notified: false,
        }) => warn!(order_id = %order_id, "Order fulfilled but customer was not notified"),
        Ok(outcome) => info!(?outcome, "Webhook processed"),
        Err(e) => error!("Webhook processing failed: {}", e),
    }

    Ok(Json(serde_json::json!({ "received": true })))
}

// =============================================================================
// Download
// =============================================================================

/// Stream the purchased artifact for a download token.
///
/// The use is spent only after the last chunk has been handed to the
/// connection; an aborted transfer leaves the count untouched.
#[instrument(skip(state, token), fields(token = %redact(&token)))]
pub async fn download(
    State(state): State<AppState>,
    Path(token): Path<String>,
) -> Result<Response, ApiError> {
    let downloads = state.orchestrator.downloads();
    let lease = downloads.redeem(&token).map_err(|e| {
        info!("Download refused: {}", e);
        shop_error_to_response(e.into())
    })?;

    let artifact = state
        .artifacts
        .open(lease.order_id())
        .await
        .map_err(|e| {
            error!("Download error: {}", e);
            shop_error_to_response(e)
        })?;

    info!(order_id = %lease.order_id(), "Starting download");

    let disposition = format!("attachment; filename=\"{}\"", artifact.filename.replace('"', ""));
    let commit = stream::once(async move {
        let order_id = lease.order_id().to_string();
        if let Err(e) = lease.commit() {
            warn!(order_id = %order_id, "Download finished after token became invalid: {}", e);
        }
        Ok::<_, std::io::Error>(Bytes::new())
    });
    let body = Body::from_stream(artifact.body.chain(commit));

    let mut response = body.into_response();
    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_str(&artifact.content_type)
            .unwrap_or_else(|_| HeaderValue::from_static("application/octet-stream")),
    );
    if let Ok(value) = HeaderValue::from_str(&disposition) {
        headers.insert(header::CONTENT_DISPOSITION, value);
    }
    if let Some(size) = artifact.size {
        headers.insert(header::CONTENT_LENGTH, HeaderValue::from(size));
    }
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));

    Ok(response)
}

// =============================================================================
// Service Info
// =============================================================================

/// Health check endpoint
pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "service": "RecipeRush E-Book Delivery",
        "version": env!("CARGO_PKG_VERSION"),
        "environment": state.config.environment,
        "timestamp": Utc::now().to_rfc3339(),
        "uptime_secs": state.started_at.elapsed().as_secs(),
        "email": if state.email_enabled { "configured" } else { "not configured" },
    }))
}

/// Service index
pub async fn root() -> impl IntoResponse {
    Json(serde_json::json!({
        "message": "RecipeRush API is running",
        "status": "operational",
        "timestamp": Utc::now().to_rfc3339(),
        "endpoints": {
            "health": "/health",
            "csrf": "/csrf-token",
            "checkout": "/create-checkout-session",
            "success": "/success",
            "cancel": "/cancel",
            "webhook": "/webhook/stripe",
            "download": "/download/{token}"
        }
    }))
}

/// Public front-end configuration
pub async fn public_config(State(state): State<AppState>) -> Response {
    match &state.publishable_key {
        Some(key) => Json(serde_json::json!({
            "stripe": { "publishableKey": key }
        }))
        .into_response(),
        None => {
            warn!("Front-end config requested but STRIPE_PUBLISHABLE_KEY is not set");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({
                    "error": "Configuration incomplete",
                    "message": "Stripe publishable key not configured"
                })),
            )
                .into_response()
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct SuccessParams {
    pub session_id: Option<String>,
}

/// Checkout success page
pub async fn checkout_success(Query(params): Query<SuccessParams>) -> impl IntoResponse {
    let session_id: String = params
        .session_id
        .unwrap_or_else(|| "unknown".to_string())
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_')
        .collect();
    Html(format!(r#"
<!DOCTYPE html>
<html>
<head><title>Payment Successful</title></head>
<body style="font-family: system-ui; display: flex; justify-content: center; align-items: center; height: 100vh; margin: 0; background: linear-gradient(135deg, #667eea 0%, #764ba2 100%);">
    <div style="background: white; padding: 60px; border-radius: 16px; text-align: center;">
        <div style="font-size: 60px;">✅</div>
        <h1>Payment Successful!</h1>
        <p>Your recipe collection is on its way. Check your inbox for the download link.</p>
        <p style="color: #666;">Reference: <code>{}</code></p>
    </div>
</body>
</html>
"#, session_id))
}

/// Checkout cancel page
pub async fn checkout_cancel() -> impl IntoResponse {
    Html(r#"
<!DOCTYPE html>
<html>
<head><title>Payment Cancelled</title></head>
<body style="font-family: system-ui; display: flex; justify-content: center; align-items: center; height: 100vh; margin: 0; background: linear-gradient(135deg, #667eea 0%, #764ba2 100%);">
    <div style="background: white; padding: 60px; border-radius: 16px; text-align: center;">
        <div style="font-size: 60px;">❌</div>
        <h1>Payment Cancelled</h1>
        <p style="color: #666;">No charges were made.</p>
    </div>
</body>
</html>
"#)
}
