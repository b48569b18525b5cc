//! # Routes
//!
//! Axum router configuration for the storefront API.

use crate::handlers;
use crate::state::AppState;
use axum::{
    http::{header, HeaderName, HeaderValue, Method},
    routing::{get, post},
    Router,
};
use tower::ServiceBuilder;
use tower_http::{
    cors::{AllowOrigin, Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::warn;

/// Create the main application router
///
/// Routes:
/// - Checkout:
///   - GET  /csrf-token - Single-use form token (rate limited)
///   - POST /create-checkout-session - Create hosted checkout, needs `X-CSRF-Token`
///
/// - Webhooks:
///   - POST /webhook/stripe - Stripe webhook handler (raw body)
///
/// - Delivery:
///   - GET /download/{token} - Stream the purchased e-book
///
/// - Info & pages:
///   - GET /, /health, /api/config
///   - GET /success, /cancel
pub fn create_router(state: AppState) -> Router {
    let cors = cors_layer(state.config.allowed_origin.as_deref());

    let checkout_routes = Router::new()
        .route("/csrf-token", get(handlers::csrf_token))
        .route(
            "/create-checkout-session",
            post(handlers::create_checkout_session),
        );

    // Webhook routes (must accept raw body)
    let webhook_routes = Router::new().route("/stripe", post(handlers::stripe_webhook));

    let page_routes = Router::new()
        .route("/success", get(handlers::checkout_success))
        .route("/cancel", get(handlers::checkout_cancel));

    Router::new()
        .route("/", get(handlers::root))
        .route("/health", get(handlers::health))
        .route("/api/config", get(handlers::public_config))
        .route("/download/{token}", get(handlers::download))
        .merge(checkout_routes)
        .merge(page_routes)
        .nest("/webhook", webhook_routes)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors),
        )
        .with_state(state)
}

fn cors_layer(allowed_origin: Option<&str>) -> CorsLayer {
    let base = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([
            header::CONTENT_TYPE,
            HeaderName::from_static(handlers::CSRF_HEADER),
        ]);

    match allowed_origin.map(HeaderValue::from_str) {
        Some(Ok(origin)) => base.allow_origin(AllowOrigin::exact(origin)),
        Some(Err(_)) => {
            warn!("ALLOWED_ORIGIN is not a valid header value, allowing any origin");
            base.allow_origin(Any)
        }
        None => base.allow_origin(Any),
    }
}
