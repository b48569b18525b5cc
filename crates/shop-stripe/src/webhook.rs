//! # Stripe Webhook Handling
//!
//! Signature verification for the `Stripe-Signature` header and mapping of
//! Checkout Session events onto [`WebhookEvent`].
//!
//! The header looks like `t=1700000000,v1=<hex hmac>,v1=<hex hmac>`. The
//! HMAC-SHA256 is computed over `"{t}.{raw body}"` with the endpoint's
//! signing secret.

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;
use shop_core::{Currency, ShopError, ShopResult, WebhookEvent, WebhookEventType};
use std::collections::HashMap;
use tracing::debug;

type HmacSha256 = Hmac<Sha256>;

/// Events that should be enabled in Stripe Dashboard for full functionality
pub const REQUIRED_WEBHOOK_EVENTS: &[&str] = &[
    "checkout.session.completed",
    "checkout.session.async_payment_succeeded",
    "checkout.session.async_payment_failed",
    "checkout.session.expired",
];

// =============================================================================
// Signature Verification
// =============================================================================

#[derive(Debug)]
struct SignatureHeader {
    timestamp: i64,
    signatures: Vec<String>,
}

fn parse_signature_header(header: &str) -> ShopResult<SignatureHeader> {
    let mut timestamp = None;
    let mut signatures = Vec::new();

    for part in header.split(',') {
        let Some((key, value)) = part.trim().split_once('=') else {
            continue;
        };
        match key {
            "t" => timestamp = value.parse().ok(),
            "v1" => signatures.push(value.to_string()),
            _ => {}
        }
    }

    let timestamp = timestamp.ok_or_else(|| {
        ShopError::WebhookVerificationFailed("Missing timestamp in signature".to_string())
    })?;

    if signatures.is_empty() {
        return Err(ShopError::WebhookVerificationFailed(
            "No v1 signature found".to_string(),
        ));
    }

    Ok(SignatureHeader {
        timestamp,
        signatures,
    })
}

fn compute_hmac_sha256(secret: &str, timestamp: i64, payload: &[u8]) -> ShopResult<String> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| ShopError::Internal(format!("Invalid webhook secret: {}", e)))?;
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(payload);
    Ok(hex::encode(mac.finalize().into_bytes()))
}

fn constant_time_compare(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.bytes()
        .zip(b.bytes())
        .fold(0, |acc, (x, y)| acc | (x ^ y))
        == 0
}

/// Check a `Stripe-Signature` header against the raw body.
///
/// `now` is unix seconds; signatures older (or newer) than `tolerance_secs`
/// are rejected.
pub fn verify_signature(
    secret: &str,
    payload: &[u8],
    header: &str,
    now: i64,
    tolerance_secs: i64,
) -> ShopResult<()> {
    let parsed = parse_signature_header(header)?;

    let tolerance = u64::try_from(tolerance_secs).unwrap_or(0);
    if now.abs_diff(parsed.timestamp) > tolerance {
        return Err(ShopError::WebhookVerificationFailed(
            "Timestamp outside tolerance".to_string(),
        ));
    }

    let expected = compute_hmac_sha256(secret, parsed.timestamp, payload)?;
    let valid = parsed
        .signatures
        .iter()
        .any(|sig| constant_time_compare(sig, &expected));

    if !valid {
        return Err(ShopError::WebhookVerificationFailed(
            "Signature mismatch".to_string(),
        ));
    }

    Ok(())
}

/// Build a `Stripe-Signature` header value for a payload.
///
/// Mirrors what Stripe sends; used by local tooling and tests.
pub fn signature_header(secret: &str, payload: &[u8], timestamp: i64) -> ShopResult<String> {
    let sig = compute_hmac_sha256(secret, timestamp, payload)?;
    Ok(format!("t={},v1={}", timestamp, sig))
}

// =============================================================================
// Event Mapping
// =============================================================================

#[derive(Debug, Deserialize)]
struct StripeWebhookEvent {
    id: String,
    #[serde(rename = "type")]
    event_type: String,
    created: i64,
    data: StripeEventData,
}

#[derive(Debug, Deserialize)]
struct StripeEventData {
    object: serde_json::Map<String, serde_json::Value>,
}

/// The parts of a Checkout Session object we read
#[derive(Debug, Default, Deserialize)]
struct SessionObject {
    id: Option<String>,
    #[serde(default)]
    customer_email: Option<String>,
    #[serde(default)]
    customer_details: Option<CustomerDetails>,
    #[serde(default)]
    amount_total: Option<i64>,
    #[serde(default)]
    currency: Option<String>,
    #[serde(default)]
    payment_status: Option<String>,
    #[serde(default)]
    metadata: HashMap<String, String>,
}

#[derive(Debug, Default, Deserialize)]
struct CustomerDetails {
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    name: Option<String>,
}

fn event_type(kind: &str) -> WebhookEventType {
    match kind {
        "checkout.session.completed" => WebhookEventType::CheckoutCompleted,
        "checkout.session.async_payment_succeeded" => WebhookEventType::AsyncPaymentSucceeded,
        "checkout.session.async_payment_failed" => WebhookEventType::AsyncPaymentFailed,
        "checkout.session.expired" => WebhookEventType::CheckoutExpired,
        other => WebhookEventType::Unknown(other.to_string()),
    }
}

/// Parse a verified webhook body into a provider-neutral event.
pub fn parse_event(payload: &[u8]) -> ShopResult<WebhookEvent> {
    let event: StripeWebhookEvent = serde_json::from_slice(payload).map_err(|e| {
        ShopError::WebhookParseError(format!("Failed to parse webhook: {}", e))
    })?;

    debug!("Parsed Stripe webhook: type={}", event.event_type);

    let kind = event_type(&event.event_type);
    let raw = serde_json::Value::Object(event.data.object);

    let session = match kind {
        WebhookEventType::Unknown(_) => SessionObject::default(),
        _ => serde_json::from_value::<SessionObject>(raw.clone()).map_err(|e| {
            ShopError::WebhookParseError(format!("Malformed checkout session: {}", e))
        })?,
    };

    let details = session.customer_details.unwrap_or_default();
    let customer_email = details.email.or(session.customer_email);
    let customer_name = details
        .name
        .or_else(|| session.metadata.get("customerName").cloned());

    Ok(WebhookEvent {
        event_id: event.id,
        event_type: kind,
        provider: "stripe".to_string(),
        session_id: session.id,
        order_id: session.metadata.get("order_id").cloned(),
        customer_email,
        customer_name,
        amount_paid: session.amount_total,
        currency: session.currency.as_deref().and_then(Currency::parse),
        payment_status: session.payment_status,
        raw_data: Some(raw),
        timestamp: DateTime::from_timestamp(event.created, 0).unwrap_or_else(Utc::now),
    })
}

/// Print instructions for setting up webhooks
pub fn print_webhook_setup_instructions(endpoint_url: &str) {
    println!("=== Stripe Webhook Setup ===\n");
    println!("1. Go to: https://dashboard.stripe.com/webhooks\n");
    println!("2. Click 'Add endpoint'\n");
    println!("3. Enter endpoint URL: {}\n", endpoint_url);
    println!("4. Select these events:");
    for event in REQUIRED_WEBHOOK_EVENTS {
        println!("   - {}", event);
    }
    println!("\n5. Copy the signing secret (whsec_...) to your .env file");
    println!("\n6. For local testing, use Stripe CLI:");
    println!("   stripe listen --forward-to {}", endpoint_url);
}
