//! # Stripe Checkout Sessions
//!
//! Implementation of the Stripe Checkout Sessions API: one hosted payment
//! page per order, card payments, one-time mode.

use crate::config::StripeConfig;
use crate::webhook::{parse_event, verify_signature};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Deserialize;
use shop_core::{
    CheckoutSession, Order, PaymentStrategy, ShopError, ShopResult, WebhookEvent,
};
use tracing::{debug, error, info, instrument};

/// Stripe Checkout Session strategy
///
/// Uses Stripe's hosted checkout page so card details never reach us.
pub struct StripeCheckoutStrategy {
    config: StripeConfig,
    client: Client,
}

impl StripeCheckoutStrategy {
    /// Create a new Stripe checkout strategy
    pub fn new(config: StripeConfig) -> ShopResult<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .map_err(|e| ShopError::Configuration(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self { config, client })
    }

    /// Create from environment variables
    pub fn from_env() -> ShopResult<Self> {
        Self::new(StripeConfig::from_env()?)
    }

    pub fn config(&self) -> &StripeConfig {
        &self.config
    }

    /// Form parameters for `POST /v1/checkout/sessions`
    fn form_params(order: &Order, success_url: &str, cancel_url: &str) -> Vec<(String, String)> {
        let mut params: Vec<(String, String)> = vec![
            ("mode".to_string(), "payment".to_string()),
            ("payment_method_types[0]".to_string(), "card".to_string()),
            ("success_url".to_string(), success_url.to_string()),
            ("cancel_url".to_string(), cancel_url.to_string()),
            ("customer_email".to_string(), order.customer_email.clone()),
        ];

        for (i, item) in order.line_items.iter().enumerate() {
            let prefix = format!("line_items[{}]", i);
            params.push((
                format!("{}[price_data][currency]", prefix),
                item.unit_price.currency.as_str().to_string(),
            ));
            params.push((
                format!("{}[price_data][unit_amount]", prefix),
                item.unit_price.amount.to_string(),
            ));
            params.push((
                format!("{}[price_data][product_data][name]", prefix),
                item.name.clone(),
            ));
            if let Some(ref desc) = item.description {
                params.push((
                    format!("{}[price_data][product_data][description]", prefix),
                    desc.clone(),
                ));
            }
            if let Some(ref image) = item.image_url {
                params.push((
                    format!("{}[price_data][product_data][images][0]", prefix),
                    image.clone(),
                ));
            }
            params.push((format!("{}[quantity]", prefix), item.quantity.to_string()));
        }

        params.push(("metadata[order_id]".to_string(), order.id.clone()));
        let mut metadata: Vec<_> = order.metadata.iter().collect();
        metadata.sort();
        for (key, value) in metadata {
            params.push((format!("metadata[{}]", key), value.clone()));
        }

        params
    }
}

#[async_trait]
impl PaymentStrategy for StripeCheckoutStrategy {
    #[instrument(skip(self, order), fields(order_id = %order.id))]
    async fn create_checkout(
        &self,
        order: &Order,
        success_url: &str,
        cancel_url: &str,
    ) -> ShopResult<CheckoutSession> {
        if order.line_items.is_empty() {
            return Err(ShopError::InvalidOrder("Order has no items".to_string()));
        }

        let form_params = Self::form_params(order, success_url, cancel_url);
        debug!(
            "Creating Stripe checkout session: {} items",
            order.line_items.len()
        );

        let url = format!("{}/v1/checkout/sessions", self.config.api_base_url);

        let response = self
            .client
            .post(&url)
            .header("Authorization", self.config.auth_header())
            .header("Stripe-Version", &self.config.api_version)
            .header("Idempotency-Key", &order.idempotency_key)
            .form(&form_params)
            .send()
            .await
            .map_err(|e| ShopError::NetworkError(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| ShopError::NetworkError(e.to_string()))?;

        if !status.is_success() {
            error!("Stripe API error: status={}, body={}", status, body);

            let message = serde_json::from_str::<StripeErrorResponse>(&body)
                .map(|e| e.error.message)
                .unwrap_or_else(|_| format!("HTTP {}", status));

            return Err(ShopError::ProviderError {
                provider: "stripe".to_string(),
                message,
            });
        }

        let session_response: StripeCheckoutSessionResponse = serde_json::from_str(&body)
            .map_err(|e| ShopError::Serialization(format!("Failed to parse Stripe response: {}", e)))?;

        let checkout_url = session_response.url.ok_or_else(|| ShopError::ProviderError {
            provider: "stripe".to_string(),
            message: "Checkout session has no URL".to_string(),
        })?;

        info!("Created Stripe checkout session: id={}", session_response.id);

        let mut session =
            CheckoutSession::new(session_response.id, &order.id, "stripe", checkout_url);
        session.expires_at = session_response
            .expires_at
            .and_then(|ts| DateTime::from_timestamp(ts, 0));

        Ok(session)
    }

    #[instrument(skip(self, payload, signature))]
    async fn verify_webhook(&self, payload: &[u8], signature: &str) -> ShopResult<WebhookEvent> {
        verify_signature(
            &self.config.webhook_secret,
            payload,
            signature,
            Utc::now().timestamp(),
            self.config.webhook_tolerance_secs,
        )?;

        parse_event(payload)
    }

    fn provider_name(&self) -> &'static str {
        "stripe"
    }
}

// =============================================================================
// Stripe API Types
// =============================================================================

#[derive(Debug, Deserialize)]
struct StripeCheckoutSessionResponse {
    id: String,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    expires_at: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct StripeErrorResponse {
    error: StripeError,
}

#[derive(Debug, Deserialize)]
struct StripeError {
    message: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::webhook::signature_header;
    use shop_core::{CartItem, Currency, OrderRequest, WebhookEventType};
    use wiremock::matchers::{body_string_contains, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn order() -> Order {
        let request = OrderRequest {
            items: vec![CartItem {
                name: "The Complete Recipe Collection".to_string(),
                price: 14.99,
                quantity: 1,
                image: Some("https://cdn.example/cover.png".to_string()),
            }],
            customer_email: "cook@example.com".to_string(),
            customer_name: "Ada Cook".to_string(),
            total: 14.99,
        };
        Order::from_request(&request, Currency::GBP)
            .unwrap()
            .with_metadata("customerName", "Ada Cook")
    }

    fn strategy(base_url: &str) -> StripeCheckoutStrategy {
        let config = StripeConfig::new("sk_test_abc", "whsec_test").with_api_base_url(base_url);
        StripeCheckoutStrategy::new(config).unwrap()
    }

    #[test]
    fn test_form_params() {
        let order = order();
        let params = StripeCheckoutStrategy::form_params(&order, "https://s", "https://c");
        let get = |key: &str| {
            params
                .iter()
                .find(|(k, _)| k == key)
                .map(|(_, v)| v.as_str())
        };

        assert_eq!(get("mode"), Some("payment"));
        assert_eq!(get("payment_method_types[0]"), Some("card"));
        assert_eq!(get("line_items[0][price_data][currency]"), Some("gbp"));
        assert_eq!(get("line_items[0][price_data][unit_amount]"), Some("1499"));
        assert_eq!(
            get("line_items[0][price_data][product_data][images][0]"),
            Some("https://cdn.example/cover.png")
        );
        assert_eq!(get("metadata[order_id]"), Some(order.id.as_str()));
        assert_eq!(get("metadata[customerName]"), Some("Ada Cook"));
        assert_eq!(get("customer_email"), Some("cook@example.com"));
    }

    #[tokio::test]
    async fn test_create_checkout_session() {
        let server = MockServer::start().await;
        let order = order();

        Mock::given(method("POST"))
            .and(path("/v1/checkout/sessions"))
            .and(header("Authorization", "Bearer sk_test_abc"))
            .and(header("Idempotency-Key", order.idempotency_key.as_str()))
            .and(body_string_contains("mode=payment"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "id": "cs_test_1",
                "url": "https://checkout.stripe.com/c/pay/cs_test_1",
                "expires_at": 1_700_086_400
            })))
            .expect(1)
            .mount(&server)
            .await;

        let session = strategy(&server.uri())
            .create_checkout(&order, "https://s", "https://c")
            .await
            .unwrap();

        assert_eq!(session.session_id, "cs_test_1");
        assert_eq!(session.order_id, order.id);
        assert_eq!(
            session.checkout_url,
            "https://checkout.stripe.com/c/pay/cs_test_1"
        );
        assert!(session.expires_at.is_some());
    }

    #[tokio::test]
    async fn test_stripe_error_is_provider_error() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/v1/checkout/sessions"))
            .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
                "error": { "message": "Invalid currency", "type": "invalid_request_error" }
            })))
            .expect(1)
            .mount(&server)
            .await;

        let result = strategy(&server.uri())
            .create_checkout(&order(), "https://s", "https://c")
            .await;

        match result {
            Err(ShopError::ProviderError { provider, message }) => {
                assert_eq!(provider, "stripe");
                assert_eq!(message, "Invalid currency");
            }
            other => panic!("expected provider error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_unreachable_api_is_network_error() {
        let result = strategy("http://127.0.0.1:9")
            .create_checkout(&order(), "https://s", "https://c")
            .await;

        assert!(matches!(result, Err(ShopError::NetworkError(_))));
    }

    #[tokio::test]
    async fn test_verify_webhook() {
        let strategy = strategy("http://127.0.0.1:9");
        let payload = serde_json::to_vec(&serde_json::json!({
            "id": "evt_1",
            "type": "checkout.session.completed",
            "created": Utc::now().timestamp(),
            "data": { "object": {
                "id": "cs_test_1",
                "payment_status": "paid",
                "customer_details": { "email": "cook@example.com" },
                "metadata": { "order_id": "ord_1" }
            } }
        }))
        .unwrap();
        let header = signature_header("whsec_test", &payload, Utc::now().timestamp()).unwrap();

        let event = strategy.verify_webhook(&payload, &header).await.unwrap();
        assert_eq!(event.event_type, WebhookEventType::CheckoutCompleted);
        assert_eq!(event.order_id.as_deref(), Some("ord_1"));

        assert!(strategy.verify_webhook(&payload, "t=1,v1=00").await.is_err());
    }
}
