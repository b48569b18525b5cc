//! # Order Types
//!
//! Order, checkout session and webhook event types for the storefront.

use crate::error::{ShopError, ShopResult};
use crate::price::{Currency, Price};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Longest accepted customer name
pub const MAX_NAME_LEN: usize = 100;
/// Most copies of one item in a single order
pub const MAX_QUANTITY: u32 = 100;
/// Highest accepted unit price, in the smallest currency unit
pub const MAX_UNIT_AMOUNT: i64 = 100_000_000;

/// An item as the storefront cart submits it
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CartItem {
    pub name: String,
    /// Unit price as a decimal amount (e.g. 19.99)
    pub price: f64,
    #[serde(default = "default_quantity")]
    pub quantity: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
}

fn default_quantity() -> u32 {
    1
}

/// Body of a create-checkout-session request
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderRequest {
    #[serde(default)]
    pub items: Vec<CartItem>,
    #[serde(default)]
    pub customer_email: String,
    #[serde(default)]
    pub customer_name: String,
    /// Cart total as a decimal amount, must match the items
    #[serde(default)]
    pub total: f64,
}

/// A line item in an order
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LineItem {
    pub name: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    pub unit_price: Price,

    pub quantity: u32,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
}

impl LineItem {
    /// Calculate the total price for this line item
    pub fn total(&self) -> ShopResult<Price> {
        let amount = self
            .unit_price
            .amount
            .checked_mul(i64::from(self.quantity))
            .ok_or_else(|| ShopError::InvalidOrder(format!("total for '{}' is too large", self.name)))?;
        Ok(Price {
            amount,
            currency: self.unit_price.currency,
        })
    }
}

/// A validated order ready for checkout
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    /// Unique order ID (generated)
    pub id: String,

    pub line_items: Vec<LineItem>,

    pub currency: Currency,

    pub customer_email: String,

    pub customer_name: String,

    /// Idempotency key (prevents duplicate sessions on client retries)
    pub idempotency_key: String,

    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, String>,

    pub created_at: DateTime<Utc>,
}

impl Order {
    /// Validate a cart submission and turn it into an order.
    pub fn from_request(request: &OrderRequest, currency: Currency) -> ShopResult<Self> {
        if request.items.is_empty() {
            return Err(ShopError::InvalidOrder("cart is empty".to_string()));
        }

        let customer_email = request.customer_email.trim().to_string();
        if !is_valid_email(&customer_email) {
            return Err(ShopError::InvalidOrder("a valid email address is required".to_string()));
        }

        let customer_name = request.customer_name.trim().to_string();
        if customer_name.is_empty() || customer_name.chars().count() > MAX_NAME_LEN {
            return Err(ShopError::InvalidOrder("customer name is required".to_string()));
        }

        let line_items = request
            .items
            .iter()
            .map(|item| line_item_from_cart(item, currency))
            .collect::<ShopResult<Vec<_>>>()?;

        let declared = Price::new(request.total, currency);
        if !declared.is_positive() {
            return Err(ShopError::InvalidOrder("total must be positive".to_string()));
        }

        let id = Uuid::new_v4().to_string();
        let order = Self {
            id: id.clone(),
            line_items,
            currency,
            customer_email,
            customer_name,
            idempotency_key: id,
            metadata: HashMap::new(),
            created_at: Utc::now(),
        };

        let computed = order.total()?;
        if computed != declared {
            return Err(ShopError::InvalidOrder(format!(
                "total {} does not match items {}",
                declared.display(),
                computed.display()
            )));
        }

        Ok(order)
    }

    /// Calculate order total
    pub fn total(&self) -> ShopResult<Price> {
        let amount = self.line_items.iter().try_fold(0_i64, |sum, item| {
            sum.checked_add(item.total()?.amount)
                .ok_or_else(|| ShopError::InvalidOrder("order total is too large".to_string()))
        })?;
        Ok(Price {
            amount,
            currency: self.currency,
        })
    }

    /// Add metadata
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Get item count
    pub fn item_count(&self) -> u32 {
        self.line_items.iter().map(|i| i.quantity).sum()
    }
}

fn line_item_from_cart(item: &CartItem, currency: Currency) -> ShopResult<LineItem> {
    let name = item.name.trim();
    if name.is_empty() {
        return Err(ShopError::InvalidOrder("item name is required".to_string()));
    }
    if item.quantity == 0 || item.quantity > MAX_QUANTITY {
        return Err(ShopError::InvalidOrder(format!(
            "quantity for '{}' must be between 1 and {}",
            name, MAX_QUANTITY
        )));
    }
    if !item.price.is_finite() {
        return Err(ShopError::InvalidOrder(format!("price for '{}' is invalid", name)));
    }

    let unit_price = Price::new(item.price, currency);
    if !unit_price.is_positive() {
        return Err(ShopError::InvalidOrder(format!(
            "price for '{}' must be positive",
            name
        )));
    }
    if unit_price.amount > MAX_UNIT_AMOUNT {
        return Err(ShopError::InvalidOrder(format!(
            "price for '{}' is above the maximum",
            name
        )));
    }

    Ok(LineItem {
        name: name.to_string(),
        description: Some("Digital Recipe Collection".to_string()),
        unit_price,
        quantity: item.quantity,
        image_url: item.image.clone().filter(|url| url.starts_with("https://")),
    })
}

/// Shape check for an email address: one `@`, a non-empty local part and a
/// dotted domain, no whitespace.
pub fn is_valid_email(email: &str) -> bool {
    if email.len() > 254 || email.chars().any(char::is_whitespace) {
        return false;
    }
    let Some((local, domain)) = email.split_once('@') else {
        return false;
    };
    !local.is_empty()
        && !domain.contains('@')
        && domain.contains('.')
        && !domain.starts_with('.')
        && !domain.ends_with('.')
}

/// Lifecycle of an order in the checkout flow.
///
/// ```text
/// Created ─► SessionRequested ─► SessionActive ─┬─► Completed
///                   │                           └─► Abandoned
///                   └─────────────────────────────► Abandoned
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderState {
    Created,
    SessionRequested,
    SessionActive,
    Completed,
    Abandoned,
}

impl OrderState {
    pub fn can_transition_to(self, next: OrderState) -> bool {
        use OrderState::*;
        matches!(
            (self, next),
            (Created, SessionRequested)
                | (SessionRequested, SessionActive)
                | (SessionRequested, Abandoned)
                | (SessionActive, Completed)
                | (SessionActive, Abandoned)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, OrderState::Completed | OrderState::Abandoned)
    }
}

/// A checkout session created by a payment provider
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckoutSession {
    /// Provider's session ID
    pub session_id: String,

    /// Our internal order ID
    pub order_id: String,

    /// Provider name (e.g., "stripe")
    pub provider: String,

    /// URL to redirect customer to for payment
    pub checkout_url: String,

    /// When the session expires
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,

    pub created_at: DateTime<Utc>,
}

impl CheckoutSession {
    pub fn new(
        session_id: impl Into<String>,
        order_id: impl Into<String>,
        provider: impl Into<String>,
        checkout_url: impl Into<String>,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            order_id: order_id.into(),
            provider: provider.into(),
            checkout_url: checkout_url.into(),
            expires_at: None,
            created_at: Utc::now(),
        }
    }
}

/// Webhook event types we care about
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WebhookEventType {
    /// Checkout session completed (payment may still be pending)
    CheckoutCompleted,
    /// Delayed payment method settled
    AsyncPaymentSucceeded,
    /// Delayed payment method failed
    AsyncPaymentFailed,
    /// Hosted checkout page timed out
    CheckoutExpired,
    /// Unknown event (passthrough)
    Unknown(String),
}

/// A verified, parsed webhook event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookEvent {
    pub event_id: String,

    pub event_type: WebhookEventType,

    pub provider: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,

    /// Our order id, echoed back from session metadata
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order_id: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub customer_email: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub customer_name: Option<String>,

    /// Amount paid (in smallest unit)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub amount_paid: Option<i64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub currency: Option<Currency>,

    /// Provider payment status ("paid", "unpaid", "no_payment_required")
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payment_status: Option<String>,

    /// Raw event data (for debugging)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw_data: Option<serde_json::Value>,

    pub timestamp: DateTime<Utc>,
}

impl WebhookEvent {
    /// Funds captured (or nothing to capture)
    pub fn is_paid(&self) -> bool {
        matches!(
            self.payment_status.as_deref(),
            Some("paid") | Some("no_payment_required")
        )
    }
}

/// A confirmed payment, as handed to fulfillment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentConfirmation {
    pub order_id: String,
    pub session_id: Option<String>,
    pub customer_email: String,
    pub customer_name: String,
    pub amount_paid: Option<i64>,
}

impl PaymentConfirmation {
    /// Pull fulfillment details out of a verified event.
    ///
    /// The provider session id stands in for the order id when metadata
    /// is missing.
    pub fn from_event(event: &WebhookEvent) -> ShopResult<Self> {
        let order_id = event
            .order_id
            .clone()
            .or_else(|| event.session_id.clone())
            .ok_or_else(|| ShopError::WebhookParseError("Missing order id".to_string()))?;

        let customer_email = event
            .customer_email
            .clone()
            .filter(|email| is_valid_email(email))
            .ok_or_else(|| ShopError::WebhookParseError("Missing customer email".to_string()))?;

        let customer_name = event
            .customer_name
            .clone()
            .filter(|name| !name.trim().is_empty())
            .unwrap_or_else(|| "there".to_string());

        Ok(Self {
            order_id,
            session_id: event.session_id.clone(),
            customer_email,
            customer_name,
            amount_paid: event.amount_paid,
        })
    }
}
