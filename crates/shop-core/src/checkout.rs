//! # Checkout Orchestrator
//!
//! Drives an order from cart submission to delivered download link:
//!
//! 1. `create_session`: validate the cart, spend the CSRF token, ask the
//!    payment provider for a hosted checkout page.
//! 2. `handle_webhook_event`: on a verified, paid provider event mint a
//!    download token and hand it to the notifier.

use crate::error::{ShopError, ShopResult};
use crate::notifier::{BoxedNotifier, DownloadDelivery};
use crate::order::{
    CheckoutSession, Order, OrderRequest, OrderState, PaymentConfirmation, WebhookEvent,
    WebhookEventType,
};
use crate::price::Currency;
use crate::strategy::{BoxedPaymentStrategy, CheckoutUrls};
use crate::tokens::{CsrfTokenService, DownloadTokenService};
use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{error, info, instrument, warn};

/// Ledger size above which old orders get pruned
const LEDGER_SOFT_CAP: usize = 10_000;
/// Age after which an order leaves the ledger, settled or not. Hosted
/// checkout sessions live at most 24 hours.
const ORDER_RETENTION_HOURS: i64 = 25;
/// Minimum gap between two prune passes
const PRUNE_INTERVAL_SECS: i64 = 60;

#[derive(Debug, Clone)]
struct OrderRecord {
    state: OrderState,
    session_id: Option<String>,
    updated_at: DateTime<Utc>,
}

/// What a webhook event led to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebhookOutcome {
    /// Download token minted; `notified` is false when the notifier failed
    Fulfilled { order_id: String, notified: bool },
    /// Order was already fulfilled by an earlier delivery of the event
    Duplicate { order_id: String },
    /// Order marked abandoned
    Abandoned { order_id: String },
    /// Checkout finished but funds are not captured yet
    AwaitingPayment { order_id: Option<String> },
    /// Event type we don't act on
    Ignored,
}

/// In-memory order lifecycle tracking.
///
/// Pruned orders can still be fulfilled: `complete` accepts unknown ids.
#[derive(Clone)]
struct OrderLedger(Arc<Mutex<LedgerInner>>);

struct LedgerInner {
    orders: HashMap<String, OrderRecord>,
    soft_cap: usize,
    last_pruned: Option<DateTime<Utc>>,
}

impl Default for OrderLedger {
    fn default() -> Self {
        Self::with_soft_cap(LEDGER_SOFT_CAP)
    }
}

impl OrderLedger {
    fn with_soft_cap(soft_cap: usize) -> Self {
        Self(Arc::new(Mutex::new(LedgerInner {
            orders: HashMap::new(),
            soft_cap,
            last_pruned: None,
        })))
    }

    fn open(&self, order_id: &str, now: DateTime<Utc>) {
        {
            let mut ledger = self.0.lock();
            if ledger.orders.len() >= ledger.soft_cap {
                ledger.prune(now);
            }
            ledger.orders.insert(
                order_id.to_string(),
                OrderRecord {
                    state: OrderState::Created,
                    session_id: None,
                    updated_at: now,
                },
            );
        }
        self.transition(order_id, OrderState::SessionRequested, None, now);
    }

    fn transition(
        &self,
        order_id: &str,
        next: OrderState,
        session_id: Option<&str>,
        now: DateTime<Utc>,
    ) -> bool {
        let mut ledger = self.0.lock();
        let Some(record) = ledger.orders.get_mut(order_id) else {
            return false;
        };
        if !record.state.can_transition_to(next) {
            warn!(order_id, from = ?record.state, to = ?next, "Ignoring invalid order transition");
            return false;
        }
        record.state = next;
        record.updated_at = now;
        if let Some(session_id) = session_id {
            record.session_id = Some(session_id.to_string());
        }
        true
    }

    /// Mark completed. False if it already was.
    fn complete(&self, order_id: &str, now: DateTime<Utc>) -> bool {
        let mut ledger = self.0.lock();
        match ledger.orders.get_mut(order_id) {
            Some(record) if record.state == OrderState::Completed => false,
            Some(record) => {
                if !record.state.can_transition_to(OrderState::Completed) {
                    warn!(order_id, from = ?record.state, "Payment confirmed for order not in an active session");
                }
                record.state = OrderState::Completed;
                record.updated_at = now;
                true
            }
            None => {
                warn!(order_id, "Payment confirmed for unknown order, fulfilling anyway");
                ledger.orders.insert(
                    order_id.to_string(),
                    OrderRecord {
                        state: OrderState::Completed,
                        session_id: None,
                        updated_at: now,
                    },
                );
                true
            }
        }
    }

    fn state(&self, order_id: &str) -> Option<OrderState> {
        self.0.lock().orders.get(order_id).map(|r| r.state)
    }

    fn session_id(&self, order_id: &str) -> Option<String> {
        self.0.lock().orders.get(order_id).and_then(|r| r.session_id.clone())
    }
}

impl LedgerInner {
    fn prune(&mut self, now: DateTime<Utc>) {
        if let Some(last) = self.last_pruned {
            if now - last < Duration::seconds(PRUNE_INTERVAL_SECS) {
                return;
            }
        }
        self.last_pruned = Some(now);

        let cutoff = now - Duration::hours(ORDER_RETENTION_HOURS);
        let before = self.orders.len();
        self.orders.retain(|_, r| r.updated_at >= cutoff);
        let pruned = before - self.orders.len();
        if pruned > 0 {
            info!(pruned, remaining = self.orders.len(), "Pruned order ledger");
        }
    }
}

/// Checkout flow coordinator
#[derive(Clone)]
pub struct CheckoutOrchestrator {
    csrf: CsrfTokenService,
    downloads: DownloadTokenService,
    strategy: BoxedPaymentStrategy,
    notifier: BoxedNotifier,
    urls: CheckoutUrls,
    currency: Currency,
    ledger: OrderLedger,
}

impl CheckoutOrchestrator {
    pub fn new(
        strategy: BoxedPaymentStrategy,
        notifier: BoxedNotifier,
        csrf: CsrfTokenService,
        downloads: DownloadTokenService,
        urls: CheckoutUrls,
    ) -> Self {
        Self {
            csrf,
            downloads,
            strategy,
            notifier,
            urls,
            currency: Currency::default(),
            ledger: OrderLedger::default(),
        }
    }

    /// Builder: set checkout currency
    pub fn with_currency(mut self, currency: Currency) -> Self {
        self.currency = currency;
        self
    }

    pub fn csrf(&self) -> &CsrfTokenService {
        &self.csrf
    }

    pub fn downloads(&self) -> &DownloadTokenService {
        &self.downloads
    }

    pub fn strategy(&self) -> &BoxedPaymentStrategy {
        &self.strategy
    }

    pub fn urls(&self) -> &CheckoutUrls {
        &self.urls
    }

    pub fn currency(&self) -> Currency {
        self.currency
    }

    pub fn order_state(&self, order_id: &str) -> Option<OrderState> {
        self.ledger.state(order_id)
    }

    pub fn order_session_id(&self, order_id: &str) -> Option<String> {
        self.ledger.session_id(order_id)
    }

    /// Start the expiry sweeps of both token stores
    pub fn start_sweeps(&self, every: std::time::Duration) {
        self.csrf.store().start(every);
        self.downloads.store().start(every);
    }

    pub fn stop_sweeps(&self) {
        self.csrf.store().stop();
        self.downloads.store().stop();
    }

    fn now(&self) -> DateTime<Utc> {
        self.downloads.store().now()
    }

    /// Validate the cart, spend the CSRF token and open a hosted checkout.
    ///
    /// The cart is checked first so a malformed submission does not burn
    /// the form token. The provider is called once; failures surface
    /// immediately for the client to retry with a fresh token.
    #[instrument(skip(self, request, csrf_token), fields(items = request.items.len()))]
    pub async fn create_session(
        &self,
        request: &OrderRequest,
        csrf_token: Option<&str>,
    ) -> ShopResult<CheckoutSession> {
        let order = Order::from_request(request, self.currency).map_err(|e| {
            warn!("Rejected order: {}", e);
            e
        })?;

        let csrf_ok = csrf_token
            .map(|token| self.csrf.validate_and_consume(token))
            .unwrap_or(false);
        if !csrf_ok {
            warn!(order_id = %order.id, "Checkout rejected: invalid CSRF token");
            return Err(ShopError::InvalidCsrf);
        }

        let total = order.total()?;
        let (name, email) = (order.customer_name.clone(), order.customer_email.clone());
        let order = order
            .with_metadata("customerName", name)
            .with_metadata("customerEmail", email);

        self.ledger.open(&order.id, self.now());

        info!(
            order_id = %order.id,
            items = order.item_count(),
            total = %total.display(),
            provider = self.strategy.provider_name(),
            "Creating checkout session"
        );

        let session = match self
            .strategy
            .create_checkout(&order, &self.urls.success_url(), &self.urls.cancel_url())
            .await
        {
            Ok(session) => session,
            Err(e) => {
                error!(order_id = %order.id, "Failed to create checkout session: {}", e);
                self.ledger
                    .transition(&order.id, OrderState::Abandoned, None, self.now());
                return Err(match e {
                    ShopError::ProviderError { .. } => e,
                    other => ShopError::ProviderError {
                        provider: self.strategy.provider_name().to_string(),
                        message: other.to_string(),
                    },
                });
            }
        };

        self.ledger.transition(
            &order.id,
            OrderState::SessionActive,
            Some(&session.session_id),
            self.now(),
        );
        info!(order_id = %order.id, session_id = %session.session_id, "Checkout session active");

        Ok(session)
    }

    /// Route a verified provider event.
    #[instrument(skip(self, event), fields(event_id = %event.event_id, event_type = ?event.event_type))]
    pub async fn handle_webhook_event(&self, event: WebhookEvent) -> ShopResult<WebhookOutcome> {
        match &event.event_type {
            WebhookEventType::CheckoutCompleted if !event.is_paid() => {
                info!(
                    order_id = ?event.order_id,
                    payment_status = ?event.payment_status,
                    "Checkout completed, awaiting payment"
                );
                Ok(WebhookOutcome::AwaitingPayment {
                    order_id: event.order_id,
                })
            }
            WebhookEventType::CheckoutCompleted | WebhookEventType::AsyncPaymentSucceeded => {
                let confirmation = PaymentConfirmation::from_event(&event)?;
                Ok(self.on_payment_confirmed(confirmation).await)
            }
            WebhookEventType::CheckoutExpired | WebhookEventType::AsyncPaymentFailed => {
                let order_id = event
                    .order_id
                    .or(event.session_id)
                    .ok_or_else(|| ShopError::WebhookParseError("Missing order id".to_string()))?;
                self.on_session_abandoned(&order_id);
                Ok(WebhookOutcome::Abandoned { order_id })
            }
            WebhookEventType::Unknown(kind) => {
                info!(kind = %kind, "Ignoring webhook event");
                Ok(WebhookOutcome::Ignored)
            }
        }
    }

    /// Fulfill a paid order: mint the download token and notify the buyer.
    ///
    /// A notifier failure is logged and reported in the outcome; the token
    /// stays valid.
    #[instrument(skip(self, confirmation), fields(order_id = %confirmation.order_id))]
    pub async fn on_payment_confirmed(&self, confirmation: PaymentConfirmation) -> WebhookOutcome {
        let order_id = confirmation.order_id.clone();

        if !self.ledger.complete(&order_id, self.now()) {
            info!("Order already fulfilled, skipping duplicate confirmation");
            return WebhookOutcome::Duplicate { order_id };
        }

        let token = self
            .downloads
            .issue(confirmation.customer_email.clone(), order_id.clone());

        let delivery = DownloadDelivery {
            customer_email: confirmation.customer_email,
            customer_name: confirmation.customer_name,
            download_url: self.urls.download_url(&token),
            order_id: order_id.clone(),
            max_downloads: self.downloads.max_downloads(),
            expires_in_days: self.downloads.ttl().num_days(),
        };

        let notified = match self.notifier.send_download_link(&delivery).await {
            Ok(()) => {
                info!(
                    notifier = self.notifier.name(),
                    "Order completed, download link sent"
                );
                true
            }
            Err(e) => {
                error!(
                    notifier = self.notifier.name(),
                    "Failed to send download link, token remains valid: {}", e
                );
                false
            }
        };

        WebhookOutcome::Fulfilled { order_id, notified }
    }

    /// Mark an order whose hosted checkout expired or whose payment failed
    pub fn on_session_abandoned(&self, order_id: &str) {
        if self
            .ledger
            .transition(order_id, OrderState::Abandoned, None, self.now())
        {
            info!(order_id, "Order abandoned");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{Clock, ManualClock};
    use crate::notifier::Notifier;
    use crate::order::CartItem;
    use crate::strategy::PaymentStrategy;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FakeProvider {
        fail: bool,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl PaymentStrategy for FakeProvider {
        async fn create_checkout(
            &self,
            order: &Order,
            _success_url: &str,
            _cancel_url: &str,
        ) -> ShopResult<CheckoutSession> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(ShopError::NetworkError("connection reset".to_string()));
            }
            Ok(CheckoutSession::new(
                "cs_test_1",
                &order.id,
                "fake",
                "https://pay.example/cs_test_1",
            ))
        }

        async fn verify_webhook(&self, _payload: &[u8], _signature: &str) -> ShopResult<WebhookEvent> {
            Err(ShopError::WebhookVerificationFailed("not used".to_string()))
        }

        fn provider_name(&self) -> &'static str {
            "fake"
        }
    }

    #[derive(Default)]
    struct RecordingNotifier {
        fail: bool,
        sent: Mutex<Vec<DownloadDelivery>>,
    }

    #[async_trait]
    impl Notifier for RecordingNotifier {
        async fn send_download_link(&self, delivery: &DownloadDelivery) -> ShopResult<()> {
            if self.fail {
                return Err(ShopError::NotifierError("smtp down".to_string()));
            }
            self.sent.lock().push(delivery.clone());
            Ok(())
        }

        fn name(&self) -> &'static str {
            "recording"
        }
    }

    struct Harness {
        orchestrator: CheckoutOrchestrator,
        provider: Arc<FakeProvider>,
        notifier: Arc<RecordingNotifier>,
    }

    fn harness(provider_fails: bool, notifier_fails: bool) -> Harness {
        let clock = Arc::new(ManualClock::starting_now());
        let provider = Arc::new(FakeProvider {
            fail: provider_fails,
            calls: AtomicUsize::new(0),
        });
        let notifier = Arc::new(RecordingNotifier {
            fail: notifier_fails,
            ..Default::default()
        });
        let orchestrator = CheckoutOrchestrator::new(
            provider.clone(),
            notifier.clone(),
            CsrfTokenService::new(clock.clone()),
            DownloadTokenService::new(clock, true),
            CheckoutUrls::new("https://shop.example"),
        );
        Harness {
            orchestrator,
            provider,
            notifier,
        }
    }

    fn request() -> OrderRequest {
        OrderRequest {
            items: vec![CartItem {
                name: "The Complete Recipe Collection".to_string(),
                price: 14.99,
                quantity: 1,
                image: None,
            }],
            customer_email: "cook@example.com".to_string(),
            customer_name: "Ada Cook".to_string(),
            total: 14.99,
        }
    }

    fn paid_event(order_id: &str) -> WebhookEvent {
        WebhookEvent {
            event_id: "evt_1".to_string(),
            event_type: WebhookEventType::CheckoutCompleted,
            provider: "fake".to_string(),
            session_id: Some("cs_test_1".to_string()),
            order_id: Some(order_id.to_string()),
            customer_email: Some("cook@example.com".to_string()),
            customer_name: Some("Ada Cook".to_string()),
            amount_paid: Some(1499),
            currency: Some(Currency::GBP),
            payment_status: Some("paid".to_string()),
            raw_data: None,
            timestamp: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_session_consumes_csrf_token() {
        let h = harness(false, false);
        let csrf = h.orchestrator.csrf().issue();

        let session = h
            .orchestrator
            .create_session(&request(), Some(&csrf))
            .await
            .unwrap();

        assert_eq!(session.checkout_url, "https://pay.example/cs_test_1");
        assert_eq!(
            h.orchestrator.order_state(&session.order_id),
            Some(OrderState::SessionActive)
        );
        assert_eq!(
            h.orchestrator.order_session_id(&session.order_id).as_deref(),
            Some("cs_test_1")
        );
        assert!(!h.orchestrator.csrf().validate_and_consume(&csrf));
    }

    #[tokio::test]
    async fn test_replayed_csrf_rejected() {
        let h = harness(false, false);
        let csrf = h.orchestrator.csrf().issue();

        h.orchestrator
            .create_session(&request(), Some(&csrf))
            .await
            .unwrap();
        let second = h.orchestrator.create_session(&request(), Some(&csrf)).await;

        assert!(matches!(second, Err(ShopError::InvalidCsrf)));
        assert_eq!(h.provider.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_missing_csrf_rejected() {
        let h = harness(false, false);

        let result = h.orchestrator.create_session(&request(), None).await;

        assert!(matches!(result, Err(ShopError::InvalidCsrf)));
        assert_eq!(h.provider.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_invalid_order_keeps_csrf_token() {
        let h = harness(false, false);
        let csrf = h.orchestrator.csrf().issue();
        let mut bad = request();
        bad.items.clear();

        let result = h.orchestrator.create_session(&bad, Some(&csrf)).await;

        assert!(matches!(result, Err(ShopError::InvalidOrder(_))));
        assert!(h.orchestrator.csrf().validate_and_consume(&csrf));
    }

    #[tokio::test]
    async fn test_provider_failure_surfaces_once() {
        let h = harness(true, false);
        let csrf = h.orchestrator.csrf().issue();

        let result = h.orchestrator.create_session(&request(), Some(&csrf)).await;

        assert!(matches!(result, Err(ShopError::ProviderError { .. })));
        assert_eq!(h.provider.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_paid_event_mints_token_and_notifies() {
        let h = harness(false, false);
        let csrf = h.orchestrator.csrf().issue();
        let session = h
            .orchestrator
            .create_session(&request(), Some(&csrf))
            .await
            .unwrap();

        let outcome = h
            .orchestrator
            .handle_webhook_event(paid_event(&session.order_id))
            .await
            .unwrap();

        assert_eq!(
            outcome,
            WebhookOutcome::Fulfilled {
                order_id: session.order_id.clone(),
                notified: true
            }
        );
        assert_eq!(
            h.orchestrator.order_state(&session.order_id),
            Some(OrderState::Completed)
        );

        let sent = h.notifier.sent.lock();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].customer_email, "cook@example.com");
        assert_eq!(sent[0].max_downloads, 5);
        assert_eq!(sent[0].expires_in_days, 7);

        let token = sent[0]
            .download_url
            .strip_prefix("https://shop.example/download/")
            .unwrap();
        assert_eq!(h.orchestrator.downloads().remaining(token), Some(5));
    }

    #[tokio::test]
    async fn test_duplicate_event_mints_once() {
        let h = harness(false, false);

        h.orchestrator
            .handle_webhook_event(paid_event("ord_dup"))
            .await
            .unwrap();
        let second = h
            .orchestrator
            .handle_webhook_event(paid_event("ord_dup"))
            .await
            .unwrap();

        assert_eq!(
            second,
            WebhookOutcome::Duplicate {
                order_id: "ord_dup".to_string()
            }
        );
        assert_eq!(h.orchestrator.downloads().store().len(), 1);
    }

    #[tokio::test]
    async fn test_notifier_failure_keeps_token() {
        let h = harness(false, true);

        let outcome = h
            .orchestrator
            .handle_webhook_event(paid_event("ord_1"))
            .await
            .unwrap();

        assert_eq!(
            outcome,
            WebhookOutcome::Fulfilled {
                order_id: "ord_1".to_string(),
                notified: false
            }
        );
        assert_eq!(h.orchestrator.downloads().store().len(), 1);
    }

    #[tokio::test]
    async fn test_unpaid_checkout_waits() {
        let h = harness(false, false);
        let mut event = paid_event("ord_1");
        event.payment_status = Some("unpaid".to_string());

        let outcome = h.orchestrator.handle_webhook_event(event).await.unwrap();

        assert!(matches!(outcome, WebhookOutcome::AwaitingPayment { .. }));
        assert!(h.orchestrator.downloads().store().is_empty());
    }

    #[tokio::test]
    async fn test_expired_session_abandons_order() {
        let h = harness(false, false);
        let csrf = h.orchestrator.csrf().issue();
        let session = h
            .orchestrator
            .create_session(&request(), Some(&csrf))
            .await
            .unwrap();

        let mut event = paid_event(&session.order_id);
        event.event_type = WebhookEventType::CheckoutExpired;
        event.payment_status = None;
        h.orchestrator.handle_webhook_event(event).await.unwrap();

        assert_eq!(
            h.orchestrator.order_state(&session.order_id),
            Some(OrderState::Abandoned)
        );
    }

    #[tokio::test]
    async fn test_unknown_event_ignored() {
        let h = harness(false, false);
        let mut event = paid_event("ord_1");
        event.event_type = WebhookEventType::Unknown("charge.refunded".to_string());

        let outcome = h.orchestrator.handle_webhook_event(event).await.unwrap();

        assert_eq!(outcome, WebhookOutcome::Ignored);
    }

    #[test]
    fn test_ledger_opens_through_created() {
        let ledger = OrderLedger::default();
        ledger.open("ord_1", Utc::now());

        assert_eq!(ledger.state("ord_1"), Some(OrderState::SessionRequested));
    }

    #[test]
    fn test_ledger_evicts_stale_active_orders() {
        let clock = ManualClock::starting_now();
        let ledger = OrderLedger::with_soft_cap(3);

        ledger.open("stale_active", clock.now());
        ledger.transition("stale_active", OrderState::SessionActive, Some("cs_1"), clock.now());
        ledger.open("stale_requested", clock.now());
        ledger.open("stale_done", clock.now());
        ledger.transition("stale_done", OrderState::SessionActive, None, clock.now());
        ledger.complete("stale_done", clock.now());

        clock.advance(Duration::hours(ORDER_RETENTION_HOURS + 1));
        ledger.open("fresh", clock.now());

        assert_eq!(ledger.state("stale_active"), None);
        assert_eq!(ledger.state("stale_requested"), None);
        assert_eq!(ledger.state("stale_done"), None);
        assert_eq!(ledger.state("fresh"), Some(OrderState::SessionRequested));
        assert_eq!(ledger.0.lock().orders.len(), 1);
    }

    #[test]
    fn test_ledger_keeps_recent_orders_over_cap() {
        let clock = ManualClock::starting_now();
        let ledger = OrderLedger::with_soft_cap(2);

        ledger.open("ord_1", clock.now());
        ledger.open("ord_2", clock.now());
        clock.advance(Duration::hours(1));
        ledger.open("ord_3", clock.now());

        assert_eq!(ledger.0.lock().orders.len(), 3);
        assert_eq!(ledger.state("ord_1"), Some(OrderState::SessionRequested));
    }

    #[test]
    fn test_evicted_order_still_completes() {
        let clock = ManualClock::starting_now();
        let ledger = OrderLedger::with_soft_cap(1);

        ledger.open("ord_1", clock.now());
        ledger.transition("ord_1", OrderState::SessionActive, None, clock.now());
        clock.advance(Duration::hours(ORDER_RETENTION_HOURS + 1));
        ledger.open("ord_2", clock.now());

        assert!(ledger.complete("ord_1", clock.now()));
        assert!(!ledger.complete("ord_1", clock.now()));
    }
}
