//! # Application State
//!
//! Shared state for the Axum application.
//! Contains the checkout orchestrator, artifact store and configuration.

use crate::artifact::{ArtifactConfig, FsArtifactStore};
use crate::notifier::{LoggingNotifier, SmtpConfig, SmtpNotifier};
use crate::rate_limit::RateLimiter;
use anyhow::Context;
use shop_core::{
    BoxedArtifactStore, BoxedNotifier, CheckoutOrchestrator, CheckoutUrls, CsrfTokenService,
    DownloadTokenService, SharedClock, SystemClock,
};
use shop_stripe::{StripeCheckoutStrategy, StripeConfig};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::info;

/// Application configuration
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Host to bind to
    pub host: String,
    /// Port to listen on
    pub port: u16,
    /// Base URL for callbacks and download links
    pub base_url: String,
    /// Environment (development, staging, production)
    pub environment: String,
    pub artifact: ArtifactConfig,
    /// CSRF token requests allowed per client per window
    pub csrf_rate_limit: u32,
    pub csrf_rate_window: Duration,
    /// How often expired tokens are swept
    pub sweep_interval: Duration,
    /// CORS origin; any origin when unset
    pub allowed_origin: Option<String>,
    /// Email delivery; download links are only logged when unset
    pub smtp: Option<SmtpConfig>,
}

impl AppConfig {
    /// Load from environment variables
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary variable source
    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let port = match var("PORT") {
            Some(p) => p.parse().with_context(|| format!("Invalid PORT: {}", p))?,
            None => defaults.port,
        };

        let artifact = ArtifactConfig {
            path: var("ARTIFACT_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.artifact.path),
            filename: var("ARTIFACT_FILENAME").unwrap_or(defaults.artifact.filename),
            content_type: var("ARTIFACT_CONTENT_TYPE").unwrap_or(defaults.artifact.content_type),
        };

        let csrf_rate_limit = match var("CSRF_RATE_LIMIT") {
            Some(v) => v.parse().with_context(|| format!("Invalid CSRF_RATE_LIMIT: {}", v))?,
            None => defaults.csrf_rate_limit,
        };
        let csrf_rate_window = match var("CSRF_RATE_WINDOW_SECS") {
            Some(v) => Duration::from_secs(
                v.parse()
                    .with_context(|| format!("Invalid CSRF_RATE_WINDOW_SECS: {}", v))?,
            ),
            None => defaults.csrf_rate_window,
        };
        let sweep_interval = match var("SWEEP_INTERVAL_SECS") {
            Some(v) => {
                let secs: u64 = v
                    .parse()
                    .with_context(|| format!("Invalid SWEEP_INTERVAL_SECS: {}", v))?;
                anyhow::ensure!(secs > 0, "SWEEP_INTERVAL_SECS must be positive");
                Duration::from_secs(secs)
            }
            None => defaults.sweep_interval,
        };

        let smtp = match var("SMTP_HOST") {
            Some(host) => {
                let username = var("SMTP_USERNAME").context("SMTP_USERNAME not set")?;
                let smtp_port = match var("SMTP_PORT") {
                    Some(p) => p.parse().with_context(|| format!("Invalid SMTP_PORT: {}", p))?,
                    None => 587,
                };
                Some(SmtpConfig {
                    host,
                    port: smtp_port,
                    from_email: var("EMAIL_FROM").unwrap_or_else(|| username.clone()),
                    username,
                    password: var("SMTP_PASSWORD").context("SMTP_PASSWORD not set")?,
                    from_name: var("EMAIL_FROM_NAME").unwrap_or_else(|| "RecipeRush".to_string()),
                })
            }
            None => None,
        };

        Ok(Self {
            host: var("HOST").unwrap_or(defaults.host),
            port,
            base_url: var("BASE_URL").unwrap_or(defaults.base_url),
            environment: var("ENVIRONMENT").unwrap_or(defaults.environment),
            artifact,
            csrf_rate_limit,
            csrf_rate_window,
            sweep_interval,
            allowed_origin: var("ALLOWED_ORIGIN"),
            smtp,
        })
    }

    /// Get the socket address to bind to
    pub fn socket_addr(&self) -> anyhow::Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("Invalid socket address {}:{}", self.host, self.port))
    }

    /// Check if running in production
    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3000,
            base_url: "http://localhost:3000".to_string(),
            environment: "development".to_string(),
            artifact: ArtifactConfig::default(),
            csrf_rate_limit: 20,
            csrf_rate_window: Duration::from_secs(60),
            sweep_interval: Duration::from_secs(300),
            allowed_origin: None,
            smtp: None,
        }
    }
}

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: CheckoutOrchestrator,
    pub artifacts: BoxedArtifactStore,
    pub csrf_limiter: Arc<RateLimiter>,
    /// Stripe publishable key served to the front end
    pub publishable_key: Option<String>,
    /// Whether download links go out by email
    pub email_enabled: bool,
    /// Application config
    pub config: Arc<AppConfig>,
    pub started_at: Instant,
}

impl AppState {
    /// Create a new AppState with the Stripe strategy and configured notifier
    pub fn new() -> anyhow::Result<Self> {
        let config = AppConfig::from_env()?;

        let stripe_config = StripeConfig::from_env()
            .map_err(|e| anyhow::anyhow!("Failed to initialize Stripe: {}", e))?;
        let publishable_key = stripe_config.publishable_key.clone();
        let currency = stripe_config.currency;
        let strategy = StripeCheckoutStrategy::new(stripe_config)
            .map_err(|e| anyhow::anyhow!("Failed to initialize Stripe: {}", e))?;

        let (notifier, email_enabled): (BoxedNotifier, bool) = match config.smtp.clone() {
            Some(smtp) => {
                info!(host = %smtp.host, "Email delivery via SMTP");
                let notifier = SmtpNotifier::new(smtp)
                    .map_err(|e| anyhow::anyhow!("Failed to initialize email: {}", e))?;
                (Arc::new(notifier), true)
            }
            None => (Arc::new(LoggingNotifier), false),
        };

        let clock: SharedClock = Arc::new(SystemClock);
        let orchestrator = CheckoutOrchestrator::new(
            Arc::new(strategy),
            notifier,
            CsrfTokenService::new(clock.clone()),
            DownloadTokenService::new(clock, config.is_production()),
            CheckoutUrls::new(&config.base_url),
        )
        .with_currency(currency);

        let artifacts = Arc::new(FsArtifactStore::new(config.artifact.clone()));

        Ok(Self::from_parts(config, orchestrator, artifacts)
            .with_publishable_key(publishable_key)
            .with_email_enabled(email_enabled))
    }

    /// Assemble state from prebuilt collaborators
    pub fn from_parts(
        config: AppConfig,
        orchestrator: CheckoutOrchestrator,
        artifacts: BoxedArtifactStore,
    ) -> Self {
        let csrf_limiter = Arc::new(RateLimiter::new(
            config.csrf_rate_limit,
            config.csrf_rate_window,
        ));

        Self {
            orchestrator,
            artifacts,
            csrf_limiter,
            publishable_key: None,
            email_enabled: false,
            config: Arc::new(config),
            started_at: Instant::now(),
        }
    }

    pub fn with_publishable_key(mut self, key: Option<String>) -> Self {
        self.publishable_key = key;
        self
    }

    pub fn with_email_enabled(mut self, enabled: bool) -> Self {
        self.email_enabled = enabled;
        self
    }
}
