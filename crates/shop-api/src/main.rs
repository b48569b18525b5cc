//! # RecipeRush Storefront
//!
//! Checkout and e-book delivery server.
//!
//! ## Usage
//!
//! ```bash
//! # Set environment variables
//! export STRIPE_SECRET_KEY=sk_test_...
//! export STRIPE_WEBHOOK_SECRET=whsec_...
//! export BASE_URL=https://reciperush.example
//!
//! # Run the server
//! storefront
//! ```

use shop_api::{routes, state::AppState};
use shop_stripe::print_webhook_setup_instructions;
use std::net::SocketAddr;
use tracing::{info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(
            EnvFilter::builder()
                .with_default_directive(Level::INFO.into())
                .from_env_lossy(),
        )
        .init();

    // Print banner
    print_banner();

    // Initialize application state
    let state = AppState::new()?;

    let addr = state.config.socket_addr()?;
    let is_prod = state.config.is_production();

    info!("Environment: {}", state.config.environment);
    info!(
        "Download links: {} uses, valid {} days",
        state.orchestrator.downloads().max_downloads(),
        state.orchestrator.downloads().ttl().num_days()
    );
    info!(
        "Email delivery: {}",
        if state.email_enabled { "smtp" } else { "log only" }
    );

    // Token expiry sweeps run for the lifetime of the server
    let orchestrator = state.orchestrator.clone();
    orchestrator.start_sweeps(state.config.sweep_interval);

    let base_url = state.config.base_url.clone();
    let app = routes::create_router(state);

    info!("🚀 Storefront starting on http://{}", addr);

    if !is_prod {
        info!("📝 Health: http://{}/health", addr);
        info!("💳 Checkout: POST http://{}/create-checkout-session", addr);
        print_webhook_setup_instructions(&format!("{}/webhook/stripe", base_url));
    }

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    orchestrator.stop_sweeps();
    info!("Server stopped");

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => info!("Received Ctrl+C, shutting down"),
                    _ = sigterm.recv() => info!("Received SIGTERM, shutting down"),
                }
            }
            Err(e) => {
                tracing::warn!("Failed to install SIGTERM handler: {}", e);
                let _ = ctrl_c.await;
                info!("Received Ctrl+C, shutting down");
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = ctrl_c.await;
        info!("Received Ctrl+C, shutting down");
    }
}

fn print_banner() {
    println!(
        r#"
  📚 RecipeRush Storefront 📚
  ━━━━━━━━━━━━━━━━━━━━━━━━━━━
  Checkout & e-book delivery
  Version: {}

"#,
        env!("CARGO_PKG_VERSION")
    );
}
