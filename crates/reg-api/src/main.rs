//! # regpack
//!
//! Event registration packages with Mercado Pago checkout.
//!
//! ## Usage
//!
//! ```bash
//! # Set environment variables
//! export MERCADOPAGO_ACCESS_TOKEN=TEST-...
//! export MERCADOPAGO_WEBHOOK_SECRET=...
//! export BASE_URL=https://inscricoes.example.com
//!
//! # Run the server
//! regpack
//! ```

use reg_api::{routes, state::AppState};
use tokio::sync::watch;
use tracing::{info, warn, Level};
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

    print_banner();

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // Initialize application state
    let (state, worker) = AppState::from_env(shutdown_rx)?;

    let addr = state.config.socket_addr()?;
    let is_prod = state.config.is_production();

    info!("Environment: {}", state.config.environment);
    info!("Events loaded: {}", state.catalog.len());
    info!("Payment provider: {}", state.orchestrator.provider_name());

    let notifications = tokio::spawn(worker.run());

    let app = routes::create_router(state);

    info!("🎟  regpack starting on http://{}", addr);

    if !is_prod {
        info!("📝 Health: http://{}/health", addr);
        info!("📦 Packages: POST http://{}/api/v1/packages", addr);
        info!("🔔 Webhook: POST http://{}/webhook/mercadopago", addr);
    }

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Stop the notification worker once the server has drained
    let _ = shutdown_tx.send(true);
    if let Err(e) = notifications.await {
        warn!("Notification worker ended abnormally: {}", e);
    }

    info!("regpack stopped");
    Ok(())
}

/// Completes on Ctrl+C, or SIGTERM on unix
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, shutting down"),
        _ = terminate => info!("Received SIGTERM, shutting down"),
    }
}

fn print_banner() {
    println!(
        r#"
  🎟  regpack 🎟
  ━━━━━━━━━━━━━━━━━━━━━━━━━━━━
  Event registration packages
  Version: {}

"#,
        env!("CARGO_PKG_VERSION")
    );
}
