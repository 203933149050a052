//! # Application State
//!
//! Shared state for the Axum application.
//! Contains the registration and payment services, the event catalog,
//! the webhook verifier and configuration.

use crate::mailer::{HttpMailer, LoggingMailer};
use anyhow::Context;
use reg_core::{
    notification_channel, BoxedMailer, BoxedPaymentProcessor, CheckoutUrls, EventCatalog,
    NotificationWorker, OrchestratorConfig, PackageStore, PaymentOrchestrator,
    RegistrationService, RetryPolicy, SharedClock, SystemClock,
};
use reg_mercadopago::{MercadoPagoConfig, MercadoPagoProcessor, WebhookVerifier};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{info, warn};

/// Application configuration
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Host to bind to
    pub host: String,
    /// Port to listen on
    pub port: u16,
    /// Base URL for callbacks
    pub base_url: String,
    /// Environment (development, staging, production)
    pub environment: String,
    /// Explicit path to the event catalog
    pub events_config: Option<String>,
    /// Accept webhooks without a verifiable signature
    pub webhook_allow_unsigned: bool,
    pub notify_max_attempts: u32,
    pub notify_backoff: Duration,
    /// Where the HTTP mailer posts confirmations; logging mailer when unset
    pub mailer_webhook_url: Option<String>,
    pub processor_timeout: Duration,
}

impl AppConfig {
    /// Load from environment variables
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_vars(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup
    pub fn from_vars(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let config = Self {
            host: var("HOST").unwrap_or_else(|| "127.0.0.1".to_string()),
            port: parse_var(&var, "PORT")?.unwrap_or(8080),
            base_url: var("BASE_URL").unwrap_or_else(|| "http://localhost:8080".to_string()),
            environment: var("ENVIRONMENT").unwrap_or_else(|| "development".to_string()),
            events_config: var("EVENTS_CONFIG"),
            webhook_allow_unsigned: var("WEBHOOK_ALLOW_UNSIGNED")
                .map(|v| matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
                .unwrap_or(false),
            notify_max_attempts: parse_var(&var, "NOTIFY_MAX_ATTEMPTS")?
                .unwrap_or(reg_core::notify::DEFAULT_MAX_ATTEMPTS),
            notify_backoff: parse_var(&var, "NOTIFY_BACKOFF_SECS")?
                .map(Duration::from_secs)
                .unwrap_or(reg_core::notify::DEFAULT_BACKOFF),
            mailer_webhook_url: var("MAILER_WEBHOOK_URL"),
            processor_timeout: parse_var(&var, "PROCESSOR_TIMEOUT_SECS")?
                .map(Duration::from_secs)
                .unwrap_or(reg_core::orchestrator::DEFAULT_PROCESSOR_TIMEOUT),
        };

        if config.webhook_allow_unsigned && config.is_production() {
            anyhow::bail!("WEBHOOK_ALLOW_UNSIGNED cannot be enabled in production");
        }

        Ok(config)
    }

    /// Get the socket address to bind to
    pub fn socket_addr(&self) -> anyhow::Result<std::net::SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("invalid socket address {}:{}", self.host, self.port))
    }

    /// Check if running in production
    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new()
            .with_max_attempts(self.notify_max_attempts)
            .with_backoff(self.notify_backoff)
    }
}

fn parse_var<T>(var: &impl Fn(&str) -> Option<String>, key: &str) -> anyhow::Result<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    var(key)
        .map(|raw| {
            raw.trim()
                .parse()
                .map_err(|e| anyhow::anyhow!("invalid {}={}: {}", key, raw, e))
        })
        .transpose()
}

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub registrations: RegistrationService,
    pub orchestrator: PaymentOrchestrator,
    pub catalog: Arc<EventCatalog>,
    pub verifier: WebhookVerifier,
    pub clock: SharedClock,
    /// Application config
    pub config: AppConfig,
}

impl AppState {
    /// Create state from the environment with the Mercado Pago processor.
    ///
    /// Returns the notification worker, which the caller must spawn.
    pub fn from_env(
        shutdown_rx: watch::Receiver<bool>,
    ) -> anyhow::Result<(Self, NotificationWorker)> {
        let config = AppConfig::from_env()?;

        let mp_config = MercadoPagoConfig::from_env()
            .map_err(|e| anyhow::anyhow!("Failed to initialize Mercado Pago: {}", e))?;
        if mp_config.is_test_mode() {
            info!("Mercado Pago running with TEST credentials");
        }
        let verifier = WebhookVerifier::new(mp_config.webhook_secret.clone())
            .allow_unsigned(config.webhook_allow_unsigned);
        if !verifier.has_secret() {
            warn!("MERCADOPAGO_WEBHOOK_SECRET not set, signed webhooks cannot be verified");
        }

        let processor = MercadoPagoProcessor::new(mp_config)
            .map_err(|e| anyhow::anyhow!("Failed to initialize Mercado Pago: {}", e))?;

        let mailer: BoxedMailer = match &config.mailer_webhook_url {
            Some(url) => Arc::new(HttpMailer::new(url.clone())?),
            None => Arc::new(LoggingMailer),
        };

        let catalog = load_event_catalog(config.events_config.as_deref())?;

        Ok(Self::build(
            config,
            Arc::new(processor),
            mailer,
            catalog,
            verifier,
            Arc::new(SystemClock),
            shutdown_rx,
        ))
    }

    /// Wire services from explicit parts
    pub fn build(
        config: AppConfig,
        processor: BoxedPaymentProcessor,
        mailer: BoxedMailer,
        catalog: EventCatalog,
        verifier: WebhookVerifier,
        clock: SharedClock,
        shutdown_rx: watch::Receiver<bool>,
    ) -> (Self, NotificationWorker) {
        let store = Arc::new(PackageStore::new());
        let catalog = Arc::new(catalog);
        let (notifier, worker) = notification_channel(mailer, config.retry_policy(), shutdown_rx);

        let orchestrator_config = OrchestratorConfig::new(CheckoutUrls::new(&config.base_url))
            .with_processor_timeout(config.processor_timeout);

        let state = Self {
            registrations: RegistrationService::new(store.clone(), catalog.clone(), clock.clone()),
            orchestrator: PaymentOrchestrator::new(
                store,
                catalog.clone(),
                processor,
                notifier,
                clock.clone(),
                orchestrator_config,
            ),
            catalog,
            verifier,
            clock,
            config,
        };

        (state, worker)
    }
}

/// Load the event catalog from `EVENTS_CONFIG` or the default locations
fn load_event_catalog(explicit: Option<&str>) -> anyhow::Result<EventCatalog> {
    if let Some(path) = explicit {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path))?;
        return parse_catalog(&content, path);
    }

    let config_paths = [
        "config/events.toml",
        "../config/events.toml",
        "../../config/events.toml",
    ];

    for path in config_paths {
        if let Ok(content) = std::fs::read_to_string(path) {
            return parse_catalog(&content, path);
        }
    }

    warn!("No event catalog found, using empty catalog");
    Ok(EventCatalog::new())
}

fn parse_catalog(content: &str, path: &str) -> anyhow::Result<EventCatalog> {
    let catalog = EventCatalog::from_toml(content)
        .map_err(|e| anyhow::anyhow!("Failed to parse {}: {}", path, e))?;
    info!("Loaded {} events from {}", catalog.len(), path);
    Ok(catalog)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn vars(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_app_config_defaults() {
        let config = AppConfig::from_vars(vars(&[])).unwrap();
        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(config.port, 8080);
        assert!(!config.webhook_allow_unsigned);
        assert_eq!(config.notify_max_attempts, 3);
        assert_eq!(config.notify_backoff, Duration::from_secs(60));
        assert_eq!(config.processor_timeout, Duration::from_secs(30));
        assert!(config.mailer_webhook_url.is_none());
    }

    #[test]
    fn test_socket_addr() {
        let config = AppConfig::from_vars(vars(&[("HOST", "0.0.0.0"), ("PORT", "3000")])).unwrap();
        assert_eq!(config.socket_addr().unwrap().to_string(), "0.0.0.0:3000");
    }

    #[test]
    fn test_invalid_number_rejected() {
        assert!(AppConfig::from_vars(vars(&[("PORT", "eighty")])).is_err());
        assert!(AppConfig::from_vars(vars(&[("NOTIFY_BACKOFF_SECS", "-1")])).is_err());
    }

    #[test]
    fn test_unsigned_webhooks_refused_in_production() {
        let err = AppConfig::from_vars(vars(&[
            ("ENVIRONMENT", "production"),
            ("WEBHOOK_ALLOW_UNSIGNED", "true"),
        ]))
        .unwrap_err();
        assert!(err.to_string().contains("WEBHOOK_ALLOW_UNSIGNED"));

        let config = AppConfig::from_vars(vars(&[
            ("ENVIRONMENT", "staging"),
            ("WEBHOOK_ALLOW_UNSIGNED", "1"),
        ]))
        .unwrap();
        assert!(config.webhook_allow_unsigned);
    }

    #[test]
    fn test_retry_policy_from_config() {
        let config = AppConfig::from_vars(vars(&[
            ("NOTIFY_MAX_ATTEMPTS", "5"),
            ("NOTIFY_BACKOFF_SECS", "2"),
        ]))
        .unwrap();
        let policy = config.retry_policy();
        assert_eq!(policy.max_attempts(), 5);
        assert_eq!(policy.backoff(), Duration::from_secs(2));
    }

    #[test]
    fn test_missing_explicit_catalog_is_an_error() {
        assert!(load_event_catalog(Some("/nonexistent/events.toml")).is_err());
    }
}
