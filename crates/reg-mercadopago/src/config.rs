//! # Mercado Pago Configuration
//!
//! Configuration management for the Mercado Pago integration.
//! All secrets are loaded from environment variables.

use reg_core::PackageError;
use std::env;
use std::time::Duration;

/// Production API endpoint
pub const DEFAULT_API_BASE_URL: &str = "https://api.mercadopago.com";

/// Mercado Pago API configuration
#[derive(Debug, Clone)]
pub struct MercadoPagoConfig {
    /// Access token (TEST-... or APP_USR-...)
    pub access_token: String,

    /// Public key, handed to browser-side checkout bricks
    pub public_key: Option<String>,

    /// Secret used to sign webhook notifications
    pub webhook_secret: Option<String>,

    /// API base URL (for testing/mocking)
    pub api_base_url: String,

    /// HTTP client timeout
    pub timeout: Duration,
}

impl MercadoPagoConfig {
    /// Load configuration from environment variables.
    ///
    /// Required env vars:
    /// - `MERCADOPAGO_ACCESS_TOKEN`
    ///
    /// Optional:
    /// - `MERCADOPAGO_PUBLIC_KEY`
    /// - `MERCADOPAGO_WEBHOOK_SECRET` (without it, webhooks are refused
    ///   unless unsigned delivery is explicitly allowed)
    /// - `MERCADOPAGO_API_BASE_URL`
    pub fn from_env() -> Result<Self, PackageError> {
        dotenvy::dotenv().ok(); // Load .env file if present
        Self::from_vars(|key| env::var(key).ok())
    }

    /// Build from any key lookup
    pub fn from_vars(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, PackageError> {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let access_token = non_empty("MERCADOPAGO_ACCESS_TOKEN").ok_or_else(|| {
            PackageError::Configuration("MERCADOPAGO_ACCESS_TOKEN not set".to_string())
        })?;

        if !access_token.starts_with("TEST-") && !access_token.starts_with("APP_USR-") {
            return Err(PackageError::Configuration(
                "MERCADOPAGO_ACCESS_TOKEN must start with TEST- or APP_USR-".to_string(),
            ));
        }

        let mut config = Self::new(access_token);
        config.public_key = non_empty("MERCADOPAGO_PUBLIC_KEY");
        config.webhook_secret = non_empty("MERCADOPAGO_WEBHOOK_SECRET");
        if let Some(url) = non_empty("MERCADOPAGO_API_BASE_URL") {
            config = config.with_api_base_url(url);
        }
        Ok(config)
    }

    /// Create config with explicit values (for testing)
    pub fn new(access_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            public_key: None,
            webhook_secret: None,
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            timeout: Duration::from_secs(30),
        }
    }

    /// Sandbox credentials
    pub fn is_test_mode(&self) -> bool {
        self.access_token.starts_with("TEST-")
    }

    /// Get authorization header value
    pub fn auth_header(&self) -> String {
        format!("Bearer {}", self.access_token)
    }

    /// Builder: set custom API base URL (for testing)
    pub fn with_api_base_url(mut self, url: impl Into<String>) -> Self {
        self.api_base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    /// Builder: set webhook signing secret
    pub fn with_webhook_secret(mut self, secret: impl Into<String>) -> Self {
        self.webhook_secret = Some(secret.into());
        self
    }

    /// Builder: set HTTP client timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}
