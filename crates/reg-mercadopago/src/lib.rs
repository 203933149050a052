//! # reg-mercadopago
//!
//! Mercado Pago payment processor for regpack-rs.
//!
//! Two checkout flows are supported:
//!
//! 1. **Pix** - direct charge via `POST /v1/payments`
//!    - QR code and copy-paste code returned immediately
//!    - Status usually `pending` until the payer scans
//!
//! 2. **Credit card** - hosted checkout via `POST /checkout/preferences`
//!    - Payer is redirected to `init_point`
//!    - Pix, debit and boleto excluded
//!
//! Either way the final outcome arrives through a webhook, and the
//! authoritative status is fetched with `GET /v1/payments/{id}`.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use reg_mercadopago::MercadoPagoProcessor;
//! use reg_core::PaymentProcessor;
//!
//! let processor = MercadoPagoProcessor::from_env()?;
//! let payment = processor.get_payment("1319283746").await?;
//! println!("{} -> {:?}", payment.status, payment.external_reference);
//! ```
//!
//! ## Webhook Verification
//!
//! ```rust,ignore
//! use reg_mercadopago::{WebhookNotification, WebhookVerifier};
//!
//! let verifier = WebhookVerifier::new(config.webhook_secret.clone());
//! let notification = WebhookNotification::parse(&body, &query)?;
//! verifier.verify(signature, request_id, &notification.signature_data_id(), Utc::now())?;
//! ```

pub mod client;
pub mod config;
pub mod webhook;

// Re-exports
pub use client::MercadoPagoProcessor;
pub use config::MercadoPagoConfig;
pub use webhook::{
    Verification, WebhookNotification, WebhookVerificationError, WebhookVerifier,
};
