//! # Payment Processor Trait
//!
//! Contract with the external payment processor. The orchestrator only
//! talks to this trait; the Mercado Pago client lives in `reg-mercadopago`.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                  PaymentProcessor (trait)                   │
//! │  ├── create_preference()    hosted checkout (credit card)   │
//! │  ├── create_direct_charge() pix charge with QR payload      │
//! │  ├── get_payment()          authoritative payment record    │
//! │  └── provider_name()                                        │
//! └─────────────────────────────────────────────────────────────┘
//!                            ▲
//!              ┌─────────────┴─────────────┐
//!      ┌───────┴────────┐          ┌───────┴────────┐
//!      │  MercadoPago   │          │  test doubles  │
//!      │   Processor    │          │                │
//!      └────────────────┘          └────────────────┘
//! ```

use crate::error::ProcessorError;
use crate::package::PaymentMethod;
use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

/// Result type for processor calls
pub type ProcessorResult<T> = Result<T, ProcessorError>;

/// One line of a checkout preference
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessorLineItem {
    pub title: String,
    pub quantity: u32,
    pub unit_price: Decimal,
}

/// Who is paying
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payer {
    pub email: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,
}

/// Where the processor sends the buyer back to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackUrls {
    pub success: String,
    pub failure: String,
    pub pending: String,
}

/// Public URLs handed to the processor at checkout
#[derive(Debug, Clone)]
pub struct CheckoutUrls {
    /// Base URL of the application (e.g., "https://inscricoes.example.com")
    pub base_url: String,
    pub success_path: String,
    pub failure_path: String,
    pub pending_path: String,
    pub notification_path: String,
}

impl CheckoutUrls {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            success_path: "/payment/success".to_string(),
            failure_path: "/payment/failure".to_string(),
            pending_path: "/payment/pending".to_string(),
            notification_path: "/webhook/mercadopago".to_string(),
        }
    }

    /// Return pages for one package
    pub fn back_urls(&self, package_id: Uuid) -> BackUrls {
        BackUrls {
            success: format!("{}{}/{}", self.base_url, self.success_path, package_id),
            failure: format!("{}{}/{}", self.base_url, self.failure_path, package_id),
            pending: format!("{}{}/{}", self.base_url, self.pending_path, package_id),
        }
    }

    /// Webhook URL the processor notifies
    pub fn notification_url(&self) -> String {
        format!("{}{}", self.base_url, self.notification_path)
    }
}

impl Default for CheckoutUrls {
    fn default() -> Self {
        Self::new("http://localhost:8080")
    }
}

/// Processor-side restrictions that make a preference card-only
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CardRestrictions {
    pub excluded_payment_methods: Vec<String>,
    pub excluded_payment_types: Vec<String>,
    pub max_installments: u32,
    pub default_installments: u32,
}

impl CardRestrictions {
    /// Exclude pix, debit card and boleto ("ticket")
    pub fn credit_card_only(max_installments: u32) -> Self {
        Self {
            excluded_payment_methods: vec!["pix".to_string()],
            excluded_payment_types: vec!["debit_card".to_string(), "ticket".to_string()],
            max_installments,
            default_installments: 1,
        }
    }
}

/// Hosted checkout request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreferenceRequest {
    pub items: Vec<ProcessorLineItem>,
    pub payer: Payer,
    pub back_urls: BackUrls,
    pub notification_url: String,
    /// Package number, echoed back on the payment record
    pub external_reference: String,
    pub statement_descriptor: String,
    pub restrictions: CardRestrictions,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreferenceResponse {
    pub id: String,
    pub init_point: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sandbox_init_point: Option<String>,
}

/// Immediate pix charge request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectChargeRequest {
    pub transaction_amount: Decimal,
    pub description: String,
    pub payer: Payer,
    pub external_reference: String,
    pub notification_url: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectChargeResponse {
    pub id: String,
    pub status: ProcessorPaymentStatus,
    pub qr_code: Option<String>,
    pub qr_code_base64: Option<String>,
    pub ticket_url: Option<String>,
}

/// Payment status as reported by the processor
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ProcessorPaymentStatus {
    Approved,
    Rejected,
    Cancelled,
    Pending,
    InProcess,
    /// Anything this version does not recognize
    Other(String),
}

impl ProcessorPaymentStatus {
    pub fn from_provider(status: &str) -> Self {
        match status {
            "approved" => Self::Approved,
            "rejected" => Self::Rejected,
            "cancelled" => Self::Cancelled,
            "pending" => Self::Pending,
            "in_process" => Self::InProcess,
            other => Self::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::Cancelled => "cancelled",
            Self::Pending => "pending",
            Self::InProcess => "in_process",
            Self::Other(s) => s,
        }
    }
}

impl fmt::Display for ProcessorPaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for ProcessorPaymentStatus {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for ProcessorPaymentStatus {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(Self::from_provider(&raw))
    }
}

/// Authoritative payment record fetched from the processor
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentRecord {
    pub id: String,
    pub status: ProcessorPaymentStatus,
    /// Package number supplied at creation, when present
    pub external_reference: Option<String>,
    pub amount: Option<Decimal>,
}

/// What the buyer needs to complete payment
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum PaymentIntent {
    /// Pix charge with QR code data
    Pix {
        package_number: String,
        payment_id: String,
        status: ProcessorPaymentStatus,
        #[serde(skip_serializing_if = "Option::is_none")]
        qr_code: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        qr_code_base64: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        ticket_url: Option<String>,
    },
    /// Hosted card checkout
    CreditCard {
        package_number: String,
        preference_id: String,
        init_point: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        sandbox_init_point: Option<String>,
    },
}

impl PaymentIntent {
    pub fn method(&self) -> PaymentMethod {
        match self {
            PaymentIntent::Pix { .. } => PaymentMethod::Pix,
            PaymentIntent::CreditCard { .. } => PaymentMethod::CreditCard,
        }
    }

    pub fn package_number(&self) -> &str {
        match self {
            PaymentIntent::Pix { package_number, .. }
            | PaymentIntent::CreditCard { package_number, .. } => package_number,
        }
    }

    /// Where to send the buyer, if the intent has a redirect
    pub fn redirect_url(&self, sandbox: bool) -> Option<&str> {
        match self {
            PaymentIntent::Pix { ticket_url, .. } => ticket_url.as_deref(),
            PaymentIntent::CreditCard {
                init_point,
                sandbox_init_point,
                ..
            } => match (sandbox, sandbox_init_point) {
                (true, Some(sandbox_url)) => Some(sandbox_url.as_str()),
                _ => Some(init_point.as_str()),
            },
        }
    }
}

/// External payment processor.
///
/// Calls must not retry internally; the orchestrator bounds each call with a
/// timeout and treats any failure as "nothing happened".
#[async_trait]
pub trait PaymentProcessor: Send + Sync {
    /// Create a hosted checkout preference
    async fn create_preference(
        &self,
        request: &PreferenceRequest,
    ) -> ProcessorResult<PreferenceResponse>;

    /// Issue a pix charge
    async fn create_direct_charge(
        &self,
        request: &DirectChargeRequest,
    ) -> ProcessorResult<DirectChargeResponse>;

    /// Fetch the payment record by processor id
    async fn get_payment(&self, payment_id: &str) -> ProcessorResult<PaymentRecord>;

    /// Get the provider name (for logging and errors)
    fn provider_name(&self) -> &'static str;
}

/// Type alias for a shared processor (dynamic dispatch)
pub type BoxedPaymentProcessor = Arc<dyn PaymentProcessor>;
