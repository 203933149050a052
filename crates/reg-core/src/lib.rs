//! # reg-core
//!
//! Core types and services for the regpack event registration engine.
//!
//! This crate provides:
//! - `RateBatch` and `EventCatalog` for time-windowed event pricing
//! - `Package` and its status state machine
//! - `RegistrationService` for admitting and removing participants
//! - `PaymentOrchestrator` for checkout and webhook reconciliation
//! - `PaymentProcessor` trait for implementing payment providers
//! - `NotificationDispatcher` and `Mailer` for confirmation messages
//! - `PackageError` for typed error handling
//!
//! ## Example
//!
//! ```rust,ignore
//! use reg_core::{ActorContext, ParticipantPayload, PaymentMethod};
//!
//! let actor = ActorContext::user("user-42", "ana@example.com");
//!
//! // First registration creates the package
//! let admission = registrations
//!     .add_registration(&actor, None, event_id, ParticipantPayload::new("Ana Souza", "ana@example.com", "11987654321"))
//!     .await?;
//!
//! // Start checkout
//! let intent = orchestrator
//!     .create_payment_intent(&actor, admission.package.id, PaymentMethod::Pix)
//!     .await?;
//!
//! // Later, from the webhook
//! let outcome = orchestrator.reconcile("1234567890").await?;
//! ```

pub mod actor;
pub mod admission;
pub mod batch;
pub mod clock;
pub mod error;
pub mod event;
pub mod notify;
pub mod orchestrator;
pub mod package;
pub mod processor;
pub mod registration;
pub mod store;

// Re-exports for convenience
pub use actor::ActorContext;
pub use admission::{Admission, PackageView, RegistrationService, RemovalOutcome};
pub use batch::{BatchInput, DateRange, RateBatch};
pub use clock::{Clock, FixedClock, SharedClock, SystemClock};
pub use error::{
    FieldError, PackageError, PackageResult, ProcessorError, StateError, ValidationErrors,
};
pub use event::{Event, EventCatalog, EventListing};
pub use notify::{
    notification_channel, BoxedMailer, ConfirmationJob, Mailer, MailerError,
    NotificationDispatcher, NotificationWorker, PackageSnapshot, RetryPolicy,
};
pub use orchestrator::{
    OrchestratorConfig, PaymentOrchestrator, ReconcileOutcome, RevertReport,
};
pub use package::{Package, PackageOwner, PackageStatus, PaymentMethod};
pub use processor::{
    BoxedPaymentProcessor, CheckoutUrls, DirectChargeRequest, DirectChargeResponse,
    PaymentIntent, PaymentProcessor, PaymentRecord, PreferenceRequest, PreferenceResponse,
    ProcessorPaymentStatus, ProcessorResult,
};
pub use registration::{ParticipantPayload, Registration};
pub use store::PackageStore;
