//! # Notification Dispatch
//!
//! Best-effort confirmation messages, delivered off the request path.
//!
//! The orchestrator hands a [`ConfirmationJob`] to a [`NotificationDispatcher`];
//! a [`NotificationWorker`] running on its own task pulls jobs from the queue
//! and calls the [`Mailer`] with a fixed-backoff retry policy. Delivery
//! failures end in a log line and never reach the payment flow.

use crate::event::EventCatalog;
use crate::package::{PackageOwner, PackageStatus, PaymentMethod};
use crate::store::PackageRecord;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Default delivery attempts, including the first
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Default pause between attempts
pub const DEFAULT_BACKOFF: Duration = Duration::from_secs(60);

/// One registration as shown in a confirmation message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistrationLine {
    pub event_id: Uuid,
    pub event_name: String,
    pub participant_name: String,
    pub participant_email: String,
    pub price_paid: Decimal,
}

/// Read-only copy of a confirmed package, taken under the package lock
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageSnapshot {
    pub package_id: Uuid,
    pub package_number: String,
    pub owner: PackageOwner,
    pub status: PackageStatus,
    pub total_amount: Decimal,
    pub payment_method: Option<PaymentMethod>,
    pub payment_id: Option<String>,
    pub registrations: Vec<RegistrationLine>,
    pub captured_at: DateTime<Utc>,
}

impl PackageSnapshot {
    /// Copy a package record, resolving event names from the catalog
    pub fn capture(record: &PackageRecord, catalog: &EventCatalog, now: DateTime<Utc>) -> Self {
        let registrations = record
            .registrations
            .iter()
            .map(|r| RegistrationLine {
                event_id: r.event_id,
                event_name: catalog
                    .get(r.event_id)
                    .map(|e| e.name)
                    .unwrap_or_else(|| r.event_id.to_string()),
                participant_name: r.participant_name.clone(),
                participant_email: r.participant_email.clone(),
                price_paid: r.price_paid,
            })
            .collect();

        Self {
            package_id: record.package.id,
            package_number: record.package.package_number.clone(),
            owner: record.package.owner.clone(),
            status: record.package.status,
            total_amount: record.package.total_amount,
            payment_method: record.package.payment_method,
            payment_id: record.package.payment_id.clone(),
            registrations,
            captured_at: now,
        }
    }
}

#[derive(Debug, Clone, Error)]
pub enum MailerError {
    /// Could not reach the mail transport
    #[error("mail transport error: {0}")]
    Transport(String),

    /// Transport refused the message
    #[error("mail rejected: {0}")]
    Rejected(String),
}

/// Outbound confirmation channel
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, recipient: &str, snapshot: &PackageSnapshot) -> Result<(), MailerError>;

    /// Get the mailer name (for logging)
    fn name(&self) -> &'static str;
}

/// Type alias for a shared mailer
pub type BoxedMailer = Arc<dyn Mailer>;

/// Fixed-backoff retry settings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: u32,
    backoff: Duration,
}

impl RetryPolicy {
    /// 3 attempts, 60 seconds apart
    pub const fn new() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            backoff: DEFAULT_BACKOFF,
        }
    }

    /// Set total attempts (at least 1)
    #[must_use]
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    #[must_use]
    pub const fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    pub const fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub const fn backoff(&self) -> Duration {
        self.backoff
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new()
    }
}

/// A queued confirmation message
#[derive(Debug, Clone)]
pub struct ConfirmationJob {
    pub recipient: String,
    pub snapshot: PackageSnapshot,
}

impl ConfirmationJob {
    /// Address the package owner
    pub fn for_owner(snapshot: PackageSnapshot) -> Self {
        Self {
            recipient: snapshot.owner.email.clone(),
            snapshot,
        }
    }
}

/// Sending half of the confirmation queue
#[derive(Debug, Clone)]
pub struct NotificationDispatcher {
    tx: mpsc::UnboundedSender<ConfirmationJob>,
}

impl NotificationDispatcher {
    pub fn new(tx: mpsc::UnboundedSender<ConfirmationJob>) -> Self {
        Self { tx }
    }

    /// Queue a confirmation for the package owner.
    ///
    /// Never blocks. Returns false when the worker is gone, which is logged
    /// and otherwise ignored.
    pub fn enqueue_confirmation(&self, snapshot: PackageSnapshot) -> bool {
        let package_number = snapshot.package_number.clone();
        match self.tx.send(ConfirmationJob::for_owner(snapshot)) {
            Ok(()) => {
                debug!(package_number = %package_number, "Queued confirmation");
                true
            }
            Err(_) => {
                error!(
                    package_number = %package_number,
                    "Notification queue closed, confirmation dropped"
                );
                false
            }
        }
    }
}

/// Create a dispatcher and the worker that drains it
pub fn notification_channel(
    mailer: BoxedMailer,
    policy: RetryPolicy,
    shutdown_rx: watch::Receiver<bool>,
) -> (NotificationDispatcher, NotificationWorker) {
    let (tx, rx) = mpsc::unbounded_channel();
    (
        NotificationDispatcher::new(tx),
        NotificationWorker {
            mailer,
            policy,
            rx,
            shutdown_rx,
        },
    )
}

/// Background task delivering queued confirmations
pub struct NotificationWorker {
    mailer: BoxedMailer,
    policy: RetryPolicy,
    rx: mpsc::UnboundedReceiver<ConfirmationJob>,
    shutdown_rx: watch::Receiver<bool>,
}

impl NotificationWorker {
    /// Run until shutdown is signalled or every dispatcher is dropped.
    ///
    /// Each job gets its own task so one job's backoff does not delay the
    /// next. On channel close in-flight jobs are awaited; on shutdown they
    /// are aborted.
    pub async fn run(mut self) {
        info!(
            mailer = self.mailer.name(),
            max_attempts = self.policy.max_attempts(),
            backoff_secs = self.policy.backoff().as_secs(),
            "Notification worker started"
        );

        let mut in_flight = JoinSet::new();

        loop {
            tokio::select! {
                biased;

                changed = self.shutdown_rx.changed() => {
                    if changed.is_err() || *self.shutdown_rx.borrow() {
                        info!("Notification worker received shutdown signal");
                        if !in_flight.is_empty() {
                            warn!(pending = in_flight.len(), "Abandoning in-flight confirmations");
                        }
                        in_flight.abort_all();
                        break;
                    }
                }

                Some(job) = self.rx.recv() => {
                    let mailer = Arc::clone(&self.mailer);
                    let policy = self.policy;
                    in_flight.spawn(async move {
                        // Outcome is logged inside
                        let _ = deliver_with_retry(mailer.as_ref(), &policy, &job).await;
                    });
                }

                Some(_) = in_flight.join_next(), if !in_flight.is_empty() => {}

                else => {
                    info!("Notification queue closed");
                    break;
                }
            }
        }

        while in_flight.join_next().await.is_some() {}
        info!("Notification worker shutdown complete");
    }
}

/// Deliver one job, retrying with a fixed backoff.
///
/// Returns the number of attempts used on success, or the last error after
/// the policy is exhausted.
pub async fn deliver_with_retry(
    mailer: &dyn Mailer,
    policy: &RetryPolicy,
    job: &ConfirmationJob,
) -> Result<u32, MailerError> {
    let package_number = job.snapshot.package_number.as_str();
    let mut attempt = 1;

    loop {
        match mailer.send(&job.recipient, &job.snapshot).await {
            Ok(()) => {
                info!(
                    package_number = %package_number,
                    recipient = %job.recipient,
                    attempt,
                    "Confirmation delivered"
                );
                return Ok(attempt);
            }
            Err(e) if attempt < policy.max_attempts() => {
                warn!(
                    package_number = %package_number,
                    attempt,
                    error = %e,
                    "Confirmation delivery failed, retrying in {}s",
                    policy.backoff().as_secs()
                );
                tokio::time::sleep(policy.backoff()).await;
                attempt += 1;
            }
            Err(e) => {
                error!(
                    package_number = %package_number,
                    recipient = %job.recipient,
                    attempts = attempt,
                    error = %e,
                    "Giving up on confirmation delivery"
                );
                return Err(e);
            }
        }
    }
}
