//! # Payment Orchestrator
//!
//! The only place that changes a package's payment fields.
//!
//! ## Checkout
//!
//! `create_payment_intent` checks the package under its lock, calls the
//! processor with a fixed timeout, and commits `draft -> pending` plus the
//! chosen method only after the processor answered successfully. Any failure
//! leaves the package untouched, so the caller may simply try again.
//!
//! ## Reconciliation
//!
//! `reconcile` is driven by webhooks, which may repeat or arrive out of
//! order. The authoritative payment record is fetched from the processor,
//! the package is found by external reference, and the outcome is applied
//! under the package lock. Because `confirmed` and `cancelled` are
//! absorbing, replaying any notification is harmless, and the
//! `-> confirmed` transition is the gate that keeps confirmation messages to
//! one per package.

use crate::actor::ActorContext;
use crate::clock::SharedClock;
use crate::error::{PackageError, PackageResult, ProcessorError, StateError};
use crate::event::EventCatalog;
use crate::notify::{NotificationDispatcher, PackageSnapshot};
use crate::package::{PackageStatus, PaymentMethod};
use crate::processor::{
    BoxedPaymentProcessor, CardRestrictions, CheckoutUrls, DirectChargeRequest, Payer,
    PaymentIntent, PreferenceRequest, ProcessorLineItem, ProcessorPaymentStatus,
    ProcessorResult,
};
use crate::store::{PackageGuard, PackageStore};
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

/// Default bound on a single processor call
pub const DEFAULT_PROCESSOR_TIMEOUT: Duration = Duration::from_secs(30);

/// Text on the buyer's card statement
pub const DEFAULT_STATEMENT_DESCRIPTOR: &str = "INSCRICAO EVENTO";

/// Card installments offered at checkout
pub const DEFAULT_MAX_INSTALLMENTS: u32 = 12;

/// Orchestrator settings
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub urls: CheckoutUrls,
    pub processor_timeout: Duration,
    pub statement_descriptor: String,
    pub max_installments: u32,
}

impl OrchestratorConfig {
    pub fn new(urls: CheckoutUrls) -> Self {
        Self {
            urls,
            processor_timeout: DEFAULT_PROCESSOR_TIMEOUT,
            statement_descriptor: DEFAULT_STATEMENT_DESCRIPTOR.to_string(),
            max_installments: DEFAULT_MAX_INSTALLMENTS,
        }
    }

    /// Builder: set processor timeout
    pub fn with_processor_timeout(mut self, timeout: Duration) -> Self {
        self.processor_timeout = timeout;
        self
    }
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self::new(CheckoutUrls::default())
    }
}

/// What a reconciliation did
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ReconcileOutcome {
    /// Package moved to confirmed; `notified` says whether the confirmation
    /// was queued
    Confirmed {
        package_number: String,
        notified: bool,
    },
    /// Replayed approval, nothing changed
    AlreadyConfirmed { package_number: String },
    /// Payment failed, package open for a new attempt
    RevertedToDraft { package_number: String },
    /// Payment still being processed
    StillPending { package_number: String },
    /// Status this version does not act on
    Ignored {
        package_number: String,
        status: String,
    },
}

impl ReconcileOutcome {
    pub fn package_number(&self) -> &str {
        match self {
            ReconcileOutcome::Confirmed { package_number, .. }
            | ReconcileOutcome::AlreadyConfirmed { package_number }
            | ReconcileOutcome::RevertedToDraft { package_number }
            | ReconcileOutcome::StillPending { package_number }
            | ReconcileOutcome::Ignored { package_number, .. } => package_number,
        }
    }
}

/// One package visited by `revert_pending_to_draft`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RevertReport {
    pub package_id: Uuid,
    pub package_number: String,
    pub previous_status: PackageStatus,
    pub reverted: bool,
}

/// Payment intent creation and webhook reconciliation
#[derive(Clone)]
pub struct PaymentOrchestrator {
    store: Arc<PackageStore>,
    catalog: Arc<EventCatalog>,
    processor: BoxedPaymentProcessor,
    notifier: NotificationDispatcher,
    clock: SharedClock,
    config: OrchestratorConfig,
}

impl PaymentOrchestrator {
    pub fn new(
        store: Arc<PackageStore>,
        catalog: Arc<EventCatalog>,
        processor: BoxedPaymentProcessor,
        notifier: NotificationDispatcher,
        clock: SharedClock,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            store,
            catalog,
            processor,
            notifier,
            clock,
            config,
        }
    }

    pub fn provider_name(&self) -> &'static str {
        self.processor.provider_name()
    }

    /// Run a processor call under the configured timeout
    async fn call_processor<T>(
        &self,
        call: impl Future<Output = ProcessorResult<T>>,
    ) -> PackageResult<T> {
        match tokio::time::timeout(self.config.processor_timeout, call).await {
            Ok(result) => result.map_err(PackageError::from),
            Err(_) => Err(ProcessorError::Timeout {
                provider: self.processor.provider_name().to_string(),
                timeout_secs: self.config.processor_timeout.as_secs(),
            }
            .into()),
        }
    }

    /// Start checkout for a draft package.
    ///
    /// The package lock is held across the processor call, so nothing else
    /// can change the package between the checks and the commit.
    #[instrument(skip(self, actor), fields(user_id = %actor.user_id))]
    pub async fn create_payment_intent(
        &self,
        actor: &ActorContext,
        package_id: Uuid,
        method: PaymentMethod,
    ) -> PackageResult<PaymentIntent> {
        let mut guard = self.store.lock(package_id).await?;
        actor.ensure_can_access(&guard.package)?;

        match guard.package.status {
            PackageStatus::Draft => {}
            PackageStatus::Confirmed => return Err(StateError::ConfirmedPackage.into()),
            PackageStatus::Cancelled => return Err(StateError::CancelledPackage.into()),
            PackageStatus::Pending => {
                return Err(StateError::InvalidTransition {
                    from: PackageStatus::Pending,
                    to: PackageStatus::Pending,
                }
                .into())
            }
        }
        if guard.registrations.is_empty() {
            return Err(StateError::EmptyPackage.into());
        }

        let intent = match method {
            PaymentMethod::Pix => self.request_pix_charge(&guard).await?,
            PaymentMethod::CreditCard => self.request_card_checkout(&guard).await?,
        };

        // Processor accepted; commit
        guard.package.transition_status(PackageStatus::Pending)?;
        guard.package.payment_method = Some(method);
        if let PaymentIntent::Pix { payment_id, .. } = &intent {
            guard.package.payment_id = Some(payment_id.clone());
        }

        info!(
            package_number = %guard.package.package_number,
            method = %method,
            total = %guard.package.total_amount,
            "Payment intent created, package pending"
        );
        Ok(intent)
    }

    fn payer(guard: &PackageGuard) -> Payer {
        Payer {
            email: guard.package.owner.email.clone(),
            first_name: guard.package.owner.name.clone(),
        }
    }

    async fn request_pix_charge(&self, guard: &PackageGuard) -> PackageResult<PaymentIntent> {
        let package = &guard.package;
        let request = DirectChargeRequest {
            transaction_amount: package.total_amount,
            description: format!("Pacote de inscrições - {}", package.package_number),
            payer: Self::payer(guard),
            external_reference: package.package_number.clone(),
            notification_url: self.config.urls.notification_url(),
        };

        debug!(package_number = %package.package_number, "Requesting pix charge");
        let charge = self
            .call_processor(self.processor.create_direct_charge(&request))
            .await?;

        Ok(PaymentIntent::Pix {
            package_number: package.package_number.clone(),
            payment_id: charge.id,
            status: charge.status,
            qr_code: charge.qr_code,
            qr_code_base64: charge.qr_code_base64,
            ticket_url: charge.ticket_url,
        })
    }

    async fn request_card_checkout(&self, guard: &PackageGuard) -> PackageResult<PaymentIntent> {
        let package = &guard.package;
        let items = guard
            .registrations
            .iter()
            .map(|r| {
                let event_name = self
                    .catalog
                    .get(r.event_id)
                    .map(|e| e.name)
                    .unwrap_or_else(|| r.event_id.to_string());
                ProcessorLineItem {
                    title: format!("Inscrição - {event_name}"),
                    quantity: 1,
                    unit_price: r.price_paid,
                }
            })
            .collect();

        let request = PreferenceRequest {
            items,
            payer: Self::payer(guard),
            back_urls: self.config.urls.back_urls(package.id),
            notification_url: self.config.urls.notification_url(),
            external_reference: package.package_number.clone(),
            statement_descriptor: self.config.statement_descriptor.clone(),
            restrictions: CardRestrictions::credit_card_only(self.config.max_installments),
        };

        debug!(package_number = %package.package_number, "Requesting checkout preference");
        let preference = self
            .call_processor(self.processor.create_preference(&request))
            .await?;

        Ok(PaymentIntent::CreditCard {
            package_number: package.package_number.clone(),
            preference_id: preference.id,
            init_point: preference.init_point,
            sandbox_init_point: preference.sandbox_init_point,
        })
    }

    /// Apply the processor's view of a payment to its package.
    ///
    /// Safe to call repeatedly and in any order for the same package.
    #[instrument(skip(self))]
    pub async fn reconcile(&self, external_payment_id: &str) -> PackageResult<ReconcileOutcome> {
        let payment_id = external_payment_id.trim();
        if payment_id.is_empty() {
            return Err(PackageError::CallbackValidation(
                "payment id is missing".to_string(),
            ));
        }

        let payment = self
            .call_processor(self.processor.get_payment(payment_id))
            .await?;

        let reference = payment
            .external_reference
            .as_deref()
            .map(str::trim)
            .filter(|r| !r.is_empty())
            .ok_or_else(|| {
                PackageError::CallbackValidation(format!(
                    "payment {payment_id} carries no external reference"
                ))
            })?;

        let mut guard = self.store.lock_by_number(reference).await?;
        let package_number = guard.package.package_number.clone();

        if let Some(amount) = payment.amount {
            if amount != guard.package.total_amount {
                warn!(
                    package_number = %package_number,
                    payment_amount = %amount,
                    package_total = %guard.package.total_amount,
                    "Payment amount differs from package total"
                );
            }
        }

        let outcome = match &payment.status {
            ProcessorPaymentStatus::Approved => self.confirm(&mut guard, payment_id)?,

            ProcessorPaymentStatus::Rejected | ProcessorPaymentStatus::Cancelled => {
                let from = guard.package.status;
                match from {
                    PackageStatus::Pending => guard.package.transition_status(PackageStatus::Draft)?,
                    PackageStatus::Draft => {}
                    PackageStatus::Confirmed | PackageStatus::Cancelled => {
                        return Err(StateError::InvalidTransition {
                            from,
                            to: PackageStatus::Draft,
                        }
                        .into());
                    }
                }
                guard.package.payment_method = None;
                guard.package.payment_id = Some(payment_id.to_string());
                guard.package.touch();

                info!(
                    package_number = %package_number,
                    payment_id = %payment_id,
                    status = %payment.status,
                    "Payment not completed, package back to draft"
                );
                ReconcileOutcome::RevertedToDraft { package_number }
            }

            ProcessorPaymentStatus::Pending | ProcessorPaymentStatus::InProcess => {
                if !guard.package.status.is_absorbing() {
                    guard.package.payment_id = Some(payment_id.to_string());
                    guard.package.touch();
                }
                debug!(
                    package_number = %package_number,
                    payment_id = %payment_id,
                    "Payment still processing"
                );
                ReconcileOutcome::StillPending { package_number }
            }

            ProcessorPaymentStatus::Other(status) => {
                warn!(
                    package_number = %package_number,
                    payment_id = %payment_id,
                    status = %status,
                    "Unrecognized payment status, ignoring"
                );
                ReconcileOutcome::Ignored {
                    package_number,
                    status: status.clone(),
                }
            }
        };

        Ok(outcome)
    }

    /// Approved payment: confirm once, queue the confirmation once
    fn confirm(&self, guard: &mut PackageGuard, payment_id: &str) -> PackageResult<ReconcileOutcome> {
        let package_number = guard.package.package_number.clone();

        match guard.package.status {
            PackageStatus::Confirmed => {
                debug!(package_number = %package_number, "Package already confirmed");
                return Ok(ReconcileOutcome::AlreadyConfirmed { package_number });
            }
            // Approval that overtook the intent commit
            PackageStatus::Draft => guard.package.transition_status(PackageStatus::Pending)?,
            PackageStatus::Pending | PackageStatus::Cancelled => {}
        }

        guard.package.transition_status(PackageStatus::Confirmed)?;
        guard.package.payment_id = Some(payment_id.to_string());

        let snapshot = PackageSnapshot::capture(&**guard, &self.catalog, self.clock.now());
        let notified = self.notifier.enqueue_confirmation(snapshot);

        info!(
            package_number = %package_number,
            payment_id = %payment_id,
            total = %guard.package.total_amount,
            "Payment approved, package confirmed"
        );
        Ok(ReconcileOutcome::Confirmed {
            package_number,
            notified,
        })
    }

    /// Put pending packages back to draft (administrators only).
    ///
    /// With `package_id` only that package is visited; otherwise every
    /// pending package is reverted.
    #[instrument(skip(self, actor), fields(user_id = %actor.user_id))]
    pub async fn revert_pending_to_draft(
        &self,
        actor: &ActorContext,
        package_id: Option<Uuid>,
    ) -> PackageResult<Vec<RevertReport>> {
        actor.ensure_privileged("revert pending packages")?;

        let mut reports = Vec::new();
        match package_id {
            Some(id) => {
                let mut guard = self.store.lock(id).await?;
                reports.push(Self::revert_one(&mut guard)?);
            }
            None => {
                for id in self.store.ids() {
                    let Ok(mut guard) = self.store.lock(id).await else {
                        continue;
                    };
                    if guard.package.status == PackageStatus::Pending {
                        reports.push(Self::revert_one(&mut guard)?);
                    }
                }
            }
        }

        info!(
            reverted = reports.iter().filter(|r| r.reverted).count(),
            "Pending package revert finished"
        );
        Ok(reports)
    }

    fn revert_one(guard: &mut PackageGuard) -> PackageResult<RevertReport> {
        let previous_status = guard.package.status;
        let reverted = previous_status == PackageStatus::Pending;

        if reverted {
            guard.package.transition_status(PackageStatus::Draft)?;
            guard.package.payment_method = None;
            info!(package_number = %guard.package.package_number, "Reverted pending package to draft");
        } else {
            debug!(
                package_number = %guard.package.package_number,
                status = %previous_status,
                "Package not pending, left unchanged"
            );
        }

        Ok(RevertReport {
            package_id: guard.package.id,
            package_number: guard.package.package_number.clone(),
            previous_status,
            reverted,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::admission::RegistrationService;
    use crate::batch::BatchInput;
    use crate::clock::FixedClock;
    use crate::event::Event;
    use crate::notify::ConfirmationJob;
    use crate::processor::{
        DirectChargeResponse, PaymentProcessor, PaymentRecord, PreferenceResponse,
    };
    use crate::registration::ParticipantPayload;
    use async_trait::async_trait;
    use chrono::{NaiveDate, Utc};
    use rust_decimal_macros::dec;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;
    use tokio::sync::mpsc;

    /// Processor double with canned answers
    #[derive(Default)]
    struct MockProcessor {
        payments: Mutex<HashMap<String, PaymentRecord>>,
        preference_requests: Mutex<Vec<PreferenceRequest>>,
        charge_requests: Mutex<Vec<DirectChargeRequest>>,
        calls: AtomicU32,
        delay: Option<Duration>,
        fail_with: Option<ProcessorError>,
    }

    impl MockProcessor {
        fn slow(delay: Duration) -> Self {
            Self {
                delay: Some(delay),
                ..Self::default()
            }
        }

        fn failing(error: ProcessorError) -> Self {
            Self {
                fail_with: Some(error),
                ..Self::default()
            }
        }

        fn set_payment(&self, id: &str, status: &str, reference: &str) {
            self.payments.lock().unwrap().insert(
                id.to_string(),
                PaymentRecord {
                    id: id.to_string(),
                    status: ProcessorPaymentStatus::from_provider(status),
                    external_reference: Some(reference.to_string()),
                    amount: None,
                },
            );
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }

        async fn enter(&self) -> ProcessorResult<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            match &self.fail_with {
                Some(e) => Err(e.clone()),
                None => Ok(()),
            }
        }
    }

    #[async_trait]
    impl PaymentProcessor for MockProcessor {
        async fn create_preference(
            &self,
            request: &PreferenceRequest,
        ) -> ProcessorResult<PreferenceResponse> {
            self.enter().await?;
            self.preference_requests.lock().unwrap().push(request.clone());
            Ok(PreferenceResponse {
                id: "pref-1".into(),
                init_point: "https://mp.example/checkout/pref-1".into(),
                sandbox_init_point: Some("https://sandbox.mp.example/checkout/pref-1".into()),
            })
        }

        async fn create_direct_charge(
            &self,
            request: &DirectChargeRequest,
        ) -> ProcessorResult<DirectChargeResponse> {
            self.enter().await?;
            self.charge_requests.lock().unwrap().push(request.clone());
            Ok(DirectChargeResponse {
                id: "pix-1".into(),
                status: ProcessorPaymentStatus::Pending,
                qr_code: Some("00020126...".into()),
                qr_code_base64: Some("iVBORw0KGgo=".into()),
                ticket_url: Some("https://mp.example/pix/pix-1".into()),
            })
        }

        async fn get_payment(&self, payment_id: &str) -> ProcessorResult<PaymentRecord> {
            self.enter().await?;
            self.payments
                .lock()
                .unwrap()
                .get(payment_id)
                .cloned()
                .ok_or_else(|| ProcessorError::Api {
                    provider: "mock".into(),
                    status: 404,
                    message: "payment not found".into(),
                })
        }

        fn provider_name(&self) -> &'static str {
            "mock"
        }
    }

    struct Fixture {
        orchestrator: PaymentOrchestrator,
        registrations: RegistrationService,
        store: Arc<PackageStore>,
        processor: Arc<MockProcessor>,
        notifications: mpsc::UnboundedReceiver<ConfirmationJob>,
        event_id: Uuid,
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn admin() -> ActorContext {
        ActorContext::privileged("admin-1", "admin@example.com")
    }

    fn ana() -> ActorContext {
        ActorContext::user("user-1", "ana@example.com").with_name("Ana")
    }

    fn fixture_with(processor: MockProcessor) -> Fixture {
        let catalog = Arc::new(EventCatalog::new());
        let event = Event::new("Youth Conference", Utc::now());
        let event_id = event.id;
        catalog.upsert_event(event);
        catalog
            .create_batch(&admin(), event_id, BatchInput::new(dec!(100), date(2025, 1, 1), date(2025, 1, 31)))
            .unwrap();

        let store = Arc::new(PackageStore::new());
        let clock: SharedClock = Arc::new(FixedClock::on(date(2025, 1, 14)));
        let processor = Arc::new(processor);
        let (tx, notifications) = mpsc::unbounded_channel();

        let orchestrator = PaymentOrchestrator::new(
            store.clone(),
            catalog.clone(),
            processor.clone(),
            NotificationDispatcher::new(tx),
            clock.clone(),
            OrchestratorConfig::new(CheckoutUrls::new("https://inscricoes.example.com")),
        );
        let registrations = RegistrationService::new(store.clone(), catalog, clock);

        Fixture {
            orchestrator,
            registrations,
            store,
            processor,
            notifications,
            event_id,
        }
    }

    fn fixture() -> Fixture {
        fixture_with(MockProcessor::default())
    }

    impl Fixture {
        /// Draft package with two registrations (total 200)
        async fn draft_package(&self) -> (Uuid, String) {
            let payload = ParticipantPayload::new("Ana Souza", "ana@example.com", "11987654321");
            let first = self
                .registrations
                .add_registration(&ana(), None, self.event_id, payload.clone())
                .await
                .unwrap();
            self.registrations
                .add_registration(&ana(), Some(first.package.id), self.event_id, payload)
                .await
                .unwrap();
            (first.package.id, first.package.package_number)
        }

        async fn pending_package(&self) -> (Uuid, String) {
            let (id, number) = self.draft_package().await;
            self.orchestrator
                .create_payment_intent(&ana(), id, PaymentMethod::CreditCard)
                .await
                .unwrap();
            (id, number)
        }

        async fn status(&self, id: Uuid) -> PackageStatus {
            self.store.lock(id).await.unwrap().package.status
        }

        fn notification_count(&mut self) -> usize {
            let mut count = 0;
            while self.notifications.try_recv().is_ok() {
                count += 1;
            }
            count
        }
    }

    #[tokio::test]
    async fn test_card_intent_moves_package_to_pending() {
        let f = fixture();
        let (id, number) = f.draft_package().await;

        let intent = f
            .orchestrator
            .create_payment_intent(&ana(), id, PaymentMethod::CreditCard)
            .await
            .unwrap();

        assert_eq!(intent.package_number(), number);
        assert_eq!(intent.redirect_url(false), Some("https://mp.example/checkout/pref-1"));

        let guard = f.store.lock(id).await.unwrap();
        assert_eq!(guard.package.status, PackageStatus::Pending);
        assert_eq!(guard.package.payment_method, Some(PaymentMethod::CreditCard));
        drop(guard);

        let requests = f.processor.preference_requests.lock().unwrap();
        let request = &requests[0];
        assert_eq!(request.items.len(), 2);
        assert_eq!(request.items[0].title, "Inscrição - Youth Conference");
        assert_eq!(request.items[0].unit_price, dec!(100));
        assert_eq!(request.external_reference, number);
        assert_eq!(request.statement_descriptor, "INSCRICAO EVENTO");
        assert_eq!(request.restrictions.max_installments, 12);
        assert_eq!(
            request.back_urls.success,
            format!("https://inscricoes.example.com/payment/success/{id}")
        );
        assert_eq!(request.payer.email, "ana@example.com");
    }

    #[tokio::test]
    async fn test_pix_intent_stamps_charge_id() {
        let f = fixture();
        let (id, number) = f.draft_package().await;

        let intent = f
            .orchestrator
            .create_payment_intent(&ana(), id, PaymentMethod::Pix)
            .await
            .unwrap();

        match intent {
            PaymentIntent::Pix {
                payment_id,
                qr_code,
                ..
            } => {
                assert_eq!(payment_id, "pix-1");
                assert!(qr_code.is_some());
            }
            other => panic!("expected pix intent, got {other:?}"),
        }

        let guard = f.store.lock(id).await.unwrap();
        assert_eq!(guard.package.payment_method, Some(PaymentMethod::Pix));
        assert_eq!(guard.package.payment_id.as_deref(), Some("pix-1"));
        drop(guard);

        let charges = f.processor.charge_requests.lock().unwrap();
        assert_eq!(charges[0].transaction_amount, dec!(200));
        assert_eq!(charges[0].external_reference, number);
        assert_eq!(charges[0].payer.first_name.as_deref(), Some("Ana"));
    }

    #[tokio::test]
    async fn test_empty_package_makes_no_processor_call() {
        let f = fixture();
        let (id, _) = f.draft_package().await;
        // Registrations gone but package still stored
        f.store.lock(id).await.unwrap().registrations.clear();

        let err = f
            .orchestrator
            .create_payment_intent(&ana(), id, PaymentMethod::Pix)
            .await
            .unwrap_err();

        assert!(matches!(err, PackageError::State(StateError::EmptyPackage)));
        assert_eq!(f.processor.calls(), 0);
        assert_eq!(f.status(id).await, PackageStatus::Draft);
    }

    #[tokio::test]
    async fn test_intent_refused_outside_draft() {
        let f = fixture();
        let (id, _) = f.pending_package().await;
        let calls = f.processor.calls();

        let err = f
            .orchestrator
            .create_payment_intent(&ana(), id, PaymentMethod::Pix)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            PackageError::State(StateError::InvalidTransition {
                from: PackageStatus::Pending,
                to: PackageStatus::Pending
            })
        ));

        f.store.lock(id).await.unwrap().package.status = PackageStatus::Confirmed;
        let err = f
            .orchestrator
            .create_payment_intent(&ana(), id, PaymentMethod::Pix)
            .await
            .unwrap_err();
        assert!(matches!(err, PackageError::State(StateError::ConfirmedPackage)));

        f.store.lock(id).await.unwrap().package.status = PackageStatus::Cancelled;
        let err = f
            .orchestrator
            .create_payment_intent(&ana(), id, PaymentMethod::Pix)
            .await
            .unwrap_err();
        assert!(matches!(err, PackageError::State(StateError::CancelledPackage)));

        assert_eq!(f.processor.calls(), calls);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_leaves_package_in_draft() {
        let f = fixture_with(MockProcessor::slow(Duration::from_secs(60)));
        let (id, _) = f.draft_package().await;

        let err = f
            .orchestrator
            .create_payment_intent(&ana(), id, PaymentMethod::CreditCard)
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            PackageError::Processor(ProcessorError::Timeout { timeout_secs: 30, .. })
        ));
        assert!(err.is_retryable());

        let guard = f.store.lock(id).await.unwrap();
        assert_eq!(guard.package.status, PackageStatus::Draft);
        assert!(guard.package.payment_method.is_none());
    }

    #[tokio::test]
    async fn test_processor_error_leaves_package_in_draft() {
        let f = fixture_with(MockProcessor::failing(ProcessorError::Api {
            provider: "mock".into(),
            status: 400,
            message: "invalid payer".into(),
        }));
        let (id, _) = f.draft_package().await;

        let err = f
            .orchestrator
            .create_payment_intent(&ana(), id, PaymentMethod::Pix)
            .await
            .unwrap_err();

        assert_eq!(err.status_code(), 502);
        let guard = f.store.lock(id).await.unwrap();
        assert_eq!(guard.package.status, PackageStatus::Draft);
        assert!(guard.package.payment_method.is_none());
        assert!(guard.package.payment_id.is_none());
    }

    #[tokio::test]
    async fn test_double_approval_confirms_once() {
        let mut f = fixture();
        let (id, number) = f.pending_package().await;
        f.processor.set_payment("9001", "approved", &number);

        let first = f.orchestrator.reconcile("9001").await.unwrap();
        assert_eq!(
            first,
            ReconcileOutcome::Confirmed {
                package_number: number.clone(),
                notified: true
            }
        );

        let second = f.orchestrator.reconcile("9001").await.unwrap();
        assert_eq!(second, ReconcileOutcome::AlreadyConfirmed { package_number: number });

        assert_eq!(f.status(id).await, PackageStatus::Confirmed);
        assert_eq!(f.notification_count(), 1);
    }

    #[tokio::test]
    async fn test_rejection_reverts_to_draft_and_keeps_registrations() {
        let mut f = fixture();
        let (id, number) = f.pending_package().await;
        f.processor.set_payment("9002", "rejected", &number);

        let outcome = f.orchestrator.reconcile("9002").await.unwrap();
        assert_eq!(outcome, ReconcileOutcome::RevertedToDraft { package_number: number });

        let guard = f.store.lock(id).await.unwrap();
        assert_eq!(guard.package.status, PackageStatus::Draft);
        assert!(guard.package.payment_method.is_none());
        assert_eq!(guard.package.payment_id.as_deref(), Some("9002"));
        assert_eq!(guard.registrations.len(), 2);
        assert_eq!(guard.package.total_amount, dec!(200));
        drop(guard);

        assert_eq!(f.notification_count(), 0);
    }

    #[tokio::test]
    async fn test_late_rejection_cannot_undo_confirmation() {
        let f = fixture();
        let (id, number) = f.pending_package().await;
        f.processor.set_payment("9001", "approved", &number);
        f.processor.set_payment("9000", "rejected", &number);

        f.orchestrator.reconcile("9001").await.unwrap();
        let err = f.orchestrator.reconcile("9000").await.unwrap_err();

        assert!(matches!(
            err,
            PackageError::State(StateError::InvalidTransition {
                from: PackageStatus::Confirmed,
                to: PackageStatus::Draft
            })
        ));
        let guard = f.store.lock(id).await.unwrap();
        assert_eq!(guard.package.status, PackageStatus::Confirmed);
        assert_eq!(guard.package.payment_id.as_deref(), Some("9001"));
    }

    #[tokio::test]
    async fn test_approval_of_cancelled_package_fails() {
        let mut f = fixture();
        let (id, number) = f.pending_package().await;
        f.store.lock(id).await.unwrap().package.status = PackageStatus::Cancelled;
        f.processor.set_payment("9003", "approved", &number);

        let err = f.orchestrator.reconcile("9003").await.unwrap_err();
        assert!(matches!(
            err,
            PackageError::State(StateError::InvalidTransition {
                from: PackageStatus::Cancelled,
                to: PackageStatus::Confirmed
            })
        ));
        assert_eq!(f.status(id).await, PackageStatus::Cancelled);
        assert_eq!(f.notification_count(), 0);
    }

    #[tokio::test]
    async fn test_approval_overtaking_intent_commit() {
        let mut f = fixture();
        let (id, number) = f.draft_package().await;
        f.processor.set_payment("9004", "approved", &number);

        let outcome = f.orchestrator.reconcile("9004").await.unwrap();
        assert!(matches!(outcome, ReconcileOutcome::Confirmed { .. }));
        assert_eq!(f.status(id).await, PackageStatus::Confirmed);
        assert_eq!(f.notification_count(), 1);
    }

    #[tokio::test]
    async fn test_in_process_only_stamps_payment_id() {
        let f = fixture();
        let (id, number) = f.pending_package().await;
        f.processor.set_payment("9005", "in_process", &number);

        let outcome = f.orchestrator.reconcile("9005").await.unwrap();
        assert!(matches!(outcome, ReconcileOutcome::StillPending { .. }));

        let guard = f.store.lock(id).await.unwrap();
        assert_eq!(guard.package.status, PackageStatus::Pending);
        assert_eq!(guard.package.payment_id.as_deref(), Some("9005"));
        assert_eq!(guard.package.payment_method, Some(PaymentMethod::CreditCard));
    }

    #[tokio::test]
    async fn test_unknown_status_is_ignored() {
        let f = fixture();
        let (id, number) = f.pending_package().await;
        f.processor.set_payment("9006", "charged_back", &number);

        let outcome = f.orchestrator.reconcile("9006").await.unwrap();
        assert_eq!(
            outcome,
            ReconcileOutcome::Ignored {
                package_number: number,
                status: "charged_back".into()
            }
        );
        let guard = f.store.lock(id).await.unwrap();
        assert_eq!(guard.package.status, PackageStatus::Pending);
        assert!(guard.package.payment_id.is_none());
    }

    #[tokio::test]
    async fn test_reconcile_lookup_failures() {
        let f = fixture();

        let err = f.orchestrator.reconcile("  ").await.unwrap_err();
        assert!(matches!(err, PackageError::CallbackValidation(_)));
        assert_eq!(f.processor.calls(), 0);

        f.processor.set_payment("9007", "approved", "PKG-20250114-ZZZZZZ");
        let err = f.orchestrator.reconcile("9007").await.unwrap_err();
        assert!(matches!(err, PackageError::PackageNotFound { ref reference } if reference == "PKG-20250114-ZZZZZZ"));
        assert!(err.is_retryable());

        let err = f.orchestrator.reconcile("missing").await.unwrap_err();
        assert!(matches!(err, PackageError::Processor(ProcessorError::Api { status: 404, .. })));
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn test_concurrent_approvals_notify_once() {
        let mut f = fixture();
        let (id, number) = f.pending_package().await;
        f.processor.set_payment("9008", "approved", &number);

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let orchestrator = f.orchestrator.clone();
                tokio::spawn(async move { orchestrator.reconcile("9008").await })
            })
            .collect();

        let mut confirmed = 0;
        for handle in handles {
            if let ReconcileOutcome::Confirmed { .. } = handle.await.unwrap().unwrap() {
                confirmed += 1;
            }
        }

        assert_eq!(confirmed, 1);
        assert_eq!(f.status(id).await, PackageStatus::Confirmed);
        assert_eq!(f.notification_count(), 1);
    }

    #[tokio::test]
    async fn test_revert_pending_to_draft() {
        let f = fixture();
        let (pending_id, _) = f.pending_package().await;
        let (draft_id, _) = f.draft_package().await;

        let err = f
            .orchestrator
            .revert_pending_to_draft(&ana(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, PackageError::Forbidden(_)));

        let reports = f
            .orchestrator
            .revert_pending_to_draft(&admin(), None)
            .await
            .unwrap();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].package_id, pending_id);
        assert!(reports[0].reverted);

        let guard = f.store.lock(pending_id).await.unwrap();
        assert_eq!(guard.package.status, PackageStatus::Draft);
        assert!(guard.package.payment_method.is_none());
        drop(guard);

        let reports = f
            .orchestrator
            .revert_pending_to_draft(&admin(), Some(draft_id))
            .await
            .unwrap();
        assert!(!reports[0].reverted);
        assert_eq!(reports[0].previous_status, PackageStatus::Draft);
    }
}
