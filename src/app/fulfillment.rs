//! Payment fulfillment: turns a paid checkout session into exactly one CRM job.
//!
//! The unique idempotency key on the store is the only concurrency control.
//! Every attempt first inserts a `pending` row; losing that race means some
//! other attempt owns the key, and the row it left behind decides what to do:
//!
//! * `confirmed` with a job id: return it.
//! * `pending`: wait once for `pending_wait`, reread once, and report
//!   whatever is there (possibly still processing).
//! * `failed`: delete it and claim the key afresh.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info, instrument, warn};

use super::crm_resolver::CrmResolver;
use crate::domain::{
    AppError, BookingDetails, CreateJobInput, CrmClient, CrmIds, DatabaseError,
    FulfillmentOutcome, FulfillmentRequest, FulfillmentStatus, FulfillmentStore,
    NewFulfillmentRequest, PaymentGateway, ValidationError,
};

/// Default wait before rereading a row another attempt holds
pub const DEFAULT_PENDING_WAIT: Duration = Duration::from_secs(2);

/// Claim attempts for one call: the first insert plus one after a failed row
/// was cleared or the row vanished.
const MAX_CLAIM_ATTEMPTS: usize = 2;

#[derive(Debug, Clone)]
pub struct FulfillmentConfig {
    pub pending_wait: Duration,
}

impl Default for FulfillmentConfig {
    fn default() -> Self {
        Self {
            pending_wait: DEFAULT_PENDING_WAIT,
        }
    }
}

/// Outcome of trying to take ownership of an idempotency key
enum Claim {
    /// This call inserted the `pending` row and must run the CRM steps
    Owned,
    /// Another attempt owns (or finished) the key
    Settled(FulfillmentOutcome),
}

/// Deterministic job notes for auditability.
///
/// Amounts stay in minor units until formatted here.
pub fn job_summary(request: &NewFulfillmentRequest) -> String {
    let booking = &request.booking;
    let cents = request.amount_cents.unsigned_abs();
    let sign = if request.amount_cents < 0 { "-" } else { "" };
    let code = request.currency.to_uppercase();

    let mut lines = vec![
        format!("Online booking: {}", booking.service_name),
        format!(
            "Amount paid: {}{}{}.{:02} {}",
            sign,
            currency_symbol(&code),
            cents / 100,
            cents % 100,
            code
        ),
        format!("Payment reference: {}", request.idempotency_key),
    ];
    if let Some(date) = booking.preferred_date {
        let slot = booking.time_slot.map(|s| s.as_str()).unwrap_or("anytime");
        lines.push(format!("Requested: {} ({})", date.format("%Y-%m-%d"), slot));
    }
    if let Some(code) = &booking.referral_code {
        lines.push(format!("Referral code: {}", code));
    }
    if let Some(notes) = &booking.notes {
        lines.push(format!("Customer notes: {}", notes));
    }
    lines.join("\n")
}

fn currency_symbol(code: &str) -> &'static str {
    match code {
        "USD" | "CAD" | "AUD" => "$",
        "EUR" => "\u{20ac}",
        "GBP" => "\u{a3}",
        _ => "",
    }
}

/// Runs the idempotency protocol and the CRM job creation
pub struct FulfillmentService {
    store: Arc<dyn FulfillmentStore>,
    gateway: Arc<dyn PaymentGateway>,
    crm: Arc<dyn CrmClient>,
    resolver: CrmResolver,
    config: FulfillmentConfig,
}

impl FulfillmentService {
    #[must_use]
    pub fn new(
        store: Arc<dyn FulfillmentStore>,
        gateway: Arc<dyn PaymentGateway>,
        crm: Arc<dyn CrmClient>,
        resolver: CrmResolver,
        config: FulfillmentConfig,
    ) -> Self {
        Self {
            store,
            gateway,
            crm,
            resolver,
            config,
        }
    }

    /// Fulfill a checkout session after confirming with the gateway that it
    /// is paid. Client-supplied payment state is never trusted.
    ///
    /// A paid session whose booking does not parse is still claimed and
    /// stored as `failed` with its raw metadata, so the payment can be
    /// repaired and retried.
    #[instrument(skip(self))]
    pub async fn fulfill_session(&self, session_id: &str) -> Result<FulfillmentOutcome, AppError> {
        let session = self.gateway.retrieve_session(session_id).await?;
        if !session.is_paid() {
            warn!(payment_status = %session.payment_status, "Session is not paid, refusing to fulfill");
            return Err(AppError::Validation(ValidationError::InvalidField {
                field: "payment_status".to_string(),
                message: format!("session is {}", session.payment_status),
            }));
        }

        let (request, problem) = NewFulfillmentRequest::parse_session(&session);
        self.run(&request, problem).await
    }

    /// Run the idempotency protocol for an already verified payment.
    #[instrument(skip(self, request), fields(idempotency_key = %request.idempotency_key))]
    pub async fn fulfill(
        &self,
        request: &NewFulfillmentRequest,
    ) -> Result<FulfillmentOutcome, AppError> {
        self.run(request, None).await
    }

    async fn run(
        &self,
        request: &NewFulfillmentRequest,
        problem: Option<ValidationError>,
    ) -> Result<FulfillmentOutcome, AppError> {
        match self.claim(request).await? {
            Claim::Owned => match problem {
                None => self.execute(request).await,
                Some(problem) => {
                    warn!(error = %problem, "Paid session has an invalid booking");
                    self.record_failure(&request.idempotency_key, AppError::Validation(problem))
                        .await
                }
            },
            Claim::Settled(outcome) => {
                debug!(confirmed = outcome.job_number().is_some(), "Key already claimed");
                Ok(outcome)
            }
        }
    }

    /// Replay a `failed` record through the full protocol.
    #[instrument(skip(self))]
    pub async fn retry(&self, key: &str) -> Result<FulfillmentOutcome, AppError> {
        let record = self.get(key).await?;
        if record.status != FulfillmentStatus::Failed {
            return Err(AppError::Validation(ValidationError::InvalidField {
                field: "status".to_string(),
                message: format!("record is {}, only failed records can be retried", record.status),
            }));
        }
        info!(session_id = %record.session_id, "Retrying failed fulfillment");
        self.fulfill_session(&record.session_id).await
    }

    pub async fn get(&self, key: &str) -> Result<FulfillmentRequest, AppError> {
        self.store
            .get_by_key(key)
            .await?
            .ok_or_else(|| AppError::ResourceNotFound(format!("fulfillment request {}", key)))
    }

    pub async fn list(
        &self,
        status: FulfillmentStatus,
        limit: i64,
    ) -> Result<Vec<FulfillmentRequest>, AppError> {
        self.store.list_by_status(status, limit).await
    }

    pub async fn crm_health(&self) -> Result<(), AppError> {
        self.crm.health_check().await
    }

    async fn claim(&self, request: &NewFulfillmentRequest) -> Result<Claim, AppError> {
        let key = &request.idempotency_key;

        for attempt in 1..=MAX_CLAIM_ATTEMPTS {
            match self.store.insert_pending(request).await {
                Ok(_) => return Ok(Claim::Owned),
                Err(AppError::Database(DatabaseError::Duplicate(_))) => {}
                Err(e) => return Err(e),
            }

            let Some(existing) = self.store.get_by_key(key).await? else {
                debug!(attempt, "Row vanished after duplicate insert, claiming again");
                continue;
            };

            match existing.status {
                FulfillmentStatus::Confirmed => return Ok(Claim::Settled(settled(existing))),
                FulfillmentStatus::Pending => {
                    return Ok(Claim::Settled(self.await_in_flight(existing).await?));
                }
                FulfillmentStatus::Failed if attempt < MAX_CLAIM_ATTEMPTS => {
                    let deleted = self.store.delete_failed(key).await?;
                    info!(deleted, "Clearing failed record for a fresh attempt");
                }
                FulfillmentStatus::Failed => {
                    return Ok(Claim::Settled(FulfillmentOutcome::Processing(existing)));
                }
            }
        }

        match self.store.get_by_key(key).await? {
            Some(existing) => Ok(Claim::Settled(settled(existing))),
            None => Err(AppError::Internal(format!(
                "could not claim idempotency key {}",
                key
            ))),
        }
    }

    /// Single bounded wait for another attempt, then one reread.
    async fn await_in_flight(
        &self,
        in_flight: FulfillmentRequest,
    ) -> Result<FulfillmentOutcome, AppError> {
        debug!(wait_ms = self.config.pending_wait.as_millis() as u64, "Another attempt is in flight, waiting once");
        tokio::time::sleep(self.config.pending_wait).await;

        match self.store.get_by_key(&in_flight.idempotency_key).await? {
            Some(reread) => Ok(settled(reread)),
            None => Ok(FulfillmentOutcome::Processing(in_flight)),
        }
    }

    /// CRM steps for a key this call owns, then the terminal status write.
    async fn execute(&self, request: &NewFulfillmentRequest) -> Result<FulfillmentOutcome, AppError> {
        let key = &request.idempotency_key;

        match self.create_job(request).await {
            Ok(ids) => {
                let job_number = ids.job_number.clone();
                let record = self.store.mark_confirmed(key, &ids).await.map_err(|e| {
                    error!(job_number = %job_number, error = %e, "CRM job created but confirmation write failed");
                    e
                })?;
                info!(job_number = %job_number, "Fulfillment confirmed");
                Ok(FulfillmentOutcome::Confirmed(record))
            }
            Err(e) => self.record_failure(key, e).await,
        }
    }

    async fn record_failure(
        &self,
        key: &str,
        cause: AppError,
    ) -> Result<FulfillmentOutcome, AppError> {
        error!(error = %cause, "Fulfillment failed, recording failure");
        self.store.mark_failed(key, &cause.to_string()).await?;
        Err(AppError::FulfillmentFailed(key.to_string()))
    }

    async fn create_job(&self, request: &NewFulfillmentRequest) -> Result<CrmIds, AppError> {
        let booking: &BookingDetails = &request.booking;
        let entities = self.resolver.resolve(booking).await?;

        let input = CreateJobInput {
            customer_id: entities.customer_id,
            location_id: entities.location_id,
            business_unit_id: entities.business_unit_id,
            job_type_id: entities.job_type_id,
            campaign_id: entities.campaign_id,
            summary: job_summary(request),
            preferred_date: booking.preferred_date,
            time_slot: booking.time_slot,
        };
        let job = self.crm.create_job(&input).await?;

        Ok(CrmIds {
            customer_id: entities.customer_id,
            location_id: entities.location_id,
            job_id: job.job_id,
            job_number: job.job_number,
            appointment_id: job.appointment_id,
        })
    }
}

fn settled(record: FulfillmentRequest) -> FulfillmentOutcome {
    if record.is_fulfilled() {
        FulfillmentOutcome::Confirmed(record)
    } else {
        FulfillmentOutcome::Processing(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::crm_resolver::ResolverDefaults;
    use crate::test_utils::{MockCrmClient, MockFulfillmentStore, MockPaymentGateway, paid_session};

    struct Harness {
        store: Arc<MockFulfillmentStore>,
        gateway: Arc<MockPaymentGateway>,
        crm: Arc<MockCrmClient>,
        service: FulfillmentService,
    }

    fn harness(crm: MockCrmClient) -> Harness {
        let store = Arc::new(MockFulfillmentStore::new());
        let gateway = Arc::new(MockPaymentGateway::new());
        let crm = Arc::new(crm);
        let resolver = CrmResolver::new(crm.clone(), store.clone(), ResolverDefaults::default());
        let service = FulfillmentService::new(
            store.clone(),
            gateway.clone(),
            crm.clone(),
            resolver,
            FulfillmentConfig {
                pending_wait: Duration::from_millis(50),
            },
        );
        Harness {
            store,
            gateway,
            crm,
            service,
        }
    }

    #[test]
    fn test_job_summary_formats_minor_units() {
        let request = NewFulfillmentRequest::from_session(&paid_session("cs_1", "pi_123")).unwrap();
        let summary = job_summary(&request);
        assert_eq!(
            summary,
            "Online booking: AC Tune-Up\n\
             Amount paid: $89.00 USD\n\
             Payment reference: pi_123\n\
             Requested: 2026-11-02 (morning)\n\
             Referral code: FRIEND10"
        );
    }

    #[test]
    fn test_job_summary_keeps_odd_cents() {
        let mut session = paid_session("cs_1", "pi_9");
        session.amount_total = Some(12_345);
        session.metadata.remove("referral_code");
        session.metadata.remove("preferred_date");
        let request = NewFulfillmentRequest::from_session(&session).unwrap();
        let summary = job_summary(&request);
        assert!(summary.contains("Amount paid: $123.45 USD"));
        assert!(!summary.contains("Referral code"));
        assert!(!summary.contains("Requested:"));
    }

    #[test]
    fn test_job_summary_uses_currency_symbol() {
        let mut session = paid_session("cs_1", "pi_eur");
        session.amount_total = Some(1200);
        session.currency = Some("eur".to_string());
        let request = NewFulfillmentRequest::from_session(&session).unwrap();
        assert!(job_summary(&request).contains("Amount paid: \u{20ac}12.00 EUR"));

        session.currency = Some("sek".to_string());
        let request = NewFulfillmentRequest::from_session(&session).unwrap();
        assert!(job_summary(&request).contains("Amount paid: 12.00 SEK"));
    }

    #[tokio::test]
    async fn test_paid_session_with_bad_booking_is_stored_as_failed() {
        let h = harness(MockCrmClient::new());
        let mut session = paid_session("cs_1", "pi_123");
        session
            .metadata
            .insert("preferred_date".to_string(), "11/02/2026".to_string());
        h.gateway.add_session(session);

        let result = h.service.fulfill_session("cs_1").await;

        assert!(matches!(result, Err(AppError::FulfillmentFailed(ref k)) if k == "pi_123"));
        let record = h.store.get_by_key("pi_123").await.unwrap().unwrap();
        assert_eq!(record.status, FulfillmentStatus::Failed);
        assert_eq!(record.session_id, "cs_1");
        assert_eq!(record.amount_cents, 8900);
        assert_eq!(record.request_payload["preferred_date"], "11/02/2026");
        assert!(record.last_error.unwrap().contains("preferred_date"));
        assert_eq!(h.crm.job_count(), 0);

        // Redelivery keeps a single failed row and still creates nothing
        assert!(h.service.fulfill_session("cs_1").await.is_err());
        assert_eq!(h.store.get_all_items().len(), 1);
        assert_eq!(h.crm.job_count(), 0);
    }

    #[tokio::test]
    async fn test_fresh_session_creates_confirmed_job() {
        let h = harness(MockCrmClient::new());
        h.gateway.add_session(paid_session("cs_1", "pi_123"));

        let outcome = h.service.fulfill_session("cs_1").await.unwrap();

        assert_eq!(outcome.job_number(), Some("J-500"));
        let record = h.store.get_by_key("pi_123").await.unwrap().unwrap();
        assert_eq!(record.status, FulfillmentStatus::Confirmed);
        assert_eq!(record.crm_job_number.as_deref(), Some("J-500"));
        assert!(record.booked_at.is_some());

        let jobs = h.crm.created_jobs();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].job_type_id, 21);
        assert_eq!(jobs[0].business_unit_id, 31);
        // "google" has no mapping; the default channel maps to "Website"
        assert_eq!(jobs[0].campaign_id, Some(11));
    }

    #[tokio::test]
    async fn test_redelivery_returns_existing_job() {
        let h = harness(MockCrmClient::new());
        h.gateway.add_session(paid_session("cs_1", "pi_123"));

        h.service.fulfill_session("cs_1").await.unwrap();
        let again = h.service.fulfill_session("cs_1").await.unwrap();

        assert!(matches!(again, FulfillmentOutcome::Confirmed(_)));
        assert_eq!(again.job_number(), Some("J-500"));
        assert_eq!(h.crm.job_count(), 1);
    }

    #[tokio::test]
    async fn test_unpaid_session_is_rejected_without_store_write() {
        let h = harness(MockCrmClient::new());
        let mut session = paid_session("cs_1", "pi_123");
        session.payment_status = "unpaid".to_string();
        h.gateway.add_session(session);

        let result = h.service.fulfill_session("cs_1").await;

        assert!(matches!(result, Err(AppError::Validation(_))));
        assert!(h.store.get_all_items().is_empty());
    }

    #[tokio::test]
    async fn test_missing_job_type_records_failure() {
        let h = harness(MockCrmClient::new().without_job_types());
        h.gateway.add_session(paid_session("cs_1", "pi_123"));

        let result = h.service.fulfill_session("cs_1").await;

        assert!(matches!(result, Err(AppError::FulfillmentFailed(ref k)) if k == "pi_123"));
        let record = h.store.get_by_key("pi_123").await.unwrap().unwrap();
        assert_eq!(record.status, FulfillmentStatus::Failed);
        assert!(record.crm_job_id.is_none());
        assert!(record.last_error.unwrap().contains("job type"));
        assert_eq!(h.crm.job_count(), 0);
    }

    #[tokio::test]
    async fn test_failed_record_is_replaced_on_retry() {
        let h = harness(MockCrmClient::new());
        h.gateway.add_session(paid_session("cs_1", "pi_123"));

        h.crm.set_fail_jobs(true);
        assert!(h.service.fulfill_session("cs_1").await.is_err());
        let failed = h.store.get_by_key("pi_123").await.unwrap().unwrap();

        h.crm.set_fail_jobs(false);
        let outcome = h.service.retry("pi_123").await.unwrap();

        assert_eq!(outcome.job_number(), Some("J-500"));
        let record = h.store.get_by_key("pi_123").await.unwrap().unwrap();
        assert_ne!(record.id, failed.id);
        assert_eq!(h.store.insert_count(), 2);
        assert_eq!(h.store.get_all_items().len(), 1);
    }

    #[tokio::test]
    async fn test_retry_refuses_non_failed_record() {
        let h = harness(MockCrmClient::new());
        h.gateway.add_session(paid_session("cs_1", "pi_123"));
        h.service.fulfill_session("cs_1").await.unwrap();

        let result = h.service.retry("pi_123").await;
        assert!(matches!(result, Err(AppError::Validation(_))));
        assert!(matches!(
            h.service.retry("pi_missing").await,
            Err(AppError::ResourceNotFound(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_pending_row_is_reread_once_after_wait() {
        let h = harness(MockCrmClient::new());
        let request = NewFulfillmentRequest::from_session(&paid_session("cs_1", "pi_123")).unwrap();
        h.store.seed(FulfillmentRequest::pending("row-1".to_string(), &request));

        let outcome = h.service.fulfill(&request).await.unwrap();

        assert!(matches!(outcome, FulfillmentOutcome::Processing(_)));
        assert_eq!(h.crm.job_count(), 0);
        assert_eq!(h.store.get_all_items().len(), 1);
    }

    #[tokio::test]
    async fn test_store_outage_propagates() {
        let store = Arc::new(MockFulfillmentStore::failing("db down"));
        let gateway = Arc::new(MockPaymentGateway::new());
        gateway.add_session(paid_session("cs_1", "pi_123"));
        let crm = Arc::new(MockCrmClient::new());
        let resolver = CrmResolver::new(crm.clone(), store.clone(), ResolverDefaults::default());
        let service = FulfillmentService::new(
            store,
            gateway,
            crm.clone(),
            resolver,
            FulfillmentConfig::default(),
        );

        let result = service.fulfill_session("cs_1").await;
        assert!(matches!(result, Err(AppError::Database(_))));
        assert_eq!(crm.job_count(), 0);
    }
}
