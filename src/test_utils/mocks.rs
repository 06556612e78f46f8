//! Mock implementations for testing.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use uuid::Uuid;

use crate::domain::{
    AppError, AttachmentDescriptor, AttachmentFetch, AttachmentSource, BusinessUnit, ChatNotifier,
    ContentProcessor, CreateJobInput, CreatedJob, CrmClient, CrmIds, CustomerInput,
    DatabaseError, Dispatch, ExternalServiceError, FulfillmentRequest, FulfillmentStatus, FulfillmentStore,
    NewFulfillmentRequest, NotifyError, PaymentGateway, PaymentSession, ProcessorJob,
    ProcessorKind, ServiceAddress,
};

/// Configuration for mock behavior
#[derive(Debug, Clone, Default)]
pub struct MockConfig {
    pub should_fail: bool,
    pub error_message: Option<String>,
}

impl MockConfig {
    #[must_use]
    pub fn success() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            should_fail: true,
            error_message: Some(message.into()),
        }
    }

    fn message(&self) -> String {
        self.error_message
            .clone()
            .unwrap_or_else(|| "Mock error".to_string())
    }
}

/// Booking metadata as the checkout page attaches it to a session
pub fn sample_booking_metadata() -> HashMap<String, String> {
    [
        ("first_name", "Dana"),
        ("last_name", "Reyes"),
        ("email", "dana@example.com"),
        ("phone", "555-201-3344"),
        ("street", "12 Elm St"),
        ("city", "Austin"),
        ("state", "TX"),
        ("zip", "78701"),
        ("service_name", "AC Tune-Up"),
        ("preferred_date", "2026-11-02"),
        ("time_slot", "morning"),
        ("acquisition_channel", "google"),
        ("referral_code", "FRIEND10"),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect()
}

/// A paid checkout session carrying [`sample_booking_metadata`]
pub fn paid_session(session_id: &str, payment_intent: &str) -> PaymentSession {
    PaymentSession {
        id: session_id.to_string(),
        payment_status: "paid".to_string(),
        status: Some("complete".to_string()),
        amount_total: Some(8900),
        currency: Some("usd".to_string()),
        payment_intent: Some(payment_intent.to_string()),
        customer_details: None,
        metadata: sample_booking_metadata(),
    }
}

/// In-memory fulfillment store enforcing the unique idempotency key
pub struct MockFulfillmentStore {
    storage: Arc<Mutex<HashMap<String, FulfillmentRequest>>>,
    campaigns: Mutex<HashMap<String, String>>,
    config: MockConfig,
    is_healthy: AtomicBool,
    inserts: AtomicUsize,
}

impl MockFulfillmentStore {
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(MockConfig::success())
    }

    #[must_use]
    pub fn with_config(config: MockConfig) -> Self {
        let campaigns = HashMap::from([("website".to_string(), "Website".to_string())]);
        Self {
            storage: Arc::new(Mutex::new(HashMap::new())),
            campaigns: Mutex::new(campaigns),
            config,
            is_healthy: AtomicBool::new(true),
            inserts: AtomicUsize::new(0),
        }
    }

    #[must_use]
    pub fn failing(message: impl Into<String>) -> Self {
        Self::with_config(MockConfig::failure(message))
    }

    pub fn set_healthy(&self, healthy: bool) {
        self.is_healthy.store(healthy, Ordering::Relaxed);
    }

    pub fn set_campaign(&self, channel: &str, campaign_name: &str) {
        self.campaigns
            .lock()
            .unwrap()
            .insert(channel.to_lowercase(), campaign_name.to_string());
    }

    pub fn clear_campaigns(&self) {
        self.campaigns.lock().unwrap().clear();
    }

    /// Put a row in place directly, bypassing the protocol
    pub fn seed(&self, record: FulfillmentRequest) {
        self.storage
            .lock()
            .unwrap()
            .insert(record.idempotency_key.clone(), record);
    }

    /// Get all stored items (for testing)
    pub fn get_all_items(&self) -> Vec<FulfillmentRequest> {
        self.storage.lock().unwrap().values().cloned().collect()
    }

    /// Successful inserts so far
    pub fn insert_count(&self) -> usize {
        self.inserts.load(Ordering::SeqCst)
    }

    fn check_should_fail(&self) -> Result<(), AppError> {
        if self.config.should_fail {
            return Err(AppError::Database(DatabaseError::Query(
                self.config.message(),
            )));
        }
        Ok(())
    }
}

impl Default for MockFulfillmentStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl FulfillmentStore for MockFulfillmentStore {
    async fn health_check(&self) -> Result<(), AppError> {
        if !self.is_healthy.load(Ordering::Relaxed) {
            return Err(AppError::Database(DatabaseError::Connection(
                "Unhealthy".to_string(),
            )));
        }
        self.check_should_fail()
    }

    async fn insert_pending(
        &self,
        data: &NewFulfillmentRequest,
    ) -> Result<FulfillmentRequest, AppError> {
        self.check_should_fail()?;
        let mut storage = self.storage.lock().unwrap();
        if storage.contains_key(&data.idempotency_key) {
            return Err(AppError::Database(DatabaseError::Duplicate(
                data.idempotency_key.clone(),
            )));
        }
        let record = FulfillmentRequest::pending(Uuid::now_v7().to_string(), data);
        storage.insert(data.idempotency_key.clone(), record.clone());
        self.inserts.fetch_add(1, Ordering::SeqCst);
        Ok(record)
    }

    async fn get_by_key(&self, key: &str) -> Result<Option<FulfillmentRequest>, AppError> {
        self.check_should_fail()?;
        Ok(self.storage.lock().unwrap().get(key).cloned())
    }

    async fn mark_confirmed(
        &self,
        key: &str,
        ids: &CrmIds,
    ) -> Result<FulfillmentRequest, AppError> {
        self.check_should_fail()?;
        let mut storage = self.storage.lock().unwrap();
        let record = storage
            .get_mut(key)
            .filter(|r| r.status == FulfillmentStatus::Pending)
            .ok_or_else(|| AppError::Database(DatabaseError::NotFound(key.to_string())))?;
        let now = Utc::now();
        record.status = FulfillmentStatus::Confirmed;
        record.crm_customer_id = Some(ids.customer_id);
        record.crm_location_id = Some(ids.location_id);
        record.crm_job_id = Some(ids.job_id);
        record.crm_job_number = Some(ids.job_number.clone());
        record.crm_appointment_id = ids.appointment_id;
        record.last_error = None;
        record.booked_at = Some(now);
        record.updated_at = now;
        Ok(record.clone())
    }

    async fn mark_failed(&self, key: &str, error: &str) -> Result<(), AppError> {
        self.check_should_fail()?;
        let mut storage = self.storage.lock().unwrap();
        if let Some(record) = storage
            .get_mut(key)
            .filter(|r| r.status == FulfillmentStatus::Pending)
        {
            record.status = FulfillmentStatus::Failed;
            record.last_error = Some(error.to_string());
            record.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn delete_failed(&self, key: &str) -> Result<bool, AppError> {
        self.check_should_fail()?;
        let mut storage = self.storage.lock().unwrap();
        let is_failed = storage
            .get(key)
            .is_some_and(|r| r.status == FulfillmentStatus::Failed);
        if is_failed {
            storage.remove(key);
        }
        Ok(is_failed)
    }

    async fn list_by_status(
        &self,
        status: FulfillmentStatus,
        limit: i64,
    ) -> Result<Vec<FulfillmentRequest>, AppError> {
        self.check_should_fail()?;
        let storage = self.storage.lock().unwrap();
        let mut items: Vec<_> = storage
            .values()
            .filter(|r| r.status == status)
            .cloned()
            .collect();
        items.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        items.truncate(limit.clamp(1, 100) as usize);
        Ok(items)
    }

    async fn campaign_for_channel(&self, channel: &str) -> Result<Option<String>, AppError> {
        self.check_should_fail()?;
        Ok(self
            .campaigns
            .lock()
            .unwrap()
            .get(&channel.to_lowercase())
            .cloned())
    }
}

/// Mock payment gateway serving canned sessions
pub struct MockPaymentGateway {
    sessions: Mutex<HashMap<String, PaymentSession>>,
    config: MockConfig,
    lookups: AtomicUsize,
}

impl MockPaymentGateway {
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(MockConfig::success())
    }

    #[must_use]
    pub fn with_config(config: MockConfig) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            config,
            lookups: AtomicUsize::new(0),
        }
    }

    #[must_use]
    pub fn failing(message: impl Into<String>) -> Self {
        Self::with_config(MockConfig::failure(message))
    }

    pub fn add_session(&self, session: PaymentSession) {
        self.sessions
            .lock()
            .unwrap()
            .insert(session.id.clone(), session);
    }

    pub fn lookup_count(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }
}

impl Default for MockPaymentGateway {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PaymentGateway for MockPaymentGateway {
    async fn retrieve_session(&self, session_id: &str) -> Result<PaymentSession, AppError> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        if self.config.should_fail {
            return Err(AppError::ExternalService(ExternalServiceError::Unavailable(
                self.config.message(),
            )));
        }
        self.sessions
            .lock()
            .unwrap()
            .get(session_id)
            .cloned()
            .ok_or_else(|| AppError::ResourceNotFound(format!("checkout session {}", session_id)))
    }
}

/// Mock CRM with a fixed catalogue and sequential job numbers (`J-500`, `J-501`, ...)
pub struct MockCrmClient {
    campaigns: HashMap<String, i64>,
    job_types: HashMap<String, i64>,
    business_units: Vec<BusinessUnit>,
    jobs: Mutex<Vec<CreateJobInput>>,
    customers: Mutex<Vec<CustomerInput>>,
    locations: Mutex<Vec<(i64, ServiceAddress)>>,
    next_job_number: AtomicI64,
    job_delay: Mutex<Option<Duration>>,
    fail_jobs: AtomicBool,
    is_healthy: AtomicBool,
}

impl MockCrmClient {
    #[must_use]
    pub fn new() -> Self {
        Self {
            campaigns: HashMap::from([("Website".to_string(), 11), ("Google Ads".to_string(), 12)]),
            job_types: HashMap::from([("Service Call".to_string(), 21), ("Install".to_string(), 22)]),
            business_units: vec![
                BusinessUnit {
                    id: 30,
                    name: "Commercial".to_string(),
                    active: false,
                },
                BusinessUnit {
                    id: 31,
                    name: "Residential Service".to_string(),
                    active: true,
                },
            ],
            jobs: Mutex::new(Vec::new()),
            customers: Mutex::new(Vec::new()),
            locations: Mutex::new(Vec::new()),
            next_job_number: AtomicI64::new(500),
            job_delay: Mutex::new(None),
            fail_jobs: AtomicBool::new(false),
            is_healthy: AtomicBool::new(true),
        }
    }

    /// Sleep this long inside `create_job`, widening race windows
    #[must_use]
    pub fn with_job_delay(self, delay: Duration) -> Self {
        *self.job_delay.lock().unwrap() = Some(delay);
        self
    }

    #[must_use]
    pub fn without_job_types(mut self) -> Self {
        self.job_types.clear();
        self
    }

    pub fn set_fail_jobs(&self, fail: bool) {
        self.fail_jobs.store(fail, Ordering::SeqCst);
    }

    pub fn set_healthy(&self, healthy: bool) {
        self.is_healthy.store(healthy, Ordering::Relaxed);
    }

    pub fn created_jobs(&self) -> Vec<CreateJobInput> {
        self.jobs.lock().unwrap().clone()
    }

    pub fn job_count(&self) -> usize {
        self.jobs.lock().unwrap().len()
    }

    pub fn customer_count(&self) -> usize {
        self.customers.lock().unwrap().len()
    }
}

impl Default for MockCrmClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CrmClient for MockCrmClient {
    async fn health_check(&self) -> Result<(), AppError> {
        if !self.is_healthy.load(Ordering::Relaxed) {
            return Err(AppError::ExternalService(ExternalServiceError::Unavailable(
                "CRM unreachable".to_string(),
            )));
        }
        Ok(())
    }

    async fn find_campaign_by_name(&self, name: &str) -> Result<Option<i64>, AppError> {
        Ok(self.campaigns.get(name).copied())
    }

    async fn find_job_type_by_name(&self, name: &str) -> Result<Option<i64>, AppError> {
        Ok(self.job_types.get(name).copied())
    }

    async fn list_business_units(&self) -> Result<Vec<BusinessUnit>, AppError> {
        Ok(self.business_units.clone())
    }

    async fn ensure_customer(&self, customer: &CustomerInput) -> Result<i64, AppError> {
        let mut customers = self.customers.lock().unwrap();
        if let Some(pos) = customers
            .iter()
            .position(|c| c.phone == customer.phone || c.email == customer.email)
        {
            return Ok(1000 + pos as i64);
        }
        customers.push(customer.clone());
        Ok(1000 + customers.len() as i64 - 1)
    }

    async fn ensure_location(
        &self,
        customer_id: i64,
        _name: &str,
        address: &ServiceAddress,
    ) -> Result<i64, AppError> {
        let mut locations = self.locations.lock().unwrap();
        if let Some(pos) = locations
            .iter()
            .position(|(c, a)| *c == customer_id && a == address)
        {
            return Ok(2000 + pos as i64);
        }
        locations.push((customer_id, address.clone()));
        Ok(2000 + locations.len() as i64 - 1)
    }

    async fn create_job(&self, input: &CreateJobInput) -> Result<CreatedJob, AppError> {
        let delay = *self.job_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_jobs.load(Ordering::SeqCst) {
            return Err(AppError::ExternalService(ExternalServiceError::ApiError {
                status_code: 500,
                message: "job creation failed".to_string(),
            }));
        }

        let number = self.next_job_number.fetch_add(1, Ordering::SeqCst);
        self.jobs.lock().unwrap().push(input.clone());
        Ok(CreatedJob {
            job_id: 90_000 + number,
            job_number: format!("J-{}", number),
            appointment_id: Some(70_000 + number),
        })
    }
}

/// Mock attachment source serving bytes by attachment id
pub struct MockAttachmentSource {
    contents: Mutex<HashMap<String, Vec<u8>>>,
    fetched: Mutex<Vec<(String, u64)>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    delay: Duration,
}

impl MockAttachmentSource {
    #[must_use]
    pub fn new() -> Self {
        Self {
            contents: Mutex::new(HashMap::new()),
            fetched: Mutex::new(Vec::new()),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            delay: Duration::from_millis(5),
        }
    }

    pub fn add(&self, attachment_id: &str, content: impl Into<Vec<u8>>) {
        self.contents
            .lock()
            .unwrap()
            .insert(attachment_id.to_string(), content.into());
    }

    /// `(attachment id, max_bytes)` for every fetch, in call order
    pub fn fetch_log(&self) -> Vec<(String, u64)> {
        self.fetched.lock().unwrap().clone()
    }

    /// Highest number of fetches observed running at once
    pub fn max_concurrent_fetches(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

impl Default for MockAttachmentSource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AttachmentSource for MockAttachmentSource {
    async fn fetch_attachment(
        &self,
        _email_id: &str,
        attachment: &AttachmentDescriptor,
        max_bytes: u64,
    ) -> Result<AttachmentFetch, AppError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        self.fetched
            .lock()
            .unwrap()
            .push((attachment.id.clone(), max_bytes));

        tokio::time::sleep(self.delay).await;
        let content = self.contents.lock().unwrap().get(&attachment.id).cloned();
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        match content {
            Some(bytes) if bytes.len() as u64 > max_bytes => Ok(AttachmentFetch::Oversized {
                size: bytes.len() as u64,
            }),
            Some(bytes) => Ok(AttachmentFetch::Downloaded(bytes)),
            None => Err(AppError::ExternalService(ExternalServiceError::ApiError {
                status_code: 404,
                message: format!("attachment {} not found", attachment.id),
            })),
        }
    }
}

/// Mock content processor recording every dispatched job
#[derive(Default)]
pub struct MockContentProcessor {
    jobs: Mutex<Vec<ProcessorJob>>,
    failing: Mutex<Vec<ProcessorKind>>,
    unconfigured: Mutex<Vec<ProcessorKind>>,
}

impl MockContentProcessor {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make dispatches of `kind` fail
    pub fn fail_kind(&self, kind: ProcessorKind) {
        self.failing.lock().unwrap().push(kind);
    }

    /// Report `kind` as having no endpoint
    pub fn without_endpoint(&self, kind: ProcessorKind) {
        self.unconfigured.lock().unwrap().push(kind);
    }

    pub fn dispatched(&self) -> Vec<ProcessorJob> {
        self.jobs.lock().unwrap().clone()
    }

    pub fn dispatched_kinds(&self) -> Vec<ProcessorKind> {
        self.jobs.lock().unwrap().iter().map(ProcessorJob::kind).collect()
    }
}

#[async_trait]
impl ContentProcessor for MockContentProcessor {
    async fn dispatch(&self, job: &ProcessorJob) -> Result<Dispatch, AppError> {
        if self.failing.lock().unwrap().contains(&job.kind()) {
            return Err(AppError::ExternalService(ExternalServiceError::Unavailable(
                format!("{} processor down", job.kind()),
            )));
        }
        if self.unconfigured.lock().unwrap().contains(&job.kind()) {
            return Ok(Dispatch::Unconfigured);
        }
        self.jobs.lock().unwrap().push(job.clone());
        Ok(Dispatch::Delivered)
    }
}

/// Mock chat notifier
#[derive(Default)]
pub struct MockChatNotifier {
    messages: Mutex<Vec<String>>,
    should_fail: AtomicBool,
}

impl MockChatNotifier {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn failing() -> Self {
        let notifier = Self::default();
        notifier.should_fail.store(true, Ordering::SeqCst);
        notifier
    }

    pub fn messages(&self) -> Vec<String> {
        self.messages.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChatNotifier for MockChatNotifier {
    async fn notify(&self, text: &str) -> Result<(), NotifyError> {
        if self.should_fail.load(Ordering::SeqCst) {
            return Err(NotifyError::Transport("chat unreachable".to_string()));
        }
        self.messages.lock().unwrap().push(text.to_string());
        Ok(())
    }
}
