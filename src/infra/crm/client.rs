//! REST client for the field-service CRM.
//!
//! Every call is tenant-scoped, carries the application key header and an
//! OAuth bearer token, and goes through the shared `crm` rate-limit gate.

use async_trait::async_trait;
use chrono::{Days, NaiveDate, Utc};
use reqwest::RequestBuilder;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use serde::de::DeserializeOwned;
use tracing::{debug, info, instrument, warn};

use super::token::TokenCache;
use crate::domain::{
    AppError, BusinessUnit, CreateJobInput, CreatedJob, CrmClient, CustomerInput,
    ExternalServiceError, ServiceAddress, TimeSlot,
};
use crate::infra::http::OutboundClient;

const APP_KEY_HEADER: &str = "ST-App-Key";

/// Connection settings for the CRM
#[derive(Debug, Clone)]
pub struct CrmConfig {
    pub api_url: String,
    pub auth_url: String,
    pub tenant_id: String,
    pub client_id: String,
    pub client_secret: SecretString,
    pub app_key: SecretString,
}

/// Paged list envelope used by every CRM listing endpoint
#[derive(Debug, Deserialize)]
struct Page<T> {
    #[serde(default = "Vec::new")]
    data: Vec<T>,
}

#[derive(Debug, Deserialize)]
struct NamedEntity {
    id: i64,
    name: String,
    #[serde(default = "default_true")]
    active: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize)]
struct IdOnly {
    id: i64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CrmLocation {
    id: i64,
    address: CrmAddress,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CrmAddress {
    #[serde(default)]
    street: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    unit: Option<String>,
    #[serde(default)]
    city: String,
    #[serde(default)]
    state: String,
    #[serde(default)]
    zip: String,
    #[serde(default)]
    country: String,
}

impl From<&ServiceAddress> for CrmAddress {
    fn from(addr: &ServiceAddress) -> Self {
        Self {
            street: addr.street.clone(),
            unit: addr.unit.clone(),
            city: addr.city.clone(),
            state: addr.state.clone(),
            zip: addr.zip.clone(),
            country: addr.country.clone(),
        }
    }
}

impl CrmAddress {
    /// Same street and zip, ignoring case and whitespace
    fn matches(&self, other: &ServiceAddress) -> bool {
        normalize(&self.street) == normalize(&other.street)
            && normalize(&self.zip) == normalize(&other.zip)
            && normalize(self.unit.as_deref().unwrap_or_default())
                == normalize(other.unit.as_deref().unwrap_or_default())
    }
}

fn normalize(value: &str) -> String {
    value
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ContactBody<'a> {
    #[serde(rename = "type")]
    kind: &'a str,
    value: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateCustomerBody<'a> {
    name: &'a str,
    #[serde(rename = "type")]
    kind: &'a str,
    address: CrmAddress,
    contacts: Vec<ContactBody<'a>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateLocationBody<'a> {
    customer_id: i64,
    name: &'a str,
    address: CrmAddress,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct AppointmentBody {
    start: String,
    end: String,
    arrival_window_start: String,
    arrival_window_end: String,
}

impl AppointmentBody {
    fn for_slot(date: NaiveDate, slot: TimeSlot) -> Self {
        let (start, end) = slot.window_hours();
        let at = |hour: u32| format!("{}T{:02}:00:00Z", date.format("%Y-%m-%d"), hour);
        Self {
            start: at(start),
            end: at(end),
            arrival_window_start: at(start),
            arrival_window_end: at(end),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateJobBody<'a> {
    customer_id: i64,
    location_id: i64,
    business_unit_id: i64,
    job_type_id: i64,
    priority: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    campaign_id: Option<i64>,
    summary: &'a str,
    appointments: Vec<AppointmentBody>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JobResponse {
    id: i64,
    job_number: String,
    #[serde(default)]
    first_appointment_id: Option<i64>,
}

/// CRM client authenticating with OAuth client credentials
#[derive(Debug)]
pub struct FieldServiceCrmClient {
    client: OutboundClient,
    config: CrmConfig,
    tokens: TokenCache,
}

impl FieldServiceCrmClient {
    pub fn new(client: OutboundClient, config: CrmConfig) -> Self {
        let token_url = format!("{}/connect/token", config.auth_url.trim_end_matches('/'));
        let tokens = TokenCache::new(
            token_url,
            config.client_id.clone(),
            config.client_secret.clone(),
        );
        Self {
            client,
            config,
            tokens,
        }
    }

    /// Tenant-scoped URL, e.g. `crm/v2/tenant/{tenant}/customers`
    fn url(&self, module: &str, resource: &str) -> String {
        format!(
            "{}/{}/v2/tenant/{}/{}",
            self.config.api_url.trim_end_matches('/'),
            module,
            self.config.tenant_id,
            resource
        )
    }

    async fn authorized(&self, request: RequestBuilder) -> Result<RequestBuilder, AppError> {
        let token = self.tokens.bearer(&self.client).await?;
        Ok(request
            .bearer_auth(token.expose_secret())
            .header(APP_KEY_HEADER, self.config.app_key.expose_secret()))
    }

    async fn call<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, AppError> {
        let request = self.authorized(request).await?;
        match self.client.send_json::<T>(request).await {
            Ok(value) => Ok(value),
            Err(ExternalServiceError::ApiError {
                status_code: 401, ..
            }) => {
                warn!("CRM rejected access token, clearing cache");
                self.tokens.invalidate().await;
                Err(AppError::ExternalService(ExternalServiceError::ApiError {
                    status_code: 401,
                    message: "CRM access token rejected".to_string(),
                }))
            }
            Err(e) => Err(AppError::ExternalService(e)),
        }
    }

    async fn list<T: DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, &str)],
    ) -> Result<Vec<T>, AppError> {
        let request = self.client.http().get(url).query(query);
        let page: Page<T> = self.call(request).await?;
        Ok(page.data)
    }

    async fn find_named(
        &self,
        module: &str,
        resource: &str,
        name: &str,
    ) -> Result<Option<i64>, AppError> {
        let url = self.url(module, resource);
        let items: Vec<NamedEntity> = self
            .list(&url, &[("name", name), ("active", "True")])
            .await?;
        Ok(items
            .into_iter()
            .find(|item| item.active && item.name.eq_ignore_ascii_case(name))
            .map(|item| item.id))
    }

    async fn find_customer(&self, customer: &CustomerInput) -> Result<Option<i64>, AppError> {
        let url = self.url("crm", "customers");
        if !customer.phone.is_empty() {
            let hits: Vec<IdOnly> = self.list(&url, &[("phone", customer.phone.as_str())]).await?;
            if let Some(hit) = hits.first() {
                return Ok(Some(hit.id));
            }
        }
        if !customer.email.is_empty() {
            let hits: Vec<IdOnly> = self.list(&url, &[("email", customer.email.as_str())]).await?;
            if let Some(hit) = hits.first() {
                return Ok(Some(hit.id));
            }
        }
        Ok(None)
    }
}

#[async_trait]
impl CrmClient for FieldServiceCrmClient {
    async fn health_check(&self) -> Result<(), AppError> {
        self.tokens.bearer(&self.client).await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn find_campaign_by_name(&self, name: &str) -> Result<Option<i64>, AppError> {
        self.find_named("marketing", "campaigns", name).await
    }

    #[instrument(skip(self))]
    async fn find_job_type_by_name(&self, name: &str) -> Result<Option<i64>, AppError> {
        self.find_named("jpm", "job-types", name).await
    }

    #[instrument(skip(self))]
    async fn list_business_units(&self) -> Result<Vec<BusinessUnit>, AppError> {
        let url = self.url("settings", "business-units");
        let units: Vec<NamedEntity> = self.list(&url, &[]).await?;
        Ok(units
            .into_iter()
            .map(|u| BusinessUnit {
                id: u.id,
                name: u.name,
                active: u.active,
            })
            .collect())
    }

    #[instrument(skip(self, customer), fields(name = %customer.name))]
    async fn ensure_customer(&self, customer: &CustomerInput) -> Result<i64, AppError> {
        if let Some(id) = self.find_customer(customer).await? {
            debug!(customer_id = id, "Reusing existing CRM customer");
            return Ok(id);
        }

        let mut contacts = Vec::new();
        if !customer.email.is_empty() {
            contacts.push(ContactBody {
                kind: "Email",
                value: &customer.email,
            });
        }
        if !customer.phone.is_empty() {
            contacts.push(ContactBody {
                kind: "MobilePhone",
                value: &customer.phone,
            });
        }
        let body = CreateCustomerBody {
            name: &customer.name,
            kind: "Residential",
            address: CrmAddress::from(&customer.address),
            contacts,
        };

        let request = self.client.http().post(self.url("crm", "customers")).json(&body);
        let created: IdOnly = self.call(request).await?;
        info!(customer_id = created.id, "Created CRM customer");
        Ok(created.id)
    }

    #[instrument(skip(self, address))]
    async fn ensure_location(
        &self,
        customer_id: i64,
        name: &str,
        address: &ServiceAddress,
    ) -> Result<i64, AppError> {
        let url = self.url("crm", "locations");
        let customer = customer_id.to_string();
        let existing: Vec<CrmLocation> = self.list(&url, &[("customerId", customer.as_str())]).await?;
        if let Some(location) = existing.iter().find(|l| l.address.matches(address)) {
            debug!(location_id = location.id, "Reusing existing CRM location");
            return Ok(location.id);
        }

        let body = CreateLocationBody {
            customer_id,
            name,
            address: CrmAddress::from(address),
        };
        let request = self.client.http().post(&url).json(&body);
        let created: IdOnly = self.call(request).await?;
        info!(location_id = created.id, "Created CRM location");
        Ok(created.id)
    }

    #[instrument(skip(self, input), fields(customer_id = input.customer_id))]
    async fn create_job(&self, input: &CreateJobInput) -> Result<CreatedJob, AppError> {
        // The CRM requires a first appointment; default to tomorrow, any time.
        let date = input
            .preferred_date
            .or_else(|| Utc::now().date_naive().checked_add_days(Days::new(1)))
            .ok_or_else(|| AppError::Internal("appointment date out of range".to_string()))?;
        let slot = input.time_slot.unwrap_or(TimeSlot::Anytime);

        let body = CreateJobBody {
            customer_id: input.customer_id,
            location_id: input.location_id,
            business_unit_id: input.business_unit_id,
            job_type_id: input.job_type_id,
            priority: "Normal",
            campaign_id: input.campaign_id,
            summary: &input.summary,
            appointments: vec![AppointmentBody::for_slot(date, slot)],
        };
        let request = self.client.http().post(self.url("jpm", "jobs")).json(&body);
        let job: JobResponse = self.call(request).await?;
        info!(job_id = job.id, job_number = %job.job_number, "Created CRM job");

        Ok(CreatedJob {
            job_id: job.id,
            job_number: job.job_number,
            appointment_id: job.first_appointment_id,
        })
    }
}
