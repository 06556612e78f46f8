//! Resolution of the CRM entities a job needs.

use std::sync::Arc;

use tracing::{debug, info, instrument, warn};

use crate::domain::{
    AppError, BookingDetails, CrmClient, CustomerInput, FulfillmentStore, ServiceAddress,
};

/// Names used when the booking does not specify its own
#[derive(Debug, Clone)]
pub struct ResolverDefaults {
    /// Channel whose campaign mapping applies when the booking's has none
    pub acquisition_channel: String,
    pub job_type: String,
    pub business_unit: String,
}

impl Default for ResolverDefaults {
    fn default() -> Self {
        Self {
            acquisition_channel: "website".to_string(),
            job_type: "Service Call".to_string(),
            business_unit: "Residential Service".to_string(),
        }
    }
}

/// CRM ids resolved for one booking
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedEntities {
    pub campaign_id: Option<i64>,
    pub job_type_id: i64,
    pub business_unit_id: i64,
    pub customer_id: i64,
    pub location_id: i64,
}

pub struct CrmResolver {
    crm: Arc<dyn CrmClient>,
    store: Arc<dyn FulfillmentStore>,
    defaults: ResolverDefaults,
}

impl CrmResolver {
    #[must_use]
    pub fn new(
        crm: Arc<dyn CrmClient>,
        store: Arc<dyn FulfillmentStore>,
        defaults: ResolverDefaults,
    ) -> Self {
        Self {
            crm,
            store,
            defaults,
        }
    }

    /// Resolve every id needed to create the job, in dependency order.
    ///
    /// A missing job type or business unit is fatal; a missing campaign is not.
    #[instrument(skip(self, booking), fields(service = %booking.service_name))]
    pub async fn resolve(&self, booking: &BookingDetails) -> Result<ResolvedEntities, AppError> {
        let campaign_id = self
            .resolve_campaign(booking.acquisition_channel.as_deref())
            .await?;
        let job_type_id = self.resolve_job_type(booking.job_type.as_deref()).await?;
        let business_unit_id = self.resolve_business_unit().await?;
        let (customer_id, location_id) = self.resolve_customer_and_location(booking).await?;

        Ok(ResolvedEntities {
            campaign_id,
            job_type_id,
            business_unit_id,
            customer_id,
            location_id,
        })
    }

    /// Stored channel mapping, then the default channel's mapping, then a CRM
    /// lookup of the mapped campaign name.
    pub async fn resolve_campaign(&self, channel: Option<&str>) -> Result<Option<i64>, AppError> {
        let mut campaign_name = None;
        if let Some(channel) = channel {
            campaign_name = self.store.campaign_for_channel(channel).await?;
        }
        if campaign_name.is_none() {
            debug!(
                channel = ?channel,
                fallback = %self.defaults.acquisition_channel,
                "No campaign mapping for channel, using default"
            );
            campaign_name = self
                .store
                .campaign_for_channel(&self.defaults.acquisition_channel)
                .await?;
        }

        let Some(name) = campaign_name else {
            warn!("No campaign mapping configured; job will carry no campaign");
            return Ok(None);
        };

        let id = self.crm.find_campaign_by_name(&name).await?;
        if id.is_none() {
            warn!(campaign = %name, "Mapped campaign not found in CRM");
        }
        Ok(id)
    }

    pub async fn resolve_job_type(&self, requested: Option<&str>) -> Result<i64, AppError> {
        let name = requested.unwrap_or(&self.defaults.job_type);
        self.crm
            .find_job_type_by_name(name)
            .await?
            .ok_or_else(|| AppError::ResourceNotFound(format!("job type '{}'", name)))
    }

    /// Business unit by configured name, else the first active unit
    pub async fn resolve_business_unit(&self) -> Result<i64, AppError> {
        let units = self.crm.list_business_units().await?;
        if let Some(unit) = units
            .iter()
            .find(|u| u.active && u.name.eq_ignore_ascii_case(&self.defaults.business_unit))
        {
            return Ok(unit.id);
        }

        match units.iter().find(|u| u.active) {
            Some(unit) => {
                warn!(
                    wanted = %self.defaults.business_unit,
                    using = %unit.name,
                    "Configured business unit not found, using first active unit"
                );
                Ok(unit.id)
            }
            None => Err(AppError::ResourceNotFound(
                "active business unit".to_string(),
            )),
        }
    }

    pub async fn resolve_customer_and_location(
        &self,
        booking: &BookingDetails,
    ) -> Result<(i64, i64), AppError> {
        let address = ServiceAddress::from(booking);
        let customer = CustomerInput {
            name: booking.customer_name.clone(),
            email: booking.email.clone(),
            phone: booking.phone.clone(),
            address: address.clone(),
        };

        let customer_id = self.crm.ensure_customer(&customer).await?;
        let location_id = self
            .crm
            .ensure_location(customer_id, &booking.customer_name, &address)
            .await?;
        info!(customer_id, location_id, "CRM customer and location resolved");
        Ok((customer_id, location_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{MockCrmClient, MockFulfillmentStore, paid_session};

    fn resolver(store: Arc<MockFulfillmentStore>, defaults: ResolverDefaults) -> CrmResolver {
        CrmResolver::new(Arc::new(MockCrmClient::new()), store, defaults)
    }

    #[tokio::test]
    async fn test_campaign_uses_channel_mapping_first() {
        let store = Arc::new(MockFulfillmentStore::new());
        store.set_campaign("google", "Google Ads");
        let resolver = resolver(store, ResolverDefaults::default());

        assert_eq!(resolver.resolve_campaign(Some("google")).await.unwrap(), Some(12));
        assert_eq!(resolver.resolve_campaign(Some("bing")).await.unwrap(), Some(11));
        assert_eq!(resolver.resolve_campaign(None).await.unwrap(), Some(11));
    }

    #[tokio::test]
    async fn test_campaign_absent_everywhere_is_not_fatal() {
        let store = Arc::new(MockFulfillmentStore::new());
        store.clear_campaigns();
        let resolver = resolver(store, ResolverDefaults::default());
        assert_eq!(resolver.resolve_campaign(Some("google")).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_unknown_job_type_is_resource_not_found() {
        let resolver = resolver(Arc::new(MockFulfillmentStore::new()), ResolverDefaults::default());
        assert_eq!(resolver.resolve_job_type(Some("Install")).await.unwrap(), 22);
        assert!(matches!(
            resolver.resolve_job_type(Some("Demolition")).await,
            Err(AppError::ResourceNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_business_unit_falls_back_to_first_active() {
        let defaults = ResolverDefaults {
            business_unit: "Plumbing".to_string(),
            ..ResolverDefaults::default()
        };
        let resolver = resolver(Arc::new(MockFulfillmentStore::new()), defaults);
        // "Commercial" is inactive and is skipped
        assert_eq!(resolver.resolve_business_unit().await.unwrap(), 31);
    }

    #[tokio::test]
    async fn test_resolve_reuses_customer_for_same_booking() {
        let crm = Arc::new(MockCrmClient::new());
        let resolver = CrmResolver::new(
            crm.clone(),
            Arc::new(MockFulfillmentStore::new()),
            ResolverDefaults::default(),
        );
        let booking = BookingDetails::from_session(&paid_session("cs_1", "pi_1")).unwrap();

        let first = resolver.resolve(&booking).await.unwrap();
        let second = resolver.resolve(&booking).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(crm.customer_count(), 1);
    }
}
