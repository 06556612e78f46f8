//! Application entry point.

use std::env;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use dotenvy::dotenv;
use secrecy::SecretString;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use fulfillment_relay::api::{RateLimitConfig, create_router, create_router_with_rate_limit};
use fulfillment_relay::app::{
    AppState, AttachmentLimits, EmailSignatureVerifier, FulfillmentConfig,
    PaymentSignatureVerifier, Ports, ResolverDefaults, ServiceSettings,
};
use fulfillment_relay::domain::ChatNotifier;
use fulfillment_relay::infra::{
    CrmConfig, FieldServiceCrmClient, HttpContentProcessor, OutboundClient, PostgresClient,
    PostgresConfig, ProcessorEndpoints, RateLimiter, ResendAttachmentSource, RetryExecutor,
    RetryPolicy, SlackNotifier, StripePaymentGateway,
};
use fulfillment_relay::infra::http::{DEFAULT_HTTP_TIMEOUT, build_http_client};

/// Application configuration
struct Config {
    database_url: String,
    host: String,
    port: u16,
    enable_rate_limiting: bool,
    rate_limit_config: RateLimitConfig,
    email_webhook_secret: SecretString,
    /// Payment webhook is refused when unset
    payment_webhook_secret: Option<SecretString>,
    payment_api_url: Option<String>,
    payment_api_key: SecretString,
    crm: CrmConfig,
    crm_min_interval: Duration,
    email_api_url: Option<String>,
    email_api_key: SecretString,
    email_min_interval: Duration,
    /// Monitoring forward; disabled when unset
    chat_webhook_url: Option<SecretString>,
    chat_min_interval: Duration,
    processors: ProcessorEndpoints,
    attachment_limits: AttachmentLimits,
    http_max_retries: u32,
    fulfillment: FulfillmentConfig,
    resolver: ResolverDefaults,
    json_logs: bool,
}

fn optional(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.is_empty())
}

fn required(name: &str) -> Result<String> {
    optional(name).with_context(|| format!("{} not set", name))
}

fn parsed<T: std::str::FromStr>(name: &str, default: T) -> T {
    env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn millis(name: &str, default: u64) -> Duration {
    Duration::from_millis(parsed(name, default))
}

fn secret(name: &str) -> SecretString {
    SecretString::from(optional(name).unwrap_or_default())
}

impl Config {
    fn from_env() -> Result<Self> {
        let database_url = required("DATABASE_URL")?;
        let email_webhook_secret = SecretString::from(required("EMAIL_WEBHOOK_SECRET")?);

        let host = optional("HOST").unwrap_or_else(|| "0.0.0.0".to_string());
        let port = parsed("PORT", 3000);
        let enable_rate_limiting = env::var("ENABLE_RATE_LIMITING")
            .map(|v| v == "true" || v == "1")
            .unwrap_or(false);

        let crm = CrmConfig {
            api_url: optional("CRM_API_URL").unwrap_or_default(),
            auth_url: optional("CRM_AUTH_URL").unwrap_or_default(),
            tenant_id: optional("CRM_TENANT_ID").unwrap_or_default(),
            client_id: optional("CRM_CLIENT_ID").unwrap_or_default(),
            client_secret: secret("CRM_CLIENT_SECRET"),
            app_key: secret("CRM_APP_KEY"),
        };

        let processors = ProcessorEndpoints {
            job_completion: optional("PROCESSOR_JOB_COMPLETION_URL"),
            invoice: optional("PROCESSOR_INVOICE_URL"),
            estimate: optional("PROCESSOR_ESTIMATE_URL"),
            customer_data: optional("PROCESSOR_CUSTOMER_DATA_URL"),
        };

        let limits = AttachmentLimits::default();
        let attachment_limits = AttachmentLimits {
            max_item_bytes: parsed("MAX_ATTACHMENT_BYTES", limits.max_item_bytes),
            max_total_bytes: parsed("MAX_TOTAL_ATTACHMENT_BYTES", limits.max_total_bytes),
        };

        let defaults = ResolverDefaults::default();
        let resolver = ResolverDefaults {
            acquisition_channel: optional("DEFAULT_ACQUISITION_CHANNEL")
                .unwrap_or(defaults.acquisition_channel),
            job_type: optional("DEFAULT_JOB_TYPE").unwrap_or(defaults.job_type),
            business_unit: optional("BUSINESS_UNIT_NAME").unwrap_or(defaults.business_unit),
        };

        Ok(Self {
            database_url,
            host,
            port,
            enable_rate_limiting,
            rate_limit_config: RateLimitConfig::from_env(),
            email_webhook_secret,
            payment_webhook_secret: optional("PAYMENT_WEBHOOK_SECRET").map(SecretString::from),
            payment_api_url: optional("PAYMENT_API_URL"),
            payment_api_key: secret("PAYMENT_API_KEY"),
            crm,
            crm_min_interval: millis("CRM_MIN_INTERVAL_MS", 250),
            email_api_url: optional("EMAIL_API_URL"),
            email_api_key: secret("EMAIL_API_KEY"),
            email_min_interval: millis("EMAIL_MIN_INTERVAL_MS", 600),
            chat_webhook_url: optional("CHAT_WEBHOOK_URL").map(SecretString::from),
            chat_min_interval: millis("CHAT_MIN_INTERVAL_MS", 1000),
            processors,
            attachment_limits,
            http_max_retries: parsed("HTTP_MAX_RETRIES", 3),
            fulfillment: FulfillmentConfig {
                pending_wait: millis("IDEMPOTENCY_WAIT_MS", 2000),
            },
            resolver,
            json_logs: optional("LOG_FORMAT").is_some_and(|v| v.eq_ignore_ascii_case("json")),
        })
    }
}

fn init_tracing(json: bool) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,tower_http=debug,sqlx=warn"));

    let registry = tracing_subscriber::registry().with(env_filter);
    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C"),
        _ = terminate => info!("Received SIGTERM"),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    let config = Config::from_env()?;
    init_tracing(config.json_logs);

    info!("Fulfillment Relay v{}", env!("CARGO_PKG_VERSION"));
    info!("Initializing infrastructure...");

    let postgres_client = PostgresClient::new(&config.database_url, PostgresConfig::default()).await?;
    postgres_client.run_migrations().await?;
    info!("   ✓ Database connected and migrations applied");
    let store = Arc::new(postgres_client);

    // One limiter for the whole process; each upstream gets its own key
    let limiter = Arc::new(RateLimiter::new());
    let http = build_http_client(DEFAULT_HTTP_TIMEOUT)?;
    let retry = RetryExecutor::new(RetryPolicy::default());
    let outbound = |key: &str, min_interval: Duration| {
        OutboundClient::new(
            http.clone(),
            Arc::clone(&limiter),
            retry,
            key,
            min_interval,
            config.http_max_retries,
        )
    };

    let gateway = StripePaymentGateway::new(
        outbound("payment", Duration::ZERO),
        config.payment_api_key.clone(),
        config.payment_api_url.clone(),
    );
    let crm = FieldServiceCrmClient::new(outbound("crm", config.crm_min_interval), config.crm.clone());
    let attachments = ResendAttachmentSource::new(
        outbound("email", config.email_min_interval),
        config.email_api_key.clone(),
        config.email_api_url.clone(),
    );
    let processor =
        HttpContentProcessor::new(outbound("processors", Duration::ZERO), config.processors.clone());
    let chat: Option<Arc<dyn ChatNotifier>> = match &config.chat_webhook_url {
        Some(url) => {
            info!("   ✓ Monitoring forward enabled");
            Some(Arc::new(SlackNotifier::new(
                outbound("chat", config.chat_min_interval),
                url.clone(),
            )))
        }
        None => {
            info!("   ○ Monitoring forward disabled (CHAT_WEBHOOK_URL not set)");
            None
        }
    };

    let ports = Ports {
        store,
        gateway: Arc::new(gateway),
        crm: Arc::new(crm),
        attachments: Arc::new(attachments),
        processor: Arc::new(processor),
        chat,
    };
    let settings = ServiceSettings {
        fulfillment: config.fulfillment,
        resolver: config.resolver.clone(),
        attachments: config.attachment_limits,
    };

    let mut app_state = AppState::new(
        ports,
        settings,
        EmailSignatureVerifier::new(config.email_webhook_secret.clone()),
    );
    match &config.payment_webhook_secret {
        Some(secret) => {
            app_state = app_state.with_payment_verifier(PaymentSignatureVerifier::new(secret.clone()));
            info!("   ✓ Payment webhook secret configured");
        }
        None => warn!("   ⚠ PAYMENT_WEBHOOK_SECRET not set; payment webhook disabled"),
    }
    let app_state = Arc::new(app_state);

    let router = if config.enable_rate_limiting {
        info!("   ✓ Rate limiting enabled");
        create_router_with_rate_limit(app_state, config.rate_limit_config)
    } else {
        info!("   ○ Rate limiting disabled");
        create_router(app_state)
    };

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    info!("Server starting on http://{}", addr);
    info!("Swagger UI available at http://{}/swagger-ui", addr);
    info!("OpenAPI spec at http://{}/api-docs/openapi.json", addr);

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server shutdown complete");
    Ok(())
}
