use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::env;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub app: AppConfig,
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub log: LogConfig,
    pub stripe: StripeConfig,
    pub payments: PaymentsConfig,
    pub jobs: JobsConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub service_name: String,
    pub api_key: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LogConfig {
    pub level: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StripeConfig {
    pub secret_key: String,
    pub webhook_secret: String,
    pub api_base_url: String,
    pub callback_base_url: String,
    pub signature_tolerance_secs: i64,
    pub http_timeout: Duration,
}

/// Knobs of the payment lifecycle engine.
#[derive(Debug, Clone, Deserialize)]
pub struct PaymentsConfig {
    pub callback_max_attempts: i32,
    pub callback_retry_interval: Duration,
    pub callback_http_timeout: Duration,
    pub pending_timeout: Duration,
    pub reconcile_stale_after: Duration,
    pub job_batch_size: i64,
}

impl Default for PaymentsConfig {
    fn default() -> Self {
        Self {
            callback_max_attempts: 10,
            callback_retry_interval: Duration::from_secs(5 * 60),
            callback_http_timeout: Duration::from_secs(10),
            pending_timeout: Duration::from_secs(60 * 60),
            reconcile_stale_after: Duration::from_secs(15 * 60),
            job_batch_size: 100,
        }
    }
}

/// Tick intervals of the colocated batch workers.
#[derive(Debug, Clone, Deserialize)]
pub struct JobsConfig {
    pub workers_enabled: bool,
    pub reconcile_interval: Duration,
    pub callback_dispatch_interval: Duration,
    pub expire_pending_interval: Duration,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let app = AppConfig {
            service_name: get_env("APP_SERVICE_NAME", "payments-service"),
            api_key: get_env("APP_API_KEY", ""),
        };

        let server = ServerConfig {
            host: get_env("HTTP_HOST", "0.0.0.0"),
            port: get_parsed_env("HTTP_PORT", 8080)?,
        };

        let database = DatabaseConfig {
            url: env::var("DATABASE_URL").map_err(|_| anyhow!("DATABASE_URL not set"))?,
            max_connections: get_parsed_env("DATABASE_MAX_CONNECTIONS", 10)?,
        };

        let log = LogConfig {
            level: get_env("LOG_LEVEL", "info"),
        };

        let stripe = StripeConfig {
            secret_key: get_env("STRIPE_SECRET_KEY", ""),
            webhook_secret: get_env("STRIPE_WEBHOOK_SECRET", ""),
            api_base_url: get_env("STRIPE_API_BASE_URL", "https://api.stripe.com"),
            callback_base_url: get_env("PAYMENTS_PROVIDER_CALLBACK_BASE_URL", ""),
            signature_tolerance_secs: get_parsed_env("STRIPE_SIGNATURE_TOLERANCE_SECONDS", 300)?,
            http_timeout: get_secs_env("STRIPE_HTTP_TIMEOUT_SECONDS", 10)?,
        };

        let payments = PaymentsConfig {
            callback_max_attempts: get_parsed_env("PAYMENTS_CALLBACK_MAX_ATTEMPTS", 10)?,
            callback_retry_interval: get_minutes_env("PAYMENTS_CALLBACK_RETRY_INTERVAL_MINUTES", 5)?,
            callback_http_timeout: get_secs_env("PAYMENTS_CALLBACK_HTTP_TIMEOUT_SECONDS", 10)?,
            pending_timeout: get_minutes_env("PAYMENTS_PENDING_TIMEOUT_MINUTES", 60)?,
            reconcile_stale_after: get_minutes_env("PAYMENTS_RECONCILE_STALE_AFTER_MINUTES", 15)?,
            job_batch_size: get_parsed_env("PAYMENTS_JOB_BATCH_SIZE", 100)?,
        };

        let jobs = JobsConfig {
            workers_enabled: get_env("PAYMENTS_WORKERS_ENABLED", "true") == "true",
            reconcile_interval: get_minutes_env("PAYMENTS_RECONCILE_INTERVAL_MINUTES", 2)?,
            callback_dispatch_interval: get_minutes_env(
                "PAYMENTS_CALLBACK_DISPATCH_INTERVAL_MINUTES",
                1,
            )?,
            expire_pending_interval: get_minutes_env("PAYMENTS_EXPIRE_PENDING_INTERVAL_MINUTES", 5)?,
        };

        let config = Config {
            app,
            server,
            database,
            log,
            stripe,
            payments,
            jobs,
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.database.url.trim().is_empty() {
            return Err(anyhow!("DATABASE_URL cannot be empty"));
        }

        if self.database.max_connections == 0 {
            return Err(anyhow!("DATABASE_MAX_CONNECTIONS must be greater than 0"));
        }

        if self.payments.callback_max_attempts < 1 {
            return Err(anyhow!("PAYMENTS_CALLBACK_MAX_ATTEMPTS must be at least 1"));
        }

        if self.payments.job_batch_size < 1 {
            return Err(anyhow!("PAYMENTS_JOB_BATCH_SIZE must be at least 1"));
        }

        if self.stripe.signature_tolerance_secs <= 0 {
            return Err(anyhow!(
                "STRIPE_SIGNATURE_TOLERANCE_SECONDS must be greater than 0"
            ));
        }

        // Stripe payment creation needs a base URL to hand the provider.
        if !self.stripe.secret_key.trim().is_empty()
            && self.stripe.callback_base_url.trim().is_empty()
        {
            return Err(anyhow!(
                "PAYMENTS_PROVIDER_CALLBACK_BASE_URL is required when STRIPE_SECRET_KEY is set"
            ));
        }

        Ok(())
    }
}

fn get_env(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn get_parsed_env<T: std::str::FromStr>(key: &str, default: T) -> Result<T> {
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|_| anyhow!("{} must be a valid number, got {:?}", key, raw)),
        Err(_) => Ok(default),
    }
}

fn get_secs_env(key: &str, default_secs: u64) -> Result<Duration> {
    Ok(Duration::from_secs(get_parsed_env(key, default_secs)?))
}

fn get_minutes_env(key: &str, default_minutes: u64) -> Result<Duration> {
    Ok(Duration::from_secs(get_parsed_env(key, default_minutes)? * 60))
}
