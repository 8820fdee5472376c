use std::env;
use std::time::Duration;

use event_bus::consumer_retry::RetryConfig;

use crate::webhooks::DeliveryConfig;

#[derive(Debug, Clone)]
pub enum BusType {
    Nats,
    InMemory,
}

impl BusType {
    pub fn from_env() -> Self {
        match env::var("BUS_TYPE")
            .unwrap_or_else(|_| "inmemory".to_string())
            .to_lowercase()
            .as_str()
        {
            "nats" => BusType::Nats,
            "inmemory" => BusType::InMemory,
            _ => {
                tracing::warn!("Unknown BUS_TYPE, defaulting to inmemory");
                BusType::InMemory
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub bus_type: BusType,
    pub nats_url: Option<String>,
    pub host: String,
    pub port: u16,

    pub webhook_timeout_secs: u64,
    pub webhook_max_attempts: u32,
    pub webhook_initial_backoff_secs: u64,
    pub webhook_max_backoff_secs: u64,

    pub overdue_sweep_secs: u64,
    pub archive_sweep_secs: u64,
    pub archive_retention_days: i64,
}

impl Config {
    pub fn from_env() -> Result<Self, Box<dyn std::error::Error>> {
        dotenvy::dotenv().ok();

        let bus_type = BusType::from_env();
        let nats_url = match bus_type {
            BusType::Nats => Some(
                env::var("NATS_URL").unwrap_or_else(|_| "nats://localhost:4222".to_string()),
            ),
            BusType::InMemory => None,
        };

        Ok(Self {
            database_url: env::var("DATABASE_URL")?,
            bus_type,
            nats_url,

            host: env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: env::var("PORT")
                .unwrap_or_else(|_| "8089".to_string())
                .parse()?,

            webhook_timeout_secs: env::var("WEBHOOK_TIMEOUT_SECS")
                .unwrap_or_else(|_| "10".to_string())
                .parse()?,
            webhook_max_attempts: env::var("WEBHOOK_MAX_ATTEMPTS")
                .unwrap_or_else(|_| "5".to_string())
                .parse()?,
            webhook_initial_backoff_secs: env::var("WEBHOOK_INITIAL_BACKOFF_SECS")
                .unwrap_or_else(|_| "30".to_string())
                .parse()?,
            webhook_max_backoff_secs: env::var("WEBHOOK_MAX_BACKOFF_SECS")
                .unwrap_or_else(|_| "3600".to_string())
                .parse()?,

            overdue_sweep_secs: env::var("OVERDUE_SWEEP_SECS")
                .unwrap_or_else(|_| "60".to_string())
                .parse()?,
            archive_sweep_secs: env::var("ARCHIVE_SWEEP_SECS")
                .unwrap_or_else(|_| "3600".to_string())
                .parse()?,
            archive_retention_days: env::var("ARCHIVE_RETENTION_DAYS")
                .unwrap_or_else(|_| "90".to_string())
                .parse()?,
        })
    }

    pub fn delivery_config(&self) -> DeliveryConfig {
        DeliveryConfig {
            request_timeout: Duration::from_secs(self.webhook_timeout_secs),
            retry: RetryConfig {
                max_attempts: self.webhook_max_attempts,
                initial_backoff: Duration::from_secs(self.webhook_initial_backoff_secs),
                max_backoff: Duration::from_secs(self.webhook_max_backoff_secs),
            },
        }
    }
}
