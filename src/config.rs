use std::env;

use anyhow::{Context, Result};
use dotenvy::dotenv;

use crate::engine::EngineSettings;
use crate::models::BulkMode;
use crate::pricing;

#[derive(Debug, Clone)]
pub struct Config {
    pub database: DatabaseConfig,
    pub booking: BookingConfig,
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

#[derive(Debug, Clone)]
pub struct BookingConfig {
    pub timezone: String,
    pub bulk_default_mode: BulkMode,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenv().ok();

        let url = env::var("DATABASE_URL").context("DATABASE_URL must be set")?;
        let max_connections = match env::var("DATABASE_MAX_CONNECTIONS") {
            Ok(val) => val
                .parse()
                .context("Failed to parse DATABASE_MAX_CONNECTIONS")?,
            Err(_) => 10,
        };

        let timezone = env::var("BOOKING_TIMEZONE").unwrap_or_else(|_| "Asia/Jakarta".to_string());
        let bulk_default_mode = match env::var("BULK_DEFAULT_MODE") {
            Ok(val) => val
                .parse::<BulkMode>()
                .map_err(anyhow::Error::msg)
                .context("Failed to parse BULK_DEFAULT_MODE")?,
            Err(_) => BulkMode::Week,
        };

        Ok(Config {
            database: DatabaseConfig {
                url,
                max_connections,
            },
            booking: BookingConfig {
                timezone,
                bulk_default_mode,
            },
        })
    }

    pub fn engine_settings(&self) -> EngineSettings {
        EngineSettings {
            default_timezone: self.booking.timezone.clone(),
            price_window: pricing::price_update_window(),
            default_bulk_mode: self.booking.bulk_default_mode,
        }
    }
}
