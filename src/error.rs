use chrono::{DateTime, NaiveDate, Utc};
use thiserror::Error;

use crate::models::{BookingId, BookingStatus, UserId};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Corrupt row: {0}")]
    Corrupt(String),
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("{hour:02}:00 on {date} is not open in the streamer's schedule")]
    ScheduleUnavailable { date: NaiveDate, hour: u8 },

    #[error("Requested time overlaps an existing booking")]
    OverlapDetected,

    #[error("{hour:02}:00 does not extend the selected block")]
    NonContiguousSelection { hour: u8 },

    #[error("Every booked block must be at least 2 hours long")]
    BelowMinimumDuration,

    #[error("A 2-hour block starting at {hour:02}:00 is not available")]
    InsufficientAvailability { hour: u8 },

    #[error("State changed concurrently: {0}")]
    StatusConflict(String),

    #[error("User is not allowed to perform this action")]
    Unauthorized,

    #[error("Invalid stream link: {0}")]
    InvalidStreamLink(String),

    #[error("Items have not been received yet")]
    ItemsNotReceived,

    #[error("Price can be changed again at {retry_at}")]
    RateLimited { retry_at: DateTime<Utc> },

    #[error("Price must be between {min} and {max}")]
    PriceBound { min: i64, max: i64 },

    #[error("Invalid booking range: {0}")]
    InvalidRange(String),

    #[error("Streamer {0} has not set an hourly rate")]
    RateNotSet(UserId),

    #[error("Booking {0} not found")]
    NotFound(BookingId),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl EngineError {
    pub fn status_conflict(booking_id: BookingId, expected: BookingStatus) -> Self {
        EngineError::StatusConflict(format!("booking {} is no longer {}", booking_id, expected))
    }

    /// Всё, кроме ошибок хранилища, пользователь может исправить и повторить.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, EngineError::Store(_))
    }
}

pub type EngineResult<T> = Result<T, EngineError>;
