pub mod availability;
pub mod bulk;
pub mod clock;
pub mod config;
pub mod db;
pub mod engine;
pub mod error;
pub mod handlers;
pub mod lifecycle;
pub mod models;
pub mod notify;
pub mod pricing;
pub mod selection;
pub mod store;

pub use engine::{BookingRequest, Engine, EngineSettings, Voucher};
pub use error::{EngineError, EngineResult, StoreError};
pub use lifecycle::Event;
