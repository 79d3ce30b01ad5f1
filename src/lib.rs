pub mod audit;
pub mod config;
pub mod crypto;
pub mod db;
pub mod digest;
pub mod error;
pub mod extractor;
pub mod gateway;
pub mod limiter;
pub mod payload;
pub mod routes;

pub use config::{ConfigError, ConfigSummary, GatewayConfig};
pub use gateway::{DecryptOutcome, DecryptRequest, DecryptResponse, Gateway, GatewayError};
