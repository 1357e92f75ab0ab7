pub mod gateway_config;

pub use gateway_config::{GatewayConfig, LoggingConfig};
