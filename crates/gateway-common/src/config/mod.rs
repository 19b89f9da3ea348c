//! Gateway client configuration

mod gateway_config;

pub use gateway_config::{Compression, ConfigError, GatewayConfig};
