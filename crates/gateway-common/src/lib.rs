//! # gateway-common
//!
//! Configuration loading and telemetry setup for the gateway client.

pub mod config;
pub mod telemetry;

pub use config::{Compression, ConfigError, GatewayConfig};
pub use telemetry::{init_tracing, try_init_tracing, TracingConfig, TracingError};
