//! Gateway client entry point
//!
//! Connects to the gateway with credentials from the environment and logs
//! lifecycle events until interrupted.
//!
//! ```bash
//! GATEWAY_TOKEN=... cargo run -p gateway-client
//! ```

use gateway_client::{GatewayClient, GatewayEvent, HandlerError, SocketHandler};
use gateway_common::{try_init_tracing, GatewayConfig};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() {
    // Initialize tracing
    if let Err(e) = try_init_tracing() {
        eprintln!("Warning: Failed to initialize tracing: {e}");
    }

    if let Err(e) = run().await {
        error!(error = %e, "Gateway client failed");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    info!("Starting gateway client...");

    let config = GatewayConfig::from_env().map_err(|e| {
        error!(error = %e, "Failed to load configuration");
        e
    })?;

    info!(
        url = %config.gateway_url,
        compression = ?config.compression,
        shard = ?config.shard,
        "Configuration loaded"
    );

    let client = GatewayClient::builder(config).build();

    // Without entity caches there is nothing to load after READY, so the
    // READY handler can signal completion immediately.
    let ready_signal = client.clone();
    let ready_handler: Arc<dyn SocketHandler> =
        Arc::new(move |_sequence: u64, _frame: &Value| -> Result<(), HandlerError> {
            ready_signal.ready();
            Ok(())
        });
    client.register_handler("READY", ready_handler);

    let mut events = client.subscribe();
    client.login()?;

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(GatewayEvent::Shutdown { code, .. }) => {
                    info!(code, "gateway shut down");
                    break;
                }
                Ok(event) => info!(?event, "lifecycle event"),
                Err(RecvError::Lagged(missed)) => {
                    warn!(missed, "lifecycle event stream lagged");
                }
                Err(RecvError::Closed) => break,
            },
            _ = tokio::signal::ctrl_c() => {
                info!("interrupt received, shutting down");
                client.shutdown().await;
            }
        }
    }

    Ok(())
}
