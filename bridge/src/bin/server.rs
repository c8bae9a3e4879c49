use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info, warn};

use toolhub_bridge::{bind, closed, router, serve, shutdown_signal, AppState};
use toolhub_core::telemetry::init_tracing;
use toolhub_core::{Aggregator, AggregatorOptions, BridgeConfig, Settings};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // A missing .env is normal
    let _ = dotenvy::dotenv();
    init_tracing();

    // Listen before any backend is spawned, so a signal during startup still
    // reaches the teardown below
    let (closing_tx, closing_rx) = watch::channel(false);
    let signal = shutdown_signal();
    tokio::spawn(async move {
        signal.await;
        closing_tx.send_replace(true);
    });

    let settings = Settings::from_env();
    let config = BridgeConfig::load(&settings.config_path).map_err(|e| {
        error!("Cannot load configuration: {}", e);
        e
    })?;
    info!(
        config = %settings.config_path.display(),
        servers = config.servers.len(),
        "Configuration loaded"
    );

    let aggregator = Arc::new(
        Aggregator::start_until(
            &config,
            AggregatorOptions::from(&settings),
            closed(closing_rx.clone()),
        )
        .await,
    );

    let served = if *closing_rx.borrow() {
        warn!("Shutdown requested during startup, not serving");
        Ok(())
    } else {
        let state = AppState::new(Arc::clone(&aggregator), settings.sse_heartbeat, closing_rx.clone());
        let addr = settings.listen_addr();
        async {
            let listener = bind(&addr).await?;
            serve(listener, router(state), closed(closing_rx)).await
        }
        .await
    };

    // Backends are torn down whether or not the listener came up cleanly
    aggregator.shutdown().await;

    if let Err(e) = &served {
        error!("Front door error: {}", e);
    }
    served.map_err(Into::into)
}
