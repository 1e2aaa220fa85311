//! ==============================================================================
//! main.rs - hydroponics hub entry point
//! ==============================================================================
//!
//! purpose:
//!     boots the hub: configuration, logging, reading store, http + websocket
//!     server, and (in development) the mock reading feeder.
//!
//! failure policy:
//!     a store that cannot be opened at startup terminates the process.
//!     nothing is retried. after startup every error is per-request.
//!
//! ==============================================================================

use anyhow::{Context, Result};
use hydro_hub::config::{HubConfig, LogFormat, LoggingConfig};
use hydro_hub::{build_actuator, build_router, build_state, mock, open_store};
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

fn init_tracing(logging: &LoggingConfig) {
    // RUST_LOG wins over the configured level
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&logging.level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    match logging.format {
        LogFormat::Json => tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init(),
        LogFormat::Text => tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init(),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // step 1: load configuration (file, then environment)
    let config = HubConfig::load_or_default()?;

    // step 2: logging
    init_tracing(&config.logging);
    tracing::info!("hydroponics hub starting");
    config.log_summary();

    // step 3: open the reading store, fail fast
    let store = match open_store(&config.store.url) {
        Ok(store) => store,
        Err(e) => {
            tracing::error!(url = %config.store.url, error = %e, "could not open reading store");
            return Err(e).context("could not open reading store");
        }
    };
    tracing::info!(url = %config.store.url, "reading store ready");

    // step 4: wire services
    let actuator = build_actuator(&config.actuator)?;
    let state = build_state(&config, store, actuator);

    // step 5: development feeder
    if config.mock.enabled {
        mock::spawn_feeder(
            state.sensors.clone(),
            Duration::from_secs(config.mock.interval_seconds.max(1)),
        );
    }

    // step 6: serve
    let app = build_router(state, &config.server);
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("could not bind {}", addr))?;
    tracing::info!(%addr, "hub listening");

    axum::serve(listener, app).await?;
    Ok(())
}
