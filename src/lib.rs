//! ==============================================================================
//! hydro-hub - hydroponics monitoring hub
//! ==============================================================================
//!
//! purpose:
//!     stores sensor readings (temperature, pH, EC, water level), serves the
//!     latest reading and a time-windowed history, relays operator commands
//!     to the actuators, and pushes every reading and command to all
//!     connected dashboards.
//!
//! architecture:
//!
//! ```text
//!     sensor ──POST──> service ──append──> store
//!                         │
//!                         └──publish──┐
//!                                     ▼
//!     operator ──POST──> relay ──> viewer registry ──ws──> dashboards
//!                         │
//!                         └──> actuator link (log / http)
//!
//! ```
//! ==============================================================================

pub mod broadcast;
pub mod config;
pub mod domain;
pub mod error;
pub mod http;
pub mod mock;
pub mod relay;
pub mod service;
pub mod store;
pub mod viewer;

pub use broadcast::{Subscription, ViewerRegistry, ViewerSession};
pub use config::HubConfig;
pub use domain::{ControlCommand, ControlValue, Event, ReadingPayload, SensorReading};
pub use error::{ApiError, StoreError};
pub use http::{build_router, AllowedOrigins, AppState};
pub use relay::{ActuatorLink, ControlRelay, HttpActuator, LogActuator};
pub use service::{Latest, SensorService};
pub use store::{open_store, ReadingStore};

use std::sync::Arc;
use std::time::Duration;

/// pick the actuator link the configuration asks for
pub fn build_actuator(config: &config::ActuatorConfig) -> anyhow::Result<Arc<dyn ActuatorLink>> {
    let link: Arc<dyn ActuatorLink> = match &config.endpoint {
        Some(endpoint) => Arc::new(HttpActuator::new(
            endpoint.clone(),
            Duration::from_millis(config.timeout_ms),
        )?),
        None => Arc::new(LogActuator),
    };
    Ok(link)
}

/// wire store, registry, service and relay into the shared http state
pub fn build_state(
    config: &HubConfig,
    store: Arc<dyn ReadingStore>,
    actuator: Arc<dyn ActuatorLink>,
) -> AppState {
    let viewers = Arc::new(ViewerRegistry::new(config.broadcast.viewer_queue));
    AppState {
        sensors: SensorService::new(store, Arc::clone(&viewers)),
        relay: ControlRelay::new(actuator, viewers),
        origins: AllowedOrigins::from_config(&config.server.allowed_origins),
    }
}
