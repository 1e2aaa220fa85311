//! ==============================================================================
//! relay.rs - control relay
//! ==============================================================================
//!
//! purpose:
//!     forwards operator actions (pump, lights, dosing, ...) to the actuator
//!     node and echoes them to every connected viewer as controlUpdate.
//!
//! contract:
//!     - any action string is accepted; the actuator owns the namespace
//!     - forwarding is fire-and-forget. actuator failures are logged, never
//!       reported back to the operator
//!     - the relay itself always succeeds
//!
//! ==============================================================================

use crate::broadcast::ViewerRegistry;
use crate::domain::{ControlCommand, ControlValue, Event};

use anyhow::{Context, Result};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;

/// the external actuator collaborator
pub trait ActuatorLink: Send + Sync {
    /// hand a command to the actuator. must not block and must not fail.
    fn send_actuator_command(&self, command: &ControlCommand);
}

/// default link: no hardware attached, the command is only logged
pub struct LogActuator;

impl ActuatorLink for LogActuator {
    fn send_actuator_command(&self, command: &ControlCommand) {
        tracing::info!(action = %command.action, value = %command.value, "control command");
    }
}

/// posts commands as json to an actuator node (e.g. the ESP32 controller)
pub struct HttpActuator {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpActuator {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build actuator http client")?;
        Ok(Self { client, endpoint: endpoint.into() })
    }
}

async fn post_command(client: reqwest::Client, endpoint: String, command: ControlCommand) -> Result<()> {
    client
        .post(&endpoint)
        .json(&command)
        .send()
        .await
        .with_context(|| format!("actuator unreachable at {}", endpoint))?
        .error_for_status()
        .context("actuator rejected command")?;
    Ok(())
}

impl ActuatorLink for HttpActuator {
    fn send_actuator_command(&self, command: &ControlCommand) {
        let client = self.client.clone();
        let endpoint = self.endpoint.clone();
        let command = command.clone();
        tokio::spawn(async move {
            let action = command.action.clone();
            match post_command(client, endpoint, command).await {
                Ok(()) => tracing::debug!(%action, "actuator acknowledged command"),
                Err(e) => tracing::warn!(%action, error = ?e, "actuator command failed"),
            }
        });
    }
}

#[derive(Clone)]
pub struct ControlRelay {
    actuator: Arc<dyn ActuatorLink>,
    viewers: Arc<ViewerRegistry>,
}

impl ControlRelay {
    pub fn new(actuator: Arc<dyn ActuatorLink>, viewers: Arc<ViewerRegistry>) -> Self {
        Self { actuator, viewers }
    }

    pub fn relay(&self, action: impl Into<String>, value: ControlValue) -> ControlCommand {
        let command = ControlCommand { action: action.into(), value, timestamp: Utc::now() };
        self.actuator.send_actuator_command(&command);
        let delivered = self.viewers.publish(Event::ControlUpdate(command.clone()));
        tracing::debug!(action = %command.action, delivered, "control update broadcast");
        command
    }
}
