//! ==============================================================================
//! service.rs - ingest & query service
//! ==============================================================================
//!
//! purpose:
//!     validates and persists incoming readings, answers "latest" and
//!     "history" queries, and publishes every stored reading to the viewers.
//!
//! ordering:
//!     within one ingest the store write happens-before the publish.
//!     concurrent ingests are not ordered; timestamp is the only ordering signal.
//!
//! relationships:
//!     - uses: store.rs (blocking calls run on the tokio blocking pool)
//!     - uses: broadcast.rs (sensorUpdate fan-out)
//!     - used by: http.rs, mock.rs
//!
//! ==============================================================================

use crate::broadcast::{ViewerRegistry, ViewerSession};
use crate::domain::{Event, ReadingPayload, SensorReading};
use crate::error::{ApiError, StoreError};
use crate::store::ReadingStore;

use chrono::{DateTime, Duration, Utc};
use serde_json::Value;
use std::sync::Arc;

pub const DEFAULT_HISTORY_HOURS: u32 = 24;

/// result of a latest-reading query.
/// the fallback is a distinct state so callers can tell "no data yet" apart.
#[derive(Clone, Debug, PartialEq)]
pub enum Latest {
    Stored(SensorReading),
    Fallback(SensorReading),
}

impl Latest {
    pub fn reading(&self) -> &SensorReading {
        match self {
            Self::Stored(r) | Self::Fallback(r) => r,
        }
    }

    pub fn into_reading(self) -> SensorReading {
        match self {
            Self::Stored(r) | Self::Fallback(r) => r,
        }
    }

    pub fn is_fallback(&self) -> bool {
        matches!(self, Self::Fallback(_))
    }

    /// value of the `x-reading-source` response header
    pub fn source(&self) -> &'static str {
        match self {
            Self::Stored(_) => "stored",
            Self::Fallback(_) => "fallback",
        }
    }
}

/// parse the `hours` query parameter.
/// missing, non-numeric, zero or negative values fall back to the default.
pub fn history_window(raw: Option<&str>) -> u32 {
    raw.and_then(|h| h.trim().parse::<u32>().ok())
        .filter(|h| *h > 0)
        .unwrap_or(DEFAULT_HISTORY_HOURS)
}

#[derive(Clone)]
pub struct SensorService {
    store: Arc<dyn ReadingStore>,
    viewers: Arc<ViewerRegistry>,
}

impl SensorService {
    pub fn new(store: Arc<dyn ReadingStore>, viewers: Arc<ViewerRegistry>) -> Self {
        Self { store, viewers }
    }

    pub fn viewers(&self) -> &Arc<ViewerRegistry> {
        &self.viewers
    }

    pub async fn latest(&self) -> Result<Latest, StoreError> {
        let stored = self.blocking(|store| store.latest()).await?;
        Ok(match stored {
            Some(reading) => Latest::Stored(reading),
            None => Latest::Fallback(SensorReading::fallback(Utc::now())),
        })
    }

    /// readings from the last `hours` hours, ascending by timestamp.
    /// a window reaching past the representable range means "everything".
    pub async fn history(&self, hours: u32) -> Result<Vec<SensorReading>, StoreError> {
        let from = Duration::try_hours(i64::from(hours))
            .and_then(|window| Utc::now().checked_sub_signed(window))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        self.blocking(move |store| store.since(from)).await
    }

    /// validate a raw json body, persist it and publish it
    pub async fn ingest(&self, body: &Value) -> Result<SensorReading, ApiError> {
        let payload = ReadingPayload::from_json(body).map_err(ApiError::Validation)?;
        Ok(self.record(payload).await?)
    }

    /// persist an already validated payload and publish the stored record
    pub async fn record(&self, payload: ReadingPayload) -> Result<SensorReading, StoreError> {
        let reading = payload.into_reading(Utc::now());
        let stored = self.blocking(move |store| store.append(reading)).await?;

        let delivered = self.viewers.publish(Event::SensorUpdate(stored.clone()));
        tracing::debug!(
            temperature = stored.temperature,
            ph = stored.ph,
            ec = stored.ec,
            water_level = stored.water_level,
            delivered,
            "reading stored"
        );
        Ok(stored)
    }

    /// register a viewer and prepare its connection greeting.
    /// registration comes first so nothing published meanwhile is missed;
    /// the session drops the queued copy of the greeting reading.
    pub async fn connect_viewer(&self) -> ViewerSession {
        let subscription = self.viewers.subscribe();
        let greeting = match self.latest().await {
            Ok(latest) => Some(Event::SensorUpdate(latest.into_reading())),
            Err(e) => {
                tracing::warn!(viewer = subscription.id(), error = %e, "could not load greeting reading");
                None
            }
        };
        ViewerSession::new(subscription, greeting)
    }

    async fn blocking<T, F>(&self, op: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&dyn ReadingStore) -> Result<T, StoreError> + Send + 'static,
    {
        let store = Arc::clone(&self.store);
        tokio::task::spawn_blocking(move || op(store.as_ref()))
            .await
            .map_err(|e| StoreError::Task(e.to_string()))?
    }
}
