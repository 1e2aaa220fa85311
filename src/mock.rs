//! development reading generator.
//!
//! feeds smooth synthetic readings through the normal ingest path so a
//! dashboard has something to draw without sensors attached.

use crate::domain::{ReadingPayload, FALLBACK_EC, FALLBACK_PH, FALLBACK_TEMPERATURE, FALLBACK_WATER_LEVEL};
use crate::service::SensorService;

use std::time::Duration;
use tokio::task::JoinHandle;

/// synthetic reading at phase `t`.
/// each metric oscillates around its fallback value with its own period.
pub fn synthetic_reading(t: f64) -> ReadingPayload {
    ReadingPayload {
        temperature: FALLBACK_TEMPERATURE + t.sin(),
        ph: FALLBACK_PH + 0.2 * (t * 0.7).sin(),
        ec: FALLBACK_EC + 0.2 * (t * 0.5).cos(),
        water_level: (FALLBACK_WATER_LEVEL + 5.0 * (t * 0.3).sin()).clamp(15.0, 100.0),
        timestamp: None,
    }
}

pub fn spawn_feeder(service: SensorService, interval: Duration) -> JoinHandle<()> {
    tracing::warn!(every = ?interval, "mock sensor data enabled (development only)");
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        let mut t: f64 = 0.0;
        loop {
            ticker.tick().await;
            if let Err(e) = service.record(synthetic_reading(t)).await {
                tracing::error!(error = %e, "mock reading could not be stored");
            }
            t += 0.3;
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broadcast::ViewerRegistry;
    use crate::store::MemoryStore;
    use std::sync::Arc;

    #[test]
    fn synthetic_readings_stay_in_band() {
        for step in 0..200 {
            let r = synthetic_reading(step as f64 * 0.3);
            assert!((23.49..=25.51).contains(&r.temperature));
            assert!((5.99..=6.41).contains(&r.ph));
            assert!((1.59..=2.01).contains(&r.ec));
            assert!((15.0..=100.0).contains(&r.water_level));
        }
    }

    #[tokio::test]
    async fn feeder_stores_and_broadcasts() {
        let viewers = Arc::new(ViewerRegistry::default());
        let service = SensorService::new(Arc::new(MemoryStore::default()), viewers.clone());
        let mut sub = viewers.subscribe();

        let feeder = spawn_feeder(service.clone(), Duration::from_secs(5));
        let first = sub.recv().await;
        feeder.abort();

        assert!(matches!(first, Some(crate::domain::Event::SensorUpdate(_))));
        assert!(!service.latest().await.unwrap().is_fallback());
    }
}
