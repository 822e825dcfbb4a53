//! Warning sinks.
//!
//! The pipeline hands every frame's decision to exactly one sink. Sinks own whatever
//! happens downstream of the decision (a console warning, a stop command to a motor
//! controller over MQTT); the proximity engine never acts on its own output.

mod mqtt;

use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Result};

use crate::proximity::ProximityDecision;

pub use mqtt::{MqttSettings, MqttSink, StopPayload};

pub trait WarningSink: Send {
    fn name(&self) -> &'static str;

    /// Called once per processed frame, whether or not the object is too close.
    fn signal(&mut self, decision: &ProximityDecision) -> Result<()>;
}

/// Logs a warning for every frame where the object is too close.
#[derive(Debug, Default)]
pub struct LogSink;

impl WarningSink for LogSink {
    fn name(&self) -> &'static str {
        "log"
    }

    fn signal(&mut self, decision: &ProximityDecision) -> Result<()> {
        if decision.too_close {
            log::warn!(
                "Object is too close! Stop the vehicle. distance={:.2}m centroid={}",
                decision.distance_or_zero(),
                decision
                    .centroid
                    .map(|c| c.to_string())
                    .unwrap_or_else(|| "-".to_string())
            );
        }
        Ok(())
    }
}

/// Records every decision. Clones share the same record.
#[derive(Clone, Debug, Default)]
pub struct MemorySink {
    signals: Arc<Mutex<Vec<ProximityDecision>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn signals(&self) -> Result<Vec<ProximityDecision>> {
        let guard = self
            .signals
            .lock()
            .map_err(|_| anyhow!("memory sink lock poisoned"))?;
        Ok(guard.clone())
    }

    pub fn stop_count(&self) -> Result<usize> {
        Ok(self.signals()?.iter().filter(|d| d.too_close).count())
    }
}

impl WarningSink for MemorySink {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn signal(&mut self, decision: &ProximityDecision) -> Result<()> {
        self.signals
            .lock()
            .map_err(|_| anyhow!("memory sink lock poisoned"))?
            .push(*decision);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proximity::Centroid;

    #[test]
    fn memory_sink_clones_share_records() -> Result<()> {
        let sink = MemorySink::new();
        let mut writer = sink.clone();
        writer.signal(&ProximityDecision::NOTHING_DETECTED)?;
        writer.signal(&ProximityDecision {
            centroid: Some(Centroid::new(1, 2)),
            distance_m: Some(0.4),
            too_close: true,
        })?;
        assert_eq!(sink.signals()?.len(), 2);
        assert_eq!(sink.stop_count()?, 1);
        Ok(())
    }

    #[test]
    fn log_sink_accepts_every_decision() -> Result<()> {
        let mut sink = LogSink;
        sink.signal(&ProximityDecision::NOTHING_DETECTED)?;
        Ok(())
    }
}
