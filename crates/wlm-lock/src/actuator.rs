//! Correction actuators.
//!
//! The lock client only knows actuators through the [`Actuator`] trait.
//! [`SimulatedActuator`] integrates corrections per line inside a
//! symmetric range, which is what a piezo or current setpoint does.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::debug;

use wlm_core::LineName;

/// Errors reported by an actuator.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ActuatorError {
    #[error("Correction rejected: {0}")]
    Rejected(String),

    #[error("Actuator unreachable: {0}")]
    Unreachable(String),

    #[error("Actuator did not answer within {0:?}")]
    Timeout(std::time::Duration),
}

/// Applies frequency corrections to a laser line.
#[async_trait]
pub trait Actuator: Send + Sync {
    /// Applies one correction step to `line`.
    async fn apply(&self, line: &LineName, correction: f64) -> Result<(), ActuatorError>;
}

/// In-memory actuator that accumulates corrections per line.
///
/// Rejects any correction that would move a line's output outside
/// `[-range, range]`; the output is left unchanged in that case.
#[derive(Debug, Clone)]
pub struct SimulatedActuator {
    range: f64,
    outputs: Arc<Mutex<HashMap<LineName, f64>>>,
}

impl SimulatedActuator {
    /// Creates an actuator with all outputs at zero.
    pub fn new(range: f64) -> Self {
        Self {
            range: range.abs(),
            outputs: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Current output of a line.
    pub async fn output(&self, line: &LineName) -> f64 {
        self.outputs.lock().await.get(line).copied().unwrap_or(0.0)
    }
}

#[async_trait]
impl Actuator for SimulatedActuator {
    async fn apply(&self, line: &LineName, correction: f64) -> Result<(), ActuatorError> {
        if !correction.is_finite() {
            return Err(ActuatorError::Rejected(format!(
                "correction {correction} is not finite"
            )));
        }

        let mut outputs = self.outputs.lock().await;
        let current = outputs.get(line).copied().unwrap_or(0.0);
        let next = current + correction;
        if next.abs() > self.range {
            return Err(ActuatorError::Rejected(format!(
                "output {next:.4} outside ±{}",
                self.range
            )));
        }

        outputs.insert(line.clone(), next);
        debug!(line = %line, correction, output = next, "Simulated actuator moved");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line(name: &str) -> LineName {
        LineName::new(name).unwrap()
    }

    #[tokio::test]
    async fn test_accumulates_per_line() {
        let actuator = SimulatedActuator::new(1.0);
        actuator.apply(&line("cooling"), 0.25).await.unwrap();
        actuator.apply(&line("cooling"), 0.25).await.unwrap();
        actuator.apply(&line("clock"), -0.1).await.unwrap();

        assert!((actuator.output(&line("cooling")).await - 0.5).abs() < 1e-12);
        assert!((actuator.output(&line("clock")).await + 0.1).abs() < 1e-12);
        assert_eq!(actuator.output(&line("repumper")).await, 0.0);
    }

    #[tokio::test]
    async fn test_rejects_out_of_range() {
        let actuator = SimulatedActuator::new(0.5);
        actuator.apply(&line("cooling"), 0.4).await.unwrap();

        let err = actuator.apply(&line("cooling"), 0.2).await.unwrap_err();
        assert!(matches!(err, ActuatorError::Rejected(_)));
        // Output unchanged after rejection
        assert!((actuator.output(&line("cooling")).await - 0.4).abs() < 1e-12);

        // Moving back into range still works
        actuator.apply(&line("cooling"), -0.3).await.unwrap();
    }

    #[tokio::test]
    async fn test_rejects_non_finite() {
        let actuator = SimulatedActuator::new(1.0);
        assert!(actuator.apply(&line("cooling"), f64::NAN).await.is_err());
    }
}
