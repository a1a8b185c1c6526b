//! Per-line lock state machine.
//!
//! A [`LockController`] compares the target of one laser line with the
//! latest measured frequency and decides whether to issue a correction.
//! It is a plain synchronous type; the line task owns it, feeds it new
//! measurements and operator commands, and performs the actuator call.
//!
//! # Correction law
//!
//! With `error = target - measured` in MHz:
//!
//! - `|error| <= deadband_mhz`: hold, the line counts as holding lock
//! - `|error| > capture_range_mhz`: hold, the reading is not trusted
//! - otherwise: `correction = clamp(gain_per_mhz * error, -max_step, max_step)`
//!
//! Within the capture range the correction is monotonic in `error` and
//! never exceeds `max_step`. Past it the correction drops back to none, so
//! monotonicity does not extend across the capture boundary.
//!
//! # Safety invariant
//!
//! No decision ever carries a correction while `measured` is absent or the
//! line is unlocked.

use serde::{Deserialize, Serialize};

use wlm_core::{Frequency, LineName};

/// Operator-selected lock mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LockMode {
    Unlocked,
    Locked,
}

impl std::fmt::Display for LockMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unlocked => write!(f, "Unlocked"),
            Self::Locked => write!(f, "Locked"),
        }
    }
}

/// Tunable parameters of the correction law.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CorrectionPolicy {
    /// Actuator units per MHz of error
    pub gain_per_mhz: f64,

    /// Error magnitude (MHz) below which nothing is sent
    pub deadband_mhz: f64,

    /// Error magnitude (MHz) above which the reading is ignored
    pub capture_range_mhz: f64,

    /// Largest correction sent in one step (actuator units)
    pub max_step: f64,
}

impl Default for CorrectionPolicy {
    fn default() -> Self {
        Self {
            gain_per_mhz: 0.0002,
            deadband_mhz: 1.0,
            capture_range_mhz: 10_000.0,
            max_step: 0.5,
        }
    }
}

impl CorrectionPolicy {
    /// Checks that every parameter is finite and usable.
    pub fn validate(&self) -> Result<(), String> {
        let fields = [
            ("gain_per_mhz", self.gain_per_mhz),
            ("capture_range_mhz", self.capture_range_mhz),
            ("max_step", self.max_step),
        ];
        for (name, value) in fields {
            if !value.is_finite() || value <= 0.0 {
                return Err(format!("{name} must be finite and positive, got {value}"));
            }
        }
        if !self.deadband_mhz.is_finite() || self.deadband_mhz < 0.0 {
            return Err(format!(
                "deadband_mhz must be finite and non-negative, got {}",
                self.deadband_mhz
            ));
        }
        if self.deadband_mhz >= self.capture_range_mhz {
            return Err("deadband_mhz must be smaller than capture_range_mhz".to_string());
        }
        Ok(())
    }

    /// Maps an error (MHz) to a decision, ignoring lock mode.
    pub fn decide(&self, error_mhz: f64) -> Decision {
        let magnitude = error_mhz.abs();
        if magnitude <= self.deadband_mhz {
            Decision::Hold { error_mhz }
        } else if magnitude > self.capture_range_mhz || !error_mhz.is_finite() {
            Decision::OutOfCapture { error_mhz }
        } else {
            let correction = (self.gain_per_mhz * error_mhz).clamp(-self.max_step, self.max_step);
            Decision::Correct {
                error_mhz,
                correction,
            }
        }
    }
}

/// Result of evaluating a line.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Decision {
    /// The line is unlocked
    Unlocked,

    /// No measurement to act on
    NoMeasurement,

    /// Error within the deadband
    Hold { error_mhz: f64 },

    /// Error outside the capture range; nothing is sent
    OutOfCapture { error_mhz: f64 },

    /// Send `correction` to the actuator
    Correct { error_mhz: f64, correction: f64 },
}

impl Decision {
    /// The correction to apply, if any.
    pub fn correction(&self) -> Option<f64> {
        match self {
            Self::Correct { correction, .. } => Some(*correction),
            _ => None,
        }
    }
}

/// Observable lock state of one line.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LockState {
    /// Operator-set target
    pub target: Frequency,

    /// Latest measured frequency; absent until the first value arrives
    pub measured: Option<Frequency>,

    /// Operator switch; true means `Locked`
    pub enabled: bool,

    /// Enabled and the last evaluated error was within the deadband
    pub locked: bool,
}

/// Status of a line as published to observers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineStatus {
    pub line: LineName,
    pub mode: LockMode,
    pub state: LockState,

    /// `target - measured` in MHz, when measured is present
    pub error_mhz: Option<f64>,

    /// Last correction sent to the actuator
    pub last_correction: Option<f64>,

    /// Last actuator failure, cleared by the next success
    pub last_fault: Option<String>,

    /// Corrections the actuator accepted
    pub corrections_applied: u64,
}

/// Lock state machine for one line.
#[derive(Debug, Clone)]
pub struct LockController {
    line: LineName,
    policy: CorrectionPolicy,
    state: LockState,
    last_correction: Option<f64>,
    last_fault: Option<String>,
    corrections_applied: u64,
}

impl LockController {
    /// Creates an unlocked controller with no measurement.
    pub fn new(line: LineName, target: Frequency, policy: CorrectionPolicy) -> Self {
        Self {
            line,
            policy,
            state: LockState {
                target,
                measured: None,
                enabled: false,
                locked: false,
            },
            last_correction: None,
            last_fault: None,
            corrections_applied: 0,
        }
    }

    pub fn line(&self) -> &LineName {
        &self.line
    }

    pub fn policy(&self) -> &CorrectionPolicy {
        &self.policy
    }

    pub fn state(&self) -> &LockState {
        &self.state
    }

    /// Current lock mode.
    pub fn mode(&self) -> LockMode {
        if self.state.enabled {
            LockMode::Locked
        } else {
            LockMode::Unlocked
        }
    }

    /// `target - measured` in MHz.
    pub fn error_mhz(&self) -> Option<f64> {
        self.state
            .measured
            .map(|measured| self.state.target.offset_mhz(measured))
    }

    /// Operator toggle between `Unlocked` and `Locked`.
    pub fn set_enabled(&mut self, enabled: bool) {
        self.state.enabled = enabled;
        if !enabled {
            self.state.locked = false;
        }
    }

    /// Changes the target. Takes effect at the next evaluation.
    pub fn set_target(&mut self, target: Frequency) {
        self.state.target = target;
        self.state.locked = false;
    }

    /// Forgets the measurement and any fault. Lock mode is kept.
    pub fn reset(&mut self) {
        self.state.measured = None;
        self.state.locked = false;
        self.last_correction = None;
        self.last_fault = None;
    }

    /// Records a new measurement and evaluates the line.
    ///
    /// `None` means the line has no value in this record; the previous
    /// measurement is kept but nothing is sent.
    pub fn observe(&mut self, measured: Option<Frequency>) -> Decision {
        match measured {
            Some(value) => {
                self.state.measured = Some(value);
                self.evaluate()
            }
            None => Decision::NoMeasurement,
        }
    }

    /// Evaluates the line against the stored measurement.
    pub fn evaluate(&mut self) -> Decision {
        if !self.state.enabled {
            return Decision::Unlocked;
        }
        let Some(error_mhz) = self.error_mhz() else {
            return Decision::NoMeasurement;
        };

        let decision = self.policy.decide(error_mhz);
        self.state.locked = matches!(decision, Decision::Hold { .. });
        decision
    }

    /// Records the outcome of an actuator call.
    pub fn record_result(&mut self, correction: f64, result: Result<(), String>) {
        match result {
            Ok(()) => {
                self.last_correction = Some(correction);
                self.last_fault = None;
                self.corrections_applied += 1;
            }
            Err(reason) => self.last_fault = Some(reason),
        }
    }

    /// Snapshot of the line for observers.
    pub fn status(&self) -> LineStatus {
        LineStatus {
            line: self.line.clone(),
            mode: self.mode(),
            state: self.state,
            error_mhz: self.error_mhz(),
            last_correction: self.last_correction,
            last_fault: self.last_fault.clone(),
            corrections_applied: self.corrections_applied,
        }
    }
}
