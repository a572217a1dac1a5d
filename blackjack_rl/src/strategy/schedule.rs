use crate::{BlackjackError, Result};

/// Exploration rate that decays geometrically per training episode and
/// never goes below `end`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EpsilonSchedule {
    pub start: f64,
    pub end: f64,
    pub decay: f64,
}

impl Default for EpsilonSchedule {
    fn default() -> Self {
        Self {
            start: 0.1,
            end: 0.01,
            decay: 0.9999,
        }
    }
}

impl EpsilonSchedule {
    /// A schedule that keeps epsilon at `epsilon`.
    pub fn constant(epsilon: f64) -> Self {
        Self {
            start: epsilon,
            end: epsilon,
            decay: 1.0,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.start) || !(0.0..=1.0).contains(&self.end) {
            return Err(BlackjackError::InvalidConfig(format!(
                "epsilon bounds must be in [0, 1], got {} and {}",
                self.start, self.end
            )));
        }
        if self.end > self.start {
            return Err(BlackjackError::InvalidConfig(String::from(
                "epsilon_end must not exceed epsilon_start",
            )));
        }
        if !(self.decay > 0.0 && self.decay <= 1.0) {
            return Err(BlackjackError::InvalidConfig(format!(
                "epsilon_decay must be in (0, 1], got {}",
                self.decay
            )));
        }
        Ok(())
    }

    pub fn value(&self, episode: u64) -> f64 {
        let exponent = episode.min(i32::MAX as u64) as i32;
        (self.start * self.decay.powi(exponent)).max(self.end)
    }
}
