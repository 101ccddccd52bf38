//! Integer time grid
//!
//! Simulation time is represented as integer *tics* grouped into *steps*.
//! A step is the smallest unit the scheduler advances by; the number of tics
//! per step is the *resolution*. All conversions between milliseconds and
//! steps round to the nearest representable tic, so a value that is written
//! as `1.0 ms` with the default grid is exactly 10 steps.

use crate::error::{CoreError, Result};
use crate::ids::Step;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Default number of tics per millisecond
pub const DEFAULT_TICS_PER_MS: u64 = 1000;

/// Default number of tics per step (0.1 ms resolution)
pub const DEFAULT_TICS_PER_STEP: u64 = 100;

/// The time representation of the kernel
///
/// Holds the tic base and the step resolution. Both may only change while
/// the network is empty; the kernel enforces that through its status
/// gateway.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct TimeGrid {
    tics_per_ms: u64,
    tics_per_step: u64,
}

impl Default for TimeGrid {
    fn default() -> Self {
        Self {
            tics_per_ms: DEFAULT_TICS_PER_MS,
            tics_per_step: DEFAULT_TICS_PER_STEP,
        }
    }
}

impl TimeGrid {
    /// Create a time grid with explicit tic base and step resolution
    pub fn new(tics_per_ms: u64, tics_per_step: u64) -> Result<Self> {
        if tics_per_ms == 0 {
            return Err(CoreError::bad_property(
                "tics_per_ms",
                tics_per_ms.to_string(),
                "> 0",
            ));
        }
        if tics_per_step == 0 {
            return Err(CoreError::bad_property(
                "resolution",
                tics_per_step.to_string(),
                "> 0 tics per step",
            ));
        }
        Ok(Self {
            tics_per_ms,
            tics_per_step,
        })
    }

    /// Number of tics per millisecond
    pub fn tics_per_ms(&self) -> u64 {
        self.tics_per_ms
    }

    /// Number of tics per step
    pub fn tics_per_step(&self) -> u64 {
        self.tics_per_step
    }

    /// Step size in milliseconds
    pub fn resolution_ms(&self) -> f64 {
        self.tics_per_step as f64 / self.tics_per_ms as f64
    }

    /// Change the resolution, keeping the tic base
    pub fn set_resolution_ms(&mut self, ms: f64) -> Result<()> {
        if !ms.is_finite() || ms <= 0.0 {
            return Err(CoreError::bad_property(
                "resolution",
                ms.to_string(),
                "> 0.0",
            ));
        }
        let tics = (ms * self.tics_per_ms as f64).round();
        if tics < 1.0 {
            return Err(CoreError::bad_property(
                "resolution",
                ms.to_string(),
                ">= one tic",
            ));
        }
        self.tics_per_step = tics as u64;
        Ok(())
    }

    /// Convert a duration in milliseconds to steps, rounding to the nearest
    /// representable step
    pub fn ms_to_steps(&self, ms: f64) -> Step {
        let tics = ms * self.tics_per_ms as f64;
        (tics / self.tics_per_step as f64).round() as Step
    }

    /// Convert a step count to milliseconds
    pub fn steps_to_ms(&self, steps: Step) -> f64 {
        steps as f64 * self.resolution_ms()
    }

    /// Convert a delay in milliseconds to steps
    ///
    /// A delay below half a step rounds to zero and is rejected by the delay
    /// checker; this conversion itself never fails.
    pub fn delay_ms_to_steps(&self, ms: f64) -> Step {
        self.ms_to_steps(ms)
    }

    /// The smallest representable positive duration, in steps
    pub fn min_step(&self) -> Step {
        1
    }

    /// Whether a duration in milliseconds lies exactly on the step grid
    pub fn is_on_grid(&self, ms: f64) -> bool {
        let tics = ms * self.tics_per_ms as f64;
        let steps = tics / self.tics_per_step as f64;
        (steps - steps.round()).abs() < 1e-9
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_grid() {
        let grid = TimeGrid::default();
        assert_eq!(grid.resolution_ms(), 0.1);
        assert_eq!(grid.ms_to_steps(1.0), 10);
        assert_eq!(grid.ms_to_steps(1.5), 15);
        assert_eq!(grid.steps_to_ms(10), 1.0);
    }

    #[test]
    fn test_rounding() {
        let grid = TimeGrid::default();
        // 0.14 ms rounds down to one step, 0.16 ms rounds up to two
        assert_eq!(grid.ms_to_steps(0.14), 1);
        assert_eq!(grid.ms_to_steps(0.16), 2);
    }

    #[test]
    fn test_set_resolution() {
        let mut grid = TimeGrid::default();
        grid.set_resolution_ms(1.0).unwrap();
        assert_eq!(grid.resolution_ms(), 1.0);
        assert_eq!(grid.ms_to_steps(5.0), 5);

        assert!(grid.set_resolution_ms(0.0).is_err());
        assert!(grid.set_resolution_ms(-0.1).is_err());
        assert!(grid.set_resolution_ms(f64::NAN).is_err());
    }

    #[test]
    fn test_sub_tic_resolution_rejected() {
        let mut grid = TimeGrid::default();
        assert!(grid.set_resolution_ms(0.0001).is_err());
    }

    #[test]
    fn test_on_grid() {
        let grid = TimeGrid::default();
        assert!(grid.is_on_grid(1.0));
        assert!(grid.is_on_grid(0.1));
        assert!(!grid.is_on_grid(0.05));
    }
}
