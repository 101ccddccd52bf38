//! Delay admission
//!
//! The per-process custodian of the delay extrema. Every new synapse delay
//! passes through here; the minimum admitted delay determines the slice
//! length, so admitting a smaller one after the first `simulate` would break
//! spike delivery.

use spikegrid_core::error::{CoreError, Result};
use spikegrid_core::ids::Step;
use spikegrid_core::time::TimeGrid;

/// Tracks the `[min_delay, max_delay]` interval in steps
#[derive(Debug, Clone, Default)]
pub struct DelayChecker {
    min_delay: Option<Step>,
    max_delay: Option<Step>,
    user_set_extrema: bool,
}

impl DelayChecker {
    /// Create a checker with unset extrema
    pub fn new() -> Self {
        Self::default()
    }

    /// Smallest admitted delay in steps; one step if nothing was admitted
    pub fn min_steps(&self) -> Step {
        self.min_delay.unwrap_or(1)
    }

    /// Largest admitted delay in steps; one step if nothing was admitted
    pub fn max_steps(&self) -> Step {
        self.max_delay.unwrap_or(1)
    }

    /// Whether the user pinned the extrema explicitly
    pub fn user_pinned(&self) -> bool {
        self.user_set_extrema
    }

    /// Admit a delay, widening the extrema when the user has not pinned them
    ///
    /// `simulated` is true once `simulate` has run; the extrema active
    /// during simulation may then no longer be widened.
    pub fn admit(&mut self, delay: Step, grid: &TimeGrid, simulated: bool) -> Result<()> {
        if delay < grid.min_step() {
            return Err(CoreError::bad_delay(
                grid.steps_to_ms(delay),
                "delay must be greater than or equal to the resolution",
            ));
        }

        if simulated {
            let bad_min = delay < self.min_steps();
            let bad_max = delay > self.max_steps();
            if bad_min || bad_max {
                return Err(CoreError::bad_delay(
                    grid.steps_to_ms(delay),
                    "minimum and maximum delay cannot be changed after simulate has been called",
                ));
            }
        }

        if self.min_delay.map_or(true, |min| delay < min) {
            if self.user_set_extrema {
                return Err(CoreError::bad_delay(
                    grid.steps_to_ms(delay),
                    "delay must be greater than or equal to min_delay",
                ));
            }
            self.min_delay = Some(delay);
        }

        if self.max_delay.map_or(true, |max| delay > max) {
            if self.user_set_extrema {
                return Err(CoreError::bad_delay(
                    grid.steps_to_ms(delay),
                    "delay must be smaller than or equal to max_delay",
                ));
            }
            self.max_delay = Some(delay);
        }

        Ok(())
    }

    /// Admit two delays at once, for models storing a delay pair
    pub fn admit_pair(
        &mut self,
        delay1: Step,
        delay2: Step,
        grid: &TimeGrid,
        simulated: bool,
    ) -> Result<()> {
        self.admit(delay1.min(delay2), grid, simulated)?;
        self.admit(delay1.max(delay2), grid, simulated)
    }

    /// Pin the extrema explicitly
    ///
    /// Fails once `simulate` has run, if connections already exist, or if
    /// either value lies below the resolution. Both values must be supplied
    /// together; the status gateway enforces that before calling here.
    pub fn set_extrema(
        &mut self,
        min_ms: f64,
        max_ms: f64,
        grid: &TimeGrid,
        have_connections: bool,
        simulated: bool,
    ) -> Result<()> {
        if simulated {
            return Err(CoreError::bad_delay(
                min_ms,
                "minimum and maximum delay cannot be changed after simulate has been called",
            ));
        }
        if have_connections {
            return Err(CoreError::kernel(
                "connections already exist; reset the kernel before pinning delay extrema",
            ));
        }
        let min_steps = grid.delay_ms_to_steps(min_ms);
        let max_steps = grid.delay_ms_to_steps(max_ms);
        if min_steps < grid.min_step() {
            return Err(CoreError::bad_delay(
                min_ms,
                "min_delay must be greater than or equal to the resolution",
            ));
        }
        if max_steps < grid.min_step() {
            return Err(CoreError::bad_delay(
                max_ms,
                "max_delay must be greater than or equal to the resolution",
            ));
        }
        if max_steps < min_steps {
            return Err(CoreError::bad_delay(
                max_ms,
                "max_delay must not be smaller than min_delay",
            ));
        }
        self.min_delay = Some(min_steps);
        self.max_delay = Some(max_steps);
        self.user_set_extrema = true;
        Ok(())
    }
}
