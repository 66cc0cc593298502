//! Coarse experiment clock and the pixel/time reconciliation state machine.
//!
//! The experiment advances in fixed ticks while pixels have their own dwell
//! times. Each tick deposits its duration into a time bank; pixels are then
//! consumed in order while the bank covers the next pixel's dwell. Leftover
//! time carries over to the next tick, so over any sequence of ticks the
//! number of consumed pixels is exactly what the elapsed time pays for.
#![allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss
)]

use std::ops::Range;
use stedsim_core::{Error, Result};

const PS_PER_US: u64 = 1_000_000;
const PS_PER_S: f64 = 1e12;
/// Rounding slack when paying whole pixels out of the pixel bank.
const PIXEL_BANK_TOLERANCE: f64 = 1e-9;

/// Converts a duration in seconds to whole picoseconds.
#[inline]
fn seconds_to_ps(seconds: f64) -> u64 {
    let ps = (seconds * PS_PER_S).round();
    if ps.is_finite() && ps > 0.0 {
        ps as u64
    } else {
        0
    }
}

/// Experiment clock ticking in whole microseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Clock {
    time_quantum_us: u64,
    current_time_us: u64,
}

impl Clock {
    /// Creates a clock at time zero.
    ///
    /// # Errors
    /// Returns [`Error::Configuration`] for a zero quantum.
    pub fn new(time_quantum_us: u64) -> Result<Self> {
        if time_quantum_us == 0 {
            return Err(Error::Configuration(
                "clock time quantum must be at least 1 us".to_string(),
            ));
        }
        Ok(Self {
            time_quantum_us,
            current_time_us: 0,
        })
    }

    /// Advances by one quantum and returns the new time (us).
    pub fn update_time(&mut self) -> u64 {
        self.current_time_us += self.time_quantum_us;
        self.current_time_us
    }

    /// Returns to time zero.
    pub fn reset(&mut self) {
        self.current_time_us = 0;
    }

    #[must_use]
    pub fn time_quantum_us(&self) -> u64 {
        self.time_quantum_us
    }

    #[must_use]
    pub fn current_time_us(&self) -> u64 {
        self.current_time_us
    }
}

/// Time bank and pixel bank reconciling a tick clock with pixel dwell times.
///
/// The time bank is kept in integer picoseconds so that repeated deposits and
/// withdrawals never drift.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TimeReconciler {
    time_bank_ps: u64,
    pixel_bank: f64,
    consumed: usize,
}

impl TimeReconciler {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Credits a tick of `quantum_us` microseconds.
    pub fn deposit_us(&mut self, quantum_us: u64) {
        self.time_bank_ps = self
            .time_bank_ps
            .saturating_add(quantum_us.saturating_mul(PS_PER_US));
    }

    /// Credits a duration in seconds.
    pub fn deposit(&mut self, seconds: f64) {
        self.time_bank_ps = self.time_bank_ps.saturating_add(seconds_to_ps(seconds));
    }

    /// Advances the clock by one quantum and credits it.
    pub fn tick(&mut self, clock: &mut Clock) -> u64 {
        self.deposit_us(clock.time_quantum_us());
        clock.update_time()
    }

    /// Consumes pixels while the bank covers their dwell time.
    ///
    /// `dwell_of(i)` is the dwell (s) of the `i`-th pixel of a list of
    /// `total` pixels. Returns the index range consumed by this call; the
    /// range is empty once the list is exhausted or the bank runs short.
    pub fn consume<F>(&mut self, total: usize, dwell_of: F) -> Range<usize>
    where
        F: Fn(usize) -> f64,
    {
        let start = self.consumed;
        while self.consumed < total {
            let dwell_ps = seconds_to_ps(dwell_of(self.consumed));
            if dwell_ps > self.time_bank_ps {
                break;
            }
            self.time_bank_ps -= dwell_ps;
            self.consumed += 1;
        }
        start..self.consumed
    }

    /// Pixels consumed since the last restart.
    #[must_use]
    pub fn consumed(&self) -> usize {
        self.consumed
    }

    /// Starts over at the head of a new pixel list, keeping both banks.
    pub fn restart(&mut self) {
        self.consumed = 0;
    }

    /// Banked time, in seconds.
    #[must_use]
    pub fn time_bank(&self) -> f64 {
        self.time_bank_ps as f64 / PS_PER_S
    }

    /// Banks the fractional part of a per-step pixel count.
    ///
    /// The whole part is scanned by the step itself; only the fraction is
    /// owed to a later step.
    pub fn add_to_pixel_bank(&mut self, pixels: f64) {
        if pixels.is_finite() && pixels > 0.0 {
            self.pixel_bank += pixels.fract();
        }
    }

    /// Withdraws every whole pixel owed, leaving the fraction in the bank.
    ///
    /// A bank within `PIXEL_BANK_TOLERANCE` of a whole count pays it out.
    pub fn take_from_pixel_bank(&mut self) -> usize {
        let whole = (self.pixel_bank + PIXEL_BANK_TOLERANCE).floor();
        self.pixel_bank = (self.pixel_bank - whole).max(0.0);
        whole as usize
    }

    /// Pixels to scan in one time step worth `pixels_per_step` pixels.
    ///
    /// Banks the fraction first, so after `k` steps the pixels handed out
    /// total `floor(k * pixels_per_step)`.
    pub fn pixels_for_step(&mut self, pixels_per_step: f64) -> usize {
        if !(pixels_per_step.is_finite() && pixels_per_step > 0.0) {
            return 0;
        }
        self.add_to_pixel_bank(pixels_per_step);
        pixels_per_step.trunc() as usize + self.take_from_pixel_bank()
    }

    /// Pixels owed, including the fractional remainder.
    #[must_use]
    pub fn pixel_bank(&self) -> f64 {
        self.pixel_bank
    }
}

/// Pixels scanned per time step and the number of time steps in an
/// acquisition of `total` seconds, for a uniform `dwell` (s).
#[must_use]
pub fn time_correspondence(time_step: f64, total: f64, dwell: f64) -> (f64, usize) {
    if !(time_step > 0.0 && dwell > 0.0) {
        return (0.0, 0);
    }
    let pixels_per_step = time_step / dwell;
    let steps = (total.max(0.0) / time_step).ceil();
    (pixels_per_step, steps as usize)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_clock_ticks() {
        let mut clock = Clock::new(25).unwrap();
        assert_eq!(clock.update_time(), 25);
        assert_eq!(clock.update_time(), 50);
        clock.reset();
        assert_eq!(clock.current_time_us(), 0);
        assert!(Clock::new(0).is_err());
    }

    #[test]
    fn test_consume_carries_leftover_time() {
        let mut reconciler = TimeReconciler::new();
        // 25 us ticks, 10 us pixels: 2, then 3 (with 5 us carried over).
        reconciler.deposit_us(25);
        assert_eq!(reconciler.consume(100, |_| 10e-6), 0..2);
        assert_relative_eq!(reconciler.time_bank(), 5e-6, max_relative = 1e-9);
        reconciler.deposit_us(25);
        assert_eq!(reconciler.consume(100, |_| 10e-6), 2..5);
        assert_relative_eq!(reconciler.time_bank(), 0.0);
    }

    #[test]
    fn test_consume_stops_at_list_end() {
        let mut reconciler = TimeReconciler::new();
        reconciler.deposit_us(1000);
        assert_eq!(reconciler.consume(4, |_| 10e-6), 0..4);
        assert_eq!(reconciler.consume(4, |_| 10e-6), 4..4);
        assert_relative_eq!(reconciler.time_bank(), 960e-6, max_relative = 1e-9);

        reconciler.restart();
        assert_eq!(reconciler.consume(4, |_| 10e-6), 0..4);
    }

    #[test]
    fn test_consume_uses_per_pixel_dwell() {
        let mut reconciler = TimeReconciler::new();
        reconciler.deposit_us(30);
        let dwell = [10e-6, 25e-6, 1e-6];
        assert_eq!(reconciler.consume(3, |i| dwell[i]), 0..1);
        reconciler.deposit_us(10);
        assert_eq!(reconciler.consume(3, |i| dwell[i]), 1..3);
    }

    #[test]
    fn test_pixel_bank() {
        let mut reconciler = TimeReconciler::new();
        reconciler.add_to_pixel_bank(2.5);
        reconciler.add_to_pixel_bank(0.75);
        assert_relative_eq!(reconciler.pixel_bank(), 1.25);
        assert_eq!(reconciler.take_from_pixel_bank(), 1);
        assert_relative_eq!(reconciler.pixel_bank(), 0.25);
        assert_eq!(reconciler.take_from_pixel_bank(), 0);
        reconciler.add_to_pixel_bank(-4.0);
        reconciler.add_to_pixel_bank(3.0);
        assert_relative_eq!(reconciler.pixel_bank(), 0.25);
    }

    #[test]
    fn test_batched_steps_pay_out_elapsed_pixels() {
        // 25 us steps over 1 ms at 10 us per pixel: 2.5 pixels per step.
        let (per_step, steps) = time_correspondence(25e-6, 1e-3, 10e-6);
        assert_eq!(steps, 40);
        let mut reconciler = TimeReconciler::new();
        let mut total = 0;
        for k in 1..=steps {
            let n = reconciler.pixels_for_step(per_step);
            assert!(n == 2 || n == 3);
            total += n;
            assert_eq!(total, k * 5 / 2);
        }
        assert_eq!(total, 100);
    }

    #[test]
    fn test_batched_steps_with_repeating_fraction() {
        // 100 us steps at 30 us per pixel: 10/3 pixels per step.
        let (per_step, steps) = time_correspondence(100e-6, 1e-3, 30e-6);
        let mut reconciler = TimeReconciler::new();
        let mut total = 0;
        for k in 1..=steps {
            total += reconciler.pixels_for_step(per_step);
            assert_eq!(total, k * 10 / 3);
        }
        assert_eq!(reconciler.pixels_for_step(0.0), 0);
    }

    #[test]
    fn test_time_correspondence() {
        let (pixels, steps) = time_correspondence(100e-6, 1e-3, 10e-6);
        assert_relative_eq!(pixels, 10.0, max_relative = 1e-12);
        assert_eq!(steps, 10);
        assert_eq!(time_correspondence(0.0, 1.0, 1.0), (0.0, 0));
    }

    #[test]
    fn test_deposit_seconds() {
        let mut reconciler = TimeReconciler::new();
        reconciler.deposit(25e-6);
        assert_eq!(reconciler.consume(10, |_| 10e-6), 0..2);
        reconciler.deposit(-1.0);
        assert_relative_eq!(reconciler.time_bank(), 5e-6, max_relative = 1e-9);
    }
}
