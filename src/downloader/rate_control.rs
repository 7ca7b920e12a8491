//! Adaptive worker pool control driven by server throttle responses.
//!
//! The portal signals overload with HTTP 429. Every throttle both backs off
//! the offending request (capped exponential wait) and, at most once per
//! cooldown window, halves the worker pool. Successful requests slowly pay
//! the throttle debt back down so waits recover after a throttling episode.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::downloader::config::{
    INITIAL_WORKERS, MAX_THROTTLE_WAIT_SECS, MIN_WORKERS, SCALE_COOLDOWN, THROTTLE_EXPONENT_CAP,
};

#[derive(Debug)]
struct RateState {
    workers: usize,
    throttle_count: u32,
    last_scale_down: Option<Instant>,
}

/// Shared controller for the page worker pool.
///
/// All mutation happens under a single lock. Dispatch loops read
/// [`worker_count`](RateController::worker_count) once per round and never
/// resize mid-flight.
#[derive(Debug)]
pub struct RateController {
    state: Mutex<RateState>,
    floor: usize,
    cooldown: Duration,
}

impl RateController {
    /// Create a controller with the default pool bounds and cooldown.
    pub fn new() -> Self {
        Self::with_limits(INITIAL_WORKERS, MIN_WORKERS)
    }

    /// Create a controller with explicit initial and minimum pool sizes.
    pub fn with_limits(initial: usize, floor: usize) -> Self {
        Self {
            state: Mutex::new(RateState {
                workers: initial.max(floor),
                throttle_count: 0,
                last_scale_down: None,
            }),
            floor,
            cooldown: SCALE_COOLDOWN,
        }
    }

    /// Override the scale-down cooldown window.
    pub fn with_cooldown(mut self, cooldown: Duration) -> Self {
        self.cooldown = cooldown;
        self
    }

    /// Record a throttle response and return how long the caller must wait
    /// before retrying.
    ///
    /// The pool is halved (never below the floor) at most once per cooldown
    /// window; the wait grows as `2^n` seconds with the exponent capped, so
    /// consecutive throttles wait 2, 4, 8, 16, 32, 32, ... seconds.
    pub fn on_throttle(&self) -> Duration {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.throttle_count += 1;

        let cooled_down = state
            .last_scale_down
            .map_or(true, |at| at.elapsed() >= self.cooldown);
        if cooled_down && state.workers > self.floor {
            let shrunk = (state.workers / 2).max(self.floor);
            tracing::warn!(
                workers = shrunk,
                previous = state.workers,
                throttles = state.throttle_count,
                "throttled, shrinking worker pool"
            );
            state.workers = shrunk;
            state.last_scale_down = Some(Instant::now());
        }

        let exponent = state.throttle_count.min(THROTTLE_EXPONENT_CAP);
        let wait = 2u64.pow(exponent).min(MAX_THROTTLE_WAIT_SECS);
        Duration::from_secs(wait)
    }

    /// Record a successful request, paying down the throttle debt.
    pub fn on_success(&self) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.throttle_count = state.throttle_count.saturating_sub(1);
    }

    /// Snapshot of the current worker pool size.
    pub fn worker_count(&self) -> usize {
        self.state
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .workers
    }
}

impl Default for RateController {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_throttle_wait_sequence() {
        let rate = RateController::new();
        let waits: Vec<u64> = (0..6).map(|_| rate.on_throttle().as_secs()).collect();
        assert_eq!(waits, vec![2, 4, 8, 16, 32, 32]);
    }

    #[test]
    fn test_single_scale_down_within_cooldown() {
        let rate = RateController::new();
        for _ in 0..5 {
            rate.on_throttle();
        }
        // Cooldown has not elapsed, so only the first throttle halves.
        assert_eq!(rate.worker_count(), 4);
    }

    #[test]
    fn test_scale_down_to_floor_without_cooldown() {
        let rate = RateController::new().with_cooldown(Duration::ZERO);
        for _ in 0..5 {
            rate.on_throttle();
        }
        assert_eq!(rate.worker_count(), MIN_WORKERS);
    }

    #[test]
    fn test_workers_never_below_floor() {
        let rate = RateController::with_limits(3, 2).with_cooldown(Duration::ZERO);
        let mut previous = rate.worker_count();
        for _ in 0..10 {
            rate.on_throttle();
            let current = rate.worker_count();
            assert!(current >= 2);
            assert!(current <= previous);
            previous = current;
        }
        assert_eq!(rate.worker_count(), 2);
    }

    #[test]
    fn test_success_pays_down_throttle_debt() {
        let rate = RateController::new();
        assert_eq!(rate.on_throttle().as_secs(), 2);
        assert_eq!(rate.on_throttle().as_secs(), 4);
        rate.on_success();
        rate.on_success();
        // Debt is back to zero, next throttle starts over at 2 seconds.
        assert_eq!(rate.on_throttle().as_secs(), 2);
    }

    #[test]
    fn test_success_does_not_underflow() {
        let rate = RateController::new();
        rate.on_success();
        rate.on_success();
        assert_eq!(rate.on_throttle().as_secs(), 2);
    }

    #[test]
    fn test_floor_initial_clamp() {
        let rate = RateController::with_limits(1, 2);
        assert_eq!(rate.worker_count(), 2);
    }
}
