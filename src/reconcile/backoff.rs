//! # Exponential Backoff
//!
//! Jittered exponential backoff for the `BackingOff` reconcile state, with a
//! process-wide registry keyed by managed secret resource UID so repeated
//! reconcile failures for the same object keep advancing the same sequence
//! instead of resetting on every `Controller` requeue.

use rand::Rng;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// A single object's backoff state.
#[derive(Debug, Clone)]
pub struct Backoff {
    initial_interval: Duration,
    max_interval: Duration,
    multiplier: f64,
    randomization_factor: f64,
    max_elapsed_time: Option<Duration>,
    current_interval: Duration,
    started_at: Instant,
}

impl Backoff {
    #[must_use]
    pub fn new(
        initial_interval: Duration,
        max_interval: Duration,
        multiplier: f64,
        randomization_factor: f64,
        max_elapsed_time: Option<Duration>,
    ) -> Self {
        Self {
            initial_interval,
            max_interval,
            multiplier,
            randomization_factor,
            max_elapsed_time,
            current_interval: initial_interval,
            started_at: Instant::now(),
        }
    }

    /// Returns `None` once `max_elapsed_time` has passed, signaling the
    /// caller should give up retrying and surface a terminal `Rejected`
    /// state instead of requeuing again.
    pub fn next_backoff(&mut self) -> Option<Duration> {
        if let Some(max_elapsed) = self.max_elapsed_time {
            if self.started_at.elapsed() >= max_elapsed {
                return None;
            }
        }

        let jitter = rand::thread_rng().gen_range(
            -self.randomization_factor..=self.randomization_factor,
        );
        let jittered_secs = self.current_interval.as_secs_f64() * (1.0 + jitter);
        let wait = Duration::from_secs_f64(jittered_secs.max(0.0));

        let next = self.current_interval.mul_f64(self.multiplier);
        self.current_interval = next.min(self.max_interval);

        Some(wait)
    }
}

/// Process-wide backoff state, keyed by the reconciled object's UID so it
/// survives across separate `reconcile` invocations for the same object.
pub struct BackoffRegistry {
    entries: Mutex<HashMap<String, Backoff>>,
    initial_interval: Duration,
    max_interval: Duration,
    multiplier: f64,
    randomization_factor: f64,
    max_elapsed_time: Option<Duration>,
}

impl std::fmt::Debug for BackoffRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackoffRegistry").finish_non_exhaustive()
    }
}

impl BackoffRegistry {
    #[must_use]
    pub fn new(
        initial_interval: Duration,
        max_interval: Duration,
        multiplier: f64,
        randomization_factor: f64,
        max_elapsed_time: Option<Duration>,
    ) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            initial_interval,
            max_interval,
            multiplier,
            randomization_factor,
            max_elapsed_time,
        }
    }

    /// Advance (creating if needed) the backoff sequence for `uid` and
    /// return how long to wait before the next attempt, or `None` if the
    /// object has exhausted `max_elapsed_time`.
    pub fn advance(&self, uid: &str) -> Option<Duration> {
        let mut entries = self.entries.lock().expect("backoff registry mutex poisoned");
        let entry = entries.entry(uid.to_string()).or_insert_with(|| {
            Backoff::new(
                self.initial_interval,
                self.max_interval,
                self.multiplier,
                self.randomization_factor,
                self.max_elapsed_time,
            )
        });
        let result = entry.next_backoff();
        if result.is_none() {
            entries.remove(uid);
        }
        result
    }

    /// Clear an object's backoff state after a successful reconcile.
    pub fn reset(&self, uid: &str) {
        self.entries.lock().expect("backoff registry mutex poisoned").remove(uid);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_grows_and_caps_at_max_interval() {
        let mut b = Backoff::new(
            Duration::from_millis(100),
            Duration::from_secs(1),
            2.0,
            0.0,
            None,
        );
        let first = b.next_backoff().unwrap();
        let second = b.next_backoff().unwrap();
        assert_eq!(first, Duration::from_millis(100));
        assert_eq!(second, Duration::from_millis(200));
        for _ in 0..10 {
            b.next_backoff();
        }
        assert!(b.current_interval <= Duration::from_secs(1));
    }

    #[test]
    fn registry_reset_restarts_the_sequence() {
        let registry = BackoffRegistry::new(
            Duration::from_millis(100),
            Duration::from_secs(10),
            2.0,
            0.0,
            None,
        );
        let first = registry.advance("uid-1").unwrap();
        let second = registry.advance("uid-1").unwrap();
        assert!(second > first);
        registry.reset("uid-1");
        let after_reset = registry.advance("uid-1").unwrap();
        assert_eq!(after_reset, first);
    }

    #[test]
    fn exhausting_max_elapsed_time_returns_none() {
        let registry = BackoffRegistry::new(
            Duration::from_millis(1),
            Duration::from_millis(10),
            2.0,
            0.0,
            Some(Duration::from_millis(0)),
        );
        assert!(registry.advance("uid-1").is_none());
    }
}
