//! Simulated environment: manual clock and seeded RNG.

#![allow(clippy::disallowed_types, reason = "Synchronous locking operations only")]

use std::sync::{Arc, Mutex};

use chrono::{DateTime, TimeDelta, Utc};
use parley_server::Environment;
use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha8Rng;

/// 2024-01-01T00:00:00Z, the default simulation start.
const DEFAULT_START_SECS: i64 = 1_704_067_200;

/// Deterministic [`Environment`].
///
/// Time only moves when [`SimEnv::advance`] is called. Random bytes come from
/// a ChaCha8 stream, so two environments with the same seed produce the same
/// connection ids. Clones share clock and RNG.
#[derive(Clone)]
pub struct SimEnv {
    clock: Arc<Mutex<DateTime<Utc>>>,
    rng: Arc<Mutex<ChaCha8Rng>>,
}

impl Default for SimEnv {
    fn default() -> Self {
        Self::new()
    }
}

impl SimEnv {
    /// Environment with seed 0 starting at 2024-01-01T00:00:00Z.
    pub fn new() -> Self {
        Self::with_seed(0)
    }

    /// Environment with the given RNG seed.
    pub fn with_seed(seed: u64) -> Self {
        let start = DateTime::UNIX_EPOCH + TimeDelta::seconds(DEFAULT_START_SECS);
        Self::starting_at(start, seed)
    }

    /// Environment whose clock starts at `start`.
    pub fn starting_at(start: DateTime<Utc>, seed: u64) -> Self {
        Self {
            clock: Arc::new(Mutex::new(start)),
            rng: Arc::new(Mutex::new(ChaCha8Rng::seed_from_u64(seed))),
        }
    }

    /// Move the clock forward. Negative deltas are ignored.
    #[allow(clippy::expect_used)]
    pub fn advance(&self, delta: TimeDelta) {
        if delta <= TimeDelta::zero() {
            return;
        }
        let mut clock = self.clock.lock().expect("Mutex poisoned");
        *clock += delta;
    }
}

impl Environment for SimEnv {
    #[allow(clippy::expect_used)]
    fn now(&self) -> DateTime<Utc> {
        *self.clock.lock().expect("Mutex poisoned")
    }

    #[allow(clippy::expect_used)]
    fn random_bytes(&self, buffer: &mut [u8]) {
        self.rng.lock().expect("Mutex poisoned").fill_bytes(buffer);
    }
}
