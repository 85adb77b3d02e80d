//! Per-request mirroring decision.
//!
//! The [`Sampler`] compares one uniform draw in `[0, 100)` against the
//! configured percentage. The draw comes from a [`RandomSource`], a single
//! process-wide generator behind a mutex.
//!
//! At `percent >= 100` no draw is taken at all, so the draw sequence seen
//! by a seeded source differs between a 100% configuration and any other.

use std::sync::{Arc, Mutex, PoisonError};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

pub trait RandomSource: Send + Sync {
    /// Uniform value in `[0, 100)`.
    fn draw(&self) -> f64;
}

/// `StdRng` shared by every request handler.
pub struct SharedRng {
    rng: Mutex<StdRng>,
}

impl SharedRng {
    #[must_use]
    pub fn from_entropy() -> Self {
        Self {
            rng: Mutex::new(StdRng::from_entropy()),
        }
    }

    #[must_use]
    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }
}

impl RandomSource for SharedRng {
    fn draw(&self) -> f64 {
        // A panic while holding the lock cannot leave the generator half-updated.
        let mut rng = self.rng.lock().unwrap_or_else(PoisonError::into_inner);
        rng.gen_range(0.0..100.0)
    }
}

pub struct Sampler {
    percent: f64,
    source: Arc<dyn RandomSource>,
}

impl Sampler {
    #[must_use]
    pub fn new(percent: f64, source: Arc<dyn RandomSource>) -> Self {
        Self { percent, source }
    }

    #[must_use]
    pub const fn percent(&self) -> f64 {
        self.percent
    }

    /// Whether this request is mirrored. Negative (and NaN) percentages never
    /// mirror; 100 and above always do without touching the random source.
    #[must_use]
    pub fn should_mirror(&self) -> bool {
        if self.percent >= 100.0 {
            return true;
        }
        self.source.draw() < self.percent
    }
}
