//! Randomness behind the chaos injector.
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

pub trait RandomSource: Send + Sync {
    /// Uniform in `[0, 1)`.
    fn next_f64(&self) -> f64;

    /// Uniform in `[low, high]`, both ends included. Callers guarantee
    /// `low <= high`.
    fn next_in_range(&self, low: u64, high: u64) -> u64;
}

/// `StdRng` behind a mutex. The lock is held only for a single draw.
pub struct MutexRng {
    inner: Mutex<StdRng>,
}

impl MutexRng {
    pub fn from_entropy() -> Self {
        let seed = rand::rng().random::<[u8; 32]>();
        Self {
            inner: Mutex::new(StdRng::from_seed(seed)),
        }
    }

    /// Reproducible sequence, for tests.
    pub fn seeded(seed: u64) -> Self {
        Self {
            inner: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }
}

impl Default for MutexRng {
    fn default() -> Self {
        Self::from_entropy()
    }
}

impl RandomSource for MutexRng {
    fn next_f64(&self) -> f64 {
        self.inner.lock().random::<f64>()
    }

    fn next_in_range(&self, low: u64, high: u64) -> u64 {
        if low >= high {
            return low;
        }
        self.inner.lock().random_range(low..=high)
    }
}
