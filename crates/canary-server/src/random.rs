//! Random assignment sources.

use std::sync::Mutex;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Produces assignments for requests that did not supply a usable one.
pub trait RandomSource: Send + Sync {
    /// A uniformly distributed value in `[0.0, 1.0)`.
    fn next_assignment(&self) -> f64;
}

/// The thread-local generator, seeded from the OS.
#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadRandom;

impl RandomSource for ThreadRandom {
    fn next_assignment(&self) -> f64 {
        rand::thread_rng().gen_range(0.0..1.0)
    }
}

/// A reproducible generator.
#[derive(Debug)]
pub struct SeededRandom {
    rng: Mutex<StdRng>,
}

impl SeededRandom {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }
}

impl RandomSource for SeededRandom {
    fn next_assignment(&self) -> f64 {
        self.rng.lock().expect("rng lock").gen_range(0.0..1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn thread_random_in_unit_interval() {
        for _ in 0..1000 {
            let v = ThreadRandom.next_assignment();
            assert!((0.0..1.0).contains(&v));
        }
    }

    #[test]
    fn seeded_random_is_reproducible() {
        let a = SeededRandom::new(7);
        let b = SeededRandom::new(7);
        for _ in 0..10 {
            let v = a.next_assignment();
            assert!((0.0..1.0).contains(&v));
            assert_eq!(v, b.next_assignment());
        }
    }
}
