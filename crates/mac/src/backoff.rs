//! binary exponential backoff

use std::time::Duration;

use rand::Rng;

use crate::{MacError, Result};

/// Backoff window doubling from `2^1` slots up to `2^max_exponent` slots.
#[derive(Debug, Clone)]
pub struct BinaryExponentialBackoff {
    slot: Duration,
    max_exponent: u32,
    exponent: u32,
}

impl BinaryExponentialBackoff {
    pub fn new(slot: Duration, max_exponent: u32) -> Result<Self> {
        if slot.is_zero() {
            return Err(MacError::ZeroBackoffSlot);
        }
        Ok(Self {
            slot,
            max_exponent: max_exponent.clamp(1, 31),
            exponent: 1,
        })
    }

    pub fn reset(&mut self) {
        self.exponent = 1;
    }

    pub fn exponent(&self) -> u32 {
        self.exponent
    }

    /// Uniform in `[0, 2^exponent - 1]` slots, then widens the window.
    pub fn next_backoff<R: Rng + ?Sized>(&mut self, rng: &mut R) -> Duration {
        let slots = rng.random_range(0..(1u32 << self.exponent));
        if self.exponent < self.max_exponent {
            self.exponent += 1;
        }
        self.slot.saturating_mul(slots)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_zero_slot_rejected() {
        assert!(matches!(
            BinaryExponentialBackoff::new(Duration::ZERO, 5),
            Err(MacError::ZeroBackoffSlot)
        ));
    }

    #[test]
    fn test_backoff_bounded_and_saturates() {
        let slot = Duration::from_micros(320);
        let mut backoff = BinaryExponentialBackoff::new(slot, 4).unwrap();
        let mut rng = StdRng::seed_from_u64(7);

        for draw in 0..200 {
            let exponent = backoff.exponent();
            let upper = slot * ((1u32 << exponent) - 1);
            let value = backoff.next_backoff(&mut rng);
            assert!(value <= upper, "draw {} exceeded {:?}", draw, upper);
            assert!(backoff.exponent() <= 4);
        }
        assert_eq!(backoff.exponent(), 4);

        backoff.reset();
        assert_eq!(backoff.exponent(), 1);
        assert!(backoff.next_backoff(&mut rng) <= slot);
    }

    #[test]
    fn test_backoff_is_slot_aligned() {
        let slot = Duration::from_micros(250);
        let mut backoff = BinaryExponentialBackoff::new(slot, 6).unwrap();
        let mut rng = StdRng::seed_from_u64(42);
        for _ in 0..50 {
            let value = backoff.next_backoff(&mut rng);
            assert_eq!(value.as_nanos() % slot.as_nanos(), 0);
        }
    }
}
