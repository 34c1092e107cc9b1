//! Atomic floating-point accumulator.
//!
//! The standard library has no atomic floating-point type, so values are stored as the bit
//! pattern of an `f64` inside an atomic 64-bit integer, and updated with a compare-and-swap loop.
//!
//! We always require an atomic integer of 64 bits regardless of whether the standard library
//! exposes one for the target architecture, so 32-bit targets get theirs from `portable-atomic`.

use std::sync::atomic::Ordering;

#[cfg(target_pointer_width = "32")]
pub(crate) use portable_atomic::AtomicU64;
#[cfg(not(target_pointer_width = "32"))]
pub(crate) use std::sync::atomic::AtomicU64;

/// An `f64` that can be updated concurrently without locking.
#[derive(Debug)]
pub struct AtomicF64 {
    bits: AtomicU64,
}

impl AtomicF64 {
    /// Creates a new `AtomicF64` holding `value`.
    pub fn new(value: f64) -> Self {
        Self { bits: AtomicU64::new(value.to_bits()) }
    }

    /// Adds `value` to the current value.
    ///
    /// Follows IEEE semantics, so adding NaN or an infinity propagates as usual.
    pub fn add(&self, value: f64) {
        let _ = self.bits.fetch_update(Ordering::AcqRel, Ordering::Relaxed, |curr| {
            let input = f64::from_bits(curr);
            let output = input + value;
            Some(output.to_bits())
        });
    }

    /// Replaces the current value.
    pub fn set(&self, value: f64) {
        self.bits.store(value.to_bits(), Ordering::Release);
    }

    /// Gets the current value.
    pub fn get(&self) -> f64 {
        f64::from_bits(self.bits.load(Ordering::Acquire))
    }
}

impl Default for AtomicF64 {
    fn default() -> Self {
        Self::new(0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::AtomicF64;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_add_and_set() {
        let value = AtomicF64::default();
        assert_eq!(value.get(), 0.0);

        value.add(1.5);
        value.add(-0.25);
        assert_eq!(value.get(), 1.25);

        value.set(-3.0);
        assert_eq!(value.get(), -3.0);

        value.add(f64::NAN);
        assert!(value.get().is_nan());
    }

    #[test]
    fn test_concurrent_adds_are_not_lost() {
        let value = Arc::new(AtomicF64::default());
        let handles = (0..8)
            .map(|_| {
                let value = Arc::clone(&value);
                thread::spawn(move || {
                    for _ in 0..10_000 {
                        value.add(1.0);
                    }
                })
            })
            .collect::<Vec<_>>();

        for handle in handles {
            handle.join().expect("writer thread panicked");
        }

        assert_eq!(value.get(), 80_000.0);
    }
}
