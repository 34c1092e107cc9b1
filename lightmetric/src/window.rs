use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use quanta::{Clock, Instant};
use tracing::trace;

use crate::ckms::CkmsQuantiles;
use crate::error::BuildError;
use crate::quantile::Quantile;

/// Quantiles over a sliding time window.
///
/// The window of `max_age` is split into `age_buckets` slices of equal width. Values are
/// inserted into the sketch of the current slice, and queries merge every live slice, so a
/// value stops contributing to queries somewhere between `max_age - width` and `max_age` after
/// it was inserted.
///
/// Sketches are kept in a ring of `age_buckets + 1` slots. Whenever the current slice is older
/// than the slice width, the ring advances by however many widths have elapsed, and the slot in
/// front of the new current slot is cleared, ready to take over on the next rotation. Rotation
/// is lazy: it only ever happens as part of an insert or a query, so nothing runs in the
/// background.
///
/// Inserts and queries are serialized through a single lock, which keeps a compaction pass from
/// ever being observed halfway by a concurrent query.
#[derive(Debug)]
pub struct TimeWindowQuantiles {
    quantiles: Arc<[Quantile]>,
    clock: Clock,
    width: Duration,
    ring: Mutex<Ring>,
}

#[derive(Debug)]
struct Ring {
    sketches: Vec<CkmsQuantiles>,
    current: usize,
    current_start: Instant,
}

impl TimeWindowQuantiles {
    /// Creates a new [`TimeWindowQuantiles`].
    ///
    /// ## Errors
    ///
    /// If `max_age` is zero, or if `age_buckets` is zero, an error variant will be returned.
    pub fn new(
        quantiles: Arc<[Quantile]>,
        max_age: Duration,
        age_buckets: usize,
        clock: Clock,
    ) -> Result<TimeWindowQuantiles, BuildError> {
        if max_age.is_zero() {
            return Err(BuildError::ZeroMaxAge);
        }
        if age_buckets == 0 {
            return Err(BuildError::ZeroAgeBuckets);
        }

        Ok(TimeWindowQuantiles::with_bucket_width(
            quantiles,
            bucket_width(max_age, age_buckets),
            age_buckets,
            clock,
        ))
    }

    /// Creates a new [`TimeWindowQuantiles`] out of an already validated bucket layout.
    pub(crate) fn with_bucket_width(
        quantiles: Arc<[Quantile]>,
        width: Duration,
        age_buckets: usize,
        clock: Clock,
    ) -> TimeWindowQuantiles {
        let sketches =
            (0..=age_buckets).map(|_| CkmsQuantiles::new(Arc::clone(&quantiles))).collect();
        let ring = Ring { sketches, current: 0, current_start: clock.now() };

        TimeWindowQuantiles { quantiles, clock, width, ring: Mutex::new(ring) }
    }

    /// Sets the number of buffered inserts between two compactions of each slot.
    #[must_use]
    pub fn with_compress_interval(self, interval: NonZeroUsize) -> TimeWindowQuantiles {
        let TimeWindowQuantiles { quantiles, clock, width, ring } = self;
        let mut ring = ring.into_inner();
        ring.sketches = ring
            .sketches
            .into_iter()
            .map(|sketch| sketch.with_compress_interval(interval))
            .collect();

        TimeWindowQuantiles { quantiles, clock, width, ring: Mutex::new(ring) }
    }

    /// Gets the quantiles tracked by this window.
    pub fn quantiles(&self) -> &[Quantile] {
        &self.quantiles
    }

    /// Gets the width of a single age bucket.
    pub fn bucket_width(&self) -> Duration {
        self.width
    }

    /// Inserts a value into the current age bucket.
    pub fn insert(&self, value: f64) {
        let mut ring = self.ring.lock();
        self.rotate(&mut ring);

        let current = ring.current;
        ring.sketches[current].insert(value);
    }

    /// Estimates the value at `quantile` over the live window.
    ///
    /// Returns `None` if no value in the window is still live.
    pub fn query(&self, quantile: f64) -> Option<f64> {
        let mut merged = self.merged();
        merged.query(quantile)
    }

    /// Estimates the value of every tracked quantile over the live window.
    ///
    /// Values are returned in the same order as [`quantiles`](Self::quantiles), and are computed
    /// from a single merge, so they are consistent with each other.
    pub fn query_all(&self) -> Vec<Option<f64>> {
        let mut merged = self.merged();
        self.quantiles.iter().map(|q| merged.query(q.quantile())).collect()
    }

    fn merged(&self) -> CkmsQuantiles {
        let mut ring = self.ring.lock();
        self.rotate(&mut ring);

        CkmsQuantiles::merged(Arc::clone(&self.quantiles), &ring.sketches)
    }

    fn rotate(&self, ring: &mut Ring) {
        let now = self.clock.now();
        let elapsed = now.saturating_duration_since(ring.current_start);
        if elapsed < self.width {
            return;
        }

        let steps = u64::try_from(elapsed.as_nanos() / self.width.as_nanos()).unwrap_or(u64::MAX);
        let slots = ring.sketches.len();
        if steps >= slots as u64 {
            // Every slot aged out.
            for sketch in &mut ring.sketches {
                sketch.reset();
            }
            ring.current = 0;
            ring.current_start = now;
            trace!(steps, "age buckets expired");
            return;
        }

        for _ in 0..steps {
            ring.current = (ring.current + 1) % slots;
            ring.sketches[(ring.current + 1) % slots].reset();
            ring.current_start += self.width;
        }
        trace!(steps, current = ring.current, "rotated age buckets");
    }
}

/// Splits `max_age` into `age_buckets` slices, never narrower than a nanosecond.
pub(crate) fn bucket_width(max_age: Duration, age_buckets: usize) -> Duration {
    let width_nanos = (max_age.as_nanos() / age_buckets.max(1) as u128).max(1);
    Duration::from_nanos(u64::try_from(width_nanos).unwrap_or(u64::MAX))
}
