//! Targeted quantile sketch.
//!
//! [`CkmsQuantiles`] estimates a fixed set of quantiles over an unbounded stream of values while
//! keeping only a bounded number of samples around, following the targeted-quantiles algorithm
//! of Cormode, Korn, Muthukrishnan and Srivastava.
//!
//! Every retained sample is a tuple `(v, g, Δ)`: `g` is the difference between the lowest
//! possible rank of `v` and the lowest possible rank of the previous tuple, and `Δ` is the
//! difference between the highest and the lowest possible rank of `v`. The lowest possible rank
//! of a tuple is therefore the sum of `g` up to and including it.
//!
//! Inserts are buffered, and merged into the tuple list in a single sorted pass once the buffer
//! fills up. Each merge is followed by a compaction pass which folds a tuple into its successor
//! whenever the folded tuple still fits in the error band allowed at its rank.
//!
//! Queries pick the tuple whose rank bounds lie closest to the target rank. Since the band is
//! `ε·n` at the target and widens slower than the distance to it, some tuple always has both of
//! its rank bounds within `ε·n` of the target.
use std::cmp::Ordering;
use std::num::NonZeroUsize;
use std::sync::Arc;

use crate::quantile::Quantile;

/// Number of buffered inserts between two compactions, unless configured otherwise.
pub const DEFAULT_COMPRESS_INTERVAL: NonZeroUsize = match NonZeroUsize::new(128) {
    Some(interval) => interval,
    None => unreachable!(),
};

#[derive(Clone, Copy, Debug, PartialEq)]
struct Entry {
    v: f64,
    g: u64,
    delta: u64,
}

/// A memory-bounded sketch answering quantile queries with bounded rank error.
///
/// For each configured [`Quantile`] `(φ, ε)`, querying `φ` returns a value whose rank among all
/// inserted values is within `ε·n` of `φ·n`, where `n` is the number of inserted values.
///
/// Values are ordered with the IEEE 754 total order, so NaN and infinities are accepted and kept
/// like any other value: negative NaN sorts first, and positive NaN sorts last.
///
/// The sketch itself is not synchronized: callers sharing it between threads are expected to
/// wrap it in a lock.
#[derive(Clone, Debug)]
pub struct CkmsQuantiles {
    quantiles: Arc<[Quantile]>,
    samples: Vec<Entry>,
    buffer: Vec<f64>,
    count: u64,
    compress_interval: NonZeroUsize,
}

impl CkmsQuantiles {
    /// Creates a new, empty [`CkmsQuantiles`] targeting the given quantiles.
    pub fn new(quantiles: Arc<[Quantile]>) -> CkmsQuantiles {
        CkmsQuantiles {
            quantiles,
            samples: Vec::new(),
            buffer: Vec::with_capacity(DEFAULT_COMPRESS_INTERVAL.get()),
            count: 0,
            compress_interval: DEFAULT_COMPRESS_INTERVAL,
        }
    }

    /// Sets the number of buffered inserts between two compactions.
    ///
    /// Smaller intervals keep memory usage tighter at the cost of more frequent merges.
    #[must_use]
    pub fn with_compress_interval(mut self, interval: NonZeroUsize) -> CkmsQuantiles {
        self.compress_interval = interval;
        self
    }

    /// Gets the quantiles this sketch targets.
    pub fn quantiles(&self) -> &[Quantile] {
        &self.quantiles
    }

    /// Gets the exact number of values inserted so far.
    pub fn count(&self) -> u64 {
        self.count
    }

    /// Whether or not any value was inserted since creation or the last reset.
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Inserts a value.
    pub fn insert(&mut self, value: f64) {
        self.buffer.push(value);
        self.count += 1;

        if self.buffer.len() >= self.compress_interval.get() {
            self.flush();
        }
    }

    /// Estimates the value at quantile `quantile`.
    ///
    /// Returns `None` if no value was inserted. A `quantile` of zero or below returns the exact
    /// minimum, and a `quantile` of one or above returns the exact maximum.
    pub fn query(&mut self, quantile: f64) -> Option<f64> {
        self.flush();
        self.query_flushed(quantile)
    }

    /// Drops every value, returning the sketch to its freshly-created state.
    pub fn reset(&mut self) {
        self.samples.clear();
        self.buffer.clear();
        self.count = 0;
    }

    /// Builds a read-only sketch covering every value inserted into `parts`.
    ///
    /// Rank bounds are combined across parts, so the error band of the merged sketch at a given
    /// rank is the sum of the bands of the parts. Pending inserts of each part are taken into
    /// account without flushing it.
    pub fn merged<'a, I>(quantiles: Arc<[Quantile]>, parts: I) -> CkmsQuantiles
    where
        I: IntoIterator<Item = &'a CkmsQuantiles>,
    {
        let parts = parts.into_iter().filter(|part| !part.is_empty()).collect::<Vec<_>>();

        // Pending inserts are exact: each one is a run of its own with unit rank bounds.
        let pending = parts
            .iter()
            .filter(|part| !part.buffer.is_empty())
            .map(|part| {
                let mut values = part.buffer.clone();
                values.sort_unstable_by(f64::total_cmp);
                values.into_iter().map(|v| Entry { v, g: 1, delta: 0 }).collect::<Vec<_>>()
            })
            .collect::<Vec<_>>();

        let runs = parts
            .iter()
            .map(|part| part.samples.as_slice())
            .chain(pending.iter().map(Vec::as_slice))
            .filter(|run| !run.is_empty())
            .collect::<Vec<_>>();

        let mut merged = CkmsQuantiles::new(quantiles);
        merged.samples = merge_runs(&runs);
        merged.count = merged.samples.iter().map(|e| e.g).sum();
        merged
    }

    #[cfg(test)]
    fn tuples(&self) -> usize {
        self.samples.len()
    }

    /// Largest `g + Δ` a tuple may have at `rank` once `count` values were inserted.
    fn allowable_error(&self, rank: f64, count: f64) -> f64 {
        let band = self
            .quantiles
            .iter()
            .filter(|q| q.is_bounding())
            .map(|q| q.band(rank, count))
            .fold(f64::INFINITY, f64::min);

        // When only the extremes are targeted, they are answered exactly anyway, so fall back to a
        // uniform band to keep memory bounded.
        let band = if band.is_finite() {
            band
        } else {
            self.quantiles
                .iter()
                .map(|q| 2.0 * q.error() * count)
                .fold(count, f64::min)
        };

        band.max(1.0)
    }

    fn flush(&mut self) {
        if self.buffer.is_empty() {
            return;
        }

        self.buffer.sort_unstable_by(f64::total_cmp);

        let mut merged = Vec::with_capacity(self.samples.len() + self.buffer.len());
        let mut existing = std::mem::take(&mut self.samples).into_iter().peekable();
        for &v in &self.buffer {
            while let Some(entry) = existing.next_if(|e| e.v.total_cmp(&v) != Ordering::Greater) {
                merged.push(entry);
            }

            // A new minimum or maximum has an exact rank. Anything in between inherits the rank
            // uncertainty of its successor.
            let delta = match existing.peek() {
                Some(next) if !merged.is_empty() => next.g + next.delta - 1,
                _ => 0,
            };
            merged.push(Entry { v, g: 1, delta });
        }
        merged.extend(existing);

        self.samples = merged;
        self.buffer.clear();
        self.compress();
    }

    fn compress(&mut self) {
        if self.samples.len() < 3 {
            return;
        }

        let count = self.count as f64;
        let mut rank: u64 = self.samples.iter().map(|e| e.g).sum();
        let mut compacted: Vec<Entry> = Vec::with_capacity(self.samples.len());

        // Walk backwards so that `compacted.last()` is always the successor of `entry`, and `rank`
        // is the sum of `g` over every tuple before `entry`.
        for entry in std::mem::take(&mut self.samples).into_iter().rev() {
            rank -= entry.g;

            if let Some(next) = compacted.last_mut() {
                // The first tuple holds the minimum and is never folded away.
                let folded = (entry.g + next.g + next.delta) as f64;
                if rank > 0 && folded <= self.allowable_error(rank as f64, count) {
                    next.g += entry.g;
                    continue;
                }
            }

            compacted.push(entry);
        }

        compacted.reverse();
        self.samples = compacted;
    }

    fn query_flushed(&self, quantile: f64) -> Option<f64> {
        let first = self.samples.first()?;
        if quantile <= 0.0 {
            return Some(first.v);
        }

        let last = self.samples.last()?;
        if quantile >= 1.0 {
            return Some(last.v);
        }

        // Pick the tuple whose rank bounds stray the least from the target rank. Lowest possible
        // ranks only grow from here, so the walk stops once they alone stray further.
        let target = quantile * self.count as f64;
        let mut best = (f64::INFINITY, first.v);
        let mut rank_min = 0;
        for entry in &self.samples {
            rank_min += entry.g;
            let rank_max = rank_min + entry.delta;

            let error = (target - rank_min as f64).max(rank_max as f64 - target);
            if error < best.0 {
                best = (error, entry.v);
            }
            if rank_min as f64 - target >= best.0 {
                break;
            }
        }

        Some(best.1)
    }
}

struct Cursor<'a> {
    entries: &'a [Entry],
    pos: usize,
    rank: u64,
    total: u64,
}

impl<'a> Cursor<'a> {
    fn new(entries: &'a [Entry]) -> Cursor<'a> {
        Cursor { entries, pos: 0, rank: 0, total: entries.iter().map(|e| e.g).sum() }
    }

    fn peek(&self) -> Option<&'a Entry> {
        self.entries.get(self.pos)
    }

    /// Highest possible rank of anything ordered before the next unconsumed tuple.
    fn upper_rank(&self) -> u64 {
        match self.peek() {
            Some(next) => self.rank + next.g + next.delta - 1,
            None => self.total,
        }
    }
}

/// Merges sorted tuple runs into a single run with combined rank bounds.
fn merge_runs(runs: &[&[Entry]]) -> Vec<Entry> {
    let mut cursors = runs.iter().map(|run| Cursor::new(run)).collect::<Vec<_>>();
    let mut merged = Vec::with_capacity(runs.iter().map(|run| run.len()).sum());
    let mut prev_rank_min = 0;

    loop {
        let mut picked: Option<(usize, &Entry)> = None;
        for (idx, cursor) in cursors.iter().enumerate() {
            if let Some(entry) = cursor.peek() {
                let better = match picked {
                    None => true,
                    Some((_, current)) => entry.v.total_cmp(&current.v) == Ordering::Less,
                };
                if better {
                    picked = Some((idx, entry));
                }
            }
        }

        let Some((picked, entry)) = picked else {
            break;
        };

        let cursor = &mut cursors[picked];
        cursor.pos += 1;
        cursor.rank += entry.g;

        let mut rank_min = cursor.rank;
        let mut rank_max = cursor.rank + entry.delta;
        for (idx, other) in cursors.iter().enumerate() {
            if idx != picked {
                rank_min += other.rank;
                rank_max += other.upper_rank();
            }
        }

        merged.push(Entry { v: entry.v, g: rank_min - prev_rank_min, delta: rank_max - rank_min });
        prev_rank_min = rank_min;
    }

    merged
}
