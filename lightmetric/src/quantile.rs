use crate::error::BuildError;
use crate::sample::format_float;

/// A quantile target paired with the rank error tolerated when estimating it.
///
/// A quantile of `0.99` with an error of `0.001` asks for the 99th percentile, and accepts any
/// observation whose rank lies between the 98.9th and the 99.1st percentile as the answer.
///
/// On top of the raw values, we precompute the two slopes of the error band used by the sketch
/// (`u` below the target rank, `v` above it), along with the label value used when exposing the
/// quantile. The band equals `error * count` at the target rank and widens linearly away from it,
/// so an entry spanning the target never covers more than the tolerated error on either side.
#[derive(Debug, Clone)]
pub struct Quantile {
    quantile: f64,
    error: f64,
    u: f64,
    v: f64,
    label: String,
}

impl Quantile {
    /// Creates a new [`Quantile`].
    ///
    /// ## Errors
    ///
    /// If either `quantile` or `error` is outside of `[0, 1]` (or NaN), an error variant will be
    /// returned.
    pub fn new(quantile: f64, error: f64) -> Result<Quantile, BuildError> {
        if !(0.0..=1.0).contains(&quantile) {
            return Err(BuildError::InvalidQuantile(quantile));
        }
        if !(0.0..=1.0).contains(&error) {
            return Err(BuildError::InvalidQuantileError(error));
        }

        Ok(Quantile {
            quantile,
            error,
            u: error / (1.0 - quantile),
            v: error / quantile,
            label: format_float(quantile),
        })
    }

    /// Gets the quantile target.
    pub fn quantile(&self) -> f64 {
        self.quantile
    }

    /// Gets the tolerated rank error.
    pub fn error(&self) -> f64 {
        self.error
    }

    /// Gets the label value used for the `quantile` dimension.
    pub fn label(&self) -> &str {
        self.label.as_str()
    }

    /// Whether or not this quantile constrains the error band of the sketch.
    ///
    /// The minimum and maximum are always answered exactly by the sketch, so they never need to
    /// hold back compaction.
    pub(crate) fn is_bounding(&self) -> bool {
        self.quantile > 0.0 && self.quantile < 1.0
    }

    /// Allowable rank error for an item at rank `rank` out of `count` items.
    pub(crate) fn band(&self, rank: f64, count: f64) -> f64 {
        if rank >= self.quantile * count {
            self.v * rank
        } else {
            self.u * (count - rank)
        }
    }
}

impl PartialEq for Quantile {
    fn eq(&self, other: &Self) -> bool {
        self.quantile == other.quantile && self.error == other.error
    }
}

/// Parses a slice of `(quantile, error)` pairs into a vector of [`Quantile`]s.
///
/// ## Errors
///
/// Fails on the first pair that is out of range.
pub fn parse_quantiles(quantiles: &[(f64, f64)]) -> Result<Vec<Quantile>, BuildError> {
    quantiles.iter().map(|(q, e)| Quantile::new(*q, *e)).collect()
}

#[cfg(test)]
mod tests {
    use super::{parse_quantiles, Quantile};
    use crate::error::BuildError;

    #[test]
    fn test_quantiles() {
        let min = Quantile::new(0.0, 0.01).unwrap();
        assert_eq!(min.quantile(), 0.0);
        assert_eq!(min.error(), 0.01);
        assert_eq!(min.label(), "0");
        assert!(!min.is_bounding());

        let max = Quantile::new(1.0, 0.0).unwrap();
        assert_eq!(max.label(), "1");
        assert!(!max.is_bounding());

        let median = Quantile::new(0.5, 0.05).unwrap();
        assert_eq!(median.label(), "0.5");
        assert!(median.is_bounding());

        let p99 = Quantile::new(0.99, 0.001).unwrap();
        assert_eq!(p99.label(), "0.99");

        let p999 = Quantile::new(0.999, 0.0001).unwrap();
        assert_eq!(p999.label(), "0.999");
    }

    #[test]
    fn test_quantiles_out_of_range() {
        assert_eq!(Quantile::new(-0.1, 0.01), Err(BuildError::InvalidQuantile(-0.1)));
        assert_eq!(Quantile::new(1.2, 0.01), Err(BuildError::InvalidQuantile(1.2)));
        assert_eq!(Quantile::new(0.5, -0.01), Err(BuildError::InvalidQuantileError(-0.01)));
        assert_eq!(Quantile::new(0.5, 1.5), Err(BuildError::InvalidQuantileError(1.5)));
        assert!(Quantile::new(f64::NAN, 0.01).is_err());
    }

    #[test]
    fn test_band() {
        // Below the target rank, the band narrows as we approach the end of the stream.
        let median = Quantile::new(0.5, 0.05).unwrap();
        assert!((median.band(0.0, 100.0) - 10.0).abs() < 1e-9);
        assert!((median.band(50.0, 100.0) - 5.0).abs() < 1e-9);
        assert!((median.band(100.0, 100.0) - 10.0).abs() < 1e-9);

        // At the target rank, the band is exactly the tolerated error.
        let p99 = Quantile::new(0.99, 0.01).unwrap();
        assert!((p99.band(99.0, 100.0) - 1.0).abs() < 1e-9);
        assert!((p99.band(0.0, 100.0) - 100.0).abs() < 1e-9);
    }

    #[test]
    fn test_parse_quantiles() {
        let empty = vec![];
        let result = parse_quantiles(&empty).unwrap();
        assert_eq!(result.len(), 0);

        let normal = vec![(0.5, 0.05), (0.9, 0.01), (0.99, 0.001)];
        let result = parse_quantiles(&normal).unwrap();
        assert_eq!(result.len(), 3);
        assert_eq!(result[0], Quantile::new(0.5, 0.05).unwrap());
        assert_eq!(result[2], Quantile::new(0.99, 0.001).unwrap());

        let invalid = vec![(0.5, 0.05), (2.0, 0.01)];
        assert_eq!(parse_quantiles(&invalid), Err(BuildError::InvalidQuantile(2.0)));
    }
}
