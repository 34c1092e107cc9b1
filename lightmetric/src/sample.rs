//! Structured sample data produced by collectors.
//!
//! Collectors never format text themselves: they produce [`MetricFamilySamples`], and an
//! exposition layer renders those into whatever wire format it speaks.

/// Metric type.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, PartialOrd, Ord)]
pub enum MetricType {
    /// Monotonically increasing value.
    Counter,
    /// Value that can go up and down.
    Gauge,
    /// Bucketed distribution.
    Histogram,
    /// Distribution exposed as quantiles, with a count and a sum.
    Summary,
    /// Anything else.
    Untyped,
}

impl MetricType {
    /// Gets the name of this type as used in exposition formats.
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricType::Counter => "counter",
            MetricType::Gauge => "gauge",
            MetricType::Histogram => "histogram",
            MetricType::Summary => "summary",
            MetricType::Untyped => "untyped",
        }
    }
}

/// A single labeled value.
#[derive(Clone, Debug, PartialEq)]
pub struct Sample {
    /// Sample name, which can carry a suffix such as `_count` or `_sum`.
    pub name: String,
    /// Label names, positionally matched to `label_values`.
    pub label_names: Vec<String>,
    /// Label values.
    pub label_values: Vec<String>,
    /// Sample value.
    pub value: f64,
}

impl Sample {
    /// Creates a new [`Sample`].
    pub fn new<N>(name: N, label_names: Vec<String>, label_values: Vec<String>, value: f64) -> Self
    where
        N: Into<String>,
    {
        Sample { name: name.into(), label_names, label_values, value }
    }

    /// Gets the value of the label with the given name, if present.
    pub fn label(&self, name: &str) -> Option<&str> {
        self.label_names
            .iter()
            .position(|n| n == name)
            .and_then(|idx| self.label_values.get(idx))
            .map(String::as_str)
    }
}

/// All samples of one metric, along with its metadata.
#[derive(Clone, Debug, PartialEq)]
pub struct MetricFamilySamples {
    /// Metric name.
    pub name: String,
    /// Metric type.
    pub metric_type: MetricType,
    /// Help text.
    pub help: String,
    /// Samples.
    pub samples: Vec<Sample>,
}

/// Formats a floating-point value the way scrapers expect it.
///
/// Finite values use the shortest representation that round-trips to the same value, so `1.0`
/// renders as `1` and `0.99` as `0.99`. Very small and very large magnitudes switch to exponent
/// notation, so `1e-20` stays `1e-20`. Non-finite values render as `+Inf`, `-Inf` and `NaN`.
pub fn format_float(value: f64) -> String {
    if value.is_nan() {
        "NaN".to_string()
    } else if value == f64::INFINITY {
        "+Inf".to_string()
    } else if value == f64::NEG_INFINITY {
        "-Inf".to_string()
    } else {
        let mut buffer = ryu::Buffer::new();
        let rendered = buffer.format_finite(value);
        rendered.strip_suffix(".0").unwrap_or(rendered).to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::{format_float, MetricType, Sample};

    #[test]
    fn test_format_float() {
        let cases = &[
            (0.0, "0"),
            (1.0, "1"),
            (0.5, "0.5"),
            (0.99, "0.99"),
            (0.999, "0.999"),
            (-3.14, "-3.14"),
            (5050.0, "5050"),
            (0.001, "0.001"),
            (1e-9, "1e-9"),
            (1e-20, "1e-20"),
            (-2.5e-30, "-2.5e-30"),
            (1e300, "1e300"),
            (1.5e20, "1.5e20"),
            (1e15, "1000000000000000"),
            (f64::INFINITY, "+Inf"),
            (f64::NEG_INFINITY, "-Inf"),
            (f64::NAN, "NaN"),
        ];

        for (input, expected) in cases {
            assert_eq!(format_float(*input), *expected);
        }
    }

    #[test]
    fn test_format_float_round_trips() {
        for value in [0.1, 0.2 + 0.1, 1.0 / 3.0, 123_456.789, f64::MIN_POSITIVE, f64::MAX, 1e-300] {
            let rendered = format_float(value);
            assert_eq!(rendered.parse::<f64>().unwrap(), value);
        }
    }

    #[test]
    fn test_sample_label_lookup() {
        let sample = Sample::new(
            "latency",
            vec!["method".to_string(), "quantile".to_string()],
            vec!["GET".to_string(), "0.5".to_string()],
            1.0,
        );

        assert_eq!(sample.label("quantile"), Some("0.5"));
        assert_eq!(sample.label("method"), Some("GET"));
        assert_eq!(sample.label("path"), None);
        assert_eq!(MetricType::Summary.as_str(), "summary");
    }
}
