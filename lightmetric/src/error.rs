use thiserror::Error as ThisError;

/// Errors that could occur while configuring an instrument.
///
/// These are raised synchronously by builders and are never silently coerced into a default.
#[derive(Clone, Debug, PartialEq, ThisError)]
pub enum BuildError {
    /// The metric name was empty.
    #[error("metric name cannot be empty")]
    EmptyName,

    /// The metric name contained characters outside of `[a-zA-Z0-9_:]`, or started with a digit.
    #[error("invalid metric name '{0}'")]
    InvalidMetricName(String),

    /// A label name contained characters outside of `[a-zA-Z0-9_]`, or started with a digit.
    #[error("invalid label name '{0}'")]
    InvalidLabelName(String),

    /// A label name collides with a label synthesized by the instrument, or uses the reserved
    /// `__` prefix.
    #[error("label name '{0}' is reserved")]
    ReservedLabelName(String),

    /// The same label name was declared more than once.
    #[error("label name '{0}' declared more than once")]
    DuplicateLabelName(String),

    /// A quantile target was outside of `[0, 1]`.
    #[error("quantile {0} invalid: expected number between 0.0 and 1.0")]
    InvalidQuantile(f64),

    /// A quantile error was outside of `[0, 1]`.
    #[error("error {0} invalid: expected number between 0.0 and 1.0")]
    InvalidQuantileError(f64),

    /// The summary window was zero.
    #[error("max age must be greater than zero")]
    ZeroMaxAge,

    /// The summary age bucket count was zero.
    #[error("age bucket count must be greater than zero")]
    ZeroAgeBuckets,

    /// The summary sketch compress interval was zero.
    #[error("compress interval must be greater than zero")]
    ZeroCompressInterval,

    /// Histogram buckets were empty.
    #[error("histogram buckets cannot be empty")]
    EmptyBuckets,

    /// Histogram buckets were not strictly increasing, or contained NaN.
    #[error("histogram buckets must be in strictly increasing order")]
    UnsortedBuckets,

    /// Parameters for generated histogram buckets were invalid.
    #[error("invalid bucket layout: {0}")]
    InvalidBucketLayout(&'static str),
}

/// Errors that could occur while recording a value.
#[derive(Clone, Debug, PartialEq, ThisError)]
pub enum UsageError {
    /// The number of label values did not match the number of declared label names.
    #[error("incorrect number of label values: expected {expected}, got {actual}")]
    LabelArity {
        /// Number of declared label names.
        expected: usize,
        /// Number of label values given.
        actual: usize,
    },

    /// A counter was asked to go down, or to add NaN.
    #[error("counters can only increase, got increment of {0}")]
    NegativeIncrement(f64),
}

/// Errors that could occur while registering or unregistering collectors.
#[derive(Clone, Debug, PartialEq, Eq, ThisError)]
pub enum RegistryError {
    /// A collector with the given metric name is already registered.
    #[error("collector already registered that provides name: {0}")]
    AlreadyRegistered(String),

    /// The collector did not provide any metric name.
    #[error("collector provides no metric names")]
    Unnamed,

    /// No collector is registered under the given name.
    #[error("no collector registered under name: {0}")]
    NotRegistered(String),
}
