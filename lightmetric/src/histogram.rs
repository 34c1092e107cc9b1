//! Bucketed histograms.
use std::sync::atomic::Ordering;
use std::sync::Arc;

use quanta::{Clock, Instant};

use crate::atomics::{AtomicF64, AtomicU64};
use crate::error::{BuildError, RegistryError, UsageError};
use crate::family::{ChildFactory, Family};
use crate::opts::Opts;
use crate::registry::{Collector, Registry};
use crate::sample::{format_float, MetricFamilySamples, MetricType, Sample};

/// Default bucket upper bounds, tuned for request latencies measured in seconds.
pub const DEFAULT_BUCKETS: [f64; 14] =
    [0.005, 0.01, 0.025, 0.05, 0.075, 0.1, 0.25, 0.5, 0.75, 1.0, 2.5, 5.0, 7.5, 10.0];

/// Creates `count` buckets, the first with an upper bound of `start`, each following bucket
/// `width` higher than the previous one.
///
/// ## Errors
///
/// If `count` is zero, or if `width` is not strictly positive, an error variant will be returned.
pub fn linear_buckets(start: f64, width: f64, count: usize) -> Result<Vec<f64>, BuildError> {
    if count == 0 {
        return Err(BuildError::InvalidBucketLayout("count must be at least one"));
    }
    if !start.is_finite() {
        return Err(BuildError::InvalidBucketLayout("start must be finite"));
    }
    if width.is_nan() || width <= 0.0 || width.is_infinite() {
        return Err(BuildError::InvalidBucketLayout("width must be positive"));
    }

    Ok((0..count).map(|i| start + width * i as f64).collect())
}

/// Creates `count` buckets, the first with an upper bound of `start`, each following bucket
/// `factor` times higher than the previous one.
///
/// ## Errors
///
/// If `count` is zero, if `start` is not strictly positive, or if `factor` is not greater than
/// one, an error variant will be returned.
pub fn exponential_buckets(start: f64, factor: f64, count: usize) -> Result<Vec<f64>, BuildError> {
    if count == 0 {
        return Err(BuildError::InvalidBucketLayout("count must be at least one"));
    }
    if start.is_nan() || start <= 0.0 || start.is_infinite() {
        return Err(BuildError::InvalidBucketLayout("start must be positive"));
    }
    if factor.is_nan() || factor <= 1.0 {
        return Err(BuildError::InvalidBucketLayout("factor must be greater than one"));
    }

    Ok((0..count)
        .scan(start, |bound, _| {
            let current = *bound;
            *bound *= factor;
            Some(current)
        })
        .collect())
}

/// Point-in-time value of a [`HistogramChild`].
#[derive(Clone, Debug, PartialEq)]
pub struct HistogramValue {
    /// Cumulative bucket counts, as `(upper bound, count)` pairs, ending with the `+Inf` bucket.
    pub buckets: Vec<(f64, u64)>,
    /// Number of observations.
    pub count: u64,
    /// Sum of observations.
    pub sum: f64,
}

/// Observation counts per bucket, along with their sum.
///
/// Buckets are stored individually and only made cumulative when read, so an observation only
/// ever touches a single bucket.
#[derive(Debug)]
pub struct HistogramChild {
    bounds: Arc<[f64]>,
    buckets: Box<[AtomicU64]>,
    sum: AtomicF64,
    clock: Clock,
}

impl HistogramChild {
    /// Records an observation.
    ///
    /// NaN lands in the `+Inf` bucket.
    pub fn observe(&self, value: f64) {
        let last = self.bounds.len() - 1;
        let idx = self.bounds.iter().position(|bound| value <= *bound).unwrap_or(last);

        self.buckets[idx].fetch_add(1, Ordering::Relaxed);
        self.sum.add(value);
    }

    /// Starts a timer which observes its elapsed time, in seconds, once done.
    pub fn start_timer(self: &Arc<Self>) -> HistogramTimer {
        HistogramTimer { child: Arc::clone(self), start: self.clock.now() }
    }

    /// Gets the current value.
    pub fn get(&self) -> HistogramValue {
        let mut count = 0;
        let buckets = self
            .bounds
            .iter()
            .zip(self.buckets.iter())
            .map(|(bound, bucket)| {
                count += bucket.load(Ordering::Relaxed);
                (*bound, count)
            })
            .collect();

        HistogramValue { buckets, count, sum: self.sum.get() }
    }
}

/// Measures the duration of an operation for a histogram.
#[derive(Debug)]
#[must_use = "a timer does nothing until `observe_duration` is called"]
pub struct HistogramTimer {
    child: Arc<HistogramChild>,
    start: Instant,
}

impl HistogramTimer {
    /// Observes the number of seconds elapsed since the timer started.
    ///
    /// Returns the elapsed time, in seconds.
    pub fn observe_duration(self) -> f64 {
        let elapsed = self.child.clock.now().saturating_duration_since(self.start).as_secs_f64();
        self.child.observe(elapsed);
        elapsed
    }
}

#[derive(Debug)]
struct HistogramFactory {
    bounds: Arc<[f64]>,
    clock: Clock,
}

impl ChildFactory for HistogramFactory {
    type Child = HistogramChild;

    fn new_child(&self) -> HistogramChild {
        HistogramChild {
            bounds: Arc::clone(&self.bounds),
            buckets: self.bounds.iter().map(|_| AtomicU64::new(0)).collect(),
            sum: AtomicF64::default(),
            clock: self.clock.clone(),
        }
    }
}

/// Builder for [`Histogram`].
#[derive(Debug)]
pub struct HistogramBuilder {
    opts: Opts,
    buckets: Vec<f64>,
    clock: Clock,
}

impl HistogramBuilder {
    /// Creates a new [`HistogramBuilder`] using [`DEFAULT_BUCKETS`].
    pub fn new(opts: Opts) -> HistogramBuilder {
        HistogramBuilder { opts, buckets: DEFAULT_BUCKETS.to_vec(), clock: Clock::new() }
    }

    /// Sets the bucket upper bounds.
    ///
    /// A `+Inf` bucket is always added if not present.
    ///
    /// ## Errors
    ///
    /// If `buckets` is empty, or is not in strictly increasing order, an error variant will be
    /// returned.
    pub fn buckets(mut self, buckets: Vec<f64>) -> Result<HistogramBuilder, BuildError> {
        if buckets.is_empty() {
            return Err(BuildError::EmptyBuckets);
        }
        if buckets.iter().any(|b| b.is_nan()) || buckets.windows(2).any(|w| w[0] >= w[1]) {
            return Err(BuildError::UnsortedBuckets);
        }

        self.buckets = buckets;
        Ok(self)
    }

    /// Sets linearly spaced buckets.
    ///
    /// See [`linear_buckets`].
    pub fn linear_buckets(
        self,
        start: f64,
        width: f64,
        count: usize,
    ) -> Result<HistogramBuilder, BuildError> {
        let buckets = linear_buckets(start, width, count)?;
        self.buckets(buckets)
    }

    /// Sets exponentially spaced buckets.
    ///
    /// See [`exponential_buckets`].
    pub fn exponential_buckets(
        self,
        start: f64,
        factor: f64,
        count: usize,
    ) -> Result<HistogramBuilder, BuildError> {
        let buckets = exponential_buckets(start, factor, count)?;
        self.buckets(buckets)
    }

    /// Sets the clock timers read time from.
    #[must_use]
    pub fn clock(mut self, clock: Clock) -> HistogramBuilder {
        self.clock = clock;
        self
    }

    /// Builds the [`Histogram`].
    ///
    /// ## Errors
    ///
    /// If the name or any of the label names is invalid, or if a label is named `le`, an error
    /// variant will be returned.
    pub fn build(self) -> Result<Histogram, BuildError> {
        let name = self.opts.validate(&["le"])?;
        let (help, label_names) = self.opts.into_parts();

        let mut bounds = self.buckets;
        if bounds.last() != Some(&f64::INFINITY) {
            bounds.push(f64::INFINITY);
        }
        let factory = HistogramFactory { bounds: bounds.into(), clock: self.clock };

        Ok(Histogram { family: Arc::new(Family::new(name, help, label_names, factory)) })
    }
}

/// A histogram, with one [`HistogramChild`] per combination of label values.
///
/// `Histogram` is a cheap handle: clones share the same children.
#[derive(Clone, Debug)]
pub struct Histogram {
    family: Arc<Family<HistogramFactory>>,
}

impl Histogram {
    /// Creates a new [`Histogram`] with the default buckets.
    ///
    /// ## Errors
    ///
    /// If the name or any of the label names is invalid, or if a label is named `le`, an error
    /// variant will be returned.
    pub fn new(opts: Opts) -> Result<Histogram, BuildError> {
        HistogramBuilder::new(opts).build()
    }

    /// Creates a [`HistogramBuilder`], to configure buckets.
    pub fn builder(opts: Opts) -> HistogramBuilder {
        HistogramBuilder::new(opts)
    }

    /// Registers this histogram, returning it back for chaining.
    ///
    /// ## Errors
    ///
    /// If any of the names of this histogram is already taken, an error variant will be returned.
    pub fn register(self, registry: &Registry) -> Result<Histogram, RegistryError> {
        registry.register(Arc::new(self.clone()))?;
        Ok(self)
    }

    /// Gets the full name of this histogram.
    pub fn name(&self) -> &str {
        self.family.name()
    }

    /// Gets the bucket upper bounds, including `+Inf`.
    pub fn bounds(&self) -> &[f64] {
        &self.family.factory().bounds
    }

    /// Gets or creates the child for the given label values.
    ///
    /// ## Errors
    ///
    /// If the number of label values does not match the number of label names, an error variant
    /// will be returned.
    pub fn labels<S: AsRef<str>>(&self, values: &[S]) -> Result<Arc<HistogramChild>, UsageError> {
        self.family.labels(values)
    }

    /// Removes the child for the given label values.
    ///
    /// See [`Family::remove`].
    pub fn remove<S: AsRef<str>>(&self, values: &[S]) -> Result<bool, UsageError> {
        self.family.remove(values)
    }

    /// Removes every child.
    pub fn clear(&self) {
        self.family.clear();
    }

    /// Records an observation on the unlabeled histogram.
    pub fn observe(&self, value: f64) -> Result<(), UsageError> {
        self.unlabeled().map(|child| child.observe(value))
    }

    /// Starts a timer for the unlabeled histogram.
    pub fn start_timer(&self) -> Result<HistogramTimer, UsageError> {
        self.unlabeled().map(|child| child.start_timer())
    }

    /// Gets the value of the unlabeled histogram.
    pub fn get(&self) -> Result<HistogramValue, UsageError> {
        self.unlabeled().map(|child| child.get())
    }

    fn unlabeled(&self) -> Result<Arc<HistogramChild>, UsageError> {
        self.family.labels::<&str>(&[])
    }
}

impl Collector for Histogram {
    fn metric_names(&self) -> Vec<String> {
        let name = self.family.name();
        vec![
            name.to_string(),
            format!("{name}_bucket"),
            format!("{name}_count"),
            format!("{name}_sum"),
        ]
    }

    fn collect(&self) -> Vec<MetricFamilySamples> {
        let name = self.family.name();
        let label_names = self.family.label_names();
        let bucket_name = format!("{name}_bucket");
        let mut bucket_label_names = label_names.to_vec();
        bucket_label_names.push("le".to_string());

        let mut samples = Vec::new();
        for (values, child) in self.family.children() {
            let value = child.get();

            for (bound, count) in &value.buckets {
                let mut bucket_values = values.clone();
                bucket_values.push(format_float(*bound));
                samples.push(Sample::new(
                    bucket_name.as_str(),
                    bucket_label_names.clone(),
                    bucket_values,
                    *count as f64,
                ));
            }

            samples.push(Sample::new(
                format!("{name}_count"),
                label_names.to_vec(),
                values.clone(),
                value.count as f64,
            ));
            let sum_name = format!("{name}_sum");
            samples.push(Sample::new(sum_name, label_names.to_vec(), values, value.sum));
        }

        vec![MetricFamilySamples {
            name: name.to_string(),
            metric_type: MetricType::Histogram,
            help: self.family.help().to_string(),
            samples,
        }]
    }
}
