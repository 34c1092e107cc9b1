//! Summaries: count, sum and streaming quantiles over a sliding time window.
use std::num::NonZeroUsize;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use quanta::{Clock, Instant};

use crate::atomics::{AtomicF64, AtomicU64};
use crate::ckms::DEFAULT_COMPRESS_INTERVAL;
use crate::error::{BuildError, RegistryError, UsageError};
use crate::family::{ChildFactory, Family};
use crate::opts::Opts;
use crate::quantile::Quantile;
use crate::registry::{Collector, Registry};
use crate::sample::{MetricFamilySamples, MetricType, Sample};
use crate::window::{bucket_width, TimeWindowQuantiles};

/// Default length of the window quantiles are computed over.
pub const DEFAULT_MAX_AGE: Duration = Duration::from_secs(600);

/// Default number of age buckets the window is split into.
pub const DEFAULT_AGE_BUCKETS: usize = 5;

/// Point-in-time value of a [`SummaryChild`].
#[derive(Clone, Debug, PartialEq)]
pub struct SummaryValue {
    /// Number of observations.
    pub count: u64,
    /// Sum of observations.
    pub sum: f64,
    /// Estimated value of each configured quantile, as `(quantile, estimate)` pairs.
    ///
    /// Estimates are `None` when no observation is live in the window.
    pub quantiles: Vec<(f64, Option<f64>)>,
}

/// Observation count, sum and windowed quantiles for one combination of label values.
///
/// The count, the sum and the quantile window are updated independently of each other, without
/// a lock spanning all three. A value read concurrently with observations may see the count of an
/// observation without its sum, or the other way around. No update is ever lost, and all three
/// agree again once observations quiesce.
#[derive(Debug)]
pub struct SummaryChild {
    count: AtomicU64,
    sum: AtomicF64,
    window: Option<TimeWindowQuantiles>,
    clock: Clock,
}

impl SummaryChild {
    /// Records an observation.
    ///
    /// NaN and infinities are accepted, and propagate into the sum as per IEEE semantics.
    pub fn observe(&self, value: f64) {
        self.count.fetch_add(1, Ordering::Relaxed);
        self.sum.add(value);
        if let Some(window) = &self.window {
            window.insert(value);
        }
    }

    /// Starts a timer which observes its elapsed time, in seconds, once done.
    pub fn start_timer(self: &Arc<Self>) -> SummaryTimer {
        SummaryTimer { child: Arc::clone(self), start: self.clock.now() }
    }

    /// Gets the current value.
    pub fn get(&self) -> SummaryValue {
        let count = self.count.load(Ordering::Relaxed);
        let sum = self.sum.get();
        let quantiles = match &self.window {
            Some(window) => window
                .quantiles()
                .iter()
                .map(Quantile::quantile)
                .zip(window.query_all())
                .collect(),
            None => Vec::new(),
        };

        SummaryValue { count, sum, quantiles }
    }
}

/// Measures the duration of an operation for a summary.
///
/// The timer holds on to the child it was started from, so it keeps recording into it even if the
/// child is removed from its summary in the meantime.
#[derive(Debug)]
#[must_use = "a timer does nothing until `observe_duration` is called"]
pub struct SummaryTimer {
    child: Arc<SummaryChild>,
    start: Instant,
}

impl SummaryTimer {
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
struct SummaryFactory {
    quantiles: Arc<[Quantile]>,
    width: Duration,
    age_buckets: usize,
    compress_interval: NonZeroUsize,
    clock: Clock,
}

impl ChildFactory for SummaryFactory {
    type Child = SummaryChild;

    fn new_child(&self) -> SummaryChild {
        let window = if self.quantiles.is_empty() {
            None
        } else {
            let window = TimeWindowQuantiles::with_bucket_width(
                Arc::clone(&self.quantiles),
                self.width,
                self.age_buckets,
                self.clock.clone(),
            );
            Some(window.with_compress_interval(self.compress_interval))
        };

        SummaryChild {
            count: AtomicU64::new(0),
            sum: AtomicF64::default(),
            window,
            clock: self.clock.clone(),
        }
    }
}

/// Builder for [`Summary`].
///
/// Every setter validates its input right away, so a misconfigured summary fails at the call that
/// misconfigured it.
#[derive(Debug)]
pub struct SummaryBuilder {
    opts: Opts,
    quantiles: Vec<Quantile>,
    max_age: Duration,
    age_buckets: usize,
    compress_interval: NonZeroUsize,
    clock: Clock,
}

impl SummaryBuilder {
    /// Creates a new [`SummaryBuilder`] with no quantiles, over a window of [`DEFAULT_MAX_AGE`]
    /// split in [`DEFAULT_AGE_BUCKETS`].
    pub fn new(opts: Opts) -> SummaryBuilder {
        SummaryBuilder {
            opts,
            quantiles: Vec::new(),
            max_age: DEFAULT_MAX_AGE,
            age_buckets: DEFAULT_AGE_BUCKETS,
            compress_interval: DEFAULT_COMPRESS_INTERVAL,
            clock: Clock::new(),
        }
    }

    /// Adds a quantile to track, estimated to within `error` of its rank.
    ///
    /// If the same quantile is added more than once, the tightest error wins.
    ///
    /// ## Errors
    ///
    /// If either `quantile` or `error` is outside of `[0, 1]`, an error variant will be returned.
    pub fn quantile(mut self, quantile: f64, error: f64) -> Result<SummaryBuilder, BuildError> {
        self.quantiles.push(Quantile::new(quantile, error)?);
        Ok(self)
    }

    /// Sets the length of the window quantiles are computed over.
    ///
    /// ## Errors
    ///
    /// If `max_age` is zero, an error variant will be returned.
    pub fn max_age(mut self, max_age: Duration) -> Result<SummaryBuilder, BuildError> {
        if max_age.is_zero() {
            return Err(BuildError::ZeroMaxAge);
        }

        self.max_age = max_age;
        Ok(self)
    }

    /// Sets the number of age buckets the window is split into.
    ///
    /// More buckets expire observations more smoothly, at the cost of one sketch per bucket.
    ///
    /// ## Errors
    ///
    /// If `age_buckets` is zero, an error variant will be returned.
    pub fn age_buckets(mut self, age_buckets: usize) -> Result<SummaryBuilder, BuildError> {
        if age_buckets == 0 {
            return Err(BuildError::ZeroAgeBuckets);
        }

        self.age_buckets = age_buckets;
        Ok(self)
    }

    /// Sets the number of observations buffered by a sketch between two compactions.
    ///
    /// Defaults to [`DEFAULT_COMPRESS_INTERVAL`](crate::DEFAULT_COMPRESS_INTERVAL).
    ///
    /// ## Errors
    ///
    /// If `interval` is zero, an error variant will be returned.
    pub fn compress_interval(mut self, interval: usize) -> Result<SummaryBuilder, BuildError> {
        self.compress_interval =
            NonZeroUsize::new(interval).ok_or(BuildError::ZeroCompressInterval)?;
        Ok(self)
    }

    /// Sets the clock used for window rotation and timers.
    #[must_use]
    pub fn clock(mut self, clock: Clock) -> SummaryBuilder {
        self.clock = clock;
        self
    }

    /// Builds the [`Summary`].
    ///
    /// ## Errors
    ///
    /// If the name or any of the label names is invalid, or if a label is named `quantile`, an
    /// error variant will be returned.
    pub fn build(self) -> Result<Summary, BuildError> {
        let name = self.opts.validate(&["quantile"])?;
        let (help, label_names) = self.opts.into_parts();

        let mut quantiles = self.quantiles;
        quantiles.sort_by(|a, b| {
            a.quantile().total_cmp(&b.quantile()).then(a.error().total_cmp(&b.error()))
        });
        quantiles.dedup_by(|a, b| a.quantile() == b.quantile());

        let factory = SummaryFactory {
            quantiles: quantiles.into(),
            width: bucket_width(self.max_age, self.age_buckets),
            age_buckets: self.age_buckets,
            compress_interval: self.compress_interval,
            clock: self.clock,
        };

        Ok(Summary { family: Arc::new(Family::new(name, help, label_names, factory)) })
    }
}

/// A summary, with one [`SummaryChild`] per combination of label values.
///
/// Each child tracks the count and sum of its observations since creation, along with an estimate
/// of every configured quantile over the last `max_age` worth of observations. Without any
/// configured quantile, a summary only tracks count and sum.
///
/// `Summary` is a cheap handle: clones share the same children.
#[derive(Clone, Debug)]
pub struct Summary {
    family: Arc<Family<SummaryFactory>>,
}

impl Summary {
    /// Creates a new [`Summary`] without quantiles.
    ///
    /// ## Errors
    ///
    /// If the name or any of the label names is invalid, or if a label is named `quantile`, an
    /// error variant will be returned.
    pub fn new(opts: Opts) -> Result<Summary, BuildError> {
        SummaryBuilder::new(opts).build()
    }

    /// Creates a [`SummaryBuilder`], to configure quantiles and their window.
    pub fn builder(opts: Opts) -> SummaryBuilder {
        SummaryBuilder::new(opts)
    }

    /// Registers this summary, returning it back for chaining.
    ///
    /// ## Errors
    ///
    /// If any of the names of this summary is already taken, an error variant will be returned.
    pub fn register(self, registry: &Registry) -> Result<Summary, RegistryError> {
        registry.register(Arc::new(self.clone()))?;
        Ok(self)
    }

    /// Gets the full name of this summary.
    pub fn name(&self) -> &str {
        self.family.name()
    }

    /// Gets the configured quantiles, in increasing order.
    pub fn quantiles(&self) -> &[Quantile] {
        &self.family.factory().quantiles
    }

    /// Gets or creates the child for the given label values.
    ///
    /// ## Errors
    ///
    /// If the number of label values does not match the number of label names, an error variant
    /// will be returned.
    pub fn labels<S: AsRef<str>>(&self, values: &[S]) -> Result<Arc<SummaryChild>, UsageError> {
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

    /// Records an observation on the unlabeled summary.
    ///
    /// ## Errors
    ///
    /// If this summary has labels, an error variant will be returned.
    pub fn observe(&self, value: f64) -> Result<(), UsageError> {
        self.unlabeled().map(|child| child.observe(value))
    }

    /// Starts a timer for the unlabeled summary.
    ///
    /// ## Errors
    ///
    /// If this summary has labels, an error variant will be returned.
    pub fn start_timer(&self) -> Result<SummaryTimer, UsageError> {
        self.unlabeled().map(|child| child.start_timer())
    }

    /// Gets the value of the unlabeled summary.
    ///
    /// ## Errors
    ///
    /// If this summary has labels, an error variant will be returned.
    pub fn get(&self) -> Result<SummaryValue, UsageError> {
        self.unlabeled().map(|child| child.get())
    }

    fn unlabeled(&self) -> Result<Arc<SummaryChild>, UsageError> {
        self.family.labels::<&str>(&[])
    }
}

impl Collector for Summary {
    fn metric_names(&self) -> Vec<String> {
        let name = self.family.name();
        vec![name.to_string(), format!("{name}_count"), format!("{name}_sum")]
    }

    fn collect(&self) -> Vec<MetricFamilySamples> {
        let name = self.family.name();
        let label_names = self.family.label_names();
        let quantiles = self.quantiles();
        let mut quantile_label_names = label_names.to_vec();
        quantile_label_names.push("quantile".to_string());

        let mut samples = Vec::new();
        for (values, child) in self.family.children() {
            let value = child.get();

            // Quantiles without live observations are left out rather than exposed as zero.
            for (quantile, (_, estimate)) in quantiles.iter().zip(&value.quantiles) {
                if let Some(estimate) = estimate {
                    let mut quantile_values = values.clone();
                    quantile_values.push(quantile.label().to_string());
                    samples.push(Sample::new(
                        name,
                        quantile_label_names.clone(),
                        quantile_values,
                        *estimate,
                    ));
                }
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
            metric_type: MetricType::Summary,
            help: self.family.help().to_string(),
            samples,
        }]
    }
}

#[cfg(test)]
mod tests {
    use super::{Summary, SummaryBuilder};
    use crate::error::{BuildError, UsageError};
    use crate::opts::Opts;
    use crate::registry::Collector;
    use quanta::Clock;
    use std::time::Duration;

    fn latency(clock: Clock) -> SummaryBuilder {
        Summary::builder(Opts::new("latency_seconds", "Request latency."))
            .quantile(0.99, 0.01)
            .unwrap()
            .quantile(0.5, 0.05)
            .unwrap()
            .clock(clock)
    }

    #[test]
    fn test_summary_value() {
        let (clock, _mock) = Clock::mock();
        let summary = latency(clock).build().unwrap();

        for i in 1..=100 {
            summary.observe(i as f64).unwrap();
        }

        let value = summary.get().unwrap();
        assert_eq!(value.count, 100);
        assert_eq!(value.sum, 5050.0);
        assert_eq!(value.quantiles.len(), 2);

        let (phi, median) = value.quantiles[0];
        assert_eq!(phi, 0.5);
        let median = median.unwrap();
        assert!((median - 50.0).abs() <= 5.0, "median was {median}");

        let (phi, p99) = value.quantiles[1];
        assert_eq!(phi, 0.99);
        let p99 = p99.unwrap();
        assert!((p99 - 99.0).abs() <= 1.0, "p99 was {p99}");
    }

    #[test]
    fn test_quantiles_are_sorted_and_deduplicated() {
        let summary = Summary::builder(Opts::new("s", "help"))
            .quantile(0.9, 0.01)
            .unwrap()
            .quantile(0.5, 0.05)
            .unwrap()
            .quantile(0.9, 0.001)
            .unwrap()
            .build()
            .unwrap();

        let configured = summary
            .quantiles()
            .iter()
            .map(|q| (q.quantile(), q.error()))
            .collect::<Vec<_>>();
        assert_eq!(configured, vec![(0.5, 0.05), (0.9, 0.001)]);
    }

    #[test]
    fn test_invalid_configuration() {
        let builder = || Summary::builder(Opts::new("s", "help"));

        assert_eq!(builder().quantile(1.5, 0.01).err(), Some(BuildError::InvalidQuantile(1.5)));
        assert_eq!(
            builder().quantile(0.5, -0.1).err(),
            Some(BuildError::InvalidQuantileError(-0.1))
        );
        assert_eq!(builder().max_age(Duration::ZERO).err(), Some(BuildError::ZeroMaxAge));
        assert_eq!(builder().age_buckets(0).err(), Some(BuildError::ZeroAgeBuckets));
        assert_eq!(
            builder().compress_interval(0).err(),
            Some(BuildError::ZeroCompressInterval)
        );
        assert!(builder().compress_interval(1).is_ok());
        assert_eq!(
            Summary::new(Opts::new("s", "help").label_names(["quantile"])).err(),
            Some(BuildError::ReservedLabelName("quantile".to_string()))
        );
        assert_eq!(Summary::new(Opts::new("", "help")).err(), Some(BuildError::EmptyName));
    }

    #[test]
    fn test_without_quantiles() {
        let summary = Summary::new(Opts::new("payload_bytes", "Payload sizes.")).unwrap();
        summary.observe(512.0).unwrap();
        summary.observe(1024.0).unwrap();

        let value = summary.get().unwrap();
        assert_eq!(value.count, 2);
        assert_eq!(value.sum, 1536.0);
        assert!(value.quantiles.is_empty());

        let collected = summary.collect();
        let names = collected[0].samples.iter().map(|s| s.name.as_str()).collect::<Vec<_>>();
        assert_eq!(names, vec!["payload_bytes_count", "payload_bytes_sum"]);
    }

    #[test]
    fn test_non_finite_observations() {
        let (clock, _mock) = Clock::mock();
        let summary = latency(clock).build().unwrap();

        summary.observe(f64::INFINITY).unwrap();
        summary.observe(1.0).unwrap();

        let value = summary.get().unwrap();
        assert_eq!(value.count, 2);
        assert_eq!(value.sum, f64::INFINITY);
        assert_eq!(value.quantiles[1].1, Some(f64::INFINITY));
    }

    #[test]
    fn test_collect() {
        let (clock, _mock) = Clock::mock();
        let summary = latency(clock).build().unwrap();
        for i in 1..=100 {
            summary.observe(i as f64).unwrap();
        }

        let collected = summary.collect();
        assert_eq!(collected.len(), 1);
        assert_eq!(collected[0].name, "latency_seconds");

        let samples = &collected[0].samples;
        let shape = samples
            .iter()
            .map(|s| (s.name.as_str(), s.label("quantile")))
            .collect::<Vec<_>>();
        assert_eq!(
            shape,
            vec![
                ("latency_seconds", Some("0.5")),
                ("latency_seconds", Some("0.99")),
                ("latency_seconds_count", None),
                ("latency_seconds_sum", None),
            ]
        );
        assert_eq!(samples[2].value, 100.0);
        assert_eq!(samples[3].value, 5050.0);
        assert_eq!(
            summary.metric_names(),
            vec!["latency_seconds", "latency_seconds_count", "latency_seconds_sum"]
        );
    }

    #[test]
    fn test_quantiles_age_out_but_count_and_sum_do_not() {
        let (clock, mock) = Clock::mock();
        let summary = latency(clock).build().unwrap();
        summary.observe(3.0).unwrap();

        mock.increment(Duration::from_secs(600));

        let value = summary.get().unwrap();
        assert_eq!(value.count, 1);
        assert_eq!(value.sum, 3.0);
        assert_eq!(value.quantiles, vec![(0.5, None), (0.99, None)]);

        // No data is distinct from zero: aged out quantiles are left out of the samples.
        let collected = summary.collect();
        assert!(collected[0].samples.iter().all(|s| s.label("quantile").is_none()));
        assert_eq!(collected[0].samples.len(), 2);
    }

    #[test]
    fn test_labeled_summary() {
        let (clock, _mock) = Clock::mock();
        let summary = Summary::builder(
            Opts::new("rpc_seconds", "RPC latency.").label_names(["service", "method"]),
        )
        .quantile(0.5, 0.05)
        .unwrap()
        .clock(clock)
        .build()
        .unwrap();

        summary.labels(&["auth", "login"]).unwrap().observe(0.2);
        summary.labels(&["auth", "logout"]).unwrap().observe(0.1);

        assert_eq!(summary.observe(1.0), Err(UsageError::LabelArity { expected: 2, actual: 0 }));
        assert_eq!(
            summary.labels(&["auth"]).err(),
            Some(UsageError::LabelArity { expected: 2, actual: 1 })
        );

        let collected = summary.collect();
        let samples = &collected[0].samples;
        assert_eq!(samples.len(), 6);
        assert_eq!(samples[0].label_names, vec!["service", "method", "quantile"]);
        assert_eq!(samples[0].label_values, vec!["auth", "login", "0.5"]);
        assert_eq!(samples[0].value, 0.2);
        assert_eq!(samples[3].label_values, vec!["auth", "logout", "0.5"]);
    }

    #[test]
    fn test_timer() {
        let (clock, mock) = Clock::mock();
        let summary = latency(clock).build().unwrap();

        let timer = summary.start_timer().unwrap();
        mock.increment(Duration::from_millis(125));
        assert_eq!(timer.observe_duration(), 0.125);

        let value = summary.get().unwrap();
        assert_eq!(value.count, 1);
        assert_eq!(value.sum, 0.125);
        assert_eq!(value.quantiles[0].1, Some(0.125));
    }
}
