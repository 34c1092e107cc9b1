use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use quanta::{Clock, Instant};

use crate::atomics::AtomicF64;
use crate::error::{BuildError, RegistryError, UsageError};
use crate::family::{ChildFactory, Family};
use crate::opts::Opts;
use crate::registry::{Collector, Registry};
use crate::sample::{MetricFamilySamples, MetricType, Sample};

/// A value that can go up and down.
#[derive(Debug)]
pub struct GaugeChild {
    value: AtomicF64,
    clock: Clock,
}

impl GaugeChild {
    /// Increments the gauge by one.
    pub fn inc(&self) {
        self.value.add(1.0);
    }

    /// Increments the gauge by `amount`, which may be negative.
    pub fn inc_by(&self, amount: f64) {
        self.value.add(amount);
    }

    /// Decrements the gauge by one.
    pub fn dec(&self) {
        self.value.add(-1.0);
    }

    /// Decrements the gauge by `amount`, which may be negative.
    pub fn dec_by(&self, amount: f64) {
        self.value.add(-amount);
    }

    /// Sets the gauge to `value`.
    pub fn set(&self, value: f64) {
        self.value.set(value);
    }

    /// Sets the gauge to the current Unix time, in seconds.
    pub fn set_to_current_time(&self) {
        let now = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default();
        self.value.set(now.as_secs_f64());
    }

    /// Starts a timer which sets the gauge to its elapsed time, in seconds, once done.
    pub fn start_timer(self: &Arc<Self>) -> GaugeTimer {
        GaugeTimer { child: Arc::clone(self), start: self.clock.now() }
    }

    /// Gets the current value.
    pub fn get(&self) -> f64 {
        self.value.get()
    }
}

/// Measures the duration of an operation for a gauge.
#[derive(Debug)]
#[must_use = "a timer does nothing until `set_duration` is called"]
pub struct GaugeTimer {
    child: Arc<GaugeChild>,
    start: Instant,
}

impl GaugeTimer {
    /// Sets the gauge to the number of seconds elapsed since the timer started.
    ///
    /// Returns the elapsed time, in seconds.
    pub fn set_duration(self) -> f64 {
        let elapsed = self.child.clock.now().saturating_duration_since(self.start).as_secs_f64();
        self.child.set(elapsed);
        elapsed
    }
}

#[derive(Debug)]
struct GaugeFactory {
    clock: Clock,
}

impl ChildFactory for GaugeFactory {
    type Child = GaugeChild;

    fn new_child(&self) -> GaugeChild {
        GaugeChild { value: AtomicF64::default(), clock: self.clock.clone() }
    }
}

/// A gauge, with one [`GaugeChild`] per combination of label values.
///
/// `Gauge` is a cheap handle: clones share the same children.
#[derive(Clone, Debug)]
pub struct Gauge {
    family: Arc<Family<GaugeFactory>>,
}

impl Gauge {
    /// Creates a new [`Gauge`].
    ///
    /// ## Errors
    ///
    /// If the name or any of the label names is invalid, an error variant will be returned.
    pub fn new(opts: Opts) -> Result<Gauge, BuildError> {
        Gauge::with_clock(opts, Clock::new())
    }

    /// Creates a new [`Gauge`] whose timers read time from `clock`.
    ///
    /// ## Errors
    ///
    /// If the name or any of the label names is invalid, an error variant will be returned.
    pub fn with_clock(opts: Opts, clock: Clock) -> Result<Gauge, BuildError> {
        let name = opts.validate(&[])?;
        let (help, label_names) = opts.into_parts();
        let factory = GaugeFactory { clock };

        Ok(Gauge { family: Arc::new(Family::new(name, help, label_names, factory)) })
    }

    /// Registers this gauge, returning it back for chaining.
    ///
    /// ## Errors
    ///
    /// If the name of this gauge is already taken, an error variant will be returned.
    pub fn register(self, registry: &Registry) -> Result<Gauge, RegistryError> {
        registry.register(Arc::new(self.clone()))?;
        Ok(self)
    }

    /// Gets the full name of this gauge.
    pub fn name(&self) -> &str {
        self.family.name()
    }

    /// Gets or creates the child for the given label values.
    ///
    /// ## Errors
    ///
    /// If the number of label values does not match the number of label names, an error variant
    /// will be returned.
    pub fn labels<S: AsRef<str>>(&self, values: &[S]) -> Result<Arc<GaugeChild>, UsageError> {
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

    /// Increments the unlabeled gauge by one.
    pub fn inc(&self) -> Result<(), UsageError> {
        self.unlabeled().map(|child| child.inc())
    }

    /// Increments the unlabeled gauge by `amount`.
    pub fn inc_by(&self, amount: f64) -> Result<(), UsageError> {
        self.unlabeled().map(|child| child.inc_by(amount))
    }

    /// Decrements the unlabeled gauge by one.
    pub fn dec(&self) -> Result<(), UsageError> {
        self.unlabeled().map(|child| child.dec())
    }

    /// Decrements the unlabeled gauge by `amount`.
    pub fn dec_by(&self, amount: f64) -> Result<(), UsageError> {
        self.unlabeled().map(|child| child.dec_by(amount))
    }

    /// Sets the unlabeled gauge to `value`.
    pub fn set(&self, value: f64) -> Result<(), UsageError> {
        self.unlabeled().map(|child| child.set(value))
    }

    /// Sets the unlabeled gauge to the current Unix time, in seconds.
    pub fn set_to_current_time(&self) -> Result<(), UsageError> {
        self.unlabeled().map(|child| child.set_to_current_time())
    }

    /// Starts a timer for the unlabeled gauge.
    pub fn start_timer(&self) -> Result<GaugeTimer, UsageError> {
        self.unlabeled().map(|child| child.start_timer())
    }

    /// Gets the value of the unlabeled gauge.
    pub fn get(&self) -> Result<f64, UsageError> {
        self.unlabeled().map(|child| child.get())
    }

    fn unlabeled(&self) -> Result<Arc<GaugeChild>, UsageError> {
        self.family.labels::<&str>(&[])
    }
}

impl Collector for Gauge {
    fn metric_names(&self) -> Vec<String> {
        vec![self.family.name().to_string()]
    }

    fn collect(&self) -> Vec<MetricFamilySamples> {
        let name = self.family.name();
        let label_names = self.family.label_names();
        let samples = self
            .family
            .children()
            .into_iter()
            .map(|(values, child)| Sample::new(name, label_names.to_vec(), values, child.get()))
            .collect();

        vec![MetricFamilySamples {
            name: name.to_string(),
            metric_type: MetricType::Gauge,
            help: self.family.help().to_string(),
            samples,
        }]
    }
}

#[cfg(test)]
mod tests {
    use super::Gauge;
    use crate::error::UsageError;
    use crate::opts::Opts;
    use crate::registry::Collector;
    use quanta::Clock;
    use std::time::{Duration, SystemTime, UNIX_EPOCH};

    #[test]
    fn test_gauge_operations() {
        let gauge = Gauge::new(Opts::new("in_flight", "In-flight requests.")).unwrap();

        gauge.inc().unwrap();
        gauge.inc_by(4.0).unwrap();
        gauge.dec().unwrap();
        gauge.dec_by(0.5).unwrap();
        assert_eq!(gauge.get(), Ok(3.5));

        gauge.set(-7.0).unwrap();
        assert_eq!(gauge.get(), Ok(-7.0));

        let before = SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_secs_f64();
        gauge.set_to_current_time().unwrap();
        assert!(gauge.get().unwrap() >= before.floor());
    }

    #[test]
    fn test_timer_sets_elapsed_seconds() {
        let (clock, mock) = Clock::mock();
        let gauge = Gauge::with_clock(Opts::new("last_run", "Last run."), clock).unwrap();

        let timer = gauge.start_timer().unwrap();
        mock.increment(Duration::from_millis(1500));
        let elapsed = timer.set_duration();

        assert_eq!(elapsed, 1.5);
        assert_eq!(gauge.get(), Ok(1.5));
    }

    #[test]
    fn test_labeled_gauge() {
        let gauge = Gauge::new(Opts::new("queue_depth", "Depth.").label_names(["queue"])).unwrap();
        gauge.labels(&["high"]).unwrap().set(3.0);
        gauge.labels(&["low"]).unwrap().set(9.0);

        assert_eq!(gauge.set(1.0), Err(UsageError::LabelArity { expected: 1, actual: 0 }));

        let collected = gauge.collect();
        let samples = &collected[0].samples;
        assert_eq!(samples.len(), 2);
        assert_eq!(samples[0].label_values, vec!["high"]);
        assert_eq!(samples[1].value, 9.0);

        assert_eq!(gauge.remove(&["low"]), Ok(true));
        assert_eq!(gauge.collect()[0].samples.len(), 1);
    }
}
