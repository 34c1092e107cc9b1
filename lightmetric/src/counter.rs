use std::sync::Arc;

use crate::atomics::AtomicF64;
use crate::error::{BuildError, RegistryError, UsageError};
use crate::family::{ChildFactory, Family};
use crate::opts::Opts;
use crate::registry::{Collector, Registry};
use crate::sample::{MetricFamilySamples, MetricType, Sample};

/// A monotonically increasing value.
#[derive(Debug, Default)]
pub struct CounterChild {
    value: AtomicF64,
}

impl CounterChild {
    /// Increments the counter by one.
    pub fn inc(&self) {
        self.value.add(1.0);
    }

    /// Increments the counter by `amount`.
    ///
    /// ## Errors
    ///
    /// If `amount` is negative or NaN, an error variant will be returned and the counter is left
    /// as-is.
    pub fn inc_by(&self, amount: f64) -> Result<(), UsageError> {
        if amount.is_nan() || amount < 0.0 {
            return Err(UsageError::NegativeIncrement(amount));
        }

        self.value.add(amount);
        Ok(())
    }

    /// Gets the current value.
    pub fn get(&self) -> f64 {
        self.value.get()
    }
}

#[derive(Debug, Default)]
struct CounterFactory;

impl ChildFactory for CounterFactory {
    type Child = CounterChild;

    fn new_child(&self) -> CounterChild {
        CounterChild::default()
    }
}

/// A counter, with one [`CounterChild`] per combination of label values.
///
/// `Counter` is a cheap handle: clones share the same children.
#[derive(Clone, Debug)]
pub struct Counter {
    family: Arc<Family<CounterFactory>>,
}

impl Counter {
    /// Creates a new [`Counter`].
    ///
    /// ## Errors
    ///
    /// If the name or any of the label names is invalid, an error variant will be returned.
    pub fn new(opts: Opts) -> Result<Counter, BuildError> {
        let name = opts.validate(&[])?;
        let (help, label_names) = opts.into_parts();

        Ok(Counter { family: Arc::new(Family::new(name, help, label_names, CounterFactory)) })
    }

    /// Registers this counter, returning it back for chaining.
    ///
    /// ## Errors
    ///
    /// If the name of this counter is already taken, an error variant will be returned.
    pub fn register(self, registry: &Registry) -> Result<Counter, RegistryError> {
        registry.register(Arc::new(self.clone()))?;
        Ok(self)
    }

    /// Gets the full name of this counter.
    pub fn name(&self) -> &str {
        self.family.name()
    }

    /// Gets or creates the child for the given label values.
    ///
    /// ## Errors
    ///
    /// If the number of label values does not match the number of label names, an error variant
    /// will be returned.
    pub fn labels<S: AsRef<str>>(&self, values: &[S]) -> Result<Arc<CounterChild>, UsageError> {
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

    /// Increments the unlabeled counter by one.
    ///
    /// ## Errors
    ///
    /// If this counter has labels, an error variant will be returned.
    pub fn inc(&self) -> Result<(), UsageError> {
        self.unlabeled()?.inc();
        Ok(())
    }

    /// Increments the unlabeled counter by `amount`.
    ///
    /// ## Errors
    ///
    /// If this counter has labels, or if `amount` is negative, an error variant will be returned.
    pub fn inc_by(&self, amount: f64) -> Result<(), UsageError> {
        self.unlabeled()?.inc_by(amount)
    }

    /// Gets the value of the unlabeled counter.
    ///
    /// ## Errors
    ///
    /// If this counter has labels, an error variant will be returned.
    pub fn get(&self) -> Result<f64, UsageError> {
        Ok(self.unlabeled()?.get())
    }

    fn unlabeled(&self) -> Result<Arc<CounterChild>, UsageError> {
        self.family.labels::<&str>(&[])
    }
}

impl Collector for Counter {
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
            metric_type: MetricType::Counter,
            help: self.family.help().to_string(),
            samples,
        }]
    }
}

#[cfg(test)]
mod tests {
    use super::Counter;
    use crate::error::UsageError;
    use crate::opts::Opts;
    use crate::registry::{Collector, Registry};
    use crate::sample::MetricType;

    #[test]
    fn test_unlabeled_counter() {
        let counter = Counter::new(Opts::new("jobs_total", "Jobs processed.")).unwrap();
        assert_eq!(counter.get(), Ok(0.0));

        counter.inc().unwrap();
        counter.inc_by(2.5).unwrap();
        assert_eq!(counter.get(), Ok(3.5));

        assert_eq!(counter.inc_by(-1.0), Err(UsageError::NegativeIncrement(-1.0)));
        assert_eq!(counter.get(), Ok(3.5));

        // NaN would stick forever, so it is refused like a decrement.
        assert!(matches!(
            counter.inc_by(f64::NAN),
            Err(UsageError::NegativeIncrement(amount)) if amount.is_nan()
        ));
        assert_eq!(counter.get(), Ok(3.5));

        let collected = counter.collect();
        assert_eq!(collected.len(), 1);
        assert_eq!(collected[0].metric_type, MetricType::Counter);
        assert_eq!(collected[0].samples.len(), 1);
        assert_eq!(collected[0].samples[0].name, "jobs_total");
        assert_eq!(collected[0].samples[0].value, 3.5);
    }

    #[test]
    fn test_labeled_counter_is_isolated_per_label() {
        let counter =
            Counter::new(Opts::new("requests", "Requests.").label_names(["method"])).unwrap();

        for _ in 0..3 {
            counter.labels(&["GET"]).unwrap().inc();
        }
        counter.labels(&["POST"]).unwrap().inc();

        assert_eq!(counter.inc(), Err(UsageError::LabelArity { expected: 1, actual: 0 }));

        let collected = counter.collect();
        let samples = &collected[0].samples;
        assert_eq!(samples.len(), 2);
        assert_eq!(samples[0].label("method"), Some("GET"));
        assert_eq!(samples[0].value, 3.0);
        assert_eq!(samples[1].label("method"), Some("POST"));
        assert_eq!(samples[1].value, 1.0);
    }

    #[test]
    fn test_register() {
        let registry = Registry::new();
        let counter = Counter::new(Opts::new("requests", "Requests.")).unwrap();
        let counter = counter.register(&registry).unwrap();
        counter.inc().unwrap();

        let duplicate = Counter::new(Opts::new("requests", "Other.")).unwrap();
        assert!(duplicate.register(&registry).is_err());

        let gathered = registry.gather();
        assert_eq!(gathered.len(), 1);
        assert_eq!(gathered[0].samples[0].value, 1.0);
    }
}
