//! Collector registration and gathering.
use std::sync::{Arc, PoisonError, RwLock};

use hashbrown::HashMap;
use indexmap::IndexMap;
use tracing::debug;

use crate::error::RegistryError;
use crate::sample::MetricFamilySamples;

/// A source of metric samples.
///
/// Every instrument is a collector, but anything able to produce samples on demand can be
/// registered, such as a collector reading process statistics.
pub trait Collector: Send + Sync {
    /// Gets every metric name this collector produces samples under.
    ///
    /// The first name identifies the collector. Names are reserved in the registry for as long as
    /// the collector stays registered.
    fn metric_names(&self) -> Vec<String>;

    /// Collects the current samples.
    fn collect(&self) -> Vec<MetricFamilySamples>;
}

struct Registered {
    collector: Arc<dyn Collector>,
    names: Vec<String>,
}

#[derive(Default)]
struct Inner {
    // Keyed by the first metric name of each collector, in registration order.
    collectors: IndexMap<String, Registered>,
    // Every taken name, mapped to the key of the collector that owns it.
    names: HashMap<String, String>,
}

/// A set of collectors, gathered together for exposition.
///
/// Metric names are unique within a registry: registering a collector that provides a name which
/// is already taken fails. There is no process-wide registry: registries are created and passed
/// around explicitly.
#[derive(Default)]
pub struct Registry {
    inner: RwLock<Inner>,
}

impl Registry {
    /// Creates a new, empty [`Registry`].
    pub fn new() -> Registry {
        Registry::default()
    }

    /// Registers a collector.
    ///
    /// ## Errors
    ///
    /// If any of the names provided by the collector is already taken, or if the collector does
    /// not provide any name, an error variant will be returned and nothing is registered.
    pub fn register(&self, collector: Arc<dyn Collector>) -> Result<(), RegistryError> {
        let names = collector.metric_names();
        let key = names.first().cloned().ok_or(RegistryError::Unnamed)?;

        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(taken) = names.iter().find(|name| inner.names.contains_key(name.as_str())) {
            return Err(RegistryError::AlreadyRegistered(taken.clone()));
        }

        for name in &names {
            inner.names.insert(name.clone(), key.clone());
        }
        debug!(name = %key, "registered collector");
        inner.collectors.insert(key, Registered { collector, names });

        Ok(())
    }

    /// Unregisters the collector owning the given metric name, releasing all of its names.
    ///
    /// ## Errors
    ///
    /// If no registered collector owns `name`, an error variant will be returned.
    pub fn unregister(&self, name: &str) -> Result<Arc<dyn Collector>, RegistryError> {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        let key = inner
            .names
            .get(name)
            .cloned()
            .ok_or_else(|| RegistryError::NotRegistered(name.to_string()))?;

        let registered = inner
            .collectors
            .shift_remove(&key)
            .ok_or_else(|| RegistryError::NotRegistered(name.to_string()))?;
        for owned in &registered.names {
            inner.names.remove(owned.as_str());
        }
        debug!(name = %key, "unregistered collector");

        Ok(registered.collector)
    }

    /// Unregisters every collector.
    pub fn clear(&self) {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        inner.collectors.clear();
        inner.names.clear();
        debug!("cleared registry");
    }

    /// Whether or not the given metric name is taken.
    pub fn is_registered(&self, name: &str) -> bool {
        self.inner.read().unwrap_or_else(PoisonError::into_inner).names.contains_key(name)
    }

    /// Gets the number of registered collectors.
    pub fn len(&self) -> usize {
        self.inner.read().unwrap_or_else(PoisonError::into_inner).collectors.len()
    }

    /// Whether or not no collector is registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Collects the samples of every registered collector, in registration order.
    ///
    /// Collectors are called outside of the registry lock, so a slow collector never blocks
    /// registration.
    pub fn gather(&self) -> Vec<MetricFamilySamples> {
        let collectors = {
            let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
            inner.collectors.values().map(|r| Arc::clone(&r.collector)).collect::<Vec<_>>()
        };

        collectors.iter().flat_map(|collector| collector.collect()).collect()
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        f.debug_struct("Registry").field("collectors", &inner.collectors.keys()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::{Collector, Registry};
    use crate::error::RegistryError;
    use crate::sample::{MetricFamilySamples, MetricType, Sample};
    use std::sync::Arc;

    struct Fixed {
        names: Vec<String>,
        value: f64,
    }

    impl Fixed {
        fn new(names: &[&str], value: f64) -> Arc<dyn Collector> {
            Arc::new(Fixed { names: names.iter().map(|s| s.to_string()).collect(), value })
        }
    }

    impl Collector for Fixed {
        fn metric_names(&self) -> Vec<String> {
            self.names.clone()
        }

        fn collect(&self) -> Vec<MetricFamilySamples> {
            vec![MetricFamilySamples {
                name: self.names[0].clone(),
                metric_type: MetricType::Gauge,
                help: String::new(),
                samples: vec![Sample::new(self.names[0].clone(), vec![], vec![], self.value)],
            }]
        }
    }

    #[test]
    fn test_gather_in_registration_order() {
        let registry = Registry::new();
        assert!(registry.is_empty());

        registry.register(Fixed::new(&["zeta"], 1.0)).unwrap();
        registry.register(Fixed::new(&["alpha"], 2.0)).unwrap();
        registry.register(Fixed::new(&["mu"], 3.0)).unwrap();

        let names = registry.gather().into_iter().map(|mfs| mfs.name).collect::<Vec<_>>();
        assert_eq!(names, vec!["zeta", "alpha", "mu"]);
        assert_eq!(registry.len(), 3);
    }

    #[test]
    fn test_duplicate_names_are_rejected() {
        let registry = Registry::new();
        registry.register(Fixed::new(&["latency", "latency_count", "latency_sum"], 1.0)).unwrap();

        assert_eq!(
            registry.register(Fixed::new(&["latency"], 1.0)),
            Err(RegistryError::AlreadyRegistered("latency".to_string()))
        );
        assert_eq!(
            registry.register(Fixed::new(&["latency_sum"], 1.0)),
            Err(RegistryError::AlreadyRegistered("latency_sum".to_string()))
        );
        assert_eq!(registry.register(Fixed::new(&[], 1.0)), Err(RegistryError::Unnamed));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_unregister_releases_every_name() {
        let registry = Registry::new();
        registry.register(Fixed::new(&["latency", "latency_count", "latency_sum"], 1.0)).unwrap();
        registry.register(Fixed::new(&["requests"], 1.0)).unwrap();

        let removed = registry.unregister("latency_count").unwrap();
        assert_eq!(removed.metric_names()[0], "latency");
        assert!(!registry.is_registered("latency"));
        assert!(!registry.is_registered("latency_sum"));
        assert!(registry.is_registered("requests"));

        assert_eq!(
            registry.unregister("latency").err(),
            Some(RegistryError::NotRegistered("latency".to_string()))
        );

        registry.register(Fixed::new(&["latency_sum"], 4.0)).unwrap();
        let names = registry.gather().into_iter().map(|mfs| mfs.name).collect::<Vec<_>>();
        assert_eq!(names, vec!["requests", "latency_sum"]);
    }

    #[test]
    fn test_clear() {
        let registry = Registry::new();
        registry.register(Fixed::new(&["requests"], 1.0)).unwrap();
        registry.clear();

        assert!(registry.is_empty());
        assert!(registry.gather().is_empty());
        registry.register(Fixed::new(&["requests"], 1.0)).unwrap();
    }
}
