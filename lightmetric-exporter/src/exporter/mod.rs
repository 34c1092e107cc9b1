use std::collections::HashMap;
use std::future::Future;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::thread;

use ipnet::IpNet;
use lightmetric::{BuildError, Collector, Counter, Gauge, Histogram, Opts, Registry, Summary};
use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use tracing::{error, info, warn};

use crate::{ExporterError, ExporterStatus};

/// Convenience type for Future implementing an exporter.
pub(crate) type ExporterFuture =
    Pin<Box<dyn Future<Output = Result<(), ExporterError>> + Send + 'static>>;

mod http_listener;

pub(crate) mod builder;
use self::builder::ExporterBuilder;

static GLOBAL: OnceCell<MetricExporter> = OnceCell::new();

/// Gets the process-wide exporter.
///
/// Unless one was installed beforehand with [`ExporterBuilder::install`], a default exporter is
/// created on first use, listening on `0.0.0.0:9000` once started.
///
/// This is meant for the entry point of an application: libraries should take a [`Registry`]
/// instead.
pub fn global() -> &'static MetricExporter {
    GLOBAL.get_or_init(|| ExporterBuilder::new().build())
}

pub(crate) fn install_global(
    exporter: MetricExporter,
) -> Result<&'static MetricExporter, ExporterError> {
    GLOBAL.set(exporter).map_err(|_| ExporterError::GlobalAlreadyInstalled)?;
    Ok(global())
}

type Cache<T> = Mutex<HashMap<String, T>>;

/// Serves a [`Registry`] over HTTP, and hands out instruments registered into it by name.
///
/// The HTTP listener is only started by [`ensure_started`](MetricExporter::ensure_started).
pub struct MetricExporter {
    registry: Arc<Registry>,
    listen_address: SocketAddr,
    path: String,
    allowed_addresses: Option<Vec<IpNet>>,
    process_metrics: bool,
    status: OnceCell<ExporterStatus>,
    counters: Cache<Counter>,
    gauges: Cache<Gauge>,
    histograms: Cache<Histogram>,
    summaries: Cache<Summary>,
}

impl MetricExporter {
    pub(crate) fn new(
        registry: Arc<Registry>,
        listen_address: SocketAddr,
        path: String,
        allowed_addresses: Option<Vec<IpNet>>,
        process_metrics: bool,
    ) -> MetricExporter {
        MetricExporter {
            registry,
            listen_address,
            path,
            allowed_addresses,
            process_metrics,
            status: OnceCell::new(),
            counters: Mutex::default(),
            gauges: Mutex::default(),
            histograms: Mutex::default(),
            summaries: Mutex::default(),
        }
    }

    /// Gets the registry served by this exporter.
    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Gets the address the listener binds to once started.
    pub fn listen_address(&self) -> SocketAddr {
        self.listen_address
    }

    /// Gets the path the registry is served on.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Gets the outcome of starting this exporter, if it was started.
    pub fn status(&self) -> Option<ExporterStatus> {
        self.status.get().cloned()
    }

    /// Starts serving the registry, unless this was already attempted.
    ///
    /// The first call binds the listen address and spawns the HTTP listener. When called from
    /// within a Tokio runtime, the listener is spawned directly into the runtime. Otherwise, a new
    /// single-threaded Tokio runtime is created on a background thread, and the listener is
    /// spawned there. Once the listener is up, process metrics are registered, if enabled.
    ///
    /// Starting is never retried: if the first attempt fails, for instance because the address is
    /// already in use, the failure is logged and every later call returns it as-is. Concurrent
    /// callers wait for the first attempt to complete.
    pub fn ensure_started(&self) -> ExporterStatus {
        self.status.get_or_init(|| self.start()).clone()
    }

    fn start(&self) -> ExporterStatus {
        match self.spawn_listener() {
            Ok(address) => {
                info!(%address, path = %self.path, "Metric exporter listening.");
                if self.process_metrics {
                    self.register_process_metrics();
                }
                ExporterStatus::Listening(address)
            }
            Err(e) => {
                let address = self.listen_address;
                error!(%address, error = %e, "Failed to start metric exporter.");
                ExporterStatus::Failed(e.to_string())
            }
        }
    }

    fn spawn_listener(&self) -> Result<SocketAddr, ExporterError> {
        use tokio::runtime;

        let listener = http_listener::bind(self.listen_address)?;
        let address = listener
            .local_addr()
            .map_err(|e| ExporterError::FailedToCreateHTTPListener(e.to_string()))?;
        let exporter = http_listener::new_http_listener(
            listener,
            Arc::clone(&self.registry),
            self.path.clone(),
            self.allowed_addresses.clone(),
        );

        if let Ok(handle) = runtime::Handle::try_current() {
            handle.spawn(log_exit(exporter));
        } else {
            let runtime = runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .map_err(|e| ExporterError::FailedToCreateRuntime(e.to_string()))?;

            thread::Builder::new()
                .name("lightmetric-exporter-http-listener".to_string())
                .spawn(move || runtime.block_on(log_exit(exporter)))
                .map_err(|e| ExporterError::FailedToCreateRuntime(e.to_string()))?;
        }

        Ok(address)
    }

    #[cfg(feature = "process")]
    fn register_process_metrics(&self) {
        let collector = Arc::new(crate::ProcessCollector::new());
        if let Err(e) = self.registry.register(collector) {
            warn!(error = %e, "Failed to register process metrics.");
        }
    }

    #[cfg(not(feature = "process"))]
    fn register_process_metrics(&self) {
        warn!("Process metrics requested, but the `process` feature is disabled.");
    }

    /// Gets the counter registered under `name`, creating and registering it if needed.
    ///
    /// Instruments are cached by name: once a counter exists under `name`, it is returned as-is,
    /// whatever the given help text.
    ///
    /// ## Errors
    ///
    /// If the name is invalid, or is already taken in the registry by another collector, an error
    /// variant will be returned.
    pub fn counter(&self, name: &str, help: &str) -> Result<Counter, ExporterError> {
        self.counter_with_labels(name, &[], help)
    }

    /// Gets the labeled counter registered under `name`, creating and registering it if needed.
    ///
    /// See [`counter`](MetricExporter::counter).
    pub fn counter_with_labels(
        &self,
        name: &str,
        label_names: &[&str],
        help: &str,
    ) -> Result<Counter, ExporterError> {
        self.get_or_register(&self.counters, name, || Counter::new(opts(name, label_names, help)))
    }

    /// Gets the gauge registered under `name`, creating and registering it if needed.
    ///
    /// See [`counter`](MetricExporter::counter).
    pub fn gauge(&self, name: &str, help: &str) -> Result<Gauge, ExporterError> {
        self.gauge_with_labels(name, &[], help)
    }

    /// Gets the labeled gauge registered under `name`, creating and registering it if needed.
    ///
    /// See [`counter`](MetricExporter::counter).
    pub fn gauge_with_labels(
        &self,
        name: &str,
        label_names: &[&str],
        help: &str,
    ) -> Result<Gauge, ExporterError> {
        self.get_or_register(&self.gauges, name, || Gauge::new(opts(name, label_names, help)))
    }

    /// Gets the histogram registered under `name`, creating and registering it with the default
    /// buckets if needed.
    ///
    /// See [`counter`](MetricExporter::counter).
    pub fn histogram(&self, name: &str, help: &str) -> Result<Histogram, ExporterError> {
        self.histogram_with_labels(name, &[], help)
    }

    /// Gets the labeled histogram registered under `name`, creating and registering it with the
    /// default buckets if needed.
    ///
    /// See [`counter`](MetricExporter::counter).
    pub fn histogram_with_labels(
        &self,
        name: &str,
        label_names: &[&str],
        help: &str,
    ) -> Result<Histogram, ExporterError> {
        self.get_or_register(&self.histograms, name, || {
            Histogram::new(opts(name, label_names, help))
        })
    }

    /// Gets the summary registered under `name`, creating and registering it if needed.
    ///
    /// Summaries created this way track count and sum only. Summaries with quantiles are built
    /// with [`Summary::builder`] and registered into [`registry`](MetricExporter::registry).
    ///
    /// See [`counter`](MetricExporter::counter).
    pub fn summary(&self, name: &str, help: &str) -> Result<Summary, ExporterError> {
        self.summary_with_labels(name, &[], help)
    }

    /// Gets the labeled summary registered under `name`, creating and registering it if needed.
    ///
    /// See [`summary`](MetricExporter::summary).
    pub fn summary_with_labels(
        &self,
        name: &str,
        label_names: &[&str],
        help: &str,
    ) -> Result<Summary, ExporterError> {
        self.get_or_register(&self.summaries, name, || Summary::new(opts(name, label_names, help)))
    }

    fn get_or_register<T, F>(
        &self,
        cache: &Cache<T>,
        name: &str,
        create: F,
    ) -> Result<T, ExporterError>
    where
        T: Collector + Clone + 'static,
        F: FnOnce() -> Result<T, BuildError>,
    {
        let mut cache = cache.lock();
        if let Some(existing) = cache.get(name) {
            return Ok(existing.clone());
        }

        let instrument = create()?;
        self.registry.register(Arc::new(instrument.clone()))?;
        cache.insert(name.to_string(), instrument.clone());

        Ok(instrument)
    }
}

impl std::fmt::Debug for MetricExporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetricExporter")
            .field("listen_address", &self.listen_address)
            .field("path", &self.path)
            .field("allowed_addresses", &self.allowed_addresses)
            .field("process_metrics", &self.process_metrics)
            .field("status", &self.status.get())
            .finish_non_exhaustive()
    }
}

fn opts(name: &str, label_names: &[&str], help: &str) -> Opts {
    Opts::new(name, help).label_names(label_names.iter().copied())
}

async fn log_exit(exporter: ExporterFuture) {
    if let Err(e) = exporter.await {
        error!(error = %e, "Metric exporter stopped.");
    }
}

#[cfg(test)]
mod tests {
    use super::MetricExporter;
    use crate::{ExporterBuilder, ExporterError, ExporterStatus};
    use lightmetric::{BuildError, Collector, RegistryError};
    use std::net::{SocketAddr, TcpListener};

    fn exporter() -> MetricExporter {
        ExporterBuilder::new().with_process_metrics(false).build()
    }

    #[test]
    fn test_instruments_are_cached_by_name() {
        let exporter = exporter();

        let first = exporter.counter_with_labels("requests", &["method"], "Requests.").unwrap();
        first.labels(&["GET"]).unwrap().inc();

        let second = exporter.counter_with_labels("requests", &["method"], "Other.").unwrap();
        assert_eq!(second.labels(&["GET"]).unwrap().get(), 1.0);
        assert_eq!(exporter.registry().len(), 1);

        exporter.gauge("in_flight", "In flight.").unwrap().inc().unwrap();
        exporter.histogram("payload_bytes", "Payload sizes.").unwrap();
        exporter.summary_with_labels("rpc_seconds", &["service"], "RPC latency.").unwrap();

        let names =
            exporter.registry().gather().into_iter().map(|mfs| mfs.name).collect::<Vec<_>>();
        assert_eq!(names, vec!["requests", "in_flight", "payload_bytes", "rpc_seconds"]);
    }

    #[test]
    fn test_invalid_or_taken_names() {
        let exporter = exporter();

        assert!(matches!(
            exporter.counter("", "Unnamed."),
            Err(ExporterError::Build(BuildError::EmptyName))
        ));

        exporter.summary("latency", "Latency.").unwrap();
        assert!(matches!(
            exporter.gauge("latency_count", "Clash."),
            Err(ExporterError::Registry(RegistryError::AlreadyRegistered(_)))
        ));

        // The failed gauge is not cached, so the name can be used once freed up.
        exporter.registry().unregister("latency").unwrap();
        let gauge = exporter.gauge("latency_count", "No clash.").unwrap();
        assert_eq!(gauge.metric_names(), vec!["latency_count"]);
    }

    #[test]
    fn test_failed_start_is_not_retried() {
        let taken = TcpListener::bind("127.0.0.1:0").unwrap();
        let address: SocketAddr = taken.local_addr().unwrap();

        let exporter = ExporterBuilder::new()
            .with_http_listener(address)
            .with_process_metrics(false)
            .build();
        assert_eq!(exporter.status(), None);

        let status = exporter.ensure_started();
        assert!(matches!(status, ExporterStatus::Failed(_)));

        // Freeing the address up does not make the exporter try again.
        drop(taken);
        assert_eq!(exporter.ensure_started(), status);
        assert_eq!(exporter.status(), Some(status));
    }
}
