//! Process-embedded metric instruments, with streaming quantiles over sliding time windows.
//!
//! Instruments are created from [`Opts`], optionally registered into a [`Registry`], and updated
//! from any thread. Each instrument keeps one child per combination of label values, created on
//! first use:
//!
//! ```
//! use lightmetric::{Counter, Opts, Registry, Summary};
//!
//! let registry = Registry::new();
//!
//! let opts = Opts::new("requests", "Requests served.").label_names(["method"]);
//! let requests = Counter::new(opts).expect("invalid options");
//! let requests = requests.register(&registry).expect("name taken");
//! requests.labels(&["GET"]).expect("wrong arity").inc();
//!
//! let latency = Summary::builder(Opts::new("latency_seconds", "Request latency."))
//!     .quantile(0.5, 0.05)
//!     .and_then(|b| b.quantile(0.99, 0.01))
//!     .and_then(|b| b.build())
//!     .expect("invalid options");
//! latency.observe(0.042).expect("wrong arity");
//!
//! // Only registered instruments are gathered.
//! assert_eq!(registry.gather().len(), 1);
//! ```
//!
//! Reading instruments never formats text: [`Registry::gather`] produces structured
//! [`MetricFamilySamples`], left to an exposition layer to render.
#![deny(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg), deny(rustdoc::broken_intra_doc_links))]

mod atomics;
pub use self::atomics::AtomicF64;

mod ckms;
pub use self::ckms::{CkmsQuantiles, DEFAULT_COMPRESS_INTERVAL};

mod counter;
pub use self::counter::{Counter, CounterChild};

mod error;
pub use self::error::{BuildError, RegistryError, UsageError};

mod family;
pub use self::family::{ChildFactory, Family};

mod gauge;
pub use self::gauge::{Gauge, GaugeChild, GaugeTimer};

mod histogram;
pub use self::histogram::{
    exponential_buckets, linear_buckets, Histogram, HistogramBuilder, HistogramChild,
    HistogramTimer, HistogramValue, DEFAULT_BUCKETS,
};

mod naming;
pub use self::naming::{check_label_names, check_metric_name, full_name};

mod opts;
pub use self::opts::Opts;

mod quantile;
pub use self::quantile::{parse_quantiles, Quantile};

mod registry;
pub use self::registry::{Collector, Registry};

mod sample;
pub use self::sample::{format_float, MetricFamilySamples, MetricType, Sample};

mod summary;
pub use self::summary::{
    Summary, SummaryBuilder, SummaryChild, SummaryTimer, SummaryValue, DEFAULT_AGE_BUCKETS,
    DEFAULT_MAX_AGE,
};

mod window;
pub use self::window::TimeWindowQuantiles;

/// The clock instruments read time from.
///
/// Use [`Clock::mock`] to drive window rotation and timers by hand in tests.
pub use quanta::Clock;
