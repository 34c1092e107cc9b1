//! Serves a [`lightmetric`] registry over HTTP in the Prometheus text exposition format.
//!
//! A [`MetricExporter`] owns a [`Registry`](lightmetric::Registry), hands out instruments
//! registered into it by name, and serves it on a scrape endpoint once started:
//!
//! ```no_run
//! use lightmetric_exporter::{ExporterBuilder, ExporterStatus};
//!
//! let exporter = ExporterBuilder::new()
//!     .with_address("127.0.0.1", 9000)
//!     .and_then(|b| b.with_path("/metrics"))
//!     .map(|b| b.build())
//!     .expect("invalid exporter configuration");
//!
//! match exporter.ensure_started() {
//!     ExporterStatus::Listening(address) => println!("serving metrics on {address}"),
//!     ExporterStatus::Failed(reason) => eprintln!("metrics unavailable: {reason}"),
//! }
//!
//! let requests = exporter
//!     .counter_with_labels("http_requests", &["method"], "Handled HTTP requests.")
//!     .expect("invalid counter");
//! requests.labels(&["GET"]).expect("one label value").inc();
//! ```
//!
//! Starting is attempted once: later calls to
//! [`ensure_started`](MetricExporter::ensure_started) return the outcome of the first attempt,
//! whether it succeeded or not.
//!
//! Applications wanting a single exporter for the whole process can use [`global`], or install
//! their own configuration with [`ExporterBuilder::install`].
#![deny(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg), deny(rustdoc::broken_intra_doc_links))]

mod common;
pub use self::common::{ExporterError, ExporterStatus};

pub mod formatting;

mod exporter;
pub use self::exporter::builder::{ExporterBuilder, DEFAULT_PATH, DEFAULT_PORT};
pub use self::exporter::{global, MetricExporter};

#[cfg(feature = "process")]
mod process;
#[cfg(feature = "process")]
#[cfg_attr(docsrs, doc(cfg(feature = "process")))]
pub use self::process::ProcessCollector;
