use std::net::SocketAddr;

use lightmetric::{BuildError, RegistryError};
use thiserror::Error as ThisError;

/// Errors that could occur while configuring an exporter or fetching instruments from it.
#[derive(Debug, ThisError)]
pub enum ExporterError {
    /// The listen address was empty, used port zero, or could not be resolved.
    #[error("invalid listen address: {0}")]
    InvalidListenAddress(String),

    /// The scrape path did not start with a slash.
    #[error("invalid scrape path '{0}': expected a path starting with '/'")]
    InvalidPath(String),

    /// Parsing the IP address or subnet of an allowlist entry did not succeed.
    #[error("failed to parse address as a valid IP address/subnet: {0}")]
    InvalidAllowlistAddress(String),

    /// Creating the networking event loop did not succeed.
    #[error("failed to spawn Tokio runtime for endpoint: {0}")]
    FailedToCreateRuntime(String),

    /// Binding the HTTP listener did not succeed.
    #[error("failed to create HTTP listener: {0}")]
    FailedToCreateHTTPListener(String),

    /// A process-wide exporter was already installed.
    #[error("a global exporter was already installed")]
    GlobalAlreadyInstalled,

    /// An instrument could not be created.
    #[error(transparent)]
    Build(#[from] BuildError),

    /// An instrument could not be registered.
    #[error(transparent)]
    Registry(#[from] RegistryError),
}

/// Outcome of starting an exporter.
///
/// Starting is attempted at most once: whatever the first attempt yields is kept for the lifetime
/// of the exporter.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ExporterStatus {
    /// The scrape endpoint is served on the given address.
    Listening(SocketAddr),

    /// Starting failed, for the given reason, and will not be retried.
    Failed(String),
}

impl ExporterStatus {
    /// Whether or not the scrape endpoint is being served.
    pub fn is_listening(&self) -> bool {
        matches!(self, ExporterStatus::Listening(_))
    }
}
