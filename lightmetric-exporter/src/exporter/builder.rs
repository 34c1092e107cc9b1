use std::net::{IpAddr, Ipv4Addr, SocketAddr, ToSocketAddrs};
use std::sync::Arc;

use ipnet::IpNet;
use lightmetric::Registry;

use crate::ExporterError;

use super::MetricExporter;

/// Default port the scrape endpoint listens on.
pub const DEFAULT_PORT: u16 = 9000;

/// Default path the scrape endpoint is served on.
pub const DEFAULT_PATH: &str = "/service_metrics";

/// Builder for creating and installing a [`MetricExporter`].
#[derive(Debug)]
pub struct ExporterBuilder {
    listen_address: SocketAddr,
    path: String,
    allowed_addresses: Option<Vec<IpNet>>,
    process_metrics: bool,
    registry: Option<Arc<Registry>>,
}

impl ExporterBuilder {
    /// Creates a new [`ExporterBuilder`].
    pub fn new() -> Self {
        Self {
            listen_address: SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), DEFAULT_PORT),
            path: DEFAULT_PATH.to_string(),
            allowed_addresses: None,
            process_metrics: true,
            registry: None,
        }
    }

    /// Sets the address the scrape endpoint listens on.
    ///
    /// Port zero lets the operating system pick a free port, which can then be read back from
    /// [`ExporterStatus::Listening`](crate::ExporterStatus::Listening).
    ///
    /// Defaults to `0.0.0.0:9000`.
    #[must_use]
    pub fn with_http_listener(mut self, addr: impl Into<SocketAddr>) -> Self {
        self.listen_address = addr.into();
        self
    }

    /// Sets the host and port the scrape endpoint listens on.
    ///
    /// The host may be an IP address or a name, which is resolved right away. The first resolved
    /// address is used.
    ///
    /// ## Errors
    ///
    /// If the host is empty, the port is zero, or the host cannot be resolved, an error variant
    /// will be returned describing the error.
    pub fn with_address(mut self, host: &str, port: u16) -> Result<Self, ExporterError> {
        if host.is_empty() {
            return Err(ExporterError::InvalidListenAddress("host is empty".to_string()));
        }
        if port == 0 {
            return Err(ExporterError::InvalidListenAddress(format!("{host}: port is zero")));
        }

        self.listen_address = (host, port)
            .to_socket_addrs()
            .map_err(|e| ExporterError::InvalidListenAddress(format!("{host}:{port}: {e}")))?
            .next()
            .ok_or_else(|| {
                ExporterError::InvalidListenAddress(format!("{host}:{port}: no addresses"))
            })?;

        Ok(self)
    }

    /// Sets the path the scrape endpoint is served on.
    ///
    /// Requests on any other path receive a 404 Not Found response.
    ///
    /// Defaults to `/service_metrics`.
    ///
    /// ## Errors
    ///
    /// If the path does not start with a slash, an error variant will be returned.
    pub fn with_path<P: Into<String>>(mut self, path: P) -> Result<Self, ExporterError> {
        let path = path.into();
        if !path.starts_with('/') {
            return Err(ExporterError::InvalidPath(path));
        }

        self.path = path;
        Ok(self)
    }

    /// Adds an IP address or subnet to the allowlist for the scrape endpoint.
    ///
    /// If a client makes a request to the scrape endpoint and their IP is not present in the
    /// allowlist, either directly or within any of the allowed subnets, they will receive a 403
    /// Forbidden response.
    ///
    /// Defaults to allowing all IPs.
    ///
    /// ## Security Considerations
    ///
    /// On its own, an IP allowlist is insufficient for access control, if the exporter is running
    /// in an environment alongside applications (such as web browsers) that are susceptible to [DNS
    /// rebinding](https://en.wikipedia.org/wiki/DNS_rebinding) attacks.
    ///
    /// ## Errors
    ///
    /// If the given address cannot be parsed into an IP address or subnet, an error variant will be
    /// returned describing the error.
    pub fn add_allowed_address<A>(mut self, address: A) -> Result<Self, ExporterError>
    where
        A: AsRef<str>,
    {
        let address = parse_allowed_address(address.as_ref())?;
        self.allowed_addresses.get_or_insert(vec![]).push(address);

        Ok(self)
    }

    /// Sets whether process metrics are registered once the exporter has started.
    ///
    /// Without the `process` feature, enabling this only logs a warning on start.
    ///
    /// Defaults to `true`.
    #[must_use]
    pub fn with_process_metrics(mut self, enabled: bool) -> Self {
        self.process_metrics = enabled;
        self
    }

    /// Sets the registry to serve.
    ///
    /// Defaults to a new, empty registry.
    #[must_use]
    pub fn with_registry(mut self, registry: Arc<Registry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Builds the exporter.
    ///
    /// Nothing is bound or spawned until [`MetricExporter::ensure_started`] is called.
    pub fn build(self) -> MetricExporter {
        MetricExporter::new(
            self.registry.unwrap_or_default(),
            self.listen_address,
            self.path,
            self.allowed_addresses,
            self.process_metrics,
        )
    }

    /// Builds the exporter, installs it as the process-wide exporter and starts it.
    ///
    /// The outcome of starting is available from [`MetricExporter::status`].
    ///
    /// ## Errors
    ///
    /// If a process-wide exporter was already installed, or [`global`](crate::global) was called
    /// beforehand, an error variant will be returned.
    pub fn install(self) -> Result<&'static MetricExporter, ExporterError> {
        let exporter = super::install_global(self.build())?;
        exporter.ensure_started();

        Ok(exporter)
    }
}

impl Default for ExporterBuilder {
    fn default() -> Self {
        ExporterBuilder::new()
    }
}

fn parse_allowed_address(address: &str) -> Result<IpNet, ExporterError> {
    use std::str::FromStr;

    if let Ok(net) = IpNet::from_str(address) {
        return Ok(net);
    }

    // Plain addresses are taken as single-host subnets.
    IpAddr::from_str(address)
        .map(IpNet::from)
        .map_err(|e| ExporterError::InvalidAllowlistAddress(format!("{address}: {e}")))
}
