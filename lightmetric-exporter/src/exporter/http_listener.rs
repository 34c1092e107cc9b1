use std::{
    net::{IpAddr, SocketAddr},
    sync::Arc,
};

use http_body_util::Full;
use hyper::{
    body::{self, Bytes, Incoming},
    header::{HeaderValue, CONTENT_TYPE},
    server::conn::http1::Builder as HyperHttpBuilder,
    service::service_fn,
    Request, Response, StatusCode,
};
use hyper_util::rt::TokioIo;
use ipnet::IpNet;
use lightmetric::Registry;
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, warn};

use crate::formatting::{render, CONTENT_TYPE_004};
use crate::ExporterError;

use super::ExporterFuture;

struct HttpListeningExporter {
    inner: Arc<Inner>,
}

struct Inner {
    registry: Arc<Registry>,
    path: String,
    allowed_addresses: Option<Vec<IpNet>>,
}

impl HttpListeningExporter {
    async fn serve(&self, listener: std::net::TcpListener) -> Result<(), ExporterError> {
        let listener = TcpListener::from_std(listener)
            .map_err(|e| ExporterError::FailedToCreateHTTPListener(e.to_string()))?;

        loop {
            let stream = match listener.accept().await {
                Ok((stream, _)) => stream,
                Err(e) => {
                    warn!(error = ?e, "Error accepting connection. Ignoring request.");
                    continue;
                }
            };

            let remote_addr = match stream.peer_addr() {
                Ok(remote_address) => remote_address.ip(),
                Err(e) => {
                    warn!(error = ?e, "Error obtaining remote address. Ignoring request.");
                    continue;
                }
            };

            self.process_stream(stream, remote_addr);
        }
    }

    fn process_stream(&self, stream: TcpStream, remote_address: IpAddr) {
        let inner = Arc::clone(&self.inner);
        let service = service_fn(move |req: Request<body::Incoming>| {
            let inner = Arc::clone(&inner);
            async move { Self::handle_http_request(&inner, remote_address, &req) }
        });

        tokio::task::spawn(async move {
            if let Err(err) =
                HyperHttpBuilder::new().serve_connection(TokioIo::new(stream), service).await
            {
                warn!(error = ?err, "Error serving connection.");
            };
        });
    }

    fn handle_http_request(
        inner: &Inner,
        remote_address: IpAddr,
        req: &Request<Incoming>,
    ) -> Result<Response<Full<Bytes>>, hyper::Error> {
        let is_allowed = match &inner.allowed_addresses {
            Some(addresses) => addresses.iter().any(|address| address.contains(&remote_address)),
            None => true,
        };

        if !is_allowed {
            debug!(%remote_address, "Rejected scrape from address outside of the allowlist.");
            return Ok(Self::new_empty_response(StatusCode::FORBIDDEN));
        }

        if req.uri().path() != inner.path {
            return Ok(Self::new_empty_response(StatusCode::NOT_FOUND));
        }

        let payload = render(&inner.registry.gather());
        let mut response = Response::new(Full::new(Bytes::from(payload)));
        response.headers_mut().insert(CONTENT_TYPE, HeaderValue::from_static(CONTENT_TYPE_004));
        Ok(response)
    }

    fn new_empty_response(status: StatusCode) -> Response<Full<Bytes>> {
        let mut response = Response::new(Full::<Bytes>::default());
        *response.status_mut() = status;
        response
    }
}

/// Binds the listen address, ready to be served from within a Tokio runtime.
pub(crate) fn bind(listen_address: SocketAddr) -> Result<std::net::TcpListener, ExporterError> {
    std::net::TcpListener::bind(listen_address)
        .and_then(|listener| {
            listener.set_nonblocking(true)?;
            Ok(listener)
        })
        .map_err(|e| ExporterError::FailedToCreateHTTPListener(e.to_string()))
}

/// Creates an `ExporterFuture` serving the rendered registry on `path`.
///
/// Requests on any other path get a 404, and requests from addresses outside of
/// `allowed_addresses`, when set, get a 403.
pub(crate) fn new_http_listener(
    listener: std::net::TcpListener,
    registry: Arc<Registry>,
    path: String,
    allowed_addresses: Option<Vec<IpNet>>,
) -> ExporterFuture {
    let exporter =
        HttpListeningExporter { inner: Arc::new(Inner { registry, path, allowed_addresses }) };

    Box::pin(async move { exporter.serve(listener).await })
}
