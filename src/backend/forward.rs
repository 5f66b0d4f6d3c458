use futures::future::BoxFuture;
use http::header::{self, HeaderMap, HeaderName, HeaderValue};
use http::uri::{PathAndQuery, Uri};
use http::{Request, Response};
use http_body_util::combinators::BoxBody;
use http_body_util::{BodyExt, Full};
use hyper::body::Bytes;
use hyper_util::client::legacy::Client;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::rt::TokioExecutor;
use std::time::Duration;
use thiserror::Error;
use tokio::time;
use tracing::debug;

pub type ProxyBody = BoxBody<Bytes, hyper::Error>;

#[derive(Debug, Error)]
pub enum ForwardError {
    #[error("transport error: {0}")]
    Transport(#[from] hyper_util::client::legacy::Error),

    #[error("no response within {0:?}")]
    Timeout(Duration),

    #[error("cannot build upstream uri: {0}")]
    InvalidUri(#[from] http::Error),
}

/// Relays one buffered request to a single upstream target.
pub trait Forward: Send + Sync {
    fn forward(&self, request: Request<Full<Bytes>>) -> BoxFuture<'_, Result<Response<ProxyBody>, ForwardError>>;
}

pub struct HttpForwarder {
    target: Uri,
    client: Client<HttpConnector, Full<Bytes>>,
    timeout: Duration,
}

impl HttpForwarder {
    pub fn new(target: Uri, timeout: Duration) -> Self {
        let mut connector = HttpConnector::new();
        connector.set_nodelay(true);
        let client = Client::builder(TokioExecutor::new()).build(connector);

        Self {
            target,
            client,
            timeout,
        }
    }
}

impl Forward for HttpForwarder {
    fn forward(&self, mut request: Request<Full<Bytes>>) -> BoxFuture<'_, Result<Response<ProxyBody>, ForwardError>> {
        Box::pin(async move {
            *request.uri_mut() = upstream_uri(&self.target, request.uri())?;
            strip_hop_by_hop(request.headers_mut());
            if let Some(authority) = self.target.authority() {
                if let Ok(host) = HeaderValue::from_str(authority.as_str()) {
                    request.headers_mut().insert(header::HOST, host);
                }
            }

            debug!("Forwarding {} {}", request.method(), request.uri());
            let response = time::timeout(self.timeout, self.client.request(request))
                .await
                .map_err(|_| ForwardError::Timeout(self.timeout))??;

            let (mut parts, body) = response.into_parts();
            strip_hop_by_hop(&mut parts.headers);
            Ok(Response::from_parts(parts, body.boxed()))
        })
    }
}

/// Replaces scheme and authority with the target's, prefixing the target's
/// base path to the request path. The query passes through untouched.
pub(crate) fn upstream_uri(target: &Uri, incoming: &Uri) -> Result<Uri, http::Error> {
    let base = target.path().trim_end_matches('/');
    let path = incoming.path();
    let joined = match (base.is_empty(), path.starts_with('/')) {
        (true, true) => path.to_string(),
        (true, false) => format!("/{path}"),
        (false, true) => format!("{base}{path}"),
        (false, false) => format!("{base}/{path}"),
    };
    let path_and_query: PathAndQuery = match incoming.query() {
        Some(query) => format!("{joined}?{query}").parse()?,
        None => joined.parse()?,
    };

    let mut builder = Uri::builder().path_and_query(path_and_query);
    if let Some(scheme) = target.scheme() {
        builder = builder.scheme(scheme.clone());
    }
    if let Some(authority) = target.authority() {
        builder = builder.authority(authority.clone());
    }
    builder.build()
}

const HOP_BY_HOP: [&str; 8] = [
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

pub(crate) fn strip_hop_by_hop(headers: &mut HeaderMap) {
    let named: Vec<HeaderName> = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .filter_map(|name| HeaderName::from_bytes(name.trim().as_bytes()).ok())
        .collect();

    for name in &named {
        headers.remove(name);
    }
    for name in HOP_BY_HOP {
        headers.remove(name);
    }
}
