use crate::dispatch::Dispatcher;
use anyhow::Result;
use http::header::{HeaderMap, HeaderValue};
use hyper::Request;
use hyper::body::Incoming;
use hyper::service::service_fn;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto;
use std::convert::Infallible;
use std::future::Future;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, error, info};

pub struct Proxy {
    listen_addr: SocketAddr,
    dispatcher: Arc<Dispatcher>,
}

impl Proxy {
    pub fn new(listen_addr: SocketAddr, dispatcher: Arc<Dispatcher>) -> Self {
        Self {
            listen_addr,
            dispatcher,
        }
    }

    pub async fn run(&self, shutdown: impl Future<Output = ()>) -> Result<()> {
        let listener = TcpListener::bind(self.listen_addr).await?;
        info!("Listening on {}", self.listen_addr);
        self.serve(listener, shutdown).await
    }

    /// Accepts until `shutdown` resolves. Connections already accepted keep
    /// running on their own tasks.
    pub async fn serve(&self, listener: TcpListener, shutdown: impl Future<Output = ()>) -> Result<()> {
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok((client_socket, client_addr)) => {
                        debug!("New connection from {}", client_addr);
                        let dispatcher = self.dispatcher.clone();

                        tokio::spawn(async move {
                            if let Err(e) = handle_connection(client_socket, client_addr, dispatcher).await {
                                error!("Error handling connection from {}: {}", client_addr, e);
                            }
                        });
                    }
                    Err(e) => {
                        error!("Failed to accept connection: {}", e);
                    }
                },
                _ = &mut shutdown => {
                    info!("No longer accepting connections");
                    return Ok(());
                }
            }
        }
    }
}

async fn handle_connection(
    client_socket: TcpStream,
    client_addr: SocketAddr,
    dispatcher: Arc<Dispatcher>,
) -> Result<()> {
    let service = service_fn(move |mut request: Request<Incoming>| {
        let dispatcher = dispatcher.clone();
        async move {
            append_forwarded_for(request.headers_mut(), client_addr.ip());
            Ok::<_, Infallible>(dispatcher.dispatch(request).await)
        }
    });

    auto::Builder::new(TokioExecutor::new())
        .serve_connection(TokioIo::new(client_socket), service)
        .await
        .map_err(|e| anyhow::anyhow!(e))?;

    debug!("Connection from {} closed", client_addr);
    Ok(())
}

fn append_forwarded_for(headers: &mut HeaderMap, client: IpAddr) {
    let mut hops: Vec<String> = headers
        .get_all("x-forwarded-for")
        .iter()
        .filter_map(|v| v.to_str().ok())
        .map(str::to_string)
        .collect();
    hops.push(client.to_string());
    let value = hops.join(", ");
    if let Ok(value) = HeaderValue::from_str(&value) {
        headers.insert("x-forwarded-for", value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{Backend, ServerPool};
    use crate::config::DispatchConfig;
    use http::{Response, StatusCode, header};
    use http_body_util::{BodyExt, Full};
    use hyper::body::Bytes;
    use hyper_util::client::legacy::Client;
    use std::time::Duration;

    async fn spawn_backend() -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            loop {
                let (stream, _) = listener.accept().await.unwrap();
                tokio::spawn(async move {
                    let service = service_fn(|request: Request<Incoming>| async move {
                        let value_of = |name: &str| {
                            request
                                .headers()
                                .get(name)
                                .and_then(|v| v.to_str().ok())
                                .unwrap_or("-")
                                .to_string()
                        };
                        let text = format!(
                            "{} {} host={} xff={}",
                            request.method(),
                            request.uri(),
                            value_of(header::HOST.as_str()),
                            value_of("x-forwarded-for"),
                        );
                        Ok::<_, Infallible>(Response::new(Full::new(Bytes::from(text))))
                    });
                    let _ = hyper::server::conn::http1::Builder::new()
                        .serve_connection(TokioIo::new(stream), service)
                        .await;
                });
            }
        });

        addr
    }

    async fn spawn_proxy(backend_urls: Vec<String>) -> SocketAddr {
        let backends = backend_urls
            .into_iter()
            .map(|url| Backend::new(url.parse().unwrap(), Duration::from_secs(2)))
            .collect();
        let pool = Arc::new(ServerPool::new(backends));
        let dispatcher = Arc::new(Dispatcher::new(pool, &DispatchConfig::default()));

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let proxy = Proxy::new(addr, dispatcher);
            proxy.serve(listener, std::future::pending()).await.unwrap();
        });
        addr
    }

    async fn get(url: String) -> (StatusCode, String) {
        let client = Client::builder(TokioExecutor::new()).build_http::<Full<Bytes>>();
        let request = Request::get(url).body(Full::new(Bytes::new())).unwrap();
        let response = client.request(request).await.unwrap();
        let status = response.status();
        let body = response.into_body().collect().await.unwrap().to_bytes();
        (status, String::from_utf8(body.to_vec()).unwrap())
    }

    #[tokio::test]
    async fn forwards_with_rewritten_host() {
        let backend = spawn_backend().await;
        let proxy = spawn_proxy(vec![format!("http://{backend}")]).await;

        let (status, body) = get(format!("http://{proxy}/hello?x=1")).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, format!("GET /hello?x=1 host={backend} xff=127.0.0.1"));
    }

    #[tokio::test]
    async fn unreachable_backends_yield_503() {
        let closed = {
            let l = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            l.local_addr().unwrap()
        };
        let proxy = spawn_proxy(vec![format!("http://{closed}")]).await;

        let (status, body) = get(format!("http://{proxy}/")).await;

        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body, "Service Unavailable\n");
    }

    #[test]
    fn forwarded_for_is_appended() {
        let mut headers = HeaderMap::new();
        append_forwarded_for(&mut headers, "10.0.0.1".parse().unwrap());
        append_forwarded_for(&mut headers, "10.0.0.2".parse().unwrap());
        assert_eq!(headers["x-forwarded-for"], "10.0.0.1, 10.0.0.2");
    }

    #[test]
    fn forwarded_for_keeps_every_prior_header() {
        let mut headers = HeaderMap::new();
        headers.append("x-forwarded-for", HeaderValue::from_static("192.0.2.1"));
        headers.append("x-forwarded-for", HeaderValue::from_static("198.51.100.7, 203.0.113.9"));

        append_forwarded_for(&mut headers, "10.0.0.1".parse().unwrap());

        let values: Vec<_> = headers.get_all("x-forwarded-for").iter().collect();
        assert_eq!(values.len(), 1);
        assert_eq!(values[0], "192.0.2.1, 198.51.100.7, 203.0.113.9, 10.0.0.1");
    }

    async fn spawn_silent_backend() -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let mut held = Vec::new();
            loop {
                let (stream, _) = listener.accept().await.unwrap();
                held.push(stream);
            }
        });

        addr
    }

    #[tokio::test]
    async fn silent_backend_times_out_and_is_marked_dead() {
        let backend = spawn_silent_backend().await;
        let pool = Arc::new(ServerPool::new(vec![Backend::new(
            format!("http://{backend}").parse().unwrap(),
            Duration::from_millis(50),
        )]));
        let dispatcher = Dispatcher::new(pool.clone(), &DispatchConfig::default());

        let request = Request::get("/slow").body(Full::new(Bytes::new())).unwrap();
        let started = std::time::Instant::now();
        let response = tokio::time::timeout(Duration::from_secs(5), dispatcher.dispatch(request))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert!(!pool.backends()[0].is_alive());
        assert!(started.elapsed() < Duration::from_secs(1), "took {:?}", started.elapsed());
    }
}
