use http_body_util::Full;
use hyper::body::{Bytes, Incoming};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response};
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use tokio::net::TcpListener;

// Minimal HTTP backend for trying the balancer locally.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let port: u16 = std::env::args()
        .nth(1)
        .and_then(|p| p.parse().ok())
        .unwrap_or(8080);

    let listener = TcpListener::bind(format!("127.0.0.1:{}", port)).await?;
    println!("Echo server listening on port {}", port);

    loop {
        let (socket, _) = listener.accept().await?;
        tokio::spawn(async move {
            let service = service_fn(move |request: Request<Incoming>| handle(port, request));
            if let Err(e) = http1::Builder::new()
                .serve_connection(TokioIo::new(socket), service)
                .await
            {
                eprintln!("Error handling client: {}", e);
            }
        });
    }
}

async fn handle(port: u16, request: Request<Incoming>) -> Result<Response<Full<Bytes>>, Infallible> {
    let response = format!(
        "Backend {} says: {} {}\n",
        port,
        request.method(),
        request.uri()
    );
    Ok(Response::new(Full::new(Bytes::from(response))))
}
