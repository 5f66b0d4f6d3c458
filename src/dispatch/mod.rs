use crate::backend::{ProxyBody, ServerPool};
use crate::config::DispatchConfig;
use http::header::{self, HeaderValue};
use http::request::Parts;
use http::{Request, Response, StatusCode};
use http_body_util::{BodyExt, Full, LengthLimitError, Limited};
use hyper::body::{Body, Bytes};
use std::error::Error as StdError;
use std::sync::Arc;
use tokio::time;
use tracing::{debug, warn};

mod context;
mod policy;

pub use context::AttemptContext;
pub use policy::{Decision, DispatchLimits, admit, on_forward_failure};

/// Request entry point: picks a peer, forwards, and applies the
/// retry/escalation policy when forwarding fails.
pub struct Dispatcher {
    pool: Arc<ServerPool>,
    limits: DispatchLimits,
    max_body_bytes: usize,
}

impl Dispatcher {
    pub fn new(pool: Arc<ServerPool>, config: &DispatchConfig) -> Self {
        Self {
            pool,
            limits: config.limits(),
            max_body_bytes: config.max_request_body_bytes,
        }
    }

    pub async fn dispatch<B>(&self, request: Request<B>) -> Response<ProxyBody>
    where
        B: Body<Data = Bytes>,
        B::Error: Into<Box<dyn StdError + Send + Sync>>,
    {
        let (parts, body) = request.into_parts();

        // buffered so each retry can replay it
        let body = match Limited::new(body, self.max_body_bytes).collect().await {
            Ok(collected) => collected.to_bytes(),
            Err(e) if e.downcast_ref::<LengthLimitError>().is_some() => {
                debug!("Request body over {} bytes rejected", self.max_body_bytes);
                return text_response(StatusCode::PAYLOAD_TOO_LARGE, "Payload Too Large\n");
            }
            Err(e) => {
                debug!("Failed to read request body: {}", e);
                return text_response(StatusCode::BAD_REQUEST, "Bad Request\n");
            }
        };

        self.run(parts, body, AttemptContext::default()).await
    }

    async fn run(&self, parts: Parts, body: Bytes, mut ctx: AttemptContext) -> Response<ProxyBody> {
        'dispatch: loop {
            if !admit(ctx, &self.limits) {
                warn!("[{}] {} attempts, giving up", parts.uri, ctx.attempts());
                return service_unavailable();
            }

            let Some(peer) = self.pool.get_next_peer() else {
                return service_unavailable();
            };

            loop {
                let error = match peer.forwarder().forward(replay(&parts, &body)).await {
                    Ok(response) => return response,
                    Err(e) => e,
                };
                warn!(
                    "[{}] {} (retry {}, attempt {})",
                    peer.addr(),
                    error,
                    ctx.retries(),
                    ctx.attempts()
                );

                let decision = on_forward_failure(ctx, &self.limits);
                if decision.abandons_peer() {
                    peer.set_alive(false);
                    warn!("Backend {} marked dead after {} retries", peer.url(), ctx.retries());
                }

                match decision {
                    Decision::RetrySame(next) => {
                        time::sleep(self.limits.backoff).await;
                        ctx = next;
                    }
                    Decision::Escalate(next) => {
                        ctx = next;
                        continue 'dispatch;
                    }
                    Decision::Reject => {
                        warn!("[{}] {} attempts, giving up", parts.uri, ctx.attempts() + 1);
                        return service_unavailable();
                    }
                }
            }
        }
    }
}

fn replay(parts: &Parts, body: &Bytes) -> Request<Full<Bytes>> {
    let mut request = Request::new(Full::new(body.clone()));
    *request.method_mut() = parts.method.clone();
    *request.uri_mut() = parts.uri.clone();
    *request.headers_mut() = parts.headers.clone();
    request
}

pub fn service_unavailable() -> Response<ProxyBody> {
    text_response(StatusCode::SERVICE_UNAVAILABLE, "Service Unavailable\n")
}

fn text_response(status: StatusCode, text: &'static str) -> Response<ProxyBody> {
    let body: ProxyBody = Full::new(Bytes::from_static(text.as_bytes()))
        .map_err(|never| match never {})
        .boxed();
    let mut response = Response::new(body);
    *response.status_mut() = status;
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    response
}
