use http::Uri;
use std::sync::{PoisonError, RwLock};
use std::time::Duration;

mod forward;
mod pool;

pub use forward::{Forward, ForwardError, HttpForwarder, ProxyBody};
pub use pool::ServerPool;

/// One upstream target. The liveness flag is a cache of the latest probe
/// or passive mark; a backend reported alive can still fail mid-request.
pub struct Backend {
    url: Uri,
    addr: String,
    alive: RwLock<bool>,
    forwarder: Box<dyn Forward>,
}

impl Backend {
    pub fn new(url: Uri, forward_timeout: Duration) -> Self {
        let forwarder = HttpForwarder::new(url.clone(), forward_timeout);
        Self::with_forwarder(url, Box::new(forwarder))
    }

    pub fn with_forwarder(url: Uri, forwarder: Box<dyn Forward>) -> Self {
        let addr = match url.authority() {
            Some(authority) => format!("{}:{}", authority.host(), authority.port_u16().unwrap_or(80)),
            None => String::new(),
        };

        Self {
            url,
            addr,
            alive: RwLock::new(true),
            forwarder,
        }
    }

    pub fn url(&self) -> &Uri {
        &self.url
    }

    /// `host:port` used for transport probes.
    pub fn addr(&self) -> &str {
        &self.addr
    }

    pub fn set_alive(&self, alive: bool) {
        // a bool cannot be left half-written, so a poisoned lock is still usable
        *self.alive.write().unwrap_or_else(PoisonError::into_inner) = alive;
    }

    pub fn is_alive(&self) -> bool {
        *self.alive.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn forwarder(&self) -> &dyn Forward {
        self.forwarder.as_ref()
    }
}

impl std::fmt::Debug for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Backend")
            .field("url", &self.url)
            .field("alive", &self.is_alive())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn backend(url: &str) -> Backend {
        Backend::new(url.parse().unwrap(), Duration::from_secs(1))
    }

    #[test]
    fn starts_alive_and_flips() {
        let b = backend("http://localhost:8080");
        assert!(b.is_alive());

        b.set_alive(false);
        assert!(!b.is_alive());

        b.set_alive(true);
        assert!(b.is_alive());
    }

    #[test]
    fn probe_address_defaults_to_port_80() {
        assert_eq!(backend("http://localhost:8080").addr(), "localhost:8080");
        assert_eq!(backend("http://example.com/base").addr(), "example.com:80");
    }

    #[test]
    fn readers_see_writes_across_threads() {
        let b = Arc::new(backend("http://127.0.0.1:9"));

        let writer = {
            let b = b.clone();
            std::thread::spawn(move || {
                for i in 0..1000 {
                    b.set_alive(i % 2 == 0);
                }
                b.set_alive(false);
            })
        };
        let readers: Vec<_> = (0..4)
            .map(|_| {
                let b = b.clone();
                std::thread::spawn(move || {
                    for _ in 0..1000 {
                        let _ = b.is_alive();
                    }
                })
            })
            .collect();

        writer.join().unwrap();
        for r in readers {
            r.join().unwrap();
        }
        assert!(!b.is_alive());
    }
}
