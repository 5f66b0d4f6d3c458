use super::Backend;
use crate::health::is_backend_alive;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tracing::{info, warn};

/// Fixed, ordered set of backends rotated through by a shared cursor.
pub struct ServerPool {
    backends: Vec<Arc<Backend>>,
    current: AtomicUsize,
}

impl ServerPool {
    pub fn new(backends: Vec<Backend>) -> Self {
        Self {
            backends: backends.into_iter().map(Arc::new).collect(),
            current: AtomicUsize::new(0),
        }
    }

    pub fn backends(&self) -> &[Arc<Backend>] {
        &self.backends
    }

    /// Advances the cursor and returns its new value modulo the pool size.
    pub fn next_index(&self) -> usize {
        if self.backends.is_empty() {
            return 0;
        }
        self.current.fetch_add(1, Ordering::Relaxed).wrapping_add(1) % self.backends.len()
    }

    /// Returns the first alive backend in one cyclic sweep starting at
    /// `next_index()`, or `None` when every backend is marked dead.
    pub fn get_next_peer(&self) -> Option<Arc<Backend>> {
        let len = self.backends.len();
        if len == 0 {
            return None;
        }

        let next = self.next_index();
        for offset in 0..len {
            let idx = (next + offset) % len;
            let backend = &self.backends[idx];
            if backend.is_alive() {
                if idx != next {
                    // hint for the next caller, racing stores are harmless
                    self.current.store(idx, Ordering::Relaxed);
                }
                return Some(backend.clone());
            }
        }

        warn!("No alive backends available!");
        None
    }

    /// Probes every backend in order and records the result on each one.
    pub async fn health_check(&self, timeout: Duration) {
        for backend in &self.backends {
            let alive = is_backend_alive(backend.addr(), timeout).await;
            backend.set_alive(alive);
            info!("{} [{}]", backend.url(), if alive { "up" } else { "down" });
        }
    }

    #[cfg(test)]
    pub(crate) fn cursor(&self) -> usize {
        self.current.load(Ordering::Relaxed)
    }
}
