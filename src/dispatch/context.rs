/// Per-request forwarding counters, passed by value and never shared
/// between requests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AttemptContext {
    retries: u32,
    attempts: u32,
}

impl AttemptContext {
    /// Same-peer re-forwards since the last escalation.
    pub fn retries(self) -> u32 {
        self.retries
    }

    /// Escalations to a freshly selected peer.
    pub fn attempts(self) -> u32 {
        self.attempts
    }

    pub fn next_retry(self) -> Self {
        Self {
            retries: self.retries + 1,
            ..self
        }
    }

    /// Moves to a new peer: the retry budget starts over.
    pub fn escalate(self) -> Self {
        Self {
            retries: 0,
            attempts: self.attempts + 1,
        }
    }
}
