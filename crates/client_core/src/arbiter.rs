//! Last-issued-wins arbitration for suggestion fetches.

use std::{
    fmt,
    sync::{
        atomic::{AtomicU64, Ordering},
        Mutex, PoisonError,
    },
};

use tokio::task::AbortHandle;
use tracing::debug;

static NEXT_TOKEN: AtomicU64 = AtomicU64::new(1);

/// Freshness marker minted once per fetch. Tokens are unique and strictly
/// increasing across every arbiter in the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RequestToken(u64);

impl RequestToken {
    pub fn value(self) -> u64 {
        self.0
    }
}

impl fmt::Display for RequestToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

struct InFlight {
    token: RequestToken,
    abort: AbortHandle,
}

#[derive(Default)]
pub struct RequestArbiter {
    current: AtomicU64,
    in_flight: Mutex<Option<InFlight>>,
}

impl RequestArbiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mint a new current token. Every earlier token becomes stale and the fetch
    /// tracked for it, if any, is aborted.
    pub fn issue(&self) -> RequestToken {
        let token = RequestToken(NEXT_TOKEN.fetch_add(1, Ordering::SeqCst));
        self.current.store(token.0, Ordering::SeqCst);
        self.abort_in_flight();
        token
    }

    pub fn is_current(&self, token: RequestToken) -> bool {
        self.current.load(Ordering::SeqCst) == token.0
    }

    /// Attach the task running the fetch for `token` so a later `issue` can cancel it.
    /// A stale token's task is aborted on the spot.
    pub fn track(&self, token: RequestToken, abort: AbortHandle) {
        if !self.is_current(token) {
            abort.abort();
            return;
        }
        let mut slot = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        *slot = Some(InFlight { token, abort });
    }

    /// Forget the task for `token` once it has resolved.
    pub fn finish(&self, token: RequestToken) {
        let mut slot = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.as_ref().is_some_and(|in_flight| in_flight.token == token) {
            *slot = None;
        }
    }

    /// Make every outstanding token stale without starting a new fetch.
    pub fn supersede(&self) {
        let _ = self.issue();
    }

    fn abort_in_flight(&self) {
        let previous = self
            .in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(previous) = previous {
            debug!(token = previous.token.0, "arbiter: aborting superseded fetch");
            previous.abort.abort();
        }
    }
}
