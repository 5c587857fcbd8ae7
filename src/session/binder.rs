//! Per-request session binding.
//!
//! [`with_scope`] acquires one session for a whole unit of work (typically a
//! request handler), binds it for the duration of `body`, and releases it on
//! every exit path. Transactional calls inside `body` reuse the bound session.

use std::future::Future;
use std::sync::Arc;

use tracing::{Instrument, debug, debug_span};

use super::router::{RoutingDecision, SessionRouter};
use super::{SESSION, Session};

/// Run `body` with a fresh session for `intent` bound to the current task.
///
/// The session is released once `body` completes, fails, panics, or is
/// dropped; releasing rolls back any transaction still open at that point.
pub async fn with_scope<F, Fut>(router: &SessionRouter, intent: RoutingDecision, body: F) -> Fut::Output
where
    F: FnOnce() -> Fut,
    Fut: Future,
{
    let session = Arc::new(router.acquire(intent));
    let span = debug_span!("session_scope", session_id = %session.id(), %intent);
    let guard = ReleaseGuard {
        session: Arc::clone(&session),
    };

    let output = SESSION
        .scope_with(session, body())
        .instrument(span)
        .await;

    drop(guard);
    output
}

struct ReleaseGuard {
    session: Arc<Session>,
}

impl Drop for ReleaseGuard {
    fn drop(&mut self) {
        // A transaction still open here belongs to a unit of work that never
        // finished; `abort` is a no-op for idle sessions.
        self.session.abort();
        debug!(session_id = %self.session.id(), "session released");
    }
}
