//! Transaction coordinator.
//!
//! [`Transactional::run`] wraps a unit of work in the task's transaction. The
//! outermost call owns the transaction and is the only one that commits or
//! rolls back; nested calls on the same task join it. Failures of the unit of
//! work are returned unchanged after the rollback, and panics are resumed.

use std::future::Future;
use std::panic::{AssertUnwindSafe, resume_unwind};
use std::sync::Arc;

use futures::FutureExt;
use tracing::{debug, warn};

use super::error::SessionError;
use super::router::{RoutingDecision, SessionRouter};
use super::{SESSION, Session};

/// How a call relates to a transaction already open on the task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Propagation {
    /// Join the open transaction, or start one when there is none.
    #[default]
    Required,
    /// Always run in a fresh session and transaction that commits on its own.
    RequiresNew,
}

#[derive(Clone)]
pub struct Transactional {
    router: Arc<SessionRouter>,
    intent: RoutingDecision,
    propagation: Propagation,
}

impl Transactional {
    pub fn new(router: Arc<SessionRouter>) -> Self {
        Self {
            router,
            intent: RoutingDecision::Write,
            propagation: Propagation::Required,
        }
    }

    /// Route a newly started transaction to a reader.
    pub fn read_only(mut self) -> Self {
        self.intent = RoutingDecision::Read;
        self
    }

    pub fn propagation(mut self, propagation: Propagation) -> Self {
        self.propagation = propagation;
        self
    }

    /// Run `work` transactionally.
    ///
    /// Coordinator failures (binding, connecting, committing) are converted
    /// into `E`; failures produced by `work` itself pass through untouched.
    pub async fn run<F, Fut, T, E>(&self, work: F) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: From<SessionError>,
    {
        match self.propagation {
            Propagation::RequiresNew => SESSION.scope(self.run_outermost(work)).await,
            Propagation::Required if SESSION.in_scope() => self.run_required(work).await,
            Propagation::Required => SESSION.scope(self.run_required(work)).await,
        }
    }

    async fn run_required<F, Fut, T, E>(&self, work: F) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: From<SessionError>,
    {
        match SESSION.current() {
            Ok(session) if session.in_transaction() => {
                if self.intent == RoutingDecision::Write && session.intent() == RoutingDecision::Read {
                    warn!(
                        session_id = %session.id(),
                        "write unit of work joined a read-only transaction"
                    );
                }
                run_nested(&session, work).await
            }
            Ok(session) => run_owned(session, false, work).await,
            Err(_) => self.run_outermost(work).await,
        }
    }

    async fn run_outermost<F, Fut, T, E>(&self, work: F) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: From<SessionError>,
    {
        let session = Arc::new(self.router.acquire(self.intent));
        SESSION
            .bind(Arc::clone(&session))
            .map_err(|err| E::from(SessionError::from(err)))?;
        run_owned(session, true, work).await
    }
}

impl std::fmt::Debug for Transactional {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transactional")
            .field("intent", &self.intent)
            .field("propagation", &self.propagation)
            .finish()
    }
}

async fn run_nested<F, Fut, T, E>(session: &Arc<Session>, work: F) -> Result<T, E>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let depth = DepthGuard::enter(session);
    debug!(session_id = %session.id(), depth = depth.level, "joined transaction");
    let outcome = AssertUnwindSafe(work()).catch_unwind().await;
    drop(depth);

    match outcome {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(err)) => {
            session.mark_rollback_only();
            Err(err)
        }
        Err(panic) => {
            session.mark_rollback_only();
            resume_unwind(panic)
        }
    }
}

/// Begin, run, and finish a transaction owned by this call. `bound_here`
/// records whether this call bound the session and must therefore clear it.
async fn run_owned<F, Fut, T, E>(session: Arc<Session>, bound_here: bool, work: F) -> Result<T, E>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: From<SessionError>,
{
    let mut finish = FinishGuard::new(Arc::clone(&session), bound_here);

    session.begin().await.map_err(E::from)?;

    let depth = DepthGuard::enter(&session);
    let outcome = AssertUnwindSafe(work()).catch_unwind().await;
    drop(depth);

    let result = match outcome {
        Ok(Ok(value)) if !session.is_rollback_only() => match session.commit().await {
            Ok(()) => Ok(value),
            Err(err) => {
                // The session is closed now; a binder's binding goes too.
                finish.unbind_on_exit();
                Err(E::from(err))
            }
        },
        Ok(Ok(_)) => {
            rollback(&session).await;
            Err(E::from(SessionError::RollbackOnly))
        }
        Ok(Err(err)) => {
            rollback(&session).await;
            Err(err)
        }
        Err(panic) => {
            rollback(&session).await;
            finish.disarm();
            resume_unwind(panic)
        }
    };

    finish.disarm();
    result
}

async fn rollback(session: &Session) {
    if let Err(err) = session.rollback().await {
        warn!(
            session_id = %session.id(),
            error = %err,
            "rollback failed; returning the original failure"
        );
    }
}

struct DepthGuard<'a> {
    session: &'a Session,
    level: usize,
}

impl<'a> DepthGuard<'a> {
    fn enter(session: &'a Session) -> Self {
        let level = session.enter();
        Self { session, level }
    }
}

impl Drop for DepthGuard<'_> {
    fn drop(&mut self) {
        self.session.exit();
    }
}

/// Rolls back when the owning future is dropped before the transaction was
/// finished, and clears the binding on every exit path when `unbind` is set.
struct FinishGuard {
    session: Arc<Session>,
    unbind: bool,
    armed: bool,
}

impl FinishGuard {
    fn new(session: Arc<Session>, unbind: bool) -> Self {
        Self {
            session,
            unbind,
            armed: true,
        }
    }

    fn disarm(&mut self) {
        self.armed = false;
    }

    fn unbind_on_exit(&mut self) {
        self.unbind = true;
    }
}

impl Drop for FinishGuard {
    fn drop(&mut self) {
        if self.armed {
            self.session.abort();
        }
        if self.unbind {
            if let Some(bound) = SESSION.clear() {
                if !Arc::ptr_eq(&bound, &self.session) {
                    warn!(
                        expected = %self.session.id(),
                        found = %bound.id(),
                        "cleared a session that was bound by another unit of work"
                    );
                }
            }
        }
    }
}
