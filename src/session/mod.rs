//! Request-scoped database sessions.
//!
//! A [`Session`] is acquired from a [`SessionRouter`], bound to the current
//! task through the task-local [`SESSION`] slot, and driven through its
//! transaction by [`Transactional`]. Code running inside the scope reaches the
//! session with [`current`] instead of receiving it as a parameter.

pub mod binder;
pub mod error;
pub mod router;
pub mod scoped;
pub mod transaction;

use std::cell::RefCell;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicUsize, Ordering};
use std::time::Instant;

use metrics::{counter, histogram};
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::store::{BackingStore, StoreConnection};

pub use binder::with_scope;
pub use error::SessionError;
pub use router::{FirstReader, ReaderSelector, RoundRobin, RoutingDecision, SessionRouter};
pub use scoped::{ScopeError, ScopedResource};
pub use transaction::{Propagation, Transactional};

pub(crate) const METRIC_TX_COMMIT_TOTAL: &str = "scopekit_tx_commit_total";
pub(crate) const METRIC_TX_ROLLBACK_TOTAL: &str = "scopekit_tx_rollback_total";
pub(crate) const METRIC_TX_DURATION_MS: &str = "scopekit_tx_duration_ms";

tokio::task_local! {
    static SESSION_SLOT: RefCell<Option<Arc<Session>>>;
}

/// Task-local slot holding the session of the current unit of work.
pub static SESSION: ScopedResource<Arc<Session>> = ScopedResource::new("session", &SESSION_SLOT);

/// Session bound to the current task.
pub fn current() -> Result<Arc<Session>, SessionError> {
    SESSION.current().map_err(SessionError::from)
}

/// Bind `session` to the current task. Requires an open scope.
pub fn bind(session: Arc<Session>) -> Result<(), SessionError> {
    SESSION.bind(session).map_err(SessionError::from)
}

/// Drop the binding of the current task, if any.
pub fn clear() -> Option<Arc<Session>> {
    SESSION.clear()
}

/// Run `future` inside an empty session scope.
pub async fn scope<F>(future: F) -> F::Output
where
    F: Future,
{
    SESSION.scope(future).await
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    /// No transaction open; the connection may not exist yet.
    Idle,
    InTransaction,
    /// Rolled back or released.
    Closed,
}

impl SessionPhase {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Idle,
            1 => Self::InTransaction,
            _ => Self::Closed,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            Self::Idle => 0,
            Self::InTransaction => 1,
            Self::Closed => 2,
        }
    }
}

struct SessionState {
    connection: Option<Box<dyn StoreConnection>>,
    began_at: Option<Instant>,
}

/// Handle to one logical connection and its transaction.
pub struct Session {
    id: Uuid,
    intent: RoutingDecision,
    store: Arc<dyn BackingStore>,
    state: Mutex<SessionState>,
    phase: AtomicU8,
    depth: AtomicUsize,
    rollback_only: AtomicBool,
}

impl Session {
    pub(crate) fn new(intent: RoutingDecision, store: Arc<dyn BackingStore>) -> Self {
        Self {
            id: Uuid::new_v4(),
            intent,
            store,
            state: Mutex::new(SessionState {
                connection: None,
                began_at: None,
            }),
            phase: AtomicU8::new(SessionPhase::Idle.as_u8()),
            depth: AtomicUsize::new(0),
            rollback_only: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn intent(&self) -> RoutingDecision {
        self.intent
    }

    pub fn store_name(&self) -> &str {
        self.store.name()
    }

    pub fn phase(&self) -> SessionPhase {
        SessionPhase::from_u8(self.phase.load(Ordering::SeqCst))
    }

    pub fn in_transaction(&self) -> bool {
        self.phase() == SessionPhase::InTransaction
    }

    /// Number of transactional units of work currently running on this session.
    pub fn depth(&self) -> usize {
        self.depth.load(Ordering::SeqCst)
    }

    pub fn is_rollback_only(&self) -> bool {
        self.rollback_only.load(Ordering::SeqCst)
    }

    /// Lock the underlying connection, opening it on first use.
    pub async fn connection(&self) -> Result<SessionConnection<'_>, SessionError> {
        self.ensure_usable()?;
        if self.is_rollback_only() {
            return Err(SessionError::RollbackOnly);
        }
        let mut state = self.state.lock().await;
        self.ensure_connected(&mut state).await?;
        Ok(SessionConnection { state })
    }

    pub(crate) async fn begin(&self) -> Result<(), SessionError> {
        self.ensure_usable()?;
        let mut state = self.state.lock().await;
        let connection = self.ensure_connected(&mut state).await?;
        connection.begin().await?;
        state.began_at = Some(Instant::now());
        self.rollback_only.store(false, Ordering::SeqCst);
        self.set_phase(SessionPhase::InTransaction);
        debug!(session_id = %self.id, store = self.store.name(), "transaction started");
        Ok(())
    }

    pub(crate) async fn commit(&self) -> Result<(), SessionError> {
        let mut state = self.state.lock().await;
        let result = match state.connection.as_mut() {
            Some(connection) => connection.commit().await,
            None => return Err(SessionError::Closed { session_id: self.id }),
        };
        record_duration(state.began_at.take());
        match result {
            Ok(()) => {
                self.set_phase(SessionPhase::Idle);
                counter!(METRIC_TX_COMMIT_TOTAL).increment(1);
                debug!(session_id = %self.id, store = self.store.name(), "transaction committed");
                Ok(())
            }
            Err(err) => {
                state.connection = None;
                self.set_phase(SessionPhase::Closed);
                Err(err.into())
            }
        }
    }

    pub(crate) async fn rollback(&self) -> Result<(), SessionError> {
        let mut state = self.state.lock().await;
        let result = match state.connection.as_mut() {
            Some(connection) => connection.rollback().await,
            None => Ok(()),
        };
        record_duration(state.began_at.take());
        state.connection = None;
        self.set_phase(SessionPhase::Closed);
        counter!(METRIC_TX_ROLLBACK_TOTAL).increment(1);
        debug!(session_id = %self.id, store = self.store.name(), "transaction rolled back");
        result.map_err(SessionError::from)
    }

    /// Synchronous rollback used when the owning future is dropped mid-flight.
    pub(crate) fn abort(&self) {
        let was_open = self.in_transaction();
        self.set_phase(SessionPhase::Closed);
        if !was_open {
            return;
        }
        match self.state.try_lock() {
            Ok(mut state) => {
                if let Some(connection) = state.connection.as_mut() {
                    connection.start_rollback();
                }
                state.connection = None;
                state.began_at = None;
                counter!(METRIC_TX_ROLLBACK_TOTAL).increment(1);
                warn!(session_id = %self.id, store = self.store.name(), "transaction abandoned; rollback issued");
            }
            Err(_) => {
                warn!(
                    session_id = %self.id,
                    store = self.store.name(),
                    "transaction abandoned while its connection was in use; rollback deferred to connection drop"
                );
            }
        }
    }

    pub(crate) fn enter(&self) -> usize {
        self.depth.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub(crate) fn exit(&self) {
        let _ = self
            .depth
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |depth| {
                depth.checked_sub(1)
            });
    }

    pub(crate) fn mark_rollback_only(&self) {
        self.rollback_only.store(true, Ordering::SeqCst);
    }

    fn ensure_usable(&self) -> Result<(), SessionError> {
        if self.phase() == SessionPhase::Closed {
            return Err(SessionError::Closed { session_id: self.id });
        }
        Ok(())
    }

    fn set_phase(&self, phase: SessionPhase) {
        self.phase.store(phase.as_u8(), Ordering::SeqCst);
    }

    async fn ensure_connected<'s>(
        &self,
        state: &'s mut SessionState,
    ) -> Result<&'s mut Box<dyn StoreConnection>, SessionError> {
        if state.connection.is_none() {
            let connection = self.store.connect().await?;
            debug!(session_id = %self.id, store = self.store.name(), "connection opened");
            state.connection = Some(connection);
        }
        state
            .connection
            .as_mut()
            .ok_or(SessionError::Closed { session_id: self.id })
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("intent", &self.intent)
            .field("store", &self.store.name())
            .field("phase", &self.phase())
            .field("depth", &self.depth())
            .field("rollback_only", &self.is_rollback_only())
            .finish()
    }
}

fn record_duration(began_at: Option<Instant>) {
    if let Some(began_at) = began_at {
        histogram!(METRIC_TX_DURATION_MS).record(began_at.elapsed().as_secs_f64() * 1000.0);
    }
}

/// Exclusive access to a session's connection.
pub struct SessionConnection<'a> {
    state: MutexGuard<'a, SessionState>,
}

impl SessionConnection<'_> {
    /// The store-specific connection, e.g. `MemoryConnection` or `PgStoreConnection`.
    pub fn downcast_mut<C: StoreConnection>(&mut self) -> Option<&mut C> {
        self.state
            .connection
            .as_mut()
            .and_then(|connection| connection.as_any_mut().downcast_mut::<C>())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryConnection, MemoryStore};

    fn memory_session(store: &MemoryStore) -> Session {
        Session::new(RoutingDecision::Write, Arc::new(store.clone()))
    }

    #[tokio::test]
    async fn connection_is_opened_lazily() {
        let store = MemoryStore::new("writer");
        let session = memory_session(&store);
        assert_eq!(store.stats().connects, 0);

        let mut connection = session.connection().await.expect("connection");
        assert!(connection.downcast_mut::<MemoryConnection>().is_some());
        drop(connection);

        session.connection().await.expect("second borrow");
        assert_eq!(store.stats().connects, 1);
    }

    #[tokio::test]
    async fn commit_returns_session_to_idle() {
        let store = MemoryStore::new("writer");
        let session = memory_session(&store);

        session.begin().await.expect("begin");
        assert_eq!(session.phase(), SessionPhase::InTransaction);
        session.commit().await.expect("commit");
        assert_eq!(session.phase(), SessionPhase::Idle);
        assert_eq!(store.stats().commits, 1);
    }

    #[tokio::test]
    async fn rollback_closes_session() {
        let store = MemoryStore::new("writer");
        let session = memory_session(&store);

        session.begin().await.expect("begin");
        session.rollback().await.expect("rollback");
        assert_eq!(session.phase(), SessionPhase::Closed);

        let err = session.connection().await.err().expect("closed session");
        assert!(matches!(err, SessionError::Closed { .. }));
        assert!(matches!(
            session.begin().await,
            Err(SessionError::Closed { .. })
        ));
    }

    #[tokio::test]
    async fn abort_rolls_back_open_transaction() {
        let store = MemoryStore::new("writer");
        let session = memory_session(&store);

        session.begin().await.expect("begin");
        session
            .connection()
            .await
            .expect("connection")
            .downcast_mut::<MemoryConnection>()
            .expect("memory connection")
            .put("k", "v");
        session.abort();

        assert!(store.is_empty());
        assert_eq!(store.stats().rollbacks, 1);
        assert_eq!(session.phase(), SessionPhase::Closed);
    }

    #[tokio::test]
    async fn depth_never_underflows() {
        let store = MemoryStore::new("writer");
        let session = memory_session(&store);
        assert_eq!(session.enter(), 1);
        session.exit();
        session.exit();
        assert_eq!(session.depth(), 0);
    }

    #[tokio::test]
    async fn helpers_fail_outside_scope() {
        assert!(current().expect_err("unbound").is_unbound());
        assert!(clear().is_none());
        let store = MemoryStore::new("writer");
        let err = bind(Arc::new(memory_session(&store))).expect_err("no scope");
        assert!(matches!(err, SessionError::Scope(ScopeError::NoScope { .. })));
    }
}
