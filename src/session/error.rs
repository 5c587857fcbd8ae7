use thiserror::Error;

use crate::store::StoreError;

use super::router::RoutingDecision;
use super::scoped::ScopeError;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Scope(#[from] ScopeError),
    #[error("no {intent} backing store is configured")]
    NoBackingStore { intent: RoutingDecision },
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("session {session_id} was rolled back or released and cannot be reused")]
    Closed { session_id: uuid::Uuid },
    #[error("transaction was marked rollback-only by a failed nested unit of work")]
    RollbackOnly,
}

impl SessionError {
    pub fn is_unbound(&self) -> bool {
        matches!(self, Self::Scope(ScopeError::Unbound { .. }))
    }
}
