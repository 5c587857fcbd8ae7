//! Writer/reader routing for new sessions.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tracing::debug;

use crate::store::BackingStore;

use super::Session;
use super::error::SessionError;

/// Declared intent of a unit of work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum RoutingDecision {
    #[default]
    Write,
    Read,
}

impl fmt::Display for RoutingDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Write => f.write_str("write"),
            Self::Read => f.write_str("read"),
        }
    }
}

/// Picks one of `readers` (always non-zero) reader stores.
pub trait ReaderSelector: Send + Sync + 'static {
    fn select(&self, readers: usize) -> usize;
}

/// Cycles through readers in configuration order.
#[derive(Debug, Default)]
pub struct RoundRobin {
    next: AtomicUsize,
}

impl ReaderSelector for RoundRobin {
    fn select(&self, readers: usize) -> usize {
        self.next.fetch_add(1, Ordering::Relaxed) % readers
    }
}

/// Always uses the first configured reader.
#[derive(Debug, Default, Clone, Copy)]
pub struct FirstReader;

impl ReaderSelector for FirstReader {
    fn select(&self, _readers: usize) -> usize {
        0
    }
}

/// Hands out sessions bound to the writer or to a reader.
pub struct SessionRouter {
    writer: Arc<dyn BackingStore>,
    readers: Vec<Arc<dyn BackingStore>>,
    selector: Arc<dyn ReaderSelector>,
}

impl SessionRouter {
    pub fn builder() -> SessionRouterBuilder {
        SessionRouterBuilder::default()
    }

    /// Router with a writer, no readers and round-robin selection.
    pub fn single(writer: Arc<dyn BackingStore>) -> Self {
        Self {
            writer,
            readers: Vec::new(),
            selector: Arc::new(RoundRobin::default()),
        }
    }

    /// New, unbound session for `intent`. No connection is opened yet.
    pub fn acquire(&self, intent: RoutingDecision) -> Session {
        let store = self.store_for(intent);
        let session = Session::new(intent, store);
        debug!(
            session_id = %session.id(),
            %intent,
            store = session.store_name(),
            "session acquired"
        );
        session
    }

    pub fn writer(&self) -> &Arc<dyn BackingStore> {
        &self.writer
    }

    pub fn readers(&self) -> &[Arc<dyn BackingStore>] {
        &self.readers
    }

    fn store_for(&self, intent: RoutingDecision) -> Arc<dyn BackingStore> {
        match intent {
            RoutingDecision::Write => Arc::clone(&self.writer),
            RoutingDecision::Read if self.readers.is_empty() => Arc::clone(&self.writer),
            RoutingDecision::Read => {
                let index = self.selector.select(self.readers.len()) % self.readers.len();
                Arc::clone(&self.readers[index])
            }
        }
    }
}

impl fmt::Debug for SessionRouter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionRouter")
            .field("writer", &self.writer.name())
            .field(
                "readers",
                &self
                    .readers
                    .iter()
                    .map(|reader| reader.name())
                    .collect::<Vec<_>>(),
            )
            .finish()
    }
}

#[derive(Default)]
pub struct SessionRouterBuilder {
    writer: Option<Arc<dyn BackingStore>>,
    readers: Vec<Arc<dyn BackingStore>>,
    selector: Option<Arc<dyn ReaderSelector>>,
}

impl SessionRouterBuilder {
    pub fn writer(mut self, store: Arc<dyn BackingStore>) -> Self {
        self.writer = Some(store);
        self
    }

    pub fn reader(mut self, store: Arc<dyn BackingStore>) -> Self {
        self.readers.push(store);
        self
    }

    pub fn readers(mut self, stores: impl IntoIterator<Item = Arc<dyn BackingStore>>) -> Self {
        self.readers.extend(stores);
        self
    }

    pub fn selector(mut self, selector: Arc<dyn ReaderSelector>) -> Self {
        self.selector = Some(selector);
        self
    }

    /// Fails with [`SessionError::NoBackingStore`] when no writer was supplied.
    pub fn build(self) -> Result<SessionRouter, SessionError> {
        let writer = self.writer.ok_or(SessionError::NoBackingStore {
            intent: RoutingDecision::Write,
        })?;
        Ok(SessionRouter {
            writer,
            readers: self.readers,
            selector: self
                .selector
                .unwrap_or_else(|| Arc::new(RoundRobin::default())),
        })
    }
}
