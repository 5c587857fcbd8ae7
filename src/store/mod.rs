//! Backing store contract.
//!
//! A [`BackingStore`] names one writer or reader endpoint and hands out
//! [`StoreConnection`]s. Connections start outside a transaction; sessions
//! drive `begin`/`commit`/`rollback` on them.

pub mod memory;
pub mod postgres;

use std::any::Any;

use async_trait::async_trait;
use thiserror::Error;

pub use memory::{MemoryConnection, MemoryStore};
pub use postgres::{PgStore, PgStoreConnection};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to connect to store `{store}`: {message}")]
    Connect { store: String, message: String },
    #[error("{operation} failed on store `{store}`: {message}")]
    Transaction {
        store: String,
        operation: &'static str,
        message: String,
    },
    #[error("query failed on store `{store}`: {message}")]
    Query { store: String, message: String },
}

impl StoreError {
    pub fn connect(store: impl Into<String>, message: impl ToString) -> Self {
        Self::Connect {
            store: store.into(),
            message: message.to_string(),
        }
    }

    pub fn transaction(
        store: impl Into<String>,
        operation: &'static str,
        message: impl ToString,
    ) -> Self {
        Self::Transaction {
            store: store.into(),
            operation,
            message: message.to_string(),
        }
    }

    pub fn query(store: impl Into<String>, message: impl ToString) -> Self {
        Self::Query {
            store: store.into(),
            message: message.to_string(),
        }
    }
}

#[async_trait]
pub trait BackingStore: Send + Sync + 'static {
    /// Stable identifier used in logs and health reports.
    fn name(&self) -> &str;

    /// Open a connection. Implementations may defer the physical connection
    /// until the first statement.
    async fn connect(&self) -> Result<Box<dyn StoreConnection>, StoreError>;

    async fn health_check(&self) -> Result<(), StoreError> {
        self.connect().await.map(|_| ())
    }
}

#[async_trait]
pub trait StoreConnection: Send + 'static {
    async fn begin(&mut self) -> Result<(), StoreError>;

    async fn commit(&mut self) -> Result<(), StoreError>;

    async fn rollback(&mut self) -> Result<(), StoreError>;

    /// Synchronously abandon an open transaction. Used when the owning future
    /// is dropped before it could roll back.
    fn start_rollback(&mut self);

    fn as_any_mut(&mut self) -> &mut dyn Any;
}
