//! Postgres backing store on a `sqlx` pool.

use std::any::Any;

use async_trait::async_trait;
use sqlx::{
    PgConnection, Postgres, Transaction,
    pool::PoolConnection,
    postgres::{PgPool, PgPoolOptions},
    query,
};

use super::{BackingStore, StoreConnection, StoreError};

#[derive(Clone, Debug)]
pub struct PgStore {
    name: String,
    pool: PgPool,
}

impl PgStore {
    pub fn new(name: impl Into<String>, pool: PgPool) -> Self {
        Self {
            name: name.into(),
            pool,
        }
    }

    /// Build a lazily connecting pool; no connection is opened until first use.
    pub fn connect_lazy(
        name: impl Into<String>,
        url: &str,
        max_connections: u32,
    ) -> Result<Self, StoreError> {
        let name = name.into();
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect_lazy(url)
            .map_err(|err| StoreError::connect(name.clone(), err))?;
        Ok(Self { name, pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl BackingStore for PgStore {
    fn name(&self) -> &str {
        &self.name
    }

    async fn connect(&self) -> Result<Box<dyn StoreConnection>, StoreError> {
        Ok(Box::new(PgStoreConnection {
            store: self.name.clone(),
            pool: self.pool.clone(),
            idle: None,
            transaction: None,
        }))
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        query("SELECT 1")
            .execute(&self.pool)
            .await
            .map(|_| ())
            .map_err(|err| StoreError::connect(self.name.clone(), err))
    }
}

/// Connection handed out by [`PgStore`].
///
/// Outside a transaction statements run on a pooled connection acquired on
/// first use; inside one they run on the open `sqlx::Transaction`. Dropping an
/// open transaction rolls it back.
pub struct PgStoreConnection {
    store: String,
    pool: PgPool,
    idle: Option<PoolConnection<Postgres>>,
    transaction: Option<Transaction<'static, Postgres>>,
}

impl PgStoreConnection {
    pub fn in_transaction(&self) -> bool {
        self.transaction.is_some()
    }

    /// Executor for the current state of the connection.
    pub async fn executor(&mut self) -> Result<&mut PgConnection, StoreError> {
        if self.transaction.is_none() && self.idle.is_none() {
            let connection = self
                .pool
                .acquire()
                .await
                .map_err(|err| StoreError::connect(self.store.clone(), err))?;
            self.idle = Some(connection);
        }
        match (self.transaction.as_mut(), self.idle.as_mut()) {
            (Some(transaction), _) => Ok(&mut **transaction),
            (None, Some(connection)) => Ok(&mut **connection),
            (None, None) => Err(StoreError::connect(
                self.store.clone(),
                "pooled connection unavailable",
            )),
        }
    }
}

#[async_trait]
impl StoreConnection for PgStoreConnection {
    async fn begin(&mut self) -> Result<(), StoreError> {
        if self.transaction.is_some() {
            return Err(StoreError::transaction(
                self.store.clone(),
                "begin",
                "a transaction is already open on this connection",
            ));
        }
        // Hand the idle connection back so `begin` can reuse it from the pool.
        self.idle = None;
        let transaction = self
            .pool
            .begin()
            .await
            .map_err(|err| StoreError::transaction(self.store.clone(), "begin", err))?;
        self.transaction = Some(transaction);
        Ok(())
    }

    async fn commit(&mut self) -> Result<(), StoreError> {
        let transaction = self.transaction.take().ok_or_else(|| {
            StoreError::transaction(self.store.clone(), "commit", "no open transaction")
        })?;
        transaction
            .commit()
            .await
            .map_err(|err| StoreError::transaction(self.store.clone(), "commit", err))
    }

    async fn rollback(&mut self) -> Result<(), StoreError> {
        let transaction = self.transaction.take().ok_or_else(|| {
            StoreError::transaction(self.store.clone(), "rollback", "no open transaction")
        })?;
        transaction
            .rollback()
            .await
            .map_err(|err| StoreError::transaction(self.store.clone(), "rollback", err))
    }

    fn start_rollback(&mut self) {
        // sqlx queues the ROLLBACK when an open transaction is dropped.
        drop(self.transaction.take());
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
