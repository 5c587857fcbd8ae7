//! Request-scoped transactional sessions with writer/reader routing, and a
//! function-result cache with prefix and tag invalidation.
//!
//! - [`session`]: task-local session binding, routing and the transaction
//!   coordinator.
//! - [`store`]: backing store contract with in-memory and Postgres stores.
//! - [`cache`]: cache facade, key derivation and backends.
//! - [`config`] and [`infra`]: settings, telemetry and bootstrap for the
//!   `scopekit` binary.

pub mod cache;
pub mod config;
pub mod infra;
pub mod session;
pub mod store;
pub mod util;
