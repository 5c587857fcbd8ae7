//! Runtime bootstrap: telemetry and construction of routers and caches from settings.

pub mod bootstrap;
pub mod error;
pub mod telemetry;

pub use bootstrap::{Runtime, StoreHealth};
pub use error::InfraError;
