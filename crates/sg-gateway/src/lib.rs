//! SmartGraph Gateway - database access for the WebSocket bridge
//!
//! This crate owns the process-wide connection to the graph database and
//! hands out one short-lived session per query:
//! - [`DatabaseGateway`] wraps a [`GraphBackend`] and tracks sessions
//! - [`Neo4jBackend`] is the bolt implementation on top of `neo4rs`
//! - [`ReadinessProber`] gates startup on the database answering

mod backend;
mod columns;
mod error;
mod gateway;
mod neo4j;
pub mod readiness;

#[cfg(any(test, feature = "test-util"))]
pub mod scripted;

pub use backend::{GraphBackend, RecordStream};
pub use error::GatewayError;
pub use gateway::{DatabaseGateway, QueryStream};
pub use neo4j::{Neo4jBackend, Neo4jSettings, DEFAULT_FETCH_SIZE, DEFAULT_POOL_SIZE, PROBE_QUERY};
pub use readiness::{ReadinessError, ReadinessProber};
