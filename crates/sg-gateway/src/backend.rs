//! The driver seam of the gateway.

use crate::GatewayError;
use async_trait::async_trait;
use futures_util::stream::BoxStream;
use serde_json::{Map, Value};
use sg_core::Record;

/// Lazy stream of records for one query. Ends after the last record, or
/// yields a single `Err` when the query fails.
pub type RecordStream = BoxStream<'static, Result<Record, GatewayError>>;

/// A graph database driver as seen by the gateway.
#[async_trait]
pub trait GraphBackend: Send + Sync {
    /// Runs a minimal read-only query to check reachability.
    async fn probe(&self) -> Result<(), GatewayError>;

    /// Starts a query. Nothing is sent to the database until the stream is
    /// first polled; dropping the stream releases its connection.
    fn execute(&self, text: &str, params: &Map<String, Value>) -> RecordStream;

    /// Releases the shared connection pool.
    async fn close(&self);
}
