//! SmartGraph Server - WebSocket bridge to the graph database
//!
//! This crate implements the network side of the bridge. Browser clients
//! send Cypher queries as JSON frames and receive the results as a stream of
//! JSON frames on the same connection.
//!
//! The server supports:
//! - Multiple concurrent connections, each with concurrent in-flight queries
//! - One database session per message, released on completion or error
//! - Per-message error isolation: a failed message never closes the socket
//! - Cancelling a connection's queries when it disconnects

mod connection;
mod error;
mod handler;
mod server;

pub use connection::serve_connection;
pub use error::ServerError;
pub use handler::handle_message;
pub use server::{BridgeServer, ServerConfig, DEFAULT_PORT};
