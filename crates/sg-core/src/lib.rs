//! SmartGraph Core - the message model of the WebSocket bridge
//!
//! This crate holds everything about a bridge message that does not touch
//! the network or the database:
//! - Translating a raw client frame into a [`QueryRequest`]
//! - The ordered [`Record`] a query emits
//! - Shaping records into [`WireResponse`] frames

mod record;
mod request;
mod response;

pub use record::Record;
pub use request::{coerce_integer, translate, QueryRequest, TranslateError, INTEGER_PARAM};
pub use response::{shape, ErrorInfo, ResponseKind, ShapeError, WireResponse};
