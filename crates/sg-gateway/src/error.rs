use sg_core::ErrorInfo;
use thiserror::Error;

/// Failures surfaced by the database gateway.
///
/// Every variant is recoverable from the gateway's point of view: a failed
/// query never takes the shared pool down with it.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GatewayError {
    #[error("database unreachable: {0}")]
    Connectivity(String),
    #[error("{code}: {message}")]
    Query { code: String, message: String },
    #[error("failed to decode record: {0}")]
    Decode(String),
    #[error("gateway is closed")]
    Closed,
    #[error("invalid driver configuration: {0}")]
    Config(String),
}

impl GatewayError {
    /// Stable code reported to the client. Query failures keep the
    /// database's own status code.
    pub fn code(&self) -> &str {
        match self {
            GatewayError::Connectivity(_) => "ConnectivityError",
            GatewayError::Query { code, .. } => code,
            GatewayError::Decode(_) => "DecodeError",
            GatewayError::Closed => "GatewayClosed",
            GatewayError::Config(_) => "ConfigError",
        }
    }
}

impl From<neo4rs::Error> for GatewayError {
    fn from(err: neo4rs::Error) -> Self {
        match err {
            neo4rs::Error::IOError { .. } | neo4rs::Error::ConnectionError => {
                GatewayError::Connectivity(err.to_string())
            }
            neo4rs::Error::DeserializationError(_) | neo4rs::Error::ConversionError => {
                GatewayError::Decode(err.to_string())
            }
            neo4rs::Error::Neo4j(ref e) => GatewayError::Query {
                code: e.code().to_string(),
                message: e.message().to_string(),
            },
            other => GatewayError::Query {
                code: "QueryError".to_string(),
                message: other.to_string(),
            },
        }
    }
}

impl From<&GatewayError> for ErrorInfo {
    fn from(err: &GatewayError) -> Self {
        match err {
            GatewayError::Query { code, message } => ErrorInfo::new(code.as_str(), message.as_str()),
            other => ErrorInfo::new(other.code(), other.to_string()),
        }
    }
}
