//! Startup readiness gate.
//!
//! The bridge does not accept connections until the database has answered a
//! probe. Probing is retried a fixed number of times with a fixed backoff.

use crate::{DatabaseGateway, GatewayError};
use std::time::Duration;
use thiserror::Error;
use tracing::{error, info, warn};

pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;
pub const DEFAULT_BACKOFF: Duration = Duration::from_secs(15);

#[derive(Error, Debug)]
pub enum ReadinessError {
    #[error("database not reachable after {attempts} attempts: {source}")]
    Exhausted {
        attempts: u32,
        #[source]
        source: GatewayError,
    },
}

/// Retries [`DatabaseGateway::probe`] until it succeeds or attempts run out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadinessProber {
    max_attempts: u32,
    backoff: Duration,
}

impl Default for ReadinessProber {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            backoff: DEFAULT_BACKOFF,
        }
    }
}

impl ReadinessProber {
    /// Creates a prober. At least one attempt is always made.
    pub fn new(max_attempts: u32, backoff: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff,
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn backoff(&self) -> Duration {
        self.backoff
    }

    /// Probes until the database answers. Returns the attempt that succeeded.
    pub async fn wait_ready(&self, gateway: &DatabaseGateway) -> Result<u32, ReadinessError> {
        let mut attempt = 1;
        loop {
            info!("Attempting to reach Neo4j (attempt {}/{})", attempt, self.max_attempts);

            match gateway.probe().await {
                Ok(()) => {
                    info!("Connected to Neo4j on attempt {}", attempt);
                    return Ok(attempt);
                }
                Err(e) if attempt >= self.max_attempts => {
                    error!("Failed to reach Neo4j after {} attempts: {}", attempt, e);
                    return Err(ReadinessError::Exhausted {
                        attempts: attempt,
                        source: e,
                    });
                }
                Err(e) => {
                    warn!(
                        "Connection attempt {} failed: {}. Retrying in {}s...",
                        attempt,
                        e,
                        self.backoff.as_secs()
                    );
                    tokio::time::sleep(self.backoff).await;
                    attempt += 1;
                }
            }
        }
    }
}
