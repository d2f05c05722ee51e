//! Bridge configuration from flags and environment.
//!
//! Environment variable names are the ones the deployment's `.env` already
//! uses, so existing setups keep working.

use clap::Args;
use sg_gateway::readiness::{DEFAULT_BACKOFF, DEFAULT_MAX_ATTEMPTS};
use sg_gateway::{Neo4jSettings, ReadinessProber, DEFAULT_POOL_SIZE};
use sg_server::{ServerConfig, DEFAULT_PORT};
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_BOLT_PORT: u16 = 7687;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("required setting --{flag} (env `{env}`) is missing")]
    Missing {
        flag: &'static str,
        env: &'static str,
    },
    #[error("pool size must be at least 1")]
    EmptyPool,
}

/// Settings shared by every subcommand.
#[derive(Args, Debug, Clone)]
pub struct BridgeArgs {
    /// Neo4j user name
    #[arg(long, env = "neo4j_user")]
    pub neo4j_user: Option<String>,

    /// Neo4j password
    #[arg(long, env = "neo4j_password", hide_env_values = true)]
    pub neo4j_password: Option<String>,

    /// Neo4j host name
    #[arg(long, env = "neo4j_host")]
    pub neo4j_host: Option<String>,

    /// Neo4j bolt port
    #[arg(long, env = "neo4j_port_bolt", default_value_t = DEFAULT_BOLT_PORT)]
    pub neo4j_port: u16,

    /// Database name (server default when unset)
    #[arg(long, env = "neo4j_database")]
    pub neo4j_database: Option<String>,

    /// Size of the bolt connection pool
    #[arg(long, env = "sg_neo4j_pool_size", default_value_t = DEFAULT_POOL_SIZE)]
    pub pool_size: usize,

    /// Port to listen on
    #[arg(short, long, env = "sg_websocket_server_port", default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// Address to bind to
    #[arg(long, env = "sg_websocket_bind", default_value = "0.0.0.0")]
    pub bind: IpAddr,

    /// Path clients connect to
    #[arg(long, env = "sg_websocket_base_path", default_value = "/")]
    pub base_path: String,

    /// Readiness probe attempts before giving up
    #[arg(long, env = "sg_probe_attempts", default_value_t = DEFAULT_MAX_ATTEMPTS)]
    pub probe_attempts: u32,

    /// Seconds to wait between readiness probes
    #[arg(long, env = "sg_probe_backoff_secs", default_value_t = DEFAULT_BACKOFF.as_secs())]
    pub probe_backoff_secs: u64,

    /// Let queries finish after their client disconnects
    #[arg(long, env = "sg_keep_queries_on_close")]
    pub keep_queries_on_close: bool,
}

/// Validated configuration of one bridge process.
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    pub neo4j: Neo4jSettings,
    pub server: ServerConfig,
    pub prober: ReadinessProber,
}

impl TryFrom<BridgeArgs> for BridgeConfig {
    type Error = ConfigError;

    fn try_from(args: BridgeArgs) -> Result<Self, Self::Error> {
        let user = required(args.neo4j_user, "neo4j-user", "neo4j_user")?;
        let password = required(args.neo4j_password, "neo4j-password", "neo4j_password")?;
        let host = required(args.neo4j_host, "neo4j-host", "neo4j_host")?;

        if args.pool_size == 0 {
            return Err(ConfigError::EmptyPool);
        }

        let mut neo4j = Neo4jSettings::new(
            format!("bolt://{}:{}", host, args.neo4j_port),
            user,
            password,
        );
        neo4j.database = args.neo4j_database;
        neo4j.max_connections = args.pool_size;

        let server = ServerConfig {
            addr: SocketAddr::new(args.bind, args.port),
            base_path: args.base_path,
            cancel_on_disconnect: !args.keep_queries_on_close,
        };

        let prober = ReadinessProber::new(
            args.probe_attempts,
            Duration::from_secs(args.probe_backoff_secs),
        );

        Ok(Self {
            neo4j,
            server,
            prober,
        })
    }
}

fn required(
    value: Option<String>,
    flag: &'static str,
    env: &'static str,
) -> Result<String, ConfigError> {
    value
        .filter(|v| !v.trim().is_empty())
        .ok_or(ConfigError::Missing { flag, env })
}
