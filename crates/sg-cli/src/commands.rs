//! CLI command implementations

use crate::config::BridgeConfig;
use anyhow::{Context, Result};
use colored::Colorize;
use sg_gateway::{DatabaseGateway, Neo4jBackend};
use sg_server::BridgeServer;
use std::sync::Arc;
use tracing::{info, warn};

/// Waits for the database, then serves WebSocket clients until a shutdown
/// signal arrives.
pub async fn serve(config: BridgeConfig) -> Result<()> {
    let gateway = connect(&config).await?;

    println!("{}", "Starting SmartGraph bridge...".cyan());
    let server = BridgeServer::bind(gateway, config.server.clone()).await?;
    let addr = server.local_addr()?;
    println!(
        "{} Listening on ws://{}{}",
        "✓".green(),
        addr,
        config.server.base_path
    );
    println!("  Press {} to stop", "Ctrl+C".cyan());

    server.run(shutdown_signal()).await?;
    Ok(())
}

/// Probes the database the way `serve` does at startup, then exits.
pub async fn check(config: BridgeConfig) -> Result<()> {
    let gateway = connect(&config).await?;
    gateway.close().await;

    println!("{} Neo4j is reachable at {}", "✓".green(), config.neo4j.uri);
    Ok(())
}

/// Builds the gateway and blocks until the database answers a probe.
async fn connect(config: &BridgeConfig) -> Result<Arc<DatabaseGateway>> {
    info!("Connecting to Neo4j at {}", config.neo4j.uri);
    let backend = Neo4jBackend::connect(&config.neo4j)
        .await
        .with_context(|| format!("Failed to configure Neo4j driver for {}", config.neo4j.uri))?;
    let gateway = Arc::new(DatabaseGateway::new(backend));

    if let Err(e) = config.prober.wait_ready(&gateway).await {
        gateway.close().await;
        return Err(e.into());
    }

    // The prober only proves the database was up once; confirm before
    // accepting clients.
    if let Err(e) = gateway.probe().await {
        gateway.close().await;
        return Err(e).with_context(|| format!("Failed to connect to Neo4j at {}", config.neo4j.uri));
    }
    info!("Connected to Neo4j successfully at {}", config.neo4j.uri);

    Ok(gateway)
}

/// Resolves on Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C"),
        _ = terminate => info!("Received SIGTERM"),
    }
}
