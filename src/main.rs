use axum::{
    Router,
    extract::Extension,
    routing::get,
};
use cluster_directory::backend::MemoryBackend;
use cluster_directory::directory::{DirectorySync, HostAddress, SnapshotCache};
use cluster_directory::query::handlers::{handle_health, handle_leader, handle_members};
use cluster_directory::query::protocol::{ENDPOINT_HEALTH, ENDPOINT_LEADER, ENDPOINT_MEMBERS};
use cluster_directory::registration::Registrar;
use std::net::SocketAddr;
use std::time::Duration;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    let args: Vec<String> = std::env::args().collect();

    if args.len() < 3 {
        eprintln!(
            "Usage: {} --bind <addr:port> [--advertise <host:port>] [--ttl <secs>] [--campaign] [--read-only]",
            args[0]
        );
        eprintln!("Example: {} --bind 127.0.0.1:7000 --campaign", args[0]);
        eprintln!(
            "Example: {} --bind 127.0.0.1:7001 --advertise node-b:7001",
            args[0]
        );

        std::process::exit(1);
    }

    let mut bind_addr: Option<SocketAddr> = None;
    let mut advertise: Option<HostAddress> = None;
    let mut ttl = Duration::from_secs(10);
    let mut campaign = false;
    let mut read_only = false;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--bind" => {
                bind_addr = Some(args[i + 1].parse()?);
                i += 2;
            }
            "--advertise" => {
                let (host, port) = args[i + 1]
                    .rsplit_once(':')
                    .ok_or_else(|| anyhow::anyhow!("--advertise expects host:port"))?;
                advertise = Some(HostAddress {
                    host: host.to_string(),
                    port: port.parse()?,
                });
                i += 2;
            }
            "--ttl" => {
                ttl = Duration::from_secs(args[i + 1].parse()?);
                i += 2;
            }
            "--campaign" => {
                campaign = true;
                i += 1;
            }
            "--read-only" => {
                read_only = true;
                i += 1;
            }
            _ => {
                i += 1;
            }
        }
    }

    let bind_addr = bind_addr.ok_or_else(|| anyhow::anyhow!("--bind is required"))?;
    let advertise = advertise.unwrap_or(HostAddress {
        host: bind_addr.ip().to_string(),
        port: bind_addr.port(),
    });

    tracing::info!("Starting directory node on {}", bind_addr);
    tracing::info!("Advertised address: {}", advertise);

    // 1. Coordination backend (in-process, with lease expiry sweeping):
    let backend = MemoryBackend::new();
    backend.start_sweeper();

    // 2. Self-registration and optional leadership campaign:
    let registrar = if read_only {
        tracing::info!("Read-only node: skipping registration");
        None
    } else {
        let registrar = Registrar::new(backend.clone(), advertise.clone(), ttl, campaign);
        registrar.clone().start();
        Some(registrar)
    };

    // 3. Directory cache fed by the watch loops:
    let cache = SnapshotCache::new();
    let sync = DirectorySync::new(backend, cache.clone());
    sync.clone().start();

    // 4. HTTP Router:
    let app = Router::new()
        .route(ENDPOINT_LEADER, get(handle_leader))
        .route(ENDPOINT_MEMBERS, get(handle_members))
        .route(ENDPOINT_HEALTH, get(handle_health))
        .layer(Extension(cache))
        .layer(Extension(sync));

    // 5. Start HTTP server:
    tracing::info!("HTTP server listening on {}", bind_addr);
    tracing::info!("Press Ctrl+C to shutdown");

    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("Shutdown signal received");
        })
        .await?;

    // Deregister instead of leaving the member key to expire by TTL.
    if let Some(registrar) = registrar {
        if let Err(e) = registrar.shutdown().await {
            tracing::warn!("Deregistration on shutdown failed: {}", e);
        }
    }

    Ok(())
}
