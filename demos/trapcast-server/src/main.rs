//! trapcast push server.
//!
//! Serves the authenticated WebSocket push channel on `/api/ws`, listens on
//! the loopback event bridge for worker events and supervises the simulator
//! and trap receiver workers.
//!
//! Run with: cargo run -p trapcast-server -- --tokens abc123
//!
//! Then connect to ws://localhost:8000/api/ws?token=abc123

mod config;

use std::{sync::Arc, time::Duration};

use anyhow::Context;
use axum::{Json, Router, extract::State, http::HeaderValue, routing::get};
use clap::Parser;
use tower_http::{
    cors::{AllowOrigin, Any, CorsLayer},
    trace::TraceLayer,
};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};
use trapcast_core::Broadcaster;
use trapcast_session::MemorySessionStore;
use trapcast_supervisor::{SimulatorOverrides, StatsStore, Supervisor};
use trapcast_transport::{
    BridgeHandle, ConnectionRegistry, EventBridge, HandshakeGate, WsState, create_ws_router,
};

use crate::config::ServerConfig;

const SESSION_PURGE_INTERVAL: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let config = ServerConfig::parse();

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.log_level)),
        )
        .init();

    let sessions = Arc::new(MemorySessionStore::with_ttl(config.session_ttl()));
    seed_sessions(&sessions, &config)?;

    let stats = config
        .stats_file
        .as_ref()
        .map_or_else(StatsStore::in_memory, StatsStore::open);
    let supervisor = Arc::new(Supervisor::new(config.worker_settings(), stats));
    let registry = Arc::new(ConnectionRegistry::new(
        supervisor.clone(),
        config.registry_config(),
    ));

    // Bind before any worker starts so their first emissions are not lost.
    let bridge = match EventBridge::bind(&config.bridge_config(), registry.clone()).await {
        Ok(bridge) => Some(bridge.spawn()),
        Err(e) => {
            tracing::error!("Event bridge unavailable, live trap push disabled: {e}");
            None
        }
    };

    auto_start(&supervisor, registry.as_ref(), &config);
    let purge = spawn_session_purge(sessions.clone());

    let gate = Arc::new(HandshakeGate::new(sessions));
    let app = Router::new()
        .route("/api/health", get(health))
        .with_state(registry.clone())
        .merge(create_ws_router(WsState::new(registry.clone(), gate)))
        .layer(cors_layer(&config.allowed_origins)?)
        .layer(TraceLayer::new_for_http());

    let listener = tokio::net::TcpListener::bind(config.listen)
        .await
        .with_context(|| format!("failed to bind {}", config.listen))?;
    tracing::info!("Server listening on http://{}", config.listen);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown(bridge, registry))
        .await
        .context("server error")?;

    purge.abort();
    supervisor.shutdown().await;
    tracing::info!("Shutdown complete");
    Ok(())
}

fn seed_sessions(sessions: &MemorySessionStore, config: &ServerConfig) -> anyhow::Result<()> {
    let mut seeded = 0;
    for (token, user) in config.seeded_sessions() {
        sessions.insert(token, user)?;
        seeded += 1;
    }

    if seeded == 0 {
        let token = sessions.issue("admin")?;
        tracing::info!("No session tokens configured, issued token {token} for admin");
    } else {
        tracing::info!(count = seeded, "Seeded session tokens");
    }
    Ok(())
}

fn auto_start(supervisor: &Supervisor, broadcaster: &dyn Broadcaster, config: &ServerConfig) {
    if config.auto_start_simulator {
        match supervisor.start_simulator(SimulatorOverrides::default(), broadcaster) {
            Ok(outcome) => tracing::info!(?outcome, "Simulator auto-started"),
            Err(e) => tracing::error!("Failed to auto-start simulator: {e}"),
        }
    }
    if config.auto_start_trap_receiver {
        match supervisor.start_trap_receiver(config.trap_port, &config.community, true, broadcaster)
        {
            Ok(outcome) => tracing::info!(?outcome, "Trap receiver auto-started"),
            Err(e) => tracing::error!("Failed to auto-start trap receiver: {e}"),
        }
    }
}

fn spawn_session_purge(sessions: Arc<MemorySessionStore>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(SESSION_PURGE_INTERVAL);
        loop {
            interval.tick().await;
            match sessions.purge_expired() {
                Ok(0) => {}
                Ok(purged) => tracing::debug!(purged, "Purged expired sessions"),
                Err(e) => tracing::warn!("Failed to purge sessions: {e}"),
            }
        }
    })
}

fn cors_layer(origins: &[String]) -> anyhow::Result<CorsLayer> {
    if origins.iter().any(|o| o == "*") {
        return Ok(CorsLayer::permissive());
    }
    let origins = origins
        .iter()
        .map(|o| {
            o.parse::<HeaderValue>()
                .with_context(|| format!("invalid CORS origin {o:?}"))
        })
        .collect::<anyhow::Result<Vec<_>>>()?;
    Ok(CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods(Any)
        .allow_headers(Any))
}

async fn health(State(registry): State<Arc<ConnectionRegistry>>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "service": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
        "connections": registry.len(),
    }))
}

/// Resolves on Ctrl-C or SIGTERM after stopping the bridge and closing
/// every push connection.
async fn shutdown(bridge: Option<BridgeHandle>, registry: Arc<ConnectionRegistry>) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl-C: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to listen for SIGTERM: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    tracing::info!("Shutting down");
    if let Some(bridge) = bridge {
        bridge.stop().await;
    }
    registry.shutdown();
}
