//! Signer Node Service
//!
//! Hosts one simulated signer node and serves the signing protocol over
//! session-scoped WebSockets at `/v1/tss/:scope`.

use anyhow::Result;
use axum::{
    extract::{
        ws::{Message, WebSocket},
        Path, State, WebSocketUpgrade,
    },
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use clap::Parser;
use futures_util::{SinkExt, StreamExt};
use std::path::PathBuf;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn, Level};
use tss_core::mpc::{ClientMessage, NodeMessage};
use tss_core::sim::node::DEFAULT_SESSION_TTL_SECS;
use tss_core::sim::{NodeShare, SimulatedNode};
use uuid::Uuid;

/// Signer node CLI arguments
#[derive(Parser, Debug)]
#[command(name = "tss-node-svc")]
#[command(about = "Simulated threshold signer node")]
struct Args {
    /// Listen address
    #[arg(short, long, env = "LISTEN", default_value = "0.0.0.0:8080")]
    listen: String,

    /// Node share file written by `tss-party deal`
    #[arg(short, long, env = "NODE_SHARE")]
    share: PathBuf,

    /// Session TTL in seconds
    #[arg(long, default_value_t = DEFAULT_SESSION_TTL_SECS)]
    ttl: i64,

    /// Interval between expired-session sweeps, in seconds
    #[arg(long, default_value = "60")]
    purge_interval: u64,
}

/// Application state
struct AppState {
    node: SimulatedNode,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_max_level(Level::INFO)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(Level::INFO.into()),
        )
        .init();

    let args = Args::parse();

    let share = NodeShare::from_file(&args.share)?;
    let node = SimulatedNode::from_share(&share, args.ttl)?;

    info!(
        listen = %args.listen,
        node_index = node.node_index(),
        ttl = args.ttl,
        "Starting signer node"
    );

    let state = Arc::new(AppState { node });

    // Spawn cleanup task
    let purge_state = state.clone();
    let purge_every = std::time::Duration::from_secs(args.purge_interval.max(1));
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(purge_every);
        loop {
            interval.tick().await;
            purge_state.node.purge_expired();
        }
    });

    let app = Router::new()
        .route("/health", get(health))
        .route("/v1/tss/:scope", get(websocket_handler))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(&args.listen).await?;
    info!(address = %args.listen, "Listening");

    axum::serve(listener, app).await?;

    Ok(())
}

/// Health check endpoint
async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": "tss-node-svc",
        "version": env!("CARGO_PKG_VERSION"),
        "node_index": state.node.node_index(),
        "active_sessions": state.node.active_sessions(),
    }))
}

/// Session socket
async fn websocket_handler(
    ws: WebSocketUpgrade,
    Path(scope): Path<String>,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_websocket(socket, scope, state))
}

async fn handle_websocket(socket: WebSocket, scope: String, state: Arc<AppState>) {
    let connection_id = Uuid::new_v4();
    debug!(%connection_id, scope = %scope, "Session socket opened");

    let (mut sender, mut receiver) = socket.split();

    while let Some(frame) = receiver.next().await {
        let text = match frame {
            Ok(Message::Text(text)) => text,
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(e) => {
                warn!(%connection_id, "Socket error: {}", e);
                break;
            }
        };

        let reply = match serde_json::from_str::<ClientMessage>(&text) {
            Ok(message) => {
                debug!(%connection_id, kind = message.kind(), "Request received");
                state.node.handle(&scope, &message)
            }
            Err(e) => NodeMessage::Error {
                party_index: None,
                message: format!("malformed request: {}", e),
            },
        };

        let json = match serde_json::to_string(&reply) {
            Ok(json) => json,
            Err(e) => {
                warn!(%connection_id, "Cannot encode reply: {}", e);
                break;
            }
        };
        if sender.send(Message::Text(json)).await.is_err() {
            break;
        }
    }

    debug!(%connection_id, scope = %scope, "Session socket closed");
}
