//! HTTP and WebSocket handlers for the relay server.
//!
//! This module wires the connection endpoint to the dispatch engine and owns
//! the server lifecycle.

use crate::config::Config;
use crate::metrics::{self, ConnectionMetricsGuard, Metered};
use anyhow::{Context, Result};
use axum::{
    extract::{
        ws::{WebSocket, WebSocketUpgrade},
        Query, State,
    },
    http::{header, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use relay_core::{validate_room_name, Dispatcher};
use relay_transport::websocket;
use serde::Deserialize;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;
use tokio::task::JoinHandle;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, warn};

/// Shared server state.
pub struct AppState {
    /// Handle to the dispatch engine.
    pub dispatcher: Dispatcher,
    /// Server configuration.
    pub config: Config,
    active_connections: AtomicUsize,
}

impl AppState {
    /// Create new app state.
    #[must_use]
    pub fn new(dispatcher: Dispatcher, config: Config) -> Self {
        Self {
            dispatcher,
            config,
            active_connections: AtomicUsize::new(0),
        }
    }
}

/// A reserved place under the connection limit, released on drop.
struct ConnectionSlot {
    state: Arc<AppState>,
}

impl ConnectionSlot {
    fn acquire(state: &Arc<AppState>) -> Option<Self> {
        let limit = state.config.limits.max_connections;
        state
            .active_connections
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |active| {
                (active < limit).then_some(active + 1)
            })
            .ok()?;
        Some(Self {
            state: Arc::clone(state),
        })
    }
}

impl Drop for ConnectionSlot {
    fn drop(&mut self) {
        self.state.active_connections.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Build the HTTP router.
pub fn build_app(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE]);

    Router::new()
        .route(&state.config.transport.websocket_path, get(ws_handler))
        .route("/health", get(health_handler))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Run the HTTP/WebSocket server until a shutdown signal arrives.
///
/// # Errors
///
/// Returns an error if the server fails to start.
pub async fn run_server(config: Config) -> Result<()> {
    if config.metrics.enabled {
        if let Err(e) = metrics::start_metrics_server(&config.host, config.metrics.port) {
            error!("Failed to start metrics server: {:#}", e);
        }
    }

    let addr = config.bind_addr()?;
    let (dispatcher, engine) = Dispatcher::spawn(config.dispatcher_config());
    let app = build_app(Arc::new(AppState::new(dispatcher.clone(), config.clone())));

    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    info!("Relay server listening on {}", addr);
    info!(
        "WebSocket endpoint: ws://{}{}",
        addr, config.transport.websocket_path
    );

    serve(listener, app, dispatcher, engine, shutdown_signal()).await
}

/// Serve `app` until `signal` resolves, then stop the dispatch engine.
pub(crate) async fn serve<F>(
    listener: TcpListener,
    app: Router,
    dispatcher: Dispatcher,
    engine: JoinHandle<()>,
    signal: F,
) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    axum::serve(listener, app)
        .with_graceful_shutdown(signal)
        .await
        .context("Server error")?;

    info!("HTTP server stopped, shutting down dispatch engine");
    if dispatcher.shutdown().await.is_ok() {
        engine.await.context("Dispatch engine panicked")?;
    }

    Ok(())
}

/// Wait for shutdown signal (SIGTERM or SIGINT).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received SIGINT (Ctrl+C)");
        }
        _ = terminate => {
            info!("Received SIGTERM");
        }
    }
}

/// Health check handler.
async fn health_handler() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

#[derive(Debug, Deserialize)]
struct ConnectParams {
    #[serde(rename = "roomId")]
    room_id: Option<String>,
}

/// WebSocket upgrade handler.
async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<ConnectParams>,
    State(state): State<Arc<AppState>>,
) -> Response {
    let room = params.room_id.filter(|r| !r.is_empty());
    if let Some(name) = room.as_deref() {
        if let Err(reason) = validate_room_name(name) {
            warn!(reason, "Rejected upgrade with invalid room");
            metrics::record_rejected_upgrade("invalid_room");
            return (StatusCode::BAD_REQUEST, reason).into_response();
        }
    }

    let Some(slot) = ConnectionSlot::acquire(&state) else {
        warn!(
            limit = state.config.limits.max_connections,
            "Connection limit reached"
        );
        metrics::record_rejected_upgrade("capacity");
        return (StatusCode::SERVICE_UNAVAILABLE, "Connection limit reached").into_response();
    };

    ws.max_message_size(state.config.limits.max_message_size)
        .on_upgrade(move |socket| handle_websocket(socket, room, state, slot))
}

/// Handle an upgraded WebSocket connection.
async fn handle_websocket(
    socket: WebSocket,
    room: Option<String>,
    state: Arc<AppState>,
    _slot: ConnectionSlot,
) {
    let _metrics_guard = ConnectionMetricsGuard::new();

    let (reader, writer) = websocket::split(socket);
    let session = match relay_core::open(
        &state.dispatcher,
        room,
        Metered::new(reader),
        Metered::new(writer),
    )
    .await
    {
        Ok(session) => session,
        Err(e) => {
            error!(error = %e, "Failed to open connection");
            return;
        }
    };

    publish_stats(&state).await;
    let summary = session.run().await;
    metrics::record_decode_errors(summary.malformed);
    publish_stats(&state).await;
}

async fn publish_stats(state: &AppState) {
    match state.dispatcher.stats().await {
        Ok(stats) => metrics::record_dispatch_stats(&stats),
        Err(e) => debug!(error = %e, "Engine stats unavailable"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::{SinkExt, StreamExt};
    use relay_protocol::{Envelope, SystemKind};
    use serde_json::json;
    use std::net::SocketAddr;
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;
    use tokio::sync::oneshot;
    use tokio::time::timeout;
    use tokio_tungstenite::tungstenite::{self, Message};
    use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

    type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

    async fn start(config: Config) -> (SocketAddr, oneshot::Sender<()>, JoinHandle<Result<()>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (dispatcher, engine) = Dispatcher::spawn(config.dispatcher_config());
        let app = build_app(Arc::new(AppState::new(dispatcher.clone(), config)));

        let (stop_tx, stop_rx) = oneshot::channel::<()>();
        let server = tokio::spawn(serve(listener, app, dispatcher, engine, async move {
            let _ = stop_rx.await;
        }));
        (addr, stop_tx, server)
    }

    async fn connect(addr: SocketAddr, query: &str) -> Client {
        let (client, _) = connect_async(format!("ws://{}/ws{}", addr, query))
            .await
            .unwrap();
        client
    }

    async fn next_envelope(client: &mut Client) -> Envelope {
        loop {
            let message = timeout(Duration::from_secs(2), client.next())
                .await
                .expect("timed out waiting for a frame")
                .expect("stream ended")
                .expect("websocket error");
            if let Message::Text(text) = message {
                return relay_protocol::decode(text.as_bytes()).unwrap();
            }
        }
    }

    async fn assert_silent(client: &mut Client) {
        if let Ok(Some(Ok(Message::Text(text)))) =
            timeout(Duration::from_millis(100), client.next()).await
        {
            panic!("unexpected frame: {}", text);
        }
    }

    #[tokio::test]
    async fn test_lobby_scenario_over_websockets() {
        let (addr, _stop, _server) = start(Config::default()).await;

        let mut c1 = connect(addr, "?roomId=lobby").await;
        let greeting = next_envelope(&mut c1).await;
        assert_eq!(greeting.system_kind(), Some(SystemKind::Connected));
        let c1_id = greeting.to.clone().unwrap();
        assert_eq!(greeting.payload, Some(json!({"clientId": c1_id})));

        let mut c2 = connect(addr, "?roomId=lobby").await;
        let c2_id = next_envelope(&mut c2).await.to.unwrap();

        let joined = next_envelope(&mut c1).await;
        assert_eq!(joined.system_kind(), Some(SystemKind::UserJoined));
        assert_eq!(joined.from, c2_id);
        assert_silent(&mut c2).await;

        c1.send(Message::Text(
            r#"{"type":"chat","from":"spoofed","roomId":"lobby","payload":"hi"}"#.into(),
        ))
        .await
        .unwrap();
        let chat = next_envelope(&mut c2).await;
        assert_eq!(chat.kind, "chat");
        assert_eq!(chat.from, c1_id);
        assert_eq!(chat.payload, Some(json!("hi")));
        assert_silent(&mut c1).await;

        c2.close(None).await.unwrap();
        let left = next_envelope(&mut c1).await;
        assert_eq!(left.system_kind(), Some(SystemKind::UserLeft));
        assert_eq!(left.from, c2_id);
    }

    #[tokio::test]
    async fn test_malformed_frame_keeps_connection_open() {
        let (addr, _stop, _server) = start(Config::default()).await;

        let mut a = connect(addr, "").await;
        let a_id = next_envelope(&mut a).await.to.unwrap();
        let mut b = connect(addr, "").await;
        next_envelope(&mut b).await;

        b.send(Message::Text("{not json".into())).await.unwrap();
        b.send(Message::Binary(
            format!(r#"{{"type":"offer","to":"{}"}}"#, a_id).into_bytes(),
        ))
        .await
        .unwrap();

        let offer = next_envelope(&mut a).await;
        assert_eq!(offer.kind, "offer");
    }

    #[tokio::test]
    async fn test_invalid_room_is_rejected() {
        let (addr, _stop, _server) = start(Config::default()).await;

        match connect_async(format!("ws://{}/ws?roomId=bad%01room", addr)).await {
            Err(tungstenite::Error::Http(response)) => {
                assert_eq!(response.status(), StatusCode::BAD_REQUEST.as_u16());
            }
            other => panic!("Expected HTTP 400, got {:?}", other.map(|_| ())),
        }
    }

    #[tokio::test]
    async fn test_connection_limit_is_enforced() {
        let mut config = Config::default();
        config.limits.max_connections = 1;
        let (addr, _stop, _server) = start(config).await;

        let mut first = connect(addr, "").await;
        next_envelope(&mut first).await;

        match connect_async(format!("ws://{}/ws", addr)).await {
            Err(tungstenite::Error::Http(response)) => {
                assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE.as_u16());
            }
            other => panic!("Expected HTTP 503, got {:?}", other.map(|_| ())),
        }
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let (addr, _stop, _server) = start(Config::default()).await;

        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream
            .write_all(b"GET /health HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n")
            .await
            .unwrap();
        let mut response = String::new();
        stream.read_to_string(&mut response).await.unwrap();

        assert!(response.starts_with("HTTP/1.1 200"));
        assert!(response.contains(r#"{"status":"ok"}"#));
    }

    #[tokio::test]
    async fn test_cors_preflight() {
        let (addr, _stop, _server) = start(Config::default()).await;

        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream
            .write_all(
                b"OPTIONS /health HTTP/1.1\r\nHost: localhost\r\nOrigin: http://example.com\r\n\
                  Access-Control-Request-Method: POST\r\nConnection: close\r\n\r\n",
            )
            .await
            .unwrap();
        let mut response = String::new();
        stream.read_to_string(&mut response).await.unwrap();

        assert!(response.starts_with("HTTP/1.1 200"));
        assert!(response
            .to_ascii_lowercase()
            .contains("access-control-allow-origin: *"));
    }

    #[tokio::test]
    async fn test_graceful_shutdown_closes_connections() {
        let (addr, stop, server) = start(Config::default()).await;

        let mut client = connect(addr, "?roomId=lobby").await;
        next_envelope(&mut client).await;

        stop.send(()).unwrap();
        timeout(Duration::from_secs(5), server)
            .await
            .expect("server did not stop")
            .unwrap()
            .unwrap();

        let ended = timeout(Duration::from_secs(2), async {
            loop {
                match client.next().await {
                    None | Some(Err(_)) | Some(Ok(Message::Close(_))) => break,
                    Some(Ok(_)) => {}
                }
            }
        })
        .await;
        assert!(ended.is_ok(), "client stream stayed open after shutdown");
    }
}
