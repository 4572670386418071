//! Server-side wiring for the PBX admin backend.
//!
//! This module contains all backend functionality:
//! - Manager interface client and reconnect supervision
//! - Config rendering and atomic publication
//! - Live state aggregation and WebSocket fan-out
//! - Database snapshot access (PostgreSQL via sqlx)
//! - Bearer-token validation for the admin surface

pub mod ami;
pub mod auth;
pub mod db;
pub mod live;
pub mod provision;

use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket},
        Path, Query, State, WebSocketUpgrade,
    },
    http::{Method, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::models::{LinkStatus, LiveChannel, StateChange};
use ami::protocol::AmiAction;
use ami::{AmiConfig, AmiGateway, AmiSupervisor};
use live::aggregator::CHANNEL_GRACE;
use live::{BroadcastHub, PushMessage, StateAggregator};
use provision::{
    AmiReloadTransport, ConfigPublisher, ProvisionError, PublishReport, PublishScope,
};

/// Application state shared across all routes and the WebSocket sessions.
pub struct AppState {
    pub db: PgPool,
    pub gateway: AmiGateway,
    pub publisher: ConfigPublisher,
    pub aggregator: Arc<StateAggregator>,
    pub hub: Arc<BroadcastHub>,
    pub jwt_secret: String,
}

impl AppState {
    /// Regenerate and publish the config files a scope touches. This is the
    /// entry point the CRUD layer calls after every write.
    pub async fn render_and_publish(
        &self,
        scope: PublishScope,
    ) -> Result<PublishReport, ProvisionError> {
        let snapshot = db::snapshot::load(&self.db).await?;
        let fragments = provision::render(&snapshot, scope)?;
        self.publisher.publish(fragments).await
    }
}

/// Create the Axum router with all API routes
pub fn create_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers(Any);

    Router::new()
        // Health check
        .route("/api/health", get(health_check))

        // Dashboard status: live endpoint table plus link/database health
        .route("/api/status", get(get_status))

        // Live calls
        .route("/api/calls/active", get(get_active_calls))
        .route("/api/calls/originate", post(originate_call))

        // Config regeneration trigger for the CRUD layer
        .route("/api/provision/{scope}", post(provision_scope))

        // Admin push channel
        .route("/ws", get(ws_upgrade))

        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// Health check
async fn health_check() -> &'static str {
    "OK"
}

// ============== Status ==============

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct EndpointRow {
    endpoint: String,
    status: &'static str,
    rtt: Option<f64>,
    display_name: String,
    kind: &'static str,
    provider: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct TrunkRow {
    key: String,
    name: Option<String>,
    status: crate::models::TrunkRegStatus,
    detail: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct StatusResponse {
    timestamp: chrono::DateTime<chrono::Utc>,
    link: LinkStatus,
    database: &'static str,
    health: &'static str,
    issues: Vec<String>,
    endpoints: Vec<EndpointRow>,
    trunk_registrations: Vec<TrunkRow>,
    sessions: usize,
}

async fn get_status(
    State(state): State<Arc<AppState>>,
    _claims: auth::Claims,
) -> Json<StatusResponse> {
    let snapshot = state.aggregator.snapshot().await;

    // Friendly names from the database; the live table only knows section
    // names.
    let peers = db::snapshot::peers(&state.db).await;
    let trunks = db::snapshot::trunks(&state.db).await;
    let database = if peers.is_ok() && trunks.is_ok() {
        "connected"
    } else {
        "unreachable"
    };
    let peers = peers.unwrap_or_default();
    let trunks = trunks.unwrap_or_default();

    let endpoints: Vec<EndpointRow> = snapshot
        .endpoints
        .iter()
        .map(|live| {
            let status = match live.status {
                crate::models::EndpointStatus::Registered => "online",
                crate::models::EndpointStatus::Unregistered => "offline",
            };
            if let Some(trunk) = trunks
                .iter()
                .find(|t| t.endpoint_section() == live.extension)
            {
                EndpointRow {
                    endpoint: live.extension.clone(),
                    status,
                    rtt: live.rtt_ms,
                    display_name: trunk.name.clone(),
                    kind: "trunk",
                    provider: Some(trunk.provider.clone()),
                }
            } else {
                let display_name = peers
                    .iter()
                    .find(|p| p.extension == live.extension)
                    .map(|p| p.display_name().to_string())
                    .unwrap_or_else(|| live.extension.clone());
                EndpointRow {
                    endpoint: live.extension.clone(),
                    status,
                    rtt: live.rtt_ms,
                    display_name,
                    kind: "peer",
                    provider: None,
                }
            }
        })
        .collect();

    let trunk_registrations: Vec<TrunkRow> = snapshot
        .trunks
        .iter()
        .map(|reg| TrunkRow {
            key: reg.key.clone(),
            name: trunks
                .iter()
                .find(|t| t.registry_key() == reg.key)
                .map(|t| t.name.clone()),
            status: reg.status,
            detail: reg.detail.clone(),
        })
        .collect();

    let mut health = "healthy";
    let mut issues = Vec::new();
    if !snapshot.link.is_connected() {
        health = "degraded";
        issues.push("switch not connected".to_string());
    }
    if database != "connected" {
        health = "critical";
        issues.push("database unreachable".to_string());
    }
    let online = endpoints.iter().filter(|e| e.status == "online").count();
    if !endpoints.is_empty() && online == 0 {
        if health == "healthy" {
            health = "warning";
        }
        issues.push("no endpoints online".to_string());
    }

    Json(StatusResponse {
        timestamp: chrono::Utc::now(),
        link: snapshot.link,
        database,
        health,
        issues,
        endpoints,
        trunk_registrations,
        sessions: state.hub.session_count().await,
    })
}

// ============== Live calls ==============

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ActiveCallsResponse {
    calls: Vec<LiveChannel>,
    count: usize,
    timestamp: chrono::DateTime<chrono::Utc>,
}

async fn get_active_calls(
    State(state): State<Arc<AppState>>,
    _claims: auth::Claims,
) -> Json<ActiveCallsResponse> {
    let calls = state.aggregator.active_channels().await;
    Json(ActiveCallsResponse {
        count: calls.len(),
        calls,
        timestamp: chrono::Utc::now(),
    })
}

#[derive(Debug, Deserialize)]
struct OriginateRequest {
    extension: String,
    number: String,
}

#[derive(Debug, Serialize)]
struct OriginateResponse {
    status: String,
    message: String,
}

/// Originate a call: rings the extension first, then dials the number.
async fn originate_call(
    State(state): State<Arc<AppState>>,
    _claims: auth::Claims,
    Json(req): Json<OriginateRequest>,
) -> Result<Json<OriginateResponse>, (StatusCode, String)> {
    if !state.gateway.is_connected().await {
        return Err((
            StatusCode::SERVICE_UNAVAILABLE,
            "switch not connected".to_string(),
        ));
    }

    let action = AmiAction::new("Originate")
        .param("Channel", format!("PJSIP/{}", req.extension))
        .param("Exten", req.number.clone())
        .param("Context", "internal")
        .param("Priority", "1")
        .param("CallerID", req.extension.clone())
        .param("Timeout", "30000")
        .param("Async", "true");

    match state.gateway.execute(action).await {
        Ok(response) if response.success => Ok(Json(OriginateResponse {
            status: "ok".to_string(),
            message: format!("Calling {} from {}", req.number, req.extension),
        })),
        Ok(response) => Err((
            StatusCode::INTERNAL_SERVER_ERROR,
            response.message.unwrap_or_else(|| "originate rejected".to_string()),
        )),
        Err(e) => Err((StatusCode::INTERNAL_SERVER_ERROR, e.to_string())),
    }
}

// ============== Provisioning ==============

async fn provision_scope(
    State(state): State<Arc<AppState>>,
    _claims: auth::Claims,
    Path(scope): Path<String>,
) -> Result<Json<PublishReport>, (StatusCode, String)> {
    let Some(scope) = PublishScope::parse(&scope) else {
        return Err((StatusCode::BAD_REQUEST, format!("unknown scope {:?}", scope)));
    };

    match state.render_and_publish(scope).await {
        Ok(report) => Ok(Json(report)),
        Err(e @ ProvisionError::InvalidSnapshot(_)) => {
            Err((StatusCode::UNPROCESSABLE_ENTITY, e.to_string()))
        }
        Err(e) => Err((StatusCode::INTERNAL_SERVER_ERROR, e.to_string())),
    }
}

// ============== WebSocket push channel ==============

#[derive(Debug, Deserialize)]
struct WsParams {
    token: Option<String>,
}

async fn ws_upgrade(
    State(state): State<Arc<AppState>>,
    Query(params): Query<WsParams>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    // Auth happens at session start; a bad token never reaches the hub.
    let valid = params
        .token
        .as_deref()
        .map(|token| auth::validate_token(token, &state.jwt_secret).is_ok())
        .unwrap_or(false);
    if !valid {
        return StatusCode::UNAUTHORIZED.into_response();
    }

    ws.on_upgrade(move |socket| handle_session(socket, state))
        .into_response()
}

async fn handle_session(socket: WebSocket, state: Arc<AppState>) {
    let (session_id, mut outbound) = state.hub.register().await;
    let (mut sink, mut stream) = socket.split();

    // Fresh point-in-time copy so the client starts from known state.
    let snapshot = state.aggregator.snapshot().await;
    let hello = PushMessage::State(StateChange::Resync(snapshot));
    if send_json(&mut sink, &hello).await.is_err() {
        state.hub.unregister(session_id).await;
        return;
    }

    loop {
        tokio::select! {
            message = outbound.recv() => {
                let Some(message) = message else {
                    // Evicted by the hub (queue overflow); the client must
                    // reconnect for a fresh snapshot.
                    break;
                };
                if send_json(&mut sink, &message).await.is_err() {
                    break;
                }
            }
            incoming = stream.next() => {
                match incoming {
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    Some(Ok(Message::Text(text))) => {
                        tracing::debug!(session = session_id, "ws message: {}", text);
                    }
                    Some(Ok(_)) => {}
                }
            }
        }
    }

    state.hub.unregister(session_id).await;
}

async fn send_json<S>(sink: &mut S, message: &PushMessage) -> Result<(), axum::Error>
where
    S: futures::Sink<Message, Error = axum::Error> + Unpin,
{
    let text = serde_json::to_string(message).unwrap_or_default();
    sink.send(Message::Text(text.into())).await
}

// ============== Bootstrap ==============

/// Initialize and start the server
pub async fn run_server(database_url: &str, port: u16) -> anyhow::Result<()> {
    let pool = db::init_pool(database_url).await?;

    let jwt_secret =
        std::env::var("JWT_SECRET").unwrap_or_else(|_| "your-secret-key".to_string());
    let config_dir = std::env::var("ASTERISK_CONFIG_DIR")
        .unwrap_or_else(|_| "/etc/asterisk/custom".to_string());
    let ami_config = AmiConfig::from_env();

    let hub = Arc::new(BroadcastHub::new());
    let (link_tx, link_rx) = watch::channel(LinkStatus::Connecting);
    let aggregator = Arc::new(StateAggregator::new(
        hub.clone(),
        Some(pool.clone()),
        link_rx,
        CHANNEL_GRACE,
    ));

    let gateway = AmiGateway::new();
    let cancel = CancellationToken::new();
    let supervisor = AmiSupervisor::new(
        ami_config,
        gateway.clone(),
        aggregator.clone(),
        hub.clone(),
        link_tx,
        cancel.clone(),
    );
    tokio::spawn(supervisor.run());

    let publisher = ConfigPublisher::new(
        config_dir,
        Arc::new(AmiReloadTransport::new(gateway.clone())),
    );

    let state = Arc::new(AppState {
        db: pool,
        gateway,
        publisher,
        aggregator,
        hub,
        jwt_secret,
    });

    // Bring the switch config in line with the database once at startup.
    // The reload may fail while the link is still coming up; the files are
    // on disk either way and the next publish retries the reload.
    match state.render_and_publish(PublishScope::Full).await {
        Ok(report) if report.fully_applied() => {
            tracing::info!("startup config publish complete");
        }
        Ok(report) => {
            tracing::warn!(
                failures = report.reload_failures.len(),
                "startup config written, some reloads pending"
            );
        }
        Err(e) => tracing::warn!("startup config publish failed: {}", e),
    }

    let app = create_router(state);

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", port)).await?;
    tracing::info!("Server running on http://0.0.0.0:{}", port);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            cancel.cancel();
        })
        .await?;

    Ok(())
}
