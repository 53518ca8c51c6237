//! HTTP surface of the signaling relay.
//!
//! A thin axum layer over [`SignalingService`]. Peers never talk to each
//! other through it; they exchange a pair of session descriptions and
//! move on.
//!
//! ## Endpoints
//!
//! | Method | Path               | Meaning                               |
//! |--------|--------------------|---------------------------------------|
//! | POST   | `/api/rooms`       | create a room, returns `{"roomId"}`   |
//! | POST   | `/api/rooms/{room}`| publish an offer or answer            |
//! | GET    | `/api/rooms/{room}`| poll for published descriptions       |
//! | GET    | `/api/health`      | liveness probe                        |
//!
//! Errors carry a JSON body of [`error::ApiError`] with a stable `code`.

pub mod error;

use std::future::Future;
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::config::RelayConfig;
use crate::relay::wire::{CreateRoomResponse, PublishRequest, PublishResponse};
use crate::relay::{RoomSignals, SignalingRelay, SignalingService};
use crate::room::RoomCode;
use crate::store::KvStore;
use crate::Result;

use self::error::ApiResult;

/// Liveness probe body.
#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

/// The bundled signaling relay server.
#[derive(Debug)]
pub struct RelayServer<S> {
    config: RelayConfig,
    service: Arc<SignalingService<S>>,
}

impl<S: KvStore + 'static> RelayServer<S> {
    /// Create a server over `service` with `config`.
    pub fn new(config: RelayConfig, service: Arc<SignalingService<S>>) -> Self {
        Self { config, service }
    }

    /// Build the relay router. Exposed separately so tests can drive it
    /// without binding a socket.
    #[must_use]
    pub fn router(&self) -> Router {
        let mut router = Router::new()
            .route("/api/health", get(health))
            .route("/api/rooms", post(create_room::<S>))
            .route(
                "/api/rooms/{room}",
                get(poll_room::<S>).post(publish_signal::<S>),
            )
            .with_state(self.service.clone())
            .layer(TraceLayer::new_for_http());
        if self.config.permissive_cors {
            router = router.layer(CorsLayer::permissive());
        }
        router
    }

    /// Bind the configured address. The returned handle exposes the
    /// actual socket address, which matters when the port is `0`.
    pub async fn bind(self) -> Result<BoundRelayServer> {
        let listener = tokio::net::TcpListener::bind(self.config.listen_addr()).await?;
        let addr = listener.local_addr()?;
        tracing::info!(%addr, "relay listening");
        Ok(BoundRelayServer {
            router: self.router(),
            listener,
            addr,
        })
    }

    /// Bind and serve until `shutdown` resolves.
    pub async fn run<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.bind().await?.serve(shutdown).await
    }
}

/// A relay server bound to its socket but not yet serving.
#[derive(Debug)]
pub struct BoundRelayServer {
    router: Router,
    listener: tokio::net::TcpListener,
    addr: std::net::SocketAddr,
}

impl BoundRelayServer {
    /// The address actually bound.
    #[must_use]
    pub fn local_addr(&self) -> std::net::SocketAddr {
        self.addr
    }

    /// Serve until `shutdown` resolves.
    pub async fn serve<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        axum::serve(self.listener, self.router)
            .with_graceful_shutdown(shutdown)
            .await?;
        tracing::info!("relay stopped");
        Ok(())
    }
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: crate::VERSION,
    })
}

async fn create_room<S: KvStore>(
    State(service): State<Arc<SignalingService<S>>>,
) -> ApiResult<(StatusCode, Json<CreateRoomResponse>)> {
    let room = service.create_room().await?;
    Ok((
        StatusCode::CREATED,
        Json(CreateRoomResponse {
            room_id: room.to_string(),
        }),
    ))
}

async fn publish_signal<S: KvStore>(
    State(service): State<Arc<SignalingService<S>>>,
    Path(room): Path<String>,
    Json(request): Json<PublishRequest>,
) -> ApiResult<Json<PublishResponse>> {
    let room = RoomCode::parse(&room)?;
    service.publish(&room, request.role, &request.data).await?;
    Ok(Json(PublishResponse { ok: true }))
}

async fn poll_room<S: KvStore>(
    State(service): State<Arc<SignalingService<S>>>,
    Path(room): Path<String>,
) -> ApiResult<Json<RoomSignals>> {
    let room = RoomCode::parse(&room)?;
    let signals = service.poll(&room).await?;
    Ok(Json(signals))
}
