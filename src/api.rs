//! HTTP surface over the peer service
//!
//! | Method | Path | Success |
//! |--------|------|---------|
//! | POST | `/peer` | created peer with client config |
//! | GET | `/peer/{key}` | peer record |
//! | GET | `/peers` | all peer records |
//! | DELETE | `/peer/{key}` | ack |
//!
//! Keys are base64 and may contain `/`, so `{key}` is a catch-all segment.
//! Every body is wrapped as `{"status":"success","data":...}` or
//! `{"status":"error","message":...}`.

use crate::peer::{PeerError, PeerService};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

#[derive(Debug, Serialize)]
struct Envelope<T: Serialize> {
    status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<String>,
}

fn success<T: Serialize>(data: T) -> Json<Envelope<T>> {
    Json(Envelope {
        status: "success",
        data: Some(data),
        message: None,
    })
}

/// Error response with a stable status code
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl From<PeerError> for ApiError {
    fn from(err: PeerError) -> Self {
        let status = match &err {
            PeerError::NotFound(_) => StatusCode::NOT_FOUND,
            PeerError::InvalidKey(_) => StatusCode::BAD_REQUEST,
            PeerError::Exhausted => StatusCode::CONFLICT,
            PeerError::InterfaceUnavailable(_)
            | PeerError::ConfigCorrupt(_)
            | PeerError::MissingServerKey
            | PeerError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            error!("Request failed: {}", err);
        }
        Self {
            status,
            message: err.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Envelope::<()> {
            status: "error",
            data: None,
            message: Some(self.message),
        };
        (self.status, Json(body)).into_response()
    }
}

/// Run a blocking service call off the async runtime.
async fn blocking<T, F>(service: Arc<PeerService>, call: F) -> Result<T, ApiError>
where
    F: FnOnce(&PeerService) -> Result<T, PeerError> + Send + 'static,
    T: Send + 'static,
{
    match tokio::task::spawn_blocking(move || call(&service)).await {
        Ok(result) => Ok(result?),
        Err(e) => {
            error!("Worker task failed: {}", e);
            Err(ApiError {
                status: StatusCode::INTERNAL_SERVER_ERROR,
                message: "Internal error".to_string(),
            })
        }
    }
}

async fn create_peer(State(service): State<Arc<PeerService>>) -> Result<impl IntoResponse, ApiError> {
    let created = blocking(service, |s| s.create()).await?;
    Ok(success(created))
}

async fn get_peer(
    State(service): State<Arc<PeerService>>,
    Path(key): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let peer = blocking(service, move |s| s.get(&key)).await?;
    Ok(success(peer))
}

async fn list_peers(State(service): State<Arc<PeerService>>) -> Result<impl IntoResponse, ApiError> {
    let peers = blocking(service, |s| s.list()).await?;
    Ok(success(peers))
}

async fn delete_peer(
    State(service): State<Arc<PeerService>>,
    Path(key): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    blocking(service, move |s| s.delete(&key)).await?;
    Ok(Json(Envelope::<()> {
        status: "success",
        data: None,
        message: Some("Peer deleted".to_string()),
    }))
}

pub fn router(service: Arc<PeerService>) -> Router {
    Router::new()
        .route("/peer", post(create_peer))
        .route("/peer/*key", get(get_peer).delete(delete_peer))
        .route("/peers", get(list_peers))
        .with_state(service)
        .layer(TraceLayer::new_for_http())
}

/// Serve the API until Ctrl+C.
pub async fn serve(service: Arc<PeerService>, listen: SocketAddr) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(listen).await?;
    info!("Listening on http://{}", listener.local_addr()?);

    axum::serve(listener, router(service))
        .with_graceful_shutdown(shutdown_signal())
        .await
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Shutting down"),
        Err(e) => {
            warn!("Cannot listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    }
}
