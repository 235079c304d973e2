//! HTTP surface.
//!
//! | Route                            | Operation                           |
//! |----------------------------------|-------------------------------------|
//! | `GET /ca`                        | root certificate only               |
//! | `GET /client/<names>[/force]`    | issue or rotate a client identity   |
//! | `GET /server/<names>[/force]`    | issue or rotate the caller's server |
//!
//! Every successful response is a zip attachment of the identity's existing
//! artifacts, preceded by the root certificate.

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use axum::extract::{ConnectInfo, Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::configs::ServerConfig;
use crate::error::CertError;
use crate::protocol::{IssueRequest, Protocol, Request};

const ROTATE_SEGMENT: &str = "force";

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    Issuance(#[from] CertError),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Internal server error: {0}")]
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::Issuance(CertError::ReservedIdentity(_)) => StatusCode::FORBIDDEN,
            ApiError::Issuance(CertError::InvalidRequest(_)) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Issuance(_) | ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            warn!("request failed: {}", self);
        }
        (status, self.to_string()).into_response()
    }
}

pub fn router(protocol: Arc<Protocol>) -> Router {
    Router::new()
        .route("/ca", get(get_root_bundle))
        .route("/client/:names", get(issue_client))
        .route("/client/:names/:flag", get(rotate_client))
        .route("/server/:names", get(issue_server))
        .route("/server/:names/:flag", get(rotate_server))
        .layer(TraceLayer::new_for_http())
        .with_state(protocol)
}

async fn get_root_bundle(State(protocol): State<Arc<Protocol>>) -> Result<Response, ApiError> {
    respond(protocol, Request::RootBundle).await
}

async fn issue_client(
    State(protocol): State<Arc<Protocol>>,
    Path(names): Path<String>,
) -> Result<Response, ApiError> {
    let request = IssueRequest::parse(&names, false);
    respond(protocol, Request::IssueClient(request)).await
}

async fn rotate_client(
    State(protocol): State<Arc<Protocol>>,
    Path((names, flag)): Path<(String, String)>,
) -> Result<Response, ApiError> {
    let request = IssueRequest::parse(&names, rotation_flag(&flag)?);
    respond(protocol, Request::IssueClient(request)).await
}

async fn issue_server(
    State(protocol): State<Arc<Protocol>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Path(names): Path<String>,
) -> Result<Response, ApiError> {
    let request = IssueRequest::parse(&names, false);
    respond(protocol, server_request(addr, request)).await
}

async fn rotate_server(
    State(protocol): State<Arc<Protocol>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Path((names, flag)): Path<(String, String)>,
) -> Result<Response, ApiError> {
    let request = IssueRequest::parse(&names, rotation_flag(&flag)?);
    respond(protocol, server_request(addr, request)).await
}

fn rotation_flag(segment: &str) -> Result<bool, ApiError> {
    if segment.trim() == ROTATE_SEGMENT {
        Ok(true)
    } else {
        Err(ApiError::NotFound(format!("unknown route segment `{}`", segment)))
    }
}

fn server_request(addr: SocketAddr, request: IssueRequest) -> Request {
    // IPv4 peers on a dual-stack socket show up as ::ffff:a.b.c.d
    let peer: IpAddr = addr.ip().to_canonical();
    Request::IssueServer { peer, request }
}

/// Run the request on the blocking pool (key generation is CPU bound). The
/// archive is assembled there too, under the identity lock.
async fn respond(protocol: Arc<Protocol>, request: Request) -> Result<Response, ApiError> {
    let archive = tokio::task::spawn_blocking(move || protocol.process_request(request))
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))??;

    let headers = [
        (header::CONTENT_TYPE, "application/zip".to_string()),
        (
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"{}\"", archive.archive_name),
        ),
    ];
    Ok((headers, archive.body).into_response())
}

/// Serve until Ctrl-C. Blocks the calling thread on its own runtime.
pub fn start_webserver(config: &ServerConfig, protocol: Arc<Protocol>) -> anyhow::Result<()> {
    let addr: SocketAddr = format!("{}:{}", config.host, config.port)
        .parse()
        .with_context(|| format!("Invalid bind address {}:{}", config.host, config.port))?;

    let rt = tokio::runtime::Runtime::new().context("Failed to create Tokio runtime")?;
    rt.block_on(async move {
        let app = router(protocol);
        let handle = axum_server::Handle::new();

        let shutdown = handle.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("shutting down");
                shutdown.graceful_shutdown(Some(Duration::from_secs(10)));
            }
        });

        info!("serving certificates on http://{}", addr);
        axum_server::bind(addr)
            .handle(handle)
            .serve(app.into_make_service_with_connect_info::<SocketAddr>())
            .await
            .with_context(|| format!("Server on {} failed", addr))
    })
}
