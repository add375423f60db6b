//! HTTP API.
//!
//! Every route requires an `X-API-Key` header matching the configured key.
//!
//! | Method | Path               |                                      |
//! |--------|--------------------|--------------------------------------|
//! | POST   | `/api/signal`      | store a signal value                 |
//! | GET    | `/api/signal`      | most recent signal                   |
//! | GET    | `/api/health`      | application and database status      |
//! | POST   | `/api/signal_file` | archive and ingest a CSV upload      |

mod error;
mod handlers;

pub use error::{status_for, ApiError, ErrorBody};
pub use handlers::{client_ip, HealthStatus, SignalRequest, UploadResponse};

use crate::archive::UploadArchive;
use crate::error::Result;
use crate::ingest::{IngestLimits, Ingestor};
use crate::store::Store;
use axum::extract::{DefaultBodyLimit, Request, State};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Router;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

/// Room for multipart boundaries and part headers on top of the document.
const MULTIPART_OVERHEAD: usize = 64 * 1024;

/// Shared state injected into every handler.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn Store>,
    pub ingestor: Arc<Ingestor>,
    pub archive: Arc<UploadArchive>,
    api_key: Arc<str>,
}

impl AppState {
    pub fn new(
        store: Arc<dyn Store>,
        archive: UploadArchive,
        limits: IngestLimits,
        api_key: impl Into<String>,
    ) -> Self {
        let ingestor = Ingestor::new(store.clone(), limits);
        Self {
            store,
            ingestor: Arc::new(ingestor),
            archive: Arc::new(archive),
            api_key: Arc::from(api_key.into()),
        }
    }
}

/// Build the router with authentication, body limit and request tracing.
pub fn router(state: AppState) -> Router {
    let body_limit = state
        .ingestor
        .limits()
        .max_bytes
        .saturating_add(MULTIPART_OVERHEAD);

    Router::new()
        .route(
            "/api/signal",
            post(handlers::post_signal).get(handlers::get_signal),
        )
        .route("/api/health", get(handlers::get_health))
        .route("/api/signal_file", post(handlers::post_signal_file))
        .layer(middleware::from_fn_with_state(state.clone(), require_api_key))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn require_api_key(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let authorized = request
        .headers()
        .get("x-api-key")
        .and_then(|v| v.to_str().ok())
        .is_some_and(|key| key == &*state.api_key);

    if !authorized {
        warn!(
            "rejected {} {}: missing or wrong API key",
            request.method(),
            request.uri().path()
        );
        return ApiError::unauthorized().into_response();
    }
    next.run(request).await
}

/// Serve the API until `shutdown` resolves, then drain in-flight requests.
pub async fn serve<F>(listener: TcpListener, state: AppState, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let addr = listener.local_addr()?;
    info!(
        "listening on http://{} (store: {})",
        addr,
        state.store.backend_type()
    );

    let app = router(state).into_make_service_with_connect_info::<SocketAddr>();
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;

    info!("server stopped");
    Ok(())
}
