//! Liveness, readiness, and metrics over plain HTTP.

use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use hyper::header::CONTENT_TYPE;
use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Method, Request, Response, Server, StatusCode};
use thiserror::Error;
use tracing::info;

use crate::metrics::HubMetrics;

/// Result alias for the health surface.
pub type TelemetryResult<T> = Result<T, TelemetryError>;

/// Errors surfaced by the health server.
#[derive(Debug, Error)]
pub enum TelemetryError {
    /// The health listener could not be bound or served.
    #[error("health endpoint error: {source}")]
    Http {
        /// Underlying hyper failure.
        #[from]
        source: hyper::Error,
    },
}

/// Liveness and readiness flags shared with the serving process.
#[derive(Debug)]
pub struct HealthState {
    live: AtomicBool,
    ready: AtomicBool,
}

impl HealthState {
    /// Creates a state that is live but not yet ready.
    #[must_use]
    pub fn new() -> Self {
        Self {
            live: AtomicBool::new(true),
            ready: AtomicBool::new(false),
        }
    }

    /// Returns the liveness flag.
    #[must_use]
    pub fn is_live(&self) -> bool {
        self.live.load(Ordering::Acquire)
    }

    /// Returns the readiness flag.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    /// Sets the liveness flag.
    pub fn set_live(&self, live: bool) {
        self.live.store(live, Ordering::Release);
    }

    /// Sets the readiness flag.
    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::Release);
    }
}

impl Default for HealthState {
    fn default() -> Self {
        Self::new()
    }
}

/// Serves `GET /health`, `GET /ready`, and `GET /metrics` until `shutdown`
/// resolves.
///
/// # Errors
///
/// Returns [`TelemetryError`] when the listener cannot be bound or the
/// server fails while running.
pub async fn serve_health<F>(
    addr: SocketAddr,
    health: Arc<HealthState>,
    metrics: Arc<HubMetrics>,
    shutdown: F,
) -> TelemetryResult<()>
where
    F: Future<Output = ()>,
{
    let make_service = make_service_fn(move |_conn| {
        let health = Arc::clone(&health);
        let metrics = Arc::clone(&metrics);
        async move {
            Ok::<_, Infallible>(service_fn(move |request| {
                handle(request, Arc::clone(&health), Arc::clone(&metrics))
            }))
        }
    });

    let server = Server::try_bind(&addr)?.serve(make_service);
    info!(%addr, "health endpoint listening");
    server.with_graceful_shutdown(shutdown).await?;
    Ok(())
}

async fn handle(
    request: Request<Body>,
    health: Arc<HealthState>,
    metrics: Arc<HubMetrics>,
) -> Result<Response<Body>, Infallible> {
    let response = match (request.method(), request.uri().path()) {
        (&Method::GET, "/health") => flag_response(health.is_live()),
        (&Method::GET, "/ready") => flag_response(health.is_ready()),
        (&Method::GET, "/metrics") => {
            let mut response = Response::new(Body::from(metrics.render()));
            response.headers_mut().insert(
                CONTENT_TYPE,
                hyper::header::HeaderValue::from_static("text/plain; version=0.0.4"),
            );
            response
        }
        _ => status_only(StatusCode::NOT_FOUND),
    };
    Ok(response)
}

fn flag_response(ok: bool) -> Response<Body> {
    if ok {
        let mut response = Response::new(Body::from("ok"));
        *response.status_mut() = StatusCode::OK;
        response
    } else {
        status_only(StatusCode::SERVICE_UNAVAILABLE)
    }
}

fn status_only(status: StatusCode) -> Response<Body> {
    let mut response = Response::new(Body::empty());
    *response.status_mut() = status;
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn readiness_flips() {
        let health = Arc::new(HealthState::new());
        let metrics = Arc::new(HubMetrics::new());

        let request = Request::get("/ready").body(Body::empty()).unwrap();
        let response = handle(request, Arc::clone(&health), Arc::clone(&metrics))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

        health.set_ready(true);
        let request = Request::get("/ready").body(Body::empty()).unwrap();
        let response = handle(request, Arc::clone(&health), Arc::clone(&metrics))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn metrics_are_served_as_text() {
        let health = Arc::new(HealthState::new());
        let metrics = Arc::new(HubMetrics::new());
        metrics.record_routed();

        let request = Request::get("/metrics").body(Body::empty()).unwrap();
        let response = handle(request, health, Arc::clone(&metrics)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let bytes = hyper::body::to_bytes(response.into_body()).await.unwrap();
        let text = String::from_utf8(bytes.to_vec()).unwrap();
        assert!(text.contains("agenthub_events_routed_total 1"));
    }

    #[tokio::test]
    async fn unknown_path_is_not_found() {
        let request = Request::get("/nope").body(Body::empty()).unwrap();
        let response = handle(
            request,
            Arc::new(HealthState::new()),
            Arc::new(HubMetrics::new()),
        )
        .await
        .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
