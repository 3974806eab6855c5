//! Cross-cutting HTTP layers.
use crate::metrics::Metrics;
use axum::middleware::Next;
use axum::{body::Body, extract::State, http::Request, response::Response};
use std::sync::Arc;
use tower_http::cors::CorsLayer;

pub fn cors() -> CorsLayer {
    CorsLayer::permissive()
}

/// Counts every response by method and status code.
pub async fn track_requests(
    State(metrics): State<Arc<Metrics>>,
    req: Request<Body>,
    next: Next,
) -> Response {
    let method = req.method().as_str().to_string();
    let response = next.run(req).await;
    metrics.record_request(&method, response.status().as_u16());
    response
}
