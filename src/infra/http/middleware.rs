use std::time::Instant;

use axum::{
    body::Body,
    extract::MatchedPath,
    http::{HeaderValue, Request, header::CONTENT_LENGTH},
    middleware::Next,
    response::Response,
};
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::application::error::ErrorReport;

pub const REQUEST_ID_HEADER: &str = "x-request-id";

const MAX_REQUEST_ID_LEN: usize = 128;

#[derive(Clone)]
pub struct RequestContext {
    pub request_id: String,
}

/// Adopt the caller's `x-request-id` when it is usable, otherwise mint one,
/// and echo it on the response.
pub async fn set_request_context(mut request: Request<Body>, next: Next) -> Response {
    let request_id = request
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty() && value.len() <= MAX_REQUEST_ID_LEN)
        .map(str::to_string)
        .unwrap_or_else(|| Uuid::new_v4().to_string());
    let ctx = RequestContext {
        request_id: request_id.clone(),
    };
    request.extensions_mut().insert(ctx.clone());

    let mut response = next.run(request).await;
    if let Ok(value) = HeaderValue::from_str(&request_id) {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }
    response.extensions_mut().insert(ctx);
    response
}

pub async fn log_responses(request: Request<Body>, next: Next) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    // Route template keeps task ids out of metric labels.
    let route = request
        .extensions()
        .get::<MatchedPath>()
        .map(|matched| matched.as_str().to_string())
        .unwrap_or_else(|| "unmatched".to_string());
    let body_bytes = request
        .headers()
        .get(CONTENT_LENGTH)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.parse::<u64>().ok());
    let request_id = request
        .extensions()
        .get::<RequestContext>()
        .map(|ctx| ctx.request_id.clone())
        .unwrap_or_default();
    let start = Instant::now();

    debug!(
        target = "imgproc::http::request",
        method = %method,
        route = %route,
        body_bytes,
        request_id = %request_id,
        "request started"
    );

    let mut response = next.run(request).await;
    let status = response.status();
    let elapsed_ms = start.elapsed().as_millis() as u64;

    metrics::counter!(
        "imgproc_http_requests_total",
        "method" => method.to_string(),
        "route" => route.clone(),
        "class" => status_class(status.as_u16())
    )
    .increment(1);

    if !(status.is_client_error() || status.is_server_error()) {
        debug!(
            target = "imgproc::http::response",
            status = status.as_u16(),
            method = %method,
            path = %path,
            elapsed_ms,
            request_id = %request_id,
            "request completed"
        );
        return response;
    }

    let (source, chain) = match response.extensions_mut().remove::<ErrorReport>() {
        Some(report) => (report.source, report.messages),
        None => ("unknown", Vec::new()),
    };
    let detail = chain
        .first()
        .map(String::as_str)
        .unwrap_or("no diagnostic available");

    if status.is_server_error() {
        error!(
            target = "imgproc::http::response",
            status = status.as_u16(),
            method = %method,
            path = %path,
            elapsed_ms,
            source,
            detail,
            chain = ?chain,
            request_id = %request_id,
            "request failed"
        );
    } else {
        warn!(
            target = "imgproc::http::response",
            status = status.as_u16(),
            method = %method,
            path = %path,
            elapsed_ms,
            source,
            detail,
            request_id = %request_id,
            "request rejected"
        );
    }

    response
}

fn status_class(status: u16) -> &'static str {
    match status {
        100..=199 => "1xx",
        200..=299 => "2xx",
        300..=399 => "3xx",
        400..=499 => "4xx",
        _ => "5xx",
    }
}

#[cfg(test)]
mod tests {
    use axum::{Router, middleware, routing::get};
    use tower::ServiceExt;

    use super::*;

    fn app() -> Router {
        Router::new()
            .route("/ping", get(|| async { "pong" }))
            .layer(middleware::from_fn(log_responses))
            .layer(middleware::from_fn(set_request_context))
    }

    #[tokio::test]
    async fn echoes_caller_request_id() {
        let response = app()
            .oneshot(
                Request::builder()
                    .uri("/ping")
                    .header(REQUEST_ID_HEADER, "upload-42")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.headers()[REQUEST_ID_HEADER], "upload-42");
    }

    #[tokio::test]
    async fn mints_request_id_when_missing_or_blank() {
        for supplied in [None, Some("   ")] {
            let mut builder = Request::builder().uri("/ping");
            if let Some(value) = supplied {
                builder = builder.header(REQUEST_ID_HEADER, value);
            }
            let response = app()
                .oneshot(builder.body(Body::empty()).unwrap())
                .await
                .unwrap();

            let id = response.headers()[REQUEST_ID_HEADER].to_str().unwrap();
            assert!(Uuid::parse_str(id).is_ok(), "{id}");
        }
    }

    #[test]
    fn groups_statuses_by_class() {
        assert_eq!(status_class(204), "2xx");
        assert_eq!(status_class(413), "4xx");
        assert_eq!(status_class(503), "5xx");
    }
}
