use std::sync::Arc;

use anyhow::{Context, Result};
use axum::body::Bytes;
use axum::extract::rejection::BytesRejection;
use axum::extract::{DefaultBodyLimit, State};
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use smile_contracts::TransformResponse;
use tokio::net::TcpListener;
use tower_http::set_header::SetResponseHeaderLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::config::ServerConfig;
use crate::providers::ImageProvider;
use crate::relay::Relay;
use crate::transport::Transport;

pub const TRANSFORM_ROUTE: &str = "/transform-teeth";
pub const HEALTH_ROUTE: &str = "/health";

const ALLOW_HEADERS: &str = "authorization, x-client-info, apikey, content-type";
const ALLOW_METHODS: &str = "POST, OPTIONS";
const MAX_AGE: &str = "86400";

/// HTTP surface of the relay. Every response carries the permissive CORS
/// headers, including errors and rejections.
pub fn router<P, T>(relay: Arc<Relay<P, T>>, max_body_bytes: usize) -> Router
where
    P: ImageProvider + 'static,
    T: Transport + 'static,
{
    Router::new()
        .route(
            TRANSFORM_ROUTE,
            post(transform_teeth::<P, T>).options(preflight),
        )
        .route(HEALTH_ROUTE, get(health::<P, T>))
        .layer(DefaultBodyLimit::max(max_body_bytes))
        .layer(SetResponseHeaderLayer::overriding(
            header::ACCESS_CONTROL_ALLOW_ORIGIN,
            HeaderValue::from_static("*"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            header::ACCESS_CONTROL_ALLOW_HEADERS,
            HeaderValue::from_static(ALLOW_HEADERS),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            header::ACCESS_CONTROL_ALLOW_METHODS,
            HeaderValue::from_static(ALLOW_METHODS),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            header::ACCESS_CONTROL_MAX_AGE,
            HeaderValue::from_static(MAX_AGE),
        ))
        .layer(TraceLayer::new_for_http())
        .with_state(relay)
}

pub async fn serve<P, T>(relay: Arc<Relay<P, T>>, config: &ServerConfig) -> Result<()>
where
    P: ImageProvider + 'static,
    T: Transport + 'static,
{
    let provider = relay.provider().name().to_string();
    let listener = TcpListener::bind(&config.bind)
        .await
        .with_context(|| format!("failed to bind {}", config.bind))?;
    let addr = listener.local_addr().context("listener has no local address")?;
    info!(
        %addr,
        provider = %provider,
        max_body_bytes = config.max_body_bytes,
        "smile relay listening"
    );

    axum::serve(listener, router(relay, config.max_body_bytes))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("relay server failed")
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(error = %err, "ctrl-c handler unavailable; running until killed");
        std::future::pending::<()>().await;
    }
    info!("shutdown requested");
}

async fn transform_teeth<P, T>(
    State(relay): State<Arc<Relay<P, T>>>,
    body: Result<Bytes, BytesRejection>,
) -> Response
where
    P: ImageProvider + 'static,
    T: Transport + 'static,
{
    let body = match body {
        Ok(body) => body,
        Err(rejection) => {
            let message = rejection.body_text();
            warn!(code = "invalid_input", "{message}");
            return envelope(TransformResponse::failure(message));
        }
    };

    let response = match tokio::task::spawn_blocking(move || relay.handle_body(&body)).await {
        Ok(response) => response,
        Err(err) => {
            error!(error = %err, "transform worker did not complete");
            TransformResponse::failure("Transform worker failed")
        }
    };
    envelope(response)
}

async fn preflight() -> StatusCode {
    StatusCode::OK
}

async fn health<P, T>(State(relay): State<Arc<Relay<P, T>>>) -> Json<Value>
where
    P: ImageProvider + 'static,
    T: Transport + 'static,
{
    Json(json!({
        "status": "ok",
        "provider": relay.provider().name(),
    }))
}

fn envelope(response: TransformResponse) -> Response {
    let status =
        StatusCode::from_u16(response.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, Json(response)).into_response()
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use axum::body::{to_bytes, Body};
    use axum::http::{Method, Request};
    use tower::ServiceExt;

    use super::*;
    use crate::config::ApiKey;
    use crate::providers::GeminiProvider;
    use crate::transport::{InboundResponse, OutboundRequest};

    struct CountingTransport {
        calls: AtomicUsize,
        reply: InboundResponse,
    }

    impl Transport for CountingTransport {
        fn send(&self, _request: &OutboundRequest) -> anyhow::Result<InboundResponse> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.reply.clone())
        }
    }

    fn relay_replying(
        reply: InboundResponse,
        api_key: Option<ApiKey>,
    ) -> Arc<Relay<GeminiProvider, CountingTransport>> {
        Arc::new(Relay::new(
            GeminiProvider::default(),
            CountingTransport {
                calls: AtomicUsize::new(0),
                reply,
            },
            api_key,
        ))
    }

    fn post_json(body: impl Into<Body>) -> anyhow::Result<Request<Body>> {
        Ok(Request::builder()
            .method(Method::POST)
            .uri(TRANSFORM_ROUTE)
            .header(header::CONTENT_TYPE, "application/json")
            .body(body.into())?)
    }

    async fn read_json(response: Response) -> anyhow::Result<Value> {
        let bytes = to_bytes(response.into_body(), usize::MAX).await?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    fn assert_cors(response: &Response) {
        let headers = response.headers();
        assert_eq!(headers[header::ACCESS_CONTROL_ALLOW_ORIGIN], "*");
        assert_eq!(headers[header::ACCESS_CONTROL_ALLOW_HEADERS], ALLOW_HEADERS);
        assert_eq!(headers[header::ACCESS_CONTROL_ALLOW_METHODS], ALLOW_METHODS);
        assert_eq!(headers[header::ACCESS_CONTROL_MAX_AGE], MAX_AGE);
    }

    #[tokio::test]
    async fn preflight_is_empty_with_cors_headers() -> anyhow::Result<()> {
        let relay = relay_replying(InboundResponse::new(200, "{}"), ApiKey::new("k"));
        let response = router(relay.clone(), 1024)
            .oneshot(
                Request::builder()
                    .method(Method::OPTIONS)
                    .uri(TRANSFORM_ROUTE)
                    .body(Body::empty())?,
            )
            .await?;

        assert_eq!(response.status(), StatusCode::OK);
        assert_cors(&response);
        let bytes = to_bytes(response.into_body(), usize::MAX).await?;
        assert!(bytes.is_empty());
        assert_eq!(relay.transport().calls.load(Ordering::SeqCst), 0);
        Ok(())
    }

    #[tokio::test]
    async fn success_envelope_is_200() -> anyhow::Result<()> {
        let reply = json!({
            "candidates": [{ "content": { "parts": [
                { "inlineData": { "mimeType": "image/png", "data": "WFla" } }
            ] } }]
        });
        let relay = relay_replying(
            InboundResponse::new(200, reply.to_string()),
            ApiKey::new("k"),
        );
        let response = router(relay, 1024)
            .oneshot(post_json(
                json!({ "imageData": "data:image/png;base64,QUJDRA==" }).to_string(),
            )?)
            .await?;

        assert_eq!(response.status(), StatusCode::OK);
        assert_cors(&response);
        let body = read_json(response).await?;
        assert_eq!(
            body,
            json!({ "success": true, "imageData": "data:image/png;base64,WFla" })
        );
        Ok(())
    }

    #[tokio::test]
    async fn rate_limit_envelope_is_429() -> anyhow::Result<()> {
        let relay = relay_replying(InboundResponse::new(429, "quota"), ApiKey::new("k"));
        let response = router(relay, 1024)
            .oneshot(post_json(
                json!({ "imageData": "data:image/png;base64,QUJDRA==" }).to_string(),
            )?)
            .await?;

        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_cors(&response);
        let body = read_json(response).await?;
        assert_eq!(
            body,
            json!({
                "success": false,
                "error": "Rate limited by Gemini API",
                "retryDelay": "60s",
                "details": "quota",
            })
        );
        Ok(())
    }

    #[tokio::test]
    async fn missing_key_is_500_without_leaking_anything() -> anyhow::Result<()> {
        let relay = relay_replying(InboundResponse::new(200, "{}"), None);
        let response = router(relay.clone(), 1024)
            .oneshot(post_json(
                json!({ "imageData": "data:image/png;base64,QUJDRA==" }).to_string(),
            )?)
            .await?;

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_cors(&response);
        let body = read_json(response).await?;
        assert_eq!(
            body,
            json!({ "success": false, "error": "GEMINI_API_KEY not configured" })
        );
        assert_eq!(relay.transport().calls.load(Ordering::SeqCst), 0);
        Ok(())
    }

    #[tokio::test]
    async fn malformed_and_oversized_bodies_are_failures() -> anyhow::Result<()> {
        let relay = relay_replying(InboundResponse::new(200, "{}"), ApiKey::new("k"));

        let response = router(relay.clone(), 1024)
            .oneshot(post_json("{not json")?)
            .await?;
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(read_json(response).await?["success"], json!(false));

        let response = router(relay.clone(), 16)
            .oneshot(post_json(vec![b'x'; 1024])?)
            .await?;
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_cors(&response);
        assert_eq!(read_json(response).await?["success"], json!(false));

        assert_eq!(relay.transport().calls.load(Ordering::SeqCst), 0);
        Ok(())
    }

    #[tokio::test]
    async fn health_reports_provider() -> anyhow::Result<()> {
        let relay = relay_replying(InboundResponse::new(200, "{}"), None);
        let response = router(relay, 1024)
            .oneshot(
                Request::builder()
                    .uri(HEALTH_ROUTE)
                    .body(Body::empty())?,
            )
            .await?;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            read_json(response).await?,
            json!({ "status": "ok", "provider": "gemini" })
        );
        Ok(())
    }
}
