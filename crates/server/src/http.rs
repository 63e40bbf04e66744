//! HTTP Endpoints
//!
//! The carrier's voice webhook, health probes, metrics and the media
//! stream upgrade.

use axum::{
    extract::State,
    http::{header, HeaderMap, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use tower_http::compression::CompressionLayer;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use intake_config::ServerConfig;

use crate::metrics::{metrics_handler, record_request};
use crate::state::AppState;
use crate::websocket::ws_handler;

/// Create the application router
pub fn create_router(state: AppState) -> Router {
    let ws_path = state.config.server.ws_path.clone();
    let cors_enabled = state.config.server.cors_enabled;

    let mut router = Router::new()
        // Voice webhook
        .route("/", post(voice_webhook))
        // Health check
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        .route("/metrics", get(metrics_handler))
        .layer(CompressionLayer::new())
        // Media stream, left out of compression
        .route(&ws_path, get(ws_handler))
        .layer(TraceLayer::new_for_http());

    if cors_enabled {
        router = router.layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        );
    }

    router.with_state(state)
}

/// Where the carrier should open the media stream
pub fn stream_url(server: &ServerConfig, request_host: Option<&str>) -> String {
    if server.testing {
        return format!("ws://127.0.0.1:{}{}", server.port, server.ws_path);
    }
    let host = server
        .public_host
        .as_deref()
        .or(request_host)
        .unwrap_or("localhost");
    let host = host
        .trim_start_matches("https://")
        .trim_start_matches("http://")
        .trim_end_matches('/');
    format!("wss://{}{}", host, server.ws_path)
}

/// TwiML connecting the call to a bidirectional media stream
pub fn twiml(stream_url: &str, pause_secs: u32) -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<Response>
  <Connect>
    <Stream url="{}"/>
  </Connect>
  <Pause length="{}"/>
</Response>"#,
        stream_url, pause_secs
    )
}

/// `POST /` from the carrier when a call comes in
async fn voice_webhook(State(state): State<AppState>, headers: HeaderMap) -> impl IntoResponse {
    record_request("voice");
    let host = headers.get(header::HOST).and_then(|v| v.to_str().ok());
    let url = stream_url(&state.config.server, host);
    tracing::info!(stream_url = %url, "Answering incoming call");

    (
        [(header::CONTENT_TYPE, "text/xml")],
        twiml(&url, state.config.server.stream_pause_secs),
    )
}

/// Health check
async fn health_check() -> impl IntoResponse {
    record_request("health");
    Json(serde_json::json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// Readiness check; not ready while draining or at capacity
async fn readiness_check(State(state): State<AppState>) -> impl IntoResponse {
    let calls = state.sessions.count();
    let capacity = state.sessions.capacity();
    let draining = *state.shutdown.borrow();

    let (status, label) = if draining {
        (StatusCode::SERVICE_UNAVAILABLE, "draining")
    } else if calls >= capacity {
        (StatusCode::SERVICE_UNAVAILABLE, "full")
    } else {
        (StatusCode::OK, "ready")
    };

    (
        status,
        Json(serde_json::json!({
            "status": label,
            "calls": calls,
            "capacity": capacity,
        })),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use intake_config::Settings;
    use tokio::sync::watch;
    use tower::ServiceExt;

    use crate::state::build_call_deps;

    fn state(settings: Settings) -> (AppState, watch::Sender<bool>) {
        let deps = build_call_deps(&settings).unwrap();
        let (tx, rx) = watch::channel(false);
        (AppState::new(settings, deps, rx), tx)
    }

    #[test]
    fn test_router_creation() {
        let (state, _tx) = state(Settings::default());
        let _ = create_router(state);
    }

    #[test]
    fn test_stream_url() {
        let mut server = ServerConfig::default();
        assert_eq!(
            stream_url(&server, Some("abc.ngrok.io")),
            "wss://abc.ngrok.io/ws"
        );

        server.public_host = Some("https://intake.example.com/".to_string());
        assert_eq!(
            stream_url(&server, Some("abc.ngrok.io")),
            "wss://intake.example.com/ws"
        );

        server.testing = true;
        assert_eq!(stream_url(&server, None), "ws://127.0.0.1:8765/ws");
    }

    #[test]
    fn test_twiml_shape() {
        let xml = twiml("wss://intake.example.com/ws", 40);
        assert!(xml.contains(r#"<Stream url="wss://intake.example.com/ws"/>"#));
        assert!(xml.contains("<Connect>"));
        assert!(xml.contains(r#"<Pause length="40"/>"#));
    }

    #[tokio::test]
    async fn test_webhook_returns_twiml() {
        let (state, _tx) = state(Settings::default());
        let app = create_router(state);

        let response = app
            .oneshot(
                Request::post("/")
                    .header(header::HOST, "abc.ngrok.io")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_TYPE], "text/xml");
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = String::from_utf8(body.to_vec()).unwrap();
        assert!(body.contains("wss://abc.ngrok.io/ws"));
    }

    #[tokio::test]
    async fn test_readiness_reports_draining() {
        let (state, tx) = state(Settings::default());
        let app = create_router(state);

        let ready = app
            .clone()
            .oneshot(Request::get("/ready").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(ready.status(), StatusCode::OK);

        tx.send(true).unwrap();
        let draining = app
            .oneshot(Request::get("/ready").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(draining.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_health() {
        let (state, _tx) = state(Settings::default());
        let response = create_router(state)
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
