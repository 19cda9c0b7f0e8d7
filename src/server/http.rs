//! HTTP handlers

use axum::{
    extract::{ConnectInfo, Query, State},
    http::{Extensions, StatusCode},
    response::IntoResponse,
    Json,
};
use regex::Regex;
use serde::Deserialize;
use std::net::SocketAddr;
use std::sync::{Arc, LazyLock};
use tracing::warn;

use crate::engine::Engine;
use crate::health::HealthReport;
use crate::memory::EventKind;
use crate::server::ServerState;

/// Control characters and angle brackets never reach the engine.
static UNSAFE_CHARS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[\x00-\x1f\x7f<>]").expect("valid regex"));

/// Strip characters that could break logs or markup.
pub fn sanitize(input: &str) -> String {
    UNSAFE_CHARS.replace_all(input, "").into_owned()
}

/// Client address, or "unknown" when the server was built without
/// connect info (as in tests).
fn client_ip(extensions: &Extensions) -> String {
    extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

/// Query for `GET /chat`
#[derive(Debug, Deserialize)]
pub struct ChatQuery {
    #[serde(default)]
    pub msg: String,
}

/// `GET /chat?msg=...`
pub async fn chat_query_handler(
    State(state): State<ServerState>,
    extensions: Extensions,
    Query(query): Query<ChatQuery>,
) -> impl IntoResponse {
    reply(state.engine, &client_ip(&extensions), &query.msg).await
}

/// `POST /chat` with the message as the raw body
pub async fn chat_body_handler(
    State(state): State<ServerState>,
    extensions: Extensions,
    body: String,
) -> impl IntoResponse {
    reply(state.engine, &client_ip(&extensions), &body).await
}

/// `GET /health`
pub async fn health_handler(
    State(state): State<ServerState>,
    extensions: Extensions,
) -> impl IntoResponse {
    let engine = state.engine;
    let ip = client_ip(&extensions);
    let collect = move || {
        engine.record_event(EventKind::Health, &ip);
        HealthReport::collect(&engine)
    };
    match tokio::task::spawn_blocking(collect).await {
        Ok(report) => (StatusCode::OK, Json(report)).into_response(),
        Err(e) => {
            warn!("Health task failed: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

async fn reply(engine: Arc<Engine>, ip: &str, raw: &str) -> impl IntoResponse {
    let message = sanitize(raw);
    let reply = engine.chat(&message).await;
    engine.record_event(EventKind::Chat, ip);
    (
        StatusCode::OK,
        [("content-type", "text/plain; charset=utf-8")],
        reply.to_string(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, Layout};
    use crate::corpus::StaticCorpus;
    use crate::server::router;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    fn state(dir: &tempfile::TempDir) -> ServerState {
        let config = Config::default();
        let layout = Layout::new(dir.path(), &config.paths);
        let engine = Engine::open(config, layout)
            .unwrap()
            .with_corpus(Box::new(StaticCorpus("abcabcabc".into())))
            .with_seed(3);
        ServerState {
            engine: Arc::new(engine),
        }
    }

    async fn body_string(response: axum::response::Response) -> String {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    async fn settle(engine: &Engine) {
        while engine.change_check_in_flight() {
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
    }

    #[test]
    fn test_sanitize() {
        assert_eq!(sanitize("<b>hi</b>\n\tthere"), "bhi/bthere");
        assert_eq!(sanitize("plain words"), "plain words");
    }

    #[tokio::test]
    async fn test_get_chat_replies() {
        let dir = tempfile::tempdir().unwrap();
        let app = router(state(&dir));

        let response = app
            .oneshot(Request::get("/chat?msg=a").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_string(response).await;
        assert!(body.starts_with('a'));
    }

    #[tokio::test]
    async fn test_post_chat_is_sanitized() {
        let dir = tempfile::tempdir().unwrap();
        let state = state(&dir);
        let engine = Arc::clone(&state.engine);
        let app = router(state);

        let response = app
            .oneshot(
                Request::post("/chat")
                    .body(Body::from("<script>b</script>"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let log = engine.interactions().read_all();
        assert!(log.contains("USER:scriptb/script AI:"));
    }

    #[tokio::test]
    async fn test_blocked_message() {
        let dir = tempfile::tempdir().unwrap();
        let app = router(state(&dir));

        let response = app
            .oneshot(Request::get("/chat?msg=hate").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(body_string(response).await, crate::types::BLOCKED_TEXT);
    }

    #[tokio::test]
    async fn test_requests_are_recorded_as_events() {
        let dir = tempfile::tempdir().unwrap();
        let state = state(&dir);
        let engine = Arc::clone(&state.engine);
        let app = router(state);

        for uri in ["/chat?msg=a", "/health", "/chat?msg=b"] {
            let response = app
                .clone()
                .oneshot(Request::get(uri).body(Body::empty()).unwrap())
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::OK);
        }

        assert_eq!(engine.events().count(EventKind::Chat).unwrap(), 2);
        assert_eq!(engine.events().count(EventKind::Health).unwrap(), 1);
        let recent = engine.events().recent(1).unwrap();
        assert_eq!(recent[0].kind, "chat");
        assert_eq!(recent[0].ip, "unknown");
        settle(&engine).await;
    }

    #[tokio::test]
    async fn test_health_reports_alive() {
        let dir = tempfile::tempdir().unwrap();
        let app = router(state(&dir));

        let response = app
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json: serde_json::Value = serde_json::from_str(&body_string(response).await).unwrap();
        assert_eq!(json["status"], "alive");
    }
}
