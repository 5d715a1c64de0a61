//! HTTP surface: the per-bot webhook endpoint and a health probe.

use std::sync::Arc;
use std::time::Instant;

use axum::Router;
use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use tracing::{debug, warn};

use cg_telegram::{Update, UpdateDispatcher};

use crate::registry::BotDirectory;
use crate::secret::{SecretCheck, SecretPolicy};

/// Header Telegram echoes the configured webhook secret back in.
const SECRET_HEADER: &str = "x-telegram-bot-api-secret-token";

#[derive(Clone)]
pub struct AppState {
    pub dispatcher: Arc<dyn UpdateDispatcher>,
    pub secret: Arc<SecretPolicy>,
    pub directory: Arc<dyn BotDirectory>,
    pub started_at: Instant,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/webhook/{bot_id}", post(webhook_ingest))
        .route("/api/v1/health", get(get_health))
        .with_state(state)
}

/// Webhook push ingestion.
///
/// Once the body parses and the secret checks out, the answer is
/// `200 {"ok": true}` no matter what dispatch did: Telegram redelivers on
/// any non-2xx, so surfacing an internal failure here would only buy a
/// redelivery storm. Failures stay in the logs.
async fn webhook_ingest(
    State(state): State<AppState>,
    Path(bot_id): Path<i64>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let update: Update = match serde_json::from_slice(&body) {
        Ok(update) => update,
        Err(error) => {
            debug!(bot_id, %error, "malformed webhook body rejected");
            return (
                StatusCode::BAD_REQUEST,
                Json(serde_json::json!({
                    "ok": false,
                    "error": format!("invalid update payload: {error}"),
                })),
            )
                .into_response();
        }
    };

    let provided = headers
        .get(SECRET_HEADER)
        .and_then(|value| value.to_str().ok());
    if state.secret.check(provided) == SecretCheck::Rejected {
        warn!(bot_id, update_id = update.update_id, "webhook secret mismatch");
        return (
            StatusCode::FORBIDDEN,
            Json(serde_json::json!({
                "ok": false,
                "error": "invalid secret token",
            })),
        )
            .into_response();
    }

    let update_id = update.update_id;
    let outcome = state.dispatcher.dispatch(bot_id, update).await;
    debug!(bot_id, update_id, ?outcome, "webhook update dispatched");

    (StatusCode::OK, Json(serde_json::json!({ "ok": true }))).into_response()
}

async fn get_health(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "uptime_seconds": state.started_at.elapsed().as_secs(),
        "bots": {
            "registered": state.directory.all().len(),
            "active": state.directory.active().len(),
        },
        "webhook_secret_mode": if state.secret.is_open() { "open" } else { "required" },
    }))
}

#[cfg(test)]
mod tests {
    use super::{AppState, SECRET_HEADER, router};
    use crate::registry::{BotRegistration, StaticBotDirectory};
    use crate::secret::SecretPolicy;
    use async_trait::async_trait;
    use axum::body::{Body, to_bytes};
    use axum::http::{Request, StatusCode};
    use cg_telegram::{DispatchOutcome, Update, UpdateDispatcher};
    use std::sync::{Arc, Mutex};
    use std::time::Instant;
    use tower::util::ServiceExt;

    struct StubDispatcher {
        outcome: DispatchOutcome,
        calls: Mutex<Vec<(i64, i64)>>,
    }

    impl StubDispatcher {
        fn new(outcome: DispatchOutcome) -> Arc<Self> {
            Arc::new(Self {
                outcome,
                calls: Mutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> Vec<(i64, i64)> {
            self.calls.lock().expect("calls lock").clone()
        }
    }

    #[async_trait]
    impl UpdateDispatcher for StubDispatcher {
        async fn dispatch(&self, bot_id: i64, update: Update) -> DispatchOutcome {
            self.calls
                .lock()
                .expect("calls lock")
                .push((bot_id, update.update_id));
            self.outcome
        }
    }

    fn state(dispatcher: Arc<StubDispatcher>, secret: Option<&str>) -> AppState {
        let bots = vec![BotRegistration {
            id: 12,
            name: "Coach Dana".to_string(),
            username: "dana_bot".to_string(),
            token: "12:token".to_string(),
            active: true,
            coach_id: 7,
        }];
        AppState {
            dispatcher,
            secret: Arc::new(SecretPolicy::new(secret.map(str::to_string))),
            directory: Arc::new(StaticBotDirectory::new(bots).expect("directory builds")),
            started_at: Instant::now(),
        }
    }

    fn update_body() -> String {
        serde_json::json!({
            "update_id": 42,
            "message": {
                "message_id": 1,
                "chat": {"id": 5, "type": "private"},
                "text": "lunch"
            }
        })
        .to_string()
    }

    fn webhook_request(secret: Option<&str>, body: &str) -> Request<Body> {
        let mut builder = Request::builder()
            .method("POST")
            .uri("/webhook/12")
            .header("content-type", "application/json");
        if let Some(secret) = secret {
            builder = builder.header(SECRET_HEADER, secret);
        }
        builder.body(Body::from(body.to_string())).expect("request")
    }

    async fn response_body_json(response: axum::response::Response) -> serde_json::Value {
        let body = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("read body");
        serde_json::from_slice(&body).expect("body is json")
    }

    #[tokio::test]
    async fn malformed_body_returns_400_and_never_dispatches() {
        let dispatcher = StubDispatcher::new(DispatchOutcome::Handled);
        let app = router(state(dispatcher.clone(), Some("hook-secret")));

        let response = app
            .oneshot(webhook_request(Some("hook-secret"), "{not json"))
            .await
            .expect("response");

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = response_body_json(response).await;
        assert_eq!(body["ok"], false);
        assert!(dispatcher.calls().is_empty());
    }

    #[tokio::test]
    async fn wrong_or_missing_secret_returns_403_and_never_dispatches() {
        let dispatcher = StubDispatcher::new(DispatchOutcome::Handled);
        let app = router(state(dispatcher.clone(), Some("hook-secret")));

        let response = app
            .clone()
            .oneshot(webhook_request(Some("wrong"), &update_body()))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::FORBIDDEN);

        let response = app
            .oneshot(webhook_request(None, &update_body()))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::FORBIDDEN);

        assert!(dispatcher.calls().is_empty());
    }

    #[tokio::test]
    async fn authenticated_update_dispatches_and_acks() {
        let dispatcher = StubDispatcher::new(DispatchOutcome::Handled);
        let app = router(state(dispatcher.clone(), Some("hook-secret")));

        let response = app
            .oneshot(webhook_request(Some("hook-secret"), &update_body()))
            .await
            .expect("response");

        assert_eq!(response.status(), StatusCode::OK);
        let body = response_body_json(response).await;
        assert_eq!(body["ok"], true);
        assert_eq!(dispatcher.calls(), vec![(12, 42)]);
    }

    #[tokio::test]
    async fn dispatch_failure_is_still_acknowledged_with_200() {
        let dispatcher = StubDispatcher::new(DispatchOutcome::Failed);
        let app = router(state(dispatcher.clone(), Some("hook-secret")));

        let response = app
            .oneshot(webhook_request(Some("hook-secret"), &update_body()))
            .await
            .expect("response");

        assert_eq!(response.status(), StatusCode::OK);
        let body = response_body_json(response).await;
        assert_eq!(body["ok"], true);
        assert_eq!(dispatcher.calls().len(), 1);
    }

    #[tokio::test]
    async fn open_mode_accepts_updates_without_a_secret_header() {
        let dispatcher = StubDispatcher::new(DispatchOutcome::Handled);
        let app = router(state(dispatcher.clone(), None));

        let response = app
            .oneshot(webhook_request(None, &update_body()))
            .await
            .expect("response");

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(dispatcher.calls().len(), 1);
    }

    #[tokio::test]
    async fn health_reports_bot_counts_and_secret_mode() {
        let dispatcher = StubDispatcher::new(DispatchOutcome::Handled);
        let app = router(state(dispatcher, Some("hook-secret")));

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api/v1/health")
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("response");

        assert_eq!(response.status(), StatusCode::OK);
        let body = response_body_json(response).await;
        assert_eq!(body["status"], "ok");
        assert_eq!(body["bots"]["registered"], 1);
        assert_eq!(body["bots"]["active"], 1);
        assert_eq!(body["webhook_secret_mode"], "required");
    }
}
