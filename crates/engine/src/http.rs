//! The two HTTP endpoints the hook registry exposes: `POST /hooks/:token`
//! and `POST /webhooks/:token`. No other routing is in scope (SPEC_FULL §1).
//!
//! Grounded on `everruns-api/src/sessions.rs`'s `AppState`/`routes()`/
//! `#[utoipa::path]` handler shape, narrowed from a full CRUD surface to the
//! one resume operation `hooks.rs::HookResumer` already implements.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::post;
use axum::{Json, Router};

use crate::codec::{Codec, Value};
use crate::hooks::{resume_webhook, HookDelivery, HookError, HookResumer};
use crate::queue::Queue;
use crate::storage::EventStore;
use crate::views::HookView;

#[derive(Clone)]
pub struct HookState {
    pub store: Arc<dyn EventStore>,
    pub queue: Arc<dyn Queue>,
    pub codec: Arc<Codec>,
}

impl HookState {
    pub fn new(store: Arc<dyn EventStore>, queue: Arc<dyn Queue>, codec: Arc<Codec>) -> Self {
        Self { store, queue, codec }
    }

    fn resumer(&self) -> HookResumer<'_> {
        HookResumer::new(self.store.as_ref(), self.queue.as_ref(), self.codec.as_ref())
    }
}

pub fn routes(state: HookState) -> Router {
    Router::new()
        .route("/hooks/:token", post(resume_hook))
        .route("/webhooks/:token", post(resume_webhook_route))
        .with_state(state)
}

fn status_for(err: &HookError) -> StatusCode {
    match err {
        HookError::UnknownToken => StatusCode::NOT_FOUND,
        HookError::AlreadyDisposed => StatusCode::CONFLICT,
        HookError::Store(_) | HookError::Queue(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// POST /hooks/{token} - resume a suspended hook with a JSON payload,
/// converted to the codec's [`Value`] model via [`Value::from_json`].
#[utoipa::path(
    post,
    path = "/hooks/{token}",
    params(("token" = String, Path, description = "Hook token")),
    responses(
        (status = 200, description = "Hook resumed"),
        (status = 404, description = "Unknown token"),
        (status = 409, description = "Hook already disposed")
    ),
    tag = "hooks"
)]
pub async fn resume_hook(
    State(state): State<HookState>,
    Path(token): Path<String>,
    Json(payload): Json<serde_json::Value>,
) -> Result<Json<HookView>, StatusCode> {
    state
        .resumer()
        .resume(HookDelivery { token, payload: Value::from_json(payload) })
        .await
        .map(Json)
        .map_err(|e| {
            tracing::warn!(error = %e, "hook resume failed");
            status_for(&e)
        })
}

/// POST /webhooks/{token} - resume a suspended hook with a raw, codec-framed
/// request body, for external webhook senders that cannot construct a
/// [`Value`] directly.
#[utoipa::path(
    post,
    path = "/webhooks/{token}",
    params(("token" = String, Path, description = "Hook token")),
    request_body(content = String, description = "Raw codec-framed payload", content_type = "application/octet-stream"),
    responses(
        (status = 200, description = "Hook resumed"),
        (status = 404, description = "Unknown token"),
        (status = 409, description = "Hook already disposed")
    ),
    tag = "hooks"
)]
pub async fn resume_webhook_route(
    State(state): State<HookState>,
    Path(token): Path<String>,
    body: axum::body::Bytes,
) -> Result<Json<HookView>, StatusCode> {
    resume_webhook(&state.resumer(), &token, &body).await.map(Json).map_err(|e| {
        tracing::warn!(error = %e, "webhook resume failed");
        status_for(&e)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::CodecBuilder;
    use crate::event::{Event, EventKind};
    use crate::hooks::generate_token;
    use crate::ids::{CorrelationId, RunId, WorkflowName};
    use crate::queue::InMemoryQueue;
    use crate::storage::InMemoryEventStore;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    async fn seeded_state() -> (HookState, String) {
        let store = Arc::new(InMemoryEventStore::new());
        let queue = Arc::new(InMemoryQueue::new());
        let codec = Arc::new(CodecBuilder::with_defaults().build());

        let run_id = RunId::new();
        store.runs_create(run_id, WorkflowName::new("onboarding"), vec![]).await.unwrap();
        let run = store.runs_get(run_id).await.unwrap();
        let token = generate_token();
        let created = Event::new(
            run_id,
            EventKind::HookCreated,
            Some(CorrelationId::from_counter(0)),
            token.clone().into_bytes(),
        );
        store.events_create(run_id, run.next_ordinal, vec![created]).await.unwrap();

        (HookState::new(store, queue, codec), token)
    }

    #[tokio::test]
    async fn resume_hook_endpoint_returns_200_for_a_known_token() {
        let (state, token) = seeded_state().await;
        let app = routes(state);

        let body = serde_json::to_vec(&serde_json::json!("approved")).unwrap();
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri(format!("/hooks/{token}"))
                    .header("content-type", "application/json")
                    .body(Body::from(body))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn resume_hook_endpoint_returns_404_for_an_unknown_token() {
        let (state, _token) = seeded_state().await;
        let app = routes(state);

        let body = serde_json::to_vec(&serde_json::Value::Null).unwrap();
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/hooks/does-not-exist")
                    .header("content-type", "application/json")
                    .body(Body::from(body))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
