//! REST + SSE API server
//!
//! `POST /api/advice` answers over a server-sent event stream. Validation
//! happens before anything is spawned, so a bad request never opens a
//! session or starts a heartbeat.

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::{header, HeaderValue, StatusCode},
    response::{
        sse::{Event, Sse},
        IntoResponse, Response,
    },
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};
use uuid::Uuid;

use crate::agent::Orchestrator;
use crate::config::AdvisorConfig;
use crate::models::AdviceRequest;
use crate::session::{SessionChannel, SessionEvent};

/// =============================
/// Response Wrapper
/// =============================

#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub timestamp: String,
}

impl ApiResponse {
    pub fn success<T: Serialize>(data: T) -> Self {
        Self {
            success: true,
            data: serde_json::to_value(data).ok(),
            error: None,
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message.into()),
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}

/// =============================
/// API State
/// =============================

#[derive(Clone)]
pub struct ApiState {
    pub orchestrator: Arc<Orchestrator>,
    pub config: Arc<AdvisorConfig>,
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

/// =============================
/// Advice Endpoint
/// =============================

async fn advise(
    State(state): State<ApiState>,
    payload: Result<Json<AdviceRequest>, JsonRejection>,
) -> Response {
    let request = match payload {
        Ok(Json(request)) => request,
        Err(rejection) => {
            warn!(error = %rejection, "Rejected advice request body");
            return (
                StatusCode::BAD_REQUEST,
                Json(ApiResponse::error("Request body must be JSON with question and accountId")),
            )
                .into_response();
        }
    };

    if let Err(e) = request.validate() {
        return (
            StatusCode::BAD_REQUEST,
            Json(ApiResponse::error(e.client_message())),
        )
            .into_response();
    }

    info!(
        account_id = %request.account_id,
        question_len = request.question.len(),
        "Received advice request"
    );

    let (tx, rx) = mpsc::channel(state.config.channel_capacity.max(1));
    let channel = SessionChannel::open(tx, CancellationToken::new(), state.config.heartbeat_interval);

    let orchestrator = state.orchestrator.clone();
    tokio::spawn(async move {
        orchestrator.run(request, channel).await;
    });

    let events = futures::stream::unfold(rx, |mut rx| async move {
        let event = rx.recv().await?;
        Some((to_sse_event(&event), rx))
    });

    let mut response = Sse::new(events).into_response();
    let headers = response.headers_mut();
    headers.insert(
        header::CACHE_CONTROL,
        HeaderValue::from_static("no-cache, no-transform"),
    );
    headers.insert("x-accel-buffering", HeaderValue::from_static("no"));
    response
}

fn to_sse_event(event: &SessionEvent) -> Result<Event, axum::Error> {
    match event {
        SessionEvent::KeepAlive => Ok(Event::default().comment("keep-alive")),
        other => Event::default().json_data(other),
    }
}

/// =============================
/// Run Ledger Endpoint
/// =============================

async fn get_run(
    State(state): State<ApiState>,
    Path(run_id): Path<Uuid>,
) -> (StatusCode, Json<ApiResponse>) {
    match state.orchestrator.run_log().get(run_id).await {
        Some(record) => (StatusCode::OK, Json(ApiResponse::success(record))),
        None => (
            StatusCode::NOT_FOUND,
            Json(ApiResponse::error(format!("No run with id {}", run_id))),
        ),
    }
}

pub fn create_router(state: ApiState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/advice", post(advise))
        .route("/api/runs/:run_id", get(get_run))
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

pub async fn start_server(
    state: ApiState,
    port: u16,
) -> std::result::Result<(), Box<dyn std::error::Error>> {
    let router = create_router(state);

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", port)).await?;

    info!("API Server listening on http://0.0.0.0:{}", port);

    axum::serve(listener, router).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::RunLog;
    use crate::llm::ScriptedCompletionClient;
    use crate::snapshot::InMemorySnapshotProvider;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    async fn app() -> Router {
        let config = AdvisorConfig::default();
        let orchestrator = Orchestrator::new(
            Arc::new(InMemorySnapshotProvider::with_demo_account().await),
            Arc::new(ScriptedCompletionClient::new()),
            &config.policy,
            Arc::new(RunLog::new()),
        );

        create_router(ApiState {
            orchestrator: Arc::new(orchestrator),
            config: Arc::new(config),
        })
    }

    fn post_advice(body: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/api/advice")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn body_text(response: Response) -> String {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn test_blank_question_is_rejected() {
        let response = app()
            .await
            .oneshot(post_advice(r#"{"question":"  ","accountId":"demo"}"#))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body: serde_json::Value = serde_json::from_str(&body_text(response).await).unwrap();
        assert_eq!(body["success"], false);
        assert!(body["error"].as_str().unwrap().contains("question"));
    }

    #[tokio::test]
    async fn test_malformed_body_is_rejected() {
        let response = app().await.oneshot(post_advice("not json")).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_advice_streams_until_completion() {
        let app = app().await;
        let response = app
            .clone()
            .oneshot(post_advice(
                r#"{"question":"Should I pay down my card?","accountId":"demo"}"#,
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            "text/event-stream"
        );
        assert_eq!(
            response.headers()[header::CACHE_CONTROL],
            "no-cache, no-transform"
        );
        assert_eq!(response.headers()["x-accel-buffering"], "no");

        let body = body_text(response).await;
        let events: Vec<serde_json::Value> = body
            .lines()
            .filter_map(|line| line.strip_prefix("data: "))
            .map(|data| serde_json::from_str(data).unwrap())
            .collect();

        assert_eq!(events.first().unwrap()["type"], "status");
        let last = events.last().unwrap();
        assert_eq!(last["type"], "complete");
        assert_eq!(last["done"], true);

        let run_id = last["run_id"].as_str().unwrap();
        let response = app
            .oneshot(
                Request::builder()
                    .uri(format!("/api/runs/{}", run_id))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let record: serde_json::Value = serde_json::from_str(&body_text(response).await).unwrap();
        assert_eq!(record["data"]["terminalState"], "done");
    }

    #[tokio::test]
    async fn test_unknown_run_is_not_found() {
        let response = app()
            .await
            .oneshot(
                Request::builder()
                    .uri(format!("/api/runs/{}", Uuid::new_v4()))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_health() {
        let response = app()
            .await
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
