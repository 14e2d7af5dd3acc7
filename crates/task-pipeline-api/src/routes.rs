use crate::error::ApiError;
use axum::{
    extract::{Path, State},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;
use task_pipeline_client::{Producer, StatusReport, StatusReporter, Submission};
use task_pipeline_core::keys::is_task_key;
use task_pipeline_core::{BrokerStatus, ResultStore, ResultStoreExt, Task, TaskResult};
use tower_http::trace::TraceLayer;
use tracing::error;

/// Shared handler state
#[derive(Clone)]
pub struct AppState {
    pub producer: Producer,
    pub reporter: StatusReporter,
    pub store: Arc<dyn ResultStore>,
}

impl AppState {
    pub fn new(producer: Producer, store: Arc<dyn ResultStore>) -> Self {
        let reporter = StatusReporter::new(store.clone(), producer.broker().cloned());
        AppState {
            producer,
            reporter,
            store,
        }
    }
}

/// REST API routes
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/task", post(submit_task))
        .route("/stats", get(get_stats))
        .route("/results/:key", get(get_result))
        .route("/health", get(health_check))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Debug, Deserialize)]
struct SubmitTaskRequest {
    payload: Map<String, Value>,
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    broker: BrokerStatus,
}

/// Enqueue a task
async fn submit_task(
    State(state): State<AppState>,
    Json(req): Json<SubmitTaskRequest>,
) -> Result<Json<Submission>, ApiError> {
    let task = Task::new(Value::Object(req.payload));

    let submission = state.producer.submit(task).await.map_err(|e| {
        error!("Failed to enqueue task: {}", e);
        ApiError::from(e)
    })?;

    Ok(Json(submission))
}

/// Counters and store size
async fn get_stats(State(state): State<AppState>) -> Json<StatusReport> {
    Json(state.reporter.report().await)
}

/// Look up a stored result by key
async fn get_result(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<Json<TaskResult>, ApiError> {
    // Counters share the keyspace but are not results
    if !is_task_key(&key) {
        return Err(ApiError::NotFound);
    }

    let result = state
        .store
        .get_result(&key)
        .await
        .map_err(ApiError::from_store)?
        .ok_or(ApiError::NotFound)?;

    Ok(Json(result))
}

/// Health check endpoint
async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let broker = state
        .producer
        .broker()
        .map(|broker| broker.status())
        .unwrap_or(BrokerStatus::Disconnected);

    let status = match broker {
        BrokerStatus::Connected => "healthy",
        BrokerStatus::Disconnected => "degraded",
    };

    Json(HealthResponse { status, broker })
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use async_trait::async_trait;
    use axum::response::Response;
    use serde_json::json;
    use task_pipeline_core::{Broker, MemoryBroker, PipelineError, PROCESSED_COUNTER};
    use task_pipeline_store::MemoryStore;
    use tower::ServiceExt;

    async fn body_json(response: Response) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn post_task(body: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/task")
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn test_submit_task_is_queued() {
        let broker = MemoryBroker::new();
        let conn = broker.connect();
        let mut sub = conn.subscribe("tasks", Some("workers")).await.unwrap();

        let state = AppState::new(Producer::new(Arc::new(conn)), Arc::new(MemoryStore::new()));
        let app = create_router(state);

        let response = app
            .oneshot(post_task(r#"{"payload": {"job": "resize", "id": 42}}"#))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            body_json(response).await,
            json!({"status": "queued", "payload": {"job": "resize", "id": 42}})
        );

        let delivery = sub.next().await.unwrap();
        assert_eq!(
            Task::from_bytes(&delivery.payload).unwrap().payload(),
            &json!({"job": "resize", "id": 42})
        );
    }

    #[tokio::test]
    async fn test_submit_without_broker_is_503() {
        let state = AppState::new(Producer::without_broker(), Arc::new(MemoryStore::new()));
        let app = create_router(state);

        let response = app.oneshot(post_task(r#"{"payload": {}}"#)).await.unwrap();

        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body_json(response).await, json!({"error": "Queue not available"}));
    }

    #[tokio::test]
    async fn test_non_object_payload_is_rejected() {
        let state = AppState::new(Producer::without_broker(), Arc::new(MemoryStore::new()));
        let app = create_router(state);

        let response = app.oneshot(post_task(r#"{"payload": [1, 2]}"#)).await.unwrap();

        assert!(response.status().is_client_error());
    }

    #[tokio::test]
    async fn test_stats_reads_counters() {
        let store = Arc::new(MemoryStore::new());
        store.incr(PROCESSED_COUNTER).await.unwrap();

        let broker = MemoryBroker::new();
        let state = AppState::new(Producer::new(Arc::new(broker.connect())), store);
        let app = create_router(state);

        let response = app.oneshot(get("/stats")).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["processed_count"], 1);
        assert_eq!(body["errored_count"], 0);
        assert_eq!(body["store_size"], 1);
        assert_eq!(body["broker_status"], "connected");
    }

    #[tokio::test]
    async fn test_result_lookup() {
        let store = Arc::new(MemoryStore::new());
        let result = TaskResult::completed(Task::new(json!({"n": 1})));
        store.put_result("task:abc", &result).await.unwrap();

        let state = AppState::new(Producer::without_broker(), store);
        let app = create_router(state);

        let found = app.clone().oneshot(get("/results/task:abc")).await.unwrap();
        assert_eq!(found.status(), StatusCode::OK);
        let body = body_json(found).await;
        assert_eq!(body["status"], "Completed");
        assert_eq!(body["original_payload"], json!({"n": 1}));

        let missing = app.clone().oneshot(get("/results/task:nope")).await.unwrap();
        assert_eq!(missing.status(), StatusCode::NOT_FOUND);

        let counter = app.oneshot(get("/results/metric_processed_count")).await.unwrap();
        assert_eq!(counter.status(), StatusCode::NOT_FOUND);
    }

    /// Result store whose connection has gone away
    struct ClosedStore;

    #[async_trait]
    impl ResultStore for ClosedStore {
        async fn put(&self, _key: &str, _value: Vec<u8>) -> task_pipeline_core::Result<()> {
            Err(PipelineError::Unavailable("connection closed".to_string()))
        }

        async fn get(&self, _key: &str) -> task_pipeline_core::Result<Option<Vec<u8>>> {
            Err(PipelineError::Unavailable("connection closed".to_string()))
        }

        async fn incr(&self, _counter: &str) -> task_pipeline_core::Result<u64> {
            Err(PipelineError::Unavailable("connection closed".to_string()))
        }

        async fn counter(&self, _counter: &str) -> task_pipeline_core::Result<u64> {
            Err(PipelineError::Unavailable("connection closed".to_string()))
        }

        async fn size(&self) -> task_pipeline_core::Result<u64> {
            Err(PipelineError::Unavailable("connection closed".to_string()))
        }
    }

    #[tokio::test]
    async fn test_result_lookup_reports_store_outage() {
        let broker = MemoryBroker::new();
        let state = AppState::new(Producer::new(Arc::new(broker.connect())), Arc::new(ClosedStore));
        let app = create_router(state);

        let response = app.oneshot(get("/results/task:abc")).await.unwrap();

        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(
            body_json(response).await,
            json!({"error": "Result store not available"})
        );
    }

    #[tokio::test]
    async fn test_health_reports_broker() {
        let state = AppState::new(Producer::without_broker(), Arc::new(MemoryStore::new()));
        let app = create_router(state);

        let response = app.oneshot(get("/health")).await.unwrap();
        assert_eq!(
            body_json(response).await,
            json!({"status": "degraded", "broker": "disconnected"})
        );
    }
}
