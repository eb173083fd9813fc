mod batch;
mod compose;
mod config;
mod deberta;
mod engine;
mod error;
mod ratelimit;
mod rules;
mod sanitize;
mod security;
mod types;

use std::sync::Arc;
use std::time::Instant;

use axum::{
    Json, Router, middleware,
    extract::{State, rejection::JsonRejection},
    http::{HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use axum_prometheus::PrometheusMetricLayer;
use clap::Parser;
use metrics::counter;
use serde_json::json;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use batch::NeuralEngine;
use config::{BatchConfig, Config, Mode};
use deberta::{DebertaClassifier, DebertaSettings};
use engine::{Engine, HybridEngine, RuleEngine};
use error::AppError;
use ratelimit::FixedWindowLimiter;
use sanitize::sanitize;
use types::{
    BatchClassifyRequest, BatchClassifyResponse, Classification, ClassifyRequest,
    ClassifyResponse, ComposeRequest, ComposeResponse, HealthResponse, TrainRequest,
    TrainResponse,
};

const SERVER_VERSION: &str = env!("CARGO_PKG_VERSION");
const MAX_BATCH_SIZE: usize = 50;

pub struct AppState {
    pub engine: Arc<dyn Engine>,
    pub limiter: FixedWindowLimiter,
    pub config: Config,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,automail_server=debug".into()),
        )
        .init();

    let config = Config::parse();
    tracing::info!(
        mode = %config.mode,
        rate_limit = config.rate_limit_per_minute,
        "Starting automail server"
    );

    let engine = build_engine(&config).await?;

    let state = Arc::new(AppState {
        engine,
        limiter: FixedWindowLimiter::new(config.rate_limit_per_minute),
        config: config.clone(),
    });

    let (prometheus_layer, metric_handle) = PrometheusMetricLayer::pair();

    let app = router(state)
        .route("/metrics", get(|| async move { metric_handle.render() }))
        .layer(prometheus_layer)
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer(&config)?);

    let listener = TcpListener::bind(&config.server_address()).await?;
    tracing::info!("Server running on http://{}", config.server_address());

    axum::serve(listener, app).await?;
    Ok(())
}

/// Builds the classification strategy selected by `--mode`. In `ai` and
/// `hybrid` modes the model is loaded before the server accepts requests,
/// so no request ever races a half-loaded model.
async fn build_engine(config: &Config) -> anyhow::Result<Arc<dyn Engine>> {
    if config.mode != Mode::Rules && config.model_id.is_none() && config.model_path.is_none() {
        anyhow::bail!("--mode {} requires --model-id or --model-path", config.mode);
    }

    match config.mode {
        Mode::Rules => Ok(Arc::new(RuleEngine)),
        Mode::Ai | Mode::Hybrid => {
            tracing::info!("Loading DeBERTa model...");
            let model = DebertaClassifier::load(DebertaSettings::from(config)).await?;
            tracing::info!("Model loaded successfully");

            let (neural, processor) = NeuralEngine::new(BatchConfig::from(config), model);
            tokio::spawn(async move {
                if let Err(e) = processor.run_forever().await {
                    tracing::error!("Batch processor error: {}", e);
                }
            });

            // Both model modes recover failures through the rule tables;
            // only hybrid bounds each inference with a timeout.
            let neural: Arc<dyn Engine> = Arc::new(neural);
            if config.mode == Mode::Hybrid {
                Ok(Arc::new(HybridEngine::new(neural, config.classify_timeout())))
            } else {
                Ok(Arc::new(HybridEngine::without_timeout(neural)))
            }
        }
    }
}

fn cors_layer(config: &Config) -> anyhow::Result<CorsLayer> {
    let layer = CorsLayer::new()
        .allow_methods(Any)
        .allow_headers(Any);
    match config.cors_origin_list() {
        None => Ok(layer.allow_origin(Any)),
        Some(origins) => {
            let origins: Result<Vec<HeaderValue>, _> =
                origins.iter().map(|origin| origin.parse()).collect();
            Ok(layer.allow_origin(origins?))
        }
    }
}

fn router(state: Arc<AppState>) -> Router {
    let gated = Router::new()
        .route("/classify", post(classify_handler))
        .route("/batch-classify", post(batch_classify_handler))
        .route("/compose", post(compose_handler))
        .route("/train", post(train_handler))
        .route_layer(middleware::from_fn_with_state(state.clone(), security::gate));

    Router::new()
        .route("/health", get(health_handler))
        .merge(gated)
        .fallback(not_found_handler)
        .with_state(state)
}

fn round_secs(start: Instant) -> f64 {
    (start.elapsed().as_secs_f64() * 1000.0).round() / 1000.0
}

async fn health_handler(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        model_status: state.engine.model_status(),
        mode: state.config.mode.to_string(),
        version: SERVER_VERSION,
        timestamp: chrono::Utc::now().timestamp(),
    })
}

#[tracing::instrument(skip_all)]
async fn classify_handler(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<ClassifyRequest>, JsonRejection>,
) -> Response {
    counter!("classification_requests_total").increment(1);
    let Json(request) = match payload {
        Ok(payload) => payload,
        Err(rejection) => return AppError::Validation(rejection.body_text()).into_response(),
    };

    let start = Instant::now();
    let content = sanitize(&request.content, state.config.max_content_length);
    let subject = sanitize(&request.subject, state.config.max_content_length);

    let (status, classification) = match state.engine.classify(&content, &subject).await {
        Ok(classification) => (StatusCode::OK, classification),
        Err(err) => {
            // Never hand the extension an unusable error for /classify.
            tracing::error!(error = %err, "classification failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Classification::emergency("Server error - manual review recommended"),
            )
        }
    };

    let body = ClassifyResponse {
        classification,
        processing_time: round_secs(start),
        timestamp: chrono::Utc::now().timestamp(),
        server_version: SERVER_VERSION,
    };
    (status, Json(body)).into_response()
}

#[tracing::instrument(skip_all)]
async fn batch_classify_handler(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<BatchClassifyRequest>, JsonRejection>,
) -> Response {
    counter!("classification_requests_total").increment(1);
    let Json(request) = match payload {
        Ok(payload) => payload,
        Err(rejection) => return AppError::Validation(rejection.body_text()).into_response(),
    };

    if request.emails.is_empty() {
        return AppError::Validation("Field 'emails' cannot be empty".into()).into_response();
    }
    if request.emails.len() > MAX_BATCH_SIZE {
        return AppError::Validation(format!("Maximum {MAX_BATCH_SIZE} emails per batch"))
            .into_response();
    }

    let start = Instant::now();
    let total_emails = request.emails.len();
    tracing::debug!(total_emails, "batch classifying");

    let futures = request.emails.into_iter().map(|email| {
        let content = sanitize(&email.content, state.config.max_content_length);
        let subject = sanitize(&email.subject, state.config.max_content_length);
        let engine = state.engine.clone();
        async move {
            match engine.classify(&content, &subject).await {
                Ok(classification) => classification,
                Err(err) => {
                    tracing::error!(error = %err, "batch item failed");
                    Classification::emergency("Batch processing error")
                }
            }
        }
    });
    let results = futures::future::join_all(futures).await;

    let body = BatchClassifyResponse {
        results,
        processing_time: round_secs(start),
        total_emails,
        timestamp: chrono::Utc::now().timestamp(),
        server_version: SERVER_VERSION,
    };
    (StatusCode::OK, Json(body)).into_response()
}

async fn compose_handler(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<ComposeRequest>, JsonRejection>,
) -> Response {
    let Json(request) = match payload {
        Ok(payload) => payload,
        Err(rejection) => return AppError::Validation(rejection.body_text()).into_response(),
    };

    let prompt = sanitize(&request.prompt, state.config.max_content_length);
    let draft = compose::compose(&prompt, request.style.as_deref().unwrap_or("professional"));

    Json(ComposeResponse {
        draft: draft.draft,
        subject: draft.subject,
        style: draft.style,
        timestamp: chrono::Utc::now().timestamp(),
        server_version: SERVER_VERSION,
    })
    .into_response()
}

/// Correction intake is an acknowledgement only; no learning happens.
async fn train_handler(
    payload: Result<Json<TrainRequest>, JsonRejection>,
) -> Response {
    let Json(request) = match payload {
        Ok(payload) => payload,
        Err(rejection) => return AppError::Validation(rejection.body_text()).into_response(),
    };

    tracing::info!(corrections = request.corrections.len(), "received training corrections");
    Json(TrainResponse {
        status: "success",
        corrections_processed: request.corrections.len(),
        model_updated: false,
        timestamp: chrono::Utc::now().timestamp(),
    })
    .into_response()
}

async fn not_found_handler() -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(json!({
            "error": "Not found",
            "message": "The requested endpoint does not exist",
            "available_endpoints": [
                "GET /health",
                "GET /metrics",
                "POST /classify",
                "POST /batch-classify",
                "POST /compose",
                "POST /train",
            ],
        })),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{Body, to_bytes};
    use axum::http::Request;
    use serde_json::Value;
    use tower::ServiceExt;

    const TEST_KEY: &str = "test-key-2024";

    fn test_app(rate_limit: u32) -> Router {
        let config = Config::try_parse_from([
            "automail-server",
            "--api-key",
            TEST_KEY,
            "--mode",
            "rules",
            "--rate-limit-per-minute",
            &rate_limit.to_string(),
        ])
        .unwrap();
        let state = Arc::new(AppState {
            engine: Arc::new(RuleEngine),
            limiter: FixedWindowLimiter::new(config.rate_limit_per_minute),
            config,
        });
        router(state)
    }

    fn post_json(uri: &str, key: Option<&str>, body: Value) -> Request<Body> {
        let mut builder = Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json");
        if let Some(key) = key {
            builder = builder.header("x-api-key", key);
        }
        builder.body(Body::from(body.to_string())).unwrap()
    }

    async fn body_json(response: axum::response::Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn health_needs_no_auth() {
        let app = test_app(100);
        let response = app
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["mode"], "rules");
        assert_eq!(body["model_status"], "rule-based");
    }

    #[tokio::test]
    async fn classify_lottery_scam_as_spam() {
        let app = test_app(100);
        let response = app
            .oneshot(post_json(
                "/classify",
                Some(TEST_KEY),
                json!({
                    "content": "Congratulations! You won $1,000,000! Click here now!",
                    "subject": "YOU WON!!!",
                }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().contains_key("x-ratelimit-limit"));
        let body = body_json(response).await;
        assert_eq!(body["label"], "Spam");
        assert!(body["confidence"].as_f64().unwrap() > 0.5);
        assert_eq!(body["method"], "rule-based");
    }

    #[tokio::test]
    async fn classify_meeting_reminder_as_work() {
        let app = test_app(100);
        let response = app
            .oneshot(post_json(
                "/classify",
                Some(TEST_KEY),
                json!({"content": "Team meeting tomorrow at 2pm", "subject": "Meeting Reminder"}),
            ))
            .await
            .unwrap();
        let body = body_json(response).await;
        assert_eq!(body["label"], "Work");
    }

    #[tokio::test]
    async fn classify_empty_email_as_review() {
        let app = test_app(100);
        let response = app
            .oneshot(post_json(
                "/classify",
                Some(TEST_KEY),
                json!({"content": "", "subject": ""}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["label"], "Review");
        let confidence = body["confidence"].as_f64().unwrap();
        assert!((0.1..=0.5).contains(&confidence));
    }

    #[tokio::test]
    async fn missing_api_key_is_rejected() {
        let app = test_app(100);
        let response = app
            .oneshot(post_json("/classify", None, json!({"content": "hi"})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let body = body_json(response).await;
        assert_eq!(body["error"], "Missing API key");
    }

    #[tokio::test]
    async fn wrong_api_key_is_rejected() {
        let app = test_app(100);
        let response = app
            .oneshot(post_json("/classify", Some("nope"), json!({"content": "hi"})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn auth_failure_does_not_consume_rate_limit() {
        let app = test_app(1);
        // A pile of rejected requests first. The wrong key shares the real
        // key's last-8 suffix, so it lands in the same rate bucket as the
        // valid request below.
        for _ in 0..5 {
            let response = app
                .clone()
                .oneshot(post_json("/classify", Some("evil-key-2024"), json!({"content": "hi"})))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        }
        // ...must leave the single-request quota untouched.
        let response = app
            .oneshot(post_json("/classify", Some(TEST_KEY), json!({"content": "hi"})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn ai_mode_recovers_model_failure_with_rule_fallback() {
        struct BrokenModel;

        #[async_trait::async_trait]
        impl engine::BatchedModel for BrokenModel {
            async fn classify_batch(
                &self,
                _texts: Vec<String>,
            ) -> anyhow::Result<Vec<Classification>> {
                anyhow::bail!("no weights")
            }
        }

        let config = Config::try_parse_from([
            "automail-server",
            "--api-key",
            TEST_KEY,
            "--mode",
            "ai",
            "--tick-duration-ms",
            "5",
        ])
        .unwrap();
        let (neural, processor) = NeuralEngine::new(BatchConfig::from(&config), BrokenModel);
        tokio::spawn(processor.run_forever());
        let state = Arc::new(AppState {
            engine: Arc::new(HybridEngine::without_timeout(Arc::new(neural))),
            limiter: FixedWindowLimiter::new(config.rate_limit_per_minute),
            config,
        });

        let response = router(state)
            .oneshot(post_json(
                "/classify",
                Some(TEST_KEY),
                json!({
                    "content": "Congratulations! You won $1,000,000! Click here now!",
                    "subject": "YOU WON!!!",
                }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["label"], "Spam");
        assert_eq!(body["method"], "fallback");
        assert!(body["confidence"].as_f64().unwrap() > 0.5);
    }

    #[tokio::test]
    async fn request_over_the_cap_gets_429() {
        let app = test_app(2);
        for _ in 0..2 {
            let response = app
                .clone()
                .oneshot(post_json("/classify", Some(TEST_KEY), json!({"content": "hi"})))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::OK);
        }
        let response = app
            .oneshot(post_json("/classify", Some(TEST_KEY), json!({"content": "hi"})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(
            response.headers()["x-ratelimit-remaining"].to_str().unwrap(),
            "0"
        );
        let body = body_json(response).await;
        assert_eq!(body["error"], "Rate limit exceeded");
    }

    #[tokio::test]
    async fn malformed_body_gets_400() {
        let app = test_app(100);
        let response = app
            .oneshot(post_json("/classify", Some(TEST_KEY), json!({"subject": "no content"})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = body_json(response).await;
        assert_eq!(body["error"], "Invalid request data");
    }

    #[tokio::test]
    async fn batch_of_fifty_returns_fifty_results_in_order() {
        let app = test_app(100);
        let emails: Vec<Value> = (0..50)
            .map(|i| {
                if i % 2 == 0 {
                    json!({"content": format!("team meeting {i}"), "subject": "work"})
                } else {
                    json!({"content": format!("family dinner {i}")})
                }
            })
            .collect();
        let response = app
            .oneshot(post_json("/batch-classify", Some(TEST_KEY), json!({"emails": emails})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["total_emails"], 50);
        let results = body["results"].as_array().unwrap();
        assert_eq!(results.len(), 50);
        assert_eq!(results[0]["label"], "Work");
        assert_eq!(results[1]["label"], "Personal");
    }

    #[tokio::test]
    async fn batch_of_fifty_one_is_rejected() {
        let app = test_app(100);
        let emails: Vec<Value> = (0..51).map(|i| json!({"content": format!("e{i}")})).collect();
        let response = app
            .oneshot(post_json("/batch-classify", Some(TEST_KEY), json!({"emails": emails})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn empty_batch_is_rejected() {
        let app = test_app(100);
        let response = app
            .oneshot(post_json("/batch-classify", Some(TEST_KEY), json!({"emails": []})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn compose_returns_a_draft() {
        let app = test_app(100);
        let response = app
            .oneshot(post_json(
                "/compose",
                Some(TEST_KEY),
                json!({"prompt": "schedule a meeting about Q3", "style": "casual"}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["subject"], "Meeting Request");
        assert_eq!(body["style"], "casual");
    }

    #[tokio::test]
    async fn train_acknowledges_without_learning() {
        let app = test_app(100);
        let response = app
            .oneshot(post_json(
                "/train",
                Some(TEST_KEY),
                json!({"corrections": [
                    {"email_id": "123", "correct_label": "Work", "original_label": "Personal"}
                ]}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["corrections_processed"], 1);
        assert_eq!(body["model_updated"], false);
    }

    #[tokio::test]
    async fn unknown_route_lists_available_endpoints() {
        let app = test_app(100);
        let response = app
            .oneshot(Request::get("/nope").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let body = body_json(response).await;
        let endpoints = body["available_endpoints"].as_array().unwrap();
        assert!(endpoints.iter().any(|e| e == "POST /classify"));
        assert!(endpoints.iter().any(|e| e == "GET /metrics"));
    }

    #[tokio::test]
    async fn rules_mode_never_needs_a_model() {
        let config = Config::try_parse_from([
            "automail-server",
            "--api-key",
            TEST_KEY,
            "--mode",
            "rules",
        ])
        .unwrap();
        assert!(build_engine(&config).await.is_ok());
    }

    #[tokio::test]
    async fn model_modes_require_a_model_source() {
        let config = Config::try_parse_from([
            "automail-server",
            "--api-key",
            TEST_KEY,
            "--mode",
            "hybrid",
        ])
        .unwrap();
        assert!(build_engine(&config).await.is_err());
    }
}
