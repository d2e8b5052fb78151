use std::{sync::Arc, time::Duration};

use anyhow::Context;
use axum::{
    extract::{rejection::JsonRejection, Path, State},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde_json::json;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{debug, info, warn};

use crate::ai::OpenAiClient;
use crate::classifier::Classifier;
use crate::config::Config;
use crate::conversation::Conversation;
use crate::error::ApiError;
use crate::retriever::{PineconeIndex, Retriever};
use crate::store::{now_iso, postgres::PgStore};
use crate::types::{ChatHistory, ChatReply, ChatRequestBody};

pub struct AppState {
    pub conversation: Conversation,
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/chat", post(post_chat))
        .route("/chat/{number}", get(get_chat))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn health() -> impl IntoResponse {
    Json(json!({ "ok": true, "now": now_iso() }))
}

async fn post_chat(
    State(state): State<Arc<AppState>>,
    body: Result<Json<ChatRequestBody>, JsonRejection>,
) -> Result<Json<ChatReply>, ApiError> {
    // An unreadable body gets the same 400 as a blank number.
    let body = match body {
        Ok(Json(body)) => body,
        Err(rejection) => {
            debug!(error = %rejection, "chat body rejected");
            ChatRequestBody::default()
        }
    };
    let reply = state.conversation.handle(body).await?;
    Ok(Json(reply))
}

async fn get_chat(
    Path(number): Path<String>,
    State(state): State<Arc<AppState>>,
) -> Result<Json<ChatHistory>, ApiError> {
    Ok(Json(state.conversation.history(&number).await?))
}

fn init_tracing(cfg: &Config) {
    let env_filter = match tracing_subscriber::EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => match cfg.log_level.parse::<tracing_subscriber::EnvFilter>() {
            Ok(filter) => filter,
            Err(err) => {
                eprintln!(
                    "WARN: LOG_LEVEL='{}' is not a valid tracing filter ({err}); using 'info'",
                    cfg.log_level
                );
                tracing_subscriber::EnvFilter::new("info")
            }
        },
    };
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(true);
    if cfg.log_json {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
}

pub async fn run() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    let cfg = Config::from_env();
    init_tracing(&cfg);
    info!(version = env!("CARGO_PKG_VERSION"), "clinic-chat starting");

    if cfg.openai.api_key.trim().is_empty() {
        warn!("OPENAI_API_KEY is not set; assistant calls will fail");
    }
    if cfg.pinecone.api_key.trim().is_empty() || cfg.pinecone.index_name.trim().is_empty() {
        warn!("PINECONE_API_KEY or PINECONE_INDEXNAME is not set; context retrieval will fail");
    }

    let store = PgStore::connect(&cfg.database_url, cfg.database_max_connections)
        .await
        .context("failed to connect to postgres (set DATABASE_URL or POSTGRES_* env vars)")?;
    info!("database ready");

    let http = reqwest::Client::builder()
        .timeout(Duration::from_secs(cfg.http_timeout_secs))
        .build()
        .context("failed to build HTTP client")?;
    let openai = Arc::new(OpenAiClient::new(http.clone(), &cfg.openai));
    let index = Arc::new(PineconeIndex::new(http, cfg.pinecone.clone()));

    let conversation = Conversation::new(
        Arc::new(store),
        Classifier::new(
            openai.clone(),
            cfg.openai.chat_model.clone(),
            cfg.openai.classifier_model.clone(),
        ),
        Retriever::new(openai, index, cfg.context_top_k),
        cfg.history_limit,
    );
    let app = router(Arc::new(AppState { conversation }));

    let addr = format!("0.0.0.0:{}", cfg.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!(%addr, "clinic chat server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server runtime failure")?;

    info!("clinic-chat stopped");
    Ok(())
}

/// Resolves on Ctrl-C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(error = %err, "failed to install Ctrl-C handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(err) => warn!(error = %err, "failed to install SIGTERM handler"),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    info!("shutdown signal received");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::{CompletionRequest, Embedder, LanguageModel};
    use crate::error::UpstreamError;
    use crate::retriever::PassageIndex;
    use crate::store::memory::MemoryStore;
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::{header, Request, StatusCode};
    use http_body_util::BodyExt;
    use serde_json::Value;
    use tower::ServiceExt;

    struct CannedModel;

    #[async_trait]
    impl LanguageModel for CannedModel {
        async fn complete(&self, request: CompletionRequest) -> Result<String, UpstreamError> {
            Ok(if request.json_object {
                r#"{"intent":"saludo","message":"¡Hola! Soy el asistente de la clínica."}"#.to_string()
            } else {
                "false".to_string()
            })
        }
    }

    struct NoContext;

    #[async_trait]
    impl Embedder for NoContext {
        async fn embed(&self, _text: &str) -> Result<Vec<f32>, UpstreamError> {
            Ok(vec![0.0; 4])
        }
    }

    #[async_trait]
    impl PassageIndex for NoContext {
        async fn nearest(&self, _vector: &[f32], _top_k: usize) -> Result<Vec<String>, UpstreamError> {
            Ok(vec![])
        }
    }

    fn app() -> Router {
        let conversation = Conversation::new(
            Arc::new(MemoryStore::default()),
            Classifier::new(
                Arc::new(CannedModel),
                "gpt-4o".to_string(),
                "gpt-3.5-turbo".to_string(),
            ),
            Retriever::new(Arc::new(NoContext), Arc::new(NoContext), 5),
            10,
        );
        router(Arc::new(AppState { conversation }))
    }

    fn post_json(uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn read_json(response: axum::response::Response) -> Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn health_reports_ok() {
        let response = app()
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(read_json(response).await["ok"], true);
    }

    #[tokio::test]
    async fn chat_replies_with_message_and_status() {
        let response = app()
            .oneshot(post_json(
                "/chat",
                json!({ "number": "5491122334455", "messages": [{ "role": "user", "content": "hola" }] }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = read_json(response).await;
        assert_eq!(body["intent"], "saludo");
        assert_eq!(body["message"], "¡Hola! Soy el asistente de la clínica.");
        assert_eq!(body["response"], body["message"]);
        assert_eq!(body["status"], Value::Null);
    }

    #[tokio::test]
    async fn chat_rejects_missing_fields() {
        for payload in [
            json!({ "messages": [{ "content": "hola" }] }),
            json!({ "number": "5491122334455", "messages": [] }),
            json!({ "number": "5491122334455" }),
        ] {
            let response = app().oneshot(post_json("/chat", payload)).await.unwrap();
            assert_eq!(response.status(), StatusCode::BAD_REQUEST);
            assert_eq!(read_json(response).await["error"], "Número o mensaje inválido.");
        }
    }

    #[tokio::test]
    async fn chat_rejects_non_json_body() {
        let response = app()
            .oneshot(
                Request::post("/chat")
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from("not json"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(read_json(response).await["error"], "Número o mensaje inválido.");
    }

    #[tokio::test]
    async fn history_lists_todays_messages() {
        let app = app();
        let missing = app
            .clone()
            .oneshot(Request::get("/chat/5491122334455").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(missing.status(), StatusCode::NOT_FOUND);

        app.clone()
            .oneshot(post_json(
                "/chat",
                json!({ "number": "5491122334455", "messages": [{ "content": "hola" }] }),
            ))
            .await
            .unwrap();

        let response = app
            .oneshot(Request::get("/chat/5491122334455").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = read_json(response).await;
        assert_eq!(body["chat"]["number"], "5491122334455");
        let roles: Vec<&str> = body["messages"]
            .as_array()
            .unwrap()
            .iter()
            .map(|m| m["role"].as_str().unwrap())
            .collect();
        assert_eq!(roles, vec!["user", "assistant"]);
    }
}
