use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use axum::{
    Json, Router,
    extract::{DefaultBodyLimit, Multipart, Query, State, multipart::Field, multipart::MultipartError},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use docqa_rag::{
    CannedQuery, ChatCompletionsModel, OpenAiCompatibleEmbedder, RagError, RagPipeline,
};
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::io::AsyncWriteExt;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::config::{HttpSettings, ServerArgs};

#[derive(Clone, Debug)]
pub struct AppState {
    pub pipeline: Arc<RagPipeline>,
}

impl AppState {
    pub fn new(pipeline: RagPipeline) -> Self {
        Self { pipeline: Arc::new(pipeline) }
    }
}

pub fn app_router(state: AppState, settings: &HttpSettings) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::list(settings.cors_origins.iter().cloned()))
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health))
        .route("/upload-paper", post(upload_paper))
        .route("/ask-question", get(ask_question))
        .route("/define-term", get(define_term))
        .route("/key-insights", get(key_insights))
        .route("/summary", get(summary))
        .route("/one-line-summary", get(one_line_summary))
        .route("/insights-report", get(insights_report))
        .with_state(state)
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(settings.body_limit))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
}

/// Build the pipeline with the remote embedding and chat clients.
pub fn build_pipeline(args: &ServerArgs) -> anyhow::Result<RagPipeline> {
    let config = args.rag_config().context("invalid pipeline configuration")?;

    let mut embedder = OpenAiCompatibleEmbedder::from_config(&config, &args.embedding_base_url)
        .context("failed to create embedding client")?;
    if let Some(key) = &args.embedding_api_key {
        embedder = embedder.with_api_key(key.clone());
    }

    let mut model = ChatCompletionsModel::from_config(&config, &args.llm_base_url)
        .context("failed to create chat completions client")?;
    match &args.groq_api_key {
        Some(key) => model = model.with_api_key(key.clone()),
        None => warn!("GROQ_API_KEY is not set; chat completion requests will be unauthenticated"),
    }

    RagPipeline::builder()
        .config(config)
        .embedding_provider(Arc::new(embedder))
        .generative_model(Arc::new(model))
        .build()
        .context("failed to build pipeline")
}

pub async fn run_server(args: ServerArgs) -> anyhow::Result<()> {
    let settings = args.http_settings()?;
    let addr = args.listen_addr()?;
    let pipeline = build_pipeline(&args)?;
    info!(
        index_path = %pipeline.config().index_path.display(),
        embedding_model = %pipeline.config().embedding_model_id,
        generative_model = %pipeline.config().generative_model_id,
        "pipeline ready"
    );

    let app = app_router(AppState::new(pipeline), &settings);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!("docqa listening on http://{}", addr);
    axum::serve(listener, app).with_graceful_shutdown(shutdown_signal()).await?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("shutting down");
}

/// A JSON `{"error": ...}` response.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self { status: StatusCode::BAD_REQUEST, message: message.into() }
    }

    fn multipart(e: MultipartError) -> Self {
        Self { status: e.status(), message: format!("Invalid upload: {}", e.body_text()) }
    }
}

impl From<RagError> for ApiError {
    fn from(e: RagError) -> Self {
        let status = match &e {
            RagError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            RagError::ContentExtraction { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            RagError::IndexNotFound => StatusCode::NOT_FOUND,
            RagError::IncompatibleIndex { .. } => StatusCode::CONFLICT,
            RagError::Embedding { transient: true, .. } => StatusCode::SERVICE_UNAVAILABLE,
            RagError::Embedding { .. } | RagError::GenerativeModel { .. } => StatusCode::BAD_GATEWAY,
            RagError::UploadIo { .. } | RagError::IndexStore { .. } | RagError::Config(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        let message = match &e {
            RagError::UploadIo { .. } => format!("Failed to save upload: {e}"),
            RagError::InvalidInput(_) => e.to_string(),
            _ => format!("Error processing document: {e}"),
        };
        Self { status, message }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        warn!(status = %self.status, error = %self.message, "request failed");
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let index = match state.pipeline.index_status().await {
        Ok(Some(_)) => "loaded",
        Ok(None) => "absent",
        Err(e) => {
            warn!(error = %e, "index status unavailable");
            "unavailable"
        }
    };
    Json(json!({ "status": "ok", "service": "docqa", "index": index }))
}

async fn upload_paper(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<Value>, ApiError> {
    while let Some(mut field) = multipart.next_field().await.map_err(ApiError::multipart)? {
        if field.name() != Some("file") {
            continue;
        }
        let Some(filename) = field.file_name().map(str::to_string) else {
            return Err(ApiError::bad_request("No file received"));
        };

        let path = state.pipeline.prepare_upload(&filename).await?;
        let staged = RagPipeline::staging_path(&path);
        let bytes = match save_field(&mut field, &staged, &filename).await {
            Ok(bytes) => bytes,
            Err(e) => {
                let _ = tokio::fs::remove_file(&staged).await;
                return Err(e);
            }
        };
        state.pipeline.commit_upload(&staged, &path).await?;
        info!(document = %filename, bytes, "upload saved");

        let report = state.pipeline.ingest_pdf_file(&path).await?;
        info!(
            document = %report.filename,
            chunks = report.stats.chunks,
            pages = report.stats.pages,
            "PDF processed"
        );
        return Ok(Json(json!({
            "message": "PDF processed successfully.",
            "filename": report.filename,
        })));
    }
    Err(ApiError::bad_request("No file received"))
}

/// Stream a multipart field to `path`, returning the number of bytes written.
async fn save_field(field: &mut Field<'_>, path: &Path, filename: &str) -> Result<u64, ApiError> {
    let io_error = |e: std::io::Error| RagError::UploadIo {
        filename: filename.to_string(),
        message: format!("failed to write {}: {e}", path.display()),
    };

    let mut file = tokio::fs::File::create(path).await.map_err(io_error)?;
    let mut written = 0u64;
    while let Some(chunk) = field.chunk().await.map_err(ApiError::multipart)? {
        file.write_all(&chunk).await.map_err(io_error)?;
        written += chunk.len() as u64;
    }
    file.flush().await.map_err(io_error)?;
    Ok(written)
}

#[derive(Debug, Deserialize)]
struct AskParams {
    q: Option<String>,
}

async fn ask_question(
    State(state): State<AppState>,
    Query(params): Query<AskParams>,
) -> Result<Json<Value>, ApiError> {
    let question = params
        .q
        .filter(|q| !q.trim().is_empty())
        .ok_or_else(|| ApiError::bad_request("Query parameter 'q' is required"))?;

    let answer = state.pipeline.ask(&question).await;
    Ok(Json(json!({ "question": question, "answer": answer })))
}

#[derive(Debug, Deserialize)]
struct DefineParams {
    term: Option<String>,
}

async fn define_term(
    State(state): State<AppState>,
    Query(params): Query<DefineParams>,
) -> Result<Json<Value>, ApiError> {
    let term = params
        .term
        .filter(|t| !t.trim().is_empty())
        .ok_or_else(|| ApiError::bad_request("Term is required"))?;

    let definition = state.pipeline.define_term(&term).await;
    Ok(Json(json!({ "term": term, "definition": definition })))
}

async fn canned(state: &AppState, query: CannedQuery) -> Json<Value> {
    Json(json!({ "answer": state.pipeline.run(query).await }))
}

async fn key_insights(State(state): State<AppState>) -> Json<Value> {
    Json(json!({ "answer": state.pipeline.key_insights().await }))
}

async fn summary(State(state): State<AppState>) -> Json<Value> {
    canned(&state, CannedQuery::Summary).await
}

async fn one_line_summary(State(state): State<AppState>) -> Json<Value> {
    Json(json!({ "answer": state.pipeline.one_line_summary().await }))
}

async fn insights_report(State(state): State<AppState>) -> Json<Value> {
    canned(&state, CannedQuery::InsightsReport).await
}
