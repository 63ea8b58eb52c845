mod analysis;
mod config;
mod models;
mod provider;
mod sessions;
mod store;
#[cfg(test)]
mod testing;
mod themes;

use analysis::{AnalysisStreamProxy, AnalyzeError};
use config::Config;
use models::*;
use provider::{ChatProvider, OpenAiProvider};
use sessions::{DEFAULT_LIMIT, DEFAULT_OFFSET, SessionPageFetcher};
use store::TableStore;
use themes::ThemeLookup;

use axum::{
    Json, Router,
    body::Body,
    extract::{
        FromRequest, FromRequestParts, Query, State,
        rejection::{JsonRejection, QueryRejection},
    },
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use futures::StreamExt;
use std::{convert::Infallible, sync::Arc};
use tower_http::{cors::CorsLayer, services::ServeDir, trace::TraceLayer};
use tracing_subscriber::EnvFilter;

// ===== App State =====

#[derive(Clone)]
struct AppState {
    store: Arc<dyn TableStore>,
    sessions: Arc<SessionPageFetcher>,
    analysis: Arc<AnalysisStreamProxy>,
    default_prompt: Arc<str>,
}

impl AppState {
    fn new(config: &Config, store: Arc<dyn TableStore>, provider: Arc<dyn ChatProvider>) -> Self {
        let themes = Arc::new(ThemeLookup::new(store.clone(), config.theme_cache_ttl));
        Self {
            sessions: Arc::new(SessionPageFetcher::new(
                store.clone(),
                themes,
                config.max_page_size,
            )),
            analysis: Arc::new(AnalysisStreamProxy::new(provider)),
            default_prompt: Arc::from(config.default_prompt.as_str()),
            store,
        }
    }
}

// ===== Main =====

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = Config::from_env()?;
    let store = store::from_config(&config)?;
    let provider = Arc::new(OpenAiProvider::new(&config.provider));
    let state = AppState::new(&config, store, provider);

    tracing::info!(
        store = state.store.backend(),
        model = %config.provider.model,
        max_page_size = config.max_page_size,
        "Configuration loaded"
    );

    let app = app(state, &config.static_dir);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    tracing::info!("Server running on http://{}", config.bind_addr);

    axum::serve(listener, app).await?;
    Ok(())
}

fn app(state: AppState, static_dir: &str) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/data", get(get_data))
        .route("/api/analyze", post(analyze))
        .fallback_service(ServeDir::new(static_dir))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ===== Handlers =====

async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let status = match state.store.ping().await {
        Ok(()) => "ok",
        Err(err) => {
            tracing::warn!("Health check failed: {:#}", err);
            "error"
        }
    };
    Json(HealthResponse {
        status,
        store: state.store.backend(),
        provider_configured: state.analysis.provider_configured(),
    })
}

async fn get_data(
    State(state): State<AppState>,
    ApiQuery(params): ApiQuery<PageParams>,
) -> Result<Json<DataPage>, AppError> {
    let offset = params.offset.unwrap_or(DEFAULT_OFFSET);
    let limit = params.limit.unwrap_or(DEFAULT_LIMIT);

    if offset < 0 {
        return Err(AppError::BadRequest("offset must be >= 0".into()));
    }
    if limit <= 0 {
        return Err(AppError::BadRequest("limit must be > 0".into()));
    }

    let page = state.sessions.fetch_page(offset, limit).await?;
    Ok(Json(page))
}

async fn analyze(
    State(state): State<AppState>,
    ApiJson(request): ApiJson<AnalysisRequest>,
) -> Result<Response, AppError> {
    let prompt = request
        .prompt
        .filter(|p| !p.trim().is_empty())
        .unwrap_or_else(|| state.default_prompt.to_string());

    let chunks = state
        .analysis
        .analyze(&request.selected_answers, &prompt)
        .await?;

    let body = Body::from_stream(chunks.map(Ok::<_, Infallible>));
    Ok((
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        body,
    )
        .into_response())
}

// ===== Extractors =====

#[derive(FromRequestParts)]
#[from_request(via(Query), rejection(AppError))]
struct ApiQuery<T>(T);

#[derive(FromRequest)]
#[from_request(via(Json), rejection(AppError))]
struct ApiJson<T>(T);

// ===== Error Handling =====

enum AppError {
    BadRequest(String),
    Rejected(StatusCode, String),
    Upstream(anyhow::Error),
}

impl From<QueryRejection> for AppError {
    fn from(rejection: QueryRejection) -> Self {
        AppError::Rejected(rejection.status(), rejection.body_text())
    }
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        AppError::Rejected(rejection.status(), rejection.body_text())
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Upstream(err)
    }
}

impl From<AnalyzeError> for AppError {
    fn from(err: AnalyzeError) -> Self {
        match err {
            AnalyzeError::EmptySelection => {
                AppError::BadRequest("selected_answers must not be empty".into())
            }
            AnalyzeError::Provider(err) => {
                AppError::Upstream(err.context("failed to start analysis"))
            }
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, detail) = match self {
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::Rejected(status, msg) => (status, msg),
            AppError::Upstream(err) => {
                tracing::error!("Upstream error: {:#}", err);
                (StatusCode::INTERNAL_SERVER_ERROR, format!("{err:#}"))
            }
        };

        (status, Json(serde_json::json!({ "detail": detail }))).into_response()
    }
}
