//! services/api/src/bin/api.rs

use api_lib::{
    adapters::{completion_llm::OpenAiCompletionAdapter, db::PgRepository},
    config::Config,
    error::ApiError,
    web::{
        chat_handler, create_session_handler, get_session_handler, get_submission_handler,
        rest::ApiDoc, start_session_handler, state::AppState, submit_session_handler,
    },
};
use async_openai::{config::OpenAIConfig, Client};
use axum::{
    extract::DefaultBodyLimit,
    http::{
        header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE},
        HeaderValue, Method,
    },
    routing::{get, post},
    Router,
};
use revision_core::{
    chat::{ChatOrchestrator, ChatSettings},
    grading::{GradingOrchestrator, GradingSettings},
    ledger::UsageLedger,
    lifecycle::SessionLifecycle,
    ports::{CompletionService, RepositoryService},
    worker::{spawn_grading_worker, NoRetry},
};
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

#[tokio::main]
async fn main() -> Result<(), ApiError> {
    // --- 1. Load Configuration & Set Up Logging ---
    let config = Arc::new(Config::from_env()?);
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(config.log_level.to_string()))
        .with(tracing_subscriber::fmt::layer())
        .init();
    info!("Configuration loaded. Starting server...");

    // --- 2. Connect to Database & Run Migrations ---
    info!("Connecting to database...");
    let db_pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&config.database_url)
        .await?;
    let repository = Arc::new(PgRepository::new(db_pool.clone()));
    info!("Running database migrations...");
    repository.run_migrations().await?;
    info!("Database migrations complete.");

    // --- 3. Initialize the Completion Gateway Adapters ---
    let openai_config = OpenAIConfig::new().with_api_key(
        config
            .openai_api_key
            .as_ref()
            .ok_or_else(|| ApiError::Internal("OPENAI_API_KEY is required".to_string()))?,
    );
    let openai_client = Client::with_config(openai_config);

    let grading_gateway: Arc<dyn CompletionService> = Arc::new(OpenAiCompletionAdapter::new(
        openai_client.clone(),
        config.grading_model.clone(),
    ));
    let chat_gateway: Arc<dyn CompletionService> = Arc::new(OpenAiCompletionAdapter::new(
        openai_client.clone(),
        config.chat_model.clone(),
    ));

    // --- 4. Wire the Core Components ---
    let repo: Arc<dyn RepositoryService> = repository.clone();
    let ledger = UsageLedger::new(repo.clone(), config.credit_policy());
    let lifecycle = SessionLifecycle::new(repo.clone());

    let grading_orchestrator = Arc::new(GradingOrchestrator::new(
        repo.clone(),
        grading_gateway,
        ledger.clone(),
        GradingSettings::default(),
    ));
    let (grading_queue, _worker_handle) = spawn_grading_worker(
        grading_orchestrator,
        Arc::new(NoRetry),
        config.grading_queue_capacity,
    );

    let chat = Arc::new(ChatOrchestrator::new(
        chat_gateway,
        ledger.clone(),
        ChatSettings::default(),
    ));

    // --- 5. Build the Shared AppState ---
    let app_state = Arc::new(AppState {
        config: config.clone(),
        repo,
        lifecycle,
        chat,
        grading_queue,
    });

    let cors = CorsLayer::new()
        .allow_origin("http://localhost:3000".parse::<HeaderValue>().unwrap())
        .allow_credentials(true)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([AUTHORIZATION, CONTENT_TYPE, ACCEPT]);

    // --- 6. Create the Web Router ---
    let api_router = Router::new()
        .route("/sessions", post(create_session_handler))
        .route("/sessions/{id}", get(get_session_handler))
        .route("/sessions/{id}/start", post(start_session_handler))
        .route("/sessions/{id}/submit", post(submit_session_handler))
        .route("/sessions/{id}/submission", get(get_submission_handler))
        .route("/chat", post(chat_handler))
        .layer(DefaultBodyLimit::max(2 * 1024 * 1024))
        .layer(cors)
        .with_state(app_state);

    // Merge the API router with the Swagger UI router for a complete application.
    let app = Router::new()
        .merge(api_router)
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()));

    // --- 7. Start the Server ---
    info!("Starting server on {}", config.bind_address);
    info!(
        "Swagger UI available at http://{}/swagger-ui",
        config.bind_address
    );
    let listener = tokio::net::TcpListener::bind(&config.bind_address).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
