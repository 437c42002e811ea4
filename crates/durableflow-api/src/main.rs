// Durableflow API server

mod workflows;

use anyhow::{Context, Result};
use axum::{extract::State, routing::get, Json, Router};
use durable::engine::WorkflowExecutor;
use durable::persistence::PostgresWorkflowEventStore;
use serde::Serialize;
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn health(State(_state): State<workflows::AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// OpenAPI documentation
#[derive(OpenApi)]
#[openapi(
    paths(
        workflows::start_workflow,
        workflows::signal_with_start,
        workflows::describe_workflow,
        workflows::signal_workflow,
        workflows::query_workflow,
        workflows::update_workflow,
        workflows::cancel_workflow,
        workflows::terminate_workflow,
        workflows::list_workflows,
        workflows::get_workflow_history,
    ),
    components(
        schemas(
            durable::api::IdReusePolicy,
            durable::api::StartWorkflowRequest,
            durable::api::StartWorkflowResponse,
            durable::api::SignalWorkflowRequest,
            durable::api::SignalWithStartRequest,
            durable::api::WaitStage,
            durable::api::UpdateWorkflowRequest,
            durable::api::DescribeWorkflowResponse,
            durable::api::GetWorkflowHistoryResponse,
            durable::persistence::WorkflowStatus,
            durable::persistence::TraceContext,
            workflows::QueryWorkflowRequest,
            workflows::ReasonRequest,
        )
    ),
    tags(
        (name = "workflows", description = "Workflow execution and interaction endpoints"),
    ),
    info(
        title = "Durableflow API",
        version = "0.1.0",
        description = "Interaction API for the durable workflow execution engine",
        license(name = "MIT", url = "https://opensource.org/licenses/MIT")
    )
)]
struct ApiDoc;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "durableflow_api=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("durableflow-api starting...");

    let database_url =
        std::env::var("DATABASE_URL").context("DATABASE_URL environment variable required")?;
    let pool = PgPoolOptions::new()
        .max_connections(20)
        .connect(&database_url)
        .await
        .context("Failed to connect to database")?;
    tracing::info!("Connected to database");

    let store = PostgresWorkflowEventStore::new(pool);
    store.migrate().await.context("Failed to run migrations")?;
    tracing::info!("Migrations applied");

    let executor = Arc::new(WorkflowExecutor::new(store));

    let timer_executor = Arc::clone(&executor);
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(std::time::Duration::from_millis(500));
        loop {
            ticker.tick().await;
            match timer_executor.poll_timers().await {
                Ok(fired) if fired > 0 => tracing::debug!(fired, "delivered fired timers"),
                Ok(_) => {}
                Err(e) => tracing::error!("timer poll failed: {e}"),
            }
        }
    });

    let api = Arc::new(durable::api::InteractionApi::new(executor));
    let state = workflows::AppState { api };

    let app = Router::new()
        .route("/health", get(health).with_state(state.clone()))
        .merge(workflows::routes(state))
        .merge(SwaggerUi::new("/swagger-ui").url("/api-doc/openapi.json", ApiDoc::openapi()))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http());

    let addr = "0.0.0.0:9000";
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("Failed to bind to address")?;
    tracing::info!("Listening on {}", addr);

    axum::serve(listener, app).await.context("Server error")?;

    Ok(())
}
