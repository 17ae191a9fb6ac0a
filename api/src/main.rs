use std::net::SocketAddr;

use axum::Router;
use sqlx::postgres::PgPoolOptions;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

mod error;
mod middleware;
mod routes;
mod state;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "qclog API",
        version = "0.1.0",
        description = "Quality-control measurement log: parameter catalog, per-shift measurement entries and queries."
    ),
    paths(
        routes::health::health_check,
        routes::parameters::list_parameters,
        routes::parameters::get_parameter,
        routes::parameters::create_parameter,
        routes::parameters::update_parameter,
        routes::parameters::delete_parameter,
        routes::configurations::list_configurations,
        routes::configurations::add_configuration,
        routes::configurations::remove_configuration,
        routes::logs::context_logs,
        routes::logs::query_logs,
        routes::logs::create_log,
        routes::logs::apply_batch,
    ),
    components(schemas(
        routes::health::HealthResponse,
        routes::logs::LogBatchRequest,
        qclog_core::error::ApiError,
        qclog_core::parameters::Parameter,
        qclog_core::parameters::ParameterDraft,
        qclog_core::parameters::ParameterKind,
        qclog_core::configurations::Configurations,
        qclog_core::configurations::LineShift,
        qclog_core::logs::LogItem,
        qclog_core::logs::MeasuredValue,
        qclog_core::logs::LogRecord,
        qclog_core::logs::LogView,
        qclog_core::logs::ItemReceipt,
        qclog_core::logs::BatchReceipt,
        qclog_core::logs::UpsertOutcome,
    ))
)]
struct ApiDoc;

#[tokio::main]
async fn main() {
    // Load .env if present (dev only)
    let _ = dotenvy::dotenv();

    // Structured JSON logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "qclog_api=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    // Database connection
    let database_url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");

    let max_connections: u32 = std::env::var("QCLOG_DB_MAX_CONNECTIONS")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(10);

    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(&database_url)
        .await
        .expect("Failed to connect to database");

    // Run migrations
    sqlx::migrate!("../migrations")
        .run(&pool)
        .await
        .expect("Failed to run migrations");

    let app_state = state::AppState::new(pool);
    tracing::info!(
        query_row_cap = app_state.query_row_cap,
        max_connections,
        "qclog API configured"
    );

    let cors_layer = middleware::cors::build_cors_layer();

    // Router with per-group rate limiting
    let app = Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-doc/openapi.json", ApiDoc::openapi()))
        .merge(routes::health::router())
        .merge(
            routes::parameters::read_router().layer(middleware::rate_limit::catalog_read_layer()),
        )
        .merge(
            routes::parameters::write_router()
                .layer(middleware::rate_limit::catalog_write_layer()),
        )
        .merge(
            routes::configurations::read_router()
                .layer(middleware::rate_limit::catalog_read_layer()),
        )
        .merge(
            routes::configurations::write_router()
                .layer(middleware::rate_limit::catalog_write_layer()),
        )
        .merge(routes::logs::read_router().layer(middleware::rate_limit::logs_read_layer()))
        .merge(routes::logs::write_router().layer(middleware::rate_limit::logs_write_layer()))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors_layer),
        )
        .with_state(app_state);

    let port: u16 = std::env::var("PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(3000);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!("qclog API listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("Failed to bind listener");
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    .expect("Server error");
}
