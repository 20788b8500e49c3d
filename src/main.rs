use actix_web::{web, App, HttpServer};
use portability::api::monitoring::{configure_monitoring_routes, MonitoringState};
use portability::api::routes::{configure_routes, AppState};
use portability::config::{load_config, TransferConfig};
use portability::database::{create_database_pool, run_migrations};
use portability::error::{AppResult, PortabilityError};
use portability::extensions::{
    ExtensionContext, OAuth2Extension, OAuthServiceConfig, TransferExtension,
};
use portability::monitoring::HealthChecker;
use portability::services::{
    ConfigurationOrchestrator, ExtensionRegistry, InMemoryJobStore, JobRepository, JobStore,
};
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_actix_web::TracingLogger;
use url::Url;

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    init_logging();

    info!("Starting portability service v{}", env!("CARGO_PKG_VERSION"));

    let config = load_config();
    let server_config = config.server.clone();

    // Job store: SQLite unless explicitly asked to stay in memory
    let (store, pool): (Arc<dyn JobStore>, _) = if config.database.url == "memory" {
        warn!("Using in-memory job store; jobs will not survive a restart");
        (Arc::new(InMemoryJobStore::new()) as Arc<dyn JobStore>, None)
    } else {
        info!("Connecting to database: {}", config.database.url);
        let pool = create_database_pool(&config.database).await.map_err(startup_error)?;
        info!("Running database migrations");
        run_migrations(&pool).await.map_err(startup_error)?;
        (Arc::new(JobRepository::new(pool.clone())) as Arc<dyn JobStore>, Some(pool))
    };

    // Transfer extensions are fully initialized before anything can resolve them
    let extensions = load_extensions(&config.transfer).await.map_err(startup_error)?;
    let context = ExtensionContext::new(config.transfer.extension_settings.clone());
    let registry = Arc::new(
        ExtensionRegistry::initialize_all(extensions, &context)
            .await
            .map_err(startup_error)?,
    );
    if registry.is_empty() {
        return Err(startup_error(PortabilityError::InternalInvariantViolation(
            "no transfer extensions installed".to_string(),
        )));
    }
    info!("Registered services: {}", registry.service_ids().join(", "));

    let base_api_url = Url::parse(&config.transfer.base_api_url).map_err(|e| {
        startup_error(PortabilityError::invalid_argument("PORTABILITY_BASE_API_URL", e.to_string()))
    })?;

    let orchestrator = ConfigurationOrchestrator::new(store, registry.clone(), base_api_url)
        .with_mismatch_policy(config.transfer.mismatch_policy);

    let app_state = Arc::new(AppState {
        orchestrator,
        registry: registry.clone(),
        job_cookie_name: server_config.job_cookie_name.clone(),
        secure_cookies: server_config.secure_cookies,
    });

    let monitoring_state = Arc::new(MonitoringState {
        health_checker: HealthChecker::new(pool, registry),
    });

    info!("Starting portability server on {}:{}", server_config.host, server_config.port);

    HttpServer::new(move || {
        App::new()
            .wrap(TracingLogger::default())
            .app_data(web::Data::new(app_state.clone()))
            .app_data(web::Data::new(monitoring_state.clone()))
            .configure(configure_routes)
            .configure(configure_monitoring_routes)
    })
        .client_request_timeout(server_config.client_timeout)
        .keep_alive(server_config.keep_alive)
        .bind((server_config.host, server_config.port))?
        .run()
        .await
}

/// One OAuth2 extension per entry in the services file.
async fn load_extensions(config: &TransferConfig) -> AppResult<Vec<Arc<dyn TransferExtension>>> {
    let Some(path) = &config.services_file else {
        warn!("PORTABILITY_SERVICES_FILE is not set; no services configured");
        return Ok(Vec::new());
    };

    let raw = tokio::fs::read_to_string(path).await.map_err(|e| {
        PortabilityError::invalid_argument(
            "PORTABILITY_SERVICES_FILE",
            format!("cannot read {path}: {e}"),
        )
    })?;
    let services: Vec<OAuthServiceConfig> = serde_json::from_str(&raw).map_err(|e| {
        PortabilityError::invalid_argument(
            "PORTABILITY_SERVICES_FILE",
            format!("cannot parse {path}: {e}"),
        )
    })?;

    info!("Loaded {} service definitions from {}", services.len(), path);
    Ok(services
        .into_iter()
        .map(|service| Arc::new(OAuth2Extension::new(service)) as Arc<dyn TransferExtension>)
        .collect())
}

fn startup_error(e: PortabilityError) -> std::io::Error {
    error!("Startup failed: {}", e);
    std::io::Error::other(e.to_string())
}

fn init_logging() {
    use tracing_subscriber::{fmt, EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

    let log_level = std::env::var("RUST_LOG")
        .unwrap_or_else(|_| "portability=info,actix_web=info".to_string());
    let log_format = std::env::var("PORTABILITY_LOG_FORMAT").unwrap_or_else(|_| "json".to_string());

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&log_level));

    if log_format == "json" {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().pretty())
            .init();
    }
}
