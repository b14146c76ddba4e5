use std::{
    net::SocketAddr,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};

use anyhow::Context;
use axum::{
    response::Response,
    routing::{get, post},
    Router,
};
use tokio::signal;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::{
    agents::AgentStore,
    config::ServerConfig,
    observability::logging,
    providers::{builtin_specs, CredentialSource, EnvCredentials, ProviderRegistry},
    relay::create_relay,
    routes::{
        admin::{admin_auth_middleware, reload_model_config, AdminAuth},
        agents::{list_agents, save_agent},
        error,
        status::{client_count, health, model_config, status},
    },
    session::SessionRegistry,
    ws::{websocket_handler, ConnectionManager},
};

pub struct AppState {
    pub config: ServerConfig,
    pub providers: Arc<ProviderRegistry>,
    pub sessions: Arc<SessionRegistry>,
    pub manager: Arc<ConnectionManager>,
    pub agents: AgentStore,
    pub started_at: Instant,
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("providers", &self.providers)
            .field("manager", &self.manager)
            .finish()
    }
}

impl AppState {
    /// Wire up registries, relay and connection manager. Must run inside a
    /// Tokio runtime; the dispatch queue spawns its dispatcher here.
    pub fn new(
        config: ServerConfig,
        credentials: Arc<dyn CredentialSource>,
    ) -> anyhow::Result<Arc<Self>> {
        config.validate()?;

        let providers = Arc::new(ProviderRegistry::new(
            builtin_specs(),
            credentials,
            config.relay.endpoint_overrides.clone(),
        ));
        let sessions = Arc::new(SessionRegistry::new());
        let relay = create_relay(&config.relay, providers.clone(), sessions.clone())
            .context("failed to build stream relay")?;
        let manager = ConnectionManager::new(
            sessions.clone(),
            providers.clone(),
            relay,
            &config.queue,
            config.complete_delay,
        );
        let agents = AgentStore::new(config.agent_data_dir.clone());

        Ok(Arc::new(Self {
            config,
            providers,
            sessions,
            manager,
            agents,
            started_at: Instant::now(),
        }))
    }
}

async fn sink_handler() -> Response {
    error::not_found("route_not_found", "No such endpoint")
}

pub fn build_app(app_state: Arc<AppState>) -> Router {
    let admin_auth = AdminAuth {
        api_key: app_state.config.admin_api_key.clone(),
    };

    let admin_routes = Router::new()
        .route("/api/model-config/reload", post(reload_model_config))
        .route_layer(axum::middleware::from_fn_with_state(
            admin_auth,
            admin_auth_middleware,
        ));

    let public_routes = Router::new()
        .route("/health", get(health))
        .route("/status", get(status))
        .route("/api/client-count", get(client_count))
        .route("/api/model-config", get(model_config))
        .route(
            "/api/ai-agent/{user_id}",
            post(save_agent).get(list_agents),
        )
        .route("/websocket", get(websocket_handler));

    let cors_allowed_origins = app_state.config.cors_allowed_origins.clone();

    Router::new()
        .merge(public_routes)
        .merge(admin_routes)
        .layer(TraceLayer::new_for_http())
        .layer(create_cors_layer(cors_allowed_origins))
        .fallback(sink_handler)
        .with_state(app_state)
}

pub async fn startup(config: ServerConfig) -> anyhow::Result<()> {
    static LOGGING_INITIALIZED: AtomicBool = AtomicBool::new(false);

    let _log_guard = if !LOGGING_INITIALIZED.swap(true, Ordering::SeqCst) {
        Some(logging::init_logging(config.log.clone()))
    } else {
        None
    };

    let app_state = AppState::new(config, Arc::new(EnvCredentials))?;
    let config = &app_state.config;

    info!(
        relay = %config.relay.backend,
        max_concurrent_streams = config.queue.max_concurrent,
        heartbeat_secs = config.heartbeat.interval.as_secs(),
        providers = app_state.providers.all_configs().configs.len(),
        "Initializing prompt relay"
    );

    let sweeper = app_state
        .sessions
        .start_sweeper(config.session.sweep_interval, config.session.max_age_hours);
    let heartbeat = app_state.manager.start_heartbeat(config.heartbeat.interval);

    let bind_addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", bind_addr))?;
    info!("Starting server on {}", bind_addr);

    let app = build_app(app_state.clone());
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .context("server error")?;

    heartbeat.abort();
    sweeper.abort();
    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!("failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, starting graceful shutdown");
        },
        _ = terminate => {
            info!("Received terminate signal, starting graceful shutdown");
        },
    }
}

fn create_cors_layer(allowed_origins: Vec<String>) -> tower_http::cors::CorsLayer {
    use tower_http::cors::Any;

    let cors = if allowed_origins.is_empty() {
        tower_http::cors::CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
            .expose_headers(Any)
    } else {
        let origins: Vec<http::HeaderValue> = allowed_origins
            .into_iter()
            .filter_map(|origin| origin.parse().ok())
            .collect();

        tower_http::cors::CorsLayer::new()
            .allow_origin(origins)
            .allow_methods([http::Method::GET, http::Method::POST, http::Method::OPTIONS])
            .allow_headers([http::header::CONTENT_TYPE, http::header::AUTHORIZATION])
    };

    cors.max_age(Duration::from_secs(3600))
}
