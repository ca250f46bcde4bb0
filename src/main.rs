use anyhow::Context;
use axum::{
    routing::{get, post},
    Router,
};
use dotenvy::dotenv;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;
use utoipa::openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme};
use utoipa::{Modify, OpenApi};
use utoipa_swagger_ui::SwaggerUi;

mod config;
mod error;
mod handlers;
mod middleware;
mod models;
mod services;
mod utils;

use config::Config;
use services::aggregator::StatusAggregator;
use services::game_query::{ProtocolSet, QUERY_TIMEOUT};
use services::gatekeeper::{GatePolicy, Gatekeeper};
use services::power::HttpPowerClient;
use services::registry::Registry;

// Application State
pub struct AppState {
    pub config: Config,
    pub registry: Arc<Registry>,
    pub aggregator: Arc<StatusAggregator>,
    pub gatekeeper: Arc<Gatekeeper>,
}

#[derive(OpenApi)]
#[openapi(
    paths(
        handlers::actions::run_action,
        handlers::actions::override_action,
        handlers::actions::confirm_override,
        handlers::actions::status,
        handlers::server::list_servers,
        handlers::server::get_server,
        handlers::server::create_server,
        handlers::server::update_server,
        handlers::server::delete_server,
        handlers::server::save_registry,
        handlers::server::load_registry,
        handlers::server::registry_activity,
        handlers::server::get_server_players,
        handlers::server::get_server_details,
        handlers::auth::me,
    ),
    components(schemas(
        models::action::PowerAction,
        models::action::ActionResponse,
        models::action::CooldownState,
        models::server::ServerRecord,
        models::server::CreateServerRequest,
        models::server::UpdateServerRequest,
        services::aggregator::AggregationResult,
        handlers::actions::StatusReport,
    )),
    modifiers(&SecurityAddon)
)]
struct ApiDoc;

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "jwt",
                SecurityScheme::Http(HttpBuilder::new().scheme(HttpAuthScheme::Bearer).bearer_format("JWT").build()),
            );
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = Config::from_env()?;

    let registry = Arc::new(Registry::new(config.registry_path.clone()));
    if registry.file_path().exists() {
        match registry.load().await {
            Ok(count) => tracing::info!("Loaded {} servers from {}", count, registry.file_path().display()),
            Err(e) => tracing::error!("Could not load the server registry: {}", e),
        }
    }

    let aggregator = Arc::new(StatusAggregator::new(registry.clone(), Arc::new(ProtocolSet::new(QUERY_TIMEOUT))));
    let power = HttpPowerClient::new(config.endpoints.clone(), config.power_timeout)
        .context("Failed to build the power endpoint client")?;
    let gatekeeper = Arc::new(Gatekeeper::new(aggregator.clone(), Arc::new(power), GatePolicy::from(&config)));

    let addr = config.listen;
    let state = Arc::new(AppState {
        config,
        registry: registry.clone(),
        aggregator,
        gatekeeper,
    });

    let protected_routes = Router::new()
        .route("/api/auth/me", get(handlers::auth::me))
        // Power actions
        .route("/api/actions/:action", post(handlers::actions::run_action))
        .route("/api/actions/:action/override", post(handlers::actions::override_action))
        .route("/api/overrides/:id/confirm", post(handlers::actions::confirm_override))
        .route("/api/status", get(handlers::actions::status))
        // Registry
        .route("/api/servers", get(handlers::server::list_servers).post(handlers::server::create_server))
        .route(
            "/api/servers/:name",
            get(handlers::server::get_server)
                .put(handlers::server::update_server)
                .delete(handlers::server::delete_server),
        )
        .route("/api/servers/:name/players", get(handlers::server::get_server_players))
        .route("/api/servers/:name/details", get(handlers::server::get_server_details))
        .route("/api/registry/save", post(handlers::server::save_registry))
        .route("/api/registry/load", post(handlers::server::load_registry))
        .route("/api/registry/activity", get(handlers::server::registry_activity))
        .route_layer(axum::middleware::from_fn_with_state(state.clone(), middleware::auth_middleware));

    let app = Router::new()
        .route("/", get(root))
        .merge(protected_routes)
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state);

    tracing::info!("listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    match registry.save_on_exit().await {
        Ok((count, path)) => tracing::info!("Saved {} servers to {} before exit", count, path.display()),
        Err(e) => tracing::error!("Could not save the server registry on exit: {}", e),
    }
    Ok(())
}

async fn root() -> &'static str {
    "zzzPowerBot Backend API"
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for ctrl-c: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutting down");
}
