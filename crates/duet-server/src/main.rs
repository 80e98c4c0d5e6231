mod config;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use duet_api::auth::{AppState, AppStateInner, HttpTokenVerifier, JwtTokenVerifier, TokenVerifier};
use duet_db::{Database, SqliteMessageStore};
use duet_gateway::oracle::HttpFriendshipOracle;
use duet_gateway::{AuthorizationGateway, RoutingEngine, SessionRegistry};

use crate::config::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "duet=debug,duet_gateway=debug,duet_api=debug,tower_http=debug".into()
            }),
        )
        .init();

    let config = Config::from_env()?;

    // Init database
    let db = Arc::new(Database::open(&config.db_path)?);
    let store = Arc::new(SqliteMessageStore::new(db));

    let oracle = HttpFriendshipOracle::new(&config.user_service_url, config.upstream_timeout)?;
    let authz = AuthorizationGateway::new(Arc::new(oracle), config.upstream_timeout);

    let verifier: Arc<dyn TokenVerifier> = match (&config.auth_service_url, &config.jwt_secret) {
        (Some(url), _) => {
            info!("Verifying tokens against auth service at {}", url);
            Arc::new(HttpTokenVerifier::new(url, config.upstream_timeout)?)
        }
        (None, Some(secret)) => Arc::new(JwtTokenVerifier::new(secret)),
        (None, None) => anyhow::bail!("no token verification configured"),
    };

    let engine = RoutingEngine::new(
        SessionRegistry::new(),
        authz.clone(),
        store.clone(),
        config.store_timeout,
    );

    let app_state: AppState = Arc::new(AppStateInner {
        store,
        authz,
        verifier,
        engine,
    });

    let app = Router::new()
        .merge(duet_api::router(app_state))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    info!("Duet chat service listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
