use std::net::SocketAddr;
use std::sync::Arc;

use sqlx::PgPool;
use tokio::net::TcpListener;
use tracing::{info, warn};

use common_auth::{TokenConfig, TokenVerifier};
use common_observability::TerminalMetrics;

use terminal_service::config::ServiceConfig;
use terminal_service::orchestrator::CheckoutOrchestrator;
use terminal_service::poller::StatusPoller;
use terminal_service::square::SquareClient;
use terminal_service::store::{CheckoutStore, MemoryCheckoutStore};
use terminal_service::store_pg::PgCheckoutStore;
use terminal_service::tenant::TenantResolver;
use terminal_service::{build_router, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().with_env_filter("info").init();

    let config = ServiceConfig::from_env()?;
    let metrics = TerminalMetrics::new()?;

    let store: Arc<dyn CheckoutStore> = match &config.database_url {
        Some(database_url) => {
            let pool = PgPool::connect(database_url).await?;
            // Ensure database schema is up to date before serving traffic
            sqlx::migrate!("./migrations").run(&pool).await?;
            Arc::new(PgCheckoutStore::new(pool))
        }
        None => {
            warn!("DATABASE_URL not set; checkout state is in-memory and lost on restart");
            Arc::new(MemoryCheckoutStore::new())
        }
    };

    let gateway = Arc::new(SquareClient::new(&config, metrics.clone())?);
    let orchestrator = Arc::new(CheckoutOrchestrator::new(
        gateway,
        store.clone(),
        metrics.clone(),
        &config,
    ));
    let poller = Arc::new(StatusPoller::new(&config, metrics.clone()));

    let mut resolver = TenantResolver::new(store);
    if let Some(tenant_id) = config.dev_tenant_id {
        warn!(%tenant_id, "Using DEV_TENANT_ID fallback scope; do not enable in production");
        resolver = resolver.with_dev_tenant(tenant_id);
    }

    let mut token_config = TokenConfig::new(config.jwt_issuer.clone(), config.jwt_audience.clone());
    if let Some(leeway) = config.jwt_leeway_seconds {
        token_config = token_config.with_leeway(leeway);
    }
    let token_verifier = Arc::new(TokenVerifier::new(token_config, config.jwt_secret.as_bytes()));

    let state = AppState {
        orchestrator,
        poller,
        resolver: Arc::new(resolver),
        token_verifier,
        metrics,
    };
    let app = build_router(state);

    let ip: std::net::IpAddr = config.host.parse()?;
    let addr = SocketAddr::from((ip, config.port));
    info!(%addr, "starting terminal-service");
    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}
