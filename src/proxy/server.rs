use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::http::{HeaderValue, Method, header};
use reqwest::Client;
use tokio::sync::watch;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tracing::info;
use url::Url;

use crate::config::EnvConfig;
use crate::db::BlockStore;
use crate::error::WardenError;
use crate::proxy::rate_limit::RateLimiter;
use crate::proxy::session::Session;
use crate::proxy::templates::Templates;
use crate::proxy::{Destination, ProxyState, engine, resolver};

/// Browsers may cache CORS preflights for this long.
const CORS_MAX_AGE: Duration = Duration::from_secs(300);

/// CORS advertises only the statically configured origins; the dynamic set
/// feeds the firewall, not the preflight surface.
fn cors_layer(static_origins: &[String]) -> CorsLayer {
    let origins = static_origins.to_vec();
    CorsLayer::new()
        .allow_origin(AllowOrigin::predicate(move |origin: &HeaderValue, _| {
            let Ok(origin_str) = origin.to_str() else {
                return false;
            };
            let Ok(url) = Url::parse(origin_str) else {
                return false;
            };
            url.host_str()
                .map(|host| origins.iter().any(|o| o == host))
                .unwrap_or(false)
        }))
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::PATCH,
            Method::OPTIONS,
            Method::HEAD,
        ])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
        .allow_credentials(true)
        .max_age(CORS_MAX_AGE)
}

/// Run the proxy engine until the supervisor signals shutdown.
///
/// Every route and method funnels into the single pipeline handler; the
/// origin refresher is spawned alongside when a dynamic IP source is on.
pub async fn serve(
    env: EnvConfig,
    destination: Destination,
    shutdown: watch::Receiver<bool>,
) -> Result<(), WardenError> {
    let store = BlockStore::open(&env.database).await?;
    let templates = Templates::load(&env.error_page, &env.warn_page)?;
    // Upstream redirects belong to the client, not the proxy.
    let http_client = Client::builder()
        .redirect(reqwest::redirect::Policy::none())
        .pool_max_idle_per_host(10)
        .build()?;

    let allowed_origins = resolver::allowance(&env, &http_client).await;
    info!("Only connections from the following origins will be allowed:");
    let mut banner: Vec<&String> = allowed_origins.iter().collect();
    banner.sort();
    for origin in banner {
        info!("  - {origin}");
    }

    let limiter = RateLimiter::new(&env.rate_limit);
    let dynamic_sources = env.allow_public_ip || env.allow_private_ip;
    let refresh_enabled = env.origin_refresh.is_some() && dynamic_sources;

    let state = Arc::new(ProxyState {
        session: Session::new(allowed_origins),
        destination,
        store,
        limiter,
        templates,
        http_client,
        env,
    });

    let refresher = if refresh_enabled {
        Some(resolver::spawn_refresher(state.clone(), shutdown.clone()))
    } else {
        None
    };

    let app = Router::new()
        .fallback(engine::proxy_engine)
        .layer(cors_layer(&state.env.origins))
        .with_state(state.clone());

    let addr: SocketAddr = format!("{}:{}", state.env.host, state.env.port)
        .parse()
        .map_err(|e| WardenError::Config(format!("Invalid proxy bind address: {e}")))?;
    info!(
        "Starting proxy engine on http://{addr} with {} worker(s)",
        state.env.workers
    );

    let listener = tokio::net::TcpListener::bind(addr).await?;
    let mut shutdown_rx = shutdown;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move {
        let _ = shutdown_rx.changed().await;
    })
    .await?;

    if let Some(task) = refresher {
        task.abort();
    }
    info!("Proxy engine stopped");
    Ok(())
}
