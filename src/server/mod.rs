pub mod auth;
pub mod error;
pub mod middleware;
pub mod proxy;
pub mod redirect;
pub mod registry;
pub mod settings;
pub mod state;
pub mod storage;
pub mod token;

#[cfg(test)]
pub(crate) mod test_support;

use anyhow::{Context, Result};
use axum::Router;
use state::AppState;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing::info;

/// Assemble the proxy's router.
///
/// The token route exists only when a token endpoint was discovered, and the
/// browser redirect only catches what no other route matched.
pub fn build_router(state: AppState, browser_redirects: bool) -> Router {
    let mut router = Router::new()
        .merge(registry::routes::routes())
        .merge(storage::routes::routes());

    if state.token_endpoint.is_some() {
        router = router.merge(token::routes::routes());
    }

    if browser_redirects {
        router = router.fallback(redirect::browser_redirect);
    }

    router.with_state(state).layer(
        ServiceBuilder::new()
            .layer(TraceLayer::new_for_http())
            .layer(axum::middleware::from_fn(middleware::request_id_middleware))
            .layer(axum::middleware::from_fn(
                middleware::capture_host_middleware,
            )),
    )
}

/// Run the proxy until a shutdown signal arrives
pub async fn run_server(settings: settings::Settings) -> Result<()> {
    let state = AppState::new_for_server(&settings).await?;

    info!(
        "Proxying {} under prefix '{}'",
        state.registry.host, state.registry.repo_prefix
    );
    if state.token_endpoint.is_none() {
        info!("Backend issued no auth challenge, {} is not served", token::TOKEN_PATH);
    }

    let app = build_router(state, settings.server.browser_redirects);

    let addr = settings.listen_addr();
    info!("HTTP server listening on http://{}", addr);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    // Graceful shutdown support
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("HTTP server shutdown complete");
    Ok(())
}

/// Wait for a shutdown signal (SIGTERM or SIGINT)
async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received SIGINT (Ctrl+C), shutting down gracefully");
        },
        _ = terminate => {
            info!("Received SIGTERM, shutting down gracefully");
        },
    }
}
