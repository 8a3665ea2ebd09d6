pub mod handlers;
pub mod middleware;
pub mod models;
pub mod router;

use std::net::SocketAddr;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::service::PriceService;
use handlers::AppState;

pub struct ApiServer {
    state: Arc<AppState>,
}

impl ApiServer {
    /// Wraps the price service in shared handler state.
    pub fn new(service: Arc<PriceService>) -> Self {
        Self { state: Arc::new(AppState { service }) }
    }

    /// Binds the server to the configured port and serves until a
    /// shutdown signal (Ctrl+C, or the given `shutdown` token) fires,
    /// then waits up to `server.shutdown_timeout` for in-flight
    /// requests to finish. Mirrors the teacher's `ApiServer::run`
    /// generalized with the graceful-shutdown wiring the pack's
    /// `streams` crate uses (`shutdown_signal`/`with_graceful_shutdown`).
    pub async fn run(self, config: &Config, shutdown: CancellationToken) -> anyhow::Result<()> {
        let app = router::build(Arc::clone(&self.state), config);
        let addr = SocketAddr::from(([0, 0, 0, 0], config.server.port));

        tracing::info!("LTP service listening on http://{}", addr);

        let listener = tokio::net::TcpListener::bind(addr).await?;
        let shutdown_timeout = config.server.shutdown_timeout;

        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = shutdown.cancelled() => {}
                }
                tracing::info!(?shutdown_timeout, "shutting down HTTP server");
            })
            .await?;

        Ok(())
    }
}
