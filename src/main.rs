use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use ltp_service::api::ApiServer;
use ltp_service::cache;
use ltp_service::config::Config;
use ltp_service::exchange::{FallbackExchange, RestClient, StreamClient};
use ltp_service::service::PriceService;
use ltp_service::watchdog::StalenessWatchdog;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .json()
        .init();

    let config = Config::load();

    tracing::info!(
        pairs = ?config.business.supported_pairs,
        port = config.server.port,
        "ltp-service starting"
    );

    let cache = cache::build_cache(&config.cache, &config.business.cache_prefix).await?;

    let rest = Arc::new(RestClient::new(&config.exchange));
    let stream = Arc::new(StreamClient::new(&config.exchange, Arc::clone(&cache)));
    let exchange = Arc::new(FallbackExchange::new(
        Arc::clone(&stream),
        Arc::clone(&rest),
        Arc::clone(&cache),
        config.cache.ttl,
        config.exchange.fallback_timeout,
        config.exchange.max_retries,
    ));

    let startup_ctx = CancellationToken::new();

    // Dial the stream with a bounded startup timeout; warm the cache
    // via REST in parallel so the first HTTP read after boot isn't a
    // guaranteed miss even if the stream dial is slow or fails.
    let connect_stream = Arc::clone(&stream);
    let connect_timeout = config.exchange.timeout;
    let connect = async move {
        match tokio::time::timeout(connect_timeout, connect_stream.connect()).await {
            Ok(Ok(())) => tracing::info!("stream connected"),
            Ok(Err(e)) => tracing::warn!(error = %e, "initial stream connect failed, will reconnect in background"),
            Err(_) => tracing::warn!("stream connect timed out on startup, will reconnect in background"),
        }
    };
    let warmup = exchange.warmup_tickers(&startup_ctx, &config.business.supported_pairs);
    let (_, warmup_result) = tokio::join!(connect, warmup);
    if let Err(e) = warmup_result {
        tracing::warn!(error = %e, "startup warmup failed, cache starts cold");
    }

    let service = Arc::new(PriceService::new(
        Arc::clone(&cache),
        Arc::clone(&exchange),
        config.cache.ttl,
        config.business.supported_pairs.clone(),
    ));

    let watchdog = StalenessWatchdog::new(
        cache,
        Arc::clone(&exchange),
        config.business.supported_pairs.clone(),
        config.watchdog.max_age,
        config.watchdog.check_interval,
        config.cache.ttl,
    );

    let shutdown = CancellationToken::new();
    let watchdog_shutdown = shutdown.clone();
    let watchdog_handle = tokio::spawn(watchdog.run(watchdog_shutdown));

    let server = ApiServer::new(service);
    let server_result = server.run(&config, shutdown.clone()).await;

    shutdown.cancel();
    let _ = watchdog_handle.await;
    exchange.close().await;

    server_result
}
