//! Process supervisor
//!
//! Boot order matters: storage first, then the feed and engine, then the
//! resubscription of symbols recovered from OPEN positions, and only
//! then the HTTP listener. Shutdown drains in reverse.

use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

use paper_perps::{
    create_router, AppState, Broker, Config, EngineMetrics, ExchangeRest, PriceFeed, Store,
    TriggerEngine,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_env("LOG_LEVEL").unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = Config::from_env();
    info!(
        ws_url = %config.ws_url,
        database = %config.database_path,
        bind = %config.bind_addr,
        "starting paper-perps"
    );

    let store = Arc::new(Store::new(&config.database_path).await?);

    let feed = PriceFeed::new(config.ws_url.clone());
    feed.spawn();

    let metrics = EngineMetrics::register(prometheus::default_registry())?;
    let engine = Arc::new(TriggerEngine::new(store.clone(), feed.clone(), metrics));
    TriggerEngine::spawn(engine.clone());

    let rest = ExchangeRest::new(config.rest_url.clone())?;
    let broker = Arc::new(Broker::new(
        store.clone(),
        feed.clone(),
        rest,
        config.quote_asset.clone(),
    ));

    // Restart recovery: reattach the feed to every symbol that still has
    // an OPEN position before accepting traffic.
    let symbols = store.open_symbols().await?;
    for symbol in &symbols {
        feed.subscribe(symbol);
    }
    info!(count = symbols.len(), ?symbols, "resubscribed open-position symbols");

    let state = AppState {
        store,
        feed: feed.clone(),
        engine,
        broker,
    };
    let app = create_router(state);

    let listener = TcpListener::bind(config.bind_addr).await?;
    info!(addr = %config.bind_addr, "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // New sessions are no longer accepted; stop the feed and let the
    // store mutex drain in-flight writes as it drops.
    feed.close();
    info!("shutdown complete");

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    info!("shutdown signal received");
}
