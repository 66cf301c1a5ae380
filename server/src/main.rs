use std::sync::Arc;

use anyhow::Result;
use tower_http::trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer};
use tracing::{info, Level};
use tracing_subscriber::EnvFilter;

use mediafabric_core::collector::CollectorConfig;
use mediafabric_core::registry::RegistrationConfig;
use mediafabric_core::watch::WatchConfig;
use mediafabric_core::{ChangeFeed, Collector, QueryService, RegistrationService, Substrate, SubscriptionManager};
use mediafabric_server::{query, registration, Config, QueryState};
use mediafabric_substrate_etcd::EtcdSubstrate;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = Config::from_env();
    let substrate: Arc<dyn Substrate> = Arc::new(EtcdSubstrate::new(&config.etcd_url)?);

    // Registration side: the HTTP surface plus the orphan collector.
    let registry = RegistrationService::with_config(
        substrate.clone(),
        RegistrationConfig { heartbeat_ttl: config.heartbeat_ttl },
    );
    let collector = Collector::spawn(
        substrate.clone(),
        CollectorConfig {
            interval: config.collect_interval,
            deadline: config.collect_deadline,
            lock_ttl: config.collect_lock_ttl,
            ..CollectorConfig::default()
        },
    );

    // Query side: the HTTP surface, the change feed and its dispatcher.
    let query_service = QueryService::new(substrate.clone());
    let subscriptions = SubscriptionManager::new(query_service.clone(), config.advertised_host.clone());
    let (feed, mut events) = ChangeFeed::spawn(
        substrate.clone(),
        WatchConfig { poll_timeout: config.watch_poll_timeout, ..WatchConfig::default() },
    );
    let dispatcher = {
        let subscriptions = subscriptions.clone();
        tokio::spawn(async move {
            while let Some(message) = events.recv().await {
                subscriptions.dispatch(message);
            }
        })
    };

    let trace = || {
        TraceLayer::new_for_http()
            .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
            .on_request(DefaultOnRequest::new().level(Level::INFO))
            .on_response(DefaultOnResponse::new().level(Level::INFO))
    };

    let registration_app = registration::router(registry).layer(trace());
    let query_app = query::router(QueryState { query: query_service, subscriptions: subscriptions.clone() })
        .layer(trace());

    let registration_listener = tokio::net::TcpListener::bind(&config.registration_bind).await?;
    let query_listener = tokio::net::TcpListener::bind(&config.query_bind).await?;
    info!("registration API on {}", registration_listener.local_addr()?);
    info!("query API on {}", query_listener.local_addr()?);

    let registration_server = tokio::spawn(async move {
        axum::serve(registration_listener, registration_app).await
    });
    let query_server = tokio::spawn(async move { axum::serve(query_listener, query_app).await });

    tokio::signal::ctrl_c().await?;
    info!("shutting down");

    subscriptions.disconnect_all();
    feed.shutdown();
    dispatcher.abort();
    collector.shutdown();
    registration_server.abort();
    query_server.abort();

    Ok(())
}
