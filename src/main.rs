use std::{net::SocketAddr, path::PathBuf, sync::Arc, time::Duration};

use anyhow::Context;
use axum::{
    routing::{get, post},
    Router,
};
use tokio::signal;
use tracing::info;

mod access_log;
mod admin;
mod admin_auth;
mod cache;
mod config;
mod error;
mod event_stream;
mod health;
mod proxy;
mod rate_limiter;
mod request_id;
mod store;

pub use config::Config;
pub use error::AppError;

use access_log::AccessLogPublisher;
use cache::RouteCache;
use event_stream::EventStreamRegistry;
use rate_limiter::RateLimiter;
use store::RouteStore;

/// Shared application state, constructed once at startup and handed to
/// every axum handler behind an `Arc`.
pub struct AppState {
    pub(crate) store: Arc<RouteStore>,
    pub(crate) cache: Arc<RouteCache>,
    pub(crate) rate_limiter: Arc<RateLimiter>,
    pub(crate) access_log: Arc<AccessLogPublisher>,
    pub(crate) event_stream: Arc<EventStreamRegistry>,
    pub(crate) http_client: reqwest::Client,
    pub(crate) admin_token: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if std::env::args().nth(1).as_deref() == Some("--healthcheck") {
        return healthcheck().await;
    }

    let config_path = std::env::var("GATEWAYD_CONFIG").map(PathBuf::from).unwrap_or_else(|_| PathBuf::from("/etc/gatewayd/config.toml"));

    let config = Config::load(&config_path).with_context(|| format!("loading config from {}", config_path.display()))?;
    let config = Arc::new(config);

    // `RUST_LOG` wins if set; otherwise fall back to `gateway.log_level` from
    // the config file, and finally to a hardcoded default if neither parses.
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| {
            tracing_subscriber::EnvFilter::try_new(
                config.gateway.log_level.as_deref().unwrap_or("gatewayd=info,tower_http=warn"),
            )
        })
        .unwrap_or_else(|_| "gatewayd=info,tower_http=warn".into());

    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    info!(bind_addr = %config.gateway.bind_addr, "gatewayd starting");

    let admin_token = config
        .gateway
        .admin_token_env
        .as_ref()
        .map(|var| std::env::var(var).with_context(|| format!("admin_token_env names {var}, but it is not set")))
        .transpose()?;

    let store = Arc::new(RouteStore::open(&config.store.database_path).await.context("opening route store")?);

    let cache = Arc::new(RouteCache::new(store.clone()));
    // Startup refresh is fatal: serving traffic against an empty/stale cache
    // is worse than refusing to start.
    cache.refresh().await.context("initial route cache refresh failed")?;

    let rate_limiter = Arc::new(
        RateLimiter::connect(&config.rate_limit.redis_url, Duration::from_millis(config.rate_limit.redis_timeout_ms))
            .await
            .context("connecting to redis rate limit store")?,
    );

    let access_log = Arc::new(AccessLogPublisher::new(&config.access_log.brokers, &config.access_log.topic).context("creating kafka producer")?);

    let event_stream = Arc::new(EventStreamRegistry::new());
    tokio::spawn(consume_access_log_topic(config.clone(), event_stream.clone()));

    let http_client = reqwest::Client::builder()
        .timeout(Duration::from_millis(config.gateway.dispatch_timeout_ms))
        .build()
        .context("building downstream http client")?;

    let state = Arc::new(AppState { store, cache: cache.clone(), rate_limiter, access_log, event_stream, http_client, admin_token });

    cache.spawn_refresh_loop(Duration::from_secs(config.gateway.cache_refresh_secs));

    let admin_routes = Router::new()
        .route("/routes", post(admin::create_route).get(admin::list_routes))
        .route("/routes/{id}", get(admin::get_route).put(admin::update_route).delete(admin::delete_route))
        .layer(axum::middleware::from_fn_with_state(state.clone(), admin_auth::admin_auth_middleware));

    let trace_layer = tower_http::trace::TraceLayer::new_for_http()
        .make_span_with(tower_http::trace::DefaultMakeSpan::new().level(tracing::Level::INFO))
        .on_response(tower_http::trace::DefaultOnResponse::new().level(tracing::Level::INFO));

    let app = Router::new()
        .merge(admin_routes)
        .route("/dashboard/stream", get(event_stream::stream_handler))
        .route("/healthz", get(health::healthz))
        .fallback(proxy::handle)
        .layer(axum::middleware::from_fn(request_id::request_id_middleware))
        .layer(trace_layer)
        .with_state(state);

    let addr: SocketAddr = config.gateway.bind_addr.parse().with_context(|| format!("invalid gateway.bind_addr {}", config.gateway.bind_addr))?;
    info!(%addr, "listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate()).expect("failed to install SIGTERM handler").recv().await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("shutdown signal received");
}

/// Background task: consumes the access-log Kafka topic on its own
/// consumer group (`auto.offset.reset = latest`, no historical replay) and
/// hands each decoded event to the [`EventStreamRegistry`].
async fn consume_access_log_topic(config: Arc<Config>, registry: Arc<EventStreamRegistry>) {
    use futures_util::StreamExt as _;
    use rdkafka::consumer::{Consumer, StreamConsumer};
    use rdkafka::Message;

    let consumer: StreamConsumer = match rdkafka::ClientConfig::new()
        .set("bootstrap.servers", &config.access_log.brokers)
        .set("group.id", &config.access_log.consumer_group)
        .set("auto.offset.reset", "latest")
        .create()
    {
        Ok(c) => c,
        Err(err) => {
            tracing::error!(error = %err, "failed to create kafka consumer, dashboard feed will stay empty");
            return;
        }
    };

    if let Err(err) = consumer.subscribe(&[config.access_log.topic.as_str()]) {
        tracing::error!(error = %err, "failed to subscribe to access log topic");
        return;
    }

    let mut stream = consumer.stream();
    while let Some(message) = stream.next().await {
        let message = match message {
            Ok(m) => m,
            Err(err) => {
                tracing::warn!(error = %err, "kafka consumer error");
                continue;
            }
        };

        let Some(payload) = message.payload() else { continue };
        match serde_json::from_slice::<access_log::AccessLogEvent>(payload) {
            Ok(event) => registry.broadcast(event),
            Err(err) => tracing::warn!(error = %err, "failed to decode access log event"),
        }
    }
}

/// Lightweight healthcheck: GET /healthz and exit 0 on 200, 1 otherwise.
/// Invoked via `gatewayd --healthcheck` from a Docker HEALTHCHECK.
async fn healthcheck() -> anyhow::Result<()> {
    let addr = std::env::var("GATEWAYD_BIND_ADDR").unwrap_or_else(|_| "127.0.0.1:8080".to_string());
    let url = format!("http://{addr}/healthz");
    let resp = reqwest::get(&url).await?;

    if resp.status().is_success() {
        std::process::exit(0);
    } else {
        std::process::exit(1);
    }
}
