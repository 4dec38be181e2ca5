//! Auth Gateway
//!
//! Single-binary Rust service that:
//! 1. Redirects browsers to an external identity provider (GitHub, Yandex)
//! 2. Finishes the OAuth callback, finds or creates the user, and issues
//!    signed access + refresh tokens
//! 3. Links a second device through short polling codes
//! 4. Verifies access tokens and trades refresh tokens for new access tokens

mod config;
mod device;
mod error;
mod login;
mod metrics;
mod session;
mod sweep;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use axum::Router;
use axum::extract::State;
use axum::http::StatusCode;
use axum::http::header::CONTENT_TYPE;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use common::{SharedClock, SystemClock};
use device_link::{CodeExchange, RefreshTokenFactor, SecondFactor, StaticFactor};
use metrics_exporter_prometheus::PrometheusHandle;
use provider::{GitHubProvider, IdentityProvider, OAuthClient, OAuthSettings, YandexProvider};
use session_auth::{
    AuthStateTracker, LocalUserStore, LoginFlow, SessionService, TokenIssuer, UserStore,
};
use tokio::net::TcpListener;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::{Config, ProviderConfig, ProviderKind, SecondFactorKind, ServerConfig};

/// How long in-flight requests get to finish after a shutdown signal.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Shared application state accessible from all handlers
#[derive(Clone)]
struct AppState {
    /// Login flows keyed by provider id
    logins: Arc<BTreeMap<String, Arc<LoginFlow>>>,
    devices: Arc<CodeExchange>,
    sessions: Arc<SessionService>,
    request_timeout: Duration,
    public_url: Arc<str>,
    started_at: Instant,
    in_flight: Arc<AtomicU64>,
    prometheus: PrometheusHandle,
}

/// Build the axum router with all routes and shared state.
///
/// The concurrency limit is the outermost layer, so requests beyond
/// `max_connections` wait before they are counted or timed.
fn build_router(state: AppState, max_connections: usize) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .route("/auth/{provider}/login", get(login::login_handler))
        .route("/auth/{provider}/callback", get(login::callback_handler))
        .route("/auth/refresh", post(session::refresh_handler))
        .route("/me", get(session::me_handler))
        .route("/code/request", get(device::request_handler))
        .route("/code/exchange", get(device::exchange_handler))
        .route("/code/poll", get(device::poll_handler))
        .layer(axum::middleware::from_fn_with_state(
            state.in_flight.clone(),
            metrics::track_requests,
        ))
        .layer(tower::limit::ConcurrencyLimitLayer::new(max_connections))
        .with_state(state)
}

/// Wire the library crates together from a loaded config.
async fn build_state(
    config: &Config,
    clock: SharedClock,
    prometheus: PrometheusHandle,
) -> Result<AppState> {
    let signing_secret = config
        .tokens
        .signing_secret
        .as_ref()
        .context("signing secret was not resolved")?;
    let issuer = Arc::new(TokenIssuer::new(
        signing_secret,
        clock.clone(),
        Duration::from_secs(config.tokens.access_ttl_secs),
        Duration::from_secs(config.tokens.refresh_ttl_secs),
    ));

    let max_tokens = config.storage.max_refresh_tokens;
    let users: Arc<dyn UserStore> = match &config.storage.users_path {
        Some(path) => Arc::new(
            LocalUserStore::load(path.clone(), max_tokens)
                .await
                .with_context(|| format!("failed to load users from {}", path.display()))?,
        ),
        None => {
            warn!("storage.users_path not set, user records live in memory only");
            Arc::new(LocalUserStore::in_memory(max_tokens))
        }
    };
    let sessions = Arc::new(SessionService::new(issuer.clone(), users.clone()));

    let state_ttl = Duration::from_secs(config.login.state_ttl_secs);
    let mut logins = BTreeMap::new();
    for provider_config in &config.providers {
        let provider = build_provider(provider_config, &config.server)?;
        let tracker = AuthStateTracker::new(provider_config.id.clone(), state_ttl, clock.clone());
        let flow = LoginFlow::new(provider, tracker, issuer.clone(), users.clone(), clock.clone());
        logins.insert(provider_config.id.clone(), Arc::new(flow));
    }

    let factor: Arc<dyn SecondFactor> = match config.device.second_factor {
        SecondFactorKind::RefreshToken => Arc::new(RefreshTokenFactor::new(sessions.clone())),
        SecondFactorKind::Static => {
            let sentinel = config
                .device
                .static_factor
                .clone()
                .context("static second factor was not resolved")?;
            warn!(
                email = %config.device.static_email,
                "static second factor enabled, do not use outside development"
            );
            Arc::new(StaticFactor::new(sentinel, config.device.static_email.clone()))
        }
    };
    let devices = Arc::new(CodeExchange::new(
        Duration::from_secs(config.device.code_ttl_secs),
        Duration::from_secs(config.device.exchange_ttl_secs),
        factor,
        issuer,
        users,
        clock,
    ));

    Ok(AppState {
        logins: Arc::new(logins),
        devices,
        sessions,
        request_timeout: config.server.request_timeout(),
        public_url: Arc::from(config.server.public_url.as_str()),
        started_at: Instant::now(),
        in_flight: Arc::new(AtomicU64::new(0)),
        prometheus,
    })
}

/// Build one provider adapter, filling unset endpoints with the provider defaults.
fn build_provider(
    config: &ProviderConfig,
    server: &ServerConfig,
) -> Result<Arc<dyn IdentityProvider>> {
    let (authorize_url, token_url, api_url, scopes) = match config.kind {
        ProviderKind::Github => (
            provider::github::AUTHORIZE_URL,
            provider::github::TOKEN_URL,
            provider::github::API_BASE,
            provider::github::DEFAULT_SCOPES,
        ),
        ProviderKind::Yandex => (
            provider::yandex::AUTHORIZE_URL,
            provider::yandex::TOKEN_URL,
            provider::yandex::INFO_URL,
            provider::yandex::DEFAULT_SCOPES,
        ),
    };
    let client_secret = config
        .client_secret
        .clone()
        .with_context(|| format!("client secret for provider {} was not resolved", config.id))?;

    let oauth = OAuthClient::new(OAuthSettings {
        client_id: config.client_id.clone(),
        client_secret,
        redirect_uri: server.callback_url(&config.id),
        authorize_url: config
            .authorize_url
            .clone()
            .unwrap_or_else(|| authorize_url.to_owned()),
        token_url: config.token_url.clone().unwrap_or_else(|| token_url.to_owned()),
        scopes: config
            .scopes
            .clone()
            .unwrap_or_else(|| scopes.iter().map(|s| s.to_string()).collect()),
        use_pkce: config.pkce,
        timeout: server.request_timeout(),
    })
    .with_context(|| format!("failed to build OAuth client for provider {}", config.id))?;

    let api_url = config.api_url.clone().unwrap_or_else(|| api_url.to_owned());
    Ok(match config.kind {
        ProviderKind::Github => Arc::new(GitHubProvider::new(config.id.clone(), oauth, api_url)),
        ProviderKind::Yandex => Arc::new(YandexProvider::new(config.id.clone(), oauth, api_url)),
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and LOG_LEVEL / RUST_LOG support
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_env("LOG_LEVEL")
                .or_else(|_| EnvFilter::try_from_default_env())
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("starting auth-gateway");

    // Install Prometheus metrics recorder before any metrics are emitted
    let prometheus_handle =
        metrics::install_recorder().context("failed to install Prometheus recorder")?;

    // CLI: simple --config flag parsing
    let args: Vec<String> = std::env::args().collect();
    let cli_config_path = args
        .iter()
        .position(|a| a == "--config")
        .and_then(|i| args.get(i + 1))
        .map(|s| s.as_str());

    let config_path = Config::resolve_path(cli_config_path);
    info!(path = %config_path.display(), "loading configuration");

    let config = Config::load(&config_path)
        .with_context(|| format!("failed to load config from {}", config_path.display()))?;

    info!(
        listen_addr = %config.server.listen_addr,
        public_url = %config.server.public_url,
        providers = config.providers.len(),
        second_factor = ?config.device.second_factor,
        "configuration loaded"
    );

    let clock: SharedClock = Arc::new(SystemClock);
    let app_state = build_state(&config, clock, prometheus_handle).await?;

    let sweeper = sweep::spawn_sweep_task(
        app_state.logins.values().cloned().collect(),
        app_state.devices.clone(),
        config.server.sweep_interval(),
    );

    let in_flight = app_state.in_flight.clone();
    let app = build_router(app_state, config.server.max_connections);

    let listen_addr = config.server.listen_addr;
    let listener = TcpListener::bind(listen_addr)
        .await
        .with_context(|| format!("failed to bind to {listen_addr}"))?;
    info!(addr = %listen_addr, "accepting requests");

    // The drain timeout starts when the shutdown signal fires: the server is
    // told to drain, then the drain races DRAIN_TIMEOUT.
    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();

    let server_handle = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
            })
            .await
    });

    shutdown_signal().await;
    let _ = shutdown_tx.send(());
    sweeper.abort();

    match tokio::time::timeout(DRAIN_TIMEOUT, server_handle).await {
        Ok(Ok(Ok(()))) => {
            info!("all in-flight requests drained");
        }
        Ok(Ok(Err(e))) => {
            error!(error = %e, "server error during shutdown");
        }
        Ok(Err(e)) => {
            error!(error = %e, "server task panicked");
        }
        Err(_) => {
            let remaining = in_flight.load(Ordering::Relaxed);
            warn!(
                remaining,
                drain_timeout_secs = DRAIN_TIMEOUT.as_secs(),
                "drain timeout exceeded, forcing shutdown"
            );
        }
    }

    info!("shutdown complete");
    Ok(())
}

/// Liveness plus live entry counts per store.
async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    let mut pending_logins = 0;
    for flow in state.logins.values() {
        pending_logins += flow.tracker().len().await;
    }

    let body = serde_json::json!({
        "status": "healthy",
        "uptime_seconds": state.started_at.elapsed().as_secs(),
        "providers": state.logins.keys().collect::<Vec<_>>(),
        "pending_logins": pending_logins,
        "device_codes": state.devices.live_codes().await,
        "device_exchanges": state.devices.live_exchanges().await,
        "in_flight": state.in_flight.load(Ordering::Relaxed),
    });

    (
        StatusCode::OK,
        [(CONTENT_TYPE, "application/json")],
        body.to_string(),
    )
}

/// Prometheus metrics endpoint in text exposition format.
async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
        state.prometheus.render(),
    )
}

/// Wait for SIGTERM or SIGINT for graceful shutdown.
///
/// A signal handler that fails to install never fires; the other one still
/// can.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("received SIGINT, shutting down"),
        () = terminate => info!("received SIGTERM, shutting down"),
    }
}
