mod config;
mod error;
mod handlers;
mod middleware;
mod models;
mod services;
mod state;
mod stores;
#[cfg(test)]
mod test_utils;

use std::{net::SocketAddr, sync::Arc, time::Duration};

use anyhow::{Context, Result};
use axum::{
    Router, http,
    response::{IntoResponse, Response},
};
use axum_extra::extract::cookie::Key;
use clap::Parser;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::{
    catch_panic::CatchPanicLayer,
    limit::RequestBodyLimitLayer,
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::{
    config::Config,
    error::AppError,
    services::{
        BackendRelay, EmailSenderImpl, EntitlementVerifier, HttpBackendRelay, KeyIssuer,
        RateLimitPolicy, RedemptionPolicy,
    },
    state::AppState,
    stores::{FileKeyStore, KeyStore, MemoryRateLimiter, RateLimiter, RedisRateLimiter, Stores},
};

#[derive(Parser)]
#[command(name = "gateway")]
#[command(about = "Image generation gateway")]
struct Args {
    /// Probe every backend candidate once, print the result and exit
    #[arg(long)]
    probe_backends: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Install rustls crypto provider before any TLS operations
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("Failed to install rustls crypto provider"))?;

    let args = Args::parse();
    let config = envy::prefixed("VIBEGEN_").from_env::<Config>()?;

    // Initialize Sentry for error tracking (must be done early, guard must stay alive)
    let _sentry_guard = config.sentry_dsn.as_ref().map(|dsn| {
        sentry::init((
            dsn.as_str(),
            sentry::ClientOptions {
                release: sentry::release_name!(),
                environment: Some(config.env.clone().into()),
                ..Default::default()
            },
        ))
    });

    // Set up tracing: JSON in production, human-readable otherwise
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if config.is_production() {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer())
            .init();
    }

    // Root token: cancelled on shutdown, parent of every relay attempt
    let shutdown = CancellationToken::new();

    let relay = Arc::new(HttpBackendRelay::from_config(&config, shutdown.clone())?);

    if args.probe_backends {
        return probe_and_exit(&relay).await;
    }

    let key_store = FileKeyStore::new(&config.key_store_path);
    tracing::info!(
        path = %key_store.path().display(),
        keys = key_store.load().await.len(),
        "key store opened"
    );
    let keys: Arc<dyn KeyStore> = Arc::new(key_store);

    let rate_limiter: Arc<dyn RateLimiter> = match config.redis_url.as_deref() {
        Some(url) if !url.is_empty() => {
            let limiter = RedisRateLimiter::new(redis::Client::open(url)?);
            if !limiter.health_check().await.unwrap_or(false) {
                tracing::warn!("redis unreachable at startup, rate limits fail open until it is");
            }
            Arc::new(limiter)
        }
        _ => {
            tracing::info!("no redis configured, using in-process rate limit counters");
            Arc::new(MemoryRateLimiter::new())
        }
    };

    if config.master_key().is_none() {
        tracing::warn!("no master key configured");
    }
    let policy = if config.deny_reused_keys {
        RedemptionPolicy::DenyReuse
    } else {
        RedemptionPolicy::AllowReuse
    };
    let verifier = EntitlementVerifier::new(
        config.master_key(),
        keys.clone(),
        policy,
        chrono::Duration::days(config.entitlement_ttl_days),
    );

    let cookie_key = match config.session_secret.as_deref() {
        Some(secret) => Key::try_from(secret.as_bytes())
            .context("session secret must be at least 64 bytes")?,
        None => {
            tracing::warn!("no session secret configured, sessions will not survive a restart");
            Key::generate()
        }
    };

    let email = EmailSenderImpl::new(config.resend_api_key.clone(), config.smtp_url.clone())?;
    let stripe = stripe::Client::new(&config.stripe_secret_key);

    if config.probe_interval_secs > 0 {
        relay
            .clone()
            .spawn_prober(Duration::from_secs(config.probe_interval_secs));
    }

    let state = AppState {
        config: config.clone(),
        limits: RateLimitPolicy::from_config(rate_limiter.clone(), &config),
        issuer: KeyIssuer::new(keys.clone()),
        verifier: Arc::new(verifier),
        stores: Stores { keys, rate_limiter },
        relay,
        email: Arc::new(email),
        stripe,
        cookie_key,
    };

    let app = app(handlers::router(), state);

    let listener = bind_with_fallback(&config).await?;
    let addr = listener.local_addr()?;

    tracing::info!(
        "Listening on {} (backends: {})",
        addr,
        config.backend_addresses().join(", ")
    );

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal(shutdown))
    .await?;

    tracing::info!("Shutdown complete");

    Ok(())
}

/// Attach state and the middleware stack to `routes`.
fn app(routes: Router<AppState>, state: AppState) -> Router {
    // Request ID header name
    let x_request_id = http::HeaderName::from_static("x-request-id");

    routes
        .with_state(state)
        // Innermost, so panic responses still get a request id and a trace
        .layer(CatchPanicLayer::custom(panic_response))
        // Request ID: generate UUID, include in logs, return in response
        .layer(PropagateRequestIdLayer::new(x_request_id.clone()))
        .layer(TraceLayer::new_for_http().make_span_with(
            |request: &http::Request<axum::body::Body>| {
                let request_id = request
                    .headers()
                    .get("x-request-id")
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or("-");

                tracing::info_span!(
                    "http",
                    method = %request.method(),
                    uri = %request.uri(),
                    request_id = %request_id,
                )
            },
        ))
        .layer(SetRequestIdLayer::new(x_request_id, MakeRequestUuid))
        .layer(RequestBodyLimitLayer::new(1024 * 1024)) // 1MB limit
}

/// A panicking handler answers like any other internal error.
fn panic_response(panic: Box<dyn std::any::Any + Send + 'static>) -> Response {
    let detail = panic
        .downcast_ref::<String>()
        .map(String::as_str)
        .or_else(|| panic.downcast_ref::<&str>().copied())
        .unwrap_or("non-string panic payload");

    AppError::Internal(anyhow::anyhow!("handler panicked: {}", detail)).into_response()
}

/// Bind `port`, or the first free port among the next `port_fallback_attempts`.
async fn bind_with_fallback(config: &Config) -> Result<TcpListener> {
    let mut last_error = None;

    for offset in 0..=config.port_fallback_attempts {
        let Some(port) = config.port.checked_add(offset) else {
            break;
        };
        let addr: SocketAddr = format!("{}:{}", config.host, port).parse()?;

        match TcpListener::bind(addr).await {
            Ok(listener) => {
                if offset > 0 {
                    tracing::warn!(requested = config.port, port, "configured port busy, using fallback");
                }
                return Ok(listener);
            }
            Err(e) => {
                tracing::debug!(port, "bind failed: {}", e);
                last_error = Some(e);
            }
        }
    }

    Err(anyhow::anyhow!(
        "no usable port in {}..={}: {}",
        config.port,
        config.port.saturating_add(config.port_fallback_attempts),
        last_error.map(|e| e.to_string()).unwrap_or_default()
    ))
}

async fn probe_and_exit(relay: &HttpBackendRelay) -> Result<()> {
    let statuses = relay.probe().await;

    for (candidate, status) in relay.candidates().iter().zip(&statuses) {
        println!(
            "{:<24} {}",
            candidate.address(),
            if status.live { "live" } else { "down" }
        );
    }

    if statuses.iter().any(|s| s.live) {
        Ok(())
    } else {
        anyhow::bail!("no backend candidate is live")
    }
}

async fn shutdown_signal(shutdown: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received Ctrl+C, shutting down..."),
        _ = terminate => tracing::info!("Received SIGTERM, shutting down..."),
    }

    // Abort in-flight relay attempts and stop the prober
    shutdown.cancel();
}
