// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use std::{net::SocketAddr, process::ExitCode, time::Duration};

use axum_server::tls_rustls::RustlsConfig;
use tokio_util::sync::CancellationToken;

use inventory_core::{
    api::router,
    auth::{TokenService, TokenTtl},
    config::Config,
    crypto::Encryptor,
    logging,
    rate_limit::RateLimiter,
    state::AppState,
    storage::{AuditRecorder, Store},
};

/// How often refilled rate-limit cells are dropped.
const RATE_LIMIT_SWEEP_INTERVAL: Duration = Duration::from_secs(300);

/// Grace period for in-flight requests on shutdown.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[tokio::main]
async fn main() -> ExitCode {
    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Configuration error: {e}");
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = logging::init(config.log_format) {
        eprintln!("Failed to initialize logging: {e}");
        return ExitCode::FAILURE;
    }

    match run(config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "Server failed");
            ExitCode::FAILURE
        }
    }
}

async fn run(config: Config) -> Result<(), BoxError> {
    tracing::info!(config = ?config, "Starting inventory-core");

    let tokens = TokenService::new(
        &config.jwt_secret,
        TokenTtl::from_hours(config.access_token_ttl_hours, config.refresh_token_ttl_hours),
    )?
    .with_leeway(config.jwt_leeway_secs);
    let encryptor = Encryptor::new(&config.encryption_key)?;

    let db_path = config.database_path();
    let store = tokio::task::spawn_blocking(move || Store::open(&db_path)).await??;

    let rate_limiter = RateLimiter::per_minute(config.rate_limit_per_minute);
    let state = AppState::new(tokens, encryptor, store)
        .with_rate_limiter(rate_limiter.clone())
        .with_request_timeout(config.request_timeout)
        .with_trusted_proxies(config.trusted_proxies.clone())
        .with_audit_recorder(
            AuditRecorder::new().with_redacted_fields(config.audit_redacted_fields.iter().cloned()),
        );
    let app = router(state).into_make_service_with_connect_info::<SocketAddr>();

    let shutdown = CancellationToken::new();
    spawn_shutdown_listener(shutdown.clone());
    spawn_rate_limit_sweeper(rate_limiter, shutdown.clone());

    let addr = config.bind_addr()?;

    match &config.tls {
        Some(tls) => {
            rustls::crypto::ring::default_provider()
                .install_default()
                .map_err(|_| "Failed to install rustls crypto provider")?;
            let tls_config = RustlsConfig::from_pem_file(&tls.cert, &tls.key).await?;

            let handle = axum_server::Handle::new();
            let shutdown_handle = handle.clone();
            let token = shutdown.clone();
            tokio::spawn(async move {
                token.cancelled().await;
                shutdown_handle.graceful_shutdown(Some(SHUTDOWN_GRACE));
            });

            tracing::info!(%addr, "Listening on https (docs at /docs)");
            axum_server::bind_rustls(addr, tls_config)
                .handle(handle)
                .serve(app)
                .await?;
        }
        None => {
            let listener = tokio::net::TcpListener::bind(addr).await?;
            tracing::info!(%addr, "Listening on http (docs at /docs)");
            axum::serve(listener, app)
                .with_graceful_shutdown(shutdown.cancelled_owned())
                .await?;
        }
    }

    tracing::info!("Server stopped");
    Ok(())
}

fn spawn_shutdown_listener(token: CancellationToken) {
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => tracing::info!("Shutdown signal received"),
            Err(e) => tracing::error!(error = %e, "Failed to listen for shutdown signal"),
        }
        token.cancel();
    });
}

fn spawn_rate_limit_sweeper(limiter: RateLimiter, token: CancellationToken) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(RATE_LIMIT_SWEEP_INTERVAL);
        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = ticker.tick() => {
                    limiter.retain_recent();
                    tracing::debug!(tracked = limiter.tracked_keys(), "Swept rate-limit state");
                }
            }
        }
    });
}
