use anyhow::Result;
use clap::Parser;
use clerva_core::retry::RetryPolicy;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

mod cli;
mod config;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,tower_http=debug")),
        )
        .init();

    let args = cli::Args::parse();
    let config = config::Config::load(&args.config)?;

    ensure_data_dirs(&config);

    let db = connect_with_retry(&config.database.url, config.database.max_connections).await?;
    clerva_db::run_migrations(&db).await?;

    let state = clerva_core::AppState::new(db, config.to_app_config());

    if config.presence.scheduler_enabled {
        spawn_sweep_scheduler(state.clone(), config.presence.sweep_interval_secs);
    } else {
        tracing::info!("in-process sweep scheduler disabled, expecting external trigger");
    }

    let app = clerva_api::build_router()
        .with_state(state)
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .layer(tower_http::cors::CorsLayer::permissive());

    let listener = tokio::net::TcpListener::bind(&config.server.bind_address).await?;
    tracing::info!("listening on http://{}", config.server.bind_address);

    let shutdown_signal = async {
        let _ = tokio::signal::ctrl_c().await;
        tracing::info!("shutting down...");
    };

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal)
        .await?;

    Ok(())
}

/// Open the pool with a bounded retry: a database that is briefly
/// unavailable at boot (volume mount, first-run file creation) should not
/// kill the process.
async fn connect_with_retry(url: &str, max_connections: u32) -> Result<clerva_db::DbPool> {
    let mut policy = RetryPolicy::default();
    loop {
        match clerva_db::create_pool(url, max_connections).await {
            Ok(pool) => return Ok(pool),
            Err(err) => match policy.next_delay() {
                Some(delay) => {
                    tracing::warn!(
                        "database connection failed ({err}), retrying in {}s",
                        delay.as_secs()
                    );
                    tokio::time::sleep(delay).await;
                }
                None => return Err(err.into()),
            },
        }
    }
}

/// Periodic reconciliation: the sweep owns all automated presence
/// transitions. Errors are logged and the next tick tries again; the
/// transaction boundary inside the sweep prevents partial commits.
fn spawn_sweep_scheduler(state: clerva_core::AppState, interval_secs: u64) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(interval_secs.max(1)));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            match clerva_core::reconciler::run_sweep(&state).await {
                Ok(outcome) if outcome.skipped => {
                    tracing::warn!("presence sweep overlapped a previous run, skipped");
                }
                Ok(_) => {}
                Err(err) => {
                    tracing::error!("presence sweep failed: {err}");
                }
            }
        }
    });
}

/// Create the database parent directory before the pool opens the file.
fn ensure_data_dirs(config: &config::Config) {
    if let Some(db_path) = config
        .database
        .url
        .strip_prefix("sqlite://")
        .and_then(|s| s.split('?').next())
    {
        if let Some(parent) = std::path::Path::new(db_path).parent() {
            if !parent.as_os_str().is_empty() {
                if let Err(e) = std::fs::create_dir_all(parent) {
                    tracing::warn!("could not create directory {parent:?}: {e}");
                }
            }
        }
    }
}
