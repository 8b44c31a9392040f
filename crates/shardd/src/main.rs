//! shardd — the chatshard control-plane daemon.
//!
//! One process is the leader, a second is its hot standby (shadow),
//! selected by the `SHADOW` environment variable. All shared state lives in
//! the Postgres store named by `PG_CONN`; migration workers are launched as
//! containers through the local Docker daemon.
//!
//! Exit code 0 means a clean shutdown; anything else is a fatal error the
//! supervisor is expected to catch by restarting the process.

mod config;
mod controller;

use std::sync::Arc;

use anyhow::Context;
use tracing::info;
use tracing_subscriber::EnvFilter;

use chatshard_control::{Reconciler, Scheduler};
use chatshard_launcher::{ContainerEngine, DockerEngine, Launcher};
use chatshard_store::{PgStore, RetryPolicy};

use config::{AppEnv, Config};
use controller::Controller;

/// Bounded size of the shared store connection pool.
const STORE_POOL_SIZE: u32 = 8;

fn init_tracing(app_env: AppEnv) {
    match app_env {
        AppEnv::Prod => {
            tracing_subscriber::fmt()
                .json()
                .with_env_filter(
                    EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".parse().unwrap()),
                )
                .init();
        }
        AppEnv::Dev => {
            tracing_subscriber::fmt()
                .with_env_filter(
                    EnvFilter::try_from_default_env()
                        .unwrap_or_else(|_| "debug,sqlx=info".parse().unwrap()),
                )
                .init();
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // The logger depends on APP_ENV, so that is read before anything else
    // gets a chance to log.
    let app_env = AppEnv::from_env()?;
    init_tracing(app_env);
    info!(environment = ?app_env, "logger initialized");

    let config = Config::from_env()?;

    let store = PgStore::connect(&config.pg_conn, STORE_POOL_SIZE)
        .await
        .context("establishing the shared-state store connection failed")?;
    info!("shared-state store reachable");

    let engine = DockerEngine::connect(config.engine_config())
        .context("creating the container engine client failed")?;
    engine
        .ping()
        .await
        .context("could not ping the container engine")?;
    info!("container engine reachable");

    let retry = RetryPolicy::from_env();
    let (launcher, spawn_rx) = Launcher::channel();

    let scheduler = Arc::new(Scheduler::new(store.clone(), retry.clone(), launcher));
    let reconciler = Arc::new(Reconciler::new(
        store,
        retry,
        config.reconciler_config(),
    ));

    let controller = Controller::new(config, scheduler, reconciler);
    controller.run(Arc::new(engine), spawn_rx).await
}
