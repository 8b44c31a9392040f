//! Controller shell — the leader/shadow state machine and its loops.
//!
//! A booting instance becomes either the leader or the shadow, decided by
//! the `SHADOW` flag; the only other transition is shadow → leader when the
//! leader's heartbeat goes stale. The shadow runs nothing but the
//! controller-up check (and its HTTP surface, which refuses mutations);
//! promotion flips the shadow flag and starts the leader loops.
//!
//! Fatal store failures terminate the process so the supervisor restarts it
//! into `Booting` and the other instance observes the heartbeat gap.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::sync::{mpsc, watch};
use tracing::{error, info, warn};

use chatshard_api::{build_router, ApiState};
use chatshard_control::{ControlError, Reconciler, Scheduler};
use chatshard_launcher::{run_dispatcher, ContainerEngine, SpawnRequest};
use chatshard_store::{ControlStore, OpCtx};

use crate::config::Config;

/// How often the failure-rate aggregation runs.
const FAILURE_RATE_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// The daemon's top-level composition: HTTP surface, launcher dispatcher,
/// and the periodic loops appropriate to the current role.
pub struct Controller<S> {
    config: Config,
    scheduler: Arc<Scheduler<S>>,
    reconciler: Arc<Reconciler<S>>,
    shadow: Arc<AtomicBool>,
}

impl<S> Clone for Controller<S> {
    fn clone(&self) -> Self {
        Self {
            config: self.config.clone(),
            scheduler: Arc::clone(&self.scheduler),
            reconciler: Arc::clone(&self.reconciler),
            shadow: Arc::clone(&self.shadow),
        }
    }
}

impl<S> Controller<S>
where
    S: ControlStore + Clone + 'static,
{
    pub fn new(
        config: Config,
        scheduler: Arc<Scheduler<S>>,
        reconciler: Arc<Reconciler<S>>,
    ) -> Self {
        let shadow = Arc::new(AtomicBool::new(config.shadow));
        Self {
            config,
            scheduler,
            reconciler,
            shadow,
        }
    }

    /// Run until a shutdown signal arrives. Blocks on the HTTP server; all
    /// loops are background tasks tied to the shutdown channel.
    pub async fn run<E: ContainerEngine>(
        self,
        engine: Arc<E>,
        spawn_rx: mpsc::Receiver<SpawnRequest>,
    ) -> anyhow::Result<()> {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        tokio::spawn(run_dispatcher(engine, spawn_rx));

        if self.shadow.load(Ordering::Relaxed) {
            info!("starting as shadow");
            self.spawn_controller_watch(shutdown_rx.clone());
        } else {
            info!("starting as leader");
            self.reconciler
                .register_controller(&OpCtx::background())
                .await
                .context("could not register controller")?;
            self.start_leader_loops(&shutdown_rx);
        }

        let state = ApiState {
            scheduler: Arc::clone(&self.scheduler),
            reconciler: Arc::clone(&self.reconciler),
            shadow: Arc::clone(&self.shadow),
        };
        let router = build_router(state);

        let addr = SocketAddr::from(([0, 0, 0, 0], self.config.http_port()));
        info!(%addr, shadow = self.shadow.load(Ordering::Relaxed), "HTTP server starting");
        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .context("could not bind the HTTP port")?;

        axum::serve(listener, router)
            .with_graceful_shutdown(async move {
                tokio::signal::ctrl_c()
                    .await
                    .expect("failed to install CTRL+C handler");
                info!("shutdown signal received");
                let _ = shutdown_tx.send(true);
            })
            .await
            .context("serving HTTP traffic failed")?;

        info!("controller stopped");
        Ok(())
    }

    // ── Shadow side ────────────────────────────────────────────────

    /// Watch the leader's heartbeat; on a detected crash, take over.
    fn spawn_controller_watch(&self, mut shutdown: watch::Receiver<bool>) {
        let controller = self.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(controller.config.check_controller_backoff);
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        match controller.reconciler.check_controller_up(&OpCtx::background()).await {
                            Ok(()) => {}
                            Err(ControlError::ControllerCrashed) => {
                                warn!("leader stopped heartbeating; taking over");
                                if let Err(err) = controller
                                    .reconciler
                                    .register_controller(&OpCtx::background())
                                    .await
                                {
                                    error!(error = %err, "could not register during takeover");
                                    std::process::exit(1);
                                }
                                controller.shadow.store(false, Ordering::Relaxed);
                                controller.start_leader_loops(&shutdown);
                                info!("promoted to leader");
                                break;
                            }
                            Err(err) if err.is_reconcilable() => {
                                warn!(error = %err, "controller check failed; skipping this interval");
                            }
                            Err(err) => {
                                error!(error = %err, "shadow reconciliation loop failed");
                                std::process::exit(1);
                            }
                        }
                    }
                    _ = shutdown.changed() => break,
                }
            }
        });
    }

    // ── Leader side ────────────────────────────────────────────────

    /// Start heartbeat, liveness and failure-rate loops.
    fn start_leader_loops(&self, shutdown: &watch::Receiver<bool>) {
        self.spawn_heartbeat_loop(shutdown.clone());
        self.spawn_liveness_loop(shutdown.clone());
        self.spawn_failure_rate_loop(shutdown.clone());
    }

    fn spawn_heartbeat_loop(&self, mut shutdown: watch::Receiver<bool>) {
        let controller = self.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(controller.config.heartbeat_backoff);
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        if let Err(err) = controller.reconciler.heartbeat(&OpCtx::background()).await {
                            error!(error = %err, "heartbeat failed");
                            // A dead store means this leader is useless; step
                            // down so the shadow can take over.
                            if controller.reconciler.ping(&OpCtx::background()).await.is_err() {
                                error!("shared store unreachable; stepping down");
                                std::process::exit(1);
                            }
                        }
                    }
                    _ = shutdown.changed() => break,
                }
            }
        });
    }

    fn spawn_liveness_loop(&self, mut shutdown: watch::Receiver<bool>) {
        let controller = self.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(controller.config.check_worker_backoff);
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        let ctx = OpCtx::background();
                        if let Err(err) = controller.reconciler.evaluate_workers(&ctx).await {
                            if !err.is_reconcilable() {
                                error!(error = %err, "fatal error evaluating worker state");
                                std::process::exit(1);
                            }
                            warn!(error = %err, "worker sweep failed; skipping this iteration");
                        }
                        if let Err(err) = controller.reconciler.evaluate_migration_workers(&ctx).await {
                            if !err.is_reconcilable() {
                                error!(error = %err, "fatal error evaluating migration workers");
                                std::process::exit(1);
                            }
                            warn!(error = %err, "migration-worker sweep failed; skipping this iteration");
                        }
                    }
                    _ = shutdown.changed() => break,
                }
            }
        });
    }

    fn spawn_failure_rate_loop(&self, mut shutdown: watch::Receiver<bool>) {
        let controller = self.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(FAILURE_RATE_INTERVAL);
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        if let Err(err) = controller
                            .reconciler
                            .check_failure_rate(&OpCtx::background())
                            .await
                        {
                            if !err.is_reconcilable() {
                                error!(error = %err, "fatal error checking failure rates");
                                std::process::exit(1);
                            }
                            warn!(error = %err, "failure-rate check failed; skipping this iteration");
                        }
                    }
                    _ = shutdown.changed() => break,
                }
            }
        });
    }
}
