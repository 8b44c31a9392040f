//! Spawn-request queue and dispatcher.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use chatshard_store::OpCtx;

use crate::engine::ContainerEngine;
use crate::error::{LaunchError, LaunchResult};

/// Queue depth; senders wait once this many requests are in flight.
pub const SPAWN_QUEUE_DEPTH: usize = 10;

/// One request to provision a migration worker.
pub struct SpawnRequest {
    pub trace_id: Uuid,
    pub worker_id: Uuid,
    pub cancel: CancellationToken,
    pub reply: oneshot::Sender<LaunchResult<()>>,
}

/// Caller-side handle onto the launcher queue.
#[derive(Clone)]
pub struct Launcher {
    tx: mpsc::Sender<SpawnRequest>,
}

impl Launcher {
    /// Create the handle and the receiving end for [`run_dispatcher`].
    pub fn channel() -> (Self, mpsc::Receiver<SpawnRequest>) {
        let (tx, rx) = mpsc::channel(SPAWN_QUEUE_DEPTH);
        (Self { tx }, rx)
    }

    /// Request a migration-worker spawn and wait for the reply.
    ///
    /// The deadline is the caller's own; when it elapses the spawn is
    /// treated as failed and the caller is expected to roll back whatever
    /// it provisioned around it.
    pub async fn spawn_migration_worker(
        &self,
        ctx: &OpCtx,
        worker_id: Uuid,
        deadline: Duration,
    ) -> LaunchResult<()> {
        let (reply_tx, reply_rx) = oneshot::channel();
        let request = SpawnRequest {
            trace_id: ctx.trace_id,
            worker_id,
            cancel: ctx.cancel.clone(),
            reply: reply_tx,
        };
        self.tx
            .send(request)
            .await
            .map_err(|_| LaunchError::QueueClosed)?;

        match tokio::time::timeout(deadline, reply_rx).await {
            Err(_) => Err(LaunchError::ReplyTimeout),
            Ok(Err(_)) => Err(LaunchError::QueueClosed),
            Ok(Ok(result)) => result,
        }
    }
}

/// Drain the spawn queue until every [`Launcher`] handle is gone.
///
/// Requests are handled one at a time: the engine call runs in its own task
/// and the dispatcher selects between its result and the request's
/// cancellation. Exactly one reply is delivered either way.
pub async fn run_dispatcher<E: ContainerEngine>(engine: Arc<E>, mut rx: mpsc::Receiver<SpawnRequest>) {
    info!("launcher dispatcher started");
    while let Some(request) = rx.recv().await {
        handle_spawn(Arc::clone(&engine), request).await;
    }
    info!("launcher dispatcher stopped");
}

async fn handle_spawn<E: ContainerEngine>(engine: Arc<E>, request: SpawnRequest) {
    info!(
        trace_id = %request.trace_id,
        worker_id = %request.worker_id,
        "received request to start migration worker"
    );

    let worker_id = request.worker_id;
    let call = tokio::spawn(async move { engine.start_migration_worker(worker_id).await });

    let result = tokio::select! {
        _ = request.cancel.cancelled() => {
            warn!(trace_id = %request.trace_id, worker_id = %worker_id, "spawn request cancelled");
            Err(LaunchError::Cancelled)
        }
        joined = call => match joined {
            Ok(result) => result,
            Err(join_err) => Err(LaunchError::Engine(format!("spawn task failed: {join_err}"))),
        },
    };

    if request.reply.send(result).is_err() {
        debug!(worker_id = %worker_id, "spawn requester went away before the reply");
    }
}
