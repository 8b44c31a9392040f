//! chatshard-api — HTTP surface of the control plane.
//!
//! # Routes
//!
//! | Method | Path | Leader | Shadow |
//! |---|---|---|---|
//! | GET | `/health` | 200, 424 when the store is unreachable | same |
//! | POST | `/mapping/startup` | 200 / 500 | 403 |
//! | POST | `/migrate?from&to&goal_url` | 204 / 400 / 500 | 403 |
//! | GET | `/state` | 200 JSON / 500 | 403 |
//!
//! Every request gets a fresh trace id from the [`trace`] middleware; error
//! bodies are short plain text derived from the underlying error.

pub mod handlers;
pub mod trace;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use axum::routing::{get, post};
use axum::{middleware, Router};

use chatshard_control::{Reconciler, Scheduler};
use chatshard_store::ControlStore;

/// Shared state for the HTTP handlers.
pub struct ApiState<S> {
    pub scheduler: Arc<Scheduler<S>>,
    pub reconciler: Arc<Reconciler<S>>,
    /// Flipped exactly once, on promotion; handlers read it relaxed.
    pub shadow: Arc<AtomicBool>,
}

impl<S> Clone for ApiState<S> {
    fn clone(&self) -> Self {
        Self {
            scheduler: Arc::clone(&self.scheduler),
            reconciler: Arc::clone(&self.reconciler),
            shadow: Arc::clone(&self.shadow),
        }
    }
}

impl<S> ApiState<S> {
    pub fn is_shadow(&self) -> bool {
        self.shadow.load(Ordering::Relaxed)
    }
}

/// Build the control-plane router.
pub fn build_router<S>(state: ApiState<S>) -> Router
where
    S: ControlStore + Clone + 'static,
{
    Router::new()
        .route("/health", get(handlers::health::<S>))
        .route("/mapping/startup", post(handlers::startup_mapping::<S>))
        .route("/migrate", post(handlers::migrate::<S>))
        .route("/state", get(handlers::system_state::<S>))
        .layer(middleware::from_fn(trace::assign_trace_id))
        .with_state(state)
}
