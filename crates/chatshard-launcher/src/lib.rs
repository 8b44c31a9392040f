//! chatshard-launcher — migration-worker provisioning.
//!
//! The scheduler never talks to the container engine directly. It sends a
//! [`SpawnRequest`] onto a bounded queue; a single dispatcher task drains
//! the queue, drives the engine, and delivers exactly one reply per request
//! on its oneshot channel. Callers wait on the reply under their own
//! deadline and treat a timeout as a failed spawn.
//!
//! The engine itself sits behind [`ContainerEngine`] so the dispatcher and
//! everything above it can be exercised with [`NullEngine`] in tests.

pub mod dispatcher;
pub mod engine;
pub mod error;

pub use dispatcher::{run_dispatcher, Launcher, SpawnRequest, SPAWN_QUEUE_DEPTH};
pub use engine::{ContainerEngine, DockerEngine, EngineConfig, NullEngine};
pub use error::{LaunchError, LaunchResult};
