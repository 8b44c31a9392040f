//! Container engine abstraction and the Docker implementation.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bollard::container::{Config, CreateContainerOptions, StartContainerOptions};
use bollard::models::HostConfig;
use bollard::Docker;
use tracing::debug;
use uuid::Uuid;

use crate::error::{LaunchError, LaunchResult};

/// The capability the launcher needs from a container runtime.
#[async_trait]
pub trait ContainerEngine: Send + Sync + 'static {
    /// Reachability probe, run once at daemon boot.
    async fn ping(&self) -> LaunchResult<()>;

    /// Create and start one migration-worker container for `worker_id`.
    async fn start_migration_worker(&self, worker_id: Uuid) -> LaunchResult<()>;
}

/// Static configuration for migration-worker containers.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Image tag of the migration-worker binary. Assumed present locally.
    pub image_tag: String,
    /// Container name prefix; the full name is `{prefix}-{first 8 of uuid}`.
    pub container_prefix: String,
    /// Overlay network the worker joins.
    pub network: String,
    /// DSN of the shared-state store, handed to the worker.
    pub pg_conn: String,
    /// Backoff settings forwarded verbatim so worker retries behave like
    /// controller retries.
    pub max_retries: String,
    pub init_retry_backoff: String,
    pub backoff_type: String,
}

impl EngineConfig {
    fn worker_env(&self, worker_id: Uuid) -> Vec<String> {
        vec![
            format!("PG_CONN={}", self.pg_conn),
            format!("M_WORKER_ID={worker_id}"),
            format!("MAX_RETRIES={}", self.max_retries),
            format!("INIT_RETRY_BACKOFF={}", self.init_retry_backoff),
            format!("BACKOFF_TYPE={}", self.backoff_type),
        ]
    }

    fn container_name(&self, worker_id: Uuid) -> String {
        let simple = worker_id.simple().to_string();
        format!("{}-{}", self.container_prefix, &simple[..8])
    }
}

/// Docker-backed engine.
pub struct DockerEngine {
    docker: Docker,
    config: EngineConfig,
}

impl DockerEngine {
    /// Connect to the local Docker daemon.
    pub fn connect(config: EngineConfig) -> LaunchResult<Self> {
        let docker = Docker::connect_with_local_defaults()?;
        Ok(Self { docker, config })
    }
}

#[async_trait]
impl ContainerEngine for DockerEngine {
    async fn ping(&self) -> LaunchResult<()> {
        self.docker.ping().await?;
        Ok(())
    }

    async fn start_migration_worker(&self, worker_id: Uuid) -> LaunchResult<()> {
        let name = self.config.container_name(worker_id);

        let container_config = Config {
            image: Some(self.config.image_tag.clone()),
            env: Some(self.config.worker_env(worker_id)),
            host_config: Some(HostConfig {
                network_mode: Some(self.config.network.clone()),
                ..Default::default()
            }),
            ..Default::default()
        };

        self.docker
            .create_container(
                Some(CreateContainerOptions {
                    name: name.as_str(),
                    platform: None,
                }),
                container_config,
            )
            .await?;
        debug!(container = %name, worker_id = %worker_id, "migration worker container created");

        self.docker
            .start_container(&name, None::<StartContainerOptions<String>>)
            .await?;
        debug!(container = %name, "migration worker container started");

        Ok(())
    }
}

/// Engine that never touches a container runtime.
///
/// Used by tests and dry runs; can be configured to fail or to take a
/// while, and counts how many spawns it received.
#[derive(Debug, Default)]
pub struct NullEngine {
    fail: bool,
    delay: Option<Duration>,
    calls: AtomicUsize,
}

impl NullEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Engine whose spawns always fail.
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    /// Engine whose spawns take `delay` before succeeding.
    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::default()
        }
    }

    /// Number of spawn calls received so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ContainerEngine for NullEngine {
    async fn ping(&self) -> LaunchResult<()> {
        Ok(())
    }

    async fn start_migration_worker(&self, _worker_id: Uuid) -> LaunchResult<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail {
            Err(LaunchError::Engine("null engine refused the spawn".into()))
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> EngineConfig {
        EngineConfig {
            image_tag: "chatshard/m-worker:latest".into(),
            container_prefix: "m-worker".into(),
            network: "chatshard-net".into(),
            pg_conn: "postgres://shared".into(),
            max_retries: "3".into(),
            init_retry_backoff: "15".into(),
            backoff_type: "exp".into(),
        }
    }

    #[test]
    fn container_name_uses_short_uuid() {
        let config = test_config();
        let id = Uuid::new_v4();
        let name = config.container_name(id);
        assert!(name.starts_with("m-worker-"));
        assert_eq!(name.len(), "m-worker-".len() + 8);
    }

    #[test]
    fn worker_env_carries_identity_and_backoff() {
        let config = test_config();
        let id = Uuid::new_v4();
        let env = config.worker_env(id);
        assert!(env.contains(&format!("M_WORKER_ID={id}")));
        assert!(env.contains(&"PG_CONN=postgres://shared".to_string()));
        assert!(env.contains(&"BACKOFF_TYPE=exp".to_string()));
    }
}
