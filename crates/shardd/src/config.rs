//! Daemon configuration, read once from the environment at startup.

use std::str::FromStr;
use std::time::Duration;

use anyhow::Context;

use chatshard_control::ReconcilerConfig;
use chatshard_launcher::EngineConfig;
use chatshard_store::env;

/// The shadow serves on the leader's base port plus this offset.
pub const SHADOW_PORT_OFFSET: u16 = 1;

const DEFAULT_BASE_HTTP_PORT: u16 = 8080;

/// Which logger the daemon sets up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppEnv {
    Dev,
    Prod,
}

impl FromStr for AppEnv {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "dev" => Ok(AppEnv::Dev),
            "prod" => Ok(AppEnv::Prod),
            other => anyhow::bail!("invalid app environment {other:?} (expected dev or prod)"),
        }
    }
}

impl AppEnv {
    /// Read `APP_ENV`; required, no default.
    pub fn from_env() -> anyhow::Result<Self> {
        std::env::var("APP_ENV")
            .context("APP_ENV must be set")?
            .parse()
    }
}

/// Everything the daemon reads from the environment.
///
/// `APP_ENV`, `SHADOW` and `PG_CONN` are mandatory; every tunable falls
/// back to its stated default with a warning when it does not parse.
#[derive(Debug, Clone)]
pub struct Config {
    pub app_env: AppEnv,
    pub shadow: bool,
    pub base_http_port: u16,
    pub pg_conn: String,
    pub heartbeat_backoff: Duration,
    pub controller_heartbeat_timeout: Duration,
    pub check_controller_backoff: Duration,
    pub check_worker_backoff: Duration,
    pub worker_heartbeat_timeout: Duration,
    pub minimum_worker_uptime: Duration,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        let app_env = AppEnv::from_env()?;
        let shadow = std::env::var("SHADOW")
            .context("SHADOW must be set")?
            .to_lowercase()
            == "true";
        let pg_conn = std::env::var("PG_CONN").context("PG_CONN must be set")?;

        Ok(Self {
            app_env,
            shadow,
            base_http_port: env::u16_or("BASE_HTTP_PORT", DEFAULT_BASE_HTTP_PORT),
            pg_conn,
            heartbeat_backoff: env::duration_secs_or("HEARTBEAT_BACKOFF", Duration::from_secs(5)),
            controller_heartbeat_timeout: env::duration_secs_or(
                "CONTROLLER_HEARTBEAT_TIMEOUT",
                Duration::from_secs(10),
            ),
            check_controller_backoff: env::duration_secs_or(
                "CHECK_CONTROLLER_BACKOFF",
                Duration::from_secs(3),
            ),
            check_worker_backoff: env::duration_secs_or(
                "CHECK_WORKER_BACKOFF",
                Duration::from_secs(5),
            ),
            worker_heartbeat_timeout: env::duration_secs_or(
                "WORKER_HEARTBEAT_TIMEOUT",
                Duration::from_secs(5),
            ),
            minimum_worker_uptime: env::duration_secs_or(
                "MINIMUM_WORKER_UPTIME",
                Duration::from_secs(5),
            ),
        })
    }

    /// The port this instance actually serves on.
    pub fn http_port(&self) -> u16 {
        if self.shadow {
            self.base_http_port + SHADOW_PORT_OFFSET
        } else {
            self.base_http_port
        }
    }

    /// Container-engine settings for migration workers. The backoff values
    /// are forwarded verbatim so the workers retry the way the controller
    /// does.
    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            image_tag: env::string_or("M_WORKER_IMAGE_TAG", "chatshard/m-worker:latest"),
            container_prefix: env::string_or("M_WORKER_CONTAINER_PREFIX", "m-worker"),
            network: env::string_or("M_WORKER_NETWORK", "chatshard-net"),
            pg_conn: self.pg_conn.clone(),
            max_retries: env::string_or("MAX_RETRIES", "3"),
            init_retry_backoff: env::string_or("INIT_RETRY_BACKOFF", "15"),
            backoff_type: env::string_or("BACKOFF_TYPE", "exp"),
        }
    }

    pub fn reconciler_config(&self) -> ReconcilerConfig {
        ReconcilerConfig {
            controller_timeout: self.controller_heartbeat_timeout,
            worker_timeout: self.worker_heartbeat_timeout,
            minimum_uptime: self.minimum_worker_uptime,
        }
    }
}
