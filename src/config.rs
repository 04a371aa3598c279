//! Command line options.
//!
//! Every option can also be set through the environment, which is how the
//! operator Deployment configures it.

use std::time::Duration;

use clap::{Parser, ValueEnum};

use crate::controller::backoff::RetryPolicy;
use crate::controller::context::Settings;

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Json,
    Text,
}

/// cli options
#[derive(Debug, Clone, Parser)]
#[command(
    name = "memcached-operator",
    about = "Keeps memcached + mcrouter clusters converged with Memcached resources",
    version
)]
pub struct OperatorOpt {
    /// Server-side timeout of one watch request, must stay below 295
    #[arg(long, env = "WATCH_TIMEOUT_SECONDS", default_value_t = 240,
          value_parser = clap::value_parser!(u64).range(1..295))]
    pub watch_timeout_seconds: u64,

    /// Pause between two periodic resyncs
    #[arg(long, env = "RESYNC_INTERVAL_SECONDS", default_value_t = 60)]
    pub resync_interval_seconds: u64,

    /// Pause after a failed loop iteration
    #[arg(long, env = "ERROR_BACKOFF_SECONDS", default_value_t = 5)]
    pub error_backoff_seconds: u64,

    /// Also manage a router ConfigMap per cluster
    #[arg(long, env = "ROUTER_CONFIGMAP")]
    pub router_configmap: bool,

    /// Polls while waiting for a ReplicaSet to drain
    #[arg(long, env = "DRAIN_ATTEMPTS", default_value_t = 5)]
    pub drain_attempts: u32,

    /// Linear increment of the wait between drain polls
    #[arg(long, env = "DRAIN_STEP_SECONDS", default_value_t = 2)]
    pub drain_step_seconds: u64,

    /// Port of the health and metrics server
    #[arg(long, env = "HEALTH_PORT", default_value_t = 8080)]
    pub health_port: u16,

    #[arg(long, env = "LOG_FORMAT", value_enum, default_value_t = LogFormat::Json)]
    pub log_format: LogFormat,

    /// Print the CustomResourceDefinition and exit
    #[arg(long)]
    pub print_crd: bool,
}

impl OperatorOpt {
    /// Controller settings derived from the options.
    pub fn settings(&self) -> Settings {
        Settings {
            watch_timeout: Duration::from_secs(self.watch_timeout_seconds),
            resync_interval: Duration::from_secs(self.resync_interval_seconds),
            error_backoff: Duration::from_secs(self.error_backoff_seconds),
            router_configmap: self.router_configmap,
            drain_policy: RetryPolicy::new(
                self.drain_attempts,
                Duration::from_secs(self.drain_step_seconds),
            ),
        }
    }

    /// Grace period for both loops to notice shutdown.
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.watch_timeout_seconds + 5)
    }
}
