//! Shared context for the controller.
//!
//! The Context struct holds what both long-running loops share: the API
//! handle, runtime settings, the sleeper and optional health state.

use std::sync::Arc;
use std::time::Duration;

use crate::controller::backoff::{RetryPolicy, Sleeper, TokioSleeper};
use crate::health::HealthState;

/// Field manager name for the operator
pub const FIELD_MANAGER: &str = "memcached-operator";

/// Runtime knobs of the controller.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Settings {
    /// Server-side timeout of one watch request.
    pub watch_timeout: Duration,
    /// Pause between two resync ticks.
    pub resync_interval: Duration,
    /// Pause after a loop iteration fails.
    pub error_backoff: Duration,
    /// Whether each cluster also gets a router ConfigMap.
    pub router_configmap: bool,
    /// How long the reaper waits for a ReplicaSet to drain.
    pub drain_policy: RetryPolicy,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            watch_timeout: Duration::from_secs(240),
            resync_interval: Duration::from_secs(60),
            error_backoff: Duration::from_secs(5),
            router_configmap: false,
            drain_policy: RetryPolicy::default(),
        }
    }
}

/// Shared context for the controller
pub struct Context<A> {
    /// Cluster API
    pub api: A,
    pub settings: Settings,
    /// Every wait goes through this
    pub sleeper: Arc<dyn Sleeper>,
    /// Optional health state for metrics and readiness
    pub health_state: Option<Arc<HealthState>>,
}

impl<A> Context<A> {
    /// Create a new context sleeping on the tokio timer
    pub fn new(api: A, settings: Settings, health_state: Option<Arc<HealthState>>) -> Self {
        Self {
            api,
            settings,
            sleeper: Arc::new(TokioSleeper),
            health_state,
        }
    }

    /// Replace the sleeper (tests use a recording one)
    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    /// Wait through the configured sleeper.
    pub async fn sleep(&self, duration: Duration) {
        self.sleeper.sleep(duration).await;
    }

    /// Watch timeout in whole seconds, as the API expects it.
    pub fn watch_timeout_secs(&self) -> u32 {
        u32::try_from(self.settings.watch_timeout.as_secs()).unwrap_or(u32::MAX)
    }
}
