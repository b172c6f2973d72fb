// MIT License - Copyright (c) 2026 Peter Wright
// Alula / Cove bridge

use std::time::Duration;

/// Arming level requested from the cloud.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArmMode {
    /// Perimeter armed, occupants at home ("stay")
    Stay,
    /// Full arm
    Away,
    /// Night arm
    Night,
}

impl ArmMode {
    /// The `armingLevel` value the cloud expects.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Stay => "stay",
            Self::Away => "away",
            Self::Night => "night",
        }
    }
}

/// Shortest poll interval the coordinator will run at.
pub const MIN_UPDATE_INTERVAL_MS: u64 = 1_000;

/// Timing and thresholds for the update coordinator.
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Poll interval in milliseconds (default: 30000)
    pub update_interval_ms: u64,
    /// Consecutive failed refreshes before entities turn unavailable (default: 3)
    pub failure_threshold: u32,
    /// Upper bound for a single fetch, in milliseconds (default: 20000)
    pub fetch_timeout_ms: u64,
    /// Capacity of the change event broadcast channel
    pub event_capacity: usize,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            update_interval_ms: 30_000,
            failure_threshold: 3,
            fetch_timeout_ms: 20_000,
            event_capacity: 256,
        }
    }
}

impl CoordinatorConfig {
    /// Create a new config builder starting from defaults.
    pub fn builder() -> CoordinatorConfigBuilder {
        CoordinatorConfigBuilder::default()
    }

    /// Poll period, never shorter than [`MIN_UPDATE_INTERVAL_MS`].
    pub fn update_interval(&self) -> Duration {
        Duration::from_millis(self.update_interval_ms.max(MIN_UPDATE_INTERVAL_MS))
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_millis(self.fetch_timeout_ms)
    }
}

/// Builder for CoordinatorConfig.
#[derive(Debug, Clone, Default)]
pub struct CoordinatorConfigBuilder {
    config: CoordinatorConfig,
}

impl CoordinatorConfigBuilder {
    /// Values below [`MIN_UPDATE_INTERVAL_MS`] are raised to it.
    pub fn update_interval_ms(mut self, ms: u64) -> Self {
        self.config.update_interval_ms = ms.max(MIN_UPDATE_INTERVAL_MS);
        self
    }

    /// A threshold of 0 is treated as 1: the first failure marks entities unavailable.
    pub fn failure_threshold(mut self, threshold: u32) -> Self {
        self.config.failure_threshold = threshold.max(1);
        self
    }

    pub fn fetch_timeout_ms(mut self, ms: u64) -> Self {
        self.config.fetch_timeout_ms = ms;
        self
    }

    pub fn event_capacity(mut self, capacity: usize) -> Self {
        self.config.event_capacity = capacity.max(1);
        self
    }

    pub fn build(self) -> CoordinatorConfig {
        self.config
    }
}

/// Connection settings for the Cove cloud adapter.
#[derive(Debug, Clone)]
pub struct CloudConfig {
    /// API base URL, without trailing slash
    pub base_url: String,
    /// OAuth client id sent with the password and refresh grants
    pub oauth_client_id: String,
    /// OAuth client secret, if the deployment requires one
    pub oauth_client_secret: Option<String>,
    /// Per-request timeout in milliseconds
    pub request_timeout_ms: u64,
}

impl Default for CloudConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.alula.net".to_string(),
            oauth_client_id: "cove-connect".to_string(),
            oauth_client_secret: None,
            request_timeout_ms: 15_000,
        }
    }
}

impl CloudConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}
