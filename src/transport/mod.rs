// MIT License - Copyright (c) 2026 Peter Wright
// Alula / Cove bridge

pub mod http;

use async_trait::async_trait;

use crate::config::ArmMode;
use crate::devices::{PanelSnapshot, Zone};
use crate::error::Result;

/// Tokens returned by a successful login or refresh.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenInfo {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_in: Option<u64>,
}

/// Raw result of one status fetch, before it becomes an `AccountSnapshot`.
#[derive(Debug, Clone, Default)]
pub struct AccountStatus {
    pub panels: Vec<PanelSnapshot>,
    pub zones: Vec<Zone>,
    pub camera_count: usize,
    /// Types of devices that are neither panels nor cameras
    pub other_device_types: Vec<String>,
}

impl AccountStatus {
    pub fn device_count(&self) -> usize {
        self.panels.len() + self.camera_count + self.other_device_types.len()
    }
}

/// Session with the Cove cloud for one account.
///
/// Shared as `Arc<dyn AccountClient>` between the coordinator and the
/// alarm panel entities; implementations handle their own interior locking.
#[async_trait]
pub trait AccountClient: Send + Sync {
    /// Log in with username and password.
    async fn authenticate(&self, username: &str, password: &str) -> Result<TokenInfo>;

    /// Seed the session with a refresh token persisted from an earlier login.
    async fn restore_tokens(&self, refresh_token: &str);

    /// Exchange the current refresh token for a new access token.
    async fn refresh_session(&self) -> Result<TokenInfo>;

    /// Fetch devices and zones for the account.
    async fn fetch_status(&self) -> Result<AccountStatus>;

    /// Request an arming level. Acceptance is not confirmation: the new state
    /// shows up in a later fetch.
    async fn arm(&self, device_id: &str, mode: ArmMode) -> Result<()>;

    async fn disarm(&self, device_id: &str) -> Result<()>;

    /// Current refresh token, if the session holds one.
    async fn refresh_token(&self) -> Option<String>;
}
