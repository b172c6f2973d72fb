// MIT License - Copyright (c) 2026 Peter Wright
// Alula / Cove bridge

use std::sync::Arc;

use tracing::{debug, info};

use crate::config::CoordinatorConfig;
use crate::coordinator::UpdateCoordinator;
use crate::entry::{ConfigEntry, ConfigEntryStore};
use crate::error::{AlulaError, ErrorKind, Result};
use crate::transport::AccountClient;

/// Why an entry could not be set up.
#[derive(Debug, thiserror::Error)]
pub enum SetupError {
    /// Credentials rejected. Retrying will not help.
    #[error("Authentication failed: {0}")]
    AuthFailed(#[source] AlulaError),

    /// Transient failure; the caller should retry setup later.
    #[error("Not ready: {0}")]
    NotReady(#[source] AlulaError),
}

impl SetupError {
    fn from_error(e: AlulaError) -> Self {
        if e.kind() == ErrorKind::Authentication {
            SetupError::AuthFailed(e)
        } else {
            SetupError::NotReady(e)
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, SetupError::NotReady(_))
    }
}

/// A set-up entry with its running coordinator.
pub struct LoadedEntry {
    pub entry: ConfigEntry,
    pub coordinator: UpdateCoordinator,
}

/// Sign in for `entry`, do the first refresh and start polling.
///
/// A stored refresh token is tried first; if the cloud no longer accepts it
/// the stored username and password are used.
pub async fn setup_entry(
    entry: ConfigEntry,
    client: Arc<dyn AccountClient>,
    store: Arc<dyn ConfigEntryStore>,
    config: CoordinatorConfig,
) -> std::result::Result<LoadedEntry, SetupError> {
    info!("Setting up {}", entry.title);

    let mut restored = false;
    if let Some(ref token) = entry.data.refresh_token {
        client.restore_tokens(token).await;
        match client.refresh_session().await {
            Ok(_) => restored = true,
            Err(e) => debug!("Stored session rejected, logging in again: {e}"),
        }
    }
    if !restored {
        client
            .authenticate(&entry.data.username, &entry.data.password)
            .await
            .map_err(SetupError::from_error)?;
    }

    let coordinator =
        UpdateCoordinator::for_entry(Arc::clone(&client), config, entry.clone(), store);
    if let Err(e) = coordinator.request_refresh().await {
        coordinator.shutdown();
        return Err(SetupError::NotReady(e));
    }
    coordinator.start();

    Ok(LoadedEntry { entry, coordinator })
}

/// Stop polling for an entry. Entities turn unavailable.
pub fn unload_entry(loaded: LoadedEntry) {
    info!("Unloading {}", loaded.entry.title);
    loaded.coordinator.shutdown();
}

/// Unload an entry and delete it from the store. Returns whether the store
/// still held it.
pub async fn remove_entry(loaded: LoadedEntry, store: &dyn ConfigEntryStore) -> Result<bool> {
    let entry_id = loaded.entry.entry_id.clone();
    unload_entry(loaded);
    let removed = store.remove(&entry_id).await?;
    if removed {
        info!("Removed config entry {entry_id}");
    }
    Ok(removed)
}
