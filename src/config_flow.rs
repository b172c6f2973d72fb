// MIT License - Copyright (c) 2026 Peter Wright
// Alula / Cove bridge

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::{info, warn};

use crate::entry::{ConfigEntry, ConfigEntryStore, unique_id_for};
use crate::error::{ErrorKind, Result};
use crate::transport::AccountClient;

pub const FIELD_USERNAME: &str = "username";
pub const FIELD_PASSWORD: &str = "password";
/// Form-wide errors use this key instead of a field name.
pub const FIELD_BASE: &str = "base";

/// Credentials submitted by the user.
#[derive(Debug, Clone, Default)]
pub struct UserInput {
    pub username: String,
    pub password: String,
}

/// Outcome of one step of the flow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlowResult {
    /// Show the credentials form, with errors keyed by field
    ShowForm {
        errors: BTreeMap<&'static str, &'static str>,
    },
    /// Entry created and persisted
    CreateEntry(ConfigEntry),
    /// Flow stopped; nothing persisted
    Abort { reason: &'static str },
}

impl FlowResult {
    fn form_error(field: &'static str, key: &'static str) -> Self {
        FlowResult::ShowForm {
            errors: BTreeMap::from([(field, key)]),
        }
    }
}

/// Collects username and password, validates them against the cloud and
/// persists one config entry per account.
pub struct ConfigFlow {
    client: Arc<dyn AccountClient>,
    store: Arc<dyn ConfigEntryStore>,
}

impl ConfigFlow {
    pub fn new(client: Arc<dyn AccountClient>, store: Arc<dyn ConfigEntryStore>) -> Self {
        Self { client, store }
    }

    /// User step. `None` means the form has not been submitted yet.
    ///
    /// Only store failures are returned as `Err`; everything the user can fix
    /// comes back as a form error or an abort.
    pub async fn step_user(&self, input: Option<UserInput>) -> Result<FlowResult> {
        let Some(input) = input else {
            return Ok(FlowResult::ShowForm {
                errors: BTreeMap::new(),
            });
        };

        let username = input.username.trim();
        if username.is_empty() {
            return Ok(FlowResult::form_error(FIELD_USERNAME, "required"));
        }
        if input.password.is_empty() {
            return Ok(FlowResult::form_error(FIELD_PASSWORD, "required"));
        }

        let unique_id = unique_id_for(username);
        if self.store.find_by_unique_id(&unique_id).await?.is_some() {
            info!("Account {unique_id} is already configured");
            return Ok(FlowResult::Abort {
                reason: "already_configured",
            });
        }

        let token = match self.client.authenticate(username, &input.password).await {
            Ok(token) => token,
            Err(e) => {
                let kind = e.kind();
                if kind == ErrorKind::Authentication {
                    warn!("Login rejected for {username}: {e}");
                } else {
                    warn!("Cannot reach Cove cloud while validating {username}: {e}");
                }
                return Ok(FlowResult::form_error(FIELD_BASE, kind.form_error()));
            }
        };

        let entry = ConfigEntry::new(username, &input.password, token.refresh_token);
        if !self.store.add(entry.clone()).await? {
            // Another flow stored the same account while this one was logging in
            info!("Account {unique_id} was configured concurrently");
            return Ok(FlowResult::Abort {
                reason: "already_configured",
            });
        }
        info!("Created config entry {}", entry.title);
        Ok(FlowResult::CreateEntry(entry))
    }
}
