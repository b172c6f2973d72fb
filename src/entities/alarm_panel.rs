// MIT License - Copyright (c) 2026 Peter Wright
// Alula / Cove bridge

use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use crate::config::ArmMode;
use crate::coordinator::UpdateCoordinator;
use crate::devices::{PanelSnapshot, TroubleFlags};
use crate::entities::{DeviceInfo, Entity, EntityState, Platform, timestamp_value};
use crate::error::{AlulaError, ErrorKind, Result};
use crate::snapshot::AccountSnapshot;

/// Commands accepted by the alarm panel. No code is required for any of them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlarmCommand {
    ArmHome,
    ArmAway,
    ArmNight,
    Disarm,
}

impl AlarmCommand {
    /// Parse a Home Assistant command payload.
    pub fn from_payload(payload: &str) -> Option<Self> {
        match payload.trim() {
            "ARM_HOME" => Some(Self::ArmHome),
            "ARM_AWAY" => Some(Self::ArmAway),
            "ARM_NIGHT" => Some(Self::ArmNight),
            "DISARM" => Some(Self::Disarm),
            _ => None,
        }
    }

    pub fn as_payload(&self) -> &'static str {
        match self {
            Self::ArmHome => "ARM_HOME",
            Self::ArmAway => "ARM_AWAY",
            Self::ArmNight => "ARM_NIGHT",
            Self::Disarm => "DISARM",
        }
    }

    fn arm_mode(&self) -> Option<ArmMode> {
        match self {
            Self::ArmHome => Some(ArmMode::Stay),
            Self::ArmAway => Some(ArmMode::Away),
            Self::ArmNight => Some(ArmMode::Night),
            Self::Disarm => None,
        }
    }
}

/// Features advertised in discovery.
pub const SUPPORTED_FEATURES: [&str; 3] = ["arm_home", "arm_away", "arm_night"];

/// Alarm control panel for one Cove panel.
pub struct AlarmPanelEntity {
    device_id: String,
    name: String,
    device: DeviceInfo,
    coordinator: UpdateCoordinator,
}

impl AlarmPanelEntity {
    pub fn new(panel: &PanelSnapshot, device: DeviceInfo, coordinator: UpdateCoordinator) -> Self {
        Self {
            device_id: panel.device_id.clone(),
            name: panel.name.clone(),
            device,
            coordinator,
        }
    }

    pub async fn alarm_arm_home(&self) -> Result<()> {
        self.execute(AlarmCommand::ArmHome).await
    }

    pub async fn alarm_arm_away(&self) -> Result<()> {
        self.execute(AlarmCommand::ArmAway).await
    }

    pub async fn alarm_arm_night(&self) -> Result<()> {
        self.execute(AlarmCommand::ArmNight).await
    }

    pub async fn alarm_disarm(&self) -> Result<()> {
        self.execute(AlarmCommand::Disarm).await
    }

    /// Forward a command to the cloud, then ask the coordinator for a refresh.
    ///
    /// `Ok` means the cloud accepted the request, not that the panel changed
    /// state; the new state arrives with a later snapshot. Rejections are
    /// returned to the caller and never retried.
    pub async fn execute(&self, command: AlarmCommand) -> Result<()> {
        info!("{} on {} ({})", command.as_payload(), self.name, self.device_id);
        let client = self.coordinator.client();
        let sent = match command.arm_mode() {
            Some(mode) => client.arm(&self.device_id, mode).await,
            None => client.disarm(&self.device_id).await,
        };
        if let Err(e) = sent {
            warn!("{} rejected for {}: {e}", command.as_payload(), self.device_id);
            return Err(match e {
                e @ AlulaError::CommandRejected { .. } => e,
                e if e.kind() == ErrorKind::Authentication || e.is_retryable() => e,
                e => AlulaError::CommandRejected {
                    device_id: self.device_id.clone(),
                    reason: e.to_string(),
                },
            });
        }

        if let Err(e) = self.coordinator.request_refresh().await {
            debug!("Refresh after {} failed: {e}", command.as_payload());
        }
        Ok(())
    }
}

impl Entity for AlarmPanelEntity {
    fn unique_id(&self) -> String {
        format!("{}_alarm", self.device_id)
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn platform(&self) -> Platform {
        Platform::AlarmControlPanel
    }

    fn device_id(&self) -> &str {
        &self.device_id
    }

    fn device_info(&self) -> &DeviceInfo {
        &self.device
    }

    fn render(&self, snapshot: &AccountSnapshot) -> Option<EntityState> {
        let panel = snapshot.panel(&self.device_id)?;
        let mut attributes = Map::new();
        attributes.insert("last_armed_at".into(), timestamp_value(panel.last_armed_at));
        attributes.insert("last_disarmed_at".into(), timestamp_value(panel.last_disarmed_at));
        attributes.insert(
            "online_status_timestamp".into(),
            timestamp_value(panel.online_since),
        );
        attributes.insert("any_trouble".into(), Value::Bool(panel.any_trouble()));
        attributes.insert(
            "ac_failure".into(),
            Value::Bool(panel.has_trouble(TroubleFlags::AC_FAILURE)),
        );
        attributes.insert(
            "low_battery".into(),
            Value::Bool(panel.has_trouble(TroubleFlags::LOW_BATTERY)),
        );
        attributes.insert(
            "arming_level_raw".into(),
            Value::String(panel.arming_level_raw.clone()),
        );
        Some(EntityState {
            state: panel.arming_state.as_ha_state().to_string(),
            attributes,
            icon: None,
        })
    }

    /// Unlike the sensors, the panel also goes unavailable while the cloud
    /// reports it offline.
    fn available(&self, snapshot: &AccountSnapshot, coordinator_available: bool) -> bool {
        coordinator_available
            && snapshot.panel(&self.device_id).is_some_and(|p| p.online)
    }

    fn as_alarm_panel(&self) -> Option<&AlarmPanelEntity> {
        Some(self)
    }
}
