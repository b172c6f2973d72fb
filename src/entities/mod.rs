// MIT License - Copyright (c) 2026 Peter Wright
// Alula / Cove bridge

//! Home Assistant entities rendered from an [`AccountSnapshot`].
//!
//! Entities hold no state of their own beyond identity. Every render reads
//! one snapshot, so all entities published in an update cycle agree.

pub mod alarm_panel;
pub mod binary_sensor;
pub mod sensor;

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};

use crate::coordinator::UpdateCoordinator;
use crate::devices::PanelSnapshot;
use crate::entry::DOMAIN;
use crate::snapshot::AccountSnapshot;

pub use alarm_panel::{AlarmCommand, AlarmPanelEntity};
pub use binary_sensor::ZoneBinarySensor;
pub use sensor::{LastEventSensor, TroubleSensor};

pub const MANUFACTURER: &str = "Alula / Cove";

/// Zone name overrides keyed `"<device id>/<zone index>"`.
pub type ZoneNames = BTreeMap<String, String>;

/// Home Assistant entity platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Platform {
    AlarmControlPanel,
    BinarySensor,
    Sensor,
}

impl Platform {
    /// MQTT discovery component name.
    pub fn component(&self) -> &'static str {
        match self {
            Self::AlarmControlPanel => "alarm_control_panel",
            Self::BinarySensor => "binary_sensor",
            Self::Sensor => "sensor",
        }
    }
}

/// Device registry block shared by every entity of one panel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceInfo {
    pub identifiers: Vec<String>,
    pub name: String,
    pub manufacturer: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", rename = "sw_version")]
    pub firmware: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub serial_number: Option<String>,
}

impl DeviceInfo {
    pub fn for_panel(panel: &PanelSnapshot) -> Self {
        Self {
            identifiers: vec![format!("{DOMAIN}_{}", panel.device_id)],
            name: panel.name.clone(),
            manufacturer: MANUFACTURER.to_string(),
            model: panel.model.clone(),
            firmware: panel.firmware.clone(),
            serial_number: panel.serial_number.clone(),
        }
    }

    /// Device block for zones whose panel is missing from the device list.
    pub fn fallback(device_id: &str) -> Self {
        Self {
            identifiers: vec![format!("{DOMAIN}_{device_id}")],
            name: "Alula Panel".to_string(),
            manufacturer: MANUFACTURER.to_string(),
            model: None,
            firmware: None,
            serial_number: None,
        }
    }
}

/// Rendered state of one entity.
#[derive(Debug, Clone, PartialEq)]
pub struct EntityState {
    pub state: String,
    pub attributes: Map<String, Value>,
    pub icon: Option<&'static str>,
}

pub trait Entity: Send + Sync {
    fn unique_id(&self) -> String;

    fn name(&self) -> &str;

    fn platform(&self) -> Platform;

    /// Panel this entity belongs to.
    fn device_id(&self) -> &str;

    fn device_info(&self) -> &DeviceInfo;

    fn device_class(&self) -> Option<&'static str> {
        None
    }

    /// State and attributes from `snapshot`, or `None` once the entity's
    /// device or zone no longer appears in it.
    fn render(&self, snapshot: &AccountSnapshot) -> Option<EntityState>;

    fn available(&self, snapshot: &AccountSnapshot, coordinator_available: bool) -> bool {
        coordinator_available && self.render(snapshot).is_some()
    }

    fn as_alarm_panel(&self) -> Option<&AlarmPanelEntity> {
        None
    }
}

/// Every entity for the panels and zones in `snapshot`.
///
/// Zones reported for a device missing from the device list still get a
/// sensor, under a generic "Alula Panel" device.
pub fn build_entities(
    snapshot: &AccountSnapshot,
    coordinator: &UpdateCoordinator,
    zone_names: &ZoneNames,
) -> Vec<Arc<dyn Entity>> {
    let mut entities: Vec<Arc<dyn Entity>> = Vec::new();
    for panel in snapshot.panels.values() {
        let device = DeviceInfo::for_panel(panel);
        entities.push(Arc::new(AlarmPanelEntity::new(
            panel,
            device.clone(),
            coordinator.clone(),
        )));
        entities.push(Arc::new(TroubleSensor::new(panel, device.clone())));
        entities.push(Arc::new(LastEventSensor::new(panel, device)));
    }

    for (device_id, zones) in &snapshot.zones {
        let device = match snapshot.panel(device_id) {
            Some(panel) => DeviceInfo::for_panel(panel),
            None => DeviceInfo::fallback(device_id),
        };
        for zone in zones.values() {
            let name = zone_names
                .get(&format!("{}/{}", zone.device_id, zone.index))
                .cloned()
                .unwrap_or_else(|| zone.display_name());
            entities.push(Arc::new(ZoneBinarySensor::new(zone, name, device.clone())));
        }
    }
    entities
}

pub(crate) fn timestamp_value(ts: Option<DateTime<Utc>>) -> Value {
    ts.map(|t| Value::String(t.to_rfc3339())).unwrap_or(Value::Null)
}

#[cfg(test)]
pub(crate) mod test_support {
    use async_trait::async_trait;

    use crate::config::ArmMode;
    use crate::devices::{ArmingState, PanelSnapshot, TroubleFlags};
    use crate::error::Result;
    use crate::transport::{AccountClient, AccountStatus, TokenInfo};

    pub fn panel(device_id: &str) -> PanelSnapshot {
        PanelSnapshot {
            device_id: device_id.to_string(),
            name: "Home".into(),
            model: Some("BAT-Connect".into()),
            serial_number: Some("SN1".into()),
            firmware: Some("2.1".into()),
            online: true,
            online_since: None,
            arming_state: ArmingState::Disarmed,
            arming_level_raw: "disarm".into(),
            trouble_flags: TroubleFlags::empty(),
            low_battery_zones: vec![],
            tamper_zones: vec![],
            alarm_zones: vec![],
            trouble_zones: vec![],
            last_armed_at: None,
            last_disarmed_at: None,
            last_event: None,
        }
    }

    /// Client that never talks to anything.
    pub struct IdleClient;

    #[async_trait]
    impl AccountClient for IdleClient {
        async fn authenticate(&self, _username: &str, _password: &str) -> Result<TokenInfo> {
            unimplemented!()
        }
        async fn restore_tokens(&self, _refresh_token: &str) {}
        async fn refresh_session(&self) -> Result<TokenInfo> {
            unimplemented!()
        }
        async fn fetch_status(&self) -> Result<AccountStatus> {
            Ok(AccountStatus::default())
        }
        async fn arm(&self, _device_id: &str, _mode: ArmMode) -> Result<()> {
            Ok(())
        }
        async fn disarm(&self, _device_id: &str) -> Result<()> {
            Ok(())
        }
        async fn refresh_token(&self) -> Option<String> {
            None
        }
    }
}
