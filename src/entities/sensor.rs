// MIT License - Copyright (c) 2026 Peter Wright
// Alula / Cove bridge

use serde_json::{Map, Value};

use crate::devices::{LastEventType, PanelSnapshot, TroubleFlags};
use crate::entities::{DeviceInfo, Entity, EntityState, Platform, timestamp_value};
use crate::snapshot::AccountSnapshot;

pub const TROUBLE: &str = "Trouble";
pub const OK: &str = "OK";

const ICON_TROUBLE: &str = "mdi:shield-alert";
const ICON_OK: &str = "mdi:shield-check";
const ICON_HISTORY: &str = "mdi:history";

/// "Trouble" while any trouble flag is set, otherwise "OK".
pub struct TroubleSensor {
    device_id: String,
    device: DeviceInfo,
}

impl TroubleSensor {
    pub fn new(panel: &PanelSnapshot, device: DeviceInfo) -> Self {
        Self {
            device_id: panel.device_id.clone(),
            device,
        }
    }
}

fn zone_list(zones: &[u32]) -> Value {
    Value::from(zones.to_vec())
}

impl Entity for TroubleSensor {
    fn unique_id(&self) -> String {
        format!("{}_trouble", self.device_id)
    }

    fn name(&self) -> &str {
        "Trouble Status"
    }

    fn platform(&self) -> Platform {
        Platform::Sensor
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
        for (flag, name) in TroubleFlags::named() {
            attributes.insert(name.to_string(), Value::Bool(panel.has_trouble(flag)));
        }
        attributes.insert("low_battery_zones".into(), zone_list(&panel.low_battery_zones));
        attributes.insert("tamper_zones".into(), zone_list(&panel.tamper_zones));
        attributes.insert("alarm_zones".into(), zone_list(&panel.alarm_zones));
        attributes.insert("trouble_zones".into(), zone_list(&panel.trouble_zones));

        let (state, icon) = if panel.any_trouble() {
            (TROUBLE, ICON_TROUBLE)
        } else {
            (OK, ICON_OK)
        };
        Some(EntityState {
            state: state.to_string(),
            attributes,
            icon: Some(icon),
        })
    }
}

/// Most recent arming transition of a panel.
pub struct LastEventSensor {
    device_id: String,
    device: DeviceInfo,
}

impl LastEventSensor {
    pub fn new(panel: &PanelSnapshot, device: DeviceInfo) -> Self {
        Self {
            device_id: panel.device_id.clone(),
            device,
        }
    }
}

/// Later of the two transitions; the raw arming level when neither is known.
fn last_event_state(panel: &PanelSnapshot) -> String {
    match panel.last_event {
        Some(ref event) if event.event_type == LastEventType::Armed => {
            format!("Armed ({})", panel.arming_level_raw)
        }
        Some(_) => "Disarmed".to_string(),
        None if panel.arming_level_raw.is_empty() => "Unknown".to_string(),
        None => panel.arming_level_raw.clone(),
    }
}

impl Entity for LastEventSensor {
    fn unique_id(&self) -> String {
        format!("{}_last_event", self.device_id)
    }

    fn name(&self) -> &str {
        "Last Event"
    }

    fn platform(&self) -> Platform {
        Platform::Sensor
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
            "arming_state".into(),
            Value::String(panel.arming_state.as_ha_state().to_string()),
        );
        if let Some(ref event) = panel.last_event {
            attributes.insert(
                "last_event_type".into(),
                Value::String(event.event_type.as_str().to_string()),
            );
            attributes.insert("last_event_source".into(), Value::String(event.source.clone()));
            attributes.insert(
                "last_event_timestamp".into(),
                timestamp_value(Some(event.timestamp)),
            );
        }
        Some(EntityState {
            state: last_event_state(panel),
            attributes,
            icon: Some(ICON_HISTORY),
        })
    }
}
