// MIT License - Copyright (c) 2026 Peter Wright
// Alula / Cove bridge

use serde_json::{Map, Value};

use crate::devices::{Zone, ZoneKind};
use crate::entities::{DeviceInfo, Entity, EntityState, Platform};
use crate::snapshot::AccountSnapshot;

pub const STATE_ON: &str = "ON";
pub const STATE_OFF: &str = "OFF";

/// Open/closed sensor for one zone. On means open or triggered.
pub struct ZoneBinarySensor {
    device_id: String,
    index: u32,
    name: String,
    kind: ZoneKind,
    device: DeviceInfo,
}

impl ZoneBinarySensor {
    pub fn new(zone: &Zone, name: String, device: DeviceInfo) -> Self {
        Self {
            device_id: zone.device_id.clone(),
            index: zone.index,
            name,
            kind: zone.kind,
            device,
        }
    }
}

impl Entity for ZoneBinarySensor {
    fn unique_id(&self) -> String {
        format!("{}_zone_{}", self.device_id, self.index)
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn platform(&self) -> Platform {
        Platform::BinarySensor
    }

    fn device_id(&self) -> &str {
        &self.device_id
    }

    fn device_info(&self) -> &DeviceInfo {
        &self.device
    }

    fn device_class(&self) -> Option<&'static str> {
        Some(self.kind.device_class())
    }

    fn render(&self, snapshot: &AccountSnapshot) -> Option<EntityState> {
        let zone = snapshot.zone(&self.device_id, self.index)?;
        let mut attributes = Map::new();
        attributes.insert("zone_index".into(), Value::from(zone.index));
        attributes.insert(
            "zone_name".into(),
            zone.name.clone().map(Value::String).unwrap_or(Value::Null),
        );
        attributes.insert(
            "device_type_hint".into(),
            zone.device_type_hint
                .clone()
                .map(Value::String)
                .unwrap_or(Value::Null),
        );
        let state = if zone.is_open() { STATE_ON } else { STATE_OFF };
        Some(EntityState {
            state: state.to_string(),
            attributes,
            icon: None,
        })
    }
}
