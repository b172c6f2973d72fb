// MIT License - Copyright (c) 2026 Peter Wright
// Alula / Cove bridge

//! Cove cloud JSON documents and their conversion into domain types.
//!
//! The cloud speaks JSON:API: every response is `{ "data": ... }` where
//! `data` is one resource or a list of resources, each carrying `id`,
//! `type` and an `attributes` object. Attribute parsing is
//! lenient: missing fields default, unknown fields are ignored.

use chrono::{DateTime, TimeZone, Utc};
use serde::Deserialize;
use serde_json::{Map, Value, json};
use tracing::warn;

use crate::config::ArmMode;
use crate::devices::{ArmingState, LastEvent, PanelSnapshot, TroubleFlags, Zone, ZoneKind};
use crate::error::{AlulaError, Result};

/// One JSON:API resource object.
#[derive(Debug, Clone, Deserialize)]
pub struct Resource {
    pub id: String,
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub attributes: Map<String, Value>,
}

/// Extract the resources from a document's `data` member. List items that
/// are not resource objects are logged and skipped.
pub fn parse_resources(doc: &Value) -> Result<Vec<Resource>> {
    match doc.get("data") {
        Some(Value::Array(items)) => Ok(items
            .iter()
            .filter_map(|item| match serde_json::from_value(item.clone()) {
                Ok(resource) => Some(resource),
                Err(e) => {
                    warn!("Skipping malformed resource: {e}");
                    None
                }
            })
            .collect()),
        Some(Value::Null) | None => Ok(Vec::new()),
        Some(item @ Value::Object(_)) => Ok(vec![serde_json::from_value(item.clone())?]),
        Some(other) => Err(AlulaError::invalid_response(format!(
            "unexpected data member: {other}"
        ))),
    }
}

/// OAuth token grant response.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub expires_in: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct DeviceAttributes {
    name: Option<String>,
    device_type: Option<String>,
    connected_panel_type: Option<String>,
    serial_number: Option<String>,
    firmware_part_number: Option<String>,
    online: Option<bool>,
    online_timestamp: Value,
    arming_level: Option<String>,
    last_armed_at: Value,
    last_disarmed_at: Value,
    any_trouble: Option<bool>,
    ac_failure: Option<bool>,
    low_battery: Option<bool>,
    server_comm_fail: Option<bool>,
    cs_comm_fail: Option<bool>,
    fire_trouble: Option<bool>,
    arming_protest: Option<bool>,
    low_battery_zones: Option<Vec<u32>>,
    tamper_zones: Option<Vec<u32>>,
    alarm_zones: Option<Vec<u32>>,
    trouble_zones: Option<Vec<u32>>,
}

/// What a device resource represents.
#[derive(Debug, Clone, PartialEq)]
pub enum CloudDevice {
    Panel(PanelSnapshot),
    Camera { device_id: String },
    Other { device_id: String, device_type: String },
}

/// Classify a device resource and convert panels into snapshots.
pub fn parse_device(resource: &Resource) -> Result<CloudDevice> {
    let attrs: DeviceAttributes = serde_json::from_value(Value::Object(resource.attributes.clone()))?;
    let device_type = attrs
        .device_type
        .clone()
        .unwrap_or_else(|| resource.kind.clone())
        .to_lowercase();

    if device_type.contains("camera") {
        return Ok(CloudDevice::Camera {
            device_id: resource.id.clone(),
        });
    }
    if !device_type.contains("panel") && attrs.arming_level.is_none() {
        return Ok(CloudDevice::Other {
            device_id: resource.id.clone(),
            device_type,
        });
    }

    let name = attrs
        .name
        .clone()
        .filter(|n| !n.trim().is_empty())
        .unwrap_or_else(|| "Alula Panel".to_string());
    let arming_level_raw = attrs.arming_level.clone().unwrap_or_else(|| "disarm".to_string());
    let last_armed_at = parse_timestamp(&attrs.last_armed_at);
    let last_disarmed_at = parse_timestamp(&attrs.last_disarmed_at);
    let last_event = LastEvent::from_transitions(last_armed_at, last_disarmed_at, &name);

    Ok(CloudDevice::Panel(PanelSnapshot {
        device_id: resource.id.clone(),
        model: attrs.connected_panel_type.clone(),
        serial_number: attrs.serial_number.clone(),
        firmware: attrs.firmware_part_number.clone(),
        online: attrs.online.unwrap_or(true),
        online_since: parse_timestamp(&attrs.online_timestamp),
        arming_state: ArmingState::from_raw(&arming_level_raw),
        arming_level_raw,
        trouble_flags: trouble_flags(&attrs),
        low_battery_zones: attrs.low_battery_zones.unwrap_or_default(),
        tamper_zones: attrs.tamper_zones.unwrap_or_default(),
        alarm_zones: attrs.alarm_zones.unwrap_or_default(),
        trouble_zones: attrs.trouble_zones.unwrap_or_default(),
        last_armed_at,
        last_disarmed_at,
        last_event,
        name,
    }))
}

fn trouble_flags(attrs: &DeviceAttributes) -> TroubleFlags {
    let set = |flag: Option<bool>| flag.unwrap_or(false);
    let listed = |zones: &Option<Vec<u32>>| zones.as_ref().is_some_and(|z| !z.is_empty());

    let mut flags = TroubleFlags::empty();
    flags.set(TroubleFlags::AC_FAILURE, set(attrs.ac_failure));
    flags.set(TroubleFlags::LOW_BATTERY, set(attrs.low_battery));
    flags.set(TroubleFlags::SERVER_COMM_FAILURE, set(attrs.server_comm_fail));
    flags.set(TroubleFlags::CS_COMM_FAILURE, set(attrs.cs_comm_fail));
    flags.set(TroubleFlags::FIRE_TROUBLE, set(attrs.fire_trouble));
    flags.set(TroubleFlags::ARMING_PROTEST, set(attrs.arming_protest));
    flags.set(TroubleFlags::ZONE_LOW_BATTERY, listed(&attrs.low_battery_zones));
    flags.set(TroubleFlags::ZONE_TAMPER, listed(&attrs.tamper_zones));
    flags.set(TroubleFlags::ZONE_ALARM, listed(&attrs.alarm_zones));
    flags.set(TroubleFlags::ZONE_TROUBLE, listed(&attrs.trouble_zones));
    // anyTrouble without a named cause still counts as trouble
    if flags.is_empty() && attrs.any_trouble == Some(true) {
        flags |= TroubleFlags::GENERAL;
    }
    flags
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct ZoneAttributes {
    device_id: Option<String>,
    zone_index: Value,
    zone_name: Option<String>,
    zone_status: Option<String>,
    is_open: Option<bool>,
    device_type_hint: Option<String>,
}

/// Convert a zone notification resource. Resources without a device id or
/// zone index are skipped (`Ok(None)`).
pub fn parse_zone(resource: &Resource) -> Result<Option<Zone>> {
    let attrs: ZoneAttributes = serde_json::from_value(Value::Object(resource.attributes.clone()))?;
    let (Some(device_id), Some(index)) = (attrs.device_id, zone_index(&attrs.zone_index)) else {
        return Ok(None);
    };
    let open = attrs
        .is_open
        .unwrap_or_else(|| zone_status_is_open(attrs.zone_status.as_deref()));
    Ok(Some(Zone {
        device_id,
        index,
        kind: ZoneKind::from_hint(attrs.device_type_hint.as_deref()),
        name: attrs.zone_name,
        device_type_hint: attrs.device_type_hint,
        open,
    }))
}

/// Zone index given as a number or as numeric text.
fn zone_index(value: &Value) -> Option<u32> {
    match value {
        Value::Number(n) => n.as_u64().and_then(|n| u32::try_from(n).ok()),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn zone_status_is_open(status: Option<&str>) -> bool {
    matches!(
        status.map(|s| s.trim().to_ascii_lowercase()).as_deref(),
        Some("open" | "opened" | "faulted" | "fault" | "triggered" | "alarm" | "active")
    )
}

/// Body of an arm request.
pub fn arm_request_body(mode: ArmMode) -> Value {
    json!({ "armingLevel": mode.as_str() })
}

/// Parse a timestamp given as RFC 3339 text or as epoch seconds/milliseconds.
pub fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(s) if !s.is_empty() => DateTime::parse_from_rfc3339(s)
            .ok()
            .map(|dt| dt.with_timezone(&Utc))
            .or_else(|| s.parse::<i64>().ok().and_then(epoch_to_datetime)),
        Value::Number(n) => n.as_i64().and_then(epoch_to_datetime),
        _ => None,
    }
}

fn epoch_to_datetime(n: i64) -> Option<DateTime<Utc>> {
    // Values past year 2286 in seconds are milliseconds
    if n > 9_999_999_999 {
        Utc.timestamp_millis_opt(n).single()
    } else {
        Utc.timestamp_opt(n, 0).single()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resource(value: Value) -> Resource {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_parse_resources_list_single_and_empty() {
        let doc = json!({ "data": [{ "id": "a", "type": "devices" }, { "id": "b", "type": "devices" }] });
        assert_eq!(parse_resources(&doc).unwrap().len(), 2);

        let doc = json!({ "data": { "id": "a", "type": "devices", "attributes": { "name": "x" } } });
        let items = parse_resources(&doc).unwrap();
        assert_eq!(items[0].attributes["name"], "x");

        assert!(parse_resources(&json!({ "data": null })).unwrap().is_empty());
        assert!(parse_resources(&json!({ "data": 5 })).is_err());
    }

    #[test]
    fn test_parse_panel_device() {
        let res = resource(json!({
            "id": "dev-1",
            "type": "devices",
            "attributes": {
                "name": "Home",
                "deviceType": "panel",
                "connectedPanelType": "Connect+",
                "serialNumber": "SN123",
                "firmwarePartNumber": "FW-2.1",
                "online": true,
                "armingLevel": "away",
                "lastArmedAt": "2026-03-01T10:00:00Z",
                "lastDisarmedAt": "2026-03-01T08:00:00Z",
                "acFailure": true,
                "tamperZones": [4]
            }
        }));
        let CloudDevice::Panel(panel) = parse_device(&res).unwrap() else {
            panic!("expected panel");
        };
        assert_eq!(panel.name, "Home");
        assert_eq!(panel.model.as_deref(), Some("Connect+"));
        assert_eq!(panel.arming_state, ArmingState::ArmedAway);
        assert_eq!(panel.arming_level_raw, "away");
        assert!(panel.has_trouble(TroubleFlags::AC_FAILURE));
        assert!(panel.has_trouble(TroubleFlags::ZONE_TAMPER));
        assert!(!panel.has_trouble(TroubleFlags::LOW_BATTERY));
        assert_eq!(panel.tamper_zones, vec![4]);
        let ev = panel.last_event.unwrap();
        assert_eq!(ev.event_type, crate::devices::LastEventType::Armed);
    }

    #[test]
    fn test_panel_without_troubles_has_empty_flags() {
        let res = resource(json!({
            "id": "dev-1",
            "type": "devices",
            "attributes": { "armingLevel": "disarm", "anyTrouble": false }
        }));
        let CloudDevice::Panel(panel) = parse_device(&res).unwrap() else {
            panic!("expected panel");
        };
        assert!(panel.trouble_flags.is_empty());
        assert_eq!(panel.name, "Alula Panel");
        assert!(panel.online);
    }

    #[test]
    fn test_any_trouble_without_cause_is_general() {
        let res = resource(json!({
            "id": "d",
            "type": "devices",
            "attributes": { "deviceType": "panel", "anyTrouble": true }
        }));
        let CloudDevice::Panel(panel) = parse_device(&res).unwrap() else {
            panic!("expected panel");
        };
        assert_eq!(panel.trouble_flags, TroubleFlags::GENERAL);
    }

    #[test]
    fn test_classify_camera_and_other() {
        let cam = resource(json!({ "id": "c1", "type": "devices", "attributes": { "deviceType": "Camera" } }));
        assert_eq!(
            parse_device(&cam).unwrap(),
            CloudDevice::Camera { device_id: "c1".into() }
        );
        let other = resource(json!({ "id": "x", "type": "devices", "attributes": { "deviceType": "keyfob" } }));
        assert!(matches!(parse_device(&other).unwrap(), CloudDevice::Other { .. }));
    }

    #[test]
    fn test_parse_zone() {
        let res = resource(json!({
            "id": "n1",
            "type": "zones",
            "attributes": {
                "deviceId": "dev-1",
                "zoneIndex": 3,
                "zoneName": "Back Door",
                "zoneStatus": "Open",
                "deviceTypeHint": "door contact"
            }
        }));
        let zone = parse_zone(&res).unwrap().unwrap();
        assert_eq!(zone.device_id, "dev-1");
        assert_eq!(zone.index, 3);
        assert!(zone.open);
        assert_eq!(zone.kind, ZoneKind::Door);

        let closed = resource(json!({
            "id": "n2", "type": "zones",
            "attributes": { "deviceId": "dev-1", "zoneIndex": 4, "zoneStatus": "closed" }
        }));
        assert!(!parse_zone(&closed).unwrap().unwrap().open);

        let explicit = resource(json!({
            "id": "n3", "type": "zones",
            "attributes": { "deviceId": "dev-1", "zoneIndex": 5, "isOpen": true, "zoneStatus": "closed" }
        }));
        assert!(parse_zone(&explicit).unwrap().unwrap().open);
    }

    #[test]
    fn test_null_attributes_default() {
        let res = resource(json!({
            "id": "dev-1",
            "type": "devices",
            "attributes": {
                "deviceType": "panel",
                "name": null,
                "online": null,
                "acFailure": null,
                "lowBattery": true,
                "lowBatteryZones": null,
                "tamperZones": null,
                "lastArmedAt": null
            }
        }));
        let CloudDevice::Panel(panel) = parse_device(&res).unwrap() else {
            panic!("expected panel");
        };
        assert_eq!(panel.trouble_flags, TroubleFlags::LOW_BATTERY);
        assert!(panel.low_battery_zones.is_empty());
        assert!(panel.tamper_zones.is_empty());
        assert_eq!(panel.name, "Alula Panel");
        assert!(panel.online);
        assert!(panel.last_event.is_none());
    }

    #[test]
    fn test_zone_index_as_text() {
        let res = resource(json!({
            "id": "n1", "type": "zones",
            "attributes": { "deviceId": "dev-1", "zoneIndex": "7", "zoneName": null, "isOpen": null }
        }));
        let zone = parse_zone(&res).unwrap().unwrap();
        assert_eq!(zone.index, 7);
        assert!(zone.name.is_none());
        assert!(!zone.open);

        let bad = resource(json!({
            "id": "n2", "type": "zones",
            "attributes": { "deviceId": "dev-1", "zoneIndex": "seven" }
        }));
        assert!(parse_zone(&bad).unwrap().is_none());
    }

    #[test]
    fn test_malformed_list_items_skipped() {
        let doc = json!({ "data": [{ "id": "a", "type": "devices" }, 42, { "type": "no-id" }] });
        let items = parse_resources(&doc).unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].id, "a");
    }

    #[test]
    fn test_zone_without_index_skipped() {
        let res = resource(json!({ "id": "n1", "type": "zones", "attributes": { "deviceId": "d" } }));
        assert!(parse_zone(&res).unwrap().is_none());
    }

    #[test]
    fn test_parse_timestamp_forms() {
        let rfc = parse_timestamp(&json!("2026-03-01T10:00:00+00:00")).unwrap();
        let secs = parse_timestamp(&json!(1772359200)).unwrap();
        let millis = parse_timestamp(&json!(1772359200000_i64)).unwrap();
        assert_eq!(rfc, secs);
        assert_eq!(secs, millis);
        assert!(parse_timestamp(&json!("")).is_none());
        assert!(parse_timestamp(&Value::Null).is_none());
    }

    #[test]
    fn test_arm_request_body() {
        assert_eq!(arm_request_body(ArmMode::Night), json!({ "armingLevel": "night" }));
    }
}
