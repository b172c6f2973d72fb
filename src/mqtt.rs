// MIT License - Copyright (c) 2026 Peter Wright
// Alula / Cove bridge

//! Home Assistant MQTT wire format: topics, discovery documents, state and
//! event payloads. Everything here is pure; the binary does the publishing.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::devices::TroubleFlags;
use crate::entities::binary_sensor::{STATE_OFF, STATE_ON};
use crate::entities::{DeviceInfo, Entity, EntityState, Platform, ZoneNames};
use crate::event::BridgeEvent;
use crate::snapshot::AccountSnapshot;

pub const ONLINE: &str = "online";
pub const OFFLINE: &str = "offline";

/// Topic layout for one bridge instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topics {
    base: String,
    discovery_prefix: String,
}

impl Topics {
    pub fn new(base: &str, discovery_prefix: &str) -> Self {
        Self {
            base: base.trim_end_matches('/').to_string(),
            discovery_prefix: discovery_prefix.trim_end_matches('/').to_string(),
        }
    }

    /// Bridge liveness; carries the MQTT last will.
    pub fn status(&self) -> String {
        format!("{}/status", self.base)
    }

    pub fn events(&self) -> String {
        format!("{}/events", self.base)
    }

    /// Bridge command topic (REFRESH, PING, SNAPSHOT).
    pub fn command(&self) -> String {
        format!("{}/cmd", self.base)
    }

    /// Wildcard subscription covering every entity command topic.
    pub fn set_filter(&self) -> String {
        format!("{}/+/set", self.base)
    }

    pub fn state(&self, unique_id: &str) -> String {
        format!("{}/{}/state", self.base, object_id(unique_id))
    }

    pub fn attributes(&self, unique_id: &str) -> String {
        format!("{}/{}/attributes", self.base, object_id(unique_id))
    }

    pub fn availability(&self, unique_id: &str) -> String {
        format!("{}/{}/availability", self.base, object_id(unique_id))
    }

    pub fn set(&self, unique_id: &str) -> String {
        format!("{}/{}/set", self.base, object_id(unique_id))
    }

    pub fn discovery(&self, platform: Platform, node_id: &str, object: &str) -> String {
        format!(
            "{}/{}/{}/{}/config",
            self.discovery_prefix,
            platform.component(),
            object_id(node_id),
            object_id(object)
        )
    }

    /// Object id of an entity command topic, if `topic` is one.
    pub fn parse_set_topic<'a>(&self, topic: &'a str) -> Option<&'a str> {
        let rest = topic.strip_prefix(self.base.as_str())?.strip_prefix('/')?;
        let object = rest.strip_suffix("/set")?;
        (!object.is_empty() && !object.contains('/')).then_some(object)
    }
}

/// Restrict an id to the characters Home Assistant allows in topics and
/// object ids.
pub fn object_id(id: &str) -> String {
    id.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

#[derive(Debug, Serialize)]
pub struct Availability {
    pub topic: String,
    pub payload_available: &'static str,
    pub payload_not_available: &'static str,
}

impl Availability {
    fn on(topic: String) -> Self {
        Self {
            topic,
            payload_available: ONLINE,
            payload_not_available: OFFLINE,
        }
    }
}

/// Discovery document for one entity.
#[derive(Debug, Serialize)]
pub struct DiscoveryPayload {
    pub name: String,
    pub unique_id: String,
    pub object_id: String,
    pub state_topic: String,
    pub json_attributes_topic: String,
    pub availability: Vec<Availability>,
    pub availability_mode: &'static str,
    pub device: DeviceInfo,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_class: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub icon: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command_topic: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub supported_features: Option<Vec<&'static str>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code_arm_required: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload_on: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload_off: Option<&'static str>,
}

/// Discovery topic and document for `entity`. `state` supplies the icon for
/// sensors whose icon follows their state.
pub fn discovery(
    topics: &Topics,
    entity: &dyn Entity,
    state: Option<&EntityState>,
) -> (String, DiscoveryPayload) {
    let unique_id = entity.unique_id();
    let node_id = format!("{}_{}", crate::entry::DOMAIN, entity.device_id());
    let topic = topics.discovery(entity.platform(), &node_id, &unique_id);

    let mut payload = DiscoveryPayload {
        name: entity.name().to_string(),
        unique_id: unique_id.clone(),
        object_id: object_id(&unique_id),
        state_topic: topics.state(&unique_id),
        json_attributes_topic: topics.attributes(&unique_id),
        availability: vec![
            Availability::on(topics.status()),
            Availability::on(topics.availability(&unique_id)),
        ],
        availability_mode: "all",
        device: entity.device_info().clone(),
        device_class: entity.device_class(),
        icon: state.and_then(|s| s.icon),
        command_topic: None,
        supported_features: None,
        code_arm_required: None,
        payload_on: None,
        payload_off: None,
    };
    match entity.platform() {
        Platform::AlarmControlPanel => {
            payload.command_topic = Some(topics.set(&unique_id));
            payload.supported_features =
                Some(crate::entities::alarm_panel::SUPPORTED_FEATURES.to_vec());
            payload.code_arm_required = Some(false);
        }
        Platform::BinarySensor => {
            payload.payload_on = Some(STATE_ON);
            payload.payload_off = Some(STATE_OFF);
        }
        Platform::Sensor => {}
    }
    (topic, payload)
}

/// One retained publication.
#[derive(Debug, Clone, PartialEq)]
pub struct Publication {
    pub topic: String,
    pub payload: String,
}

/// State, attributes and availability messages for `entity`.
pub fn state_messages(
    topics: &Topics,
    entity: &dyn Entity,
    snapshot: &AccountSnapshot,
    coordinator_available: bool,
) -> Vec<Publication> {
    let unique_id = entity.unique_id();
    let available = entity.available(snapshot, coordinator_available);
    let mut out = Vec::with_capacity(3);
    if let Some(state) = entity.render(snapshot) {
        out.push(Publication {
            topic: topics.state(&unique_id),
            payload: state.state,
        });
        out.push(Publication {
            topic: topics.attributes(&unique_id),
            payload: Value::Object(state.attributes).to_string(),
        });
    }
    out.push(Publication {
        topic: topics.availability(&unique_id),
        payload: if available { ONLINE } else { OFFLINE }.to_string(),
    });
    out
}

// Published events share a flat {now, op, ...} structure

#[derive(Debug, Serialize)]
struct MqttArmingEvent<'a> {
    now: u64,
    op: &'static str,
    device: &'a str,
    old: &'static str,
    new: &'static str,
}

#[derive(Debug, Serialize)]
struct MqttZoneEvent<'a> {
    now: u64,
    op: &'static str,
    device: &'a str,
    zone: u32,
}

#[derive(Debug, Serialize)]
struct MqttTroubleEvent<'a> {
    now: u64,
    op: &'static str,
    device: &'a str,
    flags: &'a [&'static str],
}

#[derive(Debug, Serialize)]
struct MqttAvailabilityEvent {
    now: u64,
    op: &'static str,
    available: bool,
}

#[derive(Debug, Serialize)]
pub struct MqttCmdAck {
    pub now: u64,
    pub op: &'static str,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub src: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl MqttCmdAck {
    pub fn new(now: u64, success: bool, src: Option<Value>) -> Self {
        Self {
            now,
            op: "CMD_ACK",
            success,
            src,
            data: None,
            error: None,
        }
    }
}

fn to_json(value: &impl Serialize) -> Option<Value> {
    serde_json::to_value(value).ok()
}

/// Event payloads for a coordinator event. Snapshot and failure
/// notifications have no wire form.
pub fn event_payloads(event: &BridgeEvent, now: u64) -> Vec<Value> {
    match event {
        BridgeEvent::ArmingStateChanged {
            device_id,
            old,
            new,
        } => to_json(&MqttArmingEvent {
            now,
            op: "ARMING_STATE",
            device: device_id,
            old: old.as_ha_state(),
            new: new.as_ha_state(),
        })
        .into_iter()
        .collect(),
        BridgeEvent::ZoneChanged {
            device_id,
            zone_index,
            open,
        } => to_json(&MqttZoneEvent {
            now,
            op: if *open { "ZONE_OPEN" } else { "ZONE_CLOSE" },
            device: device_id,
            zone: *zone_index,
        })
        .into_iter()
        .collect(),
        BridgeEvent::TroubleChanged {
            device_id,
            set,
            unset,
            ..
        } => {
            let mut out = Vec::new();
            if !set.is_empty() {
                out.extend(to_json(&MqttTroubleEvent {
                    now,
                    op: "TROUBLE",
                    device: device_id,
                    flags: set,
                }));
            }
            if !unset.is_empty() {
                out.extend(to_json(&MqttTroubleEvent {
                    now,
                    op: "TROUBLE_CLEARED",
                    device: device_id,
                    flags: unset,
                }));
            }
            out
        }
        BridgeEvent::AvailabilityChanged { available } => to_json(&MqttAvailabilityEvent {
            now,
            op: "AVAILABILITY",
            available: *available,
        })
        .into_iter()
        .collect(),
        BridgeEvent::SnapshotUpdated(_) | BridgeEvent::RefreshFailed { .. } => Vec::new(),
    }
}

#[derive(Debug, Serialize)]
pub struct MqttSnapshot {
    pub now: u64,
    pub op: &'static str,
    pub state: MqttSnapshotState,
}

#[derive(Debug, Serialize)]
pub struct MqttSnapshotState {
    pub panels: Vec<MqttPanelState>,
    pub zones: Vec<MqttZoneState>,
}

#[derive(Debug, Serialize)]
pub struct MqttPanelState {
    pub id: String,
    pub name: String,
    #[serde(rename = "armingState")]
    pub arming_state: &'static str,
    pub online: bool,
    pub trouble: bool,
    #[serde(rename = "troubleFlags")]
    pub trouble_flags: Vec<&'static str>,
}

#[derive(Debug, Serialize)]
pub struct MqttZoneState {
    pub device: String,
    pub index: u32,
    pub name: String,
    pub kind: &'static str,
    pub open: bool,
}

/// Full account state, answered to a SNAPSHOT command.
pub fn snapshot_payload(snapshot: &AccountSnapshot, zone_names: &ZoneNames, now: u64) -> MqttSnapshot {
    let panels = snapshot
        .panels
        .values()
        .map(|p| MqttPanelState {
            id: p.device_id.clone(),
            name: p.name.clone(),
            arming_state: p.arming_state.as_ha_state(),
            online: p.online,
            trouble: p.any_trouble(),
            trouble_flags: p.trouble_flags.names(),
        })
        .collect();
    let zones = snapshot
        .iter_zones()
        .map(|z| MqttZoneState {
            device: z.device_id.clone(),
            index: z.index,
            name: zone_names
                .get(&format!("{}/{}", z.device_id, z.index))
                .cloned()
                .unwrap_or_else(|| z.display_name()),
            kind: z.kind.device_class(),
            open: z.open,
        })
        .collect();
    MqttSnapshot {
        now,
        op: "SNAPSHOT",
        state: MqttSnapshotState { panels, zones },
    }
}

/// Inbound bridge command.
#[derive(Debug, Deserialize)]
pub struct MqttCommand {
    pub op: String,
    #[serde(default)]
    pub op_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeCommand {
    Refresh,
    Ping,
    Snapshot,
}

impl MqttCommand {
    pub fn bridge_command(&self) -> Option<BridgeCommand> {
        match self.op.as_str() {
            "REFRESH" => Some(BridgeCommand::Refresh),
            "PING" => Some(BridgeCommand::Ping),
            "SNAPSHOT" => Some(BridgeCommand::Snapshot),
            _ => None,
        }
    }
}

/// Trouble flag names for log lines.
pub fn describe_flags(flags: TroubleFlags) -> String {
    if flags.is_empty() {
        "none".to_string()
    } else {
        flags.names().join(", ")
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::devices::{ArmingState, Zone};
    use std::sync::Arc;

    use crate::config::CoordinatorConfig;
    use crate::coordinator::UpdateCoordinator;
    use crate::entities::test_support::{IdleClient, panel};
    use crate::entities::{AlarmPanelEntity, TroubleSensor, ZoneBinarySensor};

    fn topics() -> Topics {
        Topics::new("alula/", "homeassistant")
    }

    #[test]
    fn test_topic_layout() {
        let t = topics();
        assert_eq!(t.status(), "alula/status");
        assert_eq!(t.events(), "alula/events");
        assert_eq!(t.command(), "alula/cmd");
        assert_eq!(t.state("p1_alarm"), "alula/p1_alarm/state");
        assert_eq!(t.set("p1_alarm"), "alula/p1_alarm/set");
        assert_eq!(
            t.discovery(Platform::BinarySensor, "alula_p1", "p1_zone_3"),
            "homeassistant/binary_sensor/alula_p1/p1_zone_3/config"
        );
    }

    #[test]
    fn test_parse_set_topic() {
        let t = topics();
        assert_eq!(t.parse_set_topic("alula/p1_alarm/set"), Some("p1_alarm"));
        assert_eq!(t.parse_set_topic("alula/p1_alarm/state"), None);
        assert_eq!(t.parse_set_topic("alula/a/b/set"), None);
        assert_eq!(t.parse_set_topic("other/p1_alarm/set"), None);
        assert_eq!(t.parse_set_topic("alula//set"), None);
    }

    #[test]
    fn test_object_id_sanitized() {
        assert_eq!(object_id("ab:cd.ef-1_2"), "ab_cd_ef-1_2");
    }

    #[test]
    fn test_binary_sensor_discovery() {
        let p = panel("p1");
        let zone = Zone::new("p1", 3);
        let entity = ZoneBinarySensor::new(&zone, "Front".into(), DeviceInfo::for_panel(&p));
        let (topic, payload) = discovery(&topics(), &entity, None);
        assert_eq!(topic, "homeassistant/binary_sensor/alula_p1/p1_zone_3/config");
        assert_eq!(payload.payload_on, Some("ON"));
        assert_eq!(payload.device_class, Some("door"));
        assert!(payload.command_topic.is_none());
        assert_eq!(payload.availability.len(), 2);
        assert_eq!(payload.availability[0].topic, "alula/status");
    }

    #[test]
    fn test_state_messages_for_offline_panel() {
        let mut p = panel("p1");
        p.online = false;
        let entity = TroubleSensor::new(&p, DeviceInfo::for_panel(&p));
        let snapshot = AccountSnapshot::new(Utc::now(), vec![p], vec![], 0);

        let msgs = state_messages(&topics(), &entity, &snapshot, true);
        assert_eq!(msgs.len(), 3);
        assert_eq!(msgs[0].payload, "OK");
        assert_eq!(msgs[2].topic, "alula/p1_trouble/availability");
        assert_eq!(msgs[2].payload, "online");

        let coordinator =
            UpdateCoordinator::new(Arc::new(IdleClient), CoordinatorConfig::default());
        let p = snapshot.panel("p1").unwrap();
        let alarm = AlarmPanelEntity::new(p, DeviceInfo::for_panel(p), coordinator);
        let msgs = state_messages(&topics(), &alarm, &snapshot, true);
        assert_eq!(msgs[2].topic, "alula/p1_alarm/availability");
        assert_eq!(msgs[2].payload, "offline");
    }

    #[test]
    fn test_event_payloads() {
        let arming = BridgeEvent::ArmingStateChanged {
            device_id: "p1".into(),
            old: ArmingState::Disarmed,
            new: ArmingState::ArmedHome,
        };
        let out = event_payloads(&arming, 5);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0]["op"], "ARMING_STATE");
        assert_eq!(out[0]["new"], "armed_home");

        let trouble = BridgeEvent::TroubleChanged {
            device_id: "p1".into(),
            flags: TroubleFlags::LOW_BATTERY,
            set: vec!["low_battery"],
            unset: vec!["ac_failure"],
        };
        let out = event_payloads(&trouble, 5);
        let ops: Vec<_> = out.iter().map(|v| v["op"].as_str().unwrap()).collect();
        assert_eq!(ops, vec!["TROUBLE", "TROUBLE_CLEARED"]);

        let failed = BridgeEvent::RefreshFailed {
            kind: crate::error::ErrorKind::Connectivity,
            message: "down".into(),
        };
        assert!(event_payloads(&failed, 5).is_empty());
    }

    #[test]
    fn test_bridge_commands() {
        let cmd: MqttCommand = serde_json::from_str(r#"{"op":"REFRESH","op_id":"x"}"#).unwrap();
        assert_eq!(cmd.bridge_command(), Some(BridgeCommand::Refresh));
        let cmd: MqttCommand = serde_json::from_str(r#"{"op":"ARM_AWAY"}"#).unwrap();
        assert_eq!(cmd.bridge_command(), None);
    }
}
