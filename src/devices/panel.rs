// MIT License - Copyright (c) 2026 Peter Wright
// Alula / Cove bridge

use bitflags::bitflags;
use chrono::{DateTime, Utc};

/// The panel's arming posture as reported by the cloud.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArmingState {
    Disarmed,
    ArmedHome,
    ArmedAway,
    ArmedNight,
    /// Exit delay running
    Arming,
    /// Entry delay running
    Pending,
}

impl ArmingState {
    /// Parse the cloud's `armingLevel` value.
    ///
    /// Unknown levels fall back to `Disarmed`.
    pub fn from_raw(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().replace(['-', ' '], "_").as_str() {
            "stay" | "armed_stay" | "home" | "armed_home" => Self::ArmedHome,
            "away" | "armed_away" => Self::ArmedAway,
            "night" | "armed_night" => Self::ArmedNight,
            "arming" | "exit_delay" => Self::Arming,
            "pending" | "entry_delay" => Self::Pending,
            _ => Self::Disarmed,
        }
    }

    /// Home Assistant `alarm_control_panel` state string.
    pub fn as_ha_state(&self) -> &'static str {
        match self {
            Self::Disarmed => "disarmed",
            Self::ArmedHome => "armed_home",
            Self::ArmedAway => "armed_away",
            Self::ArmedNight => "armed_night",
            Self::Arming => "arming",
            Self::Pending => "pending",
        }
    }

    pub fn is_armed(&self) -> bool {
        matches!(self, Self::ArmedHome | Self::ArmedAway | Self::ArmedNight)
    }
}

bitflags! {
    /// Fault conditions reported by a panel, independent of arming state.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct TroubleFlags: u16 {
        /// Mains power lost
        const AC_FAILURE          = 1 << 0;
        /// Panel backup battery low
        const LOW_BATTERY         = 1 << 1;
        /// Panel cannot reach the Alula servers
        const SERVER_COMM_FAILURE = 1 << 2;
        /// Panel cannot reach the central monitoring station
        const CS_COMM_FAILURE     = 1 << 3;
        /// Fire circuit trouble
        const FIRE_TROUBLE        = 1 << 4;
        /// Last arm attempt was refused
        const ARMING_PROTEST      = 1 << 5;
        /// At least one zone reports a low battery
        const ZONE_LOW_BATTERY    = 1 << 6;
        /// At least one zone reports tamper
        const ZONE_TAMPER         = 1 << 7;
        /// At least one zone is in alarm
        const ZONE_ALARM          = 1 << 8;
        /// At least one zone reports trouble
        const ZONE_TROUBLE        = 1 << 9;
        /// Cloud reports trouble without naming a cause
        const GENERAL             = 1 << 10;
    }
}

const TROUBLE_FLAG_NAMES: [(TroubleFlags, &str); 11] = [
    (TroubleFlags::AC_FAILURE, "ac_failure"),
    (TroubleFlags::LOW_BATTERY, "low_battery"),
    (TroubleFlags::SERVER_COMM_FAILURE, "server_comm_fail"),
    (TroubleFlags::CS_COMM_FAILURE, "cs_comm_fail"),
    (TroubleFlags::FIRE_TROUBLE, "fire_trouble"),
    (TroubleFlags::ARMING_PROTEST, "arming_protest"),
    (TroubleFlags::ZONE_LOW_BATTERY, "zone_low_battery"),
    (TroubleFlags::ZONE_TAMPER, "zone_tamper"),
    (TroubleFlags::ZONE_ALARM, "zone_alarm"),
    (TroubleFlags::ZONE_TROUBLE, "zone_trouble"),
    (TroubleFlags::GENERAL, "general"),
];

impl TroubleFlags {
    /// Every flag with its attribute name, whether set or not.
    pub fn named() -> impl Iterator<Item = (TroubleFlags, &'static str)> {
        TROUBLE_FLAG_NAMES.into_iter()
    }

    /// Attribute names of every set flag, in declaration order.
    pub fn names(&self) -> Vec<&'static str> {
        TROUBLE_FLAG_NAMES
            .iter()
            .filter(|(flag, _)| self.contains(*flag))
            .map(|(_, name)| *name)
            .collect()
    }

    /// Get the flags that changed between old and new status.
    pub fn changed(old: Self, new: Self) -> Self {
        old ^ new
    }

    /// Names of flags that became set.
    pub fn set_names(changed: Self, new: Self) -> Vec<&'static str> {
        (changed & new).names()
    }

    /// Names of flags that became unset.
    pub fn unset_names(changed: Self, new: Self) -> Vec<&'static str> {
        (changed & !new).names()
    }
}

/// Kind of the most recent arming transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LastEventType {
    Armed,
    Disarmed,
}

impl LastEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Armed => "armed",
            Self::Disarmed => "disarmed",
        }
    }
}

/// The most recent arming transition on a panel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LastEvent {
    pub timestamp: DateTime<Utc>,
    pub event_type: LastEventType,
    /// Panel the event was reported by
    pub source: String,
}

impl LastEvent {
    /// Pick the later of the two transition timestamps.
    ///
    /// With both present the later one wins; ties count as disarmed.
    pub fn from_transitions(
        last_armed_at: Option<DateTime<Utc>>,
        last_disarmed_at: Option<DateTime<Utc>>,
        source: &str,
    ) -> Option<Self> {
        let (timestamp, event_type) = match (last_armed_at, last_disarmed_at) {
            (Some(armed), Some(disarmed)) if armed > disarmed => (armed, LastEventType::Armed),
            (Some(_), Some(disarmed)) => (disarmed, LastEventType::Disarmed),
            (Some(armed), None) => (armed, LastEventType::Armed),
            (None, Some(disarmed)) => (disarmed, LastEventType::Disarmed),
            (None, None) => return None,
        };
        Some(Self {
            timestamp,
            event_type,
            source: source.to_string(),
        })
    }
}

/// One alarm panel's state as of a single fetch. Never mutated after construction.
#[derive(Debug, Clone, PartialEq)]
pub struct PanelSnapshot {
    pub device_id: String,
    pub name: String,
    pub model: Option<String>,
    pub serial_number: Option<String>,
    pub firmware: Option<String>,
    pub online: bool,
    pub online_since: Option<DateTime<Utc>>,
    pub arming_state: ArmingState,
    /// `armingLevel` exactly as the cloud sent it
    pub arming_level_raw: String,
    pub trouble_flags: TroubleFlags,
    pub low_battery_zones: Vec<u32>,
    pub tamper_zones: Vec<u32>,
    pub alarm_zones: Vec<u32>,
    pub trouble_zones: Vec<u32>,
    pub last_armed_at: Option<DateTime<Utc>>,
    pub last_disarmed_at: Option<DateTime<Utc>>,
    pub last_event: Option<LastEvent>,
}

impl PanelSnapshot {
    pub fn any_trouble(&self) -> bool {
        !self.trouble_flags.is_empty()
    }

    pub fn has_trouble(&self, flag: TroubleFlags) -> bool {
        self.trouble_flags.contains(flag)
    }
}
