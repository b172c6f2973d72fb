// MIT License - Copyright (c) 2026 Peter Wright
// Alula / Cove bridge

/// Physical kind of a zone, derived from the cloud's device type hint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ZoneKind {
    Door,
    Window,
    Motion,
    Smoke,
    Water,
}

impl ZoneKind {
    /// Classify from a free-form hint such as "Wireless Motion Sensor".
    ///
    /// Missing or unrecognised hints are treated as doors.
    pub fn from_hint(hint: Option<&str>) -> Self {
        let Some(hint) = hint else {
            return Self::Door;
        };
        let hint = hint.to_lowercase();
        if hint.contains("motion") {
            Self::Motion
        } else if hint.contains("window") {
            Self::Window
        } else if hint.contains("smoke") || hint.contains("fire") {
            Self::Smoke
        } else if hint.contains("water") || hint.contains("flood") {
            Self::Water
        } else {
            Self::Door
        }
    }

    /// Home Assistant `binary_sensor` device class.
    pub fn device_class(&self) -> &'static str {
        match self {
            Self::Door => "door",
            Self::Window => "window",
            Self::Motion => "motion",
            Self::Smoke => "smoke",
            Self::Water => "moisture",
        }
    }
}

/// A single monitored zone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Zone {
    /// Panel the zone belongs to
    pub device_id: String,
    /// Vendor-assigned zone number, stable across restarts
    pub index: u32,
    pub name: Option<String>,
    pub device_type_hint: Option<String>,
    pub kind: ZoneKind,
    /// Open, faulted or triggered
    pub open: bool,
}

impl Zone {
    pub fn new(device_id: impl Into<String>, index: u32) -> Self {
        Self {
            device_id: device_id.into(),
            index,
            name: None,
            device_type_hint: None,
            kind: ZoneKind::Door,
            open: false,
        }
    }

    /// Configured name, or "Zone <index>".
    pub fn display_name(&self) -> String {
        match self.name.as_deref().map(str::trim) {
            Some(name) if !name.is_empty() => name.to_string(),
            _ => format!("Zone {}", self.index),
        }
    }

    pub fn is_open(&self) -> bool {
        self.open
    }
}
