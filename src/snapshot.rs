// MIT License - Copyright (c) 2026 Peter Wright
// Alula / Cove bridge

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

use crate::devices::{PanelSnapshot, Zone};

/// Everything one fetch returned for an account.
///
/// Built once per refresh and shared as `Arc<AccountSnapshot>`; every
/// entity rendered in an update cycle reads the same instance.
#[derive(Debug, Clone, PartialEq)]
pub struct AccountSnapshot {
    pub fetched_at: DateTime<Utc>,
    /// Panels keyed by device id
    pub panels: BTreeMap<String, PanelSnapshot>,
    /// Zones grouped by panel device id, then zone index
    pub zones: BTreeMap<String, BTreeMap<u32, Zone>>,
    /// Non-panel devices (cameras) seen in the device list
    pub camera_count: usize,
}

impl AccountSnapshot {
    /// Group a flat zone list by panel. Later duplicates of an index win.
    pub fn new(
        fetched_at: DateTime<Utc>,
        panels: Vec<PanelSnapshot>,
        zones: Vec<Zone>,
        camera_count: usize,
    ) -> Self {
        let panels = panels
            .into_iter()
            .map(|p| (p.device_id.clone(), p))
            .collect();
        let mut grouped: BTreeMap<String, BTreeMap<u32, Zone>> = BTreeMap::new();
        for zone in zones {
            grouped
                .entry(zone.device_id.clone())
                .or_default()
                .insert(zone.index, zone);
        }
        Self {
            fetched_at,
            panels,
            zones: grouped,
            camera_count,
        }
    }

    pub fn panel(&self, device_id: &str) -> Option<&PanelSnapshot> {
        self.panels.get(device_id)
    }

    pub fn zone(&self, device_id: &str, index: u32) -> Option<&Zone> {
        self.zones.get(device_id).and_then(|z| z.get(&index))
    }

    /// All zones in (device id, index) order.
    pub fn iter_zones(&self) -> impl Iterator<Item = &Zone> {
        self.zones.values().flat_map(|z| z.values())
    }

    pub fn zone_count(&self) -> usize {
        self.zones.values().map(BTreeMap::len).sum()
    }
}
