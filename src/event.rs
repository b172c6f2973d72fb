// MIT License - Copyright (c) 2026 Peter Wright
// Alula / Cove bridge

use std::sync::Arc;

use crate::devices::{ArmingState, TroubleFlags};
use crate::error::ErrorKind;
use crate::snapshot::AccountSnapshot;

/// All events emitted by the update coordinator.
///
/// Users subscribe via `coordinator.events()` to receive a
/// `tokio::sync::broadcast::Receiver<BridgeEvent>`.
#[derive(Debug, Clone)]
pub enum BridgeEvent {
    /// A refresh succeeded and this snapshot is now current
    SnapshotUpdated(Arc<AccountSnapshot>),
    /// Panel arming state changed between two snapshots
    ArmingStateChanged {
        device_id: String,
        old: ArmingState,
        new: ArmingState,
    },
    /// Zone opened or closed
    ZoneChanged {
        device_id: String,
        zone_index: u32,
        open: bool,
    },
    /// Trouble flags changed on a panel
    TroubleChanged {
        device_id: String,
        flags: TroubleFlags,
        set: Vec<&'static str>,
        unset: Vec<&'static str>,
    },
    /// Entities became available or unavailable
    AvailabilityChanged { available: bool },
    /// A refresh failed; the last good snapshot stays current
    RefreshFailed { kind: ErrorKind, message: String },
}

/// Type alias for the broadcast sender.
pub type EventSender = tokio::sync::broadcast::Sender<BridgeEvent>;

/// Type alias for the broadcast receiver.
pub type EventReceiver = tokio::sync::broadcast::Receiver<BridgeEvent>;

/// Create a new event channel with the given capacity.
pub fn event_channel(capacity: usize) -> (EventSender, EventReceiver) {
    tokio::sync::broadcast::channel(capacity)
}

/// Change events between two consecutive snapshots.
///
/// Panels or zones that only appear in `new` produce no events; they have
/// no previous state to compare against.
pub fn diff_snapshots(old: &AccountSnapshot, new: &AccountSnapshot) -> Vec<BridgeEvent> {
    let mut events = Vec::new();

    for (device_id, panel) in &new.panels {
        let Some(prev) = old.panel(device_id) else {
            continue;
        };
        if prev.arming_state != panel.arming_state {
            events.push(BridgeEvent::ArmingStateChanged {
                device_id: device_id.clone(),
                old: prev.arming_state,
                new: panel.arming_state,
            });
        }
        let changed = TroubleFlags::changed(prev.trouble_flags, panel.trouble_flags);
        if !changed.is_empty() {
            events.push(BridgeEvent::TroubleChanged {
                device_id: device_id.clone(),
                flags: panel.trouble_flags,
                set: TroubleFlags::set_names(changed, panel.trouble_flags),
                unset: TroubleFlags::unset_names(changed, panel.trouble_flags),
            });
        }
    }

    for zone in new.iter_zones() {
        if let Some(prev) = old.zone(&zone.device_id, zone.index)
            && prev.open != zone.open
        {
            events.push(BridgeEvent::ZoneChanged {
                device_id: zone.device_id.clone(),
                zone_index: zone.index,
                open: zone.open,
            });
        }
    }

    events
}
