// MIT License - Copyright (c) 2026 Peter Wright
// Alula / Cove bridge

pub mod panel;
pub mod zone;

pub use panel::{ArmingState, LastEvent, LastEventType, PanelSnapshot, TroubleFlags};
pub use zone::{Zone, ZoneKind};
