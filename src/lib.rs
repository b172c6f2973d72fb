// MIT License - Copyright (c) 2026 Peter Wright
// Alula / Cove bridge
//
//! # alula-bridge
//!
//! Exposes an Alula / Cove Security account to Home Assistant: an alarm
//! panel per panel, a binary sensor per zone, a trouble sensor and a
//! last-event sensor.
//!
//! The cloud session sits behind [`AccountClient`]; [`CoveCloudClient`] is
//! the HTTPS implementation. An [`UpdateCoordinator`] polls it, keeps the
//! last good [`AccountSnapshot`] and renders entities from it.
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use alula_bridge::{
//!     CloudConfig, ConfigEntry, CoordinatorConfig, CoveCloudClient, MemoryEntryStore,
//!     setup_entry,
//! };
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let client = Arc::new(CoveCloudClient::new(CloudConfig::default())?);
//!     let store = Arc::new(MemoryEntryStore::new());
//!     let entry = ConfigEntry::new("me@example.com", "secret", None);
//!
//!     let loaded = setup_entry(entry, client, store, CoordinatorConfig::default()).await?;
//!
//!     let mut events = loaded.coordinator.events();
//!     tokio::spawn(async move {
//!         while let Ok(event) = events.recv().await {
//!             println!("Event: {:?}", event);
//!         }
//!     });
//!
//!     tokio::signal::ctrl_c().await?;
//!     alula_bridge::unload_entry(loaded);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod config_flow;
pub mod coordinator;
pub mod devices;
pub mod entities;
pub mod entry;
pub mod error;
pub mod event;
pub mod mqtt;
pub mod protocol;
pub mod setup;
pub mod snapshot;
pub mod transport;

// Re-exports for convenience
pub use config::{ArmMode, CloudConfig, CoordinatorConfig, CoordinatorConfigBuilder};
pub use config_flow::{ConfigFlow, FlowResult, UserInput};
pub use coordinator::{CoordinatorState, UpdateCoordinator};
pub use devices::{ArmingState, LastEvent, LastEventType, PanelSnapshot, TroubleFlags, Zone, ZoneKind};
pub use entities::{
    AlarmCommand, AlarmPanelEntity, Entity, EntityState, LastEventSensor, Platform, TroubleSensor,
    ZoneBinarySensor, ZoneNames, build_entities,
};
pub use entry::{ConfigEntry, ConfigEntryStore, EntryData, FileEntryStore, MemoryEntryStore};
pub use error::{AlulaError, ErrorKind, Result};
pub use event::{BridgeEvent, EventReceiver};
pub use setup::{LoadedEntry, SetupError, remove_entry, setup_entry, unload_entry};
pub use snapshot::AccountSnapshot;
pub use transport::http::CoveCloudClient;
pub use transport::{AccountClient, AccountStatus, TokenInfo};
