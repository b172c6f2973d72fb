//! Example: Log in, print every entity once, then print change events.
//!
//! Credentials come from COVE_USERNAME and COVE_PASSWORD.

use std::sync::Arc;

use alula_bridge::{
    BridgeEvent, CloudConfig, ConfigEntry, CoordinatorConfig, CoveCloudClient, MemoryEntryStore,
    ZoneNames, build_entities, setup_entry, unload_entry,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let username = std::env::var("COVE_USERNAME")?;
    let password = std::env::var("COVE_PASSWORD")?;

    let client = Arc::new(CoveCloudClient::new(CloudConfig::default())?);
    let store = Arc::new(MemoryEntryStore::new());
    let entry = ConfigEntry::new(&username, &password, None);
    let config = CoordinatorConfig::builder().update_interval_ms(15_000).build();

    let loaded = setup_entry(entry, client, store, config).await?;
    let coordinator = loaded.coordinator.clone();

    if let Some(snapshot) = coordinator.snapshot() {
        for entity in build_entities(&snapshot, &coordinator, &ZoneNames::new()) {
            if let Some(state) = entity.render(&snapshot) {
                println!("{:<28} {:<20} {}", entity.unique_id(), entity.name(), state.state);
            }
        }
    }

    let mut events = coordinator.events();
    println!("\nListening for changes (Ctrl+C to stop)...\n");

    loop {
        tokio::select! {
            event = events.recv() => {
                match event {
                    Ok(BridgeEvent::ArmingStateChanged { device_id, old, new }) => {
                        println!("{device_id}: {} -> {}", old.as_ha_state(), new.as_ha_state());
                    }
                    Ok(BridgeEvent::ZoneChanged { device_id, zone_index, open }) => {
                        println!("{device_id} zone {zone_index}: {}", if open { "open" } else { "closed" });
                    }
                    Ok(BridgeEvent::TroubleChanged { device_id, set, unset, .. }) => {
                        for e in set {
                            println!("{device_id}  + {e}");
                        }
                        for e in unset {
                            println!("{device_id}  - {e}");
                        }
                    }
                    Ok(BridgeEvent::SnapshotUpdated(_)) => {}
                    Ok(event) => {
                        println!("Event: {:?}", event);
                    }
                    Err(e) => {
                        println!("Event channel error: {}", e);
                        break;
                    }
                }
            }
            _ = tokio::signal::ctrl_c() => {
                println!("\nStopping...");
                break;
            }
        }
    }

    unload_entry(loaded);
    Ok(())
}
