// MIT License - Copyright (c) 2026 Peter Wright
// MQTT bridge

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use chrono::Utc;
use clap::Parser;
use rumqttc::{AsyncClient, Event, LastWill, MqttOptions, Outgoing, Packet, QoS};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tokio::signal::unix::{SignalKind, signal};
use tokio::sync::Mutex;
use tokio::time::Duration;
use tracing::{debug, error, info, warn};

use alula_bridge::config_flow::{ConfigFlow, FlowResult, UserInput};
use alula_bridge::entry::unique_id_for;
use alula_bridge::mqtt::{self, BridgeCommand, MqttCmdAck, MqttCommand, OFFLINE, ONLINE, Topics};
use alula_bridge::{
    AccountClient, AlarmCommand, BridgeEvent, CloudConfig, ConfigEntry, ConfigEntryStore,
    CoordinatorConfig, CoveCloudClient, Entity, FileEntryStore, LoadedEntry, SetupError,
    UpdateCoordinator, ZoneNames, build_entities, setup_entry, unload_entry,
};

// ---------------------------------------------------------------------------
// CLI
// ---------------------------------------------------------------------------

#[derive(Parser)]
#[command(name = "alula2mqtt")]
#[command(about = "Bridge between an Alula / Cove Security account and Home Assistant over MQTT")]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(long, default_value = "config.toml")]
    config: String,
}

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
struct Config {
    account: AccountToml,
    #[serde(default)]
    cloud: CloudToml,
    mqtt: MqttToml,
    #[serde(default)]
    coordinator: CoordinatorToml,
    #[serde(default)]
    storage: StorageToml,
    #[serde(default, deserialize_with = "deserialize_zone_names")]
    zone_names: ZoneNames,
}

/// Zone names are keyed "<device id>/<zone index>".
fn deserialize_zone_names<'de, D>(deserializer: D) -> Result<ZoneNames, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let string_map: BTreeMap<String, String> = BTreeMap::deserialize(deserializer)?;
    for key in string_map.keys() {
        let valid = key
            .rsplit_once('/')
            .is_some_and(|(device, index)| !device.is_empty() && index.parse::<u32>().is_ok());
        if !valid {
            return Err(serde::de::Error::custom(format!(
                "invalid zone key: {key} (expected \"<device id>/<zone index>\")"
            )));
        }
    }
    Ok(string_map)
}

#[derive(Debug, Clone, Deserialize)]
struct AccountToml {
    username: String,
    password: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
struct CloudToml {
    base_url: String,
    oauth_client_id: String,
    oauth_client_secret: Option<String>,
    request_timeout_ms: u64,
}

impl Default for CloudToml {
    fn default() -> Self {
        let defaults = CloudConfig::default();
        Self {
            base_url: defaults.base_url,
            oauth_client_id: defaults.oauth_client_id,
            oauth_client_secret: defaults.oauth_client_secret,
            request_timeout_ms: defaults.request_timeout_ms,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
struct MqttToml {
    url: String,
    #[serde(default = "default_client_id")]
    client_id: String,
    #[serde(default)]
    username: Option<String>,
    #[serde(default)]
    password: Option<String>,
    #[serde(default = "default_base_topic")]
    base_topic: String,
    #[serde(default = "default_discovery_prefix")]
    discovery_prefix: String,
    #[serde(default = "default_keep_alive")]
    keep_alive_secs: u64,
}

fn default_client_id() -> String {
    "alula-bridge".to_string()
}
fn default_base_topic() -> String {
    "alula".to_string()
}
fn default_discovery_prefix() -> String {
    "homeassistant".to_string()
}
fn default_keep_alive() -> u64 {
    30
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
struct CoordinatorToml {
    update_interval_ms: u64,
    failure_threshold: u32,
    fetch_timeout_ms: u64,
    /// Base delay between setup retries; doubles up to 16x
    retry_delay_ms: u64,
}

impl Default for CoordinatorToml {
    fn default() -> Self {
        let defaults = CoordinatorConfig::default();
        Self {
            update_interval_ms: defaults.update_interval_ms,
            failure_threshold: defaults.failure_threshold,
            fetch_timeout_ms: defaults.fetch_timeout_ms,
            retry_delay_ms: 10_000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
struct StorageToml {
    entries_path: String,
}

impl Default for StorageToml {
    fn default() -> Self {
        Self {
            entries_path: "alula_entries.json".to_string(),
        }
    }
}

fn load_config(path: &str) -> Result<Config> {
    let text = std::fs::read_to_string(path).context("Failed to read config file")?;
    let config: Config = toml::from_str(&text).context("Failed to parse config file")?;
    parse_mqtt_url(&config.mqtt.url)?;
    Ok(config)
}

fn build_cloud_config(toml: &CloudToml) -> CloudConfig {
    CloudConfig {
        base_url: toml.base_url.clone(),
        oauth_client_id: toml.oauth_client_id.clone(),
        oauth_client_secret: toml.oauth_client_secret.clone(),
        request_timeout_ms: toml.request_timeout_ms,
    }
}

fn build_coordinator_config(toml: &CoordinatorToml) -> CoordinatorConfig {
    CoordinatorConfig::builder()
        .update_interval_ms(toml.update_interval_ms)
        .failure_threshold(toml.failure_threshold)
        .fetch_timeout_ms(toml.fetch_timeout_ms)
        .build()
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn now_epoch_ms() -> u64 {
    Utc::now().timestamp_millis() as u64
}

fn backoff_delay(base_ms: u64, attempt: u32) -> Duration {
    Duration::from_millis(base_ms * (1u64 << attempt.saturating_sub(1).min(4)))
}

async fn publish_json(client: &AsyncClient, topic: &str, payload: &impl Serialize, retain: bool) {
    match serde_json::to_string(payload) {
        Ok(json) => publish_raw(client, topic, json, retain).await,
        Err(e) => error!("Failed to serialize MQTT payload: {e}"),
    }
}

async fn publish_raw(client: &AsyncClient, topic: &str, payload: String, retain: bool) {
    if let Err(e) = client.publish(topic, QoS::AtLeastOnce, retain, payload).await {
        error!("Failed to publish to {topic}: {e}");
    }
}

// ---------------------------------------------------------------------------
// Account setup
// ---------------------------------------------------------------------------

/// Find the stored entry for the configured account, running the config
/// flow when there is none yet.
async fn ensure_entry(
    account: &AccountToml,
    client: &Arc<dyn AccountClient>,
    store: &Arc<dyn ConfigEntryStore>,
    retry_delay_ms: u64,
) -> Result<ConfigEntry> {
    let unique_id = unique_id_for(&account.username);
    if let Some(mut entry) = store
        .find_by_unique_id(&unique_id)
        .await
        .context("Failed to read config entries")?
    {
        if entry.data.password != account.password {
            info!("Password for {unique_id} changed in config, updating stored entry");
            entry.data.password = account.password.clone();
            entry.data.refresh_token = None;
            store.update(&entry).await.context("Failed to update config entry")?;
        }
        return Ok(entry);
    }

    let flow = ConfigFlow::new(Arc::clone(client), Arc::clone(store));
    let mut attempt: u32 = 0;
    loop {
        let input = UserInput {
            username: account.username.clone(),
            password: account.password.clone(),
        };
        match flow.step_user(Some(input)).await.context("Config flow failed")? {
            FlowResult::CreateEntry(entry) => return Ok(entry),
            FlowResult::Abort { reason } => anyhow::bail!("Account setup aborted: {reason}"),
            FlowResult::ShowForm { errors } => {
                if errors.values().any(|e| *e == "cannot_connect") {
                    attempt += 1;
                    let delay = backoff_delay(retry_delay_ms, attempt);
                    warn!(
                        "Cannot reach Cove cloud (attempt {attempt}), retrying in {:.1}s...",
                        delay.as_secs_f64()
                    );
                    tokio::time::sleep(delay).await;
                    continue;
                }
                let details: Vec<String> = errors.iter().map(|(f, e)| format!("{f}: {e}")).collect();
                anyhow::bail!("Account setup failed: {}", details.join(", "));
            }
        }
    }
}

/// Set up the entry, retrying with exponential backoff while the cloud is
/// not ready. Rejected credentials end the program.
async fn setup_with_retry(
    entry: ConfigEntry,
    client: &Arc<dyn AccountClient>,
    store: &Arc<dyn ConfigEntryStore>,
    config: CoordinatorConfig,
    retry_delay_ms: u64,
) -> Result<LoadedEntry> {
    let mut attempt: u32 = 0;
    let mut entry = entry;
    loop {
        match setup_entry(entry.clone(), Arc::clone(client), Arc::clone(store), config.clone()).await {
            Ok(loaded) => return Ok(loaded),
            Err(SetupError::AuthFailed(e)) => {
                return Err(anyhow!(e).context("Cove cloud rejected the configured credentials"));
            }
            Err(e) => {
                attempt += 1;
                let delay = backoff_delay(retry_delay_ms, attempt);
                warn!(
                    "Setup attempt {attempt} failed: {e}. Retrying in {:.1}s...",
                    delay.as_secs_f64()
                );
                tokio::time::sleep(delay).await;
                // Pick up a refresh token stored by the failed attempt
                if let Ok(Some(stored)) = store.find_by_unique_id(&entry.unique_id).await {
                    entry = stored;
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Bridge: coordinator ↔ MQTT
// ---------------------------------------------------------------------------

struct Bridge {
    mqtt: AsyncClient,
    topics: Topics,
    coordinator: UpdateCoordinator,
    zone_names: ZoneNames,
    entities: Mutex<Vec<Arc<dyn Entity>>>,
}

impl Bridge {
    async fn on_connected(&self) {
        // rumqttc does not resubscribe after a reconnect
        for filter in [self.topics.command(), self.topics.set_filter()] {
            info!("MQTT: connected, subscribing to {filter}");
            if let Err(e) = self.mqtt.subscribe(&filter, QoS::AtLeastOnce).await {
                error!("Failed to subscribe to {filter}: {e}");
            }
        }
        publish_raw(&self.mqtt, &self.topics.status(), ONLINE.to_string(), true).await;
        self.sync_entities(true).await;
        self.publish_states().await;
    }

    /// Rebuild the entity list from the current snapshot. Discovery is
    /// published for new entities, or for all of them when `republish`.
    async fn sync_entities(&self, republish: bool) {
        let Some(snapshot) = self.coordinator.snapshot() else {
            return;
        };
        let fresh = build_entities(&snapshot, &self.coordinator, &self.zone_names);
        let fresh_ids: HashSet<String> = fresh.iter().map(|e| e.unique_id()).collect();

        let mut entities = self.entities.lock().await;
        let known: HashSet<String> = entities.iter().map(|e| e.unique_id()).collect();

        for entity in &fresh {
            if republish || !known.contains(&entity.unique_id()) {
                let state = entity.render(&snapshot);
                let (topic, payload) = mqtt::discovery(&self.topics, entity.as_ref(), state.as_ref());
                debug!("Publishing discovery for {}", payload.unique_id);
                publish_json(&self.mqtt, &topic, &payload, true).await;
            }
        }
        for gone in entities.iter().filter(|e| !fresh_ids.contains(&e.unique_id())) {
            info!("Entity {} no longer reported by the cloud", gone.unique_id());
            publish_raw(
                &self.mqtt,
                &self.topics.availability(&gone.unique_id()),
                OFFLINE.to_string(),
                true,
            )
            .await;
        }
        debug!("{} entities registered", fresh.len());
        *entities = fresh;
    }

    async fn publish_states(&self) {
        let Some(snapshot) = self.coordinator.snapshot() else {
            return;
        };
        let available = self.coordinator.is_available();
        let entities = self.entities.lock().await.clone();
        for entity in entities {
            for msg in mqtt::state_messages(&self.topics, entity.as_ref(), &snapshot, available) {
                publish_raw(&self.mqtt, &msg.topic, msg.payload, true).await;
            }
        }
    }

    async fn publish_offline(&self) {
        let entities = self.entities.lock().await.clone();
        for entity in entities {
            publish_raw(
                &self.mqtt,
                &self.topics.availability(&entity.unique_id()),
                OFFLINE.to_string(),
                true,
            )
            .await;
        }
        publish_raw(&self.mqtt, &self.topics.status(), OFFLINE.to_string(), true).await;
    }

    async fn handle_event(&self, event: BridgeEvent) {
        match &event {
            BridgeEvent::SnapshotUpdated(_) => {
                self.sync_entities(false).await;
                self.publish_states().await;
            }
            BridgeEvent::AvailabilityChanged { available } => {
                if *available {
                    info!("Entities available");
                } else {
                    warn!("Entities unavailable");
                }
                self.publish_states().await;
            }
            BridgeEvent::ArmingStateChanged {
                device_id,
                old,
                new,
            } => {
                info!(
                    "Panel {device_id}: {} -> {}",
                    old.as_ha_state(),
                    new.as_ha_state()
                );
            }
            BridgeEvent::ZoneChanged {
                device_id,
                zone_index,
                open,
            } => {
                let label = self
                    .zone_names
                    .get(&format!("{device_id}/{zone_index}"))
                    .cloned()
                    .unwrap_or_else(|| format!("Zone {zone_index}"));
                info!(
                    "Panel {device_id} zone {zone_index} ({label}) {}",
                    if *open { "opened" } else { "closed" }
                );
            }
            BridgeEvent::TroubleChanged {
                device_id, flags, ..
            } => {
                warn!("Panel {device_id} trouble: {}", mqtt::describe_flags(*flags));
            }
            BridgeEvent::RefreshFailed { .. } => {}
        }

        let topic = self.topics.events();
        for payload in mqtt::event_payloads(&event, now_epoch_ms()) {
            publish_json(&self.mqtt, &topic, &payload, false).await;
        }
    }

    async fn publish_ack(&self, ack: MqttCmdAck) {
        publish_json(&self.mqtt, &self.topics.events(), &ack, false).await;
    }

    async fn on_message(&self, topic: &str, payload: &[u8]) {
        let payload_str = String::from_utf8_lossy(payload);
        if topic == self.topics.command() {
            match serde_json::from_str::<MqttCommand>(&payload_str) {
                Ok(cmd) => {
                    if cmd.op == "SNAPSHOT" {
                        debug!("MQTT command received: {payload_str}");
                    } else {
                        info!("MQTT command received: {payload_str}");
                    }
                    self.handle_command(&payload_str, cmd).await;
                }
                Err(e) => warn!("Failed to parse MQTT command: {e}"),
            }
        } else if let Some(object) = self.topics.parse_set_topic(topic) {
            self.handle_set(topic, object, payload_str.trim()).await;
        }
    }

    /// Alarm panel command from Home Assistant.
    async fn handle_set(&self, topic: &str, object: &str, payload: &str) {
        let src = Some(json!({ "topic": topic, "payload": payload }));
        let Some(command) = AlarmCommand::from_payload(payload) else {
            warn!("Unknown alarm command {payload} on {topic}");
            self.publish_ack(MqttCmdAck::new(now_epoch_ms(), false, src)).await;
            return;
        };

        let entity = self
            .entities
            .lock()
            .await
            .iter()
            .find(|e| mqtt::object_id(&e.unique_id()) == object)
            .cloned();
        let Some(panel) = entity.as_deref().and_then(|e| e.as_alarm_panel()) else {
            warn!("{} for unknown alarm panel {object}", command.as_payload());
            self.publish_ack(MqttCmdAck::new(now_epoch_ms(), false, src)).await;
            return;
        };

        let mut ack = MqttCmdAck::new(now_epoch_ms(), true, src);
        if let Err(e) = panel.execute(command).await {
            error!("{} {object} failed: {e}", command.as_payload());
            ack.success = false;
            ack.error = Some(e.to_string());
        }
        self.publish_ack(ack).await;
    }

    async fn handle_command(&self, payload_str: &str, cmd: MqttCommand) {
        // Echo the raw payload back in CMD_ACK
        let src = serde_json::from_str::<Value>(payload_str).ok();
        match cmd.bridge_command() {
            Some(BridgeCommand::Ping) => {
                self.publish_ack(MqttCmdAck::new(now_epoch_ms(), true, src)).await;
            }
            Some(BridgeCommand::Refresh) => {
                let mut ack = MqttCmdAck::new(now_epoch_ms(), true, src);
                if let Err(e) = self.coordinator.request_refresh().await {
                    warn!("Refresh command failed: {e}");
                    ack.success = false;
                    ack.error = Some(e.to_string());
                }
                self.publish_ack(ack).await;
            }
            Some(BridgeCommand::Snapshot) => {
                let mut ack = MqttCmdAck::new(now_epoch_ms(), false, src);
                if let Some(snapshot) = self.coordinator.snapshot() {
                    let payload = mqtt::snapshot_payload(&snapshot, &self.zone_names, now_epoch_ms());
                    publish_json(&self.mqtt, &self.topics.events(), &payload, false).await;
                    ack.success = true;
                    ack.data = serde_json::to_value(&payload).ok();
                }
                self.publish_ack(ack).await;
            }
            None => {
                warn!("Unknown command: {}", cmd.op);
                self.publish_ack(MqttCmdAck::new(now_epoch_ms(), false, src)).await;
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<()> {
    // RUST_LOG controls verbosity (e.g. RUST_LOG=debug or RUST_LOG=alula_bridge=trace).
    // Default: info.
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    // systemd journal already adds timestamps, so omit them when running under systemd
    if std::env::var_os("JOURNAL_STREAM").is_some() {
        tracing_subscriber::fmt().without_time().with_env_filter(env_filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(env_filter).init();
    }

    let cli = Cli::parse();
    let mut config = load_config(&cli.config)?;

    let mut sighup = signal(SignalKind::hangup())?;
    let mut sigterm = signal(SignalKind::terminate())?;

    loop {
        let retry_delay_ms = config.coordinator.retry_delay_ms;
        let store: Arc<dyn ConfigEntryStore> =
            Arc::new(FileEntryStore::new(&config.storage.entries_path));
        let cloud: Arc<dyn AccountClient> = Arc::new(
            CoveCloudClient::new(build_cloud_config(&config.cloud))
                .context("Failed to create Cove cloud client")?,
        );

        info!("Connecting to Cove cloud at {}", config.cloud.base_url);
        let setup = async {
            let entry = ensure_entry(&config.account, &cloud, &store, retry_delay_ms).await?;
            let loaded = setup_with_retry(
                entry,
                &cloud,
                &store,
                build_coordinator_config(&config.coordinator),
                retry_delay_ms,
            )
            .await?;
            anyhow::Ok(loaded)
        };
        let loaded = tokio::select! {
            loaded = setup => loaded?,
            _ = tokio::signal::ctrl_c() => {
                info!("Received SIGINT during setup, exiting");
                return Ok(());
            }
            _ = sigterm.recv() => {
                info!("Received SIGTERM during setup, exiting");
                return Ok(());
            }
        };
        info!("{} set up", loaded.entry.title);

        // Set up MQTT
        let topics = Topics::new(&config.mqtt.base_topic, &config.mqtt.discovery_prefix);
        let (mqtt_host, mqtt_port) = parse_mqtt_url(&config.mqtt.url)?;
        let mut mqtt_opts = MqttOptions::new(&config.mqtt.client_id, mqtt_host, mqtt_port);
        mqtt_opts.set_keep_alive(Duration::from_secs(config.mqtt.keep_alive_secs));
        mqtt_opts.set_last_will(LastWill::new(topics.status(), OFFLINE, QoS::AtLeastOnce, true));
        if let (Some(user), Some(pass)) = (&config.mqtt.username, &config.mqtt.password) {
            mqtt_opts.set_credentials(user, pass);
        }
        let (client, mut eventloop) = AsyncClient::new(mqtt_opts, 256);

        let bridge = Arc::new(Bridge {
            mqtt: client.clone(),
            topics,
            coordinator: loaded.coordinator.clone(),
            zone_names: config.zone_names.clone(),
            entities: Mutex::new(Vec::new()),
        });

        // Task 1: coordinator events → MQTT
        let bridge_events = Arc::clone(&bridge);
        let mut event_rx = loaded.coordinator.events();
        let event_handle = tokio::spawn(async move {
            loop {
                match event_rx.recv().await {
                    Ok(event) => bridge_events.handle_event(event).await,
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                        warn!("Event receiver lagged, missed {n} events");
                        bridge_events.sync_entities(false).await;
                        bridge_events.publish_states().await;
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => {
                        info!("Event channel closed");
                        break;
                    }
                }
            }
        });

        // Task 2: MQTT event loop (receives messages, handles commands)
        let bridge_mqtt = Arc::clone(&bridge);
        let mut mqtt_handle = tokio::spawn(async move {
            loop {
                match eventloop.poll().await {
                    Ok(Event::Incoming(Packet::ConnAck(_))) => {
                        let bridge = Arc::clone(&bridge_mqtt);
                        tokio::spawn(async move { bridge.on_connected().await });
                    }
                    Ok(Event::Incoming(Packet::Publish(msg))) => {
                        // Commands wait on the cloud; keep polling meanwhile
                        let bridge = Arc::clone(&bridge_mqtt);
                        tokio::spawn(async move { bridge.on_message(&msg.topic, &msg.payload).await });
                    }
                    Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                        debug!("MQTT: disconnect sent");
                        break;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        error!("MQTT event loop error: {e}");
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                }
            }
        });

        // Wait for a signal
        info!("MQTT bridge running. Send SIGHUP to restart, SIGINT/SIGTERM to stop.");
        let restart = tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Received SIGINT, shutting down...");
                false
            }
            _ = sigterm.recv() => {
                info!("Received SIGTERM, shutting down...");
                false
            }
            _ = sighup.recv() => {
                info!("Received SIGHUP, reloading config and restarting connections...");
                true
            }
        };

        event_handle.abort();
        unload_entry(loaded);
        bridge.publish_offline().await;
        if let Err(e) = client.disconnect().await {
            warn!("Error disconnecting from MQTT: {e}");
        }
        // Let the event loop flush the offline messages
        if tokio::time::timeout(Duration::from_secs(2), &mut mqtt_handle)
            .await
            .is_err()
        {
            mqtt_handle.abort();
        }

        if !restart {
            break;
        }

        // Reload config from disk; keep previous config on failure
        info!("Reloading config from {}", cli.config);
        match load_config(&cli.config) {
            Ok(new_config) => {
                config = new_config;
                info!("Config reloaded successfully");
            }
            Err(e) => warn!("Failed to reload config, keeping previous: {e:#}"),
        }
        info!("Reconnecting...");
    }

    info!("Shutdown complete");
    Ok(())
}

/// Parse an MQTT URL like "mqtt://host:port" into (host, port).
fn parse_mqtt_url(url: &str) -> Result<(String, u16)> {
    let stripped = url
        .strip_prefix("mqtt://")
        .or_else(|| url.strip_prefix("tcp://"))
        .unwrap_or(url);
    let (host, port_str) = stripped
        .rsplit_once(':')
        .context("MQTT URL must be in format mqtt://host:port")?;
    let port: u16 = port_str.parse().context("Invalid MQTT port number")?;
    Ok((host.to_string(), port))
}
