// Shared fixtures for integration tests: a scripted in-memory account client
// and panel/zone builders.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use tokio::sync::Notify;

use alula_bridge::devices::{ArmingState, PanelSnapshot, TroubleFlags, Zone};
use alula_bridge::{AccountClient, AccountStatus, AlulaError, ArmMode, Result, TokenInfo};

pub fn panel(device_id: &str) -> PanelSnapshot {
    PanelSnapshot {
        device_id: device_id.to_string(),
        name: "Home".into(),
        model: Some("BAT-Connect".into()),
        serial_number: Some("SN-0042".into()),
        firmware: Some("2.1.7".into()),
        online: true,
        online_since: None,
        arming_state: ArmingState::Disarmed,
        arming_level_raw: "disarm".into(),
        trouble_flags: TroubleFlags::empty(),
        low_battery_zones: vec![],
        tamper_zones: vec![],
        alarm_zones: vec![],
        trouble_zones: vec![],
        last_armed_at: None,
        last_disarmed_at: None,
        last_event: None,
    }
}

pub fn zone(device_id: &str, index: u32, open: bool) -> Zone {
    let mut zone = Zone::new(device_id, index);
    zone.open = open;
    zone
}

pub fn status(panels: Vec<PanelSnapshot>, zones: Vec<Zone>) -> AccountStatus {
    AccountStatus {
        panels,
        zones,
        camera_count: 0,
        other_device_types: vec![],
    }
}

/// Result of one scripted fetch.
pub enum Step {
    Offline,
    Unauthorized,
}

fn offline() -> AlulaError {
    AlulaError::Server {
        status: 503,
        body: "maintenance".into(),
    }
}

fn unauthorized() -> AlulaError {
    AlulaError::Authentication {
        reason: "invalid_grant".into(),
    }
}

/// In-memory stand-in for the Cove cloud.
///
/// `fetch_status` serves queued failures first, then the current status.
/// Arm and disarm requests change the current status, so the next fetch
/// sees them.
pub struct ScriptedClient {
    pub fetch_calls: AtomicUsize,
    pub auth_calls: AtomicUsize,
    pub refresh_calls: AtomicUsize,
    pub password: String,
    current: Mutex<AccountStatus>,
    failures: Mutex<VecDeque<Step>>,
    login_step: Mutex<Option<Step>>,
    session_valid: AtomicBool,
    restored: Mutex<Option<String>>,
    token_counter: AtomicUsize,
    gated: AtomicBool,
    gate: Notify,
}

impl ScriptedClient {
    pub fn new(initial: AccountStatus) -> Self {
        Self {
            fetch_calls: AtomicUsize::new(0),
            auth_calls: AtomicUsize::new(0),
            refresh_calls: AtomicUsize::new(0),
            password: "hunter2".into(),
            current: Mutex::new(initial),
            failures: Mutex::new(VecDeque::new()),
            login_step: Mutex::new(None),
            session_valid: AtomicBool::new(true),
            restored: Mutex::new(None),
            token_counter: AtomicUsize::new(0),
            gated: AtomicBool::new(false),
            gate: Notify::new(),
        }
    }

    pub fn fail_next(&self, steps: impl IntoIterator<Item = Step>) {
        self.failures.lock().unwrap().extend(steps);
    }

    /// Make logins fail the given way until cleared with `None`.
    pub fn fail_login(&self, step: Option<Step>) {
        *self.login_step.lock().unwrap() = step;
    }

    /// Reject stored refresh tokens.
    pub fn expire_sessions(&self) {
        self.session_valid.store(false, Ordering::SeqCst);
    }

    pub fn restored_token(&self) -> Option<String> {
        self.restored.lock().unwrap().clone()
    }

    pub fn set_status(&self, status: AccountStatus) {
        *self.current.lock().unwrap() = status;
    }

    pub fn update_panel(&self, device_id: &str, f: impl FnOnce(&mut PanelSnapshot)) {
        let mut current = self.current.lock().unwrap();
        if let Some(p) = current.panels.iter_mut().find(|p| p.device_id == device_id) {
            f(p);
        }
    }

    /// Hold every fetch until `release` is called once per fetch.
    pub fn hold_fetches(&self) {
        self.gated.store(true, Ordering::SeqCst);
    }

    pub fn release(&self) {
        self.gate.notify_one();
    }

    pub fn fetches(&self) -> usize {
        self.fetch_calls.load(Ordering::SeqCst)
    }

    fn next_token(&self) -> TokenInfo {
        let n = self.token_counter.fetch_add(1, Ordering::SeqCst) + 1;
        TokenInfo {
            access_token: format!("access-{n}"),
            refresh_token: Some(format!("refresh-{n}")),
            expires_in: Some(3600),
        }
    }
}

#[async_trait]
impl AccountClient for ScriptedClient {
    async fn authenticate(&self, _username: &str, password: &str) -> Result<TokenInfo> {
        self.auth_calls.fetch_add(1, Ordering::SeqCst);
        match *self.login_step.lock().unwrap() {
            Some(Step::Offline) => return Err(offline()),
            Some(Step::Unauthorized) => return Err(unauthorized()),
            None => {}
        }
        if password != self.password {
            return Err(unauthorized());
        }
        Ok(self.next_token())
    }

    async fn restore_tokens(&self, refresh_token: &str) {
        *self.restored.lock().unwrap() = Some(refresh_token.to_string());
    }

    async fn refresh_session(&self) -> Result<TokenInfo> {
        self.refresh_calls.fetch_add(1, Ordering::SeqCst);
        if !self.session_valid.load(Ordering::SeqCst) {
            return Err(unauthorized());
        }
        Ok(self.next_token())
    }

    async fn fetch_status(&self) -> Result<AccountStatus> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        if self.gated.load(Ordering::SeqCst) {
            self.gate.notified().await;
        }
        let step = self.failures.lock().unwrap().pop_front();
        match step {
            Some(Step::Offline) => Err(offline()),
            Some(Step::Unauthorized) => Err(unauthorized()),
            None => Ok(self.current.lock().unwrap().clone()),
        }
    }

    async fn arm(&self, device_id: &str, mode: ArmMode) -> Result<()> {
        let state = match mode {
            ArmMode::Stay => ArmingState::ArmedHome,
            ArmMode::Away => ArmingState::ArmedAway,
            ArmMode::Night => ArmingState::ArmedNight,
        };
        self.apply_arming(device_id, state, mode.as_str())
    }

    async fn disarm(&self, device_id: &str) -> Result<()> {
        self.apply_arming(device_id, ArmingState::Disarmed, "disarm")
    }

    async fn refresh_token(&self) -> Option<String> {
        let n = self.token_counter.load(Ordering::SeqCst);
        (n > 0).then(|| format!("refresh-{n}"))
    }
}

impl ScriptedClient {
    fn apply_arming(&self, device_id: &str, state: ArmingState, raw: &str) -> Result<()> {
        let mut current = self.current.lock().unwrap();
        let Some(p) = current.panels.iter_mut().find(|p| p.device_id == device_id) else {
            return Err(AlulaError::UnknownDevice {
                device_id: device_id.to_string(),
            });
        };
        p.arming_state = state;
        p.arming_level_raw = raw.to_string();
        Ok(())
    }
}
