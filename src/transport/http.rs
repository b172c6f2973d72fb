// MIT License - Copyright (c) 2026 Peter Wright
// Alula / Cove bridge

use std::time::Instant;

use async_trait::async_trait;
use reqwest::{Method, StatusCode};
use serde_json::Value;
use tokio::sync::Mutex;
use tokio::time::Duration;
use tracing::{debug, info, warn};

use crate::config::{ArmMode, CloudConfig};
use crate::error::{AlulaError, Result};
use crate::protocol::{
    CloudDevice, TokenResponse, arm_request_body, parse_device, parse_resources, parse_zone,
};
use crate::transport::{AccountClient, AccountStatus, TokenInfo};

/// Refresh the access token this long before the cloud says it expires.
const EXPIRY_MARGIN: Duration = Duration::from_secs(60);

const DEVICE_PAGE_SIZE: &str = "100";

#[derive(Debug, Default)]
struct Session {
    access_token: Option<String>,
    refresh_token: Option<String>,
    expires_at: Option<Instant>,
}

impl Session {
    fn store(&mut self, token: &TokenResponse) {
        self.access_token = Some(token.access_token.clone());
        if let Some(ref refresh) = token.refresh_token {
            self.refresh_token = Some(refresh.clone());
        }
        self.expires_at = token
            .expires_in
            .map(|secs| Instant::now() + Duration::from_secs(secs).saturating_sub(EXPIRY_MARGIN));
    }

    fn needs_refresh(&self) -> bool {
        match (&self.access_token, self.expires_at) {
            (None, _) => true,
            (Some(_), Some(at)) => Instant::now() >= at,
            (Some(_), None) => false,
        }
    }
}

/// HTTPS client for the Cove (Alula) cloud API.
pub struct CoveCloudClient {
    http: reqwest::Client,
    config: CloudConfig,
    session: Mutex<Session>,
}

impl CoveCloudClient {
    pub fn new(config: CloudConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .user_agent(concat!("alula2mqtt/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            http,
            config,
            session: Mutex::new(Session::default()),
        })
    }

    fn url(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            path.to_string()
        } else {
            format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
        }
    }

    async fn token_grant(&self, params: &[(&str, &str)]) -> Result<TokenResponse> {
        let mut form: Vec<(&str, &str)> = params.to_vec();
        form.push(("client_id", self.config.oauth_client_id.as_str()));

        let mut req = self.http.post(self.url("/oauth/token")).form(&form);
        if let Some(ref secret) = self.config.oauth_client_secret {
            req = req.basic_auth(&self.config.oauth_client_id, Some(secret));
        }

        let resp = req.send().await.map_err(|e| map_send_error(e, "token grant"))?;
        let status = resp.status();
        if status.is_success() {
            return Ok(resp.json::<TokenResponse>().await?);
        }
        let body = resp.text().await.unwrap_or_default();
        if matches!(
            status,
            StatusCode::BAD_REQUEST | StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN
        ) {
            Err(AlulaError::authentication(format!("{status}: {body}")))
        } else {
            Err(AlulaError::Server {
                status: status.as_u16(),
                body,
            })
        }
    }

    /// Return a usable access token, refreshing it first when it is missing or stale.
    async fn access_token(&self) -> Result<String> {
        let needs_refresh = self.session.lock().await.needs_refresh();
        if needs_refresh {
            self.refresh_session().await?;
        }
        self.session
            .lock()
            .await
            .access_token
            .clone()
            .ok_or_else(|| AlulaError::authentication("no access token"))
    }

    async fn send(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, &str)],
        body: Option<&Value>,
    ) -> Result<reqwest::Response> {
        let token = self.access_token().await?;
        let mut req = self.http.request(method, self.url(path)).bearer_auth(token).query(query);
        if let Some(body) = body {
            req = req.json(body);
        }
        req.send().await.map_err(|e| map_send_error(e, path))
    }

    /// Authenticated request returning the JSON body. A 401 triggers one
    /// session refresh and a single retry.
    async fn request(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, &str)],
        body: Option<&Value>,
    ) -> Result<Value> {
        let mut resp = self.send(method.clone(), path, query, body).await?;
        if resp.status() == StatusCode::UNAUTHORIZED {
            debug!("{path}: access token rejected, refreshing session");
            self.refresh_session().await?;
            resp = self.send(method, path, query, body).await?;
        }

        let status = resp.status();
        if status.is_success() {
            if status == StatusCode::NO_CONTENT {
                return Ok(Value::Null);
            }
            let text = resp.text().await?;
            if text.trim().is_empty() {
                return Ok(Value::Null);
            }
            return Ok(serde_json::from_str(&text)?);
        }

        let body = resp.text().await.unwrap_or_default();
        match status.as_u16() {
            401 | 403 => Err(AlulaError::authentication(format!("{path}: {status}"))),
            s if s >= 500 => Err(AlulaError::Server { status: s, body }),
            s => Err(AlulaError::InvalidResponse {
                details: format!("{path}: {s} {body}"),
            }),
        }
    }

    async fn command(&self, device_id: &str, action: &str, body: Option<&Value>) -> Result<()> {
        let path = format!("/api/v1/devices/{device_id}/{action}");
        match self.request(Method::POST, &path, &[], body).await {
            Ok(_) => Ok(()),
            Err(AlulaError::InvalidResponse { details }) => Err(AlulaError::CommandRejected {
                device_id: device_id.to_string(),
                reason: details,
            }),
            Err(e) => Err(e),
        }
    }
}

fn map_send_error(e: reqwest::Error, operation: &str) -> AlulaError {
    if e.is_timeout() {
        AlulaError::Timeout {
            operation: operation.to_string(),
        }
    } else {
        AlulaError::Http(e)
    }
}

/// Add the devices of a device list to `status`. A device that fails to
/// parse is logged and left out.
fn collect_devices(doc: &Value, status: &mut AccountStatus) -> Result<()> {
    for resource in parse_resources(doc)? {
        match parse_device(&resource) {
            Ok(CloudDevice::Panel(panel)) => status.panels.push(panel),
            Ok(CloudDevice::Camera { .. }) => status.camera_count += 1,
            Ok(CloudDevice::Other { device_type, .. }) => {
                status.other_device_types.push(device_type)
            }
            Err(e) => warn!("Skipping device {}: {e}", resource.id),
        }
    }
    Ok(())
}

fn collect_zones(doc: &Value, status: &mut AccountStatus) -> Result<()> {
    for resource in parse_resources(doc)? {
        match parse_zone(&resource) {
            Ok(Some(zone)) => status.zones.push(zone),
            Ok(None) => debug!("Zone notification {} has no device or index", resource.id),
            Err(e) => warn!("Skipping zone notification {}: {e}", resource.id),
        }
    }
    Ok(())
}

#[async_trait]
impl AccountClient for CoveCloudClient {
    async fn authenticate(&self, username: &str, password: &str) -> Result<TokenInfo> {
        debug!("Logging in as {username}");
        let token = self
            .token_grant(&[
                ("grant_type", "password"),
                ("username", username),
                ("password", password),
            ])
            .await?;
        self.session.lock().await.store(&token);
        info!("Logged in to Cove cloud");
        Ok(TokenInfo {
            access_token: token.access_token,
            refresh_token: token.refresh_token,
            expires_in: token.expires_in,
        })
    }

    async fn restore_tokens(&self, refresh_token: &str) {
        let mut session = self.session.lock().await;
        session.access_token = None;
        session.expires_at = None;
        session.refresh_token = Some(refresh_token.to_string());
    }

    async fn refresh_session(&self) -> Result<TokenInfo> {
        let refresh_token = self
            .session
            .lock()
            .await
            .refresh_token
            .clone()
            .ok_or_else(|| AlulaError::authentication("no refresh token"))?;
        let token = self
            .token_grant(&[
                ("grant_type", "refresh_token"),
                ("refresh_token", refresh_token.as_str()),
            ])
            .await?;
        self.session.lock().await.store(&token);
        debug!("Session refreshed");
        Ok(TokenInfo {
            access_token: token.access_token,
            refresh_token: token.refresh_token,
            expires_in: token.expires_in,
        })
    }

    async fn fetch_status(&self) -> Result<AccountStatus> {
        let doc = self
            .request(Method::GET, "/api/v1/devices", &[("page[size]", DEVICE_PAGE_SIZE)], None)
            .await?;

        let mut status = AccountStatus::default();
        collect_devices(&doc, &mut status)?;

        // Zone state is only served through the notification feed, which
        // must be renewed to stay current.
        if let Err(e) = self
            .request(Method::POST, "/api/v1/events/notifications/renew", &[], None)
            .await
        {
            warn!("Failed to renew notifications: {e}");
        }

        let doc = self
            .request(Method::GET, "/api/v1/events/notifications/zones", &[], None)
            .await?;
        collect_zones(&doc, &mut status)?;

        debug!(
            "Fetched {} devices, {} zones",
            status.device_count(),
            status.zones.len()
        );
        Ok(status)
    }

    async fn arm(&self, device_id: &str, mode: ArmMode) -> Result<()> {
        info!("Requesting arm {} on {device_id}", mode.as_str());
        let body = arm_request_body(mode);
        self.command(device_id, "arm", Some(&body)).await
    }

    async fn disarm(&self, device_id: &str) -> Result<()> {
        info!("Requesting disarm on {device_id}");
        self.command(device_id, "disarm", None).await
    }

    async fn refresh_token(&self) -> Option<String> {
        self.session.lock().await.refresh_token.clone()
    }
}
