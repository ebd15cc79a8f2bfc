//! HTTP transport to the charging controller
//!
//! Thin reqwest wrapper around the controller's REST API. Reads fetch the
//! full nested state document; writes target a single setting and return the
//! controller's acknowledged value. All write endpoints are POSTs with the
//! value in the path, no body.
//!
//! Authentication is optional: when a password is configured, a login
//! request exchanges it for a session cookie which is replayed on every
//! subsequent request. A 401 on any call invalidates the cookie so the
//! caller can log in again.

use crate::commands::{BatteryMode, ChargeMode, PhaseSetting};
use crate::config::Config;
use crate::error::{Result, VoltbridgeError};
use crate::logging::get_logger;
use async_trait::async_trait;
use serde_json::{Value, json};
use std::time::Duration;

/// Controller operations the bridge depends on.
///
/// A trait seam so the orchestrator and its tests can run against a stub
/// controller without a network.
#[async_trait]
pub trait ControllerApi: Send + Sync {
    /// Establish a session. A no-op for controllers without authentication.
    async fn login(&mut self) -> Result<()> {
        Ok(())
    }

    /// Invalidate the session. Best effort.
    async fn logout(&mut self) {}

    /// Fetch the full nested state document
    async fn fetch_state(&mut self) -> Result<Value>;

    async fn set_loadpoint_mode(&mut self, loadpoint: &str, mode: ChargeMode) -> Result<()>;
    async fn set_loadpoint_phases(&mut self, loadpoint: &str, phases: PhaseSetting) -> Result<()>;
    async fn set_loadpoint_min_soc(&mut self, loadpoint: &str, percent: u8) -> Result<()>;
    async fn set_loadpoint_limit_soc(&mut self, loadpoint: &str, percent: u8) -> Result<()>;
    async fn set_battery_mode(&mut self, mode: BatteryMode) -> Result<()>;
}

/// reqwest-backed controller client
pub struct EvccClient {
    http: reqwest::Client,
    base_url: String,
    password: Option<String>,
    auth_cookie: Option<String>,
    logger: crate::logging::StructuredLogger,
}

impl EvccClient {
    pub fn new(config: &Config) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.controller.http_timeout_secs))
            .build()
            .map_err(|e| VoltbridgeError::transport(format!("HTTP client init failed: {e}")))?;

        let password = match config.controller.password.trim() {
            "" => None,
            p => Some(p.to_string()),
        };

        Ok(Self {
            http,
            base_url: config.api_base_url(),
            password,
            auth_cookie: None,
            logger: get_logger("transport"),
        })
    }

    /// Exchange the configured password for a session cookie.
    async fn do_login(&mut self) -> Result<()> {
        let Some(password) = self.password.clone() else {
            return Ok(());
        };

        let url = format!("{}/auth/login", self.base_url);
        let response = self
            .http
            .post(&url)
            .json(&json!({ "password": password }))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(VoltbridgeError::auth(format!(
                "Login rejected with status {}",
                response.status()
            )));
        }

        // The session token arrives as a Set-Cookie "auth" cookie.
        let cookie = response
            .headers()
            .get_all(reqwest::header::SET_COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .filter_map(|v| v.split(';').next())
            .find(|pair| pair.trim_start().starts_with("auth="))
            .map(|pair| pair.trim().to_string());

        match cookie {
            Some(cookie) => {
                self.auth_cookie = Some(cookie);
                self.logger.info("Authenticated with controller");
                Ok(())
            }
            None => Err(VoltbridgeError::auth(
                "Login succeeded but no auth cookie was returned",
            )),
        }
    }

    /// Drop the session on the controller side.
    async fn do_logout(&mut self) {
        if self.auth_cookie.is_none() {
            return;
        }
        let url = format!("{}/auth/logout", self.base_url);
        if let Err(e) = self.request(reqwest::Method::POST, &url).send().await {
            self.logger.debug(&format!("Logout request failed: {e}"));
        }
        self.auth_cookie = None;
    }

    fn request(&self, method: reqwest::Method, url: &str) -> reqwest::RequestBuilder {
        let mut builder = self.http.request(method, url);
        if let Some(cookie) = &self.auth_cookie {
            builder = builder.header(reqwest::header::COOKIE, cookie.clone());
        }
        builder
    }

    /// POST a setting and fail loudly on any non-success status, leaving
    /// retry decisions to the caller. A 401 also clears the cached session.
    async fn post_setting(&mut self, path: &str, what: &str) -> Result<()> {
        let url = format!("{}/{}", self.base_url, path);
        let response = self.request(reqwest::Method::POST, &url).send().await?;
        let status = response.status();

        if status == reqwest::StatusCode::UNAUTHORIZED {
            self.auth_cookie = None;
            return Err(VoltbridgeError::auth(format!(
                "Controller rejected {what}: session expired"
            )));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(VoltbridgeError::command_rejected(format!(
                "Controller rejected {what} with status {status}: {body}"
            )));
        }

        self.logger.debug(&format!("Controller accepted {what}"));
        Ok(())
    }
}

#[async_trait]
impl ControllerApi for EvccClient {
    async fn login(&mut self) -> Result<()> {
        self.do_login().await
    }

    async fn logout(&mut self) {
        self.do_logout().await;
    }

    async fn fetch_state(&mut self) -> Result<Value> {
        let url = format!("{}/state", self.base_url);
        let response = self.request(reqwest::Method::GET, &url).send().await?;
        let status = response.status();

        if status == reqwest::StatusCode::UNAUTHORIZED {
            self.auth_cookie = None;
            return Err(VoltbridgeError::auth("State fetch rejected: session expired"));
        }
        if !status.is_success() {
            return Err(VoltbridgeError::transport(format!(
                "State fetch failed with status {status}"
            )));
        }

        Ok(response.json::<Value>().await?)
    }

    async fn set_loadpoint_mode(&mut self, loadpoint: &str, mode: ChargeMode) -> Result<()> {
        self.post_setting(
            &format!("loadpoints/{}/mode/{}", loadpoint, mode.as_wire()),
            &format!("mode '{}' on loadpoint {}", mode.as_wire(), loadpoint),
        )
        .await
    }

    async fn set_loadpoint_phases(&mut self, loadpoint: &str, phases: PhaseSetting) -> Result<()> {
        self.post_setting(
            &format!("loadpoints/{}/phases/{}", loadpoint, phases.as_wire()),
            &format!("phases '{}' on loadpoint {}", phases.as_wire(), loadpoint),
        )
        .await
    }

    async fn set_loadpoint_min_soc(&mut self, loadpoint: &str, percent: u8) -> Result<()> {
        self.post_setting(
            &format!("loadpoints/{}/minsoc/{}", loadpoint, percent),
            &format!("min SoC {}% on loadpoint {}", percent, loadpoint),
        )
        .await
    }

    async fn set_loadpoint_limit_soc(&mut self, loadpoint: &str, percent: u8) -> Result<()> {
        self.post_setting(
            &format!("loadpoints/{}/limitsoc/{}", loadpoint, percent),
            &format!("limit SoC {}% on loadpoint {}", percent, loadpoint),
        )
        .await
    }

    async fn set_battery_mode(&mut self, mode: BatteryMode) -> Result<()> {
        self.post_setting(
            &format!("batterymode/{}", mode.as_wire()),
            &format!("battery mode '{}'", mode.as_wire()),
        )
        .await
    }
}
