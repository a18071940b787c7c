//! HTTP client for the Cacophony device API
//!
//! Covers device registration, login, and event report submission.

use std::time::Duration;

use async_trait::async_trait;
use rand::distr::{Alphanumeric, SampleString};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde::{Deserialize, Serialize};

use crate::config::DeviceConfig;
use crate::delivery::Reporter;
use crate::error::{Error, Result};
use crate::types::{DeliveryOutcome, Event};

use super::report::{classify, Report, Verdict};

const PASSWORD_LENGTH: usize = 20;

/// Credentials and token for one device.
///
/// The token lives only in memory; it is replaced by `ApiClient::login`.
pub struct Session {
    device: DeviceConfig,
    password: String,
    token: String,
}

impl Session {
    pub fn device(&self) -> &DeviceConfig {
        &self.device
    }

    pub fn password(&self) -> &str {
        &self.password
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("device", &self.device)
            .field("password", &"<redacted>")
            .field("token", &"<redacted>")
            .finish()
    }
}

/// Response from the registration and login endpoints
#[derive(Debug, Default, Deserialize)]
struct TokenResponse {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    messages: Vec<String>,
    #[serde(default)]
    token: String,
}

impl TokenResponse {
    fn message(&self) -> &str {
        self.messages.first().map(String::as_str).unwrap_or("unknown")
    }
}

/// Request body for POST /api/v1/devices
#[derive(Serialize)]
struct RegisterRequest<'a> {
    group: &'a str,
    devicename: &'a str,
    password: &'a str,
}

/// Request body for POST /authenticate_device
#[derive(Serialize)]
struct LoginRequest<'a> {
    devicename: &'a str,
    password: &'a str,
}

/// HTTP client for the device API, holding the device's session
#[derive(Debug)]
pub struct ApiClient {
    http_client: reqwest::Client,
    base_url: String,
    session: Session,
    just_registered: bool,
}

impl ApiClient {
    /// Obtain a session for the device.
    ///
    /// With a stored password the device logs in. Without one it registers,
    /// and `persist_password` is called with the new password before this
    /// returns; if persisting fails the whole bootstrap fails.
    pub async fn bootstrap<F>(
        device: DeviceConfig,
        password: Option<String>,
        timeout: Duration,
        persist_password: F,
    ) -> Result<Self>
    where
        F: FnOnce(&str) -> Result<()>,
    {
        let base_url = device.server_url.trim_end_matches('/').to_string();

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .build()
            .map_err(|e| Error::Http(format!("failed to create HTTP client: {}", e)))?;

        let mut client = Self {
            http_client,
            base_url,
            session: Session {
                device,
                password: password.unwrap_or_default(),
                token: String::new(),
            },
            just_registered: false,
        };

        if client.session.password.is_empty() {
            client.register().await?;
            tracing::info!(
                device = %client.session.device.device_name,
                group = %client.session.device.group,
                "First time registration - saving password"
            );
            persist_password(&client.session.password)?;
            client.just_registered = true;
        } else {
            client.login().await?;
        }

        Ok(client)
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Whether this client registered the device during bootstrap
    pub fn just_registered(&self) -> bool {
        self.just_registered
    }

    async fn register(&mut self) -> Result<()> {
        let password = Alphanumeric.sample_string(&mut rand::rng(), PASSWORD_LENGTH);
        let url = format!("{}/api/v1/devices", self.base_url);

        let device = &self.session.device;
        let request = RegisterRequest {
            group: &device.group,
            devicename: &device.device_name,
            password: &password,
        };

        let response = self.post_for_token(&url, &request).await?;
        if !response.success {
            return Err(Error::Bootstrap(format!(
                "registration failed: {}",
                response.message()
            )));
        }

        self.session.password = password;
        self.session.token = response.token;
        Ok(())
    }

    /// Exchange the stored password for a fresh token.
    pub async fn login(&mut self) -> Result<()> {
        if self.session.password.is_empty() {
            return Err(Error::Bootstrap("no password set".to_string()));
        }

        let url = format!("{}/authenticate_device", self.base_url);
        let request = LoginRequest {
            devicename: &self.session.device.device_name,
            password: &self.session.password,
        };

        let response = self.post_for_token(&url, &request).await?;
        if !response.success {
            return Err(Error::Bootstrap(format!(
                "login failed: {}",
                response.message()
            )));
        }

        self.session.token = response.token;
        tracing::debug!(device = %self.session.device.device_name, "Obtained new token");
        Ok(())
    }

    async fn post_for_token<B: Serialize>(&self, url: &str, body: &B) -> Result<TokenResponse> {
        let response = self
            .http_client
            .post(url)
            .json(body)
            .send()
            .await
            .map_err(|e| Error::Bootstrap(format!("HTTP request failed: {}", e)))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| Error::Bootstrap(format!("failed to read response: {}", e)))?;

        serde_json::from_str(&text).map_err(|e| {
            Error::Bootstrap(format!("decode ({}): {}: {}", status, e, text.trim()))
        })
    }

    /// Submit a report once, returning the server's verdict.
    async fn submit(&self, report: &Report) -> Verdict {
        let url = format!("{}/api/v1/events", self.base_url);

        let response = match self
            .http_client
            .post(&url)
            .header(AUTHORIZATION, &self.session.token)
            .json(report)
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => return Verdict::Retryable(format!("HTTP request failed: {}", e)),
        };

        let status = response.status();
        match response.text().await {
            Ok(body) => classify(status, &body),
            Err(e) => Verdict::Retryable(format!("failed to read response ({}): {}", status, e)),
        }
    }

    /// Report one queued event, classifying the result.
    ///
    /// An unauthorized answer triggers exactly one re-login and resubmission.
    pub async fn report_event(&mut self, event: &Event) -> DeliveryOutcome {
        let report = match Report::from_event(event) {
            Ok(report) => report,
            Err(reason) => return DeliveryOutcome::Rejected(reason),
        };

        let verdict = match self.submit(&report).await {
            Verdict::Unauthorized(msg) => {
                tracing::info!(error = %msg, "Report unauthorized, logging in again");
                if let Err(e) = self.login().await {
                    return DeliveryOutcome::TransientFailure(format!("re-login failed: {}", e));
                }
                self.submit(&report).await
            }
            verdict => verdict,
        };

        match verdict {
            Verdict::Accepted => DeliveryOutcome::Delivered,
            Verdict::Unauthorized(msg) | Verdict::Permanent(msg) => DeliveryOutcome::Rejected(msg),
            Verdict::Retryable(msg) => DeliveryOutcome::TransientFailure(msg),
        }
    }
}

#[async_trait]
impl Reporter for ApiClient {
    async fn report(&mut self, event: &Event) -> DeliveryOutcome {
        self.report_event(event).await
    }
}
