use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use std::time::Duration;

use crate::config::PowerEndpoints;
use crate::error::ActionError;
use crate::models::action::PowerAction;

/// The host's power controls. Boot is wake-on-LAN; the rest are plain HTTP calls.
#[async_trait]
pub trait PowerControl: Send + Sync {
    async fn boot(&self) -> Result<(), ActionError>;

    async fn shutdown(&self) -> Result<(), ActionError>;

    async fn reboot(&self) -> Result<(), ActionError>;

    /// True if the liveness endpoint answers 200 OK.
    async fn is_alive(&self) -> bool;

    async fn dispatch(&self, action: PowerAction) -> Result<(), ActionError> {
        match action {
            PowerAction::Boot => self.boot().await,
            PowerAction::Shutdown => self.shutdown().await,
            PowerAction::Reboot => self.reboot().await,
        }
    }
}

#[derive(Debug, Deserialize)]
struct WakeResponse {
    success: Option<bool>,
}

pub struct HttpPowerClient {
    client: reqwest::Client,
    endpoints: PowerEndpoints,
}

impl HttpPowerClient {
    pub fn new(endpoints: PowerEndpoints, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client, endpoints })
    }

    async fn get_ok(&self, url: &str) -> Result<(), ActionError> {
        let resp = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| ActionError::Unreachable(e.to_string()))?;

        match resp.status() {
            StatusCode::OK => Ok(()),
            other => Err(ActionError::Status(other.as_u16())),
        }
    }
}

#[async_trait]
impl PowerControl for HttpPowerClient {
    async fn boot(&self) -> Result<(), ActionError> {
        let resp = self
            .client
            .get(&self.endpoints.wol_url)
            .send()
            .await
            .map_err(|e| ActionError::Unreachable(e.to_string()))?;

        let data = resp
            .json::<WakeResponse>()
            .await
            .map_err(|e| ActionError::MalformedAck(e.to_string()))?;

        match data.success {
            Some(true) => Ok(()),
            _ => Err(ActionError::Rejected),
        }
    }

    async fn shutdown(&self) -> Result<(), ActionError> {
        self.get_ok(&self.endpoints.shutdown_url).await
    }

    async fn reboot(&self) -> Result<(), ActionError> {
        self.get_ok(&self.endpoints.reboot_url).await
    }

    async fn is_alive(&self) -> bool {
        match self.get_ok(&self.endpoints.liveness_url).await {
            Ok(()) => true,
            Err(e) => {
                tracing::info!("Server host is offline: {}", e);
                false
            }
        }
    }
}
