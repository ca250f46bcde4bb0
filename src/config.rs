use anyhow::{anyhow, Context, Result};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use crate::utils::{parse_duration, parse_roles};

const DEFAULT_COOLDOWN: Duration = Duration::from_secs(300);
const DEFAULT_POWER_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, PartialEq)]
pub struct PowerEndpoints {
    pub wol_url: String,
    pub shutdown_url: String,
    pub reboot_url: String,
    pub liveness_url: String,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub endpoints: PowerEndpoints,
    pub cooldown: Duration,
    pub power_timeout: Duration,
    /// Roles allowed to use boot/shutdown/reboot. Empty means everyone.
    pub power_roles: Vec<String>,
    /// Roles allowed to override cooldowns and manage the registry.
    pub sudo_roles: Vec<String>,
    pub registry_path: PathBuf,
    pub jwt_secret: String,
    pub listen: SocketAddr,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        // Unset and empty are treated the same
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let required = |key: &str| get(key).ok_or_else(|| anyhow!("Missing {} from environment", key));

        let endpoints = PowerEndpoints {
            wol_url: required("WOL_URL")?,
            shutdown_url: required("SHUTDOWN_URL")?,
            reboot_url: required("REBOOT_URL")?,
            liveness_url: required("LIVENESS_URL")?,
        };

        let cooldown = match get("COOLDOWN") {
            Some(raw) => parse_duration(&raw).ok_or_else(|| anyhow!("COOLDOWN '{}' is not a valid duration", raw))?,
            None => DEFAULT_COOLDOWN,
        };
        let power_timeout = match get("POWER_TIMEOUT") {
            Some(raw) => parse_duration(&raw).ok_or_else(|| anyhow!("POWER_TIMEOUT '{}' is not a valid duration", raw))?,
            None => DEFAULT_POWER_TIMEOUT,
        };

        let power_roles = get("POWERBOT_ROLE").map(|r| parse_roles(&r)).unwrap_or_default();
        let sudo_roles = match get("SUDO_ROLE") {
            Some(r) => parse_roles(&r),
            None => power_roles.clone(),
        };

        // Tokens carry the roles that gate host power, so there is no fallback secret
        let jwt_secret = required("JWT_SECRET")?;

        let host = get("SERVER_HOST").unwrap_or_else(|| "0.0.0.0".to_string());
        let port = get("SERVER_PORT").unwrap_or_else(|| "3000".to_string());
        let listen = format!("{}:{}", host, port)
            .parse::<SocketAddr>()
            .with_context(|| format!("Invalid listen address {}:{}", host, port))?;

        Ok(Self {
            endpoints,
            cooldown,
            power_timeout,
            power_roles,
            sudo_roles,
            registry_path: get("REGISTRY_PATH").unwrap_or_else(|| "servers.json".to_string()).into(),
            jwt_secret,
            listen,
        })
    }
}
