use std::net::IpAddr;
use std::time::Duration;

use regex::Regex;

use crate::error::RegistryError;

pub mod a2s;
pub mod minecraft;

/// Parses an IPv4 or IPv6 literal. Hostnames are rejected.
pub fn validate_ip_address(address: &str) -> Result<IpAddr, RegistryError> {
    address
        .parse::<IpAddr>()
        .map_err(|_| RegistryError::Validation(format!("IP address '{}' is invalid", address)))
}

pub fn validate_port(port: i64) -> Result<u16, RegistryError> {
    if (1..=65535).contains(&port) {
        Ok(port as u16)
    } else {
        Err(RegistryError::Validation(format!(
            "PORT {} is not in valid range 1-65535",
            port
        )))
    }
}

/// Parses `300`, `300s`, `5m`, `1h` or `1d` into a duration. Bare numbers are seconds.
pub fn parse_duration(duration_str: &str) -> Option<Duration> {
    let duration_str = duration_str.trim();
    if let Ok(secs) = duration_str.parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }

    let re = Regex::new(r"^(\d+)([a-zA-Z]+)$").ok()?;
    let caps = re.captures(duration_str)?;
    let value: u64 = caps[1].parse().ok()?;

    let unit: u64 = match &caps[2] {
        "s" => 1,
        "m" => 60,
        "h" => 3600,
        "d" => 86400,
        _ => return None,
    };
    value.checked_mul(unit).map(Duration::from_secs)
}

/// Splits a comma separated role list. An empty list means unrestricted, and so does
/// any list naming `@everyone`.
pub fn parse_roles(raw: &str) -> Vec<String> {
    let roles: Vec<&str> = raw.split(',').map(|r| r.trim()).filter(|r| !r.is_empty()).collect();
    if roles.contains(&"@everyone") {
        return Vec::new();
    }
    roles.into_iter().map(|r| r.to_string()).collect()
}

/// True when `required` is empty or the caller holds at least one of the roles.
pub fn has_any_role(required: &[String], held: &[String]) -> bool {
    required.is_empty() || held.iter().any(|r| required.contains(r))
}
