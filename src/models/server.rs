use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;
use utoipa::ToSchema;

use crate::error::RegistryError;
use crate::utils::{validate_ip_address, validate_port};

/// Name that addresses every record at once on delete.
pub const WILDCARD: &str = "*";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ServerType {
    Steam,
    Dcs,
    SpaceEngineers,
    MinecraftJava,
    MinecraftBedrock,
}

impl ServerType {
    pub const ALL: [ServerType; 5] = [
        ServerType::Steam,
        ServerType::Dcs,
        ServerType::SpaceEngineers,
        ServerType::MinecraftJava,
        ServerType::MinecraftBedrock,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ServerType::Steam => "STEAM",
            ServerType::Dcs => "DCS",
            ServerType::SpaceEngineers => "SPACE_ENGINEERS",
            ServerType::MinecraftJava => "MINECRAFT_JAVA",
            ServerType::MinecraftBedrock => "MINECRAFT_BEDROCK",
        }
    }
}

impl fmt::Display for ServerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ServerType {
    type Err = RegistryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ServerType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| RegistryError::Validation(format!("Server type '{}' is invalid", s)))
    }
}

/// A monitored game server. Only constructed through [`ServerRecord::new`], so every
/// instance carries a parsed address, an in-range port and a known type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct ServerRecord {
    pub name: String,
    #[schema(value_type = String)]
    pub ip_address: IpAddr,
    pub port: u16,
    pub server_type: ServerType,
    #[serde(skip_serializing)]
    pub password: String,
}

impl ServerRecord {
    pub fn new(
        name: &str,
        ip_address: &str,
        port: i64,
        server_type: &str,
        password: &str,
    ) -> Result<Self, RegistryError> {
        if name.trim().is_empty() {
            return Err(RegistryError::Validation("Server name cannot be empty".to_string()));
        }
        if name == WILDCARD {
            return Err(RegistryError::Validation(format!("'{}' is a reserved name", WILDCARD)));
        }

        Ok(Self {
            name: name.to_string(),
            ip_address: validate_ip_address(ip_address)?,
            port: validate_port(port)?,
            server_type: server_type.parse()?,
            password: password.to_string(),
        })
    }
}

/// On-disk shape of a record. Fields are declared alphabetically so the written
/// document has a stable key order.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StoredServer {
    pub ip_address: String,
    pub name: String,
    #[serde(default)]
    pub password: String,
    pub port: i64,
    pub server_type: String,
}

impl From<&ServerRecord> for StoredServer {
    fn from(record: &ServerRecord) -> Self {
        Self {
            ip_address: record.ip_address.to_string(),
            name: record.name.clone(),
            password: record.password.clone(),
            port: i64::from(record.port),
            server_type: record.server_type.as_str().to_string(),
        }
    }
}

impl TryFrom<StoredServer> for ServerRecord {
    type Error = RegistryError;

    fn try_from(stored: StoredServer) -> Result<Self, Self::Error> {
        ServerRecord::new(
            &stored.name,
            &stored.ip_address,
            stored.port,
            &stored.server_type,
            &stored.password,
        )
    }
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateServerRequest {
    pub name: String,
    pub ip_address: String,
    pub port: i64,
    pub server_type: String,
    pub password: Option<String>,
}

/// Full replacement of a record's fields; the name stays the key.
#[derive(Debug, Deserialize, ToSchema)]
pub struct UpdateServerRequest {
    pub ip_address: String,
    pub port: i64,
    pub server_type: String,
    pub password: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, ToSchema)]
pub struct PlayerCounts {
    pub current: u32,
    pub max: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct PlayerInfo {
    pub name: String,
    pub score: i32,
    /// Seconds connected, when the protocol reports it.
    pub duration_secs: Option<f32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct ServerDetails {
    pub name: Option<String>,
    pub map: Option<String>,
    pub game: Option<String>,
    pub version: Option<String>,
    pub players: PlayerCounts,
    pub bots: u32,
    /// False for server types without a query backend; counts are then always zero.
    pub supported: bool,
}

impl ServerDetails {
    pub fn unsupported() -> Self {
        Self {
            name: None,
            map: None,
            game: None,
            version: None,
            players: PlayerCounts::default(),
            bots: 0,
            supported: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_type_names() {
        for t in ServerType::ALL {
            assert_eq!(t.as_str().parse::<ServerType>().unwrap(), t);
            assert_eq!(serde_json::to_value(t).unwrap(), serde_json::json!(t.as_str()));
        }
        assert!(matches!("FAIL".parse::<ServerType>(), Err(RegistryError::Validation(_))));
        assert!("steam".parse::<ServerType>().is_err());
    }

    #[test]
    fn record_rejects_reserved_and_empty_names() {
        assert!(ServerRecord::new("*", "10.0.0.1", 1000, "DCS", "").is_err());
        assert!(ServerRecord::new("  ", "10.0.0.1", 1000, "DCS", "").is_err());
    }

    #[test]
    fn stored_shape_has_sorted_keys() {
        let record = ServerRecord::new("Arma", "172.16.69.180", 2303, "STEAM", "pw").unwrap();
        let json = serde_json::to_string(&StoredServer::from(&record)).unwrap();
        assert_eq!(
            json,
            r#"{"ip_address":"172.16.69.180","name":"Arma","password":"pw","port":2303,"server_type":"STEAM"}"#
        );
    }

    #[test]
    fn api_shape_hides_password() {
        let record = ServerRecord::new("Arma", "172.16.69.180", 2303, "STEAM", "pw").unwrap();
        let value = serde_json::to_value(&record).unwrap();
        assert!(value.get("password").is_none());
        assert_eq!(value["ip_address"], "172.16.69.180");
    }
}
