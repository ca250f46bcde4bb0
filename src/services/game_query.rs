use async_trait::async_trait;
use std::net::SocketAddr;
use std::time::Duration;

use crate::error::QueryError;
use crate::models::server::{PlayerCounts, PlayerInfo, ServerDetails, ServerRecord, ServerType};
use crate::utils::{a2s, minecraft, validate_port};

pub const QUERY_TIMEOUT: Duration = Duration::from_secs(3);

/// Address and credential for one query. The address is already parsed on the record;
/// the port is re-checked since a record's fields are public and may have been edited.
#[derive(Debug, Clone)]
pub struct QueryTarget {
    pub addr: SocketAddr,
    pub password: String,
}

impl QueryTarget {
    pub fn from_record(record: &ServerRecord) -> Result<Self, QueryError> {
        let port = validate_port(i64::from(record.port)).map_err(|e| QueryError::InvalidTarget(e.to_string()))?;

        Ok(Self {
            addr: SocketAddr::new(record.ip_address, port),
            password: record.password.clone(),
        })
    }
}

/// Player-count capability of one server type.
#[async_trait]
pub trait ProtocolAdapter: Send + Sync {
    async fn query_players(&self, target: &QueryTarget) -> Result<PlayerCounts, QueryError>;

    async fn query_player_details(&self, target: &QueryTarget) -> Result<Vec<PlayerInfo>, QueryError>;

    async fn query_server_details(&self, target: &QueryTarget) -> Result<ServerDetails, QueryError>;
}

/// What the aggregator needs from the outside world: a query per registry record.
#[async_trait]
pub trait GameQuery: Send + Sync {
    async fn players(&self, server: &ServerRecord) -> Result<PlayerCounts, QueryError>;

    async fn player_details(&self, server: &ServerRecord) -> Result<Vec<PlayerInfo>, QueryError>;

    async fn server_details(&self, server: &ServerRecord) -> Result<ServerDetails, QueryError>;
}

pub struct SteamAdapter {
    timeout: Duration,
}

#[async_trait]
impl ProtocolAdapter for SteamAdapter {
    async fn query_players(&self, target: &QueryTarget) -> Result<PlayerCounts, QueryError> {
        let info = a2s::query_info(target.addr, self.timeout).await?;
        Ok(PlayerCounts {
            current: u32::from(info.players),
            max: u32::from(info.max_players),
        })
    }

    async fn query_player_details(&self, target: &QueryTarget) -> Result<Vec<PlayerInfo>, QueryError> {
        let players = a2s::query_players(target.addr, self.timeout).await?;
        Ok(players
            .into_iter()
            .map(|p| PlayerInfo {
                name: p.name,
                score: p.score,
                duration_secs: Some(p.duration),
            })
            .collect())
    }

    async fn query_server_details(&self, target: &QueryTarget) -> Result<ServerDetails, QueryError> {
        let info = a2s::query_info(target.addr, self.timeout).await?;
        Ok(ServerDetails {
            name: Some(info.name),
            map: Some(info.map),
            game: Some(info.game),
            version: info.version,
            players: PlayerCounts {
                current: u32::from(info.players),
                max: u32::from(info.max_players),
            },
            bots: u32::from(info.bots),
            supported: true,
        })
    }
}

pub struct MinecraftJavaAdapter {
    timeout: Duration,
}

#[async_trait]
impl ProtocolAdapter for MinecraftJavaAdapter {
    async fn query_players(&self, target: &QueryTarget) -> Result<PlayerCounts, QueryError> {
        let status = minecraft::java_status(target.addr, self.timeout).await?;
        Ok(PlayerCounts {
            current: status.players.online,
            max: status.players.max,
        })
    }

    async fn query_player_details(&self, target: &QueryTarget) -> Result<Vec<PlayerInfo>, QueryError> {
        // Servers only expose a sample of online players, if any
        let status = minecraft::java_status(target.addr, self.timeout).await?;
        Ok(status
            .players
            .sample
            .into_iter()
            .map(|p| PlayerInfo {
                name: p.name,
                score: 0,
                duration_secs: None,
            })
            .collect())
    }

    async fn query_server_details(&self, target: &QueryTarget) -> Result<ServerDetails, QueryError> {
        let status = minecraft::java_status(target.addr, self.timeout).await?;
        Ok(ServerDetails {
            name: status.motd(),
            map: None,
            game: Some("Minecraft: Java Edition".to_string()),
            version: status.version.as_ref().map(|v| v.name.clone()),
            players: PlayerCounts {
                current: status.players.online,
                max: status.players.max,
            },
            bots: 0,
            supported: true,
        })
    }
}

pub struct MinecraftBedrockAdapter {
    timeout: Duration,
}

#[async_trait]
impl ProtocolAdapter for MinecraftBedrockAdapter {
    async fn query_players(&self, target: &QueryTarget) -> Result<PlayerCounts, QueryError> {
        let status = minecraft::bedrock_status(target.addr, self.timeout).await?;
        Ok(PlayerCounts {
            current: status.online,
            max: status.max,
        })
    }

    async fn query_player_details(&self, target: &QueryTarget) -> Result<Vec<PlayerInfo>, QueryError> {
        // The unconnected ping carries counts only; still confirm the server answers.
        minecraft::bedrock_status(target.addr, self.timeout).await?;
        Ok(Vec::new())
    }

    async fn query_server_details(&self, target: &QueryTarget) -> Result<ServerDetails, QueryError> {
        let status = minecraft::bedrock_status(target.addr, self.timeout).await?;
        Ok(ServerDetails {
            name: Some(status.motd),
            map: status.level_name,
            game: Some(format!("Minecraft: Bedrock Edition ({})", status.edition)),
            version: Some(status.version),
            players: PlayerCounts {
                current: status.online,
                max: status.max,
            },
            bots: 0,
            supported: true,
        })
    }
}

/// Server types with no query backend. Always reports an empty server rather than
/// failing, so these servers can never block a shutdown.
pub struct UnsupportedAdapter {
    server_type: ServerType,
}

#[async_trait]
impl ProtocolAdapter for UnsupportedAdapter {
    async fn query_players(&self, target: &QueryTarget) -> Result<PlayerCounts, QueryError> {
        tracing::debug!("{} has no query backend, reporting {} as empty", self.server_type, target.addr);
        Ok(PlayerCounts::default())
    }

    async fn query_player_details(&self, _target: &QueryTarget) -> Result<Vec<PlayerInfo>, QueryError> {
        Ok(Vec::new())
    }

    async fn query_server_details(&self, _target: &QueryTarget) -> Result<ServerDetails, QueryError> {
        Ok(ServerDetails::unsupported())
    }
}

/// One adapter per server type, dispatched on the record's type tag.
pub struct ProtocolSet {
    steam: SteamAdapter,
    minecraft_java: MinecraftJavaAdapter,
    minecraft_bedrock: MinecraftBedrockAdapter,
    dcs: UnsupportedAdapter,
    space_engineers: UnsupportedAdapter,
}

impl ProtocolSet {
    pub fn new(timeout: Duration) -> Self {
        Self {
            steam: SteamAdapter { timeout },
            minecraft_java: MinecraftJavaAdapter { timeout },
            minecraft_bedrock: MinecraftBedrockAdapter { timeout },
            dcs: UnsupportedAdapter { server_type: ServerType::Dcs },
            space_engineers: UnsupportedAdapter { server_type: ServerType::SpaceEngineers },
        }
    }

    pub fn adapter(&self, server_type: ServerType) -> &dyn ProtocolAdapter {
        match server_type {
            ServerType::Steam => &self.steam,
            ServerType::MinecraftJava => &self.minecraft_java,
            ServerType::MinecraftBedrock => &self.minecraft_bedrock,
            ServerType::Dcs => &self.dcs,
            ServerType::SpaceEngineers => &self.space_engineers,
        }
    }
}

impl Default for ProtocolSet {
    fn default() -> Self {
        Self::new(QUERY_TIMEOUT)
    }
}

#[async_trait]
impl GameQuery for ProtocolSet {
    async fn players(&self, server: &ServerRecord) -> Result<PlayerCounts, QueryError> {
        let target = QueryTarget::from_record(server)?;
        self.adapter(server.server_type).query_players(&target).await
    }

    async fn player_details(&self, server: &ServerRecord) -> Result<Vec<PlayerInfo>, QueryError> {
        let target = QueryTarget::from_record(server)?;
        self.adapter(server.server_type).query_player_details(&target).await
    }

    async fn server_details(&self, server: &ServerRecord) -> Result<ServerDetails, QueryError> {
        let target = QueryTarget::from_record(server)?;
        self.adapter(server.server_type).query_server_details(&target).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn stub_types_report_empty() {
        let set = ProtocolSet::default();
        for kind in ["DCS", "SPACE_ENGINEERS"] {
            let record = ServerRecord::new("stub", "10.0.0.1", 27016, kind, "").unwrap();
            assert_eq!(set.players(&record).await.unwrap(), PlayerCounts::default());
            assert!(set.player_details(&record).await.unwrap().is_empty());
            assert!(!set.server_details(&record).await.unwrap().supported);
        }
    }

    #[tokio::test]
    async fn port_is_revalidated_at_query_time() {
        let set = ProtocolSet::default();
        let mut record = ServerRecord::new("bad", "10.0.0.1", 27016, "DCS", "").unwrap();
        record.port = 0;

        let result = set.players(&record).await;
        assert!(matches!(result, Err(QueryError::InvalidTarget(_))));
    }

    #[test]
    fn target_keeps_record_address() {
        let record = ServerRecord::new("mc", "fe80::1", 25565, "MINECRAFT_JAVA", "pw").unwrap();
        let target = QueryTarget::from_record(&record).unwrap();
        assert_eq!(target.addr, SocketAddr::new(record.ip_address, 25565));
        assert_eq!(target.password, "pw");
    }

    #[tokio::test]
    async fn unreachable_steam_server_fails_instead_of_reporting_empty() {
        let socket = tokio::net::UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let port = socket.local_addr().unwrap().port();
        let set = ProtocolSet::new(Duration::from_millis(100));
        let record = ServerRecord::new("quiet", "127.0.0.1", i64::from(port), "STEAM", "").unwrap();

        assert_eq!(set.players(&record).await, Err(QueryError::Timeout));
        drop(socket);
    }
}
