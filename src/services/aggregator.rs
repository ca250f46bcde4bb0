use futures::future::join_all;
use serde::Serialize;
use std::sync::Arc;
use utoipa::ToSchema;

use crate::error::{ApiError, RegistryError};
use crate::models::server::{PlayerCounts, PlayerInfo, ServerDetails, ServerRecord};
use crate::services::game_query::GameQuery;
use crate::services::registry::Registry;

/// Verdict of one fan-out over the registry. Recomputed on every call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, ToSchema)]
pub struct AggregationResult {
    pub anyone_active: bool,
    /// Servers whose query failed, in registry order.
    pub failed_servers: Vec<String>,
    /// Players summed over the servers that answered.
    pub players: u32,
    pub servers_queried: usize,
}

pub struct StatusAggregator {
    registry: Arc<Registry>,
    query: Arc<dyn GameQuery>,
}

impl StatusAggregator {
    pub fn new(registry: Arc<Registry>, query: Arc<dyn GameQuery>) -> Self {
        Self { registry, query }
    }

    /// Queries every registered server and reports whether anybody is connected.
    /// A failing server is recorded and skipped; this never returns an error.
    pub async fn is_anyone_active(&self) -> AggregationResult {
        if self.registry.is_empty().await {
            match self.registry.load().await {
                Ok(count) => tracing::info!("Registry was empty, loaded {} servers from disk", count),
                Err(e) => tracing::warn!("Registry is empty and could not be loaded: {}", e),
            }
        }

        let servers = self.registry.list().await;
        let results = join_all(servers.iter().map(|server| self.query.players(server))).await;

        let mut result = AggregationResult {
            servers_queried: servers.len(),
            ..Default::default()
        };
        for (server, outcome) in servers.iter().zip(results) {
            match outcome {
                Ok(counts) => {
                    tracing::debug!("{}: {}/{} players", server.name, counts.current, counts.max);
                    result.players = result.players.saturating_add(counts.current);
                }
                Err(e) => {
                    tracing::warn!("Could not get server info for '{}': {}", server.name, e);
                    result.failed_servers.push(server.name.clone());
                }
            }
        }
        result.anyone_active = result.players > 0;

        result
    }

    pub async fn server_players(&self, name: &str) -> Result<PlayerCounts, ApiError> {
        let server = self.lookup(name).await?;
        Ok(self.query.players(&server).await?)
    }

    pub async fn player_details(&self, name: &str) -> Result<Vec<PlayerInfo>, ApiError> {
        let server = self.lookup(name).await?;
        Ok(self.query.player_details(&server).await?)
    }

    pub async fn server_details(&self, name: &str) -> Result<ServerDetails, ApiError> {
        let server = self.lookup(name).await?;
        Ok(self.query.server_details(&server).await?)
    }

    async fn lookup(&self, name: &str) -> Result<ServerRecord, RegistryError> {
        self.registry
            .get(name)
            .await
            .ok_or_else(|| RegistryError::NotFound(name.to_string()))
    }
}
