use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::RwLock;

use crate::error::RegistryError;
use crate::models::server::{ServerRecord, StoredServer, WILDCARD};

/// In-memory inventory of monitored servers, backed by a flat JSON file.
///
/// Records keep insertion order. Writers take the lock exclusively, so a scan through
/// [`Registry::list`] never observes a half-applied add, update, delete or load.
pub struct Registry {
    servers: RwLock<Vec<ServerRecord>>,
    file_path: PathBuf,
    /// Set while the file on disk holds entries that were rejected by the last load.
    file_rejected: AtomicBool,
}

impl Registry {
    pub fn new(file_path: impl Into<PathBuf>) -> Self {
        Self {
            servers: RwLock::new(Vec::new()),
            file_path: file_path.into(),
            file_rejected: AtomicBool::new(false),
        }
    }

    pub fn file_path(&self) -> &Path {
        &self.file_path
    }

    pub async fn add(
        &self,
        name: &str,
        ip_address: &str,
        port: i64,
        server_type: &str,
        password: &str,
    ) -> Result<ServerRecord, RegistryError> {
        let record = ServerRecord::new(name, ip_address, port, server_type, password)?;

        let mut servers = self.servers.write().await;
        if servers.iter().any(|s| s.name == record.name) {
            return Err(RegistryError::DuplicateName(record.name));
        }
        servers.push(record.clone());

        tracing::info!("Added server '{}' ({} {}:{})", record.name, record.server_type, record.ip_address, record.port);
        Ok(record)
    }

    /// Removes one record, or every record when `name` is the wildcard.
    pub async fn delete(&self, name: &str) -> Result<Vec<ServerRecord>, RegistryError> {
        let mut servers = self.servers.write().await;

        if name == WILDCARD {
            let removed: Vec<ServerRecord> = servers.drain(..).collect();
            tracing::info!("Cleared registry ({} servers removed)", removed.len());
            return Ok(removed);
        }

        let idx = servers
            .iter()
            .position(|s| s.name == name)
            .ok_or_else(|| RegistryError::NotFound(name.to_string()))?;
        let removed = servers.remove(idx);

        tracing::info!("Deleted server '{}'", removed.name);
        Ok(vec![removed])
    }

    pub async fn update(
        &self,
        name: &str,
        ip_address: &str,
        port: i64,
        server_type: &str,
        password: &str,
    ) -> Result<ServerRecord, RegistryError> {
        let record = ServerRecord::new(name, ip_address, port, server_type, password)?;

        let mut servers = self.servers.write().await;
        let slot = servers
            .iter_mut()
            .find(|s| s.name == name)
            .ok_or_else(|| RegistryError::NotFound(name.to_string()))?;
        *slot = record.clone();

        tracing::info!("Updated server '{}'", name);
        Ok(record)
    }

    pub async fn get(&self, name: &str) -> Option<ServerRecord> {
        self.servers.read().await.iter().find(|s| s.name == name).cloned()
    }

    pub async fn list(&self) -> Vec<ServerRecord> {
        self.servers.read().await.clone()
    }

    pub async fn len(&self) -> usize {
        self.servers.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.servers.read().await.is_empty()
    }

    /// Writes every record to the registry file. Returns the number written.
    pub async fn save(&self) -> Result<usize, RegistryError> {
        let count = self.write_to(&self.file_path).await?;
        self.file_rejected.store(false, Ordering::SeqCst);
        Ok(count)
    }

    /// Save used at shutdown. When the registry file failed to load it still holds the
    /// operator's inventory, so the records go to a sibling `.unsaved.json` file instead.
    pub async fn save_on_exit(&self) -> Result<(usize, PathBuf), RegistryError> {
        let target = if self.file_rejected.load(Ordering::SeqCst) {
            let side = self.file_path.with_extension("unsaved.json");
            tracing::warn!(
                "{} failed to load, leaving it untouched and saving to {}",
                self.file_path.display(),
                side.display()
            );
            side
        } else {
            self.file_path.clone()
        };

        let count = self.write_to(&target).await?;
        Ok((count, target))
    }

    async fn write_to(&self, path: &Path) -> Result<usize, RegistryError> {
        let stored: Vec<StoredServer> = self.servers.read().await.iter().map(StoredServer::from).collect();

        let content = serde_json::to_string_pretty(&stored)
            .map_err(|e| RegistryError::Storage(format!("Failed to serialize servers: {}", e)))?;

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| RegistryError::Storage(format!("Failed to create {}: {}", parent.display(), e)))?;
        }

        let temp_path = path.with_extension("tmp");
        tokio::fs::write(&temp_path, content)
            .await
            .map_err(|e| RegistryError::Storage(format!("Failed to write {}: {}", temp_path.display(), e)))?;
        tokio::fs::rename(&temp_path, path)
            .await
            .map_err(|e| RegistryError::Storage(format!("Failed to replace {}: {}", path.display(), e)))?;

        tracing::info!("Saved {} servers to {}", stored.len(), path.display());
        Ok(stored.len())
    }

    /// Reads the registry file and upserts every entry. All entries are validated
    /// before any is applied; one bad entry aborts the whole load.
    pub async fn load(&self) -> Result<usize, RegistryError> {
        let result = self.read_file().await;
        if let Err(e) = &result {
            if !e.missing_file {
                self.file_rejected.store(true, Ordering::SeqCst);
            }
        }
        let records = result.map_err(|e| e.error)?;

        let mut servers = self.servers.write().await;
        let count = records.len();
        for record in records {
            match servers.iter_mut().find(|s| s.name == record.name) {
                Some(existing) => *existing = record,
                None => servers.push(record),
            }
        }
        self.file_rejected.store(false, Ordering::SeqCst);

        tracing::info!("Loaded {} servers from {}", count, self.file_path.display());
        Ok(count)
    }

    async fn read_file(&self) -> Result<Vec<ServerRecord>, LoadFailure> {
        let content = tokio::fs::read_to_string(&self.file_path).await.map_err(|e| LoadFailure {
            missing_file: e.kind() == std::io::ErrorKind::NotFound,
            error: RegistryError::Storage(format!("Failed to read {}: {}", self.file_path.display(), e)),
        })?;

        let stored: Vec<StoredServer> = serde_json::from_str(&content).map_err(|e| {
            RegistryError::Storage(format!("Failed to parse {}: {}", self.file_path.display(), e))
        })?;

        let mut records = Vec::with_capacity(stored.len());
        for entry in stored {
            let name = entry.name.clone();
            let record = ServerRecord::try_from(entry).map_err(|e| match e {
                RegistryError::Validation(msg) => {
                    RegistryError::Validation(format!("Entry '{}' in {}: {}", name, self.file_path.display(), msg))
                }
                other => other,
            })?;
            records.push(record);
        }

        Ok(records)
    }
}

struct LoadFailure {
    missing_file: bool,
    error: RegistryError,
}

impl From<RegistryError> for LoadFailure {
    fn from(error: RegistryError) -> Self {
        Self { missing_file: false, error }
    }
}
