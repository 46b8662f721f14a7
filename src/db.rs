//! SQLite connection handling and named database profiles.
//!
//! Each profile names one SQLite file. [`DatabaseRegistry`] holds every
//! configured profile; which one is active is runtime state owned by the
//! service layer.

use serde::Serialize;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::debug;

use crate::config::ProfileConfig;
use crate::error::{RagError, Result};

/// Open (creating if missing) the SQLite file of `profile`.
pub async fn connect(profile: &ProfileConfig) -> Result<SqlitePool> {
    let db_path = &profile.path;

    // Ensure parent directory exists
    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).map_err(|e| {
                RagError::Connectivity(format!("cannot create {}: {}", parent.display(), e))
            })?;
        }
    }

    let options = SqliteConnectOptions::new()
        .filename(db_path)
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(Duration::from_secs(5));

    let pool = SqlitePoolOptions::new()
        .max_connections(profile.max_connections.max(1))
        .acquire_timeout(Duration::from_secs(10))
        .connect_with(options)
        .await?;

    debug!(path = %db_path.display(), "connected to database");
    Ok(pool)
}

/// Round-trip a trivial query to prove the connection works.
pub async fn ping(pool: &SqlitePool) -> Result<()> {
    sqlx::query("SELECT 1").execute(pool).await?;
    Ok(())
}

/// One profile as reported by `/databases`.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct DatabaseInfo {
    pub name: String,
    pub path: String,
    pub is_active: bool,
}

#[derive(Debug, Clone)]
pub struct DatabaseRegistry {
    profiles: BTreeMap<String, ProfileConfig>,
}

impl DatabaseRegistry {
    pub fn new(profiles: BTreeMap<String, ProfileConfig>) -> Self {
        Self { profiles }
    }

    pub fn get(&self, name: &str) -> Result<&ProfileConfig> {
        self.profiles.get(name).ok_or_else(|| {
            RagError::NotFound(format!(
                "database profile '{}' is not configured (available: {})",
                name,
                self.names().join(", ")
            ))
        })
    }

    pub fn names(&self) -> Vec<String> {
        self.profiles.keys().cloned().collect()
    }

    /// Every profile, sorted by name, flagged against `active`.
    pub fn list(&self, active: &str) -> Vec<DatabaseInfo> {
        self.profiles
            .iter()
            .map(|(name, profile)| DatabaseInfo {
                name: name.clone(),
                path: profile.path.display().to_string(),
                is_active: name == active,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn profile(path: PathBuf) -> ProfileConfig {
        ProfileConfig {
            path,
            max_connections: 2,
        }
    }

    #[tokio::test]
    async fn test_connect_creates_file_and_pings() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("nested").join("rag.sqlite");
        let pool = connect(&profile(path.clone())).await.unwrap();
        ping(&pool).await.unwrap();
        assert!(path.exists());
    }

    #[tokio::test]
    async fn test_closed_pool_is_connectivity_error() {
        let tmp = tempfile::TempDir::new().unwrap();
        let pool = connect(&profile(tmp.path().join("rag.sqlite"))).await.unwrap();
        pool.close().await;
        let err = ping(&pool).await.unwrap_err();
        assert_eq!(err.code(), "database_unavailable");
    }

    #[test]
    fn test_registry_lookup_and_listing() {
        let mut profiles = BTreeMap::new();
        profiles.insert("default".to_string(), profile(PathBuf::from("/a.sqlite")));
        profiles.insert("archive".to_string(), profile(PathBuf::from("/b.sqlite")));
        let registry = DatabaseRegistry::new(profiles);

        let listed = registry.list("default");
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].name, "archive");
        assert!(!listed[0].is_active);
        assert!(listed[1].is_active);

        let err = registry.get("missing").unwrap_err();
        assert_eq!(err.code(), "not_found");
        assert!(err.to_string().contains("archive, default"));
    }
}
