use crate::config::DriftwoodConfig;
use crate::database::Database;
use anyhow::{Context, Result};
use std::fs;
use std::path::Path;

pub struct BootstrapResources {
    pub directories_created: Vec<String>,
    pub database_initialized: bool,
    pub database: Database,
}

pub async fn initialize(config: &DriftwoodConfig) -> Result<BootstrapResources> {
    let mut directories_created = Vec::new();
    create_dir_if_missing(&config.paths.data_dir, &mut directories_created)?;
    create_dir_if_missing(&config.paths.logs_dir, &mut directories_created)?;

    let database = Database::connect(&config.paths)
        .with_context(|| format!("failed to open {}", config.paths.db_path.display()))?;
    let database_initialized = database.ensure_migrations()?;

    Ok(BootstrapResources {
        directories_created,
        database_initialized,
        database,
    })
}

fn create_dir_if_missing(path: &Path, created: &mut Vec<String>) -> Result<()> {
    if !path.exists() {
        fs::create_dir_all(path)
            .with_context(|| format!("failed to create {}", path.display()))?;
        created.push(path.display().to_string());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DriftwoodPaths, FederationConfig};

    #[tokio::test]
    async fn initializes_directories_and_database_once() {
        let dir = tempfile::tempdir().expect("tempdir");
        let paths = DriftwoodPaths::from_base_dir(dir.path()).expect("paths");
        let config = DriftwoodConfig::new(0, paths, FederationConfig::default());

        let first = initialize(&config).await.expect("first bootstrap");
        assert!(first.database_initialized);
        assert_eq!(first.directories_created.len(), 2);
        assert!(config.paths.db_path.exists());
        drop(first);

        let second = initialize(&config).await.expect("second bootstrap");
        assert!(!second.database_initialized);
        assert!(second.directories_created.is_empty());
    }
}
