use crate::infrastructure::config::{SyncConfig, ensure_default_configs, load_config};
use crate::infrastructure::error::SyncError;
use crate::infrastructure::sqlite_store::SqliteDocumentStore;
use crate::infrastructure::storage::initialize_database;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug)]
pub struct BootstrapResult {
    pub workspace_root: PathBuf,
    pub database_path: PathBuf,
    pub config: SyncConfig,
}

impl BootstrapResult {
    pub fn open_store(&self) -> SqliteDocumentStore {
        SqliteDocumentStore::new(&self.database_path)
    }
}

pub fn bootstrap_workspace(workspace_root: &Path) -> Result<BootstrapResult, SyncError> {
    let config_dir = workspace_root.join("config");
    let state_dir = workspace_root.join("state");
    let database_path = state_dir.join("roast-sync.sqlite");

    fs::create_dir_all(&config_dir)?;
    fs::create_dir_all(&state_dir)?;

    ensure_default_configs(&config_dir)?;
    let config = load_config(&config_dir)?;
    initialize_database(&database_path)?;
    log::info!(
        "workspace ready root={} database={}",
        workspace_root.display(),
        database_path.display()
    );

    Ok(BootstrapResult {
        workspace_root: workspace_root.to_path_buf(),
        database_path,
        config,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::document_store::{RemoteDocumentStore, patch_from};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    static NEXT_WORKSPACE: AtomicUsize = AtomicUsize::new(0);

    struct TempWorkspace {
        path: PathBuf,
    }

    impl TempWorkspace {
        fn new() -> Self {
            let sequence = NEXT_WORKSPACE.fetch_add(1, Ordering::Relaxed);
            let path = std::env::temp_dir().join(format!(
                "roast-sync-bootstrap-tests-{}-{}",
                std::process::id(),
                sequence
            ));
            Self { path }
        }
    }

    impl Drop for TempWorkspace {
        fn drop(&mut self) {
            let _ = fs::remove_dir_all(&self.path);
        }
    }

    #[tokio::test]
    async fn bootstrap_creates_layout_and_usable_store() {
        let workspace = TempWorkspace::new();
        let result = bootstrap_workspace(&workspace.path).expect("bootstrap");

        assert!(workspace.path.join("config/sync.json").exists());
        assert!(result.database_path.exists());
        assert_eq!(result.config, SyncConfig::default());

        let store = result.open_store();
        store
            .write("roastTimer/u1", patch_from(json!({ "status": "idle" })).expect("patch"))
            .await
            .expect("write");
        assert!(store.read("roastTimer/u1").await.expect("read").is_some());
    }

    #[test]
    fn bootstrap_is_idempotent_and_keeps_edited_config() {
        let workspace = TempWorkspace::new();
        bootstrap_workspace(&workspace.path).expect("first bootstrap");
        fs::write(
            workspace.path.join("config/sync.json"),
            "{\"schema\":1,\"tickIntervalMs\":250}",
        )
        .expect("edit config");

        let result = bootstrap_workspace(&workspace.path).expect("second bootstrap");
        assert_eq!(result.config.tick_interval_ms, 250);
    }
}
