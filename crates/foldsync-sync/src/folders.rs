//! Root-folder registration and activation
//!
//! A root folder is registered once per path. Activating it whitelists its
//! path for filesystem effects and, for observable roles, starts a poll
//! watcher. Deactivation reverses both; retiring also soft-deletes the row.

use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use dashmap::DashMap;
use foldsync_core::domain::newtypes::{FolderPath, RootFolderId};
use foldsync_core::domain::{DomainError, FolderRole, RootFolder};
use foldsync_core::ports::IStateRepository;
use tracing::{debug, info, instrument};

use crate::validator::AccessValidator;
use crate::watcher::FolderWatcher;

/// Registered root folders plus their whitelist and watchers
pub struct RootFolderRegistry {
    repo: Arc<dyn IStateRepository>,
    validator: Arc<AccessValidator>,
    watcher: Arc<FolderWatcher>,
    folders: DashMap<RootFolderId, RootFolder>,
}

impl RootFolderRegistry {
    pub fn new(
        repo: Arc<dyn IStateRepository>,
        validator: Arc<AccessValidator>,
        watcher: Arc<FolderWatcher>,
    ) -> Self {
        Self {
            repo,
            validator,
            watcher,
            folders: DashMap::new(),
        }
    }

    pub fn validator(&self) -> &Arc<AccessValidator> {
        &self.validator
    }

    pub fn watcher(&self) -> &Arc<FolderWatcher> {
        &self.watcher
    }

    /// Register the folder at `path` with `role`, or return the live one
    /// already registered there
    ///
    /// # Errors
    /// Returns an error if the path is not an existing absolute directory,
    /// if it is already registered with a different role, or if the store
    /// rejects the write
    #[instrument(skip(self), fields(path = %path.display(), role = %role))]
    pub async fn ensure(&self, name: &str, path: &Path, role: FolderRole) -> anyhow::Result<RootFolder> {
        let folder_path = FolderPath::new(path.to_path_buf())?;
        let metadata = tokio::fs::metadata(path).await.map_err(|e| {
            DomainError::InvalidPath(format!("{}: {e}", path.display()))
        })?;
        if !metadata.is_dir() {
            return Err(DomainError::InvalidPath(format!("{} is not a directory", path.display())).into());
        }

        if let Some(existing) = self.repo.get_root_folder_by_path(folder_path.as_path()).await? {
            if existing.role != role {
                return Err(DomainError::ValidationFailed(format!(
                    "{} is already registered as {} (requested {})",
                    path.display(),
                    existing.role,
                    role
                ))
                .into());
            }
            self.folders.insert(existing.id, existing.clone());
            return Ok(existing);
        }

        let folder = RootFolder::new(name, folder_path, role)?;
        if let Err(e) = self.repo.save_root_folder(&folder).await {
            // Lost a race against another registration of the same path
            return match self.repo.get_root_folder_by_path(folder.path.as_path()).await? {
                Some(existing) if existing.role == role => {
                    self.folders.insert(existing.id, existing.clone());
                    Ok(existing)
                }
                _ => Err(e),
            };
        }

        info!(folder_id = %folder.id, "Root folder registered");
        self.folders.insert(folder.id, folder.clone());
        Ok(folder)
    }

    /// A live folder by id
    ///
    /// # Errors
    /// Returns an error if a cache miss cannot be filled from the store
    pub async fn get(&self, id: &RootFolderId) -> anyhow::Result<Option<RootFolder>> {
        if let Some(folder) = self.folders.get(id) {
            return Ok(Some(folder.value().clone()));
        }
        match self.repo.get_root_folder(id).await? {
            Some(folder) if !folder.is_deleted() => {
                self.folders.insert(folder.id, folder.clone());
                Ok(Some(folder))
            }
            _ => Ok(None),
        }
    }

    /// All live folders
    ///
    /// # Errors
    /// Returns an error if the store cannot be read
    pub async fn list(&self) -> anyhow::Result<Vec<RootFolder>> {
        let folders = self.repo.list_root_folders().await?;
        for folder in &folders {
            self.folders.insert(folder.id, folder.clone());
        }
        Ok(folders)
    }

    /// Whitelist a folder and start watching it if its role is observable
    ///
    /// The watcher's initial walk of the tree runs on the blocking pool.
    ///
    /// # Errors
    /// Returns an error if the watcher cannot be started
    pub async fn activate(&self, folder: &RootFolder) -> anyhow::Result<()> {
        self.validator.allow(folder.id, folder.path.as_path());
        if folder.role.is_observable() {
            let watcher = Arc::clone(&self.watcher);
            let observed = folder.clone();
            tokio::task::spawn_blocking(move || watcher.add_watcher(&observed))
                .await
                .context("Watcher setup task failed")??;
        }
        debug!(folder_id = %folder.id, role = %folder.role, "Root folder active");
        Ok(())
    }

    /// Stop watching a folder and drop it from the whitelist
    pub fn deactivate(&self, folder: &RootFolder) {
        self.watcher.remove_watcher(folder.path.as_path());
        self.validator.revoke(&folder.id);
        debug!(folder_id = %folder.id, "Root folder inactive");
    }

    /// Deactivate and soft-delete a folder; its files on disk are untouched
    ///
    /// # Errors
    /// Returns an error if the store rejects the write
    pub async fn retire(&self, folder: &RootFolder) -> anyhow::Result<()> {
        self.deactivate(folder);
        let mut retired = folder.clone();
        retired.audit.mark_deleted();
        self.repo.save_root_folder(&retired).await?;
        self.folders.remove(&folder.id);
        info!(folder_id = %folder.id, path = %folder.path, "Root folder retired");
        Ok(())
    }
}
