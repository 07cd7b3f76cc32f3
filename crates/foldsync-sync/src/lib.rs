//! foldsync Sync - Folder watching, reconciliation and propagation engine
//!
//! Provides:
//! - Debounced polling watchers over registered root folders
//! - An access whitelist guarding every filesystem effect
//! - An event bus with one ingress queue and one queue per sync flow
//! - A write-through sync-flow cache with pending-event counters
//! - Full-scan and cross-folder reconciliation
//! - The propagation engine (hardlink first hop, copy later hops)
//!
//! ## Modules
//!
//! - [`filesystem`] - Local filesystem adapter (MD5, hardlink, atomic copy)
//! - [`validator`] - Root-folder access whitelist
//! - [`debounce`] - Keyed cancel-and-reschedule task runner
//! - [`watcher`] - Per-folder poll watchers feeding the ingress queue
//! - [`bus`] - Ingress and per-flow downstream queues
//! - [`registry`] - Sync-flow cache and status state machine
//! - [`folders`] - Root-folder registration and activation
//! - [`locks`] - Per-key async locks
//! - [`reconcile`] - Full scan and cross-folder check
//! - [`engine`] - Ingress and downstream event handlers
//! - [`dispatcher`] - Queue loops feeding a bounded worker pool
//! - [`transfer`] - Bulk copy through the remote-copy collaborator
//! - [`context`] - Process-lifetime wiring and flow lifecycle operations

pub mod bus;
pub mod context;
pub mod debounce;
pub mod dispatcher;
pub mod engine;
pub mod filesystem;
pub mod folders;
pub mod locks;
pub mod reconcile;
pub mod registry;
pub mod transfer;
pub mod validator;
pub mod watcher;

use std::path::PathBuf;

use foldsync_core::domain::newtypes::{RootFolderId, SyncFlowId};
use thiserror::Error;

pub use context::SyncContext;
pub use engine::{IngressOutcome, SyncEngine};
pub use reconcile::{CrossCheckReport, ScanReport};

/// Errors that can occur during synchronization operations
#[derive(Debug, Error)]
pub enum SyncError {
    /// A path falls outside the whitelisted root of its folder
    #[error("Access denied: {path} is not under root folder {folder}")]
    AccessDenied {
        folder: RootFolderId,
        path: PathBuf,
    },

    /// The root folder is not registered (or was retired)
    #[error("Unknown root folder: {0}")]
    UnknownFolder(RootFolderId),

    /// The sync flow does not exist (or was deleted)
    #[error("Unknown sync flow: {0}")]
    UnknownFlow(SyncFlowId),

    /// A flow definition is inconsistent with the folders it names
    #[error("Invalid flow definition: {0}")]
    InvalidFlow(String),

    /// An I/O error occurred during file operations
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// A domain-level error propagated from foldsync-core
    #[error("Domain error: {0}")]
    DomainError(#[from] foldsync_core::domain::errors::DomainError),
}
