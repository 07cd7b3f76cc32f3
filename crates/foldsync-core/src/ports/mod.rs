//! Port definitions (hexagonal architecture interfaces)
//!
//! This module defines the port traits that form the boundaries of the
//! hexagonal architecture. Ports are interfaces that the domain core
//! depends on, but whose implementations live in adapter crates.
//!
//! ## Ports Overview
//!
//! - [`IStateRepository`] - Persistent storage for folders, files, flows, mappings, events, jobs
//! - [`ILocalFileSystem`] - Local file inspection, hardlink and copy
//! - [`IRemoteCopy`] - External bulk copy/check service
//! - [`ISnapshotService`] - External snapshot/backup tool

pub mod local_filesystem;
pub mod remote_copy;
pub mod snapshot;
pub mod state_repository;

pub use local_filesystem::{FileSystemState, ILocalFileSystem};
pub use remote_copy::{IRemoteCopy, RemoteJobStatus};
pub use snapshot::{ISnapshotService, SnapshotSummary};
pub use state_repository::{IStateRepository, PageRequest};
