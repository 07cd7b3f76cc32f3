//! foldsync Remote - External collaborators of the sync engine
//!
//! Provides adapters for the two collaborator ports defined in
//! `foldsync-core`:
//! - A remote-copy client speaking an rclone-rc style JSON API over HTTP
//! - A snapshot runner driving a restic style backup CLI
//!
//! ## Modules
//!
//! - [`client`] - Remote-copy HTTP client (`IRemoteCopy`)
//! - [`snapshot`] - Snapshot CLI runner (`ISnapshotService`)

pub mod client;
pub mod snapshot;

pub use client::RemoteCopyClient;
pub use snapshot::ResticSnapshot;

use thiserror::Error;

/// Errors that can occur when talking to an external collaborator
#[derive(Debug, Error)]
pub enum RemoteError {
    /// The service answered with a non-success status
    #[error("HTTP {status} from {path}: {message}")]
    HttpStatus {
        status: u16,
        path: String,
        message: String,
    },

    /// A network-level error occurred
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    /// The response could not be parsed or was missing fields
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// The snapshot tool could not be run or reported failure
    #[error("Snapshot failed: {0}")]
    SnapshotFailed(String),
}
