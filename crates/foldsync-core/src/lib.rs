//! foldsync Core - Domain logic and business rules
//!
//! This crate contains the hexagonal architecture core with:
//! - **Domain entities** - `RootFolder`, `FileRecord`, `SyncFlow`, `FileSyncMapping`, `JobRecord`
//! - **Events** - `FileEvent` (watcher/scan output) and `DownstreamEvent` (propagation requests)
//! - **Port definitions** - Traits for adapters: `IStateRepository`, `ILocalFileSystem`,
//!   `IRemoteCopy`, `ISnapshotService`
//! - **Configuration** - YAML configuration with validation
//!
//! # Architecture
//!
//! This crate follows the hexagonal (ports & adapters) architecture pattern.
//! The domain module contains pure business logic with no I/O.
//! Ports define trait interfaces that adapter crates implement; the sync
//! crate drives them.

pub mod config;
pub mod domain;
pub mod ports;
