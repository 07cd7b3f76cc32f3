//! Domain entities and business logic
//!
//! This module contains the core domain types for foldsync:
//! - Newtypes for identifiers, paths, checksums and identity keys
//! - Identity utilities (relative-path splitting, key derivation, flatten names)
//! - Root folders, file records, sync flows and file sync mappings
//! - File events and downstream propagation events
//! - Persisted event log entries and collaborator job records
//! - Domain-specific error types

pub mod audit;
pub mod errors;
pub mod event;
pub mod file_record;
pub mod identity;
pub mod job;
pub mod mapping;
pub mod newtypes;
pub mod record;
pub mod root_folder;
pub mod sync_flow;

// Re-export commonly used types
pub use audit::{EventOutcome, SyncEventEntry};
pub use errors::DomainError;
pub use event::{ChangeKind, DownstreamEvent, FileEvent};
pub use file_record::FileRecord;
pub use identity::FileLocation;
pub use job::{JobKind, JobRecord, JobStatus};
pub use mapping::{FileSyncMapping, MappingState};
pub use newtypes::*;
pub use record::Auditable;
pub use root_folder::{FolderRole, RootFolder};
pub use sync_flow::{FilterCriteria, FlowStatus, FlowType, LayoutMode, SyncFlow};
