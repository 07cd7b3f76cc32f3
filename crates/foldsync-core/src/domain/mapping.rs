//! File sync mapping entity
//!
//! Links a source file to the destination file a flow produced from it.
//! Per (flow, source file) pair the lifecycle is:
//!
//! ```text
//!   UNMAPPED ──create──► MAPPED ──source delete / independent edit──► DESYNCED
//! ```
//!
//! DESYNCED is terminal: the row is kept and blocks any further propagation
//! for the pair.

use serde::{Deserialize, Serialize};

use super::newtypes::{FileId, MappingId, SyncFlowId};
use super::record::Auditable;

/// Derived state of a (flow, source file) pair
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MappingState {
    Unmapped,
    Mapped,
    Desynced,
}

impl MappingState {
    /// State of a pair given its mapping row, if any
    pub fn of(mapping: Option<&FileSyncMapping>) -> Self {
        match mapping {
            None => MappingState::Unmapped,
            Some(m) if m.desynced => MappingState::Desynced,
            Some(_) => MappingState::Mapped,
        }
    }
}

/// Source → destination file link for one flow
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileSyncMapping {
    pub id: MappingId,
    pub flow_id: SyncFlowId,
    pub source_file_id: FileId,
    pub destination_file_id: FileId,
    pub desynced: bool,
    pub audit: Auditable,
}

impl FileSyncMapping {
    #[must_use]
    pub fn new(flow_id: SyncFlowId, source_file_id: FileId, destination_file_id: FileId) -> Self {
        Self {
            id: MappingId::new(),
            flow_id,
            source_file_id,
            destination_file_id,
            desynced: false,
            audit: Auditable::new(),
        }
    }

    /// Move to DESYNCED. Returns false if it already was.
    pub fn desync(&mut self) -> bool {
        if self.desynced {
            return false;
        }
        self.desynced = true;
        self.audit.touch();
        true
    }

    pub fn state(&self) -> MappingState {
        MappingState::of(Some(self))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lifecycle() {
        assert_eq!(MappingState::of(None), MappingState::Unmapped);

        let mut mapping = FileSyncMapping::new(SyncFlowId::new(), FileId::new(), FileId::new());
        assert_eq!(mapping.state(), MappingState::Mapped);

        assert!(mapping.desync());
        assert_eq!(mapping.state(), MappingState::Desynced);
        assert!(!mapping.desync());
        assert_eq!(mapping.state(), MappingState::Desynced);
    }
}
