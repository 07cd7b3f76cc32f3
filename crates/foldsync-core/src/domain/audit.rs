//! Persisted record of propagation outcomes
//!
//! Every downstream event handled for a flow leaves one [`SyncEventEntry`],
//! which is how flow activity and failures become visible outside the
//! daemon.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::errors::DomainError;
use super::event::ChangeKind;
use super::newtypes::{EventId, FileId, SyncFlowId};

/// What handling a downstream event amounted to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventOutcome {
    /// A filesystem effect was applied to the destination
    Propagated,
    /// Destination already held this content
    AlreadyCurrent,
    /// File is excluded by the flow's filters
    Filtered,
    /// Mapping moved to DESYNCED
    Desynced,
    /// Nothing to do (missing record, no mapping, desynced pair, ...)
    Skipped,
    /// Handling failed; the next reconciliation pass re-derives the event
    Failed,
}

impl EventOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventOutcome::Propagated => "propagated",
            EventOutcome::AlreadyCurrent => "already_current",
            EventOutcome::Filtered => "filtered",
            EventOutcome::Desynced => "desynced",
            EventOutcome::Skipped => "skipped",
            EventOutcome::Failed => "failed",
        }
    }
}

impl fmt::Display for EventOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventOutcome {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "propagated" => Ok(EventOutcome::Propagated),
            "already_current" => Ok(EventOutcome::AlreadyCurrent),
            "filtered" => Ok(EventOutcome::Filtered),
            "desynced" => Ok(EventOutcome::Desynced),
            "skipped" => Ok(EventOutcome::Skipped),
            "failed" => Ok(EventOutcome::Failed),
            _ => Err(DomainError::UnknownVariant {
                kind: "event outcome",
                value: s.to_string(),
            }),
        }
    }
}

/// One handled downstream event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncEventEntry {
    /// Assigned by the database on insert
    id: Option<EventId>,
    timestamp: DateTime<Utc>,
    flow_id: SyncFlowId,
    file_id: FileId,
    kind: ChangeKind,
    outcome: EventOutcome,
    detail: Option<String>,
}

impl SyncEventEntry {
    pub fn new(flow_id: SyncFlowId, file_id: FileId, kind: ChangeKind, outcome: EventOutcome) -> Self {
        Self {
            id: None,
            timestamp: Utc::now(),
            flow_id,
            file_id,
            kind,
            outcome,
            detail: None,
        }
    }

    /// Attach a human-readable detail (error message, skip reason)
    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    /// Set the database id (after insert or when loading)
    pub fn with_id(mut self, id: EventId) -> Self {
        self.id = Some(id);
        self
    }

    /// Override the timestamp (when loading from storage)
    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn id(&self) -> Option<EventId> {
        self.id
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn flow_id(&self) -> SyncFlowId {
        self.flow_id
    }

    pub fn file_id(&self) -> FileId {
        self.file_id
    }

    pub fn kind(&self) -> ChangeKind {
        self.kind
    }

    pub fn outcome(&self) -> EventOutcome {
        self.outcome
    }

    pub fn detail(&self) -> Option<&str> {
        self.detail.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_parse() {
        for outcome in [
            EventOutcome::Propagated,
            EventOutcome::AlreadyCurrent,
            EventOutcome::Filtered,
            EventOutcome::Desynced,
            EventOutcome::Skipped,
            EventOutcome::Failed,
        ] {
            assert_eq!(outcome.as_str().parse::<EventOutcome>().unwrap(), outcome);
        }
        assert!("exploded".parse::<EventOutcome>().is_err());
    }

    #[test]
    fn test_entry_builder() {
        let entry = SyncEventEntry::new(
            SyncFlowId::new(),
            FileId::new(),
            ChangeKind::Created,
            EventOutcome::Failed,
        )
        .with_detail("access denied");

        assert!(entry.id().is_none());
        assert_eq!(entry.detail(), Some("access denied"));
        assert_eq!(entry.with_id(EventId::new(7)).id(), Some(EventId::new(7)));
    }
}
