//! Shared bookkeeping embedded in every persisted entity

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Creation/update timestamps and the soft-delete flag
///
/// Each entity carries one of these as a field rather than inheriting it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Auditable {
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted: bool,
}

impl Auditable {
    /// Fresh, non-deleted record stamped with the current time
    #[must_use]
    pub fn new() -> Self {
        let now = Utc::now();
        Self {
            created_at: now,
            updated_at: now,
            deleted: false,
        }
    }

    /// Rebuild from stored values
    #[must_use]
    pub fn restore(created_at: DateTime<Utc>, updated_at: DateTime<Utc>, deleted: bool) -> Self {
        Self {
            created_at,
            updated_at,
            deleted,
        }
    }

    /// Bump `updated_at`
    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    /// Set the soft-delete flag
    pub fn mark_deleted(&mut self) {
        self.deleted = true;
        self.touch();
    }
}

impl Default for Auditable {
    fn default() -> Self {
        Self::new()
    }
}
