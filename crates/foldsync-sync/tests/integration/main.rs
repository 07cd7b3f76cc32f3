//! Integration tests for foldsync-sync
//!
//! Drive a full [`SyncContext`](foldsync_sync::SyncContext) over temporary
//! directories and an in-memory SQLite store, and check the resulting files,
//! records, mappings and event log.

mod common;

mod test_dispatcher;
mod test_filters;
mod test_layout;
mod test_lifecycle;
mod test_propagation;
mod test_reconcile;
