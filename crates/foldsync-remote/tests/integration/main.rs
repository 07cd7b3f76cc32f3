//! Integration tests for foldsync-remote
//!
//! Uses wiremock to stand in for the remote-copy service and a throwaway
//! shell script to stand in for the snapshot tool.

mod common;

mod test_remote_copy;
mod test_snapshot;
