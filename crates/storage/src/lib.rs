// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! fm-storage: filesystem persistence for plans.
//!
//! One directory per plan under the storage root:
//!
//! ```text
//! <storageRoot>/<planId>/
//!   definition.json       # declarative spec + assigned node IDs
//!   state.json            # per-node exec states, stateVersion
//!   specs/<nodeId>.json   # materialized work specs
//!   logs/<nodeId>/attempt-<n>.log
//! ```
//!
//! Writes are atomic (write-to-tmp + rename). The state document carries a
//! monotonic `state_version`; a newer snapshot on disk wins over the
//! in-memory copy.

mod snapshot;
mod store;

pub use snapshot::{StateSnapshot, StoredDefinition, SNAPSHOT_FORMAT};
pub use store::PlanStore;

use fm_core::{CommandError, ErrorKind};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("plan not found: {0}")]
    NotFound(String),
    #[error("io error at {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("corrupt document {path}: {source}")]
    Corrupt {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

impl StoreError {
    pub(crate) fn io(path: &std::path::Path, source: std::io::Error) -> Self {
        Self::Io { path: path.display().to_string(), source }
    }

    pub(crate) fn corrupt(path: &std::path::Path, source: serde_json::Error) -> Self {
        Self::Corrupt { path: path.display().to_string(), source }
    }
}

impl From<StoreError> for CommandError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(_) => CommandError::new(ErrorKind::NotFound, e.to_string()),
            _ => CommandError::new(ErrorKind::Io, e.to_string()),
        }
    }
}
