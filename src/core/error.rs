// Copyright 2026 Canopy Contributors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Error types for Canopy
//!
//! Everything the engine can report to a caller is in the single [`Error`]
//! enum. Transient contention (a disturbed bundle, a redundant unbundle) is
//! never surfaced here - it is retried internally and only ever resolves into
//! success, a conflict, or a teardown failure.

use thiserror::Error;

/// Result type alias for Canopy operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for Canopy operations
///
/// Conflicts are the normal optimistic-concurrency outcome: the caller's
/// baseline snapshot went stale and the write must be replayed against fresh
/// data. Teardown failures mean part of the tree vanished mid-operation and
/// the operation must be abandoned, not retried.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    // =========================================================================
    // Conflict errors
    // =========================================================================
    /// The transaction's baseline packet is stale; re-snapshot and replay
    #[error("commit conflict: baseline snapshot is stale")]
    CommitConflict,

    // =========================================================================
    // Teardown errors
    // =========================================================================
    /// An ancestor holding this node's authoritative data was destroyed
    #[error("supernode has been destroyed")]
    SupernodeDestroyed,

    // =========================================================================
    // Usage errors
    // =========================================================================
    /// The node is not a child of the given parent
    #[error("node is not a child of this parent")]
    NotAChild,

    /// The node is already a child of the given parent
    #[error("node is already a child of this parent")]
    AlreadyChild,

    /// A node cannot be inserted into itself
    #[error("a node cannot be inserted into itself")]
    SelfChild,

    /// The node is not covered by the snapshot or transaction it was used with
    #[error("node is not covered by this snapshot")]
    NotInSnapshot,

    /// The transaction has already been committed or abandoned
    #[error("transaction already ended")]
    TransactionEnded,
}

impl Error {
    /// Check if this is a conflict error (retry with a fresh snapshot)
    pub fn is_conflict(&self) -> bool {
        matches!(self, Error::CommitConflict)
    }

    /// Check if this is a structural teardown error (abandon the operation)
    pub fn is_teardown(&self) -> bool {
        matches!(self, Error::SupernodeDestroyed)
    }

    /// Check if this is an API usage error
    pub fn is_usage(&self) -> bool {
        matches!(
            self,
            Error::NotAChild
                | Error::AlreadyChild
                | Error::SelfChild
                | Error::NotInSnapshot
                | Error::TransactionEnded
        )
    }
}
