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

//! The STM tree engine
//!
//! This module provides the core transactional tree implementation, including:
//!
//! - [`Node`](node::Node) - a tree vertex owning an atomic packet slot
//! - [`Snapshot`](snapshot::Snapshot) - a consistent read view of a subtree
//! - [`Transaction`](transaction::Transaction) - optimistic read-modify-write
//! - [`next_serial`](serial::next_serial) - process-wide transaction serials
//!
//! # Architecture
//!
//! Every node's cross-thread-visible state is a single atomic slot holding an
//! immutable packet. A packet is either *bundled* (a self-contained snapshot
//! of the node's whole subtree), *unbundled* (a local delta whose child
//! entries may be stale), or *deferred* (a branch point: the authoritative
//! data lives in an ancestor's slot). The bundle and unbundle algorithms in
//! [`bundle`] convert between these representations; snapshots force bundling
//! on demand, and commits carve per-node packets back out so a single node can
//! change without re-copying the whole subtree.
//!
//! # Packet Lifecycle
//!
//! ```text
//! Unbundled -> [PreBundled] -> Bundled -> Deferred (folded into an ancestor)
//!           \-> committed over by a transaction or topology change
//! ```

pub mod bundle;
pub mod lookup;
pub mod node;
pub mod packet;
pub mod serial;
pub mod slot;
pub mod snapshot;
pub mod transaction;

pub use node::Node;
pub use serial::next_serial;
pub use snapshot::Snapshot;
pub use transaction::{Transaction, TransactionState};

/// Capability contract for node payloads.
///
/// A payload must be cheap enough to clone (every copy-on-write step clones
/// it) and shareable across threads. Implemented automatically for any type
/// satisfying the bounds.
pub trait Payload: Clone + Send + Sync + 'static {}

impl<T: Clone + Send + Sync + 'static> Payload for T {}
