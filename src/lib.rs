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

//! # Canopy - Hierarchical lock-free software transactional memory
//!
//! Canopy is an in-process STM engine for tree-shaped data. Many threads
//! operate on one tree of payload-carrying nodes: readers take instantaneous,
//! mutually consistent snapshots of whole subtrees, and writers commit
//! optimistically through compare-and-swap, without a reader ever blocking a
//! writer or a writer blocking an unrelated writer.
//!
//! ## Key Features
//!
//! - **Consistent subtree snapshots** - A [`Snapshot`] captures a node and its
//!   entire subtree as of one instant, no matter how the tree is being
//!   mutated concurrently
//! - **Optimistic transactions** - A [`Transaction`] copies only the path from
//!   its target node down to each node actually written, then commits with a
//!   single CAS; conflicts surface as retryable results, never as blocking
//! - **Bundle/unbundle protocol** - A subtree is held either as one
//!   self-contained snapshot packet or as a chain of per-node deltas, and the
//!   engine converts between the two representations on demand
//! - **Structural mutation** - `insert`/`release`/`swap` reshape the child
//!   topology through the same commit primitive as payload writes
//! - **No locks on the core path** - All shared state lives in atomically
//!   swappable packet slots; everything reachable from a slot is immutable
//!   once published
//!
//! ## Quick Start
//!
//! ```rust
//! use canopy::{Node, Snapshot, Transaction};
//!
//! let root = Node::new(0i64);
//! let child = Node::new(1i64);
//! Node::insert(&root, &child).unwrap();
//!
//! // Read-modify-write with optimistic retry.
//! let mut txn = Transaction::new(&child).unwrap();
//! loop {
//!     txn.update(&child, |v| *v += 41).unwrap();
//!     if txn.commit_or_next().unwrap() {
//!         break;
//!     }
//! }
//!
//! // A snapshot of the root sees the whole subtree at one instant.
//! let snap = Snapshot::take(&root).unwrap();
//! assert_eq!(*snap.get(&child).unwrap(), 42);
//! ```
//!
//! ## Modules
//!
//! - [`core`] - Core types ([`Error`], [`Result`])
//! - [`tree`] - The engine: nodes, packets, snapshots, transactions
//!
//! ## Concurrency model
//!
//! Commits are linearizable per node. A transaction spanning several nodes is
//! *not* atomic across them; callers needing multi-node atomicity stage all
//! writes under one common ancestor and commit once at that ancestor. Retries
//! are immediate and unbounded - degraded throughput under heavy contention
//! is an accepted trade-off, not a defect.

pub mod core;
pub mod tree;

// Re-export the public surface at the crate root.
pub use crate::core::{Error, Result};
pub use crate::tree::node::Node;
pub use crate::tree::snapshot::Snapshot;
pub use crate::tree::transaction::{Transaction, TransactionState};
pub use crate::tree::Payload;
