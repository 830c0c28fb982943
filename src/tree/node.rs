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

//! Tree nodes and structural mutation
//!
//! A node is a tree vertex with stable identity (`Arc::ptr_eq`). It owns one
//! atomic packet slot and an advisory lookup hint. The child topology lives
//! in the node's packets, so `insert`, `release` and `swap` are expressed the
//! same way as payload writes: take a snapshot, build a proposed packet, and
//! commit it with CAS, retrying on conflict.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use smallvec::SmallVec;

use crate::core::{Error, Result};
use crate::tree::bundle::{unbundle, UnbundleOutcome};
use crate::tree::lookup::LookupHint;
use crate::tree::packet::{NodeList, Packet, PacketState};
use crate::tree::serial::next_serial;
use crate::tree::slot::Slot;
use crate::tree::snapshot::Snapshot;
use crate::tree::transaction::{commit_packet, CommitResult};
use crate::tree::Payload;

/// A tree vertex carrying versioned payload data.
///
/// Nodes are handled exclusively through `Arc<Node<T>>` and compared by
/// identity; a node is never cloned or moved. Dropping the last reference to
/// a subtree releases its children recursively. A node that outlives a
/// destroyed ancestor it deferred to reports [`Error::SupernodeDestroyed`]
/// from subsequent operations rather than dangling.
pub struct Node<T: Payload> {
    pub(crate) slot: Slot<T>,
    /// Last known (ancestor list, index) position. Advisory only: always
    /// re-validated, with an exhaustive search as fallback.
    pub(crate) hint: Mutex<Option<LookupHint<T>>>,
}

impl<T: Payload> Node<T> {
    /// Creates a new detached node with an initial payload and no children.
    pub fn new(payload: T) -> Arc<Self> {
        Arc::new_cyclic(|weak| {
            let children = NodeList::empty(weak.clone());
            let packet = Packet::local(
                payload,
                PacketState::Bundled,
                next_serial(),
                children,
                SmallVec::new(),
            );
            Node {
                slot: Slot::new(Arc::new(packet)),
                hint: Mutex::new(None),
            }
        })
    }

    pub(crate) fn set_hint(&self, list: &Arc<NodeList<T>>, index: usize) {
        *self.hint.lock() = Some(LookupHint {
            list: Arc::downgrade(list),
            index,
        });
    }

    pub(crate) fn take_hint(&self) -> Option<LookupHint<T>> {
        self.hint.lock().clone()
    }

    /// Adds `child` as the new last element of `parent`'s child list.
    ///
    /// The child keeps its own payload and subtree; the next snapshot of
    /// `parent` folds it into the parent's bundle. Fails with
    /// [`Error::AlreadyChild`] if `child` is already under `parent`, and with
    /// [`Error::SelfChild`] for self-insertion. Callers must keep each node
    /// under at most one parent at a time.
    pub fn insert(parent: &Arc<Node<T>>, child: &Arc<Node<T>>) -> Result<()> {
        if Arc::ptr_eq(parent, child) {
            return Err(Error::SelfChild);
        }
        loop {
            let snap = Snapshot::take(parent)?;
            let base = snap.packet();
            let Some(local) = base.as_local() else {
                continue;
            };
            if local.children.position_of(child).is_some() {
                return Err(Error::AlreadyChild);
            }

            let child_snap = Snapshot::take(child)?;

            let mut nodes = local.children.nodes.clone();
            nodes.push(Arc::clone(child));
            let children = NodeList::new(Arc::downgrade(parent), nodes);
            let index = children.nodes.len() - 1;

            let mut packets = local.packets.clone();
            packets.push(Arc::clone(child_snap.packet()));

            // Published unbundled: the child's slot stays authoritative until
            // the next bundle re-reads it.
            let proposed = Arc::new(Packet::local(
                local.value.clone(),
                PacketState::Unbundled,
                next_serial(),
                Arc::clone(&children),
                packets,
            ));

            match commit_packet(parent, base, proposed)? {
                CommitResult::Committed => {
                    child.set_hint(&children, index);
                    return Ok(());
                }
                CommitResult::Conflict => continue,
            }
        }
    }

    /// Removes `child` from `parent`'s child list.
    ///
    /// The child regains an independently committable packet of its own
    /// before it disappears from the parent's lists, so it (and any snapshot
    /// already holding it) stays fully usable. Fails with
    /// [`Error::NotAChild`] if `child` is not under `parent`.
    pub fn release(parent: &Arc<Node<T>>, child: &Arc<Node<T>>) -> Result<()> {
        loop {
            let snap = Snapshot::take(parent)?;
            let base = snap.packet();
            let Some(local) = base.as_local() else {
                continue;
            };
            let Some(index) = local.children.position_of(child) else {
                return Err(Error::NotAChild);
            };

            let mut nodes = local.children.nodes.clone();
            nodes.remove(index);
            let children = NodeList::new(Arc::downgrade(parent), nodes);

            let mut packets = local.packets.clone();
            packets.remove(index);

            let proposed = Arc::new(Packet::local(
                local.value.clone(),
                PacketState::Unbundled,
                next_serial(),
                children,
                packets,
            ));

            let child_cur = child.slot.load();
            match child_cur.as_deferred() {
                Some(bp) if bp.refers_to(parent) => {
                    // Carve the child's packet back out of the parent bundle
                    // and land the topology change as the replacement
                    // ancestor packet, in one unbundle pass.
                    match unbundle(child, &child_cur, None, Some((base, &proposed)))? {
                        UnbundleOutcome::WithNewValues => return Ok(()),
                        UnbundleOutcome::WithNewSubvalue
                        | UnbundleOutcome::Redundant
                        | UnbundleOutcome::SubvalueChanged
                        | UnbundleOutcome::Disturbed => continue,
                    }
                }
                Some(_) => {
                    // Stale view of the child; retake the snapshot.
                    continue;
                }
                None => {
                    // Child already holds its own packet; a plain commit of
                    // the parent topology suffices.
                    match commit_packet(parent, base, proposed)? {
                        CommitResult::Committed => return Ok(()),
                        CommitResult::Conflict => continue,
                    }
                }
            }
        }
    }

    /// Exchanges the positions of two existing children of `parent`.
    pub fn swap(parent: &Arc<Node<T>>, a: &Arc<Node<T>>, b: &Arc<Node<T>>) -> Result<()> {
        loop {
            let snap = Snapshot::take(parent)?;
            let base = snap.packet();
            let Some(local) = base.as_local() else {
                continue;
            };
            let Some(ia) = local.children.position_of(a) else {
                return Err(Error::NotAChild);
            };
            let Some(ib) = local.children.position_of(b) else {
                return Err(Error::NotAChild);
            };
            if ia == ib {
                return Ok(());
            }

            let mut nodes = local.children.nodes.clone();
            nodes.swap(ia, ib);
            let children = NodeList::new(Arc::downgrade(parent), nodes);

            let mut packets = local.packets.clone();
            packets.swap(ia, ib);

            // Reordering invalidates no child entry, so the bundled tag is
            // preserved.
            let proposed = Arc::new(Packet::local(
                local.value.clone(),
                PacketState::Bundled,
                next_serial(),
                Arc::clone(&children),
                packets,
            ));

            match commit_packet(parent, base, proposed)? {
                CommitResult::Committed => {
                    a.set_hint(&children, ib);
                    b.set_hint(&children, ia);
                    return Ok(());
                }
                CommitResult::Conflict => continue,
            }
        }
    }

    /// The node's current children, as seen by a fresh snapshot.
    pub fn children(node: &Arc<Node<T>>) -> Result<Vec<Arc<Node<T>>>> {
        let snap = Snapshot::take(node)?;
        snap.children(node)
    }

    /// The node's current child count, as seen by a fresh snapshot.
    pub fn child_count(node: &Arc<Node<T>>) -> Result<usize> {
        let snap = Snapshot::take(node)?;
        snap.child_count(node)
    }
}

impl<T: Payload> fmt::Debug for Node<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("addr", &(self as *const Self))
            .field("deferred", &self.slot.holds_deferred())
            .finish()
    }
}
