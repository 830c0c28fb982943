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

//! Consistent read snapshots
//!
//! A [`Snapshot`] captures one node's entire subtree as of one instant. The
//! capture loop unifies the two physical representations a node can be in:
//! a packet held locally in its own slot (bundled on demand), or a packet
//! deferred into an ancestor's bundle (resolved recursively and extracted).
//! Once taken, a snapshot is immutable and its lifetime is independent of
//! any concurrent mutation of the live tree.

use std::fmt;
use std::sync::Arc;

use crate::core::{Error, Result};
use crate::tree::bundle::{bundle, BundleOutcome};
use crate::tree::lookup::{descend, locate};
use crate::tree::node::Node;
use crate::tree::packet::Packet;
use crate::tree::Payload;

/// An immutable read handle over one node's subtree at a single instant.
///
/// Cloning is cheap: clones share the captured packet.
pub struct Snapshot<T: Payload> {
    node: Arc<Node<T>>,
    packet: Arc<Packet<T>>,
}

impl<T: Payload> Clone for Snapshot<T> {
    fn clone(&self) -> Self {
        Self {
            node: Arc::clone(&self.node),
            packet: Arc::clone(&self.packet),
        }
    }
}

impl<T: Payload> Snapshot<T> {
    /// Captures a consistent view of `node` and its whole subtree.
    ///
    /// Retries transient contention internally; the only error is
    /// [`Error::SupernodeDestroyed`] when an ancestor holding the node's
    /// authoritative data was torn down mid-capture.
    pub fn take(node: &Arc<Node<T>>) -> Result<Self> {
        let packet = capture(node)?;
        Ok(Self {
            node: Arc::clone(node),
            packet,
        })
    }

    pub(crate) fn from_parts(node: &Arc<Node<T>>, packet: Arc<Packet<T>>) -> Self {
        Self {
            node: Arc::clone(node),
            packet,
        }
    }

    /// The node this snapshot was taken from.
    pub fn node(&self) -> &Arc<Node<T>> {
        &self.node
    }

    pub(crate) fn packet(&self) -> &Arc<Packet<T>> {
        &self.packet
    }

    /// Projects `node`'s payload out of this snapshot. Fails with
    /// [`Error::NotInSnapshot`] if `node` was not part of the captured
    /// subtree.
    pub fn get(&self, node: &Arc<Node<T>>) -> Result<&T> {
        let path = locate(&self.node, &self.packet, node).ok_or(Error::NotInSnapshot)?;
        let local = descend(&self.packet, &path).ok_or(Error::NotInSnapshot)?;
        Ok(&local.value)
    }

    /// The serial of the transaction that produced `node`'s payload as seen
    /// by this snapshot.
    pub fn serial(&self, node: &Arc<Node<T>>) -> Result<u64> {
        let path = locate(&self.node, &self.packet, node).ok_or(Error::NotInSnapshot)?;
        let local = descend(&self.packet, &path).ok_or(Error::NotInSnapshot)?;
        Ok(local.serial)
    }

    /// `node`'s children as seen by this snapshot, in order.
    pub fn children(&self, node: &Arc<Node<T>>) -> Result<Vec<Arc<Node<T>>>> {
        let path = locate(&self.node, &self.packet, node).ok_or(Error::NotInSnapshot)?;
        let local = descend(&self.packet, &path).ok_or(Error::NotInSnapshot)?;
        Ok(local.children.nodes.to_vec())
    }

    /// `node`'s child count as seen by this snapshot.
    pub fn child_count(&self, node: &Arc<Node<T>>) -> Result<usize> {
        let path = locate(&self.node, &self.packet, node).ok_or(Error::NotInSnapshot)?;
        let local = descend(&self.packet, &path).ok_or(Error::NotInSnapshot)?;
        Ok(local.children.nodes.len())
    }
}

impl<T: Payload> fmt::Debug for Snapshot<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let serial = self.packet.as_local().map(|local| local.serial);
        f.debug_struct("Snapshot")
            .field("node", &Arc::as_ptr(&self.node))
            .field("serial", &serial)
            .finish()
    }
}

/// Resolves `node`'s current consistent packet, always bundled.
///
/// Local bundled packets are returned directly. Local unbundled packets are
/// bundled in place. A deferred slot is resolved by capturing the ancestor
/// it points to and extracting this node's entry from that bundle, then
/// re-validating that the node's slot did not move underneath the
/// resolution.
pub(crate) fn capture<T: Payload>(node: &Arc<Node<T>>) -> Result<Arc<Packet<T>>> {
    loop {
        let cur = node.slot.load();
        if cur.is_bundled() {
            return Ok(cur);
        }
        if cur.as_local().is_some() {
            match bundle(node, &cur)? {
                BundleOutcome::Success(packet) => return Ok(packet),
                BundleOutcome::Disturbed => continue,
            }
        }
        let Some(bp) = cur.as_deferred() else {
            continue;
        };
        let Some(super_node) = bp.super_node.upgrade() else {
            return Err(Error::SupernodeDestroyed);
        };
        let super_packet = capture(&super_node)?;
        let Some(super_local) = super_packet.as_local() else {
            continue;
        };
        let Some(index) = super_local.children.position_of(node) else {
            // Released from the ancestor since we read our slot.
            continue;
        };
        let entry = &super_local.packets[index];
        if entry.is_deferred() {
            continue;
        }
        // The extraction is only valid while our slot still defers to the
        // packet we resolved through.
        if !node.slot.holds(&cur) {
            continue;
        }
        node.set_hint(&super_local.children, index);
        return Ok(Arc::clone(entry));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_take_leaf() {
        let node = Node::new(42i64);
        let snap = Snapshot::take(&node).unwrap();
        assert_eq!(*snap.get(&node).unwrap(), 42);
        assert_eq!(snap.child_count(&node).unwrap(), 0);
    }

    #[test]
    fn test_take_bundles_subtree() {
        let root = Node::new(0i64);
        let a = Node::new(1i64);
        let b = Node::new(2i64);
        Node::insert(&root, &a).unwrap();
        Node::insert(&a, &b).unwrap();

        let snap = Snapshot::take(&root).unwrap();
        assert_eq!(*snap.get(&root).unwrap(), 0);
        assert_eq!(*snap.get(&a).unwrap(), 1);
        assert_eq!(*snap.get(&b).unwrap(), 2);

        // Capturing the root folded the whole chain into its bundle.
        assert!(a.slot.load().is_deferred());
        assert!(b.slot.load().is_deferred());
    }

    #[test]
    fn test_take_of_deferred_node_extracts_without_installing() {
        let parent = Node::new(0i64);
        let child = Node::new(5i64);
        Node::insert(&parent, &child).unwrap();
        Snapshot::take(&parent).unwrap();
        assert!(child.slot.load().is_deferred());

        // Reading the child resolves through the parent's bundle but leaves
        // the child's slot deferred.
        let snap = Snapshot::take(&child).unwrap();
        assert_eq!(*snap.get(&child).unwrap(), 5);
        assert!(child.slot.load().is_deferred());
    }

    #[test]
    fn test_snapshot_unaffected_by_later_mutation() {
        let root = Node::new(0i64);
        let a = Node::new(1i64);
        Node::insert(&root, &a).unwrap();

        let snap = Snapshot::take(&root).unwrap();

        let b = Node::new(2i64);
        Node::insert(&root, &b).unwrap();

        // The old snapshot still shows one child; a fresh one shows two.
        assert_eq!(snap.child_count(&root).unwrap(), 1);
        assert_eq!(snap.get(&b), Err(Error::NotInSnapshot));
        let fresh = Snapshot::take(&root).unwrap();
        assert_eq!(fresh.child_count(&root).unwrap(), 2);
    }

    #[test]
    fn test_get_stranger_not_in_snapshot() {
        let root = Node::new(0i64);
        let snap = Snapshot::take(&root).unwrap();
        let stranger = Node::new(9i64);
        assert_eq!(snap.get(&stranger), Err(Error::NotInSnapshot));
        assert_eq!(snap.children(&stranger).unwrap_err(), Error::NotInSnapshot);
    }

    #[test]
    fn test_serial_advances_with_commits() {
        let node = Node::new(0i64);
        let before = Snapshot::take(&node).unwrap().serial(&node).unwrap();

        let mut txn = crate::tree::transaction::Transaction::new(&node).unwrap();
        txn.update(&node, |v| *v += 1).unwrap();
        txn.commit().unwrap();

        let after = Snapshot::take(&node).unwrap().serial(&node).unwrap();
        assert!(after > before, "serial did not advance: {} <= {}", after, before);
    }

    #[test]
    fn test_clone_shares_packet() {
        let root = Node::new(3i64);
        let snap = Snapshot::take(&root).unwrap();
        let clone = snap.clone();
        assert!(Arc::ptr_eq(snap.packet(), clone.packet()));
        assert_eq!(*clone.get(&root).unwrap(), 3);
    }

    #[test]
    fn test_take_fails_after_supernode_teardown() {
        let child = Node::new(1i64);
        {
            let parent = Node::new(0i64);
            Node::insert(&parent, &child).unwrap();
            Snapshot::take(&parent).unwrap();
        }
        assert!(matches!(
            Snapshot::take(&child),
            Err(Error::SupernodeDestroyed)
        ));
    }
}
