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

//! Packets: immutable copy-on-write snapshot units
//!
//! A packet holds one node's payload plus, when the node has children, an
//! ordered child-node list and a parallel child-packet list. Once a packet
//! has been installed into a slot and observed it is never mutated in place;
//! every change produces a new packet. Packets under construction (inside a
//! bundle attempt or a transaction's working tree) are private and freely
//! mutable until published.

use std::sync::{Arc, Weak};

use smallvec::SmallVec;

use crate::tree::node::Node;
use crate::tree::Payload;

/// Inline capacity for child lists. Most instrument-style trees are shallow
/// and narrow; four children fit without a heap allocation.
pub(crate) const CHILD_INLINE: usize = 4;

/// State tag of a local packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PacketState {
    /// Every descendant entry is itself a finalized, consistent snapshot.
    Bundled,
    /// First bundle checkpoint published: fully assembled, children not yet
    /// redirected to this slot.
    PreBundled,
    /// Local delta: the payload is authoritative, child entries may be stale.
    Unbundled,
}

/// Ordered child-node list of one packet.
///
/// Parallel to the owning packet's child-packet list: `nodes[i]`'s packet,
/// when the owning packet is bundled, is `packets[i]`. The owner back-pointer
/// is advisory only - it feeds the lookup-hint cache and is always
/// re-validated before use.
pub(crate) struct NodeList<T: Payload> {
    /// The node whose children these are.
    pub(crate) owner: Weak<Node<T>>,
    pub(crate) nodes: SmallVec<[Arc<Node<T>>; CHILD_INLINE]>,
}

impl<T: Payload> NodeList<T> {
    pub(crate) fn new(
        owner: Weak<Node<T>>,
        nodes: SmallVec<[Arc<Node<T>>; CHILD_INLINE]>,
    ) -> Arc<Self> {
        Arc::new(Self { owner, nodes })
    }

    pub(crate) fn empty(owner: Weak<Node<T>>) -> Arc<Self> {
        Self::new(owner, SmallVec::new())
    }

    /// Index of `node` in this list, matched by identity.
    pub(crate) fn position_of(&self, node: &Arc<Node<T>>) -> Option<usize> {
        self.nodes.iter().position(|n| Arc::ptr_eq(n, node))
    }
}

/// Back-reference from an unbundled descendant to the ancestor slot holding
/// its authoritative data.
pub(crate) struct BranchPoint<T: Payload> {
    pub(crate) super_node: Weak<Node<T>>,
}

impl<T: Payload> BranchPoint<T> {
    /// Whether this branch point refers to `node`'s slot.
    pub(crate) fn refers_to(&self, node: &Arc<Node<T>>) -> bool {
        std::ptr::eq(self.super_node.as_ptr(), Arc::as_ptr(node))
    }
}

impl<T: Payload> Clone for BranchPoint<T> {
    fn clone(&self) -> Self {
        Self {
            super_node: self.super_node.clone(),
        }
    }
}

/// A local packet: payload plus parallel child lists.
pub(crate) struct LocalPacket<T: Payload> {
    pub(crate) value: T,
    pub(crate) state: PacketState,
    /// Serial of the transaction (or engine operation) that produced this
    /// packet. Used as the payload version tag and to recognize packets
    /// already copied within one transaction.
    pub(crate) serial: u64,
    pub(crate) children: Arc<NodeList<T>>,
    pub(crate) packets: SmallVec<[Arc<Packet<T>>; CHILD_INLINE]>,
}

impl<T: Payload> Clone for LocalPacket<T> {
    fn clone(&self) -> Self {
        Self {
            value: self.value.clone(),
            state: self.state,
            serial: self.serial,
            children: Arc::clone(&self.children),
            packets: self.packets.clone(),
        }
    }
}

pub(crate) enum PacketRepr<T: Payload> {
    Local(LocalPacket<T>),
    /// Placeholder deferring to an ancestor's slot (or, inside an unbundled
    /// ancestor's packet list, a tombstone for an entry carved back out).
    Deferred(BranchPoint<T>),
}

impl<T: Payload> Clone for PacketRepr<T> {
    fn clone(&self) -> Self {
        match self {
            PacketRepr::Local(local) => PacketRepr::Local(local.clone()),
            PacketRepr::Deferred(bp) => PacketRepr::Deferred(bp.clone()),
        }
    }
}

/// Immutable snapshot unit attached to exactly one node.
pub(crate) struct Packet<T: Payload> {
    pub(crate) repr: PacketRepr<T>,
}

impl<T: Payload> Clone for Packet<T> {
    fn clone(&self) -> Self {
        Self {
            repr: self.repr.clone(),
        }
    }
}

impl<T: Payload> Packet<T> {
    pub(crate) fn local(
        value: T,
        state: PacketState,
        serial: u64,
        children: Arc<NodeList<T>>,
        packets: SmallVec<[Arc<Packet<T>>; CHILD_INLINE]>,
    ) -> Self {
        debug_assert_eq!(children.nodes.len(), packets.len());
        Self {
            repr: PacketRepr::Local(LocalPacket {
                value,
                state,
                serial,
                children,
                packets,
            }),
        }
    }

    /// A placeholder deferring to `super_node`'s slot.
    pub(crate) fn deferred(super_node: &Arc<Node<T>>) -> Self {
        Self {
            repr: PacketRepr::Deferred(BranchPoint {
                super_node: Arc::downgrade(super_node),
            }),
        }
    }

    pub(crate) fn as_local(&self) -> Option<&LocalPacket<T>> {
        match &self.repr {
            PacketRepr::Local(local) => Some(local),
            PacketRepr::Deferred(_) => None,
        }
    }

    pub(crate) fn as_local_mut(&mut self) -> Option<&mut LocalPacket<T>> {
        match &mut self.repr {
            PacketRepr::Local(local) => Some(local),
            PacketRepr::Deferred(_) => None,
        }
    }

    pub(crate) fn as_deferred(&self) -> Option<&BranchPoint<T>> {
        match &self.repr {
            PacketRepr::Deferred(bp) => Some(bp),
            PacketRepr::Local(_) => None,
        }
    }

    pub(crate) fn is_bundled(&self) -> bool {
        matches!(
            &self.repr,
            PacketRepr::Local(local) if local.state == PacketState::Bundled
        )
    }

    pub(crate) fn is_deferred(&self) -> bool {
        matches!(&self.repr, PacketRepr::Deferred(_))
    }

    /// Shallow copy of a local packet under a different state tag. Child
    /// lists are shared; only the payload is cloned. Returns `None` for
    /// deferred packets.
    pub(crate) fn with_state(&self, state: PacketState, serial: u64) -> Option<Self> {
        let local = self.as_local()?;
        Some(Self {
            repr: PacketRepr::Local(LocalPacket {
                value: local.value.clone(),
                state,
                serial,
                children: Arc::clone(&local.children),
                packets: local.packets.clone(),
            }),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::serial::next_serial;

    fn leaf_packet(value: i32, node: &Arc<Node<i32>>) -> Packet<i32> {
        Packet::local(
            value,
            PacketState::Bundled,
            next_serial(),
            NodeList::empty(Arc::downgrade(node)),
            SmallVec::new(),
        )
    }

    #[test]
    fn test_local_packet_accessors() {
        let node = Node::new(7);
        let packet = leaf_packet(7, &node);

        assert!(packet.is_bundled());
        assert!(!packet.is_deferred());
        assert_eq!(packet.as_local().unwrap().value, 7);
        assert!(packet.as_deferred().is_none());
    }

    #[test]
    fn test_deferred_packet() {
        let node = Node::new(0);
        let packet: Packet<i32> = Packet::deferred(&node);

        assert!(packet.is_deferred());
        assert!(!packet.is_bundled());
        assert!(packet.as_local().is_none());
        assert!(packet.as_deferred().unwrap().refers_to(&node));

        let other = Node::new(1);
        assert!(!packet.as_deferred().unwrap().refers_to(&other));
    }

    #[test]
    fn test_branch_point_outlives_node() {
        let packet: Packet<i32> = {
            let node = Node::new(0);
            Packet::deferred(&node)
        };
        // The supernode is gone; the branch point must fail to resolve.
        assert!(packet
            .as_deferred()
            .unwrap()
            .super_node
            .upgrade()
            .is_none());
    }

    #[test]
    fn test_with_state_retags() {
        let node = Node::new(3);
        let packet = leaf_packet(3, &node);
        let serial = next_serial();
        let retagged = packet.with_state(PacketState::Unbundled, serial).unwrap();

        let local = retagged.as_local().unwrap();
        assert_eq!(local.state, PacketState::Unbundled);
        assert_eq!(local.serial, serial);
        assert_eq!(local.value, 3);
        // Child lists are shared, not copied.
        assert!(Arc::ptr_eq(
            &local.children,
            &packet.as_local().unwrap().children
        ));
    }

    #[test]
    fn test_with_state_on_deferred() {
        let node = Node::new(0);
        let packet: Packet<i32> = Packet::deferred(&node);
        assert!(packet.with_state(PacketState::Bundled, 1).is_none());
    }

    #[test]
    fn test_position_of() {
        let parent = Node::new(0);
        let a = Node::new(1);
        let b = Node::new(2);
        let mut nodes: SmallVec<[Arc<Node<i32>>; CHILD_INLINE]> = SmallVec::new();
        nodes.push(Arc::clone(&a));
        nodes.push(Arc::clone(&b));
        let list = NodeList::new(Arc::downgrade(&parent), nodes);

        assert_eq!(list.position_of(&a), Some(0));
        assert_eq!(list.position_of(&b), Some(1));
        assert_eq!(list.position_of(&parent), None);
    }
}
