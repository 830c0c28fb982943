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

//! Forward and reverse lookup inside packet trees
//!
//! Given a bundled packet covering some subtree, reverse lookup finds the
//! sub-packet belonging to one specific node. The fast path walks the hint
//! cache (last known ancestor list and index per node) bottom-up and then
//! re-validates the resulting path top-down against the actual packet tree.
//! Any mismatch falls back to an exhaustive depth-first search that rebuilds
//! the hints. Hints are never load-bearing for correctness.

use std::sync::{Arc, Weak};

use crate::tree::node::Node;
use crate::tree::packet::{LocalPacket, NodeList, Packet};
use crate::tree::Payload;

/// Stale hints can form a cycle; cap the climb so the fallback search takes
/// over instead.
const MAX_HINT_DEPTH: usize = 1024;

/// A cached position: the ancestor child list this node was last found in,
/// and its index there.
pub(crate) struct LookupHint<T: Payload> {
    pub(crate) list: Weak<NodeList<T>>,
    pub(crate) index: usize,
}

impl<T: Payload> Clone for LookupHint<T> {
    fn clone(&self) -> Self {
        Self {
            list: self.list.clone(),
            index: self.index,
        }
    }
}

/// Finds the child-index path from `packet` (known to belong to `root`) down
/// to `target`'s sub-packet. Returns `None` if the packet tree does not cover
/// the target.
pub(crate) fn locate<T: Payload>(
    root: &Arc<Node<T>>,
    packet: &Arc<Packet<T>>,
    target: &Arc<Node<T>>,
) -> Option<Vec<usize>> {
    if Arc::ptr_eq(root, target) {
        return packet.as_local().map(|_| Vec::new());
    }
    if let Some(chain) = hint_chain(root, target) {
        if let Some(path) = validate_chain(packet, &chain) {
            return Some(path);
        }
    }
    let mut path = Vec::new();
    if forward_lookup(packet, target, &mut path) {
        Some(path)
    } else {
        None
    }
}

/// Climbs from `target` towards `root` through the hint cache, collecting
/// `(node, index-in-parent)` pairs ordered root-child first. Fails on any
/// unresolvable or inconsistent hint.
fn hint_chain<T: Payload>(
    root: &Arc<Node<T>>,
    target: &Arc<Node<T>>,
) -> Option<Vec<(Arc<Node<T>>, usize)>> {
    let mut chain = Vec::new();
    let mut cur = Arc::clone(target);
    loop {
        let hint = cur.take_hint()?;
        let list = hint.list.upgrade()?;
        let at = list.nodes.get(hint.index)?;
        if !Arc::ptr_eq(at, &cur) {
            return None;
        }
        let owner = list.owner.upgrade()?;
        chain.push((Arc::clone(&cur), hint.index));
        if Arc::ptr_eq(&owner, root) {
            chain.reverse();
            return Some(chain);
        }
        if chain.len() >= MAX_HINT_DEPTH {
            return None;
        }
        cur = owner;
    }
}

/// Re-validates a hinted chain top-down against the packet tree, returning
/// the index path when every level matches by node identity.
fn validate_chain<T: Payload>(
    packet: &Arc<Packet<T>>,
    chain: &[(Arc<Node<T>>, usize)],
) -> Option<Vec<usize>> {
    let mut path = Vec::with_capacity(chain.len());
    let mut cur = packet;
    for (node, index) in chain {
        let local = cur.as_local()?;
        let at = local.children.nodes.get(*index)?;
        if !Arc::ptr_eq(at, node) {
            return None;
        }
        cur = local.packets.get(*index)?;
        path.push(*index);
    }
    // A deferred leaf entry means the target is not covered here.
    cur.as_local()?;
    Some(path)
}

/// Exhaustive depth-first search by node identity, rebuilding hints along the
/// discovered path.
fn forward_lookup<T: Payload>(
    packet: &Arc<Packet<T>>,
    target: &Arc<Node<T>>,
    path: &mut Vec<usize>,
) -> bool {
    let Some(local) = packet.as_local() else {
        return false;
    };
    for (i, child) in local.children.nodes.iter().enumerate() {
        let Some(sub) = local.packets.get(i) else {
            return false;
        };
        if Arc::ptr_eq(child, target) {
            if sub.as_local().is_none() {
                return false;
            }
            child.set_hint(&local.children, i);
            path.push(i);
            return true;
        }
        path.push(i);
        if forward_lookup(sub, target, path) {
            child.set_hint(&local.children, i);
            return true;
        }
        path.pop();
    }
    false
}

/// Walks `path` down from `packet`, returning the local packet at the end.
pub(crate) fn descend<'a, T: Payload>(
    packet: &'a Arc<Packet<T>>,
    path: &[usize],
) -> Option<&'a LocalPacket<T>> {
    descend_packet(packet, path)?.as_local()
}

/// Like [`descend`], but returns the packet reference itself.
pub(crate) fn descend_packet<'a, T: Payload>(
    packet: &'a Arc<Packet<T>>,
    path: &[usize],
) -> Option<&'a Arc<Packet<T>>> {
    let mut cur = packet;
    for &index in path {
        cur = cur.as_local()?.packets.get(index)?;
    }
    Some(cur)
}

/// Copy-on-write descent along `path`, stamping every copied packet with the
/// transaction serial. Packets already stamped in this transaction are
/// uniquely owned by the working tree, so `Arc::make_mut` reuses them
/// without re-copying. Returns a mutable reference to the target's packet.
pub(crate) fn copy_branch<'a, T: Payload>(
    root: &'a mut Arc<Packet<T>>,
    path: &[usize],
    serial: u64,
) -> Option<&'a mut LocalPacket<T>> {
    let mut cur = root;
    for &index in path {
        let local = Arc::make_mut(cur).as_local_mut()?;
        local.serial = serial;
        cur = local.packets.get_mut(index)?;
    }
    let local = Arc::make_mut(cur).as_local_mut()?;
    local.serial = serial;
    Some(local)
}
