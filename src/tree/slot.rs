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

//! Atomic reference slot
//!
//! Every cross-thread-visible mutable cell in the engine is one of these:
//! an atomically swappable, reference-counted packet pointer supporting load,
//! store, and compare-and-set of the entire pointer value. Everything
//! reachable from a slot is treated as immutable once published.

use std::sync::Arc;

use arc_swap::ArcSwap;

use crate::tree::packet::{Packet, PacketRepr};
use crate::tree::Payload;

/// An atomically swappable slot holding a node's current packet.
pub(crate) struct Slot<T: Payload> {
    cell: ArcSwap<Packet<T>>,
}

impl<T: Payload> Slot<T> {
    pub(crate) fn new(initial: Arc<Packet<T>>) -> Self {
        Self {
            cell: ArcSwap::new(initial),
        }
    }

    /// Loads the current packet.
    pub(crate) fn load(&self) -> Arc<Packet<T>> {
        self.cell.load_full()
    }

    /// Whether the slot still holds exactly `expected` (pointer identity).
    pub(crate) fn holds(&self, expected: &Arc<Packet<T>>) -> bool {
        let cur = self.cell.load();
        Arc::ptr_eq(&cur, expected)
    }

    /// Whether the slot currently holds a branch-point placeholder.
    pub(crate) fn holds_deferred(&self) -> bool {
        matches!(self.cell.load().repr, PacketRepr::Deferred(_))
    }

    /// Compare-and-set of the whole pointer value. Succeeds only if the slot
    /// still holds exactly `expected`.
    pub(crate) fn compare_and_set(&self, expected: &Arc<Packet<T>>, new: Arc<Packet<T>>) -> bool {
        let prev = self.cell.compare_and_swap(expected, new);
        Arc::ptr_eq(&prev, expected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::node::Node;
    use crate::tree::packet::{NodeList, PacketState};
    use crate::tree::serial::next_serial;
    use smallvec::SmallVec;
    use std::sync::Arc;
    use std::thread;

    fn packet(value: i64, node: &Arc<Node<i64>>) -> Arc<Packet<i64>> {
        Arc::new(Packet::local(
            value,
            PacketState::Bundled,
            next_serial(),
            NodeList::empty(Arc::downgrade(node)),
            SmallVec::new(),
        ))
    }

    #[test]
    fn test_load_returns_installed_packet() {
        let node = Node::new(0i64);
        let p = packet(5, &node);
        let slot = Slot::new(Arc::clone(&p));

        assert!(Arc::ptr_eq(&slot.load(), &p));
        assert!(slot.holds(&p));
        assert!(!slot.holds_deferred());
    }

    #[test]
    fn test_compare_and_set_success_and_failure() {
        let node = Node::new(0i64);
        let p1 = packet(1, &node);
        let p2 = packet(2, &node);
        let p3 = packet(3, &node);
        let slot = Slot::new(Arc::clone(&p1));

        assert!(slot.compare_and_set(&p1, Arc::clone(&p2)));
        assert!(slot.holds(&p2));

        // Stale expectation must fail and leave the slot untouched.
        assert!(!slot.compare_and_set(&p1, Arc::clone(&p3)));
        assert!(slot.holds(&p2));
    }

    #[test]
    fn test_holds_deferred() {
        let node = Node::new(0i64);
        let slot = Slot::new(Arc::new(Packet::deferred(&node)));
        assert!(slot.holds_deferred());
    }

    #[test]
    fn test_concurrent_cas_single_winner() {
        let node = Node::new(0i64);
        let base = packet(0, &node);
        let slot = Arc::new(Slot::new(Arc::clone(&base)));

        let winners: Vec<bool> = (0..8)
            .map(|i| {
                let slot = Arc::clone(&slot);
                let base = Arc::clone(&base);
                let node = Arc::clone(&node);
                thread::spawn(move || slot.compare_and_set(&base, packet(i, &node)))
            })
            .collect::<Vec<_>>()
            .into_iter()
            .map(|h| h.join().unwrap())
            .collect();

        // Exactly one CAS against the same baseline may win.
        assert_eq!(winners.iter().filter(|&&w| w).count(), 1);
    }
}
