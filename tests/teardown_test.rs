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

//! Teardown races: a node whose authoritative data lived in a destroyed
//! ancestor fails with a distinct, non-retryable error.

use canopy::{Error, Node, Snapshot, Transaction};

#[test]
fn test_snapshot_of_orphaned_node_fails() {
    let child = Node::new(1i64);
    {
        let parent = Node::new(0i64);
        Node::insert(&parent, &child).unwrap();
        // Bundling moves the child's authoritative packet into the parent.
        Snapshot::take(&parent).unwrap();
    }

    let err = Snapshot::take(&child).unwrap_err();
    assert_eq!(err, Error::SupernodeDestroyed);
    assert!(err.is_teardown());
    assert!(!err.is_conflict());
}

#[test]
fn test_transaction_on_orphaned_node_fails() {
    let child = Node::new(1i64);
    {
        let parent = Node::new(0i64);
        Node::insert(&parent, &child).unwrap();
        Snapshot::take(&parent).unwrap();
    }

    assert_eq!(Transaction::new(&child).unwrap_err(), Error::SupernodeDestroyed);
}

#[test]
fn test_orphaned_chain_fails_through_intermediate() {
    // b defers to a, a defers to root; destroying root (while keeping a
    // alive) leaves both a and b unresolvable.
    let a = Node::new(1i64);
    let b = Node::new(2i64);
    Node::insert(&a, &b).unwrap();
    {
        let root = Node::new(0i64);
        Node::insert(&root, &a).unwrap();
        Snapshot::take(&root).unwrap();
    }

    assert_eq!(Snapshot::take(&a).unwrap_err(), Error::SupernodeDestroyed);
    assert_eq!(Snapshot::take(&b).unwrap_err(), Error::SupernodeDestroyed);
}

#[test]
fn test_carved_out_node_survives_parent_teardown() {
    let child = Node::new(1i64);
    {
        let parent = Node::new(0i64);
        Node::insert(&parent, &child).unwrap();
        Snapshot::take(&parent).unwrap();

        // Committing to the child carves its packet back out, so it no
        // longer depends on the parent.
        let mut txn = Transaction::new(&child).unwrap();
        txn.set(&child, 7).unwrap();
        txn.commit().unwrap();
    }

    let snap = Snapshot::take(&child).unwrap();
    assert_eq!(*snap.get(&child).unwrap(), 7);
}

#[test]
fn test_released_node_survives_parent_teardown() {
    let child = Node::new(5i64);
    {
        let parent = Node::new(0i64);
        Node::insert(&parent, &child).unwrap();
        Snapshot::take(&parent).unwrap();
        Node::release(&parent, &child).unwrap();
    }

    let snap = Snapshot::take(&child).unwrap();
    assert_eq!(*snap.get(&child).unwrap(), 5);

    let mut txn = Transaction::new(&child).unwrap();
    txn.update(&child, |v| *v += 1).unwrap();
    txn.commit().unwrap();
    assert_eq!(*Snapshot::take(&child).unwrap().get(&child).unwrap(), 6);
}

#[test]
fn test_snapshot_keeps_subtree_alive_after_teardown() {
    // A snapshot taken before the teardown keeps the captured packets (and
    // the child nodes they reference) fully readable.
    let snap = {
        let parent = Node::new(0i64);
        let child = Node::new(3i64);
        Node::insert(&parent, &child).unwrap();
        Snapshot::take(&parent).unwrap()
    };

    let children = snap.children(snap.node()).unwrap();
    assert_eq!(children.len(), 1);
    assert_eq!(*snap.get(&children[0]).unwrap(), 3);
}
