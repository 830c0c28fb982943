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

//! Optimistic read-write transactions
//!
//! A [`Transaction`] is a snapshot of a target node plus a private working
//! copy of its packet tree. Writes copy only the path from the target down to
//! each node actually written, stamped with the transaction's serial so a
//! second write to the same node reuses the copy. Nothing is visible to other
//! threads until the final CAS lands the working tree in one step; a conflict
//! means the baseline went stale and the caller replays its writes against
//! fresh data, most conveniently through [`Transaction::commit_or_next`].

use std::fmt;
use std::sync::Arc;

use crate::core::{Error, Result};
use crate::tree::bundle::{unbundle, UnbundleOutcome};
use crate::tree::lookup::{copy_branch, descend, locate};
use crate::tree::node::Node;
use crate::tree::packet::Packet;
use crate::tree::serial::next_serial;
use crate::tree::snapshot::{capture, Snapshot};
use crate::tree::Payload;

/// Lifecycle state of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    /// Accepting reads and writes; not yet committed.
    Active,
    /// Committed; its writes are globally visible.
    Committed,
    /// Explicitly abandoned; no effect was published.
    Abandoned,
}

/// Outcome of one commit attempt against a node's slot.
pub(crate) enum CommitResult {
    Committed,
    /// The baseline no longer matches the slot's authoritative packet.
    Conflict,
}

/// Attempts to replace `old` with `new` in `node`'s slot.
///
/// Handles the three shapes the slot can be in: holding the baseline
/// directly (plain CAS), holding some other local packet (conflict), or
/// deferring to an ancestor's bundle (commit through the unbundle protocol,
/// which verifies the baseline against the entry found there). Transient
/// disturbance is retried here; only a real conflict or teardown escapes.
pub(crate) fn commit_packet<T: Payload>(
    node: &Arc<Node<T>>,
    old: &Arc<Packet<T>>,
    new: Arc<Packet<T>>,
) -> Result<CommitResult> {
    loop {
        let cur = node.slot.load();
        if cur.as_local().is_some() {
            if !Arc::ptr_eq(&cur, old) {
                return Ok(CommitResult::Conflict);
            }
            if node.slot.compare_and_set(old, Arc::clone(&new)) {
                return Ok(CommitResult::Committed);
            }
            continue;
        }
        match unbundle(node, &cur, Some((old, &new)), None)? {
            UnbundleOutcome::WithNewValues | UnbundleOutcome::WithNewSubvalue => {
                return Ok(CommitResult::Committed);
            }
            UnbundleOutcome::SubvalueChanged => return Ok(CommitResult::Conflict),
            UnbundleOutcome::Redundant | UnbundleOutcome::Disturbed => continue,
        }
    }
}

/// A read-modify-write handle over one node's subtree.
pub struct Transaction<T: Payload> {
    node: Arc<Node<T>>,
    /// The packet the target held when this transaction (or its latest
    /// advance) captured its view; the commit CAS expects it unchanged.
    baseline: Arc<Packet<T>>,
    /// Private working tree; equal to `baseline` until the first write.
    work: Arc<Packet<T>>,
    serial: u64,
    state: TransactionState,
}

impl<T: Payload> Transaction<T> {
    /// Opens a transaction on `node` from a fresh consistent view.
    pub fn new(node: &Arc<Node<T>>) -> Result<Self> {
        let baseline = capture(node)?;
        Ok(Self {
            node: Arc::clone(node),
            work: Arc::clone(&baseline),
            baseline,
            serial: next_serial(),
            state: TransactionState::Active,
        })
    }

    /// This transaction's unique serial.
    pub fn serial(&self) -> u64 {
        self.serial
    }

    pub fn state(&self) -> TransactionState {
        self.state
    }

    /// The baseline view this transaction would commit against, as a
    /// snapshot usable for reads without a second capture.
    pub fn snapshot(&self) -> Snapshot<T> {
        Snapshot::from_parts(&self.node, Arc::clone(&self.baseline))
    }

    fn ensure_active(&self) -> Result<()> {
        if self.state != TransactionState::Active {
            return Err(Error::TransactionEnded);
        }
        Ok(())
    }

    /// Reads `node`'s payload as this transaction sees it, including its own
    /// uncommitted writes.
    pub fn get(&self, node: &Arc<Node<T>>) -> Result<&T> {
        self.ensure_active()?;
        let path = locate(&self.node, &self.work, node).ok_or(Error::NotInSnapshot)?;
        let local = descend(&self.work, &path).ok_or(Error::NotInSnapshot)?;
        Ok(&local.value)
    }

    /// Mutates `node`'s payload copy in place.
    ///
    /// The first write to a node copies the packets on the path from the
    /// target down to it; later writes in the same transaction find the
    /// serial stamp and reuse the copies.
    pub fn update<F>(&mut self, node: &Arc<Node<T>>, f: F) -> Result<()>
    where
        F: FnOnce(&mut T),
    {
        self.ensure_active()?;
        let path = locate(&self.node, &self.work, node).ok_or(Error::NotInSnapshot)?;
        let local =
            copy_branch(&mut self.work, &path, self.serial).ok_or(Error::NotInSnapshot)?;
        f(&mut local.value);
        Ok(())
    }

    /// Replaces `node`'s payload outright.
    pub fn set(&mut self, node: &Arc<Node<T>>, value: T) -> Result<()> {
        self.update(node, move |v| *v = value)
    }

    /// Marks the transaction abandoned; none of its writes take effect.
    pub fn abandon(&mut self) {
        if self.state == TransactionState::Active {
            self.state = TransactionState::Abandoned;
        }
    }

    fn try_commit(&mut self) -> Result<bool> {
        self.ensure_active()?;
        // Read-only transactions commit trivially.
        if Arc::ptr_eq(&self.work, &self.baseline) {
            self.state = TransactionState::Committed;
            return Ok(true);
        }
        match commit_packet(&self.node, &self.baseline, Arc::clone(&self.work))? {
            CommitResult::Committed => {
                self.state = TransactionState::Committed;
                Ok(true)
            }
            CommitResult::Conflict => Ok(false),
        }
    }

    /// Commits, consuming the transaction.
    ///
    /// On success returns a snapshot of the committed state. A stale baseline
    /// surfaces as [`Error::CommitConflict`]; the caller re-opens a
    /// transaction and replays its writes.
    pub fn commit(mut self) -> Result<Snapshot<T>> {
        if self.try_commit()? {
            return Ok(Snapshot::from_parts(&self.node, Arc::clone(&self.work)));
        }
        Err(Error::CommitConflict)
    }

    /// Attempts to commit; on conflict, advances to a fresh view instead of
    /// failing.
    ///
    /// Returns `true` when committed. Returns `false` after a conflict, in
    /// which case the transaction now sits on a fresh baseline (with a new
    /// serial and its pending writes discarded) and the caller replays its
    /// intended mutation before trying again.
    pub fn commit_or_next(&mut self) -> Result<bool> {
        if self.try_commit()? {
            return Ok(true);
        }
        let baseline = capture(&self.node)?;
        self.work = Arc::clone(&baseline);
        self.baseline = baseline;
        self.serial = next_serial();
        Ok(false)
    }
}

impl<T: Payload> fmt::Debug for Transaction<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transaction")
            .field("node", &Arc::as_ptr(&self.node))
            .field("serial", &self.serial)
            .field("state", &self.state)
            .field("dirty", &!Arc::ptr_eq(&self.work, &self.baseline))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_update_and_commit() {
        let node = Node::new(1i64);
        let mut txn = Transaction::new(&node).unwrap();
        txn.update(&node, |v| *v += 10).unwrap();

        // Nothing visible before the commit.
        let before = Snapshot::take(&node).unwrap();
        assert_eq!(*before.get(&node).unwrap(), 1);

        let committed = txn.commit().unwrap();
        assert_eq!(*committed.get(&node).unwrap(), 11);
        let after = Snapshot::take(&node).unwrap();
        assert_eq!(*after.get(&node).unwrap(), 11);
    }

    #[test]
    fn test_get_sees_own_writes() {
        let node = Node::new(5i64);
        let mut txn = Transaction::new(&node).unwrap();
        assert_eq!(*txn.get(&node).unwrap(), 5);
        txn.set(&node, 8).unwrap();
        assert_eq!(*txn.get(&node).unwrap(), 8);
        // The baseline snapshot still shows the old value.
        assert_eq!(*txn.snapshot().get(&node).unwrap(), 5);
    }

    #[test]
    fn test_write_to_descendant() {
        let root = Node::new(0i64);
        let child = Node::new(1i64);
        Node::insert(&root, &child).unwrap();

        let mut txn = Transaction::new(&root).unwrap();
        txn.update(&child, |v| *v = 100).unwrap();
        txn.commit().unwrap();

        let snap = Snapshot::take(&root).unwrap();
        assert_eq!(*snap.get(&child).unwrap(), 100);
        assert_eq!(*snap.get(&root).unwrap(), 0);
    }

    #[test]
    fn test_read_only_commit_succeeds() {
        let node = Node::new(3i64);
        let txn = Transaction::new(&node).unwrap();
        let snap = txn.commit().unwrap();
        assert_eq!(*snap.get(&node).unwrap(), 3);
    }

    #[test]
    fn test_stale_baseline_conflicts() {
        let node = Node::new(0i64);
        let mut first = Transaction::new(&node).unwrap();
        let mut second = Transaction::new(&node).unwrap();

        first.update(&node, |v| *v += 1).unwrap();
        first.commit().unwrap();

        second.update(&node, |v| *v += 1).unwrap();
        let err = second.commit().unwrap_err();
        assert!(err.is_conflict());
        // The losing write left no trace.
        let snap = Snapshot::take(&node).unwrap();
        assert_eq!(*snap.get(&node).unwrap(), 1);
    }

    #[test]
    fn test_commit_or_next_advances_and_replays() {
        let node = Node::new(0i64);
        let mut loser = Transaction::new(&node).unwrap();
        let old_serial = loser.serial();

        let mut winner = Transaction::new(&node).unwrap();
        winner.update(&node, |v| *v += 5).unwrap();
        winner.commit().unwrap();

        loser.update(&node, |v| *v += 1).unwrap();
        assert!(!loser.commit_or_next().unwrap());
        // Advanced onto the winner's state with a fresh serial.
        assert_ne!(loser.serial(), old_serial);
        assert_eq!(*loser.get(&node).unwrap(), 5);

        loser.update(&node, |v| *v += 1).unwrap();
        assert!(loser.commit_or_next().unwrap());
        let snap = Snapshot::take(&node).unwrap();
        assert_eq!(*snap.get(&node).unwrap(), 6);
    }

    #[test]
    fn test_commit_to_deferred_node() {
        // A node folded into its parent's bundle can still commit directly.
        let parent = Node::new(0i64);
        let child = Node::new(1i64);
        Node::insert(&parent, &child).unwrap();
        Snapshot::take(&parent).unwrap();
        assert!(child.slot.load().is_deferred());

        let mut txn = Transaction::new(&child).unwrap();
        txn.update(&child, |v| *v = 50).unwrap();
        txn.commit().unwrap();

        let snap = Snapshot::take(&parent).unwrap();
        assert_eq!(*snap.get(&child).unwrap(), 50);
    }

    #[test]
    fn test_ended_transaction_rejects_use() {
        let node = Node::new(0i64);
        let mut txn = Transaction::new(&node).unwrap();
        txn.update(&node, |v| *v += 1).unwrap();
        assert!(txn.commit_or_next().unwrap());

        assert_eq!(txn.state(), TransactionState::Committed);
        assert_eq!(txn.commit_or_next(), Err(Error::TransactionEnded));
        assert_eq!(txn.update(&node, |v| *v += 1), Err(Error::TransactionEnded));
        assert_eq!(txn.get(&node).copied(), Err(Error::TransactionEnded));
    }

    #[test]
    fn test_abandon_discards_writes() {
        let node = Node::new(7i64);
        let mut txn = Transaction::new(&node).unwrap();
        txn.update(&node, |v| *v = 0).unwrap();
        txn.abandon();
        assert_eq!(txn.state(), TransactionState::Abandoned);

        let snap = Snapshot::take(&node).unwrap();
        assert_eq!(*snap.get(&node).unwrap(), 7);
    }

    #[test]
    fn test_update_stranger_rejected() {
        let node = Node::new(0i64);
        let stranger = Node::new(1i64);
        let mut txn = Transaction::new(&node).unwrap();
        assert_eq!(
            txn.update(&stranger, |v| *v = 9),
            Err(Error::NotInSnapshot)
        );
    }
}
