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

//! The bundle/unbundle protocol
//!
//! A subtree is held either as one self-contained bundled packet or as a
//! chain of per-node deltas whose authoritative data lives one level up.
//! [`bundle`] folds independently-evolving children back into one consistent
//! packet; [`unbundle`] carves an independently-committable packet back out
//! for exactly one subordinate node. Both are built purely from CAS on packet
//! slots and report transient contention as a retryable outcome rather than
//! an error.
//!
//! Bundling publishes in two checkpoints: the fully assembled packet goes in
//! first under a pre-bundled tag, then each child slot is redirected to a
//! branch-point placeholder, and only then is the packet retagged bundled.
//! A reader of a child can therefore always follow its placeholder to the
//! parent and find complete data; a half-updated tree is never observable.
//! Children that already defer to the parent still get their placeholder
//! replaced with a fresh one, which forces any unbundle in flight on them to
//! restart instead of racing the new bundle.

use std::sync::Arc;

use smallvec::SmallVec;

use crate::core::{Error, Result};
use crate::tree::node::Node;
use crate::tree::packet::{Packet, PacketState, CHILD_INLINE};
use crate::tree::serial::next_serial;
use crate::tree::Payload;

/// Result of one bundle attempt.
pub(crate) enum BundleOutcome<T: Payload> {
    /// The node's slot now holds this finalized bundled packet.
    Success(Arc<Packet<T>>),
    /// Another thread changed the node or a child mid-attempt; no state
    /// change is guaranteed and the caller retries from a fresh read.
    Disturbed,
}

/// Result of one unbundle attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum UnbundleOutcome {
    /// Both the subordinate and the ancestor were updated with fresh values.
    WithNewValues,
    /// The subordinate side landed but the ancestor finalization lost its
    /// CAS. The subordinate's slot is authoritative; the ancestor keeps a
    /// stale (harmless, because unbundled) entry.
    WithNewSubvalue,
    /// A benign race made the operation redundant: someone else already
    /// carved the subordinate out.
    Redundant,
    /// The expected baseline no longer matches; the caller's view is stale
    /// and it must not proceed with the write it planned.
    SubvalueChanged,
    /// Transient contention; retry the enclosing operation.
    Disturbed,
}

/// Folds `node`'s children into one consistent packet.
///
/// `cur` is the packet observed in `node`'s slot. Returns it unchanged when
/// already bundled, retags in place for leaves, and otherwise runs the
/// two-checkpoint protocol. A deferred `cur` cannot be bundled here and
/// reports [`BundleOutcome::Disturbed`] so the caller re-resolves it.
pub(crate) fn bundle<T: Payload>(
    node: &Arc<Node<T>>,
    cur: &Arc<Packet<T>>,
) -> Result<BundleOutcome<T>> {
    let Some(local) = cur.as_local() else {
        return Ok(BundleOutcome::Disturbed);
    };
    if local.state == PacketState::Bundled {
        return Ok(BundleOutcome::Success(Arc::clone(cur)));
    }

    // Leaf fast path: nothing to assemble, a single retag CAS suffices.
    if local.children.nodes.is_empty() {
        let Some(finalized) = cur.with_state(PacketState::Bundled, next_serial()) else {
            return Ok(BundleOutcome::Disturbed);
        };
        let finalized = Arc::new(finalized);
        if node.slot.compare_and_set(cur, Arc::clone(&finalized)) {
            return Ok(BundleOutcome::Success(finalized));
        }
        return Ok(BundleOutcome::Disturbed);
    }

    debug_assert_eq!(local.children.nodes.len(), local.packets.len());

    // Assemble a consistent packet per child, remembering the slot value
    // each child held so it can be redirected with CAS afterwards.
    let mut packets: SmallVec<[Arc<Packet<T>>; CHILD_INLINE]> =
        SmallVec::with_capacity(local.children.nodes.len());
    let mut redirects: SmallVec<[(usize, Arc<Packet<T>>); CHILD_INLINE]> =
        SmallVec::with_capacity(local.children.nodes.len());
    for (i, child) in local.children.nodes.iter().enumerate() {
        let entry = loop {
            // A child-level race only disturbs the whole attempt once our
            // own slot has moved on; otherwise the child step is retried.
            if !node.slot.holds(cur) {
                return Ok(BundleOutcome::Disturbed);
            }
            let observed = child.slot.load();
            if observed.is_bundled() {
                redirects.push((i, Arc::clone(&observed)));
                break observed;
            }
            if observed.as_local().is_some() {
                match bundle(child, &observed)? {
                    BundleOutcome::Success(p) => {
                        redirects.push((i, Arc::clone(&p)));
                        break p;
                    }
                    BundleOutcome::Disturbed => continue,
                }
            }
            let defers_here = observed
                .as_deferred()
                .map_or(false, |bp| bp.refers_to(node));
            if defers_here {
                // The existing entry is the authoritative data for this
                // child; reuse it. A cleared entry means a carve-out is in
                // flight and we restart.
                let current = &local.packets[i];
                if current.is_deferred() {
                    return Ok(BundleOutcome::Disturbed);
                }
                redirects.push((i, Arc::clone(&observed)));
                break Arc::clone(current);
            }
            // Deferred to some other ancestor: carve its packet back out,
            // then re-read the child slot. Any outcome short of teardown
            // just means the slot needs another look.
            unbundle(child, &observed, None, None)?;
        };
        packets.push(entry);
    }

    // First checkpoint: publish the assembled packet before touching any
    // child slot, so readers of a child can already find their data here.
    let pre = Arc::new(Packet::local(
        local.value.clone(),
        PacketState::PreBundled,
        next_serial(),
        Arc::clone(&local.children),
        packets.clone(),
    ));
    if !node.slot.compare_and_set(cur, Arc::clone(&pre)) {
        return Ok(BundleOutcome::Disturbed);
    }

    // Redirect every child to a fresh branch-point placeholder. On failure
    // the pre-bundled packet stays behind; a later attempt resumes from it.
    for (i, expected) in &redirects {
        let placeholder = Arc::new(Packet::deferred(node));
        if !local.children.nodes[*i].slot.compare_and_set(expected, placeholder) {
            return Ok(BundleOutcome::Disturbed);
        }
    }

    // Second checkpoint: retag as bundled.
    let finalized = Arc::new(Packet::local(
        local.value.clone(),
        PacketState::Bundled,
        next_serial(),
        Arc::clone(&local.children),
        packets,
    ));
    if !node.slot.compare_and_set(&pre, Arc::clone(&finalized)) {
        return Ok(BundleOutcome::Disturbed);
    }

    for (i, child) in local.children.nodes.iter().enumerate() {
        child.set_hint(&local.children, i);
    }
    Ok(BundleOutcome::Success(finalized))
}

/// Carves an independently-committable packet back out for `sub`, whose slot
/// currently holds the branch-point `placeholder`.
///
/// `sub_swap` supplies an expected/new packet pair for the subordinate when
/// the unbundle doubles as a commit: the entry found in the ancestor must be
/// the expected baseline, and the new packet is installed in its place.
/// `super_swap` likewise supplies an expected/replacement pair for the
/// ancestor, used by structural mutation to land a new ancestor topology in
/// the same pass.
///
/// The only hard failure is [`Error::SupernodeDestroyed`]; every contention
/// case comes back as an [`UnbundleOutcome`] for the caller to interpret.
pub(crate) fn unbundle<T: Payload>(
    sub: &Arc<Node<T>>,
    placeholder: &Arc<Packet<T>>,
    sub_swap: Option<(&Arc<Packet<T>>, &Arc<Packet<T>>)>,
    super_swap: Option<(&Arc<Packet<T>>, &Arc<Packet<T>>)>,
) -> Result<UnbundleOutcome> {
    let Some(bp) = placeholder.as_deferred() else {
        return Ok(UnbundleOutcome::Disturbed);
    };
    let Some(super_node) = bp.super_node.upgrade() else {
        return Err(Error::SupernodeDestroyed);
    };

    // Step 1: the ancestor's packet must itself be local. If it has been
    // superseded further up, recurse to carve it out first.
    let super_cur = loop {
        let observed = super_node.slot.load();
        if observed.as_local().is_some() {
            break observed;
        }
        match unbundle(&super_node, &observed, None, None)? {
            UnbundleOutcome::Disturbed => return Ok(UnbundleOutcome::Disturbed),
            _ => continue,
        }
    };
    if let Some((base, _)) = super_swap {
        if !Arc::ptr_eq(&super_cur, base) {
            return Ok(UnbundleOutcome::Disturbed);
        }
    }
    let Some(super_local) = super_cur.as_local() else {
        return Ok(UnbundleOutcome::Disturbed);
    };

    // Step 2: take an unbundled working copy of the ancestor packet and
    // install it, claiming the ancestor slot for this attempt. An already
    // unbundled ancestor serves as the working copy directly; a pre-bundled
    // one is mid-bundle and must settle first.
    let working = match super_local.state {
        PacketState::PreBundled => return Ok(UnbundleOutcome::Disturbed),
        PacketState::Unbundled => Arc::clone(&super_cur),
        PacketState::Bundled => {
            let Some(copy) = super_cur.with_state(PacketState::Unbundled, next_serial()) else {
                return Ok(UnbundleOutcome::Disturbed);
            };
            let copy = Arc::new(copy);
            if !super_node.slot.compare_and_set(&super_cur, Arc::clone(&copy)) {
                return Ok(UnbundleOutcome::Disturbed);
            }
            copy
        }
    };
    let Some(working_local) = working.as_local() else {
        return Ok(UnbundleOutcome::Disturbed);
    };

    // Step 3: find the subordinate's entry by identity.
    let Some(index) = working_local.children.position_of(sub) else {
        return Ok(UnbundleOutcome::Disturbed);
    };
    debug_assert_eq!(
        working_local.children.nodes.len(),
        working_local.packets.len()
    );
    let found = &working_local.packets[index];
    if found.is_deferred() {
        // Entry already cleared. If the subordinate's slot moved on too, the
        // race resolved favorably without us.
        if sub.slot.holds_deferred() {
            return Ok(UnbundleOutcome::Disturbed);
        }
        return Ok(UnbundleOutcome::Redundant);
    }

    // Step 4: adopt the found packet, or verify and substitute the caller's.
    let adopted = match sub_swap {
        Some((expected, replacement)) => {
            if !Arc::ptr_eq(found, expected) {
                return Ok(UnbundleOutcome::SubvalueChanged);
            }
            Arc::clone(replacement)
        }
        None => {
            let Some(found_local) = found.as_local() else {
                return Ok(UnbundleOutcome::Disturbed);
            };
            if found_local.children.nodes.is_empty() {
                Arc::clone(found)
            } else {
                // Copy to decouple the subordinate's further mutation from
                // packets still referenced by live snapshots.
                let Some(copy) = found.with_state(found_local.state, next_serial()) else {
                    return Ok(UnbundleOutcome::Disturbed);
                };
                Arc::new(copy)
            }
        }
    };

    // Step 5: hand the subordinate its own packet. A different placeholder
    // in the slot means a concurrent bundle re-stamped it; the baseline is
    // re-verified on retry, so that is contention, not a conflict. A local
    // packet means someone else already carved the subordinate out.
    if !sub.slot.compare_and_set(placeholder, adopted) {
        if sub.slot.holds_deferred() {
            return Ok(UnbundleOutcome::Disturbed);
        }
        return Ok(UnbundleOutcome::Redundant);
    }

    // Step 6: finalize the ancestor, either with the caller's replacement or
    // with the subordinate's entry cleared out.
    let final_super = match super_swap {
        Some((_, replacement)) => Arc::clone(replacement),
        None => {
            let mut packets = working_local.packets.clone();
            packets[index] = Arc::new(Packet::deferred(sub));
            Arc::new(Packet::local(
                working_local.value.clone(),
                PacketState::Unbundled,
                next_serial(),
                Arc::clone(&working_local.children),
                packets,
            ))
        }
    };
    if !super_node.slot.compare_and_set(&working, final_super) {
        return Ok(UnbundleOutcome::WithNewSubvalue);
    }
    Ok(UnbundleOutcome::WithNewValues)
}
