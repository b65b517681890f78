//! Replicated text buffer - fragment CRDT with deterministic convergence.
//!
//! Text is a sequence of character fragments keyed by insertion identity
//! `(site, seq)`. Deletes tombstone fragments instead of removing them, so
//! concurrent edits never delete the same character twice. Every splice is
//! packaged as an [`EditOperation`] with its own `(site, seq)` identity,
//! which makes remote application idempotent under redelivery and lets the
//! buffer detect a redelivered operation whose payload changed.
//!
//! Sequence numbers are Lamport-style: integrating a remote fragment
//! advances the local counter past it, so a fragment inserted after
//! observing some text always sorts ahead of that text's fragments among
//! siblings. Equal-sequence concurrent inserts at the same spot are ordered
//! with the lower site id first.

use crate::point::{point_for_index, Point, Range};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use thiserror::Error;

/// Identity of one participant in a portal. Site 1 is always the host;
/// guests receive strictly increasing ids in join order.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct SiteId(pub u32);

impl SiteId {
    pub const HOST: SiteId = SiteId(1);

    pub fn is_host(self) -> bool {
        self == Self::HOST
    }
}

impl std::fmt::Display for SiteId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identity of one inserted character.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CharId {
    pub site: SiteId,
    pub seq: u64,
}

impl CharId {
    /// Virtual fragment before the first character of every buffer.
    pub const GENESIS: CharId = CharId {
        site: SiteId(0),
        seq: 0,
    };
}

impl Ord for CharId {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        // Higher sequence sorts later in causal order. On a tie, reverse the
        // site comparison so that descending sibling order puts the lower
        // site id first.
        self.seq
            .cmp(&other.seq)
            .then_with(|| other.site.cmp(&self.site))
    }
}

impl PartialOrd for CharId {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

/// Identity of one edit operation, used for deduplication.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct OpId {
    pub site: SiteId,
    pub seq: u64,
}

/// A run of characters inserted after `origin`. The `i`-th character has
/// identity `(op site, first_seq + i)` and its predecessor as origin, so a
/// run always materializes contiguously.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InsertRun {
    pub origin: CharId,
    pub first_seq: u64,
    pub text: String,
}

/// One splice against the buffer: tombstone `deletes`, then insert the run.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EditOperation {
    pub id: OpId,
    pub deletes: Vec<CharId>,
    pub insert: Option<InsertRun>,
}

impl EditOperation {
    pub fn is_empty(&self) -> bool {
        self.deletes.is_empty() && self.insert.is_none()
    }
}

/// A concrete text mutation in current buffer coordinates. Sequences of
/// changes are coherent when applied in order: each change's `old_range` is
/// expressed in the coordinate space left by the previous one.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextChange {
    pub old_range: Range,
    pub new_text: String,
}

impl TextChange {
    /// The range the replacement text occupies after the change.
    pub fn new_range(&self) -> Range {
        Range {
            start: self.old_range.start,
            end: self
                .old_range
                .start
                .traverse(crate::point::extent_of(&self.new_text)),
        }
    }
}

/// One character fragment.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fragment {
    pub id: CharId,
    pub ch: char,
    pub origin: CharId,
    pub deleted: bool,
}

/// Full-state snapshot of a buffer, used when a guest joins. Fragments are
/// a flat list so the snapshot stays JSON-friendly; the operation log rides
/// along so redelivered operations still deduplicate after a join.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextSnapshot {
    pub fragments: Vec<Fragment>,
    pub ops: Vec<EditOperation>,
    pub deferred: Vec<EditOperation>,
}

#[derive(Debug, Error)]
pub enum TextError {
    #[error("splice at {index} is outside the buffer (length {len})")]
    OutOfBounds { index: usize, len: usize },
    #[error("point {0} is outside the buffer")]
    InvalidPoint(Point),
    #[error("operation {site}.{seq} was redelivered with a different payload")]
    ConvergenceViolation { site: SiteId, seq: u64 },
}

/// The replicated buffer core. All sites that apply the same set of
/// operations, in any order, materialize identical text.
#[derive(Clone, Debug)]
pub struct TextCrdt {
    site: SiteId,
    next_seq: u64,
    fragments: HashMap<CharId, Fragment>,
    /// Children of each fragment (fragments inserted directly after it),
    /// sorted descending so newer runs sort ahead of older siblings.
    children: HashMap<CharId, Vec<CharId>>,
    log: Vec<EditOperation>,
    applied: HashMap<OpId, usize>,
    /// Operations whose origin or delete targets have not arrived yet.
    deferred: Vec<EditOperation>,
}

impl TextCrdt {
    pub fn new(site: SiteId) -> Self {
        let mut children = HashMap::new();
        children.insert(CharId::GENESIS, Vec::new());
        Self {
            site,
            next_seq: 1,
            fragments: HashMap::new(),
            children,
            log: Vec::new(),
            applied: HashMap::new(),
            deferred: Vec::new(),
        }
    }

    pub fn site(&self) -> SiteId {
        self.site
    }

    /// Materialize the visible text.
    pub fn text(&self) -> String {
        self.visible().map(|f| f.ch).collect()
    }

    pub fn chars(&self) -> Vec<char> {
        self.visible().map(|f| f.ch).collect()
    }

    pub fn len(&self) -> usize {
        self.visible().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn operation_log(&self) -> &[EditOperation] {
        &self.log
    }

    fn alloc_seq(&mut self, count: u64) -> u64 {
        let first = self.next_seq;
        self.next_seq += count;
        first
    }

    fn observe_seq(&mut self, seq: u64) {
        if seq >= self.next_seq {
            self.next_seq = seq + 1;
        }
    }

    /// Apply a local splice: delete `deleted_count` visible characters at
    /// `start`, then insert `text` there. Returns the operation to
    /// broadcast. The mutation itself is synchronous and local.
    pub fn splice(
        &mut self,
        start: usize,
        deleted_count: usize,
        text: &str,
    ) -> Result<EditOperation, TextError> {
        let visible: Vec<CharId> = self.visible().map(|f| f.id).collect();
        let len = visible.len();
        if start > len {
            return Err(TextError::OutOfBounds { index: start, len });
        }
        if start + deleted_count > len {
            return Err(TextError::OutOfBounds {
                index: start + deleted_count,
                len,
            });
        }

        let deletes = visible[start..start + deleted_count].to_vec();
        let insert = if text.is_empty() {
            None
        } else {
            let origin = if start == 0 {
                CharId::GENESIS
            } else {
                visible[start - 1]
            };
            let first_seq = self.alloc_seq(text.chars().count() as u64);
            Some(InsertRun {
                origin,
                first_seq,
                text: text.to_string(),
            })
        };
        let op = EditOperation {
            id: OpId {
                site: self.site,
                seq: self.alloc_seq(1),
            },
            deletes,
            insert,
        };
        self.apply_payload(&op);
        self.record(op.clone());
        Ok(op)
    }

    /// Apply an operation received from another site.
    ///
    /// Idempotent: a redelivered operation produces no changes. An
    /// operation referencing fragments this site has not seen yet is
    /// deferred and retried once its dependencies arrive. Redelivery of a
    /// known operation id with a different payload is a convergence
    /// violation and is rejected without mutating state.
    pub fn integrate(&mut self, op: &EditOperation) -> Result<Vec<TextChange>, TextError> {
        if let Some(&index) = self.applied.get(&op.id) {
            if self.log[index] == *op {
                return Ok(Vec::new());
            }
            return Err(TextError::ConvergenceViolation {
                site: op.id.site,
                seq: op.id.seq,
            });
        }
        if let Some(pending) = self.deferred.iter().find(|d| d.id == op.id) {
            if pending == op {
                return Ok(Vec::new());
            }
            return Err(TextError::ConvergenceViolation {
                site: op.id.site,
                seq: op.id.seq,
            });
        }

        if !self.can_apply(op) {
            self.deferred.push(op.clone());
            return Ok(Vec::new());
        }

        let mut changes = self.apply_payload(op);
        self.record(op.clone());

        // Integrating this operation may unblock deferred ones.
        loop {
            let Some(index) = self.deferred.iter().position(|d| self.can_apply(d)) else {
                break;
            };
            let pending = self.deferred.remove(index);
            changes.extend(self.apply_payload(&pending));
            self.record(pending);
        }

        Ok(changes)
    }

    fn can_apply(&self, op: &EditOperation) -> bool {
        if let Some(run) = &op.insert {
            if run.origin != CharId::GENESIS && !self.fragments.contains_key(&run.origin) {
                return false;
            }
        }
        op.deletes.iter().all(|id| self.fragments.contains_key(id))
    }

    fn record(&mut self, op: EditOperation) {
        self.observe_seq(op.id.seq);
        self.applied.insert(op.id, self.log.len());
        self.log.push(op);
    }

    /// Apply an operation's payload, assuming all dependencies are present.
    /// Returns the concrete text changes in application order.
    fn apply_payload(&mut self, op: &EditOperation) -> Vec<TextChange> {
        let mut changes = Vec::new();

        if !op.deletes.is_empty() {
            let mut visible: Vec<(CharId, char)> =
                self.visible().map(|f| (f.id, f.ch)).collect();
            let index_of: HashMap<CharId, usize> = visible
                .iter()
                .enumerate()
                .map(|(i, (id, _))| (*id, i))
                .collect();
            let mut positions: Vec<usize> = op
                .deletes
                .iter()
                .filter_map(|id| index_of.get(id).copied())
                .collect();
            positions.sort_unstable();

            let mut runs: Vec<(usize, usize)> = Vec::new();
            for i in positions {
                match runs.last_mut() {
                    Some((_, end)) if *end + 1 == i => *end = i,
                    _ => runs.push((i, i)),
                }
            }

            // Remove runs back to front so earlier indices stay valid; each
            // emitted change is coherent with the state at its turn.
            for &(a, b) in runs.iter().rev() {
                let chars: Vec<char> = visible.iter().map(|(_, c)| *c).collect();
                let old_range = Range {
                    start: point_for_index(&chars, a),
                    end: point_for_index(&chars, b + 1),
                };
                changes.push(TextChange {
                    old_range,
                    new_text: String::new(),
                });
                visible.drain(a..=b);
            }

            for id in &op.deletes {
                if let Some(fragment) = self.fragments.get_mut(id) {
                    fragment.deleted = true;
                }
            }
        }

        if let Some(run) = &op.insert {
            let mut origin = run.origin;
            let mut first = None;
            for (i, ch) in run.text.chars().enumerate() {
                let id = CharId {
                    site: op.id.site,
                    seq: run.first_seq + i as u64,
                };
                self.observe_seq(id.seq);
                self.integrate_fragment(Fragment {
                    id,
                    ch,
                    origin,
                    deleted: false,
                });
                first.get_or_insert(id);
                origin = id;
            }

            if let Some(first) = first {
                let visible: Vec<(CharId, char)> =
                    self.visible().map(|f| (f.id, f.ch)).collect();
                if let Some(index) = visible.iter().position(|(id, _)| *id == first) {
                    let prefix: Vec<char> =
                        visible[..index].iter().map(|(_, c)| *c).collect();
                    let start = point_for_index(&prefix, index.min(prefix.len()));
                    changes.push(TextChange {
                        old_range: Range::collapsed(start),
                        new_text: run.text.clone(),
                    });
                }
            }
        }

        changes
    }

    fn integrate_fragment(&mut self, fragment: Fragment) {
        let id = fragment.id;
        let origin = fragment.origin;
        self.fragments.insert(id, fragment);
        let siblings = self.children.entry(origin).or_default();
        let position = siblings
            .iter()
            .position(|existing| *existing < id)
            .unwrap_or(siblings.len());
        siblings.insert(position, id);
        self.children.entry(id).or_default();
    }

    fn visible(&self) -> impl Iterator<Item = &Fragment> + '_ {
        self.traverse().filter(|f| !f.deleted)
    }

    fn traverse(&self) -> FragmentIter<'_> {
        FragmentIter {
            crdt: self,
            stack: vec![CharId::GENESIS],
            visited: HashSet::new(),
        }
    }

    /// Full-state snapshot for a joining site.
    pub fn snapshot(&self) -> TextSnapshot {
        TextSnapshot {
            fragments: self.fragments.values().cloned().collect(),
            ops: self.log.clone(),
            deferred: self.deferred.clone(),
        }
    }

    /// Rebuild a replica from a snapshot, keeping the local site identity.
    pub fn from_snapshot(site: SiteId, snapshot: TextSnapshot) -> Self {
        let mut crdt = Self::new(site);
        for fragment in snapshot.fragments {
            crdt.observe_seq(fragment.id.seq);
            crdt.fragments.insert(fragment.id, fragment);
        }
        let ids: Vec<CharId> = crdt.fragments.keys().copied().collect();
        for id in ids {
            let origin = crdt.fragments[&id].origin;
            crdt.children.entry(origin).or_default().push(id);
            crdt.children.entry(id).or_default();
        }
        for siblings in crdt.children.values_mut() {
            siblings.sort_unstable_by(|a, b| b.cmp(a));
        }
        for op in snapshot.ops {
            crdt.record(op);
        }
        crdt.deferred = snapshot.deferred;
        crdt
    }
}

/// Depth-first traversal of fragments in document order: each fragment is
/// followed by its children (newest sibling first).
struct FragmentIter<'a> {
    crdt: &'a TextCrdt,
    stack: Vec<CharId>,
    visited: HashSet<CharId>,
}

impl<'a> Iterator for FragmentIter<'a> {
    type Item = &'a Fragment;

    fn next(&mut self) -> Option<Self::Item> {
        while let Some(id) = self.stack.pop() {
            if !self.visited.insert(id) {
                continue;
            }
            if let Some(children) = self.crdt.children.get(&id) {
                for child in children.iter().rev() {
                    if !self.visited.contains(child) {
                        self.stack.push(*child);
                    }
                }
            }
            if id != CharId::GENESIS {
                if let Some(fragment) = self.crdt.fragments.get(&id) {
                    return Some(fragment);
                }
            }
        }
        None
    }
}

impl std::fmt::Display for TextCrdt {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.text())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn site(n: u32) -> SiteId {
        SiteId(n)
    }

    #[test]
    fn test_local_splices() {
        let mut buffer = TextCrdt::new(site(1));
        buffer.splice(0, 0, "hello world").unwrap();
        assert_eq!(buffer.text(), "hello world");

        buffer.splice(11, 0, "!").unwrap();
        assert_eq!(buffer.text(), "hello world!");

        buffer.splice(0, 5, "goodbye").unwrap();
        assert_eq!(buffer.text(), "goodbye world!");
    }

    #[test]
    fn test_splice_out_of_bounds() {
        let mut buffer = TextCrdt::new(site(1));
        buffer.splice(0, 0, "abc").unwrap();
        assert!(buffer.splice(4, 0, "x").is_err());
        assert!(buffer.splice(2, 5, "").is_err());
    }

    #[test]
    fn test_remote_integration_converges() {
        let mut host = TextCrdt::new(site(1));
        let setup = host.splice(0, 0, "hello world!").unwrap();

        let mut guest = TextCrdt::from_snapshot(site(2), host.snapshot());
        assert_eq!(guest.text(), "hello world!");

        // Concurrent: host inserts " cruel" at 5; guest replaces "hello"
        // with "goodbye".
        let host_insert = host.splice(5, 0, " cruel").unwrap();
        let guest_delete = guest.splice(0, 5, "").unwrap();
        let guest_insert = guest.splice(0, 0, "goodbye").unwrap();

        host.integrate(&guest_delete).unwrap();
        host.integrate(&guest_insert).unwrap();
        guest.integrate(&host_insert).unwrap();

        assert_eq!(host.text(), "goodbye cruel world!");
        assert_eq!(guest.text(), "goodbye cruel world!");
        // The setup op predates the snapshot, so redelivery is a no-op.
        assert!(guest.integrate(&setup).unwrap().is_empty());
    }

    #[test]
    fn test_redelivery_is_idempotent() {
        let mut a = TextCrdt::new(site(1));
        let mut b = TextCrdt::new(site(2));
        let op = a.splice(0, 0, "abc").unwrap();

        assert!(!b.integrate(&op).unwrap().is_empty());
        assert!(b.integrate(&op).unwrap().is_empty());
        assert_eq!(b.text(), "abc");
    }

    #[test]
    fn test_conflicting_redelivery_is_a_violation() {
        let mut a = TextCrdt::new(site(1));
        let mut b = TextCrdt::new(site(2));
        let op = a.splice(0, 0, "abc").unwrap();
        b.integrate(&op).unwrap();

        let mut forged = op.clone();
        if let Some(run) = &mut forged.insert {
            run.text = "xyz".to_string();
        }
        assert!(matches!(
            b.integrate(&forged),
            Err(TextError::ConvergenceViolation { .. })
        ));
        assert_eq!(b.text(), "abc");
    }

    #[test]
    fn test_out_of_order_delivery_is_deferred() {
        let mut a = TextCrdt::new(site(1));
        let op1 = a.splice(0, 0, "base").unwrap();
        let op2 = a.splice(4, 0, " more").unwrap();
        let op3 = a.splice(0, 4, "").unwrap();

        let mut b = TextCrdt::new(site(2));
        // Deliver in reverse: ops referencing unseen fragments wait.
        assert!(b.integrate(&op3).unwrap().is_empty());
        assert!(b.integrate(&op2).unwrap().is_empty());
        let changes = b.integrate(&op1).unwrap();
        assert!(!changes.is_empty());
        assert_eq!(b.text(), " more");
        assert_eq!(b.text(), a.text());
    }

    #[test]
    fn test_concurrent_inserts_tie_break_on_site() {
        let mut a = TextCrdt::new(site(1));
        let mut b = TextCrdt::new(site(2));

        // Same position, no prior context: equal sequence numbers, so the
        // lower site id's run comes first on both sites.
        let op_a = a.splice(0, 0, "AA").unwrap();
        let op_b = b.splice(0, 0, "BB").unwrap();
        a.integrate(&op_b).unwrap();
        b.integrate(&op_a).unwrap();

        assert_eq!(a.text(), b.text());
        assert_eq!(a.text(), "AABB");
    }

    #[test]
    fn test_concurrent_delete_overlap() {
        let mut a = TextCrdt::new(site(1));
        let base = a.splice(0, 0, "abcdef").unwrap();
        let mut b = TextCrdt::from_snapshot(site(2), a.snapshot());
        let _ = base;

        // Overlapping deletes: "bcd" on a, "cde" on b.
        let del_a = a.splice(1, 3, "").unwrap();
        let del_b = b.splice(2, 3, "").unwrap();
        a.integrate(&del_b).unwrap();
        b.integrate(&del_a).unwrap();

        assert_eq!(a.text(), "af");
        assert_eq!(b.text(), "af");
    }

    #[test]
    fn test_zero_length_splice_is_a_no_op() {
        let mut a = TextCrdt::new(site(1));
        a.splice(0, 0, "abc").unwrap();
        let op = a.splice(1, 0, "").unwrap();
        assert!(op.is_empty());
        assert_eq!(a.text(), "abc");
    }

    #[test]
    fn test_snapshot_round_trip_preserves_log() {
        let mut a = TextCrdt::new(site(1));
        let op = a.splice(0, 0, "abc").unwrap();
        let restored = TextCrdt::from_snapshot(site(3), a.snapshot());
        assert_eq!(restored.text(), "abc");
        assert_eq!(restored.operation_log().len(), 1);

        let mut restored = restored;
        assert!(restored.integrate(&op).unwrap().is_empty());
    }

    #[test]
    fn test_multiline_changes_report_points() {
        let mut a = TextCrdt::new(site(1));
        a.splice(0, 0, "one\ntwo\nthree").unwrap();

        let mut b = TextCrdt::from_snapshot(site(2), a.snapshot());
        let op = a.splice(4, 3, "2").unwrap();
        let changes = b.integrate(&op).unwrap();

        assert_eq!(b.text(), "one\n2\nthree");
        // Delete of "two" then insert of "2", both on row 1.
        assert_eq!(changes.len(), 2);
        assert_eq!(changes[0].old_range.start, Point::new(1, 0));
        assert_eq!(changes[0].old_range.end, Point::new(1, 3));
        assert_eq!(changes[1].old_range, Range::collapsed(Point::new(1, 0)));
        assert_eq!(changes[1].new_text, "2");
    }
}
