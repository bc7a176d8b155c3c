//! Time-ordered snapshot collection.
//!
//! A slab of doubly-linked nodes plus an identity index: `add` keeps the
//! head..tail chain strictly ascending, `del` unlinks in O(1) given the
//! identity, and both iteration directions walk the links with no
//! allocation per element. The linked order is load-bearing: adjacency
//! grouping and range deletions depend on it.

use std::collections::HashMap;
use std::fmt;

use super::policy::Policy;
use super::snapshot::Snapshot;

#[derive(Clone)]
struct Node {
    prev: Option<usize>,
    next: Option<usize>,
    snap: Snapshot,
}

#[derive(Clone, Default)]
pub struct SnapshotSet {
    slots: Vec<Option<Node>>,
    free: Vec<usize>,
    index: HashMap<String, usize>,
    head: Option<usize>,
    tail: Option<usize>,
}

impl SnapshotSet {
    pub fn new() -> Self {
        SnapshotSet::default()
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn has(&self, snap: &Snapshot) -> bool {
        self.index.contains_key(&snap.id())
    }

    /// Oldest member, or `None` when empty.
    pub fn oldest(&self) -> Option<&Snapshot> {
        self.head.map(|idx| &self.node(idx).snap)
    }

    /// Newest member, or `None` when empty.
    pub fn newest(&self) -> Option<&Snapshot> {
        self.tail.map(|idx| &self.node(idx).snap)
    }

    /// Insert `snap` at its ordered position. Idempotent on identity.
    pub fn add(&mut self, snap: Snapshot) {
        let id = snap.id();
        if self.index.contains_key(&id) {
            return;
        }

        // Empty set: new head and tail.
        let Some(head) = self.head else {
            let idx = self.alloc(Node {
                prev: None,
                next: None,
                snap,
            });
            self.head = Some(idx);
            self.tail = Some(idx);
            self.index.insert(id, idx);
            return;
        };
        let tail = self.tail.expect("non-empty set has a tail");

        // New head.
        if snap.less(&self.node(head).snap) {
            let idx = self.alloc(Node {
                prev: None,
                next: Some(head),
                snap,
            });
            self.node_mut(head).prev = Some(idx);
            self.head = Some(idx);
            self.index.insert(id, idx);
            return;
        }

        // New tail (the common append path).
        if snap.more(&self.node(tail).snap) {
            let idx = self.alloc(Node {
                prev: Some(tail),
                next: None,
                snap,
            });
            self.node_mut(tail).next = Some(idx);
            self.tail = Some(idx);
            self.index.insert(id, idx);
            return;
        }

        // Interior: walk forward to the first member that is not less
        // than `snap` and splice in before it. The tail fast path above
        // guarantees the walk terminates with an insertion.
        let mut cursor = self.node(head).next;
        while let Some(at) = cursor {
            if self.node(at).snap.less(&snap) {
                cursor = self.node(at).next;
                continue;
            }
            let prev = self.node(at).prev.expect("interior node has a prev");
            let idx = self.alloc(Node {
                prev: Some(prev),
                next: Some(at),
                snap,
            });
            self.node_mut(prev).next = Some(idx);
            self.node_mut(at).prev = Some(idx);
            self.index.insert(id, idx);
            return;
        }
    }

    /// Remove `snap` by identity. No-op when absent.
    pub fn del(&mut self, snap: &Snapshot) {
        let Some(idx) = self.index.remove(&snap.id()) else {
            return;
        };
        let node = self.release(idx);
        match node.prev {
            Some(prev) => self.node_mut(prev).next = node.next,
            None => self.head = node.next,
        }
        match node.next {
            Some(next) => self.node_mut(next).prev = node.prev,
            None => self.tail = node.prev,
        }
    }

    /// Ascending iteration, strictly ordered by `(created_at, name)`.
    pub fn iter(&self) -> Iter<'_> {
        Iter {
            set: self,
            cursor: self.head,
        }
    }

    /// Descending iteration.
    pub fn iter_desc(&self) -> IterDesc<'_> {
        IterDesc {
            set: self,
            cursor: self.tail,
        }
    }

    pub fn union(&self, other: &SnapshotSet) -> SnapshotSet {
        let mut out = SnapshotSet::new();
        for snap in self.iter() {
            out.add(snap.clone());
        }
        for snap in other.iter() {
            out.add(snap.clone());
        }
        out
    }

    pub fn intersection(&self, other: &SnapshotSet) -> SnapshotSet {
        let mut out = SnapshotSet::new();
        for snap in self.iter() {
            if other.has(snap) {
                out.add(snap.clone());
            }
        }
        out
    }

    /// Members of `self` not in `other`.
    pub fn difference(&self, other: &SnapshotSet) -> SnapshotSet {
        let mut out = SnapshotSet::new();
        for snap in self.iter() {
            if !other.has(snap) {
                out.add(snap.clone());
            }
        }
        out
    }

    /// Select the N most-recent snapshots of each kind named by `policy`,
    /// walking newest-first. Kinds absent from the policy never match.
    pub fn matching_policy(&self, policy: &Policy) -> SnapshotSet {
        let mut accum: HashMap<&str, u32> = HashMap::new();
        let mut kept = SnapshotSet::new();
        for snap in self.iter_desc() {
            let kind = snap.kind();
            let Some(target) = policy.keep_count(kind) else {
                continue;
            };
            let seen = accum.entry(kind).or_insert(0);
            if *seen < target {
                *seen += 1;
                kept.add(snap.clone());
            }
        }
        kept
    }

    /// Other members sharing `snap`'s creation time. These exist because
    /// two policy kinds can fire at the same instant.
    pub fn duplicates_at(&self, snap: &Snapshot) -> Vec<&Snapshot> {
        self.iter()
            .filter(|member| member.created_at == snap.created_at && member.id() != snap.id())
            .collect()
    }

    /// Partition `subset` into maximal runs contiguous in `self`'s order.
    ///
    /// A run breaks at any member of `self` outside `subset`. A subset
    /// member with a co-timestamped sibling that is NOT in `subset` closes
    /// the open run and becomes a singleton: a range deletion sweeps every
    /// snapshot between its endpoints by timestamp, so such ties must be
    /// deleted individually.
    pub fn group_by_adjacency(&self, subset: &SnapshotSet) -> Vec<SnapshotSet> {
        if subset.is_empty() {
            return Vec::new();
        }

        let mut groups = Vec::new();
        let mut group: Option<SnapshotSet> = None;

        'walk: for candidate in self.iter() {
            if subset.has(candidate) {
                for dupe in self.duplicates_at(candidate) {
                    if !subset.has(dupe) {
                        if let Some(open) = group.take() {
                            groups.push(open);
                        }
                        let mut solo = SnapshotSet::new();
                        solo.add(candidate.clone());
                        groups.push(solo);
                        continue 'walk;
                    }
                }
                group
                    .get_or_insert_with(SnapshotSet::new)
                    .add(candidate.clone());
            } else if let Some(open) = group.take() {
                groups.push(open);
            }
        }
        if let Some(open) = group {
            groups.push(open);
        }
        groups
    }

    /// Stable textual diff against `other`: members of the union in
    /// ascending order, annotated ` ` (both), `-` (here only), `+`
    /// (there only).
    pub fn diff(&self, prefix: &str, other: &SnapshotSet) -> String {
        let removed = self.difference(other);
        let added = other.difference(self);

        let mut out = String::new();
        for snap in self.union(other).iter() {
            let sigil = if removed.has(snap) {
                '-'
            } else if added.has(snap) {
                '+'
            } else {
                ' '
            };
            out.push_str(&format!("{prefix}{sigil} {}\n", snap.id()));
        }
        out
    }

    fn node(&self, idx: usize) -> &Node {
        self.slots[idx].as_ref().expect("linked slot is occupied")
    }

    fn node_mut(&mut self, idx: usize) -> &mut Node {
        self.slots[idx].as_mut().expect("linked slot is occupied")
    }

    fn alloc(&mut self, node: Node) -> usize {
        match self.free.pop() {
            Some(idx) => {
                self.slots[idx] = Some(node);
                idx
            }
            None => {
                self.slots.push(Some(node));
                self.slots.len() - 1
            }
        }
    }

    fn release(&mut self, idx: usize) -> Node {
        let node = self.slots[idx].take().expect("released slot was occupied");
        self.free.push(idx);
        node
    }
}

impl PartialEq for SnapshotSet {
    fn eq(&self, other: &Self) -> bool {
        self.len() == other.len()
            && self
                .iter()
                .zip(other.iter())
                .all(|(a, b)| a.id() == b.id())
    }
}

impl Eq for SnapshotSet {}

impl fmt::Debug for SnapshotSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.iter().map(Snapshot::id)).finish()
    }
}

impl fmt::Display for SnapshotSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.newest() {
            Some(newest) => write!(f, "{} snaps, newest {}", self.len(), newest.name),
            None => write!(f, "0 snaps"),
        }
    }
}

impl FromIterator<Snapshot> for SnapshotSet {
    fn from_iter<I: IntoIterator<Item = Snapshot>>(iter: I) -> Self {
        let mut set = SnapshotSet::new();
        for snap in iter {
            set.add(snap);
        }
        set
    }
}

impl Extend<Snapshot> for SnapshotSet {
    fn extend<I: IntoIterator<Item = Snapshot>>(&mut self, iter: I) {
        for snap in iter {
            self.add(snap);
        }
    }
}

impl<'a> IntoIterator for &'a SnapshotSet {
    type Item = &'a Snapshot;
    type IntoIter = Iter<'a>;

    fn into_iter(self) -> Iter<'a> {
        self.iter()
    }
}

pub struct Iter<'a> {
    set: &'a SnapshotSet,
    cursor: Option<usize>,
}

impl<'a> Iterator for Iter<'a> {
    type Item = &'a Snapshot;

    fn next(&mut self) -> Option<&'a Snapshot> {
        let idx = self.cursor?;
        let node = self.set.node(idx);
        self.cursor = node.next;
        Some(&node.snap)
    }
}

pub struct IterDesc<'a> {
    set: &'a SnapshotSet,
    cursor: Option<usize>,
}

impl<'a> Iterator for IterDesc<'a> {
    type Item = &'a Snapshot;

    fn next(&mut self) -> Option<&'a Snapshot> {
        let idx = self.cursor?;
        let node = self.set.node(idx);
        self.cursor = node.prev;
        Some(&node.snap)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::DatasetName;

    fn snap(name: &str, at: i64) -> Snapshot {
        Snapshot::new(DatasetName::new("/tank"), name, at)
    }

    fn names<'a>(iter: impl Iterator<Item = &'a Snapshot>) -> Vec<&'a str> {
        iter.map(|s| s.name.as_str()).collect()
    }

    #[test]
    fn add_maintains_order_from_every_direction() {
        let mut set = SnapshotSet::new();
        set.add(snap("snap1", 1));
        assert_eq!(set.len(), 1);

        // before head
        set.add(snap("snap0", 0));
        assert_eq!(set.oldest().map(|s| s.name.as_str()), Some("snap0"));

        // after tail
        set.add(snap("snap3", 3));
        assert_eq!(set.newest().map(|s| s.name.as_str()), Some("snap3"));

        // interior
        set.add(snap("snap2", 2));
        assert_eq!(names(set.iter()), ["snap0", "snap1", "snap2", "snap3"]);
        assert_eq!(
            names(set.iter_desc()),
            ["snap3", "snap2", "snap1", "snap0"]
        );
    }

    #[test]
    fn add_is_idempotent_on_identity() {
        let mut set = SnapshotSet::new();
        set.add(snap("snap1", 1));
        set.add(snap("snap1", 1));
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn del_relinks_head_tail_and_interior() {
        let mut set: SnapshotSet = [snap("a", 1), snap("b", 2), snap("c", 3)]
            .into_iter()
            .collect();

        set.del(&snap("a", 1));
        assert_eq!(set.oldest().map(|s| s.name.as_str()), Some("b"));

        set.del(&snap("c", 3));
        assert_eq!(set.newest().map(|s| s.name.as_str()), Some("b"));

        set.del(&snap("b", 2));
        assert_eq!(set.len(), 0);
        assert!(set.oldest().is_none());

        // deleting an absent member is a no-op
        set.del(&snap("nothing", 9));
        assert_eq!(set.len(), 0);
    }

    #[test]
    fn slab_reuses_released_slots() {
        let mut set = SnapshotSet::new();
        for round in 0..3 {
            for i in 0..4 {
                set.add(snap(&format!("s{i}"), i));
            }
            assert_eq!(set.len(), 4, "round {round}");
            for i in 0..4 {
                set.del(&snap(&format!("s{i}"), i));
            }
        }
        assert!(set.slots.len() <= 4);
    }

    #[test]
    fn iteration_is_total_and_strictly_ordered() {
        let set: SnapshotSet = [
            snap("d", 4),
            snap("a", 1),
            snap("c", 3),
            snap("b", 2),
            snap("e", 5),
        ]
        .into_iter()
        .collect();

        let forward: Vec<_> = set.iter().collect();
        assert_eq!(forward.len(), set.len());
        for pair in forward.windows(2) {
            assert!(pair[0].less(pair[1]));
        }

        let mut backward: Vec<_> = set.iter_desc().collect();
        backward.reverse();
        assert_eq!(names(forward.into_iter()), names(backward.into_iter()));
    }

    #[test]
    fn algebra_laws_hold() {
        let a: SnapshotSet = [snap("a", 1), snap("b", 2), snap("c", 3)]
            .into_iter()
            .collect();
        let b: SnapshotSet = [snap("b", 2), snap("d", 4)].into_iter().collect();

        assert_eq!(a.union(&b), b.union(&a));
        assert!(a.difference(&b).intersection(&b).is_empty());
        assert_eq!(
            a.union(&b).len(),
            a.len() + b.len() - a.intersection(&b).len()
        );
        assert_eq!(names(a.intersection(&b).iter()), ["b"]);
        assert_eq!(names(a.difference(&b).iter()), ["a", "c"]);
    }

    #[test]
    fn algebra_results_do_not_alias_inputs() {
        let a: SnapshotSet = [snap("a", 1)].into_iter().collect();
        let b: SnapshotSet = [snap("b", 2)].into_iter().collect();
        let mut u = a.union(&b);
        u.del(&snap("a", 1));
        assert!(a.has(&snap("a", 1)));
    }

    #[test]
    fn matching_policy_keeps_most_recent_per_kind() {
        let set: SnapshotSet = [
            snap("hourly-1", 1),
            snap("daily-1", 2),
            snap("hourly-2", 3),
            snap("hourly-3", 4),
            snap("daily-2", 5),
            snap("weekly-1", 6),
        ]
        .into_iter()
        .collect();

        let mut policy = Policy::new();
        policy.set("hourly", 2);
        policy.set("daily", 1);

        let kept = set.matching_policy(&policy);
        assert_eq!(names(kept.iter()), ["hourly-2", "hourly-3", "daily-2"]);
    }

    #[test]
    fn duplicates_at_finds_co_timestamped_members() {
        let set: SnapshotSet = [
            snap("daily-x", 5),
            snap("hourly-x", 5),
            snap("hourly-y", 6),
        ]
        .into_iter()
        .collect();

        let dupes = set.duplicates_at(&snap("daily-x", 5));
        assert_eq!(names(dupes.into_iter()), ["hourly-x"]);
        assert!(set.duplicates_at(&snap("hourly-y", 6)).is_empty());
    }

    #[test]
    fn group_by_adjacency_splits_on_gaps() {
        let host: SnapshotSet = [snap("a", 1), snap("b", 2), snap("c", 3), snap("d", 4)]
            .into_iter()
            .collect();
        let subset: SnapshotSet = [snap("a", 1), snap("b", 2), snap("d", 4)]
            .into_iter()
            .collect();

        let groups = host.group_by_adjacency(&subset);
        assert_eq!(groups.len(), 2);
        assert_eq!(names(groups[0].iter()), ["a", "b"]);
        assert_eq!(names(groups[1].iter()), ["d"]);
    }

    #[test]
    fn group_by_adjacency_isolates_kept_siblings() {
        // hourly-x shares a timestamp with daily-x, which stays. The run
        // must not sweep it into a range.
        let host: SnapshotSet = [
            snap("a", 1),
            snap("daily-x", 2),
            snap("hourly-x", 2),
            snap("b", 3),
        ]
        .into_iter()
        .collect();
        let subset: SnapshotSet = [snap("a", 1), snap("hourly-x", 2), snap("b", 3)]
            .into_iter()
            .collect();

        let groups = host.group_by_adjacency(&subset);
        assert_eq!(groups.len(), 3);
        assert_eq!(names(groups[0].iter()), ["a"]);
        assert_eq!(names(groups[1].iter()), ["hourly-x"]);
        assert_eq!(names(groups[2].iter()), ["b"]);
    }

    #[test]
    fn group_by_adjacency_of_empty_subset_is_empty() {
        let host: SnapshotSet = [snap("a", 1)].into_iter().collect();
        assert!(host.group_by_adjacency(&SnapshotSet::new()).is_empty());
    }

    #[test]
    fn diff_annotates_membership() {
        let a: SnapshotSet = [snap("a", 1), snap("b", 2)].into_iter().collect();
        let b: SnapshotSet = [snap("b", 2), snap("c", 3)].into_iter().collect();

        let diff = a.diff("  ", &b);
        assert_eq!(diff, "  - /tank@a\n    /tank@b\n  + /tank@c\n");
    }
}
