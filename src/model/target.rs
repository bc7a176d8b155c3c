//! Target-inventory synthesis.
//!
//! Combines the two retention policies and the cross-side transfer
//! constraints into the inventory we want to reach. The target is the
//! union of four inclusion rules; everything not included is a deletion
//! candidate on whichever side holds it. Nothing is ever fabricated:
//! every target member already exists on some side.

use super::inventory::Inventory;
use super::policy::Policy;

pub fn target_inventory(
    current: &Inventory,
    local_policy: &Policy,
    remote_policy: &Policy,
) -> Inventory {
    let local = &current.local;
    let remote = &current.remote;

    let shared = local.intersection(remote);
    let all = local.union(remote);

    let mut target = Inventory::default();

    // 1. Local policy retention. A snapshot that matches but is no longer
    // on local is already lost; never back-fill the source side.
    for snap in all.matching_policy(local_policy).iter() {
        if local.has(snap) {
            target.local.add(snap.clone());
        }
    }

    // 2. Remote policy retention. A match missing from the remote can
    // still be sent as long as it is not older than the remote tip
    // (incremental sends only move forward). Keeping the source copy on
    // local preserves the base for that future send.
    for snap in all.matching_policy(remote_policy).iter() {
        if !local.has(snap) {
            continue;
        }
        if remote.has(snap) {
            target.remote.add(snap.clone());
            continue;
        }
        if let Some(tip) = remote.newest() {
            if snap.created_at < tip.created_at {
                continue;
            }
        }
        target.local.add(snap.clone());
        target.remote.add(snap.clone());
    }

    // 3. Each side keeps its oldest snapshot.
    if let Some(snap) = local.oldest() {
        target.local.add(snap.clone());
    }
    if let Some(snap) = remote.oldest() {
        target.remote.add(snap.clone());
    }

    // 4. Shared anchors: the oldest and newest snapshot present on both
    // sides stay on both sides. The newest shared one is the high-water
    // mark every future incremental send builds on.
    if let Some(snap) = shared.oldest() {
        target.local.add(snap.clone());
        target.remote.add(snap.clone());
    }
    if let Some(snap) = shared.newest() {
        target.local.add(snap.clone());
        target.remote.add(snap.clone());
    }

    target
}
