// In-memory state for one coordinator: outstanding leases and completed
// tiles for the levels it owns. This is the concurrency hot spot; every
// operation acquires the board's internal mutex.

mod registry;

use std::collections::HashSet;
use std::sync::Mutex;

use thiserror::Error;
use tilecoord_core::{Coord, IndexEntry, Lease};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("level {0} is already owned by another Leaseboard")]
    LevelAlreadyOwned(u32),
}

/// One level this coordinator is responsible for distributing, and the
/// `maxDepth` advertised to workers for it.
#[derive(Clone, Copy, Debug)]
pub struct OwnedLevel {
    pub level: u32,
    pub max_depth: u32,
}

struct Inner {
    // A literal `set<Lease>` (spec.md §4.4), not a `Coord`-keyed map: a
    // `coord` may legitimately have more than one entry here (a stale,
    // expired lease alongside a fresh one granted once the first expired),
    // and resolution always goes through `Lease::matches` rather than
    // `Coord` equality alone (spec.md §9, "Cyclic ownership").
    outstanding: Vec<Lease>,
    completed: HashSet<Coord>,
}

/// Outstanding leases and completed tiles for a fixed partition of levels.
pub struct Leaseboard {
    owned_levels: Vec<OwnedLevel>,
    lease_ttl_ms: u64,
    inner: Mutex<Inner>,
}

impl Leaseboard {
    /// Construct a board for `owned_levels`, seeding `Completed` from
    /// `seed_entries` (the owned-level index entries read from storage at
    /// startup). Fails if any owned level is already claimed by another
    /// live `Leaseboard` in this process.
    pub fn new(
        owned_levels: Vec<OwnedLevel>,
        lease_ttl_ms: u64,
        seed_entries: &[IndexEntry],
    ) -> Result<Self, ConfigError> {
        let level_ids: Vec<u32> = owned_levels.iter().map(|l| l.level).collect();
        registry::claim(&level_ids).map_err(ConfigError::LevelAlreadyOwned)?;

        let completed = seed_entries.iter().map(|e| e.coord).collect();
        Ok(Leaseboard {
            owned_levels,
            lease_ttl_ms,
            inner: Mutex::new(Inner {
                outstanding: Vec::new(),
                completed,
            }),
        })
    }

    pub fn owned_levels(&self) -> &[OwnedLevel] {
        &self.owned_levels
    }

    pub fn max_depth_for(&self, level: u32) -> Option<u32> {
        self.owned_levels
            .iter()
            .find(|l| l.level == level)
            .map(|l| l.max_depth)
    }

    /// The first coord, in `level` config order then `iReal` then `iImag`
    /// ascending, that is neither completed nor held by a non-expired
    /// lease.
    pub fn next_needed(&self, now_ms: u64) -> Option<Coord> {
        let inner = self.inner.lock().unwrap();
        Self::first_needed(&self.owned_levels, &inner, now_ms)
    }

    /// Find the next needed coord and grant its lease atomically under one
    /// lock acquisition, so two callers racing `next_needed` + `grant` as
    /// separate steps can never both be handed the same coord (spec.md §1,
    /// §5: "each coord is leased to at most one worker at a time"). Returns
    /// the coord together with the `maxDepth` advertised for its level.
    pub fn lease_next(&self, now_ms: u64) -> Option<(Coord, Option<u32>)> {
        let mut inner = self.inner.lock().unwrap();
        let coord = Self::first_needed(&self.owned_levels, &inner, now_ms)?;
        let max_depth = self
            .owned_levels
            .iter()
            .find(|l| l.level == coord.level)
            .map(|l| l.max_depth);
        inner
            .outstanding
            .push(Lease::new(coord, max_depth, now_ms + self.lease_ttl_ms));
        tracing::debug!(?coord, "granted lease");
        Some((coord, max_depth))
    }

    fn first_needed(owned_levels: &[OwnedLevel], inner: &Inner, now_ms: u64) -> Option<Coord> {
        for owned in owned_levels {
            for i_real in 0..owned.level {
                for i_imag in 0..owned.level {
                    let coord = Coord::new(owned.level, i_real, i_imag);
                    if inner.completed.contains(&coord) {
                        continue;
                    }
                    let leased = inner
                        .outstanding
                        .iter()
                        .any(|lease| lease.coord == coord && !lease.is_expired(now_ms));
                    if !leased {
                        return Some(coord);
                    }
                }
            }
        }
        None
    }

    /// Grant a lease on `coord`. Any existing lease on the same coord (it
    /// can only be a since-expired one, or the caller has raced
    /// `next_needed`/`grant` against another caller) is left in place
    /// rather than silently discarded — `Outstanding` can hold more than
    /// one lease per coord, and lookups always resolve via
    /// [`Lease::matches`].
    pub fn grant(&self, coord: Coord, max_depth: Option<u32>, now_ms: u64) -> Lease {
        let lease = Lease::new(coord, max_depth, now_ms + self.lease_ttl_ms);
        let mut inner = self.inner.lock().unwrap();
        inner.outstanding.push(lease.clone());
        tracing::debug!(?coord, "granted lease");
        lease
    }

    /// Accept a returning response. On a match, the matching lease is
    /// removed and the coord moves to `Completed`; any other (necessarily
    /// unrelated or expired) lease on the same coord is untouched.
    pub fn accept(&self, coord: Coord, max_depth: Option<u32>, now_ms: u64) -> bool {
        let mut inner = self.inner.lock().unwrap();
        let position = inner
            .outstanding
            .iter()
            .position(|lease| lease.matches(coord, max_depth, now_ms));
        match position {
            Some(i) => {
                inner.outstanding.remove(i);
                inner.completed.insert(coord);
                tracing::debug!(?coord, "accepted response, coord now completed");
                true
            }
            None => false,
        }
    }

    /// Remove every lease whose deadline has passed as of `now_ms`.
    pub fn sweep(&self, now_ms: u64) {
        let mut inner = self.inner.lock().unwrap();
        let before = inner.outstanding.len();
        inner.outstanding.retain(|lease| !lease.is_expired(now_ms));
        let swept = before - inner.outstanding.len();
        if swept > 0 {
            tracing::debug!(swept, "swept expired leases");
        }
    }

    #[cfg(test)]
    fn completed_len(&self) -> usize {
        self.inner.lock().unwrap().completed.len()
    }

    #[cfg(test)]
    fn outstanding_len(&self) -> usize {
        self.inner.lock().unwrap().outstanding.len()
    }
}

impl Drop for Leaseboard {
    fn drop(&mut self) {
        let level_ids: Vec<u32> = self.owned_levels.iter().map(|l| l.level).collect();
        registry::release(&level_ids);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn board(level: u32, max_depth: u32) -> Leaseboard {
        Leaseboard::new(vec![OwnedLevel { level, max_depth }], 1_000, &[]).unwrap()
    }

    #[test]
    fn next_needed_skips_completed_and_leased_coords() {
        let b = board(60_001, 100);
        let first = b.next_needed(0).unwrap();
        assert_eq!(first, Coord::new(60_001, 0, 0));

        b.grant(first, Some(100), 0);
        let second = b.next_needed(0).unwrap();
        assert_ne!(second, first);
    }

    #[test]
    fn accept_requires_a_live_matching_lease() {
        let b = board(60_002, 100);
        let coord = Coord::new(60_002, 0, 0);
        assert!(!b.accept(coord, Some(100), 0));

        b.grant(coord, Some(100), 0);
        assert!(b.accept(coord, Some(100), 0));
        assert_eq!(b.completed_len(), 1);

        // Already completed, a second accept for the same coord fails.
        assert!(!b.accept(coord, Some(100), 0));
    }

    #[test]
    fn expired_lease_is_rejected_and_reclaimed() {
        let b = Leaseboard::new(
            vec![OwnedLevel {
                level: 60_003,
                max_depth: 100,
            }],
            10,
            &[],
        )
        .unwrap();
        let coord = Coord::new(60_003, 0, 0);
        b.grant(coord, Some(100), 0);

        // Worker B can re-lease the same coord once A's lease has expired.
        assert_eq!(b.next_needed(20), Some(coord));
        assert!(!b.accept(coord, Some(100), 20));

        b.grant(coord, Some(100), 20);
        assert!(b.accept(coord, Some(100), 25));
    }

    #[test]
    fn re_leasing_an_expired_coord_keeps_both_leases_until_resolved() {
        // Mirrors spec.md §8 scenario 3's timeline: Worker A leases `coord`
        // at t=0 with a 10ms TTL; Worker B re-leases the same coord at
        // t=20, once A's lease has expired. A `Coord`-keyed map would have
        // let B's `grant` silently discard A's entry via `insert`, masking
        // whether two leases were ever outstanding for the same coord.
        let b = Leaseboard::new(
            vec![OwnedLevel {
                level: 60_007,
                max_depth: 100,
            }],
            10,
            &[],
        )
        .unwrap();
        let coord = Coord::new(60_007, 0, 0);

        b.grant(coord, Some(100), 0); // Worker A
        assert_eq!(b.outstanding_len(), 1);

        assert_eq!(b.next_needed(20), Some(coord));
        b.grant(coord, Some(100), 20); // Worker B

        // Both leases coexist in Outstanding; A's stale entry was not
        // silently overwritten by B's grant.
        assert_eq!(b.outstanding_len(), 2);

        // Worker B's response, within its own lease window, is accepted —
        // only the matching lease is removed, A's stale one is untouched
        // until the sweeper reclaims it.
        assert!(b.accept(coord, Some(100), 25));
        assert_eq!(b.outstanding_len(), 1);
        assert_eq!(b.completed_len(), 1);

        b.sweep(30);
        assert_eq!(b.outstanding_len(), 0);
    }

    #[test]
    fn sweep_removes_only_expired_leases() {
        let b = Leaseboard::new(
            vec![OwnedLevel {
                level: 60_004,
                max_depth: 100,
            }],
            10,
            &[],
        )
        .unwrap();
        let coord = Coord::new(60_004, 0, 0);
        b.grant(coord, Some(100), 0);
        b.sweep(5);
        assert!(!b.accept(coord, Some(100), 999)); // still expired by 999 anyway, but sweeper shouldn't crash
        b.grant(coord, Some(100), 0);
        b.sweep(20);
        assert!(b.next_needed(20).is_some());
    }

    #[test]
    fn seed_populates_completed_without_leasing() {
        let seed = vec![tilecoord_core::IndexEntry::new(
            Coord::new(60_005, 0, 0),
            tilecoord_core::TileCategory::AllZero,
            None,
        )];
        let b = Leaseboard::new(
            vec![OwnedLevel {
                level: 60_005,
                max_depth: 1,
            }],
            1_000,
            &seed,
        )
        .unwrap();
        assert_eq!(b.next_needed(0), Some(Coord::new(60_005, 0, 1)));
    }

    #[test]
    fn overlapping_owned_levels_are_rejected() {
        let _a = board(60_006, 1);
        assert!(matches!(
            Leaseboard::new(
                vec![OwnedLevel {
                    level: 60_006,
                    max_depth: 1
                }],
                1_000,
                &[]
            ),
            Err(ConfigError::LevelAlreadyOwned(60_006))
        ));
    }

    #[test]
    fn lease_next_is_atomic_under_concurrent_callers() {
        let b = board(60_008, 100);
        let first = b.lease_next(0);
        let second = b.lease_next(0);
        assert!(first.is_some());
        assert!(second.is_some());
        assert_ne!(first.unwrap().0, second.unwrap().0);
        assert_eq!(b.outstanding_len(), 2);
    }
}
