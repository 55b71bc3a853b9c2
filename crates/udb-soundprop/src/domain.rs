// domain.rs — Sound propagation domains
//
// A domain is the set of sectors sound reaches from one sector without
// crossing a sound-blocking line. Lines flagged BLOCK_SOUND on its edge
// are where the domain could leak into a neighbouring one.

use std::collections::BTreeSet;

use crate::map::{LinedefId, MapSet, SectorId};

/// Whether sound can pass the line at all: two-sided, joining two different
/// sectors, not closed off by heights.
pub fn is_passable(map: &MapSet, line: LinedefId) -> bool {
    match (map.front_sector(line), map.back_sector(line)) {
        (Some(front), Some(back)) => front != back && !map.is_sound_blocked_by_height(line),
        _ => false,
    }
}

/// Sector on the far side of `line` as seen from `from`.
pub fn other_sector(map: &MapSet, line: LinedefId, from: SectorId) -> Option<SectorId> {
    let front = map.front_sector(line)?;
    let back = map.back_sector(line)?;
    if front == from {
        Some(back)
    } else if back == from {
        Some(front)
    } else {
        None
    }
}

/// Flood fill from `start` through passable lines that do not block sound.
pub fn propagation_domain(map: &MapSet, start: SectorId) -> BTreeSet<SectorId> {
    let mut domain = BTreeSet::new();
    if start >= map.sector_count() {
        return domain;
    }

    let mut stack = vec![start];
    domain.insert(start);
    while let Some(sector) = stack.pop() {
        for line in map.sector_lines(sector) {
            let blocks = map.linedef(line).map_or(true, |ld| ld.blocks_sound());
            if blocks || !is_passable(map, line) {
                continue;
            }
            if let Some(next) = other_sector(map, line, sector) {
                if domain.insert(next) {
                    stack.push(next);
                }
            }
        }
    }
    domain
}

/// Passable sound-blocking lines with exactly one side in the domain.
pub fn blocking_boundary(map: &MapSet, domain: &BTreeSet<SectorId>) -> Vec<LinedefId> {
    let mut lines = BTreeSet::new();
    for &sector in domain {
        for line in map.sector_lines(sector) {
            let blocks = map.linedef(line).is_some_and(|ld| ld.blocks_sound());
            if !blocks || !is_passable(map, line) {
                continue;
            }
            if let Some(other) = other_sector(map, line, sector) {
                if !domain.contains(&other) {
                    lines.insert(line);
                }
            }
        }
    }
    lines.into_iter().collect()
}

/// Every sector of the map, the widest possible search domain.
pub fn whole_map(map: &MapSet) -> BTreeSet<SectorId> {
    (0..map.sector_count()).collect()
}
