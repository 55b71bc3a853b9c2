// leak_finder.rs — A* search for sound leaks across at most one blocking wall
//
// Sound in Doom passes one sound-blocking line but not two. The search
// graph has a node at the midpoint of every wall sound can pass, plus a
// start and an end node at the query points. Two walls are neighbours when
// they border a common sector.
//
// Plain A* cannot express "at most one blocker per path", because whether a
// blocker may be entered depends on the whole path so far. When an attempt
// runs dry, every blocker it reached is excluded and the search starts
// over, until a path is found or no untried blocker remains.

use std::cmp::Reverse;
use std::collections::{BTreeSet, BinaryHeap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};

use rayon::prelude::*;
use thiserror::Error;
use tracing::debug;

use udb_common::mathlib::Vec2;

use crate::map::{LinedefId, MapSet, SectorId};
use crate::sound_node::{NodeId, NodeKind, SoundNode};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LeakFinderError {
    #[error("sector {sector} does not exist")]
    UnknownSector { sector: SectorId },

    #[error("sound propagation domain does not contain sector {sector}")]
    SectorNotInDomain { sector: SectorId },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchOutcome {
    Found,
    /// Every way through was tried. Not an error: there is no leak.
    Exhausted,
    Cancelled,
}

enum Attempt {
    Found,
    Failed,
    Cancelled,
}

pub struct LeakFinder {
    nodes: Vec<SoundNode>,
    line_nodes: HashMap<LinedefId, NodeId>,
    blocking_count: usize,
    outcome: Option<SearchOutcome>,
}

impl LeakFinder {
    pub const START: NodeId = 0;
    pub const END: NodeId = 1;

    /// Below this many wall nodes neighbour lists are built sequentially.
    const PARALLEL_NEIGHBOR_THRESHOLD: usize = 256;
    /// Expansions between two looks at the cancellation flag.
    const CANCEL_CHECK_INTERVAL: usize = 1024;

    /// Build the search graph over `domain`, with height occlusion taken
    /// from the sector heights.
    pub fn new(
        map: &MapSet,
        source: SectorId,
        source_position: Vec2,
        destination: SectorId,
        destination_position: Vec2,
        domain: &BTreeSet<SectorId>,
    ) -> Result<Self, LeakFinderError> {
        Self::with_occlusion(map, source, source_position, destination, destination_position, domain, |m, line| {
            m.is_sound_blocked_by_height(line)
        })
    }

    /// Like `new`, with a caller supplied height occlusion test.
    pub fn with_occlusion<F>(
        map: &MapSet,
        source: SectorId,
        source_position: Vec2,
        destination: SectorId,
        destination_position: Vec2,
        domain: &BTreeSet<SectorId>,
        occluded: F,
    ) -> Result<Self, LeakFinderError>
    where
        F: Fn(&MapSet, LinedefId) -> bool + Sync,
    {
        for sector in [source, destination] {
            if sector >= map.sector_count() {
                return Err(LeakFinderError::UnknownSector { sector });
            }
            if !domain.contains(&sector) {
                return Err(LeakFinderError::SectorNotInDomain { sector });
            }
        }

        let valid: Vec<bool> = (0..map.linedefs.len())
            .map(|line| match (map.front_sector(line), map.back_sector(line)) {
                (Some(front), Some(back)) => {
                    front != back && domain.contains(&front) && domain.contains(&back) && !occluded(map, line)
                }
                _ => false,
            })
            .collect();

        let mut finder = LeakFinder {
            nodes: vec![
                SoundNode::new(NodeKind::Start, source_position, &destination_position, false),
                SoundNode::new(NodeKind::End, destination_position, &destination_position, false),
            ],
            line_nodes: HashMap::new(),
            blocking_count: 0,
            outcome: None,
        };

        for &sector in domain {
            for line in map.sector_lines(sector) {
                if valid.get(line) != Some(&true) || finder.line_nodes.contains_key(&line) {
                    continue;
                }
                let blocking = map.linedef(line).is_some_and(|ld| ld.blocks_sound());
                let node = SoundNode::new(NodeKind::Wall(line), map.midpoint(line), &destination_position, blocking);
                finder.line_nodes.insert(line, finder.nodes.len());
                finder.nodes.push(node);
            }
        }
        finder.blocking_count = finder.nodes.iter().filter(|n| n.is_blocking()).count();

        finder.build_neighbors(map, &valid);
        finder.connect_endpoint(map, Self::START, source, &valid);
        finder.connect_endpoint(map, Self::END, destination, &valid);
        if source == destination {
            finder.nodes[Self::START].neighbors.push(Self::END);
            finder.nodes[Self::END].neighbors.push(Self::START);
        }

        debug!(
            nodes = finder.nodes.len(),
            interconnections = finder.interconnections(),
            blocking = finder.blocking_count,
            "leak finder graph built"
        );
        Ok(finder)
    }

    /// Every wall node's neighbours are the other passable walls of its
    /// two sectors. Each list only depends on the map, so they are
    /// computed independently.
    fn build_neighbors(&mut self, map: &MapSet, valid: &[bool]) {
        let walls: Vec<(NodeId, LinedefId)> =
            self.nodes.iter().enumerate().filter_map(|(id, n)| n.linedef().map(|line| (id, line))).collect();

        let line_nodes = &self.line_nodes;
        let neighbors_of = |&(_, line): &(NodeId, LinedefId)| -> Vec<NodeId> {
            let mut list: Vec<NodeId> = [map.front_sector(line), map.back_sector(line)]
                .into_iter()
                .flatten()
                .flat_map(|sector| map.sector_lines(sector))
                .filter(|&other| other != line && valid.get(other) == Some(&true))
                .filter_map(|other| line_nodes.get(&other).copied())
                .collect();
            list.sort_unstable();
            list.dedup();
            list
        };

        let lists: Vec<Vec<NodeId>> = if walls.len() >= Self::PARALLEL_NEIGHBOR_THRESHOLD {
            walls.par_iter().map(neighbors_of).collect()
        } else {
            walls.iter().map(neighbors_of).collect()
        };

        for ((id, _), list) in walls.into_iter().zip(lists) {
            self.nodes[id].neighbors = list;
        }
    }

    fn connect_endpoint(&mut self, map: &MapSet, endpoint: NodeId, sector: SectorId, valid: &[bool]) {
        let lines: BTreeSet<LinedefId> = map.sector_lines(sector).filter(|&line| valid.get(line) == Some(&true)).collect();
        for line in lines {
            if let Some(&wall) = self.line_nodes.get(&line) {
                self.nodes[endpoint].neighbors.push(wall);
                self.nodes[wall].neighbors.push(endpoint);
            }
        }
    }

    // ============================================================
    // Search
    // ============================================================

    /// Search until a leak is found or every option is spent.
    pub fn find_leak(&mut self) -> bool {
        let never = AtomicBool::new(false);
        self.find_leak_cancellable(&never) == SearchOutcome::Found
    }

    /// As `find_leak`, giving up once `cancel` is set. The flag is checked
    /// before every attempt and periodically during one.
    pub fn find_leak_cancellable(&mut self, cancel: &AtomicBool) -> SearchOutcome {
        self.outcome = None;
        for n in &mut self.nodes {
            n.skip = false;
            n.reset();
        }

        let mut skipped = 0usize;
        let mut attempt = 0usize;
        loop {
            if cancel.load(Ordering::Relaxed) {
                return self.finish(SearchOutcome::Cancelled);
            }
            attempt += 1;
            self.nodes[Self::START].seed();

            match self.search(cancel) {
                Attempt::Found => {
                    debug!(attempt, "leak found");
                    return self.finish(SearchOutcome::Found);
                }
                Attempt::Cancelled => return self.finish(SearchOutcome::Cancelled),
                Attempt::Failed => {}
            }

            // blockers this attempt reached are ruled out for the next one
            let mut newly_skipped = 0usize;
            for n in &mut self.nodes {
                if n.is_blocking() && !n.skip && n.is_reached() {
                    n.skip = true;
                    newly_skipped += 1;
                }
                n.reset();
            }
            skipped += newly_skipped;
            debug!(attempt, newly_skipped, skipped, total = self.blocking_count, "no path, retrying");

            if newly_skipped == 0 || skipped >= self.blocking_count {
                return self.finish(SearchOutcome::Exhausted);
            }
        }
    }

    fn finish(&mut self, outcome: SearchOutcome) -> SearchOutcome {
        self.outcome = Some(outcome);
        outcome
    }

    /// One A* pass from the seeded start node. Open set entries are keyed
    /// by F; an entry whose F no longer matches its node is stale.
    fn search(&mut self, cancel: &AtomicBool) -> Attempt {
        // non-negative floats order like their bit patterns
        let mut open = BinaryHeap::new();
        open.push(Reverse((self.nodes[Self::START].f.to_bits(), Self::START)));

        let mut expansions = 0usize;
        while let Some(Reverse((f_bits, current))) = open.pop() {
            if self.nodes[current].f.to_bits() != f_bits {
                continue;
            }
            if current == Self::END {
                return Attempt::Found;
            }

            expansions += 1;
            if expansions % Self::CANCEL_CHECK_INTERVAL == 0 && cancel.load(Ordering::Relaxed) {
                return Attempt::Cancelled;
            }

            let blocking_in_path = self.has_blocking_in_path(current);
            let g = self.nodes[current].g;
            for i in 0..self.nodes[current].neighbors.len() {
                let next = self.nodes[current].neighbors[i];
                let step = self.nodes[current].distance_to(&self.nodes[next]);
                let neighbor = &mut self.nodes[next];
                if neighbor.skip || (neighbor.is_blocking() && blocking_in_path) {
                    continue;
                }

                let new_g = g + step;
                if new_g < neighbor.g {
                    neighbor.from = Some(current);
                    neighbor.g = new_g;
                    neighbor.f = new_g + neighbor.h();
                    open.push(Reverse((neighbor.f.to_bits(), next)));
                }
            }
        }
        Attempt::Failed
    }

    /// Whether the current path to `node`, `node` included, already crosses
    /// a blocking wall.
    fn has_blocking_in_path(&self, node: NodeId) -> bool {
        let mut current = node;
        for _ in 0..self.nodes.len() {
            if current == Self::START {
                return false;
            }
            let n = &self.nodes[current];
            if n.is_blocking() {
                return true;
            }
            match n.from {
                Some(prev) => current = prev,
                None => return false,
            }
        }
        false
    }

    // ============================================================
    // Results
    // ============================================================

    /// True once a search ended with a definite answer.
    pub fn finished(&self) -> bool {
        matches!(self.outcome, Some(SearchOutcome::Found | SearchOutcome::Exhausted))
    }

    pub fn outcome(&self) -> Option<SearchOutcome> {
        self.outcome
    }

    /// Node ids of the leak from start to end, empty unless one was found.
    pub fn path(&self) -> Vec<NodeId> {
        if self.outcome != Some(SearchOutcome::Found) {
            return Vec::new();
        }
        let mut path = vec![Self::END];
        let mut current = Self::END;
        while let Some(prev) = self.nodes[current].from {
            path.push(prev);
            current = prev;
            if current == Self::START || path.len() > self.nodes.len() {
                break;
            }
        }
        path.reverse();
        path
    }

    /// Walls the leak passes through, in order.
    pub fn leak_linedefs(&self) -> Vec<LinedefId> {
        self.path().into_iter().filter_map(|id| self.nodes[id].linedef()).collect()
    }

    pub fn node(&self, id: NodeId) -> Option<&SoundNode> {
        self.nodes.get(id)
    }

    pub fn nodes(&self) -> &[SoundNode] {
        &self.nodes
    }

    pub fn node_for_linedef(&self, line: LinedefId) -> Option<NodeId> {
        self.line_nodes.get(&line).copied()
    }

    pub fn blocking_count(&self) -> usize {
        self.blocking_count
    }

    /// Directed neighbour links over all nodes.
    pub fn interconnections(&self) -> usize {
        self.nodes.iter().map(|n| n.neighbors.len()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::whole_map;
    use crate::map::LinedefFlags;

    const CELL: f64 = 64.0;

    /// Sectors in a row along x, one wall between each pair. `blocking[i]`
    /// flags the wall between sector i and i + 1.
    fn corridor(blocking: &[bool]) -> MapSet {
        let mut map = MapSet::new();
        for _ in 0..=blocking.len() {
            map.add_sector(0, 128);
        }
        // closing wall at the far left, one-sided
        let a = map.add_vertex(0.0, 0.0);
        let b = map.add_vertex(0.0, CELL);
        map.add_linedef(a, b, 0, None, LinedefFlags::IMPASSABLE);

        for (i, &block) in blocking.iter().enumerate() {
            let x = (i + 1) as f64 * CELL;
            let a = map.add_vertex(x, 0.0);
            let b = map.add_vertex(x, CELL);
            let flags = if block { LinedefFlags::BLOCK_SOUND } else { LinedefFlags::empty() };
            map.add_linedef(a, b, i, Some(i + 1), flags);
        }
        map
    }

    fn center(sector: usize) -> Vec2 {
        [(sector as f64 + 0.5) * CELL, CELL * 0.5]
    }

    fn finder(map: &MapSet, from: SectorId, to: SectorId) -> LeakFinder {
        LeakFinder::new(map, from, center(from), to, center(to), &whole_map(map)).unwrap()
    }

    #[test]
    fn test_corridor_path() {
        let map = corridor(&[false; 4]);
        let mut lf = finder(&map, 0, 4);
        assert_eq!(lf.nodes().len(), 6);
        assert!(lf.find_leak());
        assert!(lf.finished());

        let path = lf.path();
        assert_eq!(path.len(), 6);
        assert_eq!(path[0], LeakFinder::START);
        assert_eq!(path[5], LeakFinder::END);
        assert_eq!(lf.leak_linedefs(), vec![1, 2, 3, 4]);

        // five links back from the end node to the start node
        let mut hops = 0;
        let mut current = LeakFinder::END;
        while let Some(prev) = lf.node(current).and_then(|n| n.from()) {
            hops += 1;
            current = prev;
        }
        assert_eq!(hops, 5);
        assert!((lf.node(LeakFinder::END).unwrap().g() - 256.0).abs() < 1e-9);
    }

    #[test]
    fn test_single_blocker_is_allowed() {
        let map = corridor(&[true]);
        let mut lf = finder(&map, 0, 1);
        assert_eq!(lf.blocking_count(), 1);
        assert!(lf.find_leak());
        assert_eq!(lf.leak_linedefs(), vec![1]);
    }

    #[test]
    fn test_two_blockers_in_a_row_stop_sound() {
        let map = corridor(&[true, false, true]);
        let mut lf = finder(&map, 0, 3);
        assert!(!lf.find_leak());
        assert!(lf.finished());
        assert_eq!(lf.outcome(), Some(SearchOutcome::Exhausted));
        assert!(lf.path().is_empty());
    }

    #[test]
    fn test_retry_finds_detour() {
        // A #w1 B |w2 C #w3 D, plus a long non-blocking wall w4 between A and B.
        let mut map = corridor(&[true, false, true]);
        let a = map.add_vertex(CELL, 500.0);
        let b = map.add_vertex(CELL, 564.0);
        let w4 = map.add_linedef(a, b, 0, Some(1), LinedefFlags::empty());

        let mut lf = finder(&map, 0, 3);
        assert!(lf.find_leak());
        assert_eq!(lf.leak_linedefs(), vec![w4, 2, 3]);
        // the short way in was ruled out by the first attempt
        assert!(lf.node(lf.node_for_linedef(1).unwrap()).unwrap().is_skip());

        // a second search starts from scratch and agrees
        let first = lf.path();
        assert!(lf.find_leak());
        assert_eq!(lf.path(), first);
    }

    #[test]
    fn test_destination_outside_domain() {
        let map = corridor(&[false, false]);
        let domain = BTreeSet::from([0, 1]);
        let err = LeakFinder::new(&map, 0, center(0), 2, center(2), &domain).err();
        assert_eq!(err, Some(LeakFinderError::SectorNotInDomain { sector: 2 }));

        let err = LeakFinder::new(&map, 7, center(0), 2, center(2), &whole_map(&map)).err();
        assert_eq!(err, Some(LeakFinderError::UnknownSector { sector: 7 }));
    }

    #[test]
    fn test_domain_limits_walls() {
        let map = corridor(&[false, false, false]);
        let domain = BTreeSet::from([0, 1, 2]);
        let mut lf = LeakFinder::new(&map, 0, center(0), 1, center(1), &domain).unwrap();
        // the wall into sector 3 has a side outside the domain
        assert!(lf.node_for_linedef(3).is_none());
        assert_eq!(lf.nodes().len(), 4);
        assert!(lf.find_leak());
    }

    #[test]
    fn test_height_occlusion() {
        let mut map = corridor(&[false, false]);
        map.sectors[1].ceiling_height = map.sectors[1].floor_height;
        let mut lf = finder(&map, 0, 2);
        assert!(!lf.find_leak());
        assert!(lf.finished());

        let map = corridor(&[false, false]);
        let mut lf = LeakFinder::with_occlusion(&map, 0, center(0), 2, center(2), &whole_map(&map), |_, line| {
            line == 2
        })
        .unwrap();
        assert!(lf.node_for_linedef(2).is_none());
        assert!(!lf.find_leak());
    }

    #[test]
    fn test_same_sector() {
        let map = corridor(&[false]);
        let mut lf = finder(&map, 1, 1);
        assert!(lf.find_leak());
        assert_eq!(lf.path(), vec![LeakFinder::START, LeakFinder::END]);
        assert!(lf.leak_linedefs().is_empty());
    }

    #[test]
    fn test_cancelled_before_start() {
        let map = corridor(&[false; 3]);
        let mut lf = finder(&map, 0, 3);
        let cancel = AtomicBool::new(true);
        assert_eq!(lf.find_leak_cancellable(&cancel), SearchOutcome::Cancelled);
        assert!(!lf.finished());
        assert!(lf.path().is_empty());
    }

    #[test]
    fn test_large_grid_builds_in_parallel() {
        // 20 x 20 open grid: well above the parallel threshold
        let n = 20usize;
        let mut map = MapSet::new();
        for _ in 0..n * n {
            map.add_sector(0, 128);
        }
        for r in 0..n {
            for c in 0..n {
                let s = r * n + c;
                let (x, y) = (c as f64 * CELL, r as f64 * CELL);
                if c + 1 < n {
                    let a = map.add_vertex(x + CELL, y);
                    let b = map.add_vertex(x + CELL, y + CELL);
                    map.add_linedef(a, b, s, Some(s + 1), LinedefFlags::empty());
                }
                if r + 1 < n {
                    let a = map.add_vertex(x, y + CELL);
                    let b = map.add_vertex(x + CELL, y + CELL);
                    map.add_linedef(a, b, s, Some(s + n), LinedefFlags::empty());
                }
            }
        }

        let last = n * n - 1;
        let target = [(n as f64 - 0.5) * CELL, (n as f64 - 0.5) * CELL];
        let mut lf = LeakFinder::new(&map, 0, [32.0, 32.0], last, target, &whole_map(&map)).unwrap();
        assert_eq!(lf.nodes().len(), 2 + 2 * n * (n - 1));
        // every wall node sees the other walls of both its sectors
        for node in &lf.nodes()[2..] {
            assert!(node.neighbors().len() >= 3, "{:?}", node);
        }
        assert!(lf.find_leak());
        // Manhattan moves through 2 * (n - 1) walls
        assert_eq!(lf.leak_linedefs().len(), 2 * (n - 1));
    }
}
