// sound_node.rs — Nodes of the leak search graph

use udb_common::mathlib::{vec2_distance, Vec2};

use crate::map::LinedefId;

pub type NodeId = usize;

/// Cost of a node the current attempt has not reached.
pub const UNREACHED: f64 = f64::MAX;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    Start,
    End,
    /// Midpoint of a wall sound can pass through.
    Wall(LinedefId),
}

#[derive(Debug, Clone)]
pub struct SoundNode {
    kind: NodeKind,
    position: Vec2,
    pub(crate) neighbors: Vec<NodeId>,
    /// Straight-line distance to the end node, fixed at construction.
    h: f64,
    blocking: bool,

    // search state
    pub(crate) g: f64,
    pub(crate) f: f64,
    pub(crate) from: Option<NodeId>,
    pub(crate) skip: bool,
}

impl SoundNode {
    pub fn new(kind: NodeKind, position: Vec2, destination: &Vec2, blocking: bool) -> Self {
        Self {
            kind,
            position,
            neighbors: Vec::new(),
            h: vec2_distance(&position, destination),
            blocking,
            g: UNREACHED,
            f: UNREACHED,
            from: None,
            skip: false,
        }
    }

    pub fn kind(&self) -> NodeKind {
        self.kind
    }

    /// The wall this node sits on, None for the start and end nodes.
    pub fn linedef(&self) -> Option<LinedefId> {
        match self.kind {
            NodeKind::Wall(line) => Some(line),
            _ => None,
        }
    }

    pub fn position(&self) -> Vec2 {
        self.position
    }

    pub fn neighbors(&self) -> &[NodeId] {
        &self.neighbors
    }

    pub fn g(&self) -> f64 {
        self.g
    }

    pub fn h(&self) -> f64 {
        self.h
    }

    pub fn f(&self) -> f64 {
        self.f
    }

    /// Node the current best path arrives from.
    pub fn from(&self) -> Option<NodeId> {
        self.from
    }

    pub fn is_blocking(&self) -> bool {
        self.blocking
    }

    /// Excluded from the remaining attempts of the current search.
    pub fn is_skip(&self) -> bool {
        self.skip
    }

    pub fn is_reached(&self) -> bool {
        self.g != UNREACHED
    }

    pub fn distance_to(&self, other: &SoundNode) -> f64 {
        vec2_distance(&self.position, &other.position)
    }

    /// Forget the path found so far. H and the skip flag are kept.
    pub fn reset(&mut self) {
        self.g = UNREACHED;
        self.f = UNREACHED;
        self.from = None;
    }

    /// Make this the origin of a new attempt.
    pub(crate) fn seed(&mut self) {
        self.g = 0.0;
        self.f = self.h;
        self.from = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_heuristic_is_distance_to_destination() {
        let n = SoundNode::new(NodeKind::Wall(3), [0.0, 0.0], &[3.0, 4.0], true);
        assert_eq!(n.h(), 5.0);
        assert_eq!(n.linedef(), Some(3));
        assert!(n.is_blocking());
        assert!(!n.is_reached());
    }

    #[test]
    fn test_reset_keeps_heuristic_and_skip() {
        let mut n = SoundNode::new(NodeKind::Start, [0.0, 0.0], &[0.0, 10.0], false);
        n.seed();
        assert_eq!((n.g(), n.f()), (0.0, 10.0));
        n.skip = true;
        n.from = Some(4);
        n.reset();
        assert!(!n.is_reached());
        assert_eq!(n.f(), UNREACHED);
        assert_eq!(n.from(), None);
        assert_eq!(n.h(), 10.0);
        assert!(n.is_skip());
        assert_eq!(n.linedef(), None);
    }
}
