// udb-soundprop — sound propagation over Doom-format map geometry
//
// `domain` computes which sectors hear each other, `leak_finder` searches
// for a path that carries sound across at most one sound-blocking line.

pub mod domain;
pub mod leak_finder;
pub mod map;
pub mod sound_node;

pub use domain::{blocking_boundary, propagation_domain, whole_map};
pub use leak_finder::{LeakFinder, LeakFinderError, SearchOutcome};
pub use map::{LinedefFlags, LinedefId, MapError, MapSet, SectorId, SidedefId};
pub use sound_node::{NodeId, NodeKind, SoundNode};
