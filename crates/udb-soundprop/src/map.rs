// map.rs — Doom-format map geometry as seen by sound propagation
//
// Only what sound cares about is kept: vertices, linedefs with their flags,
// sidedefs pointing at sectors, and sector floor/ceiling heights. Ids are
// plain indices into the vectors of a `MapSet`.

use bitflags::bitflags;
use serde::{Deserialize, Deserializer};
use thiserror::Error;

use udb_common::mathlib::Vec2;

pub type SectorId = usize;
pub type LinedefId = usize;
pub type SidedefId = usize;
pub type VertexId = usize;

bitflags! {
    /// Doom linedef flags relevant to sound.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct LinedefFlags: u32 {
        const IMPASSABLE = 0x0001;
        const TWO_SIDED = 0x0004;
        const BLOCK_SOUND = 0x0040;
    }
}

fn linedef_flags<'de, D>(deserializer: D) -> Result<LinedefFlags, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(LinedefFlags::from_bits_truncate(u32::deserialize(deserializer)?))
}

#[derive(Error, Debug)]
pub enum MapError {
    #[error("invalid map: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("{owner} {index} refers to missing {what} {target}")]
    BadReference { owner: &'static str, index: usize, what: &'static str, target: usize },
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Sector {
    #[serde(default)]
    pub floor_height: i32,
    #[serde(default = "Sector::default_ceiling")]
    pub ceiling_height: i32,
    /// Sidedefs facing this sector. Derived, see `MapSet::rebuild_sector_sides`.
    #[serde(skip)]
    pub sidedefs: Vec<SidedefId>,
}

impl Sector {
    fn default_ceiling() -> i32 {
        128
    }

    pub fn new(floor_height: i32, ceiling_height: i32) -> Self {
        Self { floor_height, ceiling_height, sidedefs: Vec::new() }
    }

    /// Floor and ceiling meet.
    pub fn is_closed(&self) -> bool {
        self.ceiling_height <= self.floor_height
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Sidedef {
    pub sector: SectorId,
    /// Owning linedef. Derived.
    #[serde(skip)]
    pub line: LinedefId,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Linedef {
    pub start: VertexId,
    pub end: VertexId,
    pub front: SidedefId,
    #[serde(default)]
    pub back: Option<SidedefId>,
    #[serde(default, deserialize_with = "linedef_flags")]
    pub flags: LinedefFlags,
}

impl Linedef {
    pub fn blocks_sound(&self) -> bool {
        self.flags.contains(LinedefFlags::BLOCK_SOUND)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct MapSet {
    pub vertices: Vec<Vec2>,
    pub linedefs: Vec<Linedef>,
    pub sidedefs: Vec<Sidedef>,
    pub sectors: Vec<Sector>,
}

impl MapSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a map from TOML, check every reference and derive the
    /// sector side lists.
    ///
    ///   vertices = [[0, 0], [64, 0], [64, 64], [0, 64]]
    ///   sectors = [{ floor_height = 0, ceiling_height = 128 }]
    ///   sidedefs = [{ sector = 0 }]
    ///   linedefs = [{ start = 0, end = 1, front = 0, flags = 0x40 }]
    pub fn from_toml_str(text: &str) -> Result<MapSet, MapError> {
        let mut map: MapSet = toml::from_str(text)?;
        map.validate()?;
        map.rebuild_sector_sides();
        Ok(map)
    }

    pub fn validate(&self) -> Result<(), MapError> {
        let check = |owner, index, what, target, count| {
            if target < count {
                Ok(())
            } else {
                Err(MapError::BadReference { owner, index, what, target })
            }
        };
        for (i, sd) in self.sidedefs.iter().enumerate() {
            check("sidedef", i, "sector", sd.sector, self.sectors.len())?;
        }
        for (i, ld) in self.linedefs.iter().enumerate() {
            check("linedef", i, "vertex", ld.start, self.vertices.len())?;
            check("linedef", i, "vertex", ld.end, self.vertices.len())?;
            check("linedef", i, "sidedef", ld.front, self.sidedefs.len())?;
            if let Some(back) = ld.back {
                check("linedef", i, "sidedef", back, self.sidedefs.len())?;
            }
        }
        Ok(())
    }

    /// Recompute `Sidedef::line` and every `Sector::sidedefs` list from the
    /// linedefs.
    pub fn rebuild_sector_sides(&mut self) {
        for s in &mut self.sectors {
            s.sidedefs.clear();
        }
        for (li, ld) in self.linedefs.iter().enumerate() {
            for sd in std::iter::once(ld.front).chain(ld.back) {
                if let Some(side) = self.sidedefs.get_mut(sd) {
                    side.line = li;
                    if let Some(sector) = self.sectors.get_mut(side.sector) {
                        sector.sidedefs.push(sd);
                    }
                }
            }
        }
    }

    // ============================================================
    // Building
    // ============================================================

    pub fn add_vertex(&mut self, x: f64, y: f64) -> VertexId {
        self.vertices.push([x, y]);
        self.vertices.len() - 1
    }

    pub fn add_sector(&mut self, floor_height: i32, ceiling_height: i32) -> SectorId {
        self.sectors.push(Sector::new(floor_height, ceiling_height));
        self.sectors.len() - 1
    }

    fn add_sidedef(&mut self, sector: SectorId, line: LinedefId) -> SidedefId {
        self.sidedefs.push(Sidedef { sector, line });
        let id = self.sidedefs.len() - 1;
        if let Some(s) = self.sectors.get_mut(sector) {
            s.sidedefs.push(id);
        }
        id
    }

    /// Add a linedef with new sidedefs. `TWO_SIDED` is set when there is a
    /// back sector.
    pub fn add_linedef(
        &mut self,
        start: VertexId,
        end: VertexId,
        front: SectorId,
        back: Option<SectorId>,
        mut flags: LinedefFlags,
    ) -> LinedefId {
        let id = self.linedefs.len();
        let front = self.add_sidedef(front, id);
        let back = back.map(|b| self.add_sidedef(b, id));
        if back.is_some() {
            flags |= LinedefFlags::TWO_SIDED;
        }
        self.linedefs.push(Linedef { start, end, front, back, flags });
        id
    }

    // ============================================================
    // Queries
    // ============================================================

    pub fn sector_count(&self) -> usize {
        self.sectors.len()
    }

    pub fn linedef(&self, line: LinedefId) -> Option<&Linedef> {
        self.linedefs.get(line)
    }

    pub fn front_sector(&self, line: LinedefId) -> Option<SectorId> {
        let ld = self.linedefs.get(line)?;
        self.sidedefs.get(ld.front).map(|sd| sd.sector)
    }

    pub fn back_sector(&self, line: LinedefId) -> Option<SectorId> {
        let ld = self.linedefs.get(line)?;
        self.sidedefs.get(ld.back?).map(|sd| sd.sector)
    }

    /// Linedefs bordering a sector, once per sidedef.
    pub fn sector_lines(&self, sector: SectorId) -> impl Iterator<Item = LinedefId> + '_ {
        self.sectors
            .get(sector)
            .map(|s| s.sidedefs.as_slice())
            .unwrap_or(&[])
            .iter()
            .filter_map(|&sd| self.sidedefs.get(sd).map(|side| side.line))
    }

    /// Point halfway along the line.
    pub fn midpoint(&self, line: LinedefId) -> Vec2 {
        let Some(ld) = self.linedefs.get(line) else {
            return [0.0, 0.0];
        };
        let a = self.vertices.get(ld.start).copied().unwrap_or_default();
        let b = self.vertices.get(ld.end).copied().unwrap_or_default();
        [(a[0] + b[0]) * 0.5, (a[1] + b[1]) * 0.5]
    }

    /// Sound cannot pass a two-sided line when either sector is closed or
    /// the two sectors' height ranges do not overlap.
    pub fn is_sound_blocked_by_height(&self, line: LinedefId) -> bool {
        let sector = |s: Option<SectorId>| s.and_then(|s| self.sectors.get(s));
        let (Some(s1), Some(s2)) = (sector(self.front_sector(line)), sector(self.back_sector(line))) else {
            return false;
        };
        if s1.is_closed() || s2.is_closed() {
            return true;
        }
        let lowest_ceiling = s1.ceiling_height.min(s2.ceiling_height);
        let highest_floor = s1.floor_height.max(s2.floor_height);
        lowest_ceiling <= highest_floor
    }
}
