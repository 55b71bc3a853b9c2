// mesh.rs — Shared vertex layout, meshes and the per-load result

use bytemuck::{Pod, Zeroable};
use thiserror::Error;

use udb_common::FormatError;

/// Vertex colour meaning "untinted".
pub const WHITE: i32 = -1;

/// Editor world vertex. Every loader produces this layout, so meshes from
/// different formats can be mixed inside one model.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct WorldVertex {
    pub x: f32,
    pub y: f32,
    pub z: f32,
    /// Packed ARGB
    pub c: i32,
    pub u: f32,
    pub v: f32,
    pub nx: f32,
    pub ny: f32,
    pub nz: f32,
}

impl WorldVertex {
    pub fn new(x: f32, y: f32, z: f32, c: i32, u: f32, v: f32) -> Self {
        Self { x, y, z, c, u, v, ..Default::default() }
    }

    /// White vertex at a position, no texture coordinates or normal.
    pub fn at(x: f32, y: f32, z: f32) -> Self {
        Self::new(x, y, z, WHITE, 0.0, 0.0)
    }

    #[inline]
    pub fn position(&self) -> [f32; 3] {
        [self.x, self.y, self.z]
    }

    #[inline]
    pub fn normal(&self) -> [f32; 3] {
        [self.nx, self.ny, self.nz]
    }

    pub fn set_position(&mut self, p: &[f32; 3]) {
        self.x = p[0];
        self.y = p[1];
        self.z = p[2];
    }

    pub fn set_normal(&mut self, n: &[f32; 3]) {
        self.nx = n[0];
        self.ny = n[1];
        self.nz = n[2];
    }
}

/// Indexed triangle list. Immutable once built.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Mesh {
    vertices: Vec<WorldVertex>,
    indices: Vec<u32>,
}

impl Mesh {
    pub fn new(vertices: Vec<WorldVertex>, indices: Vec<u32>) -> Self {
        debug_assert!(indices.len() % 3 == 0, "index count {} is not a multiple of 3", indices.len());
        Self { vertices, indices }
    }

    pub fn vertices(&self) -> &[WorldVertex] {
        &self.vertices
    }

    pub fn indices(&self) -> &[u32] {
        &self.indices
    }

    pub fn triangle_count(&self) -> usize {
        self.indices.len() / 3
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    /// Index count is a multiple of 3 and every index addresses a vertex.
    pub fn is_well_formed(&self) -> bool {
        self.indices.len() % 3 == 0 && self.indices.iter().all(|&i| (i as usize) < self.vertices.len())
    }

    /// Raw vertex data for upload.
    pub fn vertex_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.vertices)
    }
}

/// Why a single model file could not be decoded.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LoadError {
    #[error("unknown header: expected \"{expected}\", but got \"{found}\"")]
    BadMagic { expected: &'static str, found: String },

    #[error("expected {format} version {expected}, but got {found}")]
    BadVersion { format: &'static str, expected: i64, found: i64 },

    #[error("frame {frame} is outside of model's frame range [0..{}]", .count - 1)]
    FrameOutOfRange { frame: i64, count: i64 },

    #[error("unable to find frame \"{0}\"!")]
    FrameNotFound(String),

    #[error("{what} index {index} is out of range (count {count})")]
    IndexOutOfRange { what: &'static str, index: i64, count: usize },

    #[error("Error in line {line}: {message}")]
    ObjLine { line: usize, message: String },

    #[error("unable to find corresponding \"{0}\" file.")]
    MissingCompanion(&'static str),

    #[error("{0}")]
    Format(String),

    #[error(transparent)]
    Stream(#[from] FormatError),
}

pub type LoadResultOf<T> = Result<T, LoadError>;

/// Meshes with their skin names, or the reason the load failed.
///
/// When `errors` is set the meshes and skins are empty and must not be used.
#[derive(Debug, Clone, Default)]
pub struct LoadResult {
    pub meshes: Vec<Mesh>,
    pub skins: Vec<String>,
    pub errors: Option<String>,
}

impl LoadResult {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failed(msg: impl Into<String>) -> Self {
        Self { meshes: Vec::new(), skins: Vec::new(), errors: Some(msg.into()) }
    }

    pub fn is_ok(&self) -> bool {
        self.errors.as_deref().map_or(true, str::is_empty)
    }

    pub fn push(&mut self, mesh: Mesh, skin: impl Into<String>) {
        self.meshes.push(mesh);
        self.skins.push(skin.into());
    }
}

impl From<LoadResultOf<LoadResult>> for LoadResult {
    fn from(result: LoadResultOf<LoadResult>) -> Self {
        match result {
            Ok(r) => r,
            Err(e) => LoadResult::failed(e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_world_vertex_layout() {
        assert_eq!(std::mem::size_of::<WorldVertex>(), 36);
        let m = Mesh::new(vec![WorldVertex::at(1.0, 2.0, 3.0)], vec![]);
        assert_eq!(m.vertex_bytes().len(), 36);
        assert_eq!(&m.vertex_bytes()[0..4], &1.0f32.to_le_bytes());
    }

    #[test]
    fn test_well_formed() {
        let verts = vec![WorldVertex::at(0.0, 0.0, 0.0); 3];
        assert!(Mesh::new(verts.clone(), vec![0, 1, 2]).is_well_formed());
        assert!(!Mesh::new(verts, vec![0, 1, 3]).is_well_formed());
    }

    #[test]
    fn test_error_text() {
        let e = LoadError::FrameOutOfRange { frame: 5, count: 3 };
        assert_eq!(e.to_string(), "frame 5 is outside of model's frame range [0..2]");
        let e = LoadError::BadMagic { expected: "IDP2", found: "ABCD".into() };
        assert_eq!(e.to_string(), "unknown header: expected \"IDP2\", but got \"ABCD\"");
        let e = LoadError::MissingCompanion("_a.3d");
        assert_eq!(e.to_string(), "unable to find corresponding \"_a.3d\" file.");
    }

    #[test]
    fn test_failed_result() {
        let r: LoadResult = Err(LoadError::Format("bad".into())).into();
        assert!(!r.is_ok());
        assert!(r.meshes.is_empty());
        assert_eq!(r.errors.as_deref(), Some("bad"));
    }
}
