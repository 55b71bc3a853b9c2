// obj.rs — Wavefront OBJ text model loader
//
// Supports v / vt / vn / f / usemtl. Faces are triangles or quads, every
// face corner becomes its own vertex. Each `usemtl` starts a new mesh.

use std::collections::BTreeMap;

use udb_common::mathlib::{fix_model_rotation, Vec3};
use udb_common::BoundingBoxSizes;

use crate::mesh::{LoadError, LoadResult, LoadResultOf, Mesh, WorldVertex, WHITE};
use crate::modeldef::{LoadContext, ModelLoadParams};

/// Corner order for triangles and for quads split into two triangles.
const TRIANGLE_SEQ: &[usize] = &[0, 1, 2];
const QUAD_SEQ: &[usize] = &[0, 1, 2, 0, 2, 3];

/// Parsed face with zero based indices. Texture coordinate and normal
/// indices are -1 when absent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ObjFace {
    pub vertices: Vec<i32>,
    pub texcoords: Vec<i32>,
    pub normals: Vec<i32>,
}

fn fields(payload: &str) -> Vec<&str> {
    payload.split([' ', '\t']).filter(|f| !f.is_empty()).collect()
}

fn parse_floats(payload: Option<&str>, min: usize) -> Result<Vec<f32>, String> {
    let payload = payload.filter(|p| !p.is_empty()).ok_or("no arguments given")?;
    let f = fields(payload);
    if f.len() < min {
        return Err("too few arguments".into());
    }
    f.iter()
        .take(min)
        .map(|s| s.parse::<f32>().map_err(|_| "field is not a float".to_string()))
        .collect()
}

/// Position, with the file's y-up axes swapped to z-up and the model
/// rotation applied.
pub fn parse_vertex(payload: Option<&str>) -> Result<Vec3, String> {
    let f = parse_floats(payload, 3)?;
    Ok(fix_model_rotation(&[f[0], -f[2], f[1]]))
}

/// Texture coordinate with v flipped.
pub fn parse_texcoord(payload: Option<&str>) -> Result<(f32, f32), String> {
    let f = parse_floats(payload, 2)?;
    Ok((f[0], 1.0 - f[1]))
}

pub fn parse_normal(payload: Option<&str>) -> Result<Vec3, String> {
    let f = parse_floats(payload, 3)?;
    Ok([f[0], f[1], f[2]])
}

pub fn parse_face(payload: Option<&str>) -> Result<ObjFace, String> {
    let payload = payload.filter(|p| !p.is_empty()).ok_or("no arguments given")?;
    let corners = fields(payload);
    if corners.len() < 3 {
        return Err("too few arguments".into());
    }
    if corners.len() > 4 {
        return Err("faces with more than 4 sides are not supported".into());
    }

    let index = |s: &str| s.parse::<i32>().map(|i| i - 1).map_err(|_| "field is not an integer".to_string());
    let optional = |s: Option<&str>| match s {
        Some(s) if !s.is_empty() => index(s),
        _ => Ok(-1),
    };

    let mut face = ObjFace::default();
    for corner in corners {
        let mut parts = corner.split('/');
        face.vertices.push(index(parts.next().unwrap_or(""))?);
        face.texcoords.push(optional(parts.next())?);
        face.normals.push(optional(parts.next())?);
    }
    Ok(face)
}

/// Every index of `indices` either absent or inside `0..count`.
fn check_indices(indices: &[i32], count: usize, what: &str, allow_absent: bool) -> Result<(), String> {
    for &i in indices {
        if allow_absent && i == -1 {
            continue;
        }
        if i < 0 || i as usize >= count {
            return Err(format!("{} {} does not exist", what, i + 1));
        }
    }
    Ok(())
}

#[derive(Default)]
struct ObjParser {
    positions: Vec<Vec3>,
    texcoords: Vec<(f32, f32)>,
    normals: Vec<Vec3>,
    verts: Vec<WorldVertex>,
    indices: Vec<u32>,
    result: LoadResult,
}

impl ObjParser {
    fn flush(&mut self) {
        let verts = std::mem::take(&mut self.verts);
        let indices = std::mem::take(&mut self.indices);
        self.result.meshes.push(Mesh::new(verts, indices));
    }

    fn add_face(&mut self, face: &ObjFace, bounds: &mut BoundingBoxSizes) -> Result<(), String> {
        check_indices(&face.vertices, self.positions.len(), "vertex", false)?;
        check_indices(&face.texcoords, self.texcoords.len(), "texture coordinate", true)?;
        check_indices(&face.normals, self.normals.len(), "vertex", true)?;

        let seq = if face.vertices.len() == 3 { TRIANGLE_SEQ } else { QUAD_SEQ };
        for &k in seq {
            let p = self.positions[face.vertices[k] as usize];
            let mut v = WorldVertex::new(p[0], p[1], p[2], WHITE, 0.0, 0.0);
            if face.texcoords[k] != -1 {
                let (u, tv) = self.texcoords[face.texcoords[k] as usize];
                v.u = u;
                v.v = tv;
            }
            if face.normals[k] != -1 {
                v.set_normal(&self.normals[face.normals[k] as usize]);
            }
            bounds.update(v.x, v.y, v.z);
            self.indices.push(self.verts.len() as u32);
            self.verts.push(v);
        }
        Ok(())
    }

    fn line(&mut self, line: &str, bounds: &mut BoundingBoxSizes) -> Result<(), String> {
        let line = line.trim();
        let (keyword, payload) = match line.split_once([' ', '\t']) {
            Some((k, p)) => (k, Some(p.trim())),
            None => (line, None),
        };

        match keyword {
            "v" => {
                let v = parse_vertex(payload)?;
                self.positions.push(v);
            }
            "vt" => {
                let t = parse_texcoord(payload)?;
                self.texcoords.push(t);
            }
            "vn" => {
                let n = parse_normal(payload)?;
                self.normals.push(n);
            }
            "f" => {
                let face = parse_face(payload)?;
                self.add_face(&face, bounds)?;
            }
            "usemtl" => {
                if !self.verts.is_empty() {
                    self.flush();
                }
                if let Some(name) = payload {
                    self.result.skins.push(name.replace('"', ""));
                }
            }
            // comments, smoothing groups, groups, objects
            _ => {}
        }
        Ok(())
    }
}

pub fn load(data: &[u8], params: &ModelLoadParams, ctx: &mut LoadContext<'_>) -> LoadResult {
    let text = String::from_utf8_lossy(data);
    read_obj(&text, params.skins(), &mut ctx.bounds).into()
}

pub fn read_obj(
    text: &str,
    skins: Option<&BTreeMap<usize, String>>,
    bounds: &mut BoundingBoxSizes,
) -> LoadResultOf<LoadResult> {
    let mut parser = ObjParser::default();
    for (n, line) in text.lines().enumerate() {
        parser.line(line, bounds).map_err(|message| LoadError::ObjLine { line: n + 1, message })?;
    }
    if !parser.verts.is_empty() || parser.result.meshes.is_empty() {
        parser.flush();
    }

    let mut result = parser.result;
    if let Some(map) = skins {
        for (&index, skin) in map {
            if result.skins.len() <= index {
                result.skins.resize(index + 1, String::new());
            }
            result.skins[index] = skin.clone();
        }
    }
    // every mesh needs a skin slot
    if result.skins.len() < result.meshes.len() {
        result.skins.resize(result.meshes.len(), String::new());
    }
    Ok(result)
}
