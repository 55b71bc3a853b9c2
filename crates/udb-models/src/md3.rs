// md3.rs — Quake 3 MD3 model loader
//
// An MD3 holds several surfaces, each a self-contained block whose tables are
// addressed relative to the start of the surface. Surfaces that resolve to the
// same skin are merged into one mesh.

use std::collections::BTreeMap;
use std::f64::consts::PI;

use udb_common::binreader::BinReader;
use udb_common::BoundingBoxSizes;

use crate::md2::header_count;
use crate::mesh::{LoadError, LoadResult, LoadResultOf, Mesh, WorldVertex, WHITE};
use crate::modeldef::{LoadContext, ModelLoadParams};

pub const MD3_IDENT: &str = "IDP3";
pub const MD3_VERSION: i32 = 15;

const MAX_QPATH: usize = 64;
/// xyz as i16 plus a packed lat/long normal
const XYZN_SIZE: i64 = 8;
const XYZ_SCALE: f32 = 1.0 / 64.0;

pub fn load(data: &[u8], params: &ModelLoadParams, ctx: &mut LoadContext<'_>) -> LoadResult {
    read_md3(data, params.skins(), params.frame, &mut ctx.bounds).into()
}

struct Surface {
    skin: String,
    verts: Vec<WorldVertex>,
    indices: Vec<u32>,
}

/// Normal from the packed latitude / longitude bytes.
pub fn decode_normal(lat: u8, lng: u8) -> [f32; 3] {
    let lat = lat as f64 * (2.0 * PI) / 255.0;
    let lng = lng as f64 * (2.0 * PI) / 255.0;
    [
        (lng.sin() * lat.sin()) as f32,
        -(lng.cos() * lat.sin()) as f32,
        lat.cos() as f32,
    ]
}

fn read_surface(r: &mut BinReader<'_>, frame: i32, bounds: &mut BoundingBoxSizes) -> LoadResultOf<(Surface, i64)> {
    let start = r.position() as i64;

    let magic = r.read_fixed_string(4)?;
    if magic != MD3_IDENT {
        return Err(LoadError::Format(format!(
            "error while reading surface. Unknown header: expected \"{}\", but got \"{}\"",
            MD3_IDENT, magic
        )));
    }

    let _name = r.read_fixed_string(MAX_QPATH)?;
    let _flags = r.read_i32()?;
    let num_frames = r.read_i32()?;
    let _num_shaders = r.read_i32()?;
    let num_verts = header_count(r.read_i32()?, "vertex")?;
    let num_triangles = header_count(r.read_i32()?, "triangle")?;
    let ofs_triangles = r.read_i32()? as i64;
    let ofs_shaders = r.read_i32()? as i64;
    let ofs_st = r.read_i32()? as i64;
    let ofs_xyzn = r.read_i32()? as i64;
    let ofs_end = r.read_i32()? as i64;

    if frame < 0 || frame >= num_frames {
        return Err(LoadError::FrameOutOfRange { frame: frame as i64, count: num_frames as i64 });
    }

    r.seek(start + ofs_triangles)?;
    let mut indices = Vec::with_capacity(r.capacity_for(num_triangles * 3, 4));
    for _ in 0..num_triangles * 3 {
        let index = r.read_i32()?;
        if index < 0 || index as usize >= num_verts {
            return Err(LoadError::IndexOutOfRange { what: "vertex", index: index as i64, count: num_verts });
        }
        indices.push(index as u32);
    }

    // only the first shader is used
    r.seek(start + ofs_shaders)?;
    let skin = r.read_fixed_string(MAX_QPATH)?;

    r.seek(start + ofs_st)?;
    let mut verts = Vec::with_capacity(r.capacity_for(num_verts, 8));
    for _ in 0..num_verts {
        let u = r.read_f32()?;
        let v = r.read_f32()?;
        verts.push(WorldVertex::new(0.0, 0.0, 0.0, WHITE, u, v));
    }

    r.seek(start + ofs_xyzn + num_verts as i64 * XYZN_SIZE * frame as i64)?;
    for v in verts.iter_mut() {
        // stored rotated a quarter turn relative to map space
        v.y = -(r.read_i16()? as f32) * XYZ_SCALE;
        v.x = r.read_i16()? as f32 * XYZ_SCALE;
        v.z = r.read_i16()? as f32 * XYZ_SCALE;
        bounds.update(v.x, v.y, v.z);

        let lat = r.read_u8()?;
        let lng = r.read_u8()?;
        v.set_normal(&decode_normal(lat, lng));
    }

    Ok((Surface { skin, verts, indices }, start + ofs_end))
}

/// Surfaces merged per skin, in order of first appearance.
fn group_by_skin(surfaces: Vec<Surface>) -> Vec<Surface> {
    let mut groups: Vec<Surface> = Vec::new();
    for s in surfaces {
        match groups.iter_mut().find(|g| g.skin == s.skin) {
            Some(group) => {
                let offset = group.verts.len() as u32;
                group.indices.extend(s.indices.iter().map(|i| i + offset));
                group.verts.extend(s.verts);
            }
            None => groups.push(s),
        }
    }
    groups
}

fn read_md3(
    data: &[u8],
    skins: Option<&BTreeMap<usize, String>>,
    frame: i32,
    bounds: &mut BoundingBoxSizes,
) -> LoadResultOf<LoadResult> {
    let mut r = BinReader::new(data);

    let magic = r.read_fixed_string(4)?;
    if magic != MD3_IDENT {
        return Err(LoadError::BadMagic { expected: MD3_IDENT, found: magic });
    }
    let version = r.read_i32()?;
    if version != MD3_VERSION {
        return Err(LoadError::BadVersion { format: "MD3", expected: MD3_VERSION as i64, found: version as i64 });
    }

    r.skip(MAX_QPATH + 12)?; // name, flags, num_frames, num_tags
    let num_surfaces = header_count(r.read_i32()?, "surface")?;
    r.skip(12)?; // num_skins, ofs_frames, ofs_tags
    let ofs_surfaces = r.read_i32()? as i64;

    r.seek(ofs_surfaces)?;
    let mut surfaces = Vec::with_capacity(r.capacity_for(num_surfaces, 4));
    for index in 0..num_surfaces {
        let (mut surface, next) = read_surface(&mut r, frame, bounds)?;
        surface.skin = match skins {
            // whole-model skin set elsewhere
            None => String::new(),
            Some(map) => map.get(&index).cloned().unwrap_or(surface.skin),
        }
        .to_lowercase();
        surfaces.push(surface);
        r.seek(next)?;
    }

    let mut result = LoadResult::new();
    for group in group_by_skin(surfaces) {
        result.push(Mesh::new(group.verts, group.indices), group.skin);
    }
    if result.meshes.is_empty() {
        result.push(Mesh::default(), "");
    }
    Ok(result)
}
