// md2.rs — Quake 2 MD2 model loader

use udb_common::binreader::BinReader;
use udb_common::mathlib::fix_model_rotation;
use udb_common::BoundingBoxSizes;

use crate::mesh::{LoadError, LoadResult, LoadResultOf, Mesh, WorldVertex, WHITE};
use crate::modeldef::{LoadContext, ModelLoadParams};

/// MD2 magic
pub const IDALIASHEADER: &str = "IDP2";
pub const ALIAS_VERSION: i32 = 8;

const FRAME_NAME_LEN: usize = 16;
/// scale[3] + translate[3]
const FRAME_TRANSFORM_LEN: usize = 24;

pub fn load(data: &[u8], params: &ModelLoadParams, ctx: &mut LoadContext<'_>) -> LoadResult {
    read_md2(data, params.frame, params.frame_name.as_deref().filter(|n| !n.is_empty()), &mut ctx.bounds).into()
}

pub(crate) fn header_count(value: i32, what: &str) -> LoadResultOf<usize> {
    usize::try_from(value).map_err(|_| LoadError::Format(format!("negative {} count {}", what, value)))
}

struct Md2Header {
    tex_width: i32,
    tex_height: i32,
    framesize: i32,
    num_verts: usize,
    num_uv: usize,
    num_tris: usize,
    num_frames: i32,
    ofs_uv: i32,
    ofs_tris: i32,
    ofs_frames: i32,
}

fn read_header(r: &mut BinReader<'_>, frame: i32) -> LoadResultOf<Md2Header> {
    let magic = r.read_fixed_string(4)?;
    if magic != IDALIASHEADER {
        return Err(LoadError::BadMagic { expected: IDALIASHEADER, found: magic });
    }

    let version = r.read_i32()?;
    if version != ALIAS_VERSION {
        return Err(LoadError::BadVersion { format: "MD2", expected: ALIAS_VERSION as i64, found: version as i64 });
    }

    let tex_width = r.read_i32()?;
    let tex_height = r.read_i32()?;
    let framesize = r.read_i32()?;
    r.skip(4)?; // num_skins
    let num_verts = header_count(r.read_i32()?, "vertex")?;
    let num_uv = header_count(r.read_i32()?, "texture coordinate")?;
    let num_tris = header_count(r.read_i32()?, "triangle")?;
    r.skip(4)?; // num_glcmds
    let num_frames = r.read_i32()?;

    if frame < 0 || frame >= num_frames {
        return Err(LoadError::FrameOutOfRange { frame: frame as i64, count: num_frames as i64 });
    }

    r.skip(4)?; // ofs_skins
    let ofs_uv = r.read_i32()?;
    let ofs_tris = r.read_i32()?;
    let ofs_frames = r.read_i32()?;

    Ok(Md2Header {
        tex_width,
        tex_height,
        framesize,
        num_verts,
        num_uv,
        num_tris,
        num_frames,
        ofs_uv,
        ofs_tris,
        ofs_frames,
    })
}

/// Offset of the requested frame, by name when one is given.
fn find_frame(r: &mut BinReader<'_>, h: &Md2Header, frame: i32, frame_name: Option<&str>) -> LoadResultOf<i64> {
    let frame_offset = |i: i64| h.ofs_frames as i64 + i * h.framesize as i64;

    match frame_name {
        Some(name) => {
            for i in 0..h.num_frames as i64 {
                r.seek(frame_offset(i) + FRAME_TRANSFORM_LEN as i64)?;
                let current = r.read_fixed_string(FRAME_NAME_LEN)?;
                if current.eq_ignore_ascii_case(name) {
                    return Ok(frame_offset(i));
                }
            }
            Err(LoadError::FrameNotFound(name.to_string()))
        }
        None => Ok(frame_offset(frame as i64)),
    }
}

fn read_md2(
    data: &[u8],
    frame: i32,
    frame_name: Option<&str>,
    bounds: &mut BoundingBoxSizes,
) -> LoadResultOf<LoadResult> {
    let mut r = BinReader::new(data);
    let h = read_header(&mut r, frame)?;

    // triangles: 3 vertex indices, then 3 texture coordinate indices
    r.seek(h.ofs_tris as i64)?;
    let mut vert_indices = Vec::with_capacity(r.capacity_for(h.num_tris * 3, 2));
    let mut uv_indices = Vec::with_capacity(r.capacity_for(h.num_tris * 3, 2));
    for _ in 0..h.num_tris {
        for _ in 0..3 {
            vert_indices.push(r.read_u16()? as usize);
        }
        for _ in 0..3 {
            uv_indices.push(r.read_u16()? as usize);
        }
    }

    r.seek(h.ofs_uv as i64)?;
    let mut uvs = Vec::with_capacity(r.capacity_for(h.num_uv, 4));
    for _ in 0..h.num_uv {
        let s = r.read_i16()? as f32 / h.tex_width as f32;
        let t = r.read_i16()? as f32 / h.tex_height as f32;
        uvs.push((s, t));
    }

    let offset = find_frame(&mut r, &h, frame, frame_name)?;
    r.seek(offset)?;
    let mut scale = [0.0f32; 3];
    let mut translate = [0.0f32; 3];
    for s in scale.iter_mut() {
        *s = r.read_f32()?;
    }
    for t in translate.iter_mut() {
        *t = r.read_f32()?;
    }
    r.skip(FRAME_NAME_LEN)?;

    let mut verts = Vec::with_capacity(r.capacity_for(h.num_verts, 4));
    for _ in 0..h.num_verts {
        let b = r.read_bytes(3)?;
        let p = [
            b[0] as f32 * scale[0] + translate[0],
            b[1] as f32 * scale[1] + translate[1],
            b[2] as f32 * scale[2] + translate[2],
        ];
        let mut v = WorldVertex::at(0.0, 0.0, 0.0);
        v.set_position(&fix_model_rotation(&p));
        verts.push(v);
        r.skip(1)?; // light normal index
    }

    // A vertex can only carry one texture coordinate. Corners that disagree
    // with the coordinate already assigned get their own copy.
    let mut assigned = vec![false; verts.len()];
    let mut indices = Vec::with_capacity(vert_indices.len());
    for (&vi, &ti) in vert_indices.iter().zip(uv_indices.iter()) {
        if vi >= h.num_verts {
            return Err(LoadError::IndexOutOfRange { what: "vertex", index: vi as i64, count: h.num_verts });
        }
        let &(tu, tv) = uvs
            .get(ti)
            .ok_or(LoadError::IndexOutOfRange { what: "texture coordinate", index: ti as i64, count: uvs.len() })?;

        let v = verts[vi];
        bounds.update(v.y, v.x, v.z);

        if assigned[vi] && (v.u != tu || v.v != tv) {
            verts.push(WorldVertex::new(v.x, v.y, v.z, WHITE, tu, tv));
            indices.push((verts.len() - 1) as u32);
        } else {
            verts[vi].u = tu;
            verts[vi].v = tv;
            assigned[vi] = true;
            indices.push(vi as u32);
        }
    }

    let mut result = LoadResult::new();
    result.push(Mesh::new(verts, indices), ""); // MD2 skins are not used
    Ok(result)
}
