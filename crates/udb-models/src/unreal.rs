// unreal.rs — Unreal Engine 1 vertex-animated model (.3d) loader
//
// A model is split over two files: `name_d.3d` holds polygons and texture
// coordinates, `name_a.3d` holds one vertex block per animation frame.
// Either file can be named in a model definition, the other one is looked
// up through the resource provider.

use std::collections::{BTreeMap, BTreeSet};

use bitflags::bitflags;
use tracing::debug;

use udb_common::binreader::BinReader;
use udb_common::mathlib::{cross_product, vector_add, vector_normalize, vector_scale, vector_subtract, Vec3};
use udb_common::BoundingBoxSizes;

use crate::mesh::{LoadError, LoadResult, LoadResultOf, Mesh, WorldVertex, WHITE};
use crate::modeldef::{LoadContext, ModelLoadParams};

pub const DATA_SUFFIX: &str = "_d.3d";
pub const ANIM_SUFFIX: &str = "_a.3d";

/// bogusrot, bogusframe, bogusnorm[3], fixscale, unused[3], padding[12]
const DATA_HEADER_SKIP: usize = 44;
const POLY_RECORD_LEN: i64 = 16;
/// Deus Ex stores three i16 per vertex (padded to 8 bytes).
const DEUS_EX_VERTEX_LEN: u32 = 8;
const PACKED_VERTEX_LEN: i64 = 4;

bitflags! {
    /// Polygon type bits that affect the imported geometry.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct PolyFlags: u8 {
        /// Weapon triangle or other non-rendered polygon.
        const INVISIBLE   = 0x08;
        /// Flat shaded: every corner takes the face normal.
        const FACE_NORMAL = 0x20;
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct Poly {
    v: [usize; 3],
    s: [f32; 3],
    t: [f32; 3],
    flags: PolyFlags,
    texnum: u8,
    normal: Vec3,
}

/// One packed coordinate: `bits` wide at `shift`, widened to 16 bits and
/// scaled by 1/128.
fn unpack_field(n: u32, shift: u32, bits: u32) -> f32 {
    let field = (n >> shift) & ((1 << bits) - 1);
    let widened = (field << (16 - bits)) as u16 as i16;
    widened as f32 / 128.0
}

/// Unpack an 11/11/10 bit vertex into map orientation.
pub fn unpack_vertex(n: u32) -> Vec3 {
    [-unpack_field(n, 11, 11), -unpack_field(n, 0, 11), unpack_field(n, 22, 10)]
}

/// Name of the other half of a model pair, and which half it is.
pub fn companion_name(file_name: &str) -> LoadResultOf<(String, &'static str)> {
    let lower = file_name.to_ascii_lowercase();
    let (other, stem_len) = if lower.ends_with(DATA_SUFFIX) {
        (ANIM_SUFFIX, file_name.len() - DATA_SUFFIX.len())
    } else if lower.ends_with(ANIM_SUFFIX) {
        (DATA_SUFFIX, file_name.len() - ANIM_SUFFIX.len())
    } else {
        return Err(LoadError::MissingCompanion(DATA_SUFFIX));
    };
    Ok((format!("{}{}", &file_name[..stem_len], other), other))
}

pub fn load(data: &[u8], params: &ModelLoadParams, ctx: &mut LoadContext<'_>) -> LoadResult {
    let (other_name, other_suffix) = match companion_name(&params.file_name) {
        Ok(c) => c,
        Err(e) => return LoadResult::failed(e.to_string()),
    };
    let other = match ctx.resources.load_file(&other_name) {
        Some(bytes) => bytes,
        None => return LoadResult::failed(LoadError::MissingCompanion(other_suffix).to_string()),
    };

    let (d, a) = if other_suffix == ANIM_SUFFIX { (data, &other[..]) } else { (&other[..], data) };
    read_unreal(d, a, params.skins(), params.frame, &mut ctx.bounds).into()
}

fn read_vertices(a: &mut BinReader<'_>, numverts: usize, framesize: u32, frame: usize) -> LoadResultOf<Vec<WorldVertex>> {
    let start = a.position() as i64;
    let deus_ex = framesize / numverts as u32 == DEUS_EX_VERTEX_LEN;

    let mut verts = Vec::with_capacity(numverts);
    for i in 0..numverts {
        let index = (i + frame * numverts) as i64;
        let mut v = WorldVertex::at(0.0, 0.0, 0.0);
        if deus_ex {
            a.seek(start + index * DEUS_EX_VERTEX_LEN as i64)?;
            let vx = a.read_i16()? as f32;
            let vy = a.read_i16()? as f32;
            let vz = a.read_i16()? as f32;
            a.skip(2)?; // pad
            v.set_position(&[-vy, -vx, vz]);
        } else {
            a.seek(start + index * PACKED_VERTEX_LEN)?;
            v.set_position(&unpack_vertex(a.read_u32()?));
        }
        verts.push(v);
    }
    Ok(verts)
}

fn read_polys(d: &mut BinReader<'_>, numpolys: usize, numverts: usize) -> LoadResultOf<Vec<Poly>> {
    let start = d.position() as i64;
    let mut broken = 0usize;
    let mut polys = Vec::with_capacity(numpolys);
    for i in 0..numpolys {
        d.seek(start + POLY_RECORD_LEN * i as i64)?;
        let mut p = Poly::default();
        let mut in_range = true;
        for k in 0..3 {
            let index = d.read_i16()?;
            in_range &= index >= 0 && (index as usize) < numverts;
            p.v[k] = index.max(0) as usize;
        }
        // out of range corners collapse the whole polygon onto vertex 0
        if !in_range {
            p.v = [0; 3];
            broken += 1;
        }
        p.flags = PolyFlags::from_bits_retain(d.read_u8()?);
        d.skip(1)?; // colour
        for k in 0..3 {
            p.s[k] = d.read_u8()? as f32 / 255.0;
            p.t[k] = d.read_u8()? as f32 / 255.0;
        }
        p.texnum = d.read_u8()?;
        d.skip(1)?; // flags
        polys.push(p);
    }
    if broken > 0 {
        debug!("Unreal model: {} polygons reference missing vertices", broken);
    }
    Ok(polys)
}

/// Face normals, then vertex normals as the negated average of the faces
/// touching each vertex.
fn compute_normals(verts: &mut [WorldVertex], polys: &mut [Poly]) {
    for p in polys.iter_mut() {
        let p0 = verts[p.v[0]].position();
        let e1 = vector_subtract(&verts[p.v[1]].position(), &p0);
        let e2 = vector_subtract(&verts[p.v[2]].position(), &p0);
        let mut n = cross_product(&e1, &e2);
        vector_normalize(&mut n);
        p.normal = n;
    }

    let mut sums = vec![([0.0f32; 3], 0u32); verts.len()];
    for p in polys.iter() {
        for (k, &vi) in p.v.iter().enumerate() {
            // a corner repeated within one polygon counts once
            if p.v[..k].contains(&vi) {
                continue;
            }
            let (sum, count) = &mut sums[vi];
            *sum = vector_add(sum, &p.normal);
            *count += 1;
        }
    }
    for (v, (sum, count)) in verts.iter_mut().zip(sums) {
        if count > 0 {
            v.set_normal(&vector_scale(&sum, -1.0 / count as f32));
        }
    }
}

fn emit_polys<'a>(
    polys: impl Iterator<Item = &'a Poly>,
    verts: &[WorldVertex],
    bounds: &mut BoundingBoxSizes,
) -> Mesh {
    let mut out = Vec::new();
    for p in polys.filter(|p| !p.flags.contains(PolyFlags::INVISIBLE)) {
        for k in 0..3 {
            let mut v = verts[p.v[k]];
            v.c = WHITE;
            v.u = p.s[k];
            v.v = p.t[k];
            if p.flags.contains(PolyFlags::FACE_NORMAL) {
                v.set_normal(&p.normal);
            }
            bounds.update(v.x, v.y, v.z);
            out.push(v);
        }
    }
    let indices = (0..out.len() as u32).collect();
    Mesh::new(out, indices)
}

pub fn read_unreal(
    d_data: &[u8],
    a_data: &[u8],
    skins: Option<&BTreeMap<usize, String>>,
    frame: i32,
    bounds: &mut BoundingBoxSizes,
) -> LoadResultOf<LoadResult> {
    let mut d = BinReader::new(d_data);
    let mut a = BinReader::new(a_data);

    let numpolys = d.read_u16()? as usize;
    let numverts = d.read_u16()? as usize;
    d.skip(DATA_HEADER_SKIP)?;

    let numframes = a.read_u16()? as i64;
    let framesize = a.read_u16()? as u32;

    if frame < 0 || frame as i64 >= numframes {
        return Err(LoadError::FrameOutOfRange { frame: frame as i64, count: numframes });
    }
    if numverts == 0 {
        return Err(LoadError::Format("model has no vertices".into()));
    }

    let mut verts = read_vertices(&mut a, numverts, framesize, frame as usize)?;
    let mut polys = read_polys(&mut d, numpolys, numverts)?;
    compute_normals(&mut verts, &mut polys);

    let mut result = LoadResult::new();
    match skins {
        None => {
            result.push(emit_polys(polys.iter(), &verts, bounds), "");
        }
        Some(map) => {
            // one mesh per texture number, ascending
            let groups: BTreeSet<u8> = polys.iter().map(|p| p.texnum).collect();
            for (k, texnum) in groups.into_iter().enumerate() {
                let mesh = emit_polys(polys.iter().filter(|p| p.texnum == texnum), &verts, bounds);
                let skin = map.get(&k).map(|s| s.to_lowercase()).unwrap_or_default();
                result.push(mesh, skin);
            }
        }
    }
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resources::MemoryResources;
    use crate::testutil::{assert_meshes_well_formed, assert_truncations_fail, ByteWriter};

    struct TestPoly {
        v: [i16; 3],
        flags: u8,
        texnum: u8,
    }

    fn poly(v: [i16; 3], flags: u8, texnum: u8) -> TestPoly {
        TestPoly { v, flags, texnum }
    }

    fn build_d(numverts: u16, polys: &[TestPoly]) -> Vec<u8> {
        let mut w = ByteWriter::new();
        w.u16(polys.len() as u16).u16(numverts).zeros(DATA_HEADER_SKIP);
        for p in polys {
            w.i16(p.v[0]).i16(p.v[1]).i16(p.v[2]).u8(p.flags).u8(0);
            w.u8(0).u8(0).u8(255).u8(0).u8(0).u8(255);
            w.u8(p.texnum).u8(0);
        }
        w.finish()
    }

    /// Deus Ex layout, frames of (x, y, z) per vertex.
    fn build_a_deus_ex(frames: &[Vec<[i16; 3]>]) -> Vec<u8> {
        let mut w = ByteWriter::new();
        let numverts = frames[0].len() as u16;
        w.u16(frames.len() as u16).u16(numverts * 8);
        for f in frames {
            for v in f {
                w.i16(v[0]).i16(v[1]).i16(v[2]).i16(0);
            }
        }
        w.finish()
    }

    fn pack(x: i32, y: i32, z: i32) -> u32 {
        // inverse of unpack_field for values that are multiples of 1/4
        let fx = ((x * 128) >> 5) as u32 & 0x7ff;
        let fy = ((y * 128) >> 5) as u32 & 0x7ff;
        let fz = ((z * 128) >> 6) as u32 & 0x3ff;
        fx | (fy << 11) | (fz << 22)
    }

    fn triangle() -> Vec<[i16; 3]> {
        vec![[0, 0, 0], [10, 0, 0], [0, 10, 0]]
    }

    #[test]
    fn test_unreal_packed_vertex() {
        let v = unpack_vertex(pack(3, -5, 2));
        assert_eq!(v, [5.0, -3.0, 2.0]);
        let v = unpack_vertex(pack(-1, 1, -4));
        assert_eq!(v, [-1.0, 1.0, -4.0]);
    }

    #[test]
    fn test_unreal_packed_frames() {
        let mut w = ByteWriter::new();
        w.u16(2).u16(12);
        for f in 0..2 {
            w.u32(pack(0, 0, f)).u32(pack(4, 0, f)).u32(pack(0, 4, f));
        }
        let a = w.finish();
        let d = build_d(3, &[poly([0, 1, 2], 0, 0)]);
        let mut bounds = BoundingBoxSizes::default();
        let result = read_unreal(&d, &a, None, 1, &mut bounds).unwrap();
        let v = result.meshes[0].vertices();
        assert_eq!(v[1].position(), [0.0, -4.0, 1.0]);
        assert_eq!(bounds.max_z, 1);
    }

    #[test]
    fn test_unreal_deus_ex_single_mesh() {
        let d = build_d(3, &[poly([0, 1, 2], 0, 0), poly([0, 2, 1], PolyFlags::INVISIBLE.bits(), 0)]);
        let a = build_a_deus_ex(&[triangle()]);
        let mut bounds = BoundingBoxSizes::default();
        let result = read_unreal(&d, &a, None, 0, &mut bounds).unwrap();
        assert_eq!(result.meshes.len(), 1);
        assert_eq!(result.skins, vec![String::new()]);
        let mesh = &result.meshes[0];
        // the invisible polygon is dropped
        assert_eq!(mesh.vertices().len(), 3);
        assert_eq!(mesh.indices(), &[0, 1, 2]);
        let v = mesh.vertices();
        // file (10, 0, 0) maps to (-0, -10, 0)
        assert_eq!((v[1].x, v[1].y), (0.0, -10.0));
        assert_eq!((v[1].u, v[1].v), (1.0, 0.0));
        assert_eq!((v[2].u, v[2].v), (0.0, 1.0));
        assert_meshes_well_formed(&result);
    }

    #[test]
    fn test_unreal_normals() {
        let d = build_d(4, &[poly([0, 1, 2], 0, 0), poly([0, 1, 2], PolyFlags::FACE_NORMAL.bits(), 0)]);
        let mut frame = triangle();
        frame.push([5, 5, 5]);
        let a = build_a_deus_ex(&[frame]);
        let mut bounds = BoundingBoxSizes::default();
        let result = read_unreal(&d, &a, None, 0, &mut bounds).unwrap();
        let v = result.meshes[0].vertices();
        let face = v[3].normal();
        let len = (face[0] * face[0] + face[1] * face[1] + face[2] * face[2]).sqrt();
        assert!((len - 1.0).abs() < 1e-5);
        // smooth corners point away from the face normal
        let smooth = v[0].normal();
        for i in 0..3 {
            assert!((smooth[i] + face[i]).abs() < 1e-5, "{:?} vs {:?}", smooth, face);
        }
    }

    #[test]
    fn test_unreal_groups_sorted_by_texnum() {
        let d = build_d(
            3,
            &[poly([0, 1, 2], 0, 3), poly([0, 1, 2], 0, 1), poly([0, 1, 2], 0, 2), poly([0, 2, 1], 0, 1)],
        );
        let a = build_a_deus_ex(&[triangle()]);
        let mut skins = BTreeMap::new();
        skins.insert(0, "Skin_One.PNG".to_string());
        skins.insert(2, "three.png".to_string());
        let mut bounds = BoundingBoxSizes::default();
        let result = read_unreal(&d, &a, Some(&skins), 0, &mut bounds).unwrap();
        assert_eq!(result.meshes.len(), 3);
        assert_eq!(result.skins, vec!["skin_one.png".to_string(), String::new(), "three.png".to_string()]);
        // texnum 1 carries two polygons
        assert_eq!(result.meshes[0].triangle_count(), 2);
        assert_eq!(result.meshes[1].triangle_count(), 1);
    }

    #[test]
    fn test_unreal_broken_polygon_collapses() {
        let d = build_d(3, &[poly([0, 7, 2], 0, 0)]);
        let a = build_a_deus_ex(&[triangle()]);
        let mut bounds = BoundingBoxSizes::default();
        let result = read_unreal(&d, &a, None, 0, &mut bounds).unwrap();
        let v = result.meshes[0].vertices();
        assert_eq!(v.len(), 3);
        assert!(v.iter().all(|c| c.position() == [0.0, 0.0, 0.0]));
        assert!(v.iter().all(|c| c.normal().iter().all(|n| n.is_finite())));
    }

    #[test]
    fn test_unreal_frame_range() {
        let d = build_d(3, &[poly([0, 1, 2], 0, 0)]);
        let a = build_a_deus_ex(&[triangle()]);
        let mut bounds = BoundingBoxSizes::default();
        let err = read_unreal(&d, &a, None, 1, &mut bounds).unwrap_err();
        assert_eq!(err.to_string(), "frame 1 is outside of model's frame range [0..0]");
    }

    #[test]
    fn test_unreal_companion_lookup() {
        assert_eq!(companion_name("Models/Jet_D.3D").unwrap(), ("Models/Jet_a.3d".to_string(), ANIM_SUFFIX));
        assert_eq!(companion_name("jet_a.3d").unwrap(), ("jet_d.3d".to_string(), DATA_SUFFIX));

        let d = build_d(3, &[poly([0, 1, 2], 0, 0)]);
        let a = build_a_deus_ex(&[triangle()]);
        let mut res = MemoryResources::new("test");
        res.add_file("models/jet_a.3d", a);
        let mut ctx = LoadContext::new(&res);
        let result = load(&d, &ModelLoadParams::new("models/jet_d.3d"), &mut ctx);
        assert!(result.is_ok(), "{:?}", result.errors);
        assert_eq!(ctx.bounds.min_y, -10);

        let result = load(&d, &ModelLoadParams::new("models/other_d.3d"), &mut ctx);
        assert_eq!(result.errors.as_deref(), Some("unable to find corresponding \"_a.3d\" file."));
    }

    #[test]
    fn test_unreal_truncated() {
        let d = build_d(3, &[poly([0, 1, 2], 0, 0), poly([0, 2, 1], 0, 1)]);
        let a = build_a_deus_ex(&[triangle(), triangle()]);
        let read = |d: &[u8], a: &[u8]| -> LoadResult {
            read_unreal(d, a, None, 1, &mut BoundingBoxSizes::default()).into()
        };
        assert!(read(&d, &a).is_ok());
        assert_truncations_fail(&d, |d| read(d, &a));
        assert_truncations_fail(&a, |a| read(&d, a));
    }
}
