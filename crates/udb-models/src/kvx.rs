// kvx.rs — Build engine KVX voxel loader
//
// A KVX file stores a grid of vertical columns. Each column holds run
// length encoded slabs: a top z, a length, a mask of visible faces and one
// palette index per voxel. Visible faces are emitted as quads whose texture
// coordinates point into a 16x16 palette swatch.

use std::collections::HashMap;
use std::hash::{BuildHasherDefault, Hasher};

use bitflags::bitflags;

use udb_common::binreader::BinReader;
use udb_common::mathlib::Vec3;

use crate::mesh::{LoadError, LoadResult, LoadResultOf, Mesh, WorldVertex, WHITE};
use crate::modeldef::{LoadContext, ModelLoadParams};
use crate::palette::{Palette, VoxelTexture, VGA_PALETTE_BYTES};

/// numbytes, xsize, ysize, zsize and the pivot; column offsets count from here.
const KVX_HEADER_LEN: i64 = 28;
const PIVOT_SCALE: f32 = 1.0 / 256.0;
const SWATCH: f32 = 16.0;
const UV_NUDGE: f32 = 0.001;

bitflags! {
    /// Faces of a slab that are visible from outside the model.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct SlabFaces: u8 {
        const LEFT   = 0x01;
        const RIGHT  = 0x02;
        const FRONT  = 0x04;
        const BACK   = 0x08;
        const TOP    = 0x10;
        const BOTTOM = 0x20;
    }
}

// ============================================================
// Vertex deduplication
// ============================================================

/// FNV-1a over the key bytes.
#[derive(Clone, Copy)]
pub struct FnvHasher(u64);

impl Default for FnvHasher {
    fn default() -> Self {
        FnvHasher(0xcbf2_9ce4_8422_2325)
    }
}

impl Hasher for FnvHasher {
    fn write(&mut self, bytes: &[u8]) {
        for &b in bytes {
            self.0 ^= b as u64;
            self.0 = self.0.wrapping_mul(0x0000_0100_0000_01b3);
        }
    }

    fn finish(&self) -> u64 {
        self.0
    }
}

type VertexKey = [u32; 5];

fn vertex_key(v: &WorldVertex) -> VertexKey {
    [v.x.to_bits(), v.y.to_bits(), v.z.to_bits(), v.u.to_bits(), v.v.to_bits()]
}

struct VoxelMeshBuilder {
    pivot: Vec3,
    verts: Vec<WorldVertex>,
    indices: Vec<u32>,
    lookup: HashMap<VertexKey, u32, BuildHasherDefault<FnvHasher>>,
    face_count: usize,
}

impl VoxelMeshBuilder {
    fn new(pivot: Vec3) -> Self {
        Self { pivot, verts: Vec::new(), indices: Vec::new(), lookup: HashMap::default(), face_count: 0 }
    }

    /// Index of an identical vertex, inserting it when new.
    fn add_vertex(&mut self, v: WorldVertex) -> u32 {
        let verts = &mut self.verts;
        *self.lookup.entry(vertex_key(&v)).or_insert_with(|| {
            verts.push(v);
            (verts.len() - 1) as u32
        })
    }

    fn corner(&self, p: [i32; 3], u: f32, v: f32) -> WorldVertex {
        WorldVertex::new(
            p[0] as f32 - self.pivot[0],
            -(p[1] as f32) + self.pivot[1],
            -(p[2] as f32) + self.pivot[2],
            WHITE,
            u,
            v,
        )
    }

    /// Quad over four corners, split into (1, 2, 4) and (3, 1, 4).
    fn add_face(&mut self, v1: [i32; 3], v2: [i32; 3], v3: [i32; 3], v4: [i32; 3], color: u8) {
        let u0 = (color as u32 % 16) as f32 / SWATCH;
        let v0 = (color as u32 / 16) as f32 / SWATCH;
        let (u1, v1t) = (u0 + UV_NUDGE, v0 + UV_NUDGE);

        let i1 = self.add_vertex(self.corner(v1, u0, v0));
        let i2 = self.add_vertex(self.corner(v2, u1, v1t));
        let i4 = self.add_vertex(self.corner(v4, u0, v0));
        let i3 = self.add_vertex(self.corner(v3, u1, v1t));
        self.indices.extend_from_slice(&[i1, i2, i4, i3, i1, i4]);
        self.face_count += 2;
    }

    /// Faces of one slab of column (x, y).
    fn add_slab(&mut self, x: i32, y: i32, ztop: i32, faces: SlabFaces, colors: &[u8]) {
        let zleng = colors.len() as i32;

        if faces.contains(SlabFaces::TOP) {
            self.add_face([x, y, ztop], [x + 1, y, ztop], [x, y + 1, ztop], [x + 1, y + 1, ztop], colors[0]);
        }

        // side faces span runs of the same colour
        let mut start = 0usize;
        while start < colors.len() {
            let color = colors[start];
            let run = colors[start..].iter().take_while(|&&c| c == color).count();
            let z = ztop + start as i32;
            let c = run as i32;

            if faces.contains(SlabFaces::LEFT) {
                self.add_face([x, y, z], [x, y + 1, z], [x, y, z + c], [x, y + 1, z + c], color);
            }
            if faces.contains(SlabFaces::RIGHT) {
                self.add_face([x + 1, y + 1, z], [x + 1, y, z], [x + 1, y + 1, z + c], [x + 1, y, z + c], color);
            }
            if faces.contains(SlabFaces::FRONT) {
                self.add_face([x + 1, y, z], [x, y, z], [x + 1, y, z + c], [x, y, z + c], color);
            }
            if faces.contains(SlabFaces::BACK) {
                self.add_face([x, y + 1, z], [x + 1, y + 1, z], [x, y + 1, z + c], [x + 1, y + 1, z + c], color);
            }
            start += run;
        }

        if faces.contains(SlabFaces::BOTTOM) {
            let z = ztop + zleng;
            self.add_face([x + 1, y, z], [x, y, z], [x + 1, y + 1, z], [x, y + 1, z], colors[colors.len() - 1]);
        }
    }
}

// ============================================================
// Model
// ============================================================

#[derive(Debug, Clone)]
pub struct KvxModel {
    pub mesh: Mesh,
    pub palette: Palette,
    pub xsize: i32,
    pub ysize: i32,
    pub zsize: i32,
    pub pivot: Vec3,
    /// Triangles emitted, two per visible face.
    pub face_count: usize,
}

impl KvxModel {
    /// Horizontal radius from the grid size and pivot, scaled per axis.
    pub fn radius(&self, scale: &Vec3) -> i32 {
        let half_x = self.xsize as f32 / 2.0;
        let half_y = self.ysize as f32 / 2.0;
        let min_x = ((half_x - self.pivot[0]) * scale[0]) as i32;
        let max_x = ((half_x + self.pivot[0]) * scale[0]) as i32;
        let min_y = ((half_y - self.pivot[1]) * scale[1]) as i32;
        let max_y = ((half_y + self.pivot[1]) * scale[1]) as i32;
        min_y.abs().max(max_y.abs()).max(min_x.abs().max(max_x.abs()))
    }

    pub fn texture(&self) -> VoxelTexture {
        VoxelTexture::from_palette(&self.palette)
    }
}

fn grid_size(value: i32, axis: &str) -> LoadResultOf<i32> {
    if value < 0 {
        return Err(LoadError::Format(format!("negative KVX {} size {}", axis, value)));
    }
    Ok(value)
}

/// Decode a KVX file. The game palette replaces the file's own when given.
pub fn read_kvx(data: &[u8], override_palette: Option<&Palette>) -> LoadResultOf<KvxModel> {
    if data.len() < VGA_PALETTE_BYTES {
        return Err(LoadError::Format("KVX file is too short to hold a palette".into()));
    }
    let mut r = BinReader::new(data);
    let slabs_end = (data.len() - VGA_PALETTE_BYTES) as i64;

    // size of the first mip level, not counting this field
    let numbytes = r.read_i32()?;
    if numbytes < 0 || 4 + numbytes as i64 > slabs_end {
        return Err(LoadError::Format(format!("KVX voxel data of {} bytes does not fit before the palette", numbytes)));
    }
    let xsize = grid_size(r.read_i32()?, "x")?;
    let ysize = grid_size(r.read_i32()?, "y")?;
    let zsize = grid_size(r.read_i32()?, "z")?;
    let pivot = [
        r.read_i32()? as f32 * PIVOT_SCALE,
        r.read_i32()? as f32 * PIVOT_SCALE,
        r.read_i32()? as f32 * PIVOT_SCALE,
    ];

    // both tables carry one extra trailing entry
    let mut xoffset = Vec::new();
    for _ in 0..=xsize {
        xoffset.push(r.read_i32()? as i64);
    }
    let mut xyoffset = Vec::new();
    for _ in 0..xsize {
        let mut column = Vec::new();
        for _ in 0..=ysize {
            column.push(r.read_i16()? as i64);
        }
        xyoffset.push(column);
    }

    let mut offsets = Vec::new();
    for x in 0..xsize as usize {
        for y in 0..ysize as usize {
            offsets.push(xoffset[x] + xyoffset[x][y] + KVX_HEADER_LEN);
        }
    }

    let palette = match override_palette {
        Some(p) => p.clone(),
        None => {
            r.seek(slabs_end)?;
            Palette::read_vga(&mut r)?
        }
    };

    let mut builder = VoxelMeshBuilder::new(pivot);
    let mut counter = 0usize;
    for x in 0..xsize {
        for y in 0..ysize {
            r.seek(offsets[counter])?;
            let next = offsets.get(counter + 1).copied().unwrap_or(slabs_end);

            while (r.position() as i64) < next {
                let ztop = r.read_u8()? as i32;
                let zleng = r.read_u8()? as i32;
                if ztop + zleng > zsize {
                    break;
                }
                let faces = SlabFaces::from_bits_truncate(r.read_u8()?);
                let colors = r.read_bytes(zleng as usize)?;
                if !colors.is_empty() {
                    builder.add_slab(x, y, ztop, faces, colors);
                }
            }
            counter += 1;
        }
    }

    Ok(KvxModel {
        mesh: Mesh::new(builder.verts, builder.indices),
        palette,
        xsize,
        ysize,
        zsize,
        pivot,
        face_count: builder.face_count,
    })
}

/// Loader entry used when a KVX is named directly. The mesh texture is the
/// palette swatch, so no skin name is reported.
pub fn load(data: &[u8], params: &ModelLoadParams, ctx: &mut LoadContext<'_>) -> LoadResult {
    let model = match read_kvx(data, params.override_palette.as_deref()) {
        Ok(m) => m,
        Err(e) => return LoadResult::failed(e.to_string()),
    };
    for v in model.mesh.vertices() {
        ctx.bounds.update(v.x, v.y, v.z);
    }
    let mut result = LoadResult::new();
    result.push(model.mesh, "");
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::palette::PixelColor;
    use crate::testutil::{assert_meshes_well_formed, assert_truncations_fail, ByteWriter};

    /// KVX file from per column slab bytes, columns in x major order.
    fn build_kvx(xsize: i32, ysize: i32, zsize: i32, pivot: [i32; 3], columns: &[Vec<u8>]) -> Vec<u8> {
        assert_eq!(columns.len(), (xsize * ysize) as usize);
        let table_len = (xsize + 1) * 4 + xsize * (ysize + 1) * 2;

        let slab_bytes: usize = columns.iter().map(Vec::len).sum();
        let mut w = ByteWriter::new();
        w.i32(24 + table_len + slab_bytes as i32).i32(xsize).i32(ysize).i32(zsize);
        for p in pivot {
            w.i32(p * 256);
        }

        let mut at = table_len;
        for x in 0..=xsize {
            w.i32(at);
            if x < xsize {
                for y in 0..ysize {
                    at += columns[(x * ysize + y) as usize].len() as i32;
                }
            }
        }
        for x in 0..xsize {
            let mut rel = 0i16;
            for y in 0..=ysize {
                w.i16(rel);
                if y < ysize {
                    rel += columns[(x * ysize + y) as usize].len() as i16;
                }
            }
        }
        for c in columns {
            w.bytes(c);
        }
        for i in 0..256u32 {
            let c = (i % 64) as u8;
            w.u8(c).u8(c).u8(c);
        }
        w.finish()
    }

    fn slab(ztop: u8, faces: SlabFaces, colors: &[u8]) -> Vec<u8> {
        let mut s = vec![ztop, colors.len() as u8, faces.bits()];
        s.extend_from_slice(colors);
        s
    }

    #[test]
    fn test_kvx_shared_corners_deduplicate() {
        // top and left faces of one voxel share two corners
        let data = build_kvx(1, 1, 1, [0, 0, 0], &[slab(0, SlabFaces::TOP | SlabFaces::LEFT, &[5])]);
        let model = read_kvx(&data, None).unwrap();
        assert_eq!(model.face_count, 4);
        assert_eq!(model.mesh.indices().len(), 12);
        assert_eq!(model.mesh.vertices().len(), 6);
        assert!(model.mesh.is_well_formed());
    }

    #[test]
    fn test_kvx_adjacent_voxels() {
        let columns = vec![slab(0, SlabFaces::TOP, &[5]), slab(0, SlabFaces::TOP, &[5])];
        let data = build_kvx(2, 1, 1, [0, 0, 0], &columns);
        let model = read_kvx(&data, None).unwrap();
        assert_eq!(model.face_count, 4);
        // corners on the shared edge carry opposite texture nudges
        assert_eq!(model.mesh.vertices().len(), 8);

        let mut ctx = LoadContext::default();
        let result = load(&data, &ModelLoadParams::new("barrel.kvx"), &mut ctx);
        assert!(result.is_ok());
        assert_eq!(result.skins, vec![String::new()]);
        assert_meshes_well_formed(&result);
    }

    #[test]
    fn test_kvx_color_runs_and_uvs() {
        // two voxels of colour 5 then one of colour 17, left faces only
        let data = build_kvx(1, 1, 3, [0, 0, 0], &[slab(0, SlabFaces::LEFT, &[5, 5, 17])]);
        let model = read_kvx(&data, None).unwrap();
        assert_eq!(model.face_count, 4);
        let v = model.mesh.vertices();
        assert_eq!((v[0].u, v[0].v), (5.0 / 16.0, 0.0));
        // the first run spans two voxels
        assert_eq!(v[2].z, -2.0);
        let last = v[v.len() - 1];
        assert!((last.u - (1.0 / 16.0 + UV_NUDGE)).abs() < 1e-6);
        assert!((last.v - (1.0 / 16.0 + UV_NUDGE)).abs() < 1e-6);
    }

    #[test]
    fn test_kvx_pivot_and_radius() {
        let data = build_kvx(4, 2, 1, [2, 1, 0], &vec![Vec::new(); 8]);
        let model = read_kvx(&data, None).unwrap();
        assert_eq!(model.pivot, [2.0, 1.0, 0.0]);
        assert!(model.mesh.is_empty());
        // x: 2 +- 2, y: 1 +- 1
        assert_eq!(model.radius(&[1.0, 1.0, 1.0]), 4);
        assert_eq!(model.radius(&[2.0, 1.0, 1.0]), 8);
    }

    #[test]
    fn test_kvx_palette_and_override() {
        let data = build_kvx(1, 1, 1, [0, 0, 0], &[slab(0, SlabFaces::TOP, &[3])]);
        let model = read_kvx(&data, None).unwrap();
        assert_eq!(model.palette.color(3), PixelColor::new(255, 12, 12, 12));
        let tex = model.texture();
        assert_eq!((tex.width, tex.height), (64, 64));
        assert_eq!(tex.pixel(12, 0), PixelColor::new(255, 12, 12, 12));

        let game = Palette::grayscale();
        let model = read_kvx(&data, Some(&game)).unwrap();
        assert_eq!(model.palette, game);
    }

    #[test]
    fn test_kvx_slab_past_zsize_ends_column() {
        let mut column = slab(0, SlabFaces::TOP, &[1]);
        column.extend(slab(4, SlabFaces::TOP, &[1]));
        let data = build_kvx(1, 1, 2, [0, 0, 0], &[column]);
        let model = read_kvx(&data, None).unwrap();
        assert_eq!(model.face_count, 2);
    }

    #[test]
    fn test_kvx_truncated() {
        assert!(read_kvx(&[0u8; 16], None).is_err());

        let column = slab(0, SlabFaces::all(), &[3, 4]);
        let data = build_kvx(2, 1, 4, [1, 0, 0], &[column.clone(), column]);
        let params = ModelLoadParams::new("t.kvx");
        assert_truncations_fail(&data, |d| load(d, &params, &mut LoadContext::default()));
    }

    #[test]
    fn test_kvx_data_size_must_fit() {
        let mut data = build_kvx(1, 1, 1, [0, 0, 0], &[slab(0, SlabFaces::TOP, &[1])]);
        data[0..4].copy_from_slice(&4096i32.to_le_bytes());
        let err = read_kvx(&data, None).unwrap_err();
        assert!(err.to_string().contains("does not fit before the palette"), "{}", err);
    }
}
