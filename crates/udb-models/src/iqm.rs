// iqm.rs — Inter-Quake Model loader with skeletal pose evaluation
//
// The file is decoded into an `IqmModel` (meshes, joints, poses and the
// decompressed per-frame joint transforms). A frame is then evaluated into
// one bone matrix per joint and every vertex is skinned on the CPU, so the
// output meshes are static snapshots of the requested frame.

use std::collections::BTreeMap;

use bitflags::bitflags;

use udb_common::binreader::{name_at, BinReader};
use udb_common::mathlib::{fix_model_rotation, vector_add, vector_scale, Mat4, Quat, Vec3};
use udb_common::BoundingBoxSizes;

use crate::mesh::{LoadError, LoadResult, LoadResultOf, Mesh, WorldVertex, WHITE};
use crate::modeldef::{LoadContext, ModelLoadParams};

pub const IQM_MAGIC: &[u8; 16] = b"INTERQUAKEMODEL\0";
pub const IQM_VERSION: u32 = 2;

// vertex array types
pub const IQM_POSITION: u32 = 0;
pub const IQM_TEXCOORD: u32 = 1;
pub const IQM_NORMAL: u32 = 2;
pub const IQM_TANGENT: u32 = 3;
pub const IQM_BLENDINDEXES: u32 = 4;
pub const IQM_BLENDWEIGHTS: u32 = 5;
pub const IQM_COLOR: u32 = 6;

// vertex array component formats
pub const IQM_UBYTE: u32 = 1;
pub const IQM_INT: u32 = 4;
pub const IQM_FLOAT: u32 = 7;

bitflags! {
    /// Channels of a pose that are stored per frame. Channels without their
    /// bit set keep the pose's constant offset.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct ChannelMask: u32 {
        const TRANSLATE_X = 0x001;
        const TRANSLATE_Y = 0x002;
        const TRANSLATE_Z = 0x004;
        const ROTATE_X    = 0x008;
        const ROTATE_Y    = 0x010;
        const ROTATE_Z    = 0x020;
        const ROTATE_W    = 0x040;
        const SCALE_X     = 0x080;
        const SCALE_Y     = 0x100;
        const SCALE_Z     = 0x200;
    }
}

pub const POSE_CHANNELS: usize = 10;

// ============================================================
// File records
// ============================================================

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IqmHeader {
    pub filesize: u32,
    pub flags: u32,
    pub num_text: u32,
    pub ofs_text: u32,
    pub num_meshes: u32,
    pub ofs_meshes: u32,
    pub num_vertexarrays: u32,
    pub num_vertices: u32,
    pub ofs_vertexarrays: u32,
    pub num_triangles: u32,
    pub ofs_triangles: u32,
    pub ofs_adjacency: u32,
    pub num_joints: u32,
    pub ofs_joints: u32,
    pub num_poses: u32,
    pub ofs_poses: u32,
    pub num_anims: u32,
    pub ofs_anims: u32,
    pub num_frames: u32,
    pub num_framechannels: u32,
    pub ofs_frames: u32,
    pub ofs_bounds: u32,
    pub num_comment: u32,
    pub ofs_comment: u32,
    pub num_extensions: u32,
    pub ofs_extensions: u32,
}

impl IqmHeader {
    fn read(r: &mut BinReader<'_>) -> LoadResultOf<Self> {
        let magic = r.read_bytes(IQM_MAGIC.len())?;
        if magic != IQM_MAGIC {
            return Err(LoadError::Format("Not an IQM file!".into()));
        }
        let version = r.read_u32()?;
        if version != IQM_VERSION {
            return Err(LoadError::Format("Unsupported IQM version".into()));
        }

        let mut fields = [0u32; 26];
        for f in fields.iter_mut() {
            *f = r.read_u32()?;
        }
        let [filesize, flags, num_text, ofs_text, num_meshes, ofs_meshes, num_vertexarrays, num_vertices, ofs_vertexarrays, num_triangles, ofs_triangles, ofs_adjacency, num_joints, ofs_joints, num_poses, ofs_poses, num_anims, ofs_anims, num_frames, num_framechannels, ofs_frames, ofs_bounds, num_comment, ofs_comment, num_extensions, ofs_extensions] =
            fields;
        Ok(Self {
            filesize,
            flags,
            num_text,
            ofs_text,
            num_meshes,
            ofs_meshes,
            num_vertexarrays,
            num_vertices,
            ofs_vertexarrays,
            num_triangles,
            ofs_triangles,
            ofs_adjacency,
            num_joints,
            ofs_joints,
            num_poses,
            ofs_poses,
            num_anims,
            ofs_anims,
            num_frames,
            num_framechannels,
            ofs_frames,
            ofs_bounds,
            num_comment,
            ofs_comment,
            num_extensions,
            ofs_extensions,
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct IqmMesh {
    pub name: String,
    pub material: String,
    pub first_vertex: u32,
    pub num_vertices: u32,
    pub first_triangle: u32,
    pub num_triangles: u32,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct IqmJoint {
    pub name: String,
    /// Negative for a root joint.
    pub parent: i32,
    pub translate: Vec3,
    pub rotate: Quat,
    pub scale: Vec3,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct IqmPose {
    pub parent: i32,
    pub mask: ChannelMask,
    pub channel_offset: [f32; POSE_CHANNELS],
    pub channel_scale: [f32; POSE_CHANNELS],
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct IqmAnim {
    pub name: String,
    pub first_frame: u32,
    pub num_frames: u32,
    pub framerate: f32,
    pub looped: bool,
}

/// Decoded joint transform for one frame.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Trs {
    pub translation: Vec3,
    pub rotation: Quat,
    pub scaling: Vec3,
}

impl Trs {
    pub fn matrix(&self) -> Mat4 {
        Mat4::from_trs(&self.translation, &self.rotation, &self.scaling)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
struct IqmVertex {
    pos: Vec3,
    normal: Vec3,
    u: f32,
    v: f32,
    bone_index: [u8; 4],
    bone_weight: [u8; 4],
}

#[derive(Debug, Clone, Copy)]
struct VertexArray {
    kind: u32,
    format: u32,
    size: u32,
    offset: u32,
}

// ============================================================
// Decoded model
// ============================================================

#[derive(Debug, Clone, Default)]
pub struct IqmModel {
    pub header: IqmHeader,
    pub meshes: Vec<IqmMesh>,
    pub indices: Vec<u32>,
    pub joints: Vec<IqmJoint>,
    pub poses: Vec<IqmPose>,
    pub anims: Vec<IqmAnim>,
    pub baseframe: Vec<Mat4>,
    pub inverse_baseframe: Vec<Mat4>,
    /// Raw channel values, `num_framechannels` per frame. Decoded per
    /// requested frame by `frame_transforms`.
    frame_data: Vec<u16>,
    pub num_frames: usize,
    vertices: Vec<IqmVertex>,
}

fn read_vec3(r: &mut BinReader<'_>) -> LoadResultOf<Vec3> {
    Ok([r.read_f32()?, r.read_f32()?, r.read_f32()?])
}

fn read_name(r: &mut BinReader<'_>, text: &[u8]) -> LoadResultOf<String> {
    let offset = r.read_u32()? as usize;
    Ok(name_at(text, offset)?)
}

impl IqmModel {
    pub fn parse(data: &[u8]) -> LoadResultOf<IqmModel> {
        let mut r = BinReader::new(data);
        let header = IqmHeader::read(&mut r)?;

        if header.num_text == 0 {
            return Err(LoadError::Format("IQM model needs material names".into()));
        }
        r.seek(header.ofs_text as i64)?;
        let mut text = r.read_bytes(header.num_text as usize)?.to_vec();
        if let Some(last) = text.last_mut() {
            *last = 0;
        }

        let mut model = IqmModel { header: header.clone(), ..Default::default() };

        r.seek(header.ofs_meshes as i64)?;
        for _ in 0..header.num_meshes {
            model.meshes.push(IqmMesh {
                name: read_name(&mut r, &text)?,
                material: read_name(&mut r, &text)?,
                first_vertex: r.read_u32()?,
                num_vertices: r.read_u32()?,
                first_triangle: r.read_u32()?,
                num_triangles: r.read_u32()?,
            });
        }

        let index_count = header.num_triangles as usize * 3;
        r.seek(header.ofs_triangles as i64)?;
        model.indices.reserve(r.capacity_for(index_count, 4));
        for _ in 0..index_count {
            model.indices.push(r.read_u32()?);
        }

        // adjacency is not used, only its extent is checked
        if header.ofs_adjacency != 0 {
            r.seek(header.ofs_adjacency as i64)?;
            r.read_bytes(index_count * 4)?;
        }

        r.seek(header.ofs_joints as i64)?;
        for _ in 0..header.num_joints {
            let name = read_name(&mut r, &text)?;
            let parent = r.read_i32()?;
            let translate = read_vec3(&mut r)?;
            let rotate = Quat::new(r.read_f32()?, r.read_f32()?, r.read_f32()?, r.read_f32()?).normalized();
            let scale = read_vec3(&mut r)?;
            model.joints.push(IqmJoint { name, parent, translate, rotate, scale });
        }

        r.seek(header.ofs_poses as i64)?;
        for _ in 0..header.num_poses {
            let parent = r.read_i32()?;
            let mask = ChannelMask::from_bits_truncate(r.read_u32()?);
            let mut pose = IqmPose { parent, mask, ..Default::default() };
            for c in pose.channel_offset.iter_mut() {
                *c = r.read_f32()?;
            }
            for c in pose.channel_scale.iter_mut() {
                *c = r.read_f32()?;
            }
            model.poses.push(pose);
        }

        r.seek(header.ofs_anims as i64)?;
        for _ in 0..header.num_anims {
            model.anims.push(IqmAnim {
                name: read_name(&mut r, &text)?,
                first_frame: r.read_u32()?,
                num_frames: r.read_u32()?,
                framerate: r.read_f32()?,
                looped: r.read_u32()? & 1 == 1,
            });
        }

        model.build_baseframe()?;

        if header.num_frames != 0 {
            r.seek(header.ofs_frames as i64)?;
            model.read_frames(&mut r)?;
            model.num_frames = header.num_frames as usize;
        } else {
            // no animation: the bind pose is the only frame
            model.num_frames = 1;
        }

        // per-frame bounds: mins[3], maxs[3], xyradius, radius
        if header.ofs_bounds != 0 {
            r.seek(header.ofs_bounds as i64)?;
            r.read_bytes(model.num_frames * 8 * 4)?;
        }

        r.seek(header.ofs_vertexarrays as i64)?;
        let mut arrays = Vec::with_capacity(r.capacity_for(header.num_vertexarrays as usize, 20));
        for _ in 0..header.num_vertexarrays {
            let kind = r.read_u32()?;
            let _flags = r.read_u32()?;
            let format = r.read_u32()?;
            let size = r.read_u32()?;
            let offset = r.read_u32()?;
            arrays.push(VertexArray { kind, format, size, offset });
        }

        // every vertex has at least a float position in the file
        if header.num_vertices as usize > data.len() / 12 {
            return Err(LoadError::Format(format!("IQM vertex count {} exceeds the file size", header.num_vertices)));
        }
        model.vertices = vec![IqmVertex::default(); header.num_vertices as usize];
        for va in &arrays {
            r.seek(va.offset as i64)?;
            model.read_vertex_array(&mut r, va)?;
        }

        Ok(model)
    }

    /// Bind pose per joint and its inverse, chained through the parent.
    fn build_baseframe(&mut self) -> LoadResultOf<()> {
        for (i, j) in self.joints.iter().enumerate() {
            let m = Mat4::from_trs(&j.translate, &j.rotate, &j.scale);
            let invm = m.inverse();
            let (bf, ibf) = if j.parent >= 0 {
                let parent = j.parent as usize;
                if parent >= i {
                    return Err(LoadError::Format(format!(
                        "joint {} has parent {} which is not defined before it",
                        i, j.parent
                    )));
                }
                (self.baseframe[parent] * m, invm * self.inverse_baseframe[parent])
            } else {
                (m, invm)
            };
            self.baseframe.push(bf);
            self.inverse_baseframe.push(ibf);
        }
        Ok(())
    }

    fn read_frames(&mut self, r: &mut BinReader<'_>) -> LoadResultOf<()> {
        let channels: usize = self.poses.iter().map(|p| p.mask.bits().count_ones() as usize).sum();
        if self.header.num_framechannels as usize != channels {
            return Err(LoadError::Format(format!(
                "IQM frame channel count {} does not match the {} channels of the pose masks",
                self.header.num_framechannels, channels
            )));
        }
        let count = (self.header.num_frames as usize)
            .checked_mul(channels)
            .filter(|&n| n <= r.remaining() / 2)
            .ok_or_else(|| {
                LoadError::Format(format!("IQM frame data for {} frames exceeds the file size", self.header.num_frames))
            })?;
        self.frame_data = (0..count).map(|_| r.read_u16()).collect::<Result<_, _>>()?;
        Ok(())
    }

    /// One transform per pose for `frame`, or the bind pose of every joint
    /// when the file has no animation. Frames past the end clamp to the last.
    pub fn frame_transforms(&self, frame: usize) -> LoadResultOf<Vec<Trs>> {
        if self.header.num_frames == 0 {
            return Ok(self
                .joints
                .iter()
                .map(|j| Trs { translation: j.translate, rotation: j.rotate.normalized(), scaling: j.scale })
                .collect());
        }

        let start = frame.min(self.num_frames.saturating_sub(1)) * self.header.num_framechannels as usize;
        let mut data = self.frame_data.get(start..).unwrap_or_default().iter();
        self.poses
            .iter()
            .map(|p| -> LoadResultOf<Trs> {
                let mut channels = p.channel_offset;
                for (c, value) in channels.iter_mut().enumerate() {
                    if p.mask.bits() & (1 << c) != 0 {
                        let raw = data
                            .next()
                            .ok_or_else(|| LoadError::Format(format!("IQM frame {} is missing channel data", frame)))?;
                        *value += *raw as f32 * p.channel_scale[c];
                    }
                }
                Ok(Trs {
                    translation: [channels[0], channels[1], channels[2]],
                    rotation: Quat::new(channels[3], channels[4], channels[5], channels[6]).normalized(),
                    scaling: [channels[7], channels[8], channels[9]],
                })
            })
            .collect()
    }

    fn read_vertex_array(&mut self, r: &mut BinReader<'_>, va: &VertexArray) -> LoadResultOf<()> {
        let unsupported = |name: &str| LoadError::Format(format!("Unsupported {} vertex format", name));
        match va.kind {
            IQM_POSITION => {
                if va.format != IQM_FLOAT || va.size != 3 {
                    return Err(unsupported("IQM_POSITION"));
                }
                for v in self.vertices.iter_mut() {
                    v.pos = read_vec3(r)?;
                }
            }
            IQM_TEXCOORD => {
                if va.format != IQM_FLOAT || va.size != 2 {
                    return Err(unsupported("IQM_TEXCOORD"));
                }
                for v in self.vertices.iter_mut() {
                    v.u = r.read_f32()?;
                    v.v = r.read_f32()?;
                }
            }
            IQM_NORMAL => {
                if va.format != IQM_FLOAT || va.size != 3 {
                    return Err(unsupported("IQM_NORMAL"));
                }
                for v in self.vertices.iter_mut() {
                    v.normal = read_vec3(r)?;
                }
            }
            IQM_BLENDINDEXES => match (va.format, va.size) {
                (IQM_UBYTE, 4) => {
                    for v in self.vertices.iter_mut() {
                        for k in 0..4 {
                            v.bone_index[k] = r.read_u8()?;
                        }
                    }
                }
                (IQM_INT, 4) => {
                    for v in self.vertices.iter_mut() {
                        for k in 0..4 {
                            v.bone_index[k] = r.read_i32()? as u8;
                        }
                    }
                }
                _ => return Err(unsupported("IQM_BLENDINDEXES")),
            },
            IQM_BLENDWEIGHTS => match (va.format, va.size) {
                (IQM_UBYTE, 4) => {
                    for v in self.vertices.iter_mut() {
                        for k in 0..4 {
                            v.bone_weight[k] = r.read_u8()?;
                        }
                    }
                }
                (IQM_FLOAT, 4) => {
                    for v in self.vertices.iter_mut() {
                        for k in 0..4 {
                            v.bone_weight[k] = (r.read_f32()? * 255.0).clamp(0.0, 255.0) as u8;
                        }
                    }
                }
                _ => return Err(unsupported("IQM_BLENDWEIGHTS")),
            },
            // tangents, colours and custom arrays are not needed
            _ => {}
        }
        Ok(())
    }

    pub fn num_vertices(&self) -> usize {
        self.vertices.len()
    }

    /// Bone matrices blended between two frames. Frames past the end clamp
    /// to the last one.
    pub fn calculate_bones(&self, frame1: usize, frame2: usize, t: f32) -> LoadResultOf<Vec<Mat4>> {
        let numbones = self.joints.len();
        let mut bones: Vec<Mat4> = Vec::with_capacity(numbones);
        if numbones == 0 {
            return Ok(bones);
        }

        let pose1 = self.frame_transforms(frame1)?;
        let pose2 = self.frame_transforms(frame2)?;
        let invt = 1.0 - t;

        for (i, joint) in self.joints.iter().enumerate() {
            let (from, to) = match (pose1.get(i), pose2.get(i)) {
                (Some(a), Some(b)) => (a, b),
                _ => {
                    return Err(LoadError::Format(format!(
                        "not enough pose data for {} joints in {} frames",
                        numbones, self.num_frames
                    )))
                }
            };

            let bone = Trs {
                translation: vector_add(&vector_scale(&from.translation, invt), &vector_scale(&to.translation, t)),
                rotation: Quat::nlerp(&from.rotation, &to.rotation, t),
                scaling: vector_add(&vector_scale(&from.scaling, invt), &vector_scale(&to.scaling, t)),
            };
            let m = bone.matrix();

            let matrix = if joint.parent >= 0 {
                let parent = joint.parent as usize;
                bones[parent] * self.baseframe[parent] * m * self.inverse_baseframe[i]
            } else {
                m * self.inverse_baseframe[i]
            };
            bones.push(matrix);
        }
        Ok(bones)
    }

    /// Every vertex posed at `frame`, in map orientation.
    pub fn skinned_vertices(&self, frame: usize) -> LoadResultOf<Vec<WorldVertex>> {
        let bones = self.calculate_bones(frame, frame, 0.0)?;
        let normal_bones: Vec<Mat4> = bones.iter().map(Mat4::normal_matrix).collect();

        let mut out = Vec::with_capacity(self.vertices.len());
        for v in &self.vertices {
            let mut pos = v.pos;
            let mut normal = v.normal;

            if v.bone_weight.iter().any(|&w| w != 0) {
                let total: f32 = v.bone_weight.iter().map(|&w| w as f32).sum();
                pos = [0.0; 3];
                normal = [0.0; 3];
                for k in 0..4 {
                    if v.bone_weight[k] == 0 {
                        continue;
                    }
                    let bone = v.bone_index[k] as usize;
                    if bone >= bones.len() {
                        return Err(LoadError::IndexOutOfRange { what: "bone", index: bone as i64, count: bones.len() });
                    }
                    let weight = v.bone_weight[k] as f32 / total;
                    pos = vector_add(&pos, &vector_scale(&bones[bone].transform_point(&v.pos), weight));
                    normal = vector_add(&normal, &vector_scale(&normal_bones[bone].transform_point(&v.normal), weight));
                }
            }

            let mut wv = WorldVertex::new(0.0, 0.0, 0.0, WHITE, v.u, v.v);
            wv.set_position(&fix_model_rotation(&pos));
            wv.set_normal(&normal);
            out.push(wv);
        }
        Ok(out)
    }

    /// Split the skinned vertex pool back into one mesh per IQM mesh.
    fn build_result(
        &self,
        verts: &[WorldVertex],
        skins: Option<&BTreeMap<usize, String>>,
        bounds: &mut BoundingBoxSizes,
    ) -> LoadResultOf<LoadResult> {
        let mut result = LoadResult::new();
        for (mi, mesh) in self.meshes.iter().enumerate() {
            let first = mesh.first_vertex as usize;
            let count = mesh.num_vertices as usize;
            let mesh_verts = verts.get(first..first + count).ok_or(LoadError::IndexOutOfRange {
                what: "mesh vertex",
                index: (first + count) as i64,
                count: verts.len(),
            })?;

            let first_index = mesh.first_triangle as usize * 3;
            let index_count = mesh.num_triangles as usize * 3;
            let tri = self.indices.get(first_index..first_index + index_count).ok_or(LoadError::IndexOutOfRange {
                what: "mesh triangle",
                index: (first_index + index_count) as i64,
                count: self.indices.len(),
            })?;

            let mut indices = Vec::with_capacity(index_count);
            for &index in tri {
                let local = (index as i64) - first as i64;
                if local < 0 || local as usize >= count {
                    return Err(LoadError::IndexOutOfRange { what: "vertex", index: index as i64, count: verts.len() });
                }
                indices.push(local as u32);
            }

            for v in mesh_verts {
                bounds.update(v.x, v.y, v.z);
            }

            let skin = match skins {
                None => String::new(),
                Some(map) => map.get(&mi).cloned().unwrap_or_else(|| mesh.material.clone()),
            };
            result.push(Mesh::new(mesh_verts.to_vec(), indices), skin);
        }
        Ok(result)
    }
}

pub fn load(data: &[u8], params: &ModelLoadParams, ctx: &mut LoadContext<'_>) -> LoadResult {
    read_iqm(data, params, &mut ctx.bounds).into()
}

fn read_iqm(data: &[u8], params: &ModelLoadParams, bounds: &mut BoundingBoxSizes) -> LoadResultOf<LoadResult> {
    let model = IqmModel::parse(data)?;
    let frame = match usize::try_from(params.frame) {
        Ok(f) if f < model.num_frames => f,
        _ => 0,
    };
    let verts = model.skinned_vertices(frame)?;
    model.build_result(&verts, params.skins(), bounds)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{assert_meshes_well_formed, assert_truncations_fail, ByteWriter};

    const HEADER_LEN: usize = 16 + 27 * 4;

    /// header field offset, field 0 is the version
    fn field(index: usize) -> usize {
        16 + index * 4
    }

    const F_NUM_TEXT: usize = 3;
    const F_OFS_TEXT: usize = 4;
    const F_NUM_MESHES: usize = 5;
    const F_OFS_MESHES: usize = 6;
    const F_NUM_VERTEXARRAYS: usize = 7;
    const F_NUM_VERTICES: usize = 8;
    const F_OFS_VERTEXARRAYS: usize = 9;
    const F_NUM_TRIANGLES: usize = 10;
    const F_OFS_TRIANGLES: usize = 11;
    const F_NUM_JOINTS: usize = 13;
    const F_OFS_JOINTS: usize = 14;
    const F_NUM_POSES: usize = 15;
    const F_OFS_POSES: usize = 16;
    const F_NUM_FRAMES: usize = 19;
    const F_NUM_FRAMECHANNELS: usize = 20;
    const F_OFS_FRAMES: usize = 21;

    const ROOT_T: Vec3 = [1.0, 2.0, 3.0];
    // 45 degrees about z
    const ROOT_Q: [f32; 4] = [0.0, 0.0, 0.382_683_43, 0.923_879_5];
    const CHILD_T: Vec3 = [0.0, 0.0, 4.0];

    const POSITIONS: [Vec3; 3] = [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]];

    /// Three vertex, two joint model. With `animated` it carries two frames:
    /// frame 0 equals the bind pose, frame 1 moves the root 10 units along x.
    fn build_iqm(animated: bool) -> Vec<u8> {
        let mut w = ByteWriter::new();
        w.bytes(IQM_MAGIC).u32(IQM_VERSION).zeros(26 * 4);
        assert_eq!(w.len(), HEADER_LEN);

        let text = b"\0mat\0root\0child\0";
        let ofs_text = w.len();
        w.bytes(text);
        w.patch_u32(field(F_NUM_TEXT), text.len() as u32).patch_u32(field(F_OFS_TEXT), ofs_text as u32);

        let ofs_meshes = w.len();
        w.u32(0).u32(1).u32(0).u32(3).u32(0).u32(1);
        w.patch_u32(field(F_NUM_MESHES), 1).patch_u32(field(F_OFS_MESHES), ofs_meshes as u32);

        let ofs_tris = w.len();
        w.u32(0).u32(1).u32(2);
        w.patch_u32(field(F_NUM_TRIANGLES), 1).patch_u32(field(F_OFS_TRIANGLES), ofs_tris as u32);

        let ofs_joints = w.len();
        w.u32(5).i32(-1);
        for c in ROOT_T {
            w.f32(c);
        }
        for c in ROOT_Q {
            w.f32(c);
        }
        w.f32(1.0).f32(1.0).f32(1.0);
        w.u32(10).i32(0);
        for c in CHILD_T {
            w.f32(c);
        }
        w.f32(0.0).f32(0.0).f32(0.0).f32(1.0);
        w.f32(2.0).f32(2.0).f32(2.0);
        w.patch_u32(field(F_NUM_JOINTS), 2).patch_u32(field(F_OFS_JOINTS), ofs_joints as u32);

        if animated {
            let ofs_poses = w.len();
            // root: translate x animated
            w.i32(-1).u32(ChannelMask::TRANSLATE_X.bits());
            for c in [ROOT_T[0], ROOT_T[1], ROOT_T[2], ROOT_Q[0], ROOT_Q[1], ROOT_Q[2], ROOT_Q[3], 1.0, 1.0, 1.0] {
                w.f32(c);
            }
            w.f32(1.0).zeros(9 * 4);
            // child: rotation stored unnormalized as (0, 0, 0, 3)
            let rot = ChannelMask::ROTATE_X | ChannelMask::ROTATE_Y | ChannelMask::ROTATE_Z | ChannelMask::ROTATE_W;
            w.i32(0).u32(rot.bits());
            for c in [CHILD_T[0], CHILD_T[1], CHILD_T[2], 0.0, 0.0, 0.0, 0.0, 2.0, 2.0, 2.0] {
                w.f32(c);
            }
            w.zeros(3 * 4).f32(1.0).f32(1.0).f32(1.0).f32(1.0).zeros(3 * 4);
            w.patch_u32(field(F_NUM_POSES), 2).patch_u32(field(F_OFS_POSES), ofs_poses as u32);

            let ofs_frames = w.len();
            for root_x in [0u16, 10] {
                w.u16(root_x).u16(0).u16(0).u16(0).u16(3);
            }
            w.patch_u32(field(F_NUM_FRAMES), 2)
                .patch_u32(field(F_NUM_FRAMECHANNELS), 5)
                .patch_u32(field(F_OFS_FRAMES), ofs_frames as u32);
        }

        // vertex arrays
        let ofs_va = w.len();
        let data_start = ofs_va + 5 * 20;
        let pos_ofs = data_start;
        let uv_ofs = pos_ofs + 3 * 12;
        let normal_ofs = uv_ofs + 3 * 8;
        let index_ofs = normal_ofs + 3 * 12;
        let weight_ofs = index_ofs + 3 * 4;
        for (kind, format, size, ofs) in [
            (IQM_POSITION, IQM_FLOAT, 3, pos_ofs),
            (IQM_TEXCOORD, IQM_FLOAT, 2, uv_ofs),
            (IQM_NORMAL, IQM_FLOAT, 3, normal_ofs),
            (IQM_BLENDINDEXES, IQM_UBYTE, 4, index_ofs),
            (IQM_BLENDWEIGHTS, IQM_UBYTE, 4, weight_ofs),
        ] {
            w.u32(kind).u32(0).u32(format).u32(size).u32(ofs as u32);
        }
        for p in POSITIONS {
            w.f32(p[0]).f32(p[1]).f32(p[2]);
        }
        for (u, v) in [(0.0f32, 0.0f32), (1.0, 0.0), (0.0, 1.0)] {
            w.f32(u).f32(v);
        }
        for _ in 0..3 {
            w.f32(0.0).f32(0.0).f32(1.0);
        }
        // vertex 0 on the child, vertex 1 split between both, vertex 2 unweighted
        w.bytes(&[1, 0, 0, 0]).bytes(&[0, 1, 0, 0]).bytes(&[0, 0, 0, 0]);
        w.bytes(&[255, 0, 0, 0]).bytes(&[128, 127, 0, 0]).bytes(&[0, 0, 0, 0]);
        w.patch_u32(field(F_NUM_VERTEXARRAYS), 5)
            .patch_u32(field(F_NUM_VERTICES), 3)
            .patch_u32(field(F_OFS_VERTEXARRAYS), ofs_va as u32);

        w.finish()
    }

    fn assert_vec_near(a: &Vec3, b: &Vec3) {
        for i in 0..3 {
            assert!((a[i] - b[i]).abs() < 1e-3, "expected ~{:?}, got {:?}", b, a);
        }
    }

    fn load_frame(data: &[u8], frame: i32) -> LoadResult {
        let mut ctx = LoadContext::default();
        load(data, &ModelLoadParams::new("m.iqm").with_frame(frame), &mut ctx)
    }

    #[test]
    fn test_iqm_static_pose_reproduces_mesh() {
        let result = load_frame(&build_iqm(false), 0);
        assert!(result.is_ok(), "{:?}", result.errors);
        assert_eq!(result.skins, vec!["mat".to_string()]);
        let mesh = &result.meshes[0];
        assert_eq!(mesh.indices(), &[0, 1, 2]);
        for (v, p) in mesh.vertices().iter().zip(POSITIONS.iter()) {
            assert_vec_near(&v.position(), &fix_model_rotation(p));
        }
        assert_meshes_well_formed(&result);
    }

    #[test]
    fn test_iqm_static_bones_are_identity() {
        let model = IqmModel::parse(&build_iqm(false)).unwrap();
        assert_eq!(model.num_frames, 1);
        assert_eq!(model.joints[1].name, "child");
        let bones = model.calculate_bones(0, 0, 0.0).unwrap();
        assert_eq!(bones.len(), 2);
        for bone in &bones {
            for i in 0..16 {
                assert!((bone.m[i] - Mat4::IDENTITY.m[i]).abs() < 1e-4, "{:?}", bone);
            }
        }
    }

    #[test]
    fn test_iqm_animated_frame() {
        let data = build_iqm(true);
        let frame0 = load_frame(&data, 0);
        assert!(frame0.is_ok(), "{:?}", frame0.errors);
        let v = frame0.meshes[0].vertices();
        assert_vec_near(&v[0].position(), &fix_model_rotation(&POSITIONS[0]));

        let frame1 = load_frame(&data, 1);
        let v = frame1.meshes[0].vertices();
        assert_vec_near(&v[0].position(), &fix_model_rotation(&[11.0, 0.0, 0.0]));
        assert_vec_near(&v[1].position(), &fix_model_rotation(&[10.0, 1.0, 0.0]));
        // unweighted vertices keep their bind position
        assert_vec_near(&v[2].position(), &fix_model_rotation(&POSITIONS[2]));
    }

    #[test]
    fn test_iqm_frame_past_end_falls_back_to_first() {
        let data = build_iqm(true);
        let result = load_frame(&data, 7);
        assert!(result.is_ok());
        assert_vec_near(&result.meshes[0].vertices()[0].position(), &fix_model_rotation(&POSITIONS[0]));
    }

    #[test]
    fn test_iqm_quaternions_are_unit() {
        let model = IqmModel::parse(&build_iqm(true)).unwrap();
        for frame in 0..2 {
            let transforms = model.frame_transforms(frame).unwrap();
            assert_eq!(transforms.len(), 2);
            for trs in &transforms {
                assert!((trs.rotation.length() - 1.0).abs() < 1e-4, "|q| = {}", trs.rotation.length());
            }
        }
        for j in &model.joints {
            assert!((j.rotate.length() - 1.0).abs() < 1e-4);
        }
    }

    fn patch_field(data: &mut [u8], index: usize, v: u32) {
        data[field(index)..field(index) + 4].copy_from_slice(&v.to_le_bytes());
    }

    #[test]
    fn test_iqm_frame_count_bounded_by_file() {
        let mut data = build_iqm(true);
        patch_field(&mut data, F_NUM_FRAMES, 0x0400_0000);
        let result = load_frame(&data, 0);
        assert!(!result.is_ok());
        assert!(result.errors.as_deref().is_some_and(|e| e.contains("exceeds the file size")), "{:?}", result.errors);
        assert!(result.meshes.is_empty());
    }

    #[test]
    fn test_iqm_channel_count_must_match_masks() {
        // both pose masks cleared, the header still claims 5 channels per frame
        let mut data = build_iqm(true);
        let ofs_poses = u32::from_le_bytes(data[field(F_OFS_POSES)..field(F_OFS_POSES) + 4].try_into().unwrap()) as usize;
        let pose_len = 4 + 4 + 2 * POSE_CHANNELS * 4;
        for pose in 0..2 {
            let at = ofs_poses + pose * pose_len + 4;
            data[at..at + 4].copy_from_slice(&0u32.to_le_bytes());
        }
        patch_field(&mut data, F_NUM_FRAMES, 0x0400_0000);
        let result = load_frame(&data, 0);
        assert!(result.errors.as_deref().is_some_and(|e| e.contains("does not match")), "{:?}", result.errors);

        // consistent masks without channels keep every frame at the pose offsets
        patch_field(&mut data, F_NUM_FRAMECHANNELS, 0);
        let model = IqmModel::parse(&data).unwrap();
        assert_eq!(model.num_frames, 0x0400_0000);
        let transforms = model.frame_transforms(12345).unwrap();
        assert_vec_near(&transforms[0].translation, &ROOT_T);
        assert_vec_near(&transforms[1].translation, &CHILD_T);
    }

    #[test]
    fn test_iqm_needs_text() {
        let mut data = build_iqm(false);
        data[field(F_NUM_TEXT)..field(F_NUM_TEXT) + 4].copy_from_slice(&0u32.to_le_bytes());
        let result = load_frame(&data, 0);
        assert_eq!(result.errors.as_deref(), Some("IQM model needs material names"));
    }

    #[test]
    fn test_iqm_bad_magic_and_version() {
        let mut data = build_iqm(false);
        data[0] = b'X';
        assert_eq!(load_frame(&data, 0).errors.as_deref(), Some("Not an IQM file!"));

        let mut data = build_iqm(false);
        data[16] = 3;
        assert_eq!(load_frame(&data, 0).errors.as_deref(), Some("Unsupported IQM version"));
    }

    #[test]
    fn test_iqm_surface_skin_override() {
        let data = build_iqm(false);
        let mut params = ModelLoadParams::new("m.iqm");
        params.surface_skins.insert(0, "other.png".into());
        let mut ctx = LoadContext::default();
        let result = load(&data, &params, &mut ctx);
        assert_eq!(result.skins, vec!["other.png".to_string()]);
        assert_ne!(ctx.bounds, BoundingBoxSizes::default());
    }

    #[test]
    fn test_iqm_truncated() {
        // the blend weights of the last vertex end the file
        assert_truncations_fail(&build_iqm(true), |d| load_frame(d, 1));
    }
}
