// mathlib.rs — Vector, quaternion and 4x4 matrix math for the model loaders

use std::f32::consts::FRAC_PI_2;
use std::ops::Mul;

pub type Vec3 = [f32; 3];
/// Map-space point. Map coordinates are kept in double precision.
pub type Vec2 = [f64; 2];

// ============================================================
// Vector operations
// ============================================================

#[inline]
pub fn vector_subtract(a: &Vec3, b: &Vec3) -> Vec3 {
    [a[0] - b[0], a[1] - b[1], a[2] - b[2]]
}

#[inline]
pub fn vector_add(a: &Vec3, b: &Vec3) -> Vec3 {
    [a[0] + b[0], a[1] + b[1], a[2] + b[2]]
}

#[inline]
pub fn vector_scale(v: &Vec3, scale: f32) -> Vec3 {
    [v[0] * scale, v[1] * scale, v[2] * scale]
}

pub fn vector_length(v: &Vec3) -> f32 {
    (v[0] * v[0] + v[1] * v[1] + v[2] * v[2]).sqrt()
}

/// Normalize in place, returns original length.
pub fn vector_normalize(v: &mut Vec3) -> f32 {
    let length = vector_length(v);
    if length != 0.0 {
        let ilength = 1.0 / length;
        v[0] *= ilength;
        v[1] *= ilength;
        v[2] *= ilength;
    }
    length
}

pub fn cross_product(v1: &Vec3, v2: &Vec3) -> Vec3 {
    [
        v1[1] * v2[2] - v1[2] * v2[1],
        v1[2] * v2[0] - v1[0] * v2[2],
        v1[0] * v2[1] - v1[1] * v2[0],
    ]
}

#[inline]
pub fn vec2_distance(a: &Vec2, b: &Vec2) -> f64 {
    let dx = a[0] - b[0];
    let dy = a[1] - b[1];
    (dx * dx + dy * dy).sqrt()
}

/// Rotate a point about the vertical (z) axis.
pub fn rotate_z(v: &Vec3, angle: f32) -> Vec3 {
    let (sin, cos) = angle.sin_cos();
    [cos * v[0] - sin * v[1], sin * v[0] + cos * v[1], v[2]]
}

/// The fixed -90 degree yaw every loader applies so model space matches map space.
pub fn fix_model_rotation(v: &Vec3) -> Vec3 {
    rotate_z(v, -FRAC_PI_2)
}

// ============================================================
// Quaternion
// ============================================================

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Quat {
    pub x: f32,
    pub y: f32,
    pub z: f32,
    pub w: f32,
}

impl Default for Quat {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl Quat {
    pub const IDENTITY: Quat = Quat { x: 0.0, y: 0.0, z: 0.0, w: 1.0 };

    pub const fn new(x: f32, y: f32, z: f32, w: f32) -> Self {
        Self { x, y, z, w }
    }

    pub fn dot(&self, other: &Quat) -> f32 {
        self.x * other.x + self.y * other.y + self.z * other.z + self.w * other.w
    }

    pub fn length(&self) -> f32 {
        self.dot(self).sqrt()
    }

    /// Unit-length copy. A zero quaternion stays zero.
    pub fn normalized(&self) -> Quat {
        let len = self.length();
        if len == 0.0 {
            return *self;
        }
        self.scaled(1.0 / len)
    }

    pub fn scaled(&self, s: f32) -> Quat {
        Quat::new(self.x * s, self.y * s, self.z * s, self.w * s)
    }

    pub fn add(&self, other: &Quat) -> Quat {
        Quat::new(self.x + other.x, self.y + other.y, self.z + other.z, self.w + other.w)
    }

    /// Normalized linear blend taking the shortest arc: `from` is flipped when
    /// the two rotations lie in opposite hemispheres.
    pub fn nlerp(from: &Quat, to: &Quat, t: f32) -> Quat {
        let mut a = from.scaled(1.0 - t);
        let b = to.scaled(t);
        if a.dot(&b) < 0.0 {
            a = a.scaled(-1.0);
        }
        a.add(&b).normalized()
    }
}

// ============================================================
// Mat4 — column major, element (row, col) at index col * 4 + row
// ============================================================

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Mat4 {
    pub m: [f32; 16],
}

impl Default for Mat4 {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl Mat4 {
    pub const IDENTITY: Mat4 = Mat4 {
        m: [
            1.0, 0.0, 0.0, 0.0, //
            0.0, 1.0, 0.0, 0.0, //
            0.0, 0.0, 1.0, 0.0, //
            0.0, 0.0, 0.0, 1.0,
        ],
    };

    pub const ZERO: Mat4 = Mat4 { m: [0.0; 16] };

    #[inline]
    pub fn get(&self, row: usize, col: usize) -> f32 {
        self.m[col * 4 + row]
    }

    /// Rotation matrix for a (unit) quaternion.
    pub fn from_quat(q: &Quat) -> Mat4 {
        let mut m = [0.0f32; 16];
        m[0] = 1.0 - 2.0 * q.y * q.y - 2.0 * q.z * q.z;
        m[4] = 2.0 * q.x * q.y - 2.0 * q.w * q.z;
        m[8] = 2.0 * q.x * q.z + 2.0 * q.w * q.y;
        m[1] = 2.0 * q.x * q.y + 2.0 * q.w * q.z;
        m[5] = 1.0 - 2.0 * q.x * q.x - 2.0 * q.z * q.z;
        m[9] = 2.0 * q.y * q.z - 2.0 * q.w * q.x;
        m[2] = 2.0 * q.x * q.z - 2.0 * q.w * q.y;
        m[6] = 2.0 * q.y * q.z + 2.0 * q.w * q.x;
        m[10] = 1.0 - 2.0 * q.x * q.x - 2.0 * q.y * q.y;
        m[15] = 1.0;
        Mat4 { m }
    }

    /// translate * rotate * scale
    pub fn from_trs(translate: &Vec3, rotation: &Quat, scale: &Vec3) -> Mat4 {
        Mat4::IDENTITY
            .translated(translate)
            .rotated(rotation)
            .scaled(scale)
    }

    /// self * translation(t)
    pub fn translated(&self, t: &Vec3) -> Mat4 {
        let mut out = *self;
        for row in 0..3 {
            out.m[12 + row] = self.m[row] * t[0] + self.m[4 + row] * t[1] + self.m[8 + row] * t[2] + self.m[12 + row];
        }
        out
    }

    /// self * scale(s)
    pub fn scaled(&self, s: &Vec3) -> Mat4 {
        let mut out = *self;
        for col in 0..3 {
            for row in 0..4 {
                out.m[col * 4 + row] *= s[col];
            }
        }
        out
    }

    /// self * rotation(q)
    pub fn rotated(&self, q: &Quat) -> Mat4 {
        *self * Mat4::from_quat(q)
    }

    pub fn transform_point(&self, v: &Vec3) -> Vec3 {
        let r = self.transform_vec4(&[v[0], v[1], v[2], 1.0]);
        [r[0], r[1], r[2]]
    }

    pub fn transform_vec4(&self, v: &[f32; 4]) -> [f32; 4] {
        let mut out = [0.0f32; 4];
        for (row, o) in out.iter_mut().enumerate() {
            *o = self.m[row] * v[0] + self.m[4 + row] * v[1] + self.m[8 + row] * v[2] + self.m[12 + row] * v[3];
        }
        out
    }

    /// The same matrix with the translation column and projective row cleared,
    /// used to carry normals through a bone transform.
    pub fn normal_matrix(&self) -> Mat4 {
        let mut out = *self;
        for i in 0..4 {
            out.m[12 + i] = 0.0;
            out.m[i * 4 + 3] = 0.0;
        }
        out
    }

    fn minor(&self, skip_row: usize, skip_col: usize) -> f32 {
        let mut sub = [0.0f32; 9];
        let mut k = 0;
        for row in 0..4 {
            if row == skip_row {
                continue;
            }
            for col in 0..4 {
                if col == skip_col {
                    continue;
                }
                sub[k] = self.get(row, col);
                k += 1;
            }
        }
        mat3_determinant(&sub)
    }

    fn cofactor(&self, row: usize, col: usize) -> f32 {
        let sign = if (row + col) % 2 == 0 { 1.0 } else { -1.0 };
        sign * self.minor(row, col)
    }

    pub fn determinant(&self) -> f32 {
        (0..4).map(|col| self.get(0, col) * self.cofactor(0, col)).sum()
    }

    /// Inverse through the adjugate. Singular matrices invert to all zeros.
    pub fn inverse(&self) -> Mat4 {
        let det = self.determinant();
        if det.abs() < 1e-15 {
            return Mat4::ZERO;
        }
        let inv_det = 1.0 / det;
        let mut out = Mat4::ZERO;
        for row in 0..4 {
            for col in 0..4 {
                out.m[col * 4 + row] = self.cofactor(col, row) * inv_det;
            }
        }
        out
    }
}

impl Mul for Mat4 {
    type Output = Mat4;

    fn mul(self, rhs: Mat4) -> Mat4 {
        let mut out = [0.0f32; 16];
        for row in 0..4 {
            for col in 0..4 {
                let mut sum = 0.0;
                for k in 0..4 {
                    sum += self.m[k * 4 + row] * rhs.m[col * 4 + k];
                }
                out[col * 4 + row] = sum;
            }
        }
        Mat4 { m: out }
    }
}

/// Row-major 3x3 determinant.
fn mat3_determinant(m: &[f32; 9]) -> f32 {
    m[0] * (m[4] * m[8] - m[5] * m[7]) + m[1] * (m[5] * m[6] - m[8] * m[3]) + m[2] * (m[3] * m[7] - m[4] * m[6])
}
