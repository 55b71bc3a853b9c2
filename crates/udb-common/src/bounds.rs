// bounds.rs — Model bounding box accumulation and radius

use crate::mathlib::Vec3;

/// Integer axis-aligned extents, grown vertex by vertex while a model loads.
/// Starts collapsed at the origin, so the box always contains it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BoundingBoxSizes {
    pub min_x: i32,
    pub max_x: i32,
    pub min_y: i32,
    pub max_y: i32,
    pub min_z: i32,
    pub max_z: i32,
}

impl BoundingBoxSizes {
    pub fn new() -> Self {
        Self::default()
    }

    /// Grow the box to include a point. Coordinates truncate toward zero.
    pub fn update(&mut self, x: f32, y: f32, z: f32) {
        let (x, y, z) = (x as i32, y as i32, z as i32);
        self.min_x = self.min_x.min(x);
        self.max_x = self.max_x.max(x);
        self.min_y = self.min_y.min(y);
        self.max_y = self.max_y.max(y);
        self.min_z = self.min_z.min(z);
        self.max_z = self.max_z.max(z);
    }

    /// Per-axis scale, truncating back to integers.
    pub fn scaled(&self, scale: &Vec3) -> BoundingBoxSizes {
        BoundingBoxSizes {
            min_x: (self.min_x as f32 * scale[0]) as i32,
            max_x: (self.max_x as f32 * scale[0]) as i32,
            min_y: (self.min_y as f32 * scale[1]) as i32,
            max_y: (self.max_y as f32 * scale[1]) as i32,
            min_z: (self.min_z as f32 * scale[2]) as i32,
            max_z: (self.max_z as f32 * scale[2]) as i32,
        }
    }

    /// Horizontal radius: the largest absolute x/y extent.
    pub fn radius(&self) -> i32 {
        self.min_x
            .abs()
            .max(self.max_x.abs())
            .max(self.min_y.abs())
            .max(self.max_y.abs())
    }
}
