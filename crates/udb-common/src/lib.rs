// udb-common — shared helpers for the model loaders and the sound propagation tools

pub mod binreader;
pub mod bounds;
pub mod mathlib;
pub mod paths;

pub use binreader::{BinReader, FormatError};
pub use bounds::BoundingBoxSizes;
pub use mathlib::{Mat4, Quat, Vec2, Vec3};
