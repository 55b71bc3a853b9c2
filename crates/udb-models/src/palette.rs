// palette.rs — 256 colour palettes and the voxel swatch texture

use bytemuck::{Pod, Zeroable};

use udb_common::binreader::{BinReader, FormatResult};

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct PixelColor {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl PixelColor {
    pub const fn new(a: u8, r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b, a }
    }
}

pub const PALETTE_SIZE: usize = 256;
/// Size of a 6-bit VGA palette block (r, g, b per entry).
pub const VGA_PALETTE_BYTES: usize = PALETTE_SIZE * 3;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Palette {
    colors: [PixelColor; PALETTE_SIZE],
}

impl Default for Palette {
    fn default() -> Self {
        Self::grayscale()
    }
}

impl Palette {
    pub fn from_colors(colors: [PixelColor; PALETTE_SIZE]) -> Self {
        Self { colors }
    }

    pub fn grayscale() -> Self {
        let mut colors = [PixelColor::default(); PALETTE_SIZE];
        for (i, c) in colors.iter_mut().enumerate() {
            *c = PixelColor::new(255, i as u8, i as u8, i as u8);
        }
        Self { colors }
    }

    /// Read a 6-bit VGA palette. Components are multiplied by 4 and wrap
    /// at 8 bits, so out of range entries behave as they do in the games.
    pub fn read_vga(reader: &mut BinReader<'_>) -> FormatResult<Self> {
        let mut colors = [PixelColor::default(); PALETTE_SIZE];
        for c in colors.iter_mut() {
            let r = reader.read_u8()?.wrapping_mul(4);
            let g = reader.read_u8()?.wrapping_mul(4);
            let b = reader.read_u8()?.wrapping_mul(4);
            *c = PixelColor::new(255, r, g, b);
        }
        Ok(Self { colors })
    }

    #[inline]
    pub fn color(&self, index: u8) -> PixelColor {
        self.colors[index as usize]
    }

    pub fn colors(&self) -> &[PixelColor; PALETTE_SIZE] {
        &self.colors
    }
}

/// RGBA texture used by voxel models: the palette laid out as a 16x16
/// swatch, upscaled 4x with nearest filtering so colours survive bilinear
/// sampling.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VoxelTexture {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<PixelColor>,
}

impl VoxelTexture {
    pub const SWATCH_SIZE: u32 = 16;
    pub const SCALE: u32 = 4;

    pub fn from_palette(palette: &Palette) -> Self {
        let size = Self::SWATCH_SIZE * Self::SCALE;
        let mut pixels = Vec::with_capacity((size * size) as usize);
        for y in 0..size {
            for x in 0..size {
                let index = (y / Self::SCALE) * Self::SWATCH_SIZE + x / Self::SCALE;
                pixels.push(palette.color(index as u8));
            }
        }
        Self { width: size, height: size, pixels }
    }

    pub fn pixel(&self, x: u32, y: u32) -> PixelColor {
        self.pixels[(y * self.width + x) as usize]
    }

    pub fn rgba_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.pixels)
    }
}
