// testutil.rs — Little-endian byte builder for hand-made model files in tests

#[derive(Default)]
pub struct ByteWriter {
    pub buf: Vec<u8>,
}

impl ByteWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn u8(&mut self, v: u8) -> &mut Self {
        self.buf.push(v);
        self
    }

    pub fn u16(&mut self, v: u16) -> &mut Self {
        self.buf.extend_from_slice(&v.to_le_bytes());
        self
    }

    pub fn i16(&mut self, v: i16) -> &mut Self {
        self.buf.extend_from_slice(&v.to_le_bytes());
        self
    }

    pub fn u32(&mut self, v: u32) -> &mut Self {
        self.buf.extend_from_slice(&v.to_le_bytes());
        self
    }

    pub fn i32(&mut self, v: i32) -> &mut Self {
        self.buf.extend_from_slice(&v.to_le_bytes());
        self
    }

    pub fn f32(&mut self, v: f32) -> &mut Self {
        self.buf.extend_from_slice(&v.to_le_bytes());
        self
    }

    pub fn bytes(&mut self, v: &[u8]) -> &mut Self {
        self.buf.extend_from_slice(v);
        self
    }

    /// NUL padded fixed width string.
    pub fn fixed_str(&mut self, s: &str, width: usize) -> &mut Self {
        let mut field = vec![0u8; width];
        let n = s.len().min(width);
        field[..n].copy_from_slice(&s.as_bytes()[..n]);
        self.buf.extend_from_slice(&field);
        self
    }

    pub fn zeros(&mut self, count: usize) -> &mut Self {
        self.buf.resize(self.buf.len() + count, 0);
        self
    }

    pub fn patch_i32(&mut self, at: usize, v: i32) -> &mut Self {
        self.buf[at..at + 4].copy_from_slice(&v.to_le_bytes());
        self
    }

    pub fn patch_u32(&mut self, at: usize, v: u32) -> &mut Self {
        self.buf[at..at + 4].copy_from_slice(&v.to_le_bytes());
        self
    }

    pub fn finish(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.buf)
    }
}

pub fn assert_meshes_well_formed(result: &crate::LoadResult) {
    for (i, mesh) in result.meshes.iter().enumerate() {
        assert!(mesh.is_well_formed(), "mesh {} has bad indices", i);
    }
}

/// Every strict prefix of a valid file must come back as a failed load.
pub fn assert_truncations_fail(data: &[u8], load: impl Fn(&[u8]) -> crate::LoadResult) {
    for len in 0..data.len() {
        let result = load(&data[..len]);
        assert!(!result.is_ok(), "{} of {} bytes loaded", len, data.len());
        assert!(result.errors.as_deref().is_some_and(|e| !e.is_empty()), "no error text at {} bytes", len);
        assert!(result.meshes.is_empty() && result.skins.is_empty(), "output at {} bytes", len);
    }
}
