// binreader.rs — Little-endian cursor over an in-memory model file
//
// Every loader reads its file through a `BinReader`. Offset tables in the
// formats point anywhere in the file, so the cursor seeks freely in both
// directions; reads past the end and seeks outside the buffer fail with a
// `FormatError` instead of panicking.

use thiserror::Error;

/// Failure while decoding a binary stream.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FormatError {
    #[error("unexpected end of data at offset {offset}: wanted {wanted} bytes, stream is {len} bytes")]
    UnexpectedEof { offset: usize, wanted: usize, len: usize },

    #[error("seek to {target} is outside of the stream (length {len})")]
    BadSeek { target: i64, len: usize },

    #[error("name offset {offset} out of bounds")]
    BadName { offset: usize },

    #[error("name at offset {offset} is not null terminated")]
    Unterminated { offset: usize },
}

pub type FormatResult<T> = Result<T, FormatError>;

/// Read cursor over a byte slice.
#[derive(Debug, Clone)]
pub struct BinReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> BinReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    #[inline]
    pub fn position(&self) -> usize {
        self.pos
    }

    #[inline]
    pub fn remaining(&self) -> usize {
        self.data.len().saturating_sub(self.pos)
    }

    /// Capacity worth reserving for `count` records of `record_len` bytes.
    /// Header counts are untrusted, so this never exceeds what the rest of
    /// the buffer could hold.
    pub fn capacity_for(&self, count: usize, record_len: usize) -> usize {
        count.min(self.remaining() / record_len.max(1))
    }

    /// The whole underlying buffer, independent of the cursor.
    pub fn data(&self) -> &'a [u8] {
        self.data
    }

    /// Seek to an absolute offset. Seeking exactly to the end is allowed.
    pub fn seek(&mut self, target: i64) -> FormatResult<()> {
        if target < 0 || target as u64 > self.data.len() as u64 {
            return Err(FormatError::BadSeek { target, len: self.data.len() });
        }
        self.pos = target as usize;
        Ok(())
    }

    /// Seek relative to the current position.
    pub fn seek_relative(&mut self, delta: i64) -> FormatResult<()> {
        self.seek(self.pos as i64 + delta)
    }

    pub fn skip(&mut self, count: usize) -> FormatResult<()> {
        self.seek_relative(count as i64)
    }

    fn take(&mut self, count: usize) -> FormatResult<&'a [u8]> {
        let end = self.pos.checked_add(count).filter(|&end| end <= self.data.len());
        match end {
            Some(end) => {
                let bytes = &self.data[self.pos..end];
                self.pos = end;
                Ok(bytes)
            }
            None => Err(FormatError::UnexpectedEof {
                offset: self.pos,
                wanted: count,
                len: self.data.len(),
            }),
        }
    }

    fn take_array<const N: usize>(&mut self) -> FormatResult<[u8; N]> {
        let bytes = self.take(N)?;
        let mut out = [0u8; N];
        out.copy_from_slice(bytes);
        Ok(out)
    }

    pub fn read_bytes(&mut self, count: usize) -> FormatResult<&'a [u8]> {
        self.take(count)
    }

    pub fn read_u8(&mut self) -> FormatResult<u8> {
        Ok(self.take_array::<1>()?[0])
    }

    pub fn read_u16(&mut self) -> FormatResult<u16> {
        Ok(u16::from_le_bytes(self.take_array()?))
    }

    pub fn read_i16(&mut self) -> FormatResult<i16> {
        Ok(i16::from_le_bytes(self.take_array()?))
    }

    pub fn read_u32(&mut self) -> FormatResult<u32> {
        Ok(u32::from_le_bytes(self.take_array()?))
    }

    pub fn read_i32(&mut self) -> FormatResult<i32> {
        Ok(i32::from_le_bytes(self.take_array()?))
    }

    pub fn read_f32(&mut self) -> FormatResult<f32> {
        Ok(f32::from_le_bytes(self.take_array()?))
    }

    /// Read a fixed-width string field. The string ends at the first NUL,
    /// the cursor always advances by `len`.
    pub fn read_fixed_string(&mut self, len: usize) -> FormatResult<String> {
        let bytes = self.take(len)?;
        let end = bytes.iter().position(|&b| b == 0).unwrap_or(len);
        Ok(bytes[..end].iter().map(|&b| b as char).collect())
    }

    /// Read a NUL-terminated string starting at the cursor. The terminator is consumed.
    pub fn read_cstring(&mut self) -> FormatResult<String> {
        let start = self.pos;
        let rest = &self.data[start.min(self.data.len())..];
        match rest.iter().position(|&b| b == 0) {
            Some(end) => {
                self.pos = start + end + 1;
                Ok(rest[..end].iter().map(|&b| b as char).collect())
            }
            None => Err(FormatError::Unterminated { offset: start }),
        }
    }
}

/// Look up a NUL-terminated name inside a text block (IQM style string tables).
pub fn name_at(text: &[u8], offset: usize) -> FormatResult<String> {
    if offset >= text.len() {
        return Err(FormatError::BadName { offset });
    }
    match text[offset..].iter().position(|&b| b == 0) {
        Some(len) => Ok(text[offset..offset + len].iter().map(|&b| b as char).collect()),
        None => Err(FormatError::Unterminated { offset }),
    }
}
