use crate::error::{Error, Result, WireErrorKind};

/// Upper bound on the encoded size of a 64 bit varint.
pub const MAX_VARINT_LEN: usize = 10;

pub fn zigzag_decode(n: u64) -> i64 {
    ((n >> 1) as i64) ^ (-((n & 1) as i64))
}

pub fn zigzag_encode(n: i64) -> u64 {
    ((n as u64) << 1) ^ ((n >> 63) as u64)
}

pub fn varint_size(n: u64) -> usize {
    let log2 = (n | 1).ilog2();
    ((log2 * 9 + 64 + 9) / 64) as usize
}

/// Writes `n` as a base-128 varint into `buf` and returns the number of bytes used.
pub fn encode_varint(mut n: u64, buf: &mut [u8; MAX_VARINT_LEN]) -> usize {
    let mut i = 0;
    while n >= 0x80 {
        buf[i] = n as u8 | 0x80;
        n >>= 7;
        i += 1;
    }
    buf[i] = n as u8;
    i + 1
}

#[repr(u8)]
#[derive(Clone, Copy, PartialEq, Eq, Debug, Hash)]
pub enum WireType {
    Varint = 0,
    Fixed64 = 1,
    LengthDelimited = 2,
    Fixed32 = 5,
}

impl WireType {
    pub fn from_raw(raw: u8) -> Option<Self> {
        match raw {
            0 => Some(WireType::Varint),
            1 => Some(WireType::Fixed64),
            2 => Some(WireType::LengthDelimited),
            5 => Some(WireType::Fixed32),
            _ => None,
        }
    }
}

pub fn make_tag(field_number: u32, wire_type: WireType) -> u32 {
    field_number << 3 | wire_type as u32
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct Tag {
    pub field_number: u32,
    pub wire_type: WireType,
}

/// Bounds-checked read cursor over an immutable byte buffer.
///
/// The cursor always holds the complete outer buffer, so [`ByteCursor::tell`]
/// reports absolute offsets even for cursors produced by
/// [`ByteCursor::sub_range`]. Reads never go past `end`; they return a wire
/// format error instead.
#[derive(Clone, Copy, Debug)]
pub struct ByteCursor<'a> {
    buf: &'a [u8],
    pos: usize,
    end: usize,
}

impl<'a> ByteCursor<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        ByteCursor {
            buf,
            pos: 0,
            end: buf.len(),
        }
    }

    /// Absolute offset of the next byte to be read.
    pub fn tell(&self) -> usize {
        self.pos
    }

    /// Absolute offset one past the last readable byte.
    pub fn end(&self) -> usize {
        self.end
    }

    pub fn remaining(&self) -> usize {
        self.end - self.pos
    }

    pub fn is_at_end(&self) -> bool {
        self.pos == self.end
    }

    fn error(&self, kind: WireErrorKind) -> Error {
        Error::wire(self.pos, kind)
    }

    /// Moves to an absolute offset, which may lie anywhere up to `end`.
    pub fn seek(&mut self, pos: usize) -> Result<()> {
        if pos > self.end {
            return Err(self.error(WireErrorKind::Truncated));
        }
        self.pos = pos;
        Ok(())
    }

    pub fn skip(&mut self, n: usize) -> Result<()> {
        if n > self.remaining() {
            return Err(self.error(WireErrorKind::Truncated));
        }
        self.pos += n;
        Ok(())
    }

    pub fn read_raw(&mut self, n: usize) -> Result<&'a [u8]> {
        if n > self.remaining() {
            return Err(self.error(WireErrorKind::Truncated));
        }
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn read_array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.read_raw(N)?);
        Ok(out)
    }

    pub fn read_varint64(&mut self) -> Result<u64> {
        let readable = &self.buf[self.pos..self.end];
        let mut result = 0u64;
        for i in 0..MAX_VARINT_LEN {
            let Some(&b) = readable.get(i) else {
                return Err(self.error(WireErrorKind::Truncated));
            };
            if i == MAX_VARINT_LEN - 1 && b > 1 {
                break;
            }
            result |= u64::from(b & 0x7f) << (7 * i);
            if b < 0x80 {
                self.pos += i + 1;
                return Ok(result);
            }
        }
        Err(self.error(WireErrorKind::MalformedVarint))
    }

    /// Reads a varint and keeps the low 32 bits, which is how negative int32
    /// values encoded as ten byte varints come back.
    pub fn read_varint32(&mut self) -> Result<u32> {
        Ok(self.read_varint64()? as u32)
    }

    pub fn read_fixed32(&mut self) -> Result<u32> {
        Ok(u32::from_le_bytes(self.read_array()?))
    }

    pub fn read_fixed64(&mut self) -> Result<u64> {
        Ok(u64::from_le_bytes(self.read_array()?))
    }

    pub fn read_float(&mut self) -> Result<f32> {
        Ok(f32::from_bits(self.read_fixed32()?))
    }

    pub fn read_double(&mut self) -> Result<f64> {
        Ok(f64::from_bits(self.read_fixed64()?))
    }

    pub fn read_int32(&mut self) -> Result<i32> {
        Ok(self.read_fixed32()? as i32)
    }

    pub fn read_uint32(&mut self) -> Result<u32> {
        self.read_fixed32()
    }

    pub fn read_int64(&mut self) -> Result<i64> {
        Ok(self.read_fixed64()? as i64)
    }

    pub fn read_uint64(&mut self) -> Result<u64> {
        self.read_fixed64()
    }

    pub fn read_bool(&mut self) -> Result<bool> {
        Ok(self.read_varint64()? != 0)
    }

    pub fn read_tag(&mut self) -> Result<Tag> {
        let start = self.pos;
        let raw = self.read_varint64()?;
        if raw > u64::from(u32::MAX) {
            return Err(Error::wire(start, WireErrorKind::MalformedVarint));
        }
        let raw = raw as u32;
        let wire_type = (raw & 7) as u8;
        let Some(wire_type) = WireType::from_raw(wire_type) else {
            return Err(Error::wire(start, WireErrorKind::UnsupportedWireType(wire_type)));
        };
        let field_number = raw >> 3;
        if field_number == 0 {
            return Err(Error::wire(start, WireErrorKind::InvalidFieldNumber));
        }
        Ok(Tag {
            field_number,
            wire_type,
        })
    }

    /// Reads the length prefix of a length-delimited field and checks that
    /// the payload fits in what is left of this cursor.
    pub fn read_length(&mut self) -> Result<usize> {
        let start = self.pos;
        let len = self.read_varint64()?;
        let remaining = self.remaining();
        if len > remaining as u64 {
            return Err(Error::wire(
                start,
                WireErrorKind::LengthOverrun { len, remaining },
            ));
        }
        Ok(len as usize)
    }

    /// Returns a cursor over the next `len` bytes without advancing `self`.
    ///
    /// The returned cursor keeps the original buffer start, so positions read
    /// from it stay comparable with positions read from `self`.
    pub fn sub_range(&self, len: usize) -> Result<ByteCursor<'a>> {
        let remaining = self.remaining();
        if len > remaining {
            return Err(self.error(WireErrorKind::LengthOverrun {
                len: len as u64,
                remaining,
            }));
        }
        Ok(ByteCursor {
            buf: self.buf,
            pos: self.pos,
            end: self.pos + len,
        })
    }

    /// Splits off a length-delimited payload: returns the sub-range cursor and
    /// advances `self` past it.
    pub fn read_sub_range(&mut self) -> Result<ByteCursor<'a>> {
        let len = self.read_length()?;
        let sub = self.sub_range(len)?;
        self.pos += len;
        Ok(sub)
    }

    pub fn skip_field(&mut self, wire_type: WireType) -> Result<()> {
        match wire_type {
            WireType::Varint => self.read_varint64().map(|_| ()),
            WireType::Fixed64 => self.skip(8),
            WireType::LengthDelimited => {
                let len = self.read_length()?;
                self.skip(len)
            }
            WireType::Fixed32 => self.skip(4),
        }
    }
}
