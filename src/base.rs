//! Bounds-checked access to records stored inside a decoded buffer.
//!
//! A record is a window `[base, base + size)` of the buffer. Every access is
//! checked against that window, so a wrong offset yields `None` or an error,
//! never a read of a neighbouring record.

use crate::error::{Error, Result};

/// Values that can live in a record slot. Stored little-endian.
pub(crate) trait Scalar: Copy {
    const SIZE: usize;
    fn read_le(bytes: &[u8]) -> Self;
    fn write_le(self, bytes: &mut [u8]);
}

macro_rules! impl_scalar {
    ($($t:ty),*) => {
        $(
            impl Scalar for $t {
                const SIZE: usize = core::mem::size_of::<$t>();

                fn read_le(bytes: &[u8]) -> Self {
                    let mut raw = [0u8; core::mem::size_of::<$t>()];
                    raw.copy_from_slice(bytes);
                    <$t>::from_le_bytes(raw)
                }

                fn write_le(self, bytes: &mut [u8]) {
                    bytes.copy_from_slice(&self.to_le_bytes());
                }
            }
        )*
    };
}

impl_scalar!(i32, u32, i64, u64, f32, f64);

impl Scalar for bool {
    const SIZE: usize = 1;

    fn read_le(bytes: &[u8]) -> Self {
        bytes[0] != 0
    }

    fn write_le(self, bytes: &mut [u8]) {
        bytes[0] = self as u8;
    }
}

/// A decoded primitive on its way between the wire and a record slot.
#[derive(Clone, Copy, Debug, PartialEq)]
pub(crate) enum Primitive {
    Bool(bool),
    I32(i32),
    U32(u32),
    I64(i64),
    U64(u64),
    F32(f32),
    F64(f64),
}

#[derive(Clone, Copy)]
pub struct Object<'a> {
    buf: &'a [u8],
    base: usize,
    size: usize,
}

impl<'a> Object<'a> {
    pub(crate) fn new(buf: &'a [u8], base: usize, size: usize) -> Option<Self> {
        if base.checked_add(size)? > buf.len() {
            return None;
        }
        Some(Object { buf, base, size })
    }

    /// The record at the start of `buf`, clipped to the buffer length.
    pub(crate) fn root(buf: &'a [u8], size: usize) -> Self {
        Object {
            buf,
            base: 0,
            size: size.min(buf.len()),
        }
    }

    /// Offset of this record inside the backing buffer.
    pub fn base(&self) -> usize {
        self.base
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub(crate) fn buffer(&self) -> &'a [u8] {
        self.buf
    }

    fn bytes_at(&self, offset: u32, len: usize) -> Option<&'a [u8]> {
        let offset = offset as usize;
        if offset.checked_add(len)? > self.size {
            return None;
        }
        let start = self.base + offset;
        self.buf.get(start..start + len)
    }

    pub(crate) fn get<T: Scalar>(&self, offset: u32) -> Option<T> {
        self.bytes_at(offset, T::SIZE).map(T::read_le)
    }

    pub(crate) fn has_bit(&self, has_bit_idx: u32) -> bool {
        let word = (has_bit_idx / 32) * 4;
        self.get::<u32>(word)
            .is_some_and(|bits| bits & (1 << (has_bit_idx % 32)) != 0)
    }

    /// Reads an `(offset, len)` pair stored at `offset`.
    pub(crate) fn pair(&self, offset: u32) -> Option<(usize, usize)> {
        let start = self.get::<u32>(offset)?;
        let len = self.get::<u32>(offset + 4)?;
        Some((start as usize, len as usize))
    }

    /// Resolves an `(offset, len)` pair against the whole buffer.
    pub(crate) fn blob(&self, offset: u32) -> Option<&'a [u8]> {
        let (start, len) = self.pair(offset)?;
        self.buf.get(start..start.checked_add(len)?)
    }

    /// The record embedded at `offset`.
    pub(crate) fn child(&self, offset: u32, size: u32) -> Option<Object<'a>> {
        self.bytes_at(offset, size as usize)?;
        Object::new(self.buf, self.base + offset as usize, size as usize)
    }
}

pub(crate) struct ObjectMut<'a> {
    buf: &'a mut [u8],
    base: usize,
    size: usize,
}

impl<'a> ObjectMut<'a> {
    pub(crate) fn new(buf: &'a mut [u8], base: usize, size: usize) -> Result<Self> {
        match base.checked_add(size) {
            Some(end) if end <= buf.len() => Ok(ObjectMut { buf, base, size }),
            _ => Err(Error::OutOfBounds {
                offset: base,
                len: size,
            }),
        }
    }

    fn bytes_at(&mut self, offset: u32, len: usize) -> Result<&mut [u8]> {
        let offset = offset as usize;
        let out_of_bounds = Error::OutOfBounds {
            offset: self.base + offset,
            len,
        };
        match offset.checked_add(len) {
            Some(end) if end <= self.size => {
                let start = self.base + offset;
                self.buf.get_mut(start..start + len).ok_or(out_of_bounds)
            }
            _ => Err(out_of_bounds),
        }
    }

    pub(crate) fn set<T: Scalar>(&mut self, offset: u32, val: T) -> Result<()> {
        val.write_le(self.bytes_at(offset, T::SIZE)?);
        Ok(())
    }

    pub(crate) fn set_has_bit(&mut self, has_bit_idx: u32) -> Result<()> {
        let word = (has_bit_idx / 32) * 4;
        let bits = u32::read_le(self.bytes_at(word, 4)?);
        self.set(word, bits | 1 << (has_bit_idx % 32))
    }

    pub(crate) fn has_bit(&mut self, has_bit_idx: u32) -> Result<bool> {
        let word = (has_bit_idx / 32) * 4;
        let bits = u32::read_le(self.bytes_at(word, 4)?);
        Ok(bits & (1 << (has_bit_idx % 32)) != 0)
    }

    pub(crate) fn set_pair(&mut self, offset: u32, start: usize, len: usize) -> Result<()> {
        let too_large = Error::OutOfBounds { offset: start, len };
        let start = u32::try_from(start).map_err(|_| too_large)?;
        let len = u32::try_from(len).map_err(|_| Error::OutOfBounds {
            offset: start as usize,
            len,
        })?;
        self.set(offset, start)?;
        self.set(offset + 4, len)
    }

    pub(crate) fn set_primitive(&mut self, offset: u32, value: Primitive) -> Result<()> {
        match value {
            Primitive::Bool(v) => self.set(offset, v),
            Primitive::I32(v) => self.set(offset, v),
            Primitive::U32(v) => self.set(offset, v),
            Primitive::I64(v) => self.set(offset, v),
            Primitive::U64(v) => self.set(offset, v),
            Primitive::F32(v) => self.set(offset, v),
            Primitive::F64(v) => self.set(offset, v),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scalar_slots_roundtrip() {
        let mut buf = vec![0u8; 32];
        {
            let mut obj = ObjectMut::new(&mut buf, 8, 24).unwrap();
            obj.set::<i32>(4, -7).unwrap();
            obj.set::<f64>(8, 2.5).unwrap();
            obj.set::<bool>(16, true).unwrap();
            obj.set_has_bit(3).unwrap();
            assert!(obj.has_bit(3).unwrap());
            assert!(!obj.has_bit(2).unwrap());
        }
        let obj = Object::new(&buf, 8, 24).unwrap();
        assert_eq!(obj.get::<i32>(4), Some(-7));
        assert_eq!(obj.get::<f64>(8), Some(2.5));
        assert_eq!(obj.get::<bool>(16), Some(true));
        assert!(obj.has_bit(3));
        assert!(!obj.has_bit(0));
        // stored little-endian at base + offset
        assert_eq!(&buf[12..16], &(-7i32).to_le_bytes());
    }

    #[test]
    fn accesses_outside_the_record_fail() {
        let mut buf = vec![0u8; 16];
        {
            let mut obj = ObjectMut::new(&mut buf, 0, 8).unwrap();
            assert!(obj.set::<u64>(4, 1).is_err());
            assert!(obj.set::<u32>(4, 1).is_ok());
        }
        assert!(ObjectMut::new(&mut buf, 12, 8).is_err());

        let obj = Object::new(&buf, 0, 8).unwrap();
        assert_eq!(obj.get::<u64>(4), None);
        assert!(obj.child(4, 8).is_none());
        assert!(Object::new(&buf, 10, 8).is_none());
    }

    #[test]
    fn pairs_resolve_against_the_whole_buffer() {
        let mut buf = vec![0u8; 24];
        buf[16..19].copy_from_slice(b"foo");
        ObjectMut::new(&mut buf, 0, 8)
            .unwrap()
            .set_pair(0, 16, 3)
            .unwrap();
        let obj = Object::new(&buf, 0, 8).unwrap();
        assert_eq!(obj.pair(0), Some((16, 3)));
        assert_eq!(obj.blob(0), Some(&b"foo"[..]));
    }
}
