use std::collections::HashMap;

use crate::base::ObjectMut;
use crate::descriptor::{FieldDescriptor, MessageDescriptor};
use crate::error::{Error, Result};

// Every allocation starts on, and is padded to, the context's alignment. With
// padded sizes the total is independent of allocation order, so the dry run and
// the commit pass may reserve things in a different sequence.
pub(crate) const ALIGNMENT: usize = 8;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Mode {
    /// Compute sizes only; nothing is written.
    DryRun,
    /// Write into a buffer sized by a previous dry run.
    Commit,
}

/// Identifies one repeated field inside one message instance: the absolute
/// input offset where that message's payload starts, and the field number.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct OccurrenceKey {
    pub position: usize,
    pub field_number: u32,
}

/// Arena for one decode.
///
/// A dry-run context only advances its cursor, which yields the total size
/// of the decoded tree, and counts repeated field occurrences. Turning it
/// into a commit context allocates one zeroed buffer of that size; the same
/// sequence of calls then hands out real, bounds-checked offsets into it.
pub struct LoadContext {
    mode: Mode,
    alignment: usize,
    buffer: Vec<u8>,
    cursor: usize,
    occurrences: HashMap<OccurrenceKey, u32>,
}

fn align_up(value: usize, alignment: usize) -> Option<usize> {
    Some(value.checked_add(alignment - 1)? & !(alignment - 1))
}

impl LoadContext {
    pub fn dry_run() -> Self {
        Self::dry_run_aligned(ALIGNMENT)
    }

    /// Dry run whose allocations all start on `alignment`, which should be
    /// the [`MessageDescriptor::align`] of the root being decoded. Values
    /// that are not a power of two are raised to the next one.
    pub fn dry_run_aligned(alignment: usize) -> Self {
        LoadContext {
            mode: Mode::DryRun,
            alignment: alignment.max(ALIGNMENT).next_power_of_two(),
            buffer: Vec::new(),
            cursor: 0,
            occurrences: HashMap::new(),
        }
    }

    pub fn alignment(&self) -> usize {
        self.alignment
    }

    /// Allocates the backing buffer for everything this dry run reserved and
    /// keeps the occurrence counts for the commit pass.
    pub fn into_commit(self) -> Result<Self> {
        debug_assert_eq!(self.mode, Mode::DryRun);
        let size = self.cursor;
        if u32::try_from(size).is_err() {
            return Err(Error::Allocation { size });
        }
        let mut buffer = Vec::new();
        buffer
            .try_reserve_exact(size)
            .map_err(|_| Error::Allocation { size })?;
        buffer.resize(size, 0);
        Ok(LoadContext {
            mode: Mode::Commit,
            alignment: self.alignment,
            buffer,
            cursor: 0,
            occurrences: self.occurrences,
        })
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn is_dry_run(&self) -> bool {
        self.mode == Mode::DryRun
    }

    /// Bytes handed out so far.
    pub fn used(&self) -> usize {
        self.cursor
    }

    fn allocate(&mut self, size: usize) -> Result<usize> {
        let overflow = Error::Allocation { size };
        let Some(padded) = align_up(size, self.alignment) else {
            return Err(overflow);
        };
        let start = self.cursor;
        let Some(end) = start.checked_add(padded) else {
            return Err(overflow);
        };
        if self.mode == Mode::Commit && end > self.buffer.len() {
            return Err(overflow);
        }
        self.cursor = end;
        Ok(start)
    }

    pub fn allocate_message(&mut self, descriptor: &MessageDescriptor) -> Result<usize> {
        self.allocate(descriptor.size() as usize)
    }

    /// Reserves the element array of a repeated field.
    pub fn allocate_repeated(&mut self, field: &FieldDescriptor, count: u32) -> Result<usize> {
        let size = (field.element_size() as usize)
            .checked_mul(count as usize)
            .ok_or(Error::Allocation { size: usize::MAX })?;
        self.allocate(size)
    }

    /// Copies string bytes into the arena followed by a `0` terminator.
    pub fn allocate_string(&mut self, bytes: &[u8]) -> Result<usize> {
        let start = self.allocate(bytes.len() + 1)?;
        self.copy_in(start, bytes)?;
        Ok(start)
    }

    pub fn allocate_bytes(&mut self, bytes: &[u8]) -> Result<usize> {
        let start = self.allocate(bytes.len())?;
        self.copy_in(start, bytes)?;
        Ok(start)
    }

    fn copy_in(&mut self, start: usize, bytes: &[u8]) -> Result<()> {
        if self.mode == Mode::DryRun {
            return Ok(());
        }
        let len = bytes.len();
        self.buffer
            .get_mut(start..start + len)
            .ok_or(Error::OutOfBounds { offset: start, len })?
            .copy_from_slice(bytes);
        Ok(())
    }

    /// Counts one more occurrence of a repeated field. Only the dry run
    /// counts; a commit context leaves the map untouched.
    pub fn increase_occurrence(&mut self, position: usize, field_number: u32) {
        if self.mode == Mode::DryRun {
            *self
                .occurrences
                .entry(OccurrenceKey {
                    position,
                    field_number,
                })
                .or_insert(0) += 1;
        }
    }

    pub fn occurrence_count(&self, position: usize, field_number: u32) -> u32 {
        self.occurrences
            .get(&OccurrenceKey {
                position,
                field_number,
            })
            .copied()
            .unwrap_or(0)
    }

    /// Writable window onto `[base, base + size)`; only valid when committing.
    pub(crate) fn object_mut(&mut self, base: usize, size: usize) -> Result<ObjectMut<'_>> {
        ObjectMut::new(&mut self.buffer, base, size)
    }

    pub fn into_buffer(self) -> Vec<u8> {
        self.buffer
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::{FieldSpec, FieldType};

    #[test]
    fn dry_run_only_counts() {
        let mut ctx = LoadContext::dry_run();
        assert!(ctx.is_dry_run());
        assert_eq!(ctx.allocate_string(b"foo").unwrap(), 0);
        assert_eq!(ctx.allocate_bytes(b"123456789").unwrap(), 8);
        assert_eq!(ctx.used(), 8 + 16);
        assert!(ctx.into_buffer().is_empty());
    }

    #[test]
    fn commit_writes_into_presized_buffer() {
        let mut ctx = LoadContext::dry_run();
        ctx.allocate_string(b"foo").unwrap();
        ctx.allocate_bytes(b"bar").unwrap();
        let mut ctx = ctx.into_commit().unwrap();
        assert_eq!(ctx.mode(), Mode::Commit);
        assert_eq!(ctx.allocate_string(b"foo").unwrap(), 0);
        assert_eq!(ctx.allocate_bytes(b"bar").unwrap(), 8);
        // out of space: the dry run did not reserve this
        assert!(matches!(
            ctx.allocate_bytes(b"x"),
            Err(Error::Allocation { .. })
        ));
        let buffer = ctx.into_buffer();
        assert_eq!(&buffer[..4], b"foo\0");
        assert_eq!(&buffer[8..11], b"bar");
    }

    #[test]
    fn allocation_total_ignores_order() {
        let elem = MessageDescriptor::builder("elem")
            .field(FieldSpec::optional("v", 1, FieldType::Bool))
            .build()
            .unwrap();
        let outer = MessageDescriptor::builder("outer")
            .field(FieldSpec::repeated("e", 1, FieldType::Message).with_message(elem))
            .build()
            .unwrap();
        let field = &outer.fields()[0];

        let mut a = LoadContext::dry_run();
        a.allocate_string(b"abcdefghij").unwrap();
        a.allocate_repeated(field, 3).unwrap();
        a.allocate_message(&outer).unwrap();

        let mut b = LoadContext::dry_run();
        b.allocate_message(&outer).unwrap();
        b.allocate_repeated(field, 3).unwrap();
        b.allocate_string(b"abcdefghij").unwrap();

        assert_eq!(a.used(), b.used());
    }

    #[test]
    fn aligned_context_pads_every_allocation() {
        let mut ctx = LoadContext::dry_run_aligned(16);
        assert_eq!(ctx.alignment(), 16);
        assert_eq!(ctx.allocate_string(b"foo").unwrap(), 0);
        assert_eq!(ctx.allocate_bytes(b"123456789").unwrap(), 16);
        assert_eq!(ctx.used(), 32);

        let mut ctx = ctx.into_commit().unwrap();
        assert_eq!(ctx.alignment(), 16);
        assert_eq!(ctx.allocate_bytes(b"123456789").unwrap(), 0);
        assert_eq!(ctx.allocate_string(b"foo").unwrap(), 16);
        assert_eq!(ctx.used(), 32);

        assert_eq!(LoadContext::dry_run_aligned(4).alignment(), ALIGNMENT);
    }

    #[test]
    fn occurrences_are_keyed_by_position_and_field() {
        let mut ctx = LoadContext::dry_run();
        ctx.increase_occurrence(0, 1);
        ctx.increase_occurrence(0, 1);
        ctx.increase_occurrence(0, 2);
        ctx.increase_occurrence(5, 1);
        assert_eq!(ctx.occurrence_count(0, 1), 2);
        assert_eq!(ctx.occurrence_count(0, 2), 1);
        assert_eq!(ctx.occurrence_count(5, 1), 1);
        assert_eq!(ctx.occurrence_count(5, 2), 0);

        let mut ctx = ctx.into_commit().unwrap();
        ctx.increase_occurrence(0, 1);
        assert_eq!(ctx.occurrence_count(0, 1), 2);
    }
}
