//! Two-pass decoding of wire bytes into one flat record tree.
//!
//! The first pass runs over the input with a dry-run [`LoadContext`]: it
//! reserves space for every record, string and byte blob and counts how often
//! each repeated field occurs inside each message instance. Message instances
//! are told apart by the absolute input offset where their payload starts, so
//! the counts of sibling and nested instances never mix.
//!
//! The second pass allocates one zeroed buffer of exactly the reserved size and
//! reads the input again, now writing values. Repeated arrays of a message are
//! carved out before any of its fields are read, using the counts from the
//! first pass, and then filled slot by slot.

use std::sync::Arc;

use tracing::{debug, trace};

use crate::arena::LoadContext;
use crate::base::{Object, Primitive};
use crate::descriptor::{FieldDescriptor, FieldType, MessageDescriptor};
use crate::error::{Error, Result, WireErrorKind};
use crate::reflection::MessageView;
use crate::wire::{ByteCursor, Tag, zigzag_decode};

pub const DEFAULT_MAX_DEPTH: usize = 32;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DecodeOptions {
    /// Deepest message nesting accepted below the root.
    pub max_depth: usize,
}

impl Default for DecodeOptions {
    fn default() -> Self {
        DecodeOptions {
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }
}

impl DecodeOptions {
    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DecodeState {
    Sizing,
    Allocated,
    Filling,
    Done,
    Failed,
}

/// A decoded record tree. Owns the single allocation holding the root record
/// and everything it references; dropping it frees the whole tree.
#[derive(Clone)]
pub struct OwnedRecord {
    buffer: Vec<u8>,
    descriptor: Arc<MessageDescriptor>,
}

impl OwnedRecord {
    /// Adopts a buffer previously obtained from [`OwnedRecord::as_bytes`] or
    /// [`OwnedRecord::into_bytes`]. Records only hold buffer-relative
    /// offsets, so the bytes may have been copied or moved in between.
    pub fn from_bytes(buffer: Vec<u8>, descriptor: Arc<MessageDescriptor>) -> Result<Self> {
        let size = descriptor.size() as usize;
        if buffer.len() < size {
            return Err(Error::OutOfBounds {
                offset: 0,
                len: size,
            });
        }
        Ok(OwnedRecord { buffer, descriptor })
    }

    pub fn view(&self) -> MessageView<'_> {
        MessageView::new(
            Object::root(&self.buffer, self.descriptor.size() as usize),
            &self.descriptor,
        )
    }

    pub fn descriptor(&self) -> &Arc<MessageDescriptor> {
        &self.descriptor
    }

    /// Total size of the allocation, root record included.
    pub fn size(&self) -> usize {
        self.buffer.len()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buffer
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buffer
    }
}

impl core::fmt::Debug for OwnedRecord {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        self.view().fmt(f)
    }
}

impl PartialEq for OwnedRecord {
    fn eq(&self, other: &Self) -> bool {
        self.view() == other.view()
    }
}

pub struct Decoder<'a> {
    input: &'a [u8],
    descriptor: &'a Arc<MessageDescriptor>,
    options: DecodeOptions,
    state: DecodeState,
}

impl<'a> Decoder<'a> {
    pub fn new(
        input: &'a [u8],
        descriptor: &'a Arc<MessageDescriptor>,
        options: DecodeOptions,
    ) -> Self {
        Decoder {
            input,
            descriptor,
            options,
            state: DecodeState::Sizing,
        }
    }

    pub fn state(&self) -> DecodeState {
        self.state
    }

    pub fn run(&mut self) -> Result<OwnedRecord> {
        let result = self.run_stages();
        self.state = match &result {
            Ok(_) => DecodeState::Done,
            Err(err) => {
                debug!(stage = ?self.state, error = %err, "decode failed");
                DecodeState::Failed
            }
        };
        result
    }

    fn run_stages(&mut self) -> Result<OwnedRecord> {
        let descriptor = self.descriptor;
        let root: &MessageDescriptor = descriptor;

        self.state = DecodeState::Sizing;
        root.check_version()?;
        let mut ctx = LoadContext::dry_run_aligned(root.align() as usize);
        ctx.allocate_message(root)?;
        size_message(&mut ctx, ByteCursor::new(self.input), root, 0, &self.options)?;
        let total = ctx.used();

        self.state = DecodeState::Allocated;
        let mut ctx = ctx.into_commit()?;

        self.state = DecodeState::Filling;
        let base = ctx.allocate_message(root)?;
        fill_message(
            &mut ctx,
            ByteCursor::new(self.input),
            root,
            base,
            0,
            &self.options,
        )?;
        debug_assert_eq!(ctx.used(), total);

        debug!(
            msg_type = root.name(),
            input_len = self.input.len(),
            arena_size = total,
            "decoded message"
        );
        Ok(OwnedRecord {
            buffer: ctx.into_buffer(),
            descriptor: Arc::clone(descriptor),
        })
    }
}

fn enter(depth: usize, options: &DecodeOptions) -> Result<usize> {
    let depth = depth + 1;
    if depth > options.max_depth {
        return Err(Error::DepthExceeded {
            max_depth: options.max_depth,
        });
    }
    Ok(depth)
}

/// Finds the field a tag refers to. A known field number arriving with a wire
/// type other than the field's own is treated like an unknown field.
fn resolve(descriptor: &MessageDescriptor, tag: Tag) -> Option<(usize, &FieldDescriptor)> {
    descriptor
        .fields()
        .iter()
        .enumerate()
        .find(|(_, field)| field.number() == tag.field_number && field.wire_type() == tag.wire_type)
}

fn skip_unknown(cursor: &mut ByteCursor<'_>, descriptor: &MessageDescriptor, tag: Tag) -> Result<()> {
    trace!(
        msg_type = descriptor.name(),
        field_number = tag.field_number,
        wire_type = ?tag.wire_type,
        offset = cursor.tell(),
        "skipping unknown field"
    );
    cursor.skip_field(tag.wire_type)
}

fn message_type<'d>(
    owner: &MessageDescriptor,
    field: &'d FieldDescriptor,
) -> Result<&'d MessageDescriptor> {
    field
        .message_type()
        .map(|message| &**message)
        .ok_or_else(|| Error::InvalidDescriptor {
            message: owner.name().to_owned(),
            reason: format!("field `{}` has no message type", field.name()),
        })
}

fn read_blob<'a>(cursor: &mut ByteCursor<'a>) -> Result<&'a [u8]> {
    let len = cursor.read_length()?;
    cursor.read_raw(len)
}

pub(crate) fn read_primitive(cursor: &mut ByteCursor<'_>, field_type: FieldType) -> Result<Primitive> {
    let value = match field_type {
        FieldType::Int32 | FieldType::Enum => Primitive::I32(cursor.read_varint32()? as i32),
        FieldType::Uint32 => Primitive::U32(cursor.read_varint32()?),
        FieldType::Sint32 => {
            Primitive::I32(zigzag_decode(u64::from(cursor.read_varint32()?)) as i32)
        }
        FieldType::Int64 => Primitive::I64(cursor.read_varint64()? as i64),
        FieldType::Uint64 => Primitive::U64(cursor.read_varint64()?),
        FieldType::Sint64 => Primitive::I64(zigzag_decode(cursor.read_varint64()?)),
        FieldType::Bool => Primitive::Bool(cursor.read_bool()?),
        FieldType::Fixed32 => Primitive::U32(cursor.read_uint32()?),
        FieldType::Sfixed32 => Primitive::I32(cursor.read_int32()?),
        FieldType::Float => Primitive::F32(cursor.read_float()?),
        FieldType::Fixed64 => Primitive::U64(cursor.read_uint64()?),
        FieldType::Sfixed64 => Primitive::I64(cursor.read_int64()?),
        FieldType::Double => Primitive::F64(cursor.read_double()?),
        FieldType::String | FieldType::Bytes | FieldType::Message => {
            return Err(Error::wire(
                cursor.tell(),
                WireErrorKind::UnsupportedWireType(field_type.wire_type() as u8),
            ));
        }
    };
    Ok(value)
}

/// Dry-run pass over one message payload.
fn size_message(
    ctx: &mut LoadContext,
    mut cursor: ByteCursor<'_>,
    descriptor: &MessageDescriptor,
    depth: usize,
    options: &DecodeOptions,
) -> Result<()> {
    let position = cursor.tell();
    while !cursor.is_at_end() {
        let tag = cursor.read_tag()?;
        let Some((_, field)) = resolve(descriptor, tag) else {
            skip_unknown(&mut cursor, descriptor, tag)?;
            continue;
        };
        if field.is_repeated() {
            ctx.increase_occurrence(position, field.number());
        }
        match field.field_type() {
            FieldType::Message => {
                let sub = cursor.read_sub_range()?;
                let child = message_type(descriptor, field)?;
                size_message(ctx, sub, child, enter(depth, options)?, options)?;
            }
            FieldType::String => {
                ctx.allocate_string(read_blob(&mut cursor)?)?;
            }
            FieldType::Bytes => {
                ctx.allocate_bytes(read_blob(&mut cursor)?)?;
            }
            _ => cursor.skip_field(tag.wire_type)?,
        }
    }
    // Arrays are reserved once the whole payload has been counted.
    for field in descriptor.fields().iter().filter(|field| field.is_repeated()) {
        let count = ctx.occurrence_count(position, field.number());
        if count > 0 {
            ctx.allocate_repeated(field, count)?;
        }
    }
    Ok(())
}

#[derive(Clone, Copy)]
struct RepeatedSlot {
    start: usize,
    count: u32,
    next: u32,
}

fn next_element(slot: Option<&mut RepeatedSlot>, field: &FieldDescriptor) -> Result<usize> {
    let element_size = field.element_size() as usize;
    match slot {
        Some(slot) if slot.next < slot.count => {
            let at = slot.start + slot.next as usize * element_size;
            slot.next += 1;
            Ok(at)
        }
        _ => Err(Error::Allocation { size: element_size }),
    }
}

/// Commit pass over one message payload, writing into the record at `base`.
fn fill_message(
    ctx: &mut LoadContext,
    mut cursor: ByteCursor<'_>,
    descriptor: &MessageDescriptor,
    base: usize,
    depth: usize,
    options: &DecodeOptions,
) -> Result<()> {
    let position = cursor.tell();
    let size = descriptor.size() as usize;

    let mut slots = Vec::with_capacity(descriptor.fields().len());
    for field in descriptor.fields() {
        let count = if field.is_repeated() {
            ctx.occurrence_count(position, field.number())
        } else {
            0
        };
        if count == 0 {
            slots.push(None);
            continue;
        }
        let start = ctx.allocate_repeated(field, count)?;
        ctx.object_mut(base, size)?
            .set_pair(field.offset(), start, count as usize)?;
        slots.push(Some(RepeatedSlot {
            start,
            count,
            next: 0,
        }));
    }

    while !cursor.is_at_end() {
        let tag = cursor.read_tag()?;
        let Some((index, field)) = resolve(descriptor, tag) else {
            skip_unknown(&mut cursor, descriptor, tag)?;
            continue;
        };

        // (record base, record size, slot offset) the value is written to
        let (record, record_size, offset) = if field.is_repeated() {
            let element = next_element(slots.get_mut(index).and_then(Option::as_mut), field)?;
            (element, field.element_size() as usize, 0)
        } else {
            ctx.object_mut(base, size)?.set_has_bit(field.has_bit())?;
            (base, size, field.offset())
        };

        match field.field_type() {
            FieldType::Message => {
                let sub = cursor.read_sub_range()?;
                let child = message_type(descriptor, field)?;
                fill_message(
                    ctx,
                    sub,
                    child,
                    record + offset as usize,
                    enter(depth, options)?,
                    options,
                )?;
            }
            FieldType::String => {
                let bytes = read_blob(&mut cursor)?;
                if core::str::from_utf8(bytes).is_err() {
                    return Err(Error::wire(
                        cursor.tell() - bytes.len(),
                        WireErrorKind::InvalidUtf8 {
                            field: field.name().to_owned(),
                        },
                    ));
                }
                let start = ctx.allocate_string(bytes)?;
                ctx.object_mut(record, record_size)?
                    .set_pair(offset, start, bytes.len())?;
            }
            FieldType::Bytes => {
                let bytes = read_blob(&mut cursor)?;
                let start = ctx.allocate_bytes(bytes)?;
                ctx.object_mut(record, record_size)?
                    .set_pair(offset, start, bytes.len())?;
            }
            field_type => {
                let value = read_primitive(&mut cursor, field_type)?;
                ctx.object_mut(record, record_size)?
                    .set_primitive(offset, value)?;
            }
        }
    }

    check_required(ctx, descriptor, base)
}

fn check_required(ctx: &mut LoadContext, descriptor: &MessageDescriptor, base: usize) -> Result<()> {
    let mut record = ctx.object_mut(base, descriptor.size() as usize)?;
    for field in descriptor.fields().iter().filter(|field| field.is_required()) {
        if !record.has_bit(field.has_bit())? {
            return Err(Error::MissingRequiredField {
                message: descriptor.name().to_owned(),
                field: field.name().to_owned(),
            });
        }
    }
    Ok(())
}
