use std::io;

use tracing::debug;

use crate::descriptor::{FieldDescriptor, FieldType, MessageDescriptor};
use crate::error::{Error, Result};
use crate::reflection::{MessageView, Value};
use crate::wire::{self, MAX_VARINT_LEN, WireType, zigzag_encode};

/// Destination for encoded bytes.
///
/// The encoder never buffers on its own; every tag, length and payload is
/// handed to the sink as soon as it is produced.
pub trait Sink {
    fn write(&mut self, bytes: &[u8]) -> Result<()>;
}

impl<S: Sink + ?Sized> Sink for &mut S {
    fn write(&mut self, bytes: &[u8]) -> Result<()> {
        (**self).write(bytes)
    }
}

impl Sink for Vec<u8> {
    fn write(&mut self, bytes: &[u8]) -> Result<()> {
        self.extend_from_slice(bytes);
        Ok(())
    }
}

/// Adapts a callback that reports success as a `bool`.
pub struct FnSink<F>(pub F);

impl<F: FnMut(&[u8]) -> bool> Sink for FnSink<F> {
    fn write(&mut self, bytes: &[u8]) -> Result<()> {
        if (self.0)(bytes) {
            Ok(())
        } else {
            Err(Error::Sink { len: bytes.len() })
        }
    }
}

pub struct IoSink<W>(pub W);

impl<W: io::Write> Sink for IoSink<W> {
    fn write(&mut self, bytes: &[u8]) -> Result<()> {
        self.0.write_all(bytes)?;
        Ok(())
    }
}

/// Sink that only counts, used to size nested messages before their length
/// prefix is written.
#[derive(Clone, Copy, Debug, Default)]
pub struct ByteCounter {
    count: usize,
}

impl ByteCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn count(&self) -> usize {
        self.count
    }
}

impl Sink for ByteCounter {
    fn write(&mut self, bytes: &[u8]) -> Result<()> {
        self.count += bytes.len();
        Ok(())
    }
}

struct Counting<'s, S: ?Sized> {
    inner: &'s mut S,
    written: usize,
}

impl<S: Sink + ?Sized> Sink for Counting<'_, S> {
    fn write(&mut self, bytes: &[u8]) -> Result<()> {
        self.inner.write(bytes)?;
        self.written += bytes.len();
        Ok(())
    }
}

pub fn write_varint<S: Sink + ?Sized>(sink: &mut S, n: u64) -> Result<()> {
    let mut buf = [0u8; MAX_VARINT_LEN];
    let len = wire::encode_varint(n, &mut buf);
    sink.write(&buf[..len])
}

pub fn write_tag<S: Sink + ?Sized>(
    sink: &mut S,
    field_number: u32,
    wire_type: WireType,
) -> Result<()> {
    write_varint(sink, u64::from(wire::make_tag(field_number, wire_type)))
}

pub fn write_fixed32<S: Sink + ?Sized>(sink: &mut S, n: u32) -> Result<()> {
    sink.write(&n.to_le_bytes())
}

pub fn write_fixed64<S: Sink + ?Sized>(sink: &mut S, n: u64) -> Result<()> {
    sink.write(&n.to_le_bytes())
}

fn write_blob<S: Sink + ?Sized>(sink: &mut S, bytes: &[u8]) -> Result<()> {
    write_varint(sink, bytes.len() as u64)?;
    sink.write(bytes)
}

/// Length of every nested message below a root, in the order the write pass
/// meets them. Each message is measured once, before anything is written.
#[derive(Debug, Default)]
struct NestedLengths {
    lengths: Vec<usize>,
    next: usize,
}

impl NestedLengths {
    /// Walks `view` once, recording nested lengths, and returns the encoded
    /// length of `view` itself.
    fn measure(&mut self, view: &MessageView<'_>) -> Result<usize> {
        let mut len = 0;
        for_each_value(view, |field, value| {
            len += match value {
                Value::Message(message) => {
                    let slot = self.lengths.len();
                    self.lengths.push(0);
                    let body = self.measure(message)?;
                    self.lengths[slot] = body;
                    wire::varint_size(u64::from(field.tag()))
                        + wire::varint_size(body as u64)
                        + body
                }
                value => {
                    let mut counter = ByteCounter::new();
                    save_field(view.descriptor(), field, value, &mut *self, &mut counter)?;
                    counter.count()
                }
            };
            Ok(())
        })?;
        Ok(len)
    }

    fn take(&mut self, owner: &MessageDescriptor) -> Result<usize> {
        let len = self
            .lengths
            .get(self.next)
            .copied()
            .ok_or_else(|| Error::InvalidDescriptor {
                message: owner.name().to_owned(),
                reason: "nested message was not measured".into(),
            })?;
        self.next += 1;
        Ok(len)
    }
}

/// Streams `view` into `sink`: present fields only, in descriptor order.
pub fn encode<S: Sink + ?Sized>(view: &MessageView<'_>, sink: &mut S) -> Result<()> {
    view.descriptor().check_version()?;
    let mut lengths = NestedLengths::default();
    let total = lengths.measure(view)?;
    let mut counting = Counting {
        inner: sink,
        written: 0,
    };
    save_message(view, &mut lengths, &mut counting)?;
    debug_assert_eq!(counting.written, total);
    debug!(
        msg_type = view.descriptor().name(),
        encoded_len = counting.written,
        nested = lengths.lengths.len(),
        "encoded message"
    );
    Ok(())
}

pub fn encode_to_vec(view: &MessageView<'_>) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    encode(view, &mut out)?;
    Ok(out)
}

/// Number of bytes [`encode`] would produce for `view`.
pub fn encoded_len(view: &MessageView<'_>) -> Result<usize> {
    NestedLengths::default().measure(view)
}

/// Calls `f` for every present value of `view` in descriptor order, one call
/// per element for repeated fields.
fn for_each_value<'a>(
    view: &MessageView<'a>,
    mut f: impl FnMut(&'a FieldDescriptor, &Value<'a>) -> Result<()>,
) -> Result<()> {
    for field in view.descriptor().fields() {
        match view.get(field) {
            None => {}
            Some(Value::Repeated(elements)) => {
                for element in &elements {
                    f(field, &element)?;
                }
            }
            Some(value) => f(field, &value)?,
        }
    }
    Ok(())
}

fn save_message<S: Sink + ?Sized>(
    view: &MessageView<'_>,
    lengths: &mut NestedLengths,
    sink: &mut S,
) -> Result<()> {
    let descriptor = view.descriptor();
    for_each_value(view, |field, value| {
        save_field(descriptor, field, value, &mut *lengths, &mut *sink)
    })
}

fn save_field<S: Sink + ?Sized>(
    owner: &MessageDescriptor,
    field: &FieldDescriptor,
    value: &Value<'_>,
    lengths: &mut NestedLengths,
    sink: &mut S,
) -> Result<()> {
    write_tag(sink, field.number(), field.wire_type())?;
    match *value {
        // int32 and enum sign-extend, so negative values take ten bytes
        Value::Int32(v) | Value::Enum(v) => match field.field_type() {
            FieldType::Sint32 => write_varint(sink, zigzag_encode(i64::from(v))),
            FieldType::Sfixed32 => write_fixed32(sink, v as u32),
            _ => write_varint(sink, i64::from(v) as u64),
        },
        Value::Int64(v) => match field.field_type() {
            FieldType::Sint64 => write_varint(sink, zigzag_encode(v)),
            FieldType::Sfixed64 => write_fixed64(sink, v as u64),
            _ => write_varint(sink, v as u64),
        },
        Value::UInt32(v) => match field.field_type() {
            FieldType::Fixed32 => write_fixed32(sink, v),
            _ => write_varint(sink, u64::from(v)),
        },
        Value::UInt64(v) => match field.field_type() {
            FieldType::Fixed64 => write_fixed64(sink, v),
            _ => write_varint(sink, v),
        },
        Value::Float(v) => write_fixed32(sink, v.to_bits()),
        Value::Double(v) => write_fixed64(sink, v.to_bits()),
        Value::Bool(v) => write_varint(sink, u64::from(v)),
        Value::String(v) => write_blob(sink, v.as_bytes()),
        Value::Bytes(v) => write_blob(sink, v),
        Value::Message(ref message) => {
            write_varint(sink, lengths.take(owner)? as u64)?;
            save_message(message, lengths, sink)
        }
        Value::Repeated(_) => Err(Error::InvalidDescriptor {
            message: owner.name().to_owned(),
            reason: format!("field `{}` holds a nested repeated value", field.name()),
        }),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::descriptor::FieldSpec;

    fn scalars() -> Arc<MessageDescriptor> {
        MessageDescriptor::builder("scalars")
            .field(FieldSpec::optional("i32", 1, FieldType::Int32))
            .field(FieldSpec::optional("s32", 2, FieldType::Sint32))
            .field(FieldSpec::optional("sf32", 3, FieldType::Sfixed32))
            .field(FieldSpec::optional("f", 4, FieldType::Float))
            .field(FieldSpec::optional("name", 5, FieldType::String))
            .build()
            .unwrap()
    }

    #[test]
    fn vec_and_counter_agree() {
        let mut out = Vec::new();
        let mut counter = ByteCounter::new();
        write_tag(&mut out, 1, WireType::Varint).unwrap();
        write_varint(&mut out, 300).unwrap();
        write_tag(&mut counter, 1, WireType::Varint).unwrap();
        write_varint(&mut counter, 300).unwrap();
        assert_eq!(out, [0x08, 0xac, 0x02]);
        assert_eq!(counter.count(), out.len());
    }

    #[test]
    fn fn_sink_failure_is_reported() {
        let mut budget = 2usize;
        let mut sink = FnSink(|bytes: &[u8]| {
            let ok = bytes.len() <= budget;
            budget = budget.saturating_sub(bytes.len());
            ok
        });
        assert!(write_fixed32(&mut sink, 7).is_err());
        let mut seen = Vec::new();
        let mut sink = FnSink(|bytes: &[u8]| {
            seen.extend_from_slice(bytes);
            true
        });
        write_fixed32(&mut sink, 0x0403_0201).unwrap();
        assert_eq!(seen, [1, 2, 3, 4]);
    }

    #[test]
    fn io_sink_writes_through() {
        let mut sink = IoSink(Vec::new());
        write_fixed64(&mut sink, 1).unwrap();
        assert_eq!(sink.0, [1, 0, 0, 0, 0, 0, 0, 0]);
    }

    #[test]
    fn negative_int32_takes_ten_bytes() {
        let desc = scalars();
        let record = crate::decode(
            &[0x08, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0x01],
            &desc,
        )
        .unwrap();
        assert_eq!(record.view().i32("i32"), Some(-1));
        let bytes = encode_to_vec(&record.view()).unwrap();
        assert_eq!(bytes.len(), 11);
        assert_eq!(encoded_len(&record.view()).unwrap(), 11);
    }

    #[test]
    fn fields_are_written_in_descriptor_order() {
        let desc = scalars();
        // name, then sf32 = -2, then s32 = -1, then f = 1.0; i32 absent
        let input = [
            0x2a, 0x01, b'x', 0x1d, 0xfe, 0xff, 0xff, 0xff, 0x10, 0x01, 0x25, 0x00, 0x00, 0x80,
            0x3f,
        ];
        let record = crate::decode(&input, &desc).unwrap();
        let bytes = encode_to_vec(&record.view()).unwrap();
        assert_eq!(
            bytes,
            [
                0x10, 0x01, 0x1d, 0xfe, 0xff, 0xff, 0xff, 0x25, 0x00, 0x00, 0x80, 0x3f, 0x2a,
                0x01, b'x',
            ]
        );
    }

    #[test]
    fn nested_length_prefix() {
        let inner = MessageDescriptor::builder("inner")
            .field(FieldSpec::optional("v", 1, FieldType::Uint64))
            .build()
            .unwrap();
        let outer = MessageDescriptor::builder("outer")
            .field(FieldSpec::repeated("items", 1, FieldType::Message).with_message(inner))
            .build()
            .unwrap();
        let input = [0x0a, 0x02, 0x08, 0x01, 0x0a, 0x00, 0x0a, 0x03, 0x08, 0xac, 0x02];
        let record = crate::decode(&input, &outer).unwrap();
        assert_eq!(encode_to_vec(&record.view()).unwrap(), input);
    }

    #[test]
    fn deep_chains_encode_in_linear_time() {
        const DEPTH: usize = 40;
        // level_0 { v: 1, child: level_1 { v: 1, child: ... } }
        let mut desc = MessageDescriptor::builder(format!("level_{DEPTH}"))
            .field(FieldSpec::optional("v", 1, FieldType::Int32))
            .build()
            .unwrap();
        let mut input = vec![0x08, 0x01];
        for level in (0..DEPTH).rev() {
            desc = MessageDescriptor::builder(format!("level_{level}"))
                .field(FieldSpec::optional("v", 1, FieldType::Int32))
                .field(FieldSpec::optional("child", 2, FieldType::Message).with_message(desc))
                .build()
                .unwrap();
            let mut outer = vec![0x08, 0x01];
            write_tag(&mut outer, 2, WireType::LengthDelimited).unwrap();
            write_varint(&mut outer, input.len() as u64).unwrap();
            outer.extend_from_slice(&input);
            input = outer;
        }
        let options = crate::DecodeOptions::default().with_max_depth(DEPTH);
        let record = crate::decode_with_options(&input, &desc, options).unwrap();

        let mut lengths = NestedLengths::default();
        assert_eq!(lengths.measure(&record.view()).unwrap(), input.len());
        assert_eq!(lengths.lengths.len(), DEPTH);

        let mut writes = 0usize;
        let mut out = Vec::new();
        let mut sink = FnSink(|bytes: &[u8]| {
            writes += 1;
            out.extend_from_slice(bytes);
            true
        });
        encode(&record.view(), &mut sink).unwrap();
        // one tag and one value or length write per field, each level once
        assert_eq!(writes, 2 * (2 * DEPTH + 1));
        assert_eq!(out, input);
        assert_eq!(encoded_len(&record.view()).unwrap(), input.len());
    }

    #[test]
    fn whole_repeated_value_is_not_a_field_value() {
        let desc = MessageDescriptor::builder("list")
            .field(FieldSpec::repeated("v", 1, FieldType::Uint32))
            .build()
            .unwrap();
        let record = crate::decode(&[0x08, 0x01, 0x08, 0x02], &desc).unwrap();
        let view = record.view();
        let field = desc.field_by_name("v").unwrap();
        let list = view.get(field).unwrap();
        assert!(matches!(list, Value::Repeated(_)));

        let mut out = Vec::new();
        let err = save_field(&desc, field, &list, &mut NestedLengths::default(), &mut out)
            .unwrap_err();
        assert!(matches!(err, Error::InvalidDescriptor { ref message, .. } if message == "list"));
        // the elements themselves encode one by one
        assert_eq!(encode_to_vec(&view).unwrap(), [0x08, 0x01, 0x08, 0x02]);
    }

    #[test]
    fn sink_error_aborts_encode() {
        let desc = scalars();
        let record = crate::decode(&[0x08, 0x05, 0x2a, 0x01, b'y'], &desc).unwrap();
        let mut writes = 0;
        let mut sink = FnSink(|_: &[u8]| {
            writes += 1;
            writes < 3
        });
        let err = encode(&record.view(), &mut sink).unwrap_err();
        assert!(matches!(err, Error::Sink { .. }));
    }
}
