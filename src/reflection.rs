use crate::base::{Object, Scalar};
use crate::descriptor::{DefaultValue, FieldDescriptor, FieldType, MessageDescriptor};

/// Typed, read-only view of one decoded record.
///
/// All reads go through the descriptor: the field's type selects how the
/// slot at `offset` is interpreted, and every access is bounds-checked
/// against the record.
#[derive(Clone, Copy)]
pub struct MessageView<'a> {
    object: Object<'a>,
    descriptor: &'a MessageDescriptor,
}

#[derive(Debug, PartialEq)]
pub enum Value<'a> {
    Int32(i32),
    Int64(i64),
    UInt32(u32),
    UInt64(u64),
    Float(f32),
    Double(f64),
    Bool(bool),
    Enum(i32),
    String(&'a str),
    Bytes(&'a [u8]),
    Message(MessageView<'a>),
    Repeated(RepeatedView<'a>),
}

impl<'a> Value<'a> {
    pub fn as_i32(&self) -> Option<i32> {
        match *self {
            Value::Int32(v) | Value::Enum(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match *self {
            Value::Int64(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_u32(&self) -> Option<u32> {
        match *self {
            Value::UInt32(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_u64(&self) -> Option<u64> {
        match *self {
            Value::UInt64(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_f32(&self) -> Option<f32> {
        match *self {
            Value::Float(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match *self {
            Value::Double(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match *self {
            Value::Bool(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&'a str> {
        match *self {
            Value::String(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&'a [u8]> {
        match *self {
            Value::Bytes(v) => Some(v),
            Value::String(v) => Some(v.as_bytes()),
            _ => None,
        }
    }

    pub fn as_message(&self) -> Option<MessageView<'a>> {
        match *self {
            Value::Message(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_repeated(&self) -> Option<RepeatedView<'a>> {
        match *self {
            Value::Repeated(v) => Some(v),
            _ => None,
        }
    }
}

impl<'a> From<&'a DefaultValue> for Value<'a> {
    fn from(value: &'a DefaultValue) -> Self {
        match value {
            DefaultValue::Int32(v) => Value::Int32(*v),
            DefaultValue::Int64(v) => Value::Int64(*v),
            DefaultValue::UInt32(v) => Value::UInt32(*v),
            DefaultValue::UInt64(v) => Value::UInt64(*v),
            DefaultValue::Float(v) => Value::Float(*v),
            DefaultValue::Double(v) => Value::Double(*v),
            DefaultValue::Bool(v) => Value::Bool(*v),
            DefaultValue::Enum(v) => Value::Enum(*v),
            DefaultValue::String(v) => Value::String(v),
            DefaultValue::Bytes(v) => Value::Bytes(v),
        }
    }
}

fn get_scalar<T: Scalar>(object: &Object<'_>, offset: u32) -> Option<T> {
    object.get::<T>(offset)
}

/// Interprets the value stored at `offset` of `object` as `field`'s type.
fn read_value<'a>(
    object: &Object<'a>,
    offset: u32,
    field: &'a FieldDescriptor,
) -> Option<Value<'a>> {
    let value = match field.field_type() {
        FieldType::Int32 | FieldType::Sint32 | FieldType::Sfixed32 => {
            Value::Int32(get_scalar(object, offset)?)
        }
        FieldType::Int64 | FieldType::Sint64 | FieldType::Sfixed64 => {
            Value::Int64(get_scalar(object, offset)?)
        }
        FieldType::Uint32 | FieldType::Fixed32 => Value::UInt32(get_scalar(object, offset)?),
        FieldType::Uint64 | FieldType::Fixed64 => Value::UInt64(get_scalar(object, offset)?),
        FieldType::Float => Value::Float(get_scalar(object, offset)?),
        FieldType::Double => Value::Double(get_scalar(object, offset)?),
        FieldType::Bool => Value::Bool(get_scalar(object, offset)?),
        FieldType::Enum => Value::Enum(get_scalar(object, offset)?),
        FieldType::String => Value::String(core::str::from_utf8(object.blob(offset)?).ok()?),
        FieldType::Bytes => Value::Bytes(object.blob(offset)?),
        FieldType::Message => {
            let descriptor = field.message_type()?;
            Value::Message(MessageView {
                object: object.child(offset, descriptor.size())?,
                descriptor,
            })
        }
    };
    Some(value)
}

fn zero_value(field: &FieldDescriptor) -> Value<'static> {
    match field.field_type() {
        FieldType::Int32 | FieldType::Sint32 | FieldType::Sfixed32 => Value::Int32(0),
        FieldType::Int64 | FieldType::Sint64 | FieldType::Sfixed64 => Value::Int64(0),
        FieldType::Uint32 | FieldType::Fixed32 => Value::UInt32(0),
        FieldType::Uint64 | FieldType::Fixed64 => Value::UInt64(0),
        FieldType::Float => Value::Float(0.0),
        FieldType::Double => Value::Double(0.0),
        FieldType::Bool => Value::Bool(false),
        FieldType::Enum => Value::Enum(0),
        FieldType::String => Value::String(""),
        FieldType::Bytes | FieldType::Message => Value::Bytes(&[]),
    }
}

impl<'a> MessageView<'a> {
    pub(crate) fn new(object: Object<'a>, descriptor: &'a MessageDescriptor) -> Self {
        MessageView { object, descriptor }
    }

    pub fn descriptor(&self) -> &'a MessageDescriptor {
        self.descriptor
    }

    pub fn object(&self) -> &Object<'a> {
        &self.object
    }

    /// Whether the field was seen on the wire; for repeated fields whether
    /// it has at least one element.
    pub fn has(&self, field: &FieldDescriptor) -> bool {
        if field.is_repeated() {
            self.object
                .pair(field.offset())
                .is_some_and(|(_, count)| count > 0)
        } else {
            self.object.has_bit(field.has_bit())
        }
    }

    /// The field's value, `None` when it is absent (or an empty repeated field).
    pub fn get(&self, field: &'a FieldDescriptor) -> Option<Value<'a>> {
        if !self.has(field) {
            return None;
        }
        if field.is_repeated() {
            let (offset, count) = self.object.pair(field.offset())?;
            return Some(Value::Repeated(RepeatedView {
                buf: self.object.buffer(),
                offset,
                count,
                field,
            }));
        }
        read_value(&self.object, field.offset(), field)
    }

    /// Like [`MessageView::get`], but absent fields fall back to the
    /// descriptor's default value, then to the type's zero value. Absent
    /// nested messages read as an empty message and absent repeated fields as
    /// an empty list.
    pub fn get_or_default(&self, field: &'a FieldDescriptor) -> Option<Value<'a>> {
        if let Some(value) = self.get(field) {
            return Some(value);
        }
        if field.is_repeated() {
            return Some(Value::Repeated(RepeatedView {
                buf: self.object.buffer(),
                offset: 0,
                count: 0,
                field,
            }));
        }
        if field.field_type() == FieldType::Message {
            return read_value(&self.object, field.offset(), field);
        }
        Some(match field.default_value() {
            Some(default) => Value::from(default),
            None => zero_value(field),
        })
    }

    pub fn field(&self, name: &str) -> Option<Value<'a>> {
        self.get(self.descriptor.field_by_name(name)?)
    }

    pub fn field_or_default(&self, name: &str) -> Option<Value<'a>> {
        self.get_or_default(self.descriptor.field_by_name(name)?)
    }

    pub fn i32(&self, name: &str) -> Option<i32> {
        self.field(name)?.as_i32()
    }

    pub fn i64(&self, name: &str) -> Option<i64> {
        self.field(name)?.as_i64()
    }

    pub fn u32(&self, name: &str) -> Option<u32> {
        self.field(name)?.as_u32()
    }

    pub fn u64(&self, name: &str) -> Option<u64> {
        self.field(name)?.as_u64()
    }

    pub fn f32(&self, name: &str) -> Option<f32> {
        self.field(name)?.as_f32()
    }

    pub fn f64(&self, name: &str) -> Option<f64> {
        self.field(name)?.as_f64()
    }

    pub fn bool(&self, name: &str) -> Option<bool> {
        self.field(name)?.as_bool()
    }

    pub fn str(&self, name: &str) -> Option<&'a str> {
        self.field(name)?.as_str()
    }

    pub fn bytes(&self, name: &str) -> Option<&'a [u8]> {
        self.field(name)?.as_bytes()
    }

    pub fn message(&self, name: &str) -> Option<MessageView<'a>> {
        self.field(name)?.as_message()
    }

    /// Elements of a repeated field; empty when the field never occurred.
    pub fn repeated(&self, name: &str) -> Option<RepeatedView<'a>> {
        self.field_or_default(name)?.as_repeated()
    }
}

impl core::fmt::Debug for MessageView<'_> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let mut debug_struct = f.debug_struct(self.descriptor.name());
        for field in self.descriptor.fields() {
            if let Some(value) = self.get(field) {
                debug_struct.field(field.name(), &value);
            }
        }
        debug_struct.finish()
    }
}

impl PartialEq for MessageView<'_> {
    fn eq(&self, other: &Self) -> bool {
        self.descriptor.name() == other.descriptor.name()
            && self.descriptor.fields().len() == other.descriptor.fields().len()
            && self
                .descriptor
                .fields()
                .iter()
                .zip(other.descriptor.fields())
                .all(|(a, b)| a.number() == b.number() && self.get(a) == other.get(b))
    }
}

/// The elements of one repeated field, in wire order.
#[derive(Clone, Copy)]
pub struct RepeatedView<'a> {
    buf: &'a [u8],
    offset: usize,
    count: usize,
    field: &'a FieldDescriptor,
}

impl<'a> RepeatedView<'a> {
    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn field(&self) -> &'a FieldDescriptor {
        self.field
    }

    pub fn get(&self, index: usize) -> Option<Value<'a>> {
        if index >= self.count {
            return None;
        }
        let size = self.field.element_size() as usize;
        let element = Object::new(self.buf, self.offset + index * size, size)?;
        read_value(&element, 0, self.field)
    }

    pub fn iter(&self) -> RepeatedIter<'a> {
        RepeatedIter {
            view: *self,
            index: 0,
        }
    }
}

impl core::fmt::Debug for RepeatedView<'_> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_list().entries(self.iter()).finish()
    }
}

impl PartialEq for RepeatedView<'_> {
    fn eq(&self, other: &Self) -> bool {
        self.len() == other.len() && self.iter().eq(other.iter())
    }
}

pub struct RepeatedIter<'a> {
    view: RepeatedView<'a>,
    index: usize,
}

impl<'a> Iterator for RepeatedIter<'a> {
    type Item = Value<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        let item = self.view.get(self.index)?;
        self.index += 1;
        Some(item)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.view.len().saturating_sub(self.index);
        (0, Some(remaining))
    }
}

impl<'a> IntoIterator for &RepeatedView<'a> {
    type Item = Value<'a>;
    type IntoIter = RepeatedIter<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}
