//! Runtime metadata describing message types.
//!
//! Descriptors are built once, at schema registration time, and shared by
//! every decode and encode call through an [`Arc`]. Nothing in here is ever
//! mutated after [`MessageDescriptorBuilder::build`] returns.

use std::sync::Arc;

use crate::error::{Error, Result};
use crate::wire::{self, WireType};

pub const DDF_MAJOR_VERSION: u16 = 1;
pub const DDF_MINOR_VERSION: u16 = 0;

/// Bytes reserved for a `(offset, count)` or `(offset, len)` pair.
pub(crate) const PAIR_SIZE: u32 = 8;

/// Alignment of every record unless a field or the message asks for more.
pub const RECORD_ALIGN: u32 = 8;

/// Alignment of fields declared with [`FieldSpec::aligned`] and of messages
/// built with [`MessageDescriptorBuilder::struct_align`].
pub const EXTENDED_ALIGN: u32 = 16;

/// Field types, numbered like the protobuf descriptor types.
#[repr(u8)]
#[derive(Clone, Copy, PartialEq, Eq, Debug, Hash)]
pub enum FieldType {
    Double = 1,
    Float = 2,
    Int64 = 3,
    Uint64 = 4,
    Int32 = 5,
    Fixed64 = 6,
    Fixed32 = 7,
    Bool = 8,
    String = 9,
    Message = 11,
    Bytes = 12,
    Uint32 = 13,
    Enum = 14,
    Sfixed32 = 15,
    Sfixed64 = 16,
    Sint32 = 17,
    Sint64 = 18,
}

impl FieldType {
    pub fn wire_type(self) -> WireType {
        match self {
            FieldType::Int32
            | FieldType::Int64
            | FieldType::Uint32
            | FieldType::Uint64
            | FieldType::Sint32
            | FieldType::Sint64
            | FieldType::Bool
            | FieldType::Enum => WireType::Varint,
            FieldType::Fixed64 | FieldType::Sfixed64 | FieldType::Double => WireType::Fixed64,
            FieldType::String | FieldType::Bytes | FieldType::Message => {
                WireType::LengthDelimited
            }
            FieldType::Fixed32 | FieldType::Sfixed32 | FieldType::Float => WireType::Fixed32,
        }
    }

    /// Size of one in-record value, `None` for messages whose size depends on
    /// the nested descriptor.
    pub fn value_size(self) -> Option<u32> {
        match self {
            FieldType::Bool => Some(1),
            FieldType::Int32
            | FieldType::Uint32
            | FieldType::Sint32
            | FieldType::Fixed32
            | FieldType::Sfixed32
            | FieldType::Float
            | FieldType::Enum => Some(4),
            FieldType::Int64
            | FieldType::Uint64
            | FieldType::Sint64
            | FieldType::Fixed64
            | FieldType::Sfixed64
            | FieldType::Double => Some(8),
            FieldType::String | FieldType::Bytes => Some(PAIR_SIZE),
            FieldType::Message => None,
        }
    }

    pub fn is_blob(self) -> bool {
        matches!(self, FieldType::String | FieldType::Bytes)
    }
}

#[repr(u8)]
#[derive(Clone, Copy, PartialEq, Eq, Debug, Hash)]
pub enum Label {
    Optional = 1,
    Required = 2,
    Repeated = 3,
}

/// Default for an optional field, returned by
/// [`MessageView::get_or_default`](crate::reflection::MessageView::get_or_default)
/// when the field is absent.
#[derive(Clone, Debug, PartialEq)]
pub enum DefaultValue {
    Int32(i32),
    Int64(i64),
    UInt32(u32),
    UInt64(u64),
    Float(f32),
    Double(f64),
    Bool(bool),
    Enum(i32),
    String(String),
    Bytes(Vec<u8>),
}

impl DefaultValue {
    fn matches(&self, field_type: FieldType) -> bool {
        matches!(
            (self, field_type),
            (
                DefaultValue::Int32(_),
                FieldType::Int32 | FieldType::Sint32 | FieldType::Sfixed32
            ) | (
                DefaultValue::Int64(_),
                FieldType::Int64 | FieldType::Sint64 | FieldType::Sfixed64
            ) | (DefaultValue::UInt32(_), FieldType::Uint32 | FieldType::Fixed32)
                | (DefaultValue::UInt64(_), FieldType::Uint64 | FieldType::Fixed64)
                | (DefaultValue::Float(_), FieldType::Float)
                | (DefaultValue::Double(_), FieldType::Double)
                | (DefaultValue::Bool(_), FieldType::Bool)
                | (DefaultValue::Enum(_), FieldType::Enum)
                | (DefaultValue::String(_), FieldType::String)
                | (DefaultValue::Bytes(_), FieldType::Bytes)
        )
    }
}

#[derive(Debug)]
pub struct FieldDescriptor {
    name: String,
    number: u32,
    field_type: FieldType,
    label: Label,
    offset: u32,
    has_bit: u32,
    aligned: bool,
    default_value: Option<DefaultValue>,
    message_type: Option<Arc<MessageDescriptor>>,
    enum_type: Option<Arc<EnumDescriptor>>,
}

impl FieldDescriptor {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn number(&self) -> u32 {
        self.number
    }

    pub fn field_type(&self) -> FieldType {
        self.field_type
    }

    pub fn label(&self) -> Label {
        self.label
    }

    /// Byte offset of this field's slot inside the owning record.
    pub fn offset(&self) -> u32 {
        self.offset
    }

    /// Index of the presence bit; meaningless for repeated fields.
    pub fn has_bit(&self) -> u32 {
        self.has_bit
    }

    pub fn is_repeated(&self) -> bool {
        self.label == Label::Repeated
    }

    pub fn is_required(&self) -> bool {
        self.label == Label::Required
    }

    /// Whether the slot was forced onto a 16-byte boundary.
    pub fn is_aligned(&self) -> bool {
        self.aligned
    }

    pub fn default_value(&self) -> Option<&DefaultValue> {
        self.default_value.as_ref()
    }

    pub fn message_type(&self) -> Option<&Arc<MessageDescriptor>> {
        self.message_type.as_ref()
    }

    pub fn enum_type(&self) -> Option<&Arc<EnumDescriptor>> {
        self.enum_type.as_ref()
    }

    pub fn wire_type(&self) -> WireType {
        self.field_type.wire_type()
    }

    pub fn tag(&self) -> u32 {
        wire::make_tag(self.number, self.wire_type())
    }

    /// Size of one element: the record size for messages, the value size otherwise.
    pub fn element_size(&self) -> u32 {
        match &self.message_type {
            Some(message) => message.size(),
            None => self.field_type.value_size().unwrap_or(0),
        }
    }

    /// Size of the slot reserved inside the owning record.
    pub fn slot_size(&self) -> u32 {
        if self.is_repeated() {
            PAIR_SIZE
        } else {
            self.element_size()
        }
    }

    fn slot_align(&self) -> u32 {
        let natural = if self.is_repeated() || self.field_type.is_blob() {
            4
        } else if let Some(message) = &self.message_type {
            message.align()
        } else {
            self.slot_size()
        };
        if self.aligned {
            natural.max(EXTENDED_ALIGN)
        } else {
            natural
        }
    }
}

#[derive(Debug)]
pub struct MessageDescriptor {
    name: String,
    major_version: u16,
    minor_version: u16,
    fields: Vec<FieldDescriptor>,
    size: u32,
    align: u32,
}

impl MessageDescriptor {
    pub fn builder(name: impl Into<String>) -> MessageDescriptorBuilder {
        MessageDescriptorBuilder {
            name: name.into(),
            major_version: DDF_MAJOR_VERSION,
            minor_version: DDF_MINOR_VERSION,
            struct_align: false,
            fields: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn major_version(&self) -> u16 {
        self.major_version
    }

    pub fn minor_version(&self) -> u16 {
        self.minor_version
    }

    pub fn fields(&self) -> &[FieldDescriptor] {
        &self.fields
    }

    /// Exact size of one flat record, variable-length payloads excluded.
    pub fn size(&self) -> u32 {
        self.size
    }

    /// Boundary a record of this type, and every record nested in it, must
    /// start on. The size is always a multiple of it.
    pub fn align(&self) -> u32 {
        self.align
    }

    pub fn field_by_number(&self, number: u32) -> Option<&FieldDescriptor> {
        self.fields.iter().find(|field| field.number == number)
    }

    pub fn field_by_name(&self, name: &str) -> Option<&FieldDescriptor> {
        self.fields.iter().find(|field| field.name == name)
    }

    /// Checks this descriptor and every descriptor reachable from it against
    /// the major version this codec understands.
    pub fn check_version(&self) -> Result<()> {
        if self.major_version != DDF_MAJOR_VERSION {
            return Err(Error::VersionMismatch {
                message: self.name.clone(),
                expected: DDF_MAJOR_VERSION,
                found: self.major_version,
            });
        }
        for field in &self.fields {
            if let Some(message) = &field.message_type {
                message.check_version()?;
            }
        }
        Ok(())
    }
}

/// Declaration of one field, consumed by [`MessageDescriptorBuilder`].
#[derive(Clone, Debug)]
pub struct FieldSpec {
    name: String,
    number: u32,
    field_type: FieldType,
    label: Label,
    aligned: bool,
    default_value: Option<DefaultValue>,
    message_type: Option<Arc<MessageDescriptor>>,
    enum_type: Option<Arc<EnumDescriptor>>,
}

impl FieldSpec {
    pub fn new(name: impl Into<String>, number: u32, field_type: FieldType, label: Label) -> Self {
        FieldSpec {
            name: name.into(),
            number,
            field_type,
            label,
            aligned: false,
            default_value: None,
            message_type: None,
            enum_type: None,
        }
    }

    pub fn optional(name: impl Into<String>, number: u32, field_type: FieldType) -> Self {
        Self::new(name, number, field_type, Label::Optional)
    }

    pub fn required(name: impl Into<String>, number: u32, field_type: FieldType) -> Self {
        Self::new(name, number, field_type, Label::Required)
    }

    pub fn repeated(name: impl Into<String>, number: u32, field_type: FieldType) -> Self {
        Self::new(name, number, field_type, Label::Repeated)
    }

    pub fn with_message(mut self, message: Arc<MessageDescriptor>) -> Self {
        self.message_type = Some(message);
        self
    }

    pub fn with_enum(mut self, enum_type: Arc<EnumDescriptor>) -> Self {
        self.enum_type = Some(enum_type);
        self
    }

    pub fn with_default(mut self, value: DefaultValue) -> Self {
        self.default_value = Some(value);
        self
    }

    /// Places the slot on a 16-byte boundary, for data handed to SIMD code.
    pub fn aligned(mut self) -> Self {
        self.aligned = true;
        self
    }
}

#[must_use]
pub struct MessageDescriptorBuilder {
    name: String,
    major_version: u16,
    minor_version: u16,
    struct_align: bool,
    fields: Vec<FieldSpec>,
}

fn align_up(value: u32, align: u32) -> u32 {
    value.div_ceil(align) * align
}

impl MessageDescriptorBuilder {
    pub fn version(mut self, major: u16, minor: u16) -> Self {
        self.major_version = major;
        self.minor_version = minor;
        self
    }

    /// Aligns the whole record to 16 bytes and pads its size to match.
    pub fn struct_align(mut self) -> Self {
        self.struct_align = true;
        self
    }

    pub fn field(mut self, field: FieldSpec) -> Self {
        self.fields.push(field);
        self
    }

    fn invalid(&self, reason: String) -> Error {
        Error::InvalidDescriptor {
            message: self.name.clone(),
            reason,
        }
    }

    fn validate(&self) -> Result<()> {
        for (index, field) in self.fields.iter().enumerate() {
            if field.number == 0 || field.number > (u32::MAX >> 3) {
                return Err(self.invalid(format!(
                    "field `{}` has invalid number {}",
                    field.name, field.number
                )));
            }
            if let Some(other) = self.fields[..index]
                .iter()
                .find(|other| other.number == field.number || other.name == field.name)
            {
                return Err(self.invalid(format!(
                    "fields `{}` and `{}` collide",
                    other.name, field.name
                )));
            }
            if (field.field_type == FieldType::Message) != field.message_type.is_some() {
                return Err(self.invalid(format!(
                    "field `{}` needs a message descriptor exactly when it is a message",
                    field.name
                )));
            }
            if field.enum_type.is_some() && field.field_type != FieldType::Enum {
                return Err(self.invalid(format!(
                    "field `{}` has an enum descriptor but is not an enum",
                    field.name
                )));
            }
            if let Some(default) = &field.default_value {
                if field.label == Label::Repeated || !default.matches(field.field_type) {
                    return Err(self.invalid(format!(
                        "field `{}` has an incompatible default value",
                        field.name
                    )));
                }
            }
        }
        Ok(())
    }

    /// Validates the fields and lays out the flat record: has-bit words
    /// first, then one naturally aligned slot per field in declaration order.
    /// The record alignment is the largest of its own, its slots' and that of
    /// any message type it embeds or repeats.
    pub fn build(self) -> Result<Arc<MessageDescriptor>> {
        self.validate()?;
        let MessageDescriptorBuilder {
            name,
            major_version,
            minor_version,
            struct_align,
            fields: specs,
        } = self;

        let has_bit_count = specs
            .iter()
            .filter(|spec| spec.label != Label::Repeated)
            .count() as u32;
        let mut offset = has_bit_count.div_ceil(32) * 4;
        let mut next_has_bit = 0;
        let mut record_align = if struct_align {
            EXTENDED_ALIGN
        } else {
            RECORD_ALIGN
        };
        let mut fields = Vec::with_capacity(specs.len());
        for spec in specs {
            let mut field = FieldDescriptor {
                name: spec.name,
                number: spec.number,
                field_type: spec.field_type,
                label: spec.label,
                offset: 0,
                has_bit: 0,
                aligned: spec.aligned,
                default_value: spec.default_value,
                message_type: spec.message_type,
                enum_type: spec.enum_type,
            };
            if !field.is_repeated() {
                field.has_bit = next_has_bit;
                next_has_bit += 1;
            }
            let align = field.slot_align().max(1);
            record_align = record_align.max(align);
            if let Some(message) = &field.message_type {
                record_align = record_align.max(message.align());
            }
            field.offset = align_up(offset, align);
            offset = field
                .offset
                .checked_add(field.slot_size())
                .ok_or_else(|| Error::InvalidDescriptor {
                    message: name.clone(),
                    reason: "record size overflows".into(),
                })?;
            fields.push(field);
        }

        Ok(Arc::new(MessageDescriptor {
            name,
            major_version,
            minor_version,
            fields,
            size: align_up(offset, record_align),
            align: record_align,
        }))
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EnumValueDescriptor {
    pub name: String,
    pub value: i32,
}

#[derive(Debug)]
pub struct EnumDescriptor {
    name: String,
    major_version: u16,
    minor_version: u16,
    values: Vec<EnumValueDescriptor>,
}

impl EnumDescriptor {
    pub fn new<N: Into<String>>(
        name: impl Into<String>,
        values: impl IntoIterator<Item = (N, i32)>,
    ) -> Arc<Self> {
        Arc::new(EnumDescriptor {
            name: name.into(),
            major_version: DDF_MAJOR_VERSION,
            minor_version: DDF_MINOR_VERSION,
            values: values
                .into_iter()
                .map(|(name, value)| EnumValueDescriptor {
                    name: name.into(),
                    value,
                })
                .collect(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn major_version(&self) -> u16 {
        self.major_version
    }

    pub fn minor_version(&self) -> u16 {
        self.minor_version
    }

    pub fn values(&self) -> &[EnumValueDescriptor] {
        &self.values
    }

    pub fn name_of(&self, value: i32) -> Option<&str> {
        self.values
            .iter()
            .find(|v| v.value == value)
            .map(|v| v.name.as_str())
    }

    pub fn value_of(&self, name: &str) -> Option<i32> {
        self.values.iter().find(|v| v.name == name).map(|v| v.value)
    }
}
