use serde::ser::{SerializeMap, SerializeSeq};

use crate::descriptor::FieldDescriptor;
use crate::reflection::{MessageView, RepeatedView, Value};

/// A value together with the field it belongs to, so enum numbers can be
/// written by name.
struct FieldValue<'v> {
    field: &'v FieldDescriptor,
    value: &'v Value<'v>,
}

impl serde::Serialize for FieldValue<'_> {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        match *self.value {
            Value::Enum(v) => match self.field.enum_type().and_then(|e| e.name_of(v)) {
                Some(name) => serializer.serialize_str(name),
                None => serializer.serialize_i32(v),
            },
            ref value => value.serialize(serializer),
        }
    }
}

/// Present fields only, keyed by field name.
impl serde::Serialize for MessageView<'_> {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        let descriptor = self.descriptor();
        let mut map_serializer = serializer.serialize_map(None)?;
        for field in descriptor.fields() {
            let Some(value) = self.get(field) else {
                continue;
            };
            map_serializer.serialize_entry(
                field.name(),
                &FieldValue {
                    field,
                    value: &value,
                },
            )?;
        }
        map_serializer.end()
    }
}

impl serde::Serialize for RepeatedView<'_> {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        let mut seq_serializer = serializer.serialize_seq(Some(self.len()))?;
        for element in self {
            seq_serializer.serialize_element(&FieldValue {
                field: self.field(),
                value: &element,
            })?;
        }
        seq_serializer.end()
    }
}

impl serde::Serialize for Value<'_> {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        match self {
            Value::Bool(v) => serializer.serialize_bool(*v),
            Value::Int32(v) | Value::Enum(v) => serializer.serialize_i32(*v),
            Value::Int64(v) => serializer.serialize_i64(*v),
            Value::UInt32(v) => serializer.serialize_u32(*v),
            Value::UInt64(v) => serializer.serialize_u64(*v),
            Value::Float(v) => serializer.serialize_f32(*v),
            Value::Double(v) => serializer.serialize_f64(*v),
            Value::String(v) => serializer.serialize_str(v),
            Value::Bytes(v) => serializer.serialize_bytes(v),
            Value::Message(msg) => msg.serialize(serializer),
            Value::Repeated(list) => list.serialize(serializer),
        }
    }
}

impl serde::Serialize for crate::decoding::OwnedRecord {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        self.view().serialize(serializer)
    }
}
