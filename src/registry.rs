use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::Arc;

use crate::descriptor::{EnumDescriptor, MessageDescriptor};
use crate::error::{Error, Result};

/// Name-keyed lookup of message and enum descriptors.
///
/// Registering a message also registers every message and enum reachable from
/// its fields. Registering the same `Arc` twice is a no-op; a different
/// descriptor under a taken name is rejected.
#[derive(Debug, Default)]
pub struct DescriptorRegistry {
    messages: HashMap<String, Arc<MessageDescriptor>>,
    enums: HashMap<String, Arc<EnumDescriptor>>,
}

fn insert<T>(map: &mut HashMap<String, Arc<T>>, name: &str, value: Arc<T>) -> Result<()> {
    match map.entry(name.to_owned()) {
        Entry::Vacant(entry) => {
            entry.insert(value);
            Ok(())
        }
        Entry::Occupied(entry) if Arc::ptr_eq(entry.get(), &value) => Ok(()),
        Entry::Occupied(_) => Err(Error::InvalidDescriptor {
            message: name.to_owned(),
            reason: "another descriptor is already registered under this name".into(),
        }),
    }
}

impl DescriptorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_message(&mut self, descriptor: Arc<MessageDescriptor>) -> Result<()> {
        for field in descriptor.fields() {
            if let Some(message) = field.message_type() {
                self.register_message(Arc::clone(message))?;
            }
            if let Some(enum_type) = field.enum_type() {
                self.register_enum(Arc::clone(enum_type))?;
            }
        }
        let name = descriptor.name().to_owned();
        insert(&mut self.messages, &name, descriptor)
    }

    pub fn register_enum(&mut self, descriptor: Arc<EnumDescriptor>) -> Result<()> {
        let name = descriptor.name().to_owned();
        insert(&mut self.enums, &name, descriptor)
    }

    pub fn message(&self, name: &str) -> Option<&Arc<MessageDescriptor>> {
        self.messages.get(name)
    }

    pub fn enum_type(&self, name: &str) -> Option<&Arc<EnumDescriptor>> {
        self.enums.get(name)
    }

    pub fn messages(&self) -> impl Iterator<Item = &Arc<MessageDescriptor>> {
        self.messages.values()
    }

    pub fn enums(&self) -> impl Iterator<Item = &Arc<EnumDescriptor>> {
        self.enums.values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::{FieldSpec, FieldType};

    #[test]
    fn nested_descriptors_are_registered() {
        let color = EnumDescriptor::new("color", [("RED", 0), ("GREEN", 1)]);
        let point = MessageDescriptor::builder("point")
            .field(FieldSpec::optional("x", 1, FieldType::Sint32))
            .field(FieldSpec::optional("color", 2, FieldType::Enum).with_enum(color.clone()))
            .build()
            .unwrap();
        let path = MessageDescriptor::builder("path")
            .field(FieldSpec::repeated("points", 1, FieldType::Message).with_message(point.clone()))
            .build()
            .unwrap();

        let mut registry = DescriptorRegistry::new();
        registry.register_message(path.clone()).unwrap();
        assert!(Arc::ptr_eq(registry.message("path").unwrap(), &path));
        assert!(Arc::ptr_eq(registry.message("point").unwrap(), &point));
        assert_eq!(registry.enum_type("color").unwrap().value_of("GREEN"), Some(1));
        assert!(registry.message("color").is_none());
        assert_eq!(registry.messages().count(), 2);
        assert_eq!(registry.enums().count(), 1);

        // same descriptor again is fine
        registry.register_message(point).unwrap();
    }

    #[test]
    fn conflicting_names_are_rejected() {
        let a = MessageDescriptor::builder("thing").build().unwrap();
        let b = MessageDescriptor::builder("thing")
            .field(FieldSpec::optional("v", 1, FieldType::Bool))
            .build()
            .unwrap();
        let mut registry = DescriptorRegistry::new();
        registry.register_message(a).unwrap();
        let err = registry.register_message(b).unwrap_err();
        assert!(matches!(err, Error::InvalidDescriptor { ref message, .. } if message == "thing"));
    }
}
