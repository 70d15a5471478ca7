#![no_main]

use std::sync::{Arc, LazyLock};

use ddf::{FieldSpec, FieldType, MessageDescriptor};
use libfuzzer_sys::fuzz_target;

static DESCRIPTOR: LazyLock<Arc<MessageDescriptor>> = LazyLock::new(|| {
    let leaf = MessageDescriptor::builder("Leaf")
        .field(FieldSpec::optional("s", 1, FieldType::String))
        .field(FieldSpec::repeated("v", 2, FieldType::Sint64))
        .field(FieldSpec::optional("f", 3, FieldType::Fixed32))
        .build()
        .expect("valid descriptor");
    let inner = MessageDescriptor::builder("Inner")
        .field(FieldSpec::repeated("leaves", 1, FieldType::Message).with_message(leaf.clone()))
        .field(FieldSpec::optional("leaf", 2, FieldType::Message).with_message(leaf))
        .field(FieldSpec::repeated("b", 3, FieldType::Bytes))
        .build()
        .expect("valid descriptor");
    MessageDescriptor::builder("Root")
        .field(FieldSpec::optional("x", 1, FieldType::Int32))
        .field(FieldSpec::repeated("inner", 2, FieldType::Message).with_message(inner))
        .field(FieldSpec::repeated("tags", 3, FieldType::String))
        .field(FieldSpec::optional("d", 4, FieldType::Double))
        .build()
        .expect("valid descriptor")
});

fuzz_target!(|data: &[u8]| {
    // Malformed input must come back as an error, never a crash. Whatever
    // decodes must survive an encode/decode round trip unchanged.
    let Ok(record) = ddf::decode(data, &DESCRIPTOR) else {
        return;
    };
    let encoded = ddf::encode_to_vec(&record.view()).expect("decoded record should encode");
    let again = ddf::decode(&encoded, &DESCRIPTOR).expect("encoded record should decode");
    assert_eq!(ddf::encode_to_vec(&again.view()).ok(), Some(encoded));
});
