//! DDF: a descriptor-driven codec for protobuf-compatible wire bytes.
//!
//! Message types are described at runtime by [`MessageDescriptor`]s. Decoding
//! produces an [`OwnedRecord`]: the whole record tree laid out in a single
//! relocatable buffer, read back through [`MessageView`]. Encoding streams a
//! view into any [`Sink`].

use std::io::{Read, Write};
use std::path::Path;
use std::sync::Arc;

pub mod arena;
pub mod base;
pub mod wire;

pub mod descriptor;
pub mod error;
pub mod registry;

pub mod decoding;
pub mod encoding;
pub mod reflection;

#[cfg(feature = "serde_support")]
pub mod serde;


pub use decoding::{DecodeOptions, OwnedRecord};
pub use descriptor::{
    DDF_MAJOR_VERSION, DDF_MINOR_VERSION, DefaultValue, EnumDescriptor, FieldDescriptor,
    FieldSpec, FieldType, Label, MessageDescriptor,
};
pub use encoding::{ByteCounter, FnSink, IoSink, Sink};
pub use error::{Error, Result, WireErrorKind};
pub use reflection::{MessageView, RepeatedView, Value};
pub use registry::DescriptorRegistry;

pub fn decode(bytes: &[u8], descriptor: &Arc<MessageDescriptor>) -> Result<OwnedRecord> {
    decode_with_options(bytes, descriptor, DecodeOptions::default())
}

pub fn decode_with_options(
    bytes: &[u8],
    descriptor: &Arc<MessageDescriptor>,
    options: DecodeOptions,
) -> Result<OwnedRecord> {
    decoding::Decoder::new(bytes, descriptor, options).run()
}

pub fn encode<S: Sink + ?Sized>(view: &MessageView<'_>, sink: &mut S) -> Result<()> {
    encoding::encode(view, sink)
}

pub fn encode_to_vec(view: &MessageView<'_>) -> Result<Vec<u8>> {
    encoding::encode_to_vec(view)
}

pub fn decode_from_file(
    path: impl AsRef<Path>,
    descriptor: &Arc<MessageDescriptor>,
) -> Result<OwnedRecord> {
    let bytes = std::fs::read(path)?;
    decode(&bytes, descriptor)
}

pub fn encode_to_file(view: &MessageView<'_>, path: impl AsRef<Path>) -> Result<()> {
    let file = std::fs::File::create(path)?;
    let mut sink = IoSink(std::io::BufWriter::new(file));
    encode(view, &mut sink)?;
    sink.0.flush()?;
    Ok(())
}

/// Reads `reader` to its end, then decodes. The two-pass decode needs the
/// whole input up front.
pub fn decode_from_read(
    reader: &mut impl Read,
    descriptor: &Arc<MessageDescriptor>,
) -> Result<OwnedRecord> {
    let mut bytes = Vec::new();
    reader.read_to_end(&mut bytes)?;
    decode(&bytes, descriptor)
}

pub fn decode_from_async_read<'a>(
    reader: &'a mut (impl futures::io::AsyncRead + Unpin),
    descriptor: &'a Arc<MessageDescriptor>,
) -> impl core::future::Future<Output = Result<OwnedRecord>> + 'a {
    use futures::io::AsyncReadExt;

    async move {
        let mut bytes = Vec::new();
        reader.read_to_end(&mut bytes).await?;
        decode(&bytes, descriptor)
    }
}

/// A message type with a statically known descriptor.
pub trait Message {
    fn descriptor() -> &'static Arc<MessageDescriptor>;
}

pub trait MessageExt: Message {
    fn decode(bytes: &[u8]) -> Result<OwnedRecord> {
        crate::decode(bytes, Self::descriptor())
    }

    fn decode_with_options(bytes: &[u8], options: DecodeOptions) -> Result<OwnedRecord> {
        crate::decode_with_options(bytes, Self::descriptor(), options)
    }

    fn decode_from_file(path: impl AsRef<Path>) -> Result<OwnedRecord> {
        crate::decode_from_file(path, Self::descriptor())
    }

    fn decode_from_read(reader: &mut impl Read) -> Result<OwnedRecord> {
        crate::decode_from_read(reader, Self::descriptor())
    }

    fn decode_from_async_read<'a>(
        reader: &'a mut (impl futures::io::AsyncRead + Unpin),
    ) -> impl core::future::Future<Output = Result<OwnedRecord>> + 'a {
        crate::decode_from_async_read(reader, Self::descriptor())
    }
}

impl<T: Message + ?Sized> MessageExt for T {}

pub mod tests {
    use crate::{OwnedRecord, decode, encode_to_vec};

    /// Encodes `record`, decodes the bytes again and checks that both the
    /// record and a second encoding come back unchanged.
    pub fn assert_roundtrip(record: &OwnedRecord) {
        let data = encode_to_vec(&record.view()).expect("record should encode");

        let roundtrip = decode(&data, record.descriptor()).expect("encoded record should decode");

        println!("Roundtrip record: {:#?}", roundtrip);
        assert_eq!(&roundtrip, record);

        let roundtrip_data = encode_to_vec(&roundtrip.view()).expect("record should encode");
        assert_eq!(roundtrip_data, data);
    }
}
