use core::fmt;

/// Result type for every codec operation.
pub type Result<T> = core::result::Result<T, Error>;

/// Errors returned by decode, encode and the file wrappers.
///
/// Failures are always returned; the codec never aborts the process and never
/// hands out a partially filled record.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The input is not valid wire format.
    #[error("wire format error at offset {offset}: {kind}")]
    WireFormat { offset: usize, kind: WireErrorKind },

    /// A descriptor was built for a different major version of the format.
    #[error("descriptor `{message}` has major version {found}, expected {expected}")]
    VersionMismatch {
        message: String,
        expected: u16,
        found: u16,
    },

    /// A required field was never observed while filling a message.
    #[error("message `{message}` is missing required field `{field}`")]
    MissingRequiredField { message: String, field: String },

    /// Messages are nested deeper than the decode options allow.
    #[error("message nesting exceeds the maximum depth of {max_depth}")]
    DepthExceeded { max_depth: usize },

    /// The single backing allocation for a decoded tree could not be made.
    #[error("failed to allocate {size} bytes for a decoded message")]
    Allocation { size: usize },

    /// A record access fell outside the memory the record owns.
    #[error("record access of {len} bytes at offset {offset} is out of bounds")]
    OutOfBounds { offset: usize, len: usize },

    /// A descriptor was rejected while it was being built or registered.
    #[error("invalid descriptor `{message}`: {reason}")]
    InvalidDescriptor { message: String, reason: String },

    /// The encode sink refused the bytes handed to it.
    #[error("sink rejected a write of {len} bytes")]
    Sink { len: usize },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// What exactly was wrong with the wire bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireErrorKind {
    /// A read needed more bytes than remain in the buffer.
    Truncated,
    /// A varint ran longer than ten bytes.
    MalformedVarint,
    /// A length prefix points past the end of the enclosing buffer.
    LengthOverrun { len: u64, remaining: usize },
    /// Group wire types (3 and 4) and the reserved values 6 and 7.
    UnsupportedWireType(u8),
    /// Tags must carry a field number of at least 1.
    InvalidFieldNumber,
    /// A string field holds bytes that are not UTF-8.
    InvalidUtf8 { field: String },
}

impl fmt::Display for WireErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WireErrorKind::Truncated => write!(f, "unexpected end of buffer"),
            WireErrorKind::MalformedVarint => write!(f, "malformed varint"),
            WireErrorKind::LengthOverrun { len, remaining } => write!(
                f,
                "length {len} overruns the {remaining} remaining bytes"
            ),
            WireErrorKind::UnsupportedWireType(wire_type) => {
                write!(f, "unsupported wire type {wire_type}")
            }
            WireErrorKind::InvalidFieldNumber => write!(f, "invalid field number 0"),
            WireErrorKind::InvalidUtf8 { field } => {
                write!(f, "string field `{field}` is not valid UTF-8")
            }
        }
    }
}

impl Error {
    pub(crate) fn wire(offset: usize, kind: WireErrorKind) -> Self {
        Error::WireFormat { offset, kind }
    }

    /// Returns the wire error kind when this is a wire format error.
    pub fn wire_kind(&self) -> Option<&WireErrorKind> {
        match self {
            Error::WireFormat { kind, .. } => Some(kind),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_names_offset_and_kind() {
        let err = Error::wire(7, WireErrorKind::LengthOverrun { len: 10, remaining: 3 });
        assert_eq!(
            err.to_string(),
            "wire format error at offset 7: length 10 overruns the 3 remaining bytes"
        );
        assert_eq!(
            err.wire_kind(),
            Some(&WireErrorKind::LengthOverrun { len: 10, remaining: 3 })
        );
    }

    #[test]
    fn missing_required_names_message_and_field() {
        let err = Error::MissingRequiredField {
            message: "simple".into(),
            field: "a".into(),
        };
        assert_eq!(err.to_string(), "message `simple` is missing required field `a`");
        assert!(err.wire_kind().is_none());
    }
}
