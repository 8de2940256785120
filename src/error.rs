use thiserror::Error;

/// Errors surfaced by the top-level decode entry points.
#[derive(Debug, Error)]
pub enum NettraceError {
    /// The stream is not a NetTrace stream, or requires a newer reader than
    /// this one and cannot be skipped.
    #[error("unexpected format: {0}")]
    UnexpectedFormat(String),

    /// A structural invariant failed mid-stream. `position` is the absolute
    /// byte offset within the stream.
    #[error("corrupted trace at byte {position}: {message}")]
    CorruptedTrace { position: u64, message: String },

    /// A field definition names a type code the payload interpreter cannot
    /// decode for this field.
    #[error("unsupported type code {type_code} for field `{field}`")]
    UnsupportedField { field: String, type_code: i32 },

    /// The byte source failed; propagated as-is.
    #[error("upstream i/o error: {0}")]
    UpstreamIo(#[from] std::io::Error),
}

/// Internal result of a parse attempt. `Incomplete` is not a failure: the
/// decoder rolls back to the last object boundary and waits for more bytes.
#[derive(Debug)]
pub(crate) enum ParseError {
    Incomplete,
    /// Offset is relative to the buffer handed to `handle_buffer`; the
    /// decoder rebases it onto the absolute stream position.
    Corrupt { offset: u64, message: String },
    Fatal(NettraceError),
}

impl ParseError {
    pub(crate) fn corrupt(offset: u64, message: impl Into<String>) -> Self {
        ParseError::Corrupt {
            offset,
            message: message.into(),
        }
    }
}

impl From<binrw::Error> for ParseError {
    fn from(err: binrw::Error) -> Self {
        match err {
            binrw::Error::Io(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                ParseError::Incomplete
            }
            binrw::Error::Io(e) => ParseError::Fatal(NettraceError::UpstreamIo(e)),
            binrw::Error::BadMagic { .. } => ParseError::Fatal(NettraceError::UnexpectedFormat(
                "serialization tag mismatch".into(),
            )),
            binrw::Error::AssertFail { pos, message } => ParseError::Corrupt {
                offset: pos,
                message,
            },
            binrw::Error::NoVariantMatch { pos } => ParseError::Fatal(
                NettraceError::UnexpectedFormat(format!("unknown tag at offset {pos}")),
            ),
            other => ParseError::Corrupt {
                offset: 0,
                message: other.to_string(),
            },
        }
    }
}
