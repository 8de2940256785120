//! A streaming decoder for the NetTrace/EventPipe binary trace format.
//!
//! From a byte stream this crate produces a [`Trace`]: events ordered by
//! timestamp with typed payloads, per-event stack traces resolved to method
//! symbols from the rundown records, and the session metadata. How the
//! bytes arrive is not its concern; [`read_trace`] drives any
//! [`std::io::Read`], and [`TraceDecoder`] exposes the underlying
//! push-style interface for callers with their own I/O loop.
//!
//! Format reference:
//! https://github.com/microsoft/perfview/blob/main/src/TraceEvent/EventPipe/EventPipeFormat.md

mod error;
mod known_events;
mod payload;
mod stacks;
mod symbols;
mod trace;

// The nettrace module handles the wire format and the streaming parser.
pub mod nettrace;

use std::io::Read;

pub use error::NettraceError;
pub use nettrace::parser::TraceDecoder;
pub use payload::{EventPayload, PayloadValue};
pub use stacks::{MethodDescription, StackTrace};
pub use symbols::{clean_method_symbol, clean_type_name};
pub use trace::{
    Event, EventFieldDefinition, EventMetadata, EventOpcode, FieldTypeCode, Trace, TraceMetadata,
    WallClockTime,
};

/// Decodes a whole NetTrace stream. On failure no partial trace is
/// returned; a progress sink registered through [`TraceDecoder`] may have
/// reported up to the last fully consumed block.
pub fn read_trace<R: Read>(reader: R) -> Result<Trace, NettraceError> {
    TraceDecoder::new().read_stream(reader)
}
