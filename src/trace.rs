use std::sync::Arc;

use binrw::BinRead;
use num_derive::FromPrimitive;
use num_traits::FromPrimitive as _;
use uuid::Uuid;

use crate::payload::EventPayload;
use crate::stacks::StackTrace;

/// Wall-clock instant as stored in the `Trace` header. `day_of_week` is
/// present on the wire but carries no information the date fields don't.
#[derive(BinRead, Debug, Clone, Copy, PartialEq, Eq)]
#[br(little)]
pub struct WallClockTime {
    pub year: u16,
    pub month: u16,
    pub day_of_week: u16,
    pub day: u16,
    pub hour: u16,
    pub minute: u16,
    pub second: u16,
    pub millisecond: u16,
}

/// Session metadata from the `Trace` header object, read once per stream.
#[derive(BinRead, Debug, Clone, Copy, PartialEq, Eq)]
#[br(little)]
pub struct TraceMetadata {
    pub sync_time_utc: WallClockTime,
    pub sync_time_qpc: i64,
    pub qpc_frequency: i64,
    pub pointer_size: u32,
    pub process_id: u32,
    pub number_of_processors: u32,
    pub cpu_sampling_rate: u32,
}

/// The .NET `TypeCode` numbering used by metadata field definitions, plus
/// the EventPipe extension value `Guid` in the hole at 17.
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive)]
pub enum FieldTypeCode {
    Empty = 0,
    Object = 1,
    DBNull = 2,
    Boolean = 3,
    Char = 4,
    SByte = 5,
    Byte = 6,
    Int16 = 7,
    UInt16 = 8,
    Int32 = 9,
    UInt32 = 10,
    Int64 = 11,
    UInt64 = 12,
    Single = 13,
    Double = 14,
    Decimal = 15,
    DateTime = 16,
    Guid = 17,
    String = 18,
    Array = 19,
}

/// ETW-style event opcodes carried by the metadata `OpCode` extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive)]
pub enum EventOpcode {
    Info = 0,
    Start = 1,
    Stop = 2,
    DataCollectionStart = 3,
    DataCollectionStop = 4,
    Extension = 5,
    Reply = 6,
    Resume = 7,
    Suspend = 8,
    Send = 9,
    Receive = 240,
}

/// One field of an event schema.
#[derive(Debug, Clone, PartialEq)]
pub struct EventFieldDefinition {
    pub name: Arc<str>,
    pub type_code: FieldTypeCode,
    /// Element type, only for `type_code == Array` (V2 layouts).
    pub array_element_type: Option<FieldTypeCode>,
    /// Sub-fields, only for `type_code == Object`.
    pub sub_fields: Vec<EventFieldDefinition>,
}

/// A registered event schema, keyed by its in-trace metadata id.
#[derive(Debug, Clone, PartialEq)]
pub struct EventMetadata {
    pub metadata_id: u32,
    pub provider_name: Arc<str>,
    pub event_id: u32,
    pub event_name: Arc<str>,
    pub keywords: u64,
    pub version: u32,
    pub level: u32,
    pub opcode: Option<u8>,
    pub fields: Vec<EventFieldDefinition>,
}

impl EventMetadata {
    /// The opcode as a typed value, when it is one of the known opcodes.
    pub fn known_opcode(&self) -> Option<EventOpcode> {
        self.opcode.and_then(|op| EventOpcode::from_u8(op))
    }
}

/// A decoded event with its typed payload and resolved stack trace.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    /// Position in the final, timestamp-sorted event list.
    pub index: usize,
    pub sequence_number: u32,
    pub capture_thread_id: u64,
    pub thread_id: u64,
    pub processor_number: Option<u32>,
    /// The in-trace stack id; `stack` holds the resolved frames.
    pub stack_index: u32,
    /// QPC ticks relative to the session sync time.
    pub timestamp: i64,
    pub activity_id: Uuid,
    pub related_activity_id: Uuid,
    pub is_sorted: bool,
    pub metadata: Arc<EventMetadata>,
    pub payload: EventPayload,
    pub stack: Arc<StackTrace>,
}

/// The decoded trace: session metadata, registered schemas, events in
/// timestamp order, and the deduplicated stack traces. Immutable once built.
#[derive(Debug)]
pub struct Trace {
    pub metadata: TraceMetadata,
    /// All registered event schemas, in registration order.
    pub event_metadata: Vec<Arc<EventMetadata>>,
    /// Events sorted by non-decreasing timestamp, stable on read order.
    pub events: Vec<Event>,
    /// One stack trace per distinct address vector, ordered by stack index.
    pub stacks: Vec<Arc<StackTrace>>,
}

#[cfg(test)]
mod tests {
    use num_traits::FromPrimitive as _;

    use super::*;

    #[test]
    fn opcode_mapping() {
        assert_eq!(EventOpcode::from_u8(9), Some(EventOpcode::Send));
        assert_eq!(EventOpcode::from_u8(240), Some(EventOpcode::Receive));
        assert_eq!(EventOpcode::from_u8(200), None);
    }

    #[test]
    fn type_code_mapping() {
        assert_eq!(FieldTypeCode::from_i32(9), Some(FieldTypeCode::Int32));
        assert_eq!(FieldTypeCode::from_i32(17), Some(FieldTypeCode::Guid));
        assert_eq!(FieldTypeCode::from_i32(20), None);
    }
}
