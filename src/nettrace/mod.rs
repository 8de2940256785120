//! Wire-level types of the NetTrace/FastSerialization envelope.
//!
//! Reference: https://github.com/microsoft/perfview/blob/main/src/TraceEvent/EventPipe/EventPipeFormat.md

use binrw::BinRead;
use num_derive::FromPrimitive;

pub mod helpers;
pub mod parser;

pub use parser::TraceDecoder;

/// Highest `min_reader_version` this decoder accepts without skipping.
pub const READER_VERSION: i32 = 4;

pub(crate) const SERIALIZER_SIGNATURE: &[u8] = b"!FastSerialization.1";

/// Length-prefixed byte string used by the envelope (UTF-8 for type names,
/// ASCII for the serializer signature).
#[derive(BinRead)]
#[br(little)]
pub struct NettraceString {
    pub length: u32,

    #[br(count = length)]
    pub bytes: Vec<u8>,
}

impl NettraceString {
    pub fn to_string_lossy(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.bytes)
    }
}

impl std::fmt::Debug for NettraceString {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "\"{}\"", self.to_string_lossy())
    }
}

/// The 8-byte file magic followed by the serializer signature.
#[derive(BinRead, Debug)]
#[br(little, magic = b"Nettrace")]
pub struct NettraceHeader {
    pub ident: NettraceString,
}

#[derive(BinRead, Debug, Eq, PartialEq, Clone, Copy, FromPrimitive)]
#[br(repr(u8))]
pub enum NettraceTag {
    Invalid = 0,
    NullReference = 1,
    BeginPrivateObject = 5,
    EndObject = 6,
}

/// The nested type record opening every object. Type records have a
/// `NullReference` as their own type, so the leading `BeginPrivateObject` +
/// `NullReference` pair reads as a magic.
#[derive(BinRead, Debug)]
#[br(little, magic = b"\x05\x01")]
pub struct NettraceTypeObject {
    pub version: i32,
    pub minimum_reader_version: i32,
    pub type_name: NettraceString,
    pub end_object: NettraceTag,
}

/// Header shared by `MetadataBlock` and `EventBlock`. `size` bytes past the
/// block start are header; bit 0 of `flags` selects the compressed blob
/// coding.
#[derive(BinRead, Debug)]
#[br(little)]
pub struct NettraceEventBlockHeader {
    pub size: u16,
    pub flags: u16,
    pub min_timestamp: i64,
    pub max_timestamp: i64,
}

impl NettraceEventBlockHeader {
    pub fn is_compressed(&self) -> bool {
        self.flags & 1 != 0
    }
}

bitflags::bitflags! {
    /// Flag byte opening each compressed event blob. A clear bit means
    /// "reuse the previous blob's value".
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct BlobFlags: u8 {
        const METADATA_ID         = 1 << 0;
        const SEQ_THREAD_PROC     = 1 << 1;
        const THREAD_ID           = 1 << 2;
        const STACK_ID            = 1 << 3;
        const ACTIVITY_ID         = 1 << 4;
        const RELATED_ACTIVITY_ID = 1 << 5;
        const IS_SORTED           = 1 << 6;
        const PAYLOAD_SIZE        = 1 << 7;
    }
}

/// Event blob header. The uncompressed layout parses directly; the
/// compressed coding is flag-driven and decoded by hand in the parser, with
/// this struct doubling as the per-block delta state.
#[derive(BinRead, Debug, Default, Clone, PartialEq)]
#[br(little)]
pub struct EventBlobHeader {
    pub size: u32,
    pub raw_metadata_id: u32, // high bit is the IsSorted flag
    pub sequence_number: u32,
    pub thread_id: u64,
    pub capture_thread_id: u64,
    pub processor_number: u32,
    pub stack_id: u32,
    pub timestamp: i64,
    pub activity_id: [u8; 16],
    pub related_activity_id: [u8; 16],
    pub payload_size: u32,

    #[br(calc = raw_metadata_id & 0x7fff_ffff)]
    pub metadata_id: u32,
    #[br(calc = raw_metadata_id & 0x8000_0000 != 0)]
    pub is_sorted: bool,
}

#[derive(BinRead, Debug)]
#[br(little)]
pub struct ThreadSequencePoint {
    pub thread_id: u64,
    pub sequence_number: u32,
}

/// Body of an `SPBlock`: a timestamped snapshot of per-thread sequence
/// numbers. Consumed for format correctness only.
#[derive(BinRead, Debug)]
#[br(little)]
pub struct SequencePointBlockBody {
    pub timestamp: i64,
    pub thread_count: u32,

    #[br(count = thread_count)]
    pub threads: Vec<ThreadSequencePoint>,
}

/// Tags of the optional extensions trailing a metadata payload.
pub mod metadata_tag {
    pub const OPCODE: u8 = 1;
    pub const PARAMETER_PAYLOAD: u8 = 2;
}
