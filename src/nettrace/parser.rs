use std::collections::HashMap;
use std::io::{Cursor, Read};
use std::sync::Arc;

use binrw::{BinRead, BinReaderExt};
use num_traits::FromPrimitive as _;
use uuid::Uuid;

use super::helpers::{
    read_utf16_null, read_varint_i32, read_varint_i64, read_varint_u32, read_varint_u64,
};
use super::{
    metadata_tag, BlobFlags, EventBlobHeader, NettraceEventBlockHeader, NettraceHeader,
    NettraceTag, NettraceTypeObject, SequencePointBlockBody, READER_VERSION,
    SERIALIZER_SIGNATURE,
};
use crate::error::{NettraceError, ParseError};
use crate::known_events;
use crate::payload::{self, EventPayload, Interner, PayloadError, PayloadValue};
use crate::stacks::{MethodDescription, StackResolver, StackTrace};
use crate::trace::{Event, EventFieldDefinition, EventMetadata, FieldTypeCode, Trace, TraceMetadata};

/// Minimum read granularity of the outer I/O loop.
const READ_GRANULARITY: usize = 128 * 1024;

enum Phase {
    FileHeader,
    Objects,
    Finished,
}

enum ObjectOutcome {
    Consumed,
    Terminator,
}

#[derive(Clone, Copy)]
enum FieldLayout {
    V1,
    V2,
}

/// Streaming NetTrace decoder.
///
/// Bytes go in through [`handle_buffer`](Self::handle_buffer), which never
/// blocks on partial input: it consumes whole top-level objects and reports
/// how far it got, so the caller re-presents the unconsumed tail once more
/// bytes are available. After the top-level `NullReference` terminator,
/// [`finish`](Self::finish) resolves stacks, orders events and returns the
/// [`Trace`].
pub struct TraceDecoder {
    phase: Phase,
    /// Absolute stream offset of the next byte `handle_buffer` expects.
    position: u64,
    trace_metadata: Option<TraceMetadata>,
    registry: HashMap<u32, Arc<EventMetadata>>,
    metadata_order: Vec<Arc<EventMetadata>>,
    events: Vec<Event>,
    resolver: StackResolver,
    interner: Interner,
    /// Placeholder until assembly swaps in the resolved stacks.
    pending_stack: Arc<StackTrace>,
    progress_sink: Option<Box<dyn FnMut(u64, u64)>>,
}

impl Default for TraceDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl TraceDecoder {
    pub fn new() -> Self {
        TraceDecoder {
            phase: Phase::FileHeader,
            position: 0,
            trace_metadata: None,
            registry: HashMap::new(),
            metadata_order: Vec::new(),
            events: Vec::new(),
            resolver: StackResolver::default(),
            interner: Interner::default(),
            pending_stack: Arc::new(StackTrace {
                stack_index: 0,
                frames: Vec::new(),
            }),
            progress_sink: None,
        }
    }

    /// Registers a callback receiving `(bytes_read, events_read)` after each
    /// completed top-level object.
    pub fn set_progress_sink(&mut self, sink: impl FnMut(u64, u64) + 'static) {
        self.progress_sink = Some(Box::new(sink));
    }

    /// Absolute stream position of the next expected byte.
    pub fn position(&self) -> u64 {
        self.position
    }

    /// True once the top-level `NullReference` terminator was consumed.
    pub fn is_finished(&self) -> bool {
        matches!(self.phase, Phase::Finished)
    }

    /// Feeds the unread tail of the stream. Returns how many bytes were
    /// consumed; the caller must present the rest again, with more data
    /// appended, on the next call.
    pub fn handle_buffer(&mut self, data: &[u8]) -> Result<usize, NettraceError> {
        let mut cursor = Cursor::new(data);
        match self.run(&mut cursor) {
            Ok(()) => {
                let consumed = cursor.position() as usize;
                self.position += consumed as u64;
                Ok(consumed)
            }
            Err(ParseError::Corrupt { offset, message }) => Err(NettraceError::CorruptedTrace {
                position: self.position + offset,
                message,
            }),
            Err(ParseError::Fatal(err)) => Err(err),
            Err(ParseError::Incomplete) => Err(NettraceError::CorruptedTrace {
                position: self.position,
                message: "decoder suspended outside an object boundary".into(),
            }),
        }
    }

    /// Drives `handle_buffer` from a byte source to completion.
    pub fn read_stream<R: Read>(mut self, mut reader: R) -> Result<Trace, NettraceError> {
        let mut buffer: Vec<u8> = Vec::with_capacity(2 * READ_GRANULARITY);
        let mut chunk = vec![0u8; READ_GRANULARITY];
        loop {
            let read = match reader.read(&mut chunk) {
                Ok(n) => n,
                Err(err) if err.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(err) => return Err(NettraceError::UpstreamIo(err)),
            };
            if read == 0 {
                if self.is_finished() {
                    break;
                }
                return Err(NettraceError::CorruptedTrace {
                    position: self.position + buffer.len() as u64,
                    message: "stream ended mid-object".into(),
                });
            }
            buffer.extend_from_slice(&chunk[..read]);
            let consumed = self.handle_buffer(&buffer)?;
            buffer.drain(..consumed);
            if self.is_finished() {
                break;
            }
        }
        self.finish()
    }

    /// Resolves stacks, orders events by timestamp and assembles the trace.
    pub fn finish(self) -> Result<Trace, NettraceError> {
        if !self.is_finished() {
            return Err(NettraceError::CorruptedTrace {
                position: self.position,
                message: "stream ended before the top-level NullReference terminator".into(),
            });
        }
        let metadata = self.trace_metadata.ok_or_else(|| {
            NettraceError::UnexpectedFormat("stream carries no Trace header object".into())
        })?;

        let resolved = self.resolver.resolve();
        let mut events = self.events;
        for event in &mut events {
            event.timestamp = event.timestamp.wrapping_sub(metadata.sync_time_qpc);
            event.stack = resolved.get(event.stack_index);
        }
        // Stable, so ties keep their original read order.
        events.sort_by_key(|event| event.timestamp);
        for (index, event) in events.iter_mut().enumerate() {
            event.index = index;
        }

        Ok(Trace {
            metadata,
            event_metadata: self.metadata_order,
            events,
            stacks: resolved.all,
        })
    }

    fn run(&mut self, cursor: &mut Cursor<&[u8]>) -> Result<(), ParseError> {
        if matches!(self.phase, Phase::FileHeader) {
            let checkpoint = cursor.position();
            match self.read_file_header(cursor) {
                Ok(()) => self.phase = Phase::Objects,
                Err(ParseError::Incomplete) => {
                    cursor.set_position(checkpoint);
                    return Ok(());
                }
                Err(err) => return Err(err),
            }
        }
        while matches!(self.phase, Phase::Objects) {
            let checkpoint = cursor.position();
            match self.read_object(cursor) {
                Ok(ObjectOutcome::Consumed) => self.report_progress(cursor.position()),
                Ok(ObjectOutcome::Terminator) => self.phase = Phase::Finished,
                Err(ParseError::Incomplete) => {
                    cursor.set_position(checkpoint);
                    break;
                }
                Err(err) => return Err(err),
            }
        }
        Ok(())
    }

    fn report_progress(&mut self, cursor_position: u64) {
        if let Some(sink) = self.progress_sink.as_mut() {
            sink(self.position + cursor_position, self.events.len() as u64);
        }
    }

    fn read_file_header(&mut self, cursor: &mut Cursor<&[u8]>) -> Result<(), ParseError> {
        let header = NettraceHeader::read(cursor).map_err(|err| match err {
            binrw::Error::BadMagic { .. } => ParseError::Fatal(NettraceError::UnexpectedFormat(
                "missing `Nettrace` file magic".into(),
            )),
            other => ParseError::from(other),
        })?;
        if header.ident.bytes != SERIALIZER_SIGNATURE {
            return Err(ParseError::Fatal(NettraceError::UnexpectedFormat(format!(
                "unknown serializer signature {:?}",
                header.ident.to_string_lossy()
            ))));
        }
        log::trace!("nettrace stream, serializer {:?}", header.ident);
        Ok(())
    }

    fn read_object(&mut self, cursor: &mut Cursor<&[u8]>) -> Result<ObjectOutcome, ParseError> {
        let tag = read_tag(cursor)?;
        if tag == NettraceTag::NullReference {
            log::trace!("stream terminator");
            return Ok(ObjectOutcome::Terminator);
        }
        if tag != NettraceTag::BeginPrivateObject {
            return Err(ParseError::Fatal(NettraceError::UnexpectedFormat(format!(
                "expected BeginPrivateObject, found {tag:?}"
            ))));
        }

        let type_object = NettraceTypeObject::read(cursor)?;
        if type_object.end_object != NettraceTag::EndObject {
            return Err(ParseError::Fatal(NettraceError::UnexpectedFormat(
                "type record does not end with EndObject".into(),
            )));
        }
        let type_name = type_object.type_name.to_string_lossy().into_owned();
        log::trace!(
            "object {type_name:?} v{} (min reader v{})",
            type_object.version,
            type_object.minimum_reader_version
        );

        if type_name == "Trace" {
            // The trace header has no block size, so a newer version cannot
            // be skipped over.
            if type_object.minimum_reader_version > READER_VERSION {
                return Err(ParseError::Fatal(NettraceError::UnexpectedFormat(format!(
                    "Trace object requires reader version {}",
                    type_object.minimum_reader_version
                ))));
            }
            let metadata = TraceMetadata::read(cursor)?;
            self.read_end_object(cursor)?;
            if metadata.pointer_size != 4 && metadata.pointer_size != 8 {
                return Err(ParseError::corrupt(
                    cursor.position(),
                    format!("pointer size {} is not 4 or 8", metadata.pointer_size),
                ));
            }
            self.trace_metadata = Some(metadata);
            return Ok(ObjectOutcome::Consumed);
        }

        let block_size: u32 = cursor.read_le()?;
        let absolute = self.position + cursor.position();
        let padding = (4 - (absolute & 3)) & 3;
        let body_start = cursor.position() + padding;
        let body_end = body_start + u64::from(block_size);
        // The whole body plus the closing tag must be buffered before any
        // side effect happens; rollback granularity is the whole object.
        if body_end + 1 > cursor.get_ref().len() as u64 {
            return Err(ParseError::Incomplete);
        }
        for _ in 0..padding {
            let pad: u8 = cursor.read_le()?;
            if pad != 0 {
                log::warn!("non-zero padding byte 0x{pad:02x} before {type_name} body");
            }
        }

        if type_object.minimum_reader_version > READER_VERSION {
            log::debug!(
                "skipping {type_name:?}: needs reader version {}",
                type_object.minimum_reader_version
            );
            cursor.set_position(body_end);
        } else {
            let whole: &[u8] = *cursor.get_ref();
            let body = &whole[body_start as usize..body_end as usize];
            let mut body_cursor = Cursor::new(body);
            let result = match type_name.as_str() {
                "StackBlock" => self.read_stack_block(&mut body_cursor),
                "MetadataBlock" | "EventBlock" => self.read_event_block(&mut body_cursor),
                "SPBlock" => self.read_sequence_point_block(&mut body_cursor),
                other => {
                    log::debug!("skipping unknown object type {other:?}");
                    body_cursor.set_position(body.len() as u64);
                    Ok(())
                }
            };
            if let Err(err) = result {
                return Err(rebase(
                    err,
                    body_start,
                    body_start + body_cursor.position(),
                    "block body",
                ));
            }
            if body_cursor.position() != body.len() as u64 {
                return Err(ParseError::corrupt(
                    body_start + body_cursor.position(),
                    format!("{type_name} body was not consumed exactly"),
                ));
            }
            cursor.set_position(body_end);
        }

        self.read_end_object(cursor)?;
        Ok(ObjectOutcome::Consumed)
    }

    fn read_end_object(&mut self, cursor: &mut Cursor<&[u8]>) -> Result<(), ParseError> {
        let tag = read_tag(cursor)?;
        if tag != NettraceTag::EndObject {
            return Err(ParseError::Fatal(NettraceError::UnexpectedFormat(format!(
                "expected EndObject, found {tag:?}"
            ))));
        }
        Ok(())
    }

    fn read_stack_block(&mut self, cursor: &mut Cursor<&[u8]>) -> Result<(), ParseError> {
        let pointer_size = self.trace_metadata.as_ref().map_or(8, |m| m.pointer_size);
        let first_id: u32 = cursor.read_le()?;
        let count: u32 = cursor.read_le()?;
        log::trace!(
            "stack block: ids {first_id}..{}",
            u64::from(first_id) + u64::from(count)
        );
        for i in 0..count {
            let byte_len: u32 = cursor.read_le()?;
            if byte_len % pointer_size != 0 {
                return Err(ParseError::corrupt(
                    cursor.position(),
                    "stack byte length is not a multiple of the pointer size",
                ));
            }
            let address_count = byte_len / pointer_size;
            let mut addresses = Vec::with_capacity(usize::min(address_count as usize, 4096));
            for _ in 0..address_count {
                addresses.push(if pointer_size == 4 {
                    u64::from(cursor.read_le::<u32>()?)
                } else {
                    cursor.read_le::<u64>()?
                });
            }
            self.resolver.add_stack(first_id.wrapping_add(i), addresses);
        }
        Ok(())
    }

    fn read_sequence_point_block(&mut self, cursor: &mut Cursor<&[u8]>) -> Result<(), ParseError> {
        let body = SequencePointBlockBody::read(cursor)?;
        log::trace!(
            "sequence point at {} covering {} threads",
            body.timestamp,
            body.threads.len()
        );
        Ok(())
    }

    fn read_event_block(&mut self, cursor: &mut Cursor<&[u8]>) -> Result<(), ParseError> {
        let body_len = cursor.get_ref().len() as u64;
        let header = NettraceEventBlockHeader::read(cursor)?;
        let header_size = u64::from(header.size);
        if header_size < 20 || header_size > body_len {
            return Err(ParseError::corrupt(0, "event block header size out of range"));
        }
        // Anything between the fixed header fields and `size` is reserved.
        cursor.set_position(header_size);

        let compressed = header.is_compressed();
        let mut state = EventBlobHeader::default();
        while cursor.position() < body_len {
            self.read_event_blob(cursor, compressed, &mut state)?;
        }
        Ok(())
    }

    fn read_event_blob(
        &mut self,
        cursor: &mut Cursor<&[u8]>,
        compressed: bool,
        state: &mut EventBlobHeader,
    ) -> Result<(), ParseError> {
        let header = if compressed {
            read_compressed_blob_header(cursor, state)?
        } else {
            let header = EventBlobHeader::read(cursor)?;
            *state = header.clone();
            header
        };

        let body: &[u8] = *cursor.get_ref();
        let payload_start = cursor.position();
        let payload_end = payload_start + u64::from(header.payload_size);
        if payload_end > body.len() as u64 {
            return Err(ParseError::corrupt(
                payload_start,
                "event payload extends past its block",
            ));
        }

        let payload_slice = &body[payload_start as usize..payload_end as usize];
        let mut payload_cursor = Cursor::new(payload_slice);
        let result = if header.metadata_id == 0 {
            self.read_metadata_payload(&mut payload_cursor)
        } else {
            self.decode_event_blob(&mut payload_cursor, &header)
        };
        if let Err(err) = result {
            return Err(rebase(
                err,
                payload_start,
                payload_start + payload_cursor.position(),
                "event payload",
            ));
        }
        // The payload must be consumed exactly; an under-shoot means the
        // schema and the bytes disagree.
        if payload_cursor.position() != payload_slice.len() as u64 {
            return Err(ParseError::corrupt(
                payload_start + payload_cursor.position(),
                "event payload was not fully consumed",
            ));
        }
        cursor.set_position(payload_end);

        if !compressed && header.payload_size % 4 != 0 {
            let skip = u64::from(4 - header.payload_size % 4);
            cursor.set_position(payload_end + skip);
        }
        Ok(())
    }

    fn read_metadata_payload(&mut self, cursor: &mut Cursor<&[u8]>) -> Result<(), ParseError> {
        let payload_len = cursor.get_ref().len() as u64;
        let metadata_id: u32 = cursor.read_le()?;
        let provider_name = self.interner.intern(&read_utf16_null(cursor)?);
        let event_id: u32 = cursor.read_le()?;
        let parsed_event_name = read_utf16_null(cursor)?;
        let keywords: u64 = cursor.read_le()?;
        let version: u32 = cursor.read_le()?;
        let level: u32 = cursor.read_le()?;

        let mut fields = self.read_field_defs(cursor, FieldLayout::V1)?;
        let mut opcode = None;
        while cursor.position() < payload_len {
            let tag_payload_bytes: u32 = cursor.read_le()?;
            let tag: u8 = cursor.read_le()?;
            let tag_end = cursor.position() + u64::from(tag_payload_bytes);
            match tag {
                metadata_tag::OPCODE => opcode = Some(cursor.read_le::<u8>()?),
                metadata_tag::PARAMETER_PAYLOAD => {
                    if !fields.is_empty() {
                        return Err(ParseError::corrupt(
                            cursor.position(),
                            "V2 parameter payload after a non-empty V1 field list",
                        ));
                    }
                    fields = self.read_field_defs(cursor, FieldLayout::V2)?;
                }
                other => {
                    log::debug!("skipping unknown metadata extension tag {other}");
                    if tag_end > payload_len {
                        return Err(ParseError::corrupt(
                            cursor.position(),
                            "metadata extension extends past the payload",
                        ));
                    }
                    cursor.set_position(tag_end);
                }
            }
        }

        let event_name;
        if let Some(layout) = known_events::lookup(&provider_name, event_id, version) {
            // The in-trace schema for this event is known-incomplete.
            event_name = self.interner.intern(layout.event_name);
            fields = layout
                .fields
                .iter()
                .map(|f| EventFieldDefinition {
                    name: self.interner.intern(f.name),
                    type_code: f.type_code,
                    array_element_type: None,
                    sub_fields: Vec::new(),
                })
                .collect();
        } else {
            event_name = self.interner.intern(&parsed_event_name);
        }

        log::trace!(
            "metadata {metadata_id}: {provider_name}/{event_name} id {event_id} v{version}"
        );
        let metadata = Arc::new(EventMetadata {
            metadata_id,
            provider_name,
            event_id,
            event_name,
            keywords,
            version,
            level,
            opcode,
            fields,
        });
        if self.registry.insert(metadata_id, metadata.clone()).is_some() {
            log::debug!("metadata id {metadata_id} redefined");
        }
        self.metadata_order.push(metadata);
        Ok(())
    }

    fn read_field_defs(
        &mut self,
        cursor: &mut Cursor<&[u8]>,
        layout: FieldLayout,
    ) -> Result<Vec<EventFieldDefinition>, ParseError> {
        let count: u32 = cursor.read_le()?;
        let mut fields = Vec::with_capacity(usize::min(count as usize, 512));
        for _ in 0..count {
            fields.push(self.read_field_def(cursor, layout)?);
        }
        Ok(fields)
    }

    fn read_field_def(
        &mut self,
        cursor: &mut Cursor<&[u8]>,
        layout: FieldLayout,
    ) -> Result<EventFieldDefinition, ParseError> {
        let raw: i32 = cursor.read_le()?;
        let type_code = FieldTypeCode::from_i32(raw).ok_or_else(|| {
            ParseError::Fatal(NettraceError::UnsupportedField {
                field: "<unnamed>".into(),
                type_code: raw,
            })
        })?;

        let mut array_element_type = None;
        if type_code == FieldTypeCode::Array {
            if matches!(layout, FieldLayout::V1) {
                // Arrays only exist in the V2 layout.
                return Err(ParseError::Fatal(NettraceError::UnsupportedField {
                    field: "<unnamed>".into(),
                    type_code: raw,
                }));
            }
            let raw_element: i32 = cursor.read_le()?;
            array_element_type = Some(FieldTypeCode::from_i32(raw_element).ok_or_else(|| {
                ParseError::Fatal(NettraceError::UnsupportedField {
                    field: "<unnamed>".into(),
                    type_code: raw_element,
                })
            })?);
        }

        let sub_fields = if type_code == FieldTypeCode::Object {
            self.read_field_defs(cursor, layout)?
        } else {
            Vec::new()
        };
        let name = self.interner.intern(&read_utf16_null(cursor)?);
        Ok(EventFieldDefinition {
            name,
            type_code,
            array_element_type,
            sub_fields,
        })
    }

    fn decode_event_blob(
        &mut self,
        cursor: &mut Cursor<&[u8]>,
        header: &EventBlobHeader,
    ) -> Result<(), ParseError> {
        // Metadata registration strictly precedes any referencing event, so
        // an unknown id cannot be waited out.
        let metadata = self
            .registry
            .get(&header.metadata_id)
            .cloned()
            .ok_or_else(|| {
                ParseError::corrupt(
                    0,
                    format!(
                        "event references unknown metadata id {}",
                        header.metadata_id
                    ),
                )
            })?;

        let payload = match payload::read_event_payload(cursor, &metadata.fields, &mut self.interner)
        {
            Ok(payload) => payload,
            Err(PayloadError::Truncated) => {
                return Err(ParseError::corrupt(
                    cursor.position(),
                    "truncated event payload",
                ))
            }
            Err(PayloadError::Unsupported { field, type_code }) => {
                return Err(ParseError::Fatal(NettraceError::UnsupportedField {
                    field,
                    type_code,
                }))
            }
        };

        if metadata.provider_name.as_ref() == known_events::RUNDOWN_PROVIDER
            && metadata.event_id == known_events::METHOD_VERBOSE_EVENT_ID
        {
            self.register_rundown_method(&payload);
        }

        self.events.push(Event {
            index: self.events.len(),
            sequence_number: header.sequence_number,
            capture_thread_id: header.capture_thread_id,
            thread_id: header.thread_id,
            processor_number: (header.processor_number != u32::MAX)
                .then_some(header.processor_number),
            stack_index: header.stack_id,
            timestamp: header.timestamp,
            activity_id: Uuid::from_bytes_le(header.activity_id),
            related_activity_id: Uuid::from_bytes_le(header.related_activity_id),
            is_sorted: header.is_sorted,
            metadata,
            payload,
            stack: self.pending_stack.clone(),
        });
        Ok(())
    }

    fn register_rundown_method(&mut self, payload: &EventPayload) {
        let start_address = payload
            .get(known_events::FIELD_METHOD_START_ADDRESS)
            .and_then(PayloadValue::as_u64);
        let size = payload
            .get(known_events::FIELD_METHOD_SIZE)
            .and_then(PayloadValue::as_u32);
        let namespace = payload
            .get(known_events::FIELD_METHOD_NAMESPACE)
            .and_then(as_interned_string);
        let name = payload
            .get(known_events::FIELD_METHOD_NAME)
            .and_then(as_interned_string);
        let signature = payload
            .get(known_events::FIELD_METHOD_SIGNATURE)
            .and_then(as_interned_string);
        let module_id = payload
            .get(known_events::FIELD_MODULE_ID)
            .and_then(PayloadValue::as_u64)
            .unwrap_or(0);

        match (start_address, size, namespace, name, signature) {
            (Some(start_address), Some(size), Some(namespace), Some(name), Some(signature)) => {
                log::trace!("method {namespace}.{name} at 0x{start_address:x}+{size}");
                self.resolver.add_method(MethodDescription::new(
                    name,
                    namespace,
                    signature,
                    module_id,
                    start_address,
                    size,
                ));
            }
            _ => log::warn!("rundown method record is missing symbol fields"),
        }
    }
}

fn as_interned_string(value: &PayloadValue) -> Option<Arc<str>> {
    match value {
        PayloadValue::String(s) => Some(s.clone()),
        _ => None,
    }
}

fn read_tag(cursor: &mut Cursor<&[u8]>) -> Result<NettraceTag, ParseError> {
    let byte: u8 = cursor.read_le()?;
    NettraceTag::from_u8(byte)
        .filter(|tag| *tag != NettraceTag::Invalid)
        .ok_or_else(|| {
            ParseError::Fatal(NettraceError::UnexpectedFormat(format!(
                "unknown serialization tag 0x{byte:02x}"
            )))
        })
}

/// Translates an error from a bounded sub-region: running off the region's
/// end is corruption, not missing input, and relative offsets move to the
/// enclosing coordinate space.
fn rebase(err: ParseError, region_base: u64, failure_offset: u64, what: &str) -> ParseError {
    match err {
        ParseError::Incomplete => ParseError::corrupt(failure_offset, format!("truncated {what}")),
        ParseError::Corrupt { offset, message } => ParseError::Corrupt {
            offset: region_base + offset,
            message,
        },
        fatal => fatal,
    }
}

fn read_compressed_blob_header(
    cursor: &mut Cursor<&[u8]>,
    prev: &mut EventBlobHeader,
) -> Result<EventBlobHeader, ParseError> {
    let flags = BlobFlags::from_bits_retain(cursor.read_le::<u8>()?);

    let mut header = EventBlobHeader::default();
    header.metadata_id = if flags.contains(BlobFlags::METADATA_ID) {
        read_varint_u32(cursor)?
    } else {
        prev.metadata_id
    };
    if flags.contains(BlobFlags::SEQ_THREAD_PROC) {
        header.sequence_number = prev
            .sequence_number
            .wrapping_add_signed(read_varint_i32(cursor)?);
        header.capture_thread_id = read_varint_u64(cursor)?;
        header.processor_number = read_varint_u32(cursor)?;
    } else {
        header.sequence_number = prev.sequence_number;
        header.capture_thread_id = prev.capture_thread_id;
        header.processor_number = prev.processor_number;
    }
    // Non-metadata blobs advance the sequence counter implicitly, whether
    // or not a delta was present.
    if header.metadata_id != 0 {
        header.sequence_number = header.sequence_number.wrapping_add(1);
    }

    header.thread_id = if flags.contains(BlobFlags::THREAD_ID) {
        read_varint_u64(cursor)?
    } else {
        prev.thread_id
    };
    header.stack_id = if flags.contains(BlobFlags::STACK_ID) {
        read_varint_u32(cursor)?
    } else {
        prev.stack_id
    };
    // The timestamp is always delta-coded, never flagged.
    header.timestamp = prev.timestamp.wrapping_add(read_varint_i64(cursor)?);
    header.activity_id = if flags.contains(BlobFlags::ACTIVITY_ID) {
        cursor.read_le()?
    } else {
        prev.activity_id
    };
    header.related_activity_id = if flags.contains(BlobFlags::RELATED_ACTIVITY_ID) {
        cursor.read_le()?
    } else {
        prev.related_activity_id
    };
    header.is_sorted = flags.contains(BlobFlags::IS_SORTED);
    header.payload_size = if flags.contains(BlobFlags::PAYLOAD_SIZE) {
        read_varint_u32(cursor)?
    } else {
        prev.payload_size
    };
    header.raw_metadata_id = if header.is_sorted { 1 << 31 } else { 0 } | header.metadata_id;

    *prev = header.clone();
    Ok(header)
}
