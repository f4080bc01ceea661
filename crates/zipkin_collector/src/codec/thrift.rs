//! TBinaryProtocol codec for the v1 thrift structs.
//!
//! Field ids follow `zipkinCore.thrift`. Fields with an unknown id, or a known
//! id with an unexpected type, are skipped.

use super::message::THRIFT_STRUCT;
use super::{DecodeError, Encoding, SpanDecoder, SpanEncoder};
use crate::endpoint::Endpoint;
use crate::ids::TraceId;
use crate::v1::{self, Annotation, AnnotationValue, BinaryAnnotation};
use std::cell::Cell;
use std::io::{self, Read};
use std::net::{Ipv4Addr, Ipv6Addr};
use std::rc::Rc;
use thrift::protocol::{
    TBinaryInputProtocol, TBinaryOutputProtocol, TFieldIdentifier, TInputProtocol,
    TListIdentifier, TOutputProtocol, TStructIdentifier, TType,
};
use tracing::warn;

/// `AnnotationType` values of a binary annotation
mod annotation_type {
    pub const BOOL: i32 = 0;
    pub const BYTES: i32 = 1;
    pub const I16: i32 = 2;
    pub const I32: i32 = 3;
    pub const I64: i32 = 4;
    pub const DOUBLE: i32 = 5;
    pub const STRING: i32 = 6;
}

/// Nesting limit when skipping unknown fields
const MAX_SKIP_DEPTH: usize = 64;

type Result<T> = std::result::Result<T, DecodeError>;

fn malformed(reason: impl std::fmt::Display) -> DecodeError {
    DecodeError::malformed(Encoding::Thrift, reason)
}

/// Decodes thrift-encoded v1 spans.
///
/// `read_spans` accepts a `list<Span>` as well as a single bare span struct,
/// which older reporters send.
#[derive(Debug, Clone, Copy, Default)]
pub struct ThriftDecoder;

impl SpanDecoder for ThriftDecoder {
    fn read_span(&self, bytes: &[u8]) -> Result<v1::Span> {
        if bytes.is_empty() {
            return Err(DecodeError::EmptyMessage);
        }
        Reader::new(bytes).span()
    }

    fn read_spans(&self, bytes: &[u8]) -> Result<Vec<v1::Span>> {
        let mut reader = Reader::new(bytes);
        match bytes.first() {
            None => Err(DecodeError::EmptyMessage),
            // a span struct never starts with a struct field
            Some(&THRIFT_STRUCT) => reader.struct_list(Reader::span),
            Some(_) => Ok(vec![reader.span()?]),
        }
    }

    fn name(&self) -> &str {
        "thrift"
    }
}

/// Encodes v1 spans as thrift structs.
#[derive(Debug, Clone, Copy, Default)]
pub struct ThriftEncoder;

impl SpanEncoder<v1::Span> for ThriftEncoder {
    fn encoding(&self) -> Encoding {
        Encoding::Thrift
    }

    fn encode(&self, span: &v1::Span) -> Vec<u8> {
        let mut out = Vec::with_capacity(128);
        if let Err(error) = write_span(&mut TBinaryOutputProtocol::new(&mut out, true), span) {
            warn!(%error, trace_id = %span.trace_id(), "cannot encode span as thrift");
        }
        out
    }
}

/// Writes the `list<struct>` header of a message holding `len` spans.
pub(super) fn write_list_header(out: &mut Vec<u8>, len: usize) {
    let list = TListIdentifier::new(TType::Struct, len as i32);
    if let Err(error) = TBinaryOutputProtocol::new(out, true).write_list_begin(&list) {
        warn!(%error, len, "cannot encode thrift list header");
    }
}

/// Unread input, shared between the protocol and the length checks.
#[derive(Clone)]
struct Input<'a>(Rc<Cell<&'a [u8]>>);

impl Input<'_> {
    fn remaining(&self) -> usize {
        self.0.get().len()
    }
}

impl Read for Input<'_> {
    fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
        let mut rest = self.0.get();
        let read = rest.read(out)?;
        self.0.set(rest);
        Ok(read)
    }
}

/// Reads zipkinCore structs off a `TBinaryInputProtocol`.
///
/// Every length prefix is checked against the unread input before anything
/// is allocated, so strings, binaries and unknown fields are read here rather
/// than through the protocol's own `read_bytes` and `skip`.
struct Reader<'a> {
    input: Input<'a>,
    protocol: TBinaryInputProtocol<Input<'a>>,
}

impl<'a> Reader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        let input = Input(Rc::new(Cell::new(bytes)));
        let protocol = TBinaryInputProtocol::new(input.clone(), false);
        Self { input, protocol }
    }

    /// Returns `None` at the end of a struct.
    fn field(&mut self) -> Result<Option<(TType, i16)>> {
        let field = self.protocol.read_field_begin().map_err(malformed)?;
        Ok(match field.field_type {
            TType::Stop => None,
            kind => Some((kind, field.id.unwrap_or_default())),
        })
    }

    /// Reads an i64 keeping its bits; ids and timestamps are unsigned here.
    fn u64(&mut self) -> Result<u64> {
        self.protocol.read_i64().map(|v| v as u64).map_err(malformed)
    }

    fn i32(&mut self) -> Result<i32> {
        self.protocol.read_i32().map_err(malformed)
    }

    fn u16(&mut self) -> Result<u16> {
        self.protocol.read_i16().map(|v| v as u16).map_err(malformed)
    }

    fn bool(&mut self) -> Result<bool> {
        self.protocol.read_bool().map_err(malformed)
    }

    fn binary(&mut self) -> Result<&'a [u8]> {
        let len = size(self.i32()?)?;
        let rest = self.input.0.get();
        if len > rest.len() {
            return Err(malformed(format!(
                "truncated: needed {len} bytes, {} left",
                rest.len()
            )));
        }
        let (head, tail) = rest.split_at(len);
        self.input.0.set(tail);
        Ok(head)
    }

    fn string(&mut self) -> Result<String> {
        let raw = self.binary()?;
        std::str::from_utf8(raw)
            .map(str::to_owned)
            .map_err(malformed)
    }

    fn struct_list<T>(&mut self, mut read: impl FnMut(&mut Self) -> Result<T>) -> Result<Vec<T>> {
        let list = self.protocol.read_list_begin().map_err(malformed)?;
        if list.element_type != TType::Struct {
            return Err(malformed(format!(
                "expected a list of structs, found {:?}",
                list.element_type
            )));
        }
        let count = size(list.size)?;
        // every struct takes at least one byte
        let mut items = Vec::with_capacity(count.min(self.input.remaining()));
        for _ in 0..count {
            items.push(read(self)?);
        }
        self.protocol.read_list_end().map_err(malformed)?;
        Ok(items)
    }

    fn skip(&mut self, kind: TType, depth: usize) -> Result<()> {
        if depth > MAX_SKIP_DEPTH {
            return Err(malformed("nesting too deep"));
        }
        match kind {
            TType::String => self.binary().map(|_| ()),
            TType::Struct => {
                while let Some((field_kind, _)) = self.field()? {
                    self.skip(field_kind, depth + 1)?;
                }
                Ok(())
            }
            TType::Map => {
                let map = self.protocol.read_map_begin().map_err(malformed)?;
                let count = size(map.size)?;
                if count > 0 {
                    let (key, value) = map
                        .key_type
                        .zip(map.value_type)
                        .ok_or_else(|| malformed("map without element types"))?;
                    for _ in 0..count {
                        self.skip(key, depth + 1)?;
                        self.skip(value, depth + 1)?;
                    }
                }
                Ok(())
            }
            TType::Set => {
                let set = self.protocol.read_set_begin().map_err(malformed)?;
                for _ in 0..size(set.size)? {
                    self.skip(set.element_type, depth + 1)?;
                }
                Ok(())
            }
            TType::List => {
                let list = self.protocol.read_list_begin().map_err(malformed)?;
                for _ in 0..size(list.size)? {
                    self.skip(list.element_type, depth + 1)?;
                }
                Ok(())
            }
            // fixed width, nothing to allocate
            scalar => self.protocol.skip(scalar).map_err(malformed),
        }
    }

    fn span(&mut self) -> Result<v1::Span> {
        let mut trace_id_high = 0;
        let mut trace_id = None;
        let mut id = None;
        let mut name = String::new();
        let mut parent_id = None;
        let mut annotations = Vec::new();
        let mut binary_annotations = Vec::new();
        let mut debug = false;
        let mut timestamp = None;
        let mut duration = None;

        self.protocol.read_struct_begin().map_err(malformed)?;
        while let Some((kind, field)) = self.field()? {
            match (field, kind) {
                (1, TType::I64) => trace_id = Some(self.u64()?),
                (3, TType::String) => name = self.string()?,
                (4, TType::I64) => id = Some(self.u64()?),
                (5, TType::I64) => parent_id = Some(self.u64()?),
                (6, TType::List) => annotations = self.struct_list(Self::annotation)?,
                (8, TType::List) => {
                    binary_annotations = self.struct_list(Self::binary_annotation)?;
                }
                (9, TType::Bool) => debug = self.bool()?,
                (10, TType::I64) => timestamp = Some(self.u64()?),
                (11, TType::I64) => duration = Some(self.u64()?),
                (12, TType::I64) => trace_id_high = self.u64()?,
                _ => self.skip(kind, 0)?,
            }
        }
        self.protocol.read_struct_end().map_err(malformed)?;

        let trace_id = trace_id.ok_or_else(|| malformed("span is missing trace_id"))?;
        let id = id.ok_or_else(|| malformed("span is missing id"))?;
        Ok(v1::Span::builder(TraceId::new(trace_id_high, trace_id), id)
            .name(name)
            .parent_id(parent_id)
            .timestamp(timestamp)
            .duration(duration)
            .debug(debug)
            .annotations(annotations)
            .binary_annotations(binary_annotations)
            .build())
    }

    fn annotation(&mut self) -> Result<Annotation> {
        let mut timestamp = 0;
        let mut value = String::new();
        let mut endpoint = None;
        while let Some((kind, field)) = self.field()? {
            match (field, kind) {
                (1, TType::I64) => timestamp = self.u64()?,
                (2, TType::String) => value = self.string()?,
                (3, TType::Struct) => endpoint = Some(self.endpoint()?),
                _ => self.skip(kind, 0)?,
            }
        }
        Ok(Annotation::new(timestamp, value, endpoint))
    }

    fn binary_annotation(&mut self) -> Result<BinaryAnnotation> {
        let mut key = String::new();
        let mut raw: &[u8] = &[];
        let mut value_type = annotation_type::STRING;
        let mut endpoint = None;
        while let Some((kind, field)) = self.field()? {
            match (field, kind) {
                (1, TType::String) => key = self.string()?,
                (2, TType::String) => raw = self.binary()?,
                (3, TType::I32) => value_type = self.i32()?,
                (4, TType::Struct) => endpoint = Some(self.endpoint()?),
                _ => self.skip(kind, 0)?,
            }
        }
        Ok(BinaryAnnotation::new(key, annotation_value(value_type, raw)?, endpoint))
    }

    fn endpoint(&mut self) -> Result<Endpoint> {
        let mut ipv4 = 0;
        let mut port = 0;
        let mut service_name = String::new();
        let mut ipv6 = None;
        while let Some((kind, field)) = self.field()? {
            match (field, kind) {
                (1, TType::I32) => ipv4 = self.i32()? as u32,
                (2, TType::I16) => port = self.u16()?,
                (3, TType::String) => service_name = self.string()?,
                (4, TType::String) => ipv6 = <[u8; 16]>::try_from(self.binary()?).ok(),
                _ => self.skip(kind, 0)?,
            }
        }

        let mut endpoint = Endpoint::new(service_name).with_port(port);
        if ipv4 != 0 {
            endpoint = endpoint.with_ipv4(Ipv4Addr::from(ipv4));
        }
        if let Some(ipv6) = ipv6 {
            endpoint = endpoint.with_ipv6(Ipv6Addr::from(ipv6));
        }
        Ok(endpoint)
    }
}

fn size(size: i32) -> Result<usize> {
    usize::try_from(size).map_err(|_| malformed(format!("negative size {size}")))
}

fn annotation_value(value_type: i32, raw: &[u8]) -> Result<AnnotationValue> {
    Ok(match value_type {
        annotation_type::BOOL => AnnotationValue::Bool(fixed::<1>(raw)?[0] != 0),
        annotation_type::BYTES => AnnotationValue::Bytes(raw.to_vec()),
        annotation_type::I16 => AnnotationValue::I16(i16::from_be_bytes(fixed(raw)?)),
        annotation_type::I32 => AnnotationValue::I32(i32::from_be_bytes(fixed(raw)?)),
        annotation_type::I64 => AnnotationValue::I64(i64::from_be_bytes(fixed(raw)?)),
        annotation_type::DOUBLE => AnnotationValue::Double(f64::from_be_bytes(fixed(raw)?)),
        annotation_type::STRING => AnnotationValue::String(
            std::str::from_utf8(raw).map_err(malformed)?.to_owned(),
        ),
        other => return Err(malformed(format!("unknown annotation type {other}"))),
    })
}

fn fixed<const N: usize>(raw: &[u8]) -> Result<[u8; N]> {
    <[u8; N]>::try_from(raw)
        .map_err(|_| malformed(format!("expected {N} value bytes, found {}", raw.len())))
}

fn write_i64(o: &mut dyn TOutputProtocol, name: &str, id: i16, value: u64) -> thrift::Result<()> {
    o.write_field_begin(&TFieldIdentifier::new(name, TType::I64, id))?;
    o.write_i64(value as i64)?;
    o.write_field_end()
}

fn write_binary(
    o: &mut dyn TOutputProtocol,
    name: &str,
    id: i16,
    value: &[u8],
) -> thrift::Result<()> {
    o.write_field_begin(&TFieldIdentifier::new(name, TType::String, id))?;
    o.write_bytes(value)?;
    o.write_field_end()
}

fn write_list<T>(
    o: &mut dyn TOutputProtocol,
    name: &str,
    id: i16,
    items: &[T],
    write: fn(&mut dyn TOutputProtocol, &T) -> thrift::Result<()>,
) -> thrift::Result<()> {
    o.write_field_begin(&TFieldIdentifier::new(name, TType::List, id))?;
    o.write_list_begin(&TListIdentifier::new(TType::Struct, items.len() as i32))?;
    for item in items {
        write(o, item)?;
    }
    o.write_list_end()?;
    o.write_field_end()
}

fn write_endpoint_field(
    o: &mut dyn TOutputProtocol,
    name: &str,
    id: i16,
    endpoint: &Endpoint,
) -> thrift::Result<()> {
    o.write_field_begin(&TFieldIdentifier::new(name, TType::Struct, id))?;
    write_endpoint(o, endpoint)?;
    o.write_field_end()
}

fn write_span(o: &mut dyn TOutputProtocol, span: &v1::Span) -> thrift::Result<()> {
    let trace_id = span.trace_id();
    o.write_struct_begin(&TStructIdentifier::new("Span"))?;
    write_i64(o, "trace_id", 1, trace_id.low)?;
    write_binary(o, "name", 3, span.name().as_bytes())?;
    write_i64(o, "id", 4, span.id())?;
    if let Some(parent_id) = span.parent_id() {
        write_i64(o, "parent_id", 5, parent_id)?;
    }
    if !span.annotations().is_empty() {
        write_list(o, "annotations", 6, span.annotations(), write_annotation)?;
    }
    if !span.binary_annotations().is_empty() {
        write_list(
            o,
            "binary_annotations",
            8,
            span.binary_annotations(),
            write_binary_annotation,
        )?;
    }
    if span.debug() {
        o.write_field_begin(&TFieldIdentifier::new("debug", TType::Bool, 9))?;
        o.write_bool(true)?;
        o.write_field_end()?;
    }
    if let Some(timestamp) = span.timestamp() {
        write_i64(o, "timestamp", 10, timestamp)?;
    }
    if let Some(duration) = span.duration() {
        write_i64(o, "duration", 11, duration)?;
    }
    if trace_id.high != 0 {
        write_i64(o, "trace_id_high", 12, trace_id.high)?;
    }
    o.write_field_stop()?;
    o.write_struct_end()
}

fn write_annotation(o: &mut dyn TOutputProtocol, annotation: &Annotation) -> thrift::Result<()> {
    o.write_struct_begin(&TStructIdentifier::new("Annotation"))?;
    write_i64(o, "timestamp", 1, annotation.timestamp)?;
    write_binary(o, "value", 2, annotation.value.as_bytes())?;
    if let Some(endpoint) = &annotation.endpoint {
        write_endpoint_field(o, "host", 3, endpoint)?;
    }
    o.write_field_stop()?;
    o.write_struct_end()
}

fn write_binary_annotation(
    o: &mut dyn TOutputProtocol,
    binary_annotation: &BinaryAnnotation,
) -> thrift::Result<()> {
    let (value_type, raw) = match &binary_annotation.value {
        AnnotationValue::Bool(v) => (annotation_type::BOOL, vec![u8::from(*v)]),
        AnnotationValue::Bytes(v) => (annotation_type::BYTES, v.clone()),
        AnnotationValue::I16(v) => (annotation_type::I16, v.to_be_bytes().to_vec()),
        AnnotationValue::I32(v) => (annotation_type::I32, v.to_be_bytes().to_vec()),
        AnnotationValue::I64(v) => (annotation_type::I64, v.to_be_bytes().to_vec()),
        AnnotationValue::Double(v) => (annotation_type::DOUBLE, v.to_be_bytes().to_vec()),
        AnnotationValue::String(v) => (annotation_type::STRING, v.as_bytes().to_vec()),
    };

    o.write_struct_begin(&TStructIdentifier::new("BinaryAnnotation"))?;
    write_binary(o, "key", 1, binary_annotation.key.as_bytes())?;
    write_binary(o, "value", 2, &raw)?;
    o.write_field_begin(&TFieldIdentifier::new("annotation_type", TType::I32, 3))?;
    o.write_i32(value_type)?;
    o.write_field_end()?;
    if let Some(endpoint) = &binary_annotation.endpoint {
        write_endpoint_field(o, "host", 4, endpoint)?;
    }
    o.write_field_stop()?;
    o.write_struct_end()
}

/// `ipv4` 0 and `port` 0 stand for absent, as zipkinCore defines them.
fn write_endpoint(o: &mut dyn TOutputProtocol, endpoint: &Endpoint) -> thrift::Result<()> {
    o.write_struct_begin(&TStructIdentifier::new("Endpoint"))?;
    o.write_field_begin(&TFieldIdentifier::new("ipv4", TType::I32, 1))?;
    o.write_i32(endpoint.ipv4.map_or(0, u32::from) as i32)?;
    o.write_field_end()?;
    o.write_field_begin(&TFieldIdentifier::new("port", TType::I16, 2))?;
    o.write_i16(endpoint.port.unwrap_or(0) as i16)?;
    o.write_field_end()?;
    write_binary(o, "service_name", 3, endpoint.service_name().unwrap_or_default().as_bytes())?;
    if let Some(ipv6) = endpoint.ipv6 {
        write_binary(o, "ipv6", 4, &ipv6.octets())?;
    }
    o.write_field_stop()?;
    o.write_struct_end()
}
