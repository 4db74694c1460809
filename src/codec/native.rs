//! Native Binary codec (C7), §4.6: little-endian, fixed-layout, pointer-
//! addressed wire format for random access.
//!
//! Variable-width payloads (unbounded strings/binaries, dynamic groups,
//! sequences) live in a trailing variable-data region; the fixed region
//! holds either the value itself (primitives, `fixed(N)`, inline short
//! strings, nested static groups) or a `u32` absolute byte offset into the
//! variable region. The wire format does not specify an internal layout
//! for pointer-addressed string/binary payloads or the exact relative
//! placement of sibling payloads within the variable region (§4.6.3 grants
//! implementer discretion here); this codec uses `u32 length + raw bytes`
//! at the pointer target and appends payloads in field declaration order.

use super::Strictness;
use crate::error::{BlinkError, ErrorKind};
use crate::qname::QName;
use crate::registry::Registry;
use crate::schema::{FieldDef, Primitive, Type};
use crate::value::{DecimalValue, FieldMap, Message, StaticGroupValue, Value};

const HEADER_LEN: usize = 16;

fn framing(message: impl Into<String>) -> BlinkError {
    BlinkError::strong(ErrorKind::FramingError, message)
}

fn value_error(message: impl Into<String>) -> BlinkError {
    BlinkError::strong(ErrorKind::ValueError, message)
}

fn weak(message: impl Into<String>) -> BlinkError {
    BlinkError::weak(ErrorKind::WeakError, message)
}

fn recover<T>(strict: Strictness, err: BlinkError, recovered: T) -> Result<T, BlinkError> {
    if strict.is_strict() {
        Err(err)
    } else {
        tracing::debug!(%err, "permissive decode recovered from weak error");
        Ok(recovered)
    }
}

fn check_polymorphism(registry: &Registry, actual: &QName, base: &QName) -> Result<(), BlinkError> {
    let actual_group = registry.get_by_name(actual)?;
    if registry.is_descendant_of(actual_group, base) {
        Ok(())
    } else {
        Err(weak(format!("dynamic group value {actual} is not {base} or a descendant (W15)")))
    }
}

/// Width, in bytes, of `ty`'s slot in a fixed region: either the inline
/// value width or a 4-byte pointer. Purely schema-derived (independent of
/// any particular value), so both encoder and decoder compute it the same
/// way without exchanging extra metadata on the wire.
fn field_slot_width(ty: &Type, optional: bool, registry: &Registry) -> Result<usize, BlinkError> {
    Ok(match ty {
        Type::Primitive(Primitive::Decimal) => (optional as usize) + 9,
        Type::Primitive(p) => (optional as usize) + p.native_width_bytes(),
        Type::EnumRef(_) => (optional as usize) + 4,
        Type::Str { max_size } | Type::Binary { max_size } => match max_size {
            Some(n) if *n <= 255 => (optional as usize) + 1 + *n as usize,
            _ => 4,
        },
        Type::Fixed { size } => (optional as usize) + *size as usize,
        Type::StaticGroupRef(qname) => {
            let group = registry.get_by_name(qname)?;
            (optional as usize) + layout_width(&group.fields, registry)?
        }
        Type::DynamicGroupRef(_) | Type::Object | Type::Sequence(_) => 4,
        Type::TypeDefRef(_) => unreachable!("resolver substitutes typedefs before codec sees them"),
    })
}

fn layout_width(fields: &[FieldDef], registry: &Registry) -> Result<usize, BlinkError> {
    let mut total = 0;
    for f in fields {
        total += field_slot_width(&f.ty, f.optional, registry)?;
    }
    Ok(total)
}

/// Encodes `msg` as a Native Binary frame (§4.6.1–4.6.2), including a full
/// nested frame for every `DynamicGroupRef`/`Object` field and every
/// extension element (each is itself a complete `encode()` output).
pub fn encode(msg: &Message, registry: &Registry) -> Result<Vec<u8>, BlinkError> {
    let group = registry.get_by_name(&msg.ty)?;
    let type_id = group
        .type_id
        .ok_or_else(|| value_error(format!("group {} has no type id to encode", msg.ty)))?;
    let fixed_size = layout_width(&group.fields, registry)?;

    let mut fixed = vec![0u8; fixed_size];
    let mut variable = Vec::new();
    write_fields_slots(&group.fields, &msg.fields, registry, &mut fixed, &mut variable, fixed_size)?;

    let mut extension_buf = Vec::new();
    for ext in &msg.extension {
        extension_buf.extend(encode(ext, registry)?);
    }
    let extension_offset = if extension_buf.is_empty() {
        0u32
    } else {
        (HEADER_LEN + fixed.len() + variable.len()) as u32
    };

    let total_size = HEADER_LEN + fixed.len() + variable.len() + extension_buf.len();
    let mut out = Vec::with_capacity(total_size);
    out.extend_from_slice(&(total_size as u32).to_le_bytes());
    out.extend_from_slice(&type_id.to_le_bytes());
    out.extend_from_slice(&extension_offset.to_le_bytes());
    out.extend_from_slice(&fixed);
    out.extend_from_slice(&variable);
    out.extend_from_slice(&extension_buf);
    Ok(out)
}

fn write_fields_slots(
    fields: &[FieldDef],
    values: &FieldMap,
    registry: &Registry,
    local: &mut [u8],
    variable: &mut Vec<u8>,
    frame_fixed_size: usize,
) -> Result<(), BlinkError> {
    let mut offset = 0;
    for f in fields {
        let width = field_slot_width(&f.ty, f.optional, registry)?;
        write_slot(
            &f.ty,
            f.optional,
            values.get(&f.name),
            registry,
            &mut local[offset..offset + width],
            variable,
            frame_fixed_size,
        )?;
        offset += width;
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn write_slot(
    ty: &Type,
    optional: bool,
    value: Option<&Value>,
    registry: &Registry,
    local: &mut [u8],
    variable: &mut Vec<u8>,
    frame_fixed_size: usize,
) -> Result<(), BlinkError> {
    match ty {
        Type::Primitive(Primitive::Decimal) => write_inline_decimal(optional, value, local),
        Type::Primitive(p) => write_inline_primitive(*p, optional, value, local),
        Type::EnumRef(_) => write_inline_enum(optional, value, local),
        Type::Fixed { size } => write_inline_fixed(*size, optional, value, local),
        Type::Str { max_size } => {
            let bytes = match value {
                Some(Value::Str(s)) => Some(s.as_bytes()),
                Some(_) => return Err(value_error("expected string value")),
                None => None,
            };
            write_bytes_slot(bytes, *max_size, optional, local, variable, frame_fixed_size)
        }
        Type::Binary { max_size } => {
            let bytes = match value {
                Some(Value::Bytes(b)) => Some(b.as_slice()),
                Some(_) => return Err(value_error("expected binary value")),
                None => None,
            };
            write_bytes_slot(bytes, *max_size, optional, local, variable, frame_fixed_size)
        }
        Type::StaticGroupRef(qname) => {
            write_static_group_slot(qname, optional, value, registry, local, variable, frame_fixed_size)
        }
        Type::DynamicGroupRef(base) => {
            write_pointer_message_slot(Some(base), value, registry, local, variable, frame_fixed_size)
        }
        Type::Object => write_pointer_message_slot(None, value, registry, local, variable, frame_fixed_size),
        Type::Sequence(inner) => write_sequence_slot(inner, value, registry, local, variable, frame_fixed_size),
        Type::TypeDefRef(_) => unreachable!("resolver substitutes typedefs before codec sees them"),
    }
}

fn write_inline_primitive(p: Primitive, optional: bool, value: Option<&Value>, local: &mut [u8]) -> Result<(), BlinkError> {
    let presence_off = optional as usize;
    if optional {
        local[0] = value.is_some() as u8;
    }
    let Some(value) = value else { return Ok(()) };
    let region = &mut local[presence_off..];
    match p {
        Primitive::Bool => region[0] = matches!(value, Value::Bool(true)) as u8,
        Primitive::F64 => {
            let Value::Float(f) = value else { return Err(value_error("expected float value")) };
            region[..8].copy_from_slice(&f.to_bits().to_le_bytes());
        }
        _ if p.is_signed() => {
            let v = value.as_int().ok_or_else(|| value_error("expected signed integer value"))?;
            match p.native_width_bytes() {
                1 => region[0] = v as i8 as u8,
                2 => region[..2].copy_from_slice(&(v as i16).to_le_bytes()),
                4 => region[..4].copy_from_slice(&(v as i32).to_le_bytes()),
                8 => region[..8].copy_from_slice(&v.to_le_bytes()),
                w => unreachable!("unexpected signed width {w}"),
            }
        }
        _ => {
            let v = value.as_uint().ok_or_else(|| value_error("expected unsigned integer value"))?;
            match p.native_width_bytes() {
                1 => region[0] = v as u8,
                2 => region[..2].copy_from_slice(&(v as u16).to_le_bytes()),
                4 => region[..4].copy_from_slice(&(v as u32).to_le_bytes()),
                8 => region[..8].copy_from_slice(&v.to_le_bytes()),
                w => unreachable!("unexpected unsigned width {w}"),
            }
        }
    }
    Ok(())
}

fn write_inline_enum(optional: bool, value: Option<&Value>, local: &mut [u8]) -> Result<(), BlinkError> {
    let presence_off = optional as usize;
    if optional {
        local[0] = value.is_some() as u8;
    }
    if let Some(value) = value {
        let v = value.as_int().ok_or_else(|| value_error("enum value must be an integer"))?;
        let v = i32::try_from(v).map_err(|_| value_error("enum value out of i32 range"))?;
        local[presence_off..presence_off + 4].copy_from_slice(&v.to_le_bytes());
    }
    Ok(())
}

fn write_inline_decimal(optional: bool, value: Option<&Value>, local: &mut [u8]) -> Result<(), BlinkError> {
    let presence_off = optional as usize;
    if optional {
        local[0] = value.is_some() as u8;
    }
    if let Some(value) = value {
        let Value::Decimal(d) = value else { return Err(value_error("expected decimal value")) };
        local[presence_off] = d.exponent as u8;
        local[presence_off + 1..presence_off + 9].copy_from_slice(&d.mantissa.to_le_bytes());
    }
    Ok(())
}

fn write_inline_fixed(size: u32, optional: bool, value: Option<&Value>, local: &mut [u8]) -> Result<(), BlinkError> {
    let presence_off = optional as usize;
    if optional {
        local[0] = value.is_some() as u8;
    }
    if let Some(value) = value {
        let Value::Bytes(b) = value else { return Err(value_error("expected fixed-size binary value")) };
        if b.len() != size as usize {
            return Err(value_error(format!("fixed({size}) got {} bytes", b.len())));
        }
        local[presence_off..presence_off + size as usize].copy_from_slice(b);
    }
    Ok(())
}

fn write_bytes_slot(
    bytes: Option<&[u8]>,
    max_size: Option<u32>,
    optional: bool,
    local: &mut [u8],
    variable: &mut Vec<u8>,
    frame_fixed_size: usize,
) -> Result<(), BlinkError> {
    if let Some(cap) = max_size.filter(|&n| n <= 255) {
        let presence_off = optional as usize;
        if optional {
            local[0] = bytes.is_some() as u8;
        }
        match bytes {
            Some(b) => {
                if b.len() as u32 > cap {
                    return Err(value_error(format!("value exceeds declared max size {cap}")));
                }
                local[presence_off] = b.len() as u8;
                local[presence_off + 1..presence_off + 1 + b.len()].copy_from_slice(b);
            }
            None => local[presence_off] = 0,
        }
    } else {
        match bytes {
            Some(b) => {
                let ptr = (HEADER_LEN + frame_fixed_size + variable.len()) as u32;
                variable.extend_from_slice(&(b.len() as u32).to_le_bytes());
                variable.extend_from_slice(b);
                local.copy_from_slice(&ptr.to_le_bytes());
            }
            None => local.copy_from_slice(&0u32.to_le_bytes()),
        }
    }
    Ok(())
}

fn write_static_group_slot(
    qname: &QName,
    optional: bool,
    value: Option<&Value>,
    registry: &Registry,
    local: &mut [u8],
    variable: &mut Vec<u8>,
    frame_fixed_size: usize,
) -> Result<(), BlinkError> {
    let group = registry.get_by_name(qname)?;
    let child_width = layout_width(&group.fields, registry)?;
    let presence_off = optional as usize;
    if optional {
        match value {
            None => {
                local[0] = 0;
                return Ok(());
            }
            Some(_) => local[0] = 1,
        }
    }
    let Some(Value::StaticGroup(sg)) = value else {
        return Err(value_error("expected static group value"));
    };
    write_fields_slots(
        &group.fields,
        &sg.fields,
        registry,
        &mut local[presence_off..presence_off + child_width],
        variable,
        frame_fixed_size,
    )
}

fn write_pointer_message_slot(
    base: Option<&QName>,
    value: Option<&Value>,
    registry: &Registry,
    local: &mut [u8],
    variable: &mut Vec<u8>,
    frame_fixed_size: usize,
) -> Result<(), BlinkError> {
    match value {
        None => {
            local.copy_from_slice(&0u32.to_le_bytes());
            Ok(())
        }
        Some(Value::Message(inner)) => {
            if let Some(base) = base {
                check_polymorphism(registry, &inner.ty, base)?;
            }
            let nested = encode(inner, registry)?;
            let ptr = (HEADER_LEN + frame_fixed_size + variable.len()) as u32;
            variable.extend_from_slice(&nested);
            local.copy_from_slice(&ptr.to_le_bytes());
            Ok(())
        }
        Some(_) => Err(value_error("expected message value for dynamic group/object")),
    }
}

fn write_sequence_slot(
    inner: &Type,
    value: Option<&Value>,
    registry: &Registry,
    local: &mut [u8],
    variable: &mut Vec<u8>,
    frame_fixed_size: usize,
) -> Result<(), BlinkError> {
    match value {
        None => {
            local.copy_from_slice(&0u32.to_le_bytes());
            Ok(())
        }
        Some(Value::Sequence(items)) => {
            let ptr = (HEADER_LEN + frame_fixed_size + variable.len()) as u32;
            variable.extend_from_slice(&(items.len() as u32).to_le_bytes());
            let item_width = field_slot_width(inner, false, registry)?;
            let slots_start = variable.len();
            variable.resize(slots_start + items.len() * item_width, 0);
            for (i, item) in items.iter().enumerate() {
                let mut scratch = vec![0u8; item_width];
                write_slot(inner, false, Some(item), registry, &mut scratch, variable, frame_fixed_size)?;
                variable[slots_start + i * item_width..slots_start + (i + 1) * item_width].copy_from_slice(&scratch);
            }
            local.copy_from_slice(&ptr.to_le_bytes());
            Ok(())
        }
        Some(_) => Err(value_error("expected sequence value")),
    }
}

fn check_pointer_range(ptr: usize, fixed_end: usize, frame_len: usize) -> Result<(), BlinkError> {
    if ptr < fixed_end || ptr >= frame_len {
        Err(framing(format!("pointer {ptr} out of range [{fixed_end}, {frame_len})")))
    } else {
        Ok(())
    }
}

/// Decodes one Native Binary frame starting at `buf[offset]` (§4.9's S0–S3
/// collapsed into direct fixed/variable-region reads, since Native carries
/// no field-kind ambiguity requiring incremental state transitions). No
/// `decode_stream` is provided: streaming concatenated Native frames is out
/// of scope (SPEC_FULL.md Open Question 2) — callers that need it can loop
/// on the returned offset themselves.
pub fn decode_one(buf: &[u8], offset: usize, registry: &Registry, strict: Strictness) -> Result<(Message, usize), BlinkError> {
    let header = buf
        .get(offset..offset + HEADER_LEN)
        .ok_or_else(|| framing("truncated native header"))?;
    let size = u32::from_le_bytes(header[0..4].try_into().unwrap()) as usize;
    let type_id = u64::from_le_bytes(header[4..12].try_into().unwrap());
    let extension_offset = u32::from_le_bytes(header[12..16].try_into().unwrap()) as usize;

    if size < HEADER_LEN {
        return Err(framing("frame size smaller than header"));
    }
    let frame_end = offset
        .checked_add(size)
        .filter(|&e| e <= buf.len())
        .ok_or_else(|| framing("frame size exceeds buffer"))?;
    let frame = &buf[offset..frame_end];

    let group = registry
        .get_by_id(type_id)
        .map_err(|_| framing(format!("unknown type id {type_id}")))?;
    let fixed_size = layout_width(&group.fields, registry)?;
    let fixed_end = HEADER_LEN + fixed_size;
    let fixed = frame
        .get(HEADER_LEN..fixed_end)
        .ok_or_else(|| framing("fixed region exceeds frame"))?;

    let mut msg = Message::new(group.qname.clone());
    let mut off = 0;
    for f in &group.fields {
        let width = field_slot_width(&f.ty, f.optional, registry)?;
        let slot = fixed
            .get(off..off + width)
            .ok_or_else(|| framing("field slot exceeds fixed region"))?;
        if let Some(v) = read_slot(&f.ty, f.optional, slot, frame, registry, strict, fixed_end)? {
            msg.fields.insert(f.name.clone(), v);
        }
        off += width;
    }

    if extension_offset != 0 {
        check_pointer_range(extension_offset, fixed_end, frame.len())?;
        msg.extension = decode_extension_block(frame, extension_offset, registry, strict)?;
    }

    Ok((msg, frame_end))
}

fn decode_extension_block(
    frame: &[u8],
    start: usize,
    registry: &Registry,
    strict: Strictness,
) -> Result<Vec<Message>, BlinkError> {
    let mut pos = start;
    let mut out = Vec::new();
    while pos < frame.len() {
        let (msg, next) = decode_one(frame, pos, registry, strict)?;
        out.push(msg);
        pos = next;
    }
    Ok(out)
}

#[allow(clippy::too_many_arguments)]
fn read_slot(
    ty: &Type,
    optional: bool,
    local: &[u8],
    frame: &[u8],
    registry: &Registry,
    strict: Strictness,
    fixed_end: usize,
) -> Result<Option<Value>, BlinkError> {
    match ty {
        Type::Primitive(Primitive::Decimal) => read_inline_decimal(optional, local),
        Type::Primitive(p) => read_inline_primitive(*p, optional, local),
        Type::EnumRef(qname) => read_inline_enum(qname, optional, local, registry, strict),
        Type::Fixed { size } => read_inline_fixed(*size, optional, local),
        Type::Str { max_size } => read_bytes_slot(local, frame, *max_size, optional, fixed_end)?
            .map(|b| decode_string(b, strict))
            .transpose(),
        Type::Binary { max_size } => Ok(read_bytes_slot(local, frame, *max_size, optional, fixed_end)?.map(Value::Bytes)),
        Type::StaticGroupRef(qname) => read_static_group_slot(qname, optional, local, frame, registry, strict, fixed_end),
        Type::DynamicGroupRef(base) => {
            read_pointer_message_slot(Some(base), local, frame, registry, strict, fixed_end)
        }
        Type::Object => read_pointer_message_slot(None, local, frame, registry, strict, fixed_end),
        Type::Sequence(inner) => read_sequence_slot(inner, local, frame, registry, strict, fixed_end),
        Type::TypeDefRef(_) => unreachable!("resolver substitutes typedefs before codec sees them"),
    }
}

fn read_inline_primitive(p: Primitive, optional: bool, local: &[u8]) -> Result<Option<Value>, BlinkError> {
    let presence_off = optional as usize;
    if optional && local[0] == 0 {
        return Ok(None);
    }
    let region = &local[presence_off..];
    let value = match p {
        Primitive::Bool => Value::Bool(region[0] != 0),
        Primitive::F64 => Value::Float(f64::from_bits(u64::from_le_bytes(region[..8].try_into().unwrap()))),
        _ if p.is_signed() => {
            let v = match p.native_width_bytes() {
                1 => region[0] as i8 as i64,
                2 => i16::from_le_bytes(region[..2].try_into().unwrap()) as i64,
                4 => i32::from_le_bytes(region[..4].try_into().unwrap()) as i64,
                8 => i64::from_le_bytes(region[..8].try_into().unwrap()),
                w => unreachable!("unexpected signed width {w}"),
            };
            Value::Int(v)
        }
        _ => {
            let v = match p.native_width_bytes() {
                1 => region[0] as u64,
                2 => u16::from_le_bytes(region[..2].try_into().unwrap()) as u64,
                4 => u32::from_le_bytes(region[..4].try_into().unwrap()) as u64,
                8 => u64::from_le_bytes(region[..8].try_into().unwrap()),
                w => unreachable!("unexpected unsigned width {w}"),
            };
            Value::UInt(v)
        }
    };
    Ok(Some(value))
}

fn read_inline_enum(
    qname: &QName,
    optional: bool,
    local: &[u8],
    registry: &Registry,
    strict: Strictness,
) -> Result<Option<Value>, BlinkError> {
    let presence_off = optional as usize;
    if optional && local[0] == 0 {
        return Ok(None);
    }
    let v = i32::from_le_bytes(local[presence_off..presence_off + 4].try_into().unwrap());
    let enum_def = registry.enum_def(qname)?;
    let v = if enum_def.symbol_of(v).is_some() {
        v
    } else {
        recover(strict, weak(format!("unmapped enum value {v} for {qname}")), v)?
    };
    Ok(Some(Value::Int(v as i64)))
}

fn read_inline_decimal(optional: bool, local: &[u8]) -> Result<Option<Value>, BlinkError> {
    let presence_off = optional as usize;
    if optional && local[0] == 0 {
        return Ok(None);
    }
    let exponent = local[presence_off] as i8;
    let mantissa = i64::from_le_bytes(local[presence_off + 1..presence_off + 9].try_into().unwrap());
    Ok(Some(Value::Decimal(DecimalValue { exponent, mantissa })))
}

fn read_inline_fixed(size: u32, optional: bool, local: &[u8]) -> Result<Option<Value>, BlinkError> {
    let presence_off = optional as usize;
    if optional && local[0] == 0 {
        return Ok(None);
    }
    Ok(Some(Value::Bytes(local[presence_off..presence_off + size as usize].to_vec())))
}

fn read_bytes_slot(
    local: &[u8],
    frame: &[u8],
    max_size: Option<u32>,
    optional: bool,
    fixed_end: usize,
) -> Result<Option<Vec<u8>>, BlinkError> {
    if let Some(cap) = max_size.filter(|&n| n <= 255) {
        let presence_off = optional as usize;
        if optional && local[0] == 0 {
            return Ok(None);
        }
        let len = local[presence_off] as usize;
        if len as u32 > cap {
            return Err(framing(format!("inline length {len} exceeds declared max {cap}")));
        }
        Ok(Some(local[presence_off + 1..presence_off + 1 + len].to_vec()))
    } else {
        let ptr = u32::from_le_bytes(local[..4].try_into().unwrap()) as usize;
        if ptr == 0 {
            return Ok(None);
        }
        check_pointer_range(ptr, fixed_end, frame.len())?;
        let len = u32::from_le_bytes(
            frame
                .get(ptr..ptr + 4)
                .ok_or_else(|| framing("string/binary length prefix exceeds frame"))?
                .try_into()
                .unwrap(),
        ) as usize;
        let start = ptr + 4;
        let end = start
            .checked_add(len)
            .filter(|&e| e <= frame.len())
            .ok_or_else(|| framing("string/binary payload exceeds frame"))?;
        Ok(Some(frame[start..end].to_vec()))
    }
}

fn decode_string(bytes: Vec<u8>, strict: Strictness) -> Result<Value, BlinkError> {
    match String::from_utf8(bytes) {
        Ok(s) => Ok(Value::Str(s)),
        Err(e) => {
            let lossy = String::from_utf8_lossy(e.as_bytes()).into_owned();
            recover(strict, weak("invalid UTF-8 in string field"), Value::Str(lossy))
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn read_static_group_slot(
    qname: &QName,
    optional: bool,
    local: &[u8],
    frame: &[u8],
    registry: &Registry,
    strict: Strictness,
    fixed_end: usize,
) -> Result<Option<Value>, BlinkError> {
    let group = registry.get_by_name(qname)?;
    let child_width = layout_width(&group.fields, registry)?;
    let presence_off = optional as usize;
    if optional && local[0] == 0 {
        return Ok(None);
    }
    let child_local = &local[presence_off..presence_off + child_width];
    let mut fields = FieldMap::new();
    let mut off = 0;
    for f in &group.fields {
        let width = field_slot_width(&f.ty, f.optional, registry)?;
        if let Some(v) = read_slot(&f.ty, f.optional, &child_local[off..off + width], frame, registry, strict, fixed_end)? {
            fields.insert(f.name.clone(), v);
        }
        off += width;
    }
    Ok(Some(Value::StaticGroup(StaticGroupValue { fields })))
}

fn read_pointer_message_slot(
    base: Option<&QName>,
    local: &[u8],
    frame: &[u8],
    registry: &Registry,
    strict: Strictness,
    fixed_end: usize,
) -> Result<Option<Value>, BlinkError> {
    let ptr = u32::from_le_bytes(local[..4].try_into().unwrap()) as usize;
    if ptr == 0 {
        return Ok(None);
    }
    check_pointer_range(ptr, fixed_end, frame.len())?;
    let (msg, _consumed) = decode_one(frame, ptr, registry, strict)?;
    if let Some(base) = base {
        if let Err(e) = check_polymorphism(registry, &msg.ty, base) {
            recover(strict, e, ())?;
        }
    }
    Ok(Some(Value::Message(Box::new(msg))))
}

fn read_sequence_slot(
    inner: &Type,
    local: &[u8],
    frame: &[u8],
    registry: &Registry,
    strict: Strictness,
    fixed_end: usize,
) -> Result<Option<Value>, BlinkError> {
    let ptr = u32::from_le_bytes(local[..4].try_into().unwrap()) as usize;
    if ptr == 0 {
        return Ok(None);
    }
    check_pointer_range(ptr, fixed_end, frame.len())?;
    let count = u32::from_le_bytes(
        frame
            .get(ptr..ptr + 4)
            .ok_or_else(|| framing("sequence count exceeds frame"))?
            .try_into()
            .unwrap(),
    ) as usize;
    let item_width = field_slot_width(inner, false, registry)?;
    let items_start = ptr + 4;
    let items_end = items_start
        .checked_add(count * item_width)
        .filter(|&e| e <= frame.len())
        .ok_or_else(|| framing("sequence items exceed frame"))?;
    let _ = items_end;
    let mut items = Vec::with_capacity(count);
    for i in 0..count {
        let slot = &frame[items_start + i * item_width..items_start + (i + 1) * item_width];
        match read_slot(inner, false, slot, frame, registry, strict, fixed_end)? {
            Some(v) => items.push(v),
            None => return Err(value_error("sequence element decoded as absent")),
        }
    }
    Ok(Some(Value::Sequence(items)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::compile_schema;

    fn demo_registry() -> Registry {
        let schema = compile_schema(
            r#"
            namespace Demo
            Address/1 -> string Street, string City, u32 ZipCode
            Employee/2 -> string Name, u32 Age, Address HomeAddress
            Manager/3 : Employee -> string Department, u32 TeamSize
            Company/4 -> string CompanyName, Manager CEO
        "#,
        )
        .unwrap();
        Registry::from_schema(schema)
    }

    fn seed_message() -> Message {
        let mut address = StaticGroupValue::default();
        address.fields.insert("Street", Value::Str("123 Main St".into()));
        address.fields.insert("City", Value::Str("San Francisco".into()));
        address.fields.insert("ZipCode", Value::UInt(94102));

        let mut manager = FieldMap::new();
        manager.insert("Name", Value::Str("Alice".into()));
        manager.insert("Age", Value::UInt(45));
        manager.insert("HomeAddress", Value::StaticGroup(address));
        manager.insert("Department", Value::Str("Engineering".into()));
        manager.insert("TeamSize", Value::UInt(50));

        let mut company = Message::new(QName::with_namespace("Demo", "Company"));
        company.fields.insert("CompanyName", Value::Str("TechCorp".into()));
        company
            .fields
            .insert("CEO", Value::StaticGroup(StaticGroupValue { fields: manager }));
        company
    }

    #[test]
    fn roundtrips_seed_scenario() {
        let registry = demo_registry();
        let msg = seed_message();
        let bytes = encode(&msg, &registry).unwrap();
        let (decoded, consumed) = decode_one(&bytes, 0, &registry, Strictness::Strict).unwrap();
        assert_eq!(consumed, bytes.len());
        assert_eq!(decoded, msg);
    }

    #[test]
    fn header_size_matches_consumed_bytes() {
        let registry = demo_registry();
        let msg = seed_message();
        let bytes = encode(&msg, &registry).unwrap();
        let size = u32::from_le_bytes(bytes[0..4].try_into().unwrap()) as usize;
        assert_eq!(size, bytes.len());
    }

    #[test]
    fn inline_and_pointer_strings_round_trip_same_value() {
        let inline_schema = compile_schema("A/1 -> string(255) S").unwrap();
        let pointer_schema = compile_schema("A/1 -> string S").unwrap();
        let inline_registry = Registry::from_schema(inline_schema);
        let pointer_registry = Registry::from_schema(pointer_schema);

        let mut msg = Message::new(QName::bare("A"));
        msg.fields.insert("S", Value::Str("hello world".into()));

        let inline_bytes = encode(&msg, &inline_registry).unwrap();
        let pointer_bytes = encode(&msg, &pointer_registry).unwrap();
        let (inline_decoded, _) = decode_one(&inline_bytes, 0, &inline_registry, Strictness::Strict).unwrap();
        let (pointer_decoded, _) = decode_one(&pointer_bytes, 0, &pointer_registry, Strictness::Strict).unwrap();
        assert_eq!(inline_decoded.fields.get("S"), pointer_decoded.fields.get("S"));
    }

    #[test]
    fn sequence_round_trips() {
        let schema = compile_schema("A/1 -> sequence<u32> Counts").unwrap();
        let registry = Registry::from_schema(schema);
        let mut msg = Message::new(QName::bare("A"));
        msg.fields.insert(
            "Counts",
            Value::Sequence(vec![Value::UInt(1), Value::UInt(2), Value::UInt(3)]),
        );
        let bytes = encode(&msg, &registry).unwrap();
        let (decoded, consumed) = decode_one(&bytes, 0, &registry, Strictness::Strict).unwrap();
        assert_eq!(consumed, bytes.len());
        assert_eq!(decoded, msg);
    }

    #[test]
    fn out_of_range_pointer_is_framing_error() {
        let schema = compile_schema("A/1 -> string S").unwrap();
        let registry = Registry::from_schema(schema);
        let mut msg = Message::new(QName::bare("A"));
        msg.fields.insert("S", Value::Str("x".into()));
        let mut bytes = encode(&msg, &registry).unwrap();
        // Corrupt the pointer slot (right after the 16-byte header) to
        // point past the end of the frame.
        let bogus = (bytes.len() as u32 + 100).to_le_bytes();
        bytes[16..20].copy_from_slice(&bogus);
        let err = decode_one(&bytes, 0, &registry, Strictness::Strict).unwrap_err();
        assert_eq!(err.kind, ErrorKind::FramingError);
    }

    #[test]
    fn truncated_header_is_framing_error() {
        let buf = [0u8; 10];
        let registry = Registry::from_schema(compile_schema("A/1 -> u32 X").unwrap());
        let err = decode_one(&buf, 0, &registry, Strictness::Strict).unwrap_err();
        assert_eq!(err.kind, ErrorKind::FramingError);
    }
}
