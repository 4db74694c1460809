//! Compact Binary codec (C6), §4.5: variable-length, size-optimized wire
//! format built on [`crate::vlc`] and the [`crate::registry::Registry`].

use super::Strictness;
use crate::error::{BlinkError, ErrorKind, Locator};
use crate::qname::QName;
use crate::registry::Registry;
use crate::schema::Type;
use crate::value::{DecimalValue, FieldMap, Message, StaticGroupValue, Value};
use crate::vlc::{self, Decoded};

const PRESENCE_PRESENT: u8 = 0x01;
const PRESENCE_ABSENT: u8 = 0xc0;

fn framing(offset: usize, message: impl Into<String>) -> BlinkError {
    BlinkError::strong(ErrorKind::FramingError, message).at(Locator::ByteOffset(offset))
}

fn value_error(offset: usize, message: impl Into<String>) -> BlinkError {
    BlinkError::strong(ErrorKind::ValueError, message).at(Locator::ByteOffset(offset))
}

fn weak(offset: usize, message: impl Into<String>) -> BlinkError {
    BlinkError::weak(ErrorKind::WeakError, message).at(Locator::ByteOffset(offset))
}

/// Carries a weak error through permissive recovery: if strict, abort; if
/// permissive, log and keep `recovered`.
fn recover<T>(strict: Strictness, err: BlinkError, recovered: T) -> Result<T, BlinkError> {
    if strict.is_strict() {
        Err(err)
    } else {
        tracing::debug!(%err, "permissive decode recovered from weak error");
        Ok(recovered)
    }
}

/// Encodes `msg` as a Compact Binary frame (§4.5.1).
pub fn encode(msg: &Message, registry: &Registry) -> Result<Vec<u8>, BlinkError> {
    let mut body = Vec::new();
    encode_frame_body(msg, registry, &mut body)?;
    let mut out = Vec::with_capacity(body.len() + 5);
    vlc::encode_u64(body.len() as u64, &mut out);
    out.extend_from_slice(&body);
    Ok(out)
}

fn encode_frame_body(msg: &Message, registry: &Registry, out: &mut Vec<u8>) -> Result<(), BlinkError> {
    let group = registry.get_by_name(&msg.ty)?;
    let type_id = group
        .type_id
        .ok_or_else(|| value_error(out.len(), format!("group {} has no type id to encode", msg.ty)))?;
    vlc::encode_u64(type_id, out);

    for field in &group.fields {
        let value = msg.fields.get(&field.name);
        encode_field(&field.ty, field.optional, value, registry, out)?;
    }

    if !msg.extension.is_empty() {
        vlc::encode_u64(msg.extension.len() as u64, out);
        for ext_msg in &msg.extension {
            let mut nested = Vec::new();
            encode_frame_body(ext_msg, registry, &mut nested)?;
            vlc::encode_u64(nested.len() as u64, out);
            out.extend_from_slice(&nested);
        }
    }

    Ok(())
}

fn encode_field(
    ty: &Type,
    optional: bool,
    value: Option<&Value>,
    registry: &Registry,
    out: &mut Vec<u8>,
) -> Result<(), BlinkError> {
    if value.is_none() {
        if !optional {
            return Err(value_error(out.len(), "required field is missing"));
        }
        encode_absent(ty, out);
        return Ok(());
    }
    let value = value.unwrap();

    match ty {
        Type::Primitive(p) => encode_primitive(*p, value, out)?,
        Type::EnumRef(_) => {
            let v = value.as_int().ok_or_else(|| value_error(out.len(), "enum value must be an integer"))?;
            vlc::encode_i64(v, out);
        }
        Type::Str { max_size } => {
            let s = value.as_str().ok_or_else(|| value_error(out.len(), "expected string value"))?;
            encode_len_prefixed(s.as_bytes(), *max_size, out)?;
        }
        Type::Binary { max_size } => {
            let Value::Bytes(b) = value else {
                return Err(value_error(out.len(), "expected binary value"));
            };
            encode_len_prefixed(b, *max_size, out)?;
        }
        Type::Fixed { size } => {
            let Value::Bytes(b) = value else {
                return Err(value_error(out.len(), "expected fixed-size binary value"));
            };
            if b.len() != *size as usize {
                return Err(value_error(out.len(), format!("fixed({size}) got {} bytes", b.len())));
            }
            if optional {
                out.push(PRESENCE_PRESENT);
            }
            out.extend_from_slice(b);
        }
        Type::StaticGroupRef(qname) => {
            let Value::StaticGroup(sg) = value else {
                return Err(value_error(out.len(), "expected static group value"));
            };
            if optional {
                out.push(PRESENCE_PRESENT);
            }
            let group = registry.get_by_name(qname)?;
            for field in &group.fields {
                encode_field(&field.ty, field.optional, sg.fields.get(&field.name), registry, out)?;
            }
        }
        Type::DynamicGroupRef(base) => {
            let Value::Message(inner) = value else {
                return Err(value_error(out.len(), "expected message value for dynamic group"));
            };
            check_polymorphism(registry, &inner.ty, base, out.len())?;
            let mut nested = Vec::new();
            encode_frame_body(inner, registry, &mut nested)?;
            vlc::encode_u64(nested.len() as u64, out);
            out.extend_from_slice(&nested);
        }
        Type::Object => {
            let Value::Message(inner) = value else {
                return Err(value_error(out.len(), "expected message value for object"));
            };
            let mut nested = Vec::new();
            encode_frame_body(inner, registry, &mut nested)?;
            vlc::encode_u64(nested.len() as u64, out);
            out.extend_from_slice(&nested);
        }
        Type::Sequence(inner_ty) => {
            let Value::Sequence(items) = value else {
                return Err(value_error(out.len(), "expected sequence value"));
            };
            vlc::encode_u64(items.len() as u64, out);
            for item in items {
                encode_field(inner_ty, false, Some(item), registry, out)?;
            }
        }
        Type::TypeDefRef(_) => unreachable!("resolver substitutes typedefs before codec sees them"),
    }
    Ok(())
}

fn encode_absent(ty: &Type, out: &mut Vec<u8>) {
    match ty {
        Type::Fixed { .. } | Type::StaticGroupRef(_) => out.push(PRESENCE_ABSENT),
        _ => vlc::encode_null(out),
    }
}

fn encode_primitive(p: crate::schema::Primitive, value: &Value, out: &mut Vec<u8>) -> Result<(), BlinkError> {
    use crate::schema::Primitive as P;
    match p {
        P::Bool => {
            let b = matches!(value, Value::Bool(true));
            vlc::encode_u64(b as u64, out);
        }
        P::F64 => {
            let f = match value {
                Value::Float(f) => *f,
                _ => return Err(value_error(out.len(), "expected float value")),
            };
            vlc::encode_u64(f.to_bits(), out);
        }
        P::Decimal => {
            let dec = match value {
                Value::Decimal(d) => *d,
                _ => return Err(value_error(out.len(), "expected decimal value")),
            };
            vlc::encode_i64(dec.exponent as i64, out);
            vlc::encode_i64(dec.mantissa, out);
        }
        _ if p.is_signed() => {
            let v = value.as_int().ok_or_else(|| value_error(out.len(), "expected signed integer value"))?;
            vlc::encode_i64(v, out);
        }
        _ => {
            let v = value.as_uint().ok_or_else(|| value_error(out.len(), "expected unsigned integer value"))?;
            vlc::encode_u64(v, out);
        }
    }
    Ok(())
}

fn encode_len_prefixed(bytes: &[u8], max_size: Option<u32>, out: &mut Vec<u8>) -> Result<(), BlinkError> {
    if let Some(max) = max_size {
        if bytes.len() as u32 > max {
            return Err(weak(out.len(), format!("value exceeds declared max size {max}")));
        }
    }
    vlc::encode_u64(bytes.len() as u64, out);
    out.extend_from_slice(bytes);
    Ok(())
}

fn check_polymorphism(registry: &Registry, actual: &QName, base: &QName, offset: usize) -> Result<(), BlinkError> {
    let actual_group = registry.get_by_name(actual)?;
    if registry.is_descendant_of(actual_group, base) {
        Ok(())
    } else {
        Err(weak(
            offset,
            format!("dynamic group value {actual} is not {base} or a descendant (W15)"),
        ))
    }
}

/// Decodes one Compact Binary frame starting at `buf[offset]`. Returns the
/// decoded [`Message`] and the offset just past the frame. Top-level type
/// ids not known to `registry` are a [`ErrorKind::ResolveError`] — reserved
/// schema-exchange ids (§4.8) are handled one layer up by
/// [`crate::dynschema::decode_stream_with_exchange`], not here.
pub fn decode_one(
    buf: &[u8],
    offset: usize,
    registry: &Registry,
    strict: Strictness,
) -> Result<(Message, usize), BlinkError> {
    let mut pos = offset;
    let length = match vlc::decode_u64(buf, &mut pos)? {
        Decoded::Value(v) => v as usize,
        Decoded::Null => return Err(framing(offset, "frame length cannot be NULL")),
    };
    let frame_start = pos;
    let frame_end = frame_start
        .checked_add(length)
        .filter(|&e| e <= buf.len())
        .ok_or_else(|| framing(offset, "frame length exceeds buffer"))?;

    let (msg, consumed) = decode_frame_body(&buf[frame_start..frame_end], frame_start, registry, strict)?;
    if frame_start + consumed != frame_end {
        return Err(framing(
            offset,
            format!(
                "frame body consumed {consumed} bytes, expected {} (length mismatch)",
                frame_end - frame_start
            ),
        ));
    }
    Ok((msg, frame_end))
}

/// Decodes `type_id + fields + extension` from `body` (a frame's bytes
/// after the `length` prefix). `base_offset` is `body`'s absolute position
/// in the original buffer, used only for locator reporting.
fn decode_frame_body(
    body: &[u8],
    base_offset: usize,
    registry: &Registry,
    strict: Strictness,
) -> Result<(Message, usize), BlinkError> {
    let mut pos = 0usize;
    let type_id = match vlc::decode_u64(body, &mut pos)? {
        Decoded::Value(v) => v,
        Decoded::Null => return Err(framing(base_offset, "type id cannot be NULL")),
    };
    let group = registry
        .get_by_id(type_id)
        .map_err(|_| framing(base_offset + pos, format!("unknown type id {type_id}")))?;

    let mut msg = Message::new(group.qname.clone());
    for field in &group.fields {
        let abs_offset = base_offset + pos;
        if let Some(value) = decode_field(&field.ty, field.optional, body, &mut pos, registry, strict, abs_offset)? {
            msg.fields.insert(field.name.clone(), value);
        }
    }

    if pos < body.len() {
        msg.extension = decode_extension(body, &mut pos, registry, strict, base_offset)?;
    }

    Ok((msg, pos))
}

fn decode_extension(
    body: &[u8],
    pos: &mut usize,
    registry: &Registry,
    strict: Strictness,
    base_offset: usize,
) -> Result<Vec<Message>, BlinkError> {
    let count = match vlc::decode_u64(body, pos)? {
        Decoded::Value(v) => v,
        Decoded::Null => return Ok(Vec::new()),
    };

    let mut out = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let elem_start = *pos;
        let length = match vlc::decode_u64(body, pos)? {
            Decoded::Value(v) => v as usize,
            Decoded::Null => return Err(framing(base_offset + elem_start, "extension length cannot be NULL")),
        };
        let elem_body_start = *pos;
        let elem_body_end = elem_body_start
            .checked_add(length)
            .filter(|&e| e <= body.len())
            .ok_or_else(|| framing(base_offset + elem_start, "extension frame length exceeds buffer"))?;

        match decode_frame_body(
            &body[elem_body_start..elem_body_end],
            base_offset + elem_body_start,
            registry,
            strict,
        ) {
            Ok((msg, consumed)) if elem_body_start + consumed == elem_body_end => out.push(msg),
            Ok(_) => return Err(framing(base_offset + elem_start, "extension element frame size mismatch")),
            Err(e) if e.kind == ErrorKind::FramingError && e.message.starts_with("unknown type id") => {
                // Unknown extension type id: skip using its length prefix
                // (§4.5.3). Strict mode still raises, as a weak error.
                recover(
                    strict,
                    BlinkError::weak(ErrorKind::WeakError, e.message.clone())
                        .at(Locator::ByteOffset(base_offset + elem_start)),
                    (),
                )?;
            }
            Err(e) => return Err(e),
        }
        *pos = elem_body_end;
    }
    Ok(out)
}

#[allow(clippy::too_many_arguments)]
fn decode_field(
    ty: &Type,
    optional: bool,
    buf: &[u8],
    pos: &mut usize,
    registry: &Registry,
    strict: Strictness,
    offset: usize,
) -> Result<Option<Value>, BlinkError> {
    match ty {
        Type::Primitive(p) => decode_primitive(*p, optional, buf, pos, strict, offset),
        Type::EnumRef(qname) => {
            match vlc::decode_i64(buf, pos)? {
                Decoded::Null => Ok(None),
                Decoded::Value(v) => {
                    let enum_def = registry.enum_def(qname)?;
                    let value = match i32::try_from(v) {
                        Ok(sym) if enum_def.symbol_of(sym).is_some() => v,
                        _ => recover(strict, weak(offset, format!("unmapped enum value {v} for {qname}")), v)?,
                    };
                    Ok(Some(Value::Int(value)))
                }
            }
        }
        Type::Str { max_size } => decode_len_prefixed(buf, pos, *max_size, strict, offset)?
            .map(|bytes| decode_string(bytes, strict, offset))
            .transpose(),
        Type::Binary { max_size } => {
            Ok(decode_len_prefixed(buf, pos, *max_size, strict, offset)?.map(Value::Bytes))
        }
        Type::Fixed { size } => decode_fixed(*size, optional, buf, pos, offset),
        Type::StaticGroupRef(qname) => decode_static_group(qname, optional, buf, pos, registry, strict, offset),
        Type::DynamicGroupRef(base) => {
            decode_dynamic_group(buf, pos, registry, strict, offset, Some(base))
        }
        Type::Object => decode_dynamic_group(buf, pos, registry, strict, offset, None),
        Type::Sequence(inner) => decode_sequence(inner, buf, pos, registry, strict, offset),
        Type::TypeDefRef(_) => unreachable!("resolver substitutes typedefs before codec sees them"),
    }
}

fn decode_primitive(
    p: crate::schema::Primitive,
    _optional: bool,
    buf: &[u8],
    pos: &mut usize,
    strict: Strictness,
    offset: usize,
) -> Result<Option<Value>, BlinkError> {
    use crate::schema::Primitive as P;
    match p {
        P::Bool => match vlc::decode_u64(buf, pos)? {
            Decoded::Null => Ok(None),
            Decoded::Value(v) => Ok(Some(Value::Bool(v != 0))),
        },
        P::F64 => match vlc::decode_u64(buf, pos)? {
            Decoded::Null => Ok(None),
            Decoded::Value(bits) => Ok(Some(Value::Float(f64::from_bits(bits)))),
        },
        P::Decimal => match vlc::decode_i64(buf, pos)? {
            Decoded::Null => Ok(None),
            Decoded::Value(exp) => {
                let exponent = i8::try_from(exp)
                    .map_err(|_| value_error(offset, format!("decimal exponent {exp} out of i8 range")))?;
                let mantissa = match vlc::decode_i64(buf, pos)? {
                    Decoded::Value(m) => m,
                    Decoded::Null => return Err(value_error(offset, "decimal mantissa cannot be NULL")),
                };
                Ok(Some(Value::Decimal(DecimalValue { exponent, mantissa })))
            }
        },
        _ if p.is_signed() => match vlc::decode_i64(buf, pos)? {
            Decoded::Null => Ok(None),
            Decoded::Value(v) => {
                let v = match vlc::check_signed_width(v, p.width_bits()) {
                    Ok(()) => v,
                    Err(e) => recover(strict, e.at(Locator::ByteOffset(offset)), v)?,
                };
                Ok(Some(Value::Int(v)))
            }
        },
        _ => match vlc::decode_u64(buf, pos)? {
            Decoded::Null => Ok(None),
            Decoded::Value(v) => {
                let v = match vlc::check_unsigned_width(v, p.width_bits()) {
                    Ok(()) => v,
                    Err(e) => recover(strict, e.at(Locator::ByteOffset(offset)), v)?,
                };
                Ok(Some(Value::UInt(v)))
            }
        },
    }
}

fn decode_string(bytes: Vec<u8>, strict: Strictness, offset: usize) -> Result<Value, BlinkError> {
    match String::from_utf8(bytes) {
        Ok(s) => Ok(Value::Str(s)),
        Err(e) => {
            let lossy = String::from_utf8_lossy(e.as_bytes()).into_owned();
            recover(strict, weak(offset, "invalid UTF-8 in string field"), Value::Str(lossy))
        }
    }
}

fn decode_len_prefixed(
    buf: &[u8],
    pos: &mut usize,
    max_size: Option<u32>,
    strict: Strictness,
    offset: usize,
) -> Result<Option<Vec<u8>>, BlinkError> {
    let len = match vlc::decode_u64(buf, pos)? {
        Decoded::Null => return Ok(None),
        Decoded::Value(v) => v as usize,
    };
    let start = *pos;
    let end = start
        .checked_add(len)
        .filter(|&e| e <= buf.len())
        .ok_or_else(|| framing(offset, "length-prefixed value exceeds buffer"))?;
    *pos = end;
    if let Some(max) = max_size {
        if len as u32 > max {
            recover(strict, weak(offset, format!("value exceeds declared max size {max}")), ())?;
        }
    }
    Ok(Some(buf[start..end].to_vec()))
}

fn decode_fixed(
    size: u32,
    optional: bool,
    buf: &[u8],
    pos: &mut usize,
    offset: usize,
) -> Result<Option<Value>, BlinkError> {
    if optional {
        let presence = *buf.get(*pos).ok_or_else(|| framing(offset, "truncated presence byte"))?;
        *pos += 1;
        if presence == PRESENCE_ABSENT {
            return Ok(None);
        }
        if presence != PRESENCE_PRESENT {
            return Err(framing(offset, format!("invalid presence byte {presence:#x}")));
        }
    }
    let start = *pos;
    let end = start
        .checked_add(size as usize)
        .filter(|&e| e <= buf.len())
        .ok_or_else(|| framing(offset, "fixed field exceeds buffer"))?;
    *pos = end;
    Ok(Some(Value::Bytes(buf[start..end].to_vec())))
}

fn decode_static_group(
    qname: &QName,
    optional: bool,
    buf: &[u8],
    pos: &mut usize,
    registry: &Registry,
    strict: Strictness,
    offset: usize,
) -> Result<Option<Value>, BlinkError> {
    if optional {
        let presence = *buf.get(*pos).ok_or_else(|| framing(offset, "truncated presence byte"))?;
        *pos += 1;
        if presence == PRESENCE_ABSENT {
            return Ok(None);
        }
        if presence != PRESENCE_PRESENT {
            return Err(framing(offset, format!("invalid presence byte {presence:#x}")));
        }
    }
    let group = registry.get_by_name(qname)?;
    let mut fields = FieldMap::new();
    for field in &group.fields {
        let abs = offset + *pos;
        if let Some(v) = decode_field(&field.ty, field.optional, buf, pos, registry, strict, abs)? {
            fields.insert(field.name.clone(), v);
        }
    }
    Ok(Some(Value::StaticGroup(StaticGroupValue { fields })))
}

fn decode_dynamic_group(
    buf: &[u8],
    pos: &mut usize,
    registry: &Registry,
    strict: Strictness,
    offset: usize,
    base: Option<&QName>,
) -> Result<Option<Value>, BlinkError> {
    let length = match vlc::decode_u64(buf, pos)? {
        Decoded::Null => return Ok(None),
        Decoded::Value(v) => v as usize,
    };
    let start = *pos;
    let end = start
        .checked_add(length)
        .filter(|&e| e <= buf.len())
        .ok_or_else(|| framing(offset, "nested frame length exceeds buffer"))?;
    let (msg, consumed) = decode_frame_body(&buf[start..end], offset, registry, strict)?;
    if start + consumed != end {
        return Err(framing(offset, "nested frame size mismatch"));
    }
    *pos = end;

    if let Some(base) = base {
        let actual_group = registry.get_by_name(&msg.ty)?;
        if !registry.is_descendant_of(actual_group, base) {
            recover(
                strict,
                weak(offset, format!("dynamic group value {} is not {base} or a descendant (W15)", msg.ty)),
                (),
            )?;
        }
    }

    Ok(Some(Value::Message(Box::new(msg))))
}

fn decode_sequence(
    inner: &Type,
    buf: &[u8],
    pos: &mut usize,
    registry: &Registry,
    strict: Strictness,
    offset: usize,
) -> Result<Option<Value>, BlinkError> {
    let count = match vlc::decode_u64(buf, pos)? {
        Decoded::Null => return Ok(None),
        Decoded::Value(v) => v,
    };
    let mut items = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let abs = offset + *pos;
        match decode_field(inner, false, buf, pos, registry, strict, abs)? {
            Some(v) => items.push(v),
            None => return Err(value_error(abs, "sequence element decoded as absent")),
        }
    }
    Ok(Some(Value::Sequence(items)))
}

/// Iterates over consecutive Compact Binary frames in `buf`.
pub fn decode_stream<'a>(
    buf: &'a [u8],
    registry: &'a Registry,
    strict: Strictness,
) -> impl Iterator<Item = Result<Message, BlinkError>> + 'a {
    let mut offset = 0usize;
    let mut done = false;
    std::iter::from_fn(move || {
        if done || offset >= buf.len() {
            return None;
        }
        match decode_one(buf, offset, registry, strict) {
            Ok((msg, next)) => {
                offset = next;
                Some(Ok(msg))
            }
            Err(e) => {
                done = true;
                Some(Err(e))
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::Registry;
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

        let mut manager = Message::new(QName::with_namespace("Demo", "Manager"));
        manager.fields.insert("Name", Value::Str("Alice".into()));
        manager.fields.insert("Age", Value::UInt(45));
        manager.fields.insert("HomeAddress", Value::StaticGroup(address));
        manager.fields.insert("Department", Value::Str("Engineering".into()));
        manager.fields.insert("TeamSize", Value::UInt(50));

        let mut company = Message::new(QName::with_namespace("Demo", "Company"));
        company.fields.insert("CompanyName", Value::Str("TechCorp".into()));
        company.fields.insert("CEO", Value::StaticGroup(message_to_static(manager)));
        company
    }

    fn message_to_static(msg: Message) -> StaticGroupValue {
        StaticGroupValue { fields: msg.fields }
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
    fn frame_self_length_matches_consumed_bytes() {
        let registry = demo_registry();
        let msg = seed_message();
        let bytes = encode(&msg, &registry).unwrap();
        let mut offset = 0;
        let length = match vlc::decode_u64(&bytes, &mut offset).unwrap() {
            Decoded::Value(v) => v as usize,
            Decoded::Null => panic!(),
        };
        assert_eq!(offset + length, bytes.len());
    }

    #[test]
    fn extension_roundtrips() {
        let registry = demo_registry();
        let mut msg = Message::new(QName::with_namespace("Demo", "Address"));
        msg.fields.insert("Street", Value::Str("1 A St".into()));
        msg.fields.insert("City", Value::Str("X".into()));
        msg.fields.insert("ZipCode", Value::UInt(1));

        let mut ext = Message::new(QName::with_namespace("Demo", "Address"));
        ext.fields.insert("Street", Value::Str("2 B St".into()));
        ext.fields.insert("City", Value::Str("Y".into()));
        ext.fields.insert("ZipCode", Value::UInt(2));
        msg.extension.push(ext);

        let bytes = encode(&msg, &registry).unwrap();
        let (decoded, _) = decode_one(&bytes, 0, &registry, Strictness::Strict).unwrap();
        assert_eq!(decoded.extension.len(), 1);
        assert_eq!(decoded, msg);
    }

    #[test]
    fn optional_field_absent_round_trips() {
        let schema = compile_schema("A/1 -> string Name?").unwrap();
        let registry = Registry::from_schema(schema);
        let msg = Message::new(QName::bare("A"));
        let bytes = encode(&msg, &registry).unwrap();
        let (decoded, _) = decode_one(&bytes, 0, &registry, Strictness::Strict).unwrap();
        assert!(decoded.fields.get("Name").is_none());
    }

    #[test]
    fn truncated_frame_is_strong_framing_error() {
        let registry = demo_registry();
        let msg = seed_message();
        let mut bytes = encode(&msg, &registry).unwrap();
        bytes.truncate(bytes.len() - 2);
        let err = decode_one(&bytes, 0, &registry, Strictness::Strict).unwrap_err();
        assert_eq!(err.kind, ErrorKind::FramingError);
    }

    #[test]
    fn dynamic_group_sibling_type_is_weak_error() {
        let schema = compile_schema(
            r#"
            Base/1 -> u32 X
            Other/3 -> u32 Z
            Holder/4 -> *Base Payload
        "#,
        )
        .unwrap();
        let registry = Registry::from_schema(schema);

        let mut sibling = Message::new(QName::bare("Other"));
        sibling.fields.insert("Z", Value::UInt(1));

        let mut holder = Message::new(QName::bare("Holder"));
        holder.fields.insert("Payload", Value::Message(Box::new(sibling)));

        let err = encode(&holder, &registry).unwrap_err();
        assert_eq!(err.kind, ErrorKind::WeakError);
    }

    #[test]
    fn decimal_null_has_no_mantissa() {
        let schema = compile_schema("A/1 -> decimal D?").unwrap();
        let registry = Registry::from_schema(schema);
        let msg = Message::new(QName::bare("A"));
        let bytes = encode(&msg, &registry).unwrap();
        // length, typeid, then a single NULL byte for D (no mantissa follows)
        assert!(bytes.ends_with(&[0xc0]));
        let (decoded, consumed) = decode_one(&bytes, 0, &registry, Strictness::Strict).unwrap();
        assert_eq!(consumed, bytes.len());
        assert!(decoded.fields.get("D").is_none());
    }
}
