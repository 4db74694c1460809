//! JSON codec (C9), §4.7.2. Builds/consumes [`serde_json::Value`] trees
//! rather than raw text, the idiomatic `serde_json` way of working with
//! ad hoc JSON shapes that don't map onto one fixed Rust struct.

use super::iso_time;
use super::Strictness;
use crate::error::{BlinkError, ErrorKind};
use crate::qname::QName;
use crate::registry::Registry;
use crate::schema::{FieldDef, Primitive, Type};
use crate::value::{DecimalValue, FieldMap, Message, StaticGroupValue, Value};
use serde_json::{json, Map, Number};

const INT_STRING_THRESHOLD: i64 = 1_000_000_000_000_000;

fn parse_error(message: impl Into<String>) -> BlinkError {
    BlinkError::strong(ErrorKind::ParseError, message)
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

fn int_or_string(v: i64) -> serde_json::Value {
    if v.unsigned_abs() < INT_STRING_THRESHOLD as u64 {
        json!(v)
    } else {
        json!(v.to_string())
    }
}

fn uint_or_string(v: u64) -> serde_json::Value {
    if v < INT_STRING_THRESHOLD as u64 {
        json!(v)
    } else {
        json!(v.to_string())
    }
}

fn parse_int_or_string(v: &serde_json::Value) -> Result<i64, BlinkError> {
    match v {
        serde_json::Value::Number(n) => n.as_i64().ok_or_else(|| parse_error("integer out of i64 range")),
        serde_json::Value::String(s) => s.parse().map_err(|_| parse_error(format!("invalid integer string '{s}'"))),
        _ => Err(parse_error("expected integer number or string")),
    }
}

fn parse_uint_or_string(v: &serde_json::Value) -> Result<u64, BlinkError> {
    match v {
        serde_json::Value::Number(n) => n.as_u64().ok_or_else(|| parse_error("integer out of u64 range")),
        serde_json::Value::String(s) => s.parse().map_err(|_| parse_error(format!("invalid integer string '{s}'"))),
        _ => Err(parse_error("expected integer number or string")),
    }
}

/// Folds a decimal's exponent into the emitted JSON number itself (rather
/// than only covering the `exponent == 0` case), per spec.md:222 — any
/// decimal with `|mantissa| < 1e15` serializes as a number. Returns `None`
/// when the value can't be represented as a finite JSON number, leaving the
/// caller to fall back to the `{"exponent", "mantissa"}` object form.
fn decimal_json_number(mantissa: i64, exponent: i8) -> Option<serde_json::Value> {
    let value = (mantissa as f64) * 10f64.powi(exponent as i32);
    Number::from_f64(value).map(serde_json::Value::Number)
}

/// Decomposes a JSON number back into `(mantissa, exponent)` by reading its
/// canonical decimal text rather than going through `f64` arithmetic, so
/// `5e-2` and `0.05` both decode to the same `DecimalValue`.
fn parse_decimal_number(n: &Number) -> Result<DecimalValue, BlinkError> {
    let text = n.to_string();
    let (digits_part, exp_part) = match text.split_once(['e', 'E']) {
        Some((d, e)) => (d, e.parse::<i32>().map_err(|_| parse_error(format!("invalid exponent in decimal number '{text}'")))?),
        None => (text.as_str(), 0),
    };
    let negative = digits_part.starts_with('-');
    let unsigned = digits_part.trim_start_matches('-');
    let (int_part, frac_part) = unsigned.split_once('.').unwrap_or((unsigned, ""));
    let mantissa_digits = format!("{int_part}{frac_part}");
    let mantissa: i64 = mantissa_digits
        .parse()
        .map_err(|_| parse_error(format!("invalid decimal number '{text}'")))?;
    let mantissa = if negative { -mantissa } else { mantissa };
    let exponent = exp_part - frac_part.len() as i32;
    let exponent: i8 = exponent
        .try_into()
        .map_err(|_| parse_error(format!("decimal exponent {exponent} out of range in '{text}'")))?;
    Ok(DecimalValue { exponent, mantissa })
}

/// Encodes `msg` as a JSON object (§4.7.2): `$type`, the declared fields in
/// order, and `$extension` when any extension messages are present.
pub fn encode(msg: &Message, registry: &Registry) -> Result<serde_json::Value, BlinkError> {
    let group = registry.get_by_name(&msg.ty)?;
    let mut map = Map::new();
    map.insert("$type".into(), json!(msg.ty.to_string()));
    for f in &group.fields {
        if let Some(v) = msg.fields.get(&f.name) {
            map.insert(f.name.clone(), encode_value(&f.ty, v, registry)?);
        }
    }
    if !msg.extension.is_empty() {
        let exts = msg
            .extension
            .iter()
            .map(|e| encode(e, registry))
            .collect::<Result<Vec<_>, _>>()?;
        map.insert("$extension".into(), serde_json::Value::Array(exts));
    }
    Ok(serde_json::Value::Object(map))
}

/// Encodes a message stream as a JSON array (§4.7.2, §6.4).
pub fn encode_stream(msgs: &[Message], registry: &Registry) -> Result<serde_json::Value, BlinkError> {
    let items = msgs.iter().map(|m| encode(m, registry)).collect::<Result<Vec<_>, _>>()?;
    Ok(serde_json::Value::Array(items))
}

fn encode_value(ty: &Type, value: &Value, registry: &Registry) -> Result<serde_json::Value, BlinkError> {
    match ty {
        Type::Primitive(Primitive::Bool) => {
            let Value::Bool(b) = value else { return Err(value_error("expected bool")) };
            Ok(json!(b))
        }
        Type::Primitive(Primitive::F64) => {
            let Value::Float(f) = value else { return Err(value_error("expected float")) };
            Ok(if f.is_nan() {
                json!("NaN")
            } else if f.is_infinite() {
                json!(if *f > 0.0 { "Inf" } else { "-Inf" })
            } else {
                serde_json::Value::Number(Number::from_f64(*f).ok_or_else(|| value_error("non-finite float"))?)
            })
        }
        Type::Primitive(Primitive::Decimal) => {
            let Value::Decimal(DecimalValue { exponent, mantissa }) = value else {
                return Err(value_error("expected decimal"));
            };
            if mantissa.unsigned_abs() < INT_STRING_THRESHOLD as u64 {
                match decimal_json_number(*mantissa, *exponent) {
                    Some(n) => Ok(n),
                    None => Ok(json!({"exponent": exponent, "mantissa": mantissa})),
                }
            } else {
                Ok(json!({"exponent": exponent, "mantissa": mantissa}))
            }
        }
        Type::Primitive(Primitive::Date) => {
            let v = value.as_int().ok_or_else(|| value_error("expected date integer"))?;
            Ok(json!(iso_time::format_date(v)))
        }
        Type::Primitive(Primitive::MilliTime) => {
            let v = value.as_int().ok_or_else(|| value_error("expected millitime integer"))?;
            Ok(json!(iso_time::format_millitime(v)))
        }
        Type::Primitive(Primitive::NanoTime) => {
            let v = value.as_int().ok_or_else(|| value_error("expected nanotime integer"))?;
            Ok(json!(iso_time::format_nanotime(v)))
        }
        Type::Primitive(Primitive::TimeOfDayMilli) => {
            let v = value.as_uint().ok_or_else(|| value_error("expected timeOfDayMilli integer"))?;
            Ok(json!(iso_time::format_time_of_day_milli(v as u32)))
        }
        Type::Primitive(Primitive::TimeOfDayNano) => {
            let v = value.as_uint().ok_or_else(|| value_error("expected timeOfDayNano integer"))?;
            Ok(json!(iso_time::format_time_of_day_nano(v)))
        }
        Type::Primitive(p) if p.is_signed() => {
            let v = value.as_int().ok_or_else(|| value_error("expected signed integer"))?;
            Ok(int_or_string(v))
        }
        Type::Primitive(_) => {
            let v = value.as_uint().ok_or_else(|| value_error("expected unsigned integer"))?;
            Ok(uint_or_string(v))
        }
        Type::EnumRef(qname) => {
            let v = value.as_int().ok_or_else(|| value_error("expected enum integer"))? as i32;
            let enum_def = registry.enum_def(qname)?;
            match enum_def.symbol_of(v) {
                Some(sym) => Ok(json!(sym)),
                None => Ok(json!(v)),
            }
        }
        Type::Str { .. } => {
            let s = value.as_str().ok_or_else(|| value_error("expected string"))?;
            Ok(json!(s))
        }
        Type::Binary { .. } | Type::Fixed { .. } => {
            let Value::Bytes(b) = value else { return Err(value_error("expected binary")) };
            match std::str::from_utf8(b) {
                Ok(s) => Ok(json!(s)),
                Err(_) => Ok(serde_json::Value::Array(b.iter().map(|byte| json!(format!("{byte:02x}"))).collect())),
            }
        }
        Type::StaticGroupRef(qname) => {
            let Value::StaticGroup(sg) = value else { return Err(value_error("expected static group")) };
            let group = registry.get_by_name(qname)?;
            encode_field_map(&group.fields, sg, registry)
        }
        Type::DynamicGroupRef(_) | Type::Object => {
            let Value::Message(inner) = value else { return Err(value_error("expected dynamic group message")) };
            encode(inner, registry)
        }
        Type::Sequence(inner) => {
            let Value::Sequence(items) = value else { return Err(value_error("expected sequence")) };
            let encoded = items.iter().map(|v| encode_value(inner, v, registry)).collect::<Result<Vec<_>, _>>()?;
            Ok(serde_json::Value::Array(encoded))
        }
        Type::TypeDefRef(_) => unreachable!("resolver substitutes typedefs before codec sees them"),
    }
}

fn encode_field_map(fields: &[FieldDef], sg: &StaticGroupValue, registry: &Registry) -> Result<serde_json::Value, BlinkError> {
    let mut map = Map::new();
    for f in fields {
        if let Some(v) = sg.fields.get(&f.name) {
            map.insert(f.name.clone(), encode_value(&f.ty, v, registry)?);
        }
    }
    Ok(serde_json::Value::Object(map))
}

/// Decodes one JSON message object into a [`Message`] (§4.7.2). `$type`
/// pins the concrete group name; every other key is a declared field or
/// (when present) `$extension`.
pub fn decode_one(value: &serde_json::Value, registry: &Registry, strict: Strictness) -> Result<Message, BlinkError> {
    let obj = value.as_object().ok_or_else(|| parse_error("message must be a JSON object"))?;
    let type_str = obj
        .get("$type")
        .and_then(|v| v.as_str())
        .ok_or_else(|| parse_error("message object missing '$type'"))?;
    let qname = parse_qname(type_str)?;
    let group = registry.get_by_name(&qname)?;

    let mut msg = Message::new(qname);
    for f in &group.fields {
        if let Some(v) = obj.get(&f.name) {
            if v.is_null() {
                continue;
            }
            msg.fields.insert(f.name.clone(), decode_value(&f.ty, v, registry, strict)?);
        }
    }
    if let Some(exts) = obj.get("$extension") {
        let arr = exts.as_array().ok_or_else(|| parse_error("'$extension' must be an array"))?;
        for e in arr {
            msg.extension.push(decode_one(e, registry, strict)?);
        }
    }
    Ok(msg)
}

/// Decodes a JSON array of message objects (§4.7.2, §6.4).
pub fn decode_stream(value: &serde_json::Value, registry: &Registry, strict: Strictness) -> Result<Vec<Message>, BlinkError> {
    let arr = value.as_array().ok_or_else(|| parse_error("message stream must be a JSON array"))?;
    arr.iter().map(|v| decode_one(v, registry, strict)).collect()
}

fn parse_qname(s: &str) -> Result<QName, BlinkError> {
    match s.split_once(':') {
        Some((ns, name)) => Ok(QName::with_namespace(ns, name)),
        None => Ok(QName::bare(s)),
    }
}

fn decode_value(ty: &Type, v: &serde_json::Value, registry: &Registry, strict: Strictness) -> Result<Value, BlinkError> {
    match ty {
        Type::Primitive(Primitive::Bool) => Ok(Value::Bool(v.as_bool().ok_or_else(|| parse_error("expected bool"))?)),
        Type::Primitive(Primitive::F64) => {
            let f = match v {
                serde_json::Value::String(s) => match s.as_str() {
                    "NaN" => f64::NAN,
                    "Inf" => f64::INFINITY,
                    "-Inf" => f64::NEG_INFINITY,
                    _ => return Err(parse_error(format!("invalid float string '{s}'"))),
                },
                serde_json::Value::Number(n) => n.as_f64().ok_or_else(|| parse_error("invalid float"))?,
                _ => return Err(parse_error("expected float number or string")),
            };
            Ok(Value::Float(f))
        }
        Type::Primitive(Primitive::Decimal) => {
            if let Some(obj) = v.as_object() {
                let exponent = obj.get("exponent").and_then(|e| e.as_i64()).ok_or_else(|| parse_error("decimal object missing exponent"))? as i8;
                let mantissa = obj.get("mantissa").and_then(|m| m.as_i64()).ok_or_else(|| parse_error("decimal object missing mantissa"))?;
                Ok(Value::Decimal(DecimalValue { exponent, mantissa }))
            } else {
                let serde_json::Value::Number(n) = v else {
                    return Err(parse_error("expected decimal number or object"));
                };
                Ok(Value::Decimal(parse_decimal_number(n)?))
            }
        }
        Type::Primitive(Primitive::Date) => {
            let s = v.as_str().ok_or_else(|| parse_error("expected date string"))?;
            Ok(Value::Int(iso_time::parse_date(s)?))
        }
        Type::Primitive(Primitive::MilliTime) => {
            let s = v.as_str().ok_or_else(|| parse_error("expected millitime string"))?;
            Ok(Value::Int(iso_time::parse_millitime(s)?))
        }
        Type::Primitive(Primitive::NanoTime) => {
            let s = v.as_str().ok_or_else(|| parse_error("expected nanotime string"))?;
            Ok(Value::Int(iso_time::parse_nanotime(s)?))
        }
        Type::Primitive(Primitive::TimeOfDayMilli) => {
            let s = v.as_str().ok_or_else(|| parse_error("expected timeOfDayMilli string"))?;
            Ok(Value::UInt(iso_time::parse_time_of_day_milli(s)? as u64))
        }
        Type::Primitive(Primitive::TimeOfDayNano) => {
            let s = v.as_str().ok_or_else(|| parse_error("expected timeOfDayNano string"))?;
            Ok(Value::UInt(iso_time::parse_time_of_day_nano(s)?))
        }
        Type::Primitive(p) if p.is_signed() => Ok(Value::Int(parse_int_or_string(v)?)),
        Type::Primitive(_) => Ok(Value::UInt(parse_uint_or_string(v)?)),
        Type::EnumRef(qname) => {
            let enum_def = registry.enum_def(qname)?;
            match v {
                serde_json::Value::String(s) => match enum_def.value_of(s) {
                    Some(val) => Ok(Value::Int(val as i64)),
                    None => Err(parse_error(format!("unknown enum symbol '{s}' for {qname}"))),
                },
                serde_json::Value::Number(n) => {
                    let val = n.as_i64().ok_or_else(|| parse_error("invalid enum value"))? as i32;
                    if enum_def.symbol_of(val).is_some() {
                        Ok(Value::Int(val as i64))
                    } else {
                        recover(strict, weak(format!("unmapped enum value {val} for {qname}")), Value::Int(val as i64))
                    }
                }
                _ => Err(parse_error("expected enum symbol string or integer")),
            }
        }
        Type::Str { .. } => Ok(Value::Str(v.as_str().ok_or_else(|| parse_error("expected string"))?.to_string())),
        Type::Binary { .. } | Type::Fixed { .. } => match v {
            serde_json::Value::String(s) => Ok(Value::Bytes(s.as_bytes().to_vec())),
            serde_json::Value::Array(arr) => {
                let mut bytes = Vec::new();
                for entry in arr {
                    let s = entry.as_str().ok_or_else(|| parse_error("binary array entries must be strings"))?;
                    for tok in s.split_whitespace() {
                        bytes.push(u8::from_str_radix(tok, 16).map_err(|_| parse_error(format!("invalid hex byte '{tok}'")))?);
                    }
                }
                Ok(Value::Bytes(bytes))
            }
            _ => Err(parse_error("expected binary string or hex-pair array")),
        },
        Type::StaticGroupRef(qname) => {
            let group = registry.get_by_name(qname)?;
            let obj = v.as_object().ok_or_else(|| parse_error("expected static group object"))?;
            Ok(Value::StaticGroup(StaticGroupValue {
                fields: decode_field_map(&group.fields, obj, registry, strict)?,
            }))
        }
        Type::DynamicGroupRef(base) => {
            let msg = decode_one(v, registry, strict)?;
            let actual_group = registry.get_by_name(&msg.ty)?;
            if !registry.is_descendant_of(actual_group, base) {
                recover(
                    strict,
                    weak(format!("dynamic group value {} is not {base} or a descendant (W15)", msg.ty)),
                    (),
                )?;
            }
            Ok(Value::Message(Box::new(msg)))
        }
        Type::Object => Ok(Value::Message(Box::new(decode_one(v, registry, strict)?))),
        Type::Sequence(inner) => {
            let arr = v.as_array().ok_or_else(|| parse_error("expected sequence array"))?;
            let items = arr.iter().map(|item| decode_value(inner, item, registry, strict)).collect::<Result<Vec<_>, _>>()?;
            Ok(Value::Sequence(items))
        }
        Type::TypeDefRef(_) => unreachable!("resolver substitutes typedefs before codec sees them"),
    }
}

fn decode_field_map(
    fields: &[FieldDef],
    obj: &Map<String, serde_json::Value>,
    registry: &Registry,
    strict: Strictness,
) -> Result<FieldMap, BlinkError> {
    let mut map = FieldMap::new();
    for f in fields {
        if let Some(v) = obj.get(&f.name) {
            if v.is_null() {
                continue;
            }
            map.insert(f.name.clone(), decode_value(&f.ty, v, registry, strict)?);
        }
    }
    Ok(map)
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
    fn seed_scenario_round_trips() {
        let registry = demo_registry();
        let msg = seed_message();
        let json = encode(&msg, &registry).unwrap();
        assert_eq!(json["$type"], "Demo:Company");
        assert_eq!(json["CEO"]["Name"], "Alice");
        let decoded = decode_one(&json, &registry, Strictness::Strict).unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn large_integers_serialize_as_strings() {
        let schema = compile_schema("A/1 -> u64 Big").unwrap();
        let registry = Registry::from_schema(schema);
        let mut msg = Message::new(QName::bare("A"));
        msg.fields.insert("Big", Value::UInt(2_000_000_000_000_000));
        let json = encode(&msg, &registry).unwrap();
        assert!(json["Big"].is_string());
        let decoded = decode_one(&json, &registry, Strictness::Strict).unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn small_integers_serialize_as_numbers() {
        let schema = compile_schema("A/1 -> u32 Small").unwrap();
        let registry = Registry::from_schema(schema);
        let mut msg = Message::new(QName::bare("A"));
        msg.fields.insert("Small", Value::UInt(42));
        let json = encode(&msg, &registry).unwrap();
        assert!(json["Small"].is_number());
    }

    #[test]
    fn float_specials_round_trip() {
        let schema = compile_schema("A/1 -> f64 F").unwrap();
        let registry = Registry::from_schema(schema);
        for value in [f64::NAN, f64::INFINITY, f64::NEG_INFINITY] {
            let mut msg = Message::new(QName::bare("A"));
            msg.fields.insert("F", Value::Float(value));
            let json = encode(&msg, &registry).unwrap();
            let decoded = decode_one(&json, &registry, Strictness::Strict).unwrap();
            let Some(Value::Float(got)) = decoded.fields.get("F") else { panic!("missing field") };
            if value.is_nan() {
                assert!(got.is_nan());
            } else {
                assert_eq!(*got, value);
            }
        }
    }

    #[test]
    fn small_mantissa_decimal_with_nonzero_exponent_serializes_as_number() {
        let schema = compile_schema("A/1 -> decimal D").unwrap();
        let registry = Registry::from_schema(schema);
        let mut msg = Message::new(QName::bare("A"));
        msg.fields.insert("D", Value::Decimal(DecimalValue { exponent: -2, mantissa: 5 }));
        let json = encode(&msg, &registry).unwrap();
        assert!(json["D"].is_number(), "expected plain number, got {:?}", json["D"]);
        let decoded = decode_one(&json, &registry, Strictness::Strict).unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn large_mantissa_decimal_serializes_as_object() {
        let schema = compile_schema("A/1 -> decimal D").unwrap();
        let registry = Registry::from_schema(schema);
        let mut msg = Message::new(QName::bare("A"));
        msg.fields.insert("D", Value::Decimal(DecimalValue { exponent: 0, mantissa: 2_000_000_000_000_000 }));
        let json = encode(&msg, &registry).unwrap();
        assert!(json["D"].is_object());
        let decoded = decode_one(&json, &registry, Strictness::Strict).unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn binary_falls_back_to_hex_pairs_for_non_utf8() {
        let schema = compile_schema("A/1 -> fixed(2) B").unwrap();
        let registry = Registry::from_schema(schema);
        let mut msg = Message::new(QName::bare("A"));
        msg.fields.insert("B", Value::Bytes(vec![0xff, 0xfe]));
        let json = encode(&msg, &registry).unwrap();
        assert!(json["B"].is_array());
        let decoded = decode_one(&json, &registry, Strictness::Strict).unwrap();
        assert_eq!(decoded, msg);
    }
}
