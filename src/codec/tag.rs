//! Tag text codec (C8), §4.7.1: one human-readable message per line.
//!
//! `@Namespace:Name|field=value|field=value|[ext1;ext2]`. Static and dynamic
//! group values nest as `{field=value,...}`; dynamic ones carry an extra
//! leading `$type=Ns:Name` key so the concrete type survives the round
//! trip, mirroring the `$type` convention the JSON codec uses for the same
//! purpose. Sequences nest as `[item1;item2;...]`.

use super::iso_time;
use super::Strictness;
use crate::error::{BlinkError, ErrorKind};
use crate::qname::QName;
use crate::registry::Registry;
use crate::schema::{FieldDef, Primitive, Type};
use crate::value::{DecimalValue, FieldMap, Message, StaticGroupValue, Value};

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

fn is_reserved(c: char) -> bool {
    matches!(c, '|' | '[' | ']' | '{' | '}' | ';' | '#' | '\\')
}

fn escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            c if is_reserved(c) => out.push_str(&format!("\\x{:02x}", c as u32)),
            c => out.push(c),
        }
    }
    out
}

fn unescape(s: &str) -> Result<String, BlinkError> {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('\\') => out.push('\\'),
            Some('x') => {
                let hex: String = chars.by_ref().take(2).collect();
                let byte = u8::from_str_radix(&hex, 16).map_err(|_| parse_error("invalid \\xNN escape"))?;
                out.push(byte as char);
            }
            Some('u') => {
                let hex: String = chars.by_ref().take(4).collect();
                let code = u32::from_str_radix(&hex, 16).map_err(|_| parse_error("invalid \\uXXXX escape"))?;
                out.push(char::from_u32(code).ok_or_else(|| parse_error("invalid \\uXXXX code point"))?);
            }
            Some('U') => {
                let hex: String = chars.by_ref().take(8).collect();
                let code = u32::from_str_radix(&hex, 16).map_err(|_| parse_error("invalid \\UXXXXXXXX escape"))?;
                out.push(char::from_u32(code).ok_or_else(|| parse_error("invalid \\UXXXXXXXX code point"))?);
            }
            _ => return Err(parse_error("dangling escape at end of token")),
        }
    }
    Ok(out)
}

fn hex_bytes(bytes: &[u8]) -> String {
    let mut s = String::from("[");
    for (i, b) in bytes.iter().enumerate() {
        if i > 0 {
            s.push(' ');
        }
        s.push_str(&format!("{b:02x}"));
    }
    s.push(']');
    s
}

fn parse_hex_bytes(s: &str) -> Result<Vec<u8>, BlinkError> {
    let inner = s
        .strip_prefix('[')
        .and_then(|s| s.strip_suffix(']'))
        .ok_or_else(|| parse_error("binary value must be bracketed hex"))?;
    inner
        .split_whitespace()
        .map(|tok| u8::from_str_radix(tok, 16).map_err(|_| parse_error(format!("invalid hex byte '{tok}'"))))
        .collect()
}

/// Splits `s` on `sep` at bracket-depth zero, respecting `[...]`/`{...}`
/// nesting and backslash escapes, so separators inside nested structures or
/// escaped text are not mistaken for top-level delimiters.
fn split_top_level(s: &str, sep: char) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut depth = 0i32;
    let mut escaped = false;
    for c in s.chars() {
        if escaped {
            current.push(c);
            escaped = false;
            continue;
        }
        match c {
            '\\' => {
                current.push(c);
                escaped = true;
            }
            '[' | '{' => {
                depth += 1;
                current.push(c);
            }
            ']' | '}' => {
                depth -= 1;
                current.push(c);
            }
            c if c == sep && depth == 0 => {
                parts.push(std::mem::take(&mut current));
            }
            c => current.push(c),
        }
    }
    parts.push(current);
    parts
}

/// Encodes `msg` as a single Tag text line (no trailing newline).
pub fn encode(msg: &Message, registry: &Registry) -> Result<String, BlinkError> {
    let group = registry.get_by_name(&msg.ty)?;
    let mut out = format!("@{}", msg.ty);
    for f in &group.fields {
        if let Some(v) = msg.fields.get(&f.name) {
            out.push('|');
            out.push_str(&f.name);
            out.push('=');
            out.push_str(&encode_value(&f.ty, v, registry)?);
        }
    }
    if !msg.extension.is_empty() {
        out.push_str("|[");
        for (i, ext) in msg.extension.iter().enumerate() {
            if i > 0 {
                out.push(';');
            }
            out.push_str(&encode_message_body(ext, registry)?);
        }
        out.push(']');
    }
    Ok(out)
}

fn encode_message_body(msg: &Message, registry: &Registry) -> Result<String, BlinkError> {
    // Same as `encode` without the leading '@' sigil line-start convention;
    // extension elements are still written as full `@Ns:Name|...` tokens so
    // they parse identically to top-level lines.
    encode(msg, registry)
}

fn encode_value(ty: &Type, value: &Value, registry: &Registry) -> Result<String, BlinkError> {
    match ty {
        Type::Primitive(Primitive::Bool) => {
            let Value::Bool(b) = value else { return Err(value_error("expected bool")) };
            Ok(if *b { "Y".into() } else { "N".into() })
        }
        Type::Primitive(Primitive::F64) => {
            let Value::Float(f) = value else { return Err(value_error("expected float")) };
            Ok(if f.is_nan() {
                "NaN".into()
            } else if f.is_infinite() {
                if *f > 0.0 { "Inf".into() } else { "-Inf".into() }
            } else {
                f.to_string()
            })
        }
        Type::Primitive(Primitive::Decimal) => {
            let Value::Decimal(DecimalValue { exponent, mantissa }) = value else {
                return Err(value_error("expected decimal"));
            };
            Ok(format!("{mantissa}e{exponent}"))
        }
        Type::Primitive(Primitive::Date) => {
            let v = value.as_int().ok_or_else(|| value_error("expected date integer"))?;
            Ok(iso_time::format_date(v))
        }
        Type::Primitive(Primitive::MilliTime) => {
            let v = value.as_int().ok_or_else(|| value_error("expected millitime integer"))?;
            Ok(iso_time::format_millitime(v))
        }
        Type::Primitive(Primitive::NanoTime) => {
            let v = value.as_int().ok_or_else(|| value_error("expected nanotime integer"))?;
            Ok(iso_time::format_nanotime(v))
        }
        Type::Primitive(Primitive::TimeOfDayMilli) => {
            let v = value.as_uint().ok_or_else(|| value_error("expected timeOfDayMilli integer"))?;
            Ok(iso_time::format_time_of_day_milli(v as u32))
        }
        Type::Primitive(Primitive::TimeOfDayNano) => {
            let v = value.as_uint().ok_or_else(|| value_error("expected timeOfDayNano integer"))?;
            Ok(iso_time::format_time_of_day_nano(v))
        }
        Type::Primitive(p) if p.is_signed() => {
            let v = value.as_int().ok_or_else(|| value_error("expected signed integer"))?;
            Ok(v.to_string())
        }
        Type::Primitive(_) => {
            let v = value.as_uint().ok_or_else(|| value_error("expected unsigned integer"))?;
            Ok(v.to_string())
        }
        Type::EnumRef(qname) => {
            let v = value.as_int().ok_or_else(|| value_error("expected enum integer"))? as i32;
            let enum_def = registry.enum_def(qname)?;
            match enum_def.symbol_of(v) {
                Some(sym) => Ok(escape(sym)),
                None => Ok(v.to_string()),
            }
        }
        Type::Str { .. } => {
            let s = value.as_str().ok_or_else(|| value_error("expected string"))?;
            Ok(escape(s))
        }
        Type::Binary { .. } => {
            let Value::Bytes(b) = value else { return Err(value_error("expected binary")) };
            Ok(hex_bytes(b))
        }
        Type::Fixed { .. } => {
            let Value::Bytes(b) = value else { return Err(value_error("expected fixed binary")) };
            Ok(hex_bytes(b))
        }
        Type::StaticGroupRef(qname) => {
            let Value::StaticGroup(sg) = value else { return Err(value_error("expected static group")) };
            let group = registry.get_by_name(qname)?;
            encode_static_group_literal(&group.fields, sg, registry)
        }
        Type::DynamicGroupRef(_) | Type::Object => {
            let Value::Message(inner) = value else { return Err(value_error("expected dynamic group message")) };
            let group = registry.get_by_name(&inner.ty)?;
            let mut s = format!("{{$type={}", inner.ty);
            for f in &group.fields {
                if let Some(v) = inner.fields.get(&f.name) {
                    s.push(',');
                    s.push_str(&f.name);
                    s.push('=');
                    s.push_str(&encode_value(&f.ty, v, registry)?);
                }
            }
            s.push('}');
            Ok(s)
        }
        Type::Sequence(inner) => {
            let Value::Sequence(items) = value else { return Err(value_error("expected sequence")) };
            let mut s = String::from("[");
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    s.push(';');
                }
                s.push_str(&encode_value(inner, item, registry)?);
            }
            s.push(']');
            Ok(s)
        }
        Type::TypeDefRef(_) => unreachable!("resolver substitutes typedefs before codec sees them"),
    }
}

fn encode_static_group_literal(fields: &[FieldDef], sg: &StaticGroupValue, registry: &Registry) -> Result<String, BlinkError> {
    let mut s = String::from("{");
    let mut first = true;
    for f in fields {
        if let Some(v) = sg.fields.get(&f.name) {
            if !first {
                s.push(',');
            }
            first = false;
            s.push_str(&f.name);
            s.push('=');
            s.push_str(&encode_value(&f.ty, v, registry)?);
        }
    }
    s.push('}');
    Ok(s)
}

/// Decodes a single Tag line into a [`Message`].
pub fn decode_one(line: &str, registry: &Registry, strict: Strictness) -> Result<Message, BlinkError> {
    let line = line.trim_end_matches(['\r', '\n']);
    let rest = line.strip_prefix('@').ok_or_else(|| parse_error("Tag message must start with '@'"))?;
    let parts = split_top_level(rest, '|');
    let mut parts = parts.into_iter();
    let qname_str = parts.next().ok_or_else(|| parse_error("missing type name"))?;
    let qname = parse_qname(&qname_str)?;
    let group = registry.get_by_name(&qname)?;

    let mut msg = Message::new(qname);
    for part in parts {
        if let Some(ext_list) = part.strip_prefix('[').and_then(|s| s.strip_suffix(']')) {
            for ext_tok in split_top_level(ext_list, ';') {
                if ext_tok.is_empty() {
                    continue;
                }
                msg.extension.push(decode_one(&ext_tok, registry, strict)?);
            }
            continue;
        }
        let (name, value_str) = part
            .split_once('=')
            .ok_or_else(|| parse_error(format!("malformed field token '{part}'")))?;
        let field = group
            .field(name)
            .ok_or_else(|| parse_error(format!("unknown field '{name}' on {}", msg.ty)))?;
        let value = decode_value(&field.ty, value_str, registry, strict)?;
        msg.fields.insert(name, value);
    }
    Ok(msg)
}

fn parse_qname(s: &str) -> Result<QName, BlinkError> {
    match s.split_once(':') {
        Some((ns, name)) => Ok(QName::with_namespace(ns, name)),
        None => Ok(QName::bare(s)),
    }
}

fn decode_value(ty: &Type, s: &str, registry: &Registry, strict: Strictness) -> Result<Value, BlinkError> {
    match ty {
        Type::Primitive(Primitive::Bool) => match s {
            "Y" => Ok(Value::Bool(true)),
            "N" => Ok(Value::Bool(false)),
            _ => Err(parse_error(format!("invalid bool literal '{s}'"))),
        },
        Type::Primitive(Primitive::F64) => {
            let f = match s {
                "NaN" => f64::NAN,
                "Inf" => f64::INFINITY,
                "-Inf" => f64::NEG_INFINITY,
                _ => s.parse().map_err(|_| parse_error(format!("invalid float '{s}'")))?,
            };
            Ok(Value::Float(f))
        }
        Type::Primitive(Primitive::Decimal) => {
            let (mantissa_str, exponent_str) = s
                .split_once('e')
                .ok_or_else(|| parse_error(format!("invalid decimal literal '{s}'")))?;
            let mantissa = mantissa_str.parse().map_err(|_| parse_error("invalid decimal mantissa"))?;
            let exponent = exponent_str.parse().map_err(|_| parse_error("invalid decimal exponent"))?;
            Ok(Value::Decimal(DecimalValue { exponent, mantissa }))
        }
        Type::Primitive(Primitive::Date) => Ok(Value::Int(iso_time::parse_date(s)?)),
        Type::Primitive(Primitive::MilliTime) => Ok(Value::Int(iso_time::parse_millitime(s)?)),
        Type::Primitive(Primitive::NanoTime) => Ok(Value::Int(iso_time::parse_nanotime(s)?)),
        Type::Primitive(Primitive::TimeOfDayMilli) => Ok(Value::UInt(iso_time::parse_time_of_day_milli(s)? as u64)),
        Type::Primitive(Primitive::TimeOfDayNano) => Ok(Value::UInt(iso_time::parse_time_of_day_nano(s)?)),
        Type::Primitive(p) if p.is_signed() => {
            let v: i64 = s.parse().map_err(|_| parse_error(format!("invalid integer '{s}'")))?;
            Ok(Value::Int(v))
        }
        Type::Primitive(_) => {
            let v: u64 = s.parse().map_err(|_| parse_error(format!("invalid integer '{s}'")))?;
            Ok(Value::UInt(v))
        }
        Type::EnumRef(qname) => {
            let enum_def = registry.enum_def(qname)?;
            if let Some(v) = enum_def.value_of(&unescape(s)?) {
                Ok(Value::Int(v as i64))
            } else {
                let v: i32 = s.parse().map_err(|_| parse_error(format!("unknown enum symbol '{s}'")))?;
                recover(strict, weak(format!("unmapped enum value {v} for {qname}")), Value::Int(v as i64))
            }
        }
        Type::Str { .. } => Ok(Value::Str(unescape(s)?)),
        Type::Binary { .. } | Type::Fixed { .. } => Ok(Value::Bytes(parse_hex_bytes(s)?)),
        Type::StaticGroupRef(qname) => {
            let group = registry.get_by_name(qname)?;
            let inner = s
                .strip_prefix('{')
                .and_then(|s| s.strip_suffix('}'))
                .ok_or_else(|| parse_error("static group literal must be brace-wrapped"))?;
            let fields = decode_field_list(inner, &group.fields, registry, strict)?;
            Ok(Value::StaticGroup(StaticGroupValue { fields }))
        }
        Type::DynamicGroupRef(base) => {
            let msg = decode_dynamic_literal(s, registry, strict)?;
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
        Type::Object => {
            let msg = decode_dynamic_literal(s, registry, strict)?;
            Ok(Value::Message(Box::new(msg)))
        }
        Type::Sequence(inner) => {
            let list = s
                .strip_prefix('[')
                .and_then(|s| s.strip_suffix(']'))
                .ok_or_else(|| parse_error("sequence literal must be bracket-wrapped"))?;
            let mut items = Vec::new();
            for tok in split_top_level(list, ';') {
                if tok.is_empty() && list.is_empty() {
                    continue;
                }
                items.push(decode_value(inner, &tok, registry, strict)?);
            }
            Ok(Value::Sequence(items))
        }
        Type::TypeDefRef(_) => unreachable!("resolver substitutes typedefs before codec sees them"),
    }
}

fn decode_dynamic_literal(s: &str, registry: &Registry, strict: Strictness) -> Result<Message, BlinkError> {
    let inner = s
        .strip_prefix('{')
        .and_then(|s| s.strip_suffix('}'))
        .ok_or_else(|| parse_error("dynamic group literal must be brace-wrapped"))?;
    let tokens = split_top_level(inner, ',');
    let mut tokens = tokens.into_iter();
    let type_tok = tokens.next().ok_or_else(|| parse_error("dynamic group literal missing $type"))?;
    let (key, type_name) = type_tok
        .split_once('=')
        .ok_or_else(|| parse_error("dynamic group literal missing $type"))?;
    if key != "$type" {
        return Err(parse_error("dynamic group literal must begin with $type"));
    }
    let qname = parse_qname(type_name)?;
    let group = registry.get_by_name(&qname)?;
    let mut msg = Message::new(qname);
    for tok in tokens {
        if tok.is_empty() {
            continue;
        }
        let (name, value_str) = tok
            .split_once('=')
            .ok_or_else(|| parse_error(format!("malformed field token '{tok}'")))?;
        let field = group
            .field(name)
            .ok_or_else(|| parse_error(format!("unknown field '{name}' on {}", msg.ty)))?;
        msg.fields.insert(name, decode_value(&field.ty, value_str, registry, strict)?);
    }
    Ok(msg)
}

fn decode_field_list(s: &str, fields: &[FieldDef], registry: &Registry, strict: Strictness) -> Result<FieldMap, BlinkError> {
    let mut map = FieldMap::new();
    for tok in split_top_level(s, ',') {
        if tok.is_empty() {
            continue;
        }
        let (name, value_str) = tok
            .split_once('=')
            .ok_or_else(|| parse_error(format!("malformed field token '{tok}'")))?;
        let field = fields
            .iter()
            .find(|f| f.name == name)
            .ok_or_else(|| parse_error(format!("unknown field '{name}'")))?;
        map.insert(name, decode_value(&field.ty, value_str, registry, strict)?);
    }
    Ok(map)
}

/// Decodes a multi-line Tag stream, one message per non-empty line.
pub fn decode_stream<'a>(text: &'a str, registry: &'a Registry, strict: Strictness) -> impl Iterator<Item = Result<Message, BlinkError>> + 'a {
    text.lines().filter(|l| !l.trim().is_empty()).map(move |line| decode_one(line, registry, strict))
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
    fn seed_scenario_matches_spec_rendering() {
        let registry = demo_registry();
        let msg = seed_message();
        let line = encode(&msg, &registry).unwrap();
        assert_eq!(
            line,
            "@Demo:Company|CompanyName=TechCorp|CEO={Name=Alice,Age=45,\
HomeAddress={Street=123 Main St,City=San Francisco,ZipCode=94102},\
Department=Engineering,TeamSize=50}"
        );
        let decoded = decode_one(&line, &registry, Strictness::Strict).unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn reserved_characters_round_trip_in_strings() {
        let schema = compile_schema("A/1 -> string S").unwrap();
        let registry = Registry::from_schema(schema);
        let mut msg = Message::new(QName::bare("A"));
        msg.fields.insert("S", Value::Str("a|b[c]d{e}f;g#h\\i".into()));
        let line = encode(&msg, &registry).unwrap();
        let decoded = decode_one(&line, &registry, Strictness::Strict).unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn bool_literals_are_y_and_n() {
        let schema = compile_schema("A/1 -> bool Flag").unwrap();
        let registry = Registry::from_schema(schema);
        let mut msg = Message::new(QName::bare("A"));
        msg.fields.insert("Flag", Value::Bool(true));
        assert_eq!(encode(&msg, &registry).unwrap(), "@A|Flag=Y");
    }

    #[test]
    fn extension_round_trips() {
        let schema = compile_schema(
            r#"
            Base/1 -> u32 X
            Other/2 -> string Y
        "#,
        )
        .unwrap();
        let registry = Registry::from_schema(schema);
        let mut msg = Message::new(QName::bare("Base"));
        msg.fields.insert("X", Value::UInt(7));
        let mut ext = Message::new(QName::bare("Other"));
        ext.fields.insert("Y", Value::Str("hi".into()));
        msg.extension.push(ext);

        let line = encode(&msg, &registry).unwrap();
        let decoded = decode_one(&line, &registry, Strictness::Strict).unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn binary_renders_as_hex_brackets() {
        let schema = compile_schema("A/1 -> fixed(3) B").unwrap();
        let registry = Registry::from_schema(schema);
        let mut msg = Message::new(QName::bare("A"));
        msg.fields.insert("B", Value::Bytes(vec![0x3e, 0x6d, 0x4a]));
        assert_eq!(encode(&msg, &registry).unwrap(), "@A|B=[3e 6d 4a]");
    }
}
