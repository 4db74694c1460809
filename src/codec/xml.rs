//! XML codec (C10), §4.7.3: group local name as element name, Blink
//! namespace literal as the element's XML namespace, extension elements
//! under the fixed Blink namespace with prefix `blink`.

use super::iso_time;
use super::Strictness;
use crate::error::{BlinkError, ErrorKind};
use crate::qname::QName;
use crate::registry::Registry;
use crate::schema::{FieldDef, Primitive, Type};
use crate::value::{DecimalValue, FieldMap, Message, StaticGroupValue, Value};
use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event};
use quick_xml::reader::Reader;
use quick_xml::writer::Writer;
use std::io::Cursor;

const BLINK_EXTENSION_NS: &str = "http://blinkprotocol.org/ns/blink";

fn parse_error(message: impl Into<String>) -> BlinkError {
    BlinkError::strong(ErrorKind::ParseError, message)
}

fn value_error(message: impl Into<String>) -> BlinkError {
    BlinkError::strong(ErrorKind::ValueError, message)
}

fn framing(message: impl Into<String>) -> BlinkError {
    BlinkError::strong(ErrorKind::FramingError, message)
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

/// Assigns stable `ns0`, `ns1`, ... prefixes to every distinct namespace
/// literal encountered, in first-use order, so a single prefix table can be
/// declared once on the outermost element.
struct NamespaceTable {
    order: Vec<String>,
}

impl NamespaceTable {
    fn new() -> Self {
        NamespaceTable { order: Vec::new() }
    }

    fn prefix_for(&mut self, namespace: &str) -> String {
        if let Some(idx) = self.order.iter().position(|ns| ns == namespace) {
            format!("ns{idx}")
        } else {
            self.order.push(namespace.to_string());
            format!("ns{}", self.order.len() - 1)
        }
    }
}

fn escape_xml_text(s: &str) -> String {
    s.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;")
}

fn escape_xml_attr(s: &str) -> String {
    escape_xml_text(s).replace('"', "&quot;")
}

/// Encodes `msg` as a standalone XML document (§4.7.3).
pub fn encode(msg: &Message, registry: &Registry) -> Result<String, BlinkError> {
    let mut table = NamespaceTable::new();
    let mut buf = Vec::new();
    let mut writer = Writer::new(Cursor::new(&mut buf));
    write_message(&mut writer, msg, registry, &mut table, true)?;
    String::from_utf8(buf).map_err(|e| value_error(format!("encoder produced invalid UTF-8: {e}")))
}

/// Encodes a message stream wrapped in a single root element (§4.7.3, §6.4).
pub fn encode_stream(msgs: &[Message], registry: &Registry, root_name: &str) -> Result<String, BlinkError> {
    let mut table = NamespaceTable::new();
    let mut buf = Vec::new();
    let mut writer = Writer::new(Cursor::new(&mut buf));
    let root = BytesStart::new(root_name);
    writer.write_event(Event::Start(root.clone())).map_err(|e| value_error(e.to_string()))?;
    for msg in msgs {
        write_message(&mut writer, msg, registry, &mut table, false)?;
    }
    writer
        .write_event(Event::End(BytesEnd::new(root_name)))
        .map_err(|e| value_error(e.to_string()))?;
    String::from_utf8(buf).map_err(|e| value_error(format!("encoder produced invalid UTF-8: {e}")))
}

fn write_message<W: std::io::Write>(
    writer: &mut Writer<W>,
    msg: &Message,
    registry: &Registry,
    table: &mut NamespaceTable,
    declare_namespaces: bool,
) -> Result<(), BlinkError> {
    let group = registry.get_by_name(&msg.ty)?;
    let tag = element_tag(&msg.ty, table);
    let mut start = BytesStart::new(tag.clone());
    if declare_namespaces {
        if let Some(ns) = &msg.ty.namespace {
            let prefix = table.prefix_for(ns);
            start.push_attribute((format!("xmlns:{prefix}").as_str(), ns.as_str()));
        }
        if !msg.extension.is_empty() {
            start.push_attribute(("xmlns:blink", BLINK_EXTENSION_NS));
        }
    }
    writer.write_event(Event::Start(start)).map_err(|e| value_error(e.to_string()))?;

    for f in &group.fields {
        if let Some(v) = msg.fields.get(&f.name) {
            write_field(writer, &f.name, &f.ty, v, registry, table)?;
        }
    }
    for ext in &msg.extension {
        write_extension(writer, ext, registry, table)?;
    }

    writer
        .write_event(Event::End(BytesEnd::new(tag)))
        .map_err(|e| value_error(e.to_string()))?;
    Ok(())
}

fn write_extension<W: std::io::Write>(
    writer: &mut Writer<W>,
    ext: &Message,
    registry: &Registry,
    table: &mut NamespaceTable,
) -> Result<(), BlinkError> {
    let group = registry.get_by_name(&ext.ty)?;
    let local = format!("blink:{}", ext.ty.name);
    let mut start = BytesStart::new(local.clone());
    if let Some(ns) = &ext.ty.namespace {
        let prefix = table.prefix_for(ns);
        start.push_attribute((format!("xmlns:{prefix}").as_str(), ns.as_str()));
    }
    writer.write_event(Event::Start(start)).map_err(|e| value_error(e.to_string()))?;
    for f in &group.fields {
        if let Some(v) = ext.fields.get(&f.name) {
            write_field(writer, &f.name, &f.ty, v, registry, table)?;
        }
    }
    writer.write_event(Event::End(BytesEnd::new(local))).map_err(|e| value_error(e.to_string()))?;
    Ok(())
}

fn element_tag(qname: &QName, table: &mut NamespaceTable) -> String {
    match &qname.namespace {
        Some(ns) => format!("{}:{}", table.prefix_for(ns), qname.name),
        None => qname.name.clone(),
    }
}

fn write_field<W: std::io::Write>(
    writer: &mut Writer<W>,
    name: &str,
    ty: &Type,
    value: &Value,
    registry: &Registry,
    table: &mut NamespaceTable,
) -> Result<(), BlinkError> {
    match ty {
        Type::Sequence(inner) => {
            let Value::Sequence(items) = value else { return Err(value_error("expected sequence")) };
            for item in items {
                write_field(writer, name, inner, item, registry, table)?;
            }
            Ok(())
        }
        Type::StaticGroupRef(qname) => {
            let Value::StaticGroup(sg) = value else { return Err(value_error("expected static group")) };
            let group = registry.get_by_name(qname)?;
            writer
                .write_event(Event::Start(BytesStart::new(name)))
                .map_err(|e| value_error(e.to_string()))?;
            for f in &group.fields {
                if let Some(v) = sg.fields.get(&f.name) {
                    write_field(writer, &f.name, &f.ty, v, registry, table)?;
                }
            }
            writer.write_event(Event::End(BytesEnd::new(name))).map_err(|e| value_error(e.to_string()))?;
            Ok(())
        }
        Type::DynamicGroupRef(_) | Type::Object => {
            let Value::Message(inner) = value else { return Err(value_error("expected dynamic group message")) };
            writer
                .write_event(Event::Start(BytesStart::new(name)))
                .map_err(|e| value_error(e.to_string()))?;
            write_message(writer, inner, registry, table, false)?;
            writer.write_event(Event::End(BytesEnd::new(name))).map_err(|e| value_error(e.to_string()))?;
            Ok(())
        }
        Type::Binary { .. } | Type::Fixed { .. } => {
            let Value::Bytes(bytes) = value else { return Err(value_error("expected binary")) };
            let mut start = BytesStart::new(name);
            let text = match std::str::from_utf8(bytes) {
                Ok(s) => escape_xml_text(s),
                Err(_) => {
                    start.push_attribute(("binary", "yes"));
                    bytes.iter().map(|b| format!("{b:02x}")).collect::<String>()
                }
            };
            writer.write_event(Event::Start(start)).map_err(|e| value_error(e.to_string()))?;
            writer
                .write_event(Event::Text(BytesText::from_escaped(text)))
                .map_err(|e| value_error(e.to_string()))?;
            writer.write_event(Event::End(BytesEnd::new(name))).map_err(|e| value_error(e.to_string()))?;
            Ok(())
        }
        _ => {
            let text = escape_xml_text(&render_scalar(ty, value, registry)?);
            writer.write_event(Event::Start(BytesStart::new(name))).map_err(|e| value_error(e.to_string()))?;
            writer
                .write_event(Event::Text(BytesText::from_escaped(text)))
                .map_err(|e| value_error(e.to_string()))?;
            writer.write_event(Event::End(BytesEnd::new(name))).map_err(|e| value_error(e.to_string()))?;
            Ok(())
        }
    }
}

fn render_scalar(ty: &Type, value: &Value, registry: &Registry) -> Result<String, BlinkError> {
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
        Type::Primitive(Primitive::Date) => Ok(iso_time::format_date(value.as_int().ok_or_else(|| value_error("expected date"))?)),
        Type::Primitive(Primitive::MilliTime) => {
            Ok(iso_time::format_millitime(value.as_int().ok_or_else(|| value_error("expected millitime"))?))
        }
        Type::Primitive(Primitive::NanoTime) => {
            Ok(iso_time::format_nanotime(value.as_int().ok_or_else(|| value_error("expected nanotime"))?))
        }
        Type::Primitive(Primitive::TimeOfDayMilli) => {
            Ok(iso_time::format_time_of_day_milli(value.as_uint().ok_or_else(|| value_error("expected timeOfDayMilli"))? as u32))
        }
        Type::Primitive(Primitive::TimeOfDayNano) => {
            Ok(iso_time::format_time_of_day_nano(value.as_uint().ok_or_else(|| value_error("expected timeOfDayNano"))?))
        }
        Type::Primitive(p) if p.is_signed() => Ok(value.as_int().ok_or_else(|| value_error("expected signed integer"))?.to_string()),
        Type::Primitive(_) => Ok(value.as_uint().ok_or_else(|| value_error("expected unsigned integer"))?.to_string()),
        Type::EnumRef(qname) => {
            let v = value.as_int().ok_or_else(|| value_error("expected enum integer"))? as i32;
            let enum_def = registry.enum_def(qname)?;
            Ok(enum_def.symbol_of(v).map(str::to_string).unwrap_or_else(|| v.to_string()))
        }
        Type::Str { .. } => Ok(value.as_str().ok_or_else(|| value_error("expected string"))?.to_string()),
        _ => Err(value_error("type is not scalar")),
    }
}

/// Decodes a single XML message document (§4.7.3).
pub fn decode_one(xml: &str, registry: &Registry, strict: Strictness) -> Result<Message, BlinkError> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);
    let start = next_start(&mut reader)?;
    let msg = read_message(&mut reader, &start, registry, strict)?;
    Ok(msg)
}

/// Decodes a stream wrapped in a single root element (§4.7.3, §6.4).
pub fn decode_stream(xml: &str, registry: &Registry, strict: Strictness) -> Result<Vec<Message>, BlinkError> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);
    let _root = next_start(&mut reader)?;
    let mut messages = Vec::new();
    loop {
        match reader.read_event().map_err(|e| parse_error(e.to_string()))? {
            Event::Start(start) => {
                let owned = start.to_owned();
                messages.push(read_message(&mut reader, &owned, registry, strict)?);
            }
            Event::End(_) => break,
            Event::Eof => return Err(framing("unexpected end of XML stream")),
            _ => {}
        }
    }
    Ok(messages)
}

fn next_start(reader: &mut Reader<&[u8]>) -> Result<BytesStart<'static>, BlinkError> {
    loop {
        match reader.read_event().map_err(|e| parse_error(e.to_string()))? {
            Event::Start(start) => return Ok(start.to_owned()),
            Event::Decl(_) | Event::Comment(_) | Event::Text(_) => continue,
            Event::Eof => return Err(framing("XML document has no root element")),
            _ => continue,
        }
    }
}

fn local_name(tag: &[u8]) -> String {
    let s = String::from_utf8_lossy(tag);
    match s.split_once(':') {
        Some((_, local)) => local.to_string(),
        None => s.to_string(),
    }
}

fn read_message(
    reader: &mut Reader<&[u8]>,
    start: &BytesStart<'_>,
    registry: &Registry,
    strict: Strictness,
) -> Result<Message, BlinkError> {
    let name = local_name(start.name().as_ref());
    let qname = resolve_element_qname(&name, registry)?;
    let group = registry.get_by_name(&qname)?;

    let mut msg = Message::new(qname);
    loop {
        match reader.read_event().map_err(|e| parse_error(e.to_string()))? {
            Event::Start(child) => {
                let owned = child.to_owned();
                let field_name = local_name(owned.name().as_ref());
                if let Some(field) = group.field(&field_name) {
                    let value = read_field(reader, &owned, &field.ty, registry, strict)?;
                    append_field(&mut msg.fields, &field_name, &field.ty, value);
                } else {
                    skip_element(reader)?;
                }
            }
            Event::End(_) => break,
            Event::Eof => return Err(framing("unexpected end of XML document")),
            _ => {}
        }
    }
    Ok(msg)
}

fn resolve_element_qname(name: &str, registry: &Registry) -> Result<QName, BlinkError> {
    // Namespace prefixes are synthetic (`ns0`, `ns1`, ...) and resolved by
    // matching the local name against every registered group; ambiguous
    // local names across namespaces are not supported by this mapping.
    for group in registry.groups() {
        if group.qname.name == name {
            return Ok(group.qname.clone());
        }
    }
    Err(parse_error(format!("no group named '{name}' in registry")))
}

fn append_field(fields: &mut FieldMap, name: &str, ty: &Type, value: Value) {
    if matches!(ty, Type::Sequence(_)) {
        if let Some(Value::Sequence(existing)) = fields.get(name) {
            let mut items = existing.clone();
            items.push(value);
            fields.insert(name.to_string(), Value::Sequence(items));
        } else {
            fields.insert(name.to_string(), Value::Sequence(vec![value]));
        }
    } else {
        fields.insert(name.to_string(), value);
    }
}

fn read_field(
    reader: &mut Reader<&[u8]>,
    start: &BytesStart<'_>,
    ty: &Type,
    registry: &Registry,
    strict: Strictness,
) -> Result<Value, BlinkError> {
    match ty {
        Type::Sequence(inner) => read_field(reader, start, inner, registry, strict),
        Type::StaticGroupRef(qname) => {
            let group = registry.get_by_name(qname)?;
            let mut fields = FieldMap::new();
            loop {
                match reader.read_event().map_err(|e| parse_error(e.to_string()))? {
                    Event::Start(child) => {
                        let owned = child.to_owned();
                        let field_name = local_name(owned.name().as_ref());
                        if let Some(f) = group.field(&field_name) {
                            let v = read_field(reader, &owned, &f.ty, registry, strict)?;
                            append_field(&mut fields, &field_name, &f.ty, v);
                        } else {
                            skip_element(reader)?;
                        }
                    }
                    Event::End(_) => break,
                    Event::Eof => return Err(framing("unexpected end of XML document")),
                    _ => {}
                }
            }
            Ok(Value::StaticGroup(StaticGroupValue { fields }))
        }
        Type::DynamicGroupRef(base) => {
            let inner_start = next_inner_start(reader)?;
            let msg = read_message(reader, &inner_start, registry, strict)?;
            let actual_group = registry.get_by_name(&msg.ty)?;
            consume_to_end(reader)?;
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
            let inner_start = next_inner_start(reader)?;
            let msg = read_message(reader, &inner_start, registry, strict)?;
            consume_to_end(reader)?;
            Ok(Value::Message(Box::new(msg)))
        }
        Type::Binary { .. } | Type::Fixed { .. } => {
            let is_hex = start.attributes().flatten().any(|a| a.key.as_ref() == b"binary");
            let text = read_text_content(reader)?;
            if is_hex {
                let mut bytes = Vec::new();
                for i in (0..text.len()).step_by(2) {
                    let byte = u8::from_str_radix(&text[i..i + 2], 16).map_err(|_| parse_error("invalid hex byte in binary element"))?;
                    bytes.push(byte);
                }
                Ok(Value::Bytes(bytes))
            } else {
                Ok(Value::Bytes(text.into_bytes()))
            }
        }
        _ => {
            let text = read_text_content(reader)?;
            parse_scalar(ty, &text, registry, strict)
        }
    }
}

fn next_inner_start(reader: &mut Reader<&[u8]>) -> Result<BytesStart<'static>, BlinkError> {
    loop {
        match reader.read_event().map_err(|e| parse_error(e.to_string()))? {
            Event::Start(start) => return Ok(start.to_owned()),
            Event::Eof => return Err(framing("expected nested element, found end of document")),
            _ => continue,
        }
    }
}

fn consume_to_end(reader: &mut Reader<&[u8]>) -> Result<(), BlinkError> {
    let mut depth = 0usize;
    loop {
        match reader.read_event().map_err(|e| parse_error(e.to_string()))? {
            Event::Start(_) => depth += 1,
            Event::End(_) => {
                if depth == 0 {
                    return Ok(());
                }
                depth -= 1;
            }
            Event::Eof => return Err(framing("unexpected end of XML document")),
            _ => {}
        }
    }
}

fn read_text_content(reader: &mut Reader<&[u8]>) -> Result<String, BlinkError> {
    let mut text = String::new();
    loop {
        match reader.read_event().map_err(|e| parse_error(e.to_string()))? {
            Event::Text(t) => {
                let unescaped = t.unescape().map_err(|e| parse_error(e.to_string()))?;
                text.push_str(&unescaped);
            }
            Event::End(_) => return Ok(text),
            Event::Eof => return Err(framing("unexpected end of XML document")),
            _ => {}
        }
    }
}

fn skip_element(reader: &mut Reader<&[u8]>) -> Result<(), BlinkError> {
    consume_to_end(reader)
}

fn parse_scalar(ty: &Type, text: &str, registry: &Registry, strict: Strictness) -> Result<Value, BlinkError> {
    match ty {
        Type::Primitive(Primitive::Bool) => match text {
            "Y" => Ok(Value::Bool(true)),
            "N" => Ok(Value::Bool(false)),
            _ => Err(parse_error(format!("invalid bool literal '{text}'"))),
        },
        Type::Primitive(Primitive::F64) => {
            let f = match text {
                "NaN" => f64::NAN,
                "Inf" => f64::INFINITY,
                "-Inf" => f64::NEG_INFINITY,
                other => other.parse().map_err(|_| parse_error(format!("invalid float '{text}'")))?,
            };
            Ok(Value::Float(f))
        }
        Type::Primitive(Primitive::Decimal) => {
            let (mantissa, exponent) = text
                .split_once('e')
                .ok_or_else(|| parse_error(format!("invalid decimal literal '{text}'")))?;
            Ok(Value::Decimal(DecimalValue {
                mantissa: mantissa.parse().map_err(|_| parse_error(format!("invalid decimal mantissa in '{text}'")))?,
                exponent: exponent.parse().map_err(|_| parse_error(format!("invalid decimal exponent in '{text}'")))?,
            }))
        }
        Type::Primitive(Primitive::Date) => Ok(Value::Int(iso_time::parse_date(text)?)),
        Type::Primitive(Primitive::MilliTime) => Ok(Value::Int(iso_time::parse_millitime(text)?)),
        Type::Primitive(Primitive::NanoTime) => Ok(Value::Int(iso_time::parse_nanotime(text)?)),
        Type::Primitive(Primitive::TimeOfDayMilli) => Ok(Value::UInt(iso_time::parse_time_of_day_milli(text)? as u64)),
        Type::Primitive(Primitive::TimeOfDayNano) => Ok(Value::UInt(iso_time::parse_time_of_day_nano(text)?)),
        Type::Primitive(p) if p.is_signed() => {
            Ok(Value::Int(text.parse().map_err(|_| parse_error(format!("invalid integer '{text}'")))?))
        }
        Type::Primitive(_) => Ok(Value::UInt(text.parse().map_err(|_| parse_error(format!("invalid integer '{text}'")))?)),
        Type::EnumRef(qname) => {
            let enum_def = registry.enum_def(qname)?;
            if let Some(v) = enum_def.value_of(text) {
                Ok(Value::Int(v as i64))
            } else if let Ok(v) = text.parse::<i32>() {
                recover(strict, weak(format!("unmapped enum value {v} for {qname}")), Value::Int(v as i64))
            } else {
                Err(parse_error(format!("unknown enum symbol '{text}' for {qname}")))
            }
        }
        Type::Str { .. } => Ok(Value::Str(text.to_string())),
        _ => Err(value_error("type is not scalar")),
    }
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
        let xml = encode(&msg, &registry).unwrap();
        assert!(xml.starts_with("<ns0:Company xmlns:ns0=\"Demo\">"));
        assert!(xml.contains("<CompanyName>TechCorp</CompanyName>"));
        let decoded = decode_one(&xml, &registry, Strictness::Strict).unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn reserved_characters_escape_in_text() {
        let schema = compile_schema("A/1 -> string S").unwrap();
        let registry = Registry::from_schema(schema);
        let mut msg = Message::new(QName::bare("A"));
        msg.fields.insert("S", Value::Str("a<b>c&d".into()));
        let xml = encode(&msg, &registry).unwrap();
        assert!(xml.contains("a&lt;b&gt;c&amp;d"));
        let decoded = decode_one(&xml, &registry, Strictness::Strict).unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn binary_falls_back_to_hex_attribute_for_non_utf8() {
        let schema = compile_schema("A/1 -> fixed(2) B").unwrap();
        let registry = Registry::from_schema(schema);
        let mut msg = Message::new(QName::bare("A"));
        msg.fields.insert("B", Value::Bytes(vec![0xff, 0xfe]));
        let xml = encode(&msg, &registry).unwrap();
        assert!(xml.contains("binary=\"yes\""));
        let decoded = decode_one(&xml, &registry, Strictness::Strict).unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn sequence_items_repeat_as_sibling_elements() {
        let schema = compile_schema("A/1 -> sequence<u32> Nums").unwrap();
        let registry = Registry::from_schema(schema);
        let mut msg = Message::new(QName::bare("A"));
        msg.fields.insert("Nums", Value::Sequence(vec![Value::UInt(1), Value::UInt(2), Value::UInt(3)]));
        let xml = encode(&msg, &registry).unwrap();
        assert_eq!(xml.matches("<Nums>").count(), 3);
        let decoded = decode_one(&xml, &registry, Strictness::Strict).unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn stream_wraps_in_single_root_element() {
        let registry = demo_registry();
        let msg = seed_message();
        let xml = encode_stream(std::slice::from_ref(&msg), &registry, "Stream").unwrap();
        assert!(xml.starts_with("<Stream>"));
        assert!(xml.ends_with("</Stream>"));
        let decoded = decode_stream(&xml, &registry, Strictness::Strict).unwrap();
        assert_eq!(decoded, vec![msg]);
    }
}
