//! Dynamic Schema Exchange (C11), §4.8–§4.10: a second, self-describing
//! Blink schema — the *self-schema* — whose messages live in the registry
//! at fixed type ids `16000..=16383` and, when encountered mid-stream,
//! mutate the registry via [`Registry::apply_update`] instead of surfacing
//! as application messages.
//!
//! The self-schema is shipped as embedded `.blink` source
//! ([`SELF_SCHEMA_SRC`]) compiled once via [`OnceLock`], so it goes through
//! the same parser/resolver path as any user schema rather than being
//! hand-built as `GroupDef` literals.
//!
//! spec.md §9 records that the distilled source disagreed with the Blink
//! self-schema document on the exact reserved ids for `FieldDef`/`TypeDef`.
//! Both candidate assignments are exposed ([`RESERVED_IDS_DOCUMENTED`],
//! [`RESERVED_IDS_SHIPPED`]) and both are exercised in tests; runtime
//! decoding uses [`RESERVED_IDS_SHIPPED`].

use crate::codec::compact;
use crate::codec::Strictness;
use crate::error::{BlinkError, ErrorKind};
use crate::qname::QName;
use crate::registry::{Registry, SchemaUpdate};
use crate::schema::ast::{AstPrimitive, AstQName, AstType};
use crate::schema::parser::parse_type_fragment;
use crate::schema::{compile_schema, FieldDef, Primitive, Type, TypeDef};
use crate::value::{Message, Value};
use std::sync::OnceLock;

/// Lower bound of the reserved type-id range (§4.8, §6.6).
pub const RESERVED_ID_RANGE_START: u64 = 16000;
/// Upper bound (inclusive) of the reserved type-id range.
pub const RESERVED_ID_RANGE_END: u64 = 16383;

fn parse_error(message: impl Into<String>) -> BlinkError {
    BlinkError::strong(ErrorKind::ParseError, message)
}

fn value_error(message: impl Into<String>) -> BlinkError {
    BlinkError::strong(ErrorKind::ValueError, message)
}

/// One assignment of the four self-schema message kinds to reserved type
/// ids (§4.8, §9 Open Question 1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReservedIds {
    pub group_decl: u64,
    pub field_def: u64,
    pub type_def: u64,
    pub schema_annotation: u64,
}

/// The reserved-id assignment as spec.md's own prose enumerates the self-
/// schema messages.
pub const RESERVED_IDS_DOCUMENTED: ReservedIds = ReservedIds {
    group_decl: 16000,
    field_def: 16001,
    type_def: 16002,
    schema_annotation: 16003,
};

/// The reserved-id assignment this crate actually decodes with at runtime;
/// swaps `FieldDef`/`TypeDef` relative to [`RESERVED_IDS_DOCUMENTED`] per
/// the disagreement spec.md §9 records.
pub const RESERVED_IDS_SHIPPED: ReservedIds = ReservedIds {
    group_decl: 16000,
    field_def: 16002,
    type_def: 16001,
    schema_annotation: 16003,
};

fn self_schema_source(ids: &ReservedIds) -> String {
    format!(
        "namespace Blink\n\
         GroupDecl/{} -> string Namespace?, string Name, u32 TypeId?, string SuperNamespace?, string SuperName?\n\
         FieldDef/{} -> string GroupNamespace?, string GroupName, string FieldName, string FieldType, bool Optional\n\
         TypeDef/{} -> string Namespace?, string Name, string TargetType\n\
         SchemaAnnotation/{} -> string GroupNamespace?, string GroupName, string FieldName?, string Key, string Value\n",
        ids.group_decl, ids.field_def, ids.type_def, ids.schema_annotation,
    )
}

/// Embedded self-schema source, using [`RESERVED_IDS_SHIPPED`].
pub static SELF_SCHEMA_SRC: OnceLock<String> = OnceLock::new();

fn self_schema_src() -> &'static str {
    SELF_SCHEMA_SRC.get_or_init(|| self_schema_source(&RESERVED_IDS_SHIPPED))
}

/// Installs the self-schema's four group declarations into `registry`
/// under `ids`, if not already present. Idempotent: a second call with the
/// same `ids` is a no-op.
pub fn install_self_schema(registry: &mut Registry, ids: &ReservedIds) -> Result<(), BlinkError> {
    if registry.get_by_id(ids.group_decl).is_ok() {
        return Ok(());
    }
    // The shipped id assignment is the one actually used at decode time, so
    // its source is cached in `SELF_SCHEMA_SRC` rather than rebuilt per call.
    let schema = if *ids == RESERVED_IDS_SHIPPED {
        compile_schema(self_schema_src())?
    } else {
        compile_schema(&self_schema_source(ids))?
    };
    for group in &schema.groups {
        registry.apply_update(SchemaUpdate::DeclareGroup {
            qname: group.qname.clone(),
            type_id: group.type_id,
            super_name: group.super_name.clone(),
        })?;
        for field in &group.fields {
            registry.apply_update(SchemaUpdate::DefineField {
                group: group.qname.clone(),
                field: field.clone(),
            })?;
        }
    }
    Ok(())
}

fn map_primitive(p: &AstPrimitive) -> Primitive {
    match p {
        AstPrimitive::U8 => Primitive::U8,
        AstPrimitive::U16 => Primitive::U16,
        AstPrimitive::U32 => Primitive::U32,
        AstPrimitive::U64 => Primitive::U64,
        AstPrimitive::I8 => Primitive::I8,
        AstPrimitive::I16 => Primitive::I16,
        AstPrimitive::I32 => Primitive::I32,
        AstPrimitive::I64 => Primitive::I64,
        AstPrimitive::Bool => Primitive::Bool,
        AstPrimitive::F64 => Primitive::F64,
        AstPrimitive::Decimal => Primitive::Decimal,
        AstPrimitive::MilliTime => Primitive::MilliTime,
        AstPrimitive::NanoTime => Primitive::NanoTime,
        AstPrimitive::Date => Primitive::Date,
        AstPrimitive::TimeOfDayMilli => Primitive::TimeOfDayMilli,
        AstPrimitive::TimeOfDayNano => Primitive::TimeOfDayNano,
    }
}

fn resolve_ast_qname(q: &AstQName, default_ns: Option<&str>) -> QName {
    match &q.namespace {
        Some(ns) => QName::with_namespace(ns.clone(), q.name.clone()),
        None => match default_ns {
            Some(ns) => QName::with_namespace(ns.to_string(), q.name.clone()),
            None => QName::bare(q.name.clone()),
        },
    }
}

/// Resolves a `FieldType`/`TargetType` string against the *live* registry
/// (unlike [`crate::schema::resolver`], which resolves against one static
/// schema's declarations), so a field can reference a group declared by an
/// earlier schema-exchange frame.
fn resolve_ast_type(ast_ty: &AstType, default_ns: Option<&str>, registry: &Registry) -> Result<Type, BlinkError> {
    Ok(match ast_ty {
        AstType::Primitive(p) => Type::Primitive(map_primitive(p)),
        AstType::Str { max_size } => Type::Str { max_size: *max_size },
        AstType::Binary { max_size } => Type::Binary { max_size: *max_size },
        AstType::Fixed { size, .. } => Type::Fixed { size: *size },
        AstType::Object => Type::Object,
        AstType::Sequence(inner, _) => Type::Sequence(Box::new(resolve_ast_type(inner, default_ns, registry)?)),
        AstType::Ref { qname, dynamic, .. } => {
            let resolved = resolve_ast_qname(qname, default_ns);
            if *dynamic {
                registry.get_by_name(&resolved)?;
                Type::DynamicGroupRef(resolved)
            } else if let Ok(target) = registry.typedef(&resolved) {
                target.clone()
            } else if registry.enum_def(&resolved).is_ok() {
                Type::EnumRef(resolved)
            } else if registry.get_by_name(&resolved).is_ok() {
                Type::StaticGroupRef(resolved)
            } else {
                return Err(value_error(format!("unknown type reference '{resolved}' in schema-exchange frame")));
            }
        }
    })
}

fn field_str(msg: &Message, name: &str) -> Option<String> {
    msg.fields.get(name).and_then(Value::as_str).map(str::to_string)
}

fn field_str_required(msg: &Message, name: &str) -> Result<String, BlinkError> {
    field_str(msg, name).ok_or_else(|| parse_error(format!("schema-exchange message missing required field '{name}'")))
}

fn field_bool(msg: &Message, name: &str) -> Result<bool, BlinkError> {
    match msg.fields.get(name) {
        Some(Value::Bool(b)) => Ok(*b),
        _ => Err(parse_error(format!("schema-exchange message missing required field '{name}'"))),
    }
}

fn field_uint(msg: &Message, name: &str) -> Option<u64> {
    msg.fields.get(name).and_then(Value::as_uint)
}

/// Converts a decoded self-schema message into the [`SchemaUpdate`] it
/// describes, resolving any embedded type expressions against `registry`.
fn schema_update_from_message(msg: &Message, ids: &ReservedIds, registry: &Registry) -> Result<SchemaUpdate, BlinkError> {
    let group = registry.get_by_name(&msg.ty)?;
    let type_id = group.type_id.ok_or_else(|| parse_error("schema-exchange group has no type id"))?;

    if type_id == ids.group_decl {
        let namespace = field_str(msg, "Namespace");
        let name = field_str_required(msg, "Name")?;
        let qname = match namespace {
            Some(ns) => QName::with_namespace(ns, name),
            None => QName::bare(name),
        };
        let super_name = match field_str(msg, "SuperName") {
            Some(super_local) => Some(match field_str(msg, "SuperNamespace") {
                Some(ns) => QName::with_namespace(ns, super_local),
                None => QName::bare(super_local),
            }),
            None => None,
        };
        Ok(SchemaUpdate::DeclareGroup {
            qname,
            type_id: field_uint(msg, "TypeId"),
            super_name,
        })
    } else if type_id == ids.field_def {
        let group_ns = field_str(msg, "GroupNamespace");
        let group_name = field_str_required(msg, "GroupName")?;
        let group_qname = match &group_ns {
            Some(ns) => QName::with_namespace(ns.clone(), group_name),
            None => QName::bare(group_name),
        };
        let field_name = field_str_required(msg, "FieldName")?;
        let field_type_src = field_str_required(msg, "FieldType")?;
        let ast_ty = parse_type_fragment(&field_type_src)?;
        let ty = resolve_ast_type(&ast_ty, group_ns.as_deref(), registry)?;
        Ok(SchemaUpdate::DefineField {
            group: group_qname,
            field: FieldDef {
                name: field_name,
                ty,
                optional: field_bool(msg, "Optional")?,
                annotations: Default::default(),
            },
        })
    } else if type_id == ids.type_def {
        let namespace = field_str(msg, "Namespace");
        let name = field_str_required(msg, "Name")?;
        let target_src = field_str_required(msg, "TargetType")?;
        let ast_ty = parse_type_fragment(&target_src)?;
        let target = resolve_ast_type(&ast_ty, namespace.as_deref(), registry)?;
        let qname = match namespace {
            Some(ns) => QName::with_namespace(ns, name),
            None => QName::bare(name),
        };
        Ok(SchemaUpdate::DefineTypeDef(TypeDef { qname, target }))
    } else if type_id == ids.schema_annotation {
        let group_ns = field_str(msg, "GroupNamespace");
        let group_name = field_str_required(msg, "GroupName")?;
        let group_qname = match group_ns {
            Some(ns) => QName::with_namespace(ns, group_name),
            None => QName::bare(group_name),
        };
        Ok(SchemaUpdate::Annotate {
            group: group_qname,
            field: field_str(msg, "FieldName"),
            key: field_str_required(msg, "Key")?,
            value: field_str_required(msg, "Value")?,
        })
    } else {
        Err(parse_error(format!("reserved type id {type_id} is not a known self-schema message")))
    }
}

/// Peeks a Compact Binary frame's `(type_id, frame_end)` without fully
/// decoding its fields, mirroring the header-reading half of
/// [`compact::decode_one`] (duplicated here rather than exposed from
/// `compact`, since only the type id is needed before deciding how to
/// decode the rest of the frame).
fn peek_header(buf: &[u8], offset: usize) -> Result<(u64, usize), BlinkError> {
    use crate::vlc::{self, Decoded};
    let mut pos = offset;
    let length = match vlc::decode_u64(buf, &mut pos)? {
        Decoded::Value(v) => v as usize,
        Decoded::Null => return Err(BlinkError::strong(ErrorKind::FramingError, "frame length cannot be NULL").at(crate::error::Locator::ByteOffset(offset))),
    };
    let frame_start = pos;
    let frame_end = frame_start
        .checked_add(length)
        .filter(|&e| e <= buf.len())
        .ok_or_else(|| BlinkError::strong(ErrorKind::FramingError, "frame length exceeds buffer").at(crate::error::Locator::ByteOffset(offset)))?;
    let mut type_pos = frame_start;
    let type_id = match vlc::decode_u64(buf, &mut type_pos)? {
        Decoded::Value(v) => v,
        Decoded::Null => return Err(BlinkError::strong(ErrorKind::FramingError, "type id cannot be NULL").at(crate::error::Locator::ByteOffset(frame_start))),
    };
    Ok((type_id, frame_end))
}

/// Decodes a Compact Binary byte stream, applying any reserved-id frames to
/// `registry` as they're encountered and yielding only application
/// messages (§4.8–§4.9). Uses [`RESERVED_IDS_SHIPPED`].
pub fn decode_stream_with_exchange<'a>(buf: &'a [u8], registry: &'a mut Registry, strict: Strictness) -> SchemaExchangeDecoder<'a> {
    SchemaExchangeDecoder {
        buf,
        pos: 0,
        registry,
        strict,
        ids: RESERVED_IDS_SHIPPED,
        installed: false,
    }
}

/// Iterator returned by [`decode_stream_with_exchange`].
pub struct SchemaExchangeDecoder<'a> {
    buf: &'a [u8],
    pos: usize,
    registry: &'a mut Registry,
    strict: Strictness,
    ids: ReservedIds,
    installed: bool,
}

impl Iterator for SchemaExchangeDecoder<'_> {
    type Item = Result<Message, BlinkError>;

    fn next(&mut self) -> Option<Self::Item> {
        if !self.installed {
            if let Err(e) = install_self_schema(self.registry, &self.ids) {
                return Some(Err(e));
            }
            self.installed = true;
        }
        loop {
            if self.pos >= self.buf.len() {
                return None;
            }
            let (type_id, _frame_end) = match peek_header(self.buf, self.pos) {
                Ok(v) => v,
                Err(e) => return Some(Err(e)),
            };
            let is_reserved = (RESERVED_ID_RANGE_START..=RESERVED_ID_RANGE_END).contains(&type_id);
            let decoded = compact::decode_one(self.buf, self.pos, self.registry, self.strict);
            match decoded {
                Ok((msg, consumed)) => {
                    self.pos = consumed;
                    if is_reserved {
                        let update = match schema_update_from_message(&msg, &self.ids, self.registry) {
                            Ok(u) => u,
                            Err(e) => return Some(Err(e)),
                        };
                        if let Err(e) = self.registry.apply_update(update) {
                            return Some(Err(e));
                        }
                        continue;
                    }
                    return Some(Ok(msg));
                }
                Err(e) => return Some(Err(e)),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::compact;
    use crate::schema::compile_schema;

    #[test]
    fn greeting_scenario_applies_group_decl_and_field_def_then_decodes_application_frame() {
        let mut registry = Registry::from_schema(compile_schema("").unwrap());

        let group_decl_group = QName::with_namespace("Blink", "GroupDecl");
        let field_def_group = QName::with_namespace("Blink", "FieldDef");

        // Build the two schema-exchange frames and the one application
        // frame by hand, through the same compact codec the decoder uses.
        install_self_schema(&mut registry, &RESERVED_IDS_SHIPPED).unwrap();

        let mut group_decl_msg = Message::new(group_decl_group);
        group_decl_msg.fields.insert("Namespace", Value::Str("Demo".into()));
        group_decl_msg.fields.insert("Name", Value::Str("Greeting".into()));
        group_decl_msg.fields.insert("TypeId", Value::UInt(9000));
        let group_decl_bytes = compact::encode(&group_decl_msg, &registry).unwrap();

        let mut field_def_msg = Message::new(field_def_group);
        field_def_msg.fields.insert("GroupNamespace", Value::Str("Demo".into()));
        field_def_msg.fields.insert("GroupName", Value::Str("Greeting".into()));
        field_def_msg.fields.insert("FieldName", Value::Str("Text".into()));
        field_def_msg.fields.insert("FieldType", Value::Str("string".into()));
        field_def_msg.fields.insert("Optional", Value::Bool(false));
        let field_def_bytes = compact::encode(&field_def_msg, &registry).unwrap();

        // The application frame references Demo:Greeting, which exists
        // only *after* the two schema-exchange frames above are applied;
        // encode it against a scratch registry that already knows the
        // shape, then splice the bytes (the wire bytes don't depend on
        // which registry produced them, only on the shared field layout).
        let mut app_registry = registry.clone();
        app_registry
            .apply_update(SchemaUpdate::DeclareGroup {
                qname: QName::with_namespace("Demo", "Greeting"),
                type_id: Some(9000),
                super_name: None,
            })
            .unwrap();
        app_registry
            .apply_update(SchemaUpdate::DefineField {
                group: QName::with_namespace("Demo", "Greeting"),
                field: FieldDef {
                    name: "Text".to_string(),
                    ty: Type::Str { max_size: None },
                    optional: false,
                    annotations: Default::default(),
                },
            })
            .unwrap();
        let mut app_msg = Message::new(QName::with_namespace("Demo", "Greeting"));
        app_msg.fields.insert("Text", Value::Str("hi".into()));
        let app_bytes = compact::encode(&app_msg, &app_registry).unwrap();

        let mut stream = Vec::new();
        stream.extend_from_slice(&group_decl_bytes);
        stream.extend_from_slice(&field_def_bytes);
        stream.extend_from_slice(&app_bytes);

        let mut fresh_registry = Registry::from_schema(compile_schema("").unwrap());
        let decoded: Vec<Message> = decode_stream_with_exchange(&stream, &mut fresh_registry, Strictness::Strict)
            .collect::<Result<_, _>>()
            .unwrap();

        assert_eq!(decoded.len(), 1);
        assert_eq!(decoded[0].ty, QName::with_namespace("Demo", "Greeting"));
        assert_eq!(decoded[0].fields.get("Text"), Some(&Value::Str("hi".into())));

        let greeting = fresh_registry.get_by_name(&QName::with_namespace("Demo", "Greeting")).unwrap();
        assert_eq!(greeting.type_id, Some(9000));
        assert_eq!(greeting.fields.len(), 1);
    }

    #[test]
    fn both_reserved_id_assignments_install_without_conflict() {
        let mut documented = Registry::from_schema(compile_schema("").unwrap());
        install_self_schema(&mut documented, &RESERVED_IDS_DOCUMENTED).unwrap();
        assert!(documented.get_by_id(RESERVED_IDS_DOCUMENTED.field_def).is_ok());
        assert!(documented.get_by_id(RESERVED_IDS_DOCUMENTED.type_def).is_ok());

        let mut shipped = Registry::from_schema(compile_schema("").unwrap());
        install_self_schema(&mut shipped, &RESERVED_IDS_SHIPPED).unwrap();
        assert!(shipped.get_by_id(RESERVED_IDS_SHIPPED.field_def).is_ok());
        assert!(shipped.get_by_id(RESERVED_IDS_SHIPPED.type_def).is_ok());

        assert_ne!(RESERVED_IDS_DOCUMENTED.field_def, RESERVED_IDS_SHIPPED.field_def);
        assert_ne!(RESERVED_IDS_DOCUMENTED.type_def, RESERVED_IDS_SHIPPED.type_def);
    }

    #[test]
    fn type_def_and_annotation_frames_apply_through_the_stream() {
        let mut registry = Registry::from_schema(compile_schema("namespace Demo\nBase/1 -> u32 X").unwrap());
        install_self_schema(&mut registry, &RESERVED_IDS_SHIPPED).unwrap();

        let mut type_def_msg = Message::new(QName::with_namespace("Blink", "TypeDef"));
        type_def_msg.fields.insert("Namespace", Value::Str("Demo".into()));
        type_def_msg.fields.insert("Name", Value::Str("Meters".into()));
        type_def_msg.fields.insert("TargetType", Value::Str("u32".into()));
        let bytes = compact::encode(&type_def_msg, &registry).unwrap();

        let mut fresh = registry.clone();
        let decoded: Vec<Message> = decode_stream_with_exchange(&bytes, &mut fresh, Strictness::Strict)
            .collect::<Result<_, _>>()
            .unwrap();
        assert!(decoded.is_empty());
        assert_eq!(fresh.typedef(&QName::with_namespace("Demo", "Meters")).unwrap(), &Type::Primitive(Primitive::U32));
    }

    #[test]
    fn reserved_id_range_constants_match_spec() {
        assert_eq!(RESERVED_ID_RANGE_START, 16000);
        assert_eq!(RESERVED_ID_RANGE_END, 16383);
    }
}
