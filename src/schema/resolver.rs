//! Schema resolver (C3): turns the untyped AST into a frozen [`Schema`].
//!
//! Responsibilities per spec §4.3: QName resolution order, transitive
//! typedef/enum resolution, inheritance linearization, annotation merging,
//! and constraint validation.

use super::ast::*;
use super::types::{EnumDef, FieldDef, GroupDef, Primitive, Schema, Type, TypeDef};
use crate::error::{BlinkError, ErrorKind, Locator};
use crate::qname::QName;
use std::collections::{BTreeMap, BTreeSet};

fn locator(pos: Pos) -> Locator {
    Locator::LineColumn {
        line: pos.line,
        column: pos.column,
    }
}

fn strong(pos: Pos, message: impl Into<String>) -> BlinkError {
    BlinkError::strong(ErrorKind::ResolveError, message).at(locator(pos))
}

struct Resolver<'a> {
    namespace: Option<&'a str>,
    ast: &'a AstSchema,
}

impl<'a> Resolver<'a> {
    /// Resolution order (§4.3.1): explicit namespace on the reference,
    /// else the current schema's namespace, else null.
    fn resolve_qname(&self, q: &AstQName) -> QName {
        match &q.namespace {
            Some(ns) => QName::with_namespace(ns.clone(), q.name.clone()),
            None => match self.namespace {
                Some(ns) => QName::with_namespace(ns.to_string(), q.name.clone()),
                None => QName::bare(q.name.clone()),
            },
        }
    }

    fn group_name_to_qname(&self, name: &str) -> QName {
        match self.namespace {
            Some(ns) => QName::with_namespace(ns.to_string(), name.to_string()),
            None => QName::bare(name.to_string()),
        }
    }
}

fn primitive(p: &AstPrimitive) -> Primitive {
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

/// Resolves an [`AstSchema`] into a frozen [`Schema`]. This is the sole
/// entry point for C3; [`crate::compile_schema`] calls it after parsing.
pub fn resolve(ast: &AstSchema) -> Result<Schema, BlinkError> {
    let r = Resolver {
        namespace: ast.namespace.as_deref(),
        ast,
    };

    let mut groups_by_qname: BTreeMap<QName, (&AstGroup, Vec<AstAnnotation>)> = BTreeMap::new();
    let mut enums_by_qname: BTreeMap<QName, &AstEnum> = BTreeMap::new();
    let mut typedefs_by_qname: BTreeMap<QName, &AstTypeDef> = BTreeMap::new();

    for decl in &ast.decls {
        match decl {
            AstDecl::Group(g) => {
                let qname = r.group_name_to_qname(&g.name);
                if groups_by_qname.contains_key(&qname) {
                    return Err(strong(g.pos, format!("duplicate group declaration {qname}")));
                }
                groups_by_qname.insert(qname, (g, g.annotations.clone()));
            }
            AstDecl::Enum(e) => {
                let qname = r.group_name_to_qname(&e.name);
                if enums_by_qname.contains_key(&qname) {
                    return Err(strong(e.pos, format!("duplicate enum declaration {qname}")));
                }
                enums_by_qname.insert(qname, e);
            }
            AstDecl::TypeDef(t) => {
                let qname = r.group_name_to_qname(&t.name);
                if typedefs_by_qname.contains_key(&qname) {
                    return Err(strong(t.pos, format!("duplicate type declaration {qname}")));
                }
                typedefs_by_qname.insert(qname, t);
            }
            AstDecl::IncrementalAnnotation(_) => {}
        }
    }

    // Merge incremental annotations, in lexical order, later wins (§4.3.4).
    let mut field_annotations: BTreeMap<(QName, String), Vec<AstAnnotation>> = BTreeMap::new();
    for decl in &ast.decls {
        if let AstDecl::IncrementalAnnotation(inc) = decl {
            let qname = r.group_name_to_qname(&inc.group);
            if !groups_by_qname.contains_key(&qname) {
                return Err(strong(
                    inc.pos,
                    format!("incremental annotation targets unknown group {qname}"),
                ));
            }
            match &inc.field {
                Some(field_name) => {
                    field_annotations
                        .entry((qname, field_name.clone()))
                        .or_default()
                        .push(inc.annotation.clone());
                }
                None => {
                    groups_by_qname
                        .get_mut(&qname)
                        .unwrap()
                        .1
                        .push(inc.annotation.clone());
                }
            }
        }
    }

    // Resolve typedefs transitively; cycles are strong errors.
    let mut resolved_typedefs: BTreeMap<QName, Type> = BTreeMap::new();
    for (qname, def) in &typedefs_by_qname {
        resolve_typedef_chain(
            &r,
            qname,
            &typedefs_by_qname,
            &mut resolved_typedefs,
            &mut BTreeSet::new(),
            def.pos,
        )?;
    }

    // Resolve each group's local fields (type refs + typedef substitution),
    // but not yet linearized against supers.
    let mut local_fields: BTreeMap<QName, Vec<FieldDef>> = BTreeMap::new();
    for (qname, (g, _)) in &groups_by_qname {
        let mut fields = Vec::with_capacity(g.fields.len());
        for f in &g.fields {
            let ty = resolve_type(
                &r,
                &f.ty,
                &groups_by_qname,
                &enums_by_qname,
                &resolved_typedefs,
            )?;
            let mut annotations: BTreeMap<String, String> =
                f.annotations.iter().map(|a| (a.key.clone(), a.value.clone())).collect();
            if let Some(incr) = field_annotations.get(&(qname.clone(), f.name.clone())) {
                for a in incr {
                    annotations.insert(a.key.clone(), a.value.clone());
                }
            }
            fields.push(FieldDef {
                name: f.name.clone(),
                ty,
                optional: f.optional,
                annotations,
            });
        }
        local_fields.insert(qname.clone(), fields);
    }

    // Linearize inheritance: walk each chain once, detect cycles, reject
    // duplicate field names after linearization (§4.3.3, §3.4).
    let mut linearized: BTreeMap<QName, Vec<FieldDef>> = BTreeMap::new();
    for qname in groups_by_qname.keys().cloned().collect::<Vec<_>>() {
        linearize_fields(&r, &qname, &groups_by_qname, &local_fields, &mut linearized, &mut BTreeSet::new())?;
    }

    // Validate DynamicGroupRef/StaticGroupRef targets are groups, fixed(N)
    // has N >= 1, enum symbols unique, type ids unique.
    let mut seen_type_ids: BTreeMap<u64, QName> = BTreeMap::new();
    let mut groups = Vec::with_capacity(groups_by_qname.len());
    for (qname, (g, annotations)) in &groups_by_qname {
        if let Some(type_id) = g.type_id {
            if let Some(existing) = seen_type_ids.get(&type_id) {
                return Err(strong(
                    g.pos,
                    format!("duplicate type id {type_id} on {qname} (already used by {existing})"),
                ));
            }
            seen_type_ids.insert(type_id, qname.clone());
        }

        let super_name = match &g.super_name {
            Some(s) => Some(r.resolve_qname(s)),
            None => None,
        };

        groups.push(GroupDef {
            qname: qname.clone(),
            type_id: g.type_id,
            super_name,
            fields: linearized.remove(qname).unwrap_or_default(),
            annotations: annotations.iter().map(|a| (a.key.clone(), a.value.clone())).collect(),
        });
    }

    let mut enums = Vec::with_capacity(enums_by_qname.len());
    for (qname, e) in &enums_by_qname {
        let mut seen_symbols = BTreeSet::new();
        let mut seen_values = BTreeSet::new();
        for s in &e.symbols {
            if !seen_symbols.insert(s.name.clone()) {
                return Err(strong(e.pos, format!("duplicate enum symbol {} in {qname}", s.name)));
            }
            if !seen_values.insert(s.value) {
                return Err(strong(
                    e.pos,
                    format!("duplicate enum value {} in {qname}", s.value),
                ));
            }
        }
        enums.push(EnumDef {
            qname: qname.clone(),
            symbols: e.symbols.iter().map(|s| (s.name.clone(), s.value)).collect(),
        });
    }

    let mut typedefs = Vec::with_capacity(resolved_typedefs.len());
    for (qname, ty) in resolved_typedefs {
        typedefs.push(TypeDef { qname, target: ty });
    }

    let schema = Schema {
        groups,
        enums,
        typedefs,
    };

    validate_constraints(&schema)?;

    Ok(schema)
}

fn resolve_typedef_chain(
    r: &Resolver,
    qname: &QName,
    raw: &BTreeMap<QName, &AstTypeDef>,
    resolved: &mut BTreeMap<QName, Type>,
    visiting: &mut BTreeSet<QName>,
    pos: Pos,
) -> Result<Type, BlinkError> {
    if let Some(t) = resolved.get(qname) {
        return Ok(t.clone());
    }
    if !visiting.insert(qname.clone()) {
        return Err(strong(pos, format!("typedef cycle involving {qname}")));
    }
    let def = raw
        .get(qname)
        .ok_or_else(|| strong(pos, format!("unknown typedef {qname}")))?;

    let ty = match &def.target {
        AstType::Ref { qname: target_qname, dynamic: false, pos } if raw.contains_key(&r.resolve_qname(target_qname)) => {
            resolve_typedef_chain(r, &r.resolve_qname(target_qname), raw, resolved, visiting, *pos)?
        }
        other => resolve_type_shallow(r, other),
    };

    visiting.remove(qname);
    resolved.insert(qname.clone(), ty.clone());
    Ok(ty)
}

/// Resolves a type expression that is known not to reference another
/// typedef (already substituted), used inside the typedef chain resolver.
fn resolve_type_shallow(r: &Resolver, ast_ty: &AstType) -> Type {
    match ast_ty {
        AstType::Primitive(p) => Type::Primitive(primitive(p)),
        AstType::Str { max_size } => Type::Str { max_size: *max_size },
        AstType::Binary { max_size } => Type::Binary { max_size: *max_size },
        AstType::Fixed { size, .. } => Type::Fixed { size: *size },
        AstType::Object => Type::Object,
        AstType::Sequence(inner, _) => Type::Sequence(Box::new(resolve_type_shallow(r, inner))),
        AstType::Ref { qname, dynamic, .. } => {
            let resolved = r.resolve_qname(qname);
            if *dynamic {
                Type::DynamicGroupRef(resolved)
            } else {
                // Ambiguous until we know whether it names an enum, group,
                // or typedef; callers needing full disambiguation go
                // through `resolve_type`. Typedef-chain resolution only
                // reaches here for non-typedef targets.
                Type::StaticGroupRef(resolved)
            }
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn resolve_type(
    r: &Resolver,
    ast_ty: &AstType,
    groups: &BTreeMap<QName, (&AstGroup, Vec<AstAnnotation>)>,
    enums: &BTreeMap<QName, &AstEnum>,
    typedefs: &BTreeMap<QName, Type>,
) -> Result<Type, BlinkError> {
    Ok(match ast_ty {
        AstType::Primitive(p) => Type::Primitive(primitive(p)),
        AstType::Str { max_size } => Type::Str { max_size: *max_size },
        AstType::Binary { max_size } => Type::Binary { max_size: *max_size },
        AstType::Fixed { size, pos } => {
            if *size < 1 {
                return Err(strong(*pos, "fixed(N) requires N >= 1"));
            }
            Type::Fixed { size: *size }
        }
        AstType::Object => Type::Object,
        AstType::Sequence(inner, pos) => {
            if inner.is_nested_sequence() {
                return Err(strong(*pos, "nested sequences are not permitted"));
            }
            let inner_ty = resolve_type(r, inner, groups, enums, typedefs)?;
            if inner_ty.is_sequence() {
                return Err(strong(*pos, "nested sequences are not permitted"));
            }
            Type::Sequence(Box::new(inner_ty))
        }
        AstType::Ref { qname, dynamic, pos } => {
            let resolved = r.resolve_qname(qname);
            if *dynamic {
                if !groups.contains_key(&resolved) {
                    return Err(strong(*pos, format!("dynamic group reference to unknown group {resolved}")));
                }
                return Ok(Type::DynamicGroupRef(resolved));
            }
            if let Some(ty) = typedefs.get(&resolved) {
                return Ok(ty.clone());
            }
            if enums.contains_key(&resolved) {
                return Ok(Type::EnumRef(resolved));
            }
            if groups.contains_key(&resolved) {
                return Ok(Type::StaticGroupRef(resolved));
            }
            return Err(strong(*pos, format!("unknown type reference {resolved}")));
        }
    })
}

impl AstType {
    fn is_nested_sequence(&self) -> bool {
        matches!(self, AstType::Sequence(_, _))
    }
}

fn linearize_fields(
    r: &Resolver,
    qname: &QName,
    groups: &BTreeMap<QName, (&AstGroup, Vec<AstAnnotation>)>,
    local_fields: &BTreeMap<QName, Vec<FieldDef>>,
    out: &mut BTreeMap<QName, Vec<FieldDef>>,
    visiting: &mut BTreeSet<QName>,
) -> Result<Vec<FieldDef>, BlinkError> {
    if let Some(existing) = out.get(qname) {
        return Ok(existing.clone());
    }
    let (g, _) = groups
        .get(qname)
        .ok_or_else(|| BlinkError::strong(ErrorKind::ResolveError, format!("unknown group {qname}")))?;

    if !visiting.insert(qname.clone()) {
        return Err(strong(g.pos, format!("inheritance cycle involving {qname}")));
    }

    let mut fields = Vec::new();
    if let Some(super_ast_qname) = &g.super_name {
        let super_qname = r.resolve_qname(super_ast_qname);
        if !groups.contains_key(&super_qname) {
            return Err(strong(g.pos, format!("unknown super type {super_qname} for {qname}")));
        }
        fields.extend(linearize_fields(r, &super_qname, groups, local_fields, out, visiting)?);
    }
    fields.extend(local_fields.get(qname).cloned().unwrap_or_default());

    let mut seen = BTreeSet::new();
    for f in &fields {
        if !seen.insert(f.name.clone()) {
            return Err(strong(g.pos, format!("duplicate field name '{}' in {qname} after linearization", f.name)));
        }
    }

    visiting.remove(qname);
    out.insert(qname.clone(), fields.clone());
    Ok(fields)
}

fn validate_constraints(schema: &Schema) -> Result<(), BlinkError> {
    for group in &schema.groups {
        for field in &group.fields {
            validate_type_constraints(schema, &field.ty)?;
        }
    }
    Ok(())
}

fn validate_type_constraints(schema: &Schema, ty: &Type) -> Result<(), BlinkError> {
    match ty {
        Type::Sequence(inner) => {
            if inner.is_sequence() {
                return Err(BlinkError::strong(
                    ErrorKind::ResolveError,
                    "nested sequences are not permitted",
                ));
            }
            validate_type_constraints(schema, inner)
        }
        Type::DynamicGroupRef(target) => {
            if schema.group(target).is_none() {
                return Err(BlinkError::strong(
                    ErrorKind::ResolveError,
                    format!("dynamic group reference to non-group {target}"),
                ));
            }
            Ok(())
        }
        Type::StaticGroupRef(target) => {
            if schema.group(target).is_none() {
                return Err(BlinkError::strong(
                    ErrorKind::ResolveError,
                    format!("static group reference to non-group {target}"),
                ));
            }
            Ok(())
        }
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::parser::parse;

    fn resolve_src(src: &str) -> Result<Schema, BlinkError> {
        resolve(&parse(src).unwrap())
    }

    #[test]
    fn linearizes_inheritance() {
        let src = r#"
            namespace Demo
            Employee -> string Name, u32 Age
            Manager : Employee -> string Department
        "#;
        let schema = resolve_src(src).unwrap();
        let manager = schema.group(&QName::with_namespace("Demo", "Manager")).unwrap();
        let names: Vec<_> = manager.fields.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["Name", "Age", "Department"]);
    }

    #[test]
    fn rejects_duplicate_type_id() {
        let src = "A/1 -> u32 X\nB/1 -> u32 Y";
        let err = resolve_src(src).unwrap_err();
        assert_eq!(err.kind, ErrorKind::ResolveError);
    }

    #[test]
    fn rejects_inheritance_cycle() {
        let src = "A : B -> u32 X\nB : A -> u32 Y";
        let err = resolve_src(src).unwrap_err();
        assert_eq!(err.kind, ErrorKind::ResolveError);
    }

    #[test]
    fn rejects_duplicate_field_after_linearization() {
        let src = "A -> u32 X\nB : A -> u32 X";
        let err = resolve_src(src).unwrap_err();
        assert_eq!(err.kind, ErrorKind::ResolveError);
    }

    #[test]
    fn rejects_nested_sequence() {
        let src = "A -> sequence<sequence<u32>> X";
        let err = resolve_src(src).unwrap_err();
        assert_eq!(err.kind, ErrorKind::ResolveError);
    }

    #[test]
    fn resolves_typedef_chain() {
        let src = "type Meters = u32\ntype Distance = Meters\nA -> Distance D";
        let schema = resolve_src(src).unwrap();
        let a = schema.group(&QName::bare("A")).unwrap();
        assert_eq!(a.fields[0].ty, Type::Primitive(Primitive::U32));
    }

    #[test]
    fn dynamic_group_ref_must_target_group() {
        let src = "enum Color -> Red, Green\nA -> *Color C";
        let err = resolve_src(src).unwrap_err();
        assert_eq!(err.kind, ErrorKind::ResolveError);
    }
}
