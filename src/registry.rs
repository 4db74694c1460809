//! Type registry (C4): indexed view of a resolved [`Schema`] by QName and by
//! numeric type id, mutable only through [`Registry::apply_update`] (C11).

use crate::error::{BlinkError, ErrorKind};
use crate::qname::QName;
use crate::schema::{EnumDef, GroupDef, Schema, Type, TypeDef};
use std::collections::BTreeMap;

/// A single schema mutation applied by the dynamic schema exchange (§4.8).
/// Each variant corresponds to one self-schema message kind.
#[derive(Debug, Clone)]
pub enum SchemaUpdate {
    DeclareGroup {
        qname: QName,
        type_id: Option<u64>,
        super_name: Option<QName>,
    },
    DefineField {
        group: QName,
        field: crate::schema::FieldDef,
    },
    DefineTypeDef(TypeDef),
    Annotate {
        group: QName,
        field: Option<String>,
        key: String,
        value: String,
    },
}

/// Indexed, mutable view of a [`Schema`] (C4). Read-only operations
/// (`get_by_name`, `get_by_id`, `enum_def`, `typedef`) are safe to share
/// across parallel contexts per spec §4.4; mutation via
/// [`Registry::apply_update`] requires exclusive access, documented rather
/// than enforced with a lock (§5).
#[derive(Debug, Clone)]
pub struct Registry {
    groups: BTreeMap<QName, GroupDef>,
    by_id: BTreeMap<u64, QName>,
    enums: BTreeMap<QName, EnumDef>,
    typedefs: BTreeMap<QName, TypeDef>,
}

impl Registry {
    pub fn from_schema(schema: Schema) -> Self {
        let mut groups = BTreeMap::new();
        let mut by_id = BTreeMap::new();
        for g in schema.groups {
            if let Some(id) = g.type_id {
                by_id.insert(id, g.qname.clone());
            }
            groups.insert(g.qname.clone(), g);
        }
        let enums = schema.enums.into_iter().map(|e| (e.qname.clone(), e)).collect();
        let typedefs = schema.typedefs.into_iter().map(|t| (t.qname.clone(), t)).collect();
        Registry {
            groups,
            by_id,
            enums,
            typedefs,
        }
    }

    pub fn get_by_name(&self, qname: &QName) -> Result<&GroupDef, BlinkError> {
        self.groups
            .get(qname)
            .ok_or_else(|| BlinkError::strong(ErrorKind::ResolveError, format!("unknown group {qname}")))
    }

    pub fn get_by_id(&self, type_id: u64) -> Result<&GroupDef, BlinkError> {
        let qname = self
            .by_id
            .get(&type_id)
            .ok_or_else(|| BlinkError::strong(ErrorKind::ResolveError, format!("unknown type id {type_id}")))?;
        self.get_by_name(qname)
    }

    pub fn enum_def(&self, qname: &QName) -> Result<&EnumDef, BlinkError> {
        self.enums
            .get(qname)
            .ok_or_else(|| BlinkError::strong(ErrorKind::ResolveError, format!("unknown enum {qname}")))
    }

    pub fn typedef(&self, qname: &QName) -> Result<&Type, BlinkError> {
        self.typedefs
            .get(qname)
            .map(|t| &t.target)
            .ok_or_else(|| BlinkError::strong(ErrorKind::ResolveError, format!("unknown typedef {qname}")))
    }

    /// All groups currently known to the registry, in QName order.
    /// Supplemental to spec §6.6's interface list (useful for embedders
    /// introspecting post-update state; see SPEC_FULL.md §2).
    pub fn groups(&self) -> impl Iterator<Item = &GroupDef> {
        self.groups.values()
    }

    pub fn is_descendant_of(&self, candidate: &GroupDef, base: &QName) -> bool {
        let mut current = candidate;
        loop {
            if &current.qname == base {
                return true;
            }
            match &current.super_name {
                Some(super_name) => match self.groups.get(super_name) {
                    Some(parent) => current = parent,
                    None => return false,
                },
                None => return false,
            }
        }
    }

    /// Integrates a schema mutation produced by the dynamic schema exchange
    /// (§4.8). Atomic: on any validation failure the registry is left
    /// unchanged (§4.10, "partial frames never mutate the registry").
    pub fn apply_update(&mut self, update: SchemaUpdate) -> Result<(), BlinkError> {
        // Validate against a scratch clone, then swap in — this is the
        // straightforward way to guarantee atomicity without a
        // multi-phase rollback log, matching bitcraft's "compile once,
        // use many" discipline (validate fully before installing).
        let mut scratch = self.clone();
        scratch.apply_update_unchecked(update)?;
        tracing::trace!(groups = scratch.groups.len(), "schema update applied");
        *self = scratch;
        Ok(())
    }

    fn apply_update_unchecked(&mut self, update: SchemaUpdate) -> Result<(), BlinkError> {
        match update {
            SchemaUpdate::DeclareGroup {
                qname,
                type_id,
                super_name,
            } => {
                if self.groups.contains_key(&qname) {
                    return Err(BlinkError::strong(
                        ErrorKind::SchemaUpdateError,
                        format!("group {qname} already declared"),
                    ));
                }
                if let Some(id) = type_id {
                    if self.by_id.contains_key(&id) {
                        return Err(BlinkError::strong(
                            ErrorKind::SchemaUpdateError,
                            format!("type id {id} already in use"),
                        ));
                    }
                }
                if let Some(super_qname) = &super_name {
                    if !self.groups.contains_key(super_qname) {
                        return Err(BlinkError::strong(
                            ErrorKind::SchemaUpdateError,
                            format!("unknown super type {super_qname}"),
                        ));
                    }
                    // Cycle check: walking from super must not reach qname
                    // (qname doesn't exist yet, so only self-super is
                    // possible here; full cycles are prevented because a
                    // group must exist before it can be named as a super).
                    if super_qname == &qname {
                        return Err(BlinkError::strong(
                            ErrorKind::SchemaUpdateError,
                            format!("group {qname} cannot be its own supertype"),
                        ));
                    }
                }
                if let Some(id) = type_id {
                    self.by_id.insert(id, qname.clone());
                }
                // Linearize: inherited fields come from the super group as it
                // stands right now, matching resolver.rs's `super.fields ++
                // local.fields` (§3.3) for statically-compiled groups.
                let inherited = match &super_name {
                    Some(super_qname) => self.groups[super_qname].fields.clone(),
                    None => Vec::new(),
                };
                self.groups.insert(
                    qname.clone(),
                    GroupDef {
                        qname,
                        type_id,
                        super_name,
                        fields: inherited,
                        annotations: BTreeMap::new(),
                    },
                );
            }
            SchemaUpdate::DefineField { group, field } => {
                let g = self.groups.get_mut(&group).ok_or_else(|| {
                    BlinkError::strong(ErrorKind::SchemaUpdateError, format!("unknown group {group}"))
                })?;
                if g.fields.iter().any(|f| f.name == field.name) {
                    return Err(BlinkError::strong(
                        ErrorKind::SchemaUpdateError,
                        format!("duplicate field name '{}' in {group}", field.name),
                    ));
                }
                g.fields.push(field);
            }
            SchemaUpdate::DefineTypeDef(typedef) => {
                if self.typedefs.contains_key(&typedef.qname) {
                    return Err(BlinkError::strong(
                        ErrorKind::SchemaUpdateError,
                        format!("typedef {} already declared", typedef.qname),
                    ));
                }
                self.typedefs.insert(typedef.qname.clone(), typedef);
            }
            SchemaUpdate::Annotate {
                group,
                field,
                key,
                value,
            } => {
                let g = self.groups.get_mut(&group).ok_or_else(|| {
                    BlinkError::strong(ErrorKind::SchemaUpdateError, format!("unknown group {group}"))
                })?;
                match field {
                    Some(field_name) => {
                        let f = g.fields.iter_mut().find(|f| f.name == field_name).ok_or_else(|| {
                            BlinkError::strong(
                                ErrorKind::SchemaUpdateError,
                                format!("unknown field {field_name} on {group}"),
                            )
                        })?;
                        f.annotations.insert(key, value);
                    }
                    None => {
                        g.annotations.insert(key, value);
                    }
                }
            }
        }
        Ok(())
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
        "#,
        )
        .unwrap();
        Registry::from_schema(schema)
    }

    #[test]
    fn looks_up_by_name_and_id() {
        let reg = demo_registry();
        let by_name = reg.get_by_name(&QName::with_namespace("Demo", "Address")).unwrap();
        let by_id = reg.get_by_id(1).unwrap();
        assert_eq!(by_name.qname, by_id.qname);
    }

    #[test]
    fn unknown_id_is_error() {
        let reg = demo_registry();
        assert!(reg.get_by_id(9999).is_err());
    }

    #[test]
    fn apply_update_declares_new_group() {
        let mut reg = demo_registry();
        reg.apply_update(SchemaUpdate::DeclareGroup {
            qname: QName::with_namespace("Demo", "Greeting"),
            type_id: Some(9000),
            super_name: None,
        })
        .unwrap();
        reg.apply_update(SchemaUpdate::DefineField {
            group: QName::with_namespace("Demo", "Greeting"),
            field: crate::schema::FieldDef {
                name: "Text".to_string(),
                ty: crate::schema::Type::Str { max_size: None },
                optional: false,
                annotations: Default::default(),
            },
        })
        .unwrap();
        let group = reg.get_by_id(9000).unwrap();
        assert_eq!(group.fields.len(), 1);
    }

    #[test]
    fn dynamically_declared_group_inherits_supers_fields() {
        let mut reg = demo_registry();
        reg.apply_update(SchemaUpdate::DeclareGroup {
            qname: QName::with_namespace("Demo", "Manager"),
            type_id: Some(9001),
            super_name: Some(QName::with_namespace("Demo", "Employee")),
        })
        .unwrap();
        reg.apply_update(SchemaUpdate::DefineField {
            group: QName::with_namespace("Demo", "Manager"),
            field: crate::schema::FieldDef {
                name: "Department".to_string(),
                ty: crate::schema::Type::Str { max_size: None },
                optional: false,
                annotations: Default::default(),
            },
        })
        .unwrap();
        let manager = reg.get_by_id(9001).unwrap();
        let names: Vec<&str> = manager.fields.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["Name", "Age", "HomeAddress", "Department"]);
    }

    #[test]
    fn rejects_duplicate_type_id_leaving_registry_unchanged() {
        let mut reg = demo_registry();
        let before = reg.clone();
        let err = reg.apply_update(SchemaUpdate::DeclareGroup {
            qname: QName::with_namespace("Demo", "Dup"),
            type_id: Some(1), // already used by Address
            super_name: None,
        });
        assert!(err.is_err());
        assert_eq!(reg.groups.len(), before.groups.len());
    }
}
