//! Runtime value model (C5), §3.6. A closed set of tagged variants — every
//! codec pattern-matches [`Value`] directly, the same way `bitcraft`'s
//! `assembly::Value` (`I64`/`U64`/`Array`) is matched rather than dispatched
//! through a trait object.

use crate::qname::QName;
use std::collections::BTreeMap;

/// `DecimalValue { exponent, mantissa }` (§3.6): `mantissa * 10^exponent`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecimalValue {
    pub exponent: i8,
    pub mantissa: i64,
}

/// Named fields in linearized declaration order. A thin wrapper over an
/// ordered vector rather than a hash map, so JSON/XML/Tag encoders emit
/// fields deterministically (§5, "map ordering").
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FieldMap {
    entries: Vec<(String, Value)>,
}

impl FieldMap {
    pub fn new() -> Self {
        FieldMap::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, value: Value) {
        let name = name.into();
        if let Some(slot) = self.entries.iter_mut().find(|(n, _)| *n == name) {
            slot.1 = value;
        } else {
            self.entries.push((name, value));
        }
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.entries.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.entries.iter().map(|(n, v)| (n.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl FromIterator<(String, Value)> for FieldMap {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        let mut map = FieldMap::new();
        for (k, v) in iter {
            map.insert(k, v);
        }
        map
    }
}

/// An inline-embedded static group value (§3.6): no type id of its own,
/// type is known from the containing field's declared type.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StaticGroupValue {
    pub fields: FieldMap,
}

/// A top-level or dynamically-referenced message (§3.6).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Message {
    pub ty: QName,
    pub fields: FieldMap,
    pub extension: Vec<Message>,
    /// Set only by a permissive decode that could not resolve `ty` in the
    /// registry (§3.7): "a sentinel unknown-type flag").
    pub unknown_type: bool,
}

impl Message {
    pub fn new(ty: QName) -> Self {
        Message {
            ty,
            fields: FieldMap::new(),
            extension: Vec::new(),
            unknown_type: false,
        }
    }
}

/// The universal runtime value (§3.6). Optional fields are never stored as
/// an explicit `Value::Null` — they are simply absent from their
/// [`FieldMap`] (§3.7).
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    UInt(u64),
    Int(i64),
    Bool(bool),
    Float(f64),
    Str(String),
    Bytes(Vec<u8>),
    Decimal(DecimalValue),
    Sequence(Vec<Value>),
    StaticGroup(StaticGroupValue),
    Message(Box<Message>),
}

impl Value {
    pub fn as_uint(&self) -> Option<u64> {
        match self {
            Value::UInt(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn field_map_preserves_insertion_order() {
        let mut fields = FieldMap::new();
        fields.insert("b", Value::UInt(2));
        fields.insert("a", Value::UInt(1));
        let names: Vec<_> = fields.iter().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["b", "a"]);
    }

    #[test]
    fn field_map_overwrite_keeps_position() {
        let mut fields = FieldMap::new();
        fields.insert("a", Value::UInt(1));
        fields.insert("b", Value::UInt(2));
        fields.insert("a", Value::UInt(99));
        let names: Vec<_> = fields.iter().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["a", "b"]);
        assert_eq!(fields.get("a"), Some(&Value::UInt(99)));
    }
}
