//! Resolved type universe (§3.2–§3.5): the output of [`super::resolver`],
//! never constructed directly from parsed text.

use crate::qname::QName;
use std::collections::BTreeMap;

/// A primitive scalar type (§3.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Primitive {
    U8,
    U16,
    U32,
    U64,
    I8,
    I16,
    I32,
    I64,
    Bool,
    F64,
    Decimal,
    MilliTime,
    NanoTime,
    Date,
    TimeOfDayMilli,
    TimeOfDayNano,
}

impl Primitive {
    /// Declared bit width, used for VLC range checks (§4.1) and Native
    /// fixed-region sizing (§4.6.2). Variable-width VLC types (decimal
    /// components, time types) use their natural integer backing width.
    pub fn width_bits(self) -> u32 {
        match self {
            Primitive::U8 | Primitive::I8 | Primitive::Bool => 8,
            Primitive::U16 | Primitive::I16 => 16,
            Primitive::U32 | Primitive::I32 | Primitive::Date | Primitive::TimeOfDayMilli => 32,
            Primitive::U64
            | Primitive::I64
            | Primitive::F64
            | Primitive::MilliTime
            | Primitive::NanoTime
            | Primitive::TimeOfDayNano => 64,
            Primitive::Decimal => 64, // mantissa width; exponent is i8 separately
        }
    }

    /// Blink beta4 fixes the signedness of each time/date type: `date`,
    /// `millitime` and `nanotime` count from an epoch and may be negative;
    /// `timeOfDayMilli`/`timeOfDayNano` count up from midnight and cannot.
    pub fn is_signed(self) -> bool {
        matches!(
            self,
            Primitive::I8
                | Primitive::I16
                | Primitive::I32
                | Primitive::I64
                | Primitive::MilliTime
                | Primitive::NanoTime
                | Primitive::Date
        )
    }

    /// Native Binary fixed-region width in bytes (§4.6.2). Decimal is
    /// handled as a fixed 9 bytes (i8 exponent + i64 mantissa) directly by
    /// the Native codec rather than through this table.
    pub fn native_width_bytes(self) -> usize {
        match self {
            Primitive::U8 | Primitive::I8 | Primitive::Bool => 1,
            Primitive::U16 | Primitive::I16 => 2,
            Primitive::U32 | Primitive::I32 | Primitive::Date | Primitive::TimeOfDayMilli => 4,
            Primitive::U64
            | Primitive::I64
            | Primitive::F64
            | Primitive::MilliTime
            | Primitive::NanoTime
            | Primitive::TimeOfDayNano => 8,
            Primitive::Decimal => 9,
        }
    }
}

/// The full resolved type universe for a field (§3.2).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Type {
    Primitive(Primitive),
    /// `string(max?)` — byte-bearing, UTF-8 checked on decode.
    Str { max_size: Option<u32> },
    /// `binary(max?)` — byte-bearing, no encoding constraint.
    Binary { max_size: Option<u32> },
    /// `fixed(size)` — exact length, mandatory.
    Fixed { size: u32 },
    /// Resolved reference to an enum.
    EnumRef(QName),
    /// Resolved reference to a typedef; the resolver follows typedef
    /// chains transitively before field resolution completes, so this
    /// variant should not normally remain in a fully resolved `FieldDef`
    /// (kept here for typedef-chain diagnostics).
    TypeDefRef(QName),
    /// `sequence<T>`, T non-sequence (nested sequences rejected by the
    /// resolver).
    Sequence(Box<Type>),
    /// Inline embedding of another group, nullable by presence.
    StaticGroupRef(QName),
    /// Runtime-polymorphic reference: decoded type must be `base` or a
    /// descendant (§3.2, W15 in §4.5.5).
    DynamicGroupRef(QName),
    /// The universal dynamic reference: any group.
    Object,
}

impl Type {
    pub fn is_sequence(&self) -> bool {
        matches!(self, Type::Sequence(_))
    }
}

/// A single field after inheritance linearization (§3.4).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDef {
    pub name: String,
    pub ty: Type,
    pub optional: bool,
    pub annotations: BTreeMap<String, String>,
}

/// A resolved group (message type), §3.3. `fields` is already linearized:
/// `super.fields ++ local.fields`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupDef {
    pub qname: QName,
    pub type_id: Option<u64>,
    pub super_name: Option<QName>,
    pub fields: Vec<FieldDef>,
    pub annotations: BTreeMap<String, String>,
}

impl GroupDef {
    pub fn field(&self, name: &str) -> Option<&FieldDef> {
        self.fields.iter().find(|f| f.name == name)
    }
}

/// `symbol -> i32` ordered mapping (§3.5).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnumDef {
    pub qname: QName,
    /// Declaration order preserved; symbol values need not be sequential.
    pub symbols: Vec<(String, i32)>,
}

impl EnumDef {
    pub fn value_of(&self, symbol: &str) -> Option<i32> {
        self.symbols.iter().find(|(s, _)| s == symbol).map(|(_, v)| *v)
    }

    pub fn symbol_of(&self, value: i32) -> Option<&str> {
        self.symbols
            .iter()
            .find(|(_, v)| *v == value)
            .map(|(s, _)| s.as_str())
    }
}

/// `name -> Type` alias, already resolved transitively (§3.5).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeDef {
    pub qname: QName,
    pub target: Type,
}

/// The frozen, fully resolved schema (§3.8): output of [`super::resolver`].
#[derive(Debug, Clone, Default)]
pub struct Schema {
    pub groups: Vec<GroupDef>,
    pub enums: Vec<EnumDef>,
    pub typedefs: Vec<TypeDef>,
}

impl Schema {
    pub fn group(&self, qname: &QName) -> Option<&GroupDef> {
        self.groups.iter().find(|g| &g.qname == qname)
    }

    pub fn enum_def(&self, qname: &QName) -> Option<&EnumDef> {
        self.enums.iter().find(|e| &e.qname == qname)
    }

    pub fn typedef(&self, qname: &QName) -> Option<&TypeDef> {
        self.typedefs.iter().find(|t| &t.qname == qname)
    }

    /// Walks the `super` chain of `group`, yielding `group` then each
    /// ancestor in order. Used by the Compact codec's polymorphism check
    /// (§4.5.5).
    pub fn ancestry<'a>(&'a self, group: &'a GroupDef) -> Vec<&'a GroupDef> {
        let mut chain = vec![group];
        let mut current = group;
        while let Some(super_name) = &current.super_name {
            match self.group(super_name) {
                Some(parent) => {
                    chain.push(parent);
                    current = parent;
                }
                None => break,
            }
        }
        chain
    }

    /// True if `candidate` is `base` or a (transitive) descendant of it.
    pub fn is_descendant_of(&self, candidate: &GroupDef, base: &QName) -> bool {
        self.ancestry(candidate).iter().any(|g| &g.qname == base)
    }
}
