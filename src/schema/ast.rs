//! Untyped schema AST (C2): what [`super::parser`] produces directly from
//! text, before [`super::resolver`] turns names into resolved types.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pos {
    pub line: u32,
    pub column: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AstQName {
    pub namespace: Option<String>,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AstPrimitive {
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

/// An unresolved type expression as written in source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AstType {
    Primitive(AstPrimitive),
    Str { max_size: Option<u32> },
    Binary { max_size: Option<u32> },
    Fixed { size: u32, pos: Pos },
    Object,
    Sequence(Box<AstType>, Pos),
    /// A bare or `*`-prefixed reference to some other declared name; which
    /// of enum/typedef/static-group/dynamic-group it resolves to is
    /// decided later.
    Ref { qname: AstQName, dynamic: bool, pos: Pos },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AstAnnotation {
    pub key: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AstField {
    pub name: String,
    pub ty: AstType,
    pub optional: bool,
    pub annotations: Vec<AstAnnotation>,
    pub pos: Pos,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AstGroup {
    pub name: String,
    pub type_id: Option<u64>,
    pub super_name: Option<AstQName>,
    pub fields: Vec<AstField>,
    pub annotations: Vec<AstAnnotation>,
    pub pos: Pos,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AstEnumSymbol {
    pub name: String,
    pub value: i32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AstEnum {
    pub name: String,
    pub symbols: Vec<AstEnumSymbol>,
    pub pos: Pos,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AstTypeDef {
    pub name: String,
    pub target: AstType,
    pub pos: Pos,
}

/// Target of an incremental annotation (`Group@key=value` or
/// `Group.Field@key=value`), applied after the named declaration is parsed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AstIncrementalAnnotation {
    pub group: String,
    pub field: Option<String>,
    pub annotation: AstAnnotation,
    pub pos: Pos,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AstDecl {
    Group(AstGroup),
    Enum(AstEnum),
    TypeDef(AstTypeDef),
    IncrementalAnnotation(AstIncrementalAnnotation),
}

/// The full untyped AST for one schema source: an optional namespace
/// directive plus the declarations that follow, in lexical order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AstSchema {
    pub namespace: Option<String>,
    pub decls: Vec<AstDecl>,
}
