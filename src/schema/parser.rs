//! Recursive-descent parser for `.blink` schema text (C2), built directly on
//! [`super::lexer`] with one token of lookahead.

use super::ast::*;
use super::lexer::{Lexer, Token, TokenKind};
use crate::error::{BlinkError, ErrorKind, Locator};

pub struct Parser<'a> {
    lexer: Lexer<'a>,
    current: Token,
}

impl<'a> Parser<'a> {
    pub fn new(src: &'a str) -> Result<Self, BlinkError> {
        let mut lexer = Lexer::new(src);
        let current = lexer.next_token()?;
        Ok(Parser { lexer, current })
    }

    fn bump(&mut self) -> Result<Token, BlinkError> {
        let next = self.lexer.next_token()?;
        Ok(std::mem::replace(&mut self.current, next))
    }

    fn err(&self, message: impl Into<String>) -> BlinkError {
        let pos = self.current.pos;
        BlinkError::strong(ErrorKind::ParseError, message).at(Locator::LineColumn {
            line: pos.line,
            column: pos.column,
        })
    }

    fn expect_ident(&mut self) -> Result<String, BlinkError> {
        match self.bump()?.kind {
            TokenKind::Ident(s) => Ok(s),
            other => Err(self.err(format!("expected identifier, found {other:?}"))),
        }
    }

    fn expect(&mut self, kind: TokenKind) -> Result<(), BlinkError> {
        if self.current.kind == kind {
            self.bump()?;
            Ok(())
        } else {
            Err(self.err(format!("expected {kind:?}, found {:?}", self.current.kind)))
        }
    }

    fn at(&self, kind: &TokenKind) -> bool {
        &self.current.kind == kind
    }

    /// Parses a full schema source: optional `namespace` directive followed
    /// by zero or more declarations.
    pub fn parse_schema(&mut self) -> Result<AstSchema, BlinkError> {
        let mut schema = AstSchema::default();

        if self.at(&TokenKind::Ident("namespace".into())) {
            self.bump()?;
            schema.namespace = Some(self.expect_ident()?);
        }

        while self.current.kind != TokenKind::Eof {
            schema.decls.push(self.parse_decl()?);
        }

        Ok(schema)
    }

    fn parse_decl(&mut self) -> Result<AstDecl, BlinkError> {
        if self.at(&TokenKind::Ident("enum".into())) {
            self.bump()?;
            return Ok(AstDecl::Enum(self.parse_enum()?));
        }
        if self.at(&TokenKind::Ident("type".into())) {
            self.bump()?;
            return Ok(AstDecl::TypeDef(self.parse_typedef()?));
        }

        let pos = self.current.pos;
        let name = self.expect_ident()?;

        // Incremental annotation: `Name['.'Field]'@'key'='value`.
        if self.at(&TokenKind::Dot) || self.at(&TokenKind::At) {
            let field = if self.at(&TokenKind::Dot) {
                self.bump()?;
                Some(self.expect_ident()?)
            } else {
                None
            };
            self.expect(TokenKind::At)?;
            let key = self.expect_ident()?;
            self.expect(TokenKind::Equals)?;
            let value = self.parse_annotation_value()?;
            return Ok(AstDecl::IncrementalAnnotation(AstIncrementalAnnotation {
                group: name,
                field,
                annotation: AstAnnotation { key, value },
                pos,
            }));
        }

        Ok(AstDecl::Group(self.parse_group(name, pos)?))
    }

    fn parse_annotation_value(&mut self) -> Result<String, BlinkError> {
        match self.bump()?.kind {
            TokenKind::Str(s) => Ok(s),
            TokenKind::Ident(s) => Ok(s),
            TokenKind::Number(n) => Ok(n.to_string()),
            other => Err(self.err(format!("expected annotation value, found {other:?}"))),
        }
    }

    fn parse_annotations(&mut self) -> Result<Vec<AstAnnotation>, BlinkError> {
        let mut out = Vec::new();
        while self.at(&TokenKind::At) {
            self.bump()?;
            let key = self.expect_ident()?;
            self.expect(TokenKind::Equals)?;
            let value = self.parse_annotation_value()?;
            out.push(AstAnnotation { key, value });
        }
        Ok(out)
    }

    fn parse_group(&mut self, name: String, pos: Pos) -> Result<AstGroup, BlinkError> {
        let type_id = if self.at(&TokenKind::Slash) {
            self.bump()?;
            match self.bump()?.kind {
                TokenKind::Number(n) => Some(n as u64),
                other => return Err(self.err(format!("expected type id, found {other:?}"))),
            }
        } else {
            None
        };

        let super_name = if self.at(&TokenKind::Colon) {
            self.bump()?;
            Some(self.parse_qname()?)
        } else {
            None
        };

        let annotations = self.parse_annotations()?;

        let mut fields = Vec::new();
        if self.at(&TokenKind::Arrow) {
            self.bump()?;
            fields.push(self.parse_field()?);
            while self.at(&TokenKind::Comma) {
                self.bump()?;
                fields.push(self.parse_field()?);
            }
        }

        Ok(AstGroup {
            name,
            type_id,
            super_name,
            fields,
            annotations,
            pos,
        })
    }

    fn parse_field(&mut self) -> Result<AstField, BlinkError> {
        let pos = self.current.pos;
        let ty = self.parse_type()?;
        let name = self.expect_ident()?;
        let optional = if self.at(&TokenKind::Question) {
            self.bump()?;
            true
        } else {
            false
        };
        let annotations = self.parse_annotations()?;
        Ok(AstField {
            name,
            ty,
            optional,
            annotations,
            pos,
        })
    }

    fn parse_qname(&mut self) -> Result<AstQName, BlinkError> {
        let first = self.expect_ident()?;
        if self.at(&TokenKind::Colon) {
            self.bump()?;
            let name = self.expect_ident()?;
            Ok(AstQName {
                namespace: Some(first),
                name,
            })
        } else {
            Ok(AstQName {
                namespace: None,
                name: first,
            })
        }
    }

    fn parse_type(&mut self) -> Result<AstType, BlinkError> {
        let pos = self.current.pos;

        if self.at(&TokenKind::Star) {
            self.bump()?;
            let qname = self.parse_qname()?;
            return Ok(AstType::Ref {
                qname,
                dynamic: true,
                pos,
            });
        }

        if let TokenKind::Ident(name) = self.current.kind.clone() {
            match name.as_str() {
                "sequence" => {
                    self.bump()?;
                    self.expect(TokenKind::Lt)?;
                    let inner = self.parse_type()?;
                    self.expect(TokenKind::Gt)?;
                    return Ok(AstType::Sequence(Box::new(inner), pos));
                }
                "string" => {
                    self.bump()?;
                    let max_size = self.parse_optional_size()?;
                    return Ok(AstType::Str { max_size });
                }
                "binary" => {
                    self.bump()?;
                    let max_size = self.parse_optional_size()?;
                    return Ok(AstType::Binary { max_size });
                }
                "fixed" => {
                    self.bump()?;
                    self.expect(TokenKind::LParen)?;
                    let size = self.parse_required_size()?;
                    self.expect(TokenKind::RParen)?;
                    return Ok(AstType::Fixed { size, pos });
                }
                "object" => {
                    self.bump()?;
                    return Ok(AstType::Object);
                }
                _ => {
                    if let Some(prim) = primitive_from_keyword(&name) {
                        self.bump()?;
                        return Ok(AstType::Primitive(prim));
                    }
                }
            }
        }

        let qname = self.parse_qname()?;
        Ok(AstType::Ref {
            qname,
            dynamic: false,
            pos,
        })
    }

    /// `string`/`binary` optionally carry a max size in parens, e.g.
    /// `string(64)` (§3.2).
    fn parse_optional_size(&mut self) -> Result<Option<u32>, BlinkError> {
        if self.at(&TokenKind::LParen) {
            self.bump()?;
            let size = self.parse_required_size()?;
            self.expect(TokenKind::RParen)?;
            return Ok(Some(size));
        }
        Ok(None)
    }

    fn parse_required_size(&mut self) -> Result<u32, BlinkError> {
        match self.bump()?.kind {
            TokenKind::Number(n) if n >= 0 => Ok(n as u32),
            other => Err(self.err(format!("expected size literal, found {other:?}"))),
        }
    }

    fn parse_enum(&mut self) -> Result<AstEnum, BlinkError> {
        let pos = self.current.pos;
        let name = self.expect_ident()?;
        self.expect(TokenKind::Arrow)?;

        let mut symbols = Vec::new();
        let mut next_value = 0i32;
        loop {
            let sym_name = self.expect_ident()?;
            let value = if self.at(&TokenKind::Slash) {
                self.bump()?;
                match self.bump()?.kind {
                    TokenKind::Number(n) => n as i32,
                    other => return Err(self.err(format!("expected enum value, found {other:?}"))),
                }
            } else {
                next_value
            };
            next_value = value + 1;
            symbols.push(AstEnumSymbol { name: sym_name, value });

            if self.at(&TokenKind::Comma) {
                self.bump()?;
                continue;
            }
            break;
        }

        Ok(AstEnum { name, symbols, pos })
    }

    fn parse_typedef(&mut self) -> Result<AstTypeDef, BlinkError> {
        let pos = self.current.pos;
        let name = self.expect_ident()?;
        self.expect(TokenKind::Equals)?;
        let target = self.parse_type()?;
        Ok(AstTypeDef { name, target, pos })
    }
}

fn primitive_from_keyword(s: &str) -> Option<AstPrimitive> {
    Some(match s {
        "u8" => AstPrimitive::U8,
        "u16" => AstPrimitive::U16,
        "u32" => AstPrimitive::U32,
        "u64" => AstPrimitive::U64,
        "i8" => AstPrimitive::I8,
        "i16" => AstPrimitive::I16,
        "i32" => AstPrimitive::I32,
        "i64" => AstPrimitive::I64,
        "bool" => AstPrimitive::Bool,
        "f64" => AstPrimitive::F64,
        "decimal" => AstPrimitive::Decimal,
        "millitime" => AstPrimitive::MilliTime,
        "nanotime" => AstPrimitive::NanoTime,
        "date" => AstPrimitive::Date,
        "timeOfDayMilli" => AstPrimitive::TimeOfDayMilli,
        "timeOfDayNano" => AstPrimitive::TimeOfDayNano,
        _ => return None,
    })
}

/// Parses `src` into an untyped [`AstSchema`]. Entry point used by
/// [`crate::compile_schema`].
pub fn parse(src: &str) -> Result<AstSchema, BlinkError> {
    Parser::new(src)?.parse_schema()
}

/// Parses a single type expression in isolation, e.g. `"sequence<u32>"` or
/// `"*Demo:Base"`. Used by [`crate::dynschema`] to interpret the `FieldType`
/// string carried by a `FieldDef` schema-exchange message (§4.8).
pub fn parse_type_fragment(src: &str) -> Result<AstType, BlinkError> {
    let mut p = Parser::new(src)?;
    let ty = p.parse_type()?;
    if p.current.kind != TokenKind::Eof {
        return Err(p.err(format!("unexpected trailing token after type, found {:?}", p.current.kind)));
    }
    Ok(ty)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_seed_schema() {
        let src = r#"
            namespace Demo
            Address/1 -> string Street, string City, u32 ZipCode
            Employee/2 -> string Name, u32 Age, Address HomeAddress
            Manager/3 : Employee -> string Department, u32 TeamSize
            Company/4 -> string CompanyName, Manager CEO
        "#;
        let schema = parse(src).unwrap();
        assert_eq!(schema.namespace.as_deref(), Some("Demo"));
        assert_eq!(schema.decls.len(), 4);
        let AstDecl::Group(company) = &schema.decls[3] else {
            panic!("expected group");
        };
        assert_eq!(company.name, "Company");
        assert_eq!(company.type_id, Some(4));
        assert_eq!(company.fields.len(), 2);
    }

    #[test]
    fn parses_optional_field_and_sequence() {
        let src = "Greeting -> string Text?, sequence<u32> Counts";
        let schema = parse(src).unwrap();
        let AstDecl::Group(g) = &schema.decls[0] else {
            panic!()
        };
        assert!(g.fields[0].optional);
        assert!(matches!(g.fields[1].ty, AstType::Sequence(_, _)));
    }

    #[test]
    fn parses_enum() {
        let src = "enum Color -> Red, Green/5, Blue";
        let schema = parse(src).unwrap();
        let AstDecl::Enum(e) = &schema.decls[0] else {
            panic!()
        };
        assert_eq!(e.symbols[0].value, 0);
        assert_eq!(e.symbols[1].value, 5);
        assert_eq!(e.symbols[2].value, 6);
    }

    #[test]
    fn parses_dynamic_ref_and_incremental_annotation() {
        let src = "Envelope -> *Shape Payload\nEnvelope.Payload@doc=\"nested\"";
        let schema = parse(src).unwrap();
        let AstDecl::Group(g) = &schema.decls[0] else {
            panic!()
        };
        assert!(matches!(&g.fields[0].ty, AstType::Ref { dynamic: true, .. }));
        let AstDecl::IncrementalAnnotation(ann) = &schema.decls[1] else {
            panic!()
        };
        assert_eq!(ann.field.as_deref(), Some("Payload"));
    }

    #[test]
    fn parse_error_carries_line_column() {
        let err = parse("Group -> @@").unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::ParseError);
    }
}
