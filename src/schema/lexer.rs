//! Tokenizer for `.blink` schema text (C2). Comments start with `#` and run
//! to end of line (§6.1).

use super::ast::Pos;
use crate::error::{BlinkError, ErrorKind, Locator};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenKind {
    Ident(String),
    Number(i64),
    Str(String),
    Slash,
    Colon,
    Arrow,    // ->
    Comma,
    Question,
    Star,
    At,
    Equals,
    Lt,
    Gt,
    Dot,
    LParen,
    RParen,
    Eof,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    pub pos: Pos,
}

pub struct Lexer<'a> {
    src: &'a [u8],
    idx: usize,
    line: u32,
    column: u32,
}

impl<'a> Lexer<'a> {
    pub fn new(src: &'a str) -> Self {
        Lexer {
            src: src.as_bytes(),
            idx: 0,
            line: 1,
            column: 1,
        }
    }

    fn pos(&self) -> Pos {
        Pos {
            line: self.line,
            column: self.column,
        }
    }

    fn peek(&self) -> Option<u8> {
        self.src.get(self.idx).copied()
    }

    fn bump(&mut self) -> Option<u8> {
        let c = self.peek()?;
        self.idx += 1;
        if c == b'\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        Some(c)
    }

    fn skip_trivia(&mut self) {
        loop {
            match self.peek() {
                Some(b' ') | Some(b'\t') | Some(b'\r') | Some(b'\n') => {
                    self.bump();
                }
                Some(b'#') => {
                    while let Some(c) = self.peek() {
                        if c == b'\n' {
                            break;
                        }
                        self.bump();
                    }
                }
                _ => break,
            }
        }
    }

    pub fn next_token(&mut self) -> Result<Token, BlinkError> {
        self.skip_trivia();
        let pos = self.pos();
        let Some(c) = self.peek() else {
            return Ok(Token {
                kind: TokenKind::Eof,
                pos,
            });
        };

        let kind = match c {
            b'/' => {
                self.bump();
                TokenKind::Slash
            }
            b':' => {
                self.bump();
                TokenKind::Colon
            }
            b',' => {
                self.bump();
                TokenKind::Comma
            }
            b'?' => {
                self.bump();
                TokenKind::Question
            }
            b'*' => {
                self.bump();
                TokenKind::Star
            }
            b'@' => {
                self.bump();
                TokenKind::At
            }
            b'=' => {
                self.bump();
                TokenKind::Equals
            }
            b'<' => {
                self.bump();
                TokenKind::Lt
            }
            b'>' => {
                self.bump();
                TokenKind::Gt
            }
            b'.' => {
                self.bump();
                TokenKind::Dot
            }
            b'(' => {
                self.bump();
                TokenKind::LParen
            }
            b')' => {
                self.bump();
                TokenKind::RParen
            }
            b'-' => {
                self.bump();
                if self.peek() == Some(b'>') {
                    self.bump();
                    TokenKind::Arrow
                } else {
                    return Err(self.err(pos, "expected '->'"));
                }
            }
            b'"' => {
                self.bump();
                let mut s = String::new();
                loop {
                    match self.bump() {
                        Some(b'"') => break,
                        Some(b'\\') => {
                            let escaped = self.bump().ok_or_else(|| self.err(pos, "unterminated string"))?;
                            s.push(escaped as char);
                        }
                        Some(c) => s.push(c as char),
                        None => return Err(self.err(pos, "unterminated string literal")),
                    }
                }
                TokenKind::Str(s)
            }
            c if c.is_ascii_digit() => {
                let start = self.idx;
                while self.peek().map(|c| c.is_ascii_digit()).unwrap_or(false) {
                    self.bump();
                }
                let text = std::str::from_utf8(&self.src[start..self.idx]).unwrap();
                let n: i64 = text
                    .parse()
                    .map_err(|_| self.err(pos, "invalid number literal"))?;
                TokenKind::Number(n)
            }
            c if c.is_ascii_alphabetic() || c == b'_' => {
                let start = self.idx;
                while self
                    .peek()
                    .map(|c| c.is_ascii_alphanumeric() || c == b'_')
                    .unwrap_or(false)
                {
                    self.bump();
                }
                let text = std::str::from_utf8(&self.src[start..self.idx]).unwrap();
                TokenKind::Ident(text.to_string())
            }
            other => {
                return Err(self.err(pos, format!("unexpected character '{}'", other as char)));
            }
        };

        Ok(Token { kind, pos })
    }

    fn err(&self, pos: Pos, message: impl Into<String>) -> BlinkError {
        BlinkError::strong(ErrorKind::ParseError, message).at(Locator::LineColumn {
            line: pos.line,
            column: pos.column,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tokens(src: &str) -> Vec<TokenKind> {
        let mut lexer = Lexer::new(src);
        let mut out = Vec::new();
        loop {
            let tok = lexer.next_token().unwrap();
            if tok.kind == TokenKind::Eof {
                break;
            }
            out.push(tok.kind);
        }
        out
    }

    #[test]
    fn lexes_group_decl() {
        let toks = tokens("Address/1 -> string Street, u32 ZipCode");
        assert_eq!(
            toks,
            vec![
                TokenKind::Ident("Address".into()),
                TokenKind::Slash,
                TokenKind::Number(1),
                TokenKind::Arrow,
                TokenKind::Ident("string".into()),
                TokenKind::Ident("Street".into()),
                TokenKind::Comma,
                TokenKind::Ident("u32".into()),
                TokenKind::Ident("ZipCode".into()),
            ]
        );
    }

    #[test]
    fn skips_comments() {
        let toks = tokens("# a comment\nnamespace Demo");
        assert_eq!(
            toks,
            vec![TokenKind::Ident("namespace".into()), TokenKind::Ident("Demo".into())]
        );
    }

    #[test]
    fn lexes_annotation() {
        let toks = tokens("@owner=\"ops\"");
        assert_eq!(
            toks,
            vec![TokenKind::At, TokenKind::Ident("owner".into()), TokenKind::Equals, TokenKind::Str("ops".into())]
        );
    }
}
