//! Error taxonomy shared by every component, per the failure semantics design.
//!
//! Mirrors the shape of `bitcraft`'s `CompileError`/`ReadError` (plain sum
//! types, one variant per distinct failure), but adds `Display`/`source` via
//! `thiserror` and a [`Locator`] since Blink errors are meant to cross a
//! process boundary as human-readable text (unlike bitcraft's, which never
//! leave the calling stack frame).

use std::fmt;

/// Where an error occurred: a byte offset into a binary buffer, a
/// line/column pair into schema or Tag text, nothing (e.g. a resolver
/// error not tied to a single token), or any of the above qualified with
/// the source file it came from (§6.6 — [`crate::schema::load_schema_file`]
/// attaches the path it read to whatever locator the parser/resolver
/// produced).
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Locator {
    #[default]
    Unknown,
    ByteOffset(usize),
    LineColumn {
        line: u32,
        column: u32,
    },
    InFile {
        file: String,
        inner: Box<Locator>,
    },
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Locator::Unknown => write!(f, "<unknown location>"),
            Locator::ByteOffset(offset) => write!(f, "byte offset {offset}"),
            Locator::LineColumn { line, column } => write!(f, "line {line}, column {column}"),
            Locator::InFile { file, inner } => write!(f, "{file}: {inner}"),
        }
    }
}

/// Severity, per spec §7: strong errors always abort; weak errors obey the
/// decoder's [`crate::codec::Strictness`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Strong,
    Weak,
}

/// A single error raised by any component, tagged with its taxonomy kind,
/// severity and locator.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{kind} at {locator}: {message}")]
pub struct BlinkError {
    pub kind: ErrorKind,
    pub severity: Severity,
    pub locator: Locator,
    pub message: String,
}

impl BlinkError {
    pub fn new(kind: ErrorKind, severity: Severity, message: impl Into<String>) -> Self {
        BlinkError {
            kind,
            severity,
            locator: Locator::Unknown,
            message: message.into(),
        }
    }

    pub fn at(mut self, locator: Locator) -> Self {
        self.locator = locator;
        self
    }

    pub fn strong(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self::new(kind, Severity::Strong, message)
    }

    pub fn weak(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self::new(kind, Severity::Weak, message)
    }

    pub fn is_weak(&self) -> bool {
        self.severity == Severity::Weak
    }
}

/// Error taxonomy kinds from spec §7. Not a type hierarchy — every
/// `BlinkError` carries exactly one of these, plus severity and locator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    ParseError,
    ResolveError,
    FramingError,
    ValueError,
    WeakError,
    SchemaUpdateError,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::ParseError => "ParseError",
            ErrorKind::ResolveError => "ResolveError",
            ErrorKind::FramingError => "FramingError",
            ErrorKind::ValueError => "ValueError",
            ErrorKind::WeakError => "WeakError",
            ErrorKind::SchemaUpdateError => "SchemaUpdateError",
        };
        f.write_str(s)
    }
}

pub type BlinkResult<T> = Result<T, BlinkError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_locator_and_message() {
        let err = BlinkError::strong(ErrorKind::FramingError, "truncated frame")
            .at(Locator::ByteOffset(12));
        assert_eq!(
            err.to_string(),
            "FramingError at byte offset 12: truncated frame"
        );
    }

    #[test]
    fn weak_vs_strong() {
        let weak = BlinkError::weak(ErrorKind::WeakError, "unmapped enum");
        assert!(weak.is_weak());
        let strong = BlinkError::strong(ErrorKind::ValueError, "missing field");
        assert!(!strong.is_weak());
    }
}
