//! Schema AST, parser, resolver and resolved type universe (C2/C3).

pub mod ast;
pub mod lexer;
pub mod parser;
pub mod resolver;
pub mod types;

pub use types::{EnumDef, FieldDef, GroupDef, Primitive, Schema, Type, TypeDef};

use crate::error::{BlinkError, Locator};
use std::path::Path;

/// Parses and resolves `text` into a frozen [`Schema`] (§6.6).
pub fn compile_schema(text: &str) -> Result<Schema, BlinkError> {
    let ast = parser::parse(text)?;
    let schema = resolver::resolve(&ast)?;
    tracing::debug!(groups = schema.groups.len(), enums = schema.enums.len(), "schema compiled");
    Ok(schema)
}

/// Reads and compiles a `.blink` schema file (§6.6). Any `ParseError`/
/// `ResolveError` raised along the way has its locator wrapped in
/// [`Locator::InFile`] so the error text names which file failed, not just
/// the line/column within it.
pub fn load_schema_file(path: impl AsRef<Path>) -> Result<Schema, BlinkError> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path).map_err(|e| {
        BlinkError::strong(
            crate::error::ErrorKind::ParseError,
            format!("cannot read schema file {}: {e}", path.display()),
        )
    })?;
    compile_schema(&text).map_err(|err| attach_file(err, path))
}

fn attach_file(mut err: BlinkError, path: &Path) -> BlinkError {
    err.locator = Locator::InFile {
        file: path.display().to_string(),
        inner: Box::new(err.locator.clone()),
    };
    err
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn load_schema_file_attaches_file_name_to_parse_error_locator() {
        let mut path = std::env::temp_dir();
        path.push("blink_schema_mod_test_load_schema_file.blink");
        std::fs::File::create(&path)
            .unwrap()
            .write_all(b"namespace Demo\nGreeting ->")
            .unwrap();

        let err = load_schema_file(&path).unwrap_err();
        let _ = std::fs::remove_file(&path);

        match err.locator {
            Locator::InFile { file: name, inner } => {
                assert_eq!(name, path.display().to_string());
                assert!(matches!(*inner, Locator::LineColumn { .. }));
            }
            other => panic!("expected Locator::InFile, got {other:?}"),
        }
    }
}
