//! Qualified names (§3.1): `(namespace?, name)`, compared component-wise.

use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct QName {
    pub namespace: Option<String>,
    pub name: String,
}

impl QName {
    pub fn new(namespace: Option<impl Into<String>>, name: impl Into<String>) -> Self {
        QName {
            namespace: namespace.map(Into::into),
            name: name.into(),
        }
    }

    pub fn bare(name: impl Into<String>) -> Self {
        QName {
            namespace: None,
            name: name.into(),
        }
    }

    pub fn with_namespace(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        QName {
            namespace: Some(namespace.into()),
            name: name.into(),
        }
    }
}

impl fmt::Display for QName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{ns}:{}", self.name),
            None => write!(f, "{}", self.name),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_with_and_without_namespace() {
        assert_eq!(QName::with_namespace("Demo", "Company").to_string(), "Demo:Company");
        assert_eq!(QName::bare("Company").to_string(), "Company");
    }

    #[test]
    fn equality_is_component_wise() {
        assert_eq!(QName::bare("X"), QName::new(None::<String>, "X"));
        assert_ne!(QName::bare("X"), QName::with_namespace("Ns", "X"));
    }
}
