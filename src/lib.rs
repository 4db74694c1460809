//! Schema-driven codecs for the Blink protocol (beta4).
//!
//! A single resolved [`schema::Schema`] — parsed from `.blink` source via
//! [`compile_schema`]/[`load_schema_file`] — drives a [`registry::Registry`]
//! against which application messages ([`value::Message`]) are encoded and
//! decoded in five interchange formats: [`codec::compact`] (variable-length
//! binary), [`codec::native`] (fixed-layout binary), [`codec::tag`] (a
//! single-line text form), and, behind their respective feature flags,
//! [`codec::json`] and [`codec::xml`]. [`dynschema`] interprets reserved
//! type-id frames to mutate a registry at runtime.
//!
//! Every encode/decode call is a pure function of its inputs: no global
//! state, no thread spawning, no I/O beyond what the caller's buffers
//! already hold. The registry is the one piece of mutable state and it is
//! always passed in explicitly.

pub mod codec;
pub mod dynschema;
pub mod error;
pub mod qname;
pub mod registry;
pub mod schema;
pub mod value;
pub mod vlc;

pub use codec::Strictness;
pub use error::{BlinkError, BlinkResult, ErrorKind, Locator, Severity};
pub use qname::QName;
pub use registry::Registry;
pub use schema::{compile_schema, load_schema_file, Schema};
pub use value::{DecimalValue, FieldMap, Message, StaticGroupValue, Value};

#[cfg(test)]
mod tests {
    use super::*;
    use codec::Strictness;

    #[test]
    fn seed_scenario_round_trips_through_compact() {
        let schema = compile_schema(
            r#"
            namespace Demo
            Address/1 -> string Street, string City, u32 ZipCode
            Employee/2 -> string Name, u32 Age, Address HomeAddress
            Manager/3 : Employee -> string Department, u32 TeamSize
            Company/4 -> string CompanyName, Manager CEO
        "#,
        )
        .unwrap();
        let registry = Registry::from_schema(schema);

        let mut address = StaticGroupValue::default();
        address.fields.insert("Street", Value::Str("123 Main St".into()));
        address.fields.insert("City", Value::Str("San Francisco".into()));
        address.fields.insert("ZipCode", Value::UInt(94102));

        let mut manager = FieldMap::new();
        manager.insert("Name", Value::Str("Alice".into()));
        manager.insert("Age", Value::UInt(45));
        manager.insert("HomeAddress", Value::StaticGroup(address));
        manager.insert("Department", Value::Str("Engineering".into()));
        manager.insert("TeamSize", Value::UInt(50));

        let mut company = Message::new(QName::with_namespace("Demo", "Company"));
        company.fields.insert("CompanyName", Value::Str("TechCorp".into()));
        company
            .fields
            .insert("CEO", Value::StaticGroup(StaticGroupValue { fields: manager }));

        let bytes = codec::compact::encode(&company, &registry).unwrap();
        let (decoded, consumed) = codec::compact::decode_one(&bytes, 0, &registry, Strictness::Strict).unwrap();
        assert_eq!(consumed, bytes.len());
        assert_eq!(decoded, company);
    }
}
