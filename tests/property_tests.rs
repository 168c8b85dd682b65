//! Property-based tests for configuration validation and credential
//! references
//!
//! These tests verify that:
//! - Missing required keys are reported exactly, in a fixed order
//! - Credential references accept every well-formed variable name
//! - Malformed references are always rejected

#[cfg(test)]
mod tests {
    use proptest::prelude::*;
    use serde_yaml::{Mapping, Value};
    use sqlconnect::config::{check_required_keys, RawEntry, REQUIRED_KEYS};
    use sqlconnect::credentials::CredentialRef;
    use sqlconnect::SqlconnectError;

    fn arb_var_name() -> impl Strategy<Value = String> {
        "[A-Za-z_][A-Za-z0-9_]{0,30}"
    }

    /// Value stored for a present key: a real value, blank text or null.
    fn arb_field_value() -> impl Strategy<Value = Option<Value>> {
        prop_oneof![
            3 => "[a-z0-9.-]{1,12}".prop_map(|s| Some(Value::String(s))),
            1 => Just(Some(Value::String("   ".to_string()))),
            1 => Just(Some(Value::Null)),
            1 => Just(None),
        ]
    }

    proptest! {
        #[test]
        fn missing_keys_are_exactly_the_absent_or_blank_ones(
            values in proptest::collection::vec(arb_field_value(), REQUIRED_KEYS.len())
        ) {
            let mut mapping = Mapping::new();
            let mut expected = Vec::new();
            for (key, value) in REQUIRED_KEYS.iter().zip(&values) {
                match value {
                    Some(Value::String(s)) if !s.trim().is_empty() => {}
                    _ => expected.push(key.to_string()),
                }
                if let Some(value) = value {
                    mapping.insert(Value::String(key.to_string()), value.clone());
                }
            }
            let entry = RawEntry::new(mapping);

            prop_assert_eq!(entry.missing_required_keys(), expected.clone());
            match check_required_keys("prop", &entry) {
                Ok(()) => prop_assert!(expected.is_empty()),
                Err(SqlconnectError::MissingFields { keys, connection }) => {
                    prop_assert_eq!(keys, expected);
                    prop_assert_eq!(connection, "prop");
                }
                Err(other) => prop_assert!(false, "unexpected error: {}", other),
            }
        }

        #[test]
        fn braced_and_bare_references_name_the_same_variable(name in arb_var_name()) {
            let braced = CredentialRef::parse(&format!("${{{name}}}")).unwrap();
            let bare = CredentialRef::parse(&format!("  {name} ")).unwrap();
            prop_assert_eq!(braced.var_name(), name.as_str());
            prop_assert_eq!(&braced, &bare);
            prop_assert_eq!(braced.to_string(), format!("${{{name}}}"));
        }

        #[test]
        fn references_with_punctuation_are_rejected(
            name in arb_var_name(),
            junk in "[-@:/!#%+ ]{1,3}"
        ) {
            let literal = format!("{name}{junk}x");
            prop_assert!(CredentialRef::parse(&literal).is_err());
            let braced_literal = format!("${{{literal}}}");
            prop_assert!(CredentialRef::parse(&braced_literal).is_err());
        }
    }
}
