//! Record key and dataset name rules, and record sizing.

use std::sync::OnceLock;

use regex::Regex;

use crate::error::ValidationError;
use crate::record::Record;

/// Longest accepted key or dataset name, in characters.
pub const MAX_NAME_LENGTH: usize = 128;

fn name_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[a-zA-Z0-9_.:-]+$").expect("Invalid regex"))
}

/// Keys may contain ASCII letters, digits and `_ . : -`, up to 128 characters.
pub fn validate_record_key(key: &str) -> Result<(), ValidationError> {
    if key.is_empty() {
        return Err(ValidationError::EmptyKey);
    }
    let len = key.chars().count();
    if len > MAX_NAME_LENGTH {
        return Err(ValidationError::KeyTooLong {
            len,
            max: MAX_NAME_LENGTH,
        });
    }
    if !name_pattern().is_match(key) {
        return Err(ValidationError::InvalidKey(key.to_string()));
    }
    Ok(())
}

/// Dataset names follow the same rules as keys.
pub fn validate_dataset_name(name: &str) -> Result<(), ValidationError> {
    if name.is_empty() {
        return Err(ValidationError::EmptyDatasetName);
    }
    let len = name.chars().count();
    if len > MAX_NAME_LENGTH {
        return Err(ValidationError::DatasetNameTooLong {
            len,
            max: MAX_NAME_LENGTH,
        });
    }
    if !name_pattern().is_match(name) {
        return Err(ValidationError::InvalidDatasetName(name.to_string()));
    }
    Ok(())
}

/// UTF-8 byte size of key plus value. `None` for an absent record.
pub fn record_size(record: Option<&Record>) -> Option<usize> {
    record.map(|r| r.key.len() + r.value.as_ref().map_or(0, String::len))
}

/// Sum of [`record_size`] over live records; tombstones count for nothing.
pub fn total_size<'a>(records: impl IntoIterator<Item = &'a Record>) -> usize {
    records
        .into_iter()
        .filter(|r| !r.is_deleted())
        .filter_map(|r| record_size(Some(r)))
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_keys() {
        for key in ["a", "high_score", "level:1", "x.y-z", &"k".repeat(128)] {
            assert!(validate_record_key(key).is_ok(), "{key}");
        }
    }

    #[test]
    fn test_invalid_keys() {
        assert_eq!(validate_record_key(""), Err(ValidationError::EmptyKey));
        assert!(matches!(
            validate_record_key(&"k".repeat(129)),
            Err(ValidationError::KeyTooLong { len: 129, .. })
        ));
        assert!(matches!(
            validate_record_key("with space"),
            Err(ValidationError::InvalidKey(_))
        ));
        assert!(validate_record_key("ключ").is_err());
    }

    #[test]
    fn test_dataset_names() {
        assert!(validate_dataset_name("prefs").is_ok());
        assert!(validate_dataset_name("prefs.us-east-1:abc").is_ok());
        assert_eq!(
            validate_dataset_name(""),
            Err(ValidationError::EmptyDatasetName)
        );
        assert!(validate_dataset_name("a/b").is_err());
    }

    #[test]
    fn test_sizes() {
        let live = Record::local("key", Some("héllo".into()), 0);
        let tombstone = Record::local("gone", None, 0);
        assert_eq!(record_size(Some(&live)), Some(3 + 6));
        assert_eq!(record_size(Some(&tombstone)), Some(4));
        assert_eq!(record_size(None), None);
        assert_eq!(total_size([&live, &tombstone]), 9);
    }

    mod props {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn test_pattern_keys_accepted(key in "[a-zA-Z0-9_.:-]{1,128}") {
                prop_assert!(validate_record_key(&key).is_ok());
                prop_assert!(validate_dataset_name(&key).is_ok());
            }

            #[test]
            fn test_foreign_char_rejected(
                prefix in "[a-z]{0,10}",
                bad in "[ /@#?\\\\]",
                suffix in "[a-z]{0,10}",
            ) {
                let key = format!("{prefix}{bad}{suffix}");
                prop_assert!(validate_record_key(&key).is_err());
            }
        }
    }
}
