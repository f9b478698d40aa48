//! Document-level metadata comparison
//!
//! Metadata is compared once per run over the union of both documents'
//! key sets. Differences are keyed by metadata key at the result level;
//! they never attach to a page.

use crate::types::{ChangeType, MetadataDifference, Severity};
use std::collections::{BTreeMap, BTreeSet};

/// Keys whose change marks a different document identity
const IDENTITY_KEYS: &[&str] = &["Title", "Author"];

/// Diff two metadata maps
pub fn compare_metadata(
    base: &BTreeMap<String, String>,
    compare: &BTreeMap<String, String>,
) -> BTreeMap<String, MetadataDifference> {
    let keys: BTreeSet<&String> = base.keys().chain(compare.keys()).collect();
    let mut differences = BTreeMap::new();

    for key in keys {
        let base_value = base.get(key.as_str());
        let compare_value = compare.get(key.as_str());

        let difference = match (base_value, compare_value) {
            (None, Some(value)) => MetadataDifference {
                change_type: ChangeType::Added,
                severity: severity_for(key),
                base_value: None,
                compare_value: Some(value.clone()),
                description: format!("Metadata \"{}\" added: \"{}\"", key, value),
            },
            (Some(value), None) => MetadataDifference {
                change_type: ChangeType::Deleted,
                severity: severity_for(key),
                base_value: Some(value.clone()),
                compare_value: None,
                description: format!("Metadata \"{}\" removed (was \"{}\")", key, value),
            },
            (Some(b), Some(c)) if b != c => MetadataDifference {
                change_type: ChangeType::Modified,
                severity: severity_for(key),
                base_value: Some(b.clone()),
                compare_value: Some(c.clone()),
                description: format!("Metadata \"{}\" changed: \"{}\" -> \"{}\"", key, b, c),
            },
            _ => continue,
        };
        differences.insert((*key).clone(), difference);
    }

    differences
}

fn severity_for(key: &str) -> Severity {
    if IDENTITY_KEYS.contains(&key) {
        Severity::Major
    } else {
        Severity::Minor
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map(entries: &[(&str, &str)]) -> BTreeMap<String, String> {
        entries
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_identical_maps_produce_nothing() {
        let m = map(&[("Title", "Report"), ("Producer", "lib")]);
        assert!(compare_metadata(&m, &m).is_empty());
    }

    #[test]
    fn test_added_deleted_modified() {
        let base = map(&[("Title", "Report"), ("Author", "Alice")]);
        let compare = map(&[("Title", "Report v2"), ("Producer", "lib")]);

        let diffs = compare_metadata(&base, &compare);
        assert_eq!(diffs.len(), 3);
        assert_eq!(diffs["Title"].change_type, ChangeType::Modified);
        assert_eq!(diffs["Author"].change_type, ChangeType::Deleted);
        assert_eq!(diffs["Producer"].change_type, ChangeType::Added);
    }

    #[test]
    fn test_identity_keys_are_major() {
        let base = map(&[("Title", "A"), ("Producer", "x")]);
        let compare = map(&[("Title", "B"), ("Producer", "y")]);
        let diffs = compare_metadata(&base, &compare);
        assert_eq!(diffs["Title"].severity, Severity::Major);
        assert_eq!(diffs["Producer"].severity, Severity::Minor);
    }

    #[test]
    fn test_empty_maps() {
        assert!(compare_metadata(&BTreeMap::new(), &BTreeMap::new()).is_empty());
    }
}
