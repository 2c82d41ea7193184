//! Tag sets attached to cloud resources

use std::collections::BTreeMap;

use crate::resource::Value;

/// Tag set; ordered so rendered plans are stable
pub type Tags = BTreeMap<String, String>;

/// Merge tag sets in order. Later sets win on key conflicts.
pub fn merge_tags(sets: &[&Tags]) -> Tags {
    let mut merged = Tags::new();
    for set in sets {
        for (key, value) in *set {
            merged.insert(key.clone(), value.clone());
        }
    }
    merged
}

/// A single-entry tag set, typically `Name`
pub fn tag(key: &str, value: impl Into<String>) -> Tags {
    Tags::from([(key.to_string(), value.into())])
}

pub fn to_value(tags: &Tags) -> Value {
    Value::string_map(tags)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn later_sets_win() {
        let first = Tags::from([("A".to_string(), "1".to_string())]);
        let second = Tags::from([
            ("A".to_string(), "2".to_string()),
            ("B".to_string(), "3".to_string()),
        ]);
        let merged = merge_tags(&[&first, &second]);
        assert_eq!(merged, second);
    }

    #[test]
    fn name_tag_can_be_overridden_by_caller_tags() {
        let caller = tag("Name", "custom");
        let merged = merge_tags(&[&tag("Name", "dev"), &Tags::new(), &caller]);
        assert_eq!(merged.get("Name").map(String::as_str), Some("custom"));
    }

    #[test]
    fn empty_merge() {
        assert!(merge_tags(&[]).is_empty());
    }
}
