//! KeywordSet — immutable named bag of program keywords, unique by hash.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// A keyword set. `values` holds arbitrary scalar/array/nested JSON; keys are
/// the program-specific keyword names (e.g. `"scf_type"` -> `"df"`).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct KeywordSet {
    /// User-facing label; not part of the hash.
    pub comments: Option<String>,
    pub values: BTreeMap<String, Value>,
}

impl KeywordSet {
    pub fn new(values: BTreeMap<String, Value>) -> Self {
        Self {
            comments: None,
            values,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn construct_and_is_empty() {
        assert!(KeywordSet::default().is_empty());
        let mut values = BTreeMap::new();
        values.insert("scf_type".to_string(), json!("df"));
        assert!(!KeywordSet::new(values).is_empty());
    }
}
