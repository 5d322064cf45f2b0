//! Label registry: a bijection between compact integer labels and identity names.
//!
//! A registry is rebuilt from scratch on every training run; labels are only
//! meaningful within the model generation they were trained with.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum LabelError {
    #[error("label {0} is not registered")]
    LabelNotFound(Label),
    #[error("identity {0:?} is not registered")]
    IdentityNotFound(String),
    #[error("identity {identity:?} is mapped by both label {first} and label {second}")]
    DuplicateIdentity {
        identity: String,
        first: Label,
        second: Label,
    },
    #[error("labels must run 0..n without gaps: expected {expected}, found {found}")]
    LabelGap { expected: Label, found: Label },
}

/// Integer surrogate key for an identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Label(pub u32);

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "BTreeMap<u32, String>", into = "BTreeMap<u32, String>")]
pub struct LabelRegistry {
    by_label: BTreeMap<Label, String>,
    by_identity: BTreeMap<String, Label>,
}

impl LabelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a registry with labels assigned in lexicographic identity order.
    ///
    /// Sorting makes the assignment independent of directory enumeration order.
    pub fn from_identities<I, S>(identities: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut names: Vec<String> = identities
            .into_iter()
            .map(|s| s.as_ref().to_string())
            .collect();
        names.sort();
        names.dedup();

        let mut registry = Self::new();
        for name in &names {
            registry.assign(name);
        }
        registry
    }

    /// Return the label for `identity`, assigning the next free one on first sight.
    pub fn assign(&mut self, identity: &str) -> Label {
        if let Some(&label) = self.by_identity.get(identity) {
            return label;
        }
        let label = Label(self.by_label.len() as u32);
        self.by_label.insert(label, identity.to_string());
        self.by_identity.insert(identity.to_string(), label);
        label
    }

    pub fn identity(&self, label: Label) -> Result<&str, LabelError> {
        self.by_label
            .get(&label)
            .map(String::as_str)
            .ok_or(LabelError::LabelNotFound(label))
    }

    pub fn label(&self, identity: &str) -> Result<Label, LabelError> {
        self.by_identity
            .get(identity)
            .copied()
            .ok_or_else(|| LabelError::IdentityNotFound(identity.to_string()))
    }

    pub fn contains(&self, label: Label) -> bool {
        self.by_label.contains_key(&label)
    }

    pub fn len(&self) -> usize {
        self.by_label.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_label.is_empty()
    }

    /// Iterate `(label, identity)` pairs in label order.
    pub fn iter(&self) -> impl Iterator<Item = (Label, &str)> {
        self.by_label.iter().map(|(l, s)| (*l, s.as_str()))
    }
}

impl TryFrom<BTreeMap<u32, String>> for LabelRegistry {
    type Error = LabelError;

    fn try_from(map: BTreeMap<u32, String>) -> Result<Self, Self::Error> {
        let mut registry = Self::new();
        // Map keys arrive sorted; `assign` relies on labels being 0..n.
        for (raw, identity) in map {
            let label = Label(raw);
            let expected = Label(registry.len() as u32);
            if label != expected {
                return Err(LabelError::LabelGap { expected, found: label });
            }
            if let Some(&first) = registry.by_identity.get(&identity) {
                return Err(LabelError::DuplicateIdentity {
                    identity,
                    first,
                    second: label,
                });
            }
            registry.by_identity.insert(identity.clone(), label);
            registry.by_label.insert(label, identity);
        }
        Ok(registry)
    }
}

impl From<LabelRegistry> for BTreeMap<u32, String> {
    fn from(registry: LabelRegistry) -> Self {
        registry
            .by_label
            .into_iter()
            .map(|(label, identity)| (label.0, identity))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_assign_is_sequential_and_idempotent() {
        let mut registry = LabelRegistry::new();
        assert_eq!(registry.assign("alice"), Label(0));
        assert_eq!(registry.assign("bob"), Label(1));
        assert_eq!(registry.assign("alice"), Label(0));
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_from_identities_sorts() {
        let registry = LabelRegistry::from_identities(["carol", "alice", "bob", "alice"]);
        assert_eq!(registry.label("alice"), Ok(Label(0)));
        assert_eq!(registry.label("bob"), Ok(Label(1)));
        assert_eq!(registry.label("carol"), Ok(Label(2)));
        assert_eq!(registry.len(), 3);
    }

    #[test]
    fn test_resolve_both_directions() {
        let registry = LabelRegistry::from_identities(["alice", "bob"]);
        assert_eq!(registry.identity(Label(1)), Ok("bob"));
        assert_eq!(registry.label("bob"), Ok(Label(1)));
    }

    #[test]
    fn test_missing_lookups_fail() {
        let registry = LabelRegistry::from_identities(["alice"]);
        assert_eq!(registry.identity(Label(7)), Err(LabelError::LabelNotFound(Label(7))));
        assert_eq!(
            registry.label("mallory"),
            Err(LabelError::IdentityNotFound("mallory".into()))
        );
    }

    #[test]
    fn test_json_roundtrip() {
        let registry = LabelRegistry::from_identities(["alice", "bob", "émile"]);
        let json = serde_json::to_string(&registry).unwrap();
        let back: LabelRegistry = serde_json::from_str(&json).unwrap();
        assert_eq!(back, registry);
    }

    #[test]
    fn test_deserialize_rejects_duplicate_identity() {
        let json = r#"{"0":"alice","1":"alice"}"#;
        let result: Result<LabelRegistry, _> = serde_json::from_str(json);
        assert!(result.is_err());
    }

    #[test]
    fn test_deserialize_rejects_label_gap() {
        let map = BTreeMap::from([(0, "alice".to_string()), (2, "carol".to_string())]);
        assert_eq!(
            LabelRegistry::try_from(map),
            Err(LabelError::LabelGap { expected: Label(1), found: Label(2) })
        );

        let json = r#"{"1":"bob"}"#;
        assert!(serde_json::from_str::<LabelRegistry>(json).is_err());
    }

    #[test]
    fn test_assign_after_deserialize_keeps_bijection() {
        let mut registry: LabelRegistry = serde_json::from_str(r#"{"0":"alice","1":"carol"}"#).unwrap();
        assert_eq!(registry.assign("bob"), Label(2));
        assert_eq!(registry.identity(Label(1)), Ok("carol"));
        assert_eq!(registry.label("carol"), Ok(Label(1)));
        assert_eq!(registry.identity(Label(2)), Ok("bob"));
        assert_eq!(registry.len(), 3);
    }
}
