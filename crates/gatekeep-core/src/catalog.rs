// Known-identity catalog.
//
// The identification backend only recognizes the people it was enrolled
// with; anything outside this set is never admitted, whatever the oracle
// claims. Iteration order is sorted so tables and payloads are stable.

use std::collections::BTreeSet;
use std::sync::{PoisonError, RwLock};

use serde::Serialize;

#[derive(Debug, Default)]
pub struct IdentityCatalog {
    names: RwLock<BTreeSet<String>>,
}

/// Payload of the known-identities topic.
#[derive(Debug, Serialize)]
struct NamesPayload<'a> {
    names: &'a [String],
}

impl IdentityCatalog {
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            names: RwLock::new(normalize(names)),
        }
    }

    /// Replace the whole catalog, returning how many identities it now holds.
    pub fn replace<I, S>(&self, names: I) -> usize
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let fresh = normalize(names);
        let len = fresh.len();
        *self.names.write().unwrap_or_else(PoisonError::into_inner) = fresh;
        len
    }

    pub fn contains(&self, identity: &str) -> bool {
        self.names
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(identity)
    }

    /// Sorted snapshot of all identities.
    pub fn names(&self) -> Vec<String> {
        self.names
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.names.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// JSON body for the known-identities topic: `{"names": [..]}`.
    pub fn to_payload(&self) -> String {
        let names = self.names();
        serde_json::to_string(&NamesPayload { names: &names })
            .unwrap_or_else(|_| String::from(r#"{"names":[]}"#))
    }
}

fn normalize<I, S>(names: I) -> BTreeSet<String>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    names
        .into_iter()
        .map(Into::into)
        .map(|n| n.trim().to_owned())
        .filter(|n| !n.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_are_trimmed_sorted_and_unique() {
        let catalog = IdentityCatalog::new(["bob", " alice ", "bob", ""]);
        assert_eq!(catalog.names(), vec!["alice", "bob"]);
        assert!(catalog.contains("alice"));
        assert!(!catalog.contains(" alice "));
    }

    #[test]
    fn replace_swaps_contents() {
        let catalog = IdentityCatalog::new(["alice"]);
        assert_eq!(catalog.replace(["carol", "dave"]), 2);
        assert!(!catalog.contains("alice"));
        assert!(catalog.contains("dave"));
    }

    #[test]
    fn payload_lists_names() {
        let catalog = IdentityCatalog::new(["bob", "alice"]);
        assert_eq!(catalog.to_payload(), r#"{"names":["alice","bob"]}"#);
        assert_eq!(IdentityCatalog::default().to_payload(), r#"{"names":[]}"#);
    }
}
