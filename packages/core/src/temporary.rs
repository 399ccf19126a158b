//! Interaction scaffolding that is not part of the authoring state.
//!
//! While the user drags out a new relation, the floating endpoint and the
//! half-made relation exist on the diagram but must vanish without residue
//! if the gesture is aborted. [`TemporaryState`] tracks them.

use crate::collections::{ElementSet, LinkSet};
use crate::types::{ElementIri, LinkKey};

/// Immutable pair of temporary entity IRIs and relation keys.
///
/// Deleting something that is not present returns an unmodified clone, so
/// callers can skip work when [`same_state`](TemporaryState::same_state)
/// reports no change.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TemporaryState {
    elements: ElementSet,
    links: LinkSet,
}

impl TemporaryState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn elements(&self) -> &ElementSet {
        &self.elements
    }

    pub fn links(&self) -> &LinkSet {
        &self.links
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty() && self.links.is_empty()
    }

    pub fn has_element(&self, iri: &ElementIri) -> bool {
        self.elements.contains(iri)
    }

    pub fn has_link(&self, key: &LinkKey) -> bool {
        self.links.contains(key)
    }

    pub fn same_state(&self, other: &TemporaryState) -> bool {
        self.elements.ptr_eq(&other.elements) && self.links.ptr_eq(&other.links)
    }

    #[must_use]
    pub fn add_element(&self, iri: ElementIri) -> Self {
        let mut elements = self.elements.clone();
        elements.insert(iri);
        Self {
            elements,
            links: self.links.clone(),
        }
    }

    #[must_use]
    pub fn add_link(&self, key: LinkKey) -> Self {
        let mut links = self.links.clone();
        links.insert(key);
        Self {
            elements: self.elements.clone(),
            links,
        }
    }

    #[must_use]
    pub fn delete_element(&self, iri: &ElementIri) -> Self {
        if !self.elements.contains(iri) {
            return self.clone();
        }
        let mut elements = self.elements.clone();
        elements.remove(iri);
        Self {
            elements,
            links: self.links.clone(),
        }
    }

    #[must_use]
    pub fn delete_link(&self, key: &LinkKey) -> Self {
        if !self.links.contains(key) {
            return self.clone();
        }
        let mut links = self.links.clone();
        links.remove(key);
        Self {
            elements: self.elements.clone(),
            links,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_then_delete_leaves_no_residue() {
        let key = LinkKey::new("ex:p", "ex:a", "ex:b");
        let state = TemporaryState::new()
            .add_element("ex:a".into())
            .add_link(key.clone());
        assert!(state.has_element(&"ex:a".into()));
        assert!(state.has_link(&key));

        let drained = state.delete_element(&"ex:a".into()).delete_link(&key);
        assert!(drained.is_empty());
    }

    #[test]
    fn deleting_absent_item_returns_same_state() {
        let state = TemporaryState::new().add_element("ex:a".into());
        assert!(state.delete_element(&"ex:b".into()).same_state(&state));
        assert!(state
            .delete_link(&LinkKey::new("ex:p", "ex:a", "ex:b"))
            .same_state(&state));
    }

    #[test]
    fn deleting_present_item_changes_state() {
        let state = TemporaryState::new().add_element("ex:a".into());
        assert!(!state.delete_element(&"ex:a".into()).same_state(&state));
    }
}
