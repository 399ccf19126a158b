//! Core data types for graph authoring.
//!
//! This module defines the identifiers and data records the rest of the
//! crate operates on: [`ElementIri`], [`LinkTypeIri`], [`ElementData`],
//! [`LinkData`] and the composite [`LinkKey`]. All types serialise to and
//! from JSON; identifiers serialise as plain strings.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

macro_rules! iri_type {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(iri: impl Into<String>) -> Self {
                Self(iri.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(iri: &str) -> Self {
                Self(iri.to_string())
            }
        }

        impl From<String> for $name {
            fn from(iri: String) -> Self {
                Self(iri)
            }
        }
    };
}

iri_type!(
    /// Opaque identifier of a graph entity.
    ElementIri
);
iri_type!(
    /// Identifier of a relation type (the predicate of a relation).
    LinkTypeIri
);
iri_type!(
    /// Identifier of an entity class.
    ElementTypeIri
);
iri_type!(
    /// Identifier of a property attached to an entity or relation.
    PropertyTypeIri
);

/// Property values keyed by property type, in stable order.
pub type Properties = BTreeMap<PropertyTypeIri, Vec<String>>;

/// A 2D point on the diagram canvas.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Vector {
    pub x: f64,
    pub y: f64,
}

impl Vector {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// Snapshot of an entity's data as shown on the diagram.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ElementData {
    pub id: ElementIri,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub types: Vec<ElementTypeIri>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub properties: Properties,
}

impl ElementData {
    /// Create an entity with no types, label, or properties.
    pub fn new(id: impl Into<ElementIri>) -> Self {
        Self {
            id: id.into(),
            types: Vec::new(),
            label: None,
            properties: BTreeMap::new(),
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn with_type(mut self, type_iri: impl Into<ElementTypeIri>) -> Self {
        self.types.push(type_iri.into());
        self
    }

    pub fn with_property(
        mut self,
        property: impl Into<PropertyTypeIri>,
        value: impl Into<String>,
    ) -> Self {
        self.properties
            .entry(property.into())
            .or_default()
            .push(value.into());
        self
    }

    /// Same data under a different identifier.
    pub fn with_iri(&self, iri: ElementIri) -> Self {
        Self {
            id: iri,
            ..self.clone()
        }
    }
}

/// Snapshot of a relation's data as shown on the diagram.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinkData {
    #[serde(rename = "type")]
    pub link_type: LinkTypeIri,

    pub source: ElementIri,

    pub target: ElementIri,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub properties: Properties,
}

impl LinkData {
    pub fn new(
        link_type: impl Into<LinkTypeIri>,
        source: impl Into<ElementIri>,
        target: impl Into<ElementIri>,
    ) -> Self {
        Self {
            link_type: link_type.into(),
            source: source.into(),
            target: target.into(),
            properties: BTreeMap::new(),
        }
    }

    pub fn with_property(
        mut self,
        property: impl Into<PropertyTypeIri>,
        value: impl Into<String>,
    ) -> Self {
        self.properties
            .entry(property.into())
            .or_default()
            .push(value.into());
        self
    }

    /// The composite identity of this relation.
    pub fn key(&self) -> LinkKey {
        LinkKey {
            link_type: self.link_type.clone(),
            source: self.source.clone(),
            target: self.target.clone(),
        }
    }

    /// Whether `other` names the same relation (equal type, source and target).
    pub fn same_link(&self, other: &LinkData) -> bool {
        self.link_type == other.link_type
            && self.source == other.source
            && self.target == other.target
    }

    /// Copy of this relation with every endpoint equal to `from` replaced by `to`.
    pub fn with_renamed_endpoint(&self, from: &ElementIri, to: &ElementIri) -> Self {
        let mut renamed = self.clone();
        if &renamed.source == from {
            renamed.source = to.clone();
        }
        if &renamed.target == from {
            renamed.target = to.clone();
        }
        renamed
    }
}

/// Composite key of a relation: `(type, source, target)`.
///
/// Equality and hashing are structural and order-sensitive, so a relation
/// from `a` to `b` never collides with one from `b` to `a`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LinkKey {
    #[serde(rename = "type")]
    pub link_type: LinkTypeIri,
    pub source: ElementIri,
    pub target: ElementIri,
}

impl LinkKey {
    pub fn new(
        link_type: impl Into<LinkTypeIri>,
        source: impl Into<ElementIri>,
        target: impl Into<ElementIri>,
    ) -> Self {
        Self {
            link_type: link_type.into(),
            source: source.into(),
            target: target.into(),
        }
    }

    /// `true` if `iri` is the source or the target of this relation.
    pub fn touches(&self, iri: &ElementIri) -> bool {
        &self.source == iri || &self.target == iri
    }
}

/// Formats the key as `type (source -> target)`.
impl std::fmt::Display for LinkKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({} -> {})", self.link_type, self.source, self.target)
    }
}

// --- tests -------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn link_key_is_structural() {
        let a = LinkData::new("ex:knows", "ex:alice", "ex:bob").with_property("ex:since", "2020");
        let b = LinkData::new("ex:knows", "ex:alice", "ex:bob");
        assert_eq!(a.key(), b.key());
        assert!(a.same_link(&b));

        let mut set = HashSet::new();
        set.insert(a.key());
        assert!(set.contains(&b.key()));
    }

    #[test]
    fn link_key_is_order_sensitive() {
        let forward = LinkKey::new("ex:knows", "ex:alice", "ex:bob");
        let backward = LinkKey::new("ex:knows", "ex:bob", "ex:alice");
        assert_ne!(forward, backward);
    }

    #[test]
    fn touches_either_endpoint() {
        let key = LinkKey::new("ex:knows", "ex:alice", "ex:bob");
        assert!(key.touches(&"ex:alice".into()));
        assert!(key.touches(&"ex:bob".into()));
        assert!(!key.touches(&"ex:carol".into()));
    }

    #[test]
    fn renamed_endpoint_rewrites_both_sides() {
        let link = LinkData::new("ex:knows", "ex:alice", "ex:alice");
        let renamed = link.with_renamed_endpoint(&"ex:alice".into(), &"ex:alicia".into());
        assert_eq!(renamed.source.as_str(), "ex:alicia");
        assert_eq!(renamed.target.as_str(), "ex:alicia");
    }

    #[test]
    fn element_json_omits_empty_fields() {
        let data = ElementData::new("ex:alice").with_label("Alice");
        let json = serde_json::to_value(&data).unwrap();
        assert_eq!(json, serde_json::json!({ "id": "ex:alice", "label": "Alice" }));

        let parsed: ElementData = serde_json::from_str(r#"{"id":"ex:bob"}"#).unwrap();
        assert_eq!(parsed, ElementData::new("ex:bob"));
    }

    #[test]
    fn link_json_uses_type_field() {
        let json = r#"{"type":"ex:knows","source":"ex:alice","target":"ex:bob"}"#;
        let link: LinkData = serde_json::from_str(json).unwrap();
        assert_eq!(link.link_type.as_str(), "ex:knows");
        assert_eq!(link.key().to_string(), "ex:knows (ex:alice -> ex:bob)");
    }
}
