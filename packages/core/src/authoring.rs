//! Pending changes to the graph and the pure transitions between them.
//!
//! An [`AuthoringState`] records, per entity and per relation, what the user
//! wants to change relative to the externally sourced graph. It is never
//! mutated in place: each transition (`add_element`, `change_element`,
//! `delete_element`, ...) returns a new value sharing structure with the old
//! one. Change records live behind [`Arc`], so "the record changed" is an
//! identity comparison ([`Arc::ptr_eq`]) rather than a deep comparison.
//!
//! # Renames
//!
//! Renaming an entity that already exists in the graph does not move its
//! record. The record stays keyed by the original IRI, `after.id` keeps the
//! original IRI and the pending IRI is carried in [`ElementChange::new_iri`].
//! Relations therefore keep addressing the entity by its original key until
//! the edit is committed. Renaming an entity created in this session instead
//! re-keys it and rewrites the endpoints of its (also new) relations.

use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;

use crate::collections::{retain_links, ElementMap, LinkMap};
use crate::types::{ElementData, ElementIri, LinkData, LinkKey};

/// Errors returned by authoring transitions that violate their contract.
#[derive(Debug, Error, PartialEq)]
pub enum AuthoringError {
    #[error("invalid operation: {0}")]
    InvalidOperation(String),
}

/// Pending change to one entity.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ElementChange {
    /// Data prior to any edit in this session. `None` means the entity was
    /// created in this session.
    pub before: Option<ElementData>,

    /// Proposed data. For a renamed pre-existing entity `after.id` is still
    /// the original IRI.
    pub after: ElementData,

    /// Pending new IRI of a renamed pre-existing entity.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub new_iri: Option<ElementIri>,

    pub deleted: bool,
}

impl ElementChange {
    fn created(after: ElementData) -> Self {
        Self {
            before: None,
            after,
            new_iri: None,
            deleted: false,
        }
    }

    fn tombstone(data: ElementData) -> Self {
        Self {
            before: Some(data.clone()),
            after: data,
            new_iri: None,
            deleted: true,
        }
    }

    /// Key of this record in [`AuthoringState::elements`].
    pub fn iri(&self) -> &ElementIri {
        &self.after.id
    }

    pub fn is_new(&self) -> bool {
        self.before.is_none()
    }
}

/// Pending change to one relation. Relations cannot change their key in
/// place; that is modelled as a deletion plus a creation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LinkChange {
    pub before: Option<LinkData>,
    pub after: LinkData,
    pub deleted: bool,
}

impl LinkChange {
    fn created(after: LinkData) -> Self {
        Self {
            before: None,
            after,
            deleted: false,
        }
    }

    fn tombstone(data: LinkData) -> Self {
        Self {
            before: Some(data.clone()),
            after: data,
            deleted: true,
        }
    }

    pub fn key(&self) -> LinkKey {
        self.after.key()
    }

    pub fn is_new(&self) -> bool {
        self.before.is_none()
    }
}

/// A single recorded change, as handed out to callers that may later
/// [`discard`](AuthoringState::discard) it.
#[derive(Debug, Clone)]
pub enum AuthoringEvent {
    Element(Arc<ElementChange>),
    Link(Arc<LinkChange>),
}

impl AuthoringEvent {
    pub fn is_new(&self) -> bool {
        match self {
            AuthoringEvent::Element(change) => change.is_new(),
            AuthoringEvent::Link(change) => change.is_new(),
        }
    }

    pub fn is_deleted(&self) -> bool {
        match self {
            AuthoringEvent::Element(change) => change.deleted,
            AuthoringEvent::Link(change) => change.deleted,
        }
    }

    /// Identity comparison: `true` only for the very same recorded change.
    pub fn same_event(&self, other: &AuthoringEvent) -> bool {
        match (self, other) {
            (AuthoringEvent::Element(a), AuthoringEvent::Element(b)) => Arc::ptr_eq(a, b),
            (AuthoringEvent::Link(a), AuthoringEvent::Link(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

/// Immutable set of pending entity and relation changes.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AuthoringState {
    elements: ElementMap<Arc<ElementChange>>,
    links: LinkMap<Arc<LinkChange>>,
}

impl AuthoringState {
    /// An empty state: no pending changes.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn elements(&self) -> &ElementMap<Arc<ElementChange>> {
        &self.elements
    }

    pub fn links(&self) -> &LinkMap<Arc<LinkChange>> {
        &self.links
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty() && self.links.is_empty()
    }

    /// Total number of pending changes.
    pub fn len(&self) -> usize {
        self.elements.len() + self.links.len()
    }

    pub fn element_event(&self, iri: &ElementIri) -> Option<Arc<ElementChange>> {
        self.elements.get(iri).cloned()
    }

    pub fn link_event(&self, key: &LinkKey) -> Option<Arc<LinkChange>> {
        self.links.get(key).cloned()
    }

    /// Every recorded change, entities first, in unspecified order.
    pub fn events(&self) -> impl Iterator<Item = AuthoringEvent> + '_ {
        self.elements
            .values()
            .map(|change| AuthoringEvent::Element(Arc::clone(change)))
            .chain(
                self.links
                    .values()
                    .map(|change| AuthoringEvent::Link(Arc::clone(change))),
            )
    }

    /// `true` if `other` is this very value (or an unmodified clone of it).
    pub fn same_state(&self, other: &AuthoringState) -> bool {
        self.elements.ptr_eq(&other.elements) && self.links.ptr_eq(&other.links)
    }

    // --- transitions ---------------------------------------------------------

    /// Record `data` as an entity created in this session.
    #[must_use]
    pub fn add_element(&self, data: ElementData) -> Self {
        let mut elements = self.elements.clone();
        elements.insert(data.id.clone(), Arc::new(ElementChange::created(data)));
        Self {
            elements,
            links: self.links.clone(),
        }
    }

    /// Record `data` as a relation created in this session.
    #[must_use]
    pub fn add_link(&self, data: LinkData) -> Self {
        let mut links = self.links.clone();
        links.insert(data.key(), Arc::new(LinkChange::created(data)));
        Self {
            elements: self.elements.clone(),
            links,
        }
    }

    /// Record an edit of an entity from `before` to `after`.
    ///
    /// See the module documentation for how renames are represented.
    #[must_use]
    pub fn change_element(&self, before: &ElementData, after: ElementData) -> Self {
        let mut elements = self.elements.clone();
        let previous = elements.remove(&before.id);

        match previous {
            Some(previous) if previous.is_new() => {
                let new_iri = after.id.clone();
                elements.insert(new_iri.clone(), Arc::new(ElementChange::created(after)));
                if new_iri == before.id {
                    return Self {
                        elements,
                        links: self.links.clone(),
                    };
                }

                let mut links = self.links.clone();
                for (key, change) in self.links.iter() {
                    if change.is_new() && key.touches(&before.id) {
                        links.remove(key);
                        let renamed = change.after.with_renamed_endpoint(&before.id, &new_iri);
                        links.insert(renamed.key(), Arc::new(LinkChange::created(renamed)));
                    }
                }
                Self { elements, links }
            }
            previous => {
                let original = previous
                    .and_then(|change| change.before.clone())
                    .unwrap_or_else(|| before.clone());
                let change = if after.id != before.id {
                    ElementChange {
                        before: Some(original),
                        new_iri: Some(after.id.clone()),
                        after: after.with_iri(before.id.clone()),
                        deleted: false,
                    }
                } else {
                    ElementChange {
                        before: Some(original),
                        after,
                        new_iri: None,
                        deleted: false,
                    }
                };
                elements.insert(before.id.clone(), Arc::new(change));
                Self {
                    elements,
                    links: self.links.clone(),
                }
            }
        }
    }

    /// Record an edit of a relation's data. The key must not change.
    pub fn change_link(&self, before: &LinkData, after: LinkData) -> Result<Self, AuthoringError> {
        if !before.same_link(&after) {
            return Err(AuthoringError::InvalidOperation(format!(
                "cannot move relation {} to {}; change its endpoints by deleting and re-creating it",
                before.key(),
                after.key()
            )));
        }
        let key = before.key();
        let (original, deleted) = match self.links.get(&key) {
            Some(previous) => (previous.before.clone(), previous.deleted),
            None => (Some(before.clone()), false),
        };
        let mut links = self.links.clone();
        links.insert(
            key,
            Arc::new(LinkChange {
                before: original,
                after,
                deleted,
            }),
        );
        Ok(Self {
            elements: self.elements.clone(),
            links,
        })
    }

    /// Record the deletion of an entity.
    ///
    /// Every relation record touching the entity is dropped. A pre-existing
    /// entity gets a tombstone; an entity created in this session is erased.
    #[must_use]
    pub fn delete_element(&self, data: &ElementData) -> Self {
        let mut elements = self.elements.clone();
        elements.remove(&data.id);
        let links = retain_links(&self.links, |key, _| !key.touches(&data.id));
        if !self.is_new_element(&data.id) {
            elements.insert(data.id.clone(), Arc::new(ElementChange::tombstone(data.clone())));
        }
        Self { elements, links }
    }

    /// Record the deletion of a relation; a relation created in this session
    /// is erased instead of tombstoned.
    #[must_use]
    pub fn delete_link(&self, data: &LinkData) -> Self {
        let key = data.key();
        let mut links = self.links.clone();
        links.remove(&key);
        if !self.is_new_link(&key) {
            links.insert(key, Arc::new(LinkChange::tombstone(data.clone())));
        }
        Self {
            elements: self.elements.clone(),
            links,
        }
    }

    /// Drop every pending relation creation attached to one of `iris`.
    #[must_use]
    pub fn delete_new_links_connected_to_elements<'a>(
        &self,
        iris: impl IntoIterator<Item = &'a ElementIri>,
    ) -> Self {
        let iris: std::collections::HashSet<&ElementIri> = iris.into_iter().collect();
        let links = retain_links(&self.links, |key, change| {
            !(change.is_new() && (iris.contains(&key.source) || iris.contains(&key.target)))
        });
        Self {
            elements: self.elements.clone(),
            links,
        }
    }

    /// Revert one recorded change.
    ///
    /// Does nothing (returns an unmodified clone, see [`same_state`]) unless
    /// `event` is the record currently stored for its key. Discarding an
    /// entity creation also drops the new relations attached to it.
    ///
    /// [`same_state`]: AuthoringState::same_state
    #[must_use]
    pub fn discard(&self, event: &AuthoringEvent) -> Self {
        match event {
            AuthoringEvent::Element(change) => {
                let iri = change.iri();
                match self.elements.get(iri) {
                    Some(stored) if Arc::ptr_eq(stored, change) => {}
                    _ => return self.clone(),
                }
                let mut elements = self.elements.clone();
                elements.remove(iri);
                let links = if change.is_new() {
                    retain_links(&self.links, |key, link| !(link.is_new() && key.touches(iri)))
                } else {
                    self.links.clone()
                };
                Self { elements, links }
            }
            AuthoringEvent::Link(change) => {
                let key = change.key();
                match self.links.get(&key) {
                    Some(stored) if Arc::ptr_eq(stored, change) => {}
                    _ => return self.clone(),
                }
                let mut links = self.links.clone();
                links.remove(&key);
                Self {
                    elements: self.elements.clone(),
                    links,
                }
            }
        }
    }

    // --- queries -------------------------------------------------------------

    pub fn is_new_element(&self, iri: &ElementIri) -> bool {
        self.elements.get(iri).is_some_and(|change| change.is_new())
    }

    pub fn is_new_link(&self, key: &LinkKey) -> bool {
        self.links.get(key).is_some_and(|change| change.is_new())
    }

    pub fn is_deleted_element(&self, iri: &ElementIri) -> bool {
        self.elements.get(iri).is_some_and(|change| change.deleted)
    }

    /// `true` for a pre-existing entity with a pending rename.
    pub fn is_element_with_modified_iri(&self, iri: &ElementIri) -> bool {
        self.elements
            .get(iri)
            .is_some_and(|change| change.before.is_some() && change.new_iri.is_some())
    }

    /// `true` if the relation is tombstoned or either endpoint is deleted.
    pub fn is_deleted_link(&self, key: &LinkKey) -> bool {
        self.links.get(key).is_some_and(|change| change.deleted)
            || self.is_deleted_element(&key.source)
            || self.is_deleted_element(&key.target)
    }

    /// `true` if the relation is live but an endpoint has a pending rename,
    /// so its effective key is not settled yet.
    pub fn is_uncertain_link(&self, key: &LinkKey) -> bool {
        !self.is_deleted_link(key)
            && (self.is_element_with_modified_iri(&key.source)
                || self.is_element_with_modified_iri(&key.target))
    }
}

// --- tests -------------------------------------------------------------------
