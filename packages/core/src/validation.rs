//! Asynchronous validation of pending changes.
//!
//! After every authoring-state transition the editor asks
//! [`changed_elements_to_validate`] for the minimal set of entities whose
//! validity may have changed, then [`validate_elements`] re-validates exactly
//! those through the configured [`Validator`], carrying every other entry
//! over untouched.
//!
//! # Races
//!
//! Requests are never aborted when a newer pass supersedes them. Instead each
//! placeholder entry carries a fresh [`Generation`]; a result is written only
//! if the entry it was computed for is still the one in the current state.
//! A slow response for an old pass is therefore dropped without a trace.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use tracing::{debug, warn};

use crate::authoring::AuthoringState;
use crate::cancel::{map_abort_to_none, AbortSignal};
use crate::collections::{ElementMap, LinkMap};
use crate::editor::EditorController;
use crate::graph::DiagramModel;
use crate::types::{ElementData, ElementIri, LinkData, LinkKey, PropertyTypeIri};

/// Message recorded when the validator itself fails.
pub const VALIDATION_FAILED_MESSAGE: &str = "Failed to validate element";

/// Error type validators may fail with.
pub type ValidatorError = Box<dyn std::error::Error + Send + Sync>;

/// Monotonic tag identifying one validation entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Generation(u64);

impl Generation {
    fn next() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Generation(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

/// A problem with an entity, optionally pinned to one of its properties.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ElementError {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub property: Option<PropertyTypeIri>,
}

/// A problem with a relation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LinkError {
    pub message: String,
}

/// One finding reported by a [`Validator`].
#[derive(Debug, Clone, PartialEq)]
pub enum ValidationIssue {
    Element {
        target: ElementIri,
        message: String,
        property: Option<PropertyTypeIri>,
    },
    Link {
        target: LinkKey,
        message: String,
    },
}

impl ValidationIssue {
    pub fn element(target: impl Into<ElementIri>, message: impl Into<String>) -> Self {
        ValidationIssue::Element {
            target: target.into(),
            message: message.into(),
            property: None,
        }
    }

    pub fn link(target: LinkKey, message: impl Into<String>) -> Self {
        ValidationIssue::Link {
            target,
            message: message.into(),
        }
    }
}

/// Everything a validator gets to judge one entity.
#[derive(Debug, Clone)]
pub struct ValidationEvent {
    pub target: ElementData,
    /// Relations starting at `target`, one per key.
    pub outbound_links: Vec<LinkData>,
    pub state: AuthoringState,
    pub diagram: DiagramModel,
    /// Aborted when the editor shuts down; validators should return early.
    pub signal: AbortSignal,
}

/// Pluggable validation backend.
#[async_trait]
pub trait Validator: Send + Sync + 'static {
    /// Return every issue found for `event.target` and its outbound
    /// relations. Issues about other entities or relations are ignored.
    async fn validate(&self, event: ValidationEvent) -> Result<Vec<ValidationIssue>, ValidatorError>;
}

/// Validation status of one entity.
#[derive(Debug, Clone, PartialEq)]
pub struct ElementValidation {
    pub loading: bool,
    pub errors: Vec<ElementError>,
    generation: Generation,
}

impl ElementValidation {
    /// A fresh "validation in progress" entry.
    pub fn placeholder() -> Self {
        Self {
            loading: true,
            errors: Vec::new(),
            generation: Generation::next(),
        }
    }

    pub fn with_errors(errors: Vec<ElementError>) -> Self {
        Self {
            loading: false,
            errors,
            generation: Generation::next(),
        }
    }

    pub fn generation(&self) -> Generation {
        self.generation
    }
}

/// Validation status of one relation.
#[derive(Debug, Clone, PartialEq)]
pub struct LinkValidation {
    pub loading: bool,
    pub errors: Vec<LinkError>,
    generation: Generation,
}

impl LinkValidation {
    pub fn placeholder() -> Self {
        Self {
            loading: true,
            errors: Vec::new(),
            generation: Generation::next(),
        }
    }

    pub fn with_errors(errors: Vec<LinkError>) -> Self {
        Self {
            loading: false,
            errors,
            generation: Generation::next(),
        }
    }

    pub fn generation(&self) -> Generation {
        self.generation
    }
}

/// Immutable map of validation entries. An absent entry means "valid".
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ValidationState {
    elements: ElementMap<ElementValidation>,
    links: LinkMap<LinkValidation>,
}

impl ValidationState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn elements(&self) -> &ElementMap<ElementValidation> {
        &self.elements
    }

    pub fn links(&self) -> &LinkMap<LinkValidation> {
        &self.links
    }

    pub fn element(&self, iri: &ElementIri) -> Option<&ElementValidation> {
        self.elements.get(iri)
    }

    pub fn link(&self, key: &LinkKey) -> Option<&LinkValidation> {
        self.links.get(key)
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty() && self.links.is_empty()
    }

    /// `true` if any entry is still waiting for its validator.
    pub fn is_loading(&self) -> bool {
        self.elements.values().any(|e| e.loading) || self.links.values().any(|l| l.loading)
    }

    /// Total number of errors across all entries.
    pub fn error_count(&self) -> usize {
        self.elements.values().map(|e| e.errors.len()).sum::<usize>()
            + self.links.values().map(|l| l.errors.len()).sum::<usize>()
    }

    pub fn same_state(&self, other: &ValidationState) -> bool {
        self.elements.ptr_eq(&other.elements) && self.links.ptr_eq(&other.links)
    }

    /// Store `errors` for an entity; an empty list removes the entry.
    #[must_use]
    pub fn set_element_errors(&self, iri: &ElementIri, errors: Vec<ElementError>) -> Self {
        let mut elements = self.elements.clone();
        if errors.is_empty() {
            elements.remove(iri);
        } else {
            elements.insert(iri.clone(), ElementValidation::with_errors(errors));
        }
        Self {
            elements,
            links: self.links.clone(),
        }
    }

    /// Store `errors` for a relation; an empty list removes the entry.
    #[must_use]
    pub fn set_link_errors(&self, key: &LinkKey, errors: Vec<LinkError>) -> Self {
        let mut links = self.links.clone();
        if errors.is_empty() {
            links.remove(key);
        } else {
            links.insert(key.clone(), LinkValidation::with_errors(errors));
        }
        Self {
            elements: self.elements.clone(),
            links,
        }
    }
}

/// Entities whose validity may differ between `previous` and `current`.
///
/// A changed relation record marks its source entity (relations count
/// towards their source, e.g. for cardinality). A changed entity record
/// marks the entity; if it is now deleted, the sources of relations pointing
/// at it are marked too. Targets of changed relations are not marked.
pub fn changed_elements_to_validate(
    previous: &AuthoringState,
    current: &AuthoringState,
    diagram: &DiagramModel,
) -> HashSet<ElementIri> {
    let mut changed = HashSet::new();

    let keys: HashSet<&LinkKey> = previous
        .links()
        .keys()
        .chain(current.links().keys())
        .collect();
    for key in keys {
        if !same_record(previous.links().get(key), current.links().get(key)) {
            changed.insert(key.source.clone());
        }
    }

    for iri in diagram.unique_element_iris() {
        let current_event = current.elements().get(iri);
        if same_record(previous.elements().get(iri), current_event) {
            continue;
        }
        changed.insert(iri.clone());
        if current_event.is_some_and(|event| event.deleted) {
            for link in diagram.incoming(iri) {
                changed.insert(link.data.source.clone());
            }
        }
    }

    changed
}

fn same_record<T>(a: Option<&Arc<T>>, b: Option<&Arc<T>>) -> bool {
    match (a, b) {
        (Some(a), Some(b)) => Arc::ptr_eq(a, b),
        (None, None) => true,
        _ => false,
    }
}

/// Placeholders installed for one entity, used to detect superseded results.
#[derive(Debug)]
struct PendingValidation {
    iri: ElementIri,
    generation: Generation,
    links: Vec<(LinkKey, Generation)>,
}

/// One validator call, prepared together with its placeholders.
#[derive(Debug)]
pub(crate) struct ValidationRequest {
    event: ValidationEvent,
    pending: PendingValidation,
}

/// Rebuild `previous` with loading placeholders for `targets`.
///
/// Every entity on the diagram is visited once. Targets and their outbound
/// relations get placeholders; everything else keeps its previous entry.
/// Runs under the session lock, so the read of `previous` and the install of
/// the returned state cannot interleave with a landing result.
pub(crate) fn install_placeholders(
    targets: &HashSet<ElementIri>,
    previous: &ValidationState,
    authoring: &AuthoringState,
    diagram: &DiagramModel,
    signal: &AbortSignal,
) -> (ValidationState, Vec<ValidationRequest>) {
    let mut next = ValidationState::new();
    let mut requests = Vec::new();

    for iri in diagram.unique_element_iris() {
        let outbound = diagram.outbound_links(iri);

        if !targets.contains(iri) {
            if let Some(entry) = previous.element(iri) {
                next.elements.insert(iri.clone(), entry.clone());
            }
            for link in &outbound {
                let key = link.key();
                if let Some(entry) = previous.link(&key) {
                    next.links.insert(key, entry.clone());
                }
            }
            continue;
        }

        let Some(target) = diagram.elements_by_iri(iri).first().map(|c| c.data.clone()) else {
            continue;
        };
        let placeholder = ElementValidation::placeholder();
        let mut pending = PendingValidation {
            iri: iri.clone(),
            generation: placeholder.generation,
            links: Vec::with_capacity(outbound.len()),
        };
        next.elements.insert(iri.clone(), placeholder);
        for link in &outbound {
            let entry = LinkValidation::placeholder();
            pending.links.push((link.key(), entry.generation));
            next.links.insert(link.key(), entry);
        }

        let event = ValidationEvent {
            target,
            outbound_links: outbound,
            state: authoring.clone(),
            diagram: diagram.clone(),
            signal: signal.clone(),
        };
        requests.push(ValidationRequest { event, pending });
    }

    debug!(
        targets = targets.len(),
        requests = requests.len(),
        "validation: placeholders installed"
    );
    (next, requests)
}

/// Spawn one reconciling task per request on the editor's runtime.
pub(crate) fn dispatch(
    requests: Vec<ValidationRequest>,
    validator: &Arc<dyn Validator>,
    editor: &EditorController,
    signal: &AbortSignal,
) {
    for ValidationRequest { event, pending } in requests {
        let task = reconcile(
            editor.clone(),
            Arc::clone(validator),
            event,
            pending,
            signal.clone(),
        );
        editor.spawn_validation(task);
    }
}

/// Re-validate `targets` against the editor's current diagram.
///
/// Placeholders are committed atomically with respect to other validation
/// updates before any validator runs.
pub fn validate_elements(
    targets: &HashSet<ElementIri>,
    validator: &Arc<dyn Validator>,
    editor: &EditorController,
    signal: &AbortSignal,
) {
    let requests = editor.begin_validation(|validation, authoring, diagram| {
        install_placeholders(targets, validation, authoring, diagram, signal)
    });
    dispatch(requests, validator, editor, signal);
}

async fn reconcile(
    editor: EditorController,
    validator: Arc<dyn Validator>,
    event: ValidationEvent,
    pending: PendingValidation,
    signal: AbortSignal,
) {
    let issues = match map_abort_to_none(validator.validate(event), &signal).await {
        None => return,
        Some(Ok(issues)) => issues,
        Some(Err(err)) => {
            warn!(element = %pending.iri, error = %err, "validation: validator failed");
            vec![ValidationIssue::element(
                pending.iri.clone(),
                VALIDATION_FAILED_MESSAGE,
            )]
        }
    };

    let mut element_errors = Vec::new();
    let mut link_errors: Vec<(LinkKey, Generation, Vec<LinkError>)> = pending
        .links
        .iter()
        .map(|(key, generation)| (key.clone(), *generation, Vec::new()))
        .collect();
    for issue in issues {
        match issue {
            ValidationIssue::Element {
                target,
                message,
                property,
            } if target == pending.iri => {
                element_errors.push(ElementError { message, property });
            }
            ValidationIssue::Link { target, message } => {
                if let Some((_, _, errors)) = link_errors.iter_mut().find(|(key, _, _)| *key == target) {
                    errors.push(LinkError { message });
                }
            }
            ValidationIssue::Element { .. } => {}
        }
    }

    editor.update_validation_state(|state| {
        let mut next = state.clone();
        if state.element(&pending.iri).map(|e| e.generation) == Some(pending.generation) {
            next = next.set_element_errors(&pending.iri, element_errors);
        }
        for (key, generation, errors) in link_errors {
            if state.link(&key).map(|l| l.generation) == Some(generation) {
                next = next.set_link_errors(&key, errors);
            }
        }
        next
    });
}

// --- tests -------------------------------------------------------------------
