//! The editing session.
//!
//! [`EditorController`] is the single owner of the diagram, the pending
//! changes ([`AuthoringState`]), scaffolding ([`TemporaryState`]) and their
//! validation ([`ValidationState`]). Every public mutation runs under one
//! lock, is recorded as exactly one history batch and, once the lock is
//! released, emits [`EditorEvent`]s for the states it replaced.
//!
//! When a validator is configured, each authoring change re-validates the
//! entities it may have affected (see [`crate::validation`]).

use std::collections::HashSet;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};

use thiserror::Error;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::authoring::{AuthoringError, AuthoringEvent, AuthoringState};
use crate::cancel::AbortController;
use crate::config::{EditorConfig, EditorMode};
use crate::events::{EditorEvent, EventBus, Subscription};
use crate::graph::{CellId, DiagramModel, ElementCell, LinkCell};
use crate::history::{Batch, CommandHistory, CommandTarget, EditCommand};
use crate::temporary::TemporaryState;
use crate::types::{ElementData, ElementIri, LinkData, LinkKey, Vector};
use crate::validation::{
    changed_elements_to_validate, dispatch, install_placeholders, ValidationRequest, ValidationState, Validator,
};

/// Errors returned by [`EditorController`] operations.
#[derive(Debug, Error)]
pub enum EditorError {
    #[error(transparent)]
    Authoring(#[from] AuthoringError),

    #[error("relation {0} already exists")]
    RelationAlreadyExists(LinkKey),

    #[error("diagram cell {0} not found")]
    CellNotFound(CellId),
}

/// A relation to be drawn between two element cells.
#[derive(Debug, Clone)]
pub struct LinkTemplate {
    pub data: LinkData,
    pub source: CellId,
    pub target: CellId,
    pub vertices: Vec<Vector>,
}

impl LinkTemplate {
    pub fn new(data: LinkData, source: CellId, target: CellId) -> Self {
        Self {
            data,
            source,
            target,
            vertices: Vec::new(),
        }
    }
}

/// The part of the session that history commands act on.
#[derive(Debug, Default)]
struct Document {
    diagram: DiagramModel,
    authoring: AuthoringState,
}

impl CommandTarget for Document {
    fn diagram_mut(&mut self) -> &mut DiagramModel {
        &mut self.diagram
    }

    fn replace_authoring_state(&mut self, state: AuthoringState) -> AuthoringState {
        std::mem::replace(&mut self.authoring, state)
    }
}

struct Session {
    doc: Document,
    temporary: TemporaryState,
    validation: ValidationState,
    history: CommandHistory,
    mode: EditorMode,
    validator: Option<Arc<dyn Validator>>,
}

impl Session {
    /// Run `f` as one undo unit.
    fn undoable(&mut self, label: &str, f: impl FnOnce(&mut Document, &mut Batch)) {
        let mut batch = self.history.start_batch(label);
        f(&mut self.doc, &mut batch);
        self.history.store(batch);
    }

    /// Run `f` as one undo unit, reverting everything it did if it fails.
    fn try_undoable<R>(
        &mut self,
        label: &str,
        f: impl FnOnce(&mut Document, &mut Batch) -> Result<R, EditorError>,
    ) -> Result<R, EditorError> {
        let mut batch = self.history.start_batch(label);
        match f(&mut self.doc, &mut batch) {
            Ok(result) => {
                self.history.store(batch);
                Ok(result)
            }
            Err(err) => {
                batch.rollback(&mut self.doc);
                self.history.discard(batch);
                Err(err)
            }
        }
    }

    /// Run `f` without leaving anything to undo.
    fn scaffold(&mut self, label: &str, f: impl FnOnce(&mut Document, &mut Batch)) {
        let mut batch = self.history.start_batch(label);
        f(&mut self.doc, &mut batch);
        self.history.discard(batch);
    }
}

struct Inner {
    session: Mutex<Session>,
    events: Arc<EventBus>,
    cancellation: AbortController,
    runtime: Option<Handle>,
    in_flight: Mutex<Vec<JoinHandle<()>>>,
}

/// Handle to one editing session. Clones share the session.
#[derive(Clone)]
pub struct EditorController {
    inner: Arc<Inner>,
}

#[derive(Debug, Clone, Copy)]
enum LinkEnd {
    Source,
    Target,
}

impl EditorController {
    /// Start a session over an empty diagram.
    pub fn new(config: EditorConfig) -> Self {
        Self::with_diagram(config, DiagramModel::new())
    }

    /// Start a session over `diagram`, which holds the externally sourced
    /// graph. Validation tasks run on the tokio runtime current at this
    /// call, if there is one.
    pub fn with_diagram(config: EditorConfig, diagram: DiagramModel) -> Self {
        let session = Session {
            doc: Document {
                diagram,
                authoring: AuthoringState::new(),
            },
            temporary: TemporaryState::new(),
            validation: ValidationState::new(),
            history: CommandHistory::new(config.history_depth),
            mode: config.mode,
            validator: None,
        };
        Self {
            inner: Arc::new(Inner {
                session: Mutex::new(session),
                events: EventBus::new(),
                cancellation: AbortController::new(),
                runtime: Handle::try_current().ok(),
                in_flight: Mutex::new(Vec::new()),
            }),
        }
    }

    // --- snapshots -----------------------------------------------------------

    pub fn authoring_state(&self) -> AuthoringState {
        self.lock().doc.authoring.clone()
    }

    pub fn temporary_state(&self) -> TemporaryState {
        self.lock().temporary.clone()
    }

    pub fn validation_state(&self) -> ValidationState {
        self.lock().validation.clone()
    }

    pub fn diagram(&self) -> DiagramModel {
        self.lock().doc.diagram.clone()
    }

    pub fn mode(&self) -> EditorMode {
        self.lock().mode
    }

    pub fn can_undo(&self) -> bool {
        self.lock().history.can_undo()
    }

    pub fn can_redo(&self) -> bool {
        self.lock().history.can_redo()
    }

    /// Register a listener for [`EditorEvent`]s.
    #[must_use = "dropping the subscription unregisters the listener"]
    pub fn subscribe(&self, listener: impl Fn(&EditorEvent) + Send + Sync + 'static) -> Subscription {
        self.inner.events.subscribe(listener)
    }

    // --- entities ------------------------------------------------------------

    /// Place a cell for `data` on the diagram.
    ///
    /// A temporary entity is tracked in [`TemporaryState`] and leaves nothing
    /// to undo; otherwise the creation is recorded as a new entity.
    pub fn create_entity(&self, data: ElementData, position: Vector, temporary: bool) -> CellId {
        debug!(iri = %data.id, temporary, "editor: create entity");
        self.mutate(move |s| {
            let cell = ElementCell {
                id: s.doc.diagram.next_cell_id(),
                data: data.clone(),
                position,
            };
            let id = cell.id;
            if temporary {
                s.scaffold("Create temporary entity", |doc, batch| {
                    batch.execute(doc, EditCommand::AddElement(cell));
                });
                s.temporary = s.temporary.add_element(data.id);
            } else {
                s.undoable("Create new entity", |doc, batch| {
                    batch.execute(doc, EditCommand::AddElement(cell));
                    let state = doc.authoring.add_element(data);
                    batch.execute(doc, EditCommand::SetAuthoringState(state));
                });
            }
            id
        })
    }

    /// Replace the data of entity `iri`. Does nothing if it is not on the
    /// diagram.
    pub fn change_entity(&self, iri: &ElementIri, data: ElementData) {
        self.mutate(|s| {
            let Some(current) = first_element_data(&s.doc.diagram, iri) else {
                debug!(%iri, "editor: entity not on diagram, change ignored");
                return;
            };
            let new_iri = data.id.clone();
            let state = s.doc.authoring.change_element(&current, data.clone());
            // a renamed new entity is re-keyed under its new IRI
            let shown = state
                .element_event(iri)
                .or_else(|| state.element_event(&new_iri))
                .map(|change| change.after.clone())
                .unwrap_or(data);
            s.undoable("Edit entity", |doc, batch| {
                batch.execute(
                    doc,
                    EditCommand::SetElementData {
                        iri: iri.clone(),
                        data: shown,
                    },
                );
                batch.execute(doc, EditCommand::SetAuthoringState(state));
            });
        })
    }

    /// Delete entity `iri`.
    ///
    /// New relations attached to it are removed from the diagram and any
    /// pending edit of it is reverted. A pre-existing entity stays on the
    /// diagram as a tombstone; a new one is removed.
    pub fn delete_entity(&self, iri: &ElementIri) {
        self.mutate(|s| {
            let state = s.doc.authoring.clone();
            let Some(live) = first_element_data(&s.doc.diagram, iri) else {
                return;
            };
            if state.is_deleted_element(iri) {
                return;
            }
            let event = state.element_event(iri);
            let snapshot = event
                .as_ref()
                .and_then(|change| change.before.clone())
                .unwrap_or(live);

            let mut new_links: Vec<CellId> = s
                .doc
                .diagram
                .elements_by_iri(iri)
                .iter()
                .flat_map(|cell| s.doc.diagram.element_links(cell.id))
                .filter(|link| state.is_new_link(&link.data.key()))
                .map(|link| link.id)
                .collect();
            new_links.sort();
            new_links.dedup();

            s.undoable("Delete entity", |doc, batch| {
                for link in new_links {
                    batch.execute(doc, EditCommand::RemoveLink(link));
                }
                if let Some(event) = event {
                    revert_diagram(doc, batch, &AuthoringEvent::Element(event));
                }
                // from the state before the revert, so a new entity is
                // erased rather than tombstoned
                let next = state.delete_element(&snapshot);
                batch.execute(doc, EditCommand::SetAuthoringState(next));
            });
        })
    }

    // --- relations -----------------------------------------------------------

    /// Draw a relation between two element cells.
    ///
    /// Fails if a relation with the same key is already drawn or recorded,
    /// whichever cells it connects. Returns
    /// `None`, leaving nothing behind, if no cell could be created for it.
    /// A non-temporary relation is also drawn between every other pair of
    /// cells showing its endpoints.
    pub fn create_relation(
        &self,
        template: LinkTemplate,
        temporary: bool,
    ) -> Result<Option<CellId>, EditorError> {
        debug!(relation = %template.data.key(), temporary, "editor: create relation");
        self.mutate(move |s| {
            let LinkTemplate {
                data,
                source,
                target,
                vertices,
            } = template;
            let key = data.key();
            if !s.doc.diagram.links_by_key(&key).is_empty() || s.doc.authoring.link_event(&key).is_some() {
                return Err(EditorError::RelationAlreadyExists(key));
            }

            let mut batch = s.history.start_batch("Create new link");
            let mut created = None;
            if s.doc.diagram.element(source).is_some() && s.doc.diagram.element(target).is_some() {
                let id = s.doc.diagram.next_cell_id();
                let cell = LinkCell {
                    id,
                    data: data.clone(),
                    source,
                    target,
                    vertices,
                };
                batch.execute(&mut s.doc, EditCommand::AddLink(cell));
                created = Some(id);
            }
            if !temporary {
                add_missing_link_cells(&mut s.doc, &mut batch, &data);
            }

            if s.doc.diagram.links_by_key(&key).is_empty() {
                batch.rollback(&mut s.doc);
                s.history.discard(batch);
                return Ok(None);
            }

            if temporary {
                s.history.discard(batch);
                s.temporary = s.temporary.add_link(key.clone());
            } else {
                let state = s.doc.authoring.add_link(data);
                batch.execute(&mut s.doc, EditCommand::SetAuthoringState(state));
                s.history.store(batch);
            }
            Ok(created.or_else(|| s.doc.diagram.links_by_key(&key).first().map(|l| l.id)))
        })
    }

    /// Replace relation `before` with `after`.
    ///
    /// With an unchanged key this edits the relation in place. Otherwise it
    /// is a deletion of `before` plus a creation of `after`.
    pub fn change_relation(&self, before: &LinkData, after: LinkData) -> Result<(), EditorError> {
        self.mutate(|s| {
            s.try_undoable("Change link", |doc, batch| {
                change_relation_in(doc, batch, before, after)
            })
        })
    }

    /// Reattach the source end of link cell `link` to element cell
    /// `new_source`, keeping its routing points. Returns the cell now
    /// showing the moved relation.
    pub fn move_relation_source(&self, link: CellId, new_source: CellId) -> Result<CellId, EditorError> {
        self.move_relation_end(link, new_source, LinkEnd::Source)
    }

    /// Reattach the target end of link cell `link` to element cell
    /// `new_target`. See [`move_relation_source`](Self::move_relation_source).
    pub fn move_relation_target(&self, link: CellId, new_target: CellId) -> Result<CellId, EditorError> {
        self.move_relation_end(link, new_target, LinkEnd::Target)
    }

    fn move_relation_end(&self, link: CellId, new_end: CellId, end: LinkEnd) -> Result<CellId, EditorError> {
        self.mutate(|s| {
            let cell = s
                .doc
                .diagram
                .link(link)
                .cloned()
                .ok_or(EditorError::CellNotFound(link))?;
            let end_iri = s
                .doc
                .diagram
                .element(new_end)
                .map(|c| c.data.id.clone())
                .ok_or(EditorError::CellNotFound(new_end))?;
            let (source, target, after) = match end {
                LinkEnd::Source => (
                    new_end,
                    cell.target,
                    LinkData {
                        source: end_iri,
                        ..cell.data.clone()
                    },
                ),
                LinkEnd::Target => (
                    cell.source,
                    new_end,
                    LinkData {
                        target: end_iri,
                        ..cell.data.clone()
                    },
                ),
            };
            if s.doc.diagram.find_link(&after.link_type, source, target).is_some() {
                return Err(EditorError::RelationAlreadyExists(after.key()));
            }

            s.try_undoable("Move link", |doc, batch| {
                if after.same_link(&cell.data) {
                    // another cell of the same entity: only the edge moves
                    let id = doc.diagram.next_cell_id();
                    batch.execute(doc, EditCommand::RemoveLink(cell.id));
                    batch.execute(
                        doc,
                        EditCommand::AddLink(LinkCell {
                            id,
                            data: cell.data.clone(),
                            source,
                            target,
                            vertices: cell.vertices.clone(),
                        }),
                    );
                    return Ok(id);
                }

                change_relation_in(doc, batch, &cell.data, after.clone())?;
                let moved = doc
                    .diagram
                    .find_link(&after.link_type, source, target)
                    .map(|l| l.id)
                    .ok_or(EditorError::CellNotFound(new_end))?;
                batch.execute(
                    doc,
                    EditCommand::SetLinkVertices {
                        link: moved,
                        vertices: cell.vertices.clone(),
                    },
                );
                Ok(moved)
            })
        })
    }

    /// Delete a relation. Does nothing if it is already deleted, directly or
    /// through one of its endpoints.
    pub fn delete_relation(&self, data: &LinkData) {
        self.mutate(|s| {
            if s.doc.authoring.is_deleted_link(&data.key()) {
                return;
            }
            s.undoable("Delete link", |doc, batch| delete_relation_in(doc, batch, data));
        })
    }

    // --- bulk ----------------------------------------------------------------

    /// Take the given cells off the diagram as one undo unit.
    ///
    /// Pending edits of removed entities are reverted and new relations of
    /// removed entities are forgotten. New relations are deleted; other
    /// relations only lose their cell.
    pub fn remove_items(&self, items: &[CellId]) {
        if items.is_empty() {
            return;
        }
        self.mutate(|s| {
            s.undoable("Remove items", |doc, batch| {
                let mut removed: HashSet<ElementIri> = HashSet::new();
                for &item in items {
                    if let Some(cell) = doc.diagram.element(item).cloned() {
                        if let Some(change) = doc.authoring.element_event(&cell.data.id) {
                            let event = AuthoringEvent::Element(change);
                            let next = doc.authoring.discard(&event);
                            revert_diagram(doc, batch, &event);
                            batch.execute(doc, EditCommand::SetAuthoringState(next));
                        }
                        batch.execute(doc, EditCommand::RemoveElement(item));
                        removed.insert(cell.data.id);
                    } else if let Some(link) = doc.diagram.link(item).cloned() {
                        if doc.authoring.is_new_link(&link.data.key()) {
                            delete_relation_in(doc, batch, &link.data);
                        } else {
                            batch.execute(doc, EditCommand::RemoveLink(item));
                        }
                    }
                }
                let next = doc.authoring.delete_new_links_connected_to_elements(&removed);
                if !next.same_state(&doc.authoring) {
                    batch.execute(doc, EditCommand::SetAuthoringState(next));
                }
            });
        })
    }

    /// Remove the given temporary cells. Never undoable.
    pub fn remove_temporary_cells(&self, cells: &[CellId]) {
        self.mutate(|s| drain_temporary(s, cells))
    }

    /// Remove every temporary cell and clear [`TemporaryState`].
    pub fn remove_all_temporary_cells(&self) {
        self.mutate(|s| {
            let cells: Vec<CellId> = s
                .doc
                .diagram
                .elements()
                .filter(|c| s.temporary.has_element(&c.data.id))
                .map(|c| c.id)
                .chain(
                    s.doc
                        .diagram
                        .links()
                        .filter(|l| s.temporary.has_link(&l.data.key()))
                        .map(|l| l.id),
                )
                .collect();
            drain_temporary(s, &cells);
            if !s.temporary.is_empty() {
                s.temporary = TemporaryState::new();
            }
        })
    }

    /// Revert one pending change, in the authoring state and on the diagram.
    ///
    /// Does nothing if `event` is no longer the current record for its key.
    pub fn discard_change(&self, event: &AuthoringEvent) {
        self.mutate(|s| {
            let next = s.doc.authoring.discard(event);
            if next.same_state(&s.doc.authoring) {
                debug!("editor: stale change event, discard ignored");
                return;
            }
            s.undoable("Discard change", |doc, batch| {
                revert_diagram(doc, batch, event);
                batch.execute(doc, EditCommand::SetAuthoringState(next));
            });
        })
    }

    /// Install `state` as one undo unit, e.g. an empty state after the
    /// pending changes were committed elsewhere.
    pub fn set_authoring_state(&self, state: AuthoringState) {
        self.mutate(|s| {
            if state.same_state(&s.doc.authoring) {
                return;
            }
            s.undoable("Set authoring state", |doc, batch| {
                batch.execute(doc, EditCommand::SetAuthoringState(state));
            });
        })
    }

    // --- history -------------------------------------------------------------

    /// Revert the newest undo unit, returning its label.
    pub fn undo(&self) -> Option<String> {
        self.mutate(|s| s.history.undo(&mut s.doc))
    }

    /// Re-apply the newest undone unit, returning its label.
    pub fn redo(&self) -> Option<String> {
        self.mutate(|s| s.history.redo(&mut s.doc))
    }

    // --- mode and validation -------------------------------------------------

    pub fn set_mode(&self, mode: EditorMode) {
        let previous = std::mem::replace(&mut self.lock().mode, mode);
        if previous != mode {
            debug!(%previous, %mode, "editor: mode changed");
            self.inner.events.emit(&EditorEvent::ModeChanged { previous });
        }
    }

    /// Install or remove the validator.
    ///
    /// Installing one validates every entity on the diagram; removing it
    /// clears the validation state.
    pub fn set_validator(&self, validator: Option<Arc<dyn Validator>>) {
        let signal = self.inner.cancellation.signal();
        let (previous, requests) = {
            let mut session = self.lock();
            session.validator = validator.clone();
            let (next, requests) = match &validator {
                Some(_) => {
                    let targets: HashSet<ElementIri> =
                        session.doc.diagram.unique_element_iris().into_iter().cloned().collect();
                    install_placeholders(
                        &targets,
                        &session.validation,
                        &session.doc.authoring,
                        &session.doc.diagram,
                        &signal,
                    )
                }
                None => (ValidationState::new(), Vec::new()),
            };
            (std::mem::replace(&mut session.validation, next), requests)
        };
        self.announce_validation(previous);
        if let Some(validator) = validator {
            dispatch(requests, &validator, self, &signal);
        }
    }

    /// Resolve once every validation task started so far has finished.
    pub async fn validation_settled(&self) {
        loop {
            let pending = std::mem::take(&mut *self.in_flight());
            if pending.is_empty() {
                return;
            }
            for handle in pending {
                if let Err(err) = handle.await {
                    if err.is_panic() {
                        warn!(error = %err, "validation: task panicked");
                    }
                }
            }
        }
    }

    /// Abort outstanding validation. Results still arriving are dropped.
    pub fn shutdown(&self) {
        debug!("editor: shutdown");
        self.inner.cancellation.abort();
    }

    #[cfg(test)]
    pub(crate) fn replace_validation_state(&self, state: ValidationState) {
        self.update_validation_state(|_| state);
    }

    /// Compute and install the next validation state under the session lock.
    pub(crate) fn update_validation_state(&self, f: impl FnOnce(&ValidationState) -> ValidationState) {
        let previous = {
            let mut session = self.lock();
            let next = f(&session.validation);
            std::mem::replace(&mut session.validation, next)
        };
        self.announce_validation(previous);
    }

    /// Like [`Self::update_validation_state`], with the authoring state and
    /// diagram read under the same lock.
    pub(crate) fn begin_validation(
        &self,
        f: impl FnOnce(&ValidationState, &AuthoringState, &DiagramModel) -> (ValidationState, Vec<ValidationRequest>),
    ) -> Vec<ValidationRequest> {
        let (previous, requests) = {
            let mut session = self.lock();
            let (next, requests) = f(&session.validation, &session.doc.authoring, &session.doc.diagram);
            (std::mem::replace(&mut session.validation, next), requests)
        };
        self.announce_validation(previous);
        requests
    }

    fn announce_validation(&self, previous: ValidationState) {
        let changed = !previous.same_state(&self.lock().validation);
        if changed {
            self.inner
                .events
                .emit(&EditorEvent::ValidationStateChanged { previous });
        }
    }

    pub(crate) fn spawn_validation(&self, task: impl Future<Output = ()> + Send + 'static) {
        let Some(runtime) = &self.inner.runtime else {
            warn!("validation: no tokio runtime, request skipped");
            return;
        };
        let handle = runtime.spawn(task);
        let mut in_flight = self.in_flight();
        in_flight.retain(|h| !h.is_finished());
        in_flight.push(handle);
    }

    // --- internals -----------------------------------------------------------

    /// Run `f` on the locked session, then announce the states it replaced.
    /// After an authoring change the validation placeholders are installed
    /// before the lock is released; validator tasks start after the events.
    fn mutate<R>(&self, f: impl FnOnce(&mut Session) -> R) -> R {
        let signal = self.inner.cancellation.signal();
        let mut session = self.lock();
        let previous_authoring = session.doc.authoring.clone();
        let previous_temporary = session.temporary.clone();
        let previous_validation = session.validation.clone();
        let result = f(&mut session);
        let authoring_changed = !previous_authoring.same_state(&session.doc.authoring);
        let temporary_changed = !previous_temporary.same_state(&session.temporary);

        let mut requests = Vec::new();
        let validator = session.validator.clone();
        if authoring_changed && validator.is_some() {
            let s = &mut *session;
            let targets = changed_elements_to_validate(&previous_authoring, &s.doc.authoring, &s.doc.diagram);
            let (next, pending) =
                install_placeholders(&targets, &s.validation, &s.doc.authoring, &s.doc.diagram, &signal);
            s.validation = next;
            requests = pending;
        }
        drop(session);

        if temporary_changed {
            self.inner.events.emit(&EditorEvent::TemporaryStateChanged {
                previous: previous_temporary,
            });
        }
        if authoring_changed {
            self.inner.events.emit(&EditorEvent::AuthoringStateChanged {
                previous: previous_authoring,
            });
        }
        if let Some(validator) = validator.filter(|_| authoring_changed) {
            self.announce_validation(previous_validation);
            dispatch(requests, &validator, self, &signal);
        }
        result
    }

    fn lock(&self) -> MutexGuard<'_, Session> {
        self.inner.session.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn in_flight(&self) -> MutexGuard<'_, Vec<JoinHandle<()>>> {
        self.inner.in_flight.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl std::fmt::Debug for EditorController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let session = self.lock();
        f.debug_struct("EditorController")
            .field("mode", &session.mode)
            .field("elements", &session.doc.diagram.element_count())
            .field("links", &session.doc.diagram.link_count())
            .field("pending_changes", &session.doc.authoring.len())
            .finish()
    }
}

fn first_element_data(diagram: &DiagramModel, iri: &ElementIri) -> Option<ElementData> {
    diagram.elements_by_iri(iri).first().map(|c| c.data.clone())
}

fn add_missing_link_cells(doc: &mut Document, batch: &mut Batch, data: &LinkData) {
    for (source, target) in doc.diagram.missing_link_cells(data) {
        let id = doc.diagram.next_cell_id();
        batch.execute(
            doc,
            EditCommand::AddLink(LinkCell {
                id,
                data: data.clone(),
                source,
                target,
                vertices: Vec::new(),
            }),
        );
    }
}

fn remove_link_cells(doc: &mut Document, batch: &mut Batch, key: &LinkKey) {
    let cells: Vec<CellId> = doc.diagram.links_by_key(key).iter().map(|l| l.id).collect();
    for id in cells {
        batch.execute(doc, EditCommand::RemoveLink(id));
    }
}

fn change_relation_in(
    doc: &mut Document,
    batch: &mut Batch,
    before: &LinkData,
    after: LinkData,
) -> Result<(), EditorError> {
    if before.same_link(&after) {
        let next = doc.authoring.change_link(before, after.clone())?;
        batch.execute(
            doc,
            EditCommand::SetLinkData {
                key: before.key(),
                data: after,
            },
        );
        batch.execute(doc, EditCommand::SetAuthoringState(next));
        return Ok(());
    }

    // a pre-existing relation keeps its cells so the deletion stays visible
    if doc.authoring.is_new_link(&before.key()) {
        remove_link_cells(doc, batch, &before.key());
    }
    add_missing_link_cells(doc, batch, &after);
    let next = doc.authoring.delete_link(before).add_link(after);
    batch.execute(doc, EditCommand::SetAuthoringState(next));
    Ok(())
}

fn delete_relation_in(doc: &mut Document, batch: &mut Batch, data: &LinkData) {
    let key = data.key();
    if doc.authoring.is_deleted_link(&key) {
        return;
    }
    if doc.authoring.is_new_link(&key) {
        remove_link_cells(doc, batch, &key);
    }
    let next = doc.authoring.delete_link(data);
    batch.execute(doc, EditCommand::SetAuthoringState(next));
}

/// Bring the diagram back in line with discarding `event`.
fn revert_diagram(doc: &mut Document, batch: &mut Batch, event: &AuthoringEvent) {
    match event {
        AuthoringEvent::Element(change) => {
            if change.deleted {
                return;
            }
            match &change.before {
                Some(before) => batch.execute(
                    doc,
                    EditCommand::SetElementData {
                        iri: change.iri().clone(),
                        data: before.clone(),
                    },
                ),
                None => {
                    let cells: Vec<CellId> = doc
                        .diagram
                        .elements_by_iri(change.iri())
                        .iter()
                        .map(|c| c.id)
                        .collect();
                    for id in cells {
                        batch.execute(doc, EditCommand::RemoveElement(id));
                    }
                }
            }
        }
        AuthoringEvent::Link(change) => {
            if change.deleted {
                return;
            }
            match &change.before {
                Some(before) => batch.execute(
                    doc,
                    EditCommand::SetLinkData {
                        key: change.key(),
                        data: before.clone(),
                    },
                ),
                None => remove_link_cells(doc, batch, &change.key()),
            }
        }
    }
}

fn drain_temporary(s: &mut Session, cells: &[CellId]) {
    let mut temporary = s.temporary.clone();
    s.scaffold("Remove temporary cells", |doc, batch| {
        for &id in cells {
            if let Some(cell) = doc.diagram.element(id).cloned() {
                if !temporary.has_element(&cell.data.id) {
                    continue;
                }
                let attached: Vec<LinkKey> = doc
                    .diagram
                    .element_links(id)
                    .iter()
                    .map(|l| l.data.key())
                    .collect();
                batch.execute(doc, EditCommand::RemoveElement(id));
                if doc.diagram.elements_by_iri(&cell.data.id).is_empty() {
                    temporary = temporary.delete_element(&cell.data.id);
                }
                for key in attached {
                    if doc.diagram.links_by_key(&key).is_empty() {
                        temporary = temporary.delete_link(&key);
                    }
                }
            } else if let Some(link) = doc.diagram.link(id).cloned() {
                let key = link.data.key();
                if !temporary.has_link(&key) {
                    continue;
                }
                batch.execute(doc, EditCommand::RemoveLink(id));
                if doc.diagram.links_by_key(&key).is_empty() {
                    temporary = temporary.delete_link(&key);
                }
            }
        }
    });
    s.temporary = temporary;
}

// --- tests -------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn editor_with(iris: &[&str], links: &[(&str, &str)]) -> EditorController {
        let mut d = DiagramModel::new();
        for iri in iris {
            d.add_element(ElementData::new(*iri), Vector::default());
        }
        for (s, t) in links {
            d.create_links(&LinkData::new("ex:p", *s, *t));
        }
        EditorController::with_diagram(EditorConfig::default(), d)
    }

    fn cell_of(editor: &EditorController, iri: &str) -> CellId {
        editor.diagram().elements_by_iri(&iri.into())[0].id
    }

    fn iri(s: &str) -> ElementIri {
        ElementIri::new(s)
    }

    #[test]
    fn create_entity_is_undoable() {
        let editor = EditorController::new(EditorConfig::default());
        let id = editor.create_entity(ElementData::new("ex:a"), Vector::new(1.0, 2.0), false);

        assert!(editor.authoring_state().is_new_element(&iri("ex:a")));
        assert_eq!(editor.diagram().element(id).map(|c| c.position), Some(Vector::new(1.0, 2.0)));

        assert_eq!(editor.undo().as_deref(), Some("Create new entity"));
        assert!(editor.diagram().is_empty());
        assert!(editor.authoring_state().is_empty());
    }

    #[test]
    fn temporary_entity_is_not_authored() {
        let editor = EditorController::new(EditorConfig::default());
        editor.create_entity(ElementData::new("ex:tmp"), Vector::default(), true);

        assert!(editor.authoring_state().is_empty());
        assert!(editor.temporary_state().has_element(&iri("ex:tmp")));
        assert!(!editor.can_undo());

        editor.remove_all_temporary_cells();
        assert!(editor.diagram().is_empty());
        assert!(editor.temporary_state().is_empty());
    }

    #[test]
    fn change_entity_keeps_original_before() {
        let editor = editor_with(&["ex:a"], &[]);
        editor.change_entity(&iri("ex:a"), ElementData::new("ex:a").with_label("one"));
        editor.change_entity(&iri("ex:a"), ElementData::new("ex:a").with_label("two"));

        let change = editor.authoring_state().element_event(&iri("ex:a")).unwrap();
        assert_eq!(change.before, Some(ElementData::new("ex:a")));
        assert_eq!(change.after.label.as_deref(), Some("two"));

        editor.undo();
        editor.undo();
        assert!(editor.authoring_state().is_empty());
        assert_eq!(editor.diagram().elements_by_iri(&iri("ex:a"))[0].data, ElementData::new("ex:a"));
    }

    #[test]
    fn change_of_missing_entity_is_ignored() {
        let editor = EditorController::new(EditorConfig::default());
        editor.change_entity(&iri("ex:nowhere"), ElementData::new("ex:nowhere"));
        assert!(editor.authoring_state().is_empty());
        assert!(!editor.can_undo());
    }

    #[test]
    fn renaming_new_entity_rekeys_record_and_links() {
        let editor = EditorController::new(EditorConfig::default());
        let a = editor.create_entity(ElementData::new("ex:a"), Vector::default(), false);
        let b = editor.create_entity(ElementData::new("ex:b"), Vector::default(), false);
        editor
            .create_relation(LinkTemplate::new(LinkData::new("ex:p", "ex:a", "ex:b"), a, b), false)
            .unwrap();

        editor.change_entity(&iri("ex:a"), ElementData::new("ex:a2"));
        let state = editor.authoring_state();
        assert!(state.is_new_element(&iri("ex:a2")));
        assert!(state.element_event(&iri("ex:a")).is_none());
        assert!(state.is_new_link(&LinkKey::new("ex:p", "ex:a2", "ex:b")));
        assert_eq!(editor.diagram().element(a).unwrap().data.id, iri("ex:a2"));
    }

    #[test]
    fn renaming_existing_entity_keeps_its_key() {
        let editor = editor_with(&["ex:a"], &[]);
        editor.change_entity(&iri("ex:a"), ElementData::new("ex:renamed"));

        let state = editor.authoring_state();
        let change = state.element_event(&iri("ex:a")).unwrap();
        assert_eq!(change.new_iri, Some(iri("ex:renamed")));
        assert!(state.is_element_with_modified_iri(&iri("ex:a")));
        assert_eq!(editor.diagram().elements_by_iri(&iri("ex:a")).len(), 1);
    }

    #[test]
    fn deleting_existing_entity_tombstones_and_drops_new_links() {
        let editor = editor_with(&["ex:a", "ex:b"], &[]);
        let (a, b) = (cell_of(&editor, "ex:a"), cell_of(&editor, "ex:b"));
        editor
            .create_relation(LinkTemplate::new(LinkData::new("ex:p", "ex:a", "ex:b"), a, b), false)
            .unwrap();
        editor.change_entity(&iri("ex:a"), ElementData::new("ex:a").with_label("edited"));

        editor.delete_entity(&iri("ex:a"));
        let state = editor.authoring_state();
        let change = state.element_event(&iri("ex:a")).unwrap();
        assert!(change.deleted);
        assert_eq!(change.before, Some(ElementData::new("ex:a")));
        assert!(state.links().is_empty());

        let diagram = editor.diagram();
        assert_eq!(diagram.link_count(), 0);
        assert_eq!(diagram.element(a).unwrap().data, ElementData::new("ex:a"));
    }

    #[test]
    fn deleting_new_entity_erases_it() {
        let editor = EditorController::new(EditorConfig::default());
        editor.create_entity(ElementData::new("ex:a"), Vector::default(), false);
        editor.delete_entity(&iri("ex:a"));
        assert!(editor.authoring_state().is_empty());
        assert!(editor.diagram().is_empty());
    }

    #[test]
    fn duplicate_relation_is_rejected() {
        let editor = editor_with(&["ex:a", "ex:b"], &[("ex:a", "ex:b")]);
        let (a, b) = (cell_of(&editor, "ex:a"), cell_of(&editor, "ex:b"));
        let result = editor.create_relation(LinkTemplate::new(LinkData::new("ex:p", "ex:a", "ex:b"), a, b), false);
        assert!(matches!(result, Err(EditorError::RelationAlreadyExists(_))));
        assert!(editor.authoring_state().is_empty());
    }

    #[test]
    fn existing_relation_from_another_cell_is_rejected() {
        let mut d = DiagramModel::new();
        d.add_element(ElementData::new("ex:a"), Vector::default());
        let b = d.add_element(ElementData::new("ex:b"), Vector::default());
        d.create_links(&LinkData::new("ex:p", "ex:a", "ex:b"));
        let a2 = d.add_element(ElementData::new("ex:a"), Vector::new(50.0, 0.0));
        let editor = EditorController::with_diagram(EditorConfig::default(), d);

        let result = editor.create_relation(LinkTemplate::new(LinkData::new("ex:p", "ex:a", "ex:b"), a2, b), false);
        assert!(matches!(result, Err(EditorError::RelationAlreadyExists(_))));
        assert!(!editor.authoring_state().is_new_link(&LinkKey::new("ex:p", "ex:a", "ex:b")));
        assert_eq!(editor.diagram().link_count(), 1);
        assert!(!editor.can_undo());
    }

    #[test]
    fn deleted_relation_cannot_be_recreated() {
        let editor = editor_with(&["ex:a", "ex:b"], &[("ex:a", "ex:b")]);
        let (a, b) = (cell_of(&editor, "ex:a"), cell_of(&editor, "ex:b"));
        let relation = LinkData::new("ex:p", "ex:a", "ex:b");
        editor.delete_relation(&relation);
        let result = editor.create_relation(LinkTemplate::new(relation.clone(), a, b), false);
        assert!(matches!(result, Err(EditorError::RelationAlreadyExists(_))));
        assert!(editor.authoring_state().is_deleted_link(&relation.key()));
    }

    #[test]
    fn relation_without_cells_rolls_back() {
        let editor = editor_with(&["ex:a"], &[]);
        let a = cell_of(&editor, "ex:a");
        let result = editor
            .create_relation(LinkTemplate::new(LinkData::new("ex:p", "ex:a", "ex:x"), a, CellId(99)), false)
            .unwrap();
        assert_eq!(result, None);
        assert!(editor.authoring_state().is_empty());
        assert!(!editor.can_undo());
    }

    #[test]
    fn relation_fans_out_to_every_endpoint_cell() {
        let editor = editor_with(&["ex:a", "ex:a", "ex:b"], &[]);
        let a = cell_of(&editor, "ex:a");
        let b = cell_of(&editor, "ex:b");
        editor
            .create_relation(LinkTemplate::new(LinkData::new("ex:p", "ex:a", "ex:b"), a, b), false)
            .unwrap();
        assert_eq!(editor.diagram().link_count(), 2);
        assert_eq!(editor.authoring_state().links().len(), 1);
    }

    #[test]
    fn change_relation_with_same_key_edits_in_place() {
        let editor = editor_with(&["ex:a", "ex:b"], &[("ex:a", "ex:b")]);
        let before = LinkData::new("ex:p", "ex:a", "ex:b");
        let after = before.clone().with_property("ex:note", "x");
        editor.change_relation(&before, after.clone()).unwrap();

        let change = editor.authoring_state().link_event(&before.key()).unwrap();
        assert_eq!(change.before, Some(before));
        assert_eq!(editor.diagram().links().next().unwrap().data, after);
    }

    #[test]
    fn change_relation_with_new_key_tombstones_existing() {
        let editor = editor_with(&["ex:a", "ex:b", "ex:c"], &[("ex:a", "ex:b")]);
        let before = LinkData::new("ex:p", "ex:a", "ex:b");
        editor.change_relation(&before, LinkData::new("ex:p", "ex:a", "ex:c")).unwrap();

        let state = editor.authoring_state();
        assert!(state.is_deleted_link(&before.key()));
        assert!(state.is_new_link(&LinkKey::new("ex:p", "ex:a", "ex:c")));
        assert_eq!(editor.diagram().link_count(), 2);
    }

    #[test]
    fn moving_relation_target_keeps_vertices() {
        let editor = editor_with(&["ex:a", "ex:b", "ex:c"], &[]);
        let (a, b, c) = (cell_of(&editor, "ex:a"), cell_of(&editor, "ex:b"), cell_of(&editor, "ex:c"));
        let mut template = LinkTemplate::new(LinkData::new("ex:p", "ex:a", "ex:b"), a, b);
        template.vertices = vec![Vector::new(5.0, 5.0)];
        let link = editor.create_relation(template, false).unwrap().unwrap();

        let moved = editor.move_relation_target(link, c).unwrap();
        let diagram = editor.diagram();
        let cell = diagram.link(moved).unwrap();
        assert_eq!(cell.data.target, iri("ex:c"));
        assert_eq!(cell.vertices, vec![Vector::new(5.0, 5.0)]);
        assert!(diagram.link(link).is_none(), "new relation's old cell is removed");

        let state = editor.authoring_state();
        assert!(state.links().get(&LinkKey::new("ex:p", "ex:a", "ex:b")).is_none());
        assert!(state.is_new_link(&LinkKey::new("ex:p", "ex:a", "ex:c")));
    }

    #[test]
    fn moving_relation_source_keeps_vertices() {
        let editor = editor_with(&["ex:a", "ex:b", "ex:c"], &[]);
        let (a, b, c) = (cell_of(&editor, "ex:a"), cell_of(&editor, "ex:b"), cell_of(&editor, "ex:c"));
        let mut template = LinkTemplate::new(LinkData::new("ex:p", "ex:a", "ex:b"), a, b);
        template.vertices = vec![Vector::new(1.0, 2.0), Vector::new(3.0, 4.0)];
        let link = editor.create_relation(template, false).unwrap().unwrap();

        let moved = editor.move_relation_source(link, c).unwrap();
        let diagram = editor.diagram();
        let cell = diagram.link(moved).unwrap();
        assert_eq!(cell.data.source, iri("ex:c"));
        assert_eq!((cell.source, cell.target), (c, b));
        assert_eq!(cell.vertices, vec![Vector::new(1.0, 2.0), Vector::new(3.0, 4.0)]);
        assert!(diagram.link(link).is_none(), "new relation's old cell is removed");

        let state = editor.authoring_state();
        assert!(state.links().get(&LinkKey::new("ex:p", "ex:a", "ex:b")).is_none());
        assert!(state.is_new_link(&LinkKey::new("ex:p", "ex:c", "ex:b")));
    }

    #[test]
    fn moving_existing_relation_source_tombstones_it() {
        let editor = editor_with(&["ex:a", "ex:b", "ex:c"], &[("ex:a", "ex:b")]);
        let c = cell_of(&editor, "ex:c");
        let old_key = LinkKey::new("ex:p", "ex:a", "ex:b");
        let link = editor.diagram().links_by_key(&old_key)[0].id;

        let moved = editor.move_relation_source(link, c).unwrap();
        let state = editor.authoring_state();
        assert!(state.is_deleted_link(&old_key));
        assert!(state.is_new_link(&LinkKey::new("ex:p", "ex:c", "ex:b")));

        let diagram = editor.diagram();
        assert!(diagram.link(link).is_some(), "tombstoned relation stays drawn");
        assert_eq!(diagram.link(moved).unwrap().data.source, iri("ex:c"));
    }

    #[test]
    fn moving_existing_relation_target_tombstones_it() {
        let editor = editor_with(&["ex:a", "ex:b", "ex:c"], &[("ex:a", "ex:b")]);
        let c = cell_of(&editor, "ex:c");
        let old_key = LinkKey::new("ex:p", "ex:a", "ex:b");
        let link = editor.diagram().links_by_key(&old_key)[0].id;

        let moved = editor.move_relation_target(link, c).unwrap();
        let state = editor.authoring_state();
        let tombstone = state.link_event(&old_key).unwrap();
        assert!(tombstone.deleted);
        assert_eq!(tombstone.before, Some(LinkData::new("ex:p", "ex:a", "ex:b")));
        assert!(state.is_new_link(&LinkKey::new("ex:p", "ex:a", "ex:c")));
        assert_eq!(editor.diagram().link(moved).unwrap().data.target, iri("ex:c"));
        assert!(editor.diagram().link(link).is_some());
    }

    #[test]
    fn moving_missing_cell_fails() {
        let editor = editor_with(&["ex:a"], &[]);
        let a = cell_of(&editor, "ex:a");
        assert!(matches!(
            editor.move_relation_source(CellId(42), a),
            Err(EditorError::CellNotFound(CellId(42)))
        ));
    }

    #[test]
    fn delete_relation_is_noop_when_endpoint_deleted() {
        let editor = editor_with(&["ex:a", "ex:b"], &[("ex:a", "ex:b")]);
        editor.delete_entity(&iri("ex:b"));
        let before = editor.authoring_state();
        editor.delete_relation(&LinkData::new("ex:p", "ex:a", "ex:b"));
        assert!(editor.authoring_state().same_state(&before));
    }

    #[test]
    fn remove_items_is_one_undo_unit() {
        let editor = EditorController::new(EditorConfig::default());
        let a = editor.create_entity(ElementData::new("ex:a"), Vector::default(), false);
        let b = editor.create_entity(ElementData::new("ex:b"), Vector::default(), false);
        editor
            .create_relation(LinkTemplate::new(LinkData::new("ex:p", "ex:a", "ex:b"), a, b), false)
            .unwrap();

        editor.remove_items(&[a]);
        let state = editor.authoring_state();
        assert!(state.element_event(&iri("ex:a")).is_none());
        assert!(state.links().is_empty());
        assert!(editor.diagram().element(a).is_none());

        assert_eq!(editor.undo().as_deref(), Some("Remove items"));
        assert!(editor.authoring_state().is_new_element(&iri("ex:a")));
        assert_eq!(editor.diagram().link_count(), 1);
    }

    #[test]
    fn remove_items_hides_existing_relation_without_recording() {
        let editor = editor_with(&["ex:a", "ex:b"], &[("ex:a", "ex:b")]);
        let key = LinkKey::new("ex:p", "ex:a", "ex:b");
        let link = editor.diagram().links_by_key(&key)[0].id;

        editor.remove_items(&[link]);
        assert!(editor.diagram().link(link).is_none());
        assert!(editor.authoring_state().is_empty());

        editor.undo();
        assert!(editor.diagram().link(link).is_some());
    }

    #[test]
    fn discard_change_restores_diagram() {
        let editor = editor_with(&["ex:a"], &[]);
        editor.change_entity(&iri("ex:a"), ElementData::new("ex:a").with_label("edited"));
        let event = editor.authoring_state().events().next().unwrap();

        editor.discard_change(&event);
        assert!(editor.authoring_state().is_empty());
        assert_eq!(editor.diagram().elements().next().unwrap().data, ElementData::new("ex:a"));

        // stale event
        editor.discard_change(&event);
        assert_eq!(editor.undo().as_deref(), Some("Discard change"));
    }

    #[test]
    fn events_follow_state_changes() {
        let editor = EditorController::new(EditorConfig::default());
        let authoring = Arc::new(AtomicUsize::new(0));
        let temporary = Arc::new(AtomicUsize::new(0));
        let (a, t) = (Arc::clone(&authoring), Arc::clone(&temporary));
        let observer = editor.clone();
        let _subscription = editor.subscribe(move |event| match event {
            EditorEvent::AuthoringStateChanged { previous } => {
                // the new state is already installed
                assert!(!previous.same_state(&observer.authoring_state()));
                a.fetch_add(1, Ordering::SeqCst);
            }
            EditorEvent::TemporaryStateChanged { .. } => {
                t.fetch_add(1, Ordering::SeqCst);
            }
            _ => {}
        });

        editor.create_entity(ElementData::new("ex:a"), Vector::default(), false);
        editor.create_entity(ElementData::new("ex:t"), Vector::default(), true);
        editor.change_entity(&iri("ex:missing"), ElementData::new("ex:missing"));

        assert_eq!(authoring.load(Ordering::SeqCst), 1);
        assert_eq!(temporary.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn mode_change_is_announced_once() {
        let editor = EditorController::new(EditorConfig::default());
        let count = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&count);
        let _subscription = editor.subscribe(move |event| {
            if let EditorEvent::ModeChanged { previous } = event {
                assert_eq!(*previous, EditorMode::Authoring);
                seen.fetch_add(1, Ordering::SeqCst);
            }
        });
        editor.set_mode(EditorMode::Readonly);
        editor.set_mode(EditorMode::Readonly);
        assert_eq!(editor.mode(), EditorMode::Readonly);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn set_authoring_state_is_undoable() {
        let editor = EditorController::new(EditorConfig::default());
        editor.create_entity(ElementData::new("ex:a"), Vector::default(), false);
        editor.set_authoring_state(AuthoringState::new());
        assert!(editor.authoring_state().is_empty());
        editor.undo();
        assert!(editor.authoring_state().is_new_element(&iri("ex:a")));
    }
}
