//! Undo/redo history of reversible edit commands.
//!
//! An [`EditCommand`] is plain data. Applying it to a [`CommandTarget`]
//! performs the edit and returns the command that reverts it, so the history
//! never stores closures over mutable state. Edits are grouped into a
//! [`Batch`]: storing the batch records one undo unit, discarding it keeps
//! the effects but leaves nothing to undo (used for scaffolding edits).

use std::collections::VecDeque;

use tracing::debug;

use crate::authoring::AuthoringState;
use crate::graph::{CellId, DiagramModel, ElementCell, LinkCell};
use crate::types::{ElementData, ElementIri, LinkData, LinkKey, Vector};

/// Something edit commands can be applied to.
pub trait CommandTarget {
    fn diagram_mut(&mut self) -> &mut DiagramModel;

    /// Install `state`, returning the state it replaced.
    fn replace_authoring_state(&mut self, state: AuthoringState) -> AuthoringState;
}

/// A reversible edit of the diagram or the authoring state.
#[derive(Debug, Clone)]
pub enum EditCommand {
    SetAuthoringState(AuthoringState),
    AddElement(ElementCell),
    RemoveElement(CellId),
    SetElementData { iri: ElementIri, data: ElementData },
    AddLink(LinkCell),
    RemoveLink(CellId),
    SetLinkData { key: LinkKey, data: LinkData },
    SetLinkVertices { link: CellId, vertices: Vec<Vector> },
    Compound(Vec<EditCommand>),
}

impl EditCommand {
    /// The command that does nothing.
    pub fn noop() -> Self {
        EditCommand::Compound(Vec::new())
    }

    /// Apply the command and return its inverse.
    pub fn apply<T: CommandTarget + ?Sized>(self, target: &mut T) -> EditCommand {
        match self {
            EditCommand::SetAuthoringState(state) => {
                EditCommand::SetAuthoringState(target.replace_authoring_state(state))
            }
            EditCommand::AddElement(cell) => {
                let id = cell.id;
                target.diagram_mut().insert_element(cell);
                EditCommand::RemoveElement(id)
            }
            EditCommand::RemoveElement(id) => match target.diagram_mut().remove_element(id) {
                Some((cell, links)) => {
                    let mut restore = vec![EditCommand::AddElement(cell)];
                    restore.extend(links.into_iter().map(EditCommand::AddLink));
                    EditCommand::Compound(restore)
                }
                None => EditCommand::noop(),
            },
            EditCommand::SetElementData { iri, data } => {
                let new_iri = data.id.clone();
                match target.diagram_mut().set_element_data(&iri, data) {
                    Some(previous) => EditCommand::SetElementData {
                        iri: new_iri,
                        data: previous,
                    },
                    None => EditCommand::noop(),
                }
            }
            EditCommand::AddLink(cell) => {
                let id = cell.id;
                target.diagram_mut().insert_link(cell);
                EditCommand::RemoveLink(id)
            }
            EditCommand::RemoveLink(id) => match target.diagram_mut().remove_link(id) {
                Some(cell) => EditCommand::AddLink(cell),
                None => EditCommand::noop(),
            },
            EditCommand::SetLinkData { key, data } => {
                let new_key = data.key();
                match target.diagram_mut().set_link_data(&key, data) {
                    Some(previous) => EditCommand::SetLinkData {
                        key: new_key,
                        data: previous,
                    },
                    None => EditCommand::noop(),
                }
            }
            EditCommand::SetLinkVertices { link, vertices } => {
                match target.diagram_mut().set_link_vertices(link, vertices) {
                    Some(previous) => EditCommand::SetLinkVertices {
                        link,
                        vertices: previous,
                    },
                    None => EditCommand::noop(),
                }
            }
            EditCommand::Compound(commands) => {
                let mut inverses = Vec::with_capacity(commands.len());
                for command in commands {
                    inverses.push(command.apply(target));
                }
                inverses.reverse();
                EditCommand::Compound(inverses)
            }
        }
    }
}

/// A group of commands executed as one unit.
#[derive(Debug)]
pub struct Batch {
    label: String,
    inverses: Vec<EditCommand>,
}

impl Batch {
    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn is_empty(&self) -> bool {
        self.inverses.is_empty()
    }

    /// Apply `command` to `target` and remember how to revert it.
    pub fn execute<T: CommandTarget + ?Sized>(&mut self, target: &mut T, command: EditCommand) {
        self.inverses.push(command.apply(target));
    }

    /// Revert every command executed so far, newest first.
    pub fn rollback<T: CommandTarget + ?Sized>(&mut self, target: &mut T) {
        while let Some(inverse) = self.inverses.pop() {
            inverse.apply(target);
        }
    }

    fn into_undo(self) -> HistoryEntry {
        let mut inverses = self.inverses;
        inverses.reverse();
        HistoryEntry {
            label: self.label,
            command: EditCommand::Compound(inverses),
        }
    }
}

#[derive(Debug)]
struct HistoryEntry {
    label: String,
    command: EditCommand,
}

/// Bounded undo/redo stacks.
#[derive(Debug)]
pub struct CommandHistory {
    undo_stack: VecDeque<HistoryEntry>,
    redo_stack: Vec<HistoryEntry>,
    max_depth: usize,
}

impl CommandHistory {
    /// Create a history keeping at most `max_depth` undo units (minimum 1).
    pub fn new(max_depth: usize) -> Self {
        Self {
            undo_stack: VecDeque::new(),
            redo_stack: Vec::new(),
            max_depth: max_depth.max(1),
        }
    }

    pub fn start_batch(&self, label: impl Into<String>) -> Batch {
        Batch {
            label: label.into(),
            inverses: Vec::new(),
        }
    }

    /// Record the batch as one undo unit. Empty batches are dropped.
    pub fn store(&mut self, batch: Batch) {
        if batch.is_empty() {
            return;
        }
        debug!(label = %batch.label, "history: store");
        self.redo_stack.clear();
        self.undo_stack.push_back(batch.into_undo());
        while self.undo_stack.len() > self.max_depth {
            self.undo_stack.pop_front();
        }
    }

    /// Keep the batch's effects without recording anything to undo.
    pub fn discard(&mut self, batch: Batch) {
        debug!(label = %batch.label, commands = batch.inverses.len(), "history: discard");
    }

    /// Revert the newest undo unit. Returns its label.
    pub fn undo<T: CommandTarget + ?Sized>(&mut self, target: &mut T) -> Option<String> {
        let entry = self.undo_stack.pop_back()?;
        let redo = entry.command.apply(target);
        debug!(label = %entry.label, "history: undo");
        self.redo_stack.push(HistoryEntry {
            label: entry.label.clone(),
            command: redo,
        });
        Some(entry.label)
    }

    /// Re-apply the newest undone unit. Returns its label.
    pub fn redo<T: CommandTarget + ?Sized>(&mut self, target: &mut T) -> Option<String> {
        let entry = self.redo_stack.pop()?;
        let undo = entry.command.apply(target);
        debug!(label = %entry.label, "history: redo");
        self.undo_stack.push_back(HistoryEntry {
            label: entry.label.clone(),
            command: undo,
        });
        Some(entry.label)
    }

    pub fn can_undo(&self) -> bool {
        !self.undo_stack.is_empty()
    }

    pub fn can_redo(&self) -> bool {
        !self.redo_stack.is_empty()
    }

    pub fn next_undo_label(&self) -> Option<&str> {
        self.undo_stack.back().map(|e| e.label.as_str())
    }

    pub fn next_redo_label(&self) -> Option<&str> {
        self.redo_stack.last().map(|e| e.label.as_str())
    }

    pub fn clear(&mut self) {
        self.undo_stack.clear();
        self.redo_stack.clear();
    }
}

impl Default for CommandHistory {
    fn default() -> Self {
        Self::new(100)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Doc {
        diagram: DiagramModel,
        authoring: AuthoringState,
    }

    impl CommandTarget for Doc {
        fn diagram_mut(&mut self) -> &mut DiagramModel {
            &mut self.diagram
        }

        fn replace_authoring_state(&mut self, state: AuthoringState) -> AuthoringState {
            std::mem::replace(&mut self.authoring, state)
        }
    }

    fn cell(doc: &mut Doc, iri: &str) -> ElementCell {
        ElementCell {
            id: doc.diagram.next_cell_id(),
            data: ElementData::new(iri),
            position: Vector::default(),
        }
    }

    #[test]
    fn undo_and_redo_restore_diagram_and_state() {
        let mut doc = Doc::default();
        let mut history = CommandHistory::new(10);

        let a = cell(&mut doc, "ex:a");
        let state = doc.authoring.add_element(a.data.clone());
        let mut batch = history.start_batch("Create new entity");
        batch.execute(&mut doc, EditCommand::AddElement(a.clone()));
        batch.execute(&mut doc, EditCommand::SetAuthoringState(state));
        history.store(batch);

        assert_eq!(history.next_undo_label(), Some("Create new entity"));
        assert_eq!(history.undo(&mut doc).as_deref(), Some("Create new entity"));
        assert!(doc.diagram.is_empty());
        assert!(doc.authoring.is_empty());

        assert!(history.redo(&mut doc).is_some());
        assert_eq!(doc.diagram.element(a.id), Some(&a));
        assert!(doc.authoring.is_new_element(&a.data.id));
    }

    #[test]
    fn removing_element_restores_its_links_on_undo() {
        let mut doc = Doc::default();
        let a = doc.diagram.add_element(ElementData::new("ex:a"), Vector::default());
        let b = doc.diagram.add_element(ElementData::new("ex:b"), Vector::default());
        doc.diagram
            .add_link(LinkData::new("ex:p", "ex:a", "ex:b"), a, b)
            .unwrap();

        let inverse = EditCommand::RemoveElement(a).apply(&mut doc);
        assert_eq!(doc.diagram.link_count(), 0);
        inverse.apply(&mut doc);
        assert_eq!(doc.diagram.element_count(), 2);
        assert_eq!(doc.diagram.link_count(), 1);
    }

    #[test]
    fn rollback_reverts_in_reverse_order() {
        let mut doc = Doc::default();
        let history = CommandHistory::new(10);
        let a = cell(&mut doc, "ex:a");
        let renamed = ElementData::new("ex:a2");

        let mut batch = history.start_batch("edit");
        batch.execute(&mut doc, EditCommand::AddElement(a.clone()));
        batch.execute(
            &mut doc,
            EditCommand::SetElementData {
                iri: "ex:a".into(),
                data: renamed,
            },
        );
        batch.rollback(&mut doc);
        assert!(doc.diagram.is_empty());
        assert!(batch.is_empty());
    }

    #[test]
    fn discarded_batch_is_not_undoable() {
        let mut doc = Doc::default();
        let mut history = CommandHistory::new(10);
        let a = cell(&mut doc, "ex:a");
        let mut batch = history.start_batch("scaffolding");
        batch.execute(&mut doc, EditCommand::AddElement(a));
        history.discard(batch);
        assert!(!history.can_undo());
        assert_eq!(doc.diagram.element_count(), 1);
    }

    #[test]
    fn depth_is_bounded_and_store_clears_redo() {
        let mut doc = Doc::default();
        let mut history = CommandHistory::new(2);
        for i in 0..3 {
            let c = cell(&mut doc, &format!("ex:{i}"));
            let mut batch = history.start_batch(format!("add {i}"));
            batch.execute(&mut doc, EditCommand::AddElement(c));
            history.store(batch);
        }
        assert_eq!(history.next_undo_label(), Some("add 2"));
        history.undo(&mut doc);
        history.undo(&mut doc);
        assert!(!history.can_undo());
        assert!(history.can_redo());

        let c = cell(&mut doc, "ex:new");
        let mut batch = history.start_batch("add new");
        batch.execute(&mut doc, EditCommand::AddElement(c));
        history.store(batch);
        assert!(!history.can_redo());
    }
}
