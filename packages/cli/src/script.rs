//! Authoring scripts: a starting diagram plus a list of editor steps.
//!
//! ```json
//! {
//!   "diagram": {
//!     "elements": [{ "id": "ex:alice", "label": "Alice", "position": { "x": 0, "y": 0 } }],
//!     "links": [{ "type": "ex:knows", "source": "ex:alice", "target": "ex:bob" }]
//!   },
//!   "steps": [
//!     { "op": "change_entity", "iri": "ex:alice", "data": { "id": "ex:alice" } },
//!     { "op": "undo" }
//!   ]
//! }
//! ```

use graphweave::{
    AuthoringEvent, DiagramModel, EditorController, EditorError, ElementData, ElementIri,
    LinkData, LinkKey, LinkTemplate, Vector,
};
use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum ScriptError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse script: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("step {step}: {source}")]
    Editor {
        step: usize,
        #[source]
        source: EditorError,
    },

    #[error("step {step}: entity {iri} is not on the diagram")]
    MissingEntity { step: usize, iri: ElementIri },

    #[error("step {step}: no pending change for {target}")]
    NoPendingChange { step: usize, target: String },
}

#[derive(Debug, Deserialize)]
pub struct Script {
    #[serde(default)]
    pub diagram: DiagramSpec,
    #[serde(default)]
    pub steps: Vec<Step>,
}

/// The externally sourced graph the script starts from.
#[derive(Debug, Default, Deserialize)]
pub struct DiagramSpec {
    #[serde(default)]
    pub elements: Vec<PlacedElement>,
    #[serde(default)]
    pub links: Vec<LinkData>,
}

#[derive(Debug, Deserialize)]
pub struct PlacedElement {
    #[serde(flatten)]
    pub data: ElementData,
    #[serde(default)]
    pub position: Vector,
}

/// One editor operation. Relations are drawn between the first cells of
/// their endpoint entities.
#[derive(Debug, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Step {
    CreateEntity {
        data: ElementData,
        #[serde(default)]
        position: Vector,
        #[serde(default)]
        temporary: bool,
    },
    ChangeEntity {
        iri: ElementIri,
        data: ElementData,
    },
    DeleteEntity {
        iri: ElementIri,
    },
    CreateRelation {
        data: LinkData,
        #[serde(default)]
        temporary: bool,
    },
    ChangeRelation {
        before: LinkData,
        after: LinkData,
    },
    DeleteRelation {
        data: LinkData,
    },
    DiscardEntity {
        iri: ElementIri,
    },
    DiscardRelation {
        #[serde(flatten)]
        key: LinkKey,
    },
    Undo,
    Redo,
}

impl Script {
    pub fn from_json(json: &str) -> Result<Self, ScriptError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Build the starting diagram. Each link is drawn between every pair of
    /// endpoint cells.
    pub fn diagram(&self) -> DiagramModel {
        let mut diagram = DiagramModel::new();
        for element in &self.diagram.elements {
            diagram.add_element(element.data.clone(), element.position);
        }
        for link in &self.diagram.links {
            diagram.create_links(link);
        }
        diagram
    }

    /// Apply every step to `editor`, stopping at the first failure.
    pub fn replay(&self, editor: &EditorController) -> Result<(), ScriptError> {
        for (index, step) in self.steps.iter().enumerate() {
            let step_no = index + 1;
            debug!(step = step_no, ?step, "script: apply");
            apply_step(editor, step_no, step)?;
        }
        Ok(())
    }
}

fn apply_step(editor: &EditorController, step_no: usize, step: &Step) -> Result<(), ScriptError> {
    let editor_err = |source| ScriptError::Editor {
        step: step_no,
        source,
    };
    match step {
        Step::CreateEntity {
            data,
            position,
            temporary,
        } => {
            editor.create_entity(data.clone(), *position, *temporary);
        }
        Step::ChangeEntity { iri, data } => editor.change_entity(iri, data.clone()),
        Step::DeleteEntity { iri } => editor.delete_entity(iri),
        Step::CreateRelation { data, temporary } => {
            let diagram = editor.diagram();
            let source = first_cell(&diagram, &data.source, step_no)?;
            let target = first_cell(&diagram, &data.target, step_no)?;
            editor
                .create_relation(LinkTemplate::new(data.clone(), source, target), *temporary)
                .map_err(editor_err)?;
        }
        Step::ChangeRelation { before, after } => {
            editor
                .change_relation(before, after.clone())
                .map_err(editor_err)?;
        }
        Step::DeleteRelation { data } => editor.delete_relation(data),
        Step::DiscardEntity { iri } => {
            let change = editor
                .authoring_state()
                .element_event(iri)
                .ok_or_else(|| ScriptError::NoPendingChange {
                    step: step_no,
                    target: iri.to_string(),
                })?;
            editor.discard_change(&AuthoringEvent::Element(change));
        }
        Step::DiscardRelation { key } => {
            let change = editor
                .authoring_state()
                .link_event(key)
                .ok_or_else(|| ScriptError::NoPendingChange {
                    step: step_no,
                    target: key.to_string(),
                })?;
            editor.discard_change(&AuthoringEvent::Link(change));
        }
        Step::Undo => {
            editor.undo();
        }
        Step::Redo => {
            editor.redo();
        }
    }
    Ok(())
}

fn first_cell(
    diagram: &DiagramModel,
    iri: &ElementIri,
    step: usize,
) -> Result<graphweave::CellId, ScriptError> {
    diagram
        .elements_by_iri(iri)
        .first()
        .map(|cell| cell.id)
        .ok_or_else(|| ScriptError::MissingEntity {
            step,
            iri: iri.clone(),
        })
}
