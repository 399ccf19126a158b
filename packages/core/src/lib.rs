//! Authoring core for entity/relation diagrams.
//!
//! This crate tracks what a user wants to change in an externally sourced
//! graph of entities and relations, keeps every edit undoable, and keeps an
//! asynchronous validation of the pending changes up to date. It is the
//! foundation of the `gweave` CLI.
//!
//! # Crate layout
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`types`] | IRIs and the data snapshots: [`ElementData`], [`LinkData`], [`LinkKey`] |
//! | [`collections`] | Persistent maps and sets keyed by IRI or [`LinkKey`] |
//! | [`authoring`] | Pending changes and their pure transitions: [`AuthoringState`] |
//! | [`temporary`] | Scaffolding outside the change set: [`TemporaryState`] |
//! | [`graph`] | The live diagram of element and link cells: [`DiagramModel`] |
//! | [`history`] | Reversible commands and the undo/redo stacks |
//! | [`editor`] | The editing session: [`EditorController`] |
//! | [`validation`] | Incremental asynchronous validation: [`Validator`], [`ValidationState`] |
//! | [`cancel`] | Cooperative cancellation: [`AbortController`], [`map_abort_to_none`] |
//! | [`events`] | Change notifications: [`EditorEvent`] |
//! | [`config`] | [`EditorConfig`] from environment variables |
//! | [`render`] | Plain-text rendering of authoring and validation state |
//!
//! # Quick start
//!
//! ```rust,ignore
//! use graphweave::{EditorConfig, EditorController, ElementData, Vector};
//!
//! let editor = EditorController::new(EditorConfig::from_env());
//! editor.create_entity(ElementData::new("ex:alice").with_label("Alice"), Vector::default(), false);
//! assert!(editor.authoring_state().is_new_element(&"ex:alice".into()));
//!
//! editor.undo();
//! assert!(editor.authoring_state().is_empty());
//! ```

pub mod authoring;
pub mod cancel;
pub mod collections;
pub mod config;
pub mod editor;
pub mod events;
pub mod graph;
pub mod history;
pub mod render;
pub mod temporary;
pub mod types;
pub mod validation;

pub use authoring::{AuthoringError, AuthoringEvent, AuthoringState, ElementChange, LinkChange};
pub use cancel::{map_abort_to_none, AbortController, AbortSignal};
pub use config::{EditorConfig, EditorMode};
pub use editor::{EditorController, EditorError, LinkTemplate};
pub use events::{EditorEvent, Subscription};
pub use graph::{CellId, DiagramModel, ElementCell, LinkCell};
pub use temporary::TemporaryState;
pub use types::{
    ElementData, ElementIri, ElementTypeIri, LinkData, LinkKey, LinkTypeIri, PropertyTypeIri, Vector,
};
pub use validation::{
    ElementError, LinkError, ValidationEvent, ValidationIssue, ValidationState, Validator,
    ValidatorError,
};
