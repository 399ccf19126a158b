//! Shared helpers for the graphweave conformance test suite.
//!
//! Provides [`diagram`] for building a starting graph from string literals,
//! [`ScriptedValidator`], a validator whose answers (including latency and
//! failures) are scripted per entity, and [`EventLog`] for observing the
//! notifications an editor emits.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use graphweave::{
    DiagramModel, EditorController, EditorEvent, ElementData, ElementIri, LinkData, Subscription,
    ValidationEvent, ValidationIssue, Validator, ValidatorError, Vector,
};

/// Build a diagram with one cell per `(iri, label)` and every link drawn.
/// An empty label leaves the entity unlabeled.
pub fn diagram(elements: &[(&str, &str)], links: &[(&str, &str, &str)]) -> DiagramModel {
    let mut diagram = DiagramModel::new();
    for (i, (iri, label)) in elements.iter().enumerate() {
        let mut data = ElementData::new(*iri);
        if !label.is_empty() {
            data = data.with_label(*label);
        }
        diagram.add_element(data, Vector::new(i as f64 * 100.0, 0.0));
    }
    for (link_type, source, target) in links {
        diagram.create_links(&LinkData::new(*link_type, *source, *target));
    }
    diagram
}

#[derive(Debug)]
struct Response {
    delay: Duration,
    outcome: Result<Vec<ValidationIssue>, String>,
}

/// A validator answering from a per-entity queue of scripted responses.
///
/// Entities without a queued response are valid. Every call is recorded.
#[derive(Debug, Default)]
pub struct ScriptedValidator {
    responses: Mutex<HashMap<ElementIri, VecDeque<Response>>>,
    calls: Mutex<Vec<ElementIri>>,
}

impl ScriptedValidator {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// The same validator, typed for [`EditorController::set_validator`].
    pub fn handle(self: &Arc<Self>) -> Arc<dyn Validator> {
        Arc::clone(self) as Arc<dyn Validator>
    }

    /// Queue an answer for the next call about `iri`.
    pub fn respond(&self, iri: &str, delay: Duration, issues: Vec<ValidationIssue>) {
        self.push(iri, Response {
            delay,
            outcome: Ok(issues),
        });
    }

    /// Queue a failure for the next call about `iri`.
    pub fn fail(&self, iri: &str, delay: Duration, message: &str) {
        self.push(iri, Response {
            delay,
            outcome: Err(message.to_string()),
        });
    }

    /// Every entity validated so far, in call order.
    pub fn calls(&self) -> Vec<ElementIri> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self, iri: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.as_str() == iri)
            .count()
    }

    fn push(&self, iri: &str, response: Response) {
        self.responses
            .lock()
            .unwrap()
            .entry(ElementIri::new(iri))
            .or_default()
            .push_back(response);
    }
}

#[async_trait]
impl Validator for ScriptedValidator {
    async fn validate(&self, event: ValidationEvent) -> Result<Vec<ValidationIssue>, ValidatorError> {
        let iri = event.target.id.clone();
        self.calls.lock().unwrap().push(iri.clone());
        let response = self
            .responses
            .lock()
            .unwrap()
            .get_mut(&iri)
            .and_then(|queue| queue.pop_front());
        let Some(response) = response else {
            return Ok(Vec::new());
        };

        if !response.delay.is_zero() {
            tokio::select! {
                _ = tokio::time::sleep(response.delay) => {}
                _ = event.signal.aborted() => return Ok(Vec::new()),
            }
        }
        response.outcome.map_err(ValidatorError::from)
    }
}

/// Names of the events an editor emitted, in order.
pub struct EventLog {
    events: Arc<Mutex<Vec<&'static str>>>,
    _subscription: Subscription,
}

impl EventLog {
    pub fn attach(editor: &EditorController) -> Self {
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        let subscription = editor.subscribe(move |event| {
            let name = match event {
                EditorEvent::AuthoringStateChanged { .. } => "authoring",
                EditorEvent::ValidationStateChanged { .. } => "validation",
                EditorEvent::TemporaryStateChanged { .. } => "temporary",
                EditorEvent::ModeChanged { .. } => "mode",
            };
            sink.lock().unwrap().push(name);
        });
        Self {
            events,
            _subscription: subscription,
        }
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.events.lock().unwrap().clone()
    }

    pub fn count(&self, name: &str) -> usize {
        self.names().iter().filter(|n| **n == name).count()
    }
}
