//! Built-in validator with a couple of structural rules.

use std::time::Duration;

use async_trait::async_trait;
use graphweave::{ValidationEvent, ValidationIssue, Validator, ValidatorError};

pub const MISSING_LABEL: &str = "Entity has no label";
pub const DELETED_TARGET: &str = "Target entity is deleted";

/// Flags entities without a label and relations pointing at a deleted
/// entity. An optional latency simulates a remote validation service.
#[derive(Debug, Default)]
pub struct RuleValidator {
    latency: Duration,
}

impl RuleValidator {
    pub fn new(latency: Duration) -> Self {
        Self { latency }
    }
}

#[async_trait]
impl Validator for RuleValidator {
    async fn validate(&self, event: ValidationEvent) -> Result<Vec<ValidationIssue>, ValidatorError> {
        if !self.latency.is_zero() {
            tokio::select! {
                _ = tokio::time::sleep(self.latency) => {}
                _ = event.signal.aborted() => return Ok(Vec::new()),
            }
        }

        let mut issues = Vec::new();
        let target = &event.target;
        if !event.state.is_deleted_element(&target.id)
            && target.label.as_deref().map_or(true, |l| l.trim().is_empty())
        {
            issues.push(ValidationIssue::element(target.id.clone(), MISSING_LABEL));
        }
        for link in &event.outbound_links {
            if event.state.is_deleted_element(&link.target) {
                issues.push(ValidationIssue::link(link.key(), DELETED_TARGET));
            }
        }
        Ok(issues)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use graphweave::{AbortSignal, AuthoringState, DiagramModel, ElementData, LinkData};

    fn event(target: ElementData, links: Vec<LinkData>, state: AuthoringState) -> ValidationEvent {
        ValidationEvent {
            target,
            outbound_links: links,
            state,
            diagram: DiagramModel::new(),
            signal: AbortSignal::never(),
        }
    }

    #[tokio::test]
    async fn unlabeled_entity_is_flagged() {
        let issues = RuleValidator::default()
            .validate(event(ElementData::new("ex:a"), Vec::new(), AuthoringState::new()))
            .await
            .unwrap();
        assert_eq!(issues, vec![ValidationIssue::element("ex:a", MISSING_LABEL)]);
    }

    #[tokio::test]
    async fn relation_to_deleted_entity_is_flagged() {
        let link = LinkData::new("ex:p", "ex:a", "ex:b");
        let state = AuthoringState::new().delete_element(&ElementData::new("ex:b"));
        let issues = RuleValidator::default()
            .validate(event(ElementData::new("ex:a").with_label("A"), vec![link.clone()], state))
            .await
            .unwrap();
        assert_eq!(issues, vec![ValidationIssue::link(link.key(), DELETED_TARGET)]);
    }
}
