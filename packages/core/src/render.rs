//! Human-readable text rendering of [`AuthoringState`] and
//! [`ValidationState`].
//!
//! The output is stable plain text suitable for terminals and logs. Entries
//! are sorted by IRI, then by relation key, so two renderings of equal states
//! are identical. It is not a canonical format.

use crate::authoring::{AuthoringState, ElementChange, LinkChange};
use crate::validation::ValidationState;

/// Render pending changes grouped by kind.
///
/// ```text
/// Pending changes  3
/// ─────────────────
///
/// NEW ENTITIES (1)
///   ex:alice  "Alice"
///
/// CHANGED ENTITIES (1)
///   ex:bob  "Robert"  (renamed to ex:robert)
///
/// DELETED RELATIONS (1)
///   ex:knows (ex:alice -> ex:carol)
/// ```
pub fn render_authoring_state(state: &AuthoringState) -> String {
    let total = state.len();
    let header = format!("Pending changes  {}", total);
    let rule = "─".repeat(header.chars().count());
    let mut out = format!("{}\n{}\n", header, rule);

    let mut elements: Vec<&ElementChange> = state.elements().values().map(|c| c.as_ref()).collect();
    elements.sort_by(|a, b| a.iri().cmp(b.iri()));
    let mut links: Vec<&LinkChange> = state.links().values().map(|c| c.as_ref()).collect();
    links.sort_by_key(|c| c.key());

    let element_groups: [(&str, fn(&ElementChange) -> bool); 3] = [
        ("NEW ENTITIES", |c| c.is_new()),
        ("CHANGED ENTITIES", |c| !c.is_new() && !c.deleted),
        ("DELETED ENTITIES", |c| c.deleted),
    ];
    for (label, belongs) in element_groups {
        let group: Vec<&&ElementChange> = elements.iter().filter(|c| belongs(c)).collect();
        if group.is_empty() {
            continue;
        }
        out.push('\n');
        out.push_str(&format!("{} ({})\n", label, group.len()));
        for change in group {
            out.push_str(&format!("  {}", change.iri()));
            if let Some(label) = &change.after.label {
                out.push_str(&format!("  \"{}\"", truncate(label, 60)));
            }
            if let Some(new_iri) = &change.new_iri {
                out.push_str(&format!("  (renamed to {})", new_iri));
            }
            out.push('\n');
        }
    }

    let link_groups: [(&str, fn(&LinkChange) -> bool); 3] = [
        ("NEW RELATIONS", |c| c.is_new()),
        ("CHANGED RELATIONS", |c| !c.is_new() && !c.deleted),
        ("DELETED RELATIONS", |c| c.deleted),
    ];
    for (label, belongs) in link_groups {
        let group: Vec<&&LinkChange> = links.iter().filter(|c| belongs(c)).collect();
        if group.is_empty() {
            continue;
        }
        out.push('\n');
        out.push_str(&format!("{} ({})\n", label, group.len()));
        for change in group {
            out.push_str(&format!("  {}\n", change.key()));
        }
    }

    out
}

/// Render validation results. Entries still loading are marked `…`.
///
/// ```text
/// Validation  2 errors
/// ────────────────────
///   ex:alice
///     - Entity has no label
///   ex:knows (ex:alice -> ex:carol)
///     - Target entity is deleted
/// ```
pub fn render_validation_state(state: &ValidationState) -> String {
    let errors = state.error_count();
    let header = format!(
        "Validation  {} error{}",
        errors,
        if errors == 1 { "" } else { "s" }
    );
    let rule = "─".repeat(header.chars().count());
    let mut out = format!("{}\n{}\n", header, rule);

    let mut elements: Vec<_> = state.elements().iter().collect();
    elements.sort_by(|a, b| a.0.cmp(b.0));
    for (iri, entry) in elements {
        out.push_str(&format!("  {}{}\n", iri, if entry.loading { "  …" } else { "" }));
        for error in &entry.errors {
            match &error.property {
                Some(property) => out.push_str(&format!("    - {} [{}]\n", error.message, property)),
                None => out.push_str(&format!("    - {}\n", error.message)),
            }
        }
    }

    let mut links: Vec<_> = state.links().iter().collect();
    links.sort_by(|a, b| a.0.cmp(b.0));
    for (key, entry) in links {
        out.push_str(&format!("  {}{}\n", key, if entry.loading { "  …" } else { "" }));
        for error in &entry.errors {
            out.push_str(&format!("    - {}\n", error.message));
        }
    }

    out
}

// --- helpers -----------------------------------------------------------------

fn truncate(s: &str, max: usize) -> String {
    let s = s.trim();
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let cut: String = s.chars().take(max - 1).collect();
        format!("{}…", cut)
    }
}

// --- tests -------------------------------------------------------------------
