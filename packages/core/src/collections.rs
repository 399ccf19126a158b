//! Persistent keyed collections used by the authoring and validation states.
//!
//! Every state value in this crate is immutable: a transition clones the
//! collection (O(1), structural sharing via [`im`]) and edits the copy. The
//! aliases below fix the key types so relation lookups always go through the
//! structural [`LinkKey`] rather than any per-object identity.

use crate::types::{ElementIri, LinkKey};

/// Persistent map keyed by entity IRI.
pub type ElementMap<V> = im::HashMap<ElementIri, V>;

/// Persistent set of entity IRIs.
pub type ElementSet = im::HashSet<ElementIri>;

/// Persistent map keyed by composite relation key.
pub type LinkMap<V> = im::HashMap<LinkKey, V>;

/// Persistent set of composite relation keys.
pub type LinkSet = im::HashSet<LinkKey>;

/// Keep only the entries for which `keep` returns `true`.
///
/// Returns a clone sharing the original's root when nothing is removed, so
/// callers can detect a no-op with [`im::HashMap::ptr_eq`].
pub fn retain_links<V: Clone>(
    map: &LinkMap<V>,
    mut keep: impl FnMut(&LinkKey, &V) -> bool,
) -> LinkMap<V> {
    let doomed: Vec<LinkKey> = map
        .iter()
        .filter(|(key, value)| !keep(key, value))
        .map(|(key, _)| key.clone())
        .collect();
    let mut result = map.clone();
    for key in doomed {
        result.remove(&key);
    }
    result
}

/// Entries whose key has `iri` as source or target.
pub fn links_touching<'a, V>(
    map: &'a LinkMap<V>,
    iri: &'a ElementIri,
) -> impl Iterator<Item = (&'a LinkKey, &'a V)> + 'a
where
    V: Clone,
{
    map.iter().filter(move |(key, _)| key.touches(iri))
}
