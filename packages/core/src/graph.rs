use std::collections::HashSet;

use im::OrdMap;
use serde::{Deserialize, Serialize};

use crate::types::{ElementData, ElementIri, LinkData, LinkKey, LinkTypeIri, Vector};

/// Identifier of one diagram cell (an element box or a link edge).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CellId(pub u64);

impl std::fmt::Display for CellId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A diagram element showing one entity. Several cells may show the same
/// entity.
#[derive(Debug, Clone, PartialEq)]
pub struct ElementCell {
    pub id: CellId,
    pub data: ElementData,
    pub position: Vector,
}

/// A diagram edge showing one relation between two element cells.
#[derive(Debug, Clone, PartialEq)]
pub struct LinkCell {
    pub id: CellId,
    pub data: LinkData,
    pub source: CellId,
    pub target: CellId,
    /// User-positioned routing points.
    pub vertices: Vec<Vector>,
}

/// The live diagram: element and link cells connected by cell ids.
///
/// The model is persistent, so cloning it for a validator is O(1). Queries
/// that enumerate cells return them in cell-id order.
///
/// Cells for a relation only exist between cells of its endpoint entities;
/// [`create_links`](DiagramModel::create_links) fans a relation out into one
/// link cell per pair of endpoint cells.
#[derive(Debug, Clone, Default)]
pub struct DiagramModel {
    elements: OrdMap<CellId, ElementCell>,
    links: OrdMap<CellId, LinkCell>,
    next_cell: u64,
}

impl DiagramModel {
    /// Create an empty diagram.
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve a fresh cell id.
    pub fn next_cell_id(&mut self) -> CellId {
        self.next_cell += 1;
        CellId(self.next_cell)
    }

    pub fn element_count(&self) -> usize {
        self.elements.len()
    }

    pub fn link_count(&self) -> usize {
        self.links.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty() && self.links.is_empty()
    }

    pub fn element(&self, id: CellId) -> Option<&ElementCell> {
        self.elements.get(&id)
    }

    pub fn link(&self, id: CellId) -> Option<&LinkCell> {
        self.links.get(&id)
    }

    pub fn elements(&self) -> impl Iterator<Item = &ElementCell> {
        self.elements.values()
    }

    pub fn links(&self) -> impl Iterator<Item = &LinkCell> {
        self.links.values()
    }

    /// All cells showing the entity `iri`.
    pub fn elements_by_iri(&self, iri: &ElementIri) -> Vec<&ElementCell> {
        self.elements.values().filter(|c| &c.data.id == iri).collect()
    }

    /// All cells showing the relation `key`.
    pub fn links_by_key(&self, key: &LinkKey) -> Vec<&LinkCell> {
        self.links
            .values()
            .filter(|l| {
                l.data.link_type == key.link_type
                    && l.data.source == key.source
                    && l.data.target == key.target
            })
            .collect()
    }

    /// Link cells attached to element cell `id` on either end.
    pub fn element_links(&self, id: CellId) -> Vec<&LinkCell> {
        self.links
            .values()
            .filter(|l| l.source == id || l.target == id)
            .collect()
    }

    /// The link cell of type `link_type` from cell `source` to cell `target`.
    pub fn find_link(
        &self,
        link_type: &LinkTypeIri,
        source: CellId,
        target: CellId,
    ) -> Option<&LinkCell> {
        self.links
            .values()
            .find(|l| &l.data.link_type == link_type && l.source == source && l.target == target)
    }

    /// Each entity shown on the diagram, once, in order of its first cell.
    pub fn unique_element_iris(&self) -> Vec<&ElementIri> {
        let mut seen: HashSet<&ElementIri> = HashSet::new();
        self.elements
            .values()
            .map(|c| &c.data.id)
            .filter(|iri| seen.insert(*iri))
            .collect()
    }

    /// Relations whose source is `iri` (outgoing edges), one per key.
    pub fn outbound_links(&self, iri: &ElementIri) -> Vec<LinkData> {
        let mut seen: HashSet<LinkKey> = HashSet::new();
        self.outgoing(iri)
            .into_iter()
            .filter(|l| seen.insert(l.data.key()))
            .map(|l| l.data.clone())
            .collect()
    }

    /// Link cells whose relation starts at `iri`.
    pub fn outgoing(&self, iri: &ElementIri) -> Vec<&LinkCell> {
        self.links.values().filter(|l| &l.data.source == iri).collect()
    }

    /// Link cells whose relation ends at `iri`.
    pub fn incoming(&self, iri: &ElementIri) -> Vec<&LinkCell> {
        self.links.values().filter(|l| &l.data.target == iri).collect()
    }

    // --- mutation ------------------------------------------------------------

    /// Add a cell for `data` at `position` and return its id.
    pub fn add_element(&mut self, data: ElementData, position: Vector) -> CellId {
        let id = self.next_cell_id();
        self.insert_element(ElementCell { id, data, position });
        id
    }

    /// Insert a cell with a pre-assigned id, replacing any cell with that id.
    pub fn insert_element(&mut self, cell: ElementCell) {
        self.bump_past(cell.id);
        self.elements.insert(cell.id, cell);
    }

    /// Remove an element cell together with every link cell attached to it.
    pub fn remove_element(&mut self, id: CellId) -> Option<(ElementCell, Vec<LinkCell>)> {
        let cell = self.elements.remove(&id)?;
        let attached: Vec<CellId> = self.element_links(id).iter().map(|l| l.id).collect();
        let links = attached
            .into_iter()
            .filter_map(|link| self.links.remove(&link))
            .collect();
        Some((cell, links))
    }

    /// Add a link cell between two element cells. Returns `None` if either
    /// endpoint cell does not exist.
    pub fn add_link(&mut self, data: LinkData, source: CellId, target: CellId) -> Option<CellId> {
        if !self.elements.contains_key(&source) || !self.elements.contains_key(&target) {
            return None;
        }
        let id = self.next_cell_id();
        self.insert_link(LinkCell {
            id,
            data,
            source,
            target,
            vertices: Vec::new(),
        });
        Some(id)
    }

    /// Insert a link cell with a pre-assigned id, replacing any with that id.
    pub fn insert_link(&mut self, cell: LinkCell) {
        self.bump_past(cell.id);
        self.links.insert(cell.id, cell);
    }

    pub fn remove_link(&mut self, id: CellId) -> Option<LinkCell> {
        self.links.remove(&id)
    }

    /// Pairs of endpoint cells that would show `data` but have no cell yet.
    pub fn missing_link_cells(&self, data: &LinkData) -> Vec<(CellId, CellId)> {
        let sources = self.elements_by_iri(&data.source);
        let targets = self.elements_by_iri(&data.target);
        let mut pairs = Vec::new();
        for s in &sources {
            for t in &targets {
                if self.find_link(&data.link_type, s.id, t.id).is_none() {
                    pairs.push((s.id, t.id));
                }
            }
        }
        pairs
    }

    /// Show `data` between every pair of its endpoint cells that is not yet
    /// linked. Returns the ids of the created cells.
    pub fn create_links(&mut self, data: &LinkData) -> Vec<CellId> {
        self.missing_link_cells(data)
            .into_iter()
            .filter_map(|(s, t)| self.add_link(data.clone(), s, t))
            .collect()
    }

    /// Replace the data of every cell showing `iri`. Returns the previous
    /// data of the first such cell, or `None` if the entity is not shown.
    ///
    /// When the IRI changes, link cells attached to those cells have their
    /// endpoint IRIs rewritten to match.
    pub fn set_element_data(&mut self, iri: &ElementIri, data: ElementData) -> Option<ElementData> {
        let cells: Vec<CellId> = self.elements_by_iri(iri).iter().map(|c| c.id).collect();
        let mut previous = None;
        for id in &cells {
            if let Some(cell) = self.elements.get_mut(id) {
                let old = std::mem::replace(&mut cell.data, data.clone());
                previous.get_or_insert(old);
            }
        }
        if &data.id != iri {
            let attached: Vec<CellId> = self
                .links
                .values()
                .filter(|l| cells.contains(&l.source) || cells.contains(&l.target))
                .map(|l| l.id)
                .collect();
            for id in attached {
                if let Some(link) = self.links.get_mut(&id) {
                    link.data = link.data.with_renamed_endpoint(iri, &data.id);
                }
            }
        }
        previous
    }

    /// Replace the data of every cell showing relation `key`. Returns the
    /// previous data of the first such cell.
    pub fn set_link_data(&mut self, key: &LinkKey, data: LinkData) -> Option<LinkData> {
        let cells: Vec<CellId> = self.links_by_key(key).iter().map(|l| l.id).collect();
        let mut previous = None;
        for id in cells {
            if let Some(link) = self.links.get_mut(&id) {
                let old = std::mem::replace(&mut link.data, data.clone());
                previous.get_or_insert(old);
            }
        }
        previous
    }

    /// Replace the routing points of a link cell, returning the old ones.
    pub fn set_link_vertices(&mut self, id: CellId, vertices: Vec<Vector>) -> Option<Vec<Vector>> {
        let link = self.links.get_mut(&id)?;
        Some(std::mem::replace(&mut link.vertices, vertices))
    }

    fn bump_past(&mut self, id: CellId) {
        if id.0 > self.next_cell {
            self.next_cell = id.0;
        }
    }
}

// --- tests -------------------------------------------------------------------
