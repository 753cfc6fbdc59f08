//! The routing table: a directed graph over module ids.
//!
//! The table parameterizes the broker's barrier: one round of the emulation
//! delivers exactly one message per edge. Edges have multiplicity one, and
//! iteration order over [`RoutingTable::coords`] is stable (insertion
//! order) while the table is unchanged, so a round's receive set can be
//! taken as a plain copy of the coordinate list.

use std::collections::HashSet;

use neuromux_communication::ModuleId;

/// Directed edge set over module ids.
#[derive(Clone, Debug, Default)]
pub struct RoutingTable {
    edges: Vec<(ModuleId, ModuleId)>,
    index: HashSet<(ModuleId, ModuleId)>,
}

impl RoutingTable {
    /// Creates an empty table.
    pub fn new() -> RoutingTable {
        RoutingTable::default()
    }

    /// Adds or removes the edge `(src, dst)`.
    ///
    /// Adding an existing edge is a no-op (membership, not count); removing
    /// a missing edge likewise. New module ids are discovered on first
    /// insertion; the table has no fixed shape.
    pub fn set(&mut self, src: &ModuleId, dst: &ModuleId, present: bool) {
        let edge = (src.clone(), dst.clone());
        if present {
            if self.index.insert(edge.clone()) {
                self.edges.push(edge);
            }
        } else if self.index.remove(&edge) {
            self.edges.retain(|e| e != &edge);
        }
    }

    /// Whether the edge `(src, dst)` is present.
    pub fn has(&self, src: &ModuleId, dst: &ModuleId) -> bool {
        self.index.contains(&(src.clone(), dst.clone()))
    }

    /// The current edge set, in stable insertion order.
    pub fn coords(&self) -> &[(ModuleId, ModuleId)] {
        &self.edges
    }

    /// Ids of modules with an edge into `id` (sources feeding `id`).
    pub fn row_ids(&self, id: &ModuleId) -> Vec<ModuleId> {
        self.edges
            .iter()
            .filter(|(_, dst)| dst == id)
            .map(|(src, _)| src.clone())
            .collect()
    }

    /// Ids of modules `id` has an edge into (destinations `id` feeds).
    pub fn col_ids(&self, id: &ModuleId) -> Vec<ModuleId> {
        self.edges
            .iter()
            .filter(|(src, _)| src == id)
            .map(|(_, dst)| dst.clone())
            .collect()
    }

    /// Number of edges.
    pub fn len(&self) -> usize {
        self.edges.len()
    }

    /// Whether the table has no edges.
    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(s: &str) -> ModuleId {
        ModuleId::new(s)
    }

    #[test]
    fn membership_not_count() {
        let mut table = RoutingTable::new();
        table.set(&id("a"), &id("b"), true);
        table.set(&id("a"), &id("b"), true);
        assert_eq!(table.len(), 1);
        table.set(&id("a"), &id("b"), false);
        assert!(table.is_empty());
        table.set(&id("a"), &id("b"), false);
        assert!(table.is_empty());
    }

    #[test]
    fn coords_order_is_stable() {
        let mut table = RoutingTable::new();
        table.set(&id("c"), &id("a"), true);
        table.set(&id("a"), &id("b"), true);
        table.set(&id("b"), &id("a"), true);
        let first: Vec<_> = table.coords().to_vec();
        let second: Vec<_> = table.coords().to_vec();
        assert_eq!(first, second);
        assert_eq!(
            first,
            vec![
                (id("c"), id("a")),
                (id("a"), id("b")),
                (id("b"), id("a")),
            ]
        );
    }

    #[test]
    fn row_and_col_views() {
        let mut table = RoutingTable::new();
        table.set(&id("a"), &id("b"), true);
        table.set(&id("c"), &id("b"), true);
        table.set(&id("b"), &id("a"), true);
        assert_eq!(table.row_ids(&id("b")), vec![id("a"), id("c")]);
        assert_eq!(table.col_ids(&id("b")), vec![id("a")]);
        assert_eq!(table.row_ids(&id("c")), Vec::<ModuleId>::new());
        assert_eq!(table.col_ids(&id("c")), vec![id("b")]);
    }

    #[test]
    fn self_loops_only_when_set() {
        let mut table = RoutingTable::new();
        table.set(&id("a"), &id("b"), true);
        assert!(!table.has(&id("a"), &id("a")));
        table.set(&id("a"), &id("a"), true);
        assert!(table.has(&id("a"), &id("a")));
    }
}
