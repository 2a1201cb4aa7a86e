//! Dependency ordering of tables by declared foreign keys.

use std::collections::HashMap;

use tracing::warn;

use crate::source::TableDescriptor;

/// Result of ordering tables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableOrder {
    /// Indices into the input slice. Tables in one layer have no dependency
    /// on each other; every parent is in an earlier layer.
    pub layers: Vec<Vec<usize>>,

    /// Tables caught in a foreign key cycle, if any.
    pub cyclic: Vec<String>,
}

impl TableOrder {
    /// Flattened order, parents first.
    pub fn sequence(&self) -> Vec<usize> {
        self.layers.iter().flatten().copied().collect()
    }
}

/// Group tables into dependency layers (Kahn's algorithm).
///
/// Self references and references to tables outside `tables` are ignored.
/// Tables left over by a cycle run one per layer in declaration order.
pub fn dependency_layers(tables: &[&TableDescriptor]) -> TableOrder {
    let index: HashMap<&str, usize> = tables
        .iter()
        .enumerate()
        .map(|(i, t)| (t.name.as_str(), i))
        .collect();

    let mut parents: Vec<Vec<usize>> = vec![Vec::new(); tables.len()];
    let mut children: Vec<Vec<usize>> = vec![Vec::new(); tables.len()];
    for (i, table) in tables.iter().enumerate() {
        for referenced in table.referenced_tables() {
            if let Some(&p) = index.get(referenced) {
                parents[i].push(p);
                children[p].push(i);
            }
        }
    }

    let mut remaining: Vec<usize> = parents.iter().map(|p| p.len()).collect();
    let mut placed = vec![false; tables.len()];
    let mut layers = Vec::new();

    loop {
        let layer: Vec<usize> = (0..tables.len())
            .filter(|&i| !placed[i] && remaining[i] == 0)
            .collect();
        if layer.is_empty() {
            break;
        }
        for &i in &layer {
            placed[i] = true;
            for &c in &children[i] {
                remaining[c] -= 1;
            }
        }
        layers.push(layer);
    }

    let leftover: Vec<usize> = (0..tables.len()).filter(|&i| !placed[i]).collect();
    let cyclic: Vec<String> = leftover.iter().map(|&i| tables[i].name.clone()).collect();
    if !cyclic.is_empty() {
        warn!(
            "Foreign key cycle between tables {:?}; using declaration order",
            cyclic
        );
        layers.extend(leftover.into_iter().map(|i| vec![i]));
    }

    TableOrder { layers, cyclic }
}
