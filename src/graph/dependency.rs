//! Dependency graph over column definitions.
//!
//! Columns are nodes indexed by their position in the table; an edge runs from
//! a column to each column its expression reads. The graph is validated as a
//! whole when built and is never installed half-built.

use std::collections::{BTreeSet, HashMap};

use crate::column::ColumnDefinition;
use crate::error::{ColcalcError, Result};

/// Acyclic dependency graph of a column set.
#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    nodes: Vec<String>,
    index: HashMap<String, usize>,
    /// Direct dependencies per node, in first-reference order.
    dependencies: Vec<Vec<usize>>,
    /// Direct dependents per node, in position order.
    dependents: Vec<Vec<usize>>,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Color {
    White,
    Gray,
    Black,
}

impl DependencyGraph {
    /// Creates an empty graph.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds the graph for `columns`.
    ///
    /// # Errors
    ///
    /// Returns `DuplicateColumn` for repeated names, `UnknownColumn` if a
    /// dependency names no column, or `CycleDetected` with the cycle's path.
    pub fn build(columns: &[ColumnDefinition]) -> Result<Self> {
        let mut index = HashMap::with_capacity(columns.len());
        for (pos, column) in columns.iter().enumerate() {
            if index.insert(column.name().to_string(), pos).is_some() {
                return Err(ColcalcError::DuplicateColumn(column.name().to_string()));
            }
        }

        let mut dependencies = Vec::with_capacity(columns.len());
        let mut dependents = vec![Vec::new(); columns.len()];
        for (pos, column) in columns.iter().enumerate() {
            let mut direct: Vec<usize> = Vec::new();
            for name in column.dependencies() {
                let dep = *index
                    .get(name)
                    .ok_or_else(|| ColcalcError::UnknownColumn(name.to_string()))?;
                if !direct.contains(&dep) {
                    direct.push(dep);
                    dependents[dep].push(pos);
                }
            }
            dependencies.push(direct);
        }

        let graph = DependencyGraph {
            nodes: columns.iter().map(|c| c.name().to_string()).collect(),
            index,
            dependencies,
            dependents,
        };
        if let Some(path) = graph.find_cycle() {
            log::debug!("rejecting column set: cycle {}", path.join(" -> "));
            return Err(ColcalcError::CycleDetected { path });
        }
        log::trace!("built dependency graph over {} columns", graph.nodes.len());
        Ok(graph)
    }

    /// Depth-first search with explicit frames. Returns the first cycle found
    /// as a closed path, e.g. `[A, B, A]`.
    fn find_cycle(&self) -> Option<Vec<String>> {
        struct Frame {
            node: usize,
            next: usize,
        }

        let mut color = vec![Color::White; self.nodes.len()];
        let mut stack: Vec<usize> = Vec::new();

        for start in 0..self.nodes.len() {
            if color[start] != Color::White {
                continue;
            }
            let mut frames = vec![Frame { node: start, next: 0 }];
            stack.push(start);
            color[start] = Color::Gray;

            while let Some(frame) = frames.last_mut() {
                let neighbors = &self.dependencies[frame.node];
                if frame.next >= neighbors.len() {
                    color[frame.node] = Color::Black;
                    stack.pop();
                    frames.pop();
                    continue;
                }
                let next = neighbors[frame.next];
                frame.next += 1;

                match color[next] {
                    Color::White => {
                        color[next] = Color::Gray;
                        stack.push(next);
                        frames.push(Frame { node: next, next: 0 });
                    }
                    Color::Gray => {
                        let from = stack.iter().position(|&n| n == next).unwrap_or(0);
                        let mut path: Vec<String> =
                            stack[from..].iter().map(|&n| self.nodes[n].clone()).collect();
                        path.push(self.nodes[next].clone());
                        return Some(path);
                    }
                    Color::Black => {}
                }
            }
        }
        None
    }

    fn position(&self, name: &str) -> Result<usize> {
        self.index
            .get(name)
            .copied()
            .ok_or_else(|| ColcalcError::UnknownColumn(name.to_string()))
    }

    fn names(&self, positions: impl IntoIterator<Item = usize>) -> Vec<&str> {
        positions
            .into_iter()
            .map(|p| self.nodes[p].as_str())
            .collect()
    }

    /// Returns the number of columns.
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Returns true if the graph has no columns.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Returns true if `name` is a node.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// Returns the position of `name`, which is also its column index.
    #[must_use]
    pub fn position_of(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }

    /// Returns the columns `name` reads directly.
    ///
    /// # Errors
    ///
    /// Returns `UnknownColumn` if `name` is not in the graph.
    pub fn dependencies_of(&self, name: &str) -> Result<Vec<&str>> {
        let pos = self.position(name)?;
        Ok(self.names(self.dependencies[pos].iter().copied()))
    }

    /// Returns the columns that read `name` directly, in position order.
    ///
    /// # Errors
    ///
    /// Returns `UnknownColumn` if `name` is not in the graph.
    pub fn dependents_of(&self, name: &str) -> Result<Vec<&str>> {
        let pos = self.position(name)?;
        Ok(self.names(self.dependents[pos].iter().copied()))
    }

    /// Returns every column that reads `name` directly or indirectly, in
    /// position order.
    ///
    /// # Errors
    ///
    /// Returns `UnknownColumn` if `name` is not in the graph.
    pub fn transitive_dependents(&self, name: &str) -> Result<Vec<&str>> {
        let pos = self.position(name)?;
        let mut seen = BTreeSet::new();
        let mut pending = vec![pos];
        while let Some(node) = pending.pop() {
            for &dependent in &self.dependents[node] {
                if seen.insert(dependent) {
                    pending.push(dependent);
                }
            }
        }
        Ok(self.names(seen))
    }

    /// Returns true if `column` reads `other` directly or indirectly. Unknown
    /// names are never dependent.
    #[must_use]
    pub fn is_dependent_on(&self, column: &str, other: &str) -> bool {
        let (Ok(start), Ok(target)) = (self.position(column), self.position(other)) else {
            return false;
        };
        let mut visited = vec![false; self.nodes.len()];
        let mut pending = self.dependencies[start].clone();
        while let Some(node) = pending.pop() {
            if node == target {
                return true;
            }
            if !visited[node] {
                visited[node] = true;
                pending.extend(self.dependencies[node].iter().copied());
            }
        }
        false
    }

    /// Returns every column with each one after all of its dependencies.
    /// Among columns that are ready together, lower positions come first.
    #[must_use]
    pub fn evaluation_order(&self) -> Vec<&str> {
        self.kahn(&vec![true; self.nodes.len()])
    }

    /// Returns `name` and everything it transitively reads, in evaluation
    /// order.
    ///
    /// # Errors
    ///
    /// Returns `UnknownColumn` if `name` is not in the graph.
    pub fn evaluation_order_for(&self, name: &str) -> Result<Vec<&str>> {
        let pos = self.position(name)?;
        let mut included = vec![false; self.nodes.len()];
        let mut pending = vec![pos];
        while let Some(node) = pending.pop() {
            if !included[node] {
                included[node] = true;
                pending.extend(self.dependencies[node].iter().copied());
            }
        }
        Ok(self.kahn(&included))
    }

    /// Kahn's algorithm restricted to `included` nodes. The subset must be
    /// closed under dependencies.
    fn kahn(&self, included: &[bool]) -> Vec<&str> {
        let mut in_degree: Vec<usize> = self
            .dependencies
            .iter()
            .map(|deps| deps.iter().filter(|&&d| included[d]).count())
            .collect();
        let mut ready: BTreeSet<usize> = (0..self.nodes.len())
            .filter(|&n| included[n] && in_degree[n] == 0)
            .collect();

        let mut order = Vec::with_capacity(self.nodes.len());
        while let Some(node) = ready.pop_first() {
            order.push(node);
            for &dependent in &self.dependents[node] {
                if !included[dependent] {
                    continue;
                }
                in_degree[dependent] = in_degree[dependent].saturating_sub(1);
                if in_degree[dependent] == 0 {
                    ready.insert(dependent);
                }
            }
        }
        self.names(order)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expression::Expression;
    use crate::types::DataType;

    fn pass(name: &str, index: usize) -> ColumnDefinition {
        ColumnDefinition::pass_through(name, DataType::Int64, index)
    }

    fn computed(name: &str, text: &str) -> ColumnDefinition {
        ColumnDefinition::computed(name, Expression::infer(text, DataType::Int64).unwrap())
    }

    fn chain() -> Vec<ColumnDefinition> {
        vec![
            pass("base", 0),
            computed("total", "sub + 1"),
            computed("sub", "base * 2"),
            computed("other", "base + total"),
        ]
    }

    #[test]
    fn test_evaluation_order_respects_dependencies() {
        let graph = DependencyGraph::build(&chain()).unwrap();
        assert_eq!(graph.evaluation_order(), vec!["base", "sub", "total", "other"]);
        assert_eq!(graph.len(), 4);
    }

    #[test]
    fn test_direct_queries() {
        let graph = DependencyGraph::build(&chain()).unwrap();
        assert_eq!(graph.dependencies_of("other").unwrap(), vec!["base", "total"]);
        assert_eq!(graph.dependents_of("base").unwrap(), vec!["sub", "other"]);
        assert!(graph.dependencies_of("base").unwrap().is_empty());
        assert!(matches!(
            graph.dependents_of("nope"),
            Err(ColcalcError::UnknownColumn(_))
        ));
    }

    #[test]
    fn test_transitive_queries() {
        let graph = DependencyGraph::build(&chain()).unwrap();
        assert!(graph.is_dependent_on("other", "sub"));
        assert!(graph.is_dependent_on("total", "base"));
        assert!(!graph.is_dependent_on("base", "total"));
        assert!(!graph.is_dependent_on("sub", "sub"));
        assert!(!graph.is_dependent_on("ghost", "base"));
        assert_eq!(
            graph.transitive_dependents("sub").unwrap(),
            vec!["total", "other"]
        );
    }

    #[test]
    fn test_evaluation_order_for_subset() {
        let graph = DependencyGraph::build(&chain()).unwrap();
        assert_eq!(
            graph.evaluation_order_for("total").unwrap(),
            vec!["base", "sub", "total"]
        );
        assert_eq!(graph.evaluation_order_for("base").unwrap(), vec!["base"]);
    }

    #[test]
    fn test_cycle_names_path() {
        let columns = vec![computed("A", "B + 1"), computed("B", "A + 1")];
        let err = DependencyGraph::build(&columns).unwrap_err();
        match err {
            ColcalcError::CycleDetected { path } => assert_eq!(path, vec!["A", "B", "A"]),
            other => panic!("expected cycle, got {other:?}"),
        }
    }

    #[test]
    fn test_self_reference_is_cycle() {
        let columns = vec![computed("x", "x + 1")];
        assert!(matches!(
            DependencyGraph::build(&columns),
            Err(ColcalcError::CycleDetected { path }) if path == vec!["x", "x"]
        ));
    }

    #[test]
    fn test_transformed_self_reference_allowed() {
        let columns = vec![ColumnDefinition::transformed(
            "x",
            0,
            Expression::infer("x + 1", DataType::Int64).unwrap(),
        )];
        let graph = DependencyGraph::build(&columns).unwrap();
        assert!(graph.dependencies_of("x").unwrap().is_empty());
    }

    #[test]
    fn test_unknown_dependency() {
        let columns = vec![pass("a", 0), computed("b", "a + missing")];
        assert!(matches!(
            DependencyGraph::build(&columns),
            Err(ColcalcError::UnknownColumn(name)) if name == "missing"
        ));
    }

    #[test]
    fn test_duplicate_name() {
        let columns = vec![pass("a", 0), pass("a", 1)];
        assert!(matches!(
            DependencyGraph::build(&columns),
            Err(ColcalcError::DuplicateColumn(_))
        ));
    }

    #[test]
    fn test_empty_graph() {
        let graph = DependencyGraph::build(&[]).unwrap();
        assert!(graph.is_empty());
        assert!(graph.evaluation_order().is_empty());
    }
}
