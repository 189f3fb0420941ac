//! Column dependency graph.

mod dependency;

pub use dependency::DependencyGraph;
