//! Computed table: column definitions, dependency graph and result cache over
//! a read-only source table.
//!
//! # Locking
//!
//! All mutable state sits behind one [`RwLock`]. Reads of cached or
//! pass-through cells share the read lock. A read that finds a computed column
//! uncached takes the write lock, checks the cache again, and only then
//! evaluates, so concurrent readers never evaluate the same column twice.
//! Cached columns are handed out as `Arc`s and read after the lock is gone.

mod stats;

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use arrow::array::ArrayRef;
use parking_lot::RwLock;

use crate::column::{ColumnDefinition, ColumnKind};
use crate::config::EngineConfig;
use crate::error::{ColcalcError, Result};
use crate::expression::{EvaluatedColumn, Expression, ExpressionBuilder};
use crate::functions::FunctionRegistry;
use crate::graph::DependencyGraph;
use crate::table::{check_column, check_row, TabularData};
use crate::types::{value_at, Cell, DataType, Value};

pub use stats::TableStats;

/// Mutable state guarded by the table lock.
struct State {
    columns: Vec<ColumnDefinition>,
    graph: DependencyGraph,
    /// Cached results keyed by column position; always `None` for
    /// pass-through columns.
    cache: Vec<Option<Arc<EvaluatedColumn>>>,
}

impl State {
    fn position(&self, name: &str) -> Result<usize> {
        self.graph
            .position_of(name)
            .ok_or_else(|| ColcalcError::UnknownColumn(name.to_string()))
    }

    /// Validates `columns` and installs them with a fresh graph. On error the
    /// current state is untouched.
    fn install(&mut self, columns: Vec<ColumnDefinition>) -> Result<()> {
        let graph = DependencyGraph::build(&columns)?;
        self.columns = columns;
        self.graph = graph;
        self.cache.resize(self.columns.len(), None);
        Ok(())
    }

    /// Drops cached results of `name` and everything that reads it.
    fn invalidate(&mut self, name: &str) -> Result<()> {
        let mut positions = vec![self.position(name)?];
        for dependent in self.graph.transitive_dependents(name)? {
            positions.push(self.position(dependent)?);
        }
        let mut dropped = 0usize;
        for pos in positions {
            if self.cache[pos].take().is_some() {
                dropped += 1;
            }
        }
        if dropped > 0 {
            log::debug!("invalidated {dropped} cached column(s) after change to '{name}'");
        }
        Ok(())
    }

    fn materialized_count(&self) -> usize {
        self.cache.iter().filter(|c| c.is_some()).count()
    }

    fn computed_count(&self) -> usize {
        self.columns.iter().filter(|c| c.is_computed()).count()
    }
}

/// A source table augmented with computed columns.
///
/// Implements [`TabularData`] itself, so it can stand in for its source.
pub struct ComputedTable {
    source: Arc<dyn TabularData>,
    registry: Arc<FunctionRegistry>,
    config: EngineConfig,
    state: RwLock<State>,
    /// Number of column evaluations.
    evaluations: AtomicU64,
    /// Number of computed-cell reads served from the cache.
    cache_hits: AtomicU64,
}

impl std::fmt::Debug for ComputedTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.read();
        f.debug_struct("ComputedTable")
            .field("rows", &self.source.row_count())
            .field("columns", &state.columns.len())
            .field("materialized", &state.materialized_count())
            .finish_non_exhaustive()
    }
}

impl ComputedTable {
    /// Wraps `source` with the default registry and configuration. Every
    /// source column becomes a pass-through column.
    ///
    /// # Errors
    ///
    /// Returns `DuplicateColumn` if the source repeats a column name.
    pub fn new(source: Arc<dyn TabularData>) -> Result<Self> {
        Self::with_options(source, FunctionRegistry::shared_default(), EngineConfig::default())
    }

    /// Wraps `source` with an explicit registry and configuration.
    ///
    /// # Errors
    ///
    /// Returns `Config` for an invalid configuration, or `DuplicateColumn` if
    /// the source repeats a column name.
    pub fn with_options(
        source: Arc<dyn TabularData>,
        registry: Arc<FunctionRegistry>,
        config: EngineConfig,
    ) -> Result<Self> {
        config.validate()?;
        let mut columns = Vec::with_capacity(source.column_count());
        for col in 0..source.column_count() {
            columns.push(ColumnDefinition::pass_through(
                source.column_name(col)?,
                source.column_type(col)?,
                col,
            ));
        }
        let mut state = State {
            columns: Vec::new(),
            graph: DependencyGraph::new(),
            cache: Vec::new(),
        };
        state.install(columns)?;
        log::debug!(
            "computed table over {} rows x {} columns",
            source.row_count(),
            state.columns.len()
        );

        Ok(Self {
            source,
            registry,
            config,
            state: RwLock::new(state),
            evaluations: AtomicU64::new(0),
            cache_hits: AtomicU64::new(0),
        })
    }

    /// Returns the source table.
    #[must_use]
    pub fn source(&self) -> &Arc<dyn TabularData> {
        &self.source
    }

    /// Returns the engine configuration.
    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Compiles `text` with this table's registry and configuration, inferring
    /// inputs from the identifiers it references.
    ///
    /// # Errors
    ///
    /// Returns a compile error; see [`ExpressionBuilder::build`].
    pub fn compile(&self, text: &str, output_type: DataType) -> Result<Expression> {
        ExpressionBuilder::new(text)
            .output_type(output_type)
            .registry(Arc::clone(&self.registry))
            .config(self.config.clone())
            .build()
    }

    // ========================================================================
    // Definition edits
    // ========================================================================

    /// Appends a computed column typed by the expression's output.
    ///
    /// # Errors
    ///
    /// Returns `DuplicateColumn`, `UnknownColumn` if the expression reads a
    /// column the table lacks, `CycleDetected`, or `InvalidDefinition` for an
    /// empty name. The table is unchanged on error.
    pub fn add_computed_column(&self, name: &str, expression: Expression) -> Result<usize> {
        let definition =
            ColumnDefinition::new(name, expression.output_type(), None, Some(expression))?;
        let mut state = self.state.write();
        let mut columns = state.columns.clone();
        columns.push(definition);
        state.install(columns)?;
        let index = state.columns.len() - 1;
        log::debug!("added computed column '{name}' at index {index}");
        Ok(index)
    }

    /// Replaces the expression of `name`. A pass-through column becomes a
    /// transformed column whose own name reads the raw storage values.
    ///
    /// The column's cached result and those of its transitive dependents are
    /// dropped.
    ///
    /// # Errors
    ///
    /// Returns `UnknownColumn` or `CycleDetected`; the prior expression stays
    /// in force on error.
    pub fn set_expression(&self, name: &str, expression: Expression) -> Result<()> {
        let mut state = self.state.write();
        let pos = state.position(name)?;
        let mut columns = state.columns.clone();
        columns[pos] = columns[pos].with_expression(expression);
        state.install(columns)?;
        state.invalidate(name)?;
        log::debug!(
            "set expression of '{name}' ({}): {}",
            state.columns[pos].kind(),
            state.columns[pos].expression().map_or("", Expression::source)
        );
        Ok(())
    }

    /// Removes the expression of a transformed column, restoring it to a
    /// pass-through of its storage column. Pass-through columns are left
    /// unchanged.
    ///
    /// # Errors
    ///
    /// Returns `UnknownColumn`, or `InvalidDefinition` for a computed column,
    /// which has no storage column to fall back to.
    pub fn clear_expression(&self, name: &str) -> Result<()> {
        let mut state = self.state.write();
        let pos = state.position(name)?;
        let definition = &state.columns[pos];
        let source_index = match (definition.kind(), definition.source_index()) {
            (ColumnKind::PassThrough, _) => return Ok(()),
            (ColumnKind::Transformed, Some(index)) => index,
            _ => {
                return Err(ColcalcError::InvalidDefinition(format!(
                    "column '{name}' has no storage column; remove it instead"
                )))
            }
        };
        let restored = definition.without_expression(self.source.column_type(source_index)?)?;
        let mut columns = state.columns.clone();
        columns[pos] = restored;
        state.install(columns)?;
        state.invalidate(name)?;
        log::debug!("cleared expression of '{name}'");
        Ok(())
    }

    /// Removes a computed column.
    ///
    /// # Errors
    ///
    /// Returns `UnknownColumn`, `PassThroughRemoval` for columns backed by
    /// storage, or `ColumnInUse` naming the columns that still read it.
    pub fn remove_column(&self, name: &str) -> Result<()> {
        let mut state = self.state.write();
        let pos = state.position(name)?;
        if state.columns[pos].source_index().is_some() {
            return Err(ColcalcError::PassThroughRemoval(name.to_string()));
        }
        let dependents = owned(state.graph.dependents_of(name)?);
        if !dependents.is_empty() {
            return Err(ColcalcError::ColumnInUse {
                column: name.to_string(),
                dependents,
            });
        }

        let mut columns = state.columns.clone();
        columns.remove(pos);
        let graph = DependencyGraph::build(&columns)?;
        state.cache.remove(pos);
        state.columns = columns;
        state.graph = graph;
        log::debug!("removed computed column '{name}'");
        Ok(())
    }

    // ========================================================================
    // Materialization
    // ========================================================================

    /// Evaluates and caches `name` and every uncached column it reads. An
    /// empty name materializes every computed column. Cached columns are not
    /// re-evaluated.
    ///
    /// # Errors
    ///
    /// Returns `UnknownColumn`, or an evaluation error; columns evaluated
    /// before the failure stay cached.
    pub fn materialize(&self, name: &str) -> Result<()> {
        if name.is_empty() {
            return self.materialize_all().map(|_| ());
        }
        let mut state = self.state.write();
        let pos = state.position(name)?;
        if state.columns[pos].is_computed() {
            self.materialize_locked(&mut state, pos)?;
        }
        Ok(())
    }

    /// Evaluates every uncached computed column in dependency order and
    /// returns how many were evaluated.
    ///
    /// # Errors
    ///
    /// Returns the first evaluation error.
    pub fn materialize_all(&self) -> Result<usize> {
        let mut state = self.state.write();
        let order: Vec<usize> = state
            .graph
            .evaluation_order()
            .into_iter()
            .filter_map(|name| state.graph.position_of(name))
            .collect();
        let mut evaluated = 0;
        for pos in order {
            if state.columns[pos].is_computed() && state.cache[pos].is_none() {
                let column = self.evaluate_column(&state, pos)?;
                state.cache[pos] = Some(Arc::new(column));
                evaluated += 1;
            }
        }
        Ok(evaluated)
    }

    /// Drops the cached result of `name`. Returns true if one was cached.
    ///
    /// # Errors
    ///
    /// Returns `UnknownColumn`.
    pub fn unmaterialize(&self, name: &str) -> Result<bool> {
        let mut state = self.state.write();
        let pos = state.position(name)?;
        let dropped = state.cache[pos].take().is_some();
        if dropped {
            log::debug!("unmaterialized '{name}'");
        }
        Ok(dropped)
    }

    /// Drops every cached result.
    pub fn release(&self) {
        let mut state = self.state.write();
        let released = state.materialized_count();
        for slot in &mut state.cache {
            *slot = None;
        }
        log::debug!("released {released} cached column(s)");
    }

    /// Returns the cached result at `pos`, evaluating it and its inputs under
    /// the write lock if another thread has not already done so.
    fn ensure_materialized(&self, pos: usize) -> Result<Arc<EvaluatedColumn>> {
        let mut state = self.state.write();
        check_column(pos, state.columns.len())?;
        self.materialize_locked(&mut state, pos)
    }

    fn materialize_locked(&self, state: &mut State, pos: usize) -> Result<Arc<EvaluatedColumn>> {
        if let Some(cached) = &state.cache[pos] {
            self.cache_hits.fetch_add(1, Ordering::Relaxed);
            return Ok(Arc::clone(cached));
        }

        let name = state.columns[pos].name().to_string();
        let order: Vec<usize> = state
            .graph
            .evaluation_order_for(&name)?
            .into_iter()
            .filter_map(|n| state.graph.position_of(n))
            .collect();
        for p in order {
            if state.columns[p].is_computed() && state.cache[p].is_none() {
                let column = self.evaluate_column(state, p)?;
                state.cache[p] = Some(Arc::new(column));
            }
        }
        state.cache[pos]
            .clone()
            .ok_or_else(|| ColcalcError::InvalidDefinition(format!("column '{name}' is not computed")))
    }

    fn evaluate_column(&self, state: &State, pos: usize) -> Result<EvaluatedColumn> {
        let definition = &state.columns[pos];
        let Some(expression) = definition.expression() else {
            return Err(ColcalcError::InvalidDefinition(format!(
                "column '{}' is not computed",
                definition.name()
            )));
        };
        let inputs = expression
            .input_columns()
            .iter()
            .map(|input| self.input_array(state, definition, input))
            .collect::<Result<Vec<_>>>()?;

        self.evaluations.fetch_add(1, Ordering::Relaxed);
        let rows = self.source.row_count();
        let started = Instant::now();
        let column = expression.evaluate_with_row_count(&inputs, rows)?;
        log::debug!(
            "materialized '{}' over {rows} rows in {:?}",
            definition.name(),
            started.elapsed()
        );
        if column.error_count() > 0 {
            log::warn!(
                "column '{}': {} of {rows} rows failed to evaluate",
                definition.name(),
                column.error_count()
            );
        }
        Ok(column)
    }

    /// Array for one input of `definition`. Computed inputs must already be
    /// cached.
    fn input_array(&self, state: &State, definition: &ColumnDefinition, input: &str) -> Result<ArrayRef> {
        if input == definition.name() {
            if let Some(source_index) = definition.source_index() {
                return self.source.column_array(source_index);
            }
        }
        let pos = state.position(input)?;
        let input_def = &state.columns[pos];
        if input_def.is_computed() {
            return state.cache[pos]
                .as_ref()
                .map(|c| Arc::clone(c.values()))
                .ok_or_else(|| {
                    ColcalcError::InvalidDefinition(format!(
                        "column '{input}' read before it was computed"
                    ))
                });
        }
        let source_index = input_def
            .source_index()
            .ok_or_else(|| ColcalcError::UnknownColumn(input.to_string()))?;
        self.source.column_array(source_index)
    }

    // ========================================================================
    // Read accessors
    // ========================================================================

    /// Returns column names in display order.
    #[must_use]
    pub fn column_names(&self) -> Vec<String> {
        let state = self.state.read();
        state.columns.iter().map(|c| c.name().to_string()).collect()
    }

    /// Returns a copy of the definition of `name`.
    ///
    /// # Errors
    ///
    /// Returns `UnknownColumn`.
    pub fn definition(&self, name: &str) -> Result<ColumnDefinition> {
        let state = self.state.read();
        let pos = state.position(name)?;
        Ok(state.columns[pos].clone())
    }

    /// Returns the classification of `name`.
    ///
    /// # Errors
    ///
    /// Returns `UnknownColumn`.
    pub fn kind(&self, name: &str) -> Result<ColumnKind> {
        self.definition(name).map(|d| d.kind())
    }

    /// Returns true if `name` has a cached result.
    ///
    /// # Errors
    ///
    /// Returns `UnknownColumn`.
    pub fn is_materialized(&self, name: &str) -> Result<bool> {
        let state = self.state.read();
        let pos = state.position(name)?;
        Ok(state.cache[pos].is_some())
    }

    /// Returns the cached array of `name` without evaluating anything.
    ///
    /// # Errors
    ///
    /// Returns `UnknownColumn`.
    pub fn materialized_array(&self, name: &str) -> Result<Option<ArrayRef>> {
        let state = self.state.read();
        let pos = state.position(name)?;
        Ok(state.cache[pos].as_ref().map(|c| Arc::clone(c.values())))
    }

    /// Returns the error message of the cell at (`row`, `col`), evaluating the
    /// column if needed.
    ///
    /// # Errors
    ///
    /// Returns `InvalidRow`, `InvalidColumn`, or an evaluation error.
    pub fn cell_error(&self, row: usize, col: usize) -> Result<Option<String>> {
        Ok(self.cell(row, col)?.error().map(String::from))
    }

    /// Returns the columns `name` reads directly.
    ///
    /// # Errors
    ///
    /// Returns `UnknownColumn`.
    pub fn dependencies_of(&self, name: &str) -> Result<Vec<String>> {
        let state = self.state.read();
        Ok(owned(state.graph.dependencies_of(name)?))
    }

    /// Returns the columns that read `name` directly.
    ///
    /// # Errors
    ///
    /// Returns `UnknownColumn`.
    pub fn dependents_of(&self, name: &str) -> Result<Vec<String>> {
        let state = self.state.read();
        Ok(owned(state.graph.dependents_of(name)?))
    }

    /// Returns every column in dependency order.
    #[must_use]
    pub fn evaluation_order(&self) -> Vec<String> {
        let state = self.state.read();
        owned(state.graph.evaluation_order())
    }

    /// Returns true if `column` reads `other` directly or indirectly.
    #[must_use]
    pub fn is_dependent_on(&self, column: &str, other: &str) -> bool {
        self.state.read().graph.is_dependent_on(column, other)
    }

    /// Returns cache statistics.
    #[must_use]
    pub fn stats(&self) -> TableStats {
        let state = self.state.read();
        TableStats {
            computed_columns: state.computed_count(),
            materialized_columns: state.materialized_count(),
            evaluations: self.evaluations.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
        }
    }

    /// Resets the evaluation and cache-hit counters.
    pub fn reset_stats(&self) {
        self.evaluations.store(0, Ordering::Relaxed);
        self.cache_hits.store(0, Ordering::Relaxed);
    }
}

fn owned(names: Vec<&str>) -> Vec<String> {
    names.into_iter().map(String::from).collect()
}

fn cached_cell(column: &EvaluatedColumn, row: usize) -> Cell {
    let value = value_at(column.values().as_ref(), row).unwrap_or(Value::Null);
    match column.error(row) {
        Some(message) => Cell::with_error(value, message),
        None => Cell::new(value),
    }
}

impl TabularData for ComputedTable {
    fn row_count(&self) -> usize {
        self.source.row_count()
    }

    fn column_count(&self) -> usize {
        self.state.read().columns.len()
    }

    fn column_name(&self, col: usize) -> Result<String> {
        let state = self.state.read();
        check_column(col, state.columns.len())?;
        Ok(state.columns[col].name().to_string())
    }

    fn column_type(&self, col: usize) -> Result<DataType> {
        let state = self.state.read();
        check_column(col, state.columns.len())?;
        Ok(state.columns[col].data_type())
    }

    fn cell(&self, row: usize, col: usize) -> Result<Cell> {
        check_row(row, self.source.row_count())?;
        {
            let state = self.state.read();
            check_column(col, state.columns.len())?;
            let definition = &state.columns[col];
            if !definition.is_computed() {
                let source_index = definition
                    .source_index()
                    .ok_or_else(|| ColcalcError::UnknownColumn(definition.name().to_string()))?;
                return self.source.cell(row, source_index);
            }
            if let Some(column) = &state.cache[col] {
                self.cache_hits.fetch_add(1, Ordering::Relaxed);
                return Ok(cached_cell(column, row));
            }
        }
        let column = self.ensure_materialized(col)?;
        Ok(cached_cell(&column, row))
    }

    fn metadata(&self) -> HashMap<String, serde_json::Value> {
        let mut metadata = self.source.metadata();
        let state = self.state.read();
        metadata.insert(
            "computed_columns".into(),
            serde_json::Value::from(state.computed_count()),
        );
        metadata.insert(
            "materialized_columns".into(),
            serde_json::Value::from(state.materialized_count()),
        );
        metadata
    }

    fn column_array(&self, col: usize) -> Result<ArrayRef> {
        let source_index = {
            let state = self.state.read();
            check_column(col, state.columns.len())?;
            let definition = &state.columns[col];
            if definition.is_computed() {
                if let Some(column) = &state.cache[col] {
                    return Ok(Arc::clone(column.values()));
                }
                None
            } else {
                definition.source_index()
            }
        };
        match source_index {
            Some(index) => self.source.column_array(index),
            None => Ok(Arc::clone(self.ensure_materialized(col)?.values())),
        }
    }

    fn column_index(&self, name: &str) -> Option<usize> {
        self.state.read().graph.position_of(name)
    }
}
