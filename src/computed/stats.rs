//! Materialization statistics.

/// Snapshot of a computed table's cache activity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TableStats {
    /// Number of columns defined by an expression.
    pub computed_columns: usize,
    /// Number of computed columns with a cached result.
    pub materialized_columns: usize,
    /// Number of column evaluations (cache misses).
    pub evaluations: u64,
    /// Number of computed-cell reads served from the cache.
    pub cache_hits: u64,
}

impl TableStats {
    /// Calculates the cache hit rate (0.0 to 1.0).
    ///
    /// Returns `None` if no computed column has been accessed.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn hit_rate(&self) -> Option<f64> {
        let total = self.total_accesses();
        if total == 0 {
            None
        } else {
            Some(self.cache_hits as f64 / total as f64)
        }
    }

    /// Returns the total number of computed-column accesses.
    #[must_use]
    pub fn total_accesses(&self) -> u64 {
        self.cache_hits + self.evaluations
    }
}
