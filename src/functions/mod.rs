//! Vectorized function registry.
//!
//! Functions operate on whole Arrow arrays. The expression compiler exposes
//! the non-aggregate ones to expressions through scalar wrappers that run the
//! function over one-element arrays.

mod kernels;

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, OnceLock};

use arrow::array::ArrayRef;
use arrow::datatypes::DataType as ArrowDataType;

use crate::error::{ColcalcError, Result};

pub use kernels::{AggregateFunction, CastFunction, MathFunction, StringFunction};

/// Broad grouping of registry functions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FunctionCategory {
    /// Element-wise numeric functions.
    Math,
    /// Element-wise string functions.
    String,
    /// Strict type conversions.
    Cast,
    /// Whole-column reductions producing a single value.
    Aggregate,
}

impl FunctionCategory {
    /// Returns true if a function in this category maps each row independently.
    #[must_use]
    pub fn is_elementwise(&self) -> bool {
        !matches!(self, FunctionCategory::Aggregate)
    }
}

impl fmt::Display for FunctionCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FunctionCategory::Math => "math",
            FunctionCategory::String => "string",
            FunctionCategory::Cast => "cast",
            FunctionCategory::Aggregate => "aggregate",
        };
        f.write_str(name)
    }
}

/// A named function over whole columns.
pub trait VectorFunction: Send + Sync + fmt::Debug {
    /// Returns the registered name of this function.
    fn name(&self) -> &str;

    /// Returns the category of this function.
    fn category(&self) -> FunctionCategory;

    /// Returns the number of input arrays the function takes.
    fn arity(&self) -> usize {
        1
    }

    /// Checks that the function accepts inputs of these types.
    ///
    /// # Errors
    ///
    /// Returns `Function` if the count or any type is not accepted.
    fn validate_input_types(&self, input_types: &[ArrowDataType]) -> Result<()>;

    /// Returns the output type for inputs of these types.
    ///
    /// # Errors
    ///
    /// Returns `Function` if the inputs are not accepted.
    fn output_type(&self, input_types: &[ArrowDataType]) -> Result<ArrowDataType>;

    /// Runs the function.
    ///
    /// # Errors
    ///
    /// Returns `Function` or `Arrow` if the inputs are rejected or a kernel fails.
    fn execute(&self, inputs: &[ArrayRef]) -> Result<ArrayRef>;
}

/// Builds the error a function reports for rejected input.
pub(crate) fn function_error(name: &str, message: impl Into<String>) -> ColcalcError {
    ColcalcError::Function {
        name: name.to_string(),
        message: message.into(),
    }
}

/// Registry of vectorized functions keyed by lowercase name.
#[derive(Clone, Default)]
pub struct FunctionRegistry {
    functions: BTreeMap<String, Arc<dyn VectorFunction>>,
}

impl fmt::Debug for FunctionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FunctionRegistry")
            .field("functions", &self.functions.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl FunctionRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry holding the default math, string, cast and
    /// aggregate functions.
    #[must_use]
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        kernels::register_defaults(&mut registry);
        registry
    }

    /// Returns a process-wide shared registry of the default functions.
    #[must_use]
    pub fn shared_default() -> Arc<FunctionRegistry> {
        static DEFAULT: OnceLock<Arc<FunctionRegistry>> = OnceLock::new();
        Arc::clone(DEFAULT.get_or_init(|| Arc::new(FunctionRegistry::with_defaults())))
    }

    /// Registers a function, returning the one it replaced, if any.
    pub fn register(&mut self, function: Arc<dyn VectorFunction>) -> Option<Arc<dyn VectorFunction>> {
        let name = function.name().to_ascii_lowercase();
        log::debug!("registering function '{name}' ({})", function.category());
        self.functions.insert(name, function)
    }

    /// Looks up a function by name, ignoring ASCII case.
    ///
    /// # Errors
    ///
    /// Returns `FunctionNotFound` if no function has this name.
    pub fn lookup(&self, name: &str) -> Result<Arc<dyn VectorFunction>> {
        self.functions
            .get(&name.to_ascii_lowercase())
            .cloned()
            .ok_or_else(|| ColcalcError::FunctionNotFound(name.to_string()))
    }

    /// Returns true if a function with this name is registered.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.functions.contains_key(&name.to_ascii_lowercase())
    }

    /// Returns registered names in sorted order.
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        self.functions.keys().map(String::as_str).collect()
    }

    /// Iterates over the functions that map rows independently.
    pub fn elementwise(&self) -> impl Iterator<Item = &Arc<dyn VectorFunction>> {
        self.functions
            .values()
            .filter(|f| f.category().is_elementwise())
    }

    /// Returns the number of registered functions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.functions.len()
    }

    /// Returns true if no functions are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }
}
