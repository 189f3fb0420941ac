//! Property-based tests for dependency ordering and materialization.

use std::sync::Arc;

use arrow::array::{Array, ArrayRef, Int64Array};
use colcalc::{
    ColcalcError, ColumnDefinition, ComputedTable, DataType, DependencyGraph, Expression, MemTable,
    TabularData,
};
use proptest::prelude::*;

fn name(i: usize) -> String {
    format!("c{i}")
}

/// Expression text for column `i` reading `x` and every earlier column set in `mask`.
fn text_for(mask: &[bool]) -> String {
    let mut text = String::from("x");
    for (j, used) in mask.iter().enumerate() {
        if *used {
            text.push_str(&format!(" + {}", name(j)));
        }
    }
    text
}

/// Strategy producing, for each column `i`, which of the columns `0..i` it reads.
fn acyclic_masks() -> impl Strategy<Value = Vec<Vec<bool>>> {
    (1usize..8).prop_flat_map(|n| {
        (0..n)
            .map(|i| prop::collection::vec(any::<bool>(), i))
            .collect::<Vec<_>>()
    })
}

fn int_table(values: Vec<i64>) -> ComputedTable {
    let source =
        MemTable::from_columns(vec![("x", Arc::new(Int64Array::from(values)) as ArrayRef)]).unwrap();
    ComputedTable::new(Arc::new(source)).unwrap()
}

/// Table where `c0 = x + 1` and each later column adds one to its predecessor.
fn chain_table(values: Vec<i64>, len: usize) -> ComputedTable {
    let table = int_table(values);
    for i in 0..len {
        let input = if i == 0 { "x".to_string() } else { name(i - 1) };
        let expr = table
            .compile(&format!("{input} + 1"), DataType::Int64)
            .unwrap();
        table.add_computed_column(&name(i), expr).unwrap();
    }
    table
}

fn int_values(array: &ArrayRef) -> Vec<Option<i64>> {
    let ints = array.as_any().downcast_ref::<Int64Array>().unwrap();
    (0..ints.len())
        .map(|i| (!ints.is_null(i)).then(|| ints.value(i)))
        .collect()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(50))]

    /// Every column follows all of its dependencies, whatever the declaration order.
    #[test]
    fn prop_order_respects_dependencies(masks in acyclic_masks(), rotation in 0usize..8) {
        let mut columns: Vec<ColumnDefinition> = masks
            .iter()
            .enumerate()
            .map(|(i, mask)| {
                let expr = Expression::infer(&text_for(mask), DataType::Int64).unwrap();
                ColumnDefinition::computed(name(i), expr)
            })
            .collect();
        columns.push(ColumnDefinition::pass_through("x", DataType::Int64, 0));
        let shift = rotation % columns.len();
        columns.rotate_left(shift);

        let graph = DependencyGraph::build(&columns).unwrap();
        let order = graph.evaluation_order();
        prop_assert_eq!(order.len(), columns.len());

        let position = |n: &str| order.iter().position(|o| *o == n).unwrap();
        for (i, mask) in masks.iter().enumerate() {
            let me = position(&name(i));
            prop_assert!(position("x") < me);
            for (j, used) in mask.iter().enumerate() {
                if *used {
                    prop_assert!(position(&name(j)) < me);
                }
            }
        }
    }

    /// Closing a chain into a loop is rejected and the table keeps working.
    #[test]
    fn prop_cycle_rejected_keeps_prior_graph(len in 1usize..6, target in 0usize..6, start in -100i64..100) {
        let table = chain_table(vec![start, start + 1], len);
        let target = target % len;
        let before = table.evaluation_order();

        let closing = table
            .compile(&format!("{} + 1", name(len - 1)), DataType::Int64)
            .unwrap();
        let err = table.set_expression(&name(target), closing).unwrap_err();
        let is_cycle = matches!(err, ColcalcError::CycleDetected { .. });
        prop_assert!(is_cycle);

        prop_assert_eq!(table.evaluation_order(), before);
        let last = table.column_index(&name(len - 1)).unwrap();
        let expected = start + i64::try_from(len).unwrap();
        prop_assert_eq!(table.cell(0, last).unwrap().value().as_int64(), Some(expected));
    }

    /// Materializing twice evaluates each column once and yields the same data.
    #[test]
    fn prop_materialize_idempotent(values in prop::collection::vec(-1000i64..1000, 1..40), len in 1usize..5) {
        let table = chain_table(values, len);
        let last = name(len - 1);

        table.materialize(&last).unwrap();
        let first = table.materialized_array(&last).unwrap().unwrap();
        let evaluations = table.stats().evaluations;
        prop_assert_eq!(evaluations, len as u64);

        table.materialize(&last).unwrap();
        table.materialize("").unwrap();
        let second = table.materialized_array(&last).unwrap().unwrap();
        prop_assert_eq!(table.stats().evaluations, evaluations);
        prop_assert_eq!(int_values(&first), int_values(&second));
    }

    /// Dropping a cached column and reading it again reproduces the same values.
    #[test]
    fn prop_unmaterialize_round_trip(values in prop::collection::vec(-1000i64..1000, 1..40)) {
        let table = int_table(values.clone());
        let expr = table.compile("x * 3 - 7", DataType::Int64).unwrap();
        let col = table.add_computed_column("y", expr).unwrap();

        let first = int_values(&table.column_array(col).unwrap());
        prop_assert!(table.unmaterialize("y").unwrap());
        prop_assert!(!table.is_materialized("y").unwrap());
        prop_assert!(!table.unmaterialize("y").unwrap());
        let second = int_values(&table.column_array(col).unwrap());

        prop_assert_eq!(&first, &second);
        for (got, x) in first.iter().zip(&values) {
            prop_assert_eq!(*got, Some(x * 3 - 7));
        }
    }

    /// Inputs of unequal length are rejected before any row is evaluated.
    #[test]
    fn prop_length_mismatch_rejected(left in 0usize..20, right in 0usize..20) {
        prop_assume!(left != right);
        let expr = Expression::compile("a + b", ["a", "b"], DataType::Int64).unwrap();
        let a: ArrayRef = Arc::new(Int64Array::from(vec![1i64; left]));
        let b: ArrayRef = Arc::new(Int64Array::from(vec![2i64; right]));

        let err = expr.evaluate(&[a, b]).unwrap_err();
        let is_length_mismatch = matches!(err, ColcalcError::LengthMismatch { .. });
        prop_assert!(is_length_mismatch);
    }
}
