//! Computed column benchmarks.
//!
//! Measures:
//! - Expression compilation
//! - Row evaluation over Arrow inputs
//! - Materializing a dependency chain
//! - Cached cell reads

use std::sync::Arc;

use arrow::array::{ArrayRef, Float64Array, Int64Array};
use colcalc::{ComputedTable, DataType, Expression, MemTable, TabularData};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

fn source(rows: usize) -> MemTable {
    let price: Vec<i64> = (0..rows as i64).map(|i| i % 500 + 1).collect();
    let quantity: Vec<i64> = (0..rows as i64).map(|i| i % 7 + 1).collect();
    #[allow(clippy::cast_precision_loss)]
    let tax: Vec<f64> = (0..rows).map(|i| (i % 20) as f64 / 100.0).collect();
    MemTable::from_columns(vec![
        ("price", Arc::new(Int64Array::from(price)) as ArrayRef),
        ("quantity", Arc::new(Int64Array::from(quantity)) as ArrayRef),
        ("tax", Arc::new(Float64Array::from(tax)) as ArrayRef),
    ])
    .expect("build source")
}

/// Benchmark compiling expressions of increasing size
fn bench_compile(c: &mut Criterion) {
    let mut group = c.benchmark_group("expression_compile");

    let cases = [
        ("simple", "price * 2"),
        ("arithmetic", "price * quantity * (1 + tax)"),
        (
            "functions",
            "if(quantity > 3, round(price * (1 + tax), 2), coalesce(price, 0)) + abs(quantity - 4)",
        ),
    ];
    for (label, text) in cases {
        group.bench_function(label, |b| {
            b.iter(|| black_box(Expression::infer(black_box(text), DataType::Float64).expect("compile")));
        });
    }

    group.finish();
}

/// Benchmark evaluating a compiled expression over N rows
fn bench_evaluate(c: &mut Criterion) {
    let mut group = c.benchmark_group("expression_evaluate");

    let expr = Expression::compile(
        "price * quantity * (1 + tax)",
        ["price", "quantity", "tax"],
        DataType::Float64,
    )
    .expect("compile");

    for rows in &[1_000usize, 10_000, 100_000] {
        let table = source(*rows);
        let inputs: Vec<ArrayRef> = (0..3)
            .map(|col| table.column_array(col).expect("column"))
            .collect();

        group.throughput(Throughput::Elements(*rows as u64));
        group.bench_with_input(BenchmarkId::from_parameter(rows), rows, |b, _| {
            b.iter(|| black_box(expr.evaluate(&inputs).expect("evaluate")));
        });
    }

    group.finish();
}

/// Benchmark materializing a three-column chain from cold
fn bench_materialize_chain(c: &mut Criterion) {
    let mut group = c.benchmark_group("materialize_chain");

    for rows in &[1_000usize, 10_000] {
        let table = ComputedTable::new(Arc::new(source(*rows))).expect("wrap source");
        for (name, text, output) in [
            ("subtotal", "price * quantity", DataType::Int64),
            ("taxed", "subtotal * (1 + tax)", DataType::Float64),
            ("label", "string(round(taxed, 2))", DataType::String),
        ] {
            let expr = table.compile(text, output).expect("compile");
            table.add_computed_column(name, expr).expect("add column");
        }

        group.throughput(Throughput::Elements(*rows as u64 * 3));
        group.bench_with_input(BenchmarkId::from_parameter(rows), rows, |b, _| {
            b.iter(|| {
                table.release();
                black_box(table.materialize_all().expect("materialize"))
            });
        });
    }

    group.finish();
}

/// Benchmark cell reads once the column is cached
fn bench_cached_reads(c: &mut Criterion) {
    let mut group = c.benchmark_group("cached_cell_reads");

    let table = ComputedTable::new(Arc::new(source(10_000))).expect("wrap source");
    let expr = table.compile("price * 2", DataType::Int64).expect("compile");
    let col = table.add_computed_column("doubled", expr).expect("add column");
    table.materialize("doubled").expect("materialize");

    group.throughput(Throughput::Elements(1_000));
    group.bench_function("1000_cells", |b| {
        b.iter(|| {
            for row in 0..1_000 {
                black_box(table.cell(row, col).expect("cell"));
            }
        });
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_compile,
    bench_evaluate,
    bench_materialize_chain,
    bench_cached_reads
);
criterion_main!(benches);
