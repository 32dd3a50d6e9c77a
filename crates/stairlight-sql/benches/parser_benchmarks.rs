//! Benchmarks for reference extraction
//!
//! Measures the token scan on generated SQL: wide join chains and deeply
//! nested subqueries.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use stairlight_core::{MappingTable, ResolutionContext};
use stairlight_sql::{MappingResolver, ReferenceParser};

/// `SELECT` joining `n` tables, one per line
fn generate_join_chain(n: usize) -> String {
    let mut sql = String::from("SELECT\n    t0.id\nFROM\n    proj.ds.table_0 AS t0\n");
    for i in 1..n {
        sql.push_str(&format!(
            "    LEFT OUTER JOIN proj.ds.table_{i} AS t{i}\n        ON t0.id = t{i}.id\n"
        ));
    }
    sql.push_str("WHERE 1 = 1\n");
    sql
}

/// Subqueries nested `depth` levels deep, each level reading one table
fn generate_nested(depth: usize) -> String {
    let mut sql = String::from("SELECT id FROM proj.ds.innermost");
    for i in 0..depth {
        sql = format!("SELECT id FROM (\n{}\n) AS s{} JOIN proj.ds.level_{} USING (id)", sql, i, i);
    }
    sql
}

fn bench_join_chain(c: &mut Criterion) {
    let parser = ReferenceParser::new();
    let mut group = c.benchmark_group("join_chain");

    for size in [10, 100, 1000].iter() {
        let sql = generate_join_chain(*size);
        group.bench_with_input(BenchmarkId::from_parameter(size), &sql, |b, sql| {
            b.iter(|| parser.parse(black_box(sql)))
        });
    }

    group.finish();
}

fn bench_nested_subqueries(c: &mut Criterion) {
    let parser = ReferenceParser::new();
    let mut group = c.benchmark_group("nested_subqueries");

    for depth in [5, 25, 100].iter() {
        let sql = generate_nested(*depth);
        group.bench_with_input(BenchmarkId::from_parameter(depth), &sql, |b, sql| {
            b.iter(|| parser.parse(black_box(sql)))
        });
    }

    group.finish();
}

fn bench_parse_and_resolve(c: &mut Criterion) {
    let parser = ReferenceParser::new();
    let context = ResolutionContext::new(Some("proj".to_string()));
    let mut table = MappingTable::new("proj.ds.out");
    table.upstream = (0..50).map(|i| format!("proj.ds.table_{}", i)).collect();
    let sql = generate_join_chain(100);

    c.bench_function("parse_and_resolve_100", |b| {
        b.iter(|| {
            let parsed = parser.parse(black_box(&sql)).unwrap_or_default();
            MappingResolver::new(&context).resolve(&parsed, Some(&table))
        })
    });
}

criterion_group!(
    benches,
    bench_join_chain,
    bench_nested_subqueries,
    bench_parse_and_resolve
);
criterion_main!(benches);
