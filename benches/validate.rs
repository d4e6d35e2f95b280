use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, SamplingMode, Throughput};
use rand::{rngs::StdRng, Rng, SeedableRng};

use chatsql::{extract_field_references, rewrite, SchemaCatalog, Validator};

// Synthetic schema: `n` tables named t0..tn, each with 8..24 columns c0..ck
fn gen_catalog(n: usize, seed: u64) -> (SchemaCatalog, Vec<usize>) {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut cat = SchemaCatalog::new("bench");
    let mut widths = Vec::with_capacity(n);
    for t in 0..n {
        let width = rng.gen_range(8..24usize);
        let cols: Vec<String> = (0..width).map(|c| format!("c{}", c)).collect();
        cat = cat.with_table(&format!("t{}", t), cols);
        widths.push(width);
    }
    (cat, widths)
}

// Join of `joins + 1` random tables selecting `refs` columns; every fifth
// reference points at a column the aliased table does not have.
fn gen_statement(widths: &[usize], joins: usize, refs: usize, seed: u64) -> String {
    let mut rng = StdRng::seed_from_u64(seed);
    let tables: Vec<usize> = (0..=joins).map(|_| rng.gen_range(0..widths.len())).collect();
    let mut select = Vec::with_capacity(refs);
    for i in 0..refs {
        let a = rng.gen_range(0..tables.len());
        let width = widths[tables[a]];
        let col = if i % 5 == 4 { width + 3 } else { rng.gen_range(0..width) };
        select.push(format!("a{}.c{}", a, col));
    }
    let mut sql = format!("SELECT {} FROM t{} a0", select.join(", "), tables[0]);
    for (i, t) in tables.iter().enumerate().skip(1) {
        sql.push_str(&format!(" JOIN t{} a{} ON a{}.c0 = a0.c0", t, i, i));
    }
    sql.push_str(" WHERE a0.c1 > 10 ORDER BY a0.c0 LIMIT 100");
    sql
}

fn bench_validate(c: &mut Criterion) {
    let (cat, widths) = gen_catalog(200, 0xC0FF_EE00);
    let mut group = c.benchmark_group("validate");
    group.sampling_mode(SamplingMode::Flat);
    group.sample_size(30);

    for &(joins, refs) in &[(1usize, 10usize), (4, 50), (8, 200)] {
        let sql = gen_statement(&widths, joins, refs, 0xFACE_FEED ^ refs as u64);
        let label = format!("{}j_{}r", joins, refs);
        group.throughput(Throughput::Elements(refs as u64));

        group.bench_with_input(BenchmarkId::new("extract", &label), &sql, |b, sql| {
            b.iter(|| criterion::black_box(extract_field_references(sql)));
        });

        group.bench_with_input(BenchmarkId::new("validate", &label), &sql, |b, sql| {
            let v = Validator::new(&cat);
            b.iter(|| criterion::black_box(v.validate(sql)));
        });

        // Validate then rewrite whatever has a concrete suggestion
        group.bench_with_input(BenchmarkId::new("validate_rewrite", &label), &sql, |b, sql| {
            let v = Validator::new(&cat);
            b.iter(|| {
                let report = v.validate(sql);
                criterion::black_box(rewrite(sql, &report.issues));
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_validate);
criterion_main!(benches);
