use std::hint::black_box;
use std::sync::Arc;
use std::time::Duration;

use criterion::{criterion_group, criterion_main, BatchSize, Criterion};
use lightmetric::{
    parse_quantiles, CkmsQuantiles, Clock, Counter, Opts, Quantile, Summary, TimeWindowQuantiles,
};
use rand::{rngs::StdRng, Rng, SeedableRng};

fn latencies(len: usize) -> Vec<f64> {
    // Seeded so that every run measures the same stream.
    let mut rng = StdRng::seed_from_u64(len as u64);
    (0..len).map(|_| rng.random_range(0.001..2.5)).collect()
}

fn window(quantiles: &Arc<[Quantile]>) -> TimeWindowQuantiles {
    TimeWindowQuantiles::new(Arc::clone(quantiles), Duration::from_secs(600), 5, Clock::new())
        .expect("valid window")
}

fn sketch_benchmark(c: &mut Criterion) {
    let quantiles: Arc<[Quantile]> = parse_quantiles(&[(0.5, 0.05), (0.9, 0.01), (0.99, 0.001)])
        .expect("valid quantiles")
        .into();
    let values = latencies(100_000);

    let mut group = c.benchmark_group("ckms");
    group.bench_function("insert 100k", |b| {
        b.iter_batched(
            || CkmsQuantiles::new(Arc::clone(&quantiles)),
            |mut sketch| {
                for value in &values {
                    sketch.insert(*value);
                }
                sketch
            },
            BatchSize::LargeInput,
        )
    });
    group.bench_function("query p99", |b| {
        let mut sketch = CkmsQuantiles::new(Arc::clone(&quantiles));
        for value in &values {
            sketch.insert(*value);
        }

        b.iter(|| black_box(sketch.query(0.99)))
    });
    group.bench_function("merge 6 parts", |b| {
        let parts = values
            .chunks(values.len() / 6)
            .map(|chunk| {
                let mut sketch = CkmsQuantiles::new(Arc::clone(&quantiles));
                for value in chunk {
                    sketch.insert(*value);
                }
                sketch
            })
            .collect::<Vec<_>>();

        b.iter(|| black_box(CkmsQuantiles::merged(Arc::clone(&quantiles), &parts)))
    });
    group.finish();

    let mut group = c.benchmark_group("window");
    group.bench_function("insert", |b| {
        let window = window(&quantiles);
        let mut values = values.iter().cycle();

        b.iter(|| window.insert(*values.next().unwrap_or(&1.0)))
    });
    group.bench_function("query_all", |b| {
        let window = window(&quantiles);
        for value in &values {
            window.insert(*value);
        }

        b.iter(|| black_box(window.query_all()))
    });
    group.finish();
}

fn instrument_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("instruments");
    group.bench_function("counter inc", |b| {
        let counter = Counter::new(Opts::new("requests", "Requests.")).expect("valid counter");
        b.iter(|| counter.inc())
    });
    group.bench_function("labeled counter inc", |b| {
        let counter = Counter::new(Opts::new("requests", "Requests.").label_names(["method"]))
            .expect("valid counter");
        b.iter(|| counter.labels(&["GET"]).map(|child| child.inc()))
    });
    group.bench_function("summary observe", |b| {
        let summary = Summary::builder(Opts::new("latency_seconds", "Latency."))
            .quantile(0.5, 0.05)
            .and_then(|builder| builder.quantile(0.99, 0.001))
            .and_then(|builder| builder.build())
            .expect("valid summary");
        let values = latencies(10_000);
        let mut values = values.iter().cycle();

        b.iter(|| summary.observe(*values.next().unwrap_or(&1.0)))
    });
    group.finish();
}

criterion_group!(benches, sketch_benchmark, instrument_benchmark);
criterion_main!(benches);
