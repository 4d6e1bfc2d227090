use criterion::{black_box, criterion_group, criterion_main, Criterion};
use quiver::{BalancedSelector, BaseUri, SelectionHints, UriSelector};

fn pool(n: usize) -> Vec<BaseUri> {
    (0..n)
        .map(|i| BaseUri::parse(&format!("https://host-{i}.example.com")).unwrap())
        .collect()
}

fn balanced_select(c: &mut Criterion) {
    let mut group = c.benchmark_group("balanced_select");
    for size in [2usize, 8, 32] {
        let selector = BalancedSelector::new();
        let uris = pool(size);
        group.bench_function(format!("pool_{size}"), |b| {
            b.iter(|| black_box(selector.select(&uris, &SelectionHints::default())))
        });
    }
    group.finish();
}

fn balanced_select_with_feedback(c: &mut Criterion) {
    let selector = BalancedSelector::new();
    let uris = pool(8);
    // Pin some inflight load and failure history so scoring is non-trivial.
    let loaded = selector.select(&uris, &SelectionHints::default()).unwrap();
    let _guards: Vec<_> = (0..4).map(|_| loaded.tracker.track()).collect();
    loaded.tracker.observe(Some(503));

    c.bench_function("balanced_select_scored", |b| {
        b.iter(|| black_box(selector.select(&uris, &SelectionHints::default())))
    });
}

criterion_group!(benches, balanced_select, balanced_select_with_feedback);
criterion_main!(benches);
