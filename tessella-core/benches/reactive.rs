use criterion::{black_box, criterion_group, criterion_main, Criterion};
use tessella_core::{atomically, Computed, Observable};

fn bench_observable(c: &mut Criterion) {
    c.bench_function("observable_create", |b| {
        b.iter(|| black_box(Observable::new(0_u64)));
    });

    let cell = Observable::new(0_u64);
    c.bench_function("observable_get", |b| {
        b.iter(|| black_box(cell.get()));
    });

    let cell = Observable::new(0_u64);
    c.bench_function("observable_set", |b| {
        let mut n = 0_u64;
        b.iter(|| {
            n += 1;
            cell.set(black_box(n));
        });
    });
}

fn bench_computed(c: &mut Criterion) {
    let source = Observable::new(0_u64);
    let source_c = source.clone();
    let level1 = Computed::new(move || source_c.get() + 1);
    let level1_c = level1.clone();
    let level2 = Computed::new(move || level1_c.get() + 1);
    let level2_c = level2.clone();
    let level3 = Computed::new(move || level2_c.get() + 1);

    c.bench_function("computed_chain_propagation", |b| {
        let mut n = 0_u64;
        b.iter(|| {
            n += 1;
            source.set(n);
            black_box(level3.get())
        });
    });
}

fn bench_transactions(c: &mut Criterion) {
    let cells: Vec<Observable<u64>> = (0..8).map(Observable::new).collect();
    let summed = cells.clone();
    let total = Computed::new(move || summed.iter().map(Observable::get).sum::<u64>());

    c.bench_function("eight_writes_unbatched", |b| {
        let mut n = 0_u64;
        b.iter(|| {
            n += 1;
            for cell in &cells {
                cell.set(n);
            }
            black_box(total.get())
        });
    });

    let cells: Vec<Observable<u64>> = (0..8).map(Observable::new).collect();
    let summed = cells.clone();
    let total = Computed::new(move || summed.iter().map(Observable::get).sum::<u64>());

    c.bench_function("eight_writes_atomically", |b| {
        let mut n = 0_u64;
        b.iter(|| {
            n += 1;
            atomically(|| {
                for cell in &cells {
                    cell.set(n);
                }
            });
            black_box(total.get())
        });
    });
}

criterion_group!(benches, bench_observable, bench_computed, bench_transactions);
criterion_main!(benches);
