//! Benchmarks for journal combination throughput
//!
//! Measures how `Combiner::add` and `Combiner::as_tree` scale with the
//! number of paths in a journal, since both are on the hot path of
//! `finish_change` and `receive`.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use driftmirror::{Action, Combiner, Journal, Payload};
use driftmirror::PathContent;

fn file(sha1: &str, length: u64) -> PathContent {
    PathContent::File { sha1: sha1.to_string(), length, mtime: None }
}

/// A flat journal of `n` unrelated new-file entries.
fn flat_journal(n: usize) -> Journal {
    let mut j = Journal::new();
    for i in 0..n {
        let path = format!("file-{i:08}.txt");
        let sha1 = format!("{:040x}", i);
        j.add(path, Action::New, Payload::Single(file(&sha1, 1024))).unwrap();
    }
    j
}

/// A journal of `n` files nested under `depth` levels of directories, all
/// sharing a common prefix so `as_tree` has to walk real parent chains.
fn nested_journal(n: usize, depth: usize) -> Journal {
    let mut j = Journal::new();
    let mut prefix = String::new();
    for d in 0..depth {
        if d > 0 {
            prefix.push('/');
        }
        prefix.push_str(&format!("dir{d}"));
        j.add(prefix.clone(), Action::New, Payload::Single(PathContent::Directory)).unwrap();
    }
    for i in 0..n {
        let path = format!("{prefix}/file-{i:08}.txt");
        let sha1 = format!("{:040x}", i);
        j.add(path, Action::New, Payload::Single(file(&sha1, 1024))).unwrap();
    }
    j
}

fn bench_add_single_journal(c: &mut Criterion) {
    let mut group = c.benchmark_group("combine_add_single");

    for size in [100usize, 1_000, 10_000] {
        let journal = flat_journal(size);
        group.throughput(Throughput::Elements(size as u64));

        group.bench_with_input(BenchmarkId::from_parameter(size), &journal, |b, journal| {
            b.iter(|| {
                let mut combiner = Combiner::new();
                combiner.add(black_box(journal)).unwrap();
                black_box(&combiner);
            });
        });
    }

    group.finish();
}

/// Fold many small journals (simulating replicating a long history of
/// per-change journals) into one accumulator.
fn bench_add_many_journals(c: &mut Criterion) {
    let mut group = c.benchmark_group("combine_add_many");

    for count in [10usize, 100, 1_000] {
        let journals: Vec<Journal> = (0..count)
            .map(|i| {
                let mut j = Journal::new();
                let path = format!("file-{i:08}.txt");
                let sha1 = format!("{:040x}", i);
                j.add(path, Action::New, Payload::Single(file(&sha1, 512))).unwrap();
                j
            })
            .collect();
        group.throughput(Throughput::Elements(count as u64));

        group.bench_with_input(BenchmarkId::from_parameter(count), &journals, |b, journals| {
            b.iter(|| {
                let mut combiner = Combiner::new();
                for journal in journals {
                    combiner.add(black_box(journal)).unwrap();
                }
                black_box(&combiner);
            });
        });
    }

    group.finish();
}

fn bench_as_tree(c: &mut Criterion) {
    let mut group = c.benchmark_group("combine_as_tree");

    for size in [100usize, 1_000, 10_000] {
        let journal = nested_journal(size, 4);
        let mut combiner = Combiner::new();
        combiner.add(&journal).unwrap();
        group.throughput(Throughput::Elements(size as u64));

        group.bench_with_input(BenchmarkId::from_parameter(size), &combiner, |b, combiner| {
            b.iter(|| {
                let tree = combiner.as_tree().unwrap();
                black_box(tree);
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_add_single_journal, bench_add_many_journals, bench_as_tree);
criterion_main!(benches);
