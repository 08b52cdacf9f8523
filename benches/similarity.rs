use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use imfind::search::{match_text, search_by_vector, select_top_k};
use imfind::snapshot::{IndexItem, Snapshot, SnapshotBuilder};
use imfind::text_index::OcrPayload;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

const DIM: usize = 512;
const WORDS: [&str; 8] = ["stop", "exit", "open", "closed", "sale", "menu", "road", "park"];

fn random_vector(rng: &mut StdRng) -> Vec<f32> {
    (0..DIM).map(|_| rng.random_range(-1.0f32..1.0)).collect()
}

// 生成随机快照，每 4 张图片有一张带文字
fn generate_snapshot(n: usize) -> Snapshot {
    let mut rng = StdRng::seed_from_u64(42); // 使用固定种子确保结果可重现
    let mut builder = SnapshotBuilder::new(DIM);
    for i in 0..n {
        let mut item = IndexItem::new(format!("/images/{}.jpg", i), random_vector(&mut rng));
        if i % 4 == 0 {
            let words = (0..3)
                .map(|_| WORDS[rng.random_range(0..WORDS.len())].to_owned())
                .collect::<Vec<_>>();
            item = item.with_ocr(Some(OcrPayload::new(words.join(" "), words)));
        }
        builder.push(item).unwrap();
    }
    builder.finish(1).unwrap().0
}

fn bench_select_top_k(c: &mut Criterion) {
    let mut group = c.benchmark_group("select_top_k");
    let mut rng = StdRng::seed_from_u64(42);
    let scores = (0..100_000).map(|_| rng.random_range(-1.0..1.0)).collect::<Vec<f64>>();

    for k in [10, 100, 1000] {
        group.bench_with_input(BenchmarkId::from_parameter(k), &k, |b, &k| {
            b.iter(|| select_top_k(black_box(&scores), k))
        });
    }
    group.finish();
}

fn bench_search(c: &mut Criterion) {
    let mut group = c.benchmark_group("search");
    group.sample_size(20);

    for n in [10_000, 50_000] {
        let snapshot = generate_snapshot(n);
        let query = random_vector(&mut StdRng::seed_from_u64(7));

        group.bench_with_input(BenchmarkId::new("vector", n), &snapshot, |b, snapshot| {
            b.iter(|| search_by_vector(snapshot, black_box(&query), 20, 0.0).unwrap())
        });
        // 短语匹配需要扫描所有文字
        group.bench_with_input(BenchmarkId::new("text", n), &snapshot, |b, snapshot| {
            b.iter(|| match_text(snapshot, black_box("road closed"), 20))
        });
    }
    group.finish();
}

criterion_group!(benches, bench_select_top_k, bench_search);
criterion_main!(benches);
