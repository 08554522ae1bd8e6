//! Benchmarks for hybrid search score fusion.
//!
//! Measures min-max normalization plus weighted fusion for candidate
//! windows of typical page sizes, with half of the documents found by both
//! retrieval paths.

// Criterion macros generate items without docs - this is expected for benchmarks
// Benchmarks use unwrap for simplicity - panics are acceptable in benchmarks
#![allow(missing_docs)]
#![allow(clippy::unwrap_used)]

use chrono::{Duration, Utc};
use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use gromozeka_memory::models::{
    ConversationId, IndexedMessage, KeywordQuery, MessageId, MessageRole, TenantId, ThreadId,
};
use gromozeka_memory::services::fusion::fuse;
use gromozeka_memory::services::highlights;
use gromozeka_memory::storage::IndexHit;
use std::hint::black_box;

#[allow(clippy::cast_precision_loss)]
fn hits(count: usize, offset: usize, scale: f32) -> Vec<IndexHit> {
    let now = Utc::now();
    (0..count)
        .map(|i| {
            let n = i + offset;
            IndexHit {
                doc: IndexedMessage {
                    id: MessageId::new(format!("m{n}")),
                    tenant: TenantId::new("bench"),
                    thread_id: ThreadId::new("th"),
                    conversation_id: ConversationId::new("c"),
                    project_id: None,
                    role: MessageRole::User,
                    text: String::new(),
                    created_at: now - Duration::seconds(i64::try_from(n).unwrap()),
                },
                score: scale * ((n * 7919) % 1000) as f32 / 1000.0,
            }
        })
        .collect()
}

fn bench_fuse(c: &mut Criterion) {
    let mut group = c.benchmark_group("fuse");
    for size in [21usize, 101, 1001] {
        let keyword = hits(size, 0, 12.5);
        let semantic = hits(size, size / 2, 1.0);
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, _| {
            b.iter(|| fuse(black_box(&keyword), black_box(&semantic), (0.5, 0.5)));
        });
    }
    group.finish();
}

fn bench_highlights(c: &mut Criterion) {
    let text = "Gromozeka keeps a temporal knowledge graph of everything the user says. \
                Kotlin services write facts, and the search engine fuses keyword and \
                semantic scores. "
        .repeat(20);
    let query = KeywordQuery::parse(r#"kotlin "knowledge graph" search"#);
    c.bench_function("highlights", |b| {
        b.iter(|| highlights(black_box(&text), black_box(&query), 40, 3));
    });
}

criterion_group!(benches, bench_fuse, bench_highlights);
criterion_main!(benches);
