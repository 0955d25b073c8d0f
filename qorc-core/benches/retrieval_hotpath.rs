use chrono::Utc;
use criterion::{criterion_group, criterion_main, Criterion};
use qorc_core::{Intent, PrivacyLevel, RetrievalSource, SourceType, TenantId};
use std::collections::HashMap;
use std::hint::black_box;

fn seed_sources(n: usize) -> Vec<RetrievalSource> {
    (0..n)
        .map(|i| RetrievalSource {
            id: format!("item-{i}"),
            content: format!("retrieved content body number {i} with some representative length"),
            similarity: (i % 100) as f32 / 100.0,
            source_type: match i % 4 {
                0 => SourceType::Cache,
                1 => SourceType::Knowledge,
                2 => SourceType::Memory,
                _ => SourceType::Web,
            },
            privacy_level: PrivacyLevel::Public,
            owner_id: "user-1".to_string(),
            tenant_id: TenantId::nil(),
            created_at: Utc::now(),
            metadata: HashMap::new(),
        })
        .collect()
}

fn bench_retrieval_hotpath(c: &mut Criterion) {
    let sources = seed_sources(500);

    c.bench_function("retrieval/dedup_rank_sort_500", |b| {
        b.iter(|| {
            let mut seen = std::collections::HashSet::new();
            let deduped: Vec<_> = sources
                .iter()
                .cloned()
                .filter(|s| s.is_dedup_exempt() || seen.insert(s.id.clone()))
                .collect();

            let mut scored: Vec<(f32, RetrievalSource)> = deduped
                .into_iter()
                .map(|s| {
                    let score = s.similarity * 0.40 + 0.20 + 0.15 + 0.15 + 0.10;
                    (score, s)
                })
                .collect();
            scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap());
            black_box(scored.len());
        });
    });

    let _ = Intent::General;
}

criterion_group!(benches, bench_retrieval_hotpath);
criterion_main!(benches);
