//! Benchmarks for the hot paths of a request
//!
//! This benchmark measures:
//! - Fingerprint key building over realistic request parameters
//! - Partial field extraction as fragments arrive
//! - The authoritative parse of a complete response

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use genai_core::cache::FingerprintKeyBuilder;
use genai_core::pipeline::{parse_authoritative, FieldKind, FieldSet, PartialResult};
use serde_json::json;
use std::sync::Arc;

const RESPONSE: &str = r#"{"name":"Classic Daiquiri","description":"A crisp, balanced sour from Cuba.","ingredients":["60 ml white rum","25 ml fresh lime juice","15 ml simple syrup"],"instructions":["Add everything to a shaker with ice.","Shake hard for 12 seconds.","Double strain into a chilled coupe."],"prep_time_minutes":5,"vegan":true,"tip":"Chill the glass first."}"#;

fn recipe_fields() -> Arc<FieldSet> {
    Arc::new(
        FieldSet::from_specs([
            ("name", FieldKind::String),
            ("description", FieldKind::String),
            ("ingredients", FieldKind::StringArray),
            ("instructions", FieldKind::StringArray),
            ("prep_time_minutes", FieldKind::Number),
            ("vegan", FieldKind::Bool),
            ("tip", FieldKind::String),
        ])
        .unwrap(),
    )
}

/// Split into fragments the size a streaming model typically sends.
fn fragments(text: &str, size: usize) -> Vec<String> {
    text.chars()
        .collect::<Vec<_>>()
        .chunks(size)
        .map(|c| c.iter().collect())
        .collect()
}

fn bench_key_building(c: &mut Criterion) {
    let mut group = c.benchmark_group("key_building");
    let builder = FingerprintKeyBuilder::new().with_namespace("recipe").with_salt("v3");
    let params = json!({
        "ingredients": ["sugar", "lime", "rum", "mint", "soda"],
        "dietary": ["vegan"],
        "servings": 2,
        "options": {"strength": "medium", "glass": "highball"}
    });

    group.bench_function("build_key_from_json", |b| {
        b.iter(|| builder.build_key_from_json(black_box(&params)))
    });

    let image = vec![7u8; 256 * 1024];
    group.throughput(Throughput::Bytes(image.len() as u64));
    group.bench_function("digest_bytes_256k", |b| {
        b.iter(|| builder.digest_bytes(black_box(&image)))
    });
    group.finish();
}

fn bench_partial_extraction(c: &mut Criterion) {
    let mut group = c.benchmark_group("partial_extraction");
    let fields = recipe_fields();
    group.throughput(Throughput::Bytes(RESPONSE.len() as u64));

    for size in [8usize, 32, 128] {
        let parts = fragments(RESPONSE, size);
        group.bench_function(format!("fragments_of_{}", size), |b| {
            b.iter(|| {
                let mut partial = PartialResult::new(Arc::clone(&fields));
                let mut emitted = 0;
                for part in &parts {
                    emitted += partial.push(black_box(part)).len();
                }
                assert_eq!(emitted, 7);
            })
        });
    }

    group.bench_function("authoritative_parse", |b| {
        b.iter(|| parse_authoritative(black_box(RESPONSE)).unwrap())
    });
    group.finish();
}

criterion_group!(benches, bench_key_building, bench_partial_extraction);
criterion_main!(benches);
