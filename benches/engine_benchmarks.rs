// Copyright 2025 Cowboy AI, LLC.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use tokio::runtime::Runtime;

use copf::emitter::{Emitter, FileWrite};
use copf::engine::{EngineConfig, SyncEngine};
use copf::ids::{CompletionId, FlowId};
use copf::spec::parse_sync;
use copf::sync_compile::compile_sync;
use copf::transport::ActionCompletion;

fn setup_runtime() -> Runtime {
    tokio::runtime::Builder::new_multi_thread().enable_all().build().unwrap()
}

fn completion(concept: &str, action: &str, variant: &str, flow: FlowId) -> ActionCompletion {
    ActionCompletion {
        id: CompletionId::new(),
        concept: concept.to_string(),
        action: action.to_string(),
        input: serde_json::json!({}),
        variant: variant.to_string(),
        output: serde_json::json!({ "y": 1 }),
        flow,
        parent: None,
        timestamp: 0,
    }
}

fn benchmark_on_completion_with_many_registered_syncs(c: &mut Criterion) {
    let rt = setup_runtime();

    let mut group = c.benchmark_group("engine_on_completion");
    for rule_count in [10, 100, 1_000].iter() {
        let engine = rt.block_on(async {
            let engine = SyncEngine::new(EngineConfig::default());
            for i in 0..*rule_count {
                let source = format!(
                    "sync R{i} when {{ Other{i}/f: [] => [y: ?v] }} then {{ B/g: [x: ?v] }}"
                );
                let ast = parse_sync(&source, "bench.sync").unwrap();
                engine.register_sync(compile_sync(&ast).unwrap()).await;
            }
            // One rule actually keyed on the completion we'll dispatch.
            let ast = parse_sync("sync Matching when { A/f: [] => [y: ?v] } then { B/g: [x: ?v] }", "bench.sync").unwrap();
            engine.register_sync(compile_sync(&ast).unwrap()).await;
            engine
        });

        group.bench_with_input(BenchmarkId::from_parameter(rule_count), rule_count, |b, _| {
            b.iter(|| {
                rt.block_on(async {
                    let c = completion("A", "f", "ok", FlowId::new());
                    black_box(engine.on_completion(c).await.unwrap())
                })
            });
        });
    }
    group.finish();
}

fn benchmark_emitter_write_idempotence(c: &mut Criterion) {
    let rt = setup_runtime();
    let dir = tempfile::tempdir().unwrap();
    let emitter = Emitter::new();
    let path = dir.path().join("a.ts");
    let content = "export const x = 1;".repeat(100);

    c.bench_function("emitter_repeated_write_hash_check", |b| {
        b.iter(|| {
            rt.block_on(async {
                let outcome = emitter
                    .write(FileWrite {
                        path: path.clone(),
                        content: content.as_bytes().to_vec(),
                        target: "typescript".to_string(),
                        concept: "Bench".to_string(),
                        sources: vec![],
                    })
                    .await
                    .unwrap();
                black_box(outcome)
            })
        });
    });
}

criterion_group!(benches, benchmark_on_completion_with_many_registered_syncs, benchmark_emitter_write_idempotence);
criterion_main!(benches);
