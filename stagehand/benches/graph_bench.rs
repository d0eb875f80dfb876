//! Benchmarks for task graph assembly.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use stagehand::pipeline::{recipe, Hook, Task, TaskGraph, TaskId, TaskRegistry};

/// The default recipe with `width` after-hooks on every backbone task, each
/// hooked task carrying one more after-hook of its own.
fn hooked_recipe(width: usize) -> (Vec<TaskId>, Vec<Hook>, TaskRegistry) {
    let backbone = recipe::parse_backbone(recipe::DEPLOY_BACKBONE).unwrap();
    let mut registry = recipe::builtin_registry().unwrap();
    let mut hooks = Vec::new();

    for (i, anchor) in backbone.iter().enumerate() {
        for j in 0..width {
            let hooked = TaskId::parse(&format!("hook{i}:task{j}")).unwrap();
            let nested = TaskId::parse(&format!("hook{i}:nested{j}")).unwrap();
            registry
                .register(Task::commands(hooked.clone(), ["true"]))
                .unwrap();
            registry
                .register(Task::commands(nested.clone(), ["true"]))
                .unwrap();
            hooks.push(Hook::after(anchor.clone(), hooked.clone()));
            hooks.push(Hook::after(hooked, nested));
        }
    }
    (backbone, hooks, registry)
}

fn graph_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("task_graph_build");
    for width in [1, 8, 64] {
        let (backbone, hooks, registry) = hooked_recipe(width);
        group.bench_with_input(BenchmarkId::from_parameter(width), &width, |b, _| {
            b.iter(|| TaskGraph::build(black_box(&backbone), black_box(&hooks), &registry).unwrap());
        });
    }
    group.finish();
}

criterion_group!(benches, graph_benchmark);
criterion_main!(benches);
