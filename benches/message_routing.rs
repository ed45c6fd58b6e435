//! Routing hot-path benchmarks
//!
//! Measures queue operations, selection scoring, and capability lookup,
//! the three operations on every delivery's critical path.

use std::hint::black_box;

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};

use agentmesh::domain_types::{AgentId, CapabilityName, CostScore, LoadPercent, Reliability};
use agentmesh::events::EventBus;
use agentmesh::registry::AgentRegistry;
use agentmesh::router::{PriorityQueues, SelectionPolicy, selection};
use agentmesh::types::agent::{AgentProfile, Capability, CapabilityCategory};
use agentmesh::types::message::MessagePriority;

fn profile(index: usize, cap: &str) -> AgentProfile {
    let mut profile = AgentProfile::new(
        AgentId::try_new(format!("agent-{index}")).unwrap(),
        "worker",
        vec![Capability {
            id: format!("cap-{cap}"),
            name: CapabilityName::try_new(cap.to_string()).unwrap(),
            description: String::new(),
            category: CapabilityCategory::Analysis,
            cost: CostScore::try_new(10.0).unwrap(),
            reliability: Reliability::try_new(0.9).unwrap(),
            version: "1.0".to_string(),
            tags: vec![],
            input_schema: None,
            output_schema: None,
        }],
    );
    profile.metadata.load = LoadPercent::try_new(u8::try_from(index % 100).unwrap()).unwrap();
    profile
}

fn bench_queue_operations(c: &mut Criterion) {
    let mut group = c.benchmark_group("priority_queue");
    for size in [100usize, 1000, 10_000] {
        group.throughput(Throughput::Elements(size as u64));
        group.bench_with_input(BenchmarkId::new("push_pop", size), &size, |b, &size| {
            b.iter(|| {
                let queues = PriorityQueues::new(size);
                for i in 0..size {
                    let priority = match i % 4 {
                        0 => MessagePriority::Urgent,
                        1 => MessagePriority::High,
                        2 => MessagePriority::Normal,
                        _ => MessagePriority::Low,
                    };
                    queues.push(priority, i).unwrap();
                }
                while let Some(entry) = queues.pop_highest() {
                    black_box(entry);
                }
            });
        });
    }
    group.finish();
}

fn bench_selection(c: &mut Criterion) {
    let mut group = c.benchmark_group("selection");
    let capability = CapabilityName::try_new("compute".to_string()).unwrap();
    for count in [2usize, 10, 100] {
        let candidates: Vec<AgentProfile> = (0..count).map(|i| profile(i, "compute")).collect();
        for policy in [
            SelectionPolicy::BestMatch,
            SelectionPolicy::RoundRobin,
            SelectionPolicy::LeastLoaded,
        ] {
            group.bench_with_input(
                BenchmarkId::new(format!("{policy:?}"), count),
                &candidates,
                |b, candidates| {
                    b.iter(|| {
                        black_box(selection::select(policy, &capability, candidates));
                    });
                },
            );
        }
    }
    group.finish();
}

fn bench_capability_lookup(c: &mut Criterion) {
    let mut group = c.benchmark_group("registry_lookup");
    for agents in [10usize, 100, 1000] {
        let registry = AgentRegistry::new(EventBus::new());
        for i in 0..agents {
            registry.register(profile(i, "compute")).unwrap();
        }
        let capability = CapabilityName::try_new("compute".to_string()).unwrap();
        group.throughput(Throughput::Elements(1));
        group.bench_with_input(
            BenchmarkId::new("find_by_capability", agents),
            &registry,
            |b, registry| {
                b.iter(|| {
                    black_box(registry.find_by_capability(&capability));
                });
            },
        );
    }
    group.finish();
}

criterion_group!(
    benches,
    bench_queue_operations,
    bench_selection,
    bench_capability_lookup
);
criterion_main!(benches);
