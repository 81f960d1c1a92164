//! ECS benchmarks using criterion for historical comparison.

use std::hint::black_box;

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use slate_ecs::{Entity, World};

#[derive(Clone, Copy)]
struct Position {
    x: f32,
    y: f32,
    z: f32,
}

#[derive(Clone, Copy)]
struct Velocity {
    x: f32,
    y: f32,
    z: f32,
}

fn spawn_benchmarks(c: &mut Criterion) {
    let mut group = c.benchmark_group("spawn");

    for count in [100, 1000, 10000] {
        group.throughput(Throughput::Elements(count));

        group.bench_with_input(
            BenchmarkId::new("position_velocity", count),
            &count,
            |b, &count| {
                b.iter(|| {
                    let mut world = World::new();
                    for i in 0..count {
                        black_box(world.spawn((
                            Position {
                                x: i as f32,
                                y: 0.0,
                                z: 0.0,
                            },
                            Velocity {
                                x: 1.0,
                                y: 0.0,
                                z: 0.0,
                            },
                        )));
                    }
                });
            },
        );
    }

    group.finish();
}

fn component_access_benchmarks(c: &mut Criterion) {
    let mut group = c.benchmark_group("component_access");

    for count in [100, 1000, 10000] {
        group.throughput(Throughput::Elements(count));

        group.bench_with_input(BenchmarkId::new("get", count), &count, |b, &count| {
            let mut world = World::new();
            let entities: Vec<Entity> = (0..count)
                .map(|i| {
                    world.spawn((Position {
                        x: i as f32,
                        y: 0.0,
                        z: 0.0,
                    },))
                })
                .collect();

            b.iter(|| {
                for &entity in &entities {
                    black_box(world.get::<Position>(entity));
                }
            });
        });
    }

    group.finish();
}

fn view_benchmarks(c: &mut Criterion) {
    let mut group = c.benchmark_group("view");

    for count in [1000, 10000, 100_000] {
        group.throughput(Throughput::Elements(count));

        group.bench_with_input(BenchmarkId::new("iterate", count), &count, |b, &count| {
            let mut world = World::new();
            for i in 0..count {
                world.spawn((
                    Position {
                        x: i as f32,
                        y: 0.0,
                        z: 0.0,
                    },
                    Velocity {
                        x: 1.0,
                        y: 2.0,
                        z: 3.0,
                    },
                ));
            }

            b.iter(|| {
                let mut sum = 0.0f32;
                world.each::<(&Position, &Velocity), _>(|(pos, vel)| {
                    sum += pos.x + vel.x;
                });
                black_box(sum);
            });
        });

        group.bench_with_input(BenchmarkId::new("integrate", count), &count, |b, &count| {
            let mut world = World::new();
            for i in 0..count {
                world.spawn((
                    Position {
                        x: i as f32,
                        y: 0.0,
                        z: 0.0,
                    },
                    Velocity {
                        x: 1.0,
                        y: 2.0,
                        z: 3.0,
                    },
                ));
            }

            b.iter(|| {
                world.each_mut::<(&mut Position, &Velocity), _>(|(pos, vel)| {
                    pos.x += vel.x;
                    pos.y += vel.y;
                    pos.z += vel.z;
                });
            });
        });
    }

    group.finish();
}

fn despawn_benchmarks(c: &mut Criterion) {
    let mut group = c.benchmark_group("despawn");

    for count in [100, 1000, 10000] {
        group.throughput(Throughput::Elements(count));

        group.bench_with_input(BenchmarkId::new("interleaved", count), &count, |b, &count| {
            b.iter(|| {
                let mut world = World::new();
                let entities: Vec<Entity> = (0..count)
                    .map(|i| {
                        world.spawn((Position {
                            x: i as f32,
                            y: 0.0,
                            z: 0.0,
                        },))
                    })
                    .collect();
                // Destroy every other entity to exercise swap-with-last.
                for &entity in entities.iter().step_by(2) {
                    world.despawn(entity);
                }
                black_box(world.entity_count());
            });
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    spawn_benchmarks,
    component_access_benchmarks,
    view_benchmarks,
    despawn_benchmarks
);
criterion_main!(benches);
