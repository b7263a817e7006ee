use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use subspace_core::prelude::*;

/// A ground plane and a grid of spheres resting on it
fn pile(count: usize) -> World {
    let mut world = World::with_physics(WorldConfig::default());
    let root = world.root();
    world
        .spawn_in(root, ObjectDesc::named("ground").with_geometry(Geometry::new(Shape::ground())))
        .unwrap();
    world.enable_collisions().unwrap();

    let side = (count as f64).sqrt().ceil() as usize;
    for i in 0..count {
        let loc = DVec3::new((i % side) as f64 * 1.5, (i / side) as f64 * 1.5, 0.6);
        let ball = world
            .spawn_in(
                root,
                ObjectDesc::new()
                    .with_locator(Locator::engine(Pose::from_loc(loc), Inertia::new(1.0, 0.1)))
                    .with_geometry(Geometry::new(Shape::sphere(0.5))),
            )
            .unwrap();
        world.activate(ball).unwrap();
    }
    world
}

fn bench_tick(c: &mut Criterion) {
    let mut group = c.benchmark_group("tick");
    for count in [16, 64, 256] {
        group.bench_with_input(BenchmarkId::from_parameter(count), &count, |b, &count| {
            let mut world = pile(count);
            b.iter(|| world.tick(black_box(1.0 / 60.0)).unwrap());
        });
    }
    group.finish();
}

fn bench_snapshot(c: &mut Criterion) {
    let world = pile(64);
    c.bench_function("write_snapshot", |b| {
        b.iter(|| world.write_snapshot(world.root(), subspace_core::record::PropertyMask::ALL))
    });
}

criterion_group!(benches, bench_tick, bench_snapshot);
criterion_main!(benches);
