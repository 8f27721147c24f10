use std::hint::black_box;
use std::sync::Arc;
use std::time::Instant;

use regionflow_common::{
    CellLoadingConfig, EntityId, ManualClock, Position, RegionConfig, WorldId,
};
use regionflow_region::{InMemoryCells, RegionManager};

fn make_manager(region_count: usize, spacing: f64) -> RegionManager {
    let config = RegionConfig {
        max_active_regions: region_count.max(1),
        ..RegionConfig::default()
    };
    let manager = RegionManager::new(
        config,
        CellLoadingConfig::default(),
        Arc::new(ManualClock::new()),
        Arc::new(InMemoryCells::new()),
    );
    let side = (region_count as f64).sqrt().ceil() as usize;
    for i in 0..region_count {
        let x = (i % side) as f64 * spacing;
        let z = (i / side) as f64 * spacing;
        let _ = manager.create_new(&Position::new(WorldId(0), x, 64.0, z));
    }
    manager
}

fn bench_find_nearest(region_count: usize, iterations: usize) {
    let manager = make_manager(region_count, 1024.0);
    let start = Instant::now();
    for i in 0..iterations {
        let p = Position::new(WorldId(0), (i % 5000) as f64, 64.0, (i % 3000) as f64);
        let _ = black_box(manager.find_nearest(black_box(&p)));
    }
    let elapsed = start.elapsed();
    let per_iter = elapsed / iterations as u32;
    println!(
        "  find_nearest ({region_count} regions, {iterations} iters): {per_iter:?}/iter, total {elapsed:?}"
    );
}

fn bench_find_or_create(region_count: usize, iterations: usize) {
    let manager = make_manager(region_count, 1024.0);
    let start = Instant::now();
    for i in 0..iterations {
        let p = Position::new(WorldId(0), (i * 37 % 8000) as f64, 64.0, (i * 11 % 8000) as f64);
        let _ = black_box(manager.find_or_create(black_box(&p)));
    }
    let elapsed = start.elapsed();
    let per_iter = elapsed / iterations as u32;
    println!(
        "  find_or_create ({region_count} regions, {iterations} iters): {per_iter:?}/iter, total {elapsed:?}"
    );
}

fn bench_optimize(region_count: usize, iterations: usize) {
    let start = Instant::now();
    for _ in 0..iterations {
        let manager = make_manager(region_count, 512.0);
        for region in manager.list_regions() {
            let _ = manager.add_occupant(EntityId::new(), region.id, &region.center);
        }
        let _ = black_box(manager.optimize());
    }
    let elapsed = start.elapsed();
    let per_iter = elapsed / iterations as u32;
    println!(
        "  optimize ({region_count} regions, {iterations} iters): {per_iter:?}/iter, total {elapsed:?}"
    );
}

fn main() {
    println!("=== Region Placement Benchmarks ===\n");

    println!("Nearest lookup:");
    bench_find_nearest(10, 100_000);
    bench_find_nearest(50, 100_000);
    bench_find_nearest(500, 10_000);

    println!("\nFind or create:");
    bench_find_or_create(50, 10_000);
    bench_find_or_create(500, 10_000);

    println!("\nMerge pass:");
    bench_optimize(50, 100);
    bench_optimize(200, 10);

    println!("\n=== Done ===");
}
