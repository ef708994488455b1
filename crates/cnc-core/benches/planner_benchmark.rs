use criterion::{black_box, criterion_group, criterion_main, Criterion};

use cnc_core::kinematics::{Axis, AxisId, AxisMode};
use cnc_core::{Planner, MAX_AXES};

fn xy_axes() -> [Axis; MAX_AXES] {
    let mut axes = [Axis::default(); MAX_AXES];
    let linear = Axis {
        mode: AxisMode::Standard,
        velocity_max: 100.0,
        feedrate_max: 100.0,
        jerk_max: 1_500.0,
        radius: 0.0,
        travel_min: -1_000.0,
        travel_max: 1_000.0,
        soft_limits_enabled: false,
        homed: true,
    };
    axes[AxisId::X.ordinal()] = linear;
    axes[AxisId::Y.ordinal()] = linear;
    axes[AxisId::Z.ordinal()] = linear;
    axes
}

fn benchmark_planner(c: &mut Criterion) {
    let axes = xy_axes();

    c.bench_function("plan_long_move", |b| {
        b.iter(|| {
            let mut planner: Planner<32> = Planner::new(axes);
            planner
                .aline(black_box([150.0, 50.0, 20.0, 0.0, 0.0, 0.0]), black_box(100.0), 1)
                .unwrap();
        })
    });

    c.bench_function("plan_and_replan_lookahead_chain", |b| {
        b.iter(|| {
            let mut planner: Planner<32> = Planner::new(axes);
            for i in 0..16 {
                let x = (i as f64) * 5.0;
                planner.aline(black_box([x, 0.0, 0.0, 0.0, 0.0, 0.0]), 100.0, i as u32).unwrap();
            }
        })
    });
}

criterion_group!(benches, benchmark_planner);
criterion_main!(benches);
