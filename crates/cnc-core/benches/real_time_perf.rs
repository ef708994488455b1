use criterion::{black_box, criterion_group, criterion_main, Criterion};

use cnc_core::kinematics::{Axis, AxisId, AxisMode, CartesianKinematics};
use cnc_core::{Planner, SegmentExecutor, MAX_AXES};

fn kinematics() -> CartesianKinematics {
    let mut k = CartesianKinematics::default();
    k.axis_of[0] = Some(AxisId::X);
    k.axis_of[1] = Some(AxisId::Y);
    k.steps_per_unit[0] = 80.0;
    k.steps_per_unit[1] = 80.0;
    let mut axes = [Axis::default(); MAX_AXES];
    axes[AxisId::X.ordinal()] = Axis {
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
    axes[AxisId::Y.ordinal()] = axes[AxisId::X.ordinal()];
    k.axes = axes;
    k
}

/// Worst-case execution time of `SegmentExecutor::next_segment`, the call a
/// real segment-boundary timer tick would make.
fn bench_next_segment_wcet(c: &mut Criterion) {
    let kinematics = kinematics();

    c.bench_function("segment_executor_next_segment", |b| {
        b.iter(|| {
            let mut planner: Planner<32> = Planner::new(kinematics.axes);
            planner.aline(black_box([200.0, 200.0, 0.0, 0.0, 0.0, 0.0]), black_box(100.0), 1).unwrap();
            let mut executor = SegmentExecutor::new();
            let mut segments = 0;
            while executor.next_segment(&mut planner.buffers, &kinematics).unwrap().is_some() {
                segments += 1;
            }
            black_box(segments)
        })
    });
}

criterion_group!(benches, bench_next_segment_wcet);
criterion_main!(benches);
