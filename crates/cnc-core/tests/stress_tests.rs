//! Stress tests for the planner/executor under queue pressure, high feedrates
//! and long runs of small segments.

use cnc_core::kinematics::{Axis, AxisId, AxisMode, CartesianKinematics};
use cnc_core::{Planner, PlannerError, SegmentExecutor, MAX_AXES};

fn linear_axis(velocity_max: f64, jerk_max: f64) -> Axis {
    Axis {
        mode: AxisMode::Standard,
        velocity_max,
        feedrate_max: velocity_max,
        jerk_max,
        radius: 0.0,
        travel_min: -10_000.0,
        travel_max: 10_000.0,
        soft_limits_enabled: false,
        homed: true,
    }
}

fn xy_kinematics(velocity_max: f64, jerk_max: f64) -> CartesianKinematics {
    let mut k = CartesianKinematics::default();
    k.axis_of[0] = Some(AxisId::X);
    k.axis_of[1] = Some(AxisId::Y);
    k.steps_per_unit[0] = 80.0;
    k.steps_per_unit[1] = 80.0;
    let mut axes = [Axis::default(); MAX_AXES];
    axes[AxisId::X.ordinal()] = linear_axis(velocity_max, jerk_max);
    axes[AxisId::Y.ordinal()] = linear_axis(velocity_max, jerk_max);
    k.axes = axes;
    k
}

#[test]
fn test_queue_full_error() {
    let kinematics = xy_kinematics(800.0, 1_000_000.0);
    let mut planner: Planner<16> = Planner::new(kinematics.axes);

    // The ring holds 16 slots; queuing more alines than that without
    // draining must report `QueueFull` rather than overwrite a live slot.
    for i in 1..=32u32 {
        let target = [i as f64 * 0.1, 0.0, 0.0, 0.0, 0.0, 0.0];
        let result = planner.aline(target, 800.0, i);
        if i > 16 {
            assert_eq!(result, Err(PlannerError::QueueFull));
        } else {
            assert!(result.is_ok(), "move {i} should queue");
        }
    }
}

#[test]
fn test_high_feedrate_segment_times_stay_in_bounds() {
    // A fast, long move: velocity/jerk pushed well past typical feeds to
    // make sure segment durations still clamp into
    // `[MIN_SEGMENT_TIME, MAX_SEGMENT_TIME]` rather than degenerating.
    let kinematics = xy_kinematics(2_500.0, 200_000_000.0);
    let mut planner: Planner<8> = Planner::new(kinematics.axes);
    planner.aline([200.0, 0.0, 0.0, 0.0, 0.0, 0.0], 2_500.0, 1).unwrap();

    let mut executor = SegmentExecutor::new();
    let mut min_dt = f64::INFINITY;
    let mut max_velocity = 0.0_f64;

    while let Some(segment) = executor.next_segment(&mut planner.buffers, &kinematics).unwrap() {
        assert!(segment.time.is_finite() && segment.time > 0.0, "segment time must not be zero or non-finite");
        min_dt = min_dt.min(segment.time);
        max_velocity = max_velocity.max(segment.velocity);
        if segment.is_last_segment_of_move {
            break;
        }
    }

    assert!(min_dt >= cnc_core::MIN_SEGMENT_TIME - 1e-9);
    assert!(min_dt <= cnc_core::MAX_SEGMENT_TIME + 1e-9);
    // Cruise velocity should approach the feedrate ceiling on a move this long.
    assert!(max_velocity > 2_000.0, "expected to reach cruise, got max velocity {max_velocity}");
}

#[test]
fn test_many_small_segments_preserve_cornering_speed() {
    // Approximate a circular arc with many short chords. A generous junction
    // deviation should let the planner carry speed through most corners
    // instead of braking to a near-stop between every segment.
    let kinematics = xy_kinematics(100.0, 10_000.0);
    let mut planner: Planner<32> = Planner::new(kinematics.axes);
    planner.set_junction_deviation(1.0);

    let segments = 64;
    let radius = 50.0;
    let mut near_stops = 0;

    for i in 1..=segments {
        let angle = (i as f64 / segments as f64) * 2.0 * core::f64::consts::PI;
        let target = [radius * angle.cos(), radius * angle.sin(), 0.0, 0.0, 0.0, 0.0];
        planner.aline(target, 100.0, i as u32).unwrap();

        let mut executor = SegmentExecutor::new();
        let mut first_velocity = None;
        while let Some(segment) = executor.next_segment(&mut planner.buffers, &kinematics).unwrap() {
            if first_velocity.is_none() {
                first_velocity = Some(segment.velocity);
            }
            if segment.is_last_segment_of_move {
                break;
            }
        }

        if i > 1 && first_velocity.map(|v| v < 5.0).unwrap_or(true) {
            near_stops += 1;
        }
    }

    assert!(near_stops < segments / 4, "planner braked to near-zero at {near_stops}/{segments} corners");
}
