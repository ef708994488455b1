//! # End-to-End Motion Integration Test
//!
//! Verifies the complete motion pipeline, from `cnc-core`'s planner/executor
//! to `stepper-hal`'s segment-level dispatcher. A planned move is sliced into
//! segments, each staged through `StepperDriver::prep_line` and committed by
//! `boundary_tick`, and the resulting motor positions are checked against the
//! planned target.

use cnc_core::kinematics::{Axis, AxisId, AxisMode, CartesianKinematics};
use cnc_core::{Planner, SegmentExecutor, MAX_AXES, MIN_SEGMENT_TIME, MAX_SEGMENT_TIME};
use stepper_hal::hw::{DmaCounter, DriverChip, DriverFault, Prescaler, SegmentTimer};
use stepper_hal::motor::MotorConfig;
use stepper_hal::motor_mgr::MotorMgr;
use stepper_hal::stepper_driver::{StepperDriver, TickOutcome};

#[derive(Default)]
struct MockTimer;
impl SegmentTimer for MockTimer {
    fn configure(&mut self, _prescaler: Prescaler, _period: u16) {}
    fn rescale_running_count(&mut self, _old: Prescaler, _new: Prescaler) {}
    fn stop(&mut self) {}
}

#[derive(Default)]
struct MockDma {
    remaining: u16,
}
impl DmaCounter for MockDma {
    fn reset(&mut self) {
        self.remaining = 0xFFFF;
    }
    fn read(&self) -> u16 {
        self.remaining
    }
}

#[derive(Default)]
struct MockDriver;
impl DriverChip for MockDriver {
    fn enable(&mut self) {}
    fn disable(&mut self) {}
    fn set_microsteps(&mut self, _microsteps: u16) {}
    fn set_current(&mut self, _milliamps: u16) {}
    fn poll_fault(&mut self) -> Option<DriverFault> {
        None
    }
}

fn linear_axis(velocity_max: f64, jerk_max: f64) -> Axis {
    Axis {
        mode: AxisMode::Standard,
        velocity_max,
        feedrate_max: velocity_max,
        jerk_max,
        radius: 0.0,
        travel_min: -1_000.0,
        travel_max: 1_000.0,
        soft_limits_enabled: false,
        homed: true,
    }
}

#[test]
fn test_full_move_pipeline() {
    // --- Kinematics: two motors, one per axis, 80 steps/mm each. ---
    let mut kinematics = CartesianKinematics::default();
    kinematics.axis_of[0] = Some(AxisId::X);
    kinematics.axis_of[1] = Some(AxisId::Y);
    kinematics.steps_per_unit[0] = 80.0;
    kinematics.steps_per_unit[1] = 80.0;
    let mut axes = [Axis::default(); MAX_AXES];
    axes[AxisId::X.ordinal()] = linear_axis(100.0, 10_000.0);
    axes[AxisId::Y.ordinal()] = linear_axis(100.0, 10_000.0);
    kinematics.axes = axes;

    // --- Plan a 10mm/5mm move, X forward / Y backward from a nonzero start. ---
    let mut planner: Planner<8> = Planner::new(kinematics.axes);
    planner.set_position([0.0, 1.25, 0.0, 0.0, 0.0, 0.0]); // Y starts at 100 steps
    planner.aline([10.0, 0.625, 0.0, 0.0, 0.0, 0.0], 50.0, 1).unwrap();

    // --- Stepper rig: two mock-backed motors. ---
    let mut mgr: MotorMgr<2, MockTimer, MockDma, MockDriver> = MotorMgr::new();
    mgr.install(0, MockTimer::default(), MockDma::default(), MockDriver::default(), MotorConfig::default()).unwrap();
    mgr.install(1, MockTimer::default(), MockDma::default(), MockDriver::default(), MotorConfig::default()).unwrap();
    let mut driver = StepperDriver::new(mgr);

    // --- Drive segments from the executor through prep_line/boundary_tick. ---
    let mut executor = SegmentExecutor::new();
    let mut segments_run = 0;
    loop {
        let Some(segment) = executor.next_segment(&mut planner.buffers, &kinematics).unwrap() else {
            break;
        };
        let half_steps = [
            (segment.motor_target_steps[0] * 2.0).round() as i64,
            (segment.motor_target_steps[1] * 2.0).round() as i64,
        ];
        driver.prep_line(segment.time, &half_steps, MIN_SEGMENT_TIME, MAX_SEGMENT_TIME).unwrap();
        match driver.boundary_tick(true) {
            TickOutcome::SegmentStarted { .. } => segments_run += 1,
            other => panic!("expected SegmentStarted, got {other:?}"),
        }
        if segment.is_last_segment_of_move {
            break;
        }
    }
    // One more tick ends the final segment and folds its DMA count in.
    driver.boundary_tick(true);

    assert!(segments_run > 0, "move should generate at least one segment");

    // 10mm @ 80 steps/mm = 800 steps on X; Y moves from 100 to 50 steps (-50).
    assert_eq!(driver.motors().commanded_steps(0).unwrap(), 800);
    assert_eq!(driver.motors().commanded_steps(1).unwrap(), 50);
}
