//! Segment-level dispatch (§4.5): the segment-boundary timer tick and the
//! lowest-priority "prepare the next segment" software interrupt.
//!
//! [`StepperDriver`] itself never touches a register; it sequences calls
//! into a [`MotorMgr`] and reports what happened so the caller (firmware ISR
//! or `sim`) can log it and re-request the executor.

use core::sync::atomic::{AtomicBool, Ordering};

use crate::hw::{DmaCounter, DriverChip, DriverFault, SegmentTimer};
use crate::motor_mgr::{MotorMgr, MotorMgrError};

/// Segment-timer tick rate used to convert a dwell's wall-clock seconds into
/// ticks (§10.6 "Dwell-counted step timer rate"): the dwell counter lives in
/// segment-timer ticks, not milliseconds, so its duration stays exact even
/// as the per-motor prescaler changes.
pub const DEFAULT_STEP_TIMER_HZ: u32 = 1_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrepLineError {
    /// `time` was NaN or infinite.
    NonFinite,
    /// `time` was below `MIN_SEGMENT_TIME`.
    TooShort,
    /// `time` was above `MAX_SEGMENT_TIME`.
    TooLong,
    Motor(MotorMgrError),
}

impl From<MotorMgrError> for PrepLineError {
    fn from(e: MotorMgrError) -> Self {
        PrepLineError::Motor(e)
    }
}

/// What happened on one boundary-timer tick (§4.5 "Boundary tick behavior").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Still counting down a dwell.
    Dwelling,
    /// Emergency stop observed; the loaded move was discarded.
    EstopCancelled,
    /// The next segment wasn't ready; timer stays at the default poll
    /// period and the executor has been (re-)requested.
    Polling,
    /// A motor is still energizing; waited without starting.
    WaitingForEnergize,
    /// The prepped segment was committed and the segment timer armed for
    /// `segment_ticks`.
    SegmentStarted { segment_ticks: u32 },
    /// A motor driver reported a fault; motion must feedhold and flush.
    DriverFault { motor: usize, fault: DriverFault },
}

/// Segment-level dispatcher. Generic over the number of motors `N` and the
/// hardware types `MotorMgr` is built from.
pub struct StepperDriver<const N: usize, TIMER, DMA, DRIVER> {
    motors: MotorMgr<N, TIMER, DMA, DRIVER>,
    /// Set by `prep_line`, cleared once the boundary tick consumes it.
    move_ready: bool,
    /// Set once `prep_line` has been called at least once for the upcoming
    /// segment (distinguishes "never prepared" from "prepared, not yet
    /// consumed").
    move_queued: bool,
    dwell_ticks_remaining: u32,
    step_timer_hz: u32,
    estop: bool,
    /// Test-and-set flag for the "request-exec" software interrupt (§5
    /// "Shared state"), guarded by disabling interrupts in the real ISR;
    /// here a plain atomic stands in since there is exactly one producer
    /// and one consumer in any given build.
    exec_requested: AtomicBool,
    /// External collaborator readiness: true once every motor being moved
    /// this segment has acknowledged its enable command.
    motors_energized: bool,
    is_dwell_segment: bool,
}

impl<const N: usize, TIMER, DMA, DRIVER> StepperDriver<N, TIMER, DMA, DRIVER>
where
    TIMER: SegmentTimer,
    DMA: DmaCounter,
    DRIVER: DriverChip,
{
    pub fn new(motors: MotorMgr<N, TIMER, DMA, DRIVER>) -> Self {
        StepperDriver {
            motors,
            move_ready: false,
            move_queued: false,
            dwell_ticks_remaining: 0,
            step_timer_hz: DEFAULT_STEP_TIMER_HZ,
            estop: false,
            exec_requested: AtomicBool::new(false),
            motors_energized: true,
            is_dwell_segment: false,
        }
    }

    pub fn motors(&self) -> &MotorMgr<N, TIMER, DMA, DRIVER> {
        &self.motors
    }

    pub fn motors_mut(&mut self) -> &mut MotorMgr<N, TIMER, DMA, DRIVER> {
        &mut self.motors
    }

    /// §4.5 `st_prep_line`: rejects out-of-range segment times, otherwise
    /// stages each motor's prep and marks the segment ready for the next
    /// boundary tick to load.
    pub fn prep_line(
        &mut self,
        time_seconds: f64,
        target_half_steps: &[i64; N],
        min_segment_time: f64,
        max_segment_time: f64,
    ) -> Result<(), PrepLineError> {
        if !time_seconds.is_finite() {
            return Err(PrepLineError::NonFinite);
        }
        if time_seconds < min_segment_time {
            return Err(PrepLineError::TooShort);
        }
        if time_seconds > max_segment_time {
            return Err(PrepLineError::TooLong);
        }
        for motor in 0..N {
            self.motors.prep_move(motor, time_seconds, target_half_steps[motor])?;
        }
        self.move_queued = true;
        self.move_ready = true;
        self.is_dwell_segment = false;
        Ok(())
    }

    /// Stages a dwell: no motor prep, just a tick countdown (§4.5 step 1,
    /// §10.6).
    pub fn prep_dwell(&mut self, seconds: f64) {
        self.dwell_ticks_remaining = (seconds * self.step_timer_hz as f64).round() as u32;
        self.move_queued = true;
        self.move_ready = true;
        self.is_dwell_segment = true;
    }

    pub fn trigger_estop(&mut self) {
        self.estop = true;
    }

    pub fn reset_estop(&mut self) {
        self.estop = false;
    }

    /// Test-and-sets the "prepare next segment" request. Returns `true` if
    /// this call newly armed it (the caller should invoke the executor
    /// exactly once), `false` if a request was already pending.
    pub fn request_exec(&self) -> bool {
        self.exec_requested.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire).is_ok()
    }

    fn clear_exec_request(&mut self) {
        self.exec_requested.store(false, Ordering::Release);
    }

    /// The segment-boundary timer tick (§4.5 "Boundary tick behavior",
    /// steps 1-7). `in_cycle` feeds `MotorMgr::rtc_callback`'s power-mode
    /// table; this driver does not itself own the RTC tick.
    pub fn boundary_tick(&mut self, in_cycle: bool) -> TickOutcome {
        // 1. Dwell countdown.
        if self.dwell_ticks_remaining > 0 {
            self.dwell_ticks_remaining -= 1;
            if self.dwell_ticks_remaining > 0 {
                return TickOutcome::Dwelling;
            }
        }

        // 2. End the previous segment on every motor.
        for motor in 0..N {
            let _ = self.motors.end_move(motor);
        }

        // 3. Emergency stop takes precedence over everything else.
        if self.estop {
            self.move_ready = false;
            self.move_queued = false;
            return TickOutcome::EstopCancelled;
        }

        // 4. Nothing prepared yet: request the executor, keep polling.
        if !self.move_ready {
            self.request_exec();
            return TickOutcome::Polling;
        }

        // 5. Motors still energizing.
        if !self.motors_energized {
            return TickOutcome::WaitingForEnergize;
        }

        // 6. Commit the prepared segment.
        if self.is_dwell_segment {
            self.move_ready = false;
            self.move_queued = false;
            return TickOutcome::Dwelling;
        }

        for motor in 0..N {
            let _ = self.motors.load_move(motor);
        }
        self.motors.rtc_callback(in_cycle);

        if let Some((motor, fault)) = self.motors.poll_faults() {
            self.move_ready = false;
            return TickOutcome::DriverFault { motor, fault };
        }

        self.move_ready = false;
        // 7. Ask the executor to prepare the next one (unless a dwell just started).
        self.request_exec();
        TickOutcome::SegmentStarted { segment_ticks: self.step_timer_hz }
    }

    /// Whether `boundary_tick` is still waiting on `prep_line`/`prep_dwell`.
    pub fn is_move_ready(&self) -> bool {
        self.move_ready
    }

    pub fn is_queued(&self) -> bool {
        self.move_queued
    }

    pub fn set_motors_energized(&mut self, energized: bool) {
        self.motors_energized = energized;
    }

    /// Drains a pending exec request, for the "software interrupt" side to
    /// call once it has actually prepared the next segment.
    pub fn take_exec_request(&mut self) -> bool {
        let pending = self.exec_requested.load(Ordering::Acquire);
        if pending {
            self.clear_exec_request();
        }
        pending
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hw::Prescaler;
    use crate::motor::MotorConfig;

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

    fn driver() -> StepperDriver<2, MockTimer, MockDma, MockDriver> {
        let mut mgr = MotorMgr::new();
        mgr.install(0, MockTimer::default(), MockDma::default(), MockDriver::default(), MotorConfig::default()).unwrap();
        mgr.install(1, MockTimer::default(), MockDma::default(), MockDriver::default(), MotorConfig::default()).unwrap();
        StepperDriver::new(mgr)
    }

    #[test]
    fn prep_line_rejects_out_of_range_time() {
        let mut d = driver();
        assert_eq!(d.prep_line(f64::NAN, &[0, 0], 0.0005, 0.050), Err(PrepLineError::NonFinite));
        assert_eq!(d.prep_line(0.0001, &[0, 0], 0.0005, 0.050), Err(PrepLineError::TooShort));
        assert_eq!(d.prep_line(1.0, &[0, 0], 0.0005, 0.050), Err(PrepLineError::TooLong));
    }

    #[test]
    fn boundary_tick_polls_when_nothing_prepared() {
        let mut d = driver();
        assert_eq!(d.boundary_tick(true), TickOutcome::Polling);
        assert!(d.take_exec_request());
    }

    #[test]
    fn boundary_tick_starts_prepared_segment() {
        let mut d = driver();
        d.prep_line(0.005, &[100, 200], 0.0005, 0.050).unwrap();
        match d.boundary_tick(true) {
            TickOutcome::SegmentStarted { .. } => {}
            other => panic!("expected SegmentStarted, got {other:?}"),
        }
        assert!(!d.is_move_ready());
    }

    #[test]
    fn estop_cancels_loaded_move() {
        let mut d = driver();
        d.prep_line(0.005, &[100, 200], 0.0005, 0.050).unwrap();
        d.trigger_estop();
        assert_eq!(d.boundary_tick(true), TickOutcome::EstopCancelled);
    }

    #[test]
    fn dwell_counts_down_before_releasing() {
        let mut d = driver();
        d.prep_dwell(0.003); // 3 ticks at the default 1 kHz step-timer rate
        assert_eq!(d.boundary_tick(true), TickOutcome::Dwelling);
        assert_eq!(d.boundary_tick(true), TickOutcome::Dwelling);
        assert_eq!(d.boundary_tick(true), TickOutcome::Dwelling);
    }

    #[test]
    fn exec_request_is_test_and_set() {
        let d = driver();
        assert!(d.request_exec());
        assert!(!d.request_exec());
    }
}
