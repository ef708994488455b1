//! G-code modal state, coordinate offsets, soft limits and the feedhold
//! state machine sitting on top of the planner and executor.
//!
//! `Machine` is the boundary a host or firmware front-end talks to: it
//! resolves a parsed G-code line's target through the active work offset
//! and G92 offset, checks soft limits on homed axes, and only then hands a
//! straight line to [`crate::planner::Planner`]. It also owns the
//! coarse-grained run state (including the soft/hard alarm split) and the
//! feedhold state machine that a cycle-stop or `!`/`~` request drives.

use crate::buffer::CommandKind;
use crate::error::{MachineError, StatusCode};
use crate::kinematics::{Axis, Kinematics};
use crate::planner::Planner;
use crate::executor::{Segment, SegmentExecutor, StepCorrectionConfig};
use crate::{AxisVector, MAX_AXES, MAX_MOTORS};

/// Number of work coordinate systems (G54-G59.3 in the standard table).
pub const NUM_COORDINATE_SYSTEMS: usize = 9;

/// Coarse run state of the machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MachineRunState {
    /// Powered on, not yet homed or cleared to run.
    Reset,
    /// Idle, ready to accept commands.
    Idle,
    /// Executing queued moves.
    Run,
    /// Feedhold has brought the machine to a stop.
    Hold,
    /// Homing cycle in progress.
    Homing,
    /// Alarmed. `hard` distinguishes a condition that requires a full reset
    /// (limit/estop/fault) from one the next motion command clears on its
    /// own (soft limit rejection, a single bad line).
    Alarm { hard: bool },
}

/// Feedhold progress, driven one step per call to [`Machine::tick`] while a
/// hold is requested or in effect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedholdState {
    Off,
    /// Hold requested; waiting for the in-flight segment to reach a clean
    /// boundary before deceleration starts.
    Sync,
    /// Deceleration profile has been committed to the run buffer.
    Plan,
    /// Executor is running the deceleration segments.
    Decel,
    /// Fully stopped.
    Hold,
    /// Resume requested; one more tick restores `Off` and motion continues.
    EndHold,
}

/// G-code modal groups relevant to how a line is resolved into a move.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MotionMode {
    Rapid,
    Feed,
    CwArc,
    CcwArc,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DistanceMode {
    Absolute,
    Incremental,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Units {
    Millimeters,
    Inches,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Plane {
    Xy,
    Xz,
    Yz,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpindleState {
    Off,
    Clockwise,
    CounterClockwise,
}

/// Coolant outputs, fired synchronously at a buffer boundary alongside the
/// spindle and offset commands (M7/M8/M9 in the standard table).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CoolantState {
    pub mist: bool,
    pub flood: bool,
}

/// The modal state a parsed G-code line is resolved against; persists
/// across lines until an explicit modal word changes it.
#[derive(Debug, Clone, Copy)]
pub struct ModalState {
    pub motion_mode: MotionMode,
    pub distance_mode: DistanceMode,
    pub units: Units,
    pub plane: Plane,
    pub coordinate_system: usize,
    pub spindle: SpindleState,
    pub spindle_speed: f64,
}

impl Default for ModalState {
    fn default() -> Self {
        ModalState {
            motion_mode: MotionMode::Rapid,
            distance_mode: DistanceMode::Absolute,
            units: Units::Millimeters,
            plane: Plane::Xy,
            coordinate_system: 0,
            spindle: SpindleState::Off,
            spindle_speed: 0.0,
        }
    }
}

/// Result of feeding one G-code target through the machine.
#[derive(Debug, Clone, Copy)]
pub enum TickOutcome {
    Idle,
    Segment(Segment),
}

/// The G-code front-end: modal state, work/G92 offsets, soft limits,
/// feedhold state machine and run state, sitting on top of a
/// [`Planner`]/[`SegmentExecutor`] pair.
pub struct Machine<const N: usize, K: Kinematics> {
    planner: Planner<N>,
    executor: SegmentExecutor,
    kinematics: K,
    axes: [Axis; MAX_AXES],
    state: MachineRunState,
    feedhold: FeedholdState,
    modal: ModalState,
    coolant: CoolantState,
    work_offsets: [AxisVector; NUM_COORDINATE_SYSTEMS],
    g92_offset: AxisVector,
    line_counter: u32,
}

impl<const N: usize, K: Kinematics> Machine<N, K> {
    pub fn new(kinematics: K, axes: [Axis; MAX_AXES]) -> Self {
        Machine {
            planner: Planner::new(axes),
            executor: SegmentExecutor::new(),
            kinematics,
            axes,
            state: MachineRunState::Reset,
            feedhold: FeedholdState::Off,
            modal: ModalState::default(),
            coolant: CoolantState::default(),
            work_offsets: [[0.0; MAX_AXES]; NUM_COORDINATE_SYSTEMS],
            g92_offset: [0.0; MAX_AXES],
            line_counter: 0,
        }
    }

    pub fn state(&self) -> MachineRunState {
        self.state
    }

    pub fn feedhold_state(&self) -> FeedholdState {
        self.feedhold
    }

    pub fn modal(&self) -> ModalState {
        self.modal
    }

    pub fn coolant(&self) -> CoolantState {
        self.coolant
    }

    pub fn set_modal(&mut self, modal: ModalState) {
        self.modal = modal;
    }

    pub fn set_correction_config(&mut self, config: StepCorrectionConfig) {
        self.executor.set_correction_config(config);
    }

    pub fn report_encoder_steps(&mut self, motor_steps: [f64; MAX_MOTORS]) {
        self.executor.report_encoder_steps(motor_steps);
    }

    /// Current axis-space position the planner considers "here".
    pub fn position(&self) -> AxisVector {
        self.planner.position()
    }

    fn active_offset(&self) -> AxisVector {
        let mut offset = self.work_offsets[self.modal.coordinate_system];
        for i in 0..MAX_AXES {
            offset[i] += self.g92_offset[i];
        }
        offset
    }

    /// Converts a work-space target into machine (absolute) space and
    /// checks it against soft limits on homed axes.
    fn resolve_target(&self, work_target: AxisVector) -> Result<AxisVector, MachineError> {
        let offset = self.active_offset();
        let mut machine_target = [0.0; MAX_AXES];
        for i in 0..MAX_AXES {
            machine_target[i] = work_target[i] + offset[i];
            let axis = &self.axes[i];
            if axis.homed && axis.soft_limits_enabled {
                if machine_target[i] < axis.travel_min || machine_target[i] > axis.travel_max {
                    return Err(MachineError::SoftLimitExceeded(i as u8));
                }
            }
        }
        Ok(machine_target)
    }

    fn guard_alarmed(&self) -> Result<(), MachineError> {
        if matches!(self.state, MachineRunState::Alarm { .. }) {
            return Err(MachineError::Alarmed);
        }
        Ok(())
    }

    /// Queues a feed-rate-controlled straight line to a work-space target.
    pub fn feed(&mut self, work_target: AxisVector, feedrate: f64) -> Result<(), MachineError> {
        self.guard_alarmed()?;
        let target = self.resolve_target(work_target)?;
        self.line_counter += 1;
        self.planner.aline(target, feedrate, self.line_counter)?;
        if self.state == MachineRunState::Idle {
            self.state = MachineRunState::Run;
        }
        Ok(())
    }

    /// Queues a rapid move, run at the binding axis's `velocity_max`.
    pub fn rapid(&mut self, work_target: AxisVector) -> Result<(), MachineError> {
        self.guard_alarmed()?;
        let target = self.resolve_target(work_target)?;
        let mut rapid_rate = f64::INFINITY;
        for axis in &self.axes {
            if axis.velocity_max > 0.0 {
                rapid_rate = rapid_rate.min(axis.velocity_max);
            }
        }
        if !rapid_rate.is_finite() {
            return Err(MachineError::AxisMissing);
        }
        self.line_counter += 1;
        self.planner.aline(target, rapid_rate, self.line_counter)?;
        if self.state == MachineRunState::Idle {
            self.state = MachineRunState::Run;
        }
        Ok(())
    }

    pub fn dwell(&mut self, seconds: f64) -> Result<(), MachineError> {
        self.guard_alarmed()?;
        self.line_counter += 1;
        self.planner.dwell(seconds, self.line_counter).map_err(MachineError::from)
    }

    pub fn command(&mut self, kind: crate::buffer::CommandKind, value: f64) -> Result<(), MachineError> {
        self.guard_alarmed()?;
        self.line_counter += 1;
        self.planner.command_queue(kind, value, self.line_counter).map_err(MachineError::from)
    }

    /// Sets the G92 offset so the current physical position reads as
    /// `reported_position` in work space, without moving anything.
    pub fn set_g92_offset(&mut self, reported_position: AxisVector) {
        let machine_position = self.planner.position();
        for i in 0..MAX_AXES {
            self.g92_offset[i] = machine_position[i] - self.work_offsets[self.modal.coordinate_system][i] - reported_position[i];
        }
    }

    pub fn clear_g92_offset(&mut self) {
        self.g92_offset = [0.0; MAX_AXES];
    }

    pub fn set_work_offset(&mut self, system: usize, offset: AxisVector) {
        if system < NUM_COORDINATE_SYSTEMS {
            self.work_offsets[system] = offset;
        }
    }

    /// Marks axes homed and resyncs the planner/executor to `position`
    /// without queuing a move, e.g. after a homing cycle completes.
    pub fn sync_after_homing(&mut self, position: AxisVector) {
        self.planner.set_position(position);
        let mut motor_steps = [0.0; MAX_MOTORS];
        self.kinematics.cartesian_to_motor_steps(&position, &mut motor_steps);
        self.executor.sync_position(position, motor_steps);
        if self.state == MachineRunState::Reset || self.state == MachineRunState::Homing {
            self.state = MachineRunState::Idle;
        }
    }

    pub fn begin_homing(&mut self) -> Result<(), MachineError> {
        self.guard_alarmed()?;
        self.state = MachineRunState::Homing;
        Ok(())
    }

    /// Raises an alarm. `hard` alarms (estop, limit fault, motor fault)
    /// require [`Machine::reset`]; soft alarms (a rejected line) clear the
    /// next time a command succeeds.
    pub fn alarm(&mut self, hard: bool) {
        self.state = MachineRunState::Alarm { hard };
        self.feedhold = FeedholdState::Off;
    }

    /// Clears a soft alarm, or a hard alarm once the underlying condition
    /// has actually been cleared by the caller (e.g. the estop line reads
    /// high again). Returns an error if called while the alarm is still
    /// hard and the caller hasn't asserted it's safe to do so.
    pub fn reset(&mut self, force_hard: bool) -> Result<(), StatusCode> {
        match self.state {
            MachineRunState::Alarm { hard } if hard && !force_hard => Err(StatusCode::MachineAlarmed),
            MachineRunState::Alarm { .. } => {
                self.state = MachineRunState::Idle;
                self.feedhold = FeedholdState::Off;
                Ok(())
            }
            _ => {
                self.state = MachineRunState::Idle;
                Ok(())
            }
        }
    }

    /// `!`: request a feedhold. No-op outside [`MachineRunState::Run`].
    pub fn request_feedhold(&mut self) {
        if self.state == MachineRunState::Run && self.feedhold == FeedholdState::Off {
            self.feedhold = FeedholdState::Sync;
        }
    }

    /// `~`: resume from a feedhold.
    pub fn request_resume(&mut self) {
        if self.feedhold == FeedholdState::Hold {
            self.feedhold = FeedholdState::EndHold;
        }
    }

    /// `%`: program stop. Clears the queue's synchronous-command side
    /// effects by draining to idle; does not alarm.
    pub fn program_stop(&mut self) {
        self.feedhold = FeedholdState::Off;
        self.state = MachineRunState::Idle;
    }

    /// Dispatches a synchronous command fired at the buffer boundary the
    /// executor just reached, applying its side effect to the machine's own
    /// modal state (spindle/coolant outputs, an offset-system switch synced
    /// to the queue, or a program stop).
    fn fire_command(&mut self, kind: CommandKind, value: f64) {
        match kind {
            CommandKind::SpindleSpeed => self.modal.spindle_speed = value,
            CommandKind::SpindleMode => {
                self.modal.spindle = if value > 0.0 {
                    SpindleState::Clockwise
                } else if value < 0.0 {
                    SpindleState::CounterClockwise
                } else {
                    SpindleState::Off
                };
            }
            CommandKind::CoolantMist => self.coolant.mist = value != 0.0,
            CommandKind::CoolantFlood => self.coolant.flood = value != 0.0,
            CommandKind::OffsetUpdate => {
                let system = value as usize;
                if system < NUM_COORDINATE_SYSTEMS {
                    self.modal.coordinate_system = system;
                }
            }
            CommandKind::ProgramStop => self.program_stop(),
        }
    }

    /// Advances the feedhold FSM by one step, committing a decel-to-zero
    /// profile to the in-flight move when `Plan` is reached and bringing the
    /// run buffer's queued successor back to a standing-start entry velocity
    /// once the decel finishes. Returns `true` if the caller should skip
    /// draining a segment this tick (the hold already has nothing left to
    /// do, or is still waiting on its own transition).
    fn advance_feedhold(&mut self) -> bool {
        match self.feedhold {
            FeedholdState::Off => false,
            FeedholdState::Sync => {
                self.feedhold = FeedholdState::Plan;
                true
            }
            FeedholdState::Plan => {
                if self.executor.is_moving() {
                    let jerk = self.planner.buffers.get(self.planner.buffers.run_index()).jerk;
                    self.executor.begin_feedhold_decel(jerk);
                    self.feedhold = FeedholdState::Decel;
                    false
                } else {
                    self.feedhold = FeedholdState::Hold;
                    self.state = MachineRunState::Hold;
                    true
                }
            }
            FeedholdState::Decel => false,
            FeedholdState::Hold => true,
            FeedholdState::EndHold => {
                self.feedhold = FeedholdState::Off;
                if self.state == MachineRunState::Hold {
                    self.state = MachineRunState::Run;
                }
                false
            }
        }
    }

    /// Drains one segment from the executor, advancing the feedhold state
    /// machine by one step whenever a hold is in progress. Returns
    /// [`TickOutcome::Idle`] when there is nothing queued to run right now.
    pub fn tick(&mut self) -> Result<TickOutcome, StatusCode> {
        if matches!(self.state, MachineRunState::Alarm { .. }) {
            return Err(StatusCode::MachineAlarmed);
        }
        if self.feedhold != FeedholdState::Off && self.advance_feedhold() {
            return Ok(TickOutcome::Idle);
        }
        let decelerating = self.feedhold == FeedholdState::Decel;

        match self.executor.next_segment(&mut self.planner.buffers, &self.kinematics) {
            Ok(Some(segment)) => {
                if let Some((kind, value)) = segment.fired_command {
                    self.fire_command(kind, value);
                }
                if decelerating && segment.is_last_segment_of_move {
                    self.feedhold = FeedholdState::Hold;
                    self.state = MachineRunState::Hold;
                    self.planner.restart_run_buffer_from_rest();
                } else if segment.is_last_segment_of_move && self.planner.buffers.is_queue_empty() && self.state == MachineRunState::Run {
                    self.state = MachineRunState::Idle;
                }
                Ok(TickOutcome::Segment(segment))
            }
            Ok(None) => {
                if decelerating {
                    self.feedhold = FeedholdState::Hold;
                    self.state = MachineRunState::Hold;
                    self.planner.restart_run_buffer_from_rest();
                } else if self.state == MachineRunState::Run {
                    self.state = MachineRunState::Idle;
                }
                Ok(TickOutcome::Idle)
            }
            Err(e) => {
                self.alarm(false);
                Err(e.into())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kinematics::{AxisId, AxisMode, CartesianKinematics};

    fn test_kinematics_and_axes() -> (CartesianKinematics, [Axis; MAX_AXES]) {
        let mut axes = [Axis::default(); MAX_AXES];
        for (i, a) in axes.iter_mut().take(3).enumerate() {
            a.mode = AxisMode::Standard;
            a.velocity_max = 200.0;
            a.feedrate_max = 200.0;
            a.jerk_max = 5_000_000.0;
            a.soft_limits_enabled = true;
            a.homed = true;
            a.travel_min = -10.0;
            a.travel_max = 500.0;
            let _ = i;
        }
        let mut k = CartesianKinematics::default();
        k.axes = axes;
        k.axis_of[0] = Some(AxisId::X);
        k.axis_of[1] = Some(AxisId::Y);
        k.axis_of[2] = Some(AxisId::Z);
        k.steps_per_unit = [80.0; MAX_MOTORS];
        (k, axes)
    }

    #[test]
    fn soft_limit_rejects_out_of_travel_target() {
        let (k, axes) = test_kinematics_and_axes();
        let mut machine: Machine<8, _> = Machine::new(k, axes);
        machine.state = MachineRunState::Idle;
        let mut target = [0.0; MAX_AXES];
        target[0] = 1000.0;
        let err = machine.feed(target, 50.0).unwrap_err();
        assert_eq!(err, MachineError::SoftLimitExceeded(0));
    }

    #[test]
    fn feedhold_decelerates_to_a_stop_short_of_the_target_then_resumes_from_rest() {
        let (k, axes) = test_kinematics_and_axes();
        let mut machine: Machine<8, _> = Machine::new(k, axes);
        machine.sync_after_homing([0.0; MAX_AXES]);
        let mut target = [0.0; MAX_AXES];
        target[0] = 100.0;
        machine.feed(target, 50.0).unwrap();
        assert_eq!(machine.state(), MachineRunState::Run);

        // Run a few segments so the move is well underway (nonzero
        // velocity, short of the target) before the hold is requested.
        let mut last_velocity = 0.0;
        for _ in 0..3 {
            if let TickOutcome::Segment(seg) = machine.tick().unwrap() {
                last_velocity = seg.velocity;
            }
        }
        assert!(last_velocity > 0.0);

        machine.request_feedhold();
        assert_eq!(machine.feedhold_state(), FeedholdState::Sync);

        let mut last_segment = None;
        for _ in 0..10_000 {
            if machine.feedhold_state() == FeedholdState::Hold {
                break;
            }
            if let TickOutcome::Segment(seg) = machine.tick().unwrap() {
                last_segment = Some(seg);
            }
        }
        assert_eq!(machine.feedhold_state(), FeedholdState::Hold);
        assert_eq!(machine.state(), MachineRunState::Hold);
        // The decel ramp's last segment reports (close to) zero velocity,
        // and the tool stopped well short of the commanded target.
        let stop_velocity = last_segment.expect("decel produced at least one segment").velocity;
        assert!(stop_velocity.abs() < 1.0, "velocity at hold was {stop_velocity}, expected near zero");
        assert!(machine.position()[0] > 0.0);
        assert!(machine.position()[0] < 100.0);

        machine.request_resume();
        machine.tick().unwrap();
        assert_eq!(machine.feedhold_state(), FeedholdState::Off);
        assert_eq!(machine.state(), MachineRunState::Run);

        // The remainder of the original move was dropped when the hold cut
        // it short, but whatever continues next must start from rest.
        target[0] = 200.0;
        machine.feed(target, 50.0).unwrap();
        let run_idx = machine.planner.buffers.run_index();
        assert_eq!(machine.planner.buffers.get(run_idx).entry_velocity, 0.0);
    }

    #[test]
    fn alarm_blocks_new_moves_until_reset() {
        let (k, axes) = test_kinematics_and_axes();
        let mut machine: Machine<8, _> = Machine::new(k, axes);
        machine.sync_after_homing([0.0; MAX_AXES]);
        machine.alarm(true);
        let mut target = [0.0; MAX_AXES];
        target[0] = 10.0;
        assert!(machine.feed(target, 10.0).is_err());
        assert!(machine.reset(false).is_err());
        machine.reset(true).unwrap();
        assert!(machine.feed(target, 10.0).is_ok());
    }
}
