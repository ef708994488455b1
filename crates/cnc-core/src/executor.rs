//! Segment executor.
//!
//! Slices the run buffer's head/body/tail phases into fixed-time segments
//! on a jerk-limited quintic velocity curve, and nudges each segment's
//! per-motor step target toward the latest encoder reading within a bounded
//! correction window. Segments are produced one at a time from
//! [`SegmentExecutor::next_segment`] so the caller (an RTC tick, a
//! simulation loop, or a test) drives the pace.

use crate::buffer::{BufferPool, CommandKind, Move};
use crate::error::ExecutorError;
use crate::kinematics::Kinematics;
use crate::planner::accel_distance;
use crate::{
    AxisVector, MAX_AXES, MAX_MOTORS, MAX_SEGMENT_TIME, MIN_LINE_LENGTH, MIN_SEGMENT_TIME, NOM_SEGMENT_TIME,
    STEP_CORRECTION_FACTOR, STEP_CORRECTION_HOLDOFF, STEP_CORRECTION_MAX, STEP_CORRECTION_THRESHOLD,
};

#[cfg(not(feature = "std"))]
fn ceilf(v: f64) -> f64 {
    libm::ceil(v)
}
#[cfg(feature = "std")]
fn ceilf(v: f64) -> f64 {
    v.ceil()
}

/// A small compensated accumulator. Plain summation when the
/// `kahan-summation` feature is off (the default, cheapest path for an
/// interrupt context); Kahan-compensated when it's on, trading a handful of
/// extra cycles per segment for long-run accuracy of the forward-difference
/// state over a long move.
#[derive(Debug, Clone, Copy, Default)]
struct CompensatedAccumulator {
    sum: f64,
    #[cfg_attr(not(feature = "kahan-summation"), allow(dead_code))]
    carry: f64,
}

impl CompensatedAccumulator {
    fn new(value: f64) -> Self {
        CompensatedAccumulator { sum: value, carry: 0.0 }
    }

    fn value(&self) -> f64 {
        self.sum
    }

    fn add(&mut self, x: f64) {
        #[cfg(feature = "kahan-summation")]
        {
            let y = x - self.carry;
            let t = self.sum + y;
            self.carry = (t - self.sum) - y;
            self.sum = t;
        }
        #[cfg(not(feature = "kahan-summation"))]
        {
            self.sum += x;
        }
    }
}

fn quintic_ease(t: f64, vi: f64, vt: f64) -> f64 {
    let delta = vt - vi;
    let t2 = t * t;
    let t3 = t2 * t;
    let t4 = t2 * t2;
    let t5 = t4 * t;
    vi + delta * (10.0 * t3 - 15.0 * t4 + 6.0 * t5)
}

/// Forward-difference state for a degree-5 (quintic) velocity ramp from
/// `vi` to `vt`, smoothstep-shaped so velocity and acceleration are
/// continuous at both ends. Sampling the polynomial directly costs a
/// handful of multiplies per segment; the forward-difference recurrence
/// reduces every sample after the first to four additions, which is the
/// point on hardware with no FPU.
#[derive(Debug, Clone, Copy)]
struct ForwardDiffState {
    v: CompensatedAccumulator,
    d: [CompensatedAccumulator; 4],
    d5: f64,
}

impl ForwardDiffState {
    /// Builds the initial value and the five forward differences for a
    /// ramp divided into `segments` steps, midpoint-sampled (the first
    /// velocity [`Self::sample`] returns corresponds to `t = 0.5 /
    /// segments`, the center of the first segment rather than its leading
    /// edge).
    fn new(vi: f64, vt: f64, segments: u32) -> Self {
        let h = 1.0 / segments as f64;
        let t0 = h / 2.0;

        let mut samples = [0.0f64; 6];
        for (i, s) in samples.iter_mut().enumerate() {
            *s = quintic_ease(t0 + i as f64 * h, vi, vt);
        }
        let v0 = samples[0];

        // Newton forward-difference table: differencing the six samples
        // five times leaves the five forward differences we need, in order.
        let mut row = samples;
        let mut len = 6usize;
        let mut diffs = [0.0f64; 5];
        for diff in diffs.iter_mut() {
            for i in 0..len - 1 {
                row[i] = row[i + 1] - row[i];
            }
            len -= 1;
            *diff = row[0];
        }

        ForwardDiffState {
            v: CompensatedAccumulator::new(v0),
            d: [
                CompensatedAccumulator::new(diffs[0]),
                CompensatedAccumulator::new(diffs[1]),
                CompensatedAccumulator::new(diffs[2]),
                CompensatedAccumulator::new(diffs[3]),
            ],
            d5: diffs[4],
        }
    }

    /// The velocity [`Self::sample`] last returned (or the ramp's initial
    /// velocity if it hasn't been sampled yet), without advancing state.
    fn current_velocity(&self) -> f64 {
        self.v.value()
    }

    fn sample(&mut self) -> f64 {
        let v = self.v.value();
        let d1 = self.d[0].value();
        let d2 = self.d[1].value();
        let d3 = self.d[2].value();
        let d4 = self.d[3].value();
        self.v.add(d1);
        self.d[0].add(d2);
        self.d[1].add(d3);
        self.d[2].add(d4);
        self.d[3].add(self.d5);
        v
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PhaseKind {
    Head,
    Body,
    Tail,
}

/// Tracks progress through the (up to three) phases of the buffer currently
/// being stepped.
struct MoveCursor {
    buffer_idx: usize,
    start_position: AxisVector,
    phases: [(PhaseKind, f64, f64, f64); 3],
    phase_idx: usize,
    distance_before_phase: f64,
    cumulative_distance: f64,
    fwd: ForwardDiffState,
    dt: f64,
    segments_remaining: u32,
}

impl MoveCursor {
    /// Searches forward from `phases[start_idx]` for the next phase with
    /// non-negligible length, accumulating the skipped phases' lengths into
    /// `distance_before_phase` so the running total stays correct. Returns
    /// `false` once every remaining phase has been exhausted.
    fn enter_phase_from(&mut self, start_idx: usize) -> bool {
        let mut idx = start_idx;
        while idx < self.phases.len() {
            let (_, length, vi, vt) = self.phases[idx];
            if length <= MIN_LINE_LENGTH {
                self.distance_before_phase += length;
                idx += 1;
                continue;
            }
            let avg_v = (vi + vt) / 2.0;
            let phase_time = if avg_v > 0.0 { length / avg_v } else { NOM_SEGMENT_TIME };
            let segments = clamp_segment_count(phase_time);
            self.phase_idx = idx;
            self.dt = phase_time / segments as f64;
            self.segments_remaining = segments;
            self.cumulative_distance = 0.0;
            self.fwd = ForwardDiffState::new(vi, vt, segments);
            return true;
        }
        false
    }

    fn current_kind(&self) -> PhaseKind {
        self.phases[self.phase_idx].0
    }
}

/// Tunable bounds for the encoder-based step correction applied per motor
/// each segment.
#[derive(Debug, Clone, Copy)]
pub struct StepCorrectionConfig {
    /// Following error (in half-steps) below which no correction is applied.
    pub threshold: f64,
    /// Fraction of the following error applied as correction each segment.
    pub factor: f64,
    /// Largest correction (half-steps) applied in a single segment.
    pub max_correction: f64,
    /// Segments to wait after applying a correction before applying another.
    pub holdoff: u32,
}

impl Default for StepCorrectionConfig {
    fn default() -> Self {
        StepCorrectionConfig {
            threshold: STEP_CORRECTION_THRESHOLD,
            factor: STEP_CORRECTION_FACTOR,
            max_correction: STEP_CORRECTION_MAX,
            holdoff: STEP_CORRECTION_HOLDOFF,
        }
    }
}

/// One fixed-time slice of motion: a per-motor step-space target to reach
/// by the end of `time` seconds, plus enough context for the caller to
/// report progress and fire synchronous commands.
#[derive(Debug, Clone, Copy)]
pub struct Segment {
    pub motor_target_steps: [f64; MAX_MOTORS],
    pub time: f64,
    pub velocity: f64,
    pub line_number: u32,
    pub is_last_segment_of_move: bool,
    pub fired_command: Option<(CommandKind, f64)>,
    pub dwell_seconds: Option<f64>,
}

fn clamp_segment_count(phase_time: f64) -> u32 {
    if phase_time <= 0.0 {
        return 1;
    }
    let mut segments = ceilf(phase_time / NOM_SEGMENT_TIME).max(1.0) as u32;
    let mut dt = phase_time / segments as f64;
    if dt > MAX_SEGMENT_TIME {
        segments = ceilf(phase_time / MAX_SEGMENT_TIME).max(1.0) as u32;
        dt = phase_time / segments as f64;
    }
    if dt < MIN_SEGMENT_TIME && segments > 1 {
        segments = ((phase_time / MIN_SEGMENT_TIME).max(1.0)) as u32;
    }
    segments.max(1)
}

/// Slices the run buffer into segments and applies per-motor step
/// correction against encoder feedback.
pub struct SegmentExecutor {
    position: AxisVector,
    cursor: Option<MoveCursor>,
    motor_ideal_steps: [f64; MAX_MOTORS],
    motor_corrected_steps: [f64; MAX_MOTORS],
    /// Target step count the executor last committed to, held back one
    /// segment behind `motor_ideal_steps` so the error computed each
    /// segment is against the count that should have physically completed
    /// one segment ago, not the freshly-computed target the motor hasn't
    /// had time to reach yet.
    motor_commanded_steps: [f64; MAX_MOTORS],
    encoder_steps: [f64; MAX_MOTORS],
    holdoff: [u32; MAX_MOTORS],
    correction: StepCorrectionConfig,
}

impl Default for SegmentExecutor {
    fn default() -> Self {
        SegmentExecutor {
            position: [0.0; MAX_AXES],
            cursor: None,
            motor_ideal_steps: [0.0; MAX_MOTORS],
            motor_corrected_steps: [0.0; MAX_MOTORS],
            motor_commanded_steps: [0.0; MAX_MOTORS],
            encoder_steps: [0.0; MAX_MOTORS],
            holdoff: [0; MAX_MOTORS],
            correction: StepCorrectionConfig::default(),
        }
    }
}

impl SegmentExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn position(&self) -> AxisVector {
        self.position
    }

    pub fn set_correction_config(&mut self, config: StepCorrectionConfig) {
        self.correction = config;
    }

    /// Seeds the axis position and motor step accumulators, used once at
    /// startup or after a homing cycle moves the machine without going
    /// through the planner.
    pub fn sync_position(&mut self, axis_position: AxisVector, motor_steps: [f64; MAX_MOTORS]) {
        self.position = axis_position;
        self.motor_ideal_steps = motor_steps;
        self.motor_corrected_steps = motor_steps;
        self.motor_commanded_steps = motor_steps;
        self.encoder_steps = motor_steps;
    }

    /// Whether a move is actively being stepped through right now, as
    /// opposed to the executor sitting idle with (at most) further moves
    /// queued but not yet started.
    pub fn is_moving(&self) -> bool {
        self.cursor.is_some()
    }

    /// Collapses whatever's left of the in-flight move into a single
    /// jerk-limited ramp from the current velocity down to zero, run over
    /// whatever distance remains in the move or the ramp's own stopping
    /// distance, whichever is shorter. A no-op if nothing is in motion.
    /// Leaves the cursor positioned so the next [`Self::next_segment`] call
    /// resumes stepping the new ramp and reports the move complete once it
    /// bottoms out at zero, even though the commanded target was never
    /// reached.
    pub fn begin_feedhold_decel(&mut self, jerk: f64) {
        let Some(cursor) = self.cursor.as_mut() else {
            return;
        };
        let vi = cursor.fwd.current_velocity();
        if vi <= 0.0 || jerk <= 0.0 {
            return;
        }

        let mut remaining = cursor.phases[cursor.phase_idx].1 - cursor.cumulative_distance;
        for phase in cursor.phases.iter().skip(cursor.phase_idx + 1) {
            remaining += phase.1;
        }
        remaining = remaining.max(0.0);

        let stop_distance = accel_distance(vi, jerk);
        let distance = stop_distance.min(remaining).max(MIN_LINE_LENGTH);
        let phase_time = 2.0 * distance / vi;
        let segments = clamp_segment_count(phase_time);

        cursor.phases[cursor.phase_idx] = (PhaseKind::Tail, cursor.cumulative_distance + distance, vi, 0.0);
        for phase in cursor.phases.iter_mut().skip(cursor.phase_idx + 1) {
            *phase = (PhaseKind::Tail, 0.0, 0.0, 0.0);
        }
        cursor.dt = phase_time / segments as f64;
        cursor.segments_remaining = segments;
        cursor.fwd = ForwardDiffState::new(vi, 0.0, segments);
    }

    /// Reports the latest encoder reading (in steps) for use by the next
    /// segment's correction pass.
    pub fn report_encoder_steps(&mut self, motor_steps: [f64; MAX_MOTORS]) {
        self.encoder_steps = motor_steps;
    }

    /// Produces the next segment, pulling a fresh run buffer from `buffers`
    /// once the current one is exhausted. `Ok(None)` means the run queue is
    /// empty; there is nothing to execute right now.
    pub fn next_segment<const N: usize, K: Kinematics>(
        &mut self,
        buffers: &mut BufferPool<N>,
        kinematics: &K,
    ) -> Result<Option<Segment>, ExecutorError> {
        if self.cursor.is_none() {
            if let Some(immediate) = self.start_next_move(buffers)? {
                return Ok(Some(immediate));
            }
            if self.cursor.is_none() {
                return Ok(None);
            }
        }

        let cursor = self.cursor.as_mut().expect("checked above");
        let v = cursor.fwd.sample();
        let dt = cursor.dt;
        let distance_delta = (v * dt).max(0.0);
        cursor.cumulative_distance += distance_delta;
        cursor.segments_remaining -= 1;
        let phase_done = cursor.segments_remaining == 0;
        let total_distance = cursor.distance_before_phase + cursor.cumulative_distance;
        let start_position = cursor.start_position;
        let buffer_idx = cursor.buffer_idx;
        let kind = cursor.current_kind();

        let buf = buffers.get(buffer_idx);
        let mut axis_target = start_position;
        for i in 0..MAX_AXES {
            axis_target[i] += buf.unit[i] * total_distance;
        }
        let line_number = buf.line_number;

        let mut ideal = [0.0; MAX_MOTORS];
        kinematics.cartesian_to_motor_steps(&axis_target, &mut ideal);
        self.motor_ideal_steps = ideal;
        self.apply_step_correction();

        let mut move_complete = false;
        if phase_done {
            let cursor = self.cursor.as_mut().expect("checked above");
            let next_idx = cursor.phase_idx + 1;
            if !cursor.enter_phase_from(next_idx) {
                move_complete = true;
            }
        }

        let is_last_segment_overall = move_complete && kind == PhaseKind::Tail;
        if move_complete {
            self.cursor = None;
            // `axis_target` reflects how far the move actually got, which
            // only equals `buffer_target` when the full commanded distance
            // was traveled; a feedhold decel can end a move short of it.
            self.position = axis_target;
            buffers.free_run_buffer();
        }

        Ok(Some(Segment {
            motor_target_steps: self.motor_corrected_steps,
            time: dt,
            velocity: v,
            line_number,
            is_last_segment_of_move: is_last_segment_overall,
            fired_command: None,
            dwell_seconds: None,
        }))
    }

    /// Bucket-brigades `motor_commanded_steps` one segment behind
    /// `motor_ideal_steps` before comparing it against the encoder, so the
    /// error reflects what the motor should have physically reached by now
    /// rather than the target this very segment is still moving toward.
    fn apply_step_correction(&mut self) {
        for m in 0..MAX_MOTORS {
            let travel_steps = self.motor_ideal_steps[m] - self.motor_commanded_steps[m];
            let mut corrected = self.motor_ideal_steps[m];

            if self.holdoff[m] > 0 {
                self.holdoff[m] -= 1;
            } else {
                let following_error = self.encoder_steps[m] - self.motor_commanded_steps[m];
                if following_error.abs() >= self.correction.threshold {
                    let correction = (following_error * self.correction.factor)
                        .abs()
                        .min(self.correction.max_correction)
                        .min(travel_steps.abs())
                        .copysign(following_error);
                    corrected += correction;
                    self.holdoff[m] = self.correction.holdoff;
                }
            }

            self.motor_corrected_steps[m] = corrected;
            self.motor_commanded_steps[m] = self.motor_ideal_steps[m];
        }
    }

    /// Pulls a run buffer and, for an `Aline`, sets up the phase cursor for
    /// it (returns `Ok(None)` with `self.cursor` populated). Dwells,
    /// synchronous commands and null buffers resolve immediately without a
    /// cursor, returned as a single zero-travel segment.
    fn start_next_move<const N: usize>(&mut self, buffers: &mut BufferPool<N>) -> Result<Option<Segment>, ExecutorError> {
        let (line_number, move_type) = {
            let buf = match buffers.get_run_buffer() {
                Some(b) => b,
                None => return Ok(None),
            };
            (buf.line_number, buf.move_type)
        };

        match move_type {
            Move::Null => {
                buffers.free_run_buffer();
                Ok(None)
            }
            Move::Dwell { seconds } => {
                buffers.free_run_buffer();
                Ok(Some(Segment {
                    motor_target_steps: self.motor_corrected_steps,
                    time: seconds,
                    velocity: 0.0,
                    line_number,
                    is_last_segment_of_move: true,
                    fired_command: None,
                    dwell_seconds: Some(seconds),
                }))
            }
            Move::Command { kind, value } => {
                buffers.free_run_buffer();
                Ok(Some(Segment {
                    motor_target_steps: self.motor_corrected_steps,
                    time: 0.0,
                    velocity: 0.0,
                    line_number,
                    is_last_segment_of_move: true,
                    fired_command: Some((kind, value)),
                    dwell_seconds: None,
                }))
            }
            Move::Aline => {
                let idx = buffers.run_index();
                let buf = buffers.get(idx);
                let mut cursor = MoveCursor {
                    buffer_idx: idx,
                    start_position: self.position,
                    phases: [
                        (PhaseKind::Head, buf.head_length, buf.entry_velocity, buf.cruise_velocity),
                        (PhaseKind::Body, buf.body_length, buf.cruise_velocity, buf.cruise_velocity),
                        (PhaseKind::Tail, buf.tail_length, buf.cruise_velocity, buf.exit_velocity),
                    ],
                    phase_idx: 0,
                    distance_before_phase: 0.0,
                    cumulative_distance: 0.0,
                    fwd: ForwardDiffState::new(0.0, 0.0, 1),
                    dt: NOM_SEGMENT_TIME,
                    segments_remaining: 0,
                };
                if cursor.enter_phase_from(0) {
                    self.cursor = Some(cursor);
                    Ok(None)
                } else {
                    // Every phase was shorter than the minimum segment
                    // geometry; nothing to step, just commit the position.
                    self.position = buf.target;
                    buffers.free_run_buffer();
                    Ok(None)
                }
            }
        }
    }
}
