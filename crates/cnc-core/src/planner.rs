//! Look-ahead trajectory planner.
//!
//! Queues straight-line moves, dwells and synchronous commands into a
//! [`BufferPool`] and keeps every *replannable* buffer's entry/cruise/exit
//! velocities consistent with its neighbors using a backward braking sweep
//! followed by a forward sweep that also derives each buffer's
//! head/body/tail geometry. Junction velocity between two consecutive moves
//! is bounded by the classic junction-deviation construction: a move that
//! continues straight through is capped at the lower of the two cruise
//! velocities, anything else is capped by how sharply it can corner without
//! exceeding the binding axis's jerk limit.

use crate::buffer::{BufferPool, CommandKind, Move, MoveBuffer};
use crate::error::PlannerError;
use crate::kinematics::{axis_vector_length, is_zero_length, Axis};
use crate::{AxisVector, MAX_AXES, MIN_LINE_LENGTH};

#[cfg(not(feature = "std"))]
fn sqrtf(v: f64) -> f64 {
    libm::sqrt(v)
}
#[cfg(feature = "std")]
fn sqrtf(v: f64) -> f64 {
    v.sqrt()
}

#[cfg(not(feature = "std"))]
fn cbrtf(v: f64) -> f64 {
    libm::cbrt(v)
}
#[cfg(feature = "std")]
fn cbrtf(v: f64) -> f64 {
    v.cbrt()
}

#[cfg(not(feature = "std"))]
fn powf(base: f64, exp: f64) -> f64 {
    libm::pow(base, exp)
}
#[cfg(feature = "std")]
fn powf(base: f64, exp: f64) -> f64 {
    base.powf(exp)
}

/// Number of bisection steps used to find a triangle profile's peak
/// velocity. Fixed so planning has a bounded, deterministic cost.
const PEAK_VELOCITY_ITERATIONS: u32 = 24;

/// Default junction deviation (mm), overridable via [`Planner::set_junction_deviation`].
pub const DEFAULT_JUNCTION_DEVIATION: f64 = 0.01;

fn dot(a: &[f64; MAX_AXES], b: &[f64; MAX_AXES]) -> f64 {
    let mut sum = 0.0;
    for i in 0..MAX_AXES {
        sum += a[i] * b[i];
    }
    sum
}

/// Time (seconds) to change velocity by `delta_v` under constant jerk `j`,
/// i.e. a symmetric S-curve acceleration ramp: `t = 2 * sqrt(delta_v / j)`.
pub(crate) fn accel_time(delta_v: f64, jerk: f64) -> f64 {
    if delta_v <= 0.0 || jerk <= 0.0 {
        return 0.0;
    }
    2.0 * sqrtf(delta_v / jerk)
}

/// Distance covered while ramping by `delta_v` under constant jerk `j`.
/// The S-curve's average velocity over the ramp is `delta_v / 2`.
pub(crate) fn accel_distance(delta_v: f64, jerk: f64) -> f64 {
    if delta_v <= 0.0 {
        return 0.0;
    }
    delta_v * accel_time(delta_v, jerk) / 2.0
}

/// Inverse of [`accel_distance`]: the velocity change a ramp of length
/// `distance` can sustain under jerk `j`, derived from
/// `distance = delta_v^1.5 / sqrt(j)`.
fn max_delta_v_for_distance(distance: f64, jerk: f64) -> f64 {
    if distance <= 0.0 || jerk <= 0.0 {
        return 0.0;
    }
    powf(distance * sqrtf(jerk), 2.0 / 3.0)
}

/// Look-ahead planner over a fixed-capacity move-buffer ring of size `N`.
pub struct Planner<const N: usize> {
    pub buffers: BufferPool<N>,
    position: AxisVector,
    axes: [Axis; MAX_AXES],
    junction_deviation: f64,
}

impl<const N: usize> Planner<N> {
    pub fn new(axes: [Axis; MAX_AXES]) -> Self {
        Planner {
            buffers: BufferPool::new(),
            position: [0.0; MAX_AXES],
            axes,
            junction_deviation: DEFAULT_JUNCTION_DEVIATION,
        }
    }

    pub fn position(&self) -> AxisVector {
        self.position
    }

    /// Used after homing or a G92 offset change to resync the planner's idea
    /// of "where the tool currently is" without queuing a move.
    pub fn set_position(&mut self, position: AxisVector) {
        self.position = position;
    }

    pub fn set_axes(&mut self, axes: [Axis; MAX_AXES]) {
        self.axes = axes;
    }

    pub fn set_junction_deviation(&mut self, mm: f64) {
        self.junction_deviation = mm;
    }

    /// Queues a straight-line move to `target` at `feedrate` (units/second).
    /// A move shorter than [`crate::MIN_LINE_LENGTH`] is not queued, but
    /// still advances the planner's notion of the commanded position.
    pub fn aline(&mut self, target: AxisVector, feedrate: f64, line_number: u32) -> Result<(), PlannerError> {
        let mut unit = [0.0; MAX_AXES];
        for i in 0..MAX_AXES {
            unit[i] = target[i] - self.position[i];
        }

        let length = axis_vector_length(&unit, &self.axes);
        if length < MIN_LINE_LENGTH || is_zero_length(&unit, MIN_LINE_LENGTH) {
            self.position = target;
            return Ok(());
        }
        if feedrate <= 0.0 || !feedrate.is_finite() {
            return Err(PlannerError::FeedrateNotSpecified);
        }
        for u in unit.iter_mut() {
            *u /= length;
        }

        // Per-axis velocity/jerk limits combine the way a straight-line move
        // combines them: whichever axis's share of the unit vector is
        // largest relative to its own limit sets the ceiling for the move.
        let mut cruise_vmax = f64::INFINITY;
        let mut jerk = f64::INFINITY;
        for i in 0..MAX_AXES {
            let comp = unit[i].abs();
            if comp < 1e-12 {
                continue;
            }
            let axis = &self.axes[i];
            if axis.velocity_max > 0.0 {
                cruise_vmax = cruise_vmax.min(axis.velocity_max / comp);
            }
            if axis.jerk_max > 0.0 {
                jerk = jerk.min(axis.jerk_max / comp);
            }
        }
        if !cruise_vmax.is_finite() {
            cruise_vmax = feedrate;
        }
        cruise_vmax = cruise_vmax.min(feedrate);
        if !jerk.is_finite() || jerk <= 0.0 {
            return Err(PlannerError::FailedToConverge);
        }

        let prev_idx = self.buffers.last_queued();
        let junction_v = match prev_idx {
            Some(p) => self.junction_velocity(p, &unit, cruise_vmax),
            None => 0.0,
        };

        let (idx, buf) = self.buffers.get_write_buffer().ok_or(PlannerError::QueueFull)?;
        buf.unit = unit;
        buf.target = target;
        buf.length = length;
        buf.replannable = true;
        buf.jerk = jerk;
        buf.recip_jerk = 1.0 / jerk;
        buf.cbrt_jerk = cbrtf(jerk);
        buf.entry_vmax = cruise_vmax;
        buf.cruise_vmax = cruise_vmax;
        buf.exit_vmax = cruise_vmax;
        buf.delta_vmax = max_delta_v_for_distance(length, jerk);
        buf.entry_velocity = junction_v.min(cruise_vmax);
        buf.cruise_velocity = cruise_vmax;
        buf.exit_velocity = 0.0;
        buf.braking_velocity = 0.0;
        buf.head_length = 0.0;
        buf.body_length = length;
        buf.tail_length = 0.0;

        self.buffers.commit_write_buffer(idx, Move::Aline, line_number);
        self.position = target;

        self.replan();
        Ok(())
    }

    /// Queues a dwell of `seconds`; never replannable since it has no
    /// velocity profile to revise.
    pub fn dwell(&mut self, seconds: f64, line_number: u32) -> Result<(), PlannerError> {
        let (idx, buf) = self.buffers.get_write_buffer().ok_or(PlannerError::QueueFull)?;
        buf.replannable = false;
        self.buffers.commit_write_buffer(idx, Move::Dwell { seconds }, line_number);
        Ok(())
    }

    /// Queues a synchronous side effect (spindle, coolant, offset update,
    /// program stop) that fires once the executor reaches this buffer.
    pub fn command_queue(&mut self, kind: CommandKind, value: f64, line_number: u32) -> Result<(), PlannerError> {
        let (idx, buf) = self.buffers.get_write_buffer().ok_or(PlannerError::QueueFull)?;
        buf.replannable = false;
        self.buffers.commit_write_buffer(idx, Move::Command { kind, value }, line_number);
        Ok(())
    }

    /// Junction velocity between `prev` (an already-queued buffer) and the
    /// unit vector/cruise ceiling of the move being queued.
    fn junction_velocity(&self, prev_idx: usize, unit_next: &[f64; MAX_AXES], cruise_next: f64) -> f64 {
        let prev = self.buffers.get(prev_idx);
        if !matches!(prev.move_type, Move::Aline) {
            return 0.0;
        }
        let cos_theta = (-dot(&prev.unit, unit_next)).clamp(-1.0, 1.0);
        if cos_theta < -0.999 {
            // Straight-through continuation: no cornering penalty.
            return prev.cruise_vmax.min(cruise_next);
        }
        let sin_half_theta = sqrtf(((1.0 - cos_theta) / 2.0).max(0.0));
        if sin_half_theta > 0.999 {
            return 0.0;
        }
        let radius = self.junction_deviation * sin_half_theta / (1.0 - sin_half_theta);
        let jerk = prev.jerk;
        sqrtf(radius * jerk).min(prev.cruise_vmax).min(cruise_next)
    }

    /// Re-sweeps every replannable buffer from the run cursor to the tail of
    /// the queue: a backward braking pass bounds each entry velocity by how
    /// fast the buffer can decelerate to its neighbor's entry within its own
    /// length, then a forward pass restores entry/exit continuity and
    /// derives each buffer's head/body/tail trapezoid geometry.
    fn replan(&mut self) {
        let Some(last) = self.buffers.last_queued() else {
            return;
        };
        let run = self.buffers.run_index();

        // Backward pass: propagate a braking velocity from the tail of the
        // queue toward the run cursor.
        let mut idx = last;
        let mut next_entry = 0.0;
        loop {
            if !matches!(self.buffers.get(idx).move_type, Move::Aline) {
                next_entry = 0.0;
            } else {
                let buf = self.buffers.get_mut(idx);
                if buf.replannable {
                    buf.exit_velocity = next_entry;
                    let max_entry = (buf.exit_velocity + max_delta_v_for_distance(buf.length, buf.jerk)).min(buf.entry_vmax);
                    if buf.entry_velocity > max_entry {
                        buf.entry_velocity = max_entry;
                    }
                }
                next_entry = buf.entry_velocity;
            }
            if idx == run {
                break;
            }
            idx = self.buffers.prev_index(idx);
        }

        // Forward pass: restore entry == previous exit continuity and derive
        // trapezoid geometry for every Aline buffer.
        let mut idx = run;
        let mut prev_exit: Option<f64> = None;
        loop {
            if matches!(self.buffers.get(idx).move_type, Move::Aline) {
                if let Some(exit) = prev_exit {
                    let buf = self.buffers.get_mut(idx);
                    if buf.entry_velocity > exit {
                        buf.entry_velocity = exit;
                    }
                }
                self.compute_trapezoid(idx);
                prev_exit = Some(self.buffers.get(idx).exit_velocity);
            } else {
                prev_exit = None;
            }
            if idx == last {
                break;
            }
            idx = self.buffers.next_index(idx);
        }
    }

    /// Derives `head_length`/`body_length`/`tail_length` and (for a triangle
    /// profile) a reduced `cruise_velocity` for the buffer at `idx`, given
    /// its already-settled entry/exit velocities.
    fn compute_trapezoid(&mut self, idx: usize) {
        let buf = self.buffers.get_mut(idx);
        let vi = buf.entry_velocity;
        let vo = buf.exit_velocity;
        let vc = buf.cruise_vmax.max(vi).max(vo);
        let jerk = buf.jerk;
        let length = buf.length;

        let head = accel_distance(vc - vi, jerk);
        let tail = accel_distance(vc - vo, jerk);

        if head + tail <= length {
            buf.cruise_velocity = vc;
            buf.head_length = head;
            buf.tail_length = tail;
            buf.body_length = length - head - tail;
            return;
        }

        // Triangle profile: no cruise phase fits, solve for the peak
        // velocity by bisection (monotonic in distance covered).
        let mut lo = vi.max(vo);
        let mut hi = vc;
        for _ in 0..PEAK_VELOCITY_ITERATIONS {
            let mid = (lo + hi) / 2.0;
            let d = accel_distance(mid - vi, jerk) + accel_distance(mid - vo, jerk);
            if d > length {
                hi = mid;
            } else {
                lo = mid;
            }
        }
        let peak = lo;
        let head = accel_distance(peak - vi, jerk);
        let tail = accel_distance(peak - vo, jerk);
        buf.cruise_velocity = peak;
        buf.head_length = head;
        buf.tail_length = tail;
        buf.body_length = (length - head - tail).max(0.0);
    }

    /// Forces the current run buffer's entry velocity to zero and
    /// recomputes its head/body/tail geometry, used right after a feedhold
    /// decel brings the machine to a stop so the move that resumes next
    /// starts from rest instead of the junction velocity the look-ahead
    /// sweep originally planned against a neighbor that's since been
    /// truncated out from under it.
    pub(crate) fn restart_run_buffer_from_rest(&mut self) {
        let idx = self.buffers.run_index();
        if matches!(self.buffers.get(idx).move_type, Move::Aline) {
            self.buffers.get_mut(idx).entry_velocity = 0.0;
            self.compute_trapezoid(idx);
        }
    }

    #[cfg(test)]
    pub(crate) fn buffer_at(&self, idx: usize) -> &MoveBuffer {
        self.buffers.get(idx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kinematics::AxisMode;

    fn test_axes() -> [Axis; MAX_AXES] {
        let mut axes = [Axis::default(); MAX_AXES];
        for a in axes.iter_mut().take(3) {
            a.mode = AxisMode::Standard;
            a.velocity_max = 200.0;
            a.feedrate_max = 200.0;
            a.jerk_max = 5_000_000.0;
        }
        axes
    }

    #[test]
    fn straight_line_move_reaches_cruise_when_long_enough() {
        let mut planner: Planner<8> = Planner::new(test_axes());
        let mut target = [0.0; MAX_AXES];
        target[0] = 1000.0;
        planner.aline(target, 100.0, 1).unwrap();

        let idx = planner.buffers.run_index();
        let buf = planner.buffer_at(idx);
        assert!(buf.body_length > 0.0);
        assert!((buf.cruise_velocity - 100.0).abs() < 1e-6);
    }

    #[test]
    fn short_move_produces_a_triangle_profile() {
        let mut planner: Planner<8> = Planner::new(test_axes());
        let mut target = [0.0; MAX_AXES];
        target[0] = 0.05;
        planner.aline(target, 100.0, 1).unwrap();

        let idx = planner.buffers.run_index();
        let buf = planner.buffer_at(idx);
        assert!(buf.cruise_velocity < 100.0);
        assert!(buf.body_length.abs() < 1e-6);
    }

    #[test]
    fn collinear_moves_join_at_full_cruise_velocity() {
        let mut planner: Planner<8> = Planner::new(test_axes());
        let mut target = [0.0; MAX_AXES];
        target[0] = 1000.0;
        planner.aline(target, 100.0, 1).unwrap();
        target[0] = 2000.0;
        planner.aline(target, 100.0, 2).unwrap();

        let run = planner.buffers.run_index();
        let next = planner.buffers.next_index(run);
        let joined_velocity = planner.buffer_at(run).exit_velocity;
        assert!((joined_velocity - 100.0).abs() < 1e-6);
        assert!((planner.buffer_at(next).entry_velocity - joined_velocity).abs() < 1e-9);
    }

    #[test]
    fn sharp_corner_slows_the_junction() {
        let mut planner: Planner<8> = Planner::new(test_axes());
        let mut target = [0.0; MAX_AXES];
        target[0] = 1000.0;
        planner.aline(target, 100.0, 1).unwrap();
        target[0] = 1000.0;
        target[1] = 1000.0;
        planner.aline(target, 100.0, 2).unwrap();

        let run = planner.buffers.run_index();
        assert!(planner.buffer_at(run).exit_velocity < 100.0);
    }

    #[test]
    fn degenerate_move_is_skipped_but_advances_position() {
        let mut planner: Planner<8> = Planner::new(test_axes());
        let before = planner.buffers.buffers_available();
        planner.aline([0.0; MAX_AXES], 100.0, 1).unwrap();
        assert_eq!(planner.buffers.buffers_available(), before);
        assert_eq!(planner.position(), [0.0; MAX_AXES]);
    }
}
