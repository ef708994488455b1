//! # CNC Motion Core
//!
//! The look-ahead trajectory planner, jerk-limited segment executor and
//! Cartesian kinematics hook for a multi-axis CNC controller. `no_std` by
//! default so the same crate runs on the MCU firmware and in host-side
//! simulation/benches (`std` feature).
//!
//! The three subsystems line up with the three tightly-coupled pieces this
//! crate is responsible for:
//! - [`planner`] — the move-buffer ring and look-ahead junction-velocity sweep.
//! - [`executor`] — slices a planned move into fixed-time segments on a
//!   quintic (jerk-limited) velocity curve and applies encoder-based step
//!   correction.
//! - [`kinematics`] — the `mp_kinematics` hook mapping axis-space targets to
//!   motor step-space targets.
//!
//! [`machine`] owns G-code modal state, soft limits and the feedhold state
//! machine; [`error`] is the stable `StatusCode` taxonomy everything else
//! converts into at a reporting boundary.

#![cfg_attr(not(feature = "std"), no_std)]

#[cfg(feature = "serde-support")]
extern crate serde as serde_crate;

pub mod buffer;
pub mod error;
pub mod executor;
pub mod kinematics;
pub mod machine;
pub mod planner;

pub use buffer::{BufferPool, BufferState, CommandKind, Move, MoveBuffer, RunState, DEFAULT_POOL_SIZE};
pub use error::{ExecutorError, MachineError, PlannerError, StatusCode};
pub use executor::{Segment, SegmentExecutor, StepCorrectionConfig};
pub use kinematics::{Axis, AxisId, AxisMode, CartesianKinematics, Kinematics};
pub use machine::{FeedholdState, Machine, MachineRunState, TickOutcome};
pub use planner::Planner;

/// Fixed number of machine axes the core plans over: X, Y, Z, A, B, C.
pub const MAX_AXES: usize = 6;

/// Fixed number of motors the core can drive, bounded at or below the axis
/// count; this build uses one motor slot per axis.
pub const MAX_MOTORS: usize = 6;

/// Lower bound of a segment's duration (seconds), ≈0.5 ms.
pub const MIN_SEGMENT_TIME: f64 = 0.0005;
/// Upper bound of a segment's duration (seconds), ≈50 ms.
pub const MAX_SEGMENT_TIME: f64 = 0.050;
/// Nominal (target) segment duration used to compute how many segments a
/// move phase is sliced into, ≈5 ms.
pub const NOM_SEGMENT_TIME: f64 = 0.005;

/// Step-correction tuning, expressed in half-steps. See
/// [`executor::StepCorrectionConfig`] for the defaults these seed.
pub const STEP_CORRECTION_THRESHOLD: f64 = 1.0;
pub const STEP_CORRECTION_FACTOR: f64 = 0.25;
pub const STEP_CORRECTION_MAX: f64 = 4.0;
pub const STEP_CORRECTION_HOLDOFF: u32 = 5;

/// Minimum move length (mm) below which a move is skipped (but still
/// propagates its coordinate change) rather than planned.
pub const MIN_LINE_LENGTH: f64 = 1e-4;

/// A point in N-axis space. Units are whatever the caller's axis mode
/// implies (millimeters for linear axes, degrees for rotary ones).
pub type AxisVector = [f64; MAX_AXES];
