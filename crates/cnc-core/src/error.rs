//! Stable error taxonomy for the motion core.
//!
//! [`StatusCode`] mirrors the numeric ranges a host or log line can rely on
//! staying put across versions. Every component error below carries exactly
//! one `StatusCode` plus whatever context is needed to act on it, and
//! converts into the code at the boundary where it crosses into a report or
//! a log line.

#[cfg(feature = "std")]
use thiserror::Error;

/// Stable integer status code, grouped by range.
///
/// - `0..20`: transport/OS
/// - `20..100`: internal
/// - `100..130`: input
/// - `130..200`: G-code semantics
/// - `200..250`: motion
/// - `250..`: cycle failures
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum StatusCode {
    Ok = 0,
    Eagain = 1,
    Noop = 2,
    BufferEmpty = 3,
    BufferFull = 4,
    Initializing = 5,

    InternalAssertionFailure = 20,
    PlannerStateInconsistent = 21,
    FloatIsInfOrNan = 22,
    StackOverflow = 23,

    UnrecognizedName = 100,
    MalformedCommand = 101,
    ValueOutOfRange = 102,

    ModalGroupViolation = 130,
    AxisMissing = 131,
    FeedrateNotSpecified = 132,
    InverseTimeFMissing = 133,
    ArcEndpointEqualsStart = 134,
    SpindleRequired = 135,
    PRLWordMissingOrInvalid = 136,

    MinLengthMove = 200,
    MinTimeMove = 201,
    PlannerFailedToConverge = 202,
    SoftLimitExceeded = 220,
    MachineAlarmed = 230,

    HomingCycleFailed = 250,
    ProbingCycleFailed = 251,
    JoggingCycleFailed = 252,
}

impl StatusCode {
    /// True for codes in the 200+ "motion"/"cycle failure" ranges that the
    /// stepper driver and machine state machine treat as alarm-worthy.
    pub const fn is_alarm(self) -> bool {
        (self as u16) >= 200
    }
}

impl core::fmt::Display for StatusCode {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{:?} ({})", self, *self as u16)
    }
}

#[cfg(feature = "std")]
impl std::error::Error for StatusCode {}

/// Errors raised while queuing or re-planning moves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "std", derive(Error))]
pub enum PlannerError {
    #[cfg_attr(feature = "std", error("move queue is full"))]
    QueueFull,
    #[cfg_attr(feature = "std", error("move is invalid (zero-length unit vector or non-finite target)"))]
    InvalidMove,
    #[cfg_attr(feature = "std", error("feedrate not specified"))]
    FeedrateNotSpecified,
    #[cfg_attr(feature = "std", error("inverse-time F missing"))]
    InverseTimeFMissing,
    #[cfg_attr(feature = "std", error("planner failed to converge on a velocity profile"))]
    FailedToConverge,
}

impl From<PlannerError> for StatusCode {
    fn from(e: PlannerError) -> Self {
        match e {
            PlannerError::QueueFull => StatusCode::BufferFull,
            PlannerError::InvalidMove => StatusCode::MinLengthMove,
            PlannerError::FeedrateNotSpecified => StatusCode::FeedrateNotSpecified,
            PlannerError::InverseTimeFMissing => StatusCode::InverseTimeFMissing,
            PlannerError::FailedToConverge => StatusCode::PlannerFailedToConverge,
        }
    }
}

/// Errors raised while slicing a move buffer into segments.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "std", derive(Error))]
pub enum ExecutorError {
    #[cfg_attr(feature = "std", error("segment time is non-finite or out of [MIN_SEGMENT_TIME, MAX_SEGMENT_TIME]"))]
    BadSegmentTime,
    #[cfg_attr(feature = "std", error("no run buffer available"))]
    NoRunBuffer,
}

impl From<ExecutorError> for StatusCode {
    fn from(e: ExecutorError) -> Self {
        match e {
            ExecutorError::BadSegmentTime => StatusCode::MinTimeMove,
            ExecutorError::NoRunBuffer => StatusCode::BufferEmpty,
        }
    }
}

/// Errors raised by [`crate::machine::Machine`] while gating moves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "std", derive(Error))]
pub enum MachineError {
    #[cfg_attr(feature = "std", error("target exceeds soft limit on axis {0}"))]
    SoftLimitExceeded(u8),
    #[cfg_attr(feature = "std", error("machine is alarmed"))]
    Alarmed,
    #[cfg_attr(feature = "std", error("axis word missing for a required move"))]
    AxisMissing,
    #[cfg_attr(feature = "std", error(transparent))]
    Planner(PlannerError),
}

impl From<PlannerError> for MachineError {
    fn from(e: PlannerError) -> Self {
        MachineError::Planner(e)
    }
}

impl From<MachineError> for StatusCode {
    fn from(e: MachineError) -> Self {
        match e {
            MachineError::SoftLimitExceeded(_) => StatusCode::SoftLimitExceeded,
            MachineError::Alarmed => StatusCode::MachineAlarmed,
            MachineError::AxisMissing => StatusCode::AxisMissing,
            MachineError::Planner(p) => p.into(),
        }
    }
}
