//! # Stepper HAL
//!
//! Per-motor step-pulse generation, power management and segment-level
//! dispatch for a multi-axis CNC controller (§4.1, §4.2, §4.5). Sits one
//! layer below `cnc-core`: the executor there produces `(target_half_steps,
//! segment_time)` tuples and reads back encoder positions, but never
//! touches a register — this crate is where that boundary is crossed.
//!
//! - [`hw`] — the hardware seam traits (`SegmentTimer`, `DmaCounter`,
//!   `AtomicGpioPort`, `DriverChip`). Production code implements these
//!   against real peripherals; `sim` and the unit tests below implement them
//!   in software.
//! - [`step_gen`] — per-motor prescaler selection and the timer/DMA pair
//!   that turns a target half-step count and duration into hardware-timed
//!   edges, entirely between segment boundaries.
//! - [`motor`] — static per-motor configuration and the power-mode table.
//! - [`motor_mgr`] — owns `N` `StepGen`s plus their configuration and power
//!   state; the `prep_move`/`load_move`/`end_move`/`rtc_callback` contract.
//! - [`stepper_driver`] — the segment-boundary timer tick and the
//!   lowest-priority "prepare the next segment" dispatch.
#![cfg_attr(not(test), no_std)]

pub mod hw;
pub mod motor;
pub mod motor_mgr;
pub mod step_gen;
pub mod stepper_driver;

pub use hw::{AtomicGpioPort, DmaCounter, DriverChip, DriverFault, Prescaler, SegmentTimer};
pub use motor::{is_valid_microstep_count, resolve_power_state, MotorConfig, PowerMode, PowerState};
pub use motor_mgr::{MotorMgr, MotorMgrError, DEFAULT_IDLE_TIMEOUT_TICKS};
pub use step_gen::{select_prescaler, PreparedSegment, StepGen, StepGenError, DEFAULT_F_CPU_HZ};
pub use stepper_driver::{PrepLineError, StepperDriver, TickOutcome, DEFAULT_STEP_TIMER_HZ};
