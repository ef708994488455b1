//! Per-motor static configuration (§4.1).

/// When a motor is energized. Combined with whether the machine is currently
/// in a cycle and whether the idle timeout has elapsed to pick the driver's
/// actual power state (§4.1 "Power state machine").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-logging", derive(defmt::Format))]
pub enum PowerMode {
    Disabled,
    Always,
    InCycle,
    OnlyWhenMoving,
}

/// Resolved driver power state for one `rtc_callback` tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-logging", derive(defmt::Format))]
pub enum PowerState {
    Active,
    Idle,
}

/// Returns the driver state the power-mode table (§4.1) prescribes.
pub fn resolve_power_state(mode: PowerMode, in_cycle: bool, idle_timeout_expired: bool) -> PowerState {
    match mode {
        PowerMode::Disabled => PowerState::Idle,
        PowerMode::Always => PowerState::Active,
        PowerMode::InCycle | PowerMode::OnlyWhenMoving => {
            if in_cycle && !idle_timeout_expired {
                PowerState::Active
            } else {
                PowerState::Idle
            }
        }
    }
}

/// Static per-motor configuration. `steps_per_unit` is derived, never stored
/// independently, so it can never drift from its inputs (§3 "Motor" invariant).
#[derive(Debug, Clone, Copy)]
pub struct MotorConfig {
    pub axis: u8,
    pub microsteps: u16,
    pub step_angle_deg: f64,
    pub travel_per_rev: f64,
    pub reverse: bool,
    pub power_mode: PowerMode,
}

impl Default for MotorConfig {
    fn default() -> Self {
        MotorConfig {
            axis: 0,
            microsteps: 16,
            step_angle_deg: 1.8,
            travel_per_rev: 1.0,
            reverse: false,
            power_mode: PowerMode::OnlyWhenMoving,
        }
    }
}

impl MotorConfig {
    /// `360 * microsteps / (travel_per_rev * step_angle)`, in half-steps the
    /// caller must double before comparing against this (the core counts in
    /// half-steps; this is the whole-microstep rate).
    pub fn steps_per_unit(&self) -> f64 {
        360.0 * self.microsteps as f64 / (self.travel_per_rev * self.step_angle_deg)
    }
}

/// `true` for any power of two in `[1, 256]`.
pub fn is_valid_microstep_count(v: u16) -> bool {
    v >= 1 && v <= 256 && (v & (v.wrapping_sub(1))) == 0
}
