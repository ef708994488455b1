//! Motor configuration, power management and per-motor step-pulse dispatch
//! (§4.1). `MotorMgr<N>` owns `N` [`StepGen`] instances plus the static
//! [`MotorConfig`] and [`DriverChip`] each is bound to, and is the thing the
//! rest of the firmware calls `prep_move`/`load_move`/`end_move` on.

use crate::hw::{DmaCounter, DriverChip, DriverFault, SegmentTimer};
use crate::motor::{is_valid_microstep_count, resolve_power_state, MotorConfig, PowerMode, PowerState};
use crate::step_gen::{PreparedSegment, StepGen, StepGenError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MotorMgrError {
    InvalidMotor,
    InvalidMicrosteps,
    AlreadyPrepped,
    Executing,
}

impl From<StepGenError> for MotorMgrError {
    fn from(e: StepGenError) -> Self {
        match e {
            StepGenError::AlreadyPrepped => MotorMgrError::AlreadyPrepped,
            StepGenError::Executing => MotorMgrError::Executing,
        }
    }
}

/// Default motor idle timeout (§5 "Timeouts"): 2 seconds expressed in
/// `rtc_callback` ticks at the ≈1 ms RTC rate.
pub const DEFAULT_IDLE_TIMEOUT_TICKS: u32 = 2_000;

struct Motor<TIMER, DMA, DRIVER> {
    config: MotorConfig,
    step_gen: StepGen<TIMER, DMA>,
    driver: DRIVER,
    idle_ticks: u32,
    idle_timeout_ticks: u32,
    power_state: PowerState,
}

/// Owns `N` motors' timers, DMA channels and driver-chip handles.
pub struct MotorMgr<const N: usize, TIMER, DMA, DRIVER> {
    motors: [Option<Motor<TIMER, DMA, DRIVER>>; N],
}

impl<const N: usize, TIMER, DMA, DRIVER> MotorMgr<N, TIMER, DMA, DRIVER>
where
    TIMER: SegmentTimer,
    DMA: DmaCounter,
    DRIVER: DriverChip,
{
    /// Builds an empty manager; motors are installed with [`Self::install`]
    /// during init (§9 "single process-wide owner... constructs its members
    /// in dependency order").
    pub fn new() -> Self {
        MotorMgr { motors: core::array::from_fn(|_| None) }
    }

    /// Installs the timer/DMA/driver-chip triple for `motor` and applies its
    /// initial configuration. Fails the same way `configure` does if the
    /// microstep count isn't a power of two in `[1, 256]`.
    pub fn install(
        &mut self,
        motor: usize,
        timer: TIMER,
        dma: DMA,
        driver: DRIVER,
        config: MotorConfig,
    ) -> Result<(), MotorMgrError> {
        if motor >= N {
            return Err(MotorMgrError::InvalidMotor);
        }
        if !is_valid_microstep_count(config.microsteps) {
            return Err(MotorMgrError::InvalidMicrosteps);
        }
        self.motors[motor] = Some(Motor {
            config,
            step_gen: StepGen::new(timer, dma),
            driver,
            idle_ticks: 0,
            idle_timeout_ticks: DEFAULT_IDLE_TIMEOUT_TICKS,
            power_state: PowerState::Idle,
        });
        Ok(())
    }

    fn motor_mut(&mut self, motor: usize) -> Result<&mut Motor<TIMER, DMA, DRIVER>, MotorMgrError> {
        self.motors.get_mut(motor).and_then(|m| m.as_mut()).ok_or(MotorMgrError::InvalidMotor)
    }

    /// §4.1 `configure`: updates a motor's static config; fails if
    /// `microsteps` isn't a power of two in `[1, 256]`.
    pub fn configure(&mut self, motor: usize, config: MotorConfig) -> Result<(), MotorMgrError> {
        if !is_valid_microstep_count(config.microsteps) {
            return Err(MotorMgrError::InvalidMicrosteps);
        }
        self.motor_mut(motor)?.config = config;
        Ok(())
    }

    pub fn config(&self, motor: usize) -> Result<MotorConfig, MotorMgrError> {
        self.motors.get(motor).and_then(|m| m.as_ref()).map(|m| m.config).ok_or(MotorMgrError::InvalidMotor)
    }

    /// §4.1 `set_position`: overwrites commanded/encoder/internal position to
    /// `steps << 1` half-steps. Rejected while the motor is executing a move.
    pub fn set_position(&mut self, motor: usize, steps: i64) -> Result<(), MotorMgrError> {
        Ok(self.motor_mut(motor)?.step_gen.set_position(steps << 1)?)
    }

    pub fn commanded_steps(&self, motor: usize) -> Result<i64, MotorMgrError> {
        Ok(self.motors.get(motor).and_then(|m| m.as_ref()).ok_or(MotorMgrError::InvalidMotor)?.step_gen.commanded_half_steps() >> 1)
    }

    pub fn encoder_steps(&self, motor: usize) -> Result<i64, MotorMgrError> {
        Ok(self.motors.get(motor).and_then(|m| m.as_ref()).ok_or(MotorMgrError::InvalidMotor)?.step_gen.encoder_half_steps() >> 1)
    }

    pub fn following_error(&self, motor: usize) -> Result<i64, MotorMgrError> {
        Ok(self.motors.get(motor).and_then(|m| m.as_ref()).ok_or(MotorMgrError::InvalidMotor)?.step_gen.following_error())
    }

    /// §4.1 `prep_move`: stages the prescaler/period/direction for the next
    /// segment and refreshes the idle timeout (the motor is about to move).
    pub fn prep_move(&mut self, motor: usize, time_seconds: f64, target_half_steps: i64) -> Result<PreparedSegment, MotorMgrError> {
        let m = self.motor_mut(motor)?;
        let reverse = m.config.reverse;
        let prepared = m.step_gen.prepare(time_seconds, target_half_steps, reverse)?;
        m.idle_ticks = 0;
        Ok(prepared)
    }

    /// §4.1 `load_move`: commits the prepped parameters. Caller is expected
    /// to have already called `end_move` on every motor this segment
    /// boundary, per §4.2's ordering guarantee.
    pub fn load_move(&mut self, motor: usize) -> Result<(), MotorMgrError> {
        self.motor_mut(motor)?.step_gen.load();
        Ok(())
    }

    /// §4.1 `end_move`: stops the timer and folds the DMA count into the
    /// encoder.
    pub fn end_move(&mut self, motor: usize) -> Result<(), MotorMgrError> {
        self.motor_mut(motor)?.step_gen.end();
        Ok(())
    }

    /// §4.1 `rtc_callback`: advances idle timers and applies the power-mode
    /// table, enabling/disabling each motor's driver chip as needed.
    /// `in_cycle` reflects the machine's current cycle state (§3
    /// `MachineState.cycle_state != off`).
    pub fn rtc_callback(&mut self, in_cycle: bool) {
        for slot in self.motors.iter_mut() {
            let Some(m) = slot else { continue };
            if m.idle_ticks < u32::MAX {
                m.idle_ticks += 1;
            }
            let idle_timeout_expired = m.idle_ticks >= m.idle_timeout_ticks;
            let next = resolve_power_state(m.config.power_mode, in_cycle, idle_timeout_expired);
            if next != m.power_state {
                match next {
                    PowerState::Active => m.driver.enable(),
                    PowerState::Idle => m.driver.disable(),
                }
                m.power_state = next;
            }
        }
    }

    pub fn set_idle_timeout_ticks(&mut self, motor: usize, ticks: u32) -> Result<(), MotorMgrError> {
        self.motor_mut(motor)?.idle_timeout_ticks = ticks;
        Ok(())
    }

    /// Polls every installed motor's driver chip for a fault, returning the
    /// first (motor ordinal, fault) pair observed. A motor-driver fault
    /// triggers a feedhold and flush one level up (§4.5, §7).
    pub fn poll_faults(&mut self) -> Option<(usize, DriverFault)> {
        for (i, slot) in self.motors.iter_mut().enumerate() {
            if let Some(m) = slot {
                if let Some(fault) = m.driver.poll_fault() {
                    if fault.any() {
                        return Some((i, fault));
                    }
                }
            }
        }
        None
    }
}

impl<const N: usize, TIMER, DMA, DRIVER> Default for MotorMgr<N, TIMER, DMA, DRIVER>
where
    TIMER: SegmentTimer,
    DMA: DmaCounter,
    DRIVER: DriverChip,
{
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hw::Prescaler;

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
    struct MockDriver {
        enabled: bool,
        enable_calls: u32,
        disable_calls: u32,
    }
    impl DriverChip for MockDriver {
        fn enable(&mut self) {
            self.enabled = true;
            self.enable_calls += 1;
        }
        fn disable(&mut self) {
            self.enabled = false;
            self.disable_calls += 1;
        }
        fn set_microsteps(&mut self, _microsteps: u16) {}
        fn set_current(&mut self, _milliamps: u16) {}
        fn poll_fault(&mut self) -> Option<DriverFault> {
            None
        }
    }

    fn mgr() -> MotorMgr<2, MockTimer, MockDma, MockDriver> {
        let mut mgr = MotorMgr::new();
        mgr.install(0, MockTimer, MockDma::default(), MockDriver::default(), MotorConfig::default()).unwrap();
        mgr
    }

    #[test]
    fn configure_rejects_non_power_of_two_microsteps() {
        let mut mgr = mgr();
        let mut bad = MotorConfig::default();
        bad.microsteps = 24;
        assert_eq!(mgr.configure(0, bad), Err(MotorMgrError::InvalidMicrosteps));
    }

    #[test]
    fn set_position_doubles_into_half_steps() {
        let mut mgr = mgr();
        mgr.set_position(0, 504).unwrap();
        assert_eq!(mgr.commanded_steps(0).unwrap(), 504);
    }

    #[test]
    fn invalid_motor_index_is_rejected() {
        let mut mgr = mgr();
        assert_eq!(mgr.set_position(5, 0), Err(MotorMgrError::InvalidMotor));
    }

    #[test]
    fn power_mode_always_stays_active_regardless_of_cycle_or_idle() {
        let mut mgr = mgr();
        let mut cfg = MotorConfig::default();
        cfg.power_mode = PowerMode::Always;
        mgr.configure(0, cfg).unwrap();
        mgr.rtc_callback(false);
        assert!(mgr.motors[0].as_ref().unwrap().driver.enabled);
    }

    #[test]
    fn power_mode_only_when_moving_idles_after_timeout() {
        let mut mgr = mgr();
        let mut cfg = MotorConfig::default();
        cfg.power_mode = PowerMode::OnlyWhenMoving;
        mgr.configure(0, cfg).unwrap();
        mgr.set_idle_timeout_ticks(0, 2).unwrap();
        mgr.rtc_callback(true);
        assert!(mgr.motors[0].as_ref().unwrap().driver.enabled);
        mgr.rtc_callback(true);
        mgr.rtc_callback(true);
        assert!(!mgr.motors[0].as_ref().unwrap().driver.enabled);
    }

    #[test]
    fn prep_move_resets_idle_timer() {
        let mut mgr = mgr();
        mgr.set_idle_timeout_ticks(0, 1).unwrap();
        mgr.rtc_callback(true);
        mgr.prep_move(0, 0.005, 100).unwrap();
        mgr.load_move(0).unwrap();
        // idle_ticks was reset by prep_move, so one more tick shouldn't expire it yet
        mgr.rtc_callback(true);
        assert_eq!(mgr.motors[0].as_ref().unwrap().idle_ticks, 1);
    }
}
