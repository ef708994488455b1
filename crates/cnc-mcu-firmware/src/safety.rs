#![deny(clippy::all)]
#![deny(warnings)]

//! # Safety Supervisor
//!
//! Firmware-side counterpart to `cnc_core::machine::Machine`'s hard-alarm
//! state: an independent watchdog and a globally visible emergency-stop
//! flag. `Machine` decides *that* an alarm is hard; this module is what
//! actually keeps the MCU from wedging and gives every task a single place
//! to check before driving an output.
//!
//! - **Watchdog**: the hardware Independent Watchdog (IWDG) resets the MCU
//!   if the main loop hangs. It must be fed periodically.
//! - **Emergency stop**: a globally accessible, atomic flag. Raised by a
//!   limit switch, a driver fault reported through `stepper_hal`, or an
//!   explicit host estop command. Higher-level tasks poll it and react by
//!   disabling motors immediately; it does not itself touch hardware.

use core::sync::atomic::{AtomicBool, Ordering};
use embassy_stm32::wdg::IndependentWatchdog;
use stepper_hal::DriverFault;

/// Why the supervisor latched an emergency stop.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum EstopCause {
    /// A limit switch tripped during motion.
    LimitSwitch { axis: usize },
    /// A motor driver chip reported a fault.
    DriverFault { motor: usize, fault: DriverFault },
    /// The host sent an explicit estop command.
    HostRequested,
}

/// The main safety supervisor for the entire MCU.
pub struct SafetyMonitor<'a> {
    watchdog: IndependentWatchdog<'a>,
    /// Set once and never cleared here; [`Self::reset`] is the only way
    /// back to normal operation, mirroring `Machine::reset`'s requirement
    /// that the underlying condition be gone before a hard alarm clears.
    estop_active: AtomicBool,
}

impl<'a> SafetyMonitor<'a> {
    /// Creates a new `SafetyMonitor` and immediately starts the watchdog.
    pub fn new(mut watchdog: IndependentWatchdog<'a>) -> Self {
        watchdog.unleash();
        Self { watchdog, estop_active: AtomicBool::new(false) }
    }

    /// Latches an emergency stop. Idempotent: only the first cause is
    /// logged, matching `Machine::alarm`'s "first fault wins" behavior.
    pub fn trigger(&mut self, cause: EstopCause) {
        if !self.estop_active.swap(true, Ordering::SeqCst) {
            defmt::error!("EMERGENCY STOP: {:?}", defmt::Debug2Format(&cause));
        }
    }

    /// Clears the estop latch once the caller has confirmed the underlying
    /// condition is gone (limit released, fault cleared, host reset).
    pub fn reset(&mut self) {
        self.estop_active.store(false, Ordering::SeqCst);
    }

    #[inline]
    pub fn is_triggered(&self) -> bool {
        self.estop_active.load(Ordering::SeqCst)
    }

    /// Feeds the independent watchdog. Must be called periodically from a
    /// high-priority task to prevent the MCU from resetting.
    #[inline]
    pub fn feed_watchdog(&mut self) {
        self.watchdog.feed();
    }
}
