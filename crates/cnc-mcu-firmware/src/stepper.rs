//! # Stepper Motor Control
//!
//! Firmware-side home for [`stepper_hal::StepperDriver`]: owns the three
//! axis timers/DMA channels/driver chips, drives `boundary_tick` off a
//! periodic ticker, and forwards faults to the [`crate::safety`] supervisor.
//!
//! ## Hardware seam
//!
//! `stepper_hal` never touches a register directly; the proxies below are
//! the only place that does. `SegmentTimerProxy` wraps one axis's TIM
//! channel in frequency-generator mode, `DmaProxy` wraps its paired
//! down-counting DMA channel, and `DriverProxy` wraps the external driver
//! chip's enable/microstep/current lines.

use core::sync::atomic::{AtomicBool, Ordering};

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::mutex::Mutex;
use embassy_time::{Duration, Ticker};

use stepper_hal::hw::{DmaCounter, DriverChip, DriverFault, Prescaler, SegmentTimer};
use stepper_hal::{MotorConfig, MotorMgr, StepperDriver, TickOutcome};

pub const AXIS_COUNT: usize = 3;

/// One axis's segment timer, configured as a frequency generator: once armed
/// it toggles the STEP pin every `period` ticks under `prescaler`, entirely
/// in hardware, until `stop`.
pub struct SegmentTimerProxy {
    label: &'static str,
}

impl SegmentTimer for SegmentTimerProxy {
    fn configure(&mut self, prescaler: Prescaler, period: u16) {
        // TODO: write PSC/ARR on this axis's TIMx and start it in PWM/toggle mode.
        defmt::trace!("{}: configure prescaler={} period={}", self.label, prescaler as u32, period);
    }

    fn rescale_running_count(&mut self, old: Prescaler, new: Prescaler) {
        // TODO: read CNT, scale by new/old, write back without stopping the timer.
        defmt::trace!("{}: rescale {} -> {}", self.label, old as u32, new as u32);
    }

    fn stop(&mut self) {
        // TODO: disable the counter.
        defmt::trace!("{}: stop", self.label);
    }
}

/// The down-counting DMA channel paired with an axis's segment timer.
pub struct DmaProxy {
    remaining: u16,
}

impl DmaCounter for DmaProxy {
    fn reset(&mut self) {
        // TODO: rewrite the channel's transfer count register to 0xFFFF.
        self.remaining = 0xFFFF;
    }

    fn read(&self) -> u16 {
        // TODO: read the channel's live transfer count register (NDTR).
        self.remaining
    }
}

/// The external stepper driver chip (DIR pin plus any UART/SPI config link).
pub struct DriverProxy {
    label: &'static str,
}

impl DriverChip for DriverProxy {
    fn enable(&mut self) {
        defmt::debug!("{}: enable", self.label);
    }

    fn disable(&mut self) {
        defmt::debug!("{}: disable", self.label);
    }

    fn set_microsteps(&mut self, microsteps: u16) {
        defmt::debug!("{}: microsteps={}", self.label, microsteps);
    }

    fn set_current(&mut self, milliamps: u16) {
        defmt::debug!("{}: current={}mA", self.label, milliamps);
    }

    fn poll_fault(&mut self) -> Option<DriverFault> {
        // TODO: read the driver's fault/diag pin or status register.
        None
    }
}

type Rig = StepperDriver<AXIS_COUNT, SegmentTimerProxy, DmaProxy, DriverProxy>;

/// Shared between the boundary-tick task and the USART command handler: the
/// latter calls `prep_line`/`prep_dwell`, the former calls `boundary_tick`.
pub static STEPPER_RIG: Mutex<CriticalSectionRawMutex, Option<Rig>> = Mutex::new(None);

/// Set once a driver fault or limit trip requires the executor to stop
/// requesting new segments until the host clears it.
pub static ESTOP_LATCHED: AtomicBool = AtomicBool::new(false);

fn build_rig() -> Rig {
    let mut mgr: MotorMgr<AXIS_COUNT, SegmentTimerProxy, DmaProxy, DriverProxy> = MotorMgr::new();
    let axes = [("X", 0u8), ("Y", 1u8), ("Z", 2u8)];
    for (label, axis) in axes {
        let timer = SegmentTimerProxy { label };
        let dma = DmaProxy { remaining: 0xFFFF };
        let driver = DriverProxy { label };
        let mut config = MotorConfig::default();
        config.axis = axis;
        mgr.install(axis as usize, timer, dma, driver, config).unwrap();
    }
    StepperDriver::new(mgr)
}

/// The stepper boundary-tick task. Runs the segment-level dispatch FSM at
/// the fixed step-timer rate (§4.5); the executor that feeds `prep_line`
/// calls are driven separately, from the protocol-bridge command handler.
#[embassy_executor::task]
pub async fn stepper_task() {
    defmt::info!("Stepper task started");
    {
        let mut rig = STEPPER_RIG.lock().await;
        *rig = Some(build_rig());
    }

    let mut ticker = Ticker::every(Duration::from_hz(stepper_hal::DEFAULT_STEP_TIMER_HZ as u64));
    loop {
        ticker.next().await;
        let mut guard = STEPPER_RIG.lock().await;
        let Some(rig) = guard.as_mut() else { continue };

        match rig.boundary_tick(true) {
            TickOutcome::SegmentStarted { segment_ticks } => {
                defmt::trace!("segment started, {} ticks", segment_ticks);
            }
            TickOutcome::DriverFault { motor, fault } => {
                defmt::error!("motor {} driver fault: {:?}", motor, defmt::Debug2Format(&fault));
                rig.trigger_estop();
                ESTOP_LATCHED.store(true, Ordering::SeqCst);
            }
            TickOutcome::EstopCancelled | TickOutcome::Dwelling | TickOutcome::Polling | TickOutcome::WaitingForEnergize => {}
        }
    }
}
