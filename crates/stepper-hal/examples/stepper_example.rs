#![no_std]
#![no_main]

use defmt_rtt as _;
use panic_probe as _;
use stepper_hal::hw::{DmaCounter, DriverChip, DriverFault, Prescaler, SegmentTimer};
use stepper_hal::{MotorConfig, MotorMgr, StepperDriver, TickOutcome};

struct MockTimer(&'static str);
impl SegmentTimer for MockTimer {
    fn configure(&mut self, prescaler: Prescaler, period: u16) {
        defmt::info!("{}: configure prescaler={} period={}", self.0, prescaler as u32, period);
    }
    fn rescale_running_count(&mut self, old: Prescaler, new: Prescaler) {
        defmt::info!("{}: rescale {} -> {}", self.0, old as u32, new as u32);
    }
    fn stop(&mut self) {
        defmt::info!("{}: stop", self.0);
    }
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

struct MockDriver(&'static str);
impl DriverChip for MockDriver {
    fn enable(&mut self) {
        defmt::info!("{}: enable", self.0);
    }
    fn disable(&mut self) {
        defmt::info!("{}: disable", self.0);
    }
    fn set_microsteps(&mut self, microsteps: u16) {
        defmt::info!("{}: microsteps={}", self.0, microsteps);
    }
    fn set_current(&mut self, milliamps: u16) {
        defmt::info!("{}: current={}mA", self.0, milliamps);
    }
    fn poll_fault(&mut self) -> Option<DriverFault> {
        None
    }
}

#[cortex_m_rt::entry]
fn main() -> ! {
    defmt::info!("--- Stepper HAL example: X and Y over three segments ---");

    let mut mgr: MotorMgr<2, MockTimer, MockDma, MockDriver> = MotorMgr::new();
    mgr.install(0, MockTimer("X"), MockDma::default(), MockDriver("X"), MotorConfig::default()).unwrap();
    mgr.install(1, MockTimer("Y"), MockDma::default(), MockDriver("Y"), MotorConfig::default()).unwrap();
    let mut driver = StepperDriver::new(mgr);

    let targets = [[200i64, 0i64], [400, 200], [600, 600]];
    for target in targets {
        driver.prep_line(0.005, &target, 0.0005, 0.050).unwrap();
        match driver.boundary_tick(true) {
            TickOutcome::SegmentStarted { segment_ticks } => {
                defmt::info!("segment started, {} ticks", segment_ticks);
            }
            other => defmt::info!("unexpected outcome: {:?}", defmt::Debug2Format(&other)),
        }
    }

    defmt::info!("X encoder: {}", driver.motors().encoder_steps(0).unwrap_or_default());
    defmt::info!("Y encoder: {}", driver.motors().encoder_steps(1).unwrap_or_default());

    loop {
        cortex_m::asm::wfi();
    }
}
