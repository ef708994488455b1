//! # RTIC-based Firmware Entry Point
//!
//! Alternative firmware entry point using RTIC instead of the default
//! Embassy async executor: a hardware-task-driven architecture where
//! peripherals and interrupts directly trigger firmware logic.

#![allow(unused_imports)]

#[rtic::app(device = stm32f4xx_hal::pac, dispatchers = [EXTI0, EXTI1, EXTI2, EXTI3])]
mod app {
    use stm32f4xx_hal::{
        gpio::{gpiod, Output, PushPull, Speed},
        pac::{TIM2, USART1},
        prelude::*,
        serial::{Config as SerialConfig, Event as SerialEvent, Rx, Serial, Tx},
        timer::{CounterUs, Event as TimerEvent},
    };
    use rtic_monotonics::{systick::*, Monotonic};

    // Workspace crates
    use stepper_hal::hw::{DmaCounter, DriverChip, DriverFault, Prescaler, SegmentTimer};
    use stepper_hal::{MotorConfig, MotorMgr, StepperDriver, TickOutcome};

    // This entry point demonstrates a single axis driven directly off TIM2;
    // a full multi-axis board assigns one segment timer per axis the way
    // `crate::stepper`'s Embassy entry point's proxies are laid out.
    const AXIS_COUNT: usize = 1;

    type LedPin = gpiod::PD12<Output<PushPull>>;
    type Rig = StepperDriver<AXIS_COUNT, StepperTimerProxy, DmaProxy, DriverProxy>;

    // The proxies below bridge RTIC's `#[local]` resources (owned directly
    // by the framework) to the `stepper_hal::hw` traits that `StepperDriver`
    // is generic over.

    struct StepperTimerProxy {
        tim: CounterUs<TIM2>,
    }
    impl SegmentTimer for StepperTimerProxy {
        fn configure(&mut self, _prescaler: Prescaler, period: u16) {
            self.tim.start(period.micros()).unwrap();
        }
        fn rescale_running_count(&mut self, _old: Prescaler, _new: Prescaler) {
            // TODO: read/rewrite CNT to rescale the in-flight edge phase.
        }
        fn stop(&mut self) {
            self.tim.cancel().ok();
        }
    }

    // In a full implementation this wraps the DMA channel's NDTR register.
    struct DmaProxy {
        remaining: u16,
    }
    impl DmaCounter for DmaProxy {
        fn reset(&mut self) {
            self.remaining = 0xFFFF;
        }
        fn read(&self) -> u16 {
            self.remaining
        }
    }

    struct DriverProxy;
    impl DriverChip for DriverProxy {
        fn enable(&mut self) {}
        fn disable(&mut self) {}
        fn set_microsteps(&mut self, _microsteps: u16) {}
        fn set_current(&mut self, _milliamps: u16) {}
        fn poll_fault(&mut self) -> Option<DriverFault> {
            None
        }
    }

    #[shared]
    struct Shared {
        usart_tx: Tx<USART1>,
    }

    #[local]
    struct Local {
        led: LedPin,
        stepper: Rig,
        usart_rx: Rx<USART1>,
    }

    #[init]
    fn init(cx: init::Context) -> (Shared, Local) {
        defmt::info!("RTIC Init");
        let dp = cx.device;

        // Setup clocks
        let rcc = dp.RCC.constrain();
        let clocks = rcc.cfgr.use_hse(8.MHz()).sysclk(168.MHz()).freeze();

        // Setup systick monotonic timer
        let systick_mono_token = rtic_monotonics::create_systick_token!();
        Systick::start(cx.core.SYST, clocks.hclk().0, systick_mono_token);

        // Setup LED
        let gpiod = dp.GPIOD.split();
        let mut led = gpiod.pd12.into_push_pull_output();
        led.set_high();

        // Setup USART for communication
        let gpioa = dp.GPIOA.split();
        let tx_pin = gpioa.pa9.into_alternate();
        let rx_pin = gpioa.pa10.into_alternate();
        let serial_config = SerialConfig::default().baudrate(250_000.bps());
        let (usart_tx, mut usart_rx) = Serial::new(dp.USART1, (tx_pin, rx_pin), serial_config, &clocks)
            .unwrap()
            .split();
        usart_rx.listen(SerialEvent::Rxne);

        // Setup the segment-boundary timer (TIM2).
        let mut stepper_timer = dp.TIM2.counter_us(&clocks);
        stepper_timer.listen(TimerEvent::Update);

        let mut mgr: MotorMgr<AXIS_COUNT, StepperTimerProxy, DmaProxy, DriverProxy> = MotorMgr::new();
        let timer = StepperTimerProxy { tim: stepper_timer };
        let dma = DmaProxy { remaining: 0xFFFF };
        mgr.install(0, timer, dma, DriverProxy, MotorConfig::default()).unwrap();
        let stepper = StepperDriver::new(mgr);

        defmt::info!("RTIC Init complete.");

        (Shared { usart_tx }, Local { led, stepper, usart_rx })
    }

    #[idle(local = [led])]
    fn idle(cx: idle::Context) -> ! {
        loop {
            cx.local.led.toggle();
            Systick::delay(500.millis()).unwrap();
        }
    }

    /// Segment-boundary interrupt. Highest priority task.
    #[task(binds = TIM2, local = [stepper], priority = 4)]
    fn stepper_isr(cx: stepper_isr::Context) {
        // TODO: clear TIM2's update interrupt flag before returning; it is
        // reached through `stepper`'s `StepperTimerProxy` rather than as a
        // separate `#[local]` resource here.
        if let TickOutcome::DriverFault { motor, fault } = cx.local.stepper.boundary_tick(true) {
            defmt::error!("motor {} driver fault: {:?}", motor, defmt::Debug2Format(&fault));
            cx.local.stepper.trigger_estop();
        }
    }

    /// Communication task - handles incoming serial data.
    #[task(binds = USART1, local = [usart_rx], priority = 2)]
    fn usart_task(cx: usart_task::Context) {
        // Reads bytes from cx.local.usart_rx, feeds them to a cnc-proto
        // parser, and on a queue-line command calls `stepper.prep_line(...)`.
        if let Ok(_byte) = cx.local.usart_rx.read() {
            // TODO: feed cnc_proto::parser and dispatch the decoded command.
        }
    }
}
