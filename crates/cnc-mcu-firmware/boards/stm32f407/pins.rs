//! Pin mappings for a generic 3-axis STM32F407 breakout board.
//! This is a starting point and may need to be adjusted based on your setup.

use embassy_stm32::gpio::{AnyPin, Pin};

/// Struct to hold all the board pins.
pub struct BoardPins {
    pub led: AnyPin,
    pub x_step: AnyPin,
    pub x_dir: AnyPin,
    pub x_endstop: AnyPin,
    pub y_step: AnyPin,
    pub y_dir: AnyPin,
    pub y_endstop: AnyPin,
    pub z_step: AnyPin,
    pub z_dir: AnyPin,
    pub z_endstop: AnyPin,
    pub estop: AnyPin,
    pub uart_tx: AnyPin,
    pub uart_rx: AnyPin,
}

impl BoardPins {
    /// Creates a new `BoardPins` for the breakout board.
    pub fn new(p: embassy_stm32::Peripherals) -> Self {
        use embassy_stm32::gpio::Pin as _;

        // Note: these are example pins. Verify them against the board schematic.
        Self {
            led: p.PB1.degrade(),
            x_step: p.PE2.degrade(),
            x_dir: p.PB8.degrade(),
            x_endstop: p.PC0.degrade(),
            y_step: p.PC5.degrade(),
            y_dir: p.PB2.degrade(),
            y_endstop: p.PC1.degrade(),
            z_step: p.PC6.degrade(),
            z_dir: p.PB3.degrade(),
            z_endstop: p.PC2.degrade(),
            estop: p.PC3.degrade(),
            uart_tx: p.PA9.degrade(),
            uart_rx: p.PA10.degrade(),
        }
    }
}
