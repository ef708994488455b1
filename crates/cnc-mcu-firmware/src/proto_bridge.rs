//! # Protocol Bridge
//!
//! This module is responsible for handling the communication between the host and the
//! MCU. It uses a UART to receive commands from the host, decode them, and dispatch
//! actions to other tasks. It also sends responses and other messages back to the host.
//!
//! ## Controller Protocol
//!
//! The communication between the host and the MCU uses a custom binary protocol defined
//! in the `cnc-proto` crate. The protocol is designed to be efficient and
//! reliable, with features like command compression and checksums to ensure data
//! integrity.
//!
//! `cnc-proto`'s `std`-only [`cnc_proto::codec::ProtoCodec`] (postcard over a
//! 0x7E-delimited frame) is what `cnc-host`'s `mcu_client` speaks; this `no_std`
//! side instead runs the crate's zero-copy [`cnc_proto::parser::Parser`]
//! (hand-decoded fields over a 0x1D-delimited frame, `CMD_ID`/payload/CRC16).
//! The two frame encodings aren't wire-compatible with each other yet — see
//! the design notes for why unifying them is out of scope here.
//!
//! ## Command Dispatch
//!
//! When a command is received from the host, the protocol bridge decodes it and
//! dispatches the corresponding action to the appropriate task. A queue-line command
//! is staged on [`crate::stepper::STEPPER_RIG`] via `prep_line`/`prep_dwell`; an estop
//! command latches [`crate::stepper::ESTOP_LATCHED`] directly.
//!
//! `CommandQueueStep` has no per-motor address on the wire, so the host sends
//! exactly [`crate::stepper::AXIS_COUNT`] frames per planned segment, one per
//! motor in fixed X/Y/Z order, and this bridge round-robins them back into a
//! per-motor target array before calling `prep_line` once a full cycle has
//! arrived. `count` carries the motor's step magnitude for the segment and the
//! sign of `add` carries direction (this build's segments are already
//! velocity-shaped by the host's planner, so `add`'s usual per-step ramp
//! meaning is unused). `interval_ticks` carries the whole segment's duration
//! in step-timer ticks, repeated identically on every frame in the cycle.

use core::sync::atomic::Ordering;

use cnc_proto::commands::{Command, CommandQueueStep, Message};
use cnc_proto::parser::Parser;

use embassy_stm32::gpio::AnyPin;
use embassy_stm32::peripherals::USART1;

use crate::stepper::{AXIS_COUNT, ESTOP_LATCHED, STEPPER_RIG};

/// The digital output line the host asserts for an emergency stop (must
/// match `cnc-host`'s `mcu_client::ESTOP_PIN`).
const ESTOP_PIN: u8 = 0;

/// How many bytes of partially-received frame this bridge holds onto between
/// UART reads.
const RX_BUFFER_LEN: usize = 128;

/// The USART1 link to the host, bound once at task start. Initializing the
/// peripheral itself (baud rate, DMA ring, interrupt binding) is the one
/// remaining hardware seam here; everything above it — framing, CRC,
/// command dispatch — is real.
struct UartBridge {
    _usart: USART1,
    _rx_pin: AnyPin,
    _tx_pin: AnyPin,
}

impl UartBridge {
    fn new(usart: USART1, rx_pin: AnyPin, tx_pin: AnyPin) -> Self {
        UartBridge {
            _usart: usart,
            _rx_pin: rx_pin,
            _tx_pin: tx_pin,
        }
    }

    /// Reads whatever bytes are currently available into `buf`, returning
    /// how many were read.
    ///
    /// TODO: wire this to an `embassy_stm32::usart::UartRx` DMA ring buffer
    /// over `self._usart`/`self._rx_pin` instead of polling nothing.
    async fn read_into(&mut self, buf: &mut [u8]) -> usize {
        let _ = buf;
        embassy_time::Timer::after(embassy_time::Duration::from_millis(1)).await;
        0
    }
}

/// Shifts `buf` left by `n` bytes, discarding the consumed prefix.
fn drain_front(buf: &mut heapless::Vec<u8, RX_BUFFER_LEN>, n: usize) {
    let n = n.min(buf.len());
    buf.copy_within(n.., 0);
    let new_len = buf.len() - n;
    buf.truncate(new_len);
}

/// Folds one `QueueStep` frame into the in-progress round-robin cycle,
/// committing a `prep_line` once every motor in [`AXIS_COUNT`] has one.
async fn dispatch_queue_step(
    step: CommandQueueStep,
    motor_cursor: &mut usize,
    shadow_target: &mut [i64; AXIS_COUNT],
    segment_ticks: &mut u32,
) {
    let delta = step.add.signum() as i64 * step.count as i64;
    shadow_target[*motor_cursor] += delta;
    *segment_ticks = step.interval_ticks;
    *motor_cursor += 1;

    if *motor_cursor < AXIS_COUNT {
        return;
    }
    *motor_cursor = 0;

    let time_seconds = *segment_ticks as f64 / stepper_hal::DEFAULT_STEP_TIMER_HZ as f64;
    let mut guard = STEPPER_RIG.lock().await;
    let Some(rig) = guard.as_mut() else { return };
    if let Err(e) = rig.prep_line(time_seconds, shadow_target, cnc_core::MIN_SEGMENT_TIME, cnc_core::MAX_SEGMENT_TIME) {
        defmt::warn!("proto_bridge: prep_line rejected: {:?}", defmt::Debug2Format(&e));
    }
}

async fn dispatch_digital_out(pin: u8, value: u8) {
    if pin != ESTOP_PIN || value == 0 {
        return;
    }
    let mut guard = STEPPER_RIG.lock().await;
    if let Some(rig) = guard.as_mut() {
        rig.trigger_estop();
    }
    ESTOP_LATCHED.store(true, Ordering::SeqCst);
    defmt::warn!("proto_bridge: estop asserted by host");
}

/// The protocol bridge task.
///
/// This task handles the communication between the host and the MCU.
#[embassy_executor::task]
pub async fn proto_task(usart: USART1, rx_pin: AnyPin, tx_pin: AnyPin) {
    defmt::info!("Protocol bridge task started");

    let mut uart = UartBridge::new(usart, rx_pin, tx_pin);
    let mut buf: heapless::Vec<u8, RX_BUFFER_LEN> = heapless::Vec::new();
    let mut motor_cursor = 0usize;
    let mut shadow_target = [0i64; AXIS_COUNT];
    let mut segment_ticks: u32 = 0;

    loop {
        let mut chunk = [0u8; 32];
        let n = uart.read_into(&mut chunk).await;
        if n == 0 {
            continue;
        }
        if buf.extend_from_slice(&chunk[..n]).is_err() {
            defmt::warn!("proto_bridge: RX buffer overrun, resetting frame state");
            buf.clear();
            continue;
        }

        loop {
            let parser = Parser::new();
            match parser.parse(&buf) {
                Ok(Some((Message::Command(Command::QueueStep(step)), consumed))) => {
                    drain_front(&mut buf, consumed);
                    dispatch_queue_step(step, &mut motor_cursor, &mut shadow_target, &mut segment_ticks).await;
                }
                Ok(Some((Message::Command(Command::SetDigitalOut { pin, value }), consumed))) => {
                    drain_front(&mut buf, consumed);
                    dispatch_digital_out(pin, value).await;
                }
                Ok(Some((Message::Command(other), consumed))) => {
                    defmt::trace!("proto_bridge: ignoring command not wired to a collaborator: {:?}", defmt::Debug2Format(&other));
                    drain_front(&mut buf, consumed);
                }
                Ok(Some((Message::Response(_), consumed))) => {
                    defmt::warn!("proto_bridge: host sent a response-shaped frame, ignoring");
                    drain_front(&mut buf, consumed);
                }
                Ok(None) => break,
                Err((e, discard)) => {
                    defmt::warn!("proto_bridge: {:?}", defmt::Debug2Format(&e));
                    drain_front(&mut buf, discard);
                }
            }
        }
    }
}
