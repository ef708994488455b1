//! MCU Client
//!
//! Manages the serial connection to the microcontroller unit(s), handles
//! the controller's binary protocol for sending commands and receiving responses,
//! and updates the shared printer state.

use crate::config::McuConfig;
use crate::gcode::{McuCommand, WIRE_MOTOR_COUNT};
use crate::state::{PrinterState, PrinterStatus};
use anyhow::{Context, Result};
use cnc_proto::codec::ProtoCodec;
use cnc_proto::commands::{Command, CommandQueueStep, Message};
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::Receiver;
use tokio::time::sleep;
use tokio_serial::{SerialPortBuilderExt, SerialStream};
use tokio_util::codec::Framed;
use tracing::{error, info, warn};

/// The digital output pin wired to the e-stop relay, asserted on
/// `McuCommand::EmergencyStop`.
const ESTOP_PIN: u8 = 0;

/// Step-timer tick rate a `QueueStep` frame's `interval_ticks` is expressed
/// in. Must match the firmware's `stepper_hal::DEFAULT_STEP_TIMER_HZ`.
const STEP_TIMER_HZ: u32 = 1_000;

/// Tracks, per connection, the absolute per-motor step target last placed on
/// the wire, so each `AxisSegment`'s absolute target can be turned into the
/// signed delta a `QueueStep` frame carries.
struct WireMotorState {
    last_motor_steps: [i64; WIRE_MOTOR_COUNT],
}

impl WireMotorState {
    fn new() -> Self {
        WireMotorState {
            last_motor_steps: [0; WIRE_MOTOR_COUNT],
        }
    }

    /// Converts a dispatcher-level command into the wire commands that
    /// accomplish it. A `Move` becomes exactly `WIRE_MOTOR_COUNT` frames per
    /// segment, one per motor in fixed X/Y/Z order — `CommandQueueStep` has
    /// no motor-address field of its own, so the firmware recovers it by
    /// counting frames (see `cnc-mcu-firmware`'s `proto_bridge`).
    fn to_wire_commands(&mut self, command: &McuCommand) -> Vec<Command<'static>> {
        match command {
            McuCommand::Move(segments) => {
                let mut commands = Vec::with_capacity(segments.len() * WIRE_MOTOR_COUNT);
                for segment in segments {
                    let interval_ticks = (segment.time_seconds * STEP_TIMER_HZ as f64).round().max(1.0) as u32;
                    for (m, &target) in segment.motor_steps.iter().enumerate() {
                        let delta = target - self.last_motor_steps[m];
                        self.last_motor_steps[m] = target;
                        commands.push(Command::QueueStep(CommandQueueStep {
                            interval_ticks,
                            count: delta.unsigned_abs().min(u16::MAX as u64) as u16,
                            add: if delta > 0 { 1 } else if delta < 0 { -1 } else { 0 },
                        }));
                    }
                }
                commands
            }
            McuCommand::Home => {
                self.last_motor_steps = [0; WIRE_MOTOR_COUNT];
                vec![Command::GetStatus]
            }
            McuCommand::EmergencyStop => vec![Command::SetDigitalOut {
                pin: ESTOP_PIN,
                value: 1,
            }],
        }
    }
}

/// The main task for the real MCU client.
pub async fn run_mcu_client(
    config: McuConfig,
    mcu_rx: Receiver<McuCommand>,
    state: Arc<Mutex<PrinterState>>,
) {
    info!(
        "Attempting to connect to MCU at {} with baud rate {}",
        config.serial_port, config.baud_rate
    );

    loop {
        // Attempt to connect to the serial port.
        match tokio_serial::new(&config.serial_port, config.baud_rate).open_native_async() {
            Ok(port) => {
                info!("Successfully connected to MCU.");
                state.lock().status = PrinterStatus::Ready;
                state.lock().status_message = "Printer is ready".to_string();

                // If connection succeeds, run the communication loop.
                if let Err(e) = mcu_comm_loop(port, mcu_rx, state.clone()).await {
                    error!("MCU communication error: {}. Will attempt to reconnect.", e);
                }
            }
            Err(e) => {
                let error_msg = format!("Failed to connect to MCU: {}. Retrying in 5s.", e);
                warn!("{}", error_msg);
                let mut locked_state = state.lock();
                locked_state.status = PrinterStatus::Disconnected;
                locked_state.status_message = error_msg;
            }
        }

        // Wait before retrying connection.
        sleep(Duration::from_secs(5)).await;
    }
}

/// The main communication loop for reading from and writing to the MCU.
async fn mcu_comm_loop(
    port: SerialStream,
    mut mcu_rx: Receiver<McuCommand>,
    state: Arc<Mutex<PrinterState>>,
) -> Result<()> {
    let mut framed = Framed::new(port, ProtoCodec::new());
    let mut wire_state = WireMotorState::new();

    info!("MCU communication loop started.");
    loop {
        tokio::select! {
            Some(command) = mcu_rx.recv() => {
                info!("MCU Client received command: {:?}", command);
                for wire_command in wire_state.to_wire_commands(&command) {
                    framed
                        .send(Message::Command(wire_command))
                        .await
                        .context("failed to write command to MCU")?;
                }
            }
            frame = framed.next() => {
                match frame {
                    Some(Ok(payload)) => match ProtoCodec::parse_payload(&payload) {
                        Ok(Message::Response(response)) => {
                            info!(?response, "MCU sent response");
                        }
                        Ok(Message::Command(_)) => {
                            warn!("MCU sent a host-bound command frame, ignoring");
                        }
                        Err(e) => warn!("Failed to parse MCU response: {}", e),
                    },
                    Some(Err(e)) => {
                        let mut locked_state = state.lock();
                        locked_state.status = PrinterStatus::Error;
                        locked_state.status_message = format!("MCU protocol error: {e}");
                        return Err(e).context("MCU framing error");
                    }
                    None => {
                        info!("MCU closed the serial connection.");
                        break;
                    }
                }
            }
            else => {
                info!("MCU command channel closed. Exiting communication loop.");
                break;
            }
        }
    }
    Ok(())
}


/// The main task for the mock MCU client, used with `--mock-mcu`.
pub async fn run_mock_mcu(mut mcu_rx: Receiver<McuCommand>, state: Arc<Mutex<PrinterState>>) {
    info!("Mock MCU is running.");
    state.lock().status = PrinterStatus::Ready;
    state.lock().status_message = "Printer is ready (Mock MCU)".to_string();

    while let Some(command) = mcu_rx.recv().await {
        info!("[Mock MCU] Received command: {:?}", command);
        sleep(Duration::from_millis(50)).await;
        info!("[Mock MCU] Command processed successfully.");
    }
}

