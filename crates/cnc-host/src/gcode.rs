//! G-code Parser and Dispatcher
//!
//! This module provides a parser for G-code commands and a central dispatcher
//! that receives commands from a channel and acts on them, updating the printer
//! state and sending instructions to the MCU.
//!
//! Move timing is not computed here. Every `G0`/`G1` is handed to a
//! [`cnc_core::Machine`] (look-ahead planner, jerk-limited segment executor
//! and soft-limit/feedhold state machine), and the segments it emits from
//! `Machine::tick()` are what actually get sent on to the MCU client.

use crate::{
    config::PrinterConfig,
    state::{Position, PrinterState},
};
use anyhow::Result;
use cnc_core::kinematics::{Axis, AxisId, AxisMode, CartesianKinematics};
use cnc_core::{Machine, TickOutcome, MAX_AXES};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::mpsc::{Receiver, Sender};
use tracing::{info, warn};

/// Depth of the look-ahead move queue the host-side machine plans over.
const MOVE_QUEUE_DEPTH: usize = 32;

/// How many motors the wire protocol and firmware currently address (X, Y,
/// Z only — `A`/`B`/`C` are planned over but never wired to a stepper on
/// this build).
pub const WIRE_MOTOR_COUNT: usize = 3;

type HostMachine = Machine<MOVE_QUEUE_DEPTH, CartesianKinematics>;

/// One jerk-limited segment ready to become wire commands: how long it
/// takes and each wired motor's absolute step target at the end of it.
#[derive(Debug, Clone, Copy)]
pub struct AxisSegment {
    pub time_seconds: f64,
    pub motor_steps: [i64; WIRE_MOTOR_COUNT],
}

/// A command to be sent to the MCU.
#[derive(Debug)]
pub enum McuCommand {
    Move(Vec<AxisSegment>),
    Home,
    EmergencyStop,
}

/// Represents a single parsed G-code command.
#[derive(Debug, PartialEq, Clone)]
pub struct GCode {
    pub command: String,
    pub params: Vec<(char, f32)>,
}

/// G-code parser that handles commands, parameters, and comments.
pub fn parse_gcode(line: &str) -> Option<GCode> {
    let clean_line = line.split(';').next().unwrap_or("").trim();
    if clean_line.is_empty() {
        return None;
    }

    let mut parts = clean_line.split_whitespace();
    let command = parts.next()?.to_uppercase();
    let mut params = Vec::new();

    for part in parts {
        let mut chars = part.chars();
        if let Some(key) = chars.next() {
            let value_str: String = chars.collect();
            if let Ok(value) = value_str.parse::<f32>() {
                params.push((key.to_ascii_uppercase(), value));
            }
        }
    }

    Some(GCode { command, params })
}

/// Builds the axis table and Cartesian motor mapping a [`HostMachine`] plans
/// over from the loaded printer config. Only X/Y/Z are populated; A/B/C stay
/// `AxisMode::Disabled` since nothing downstream of this host wires them.
///
/// `PrinterConfig` carries no travel-extent fields, so soft limits stay
/// disabled here rather than guessed at; homing is still required before
/// G-code line numbers resume, but nothing gates moves on it.
fn build_axes(config: &PrinterConfig) -> (CartesianKinematics, [Axis; MAX_AXES]) {
    let mut axes = [Axis::default(); MAX_AXES];
    let jerk_max = config.printer.max_accel as f64;
    let specs = [
        (AxisId::X, config.stepper_x.steps_per_mm as f64, config.stepper_x.max_velocity as f64),
        (AxisId::Y, config.stepper_y.steps_per_mm as f64, config.stepper_y.max_velocity as f64),
        (AxisId::Z, config.stepper_z.steps_per_mm as f64, config.stepper_z.max_velocity as f64),
    ];

    let mut kinematics = CartesianKinematics::default();
    for (axis_id, steps_per_mm, velocity_max) in specs {
        let i = axis_id.ordinal();
        axes[i] = Axis {
            mode: AxisMode::Standard,
            velocity_max,
            feedrate_max: velocity_max,
            jerk_max,
            radius: 0.0,
            travel_min: 0.0,
            travel_max: 0.0,
            soft_limits_enabled: false,
            homed: true,
        };
        kinematics.axis_of[i] = Some(axis_id);
        kinematics.steps_per_unit[i] = steps_per_mm;
    }
    kinematics.axes = axes;
    (kinematics, axes)
}

/// The central dispatcher for processing G-code commands.
pub struct GCodeDispatcher {
    config: Arc<PrinterConfig>,
    state: Arc<Mutex<PrinterState>>,
    mcu_tx: Sender<McuCommand>,
    machine: HostMachine,
    /// Last commanded feedrate (mm/min), sticky across blocks per modal G-code rules.
    feedrate: f32,
}

impl GCodeDispatcher {
    /// Creates a new `GCodeDispatcher`.
    pub fn new(
        config: Arc<PrinterConfig>,
        state: Arc<Mutex<PrinterState>>,
        mcu_tx: Sender<McuCommand>,
    ) -> Self {
        let (kinematics, axes) = build_axes(&config);
        let machine = HostMachine::new(kinematics, axes);
        Self {
            config,
            state,
            mcu_tx,
            machine,
            feedrate: 0.0,
        }
    }

    /// The main run loop that listens for and processes G-code commands.
    pub async fn run(&mut self, mut gcode_rx: Receiver<GCode>) {
        info!("G-code dispatcher is running.");
        while let Some(gcode) = gcode_rx.recv().await {
            info!("Dispatching G-code: {:?}", gcode);
            if let Err(e) = self.dispatch(gcode).await {
                warn!("Error dispatching G-code: {}", e);
            }
        }
    }

    /// Routes a G-code command to the appropriate handler.
    async fn dispatch(&mut self, gcode: GCode) -> Result<()> {
        match gcode.command.as_str() {
            "G0" | "G1" => self.handle_g0_g1(gcode).await?,
            "G28" => self.handle_g28().await?,
            "M112" => self.handle_m112().await?,
            _ => warn!("Unknown G-code command: {}", gcode.command),
        }
        Ok(())
    }

    /// Handles G0/G1 (Linear Move) commands: resolves the target, queues it
    /// on the machine as a rapid (`G0`) or feed-rate move (`G1`), then drains
    /// and ships every segment the planner/executor produce for it.
    async fn handle_g0_g1(&mut self, gcode: GCode) -> Result<()> {
        let mut target = self.machine.position();
        for (param, value) in gcode.params {
            match param {
                'X' => target[AxisId::X.ordinal()] = value as f64,
                'Y' => target[AxisId::Y.ordinal()] = value as f64,
                'Z' => target[AxisId::Z.ordinal()] = value as f64,
                'F' => self.feedrate = value,
                _ => {}
            }
        }

        let result = if gcode.command == "G0" {
            self.machine.rapid(target)
        } else {
            self.machine.feed(target, self.feedrate as f64)
        };
        if let Err(e) = result {
            warn!("G-code move rejected: {}", e);
            return Ok(());
        }

        self.state.lock().position = Position {
            x: target[AxisId::X.ordinal()] as f32,
            y: target[AxisId::Y.ordinal()] as f32,
            z: target[AxisId::Z.ordinal()] as f32,
        };

        self.drain_segments().await
    }

    /// Drains every segment the last queued move produced from the executor
    /// and ships them as one `McuCommand::Move` batch.
    async fn drain_segments(&mut self) -> Result<()> {
        let mut segments = Vec::new();
        loop {
            match self.machine.tick() {
                Ok(TickOutcome::Idle) => break,
                Ok(TickOutcome::Segment(segment)) => {
                    let mut motor_steps = [0i64; WIRE_MOTOR_COUNT];
                    for (m, step) in motor_steps.iter_mut().enumerate() {
                        *step = segment.motor_target_steps[m].round() as i64;
                    }
                    segments.push(AxisSegment {
                        time_seconds: segment.time,
                        motor_steps,
                    });
                }
                Err(e) => {
                    warn!("machine alarmed while draining segments: {}", e);
                    let mut locked = self.state.lock();
                    locked.status = crate::state::PrinterStatus::Error;
                    locked.status_message = format!("Motion fault: {e}");
                    break;
                }
            }
        }
        if !segments.is_empty() {
            self.mcu_tx.send(McuCommand::Move(segments)).await?;
        }
        Ok(())
    }

    /// Handles G28 (Auto Home) commands.
    async fn handle_g28(&mut self) -> Result<()> {
        info!("Homing axes...");
        let _ = self.machine.begin_homing();
        self.mcu_tx.send(McuCommand::Home).await?;
        // The real MCU would report back that homing is complete; this host
        // assumes it lands at the origin once the command is sent.
        self.machine.sync_after_homing([0.0; MAX_AXES]);
        self.state.lock().position = Position::default();
        info!("Homing complete. Position reset.");
        Ok(())
    }

    /// Handles M112 (Emergency Stop) commands.
    async fn handle_m112(&mut self) -> Result<()> {
        warn!("Emergency stop requested!");
        self.machine.alarm(true);
        self.mcu_tx.send(McuCommand::EmergencyStop).await?;
        self.state.lock().status = crate::state::PrinterStatus::Error;
        self.state.lock().status_message = "Emergency Stop".to_string();
        Ok(())
    }
}
