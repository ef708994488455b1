//! Machine State Management
//!
//! This module defines the central `PrinterState` struct, which holds all dynamic
//! information about the machine, such as its position and connection status.
//! It is designed to be safely shared across multiple concurrent tasks.

use serde::Serialize;

/// Represents the current position of the toolhead.
#[derive(Debug, Clone, Serialize)]
pub struct Position {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Default for Position {
    fn default() -> Self {
        Self {
            x: 0.0,
            y: 0.0,
            z: 0.0,
        }
    }
}

/// The overall state of the machine.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub enum PrinterStatus {
    Initializing,
    Ready,
    Printing,
    Error,
    Disconnected,
}

/// A thread-safe container for all dynamic machine state.
#[derive(Debug, Clone, Serialize)]
pub struct PrinterState {
    pub status: PrinterStatus,
    pub status_message: String,
    pub position: Position,
}

impl PrinterState {
    /// Creates a new `PrinterState` with default values.
    pub fn new() -> Self {
        Self {
            status: PrinterStatus::Initializing,
            status_message: "Server is starting...".to_string(),
            position: Position::default(),
        }
    }
}

impl Default for PrinterState {
    fn default() -> Self {
        Self::new()
    }
}
