#![deny(clippy::all)]
#![deny(warnings)]
#![cfg_attr(not(feature = "std"), no_std)]

//! # Controller MCU Protocol
//!
//! A `no_std` zero-copy implementation of the controller MCU binary protocol.
//! This crate provides a high-performance parser for decoding messages from a
//! host and definitions for all protocol commands and responses.
//!
//! ## Key Components
//!
//! - **[`parser`]**: A zero-copy `Parser` that can decode messages from a byte
//!   stream, designed for use in interrupt handlers or async tasks.
//! - **[`commands`]**: Typed enums for all `Command`s and `Response`s in the
//!   protocol.
//! - **[`crc`]**: A `const fn` implementation of the CRC16-CCITT algorithm used
//!   for message integrity.
//!
//! ## Design
//!
//! The parser is designed for performance and robustness:
//!
//! - **Zero-Copy**: It operates on `&[u8]` slices and avoids heap allocations.
//! - **Streaming**: It can handle partial messages, finding frame boundaries
//!   in a continuous stream of bytes.
//! - **Fuzzing-Resistant**: Robust checks for length and CRC prevent panics
//!   or errors from malformed input.

#[cfg(feature = "alloc")]
extern crate alloc;

pub mod commands;
pub mod crc;
pub mod parser;
pub mod registry;

#[cfg(feature = "std")]
pub mod codec;
#[cfg(feature = "std")]
pub mod io;

/// Common error type for the protocol crate.
#[derive(Debug, PartialEq, Eq)]
#[cfg_attr(feature = "std", derive(thiserror::Error))]
pub enum Error {
    /// A frame was received that was not long enough to be valid.
    #[cfg_attr(feature = "std", error("incomplete frame"))]
    IncompleteFrame,
    /// An invalid frame sync byte (0x1D) was expected but not found.
    #[cfg_attr(feature = "std", error("invalid frame sync byte"))]
    InvalidSync,
    /// The CRC-16 checksum of a received frame was invalid.
    #[cfg_attr(feature = "std", error("invalid frame CRC"))]
    InvalidCrc,
    /// The message payload could not be deserialized into a known command.
    #[cfg_attr(feature = "std", error("invalid message payload"))]
    InvalidPayload,
    /// A buffer was too small for the requested operation.
    #[cfg_attr(feature = "std", error("buffer too small"))]
    BufferTooSmall,
    /// An escape byte (0x7D) was the last byte of a frame with nothing to unescape.
    #[cfg_attr(feature = "std", error("dangling escape byte"))]
    Incomplete,
    /// The underlying I/O transport failed.
    #[cfg(feature = "std")]
    #[cfg_attr(feature = "std", error("I/O error: {0:?}"))]
    Io(std::io::ErrorKind),
}

#[cfg(feature = "std")]
impl From<postcard::Error> for Error {
    fn from(_: postcard::Error) -> Self {
        Error::InvalidPayload
    }
}

#[cfg(feature = "std")]
impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e.kind())
    }
}
