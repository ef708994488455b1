//! Async and sync helpers for framed I/O.
//!
//! This module provides a convenient `ProtoFramed` wrapper that combines an
//! async I/O transport (like a TCP stream or serial port) with a `ProtoCodec`
//! to create a `Stream` and `Sink` of `Message` objects.
//!
//! This module is only available with the `std` feature.

#![cfg(feature = "std")]

use crate::codec::ProtoCodec;
use crate::commands::Message;
use crate::Error;
use bytes::Bytes;
use futures::{Sink, Stream};
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::codec::Framed;

/// A framed transport for controller messages.
///
/// This wraps an underlying `AsyncRead + AsyncWrite` stream and handles the
/// encoding and decoding of controller message frames. The stream side
/// yields the raw, unescaped, CRC-checked payload rather than a `Message`
/// directly: `Message` borrows from the bytes it's deserialized from, which
/// can't be named in a `Stream::Item` tied to a buffer local to `poll_next`.
/// Call [`ProtoCodec::parse_payload`] on the yielded bytes to get a `Message`.
pub struct ProtoFramed<T> {
    inner: Framed<T, ProtoCodec>,
}

impl<T> ProtoFramed<T>
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    /// Creates a new `ProtoFramed` transport.
    ///
    /// # Arguments
    ///
    /// * `io` - The underlying I/O stream.
    pub fn new(io: T) -> Self {
        Self {
            inner: Framed::new(io, ProtoCodec::new()),
        }
    }
}

impl<T> Stream for ProtoFramed<T>
where
    T: AsyncRead + Unpin,
{
    type Item = Result<Bytes, Error>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.inner).poll_next(cx)
    }
}

impl<'m, T> Sink<Message<'m>> for ProtoFramed<T>
where
    T: AsyncWrite + Unpin,
{
    type Error = Error;

    fn poll_ready(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Pin::new(&mut self.inner).poll_ready(cx)
    }

    fn start_send(mut self: Pin<&mut Self>, item: Message<'m>) -> Result<(), Self::Error> {
        Pin::new(&mut self.inner).start_send(item)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_close(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Pin::new(&mut self.inner).poll_close(cx)
    }
}

