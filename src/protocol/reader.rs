//! Incremental framed reads over a byte stream.
//!
//! A [`StreamReader`] owns the inner stream plus a grow-only buffer and turns
//! the unbounded byte flow into discrete framed values: exact-length slices,
//! fixed-width big-endian structs, single bytes, null-terminated strings.
//! Reads resolve strictly in call order and never deliver a byte twice;
//! whatever arrives beyond the requested frame stays buffered until the next
//! read, or travels with the stream when the handshake hands it off via
//! [`StreamReader::into_parts`] or [`StreamReader::into_stream`].

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::{Buf, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, ReadBuf};

use crate::error::HandshakeError;

pub struct StreamReader<R> {
    inner: R,
    buf: BytesMut,
}

impl<R: AsyncRead + Unpin> StreamReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            buf: BytesMut::with_capacity(512),
        }
    }

    /// Bytes received but not yet consumed by any read.
    pub fn buffered(&self) -> &[u8] {
        &self.buf
    }

    /// Mutable access to the inner stream, for writing negotiation replies
    /// while reads stay buffered here.
    pub fn get_mut(&mut self) -> &mut R {
        &mut self.inner
    }

    async fn fill(&mut self, need: usize) -> Result<(), HandshakeError> {
        while self.buf.len() < need {
            let n = self.inner.read_buf(&mut self.buf).await?;
            if n == 0 {
                return Err(HandshakeError::Disconnected);
            }
        }
        Ok(())
    }

    /// Read exactly `n` bytes, leaving anything beyond them buffered.
    ///
    /// # Panics
    ///
    /// A zero-length request is a contract violation and panics.
    pub async fn read_exact_length(&mut self, n: usize) -> Result<Bytes, HandshakeError> {
        assert!(n > 0, "read of zero bytes requested");
        self.fill(n).await?;
        Ok(self.buf.split_to(n).freeze())
    }

    /// Read a fixed-width big-endian struct described by `(name, width)`
    /// pairs. Supported widths are 1, 2 and 4 bytes; anything else fails
    /// with `MalformedFrame` before a single byte is consumed.
    pub async fn read_struct(
        &mut self,
        fields: &[(&'static str, usize)],
    ) -> Result<StructReads, HandshakeError> {
        let mut total = 0usize;
        for (_, width) in fields {
            match width {
                1 | 2 | 4 => total += width,
                _ => return Err(HandshakeError::MalformedFrame("unsupported field width")),
            }
        }

        let mut raw = self.read_exact_length(total).await?;
        let mut out = Vec::with_capacity(fields.len());
        for (name, width) in fields {
            let value = match width {
                1 => u64::from(raw.get_u8()),
                2 => u64::from(raw.get_u16()),
                _ => u64::from(raw.get_u32()),
            };
            out.push((*name, value));
        }
        Ok(StructReads { fields: out })
    }

    pub async fn read_byte(&mut self) -> Result<u8, HandshakeError> {
        self.fill(1).await?;
        Ok(self.buf.get_u8())
    }

    /// Read one byte and require it to equal `expect`.
    pub async fn read_byte_assert(&mut self, expect: u8) -> Result<u8, HandshakeError> {
        let byte = self.read_byte().await?;
        if byte != expect {
            return Err(HandshakeError::MalformedFrame("unexpected byte"));
        }
        Ok(byte)
    }

    /// Accumulate bytes until a 0x00 terminator; the terminator is consumed
    /// but not returned.
    pub async fn read_null_terminated_string(&mut self) -> Result<Vec<u8>, HandshakeError> {
        let mut out = Vec::new();
        loop {
            let byte = self.read_byte().await?;
            if byte == 0x00 {
                return Ok(out);
            }
            out.push(byte);
        }
    }

    /// Keep buffering incoming bytes until the peer half-closes or errors.
    /// Used to observe the client going away while a connect attempt is
    /// still in flight; anything received meanwhile stays in the buffer.
    pub async fn wait_closed(&mut self) {
        loop {
            match self.inner.read_buf(&mut self.buf).await {
                Ok(0) | Err(_) => return,
                Ok(_) => {}
            }
        }
    }

    /// Hand the stream and the unconsumed residue to the next owner, so at
    /// most one consumer exists at any moment.
    pub fn into_parts(self) -> (R, BytesMut) {
        (self.inner, self.buf)
    }

    /// Wrap the stream so the residue is replayed ahead of fresh reads.
    pub fn into_stream(self) -> PrefixedStream<R> {
        PrefixedStream {
            prefix: self.buf,
            inner: self.inner,
        }
    }
}

/// Decoded fields of a [`StreamReader::read_struct`] call, keyed by name.
#[derive(Debug)]
pub struct StructReads {
    fields: Vec<(&'static str, u64)>,
}

impl StructReads {
    /// # Panics
    ///
    /// Panics when `name` was not part of the field spec; that is a bug in
    /// the calling parser, not a wire condition.
    pub fn get(&self, name: &str) -> u64 {
        self.fields
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, v)| *v)
            .unwrap_or_else(|| panic!("no struct field named {:?}", name))
    }
}

/// A stream with leftover handshake bytes replayed before fresh reads.
/// Writes pass straight through.
pub struct PrefixedStream<S> {
    prefix: BytesMut,
    inner: S,
}

impl<S> PrefixedStream<S> {
    pub fn get_ref(&self) -> &S {
        &self.inner
    }
}

impl<S: AsyncRead + Unpin> AsyncRead for PrefixedStream<S> {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        if !self.prefix.is_empty() {
            let n = self.prefix.len().min(buf.remaining());
            buf.put_slice(&self.prefix.split_to(n));
            return Poll::Ready(Ok(()));
        }
        Pin::new(&mut self.inner).poll_read(cx, buf)
    }
}

impl<S: AsyncWrite + Unpin> AsyncWrite for PrefixedStream<S> {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        data: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.inner).poll_write(cx, data)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_shutdown(cx)
    }
}
