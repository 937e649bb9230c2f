//! NDJSON frame decoding (Bytes -> typed envelopes).
//!
//! The decoder knows nothing about payload semantics: it splits on `\n`, decodes
//! each non-blank line into the caller's `T`, and stops at the first bad frame.

use crate::{BoxStream, Error, Result};
use bytes::{Bytes, BytesMut};
use futures::{stream, StreamExt};
use serde::de::DeserializeOwned;
use std::marker::PhantomData;

const DELIMITER: u8 = b'\n';

/// Accumulates chunk bytes and hands out complete lines.
///
/// Holds only the bytes after the last delimiter, never the full history. Works on
/// raw bytes, so a multi-byte character split across chunks is reassembled before
/// any UTF-8 validation happens.
#[derive(Debug, Default)]
pub struct FrameBuffer {
    buf: BytesMut,
    /// Prefix of `buf` already searched for a delimiter.
    scanned: usize,
}

impl FrameBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn extend(&mut self, chunk: &[u8]) {
        self.buf.extend_from_slice(chunk);
    }

    /// Next complete, non-blank frame without its delimiter.
    pub fn next_frame(&mut self) -> Option<Bytes> {
        while let Some(offset) = self.buf[self.scanned..].iter().position(|b| *b == DELIMITER) {
            let pos = self.scanned + offset;
            self.scanned = 0;
            let mut line = self.buf.split_to(pos + 1);
            line.truncate(pos);
            if !is_blank(&line) {
                return Some(line.freeze());
            }
        }
        self.scanned = self.buf.len();
        None
    }

    /// Whatever is left once the source has ended, if it is not blank.
    pub fn take_remainder(&mut self) -> Option<Bytes> {
        let rest = self.buf.split();
        self.scanned = 0;
        if is_blank(&rest) {
            None
        } else {
            Some(rest.freeze())
        }
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }
}

fn is_blank(bytes: &[u8]) -> bool {
    bytes.iter().all(u8::is_ascii_whitespace)
}

fn decode_frame<T: DeserializeOwned>(frame: &[u8]) -> Result<T> {
    serde_json::from_slice(frame).map_err(|e| Error::decoding(e, frame))
}

/// Turns a chunk stream into a stream of decoded `T`, one per line.
///
/// - frames come out in arrival order
/// - a trailing frame without `\n` is decoded once the source ends
/// - the first decode failure or source error is yielded and ends the stream
pub struct FrameDecoder<T> {
    _marker: PhantomData<fn() -> T>,
}

impl<T> FrameDecoder<T>
where
    T: DeserializeOwned + Send + 'static,
{
    pub fn new() -> Self {
        Self {
            _marker: PhantomData,
        }
    }

    pub fn decode_stream(&self, input: BoxStream<'static, Bytes>) -> BoxStream<'static, T> {
        // `None` input means the sequence hit a terminal item; the source is dropped
        // right away so the transport behind it is released.
        let state = (Some(input), FrameBuffer::new());
        let stream = stream::unfold(state, |(mut input, mut buffer)| async move {
            loop {
                let source = input.as_mut()?;

                if let Some(frame) = buffer.next_frame() {
                    let item = decode_frame::<T>(&frame);
                    if item.is_err() {
                        input = None;
                    }
                    return Some((item, (input, buffer)));
                }

                match source.next().await {
                    Some(Ok(chunk)) => buffer.extend(&chunk),
                    Some(Err(e)) => return Some((Err(e), (None, buffer))),
                    None => {
                        let rest = buffer.take_remainder()?;
                        return Some((decode_frame::<T>(&rest), (None, buffer)));
                    }
                }
            }
        });

        Box::pin(stream)
    }
}

impl<T> Default for FrameDecoder<T>
where
    T: DeserializeOwned + Send + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

/// Shorthand for `FrameDecoder::<T>::new().decode_stream(input)`.
pub fn decode_ndjson<T>(input: BoxStream<'static, Bytes>) -> BoxStream<'static, T>
where
    T: DeserializeOwned + Send + 'static,
{
    FrameDecoder::<T>::new().decode_stream(input)
}
