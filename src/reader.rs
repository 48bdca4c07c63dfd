use std::io::{self, Read, Seek, SeekFrom};

use bytes::{Buf, Bytes};

use crate::error::WebSrcError;
use crate::source::{PullOutcome, PullSource, SeekSegment};

/// File-like view over a [`PullSource`] for decoders that want `Read + Seek`.
pub struct SourceReader<S: PullSource> {
    source: S,
    /// Position of the next byte `read` returns.
    position: u64,
    pending: Bytes,
}

impl<S: PullSource> SourceReader<S> {
    pub fn new(source: S) -> Self {
        Self { source, position: 0, pending: Bytes::new() }
    }

    pub fn position(&self) -> u64 {
        self.position
    }

    pub fn get_ref(&self) -> &S {
        &self.source
    }

    pub fn into_inner(self) -> S {
        self.source
    }
}

fn to_io_error(err: WebSrcError) -> io::Error {
    match err {
        WebSrcError::Io { message } => io::Error::new(io::ErrorKind::Other, message),
        err => io::Error::new(io::ErrorKind::Other, err),
    }
}

impl<S: PullSource> Read for SourceReader<S> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }

        if self.pending.is_empty() {
            match self.source.pull().map_err(to_io_error)? {
                PullOutcome::Chunk(chunk) => {
                    self.position = chunk.offset;
                    self.pending = chunk.data;
                }
                PullOutcome::EndOfStream => return Ok(0),
                PullOutcome::Flushing => {
                    return Err(io::Error::new(io::ErrorKind::WouldBlock, "source is flushing"));
                }
            }
        }

        let length = buf.len().min(self.pending.len());
        self.pending.copy_to_slice(&mut buf[..length]);
        self.position += length as u64;
        Ok(length)
    }
}

impl<S: PullSource> Seek for SourceReader<S> {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let target = match pos {
            SeekFrom::Start(offset) => Some(offset),
            SeekFrom::Current(delta) => self.position.checked_add_signed(delta),
            SeekFrom::End(delta) => {
                let size = self
                    .source
                    .size()
                    .ok_or_else(|| io::Error::new(io::ErrorKind::Unsupported, "size of the resource is unknown"))?;
                size.checked_add_signed(delta)
            }
        };
        let target =
            target.ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "seek to a negative position"))?;

        if target == self.position {
            return Ok(target);
        }

        if !self.source.seek(SeekSegment::bytes(target, None)).map_err(to_io_error)? {
            return Err(io::Error::new(io::ErrorKind::Unsupported, "resource is not seekable"));
        }

        self.pending.clear();
        self.position = target;
        Ok(target)
    }
}
