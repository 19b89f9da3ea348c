//! zlib-stream inflation
//!
//! The gateway concatenates every payload of a connection into a single
//! zlib stream and marks message boundaries with a `Z_SYNC_FLUSH`, whose
//! last four bytes are always `00 00 FF FF`.

use super::DecompressError;
use flate2::{Decompress, FlushDecompress, Status};

/// Four-byte tail of a zlib sync flush, marking a complete message
const ZLIB_SUFFIX: [u8; 4] = [0x00, 0x00, 0xFF, 0xFF];

/// Initial capacity for the inflated output of one message
const OUTPUT_CHUNK: usize = 8 * 1024;

pub(super) struct ZlibStreamDecompressor {
    /// Inflate context shared by every message of the connection
    inflater: Decompress,
    /// Transport frames accumulated until the sync-flush suffix arrives
    pending: Vec<u8>,
}

impl ZlibStreamDecompressor {
    pub(super) fn new() -> Self {
        Self {
            inflater: Decompress::new(true),
            pending: Vec::new(),
        }
    }

    pub(super) fn decompress(&mut self, frame: &[u8]) -> Result<Option<String>, DecompressError> {
        self.pending.extend_from_slice(frame);
        if self.pending.len() < ZLIB_SUFFIX.len()
            || self.pending[self.pending.len() - ZLIB_SUFFIX.len()..] != ZLIB_SUFFIX
        {
            // Message still incomplete
            return Ok(None);
        }

        let input = std::mem::take(&mut self.pending);
        let mut out: Vec<u8> = Vec::with_capacity(OUTPUT_CHUNK.max(input.len() * 3));
        let mut consumed = 0usize;

        loop {
            if out.len() == out.capacity() {
                out.reserve(OUTPUT_CHUNK);
            }

            let before_in = self.inflater.total_in();
            let before_out = self.inflater.total_out();
            let status = self
                .inflater
                .decompress_vec(&input[consumed..], &mut out, FlushDecompress::Sync)
                .map_err(|e| DecompressError::Malformed(e.to_string()))?;
            consumed += (self.inflater.total_in() - before_in) as usize;
            let produced = self.inflater.total_out() - before_out;

            if matches!(status, Status::StreamEnd) {
                break;
            }
            if consumed >= input.len() {
                // All input consumed; if the flush had spare room the
                // output is complete, otherwise grow and drain the rest.
                if out.len() < out.capacity() {
                    break;
                }
            } else if produced == 0 && out.len() < out.capacity() {
                // Neither consuming nor producing with room to spare: the
                // sync flush should have ended the message here.
                return Err(DecompressError::Malformed(
                    "inflater stalled before end of message".to_string(),
                ));
            }
        }

        Ok(Some(String::from_utf8(out)?))
    }

    pub(super) fn reset(&mut self) {
        self.inflater.reset(true);
        // Fresh allocation so capacity from a large previous connection
        // is returned to the allocator.
        self.pending = Vec::new();
    }

    pub(super) fn shutdown(&mut self) {
        self.pending = Vec::new();
    }
}
