//! Inbound frame decompression
//!
//! With `zlib-stream` transport compression every payload of a connection
//! belongs to one continuous zlib stream. Transport frames are buffered
//! until the four-byte flush sentinel `00 00 FF FF` arrives, then the
//! buffered bytes are run through the connection-long inflate context.

mod zlib;

use gateway_common::Compression;
use zlib::ZlibStreamDecompressor;

/// Errors produced while decoding an inbound binary frame
///
/// Any of these causes the connection to be closed with code 4000 and
/// reason `MALFORMED_PACKAGE`.
#[derive(Debug, thiserror::Error)]
pub enum DecompressError {
    #[error("malformed compressed data: {0}")]
    Malformed(String),

    #[error("decompressed payload is not valid UTF-8: {0}")]
    InvalidText(#[from] std::string::FromUtf8Error),
}

/// Facade over the configured transport decompression
pub struct Decompressor {
    mode: Mode,
}

enum Mode {
    /// Binary frames are plain UTF-8 text
    None,
    /// One zlib stream spanning the connection
    Zlib(ZlibStreamDecompressor),
}

impl Decompressor {
    /// Create a decompressor for the configured compression
    #[must_use]
    pub fn new(compression: Compression) -> Self {
        let mode = match compression {
            Compression::None => Mode::None,
            Compression::ZlibStream => Mode::Zlib(ZlibStreamDecompressor::new()),
        };
        Self { mode }
    }

    /// The compression this facade was built for
    #[must_use]
    pub fn kind(&self) -> Compression {
        match self.mode {
            Mode::None => Compression::None,
            Mode::Zlib(_) => Compression::ZlibStream,
        }
    }

    /// Feed one transport frame.
    ///
    /// Returns `Ok(None)` while a message is still incomplete and
    /// `Ok(Some(text))` once a full JSON text is available.
    pub fn decompress(&mut self, frame: &[u8]) -> Result<Option<String>, DecompressError> {
        match &mut self.mode {
            Mode::None => Ok(Some(String::from_utf8(frame.to_vec())?)),
            Mode::Zlib(stream) => stream.decompress(frame),
        }
    }

    /// Discard buffered input and restart the stream context.
    ///
    /// Must be called between connections: the server starts a fresh zlib
    /// stream on every connect. Also releases buffer capacity accumulated
    /// during the previous connection.
    pub fn reset(&mut self) {
        if let Mode::Zlib(stream) = &mut self.mode {
            stream.reset();
        }
    }

    /// Release all resources. The facade must not be fed again.
    pub fn shutdown(&mut self) {
        if let Mode::Zlib(stream) = &mut self.mode {
            stream.shutdown();
        }
    }
}
