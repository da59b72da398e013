//! NDJSON codec for the agent's stream-JSON output.
//!
//! Wraps [`tokio_util::codec::LinesCodec`] with a maximum line length so an
//! unterminated or runaway line from a misbehaving child cannot exhaust
//! memory.

use bytes::BytesMut;
use tokio_util::codec::{Decoder, LinesCodec, LinesCodecError};

use crate::{AppError, Result};

/// Maximum line length accepted from the child: 4 MiB.
///
/// Assistant messages embed whole tool results, so the cap is generous;
/// lines beyond it error out of `decode` instead of allocating.
pub const MAX_LINE_BYTES: usize = 4 * 1_048_576;

/// Line codec for the child's stdout stream.
///
/// Each `\n`-terminated UTF-8 string is one stream-JSON message.
#[derive(Debug)]
pub struct StreamCodec(LinesCodec);

impl StreamCodec {
    /// Create a codec with the default [`MAX_LINE_BYTES`] limit.
    #[must_use]
    pub fn new() -> Self {
        Self(LinesCodec::new_with_max_length(MAX_LINE_BYTES))
    }
}

impl Default for StreamCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for StreamCodec {
    type Item = String;
    type Error = AppError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        self.0.decode(src).map_err(map_codec_error)
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        self.0.decode_eof(src).map_err(map_codec_error)
    }
}

/// Map a [`LinesCodecError`] to an [`AppError`].
fn map_codec_error(e: LinesCodecError) -> AppError {
    match e {
        LinesCodecError::MaxLineLengthExceeded => {
            AppError::Process(format!("line too long: exceeded {MAX_LINE_BYTES} bytes"))
        }
        LinesCodecError::Io(io_err) => AppError::Io(io_err.to_string()),
    }
}
