//! Frame codec
//!
//! Turns raw socket frames into gateway messages and back. Text frames are
//! plain JSON. Binary frames are compressed in one of two independent ways:
//! a one-shot blob for the identify burst, or a zlib stream spanning the
//! whole connection where each complete message ends with `00 00 FF FF`.

use crate::messages::GatewayMessage;
use flate2::{Decompress, DecompressError, FlushDecompress, Status};
use serde_json::Value;
use std::io::Read;

/// Trailer marking a complete message in the transport compression stream
pub const ZLIB_SUFFIX: [u8; 4] = [0x00, 0x00, 0xFF, 0xFF];

/// Output chunk size used while inflating
const INFLATE_CHUNK_SIZE: usize = 16 * 1024;

/// Negotiated transport compression method
///
/// Named in the `compress` query parameter of the connect URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionMethod {
    /// Continuous zlib stream over the socket's lifetime
    ZlibStream,
}

impl CompressionMethod {
    /// Value for the `compress` query parameter
    #[must_use]
    pub const fn query_value(self) -> &'static str {
        match self {
            Self::ZlibStream => "zlib-stream",
        }
    }
}

/// Codec errors
///
/// Decompression failures are fatal for the connection that produced them;
/// the owning session must tear the socket down and reconnect.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("transport stream decompression failed: {0}")]
    TransportInflate(#[source] DecompressError),

    #[error("identify payload decompression failed: {0}")]
    IdentifyInflate(#[source] std::io::Error),

    #[error("decompressed payload is not valid UTF-8")]
    InvalidUtf8(#[from] std::string::FromUtf8Error),

    #[error("received a binary frame but no compression is configured")]
    UnexpectedBinaryFrame,
}

/// Accumulator for transport-compression chunks
///
/// Chunks are buffered in arrival order until one ends with [`ZLIB_SUFFIX`],
/// at which point the concatenation forms one complete compressed message.
#[derive(Debug, Default)]
pub struct CompressionBuffer {
    chunks: Vec<Vec<u8>>,
    total_len: usize,
}

impl CompressionBuffer {
    /// Create an empty buffer
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk
    pub fn push(&mut self, chunk: &[u8]) {
        self.total_len += chunk.len();
        self.chunks.push(chunk.to_vec());
    }

    /// Check whether a chunk carries the complete-message trailer
    #[must_use]
    pub fn has_suffix(chunk: &[u8]) -> bool {
        chunk.len() >= ZLIB_SUFFIX.len() && chunk[chunk.len() - ZLIB_SUFFIX.len()..] == ZLIB_SUFFIX
    }

    /// Concatenate all buffered chunks in arrival order
    #[must_use]
    pub fn concat(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.total_len);
        for chunk in &self.chunks {
            out.extend_from_slice(chunk);
        }
        out
    }

    /// Drop all buffered chunks
    pub fn clear(&mut self) {
        self.chunks.clear();
        self.total_len = 0;
    }

    /// Number of buffered chunks
    #[must_use]
    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    /// Whether the buffer holds no chunks
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }
}

/// Stateful inflater for the transport compression stream
///
/// The zlib context persists across messages for the lifetime of one socket;
/// [`TransportInflater::reset`] replaces it when the socket is replaced.
struct TransportInflater {
    buffer: CompressionBuffer,
    inflate: Decompress,
}

impl TransportInflater {
    fn new() -> Self {
        Self {
            buffer: CompressionBuffer::new(),
            inflate: Decompress::new(true),
        }
    }

    fn reset(&mut self) {
        self.buffer.clear();
        self.inflate = Decompress::new(true);
    }

    /// Feed one inbound chunk; returns the decompressed message once complete.
    fn push_chunk(&mut self, chunk: &[u8]) -> Result<Option<Vec<u8>>, CodecError> {
        self.buffer.push(chunk);

        if !CompressionBuffer::has_suffix(chunk) {
            return Ok(None);
        }

        let compressed = self.buffer.concat();
        self.buffer.clear();

        match self.inflate_message(&compressed) {
            Ok(out) => Ok(Some(out)),
            Err(err) => {
                // The stream context is unusable after a fault
                self.reset();
                Err(err)
            }
        }
    }

    fn inflate_message(&mut self, input: &[u8]) -> Result<Vec<u8>, CodecError> {
        let mut out = Vec::with_capacity(INFLATE_CHUNK_SIZE);
        let mut offset = 0usize;

        loop {
            if out.capacity() == out.len() {
                out.reserve(INFLATE_CHUNK_SIZE);
            }

            let consumed_before = self.inflate.total_in();
            let status = self
                .inflate
                .decompress_vec(&input[offset..], &mut out, FlushDecompress::Sync)
                .map_err(CodecError::TransportInflate)?;
            offset += usize::try_from(self.inflate.total_in() - consumed_before).unwrap_or(0);

            match status {
                Status::StreamEnd => break,
                Status::Ok | Status::BufError => {
                    // Done once all input is consumed and the output buffer
                    // still has room (nothing more to flush)
                    if offset >= input.len() && out.len() < out.capacity() {
                        break;
                    }
                }
            }
        }

        Ok(out)
    }
}

/// Decodes inbound gateway frames and encodes outbound ones
///
/// One codec instance belongs to exactly one shard connection.
pub struct FrameCodec {
    transport: Option<TransportInflater>,
    identify_compression: bool,
}

impl FrameCodec {
    /// Create a codec for the given compression configuration
    ///
    /// Transport compression takes precedence: when it is active every binary
    /// frame belongs to the stream, so `identify_compression` is ignored.
    #[must_use]
    pub fn new(transport: Option<CompressionMethod>, identify_compression: bool) -> Self {
        let transport = transport.map(|CompressionMethod::ZlibStream| TransportInflater::new());
        Self {
            identify_compression: identify_compression && transport.is_none(),
            transport,
        }
    }

    /// Reset all per-connection state
    ///
    /// Must be called whenever the underlying socket is replaced so no stale
    /// partial chunks leak into the next session.
    pub fn reset(&mut self) {
        if let Some(transport) = &mut self.transport {
            transport.reset();
        }
    }

    /// Decode a text frame
    ///
    /// A parse failure is a recoverable garbage frame, not a fault.
    #[must_use]
    pub fn decode_text(&self, text: &str) -> Option<GatewayMessage> {
        GatewayMessage::from_json(text).ok()
    }

    /// Decode a binary frame
    ///
    /// Returns `Ok(None)` while a transport-compressed message is still
    /// incomplete. A decompression failure is fatal for this connection.
    pub fn decode_binary(&mut self, data: &[u8]) -> Result<Option<GatewayMessage>, CodecError> {
        if let Some(transport) = &mut self.transport {
            let Some(decompressed) = transport.push_chunk(data)? else {
                return Ok(None);
            };
            let text = String::from_utf8(decompressed)?;
            return Ok(self.decode_text(&text));
        }

        if self.identify_compression {
            let mut decoder = flate2::read::ZlibDecoder::new(data);
            let mut text = String::new();
            decoder
                .read_to_string(&mut text)
                .map_err(CodecError::IdentifyInflate)?;
            return Ok(self.decode_text(&text));
        }

        Err(CodecError::UnexpectedBinaryFrame)
    }

    /// Encode an outbound message
    ///
    /// Send frames are always plain JSON text, never compressed.
    pub fn encode(message: &GatewayMessage) -> Result<String, serde_json::Error> {
        message.to_json()
    }

    /// Encode an arbitrary send payload (op + data already assembled)
    pub fn encode_value(payload: &Value) -> Result<String, serde_json::Error> {
        serde_json::to_string(payload)
    }

    /// Whether transport compression is active
    #[must_use]
    pub fn transport_compression(&self) -> bool {
        self.transport.is_some()
    }
}

impl std::fmt::Debug for FrameCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameCodec")
            .field("transport_compression", &self.transport.is_some())
            .field("identify_compression", &self.identify_compression)
            .finish()
    }
}
