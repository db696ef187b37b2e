//! Byte ⇄ text codec and container-sized chunking.
//!
//! # Encoding
//! Blobs travel as standard-alphabet base64 with padding: every 3 input bytes
//! become 4 output characters.  The remote store only accepts text, and the
//! base64 alphabet survives every record store we target unchanged.
//!
//! # Block alignment
//! A container holds `records_per_container * chars_per_record` characters.
//! The source file is read in blocks of `capacity / 4 * 3` bytes so that each
//! block's encoding fills exactly one container.  Every block except the last
//! is a multiple of 3 bytes, so padding can only ever appear at the very end
//! of the stream and per-block encodings concatenate into the encoding of the
//! whole file.

use std::io::{self, Read, Seek, SeekFrom};

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use thiserror::Error;

/// Characters produced per encoded group.
pub const GROUP_CHARS: usize = 4;
/// Bytes consumed per encoded group.
pub const GROUP_BYTES: usize = 3;

// ── Error type ───────────────────────────────────────────────────────────────

#[derive(Error, Debug)]
pub enum CodecError {
    /// Text handed to [`decode`] is not valid padded base64.
    #[error("Malformed encoding: {0}")]
    MalformedEncoding(String),
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

// ── Pure functions ───────────────────────────────────────────────────────────

/// Encode raw bytes as padded base64 text.
pub fn encode(bytes: &[u8]) -> String {
    STANDARD.encode(bytes)
}

/// Inverse of [`encode`].
///
/// Fails with [`CodecError::MalformedEncoding`] when the text length is not a
/// multiple of four or when it contains characters outside the alphabet.
pub fn decode(text: &[u8]) -> Result<Vec<u8>, CodecError> {
    if text.len() % GROUP_CHARS != 0 {
        return Err(CodecError::MalformedEncoding(format!(
            "length {} is not a multiple of {GROUP_CHARS}",
            text.len()
        )));
    }
    STANDARD
        .decode(text)
        .map_err(|e| CodecError::MalformedEncoding(e.to_string()))
}

/// Split `text` into ordered pieces of at most `size` characters.
///
/// The final piece may be shorter.  Concatenating the pieces yields `text`.
/// Base64 output is pure ASCII, so byte offsets are character offsets.
pub fn chunk(text: &str, size: usize) -> impl Iterator<Item = &str> + '_ {
    let size = size.max(1);
    (0..text.len())
        .step_by(size)
        .map(move |start| &text[start..(start + size).min(text.len())])
}

/// Number of characters [`encode`] produces for `byte_len` input bytes.
pub fn encoded_len(byte_len: u64) -> u64 {
    byte_len.div_ceil(GROUP_BYTES as u64) * GROUP_CHARS as u64
}

/// Raw bytes whose encoding exactly fills `capacity_chars` characters.
///
/// `capacity_chars` must be a multiple of [`GROUP_CHARS`]; the configuration
/// layer rejects anything else.
pub fn block_bytes(capacity_chars: usize) -> usize {
    capacity_chars / GROUP_CHARS * GROUP_BYTES
}

// ── Streaming block encoder ─────────────────────────────────────────────────

/// Reads a seekable source one container-sized block at a time and yields
/// each block's encoding.  The whole file is never held in memory.
pub struct BlockEncoder<R: Read + Seek> {
    source:      R,
    block_bytes: usize,
    buf:         Vec<u8>,
}

impl<R: Read + Seek> BlockEncoder<R> {
    /// `source` must be positioned at offset 0.
    pub fn new(source: R, capacity_chars: usize) -> Self {
        let block_bytes = block_bytes(capacity_chars).max(GROUP_BYTES);
        Self {
            source,
            block_bytes,
            buf: Vec::with_capacity(block_bytes),
        }
    }

    /// Bytes consumed from the source per block.
    pub fn block_bytes(&self) -> usize {
        self.block_bytes
    }

    /// Position the source after the first `count` blocks without reading them.
    pub fn skip_blocks(&mut self, count: usize) -> io::Result<u64> {
        self.source
            .seek(SeekFrom::Start(count as u64 * self.block_bytes as u64))
    }

    /// Read and encode the next block.  Returns `None` at end of source.
    pub fn next_block(&mut self) -> io::Result<Option<String>> {
        self.buf.clear();
        let n = (&mut self.source)
            .take(self.block_bytes as u64)
            .read_to_end(&mut self.buf)?;
        if n == 0 {
            return Ok(None);
        }
        Ok(Some(encode(&self.buf)))
    }
}
