//! SPDY/3 name/value header blocks and their zlib compression.
//!
//! Each direction of a session owns one zlib stream primed with the SPDY/3
//! dictionary; every block is flushed with `Z_SYNC_FLUSH` so the peer can
//! decode it without waiting for more input.

use std::sync::LazyLock;

use bytes::{Buf, BufMut};
use flate2::{Compress, Compression, Decompress, FlushCompress, FlushDecompress};

use crate::error::StreamError;

/// An ordered list of lower-case header names and their values.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeaderBlock {
    entries: Vec<(String, String)>,
}

impl HeaderBlock {
    /// An empty block.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Appends a header; names are lower-cased.
    #[must_use]
    pub fn with(mut self, name: &str, value: impl Into<String>) -> Self {
        self.entries.push((name.to_ascii_lowercase(), value.into()));
        self
    }

    /// First value of `name`.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        let name = name.to_ascii_lowercase();
        self.entries
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, v)| v.as_str())
    }

    /// Number of headers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns whether the block carries no headers.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Serializes the uncompressed block.
    fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        put_len(&mut out, self.entries.len());
        for (name, value) in &self.entries {
            put_len(&mut out, name.len());
            out.put_slice(name.as_bytes());
            put_len(&mut out, value.len());
            out.put_slice(value.as_bytes());
        }
        out
    }

    /// Parses an uncompressed block.
    fn decode(mut raw: &[u8]) -> Result<Self, StreamError> {
        let count = take_len(&mut raw)?;
        let mut entries = Vec::with_capacity(count.min(64));
        for _ in 0..count {
            let name = take_str(&mut raw)?;
            let value = take_str(&mut raw)?;
            entries.push((name.to_ascii_lowercase(), value));
        }
        Ok(Self { entries })
    }
}

#[allow(clippy::cast_possible_truncation)]
fn put_len(out: &mut Vec<u8>, len: usize) {
    out.put_u32(len as u32);
}

fn take_len(raw: &mut &[u8]) -> Result<usize, StreamError> {
    if raw.remaining() < 4 {
        return Err(StreamError::Compression("truncated header block".into()));
    }
    Ok(raw.get_u32() as usize)
}

fn take_str(raw: &mut &[u8]) -> Result<String, StreamError> {
    let len = take_len(raw)?;
    if raw.remaining() < len {
        return Err(StreamError::Compression("truncated header block".into()));
    }
    let value = String::from_utf8_lossy(&raw[..len]).into_owned();
    raw.advance(len);
    Ok(value)
}

/// Compresses outgoing header blocks.
pub struct HeaderCompressor {
    zlib: Compress,
}

impl std::fmt::Debug for HeaderCompressor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HeaderCompressor")
            .field("total_in", &self.zlib.total_in())
            .finish()
    }
}

impl HeaderCompressor {
    /// A fresh compression context primed with the SPDY/3 dictionary.
    ///
    /// # Errors
    ///
    /// Returns an error if zlib rejects the dictionary.
    pub fn new() -> Result<Self, StreamError> {
        let mut zlib = Compress::new(Compression::default(), true);
        let _ = zlib
            .set_dictionary(&DICTIONARY)
            .map_err(|e| StreamError::Compression(e.to_string()))?;
        Ok(Self { zlib })
    }

    /// Encodes and compresses `block`.
    ///
    /// # Errors
    ///
    /// Returns an error if zlib fails.
    pub fn compress(&mut self, block: &HeaderBlock) -> Result<Vec<u8>, StreamError> {
        let input = block.encode();
        let mut out = Vec::with_capacity(input.len() + 64);
        let start = self.zlib.total_in();
        loop {
            let consumed = consumed_since(self.zlib.total_in(), start);
            if out.capacity() - out.len() < 64 {
                out.reserve(256);
            }
            let _ = self
                .zlib
                .compress_vec(&input[consumed..], &mut out, FlushCompress::Sync)
                .map_err(|e| StreamError::Compression(e.to_string()))?;
            let consumed = consumed_since(self.zlib.total_in(), start);
            if consumed == input.len() && out.len() < out.capacity() {
                return Ok(out);
            }
        }
    }
}

/// Decompresses incoming header blocks.
pub struct HeaderDecompressor {
    zlib: Decompress,
}

impl std::fmt::Debug for HeaderDecompressor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HeaderDecompressor")
            .field("total_in", &self.zlib.total_in())
            .finish()
    }
}

impl Default for HeaderDecompressor {
    fn default() -> Self {
        Self::new()
    }
}

impl HeaderDecompressor {
    /// A fresh decompression context; the dictionary is supplied on demand.
    #[must_use]
    pub fn new() -> Self {
        Self {
            zlib: Decompress::new(true),
        }
    }

    /// Decompresses and parses one header block.
    ///
    /// # Errors
    ///
    /// Returns an error if the data is not a valid compressed block.
    pub fn decompress(&mut self, input: &[u8]) -> Result<HeaderBlock, StreamError> {
        let mut out = Vec::with_capacity(input.len() * 4 + 64);
        let start_in = self.zlib.total_in();
        loop {
            let consumed = consumed_since(self.zlib.total_in(), start_in);
            if out.len() == out.capacity() {
                out.reserve(out.len().max(256));
            }
            let produced_before = out.len();
            match self
                .zlib
                .decompress_vec(&input[consumed..], &mut out, FlushDecompress::Sync)
            {
                Ok(_) => {}
                Err(e) if e.needs_dictionary().is_some() => {
                    let _ = self
                        .zlib
                        .set_dictionary(&DICTIONARY)
                        .map_err(|e| StreamError::Compression(e.to_string()))?;
                    continue;
                }
                Err(e) => return Err(StreamError::Compression(e.to_string())),
            }
            let now_consumed = consumed_since(self.zlib.total_in(), start_in);
            if now_consumed == input.len() && out.len() < out.capacity() {
                return HeaderBlock::decode(&out);
            }
            if now_consumed == consumed && out.len() == produced_before {
                return Err(StreamError::Compression("decompression made no progress".into()));
            }
        }
    }
}

#[allow(clippy::cast_possible_truncation)]
const fn consumed_since(total: u64, start: u64) -> usize {
    (total - start) as usize
}

const DICTIONARY_WORDS: &[&str] = &[
    "options", "head", "post", "put", "delete", "trace", "accept", "accept-charset",
    "accept-encoding", "accept-language", "accept-ranges", "age", "allow", "authorization",
    "cache-control", "connection", "content-base", "content-encoding", "content-language",
    "content-length", "content-location", "content-md5", "content-range", "content-type", "date",
    "etag", "expect", "expires", "from", "host", "if-match", "if-modified-since", "if-none-match",
    "if-range", "if-unmodified-since", "last-modified", "location", "max-forwards", "pragma",
    "proxy-authenticate", "proxy-authorization", "range", "referer", "retry-after", "server", "te",
    "trailer", "transfer-encoding", "upgrade", "user-agent", "vary", "via", "warning",
    "www-authenticate", "method", "get", "status", "200 OK", "version", "HTTP/1.1", "url",
    "public", "set-cookie", "keep-alive", "origin",
];

const DICTIONARY_TAIL: &str = "100101201202205206300302303304305306307402405406407408409410411412413414415416417502504505203 Non-Authoritative Information204 No Content301 Moved Permanently400 Bad Request401 Unauthorized403 Forbidden404 Not Found500 Internal Server Error501 Not Implemented503 Service UnavailableJan Feb Mar Apr May Jun Jul Aug Sept Oct Nov Dec 00:00:00 Mon, Tue, Wed, Thu, Fri, Sat, Sun, GMTchunked,text/html,image/png,image/jpg,image/gif,application/xml,application/xhtml+xml,text/plain,text/javascript,publicprivatemax-age=gzip,deflate,sdchcharset=utf-8charset=iso-8859-1,utf-,*,enq=0.";

/// The SPDY/3 header compression dictionary.
pub static DICTIONARY: LazyLock<Vec<u8>> = LazyLock::new(|| {
    let mut dict = Vec::with_capacity(1423);
    for word in DICTIONARY_WORDS {
        put_len(&mut dict, word.len());
        dict.extend_from_slice(word.as_bytes());
    }
    dict.extend_from_slice(DICTIONARY_TAIL.as_bytes());
    dict
});
