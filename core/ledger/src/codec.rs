//! Canonical binary encoding and the persisted chain file format.
//!
//! All integers are big-endian. Strings and byte runs are prefixed with a
//! `u32` length. The chain file is:
//!
//! ```text
//! "MLCH" | u16 version | u64 block count
//! per block: u32 length | canonical block bytes | 32-byte stored hash
//! u32 CRC32 of everything above
//! ```

use chrono::{DateTime, SecondsFormat, Utc};

use crate::block::Block;
use medledger_common::{Digest, Error, Result, DIGEST_LENGTH};

const CHAIN_MAGIC: &[u8; 4] = b"MLCH";
const CHAIN_FORMAT_VERSION: u16 = 1;
const CRC_LENGTH: usize = 4;

/// Append-only byte writer for canonical encodings.
#[derive(Default)]
pub struct Encoder {
    buf: Vec<u8>,
}

impl Encoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put_u8(&mut self, v: u8) {
        self.buf.push(v);
    }

    pub fn put_u16(&mut self, v: u16) {
        self.buf.extend_from_slice(&v.to_be_bytes());
    }

    pub fn put_u32(&mut self, v: u32) {
        self.buf.extend_from_slice(&v.to_be_bytes());
    }

    pub fn put_u64(&mut self, v: u64) {
        self.buf.extend_from_slice(&v.to_be_bytes());
    }

    pub fn put_raw(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    pub fn put_digest(&mut self, digest: &Digest) {
        self.buf.extend_from_slice(digest.as_bytes());
    }

    /// Length-prefixed byte run.
    pub fn put_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        let len = u32::try_from(bytes.len())
            .map_err(|_| Error::Serialization("Field longer than u32::MAX".to_string()))?;
        self.put_u32(len);
        self.put_raw(bytes);
        Ok(())
    }

    pub fn put_str(&mut self, s: &str) -> Result<()> {
        self.put_bytes(s.as_bytes())
    }

    /// Timestamps are encoded as RFC 3339 with nanosecond precision.
    pub fn put_timestamp(&mut self, ts: &DateTime<Utc>) -> Result<()> {
        self.put_str(&ts.to_rfc3339_opts(SecondsFormat::Nanos, true))
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn finish(self) -> Vec<u8> {
        self.buf
    }
}

/// Cursor over a canonical encoding.
pub struct Decoder<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Decoder<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|end| *end <= self.buf.len())
            .ok_or_else(|| {
                Error::Serialization(format!(
                    "Unexpected end of input at offset {} (wanted {} bytes)",
                    self.pos, n
                ))
            })?;
        let slice = &self.buf[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn take_array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    pub fn u8(&mut self) -> Result<u8> {
        Ok(self.take_array::<1>()?[0])
    }

    pub fn u16(&mut self) -> Result<u16> {
        Ok(u16::from_be_bytes(self.take_array()?))
    }

    pub fn u32(&mut self) -> Result<u32> {
        Ok(u32::from_be_bytes(self.take_array()?))
    }

    pub fn u64(&mut self) -> Result<u64> {
        Ok(u64::from_be_bytes(self.take_array()?))
    }

    pub fn digest(&mut self) -> Result<Digest> {
        Ok(Digest::from_bytes(self.take_array::<DIGEST_LENGTH>()?))
    }

    pub fn bytes(&mut self) -> Result<&'a [u8]> {
        let len = self.u32()? as usize;
        self.take(len)
    }

    pub fn string(&mut self) -> Result<String> {
        let bytes = self.bytes()?;
        String::from_utf8(bytes.to_vec())
            .map_err(|e| Error::Serialization(format!("Invalid UTF-8: {}", e)))
    }

    pub fn timestamp(&mut self) -> Result<DateTime<Utc>> {
        let s = self.string()?;
        DateTime::parse_from_rfc3339(&s)
            .map(|ts| ts.with_timezone(&Utc))
            .map_err(|e| Error::Serialization(format!("Invalid timestamp '{}': {}", s, e)))
    }

    /// Fail unless every byte was consumed.
    pub fn finish(self) -> Result<()> {
        if self.pos != self.buf.len() {
            return Err(Error::Serialization(format!(
                "{} trailing bytes after canonical encoding",
                self.buf.len() - self.pos
            )));
        }
        Ok(())
    }
}

/// Encode a block sequence into the chain file format.
pub fn encode_chain(blocks: &[Block]) -> Result<Vec<u8>> {
    let mut enc = Encoder::new();
    enc.put_raw(CHAIN_MAGIC);
    enc.put_u16(CHAIN_FORMAT_VERSION);
    enc.put_u64(blocks.len() as u64);
    for block in blocks {
        enc.put_bytes(&block.canonical_bytes()?)?;
        enc.put_digest(&block.hash);
    }

    let crc = crc32fast::hash(&enc.buf);
    enc.put_u32(crc);
    Ok(enc.finish())
}

/// Decode a chain file.
///
/// Stored hashes are taken as-is; checking them is the ledger's job, so a
/// tampered block decodes cleanly and is reported by chain verification.
///
/// # Errors
/// - `Serialization` on a bad magic, version, checksum or framing
pub fn decode_chain(bytes: &[u8]) -> Result<Vec<Block>> {
    if bytes.len() < CHAIN_MAGIC.len() + 2 + 8 + CRC_LENGTH {
        return Err(Error::Serialization("Chain file too short".to_string()));
    }
    let (body, crc_bytes) = bytes.split_at(bytes.len() - CRC_LENGTH);
    let mut stored_crc = [0u8; CRC_LENGTH];
    stored_crc.copy_from_slice(crc_bytes);
    if crc32fast::hash(body) != u32::from_be_bytes(stored_crc) {
        return Err(Error::Serialization("Chain file checksum mismatch".to_string()));
    }

    let mut dec = Decoder::new(body);
    let magic: [u8; 4] = dec.take_array()?;
    if &magic != CHAIN_MAGIC {
        return Err(Error::Serialization("Not a chain file".to_string()));
    }
    let version = dec.u16()?;
    if version != CHAIN_FORMAT_VERSION {
        return Err(Error::Serialization(format!(
            "Unsupported chain format version {}",
            version
        )));
    }

    let count = dec.u64()?;
    let mut blocks = Vec::new();
    for _ in 0..count {
        let canonical = dec.bytes()?;
        let hash = dec.digest()?;
        blocks.push(Block::from_canonical(canonical, hash)?);
    }
    dec.finish()?;
    Ok(blocks)
}
