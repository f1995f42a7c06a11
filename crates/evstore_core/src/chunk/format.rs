//! Chunk header and footer encoding.
//!
//! ```text
//! header : | magic "ESCH" (4) | format (2) | chunk_number (4) | chunk_version (4) | start_position (8) | crc32 (4) |
//! footer : | posmap (count × 12) | record_count (4) | data_size (8) | end_position (8) | magic "ESCF" (4) | crc32 (4) |
//! ```
//!
//! Each posmap entry is `| position (8) | local_offset (4) |`, where the
//! local offset counts from the first byte after the header.

use crate::error::{CoreError, CoreResult};
use crate::log::compute_crc32;

/// Magic bytes opening every chunk file.
pub const HEADER_MAGIC: [u8; 4] = *b"ESCH";

/// Magic bytes marking a completed chunk.
pub const FOOTER_MAGIC: [u8; 4] = *b"ESCF";

/// Encoded size of the header.
pub const HEADER_SIZE: usize = 26;

/// Encoded size of the fixed footer tail, after the posmap.
pub const FOOTER_TAIL_SIZE: usize = 28;

/// Encoded size of one posmap entry.
pub const POSMAP_ENTRY_SIZE: usize = 12;

/// Chunk file header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkHeader {
    /// Chunk format version.
    pub format_version: u16,
    /// Chunk number, dense from zero.
    pub chunk_number: u32,
    /// Scavenge version; each rewrite bumps it.
    pub chunk_version: u32,
    /// Global position of the first byte of the chunk's range.
    pub start_position: u64,
}

impl ChunkHeader {
    /// Encodes the header.
    #[must_use]
    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        buf[0..4].copy_from_slice(&HEADER_MAGIC);
        buf[4..6].copy_from_slice(&self.format_version.to_le_bytes());
        buf[6..10].copy_from_slice(&self.chunk_number.to_le_bytes());
        buf[10..14].copy_from_slice(&self.chunk_version.to_le_bytes());
        buf[14..22].copy_from_slice(&self.start_position.to_le_bytes());
        let crc = compute_crc32(&buf[..22]);
        buf[22..26].copy_from_slice(&crc.to_le_bytes());
        buf
    }

    /// Decodes a header.
    ///
    /// # Errors
    ///
    /// Returns `ChunkCorruption` on a bad magic, size or checksum.
    pub fn decode(data: &[u8]) -> CoreResult<Self> {
        if data.len() != HEADER_SIZE {
            return Err(CoreError::chunk_corruption(format!(
                "chunk header has {} bytes, expected {HEADER_SIZE}",
                data.len()
            )));
        }
        if data[0..4] != HEADER_MAGIC {
            return Err(CoreError::chunk_corruption("bad chunk header magic"));
        }
        let stored = le_u32(&data[22..26]);
        let computed = compute_crc32(&data[..22]);
        if stored != computed {
            return Err(CoreError::chunk_corruption(format!(
                "chunk header checksum mismatch: expected {stored:08x}, got {computed:08x}"
            )));
        }
        Ok(Self {
            format_version: u16::from_le_bytes([data[4], data[5]]),
            chunk_number: le_u32(&data[6..10]),
            chunk_version: le_u32(&data[10..14]),
            start_position: le_u64(&data[14..22]),
        })
    }
}

/// One position map entry: where a record of the global log lives inside
/// the chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct PosMapEntry {
    /// Global log position.
    pub position: u64,
    /// Offset from the start of the chunk's data area.
    pub local_offset: u32,
}

/// Completion marker of a sealed chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkFooter {
    /// Every record in the chunk, in position order.
    pub posmap: Vec<PosMapEntry>,
    /// Bytes of record data between header and footer.
    pub data_size: u64,
    /// Global position where the chunk's range ends (exclusive).
    pub end_position: u64,
}

/// The fixed part of a footer, read first to learn the posmap size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FooterTail {
    /// Number of posmap entries.
    pub record_count: u32,
    /// Bytes of record data.
    pub data_size: u64,
    /// End of the chunk's range.
    pub end_position: u64,
    stored_crc: u32,
}

impl FooterTail {
    /// Parses a footer tail, returning `None` if the magic is absent.
    #[must_use]
    pub fn parse(data: &[u8]) -> Option<Self> {
        if data.len() != FOOTER_TAIL_SIZE || data[20..24] != FOOTER_MAGIC {
            return None;
        }
        Some(Self {
            record_count: le_u32(&data[0..4]),
            data_size: le_u64(&data[4..12]),
            end_position: le_u64(&data[12..20]),
            stored_crc: le_u32(&data[24..28]),
        })
    }

    /// Size of the complete footer this tail belongs to.
    #[must_use]
    pub fn footer_size(&self) -> u64 {
        u64::from(self.record_count) * POSMAP_ENTRY_SIZE as u64 + FOOTER_TAIL_SIZE as u64
    }
}

impl ChunkFooter {
    /// Encodes the footer.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if the chunk holds more than `u32::MAX`
    /// records.
    pub fn encode(&self) -> CoreResult<Vec<u8>> {
        let count = u32::try_from(self.posmap.len())
            .map_err(|_| CoreError::invalid_argument("too many records in chunk"))?;
        let mut buf =
            Vec::with_capacity(self.posmap.len() * POSMAP_ENTRY_SIZE + FOOTER_TAIL_SIZE);
        for entry in &self.posmap {
            buf.extend_from_slice(&entry.position.to_le_bytes());
            buf.extend_from_slice(&entry.local_offset.to_le_bytes());
        }
        buf.extend_from_slice(&count.to_le_bytes());
        buf.extend_from_slice(&self.data_size.to_le_bytes());
        buf.extend_from_slice(&self.end_position.to_le_bytes());
        buf.extend_from_slice(&FOOTER_MAGIC);
        let crc = compute_crc32(&buf);
        buf.extend_from_slice(&crc.to_le_bytes());
        Ok(buf)
    }

    /// Decodes a complete footer given its parsed tail.
    ///
    /// # Errors
    ///
    /// Returns `ChunkCorruption` if the size or checksum does not match, or
    /// the posmap is not strictly increasing.
    pub fn decode(data: &[u8], tail: &FooterTail) -> CoreResult<Self> {
        if data.len() as u64 != tail.footer_size() {
            return Err(CoreError::chunk_corruption(format!(
                "chunk footer has {} bytes, expected {}",
                data.len(),
                tail.footer_size()
            )));
        }
        let crc_start = data.len() - 4;
        let computed = compute_crc32(&data[..crc_start]);
        if computed != tail.stored_crc {
            return Err(CoreError::chunk_corruption(format!(
                "chunk footer checksum mismatch: expected {:08x}, got {computed:08x}",
                tail.stored_crc
            )));
        }

        let posmap_bytes = &data[..tail.record_count as usize * POSMAP_ENTRY_SIZE];
        let posmap: Vec<PosMapEntry> = posmap_bytes
            .chunks_exact(POSMAP_ENTRY_SIZE)
            .map(|entry| PosMapEntry {
                position: le_u64(&entry[0..8]),
                local_offset: le_u32(&entry[8..12]),
            })
            .collect();

        if posmap.windows(2).any(|w| w[0].position >= w[1].position) {
            return Err(CoreError::chunk_corruption(
                "chunk posmap is not in strictly increasing order",
            ));
        }

        Ok(Self {
            posmap,
            data_size: tail.data_size,
            end_position: tail.end_position,
        })
    }
}

fn le_u32(bytes: &[u8]) -> u32 {
    let mut buf = [0u8; 4];
    buf.copy_from_slice(&bytes[..4]);
    u32::from_le_bytes(buf)
}

fn le_u64(bytes: &[u8]) -> u64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&bytes[..8]);
    u64::from_le_bytes(buf)
}
