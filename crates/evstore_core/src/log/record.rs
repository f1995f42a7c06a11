//! Log record types and their binary encoding.

use crate::error::{CoreError, CoreResult};
use crate::types::NO_EVENT_NUMBER;
use uuid::Uuid;

/// Current record format version.
pub const RECORD_VERSION: u8 = 1;

/// Bytes every record carries besides its payload:
/// length (4) + type (1) + version (1) + position (8) + crc32 (4) + length (4).
pub const RECORD_OVERHEAD: usize = 22;

/// Size of the leading length field.
pub const LENGTH_SIZE: usize = 4;

/// Type discriminant of a log record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum LogRecordType {
    /// Carries one event, pending commit.
    Prepare = 0,
    /// Finalizes the prepares of one transaction.
    Commit = 1,
    /// Administrative marker for internal consumers.
    System = 2,
}

impl LogRecordType {
    /// Converts a byte to a record type.
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            0 => Some(Self::Prepare),
            1 => Some(Self::Commit),
            2 => Some(Self::System),
            _ => None,
        }
    }

    /// Converts the record type to a byte.
    #[must_use]
    pub const fn as_byte(self) -> u8 {
        self as u8
    }
}

/// Flags carried by a prepare record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub struct PrepareFlags(u16);

impl PrepareFlags {
    /// No flags set.
    pub const NONE: Self = Self(0);
    /// The prepare carries event data.
    pub const DATA: Self = Self(0x01);
    /// First prepare of a transaction.
    pub const TRANSACTION_BEGIN: Self = Self(0x02);
    /// Last prepare of a transaction.
    pub const TRANSACTION_END: Self = Self(0x04);
    /// The data payload is JSON.
    pub const IS_JSON: Self = Self(0x08);
    /// The data payload is a link, `{number}@{stream}`.
    pub const IS_LINK_TO: Self = Self(0x10);
    /// A one-event transaction.
    pub const SINGLE_WRITE: Self = Self(0x01 | 0x02 | 0x04);

    /// Creates flags from raw bits.
    #[must_use]
    pub const fn from_bits(bits: u16) -> Self {
        Self(bits)
    }

    /// Returns the raw bits.
    #[must_use]
    pub const fn bits(self) -> u16 {
        self.0
    }

    /// Checks whether all bits of `other` are set.
    #[must_use]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Returns these flags with `other` added.
    #[must_use]
    pub const fn with(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    /// Checks the JSON flag.
    #[must_use]
    pub const fn is_json(self) -> bool {
        self.contains(Self::IS_JSON)
    }

    /// Checks the link flag.
    #[must_use]
    pub const fn is_link_to(self) -> bool {
        self.contains(Self::IS_LINK_TO)
    }
}

/// A prepare record: one event, pending commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrepareRecord {
    /// Global log position (assigned by the writer).
    pub position: u64,
    /// Position of the first prepare of this transaction.
    pub transaction_position: u64,
    /// Index of this prepare within its transaction.
    pub transaction_offset: u32,
    /// Record flags.
    pub flags: PrepareFlags,
    /// Stream the event belongs to.
    pub stream_id: String,
    /// Event number, or [`NO_EVENT_NUMBER`] when assigned by the commit.
    pub event_number: i64,
    /// Unique event identifier.
    pub event_id: Uuid,
    /// Event type.
    pub event_type: String,
    /// Event payload.
    pub data: Vec<u8>,
    /// Event metadata.
    pub metadata: Vec<u8>,
    /// Creation time, unix milliseconds.
    pub timestamp: i64,
}

impl PrepareRecord {
    /// Resolves this prepare's event number given its commit.
    #[must_use]
    pub fn event_number_under(&self, commit: &CommitRecord) -> i64 {
        if self.event_number == NO_EVENT_NUMBER {
            commit.first_event_number + i64::from(self.transaction_offset)
        } else {
            self.event_number
        }
    }
}

/// A commit record: makes a transaction's prepares visible.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitRecord {
    /// Global log position; also the commit position.
    pub position: u64,
    /// Position of the first prepare this commit finalizes.
    pub transaction_position: u64,
    /// Event number assigned to the first prepare of the transaction.
    pub first_event_number: i64,
    /// Commit time, unix milliseconds.
    pub timestamp: i64,
}

impl CommitRecord {
    /// Returns the commit position, which is the record's own position.
    #[must_use]
    pub const fn commit_position(&self) -> u64 {
        self.position
    }
}

/// Kind of a system record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SystemRecordKind {
    /// A scavenge pass started.
    ScavengeStarted = 1,
    /// A scavenge pass finished.
    ScavengeCompleted = 2,
}

impl SystemRecordKind {
    /// Converts a byte to a system record kind.
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            1 => Some(Self::ScavengeStarted),
            2 => Some(Self::ScavengeCompleted),
            _ => None,
        }
    }
}

/// An administrative record, ignored by the read index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SystemRecord {
    /// Global log position.
    pub position: u64,
    /// Creation time, unix milliseconds.
    pub timestamp: i64,
    /// What the record marks.
    pub kind: SystemRecordKind,
    /// Kind-specific payload.
    pub data: Vec<u8>,
}

/// A record of the transaction log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogRecord {
    /// One event, pending commit.
    Prepare(PrepareRecord),
    /// Finalizes a transaction.
    Commit(CommitRecord),
    /// Administrative marker.
    System(SystemRecord),
}

impl LogRecord {
    /// Maximum size of a data or metadata payload.
    pub const MAX_PAYLOAD_SIZE: usize = u32::MAX as usize;

    /// Returns the record type.
    #[must_use]
    pub fn record_type(&self) -> LogRecordType {
        match self {
            Self::Prepare(_) => LogRecordType::Prepare,
            Self::Commit(_) => LogRecordType::Commit,
            Self::System(_) => LogRecordType::System,
        }
    }

    /// Returns the record's global position.
    #[must_use]
    pub fn position(&self) -> u64 {
        match self {
            Self::Prepare(p) => p.position,
            Self::Commit(c) => c.position,
            Self::System(s) => s.position,
        }
    }

    pub(crate) fn set_position(&mut self, position: u64) {
        match self {
            Self::Prepare(p) => p.position = position,
            Self::Commit(c) => c.position = position,
            Self::System(s) => s.position = position,
        }
    }

    /// Returns the prepare if this is one.
    #[must_use]
    pub fn as_prepare(&self) -> Option<&PrepareRecord> {
        match self {
            Self::Prepare(p) => Some(p),
            _ => None,
        }
    }

    /// Returns the commit if this is one.
    #[must_use]
    pub fn as_commit(&self) -> Option<&CommitRecord> {
        match self {
            Self::Commit(c) => Some(c),
            _ => None,
        }
    }

    /// Encodes the record with its envelope.
    ///
    /// ```text
    /// | length (4) | type (1) | version (1) | position (8) | payload (N) | crc32 (4) | length (4) |
    /// ```
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if a variable-length field exceeds its
    /// length prefix, or if a prepare has an empty stream id.
    pub fn encode(&self) -> CoreResult<Vec<u8>> {
        let payload = self.encode_payload()?;
        let length = u32::try_from(RECORD_OVERHEAD - 2 * LENGTH_SIZE + payload.len())
            .map_err(|_| CoreError::invalid_argument("record too large"))?;

        let mut buf = Vec::with_capacity(RECORD_OVERHEAD + payload.len());
        buf.extend_from_slice(&length.to_le_bytes());
        buf.push(self.record_type().as_byte());
        buf.push(RECORD_VERSION);
        buf.extend_from_slice(&self.position().to_le_bytes());
        buf.extend_from_slice(&payload);
        let crc = compute_crc32(&buf[LENGTH_SIZE..]);
        buf.extend_from_slice(&crc.to_le_bytes());
        buf.extend_from_slice(&length.to_le_bytes());
        Ok(buf)
    }

    fn encode_payload(&self) -> CoreResult<Vec<u8>> {
        let mut buf = Vec::new();
        match self {
            Self::Prepare(p) => {
                if p.stream_id.is_empty() {
                    return Err(CoreError::invalid_argument("stream id must not be empty"));
                }
                let stream_len = u16::try_from(p.stream_id.len())
                    .map_err(|_| CoreError::invalid_argument("stream id too long"))?;
                let type_len = u16::try_from(p.event_type.len())
                    .map_err(|_| CoreError::invalid_argument("event type too long"))?;
                let data_len = u32::try_from(p.data.len()).map_err(|_| {
                    CoreError::invalid_argument(format!(
                        "event data exceeds {} bytes",
                        Self::MAX_PAYLOAD_SIZE
                    ))
                })?;
                let meta_len = u32::try_from(p.metadata.len()).map_err(|_| {
                    CoreError::invalid_argument(format!(
                        "event metadata exceeds {} bytes",
                        Self::MAX_PAYLOAD_SIZE
                    ))
                })?;

                buf.extend_from_slice(&p.transaction_position.to_le_bytes());
                buf.extend_from_slice(&p.transaction_offset.to_le_bytes());
                buf.extend_from_slice(&p.flags.bits().to_le_bytes());
                buf.extend_from_slice(&p.event_number.to_le_bytes());
                buf.extend_from_slice(p.event_id.as_bytes());
                buf.extend_from_slice(&p.timestamp.to_le_bytes());
                buf.extend_from_slice(&stream_len.to_le_bytes());
                buf.extend_from_slice(p.stream_id.as_bytes());
                buf.extend_from_slice(&type_len.to_le_bytes());
                buf.extend_from_slice(p.event_type.as_bytes());
                buf.extend_from_slice(&data_len.to_le_bytes());
                buf.extend_from_slice(&p.data);
                buf.extend_from_slice(&meta_len.to_le_bytes());
                buf.extend_from_slice(&p.metadata);
            }

            Self::Commit(c) => {
                buf.extend_from_slice(&c.transaction_position.to_le_bytes());
                buf.extend_from_slice(&c.first_event_number.to_le_bytes());
                buf.extend_from_slice(&c.timestamp.to_le_bytes());
            }

            Self::System(s) => {
                let data_len = u32::try_from(s.data.len())
                    .map_err(|_| CoreError::invalid_argument("system data too large"))?;
                buf.push(s.kind as u8);
                buf.extend_from_slice(&s.timestamp.to_le_bytes());
                buf.extend_from_slice(&data_len.to_le_bytes());
                buf.extend_from_slice(&s.data);
            }
        }
        Ok(buf)
    }

    /// Decodes exactly one enveloped record.
    ///
    /// # Errors
    ///
    /// Returns `CorruptRecord` on any length, checksum, type, version or
    /// payload inconsistency.
    pub fn decode(bytes: &[u8]) -> CoreResult<Self> {
        if bytes.len() < RECORD_OVERHEAD {
            return Err(CoreError::corrupt_record(format!(
                "record too short: {} bytes",
                bytes.len()
            )));
        }

        let length = read_length(bytes)? as usize;
        if length + 2 * LENGTH_SIZE != bytes.len() {
            return Err(CoreError::corrupt_record(format!(
                "length prefix {length} does not match record size {}",
                bytes.len()
            )));
        }
        let suffix = read_length(&bytes[bytes.len() - LENGTH_SIZE..])? as usize;
        if suffix != length {
            return Err(CoreError::corrupt_record(format!(
                "length suffix {suffix} does not match prefix {length}"
            )));
        }

        let body_end = bytes.len() - LENGTH_SIZE;
        let crc_start = body_end - 4;
        let stored_crc = u32::from_le_bytes([
            bytes[crc_start],
            bytes[crc_start + 1],
            bytes[crc_start + 2],
            bytes[crc_start + 3],
        ]);
        let computed_crc = compute_crc32(&bytes[LENGTH_SIZE..crc_start]);
        if stored_crc != computed_crc {
            return Err(CoreError::corrupt_record(format!(
                "checksum mismatch: expected {stored_crc:08x}, got {computed_crc:08x}"
            )));
        }

        let mut reader = PayloadReader::new(&bytes[LENGTH_SIZE..crc_start]);
        let type_byte = reader.u8()?;
        let record_type = LogRecordType::from_byte(type_byte)
            .ok_or_else(|| CoreError::corrupt_record(format!("unknown record type {type_byte}")))?;
        let version = reader.u8()?;
        if version > RECORD_VERSION {
            return Err(CoreError::corrupt_record(format!(
                "unsupported record version {version}"
            )));
        }
        let position = reader.u64()?;

        let record = match record_type {
            LogRecordType::Prepare => {
                let transaction_position = reader.u64()?;
                let transaction_offset = reader.u32()?;
                let flags = PrepareFlags::from_bits(reader.u16()?);
                let event_number = reader.i64()?;
                let event_id = Uuid::from_bytes(reader.array::<16>()?);
                let timestamp = reader.i64()?;
                let stream_len = reader.u16()? as usize;
                let stream_id = reader.string(stream_len)?;
                let type_len = reader.u16()? as usize;
                let event_type = reader.string(type_len)?;
                let data_len = reader.u32()? as usize;
                let data = reader.bytes(data_len)?.to_vec();
                let meta_len = reader.u32()? as usize;
                let metadata = reader.bytes(meta_len)?.to_vec();
                Self::Prepare(PrepareRecord {
                    position,
                    transaction_position,
                    transaction_offset,
                    flags,
                    stream_id,
                    event_number,
                    event_id,
                    event_type,
                    data,
                    metadata,
                    timestamp,
                })
            }

            LogRecordType::Commit => Self::Commit(CommitRecord {
                position,
                transaction_position: reader.u64()?,
                first_event_number: reader.i64()?,
                timestamp: reader.i64()?,
            }),

            LogRecordType::System => {
                let kind_byte = reader.u8()?;
                let kind = SystemRecordKind::from_byte(kind_byte).ok_or_else(|| {
                    CoreError::corrupt_record(format!("unknown system record kind {kind_byte}"))
                })?;
                let timestamp = reader.i64()?;
                let data_len = reader.u32()? as usize;
                let data = reader.bytes(data_len)?.to_vec();
                Self::System(SystemRecord {
                    position,
                    timestamp,
                    kind,
                    data,
                })
            }
        };

        if !reader.is_empty() {
            return Err(CoreError::corrupt_record(format!(
                "{} trailing bytes in {:?} record",
                reader.remaining(),
                record_type
            )));
        }
        Ok(record)
    }

    /// Returns the encoded size of this record.
    ///
    /// # Errors
    ///
    /// Same as [`Self::encode`].
    pub fn encoded_len(&self) -> CoreResult<usize> {
        Ok(RECORD_OVERHEAD + self.encode_payload()?.len())
    }
}

/// Reads a little-endian length field.
pub(crate) fn read_length(bytes: &[u8]) -> CoreResult<u32> {
    let field: [u8; 4] = bytes
        .get(..LENGTH_SIZE)
        .and_then(|b| b.try_into().ok())
        .ok_or_else(|| CoreError::corrupt_record("truncated length field"))?;
    Ok(u32::from_le_bytes(field))
}

struct PayloadReader<'a> {
    buf: &'a [u8],
    cursor: usize,
}

impl<'a> PayloadReader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, cursor: 0 }
    }

    fn bytes(&mut self, len: usize) -> CoreResult<&'a [u8]> {
        let end = self
            .cursor
            .checked_add(len)
            .filter(|&end| end <= self.buf.len())
            .ok_or_else(|| CoreError::corrupt_record("unexpected end of payload"))?;
        let slice = &self.buf[self.cursor..end];
        self.cursor = end;
        Ok(slice)
    }

    fn array<const N: usize>(&mut self) -> CoreResult<[u8; N]> {
        self.bytes(N)?
            .try_into()
            .map_err(|_| CoreError::corrupt_record("unexpected end of payload"))
    }

    fn u8(&mut self) -> CoreResult<u8> {
        Ok(self.array::<1>()?[0])
    }

    fn u16(&mut self) -> CoreResult<u16> {
        Ok(u16::from_le_bytes(self.array()?))
    }

    fn u32(&mut self) -> CoreResult<u32> {
        Ok(u32::from_le_bytes(self.array()?))
    }

    fn u64(&mut self) -> CoreResult<u64> {
        Ok(u64::from_le_bytes(self.array()?))
    }

    fn i64(&mut self) -> CoreResult<i64> {
        Ok(i64::from_le_bytes(self.array()?))
    }

    fn string(&mut self, len: usize) -> CoreResult<String> {
        let raw = self.bytes(len)?;
        String::from_utf8(raw.to_vec())
            .map_err(|_| CoreError::corrupt_record("string field is not valid UTF-8"))
    }

    fn remaining(&self) -> usize {
        self.buf.len() - self.cursor
    }

    fn is_empty(&self) -> bool {
        self.remaining() == 0
    }
}

/// Computes CRC32 checksum for data.
pub fn compute_crc32(data: &[u8]) -> u32 {
    // IEEE polynomial, table built at compile time
    const CRC32_TABLE: [u32; 256] = {
        let mut table = [0u32; 256];
        let mut i = 0;
        while i < 256 {
            let mut crc = i as u32;
            let mut j = 0;
            while j < 8 {
                if crc & 1 != 0 {
                    crc = (crc >> 1) ^ 0xEDB8_8320;
                } else {
                    crc >>= 1;
                }
                j += 1;
            }
            table[i] = crc;
            i += 1;
        }
        table
    };

    let mut crc = 0xFFFF_FFFF_u32;
    for &byte in data {
        let index = ((crc ^ u32::from(byte)) & 0xFF) as usize;
        crc = (crc >> 8) ^ CRC32_TABLE[index];
    }
    !crc
}
