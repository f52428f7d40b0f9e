use crate::types::FORMAT_VERSION;

/// Size of the record header in bytes.
pub const HEADER_SIZE: usize = 16;

/// Leading bytes of every channel record.
pub const MAGIC: [u8; 4] = *b"NXIP";

/// Type tag for the record that follows the header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RecordKind {
    /// A published `MemoryHandle`.
    Handle = 0,
    /// The consumer's terminal report.
    Report = 1,
}

impl RecordKind {
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(RecordKind::Handle),
            1 => Some(RecordKind::Report),
            _ => None,
        }
    }
}

/// 16-byte header prepended to every record written into a channel.
///
/// ```text
/// [0..4]   magic: b"NXIP"
/// [4..6]   version: u16 LE
/// [6]      kind: u8
/// [7]      reserved (must be 0)
/// [8..12]  payload_length: u32 LE
/// [12..16] reserved (must be 0)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub version: u16,
    pub kind: RecordKind,
    pub payload_length: u32,
}

impl Header {
    pub fn new(kind: RecordKind, payload_length: u32) -> Self {
        Self {
            version: FORMAT_VERSION,
            kind,
            payload_length,
        }
    }

    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        buf[0..4].copy_from_slice(&MAGIC);
        buf[4..6].copy_from_slice(&self.version.to_le_bytes());
        buf[6] = self.kind as u8;
        buf[8..12].copy_from_slice(&self.payload_length.to_le_bytes());
        buf
    }

    /// Returns `None` on bad magic, an unknown kind byte, or non-zero
    /// reserved bytes.
    pub fn decode(buf: &[u8; HEADER_SIZE]) -> Option<Self> {
        if buf[0..4] != MAGIC || buf[7] != 0 || buf[12..16] != [0u8; 4] {
            return None;
        }
        let version = u16::from_le_bytes([buf[4], buf[5]]);
        let kind = RecordKind::from_u8(buf[6])?;
        let payload_length = u32::from_le_bytes([buf[8], buf[9], buf[10], buf[11]]);
        Some(Header {
            version,
            kind,
            payload_length,
        })
    }
}
