use crate::error::{IpcError, Result};
use crate::protocol::header::{HEADER_SIZE, Header, RecordKind};
use crate::protocol::record::ChannelRecord;
use crate::types::FORMAT_VERSION;

/// Encode a `ChannelRecord` into a framed byte buffer: `[header][rkyv payload]`.
pub fn encode_record(record: &ChannelRecord) -> Result<Vec<u8>> {
    let payload = rkyv::to_bytes::<rkyv::rancor::Error>(record)
        .map_err(|e| IpcError::EncodeFailed(e.to_string()))?;

    if payload.len() > u32::MAX as usize {
        return Err(IpcError::EncodeFailed(format!(
            "payload too large for record header: {} bytes",
            payload.len()
        )));
    }

    let kind = match record {
        ChannelRecord::Handle { .. } => RecordKind::Handle,
        ChannelRecord::Report(_) => RecordKind::Report,
    };
    let header = Header::new(kind, payload.len() as u32);

    let mut buf = Vec::with_capacity(HEADER_SIZE + payload.len());
    buf.extend_from_slice(&header.encode());
    buf.extend_from_slice(&payload);
    Ok(buf)
}

/// Decode a framed record written by [`encode_record`].
///
/// Rejects unknown versions and records whose payload disagrees with the
/// header's kind tag.
pub fn decode_record(buf: &[u8]) -> Result<ChannelRecord> {
    if buf.len() < HEADER_SIZE {
        return Err(IpcError::DecodeFailed(format!(
            "buffer too short: {} < {HEADER_SIZE}",
            buf.len()
        )));
    }

    let header_bytes: &[u8; HEADER_SIZE] = buf[..HEADER_SIZE]
        .try_into()
        .map_err(|_| IpcError::DecodeFailed("header slice length mismatch".into()))?;
    let header = Header::decode(header_bytes).ok_or_else(|| {
        IpcError::DecodeFailed("invalid header: bad magic, kind or reserved bytes".into())
    })?;

    if header.version != FORMAT_VERSION {
        return Err(IpcError::DecodeFailed(format!(
            "unsupported record version {} (expected {FORMAT_VERSION})",
            header.version
        )));
    }

    let payload_end = HEADER_SIZE + header.payload_length as usize;
    if buf.len() < payload_end {
        return Err(IpcError::DecodeFailed(format!(
            "buffer too short for payload: {} < {payload_end}",
            buf.len()
        )));
    }

    // The payload sits at an arbitrary offset in whatever buffer the caller
    // read it into; rkyv validation needs it aligned.
    let mut aligned = rkyv::util::AlignedVec::<16>::new();
    aligned.extend_from_slice(&buf[HEADER_SIZE..payload_end]);
    let record = rkyv::from_bytes::<ChannelRecord, rkyv::rancor::Error>(&aligned)
        .map_err(|e| IpcError::DecodeFailed(e.to_string()))?;

    let matches_kind = matches!(
        (&record, header.kind),
        (ChannelRecord::Handle { .. }, RecordKind::Handle)
            | (ChannelRecord::Report(_), RecordKind::Report)
    );
    if !matches_kind {
        return Err(IpcError::DecodeFailed(format!(
            "header kind {:?} does not match payload",
            header.kind
        )));
    }

    Ok(record)
}
