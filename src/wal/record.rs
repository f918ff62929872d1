//! WAL record header and mutation payload codec.
//!
//! Record header (48 bytes): sequence u64, length u32, flags u32, payload
//! checksum 32. A header of all zeros is the stream sentinel. Mutation
//! payloads start with a one-byte opcode:
//!
//! - `0x01` put_frame: frame id, timestamp, meta subset, payload offset and
//!   length, canonical encoding and length, canonical + stored checksums
//! - `0x02` delete_frame: frame id
//! - `0x03` supersede_frame: superseded id, superseding id
//! - `0x04` put_embedding: frame id, dimension, raw little-endian floats

use crate::digest::Digest32;
use crate::error::{Result, WaxError};
use crate::format::cursor::{BinaryBuilder, BinaryCursor};
use crate::format::{MAX_ARRAY_COUNT, MAX_BLOB_BYTES};

pub const RECORD_HEADER_SIZE: u64 = 48;
pub const FLAG_PADDING: u32 = 1 << 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WalRecordHeader {
    pub sequence: u64,
    pub length: u32,
    pub flags: u32,
    pub checksum: Digest32,
}

impl WalRecordHeader {
    pub fn is_sentinel(&self) -> bool {
        self.sequence == 0
            && self.length == 0
            && self.flags == 0
            && self.checksum.iter().all(|&b| b == 0)
    }

    pub fn is_padding(&self) -> bool {
        self.flags & FLAG_PADDING != 0
    }

    pub fn encode(&self) -> [u8; RECORD_HEADER_SIZE as usize] {
        let mut bytes = [0u8; RECORD_HEADER_SIZE as usize];
        bytes[0..8].copy_from_slice(&self.sequence.to_le_bytes());
        bytes[8..12].copy_from_slice(&self.length.to_le_bytes());
        bytes[12..16].copy_from_slice(&self.flags.to_le_bytes());
        bytes[16..48].copy_from_slice(&self.checksum);
        bytes
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != RECORD_HEADER_SIZE as usize {
            return Err(WaxError::wal("record header size mismatch"));
        }
        Ok(Self {
            sequence: u64::from_le_bytes(bytes[0..8].try_into().unwrap()),
            length: u32::from_le_bytes(bytes[8..12].try_into().unwrap()),
            flags: u32::from_le_bytes(bytes[12..16].try_into().unwrap()),
            checksum: bytes[16..48].try_into().unwrap(),
        })
    }
}

/// Decoded put_frame mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PutFrameRecord {
    pub frame_id: u64,
    pub payload_offset: u64,
    pub payload_length: u64,
    pub canonical_encoding: u8,
    pub canonical_length: u64,
    pub canonical_checksum: Digest32,
    pub stored_checksum: Digest32,
}

/// Decoded WAL mutation payload.
#[derive(Debug, Clone, PartialEq)]
pub enum WalMutation {
    PutFrame(PutFrameRecord),
    DeleteFrame {
        frame_id: u64,
    },
    SupersedeFrame {
        superseded_id: u64,
        superseding_id: u64,
    },
    PutEmbedding {
        frame_id: u64,
        dimension: u32,
        values: Vec<f32>,
    },
}

/// A decoded mutation together with the sequence that carried it.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingMutation {
    pub sequence: u64,
    pub mutation: WalMutation,
}

fn to_wal(err: WaxError) -> WaxError {
    match err {
        WaxError::Format(msg) => WaxError::Wal(msg),
        other => other,
    }
}

/// The per-frame meta subset carried by put_frame records. The v1 writer
/// emits all-absent fields; the decoder must still walk the layout.
fn skip_frame_meta_subset(cursor: &mut BinaryCursor<'_>) -> Result<()> {
    for field in ["subset.uri", "subset.title", "subset.kind", "subset.track"] {
        cursor.read_optional(field, |c| {
            c.skip_string(field)?;
            Ok(())
        })?;
    }

    let tag_count = cursor.read_u32("tags count")? as usize;
    if tag_count > MAX_ARRAY_COUNT {
        return Err(WaxError::wal("tags count exceeds limit"));
    }
    for _ in 0..tag_count {
        cursor.skip_string("tags.key")?;
        cursor.skip_string("tags.value")?;
    }
    for (field, counted) in [
        ("subset.label", "labels count"),
        ("subset.content_date", "content_dates count"),
    ] {
        let count = cursor.read_u32(counted)? as usize;
        if count > MAX_ARRAY_COUNT {
            return Err(WaxError::wal(format!("{counted} exceeds limit")));
        }
        for _ in 0..count {
            cursor.skip_string(field)?;
        }
    }

    cursor.read_optional("subset.role", |c| c.read_u8("subset.role"))?;
    cursor.read_optional("subset.parent_id", |c| c.read_u64("subset.parent_id"))?;
    cursor.read_optional("subset.chunk_index", |c| c.read_u32("subset.chunk_index"))?;
    cursor.read_optional("subset.chunk_count", |c| c.read_u32("subset.chunk_count"))?;
    cursor.read_optional("subset.chunk_manifest", |c| {
        c.skip_bytes_len32(MAX_BLOB_BYTES, "subset.chunk_manifest")?;
        Ok(())
    })?;
    cursor.read_optional("subset.status", |c| c.read_u8("subset.status"))?;
    cursor.read_optional("subset.supersedes", |c| c.read_u64("subset.supersedes"))?;
    cursor.read_optional("subset.superseded_by", |c| c.read_u64("subset.superseded_by"))?;
    cursor.read_optional("subset.search_text", |c| {
        c.skip_string("subset.search_text")?;
        Ok(())
    })?;

    cursor.read_optional("subset.metadata", |c| {
        let count = c.read_u32("metadata count")? as usize;
        if count > MAX_ARRAY_COUNT {
            return Err(WaxError::wal("metadata count exceeds limit"));
        }
        for _ in 0..count {
            c.skip_string("metadata.key")?;
            c.skip_string("metadata.value")?;
        }
        Ok(())
    })?;
    Ok(())
}

/// Decode one mutation payload. The whole payload must be consumed.
pub fn decode_mutation_payload(payload: &[u8]) -> Result<WalMutation> {
    decode_inner(payload).map_err(to_wal)
}

fn decode_inner(payload: &[u8]) -> Result<WalMutation> {
    let mut cursor = BinaryCursor::new(payload, "WAL entry");
    let opcode = cursor.read_u8("opcode")?;
    let mutation = match opcode {
        0x01 => {
            let frame_id = cursor.read_u64("putFrame.frame_id")?;
            let _timestamp_ms = cursor.read_i64("putFrame.timestamp")?;
            skip_frame_meta_subset(&mut cursor)?;
            let payload_offset = cursor.read_u64("putFrame.payload_offset")?;
            let payload_length = cursor.read_u64("putFrame.payload_length")?;
            let canonical_encoding = cursor.read_u8("putFrame.canonical_encoding")?;
            if canonical_encoding > 3 {
                return Err(WaxError::wal("invalid canonical encoding in WAL putFrame"));
            }
            let canonical_length = cursor.read_u64("putFrame.canonical_length")?;
            let canonical_checksum = cursor.read_fixed::<32>("putFrame.canonical_checksum")?;
            let stored_checksum = cursor.read_fixed::<32>("putFrame.stored_checksum")?;
            WalMutation::PutFrame(PutFrameRecord {
                frame_id,
                payload_offset,
                payload_length,
                canonical_encoding,
                canonical_length,
                canonical_checksum,
                stored_checksum,
            })
        }
        0x02 => WalMutation::DeleteFrame {
            frame_id: cursor.read_u64("deleteFrame.frame_id")?,
        },
        0x03 => WalMutation::SupersedeFrame {
            superseded_id: cursor.read_u64("supersede.superseded_id")?,
            superseding_id: cursor.read_u64("supersede.superseding_id")?,
        },
        0x04 => {
            let frame_id = cursor.read_u64("putEmbedding.frame_id")?;
            let dimension = cursor.read_u32("putEmbedding.dimension")?;
            if dimension as usize > MAX_ARRAY_COUNT {
                return Err(WaxError::wal("embedding dimension exceeds limit"));
            }
            let mut values = Vec::with_capacity(dimension as usize);
            for _ in 0..dimension {
                values.push(cursor.read_f32("embedding.vector")?);
            }
            WalMutation::PutEmbedding {
                frame_id,
                dimension,
                values,
            }
        }
        _ => return Err(WaxError::wal("unknown WAL opcode")),
    };
    cursor.finish()?;
    Ok(mutation)
}

/// Encode a put_frame payload with the v1 all-absent meta subset.
pub fn encode_put_frame_payload(record: &PutFrameRecord) -> Vec<u8> {
    let mut builder = BinaryBuilder::with_capacity(256);
    builder.append_u8(0x01);
    builder.append_u64(record.frame_id);
    builder.append_i64(0); // timestamp_ms

    // Frame meta subset, all fields absent.
    builder.append_u8(0); // uri
    builder.append_u8(0); // title
    builder.append_u8(0); // kind
    builder.append_u8(0); // track
    builder.append_u32(0); // tags count
    builder.append_u32(0); // labels count
    builder.append_u32(0); // content_dates count
    builder.append_u8(0); // role
    builder.append_u8(0); // parent_id
    builder.append_u8(0); // chunk_index
    builder.append_u8(0); // chunk_count
    builder.append_u8(0); // chunk_manifest
    builder.append_u8(0); // status
    builder.append_u8(0); // supersedes
    builder.append_u8(0); // superseded_by
    builder.append_u8(0); // search_text
    builder.append_u8(0); // metadata

    builder.append_u64(record.payload_offset);
    builder.append_u64(record.payload_length);
    builder.append_u8(record.canonical_encoding);
    builder.append_u64(record.canonical_length);
    builder.append_fixed(&record.canonical_checksum);
    builder.append_fixed(&record.stored_checksum);
    builder.build()
}

pub fn encode_delete_frame_payload(frame_id: u64) -> Vec<u8> {
    let mut builder = BinaryBuilder::with_capacity(9);
    builder.append_u8(0x02);
    builder.append_u64(frame_id);
    builder.build()
}

pub fn encode_supersede_frame_payload(superseded_id: u64, superseding_id: u64) -> Vec<u8> {
    let mut builder = BinaryBuilder::with_capacity(17);
    builder.append_u8(0x03);
    builder.append_u64(superseded_id);
    builder.append_u64(superseding_id);
    builder.build()
}

pub fn encode_put_embedding_payload(frame_id: u64, values: &[f32]) -> Vec<u8> {
    let mut builder = BinaryBuilder::with_capacity(13 + values.len() * 4);
    builder.append_u8(0x04);
    builder.append_u64(frame_id);
    builder.append_u32(values.len() as u32);
    for value in values {
        builder.append_f32(*value);
    }
    builder.build()
}
