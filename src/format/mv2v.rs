//! MV2V vector segment codec.
//!
//! A vector segment holds the serialized form of a vector index. Two
//! encodings share the 36-byte header: `Opaque` wraps a backend-defined
//! payload; `DenseF32` is the portable layout of `count × dim` little-endian
//! floats followed by an 8-byte id-list byte count and `count` u64 frame ids.
//!
//! ```text
//! Offset  Size  Field
//! 0       4     magic: b"MV2V"
//! 4       2     version: 1
//! 6       1     encoding (1 = opaque, 2 = dense-float)
//! 7       1     similarity (0 = cosine, 1 = dot, 2 = L2)
//! 8       4     dimension
//! 12      8     vector_count
//! 20      8     payload_length
//! 28      8     reserved, must be zero
//! ```

use crate::error::{Result, WaxError};

pub const MV2V_MAGIC: [u8; 4] = *b"MV2V";
pub const MV2V_VERSION: u16 = 1;
pub const MV2V_HEADER_SIZE: usize = 36;

/// Similarity metric a vector segment was built under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum VecSimilarity {
    Cosine = 0,
    Dot = 1,
    L2 = 2,
}

impl VecSimilarity {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Cosine),
            1 => Some(Self::Dot),
            2 => Some(Self::L2),
            _ => None,
        }
    }
}

/// Payload encoding of a vector segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum VecEncoding {
    Opaque = 1,
    DenseF32 = 2,
}

impl VecEncoding {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(Self::Opaque),
            2 => Some(Self::DenseF32),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VecSegmentInfo {
    pub similarity: VecSimilarity,
    pub dimension: u32,
    pub vector_count: u64,
    pub payload_length: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OpaqueVecPayload {
    pub info: VecSegmentInfo,
    pub payload: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DenseVecPayload {
    pub info: VecSegmentInfo,
    pub vectors: Vec<f32>,
    pub frame_ids: Vec<u64>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum DecodedVecSegment {
    Opaque(OpaqueVecPayload),
    Dense(DenseVecPayload),
}

fn vec_error(msg: &str) -> WaxError {
    WaxError::format(format!("mv2v: {msg}"))
}

struct VecHeader {
    encoding: VecEncoding,
    info: VecSegmentInfo,
}

fn decode_header(bytes: &[u8]) -> Result<VecHeader> {
    if bytes.len() < MV2V_HEADER_SIZE {
        return Err(vec_error("segment too small"));
    }
    if bytes[..4] != MV2V_MAGIC {
        return Err(vec_error("magic mismatch"));
    }
    let version = u16::from_le_bytes(bytes[4..6].try_into().unwrap());
    if version != MV2V_VERSION {
        return Err(vec_error("unsupported version"));
    }
    let encoding = VecEncoding::from_u8(bytes[6]).ok_or_else(|| vec_error("unsupported encoding"))?;
    let similarity =
        VecSimilarity::from_u8(bytes[7]).ok_or_else(|| vec_error("invalid similarity"))?;
    let dimension = u32::from_le_bytes(bytes[8..12].try_into().unwrap());
    let vector_count = u64::from_le_bytes(bytes[12..20].try_into().unwrap());
    let payload_length = u64::from_le_bytes(bytes[20..28].try_into().unwrap());
    if bytes[28..36].iter().any(|&b| b != 0) {
        return Err(vec_error("reserved bytes must be zero"));
    }
    Ok(VecHeader {
        encoding,
        info: VecSegmentInfo {
            similarity,
            dimension,
            vector_count,
            payload_length,
        },
    })
}

fn encode_header(info: &VecSegmentInfo, encoding: VecEncoding) -> Vec<u8> {
    let mut out = Vec::with_capacity(MV2V_HEADER_SIZE);
    out.extend_from_slice(&MV2V_MAGIC);
    out.extend_from_slice(&MV2V_VERSION.to_le_bytes());
    out.push(encoding as u8);
    out.push(info.similarity as u8);
    out.extend_from_slice(&info.dimension.to_le_bytes());
    out.extend_from_slice(&info.vector_count.to_le_bytes());
    out.extend_from_slice(&info.payload_length.to_le_bytes());
    out.extend_from_slice(&[0u8; 8]);
    out
}

/// Read the encoding of a segment without decoding the payload.
pub fn detect_vec_encoding(bytes: &[u8]) -> Result<VecEncoding> {
    Ok(decode_header(bytes)?.encoding)
}

/// Encode a segment whose payload is backend-defined bytes.
pub fn encode_opaque_vec_segment(info: &VecSegmentInfo, payload: &[u8]) -> Result<Vec<u8>> {
    if info.payload_length != payload.len() as u64 {
        return Err(vec_error("payload_length mismatch for opaque encoding"));
    }
    let mut out = encode_header(info, VecEncoding::Opaque);
    out.extend_from_slice(payload);
    Ok(out)
}

/// Encode a dense-float segment from `count × dim` values and their ids.
pub fn encode_dense_vec_segment(
    info: &VecSegmentInfo,
    vectors: &[f32],
    frame_ids: &[u64],
) -> Result<Vec<u8>> {
    if frame_ids.len() as u64 != info.vector_count {
        return Err(vec_error("frame_ids count mismatch for dense encoding"));
    }
    let expected_values = info
        .vector_count
        .checked_mul(info.dimension as u64)
        .ok_or_else(|| vec_error("vector size overflow"))?;
    if vectors.len() as u64 != expected_values {
        return Err(vec_error("vector value count mismatch for dense encoding"));
    }
    let expected_bytes = expected_values
        .checked_mul(4)
        .ok_or_else(|| vec_error("vector byte size overflow"))?;
    if info.payload_length != expected_bytes {
        return Err(vec_error("payload_length mismatch for dense encoding"));
    }

    let frame_bytes = (frame_ids.len() as u64)
        .checked_mul(8)
        .ok_or_else(|| vec_error("frame id byte size overflow"))?;
    let mut out = encode_header(info, VecEncoding::DenseF32);
    out.reserve(expected_bytes as usize + 8 + frame_bytes as usize);
    for value in vectors {
        out.extend_from_slice(&value.to_bits().to_le_bytes());
    }
    out.extend_from_slice(&frame_bytes.to_le_bytes());
    for frame_id in frame_ids {
        out.extend_from_slice(&frame_id.to_le_bytes());
    }
    Ok(out)
}

/// Decode a segment; rejects non-dense encodings.
pub fn decode_dense_vec_segment(bytes: &[u8]) -> Result<DenseVecPayload> {
    match decode_vec_segment(bytes)? {
        DecodedVecSegment::Dense(payload) => Ok(payload),
        DecodedVecSegment::Opaque(_) => Err(vec_error("segment encoding is not dense-float")),
    }
}

pub fn decode_vec_segment(bytes: &[u8]) -> Result<DecodedVecSegment> {
    let header = decode_header(bytes)?;
    let info = header.info;

    if header.encoding == VecEncoding::Opaque {
        let expected_total = (MV2V_HEADER_SIZE as u64)
            .checked_add(info.payload_length)
            .ok_or_else(|| vec_error("segment size overflow"))?;
        if expected_total != bytes.len() as u64 {
            return Err(vec_error("segment length mismatch"));
        }
        return Ok(DecodedVecSegment::Opaque(OpaqueVecPayload {
            info,
            payload: bytes[MV2V_HEADER_SIZE..].to_vec(),
        }));
    }

    let expected_values = info
        .vector_count
        .checked_mul(info.dimension as u64)
        .ok_or_else(|| vec_error("vector size overflow"))?;
    let expected_bytes = expected_values
        .checked_mul(4)
        .ok_or_else(|| vec_error("vector byte size overflow"))?;
    if info.payload_length != expected_bytes {
        return Err(vec_error("vector payload length mismatch"));
    }

    let mut cursor = MV2V_HEADER_SIZE as u64;
    let min_total = cursor
        .checked_add(info.payload_length)
        .and_then(|total| total.checked_add(8))
        .ok_or_else(|| vec_error("segment size overflow"))?;
    if (bytes.len() as u64) < min_total {
        return Err(vec_error("segment too small for dense payload"));
    }
    cursor += info.payload_length;

    let frame_length = u64::from_le_bytes(
        bytes[cursor as usize..cursor as usize + 8]
            .try_into()
            .unwrap(),
    );
    cursor += 8;

    let expected_frame_length = info
        .vector_count
        .checked_mul(8)
        .ok_or_else(|| vec_error("frame id length overflow"))?;
    if frame_length != expected_frame_length {
        return Err(vec_error("frame id payload length mismatch"));
    }

    let expected_total = cursor
        .checked_add(frame_length)
        .ok_or_else(|| vec_error("segment size overflow"))?;
    if bytes.len() as u64 != expected_total {
        return Err(vec_error("segment length mismatch"));
    }

    let mut vectors = Vec::with_capacity(expected_values as usize);
    for i in 0..expected_values as usize {
        let offset = MV2V_HEADER_SIZE + i * 4;
        let bits = u32::from_le_bytes(bytes[offset..offset + 4].try_into().unwrap());
        vectors.push(f32::from_bits(bits));
    }

    let mut frame_ids = Vec::with_capacity(info.vector_count as usize);
    for i in 0..info.vector_count as usize {
        let offset = cursor as usize + i * 8;
        frame_ids.push(u64::from_le_bytes(bytes[offset..offset + 8].try_into().unwrap()));
    }

    Ok(DecodedVecSegment::Dense(DenseVecPayload {
        info,
        vectors,
        frame_ids,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dense_info(dimension: u32, count: u64) -> VecSegmentInfo {
        VecSegmentInfo {
            similarity: VecSimilarity::Cosine,
            dimension,
            vector_count: count,
            payload_length: count * dimension as u64 * 4,
        }
    }

    #[test]
    fn dense_roundtrip() {
        let vectors = vec![0.1f32, 0.2, 0.3, 0.4, -0.5, -0.6];
        let frame_ids = vec![7u64, 42, 99];
        let bytes = encode_dense_vec_segment(&dense_info(2, 3), &vectors, &frame_ids).unwrap();
        let decoded = decode_dense_vec_segment(&bytes).unwrap();
        assert_eq!(decoded.vectors, vectors);
        assert_eq!(decoded.frame_ids, frame_ids);
        assert_eq!(decoded.info.dimension, 2);
        assert_eq!(decoded.info.vector_count, 3);
    }

    #[test]
    fn reserved_bytes_must_be_zero() {
        let bytes =
            encode_dense_vec_segment(&dense_info(2, 1), &[1.0, 2.0], &[0]).unwrap();
        for reserved in 28..36 {
            let mut corrupted = bytes.clone();
            corrupted[reserved] = 0xFF;
            let err = decode_vec_segment(&corrupted).unwrap_err();
            assert!(err.to_string().contains("reserved bytes must be zero"));
        }
    }

    #[test]
    fn opaque_roundtrip() {
        let payload = vec![9u8; 40];
        let info = VecSegmentInfo {
            similarity: VecSimilarity::Dot,
            dimension: 4,
            vector_count: 10,
            payload_length: 40,
        };
        let bytes = encode_opaque_vec_segment(&info, &payload).unwrap();
        assert_eq!(detect_vec_encoding(&bytes).unwrap(), VecEncoding::Opaque);
        match decode_vec_segment(&bytes).unwrap() {
            DecodedVecSegment::Opaque(decoded) => {
                assert_eq!(decoded.payload, payload);
                assert_eq!(decoded.info, info);
            }
            DecodedVecSegment::Dense(_) => panic!("expected opaque payload"),
        }
    }

    #[test]
    fn dense_decode_of_opaque_fails() {
        let info = VecSegmentInfo {
            similarity: VecSimilarity::Cosine,
            dimension: 1,
            vector_count: 1,
            payload_length: 4,
        };
        let bytes = encode_opaque_vec_segment(&info, &[0, 0, 0, 0]).unwrap();
        let err = decode_dense_vec_segment(&bytes).unwrap_err();
        assert!(err.to_string().contains("not dense-float"));
    }

    #[test]
    fn truncated_segment_rejected() {
        let bytes = encode_dense_vec_segment(&dense_info(2, 2), &[1.0; 4], &[1, 2]).unwrap();
        let err = decode_vec_segment(&bytes[..bytes.len() - 4]).unwrap_err();
        assert!(err.to_string().contains("segment length mismatch"));
    }

    #[test]
    fn frame_id_count_must_match() {
        let err = encode_dense_vec_segment(&dense_info(2, 2), &[1.0; 4], &[1]).unwrap_err();
        assert!(err.to_string().contains("frame_ids count mismatch"));
    }

    #[test]
    fn bad_magic_rejected() {
        let mut bytes = encode_dense_vec_segment(&dense_info(1, 1), &[1.0], &[5]).unwrap();
        bytes[0] = b'X';
        let err = decode_vec_segment(&bytes).unwrap_err();
        assert!(err.to_string().contains("magic mismatch"));
    }
}
