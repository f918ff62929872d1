//! Table-of-contents codec.
//!
//! The TOC is a self-describing list of frames and index segments written
//! immediately before the footer. Its last 32 bytes are a self-checksum
//! computed over the preceding bytes plus a zeroed 32-byte slot, so the
//! checksum commits to every byte of the TOC including the placeholder
//! fields reserved for later format versions.

use std::collections::HashSet;

use crate::digest::{Digest32, Sha256};
use crate::error::{Result, WaxError};
use crate::format::cursor::{BinaryBuilder, BinaryCursor};
use crate::format::{MAX_ARRAY_COUNT, MAX_BLOB_BYTES, MAX_TOC_BYTES};

/// Frame lifecycle status stored in the TOC.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FrameStatus {
    Live = 0,
    Deleted = 1,
}

impl FrameStatus {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Live),
            1 => Some(Self::Deleted),
            _ => None,
        }
    }
}

/// Kind of auxiliary index held by a segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum SegmentKind {
    Lex = 0,
    Vec = 1,
    Time = 2,
    /// Structured-memory entry list.
    Memory = 3,
}

impl SegmentKind {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Lex),
            1 => Some(Self::Vec),
            2 => Some(Self::Time),
            3 => Some(Self::Memory),
            _ => None,
        }
    }
}

/// Committed description of one content frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameSummary {
    pub id: u64,
    pub payload_offset: u64,
    pub payload_length: u64,
    /// Digest of the canonical (uncompressed) bytes.
    pub payload_checksum: Digest32,
    /// 0 = plain; 1..=3 reserved for compressed encodings.
    pub canonical_encoding: u8,
    /// Required when `canonical_encoding != 0`.
    pub canonical_length: Option<u64>,
    /// Digest of the on-disk bytes. Required when `payload_length > 0`;
    /// equals `payload_checksum` for plain payloads.
    pub stored_checksum: Option<Digest32>,
    pub status: FrameStatus,
    pub supersedes: Option<u64>,
    pub superseded_by: Option<u64>,
}

impl FrameSummary {
    /// Plain-encoded frame over on-disk bytes at `offset..offset+length`.
    pub fn plain(id: u64, offset: u64, length: u64, checksum: Digest32) -> Self {
        Self {
            id,
            payload_offset: offset,
            payload_length: length,
            payload_checksum: checksum,
            canonical_encoding: 0,
            canonical_length: None,
            stored_checksum: (length > 0).then_some(checksum),
            status: FrameStatus::Live,
            supersedes: None,
            superseded_by: None,
        }
    }
}

/// Committed description of one auxiliary index segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentSummary {
    pub id: u64,
    pub bytes_offset: u64,
    pub bytes_length: u64,
    pub checksum: Digest32,
    /// 0 = none; 1..=3 reserved.
    pub compression: u8,
    pub kind: SegmentKind,
}

/// Lexical index manifest pointing at a `SegmentKind::Lex` segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LexManifest {
    pub doc_count: u64,
    pub bytes_offset: u64,
    pub bytes_length: u64,
    pub checksum: Digest32,
    pub version: u32,
}

/// Vector index manifest pointing at a `SegmentKind::Vec` segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VecManifest {
    pub vector_count: u64,
    pub dimension: u32,
    pub bytes_offset: u64,
    pub bytes_length: u64,
    pub checksum: Digest32,
    pub similarity: u8,
}

/// Timeline index manifest pointing at a `SegmentKind::Time` segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimeManifest {
    pub bytes_offset: u64,
    pub bytes_length: u64,
    pub entry_count: u64,
    pub checksum: Digest32,
}

/// Decoded TOC.
#[derive(Debug, Clone, PartialEq)]
pub struct TocSummary {
    pub toc_version: u64,
    pub frames: Vec<FrameSummary>,
    pub segments: Vec<SegmentSummary>,
    pub lex_index: Option<LexManifest>,
    pub vec_index: Option<VecManifest>,
    pub time_index: Option<TimeManifest>,
    pub toc_checksum: Digest32,
}

impl Default for FrameStatus {
    fn default() -> Self {
        Self::Live
    }
}

impl Default for TocSummary {
    fn default() -> Self {
        Self {
            toc_version: 1,
            frames: Vec::new(),
            segments: Vec::new(),
            lex_index: None,
            vec_index: None,
            time_index: None,
            toc_checksum: [0u8; 32],
        }
    }
}

/// TOC contents supplied to the encoder. Manifests must reference segments
/// present in `segments` byte-for-byte or the encoded TOC will not decode.
#[derive(Debug, Clone, Default)]
pub struct TocContents<'a> {
    pub frames: &'a [FrameSummary],
    pub segments: &'a [SegmentSummary],
    pub lex_index: Option<&'a LexManifest>,
    pub vec_index: Option<&'a VecManifest>,
    pub time_index: Option<&'a TimeManifest>,
}

/// Checksum over the TOC with the trailing 32-byte slot zeroed.
pub fn compute_toc_checksum(toc_bytes: &[u8]) -> Result<Digest32> {
    if toc_bytes.len() < 32 {
        return Err(WaxError::format("TOC bytes must be at least 32 bytes"));
    }
    let mut hasher = Sha256::new();
    hasher.update(&toc_bytes[..toc_bytes.len() - 32]);
    hasher.update(&[0u8; 32]);
    Ok(hasher.finalize())
}

/// True iff the TOC self-checksum verifies and equals `expected_hash`.
pub fn toc_hash_matches(toc_bytes: &[u8], expected_hash: &[u8]) -> bool {
    if expected_hash.len() != 32 || toc_bytes.len() < 32 {
        return false;
    }
    let computed = match compute_toc_checksum(toc_bytes) {
        Ok(digest) => digest,
        Err(_) => return false,
    };
    let stored = &toc_bytes[toc_bytes.len() - 32..];
    computed == *stored && computed == *expected_hash
}

fn append_optional_digest(builder: &mut BinaryBuilder, digest: Option<&Digest32>) {
    match digest {
        Some(value) => {
            builder.append_u8(1);
            builder.append_fixed(value);
        }
        None => builder.append_u8(0),
    }
}

fn encode_frame(builder: &mut BinaryBuilder, frame: &FrameSummary) -> Result<()> {
    builder.append_u64(frame.id);
    builder.append_i64(0); // timestamp

    builder.append_u8(0); // anchor_ts absent
    builder.append_u8(0); // kind absent
    builder.append_u8(0); // track absent

    builder.append_u64(frame.payload_offset);
    builder.append_u64(frame.payload_length);
    builder.append_fixed(&frame.payload_checksum);

    builder.append_u8(0); // uri absent
    builder.append_u8(0); // title absent

    if frame.canonical_encoding > 3 {
        return Err(WaxError::format(
            "invalid canonical encoding in frame summary",
        ));
    }
    builder.append_u8(frame.canonical_encoding);

    match frame.canonical_length {
        Some(length) => {
            builder.append_u8(1);
            builder.append_u64(length);
        }
        None => {
            if frame.canonical_encoding != 0 {
                return Err(WaxError::format(
                    "missing canonical_length for compressed frame summary",
                ));
            }
            builder.append_u8(0);
        }
    }

    match &frame.stored_checksum {
        Some(checksum) => {
            builder.append_u8(1);
            builder.append_fixed(checksum);
        }
        None if frame.payload_length > 0 => {
            if frame.canonical_encoding != 0 {
                return Err(WaxError::format(
                    "missing stored_checksum for compressed frame summary",
                ));
            }
            // Plain payload: canonical checksum doubles as stored checksum.
            builder.append_u8(1);
            builder.append_fixed(&frame.payload_checksum);
        }
        None => builder.append_u8(0),
    }

    builder.append_u8(0); // metadata absent
    builder.append_u8(0); // search_text absent
    builder.append_u32(0); // tags count
    builder.append_u32(0); // labels count
    builder.append_u32(0); // content_dates count

    builder.append_u8(0); // role
    builder.append_u8(0); // parent_id absent
    builder.append_u8(0); // chunk_index absent
    builder.append_u8(0); // chunk_count absent
    builder.append_u8(0); // chunk_manifest absent

    builder.append_u8(frame.status as u8);
    builder.append_optional_u64(frame.supersedes);
    builder.append_optional_u64(frame.superseded_by);
    Ok(())
}

/// Encode a v1 TOC holding only frames (no segments or manifests).
pub fn encode_toc_v1(frames: &[FrameSummary]) -> Result<Vec<u8>> {
    encode_toc(&TocContents {
        frames,
        ..TocContents::default()
    })
}

/// Encode an empty v1 TOC (used when creating a store).
pub fn encode_empty_toc_v1() -> Vec<u8> {
    // Encoding an empty frame list cannot fail.
    encode_toc_v1(&[]).expect("empty TOC encodes")
}

/// Encode a v1 TOC with frames, segment catalog and index manifests.
pub fn encode_toc(contents: &TocContents<'_>) -> Result<Vec<u8>> {
    let mut builder = BinaryBuilder::with_capacity(256 + contents.frames.len() * 160);
    builder.append_u64(1); // toc_version
    if contents.frames.len() > u32::MAX as usize {
        return Err(WaxError::format("too many frames for TOC v1"));
    }
    builder.append_u32(contents.frames.len() as u32);
    for frame in contents.frames {
        encode_frame(&mut builder, frame)?;
    }

    match contents.lex_index {
        Some(lex) => {
            builder.append_u8(1);
            builder.append_u64(lex.doc_count);
            builder.append_u64(lex.bytes_offset);
            builder.append_u64(lex.bytes_length);
            builder.append_fixed(&lex.checksum);
            builder.append_u32(lex.version);
        }
        None => builder.append_u8(0),
    }

    match contents.vec_index {
        Some(vec) => {
            if vec.similarity > 2 {
                return Err(WaxError::format("invalid vec similarity"));
            }
            builder.append_u8(1);
            builder.append_u64(vec.vector_count);
            builder.append_u32(vec.dimension);
            builder.append_u64(vec.bytes_offset);
            builder.append_u64(vec.bytes_length);
            builder.append_fixed(&vec.checksum);
            builder.append_u8(vec.similarity);
        }
        None => builder.append_u8(0),
    }

    builder.append_u8(0); // clip manifest absent in v1

    match contents.time_index {
        Some(time) => {
            builder.append_u8(1);
            builder.append_u64(time.bytes_offset);
            builder.append_u64(time.bytes_length);
            builder.append_u64(time.entry_count);
            builder.append_fixed(&time.checksum);
        }
        None => builder.append_u8(0),
    }

    builder.append_u8(0); // memories_track absent
    builder.append_u8(0); // logic_mesh absent
    builder.append_u8(0); // sketch_track absent

    if contents.segments.len() > u32::MAX as usize {
        return Err(WaxError::format("too many segments for TOC v1"));
    }
    builder.append_u32(contents.segments.len() as u32);
    let mut prev_offset: Option<u64> = None;
    let mut prev_end: Option<u64> = None;
    for segment in contents.segments {
        let end = segment
            .bytes_offset
            .checked_add(segment.bytes_length)
            .ok_or_else(|| WaxError::format("segment range overflow"))?;
        if let (Some(prev_offset), Some(prev_end)) = (prev_offset, prev_end) {
            if segment.bytes_offset <= prev_offset {
                return Err(WaxError::format(
                    "segment offsets are not strictly increasing",
                ));
            }
            if prev_end > segment.bytes_offset {
                return Err(WaxError::format("segment ranges overlap"));
            }
        }
        prev_offset = Some(segment.bytes_offset);
        prev_end = Some(end);

        builder.append_u64(segment.id);
        builder.append_u64(segment.bytes_offset);
        builder.append_u64(segment.bytes_length);
        builder.append_fixed(&segment.checksum);
        builder.append_u8(segment.compression);
        builder.append_u8(segment.kind as u8);
    }

    builder.append_string(""); // ticket issuer
    builder.append_u64(0); // ticket seq_no
    builder.append_u64(0); // ticket expires_in_secs
    builder.append_u64(0); // ticket capacity_bytes
    builder.append_u8(0); // ticket verified

    builder.append_u8(0); // memory_binding absent
    builder.append_u8(0); // replay_manifest absent
    builder.append_u8(0); // enrichment_queue absent

    builder.append_fixed(&[0u8; 32]); // merkle root placeholder
    builder.append_fixed(&[0u8; 32]); // checksum slot

    let mut toc = builder.build();
    let checksum = compute_toc_checksum(&toc)?;
    let len = toc.len();
    toc[len - 32..].copy_from_slice(&checksum);
    Ok(toc)
}

fn decode_frame(cursor: &mut BinaryCursor<'_>, index: usize) -> Result<FrameSummary> {
    let id = cursor.read_u64("frame.id")?;
    let _timestamp = cursor.read_i64("frame.timestamp")?;

    cursor.read_optional("anchor_ts", |c| c.read_i64("anchor_ts"))?;
    cursor.read_optional("kind", |c| {
        c.skip_string("kind")?;
        Ok(())
    })?;
    cursor.read_optional("track", |c| {
        c.skip_string("track")?;
        Ok(())
    })?;

    let payload_offset = cursor.read_u64("frame.payload_offset")?;
    let payload_length = cursor.read_u64("frame.payload_length")?;
    let payload_checksum = cursor.read_fixed::<32>("frame.checksum")?;

    cursor.read_optional("uri", |c| {
        c.skip_string("uri")?;
        Ok(())
    })?;
    cursor.read_optional("title", |c| {
        c.skip_string("title")?;
        Ok(())
    })?;

    let canonical_encoding = cursor.read_u8("frame.canonical_encoding")?;
    if canonical_encoding > 3 {
        return Err(WaxError::format("invalid canonical encoding"));
    }

    let canonical_length =
        cursor.read_optional("canonical_length", |c| c.read_u64("canonical_length"))?;
    let stored_checksum =
        cursor.read_optional("stored_checksum", |c| c.read_fixed::<32>("stored_checksum"))?;

    cursor.read_optional("metadata", |c| {
        let count = c.read_u32("metadata.count")? as usize;
        if count > MAX_ARRAY_COUNT {
            return Err(WaxError::format("metadata count exceeds limit"));
        }
        let mut seen_keys = HashSet::with_capacity(count);
        for _ in 0..count {
            let key = c.read_string("metadata.key")?;
            c.skip_string("metadata.value")?;
            if !seen_keys.insert(key) {
                return Err(WaxError::format("duplicate metadata key"));
            }
        }
        Ok(())
    })?;

    cursor.read_optional("search_text", |c| {
        c.skip_string("search_text")?;
        Ok(())
    })?;

    for (field, counted_field) in [
        ("tag", "tags count"),
        ("label", "labels count"),
        ("content_date", "content_dates count"),
    ] {
        let count = cursor.read_u32(counted_field)? as usize;
        if count > MAX_ARRAY_COUNT {
            return Err(WaxError::format(format!("{counted_field} exceeds limit")));
        }
        for _ in 0..count {
            cursor.skip_string(field)?;
            if field == "tag" {
                cursor.skip_string("tag.value")?;
            }
        }
    }

    let role = cursor.read_u8("frame.role")?;
    if role > 3 {
        return Err(WaxError::format("invalid frame role"));
    }

    cursor.read_optional("parent_id", |c| c.read_u64("parent_id"))?;
    cursor.read_optional("chunk_index", |c| c.read_u32("chunk_index"))?;
    cursor.read_optional("chunk_count", |c| c.read_u32("chunk_count"))?;
    cursor.read_optional("chunk_manifest", |c| {
        c.skip_bytes_len32(MAX_BLOB_BYTES, "chunk_manifest")?;
        Ok(())
    })?;

    let status_raw = cursor.read_u8("frame.status")?;
    let status =
        FrameStatus::from_u8(status_raw).ok_or_else(|| WaxError::format("invalid frame status"))?;
    let supersedes = cursor.read_optional("supersedes", |c| c.read_u64("supersedes"))?;
    let superseded_by = cursor.read_optional("superseded_by", |c| c.read_u64("superseded_by"))?;

    if canonical_encoding != 0 && canonical_length.is_none() {
        return Err(WaxError::format(
            "missing canonical_length for compressed frame",
        ));
    }
    if payload_length > 0 && stored_checksum.is_none() {
        return Err(WaxError::format(
            "missing stored_checksum for non-empty payload",
        ));
    }
    if id != index as u64 {
        return Err(WaxError::format("frame ids are not dense"));
    }

    Ok(FrameSummary {
        id,
        payload_offset,
        payload_length,
        payload_checksum,
        canonical_encoding,
        canonical_length,
        stored_checksum,
        status,
        supersedes,
        superseded_by,
    })
}

fn manifest_matches_segment(
    segment: &SegmentSummary,
    expected_kind: SegmentKind,
    offset: u64,
    length: u64,
    checksum: &Digest32,
) -> bool {
    segment.kind == expected_kind
        && segment.bytes_offset == offset
        && segment.bytes_length == length
        && segment.checksum == *checksum
}

fn validate_manifest_segment_linkage(summary: &TocSummary) -> Result<()> {
    if let Some(lex) = &summary.lex_index {
        let found = summary.segments.iter().any(|segment| {
            manifest_matches_segment(
                segment,
                SegmentKind::Lex,
                lex.bytes_offset,
                lex.bytes_length,
                &lex.checksum,
            )
        });
        if !found {
            return Err(WaxError::format(
                "lex index manifest missing matching segment catalog entry",
            ));
        }
    }
    if let Some(vec) = &summary.vec_index {
        let found = summary.segments.iter().any(|segment| {
            manifest_matches_segment(
                segment,
                SegmentKind::Vec,
                vec.bytes_offset,
                vec.bytes_length,
                &vec.checksum,
            )
        });
        if !found {
            return Err(WaxError::format(
                "vec index manifest missing matching segment catalog entry",
            ));
        }
    }
    if let Some(time) = &summary.time_index {
        let found = summary.segments.iter().any(|segment| {
            manifest_matches_segment(
                segment,
                SegmentKind::Time,
                time.bytes_offset,
                time.bytes_length,
                &time.checksum,
            )
        });
        if !found {
            return Err(WaxError::format(
                "time index manifest missing matching segment catalog entry",
            ));
        }
    }
    Ok(())
}

pub fn decode_toc(toc_bytes: &[u8]) -> Result<TocSummary> {
    if toc_bytes.len() < 32 {
        return Err(WaxError::format("TOC must be at least 32 bytes"));
    }
    if toc_bytes.len() as u64 > MAX_TOC_BYTES {
        return Err(WaxError::format("TOC exceeds max size"));
    }

    let computed = compute_toc_checksum(toc_bytes)?;
    let stored: Digest32 = toc_bytes[toc_bytes.len() - 32..].try_into().unwrap();
    if computed != stored {
        return Err(WaxError::format("TOC checksum mismatch"));
    }

    let mut cursor = BinaryCursor::new(toc_bytes, "TOC");
    let mut summary = TocSummary {
        toc_checksum: stored,
        ..TocSummary::default()
    };
    summary.toc_version = cursor.read_u64("toc_version")?;
    if summary.toc_version != 1 {
        return Err(WaxError::format("unsupported TOC version"));
    }

    let frame_count = cursor.read_u32("frame count")? as usize;
    if frame_count > MAX_ARRAY_COUNT {
        return Err(WaxError::format("frame count exceeds limit"));
    }
    summary.frames.reserve(frame_count);
    for index in 0..frame_count {
        summary.frames.push(decode_frame(&mut cursor, index)?);
    }

    summary.lex_index = cursor.read_optional("index.lex", |c| {
        Ok(LexManifest {
            doc_count: c.read_u64("lex doc_count")?,
            bytes_offset: c.read_u64("lex offset")?,
            bytes_length: c.read_u64("lex length")?,
            checksum: c.read_fixed::<32>("lex checksum")?,
            version: c.read_u32("lex version")?,
        })
    })?;

    summary.vec_index = cursor.read_optional("index.vec", |c| {
        let vector_count = c.read_u64("vec vector_count")?;
        let dimension = c.read_u32("vec dimension")?;
        let bytes_offset = c.read_u64("vec offset")?;
        let bytes_length = c.read_u64("vec length")?;
        let checksum = c.read_fixed::<32>("vec checksum")?;
        let similarity = c.read_u8("vec similarity")?;
        if similarity > 2 {
            return Err(WaxError::format("invalid vec similarity"));
        }
        Ok(VecManifest {
            vector_count,
            dimension,
            bytes_offset,
            bytes_length,
            checksum,
            similarity,
        })
    })?;

    if cursor.read_u8("clip manifest")? != 0 {
        return Err(WaxError::format("clip manifest not supported in v1"));
    }

    summary.time_index = cursor.read_optional("time_index", |c| {
        Ok(TimeManifest {
            bytes_offset: c.read_u64("time offset")?,
            bytes_length: c.read_u64("time length")?,
            entry_count: c.read_u64("time entry_count")?,
            checksum: c.read_fixed::<32>("time checksum")?,
        })
    })?;

    if cursor.read_u8("memories_track")? != 0
        || cursor.read_u8("logic_mesh")? != 0
        || cursor.read_u8("sketch_track")? != 0
    {
        return Err(WaxError::format("unsupported v1 extension track tag"));
    }

    let segment_count = cursor.read_u32("segment count")? as usize;
    if segment_count > MAX_ARRAY_COUNT {
        return Err(WaxError::format("segment count exceeds limit"));
    }
    let mut prev_offset: Option<u64> = None;
    let mut prev_end: Option<u64> = None;
    for _ in 0..segment_count {
        let id = cursor.read_u64("segment.id")?;
        let bytes_offset = cursor.read_u64("segment.offset")?;
        let bytes_length = cursor.read_u64("segment.length")?;
        let checksum = cursor.read_fixed::<32>("segment checksum")?;
        let compression = cursor.read_u8("segment.compression")?;
        let kind_raw = cursor.read_u8("segment.kind")?;
        if compression > 3 {
            return Err(WaxError::format("invalid segment enum value"));
        }
        let kind = SegmentKind::from_u8(kind_raw)
            .ok_or_else(|| WaxError::format("invalid segment enum value"))?;
        let end = bytes_offset
            .checked_add(bytes_length)
            .ok_or_else(|| WaxError::format("segment range overflow"))?;
        if let (Some(prev_offset), Some(prev_end)) = (prev_offset, prev_end) {
            if bytes_offset <= prev_offset {
                return Err(WaxError::format(
                    "segment offsets are not strictly increasing",
                ));
            }
            if prev_end > bytes_offset {
                return Err(WaxError::format("segment ranges overlap"));
            }
        }
        prev_offset = Some(bytes_offset);
        prev_end = Some(end);
        summary.segments.push(SegmentSummary {
            id,
            bytes_offset,
            bytes_length,
            checksum,
            compression,
            kind,
        });
    }
    validate_manifest_segment_linkage(&summary)?;

    cursor.skip_string("ticket.issuer")?;
    cursor.read_u64("ticket.seq_no")?;
    cursor.read_u64("ticket.expires_in_secs")?;
    cursor.read_u64("ticket.capacity_bytes")?;
    if cursor.read_u8("ticket.verified")? > 1 {
        return Err(WaxError::format("ticket verified must be 0 or 1"));
    }

    if cursor.read_u8("memory_binding")? != 0
        || cursor.read_u8("replay_manifest")? != 0
        || cursor.read_u8("enrichment_queue")? != 0
    {
        return Err(WaxError::format("unsupported v1 optional manifest tag"));
    }

    cursor.read_fixed::<32>("merkle_root")?;
    let checksum_field = cursor.read_fixed::<32>("toc_checksum")?;
    if checksum_field != stored {
        return Err(WaxError::format("toc_checksum field mismatch"));
    }
    cursor.finish()?;

    Ok(summary)
}
