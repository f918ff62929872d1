//! Wax store — the crash-consistent single-file container.
//!
//! Owns the file handle, the WAL cursor state and the committed view of the
//! TOC. Mutations (`put`, `delete`, `supersede`, `put_embedding`) append WAL
//! records immediately but only become part of the committed container when
//! `commit` publishes a new TOC, footer and header pair.

mod commit;
pub mod faults;
mod lease;
mod open;

use std::collections::BTreeMap;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};

use crate::digest::sha256;
use crate::error::{Result, WaxError};
use crate::format::mv2v::VecSimilarity;
use crate::format::toc::{FrameStatus, FrameSummary, SegmentKind};
use crate::format::{self, footer::Footer, header::HeaderPage};
use crate::fsio::{file_size, write_at};
use crate::wal::{
    record, WalCursors, WalRingWriter,
};

/// Store-level counters reported by [`WaxStore::stats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WaxStats {
    pub frame_count: u64,
    pub pending_frames: u64,
    pub generation: u64,
}

/// WAL observability counters reported by [`WaxStore::wal_stats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WalStats {
    pub wal_size: u64,
    pub write_pos: u64,
    pub checkpoint_pos: u64,
    pub pending_bytes: u64,
    pub committed_seq: u64,
    pub last_seq: u64,
    pub wrap_count: u64,
    pub checkpoint_count: u64,
    pub sentinel_write_count: u64,
    pub write_call_count: u64,
    pub replay_snapshot_hit_count: u64,
}

/// Creation-time geometry knobs.
#[derive(Debug, Clone, Copy)]
pub struct StoreOptions {
    /// WAL ring capacity in bytes. Must hold at least one record header.
    pub wal_size: u64,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            wal_size: format::DEFAULT_WAL_SIZE,
        }
    }
}

/// Frame metadata map accepted by `put`. Reserved by the v1 format: the WAL
/// meta subset is written all-absent and the TOC does not persist it.
pub type Metadata = std::collections::HashMap<String, String>;

#[derive(Debug)]
pub struct WaxStore {
    path: PathBuf,
    file: std::fs::File,
    lease: lease::Lease,

    file_generation: u64,
    header_page_generation: u64,
    wal_offset: u64,
    wal_size: u64,
    wal_committed_seq: u64,
    wal: WalCursors,
    wal_replay_snapshot_hit_count: u64,
    footer_offset: u64,
    next_frame_id: u64,

    committed_frames: Vec<FrameSummary>,
    committed_embeddings: BTreeMap<u64, Vec<f32>>,
    embedding_dimension: Option<u32>,
    embedding_similarity: VecSimilarity,
    committed_aux: BTreeMap<u8, Vec<u8>>,
    staged_aux: BTreeMap<u8, Vec<u8>>,

    dirty: bool,
    has_local_mutations: bool,
    is_open: bool,
    stats: WaxStats,
}

impl WaxStore {
    /// Create a new store file with the default WAL geometry and open it.
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        Self::create_with_options(path, StoreOptions::default())
    }

    /// Create a new store file and open it. The file is laid out as two
    /// header pages, the (sparse) WAL ring, an empty TOC and the footer.
    pub fn create_with_options(path: impl AsRef<Path>, options: StoreOptions) -> Result<Self> {
        let path = path.as_ref();
        if options.wal_size < crate::wal::RECORD_HEADER_SIZE {
            return Err(WaxError::store("wal_size too small"));
        }
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;

        let toc_bytes = format::toc::encode_empty_toc_v1();
        let toc_checksum: [u8; 32] = toc_bytes[toc_bytes.len() - 32..].try_into().unwrap();

        let toc_offset = format::WAL_OFFSET + options.wal_size;
        let footer_offset = toc_offset + toc_bytes.len() as u64;

        let footer = Footer {
            toc_len: toc_bytes.len() as u64,
            toc_hash: toc_checksum,
            generation: 0,
            wal_committed_seq: 0,
        };

        let page_a = HeaderPage {
            header_page_generation: 1,
            footer_offset,
            wal_size: options.wal_size,
            toc_checksum,
            ..HeaderPage::default()
        };
        let page_b = HeaderPage {
            header_page_generation: 0,
            ..page_a.clone()
        };

        write_at(&mut file, 0, &format::header::encode_header_page(&page_a)?)?;
        write_at(
            &mut file,
            format::HEADER_PAGE_SIZE,
            &format::header::encode_header_page(&page_b)?,
        )?;
        write_at(&mut file, toc_offset, &toc_bytes)?;
        write_at(&mut file, footer_offset, &format::footer::encode_footer(&footer))?;
        file.set_len(footer_offset + format::FOOTER_SIZE)?;
        drop(file);

        Self::open(path, true)
    }

    /// Open an existing store, replaying the WAL. With `repair` set,
    /// trailing bytes beyond the last required byte are truncated.
    pub fn open(path: impl AsRef<Path>, repair: bool) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(WaxError::store(format!(
                "store file does not exist: {}",
                path.display()
            )));
        }
        let lease = lease::Lease::acquire(path)?;
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        let mut store = Self {
            path: path.to_path_buf(),
            file,
            lease,
            file_generation: 0,
            header_page_generation: 0,
            wal_offset: 0,
            wal_size: 0,
            wal_committed_seq: 0,
            wal: WalCursors::default(),
            wal_replay_snapshot_hit_count: 0,
            footer_offset: 0,
            next_frame_id: 0,
            committed_frames: Vec::new(),
            committed_embeddings: BTreeMap::new(),
            embedding_dimension: None,
            embedding_similarity: VecSimilarity::Cosine,
            committed_aux: BTreeMap::new(),
            staged_aux: BTreeMap::new(),
            dirty: false,
            has_local_mutations: false,
            is_open: false,
            stats: WaxStats::default(),
        };
        store.load_state(false, repair)?;
        Ok(store)
    }

    /// Re-validate the committed container. With `deep`, every frame's
    /// stored bytes and every segment are rehashed against the recorded
    /// checksums.
    pub fn verify(&mut self, deep: bool) -> Result<()> {
        self.load_state(deep, false)
    }

    fn ensure_open(&self) -> Result<()> {
        if !self.is_open {
            return Err(WaxError::store("store is closed"));
        }
        Ok(())
    }

    /// Append content bytes and a put_frame WAL record. Returns the dense
    /// frame id assigned to the content.
    pub fn put(&mut self, content: &[u8], _metadata: &Metadata) -> Result<u64> {
        self.ensure_open()?;

        let frame_id = self.next_frame_id;
        let payload_offset = file_size(&self.file)?;
        let payload_length = content.len() as u64;
        let stored_checksum = sha256(content);

        if !content.is_empty() {
            write_at(&mut self.file, payload_offset, content)?;
        }

        let payload = record::encode_put_frame_payload(&record::PutFrameRecord {
            frame_id,
            payload_offset,
            payload_length,
            canonical_encoding: 0,
            canonical_length: payload_length,
            canonical_checksum: stored_checksum,
            stored_checksum,
        });
        self.append_wal_record(&payload)?;

        self.stats.pending_frames += 1;
        self.next_frame_id = frame_id + 1;
        self.mark_mutated();
        Ok(frame_id)
    }

    /// Append a batch of frames. `metadatas` must be empty or match
    /// `contents` in length.
    pub fn put_batch(&mut self, contents: &[Vec<u8>], metadatas: &[Metadata]) -> Result<Vec<u64>> {
        if !metadatas.is_empty() && metadatas.len() != contents.len() {
            return Err(WaxError::store(
                "put_batch metadatas size must be zero or match contents size",
            ));
        }
        let empty = Metadata::new();
        let mut ids = Vec::with_capacity(contents.len());
        for (index, content) in contents.iter().enumerate() {
            let metadata = metadatas.get(index).unwrap_or(&empty);
            ids.push(self.put(content, metadata)?);
        }
        Ok(ids)
    }

    /// Mark a frame deleted. Takes effect at the next commit.
    pub fn delete(&mut self, frame_id: u64) -> Result<()> {
        self.ensure_open()?;
        if frame_id >= self.next_frame_id {
            return Err(WaxError::store("delete frame_id out of range"));
        }
        let payload = record::encode_delete_frame_payload(frame_id);
        self.append_wal_record(&payload)?;
        self.mark_mutated();
        Ok(())
    }

    /// Link `superseding_id` as the replacement of `superseded_id`.
    /// Conflicts and cycles are detected at commit time against the folded
    /// frame set.
    pub fn supersede(&mut self, superseded_id: u64, superseding_id: u64) -> Result<()> {
        self.ensure_open()?;
        if superseded_id == superseding_id {
            return Err(WaxError::store("supersede self-reference is not allowed"));
        }
        if superseded_id >= self.next_frame_id || superseding_id >= self.next_frame_id {
            return Err(WaxError::store("supersede frame_id out of range"));
        }
        let payload = record::encode_supersede_frame_payload(superseded_id, superseding_id);
        self.append_wal_record(&payload)?;
        self.mark_mutated();
        Ok(())
    }

    /// Record an embedding for a frame. Folded into the embedding journal
    /// and published as the vec segment at the next commit.
    pub fn put_embedding(&mut self, frame_id: u64, values: &[f32]) -> Result<()> {
        self.ensure_open()?;
        if frame_id >= self.next_frame_id {
            return Err(WaxError::store("put_embedding frame_id out of range"));
        }
        if values.is_empty() {
            return Err(WaxError::store("embedding must be non-empty"));
        }
        if let Some(dimension) = self.embedding_dimension {
            if values.len() as u64 != dimension as u64 {
                return Err(WaxError::store("embedding dimension mismatch"));
            }
        }
        let payload = record::encode_put_embedding_payload(frame_id, values);
        self.append_wal_record(&payload)?;
        if self.embedding_dimension.is_none() {
            self.embedding_dimension = Some(values.len() as u32);
        }
        self.mark_mutated();
        Ok(())
    }

    /// Similarity metric recorded in the published vec index manifest.
    pub fn set_embedding_similarity(&mut self, similarity: VecSimilarity) {
        self.embedding_similarity = similarity;
    }

    /// Committed embedding journal (frame id → vector).
    pub fn embeddings(&self) -> &BTreeMap<u64, Vec<f32>> {
        &self.committed_embeddings
    }

    /// Stage auxiliary index bytes for publication at the next commit.
    /// Staged bytes replace the committed segment of the same kind and are
    /// carried forward by later commits until replaced again. The vec kind
    /// is owned by the embedding journal.
    pub fn stage_aux_segment(&mut self, kind: SegmentKind, bytes: Vec<u8>) -> Result<()> {
        self.ensure_open()?;
        if kind == SegmentKind::Vec {
            return Err(WaxError::store(
                "vec segment is owned by the embedding journal",
            ));
        }
        self.staged_aux.insert(kind as u8, bytes);
        self.mark_mutated();
        Ok(())
    }

    /// Committed bytes of an auxiliary segment, if one is published.
    pub fn aux_segment(&self, kind: SegmentKind) -> Option<&[u8]> {
        self.committed_aux.get(&(kind as u8)).map(Vec::as_slice)
    }

    fn append_wal_record(&mut self, payload: &[u8]) -> Result<()> {
        let mut writer =
            WalRingWriter::with_cursors(&mut self.file, self.wal_offset, self.wal_size, self.wal);
        writer.append(payload)?;
        self.wal = writer.cursors();
        Ok(())
    }

    fn mark_mutated(&mut self) {
        self.dirty = true;
        self.has_local_mutations = true;
    }

    /// Committed frame metadata by id.
    pub fn frame_meta(&self, frame_id: u64) -> Result<FrameSummary> {
        self.committed_frames
            .get(frame_id as usize)
            .cloned()
            .ok_or_else(|| WaxError::store("frame_id is not committed"))
    }

    /// All committed frame metadata, id-ordered.
    pub fn frame_metas(&self) -> &[FrameSummary] {
        &self.committed_frames
    }

    /// Committed payload bytes of a frame.
    pub fn frame_content(&mut self, frame_id: u64) -> Result<Vec<u8>> {
        let frame = self.frame_meta(frame_id)?;
        if frame.payload_length == 0 {
            return Ok(Vec::new());
        }
        crate::fsio::read_exact_at(
            &mut self.file,
            frame.payload_offset,
            frame.payload_length as usize,
        )
    }

    /// Committed payload bytes for a batch of frames, in request order.
    pub fn frame_contents(&mut self, frame_ids: &[u64]) -> Result<Vec<Vec<u8>>> {
        frame_ids
            .iter()
            .map(|&frame_id| self.frame_content(frame_id))
            .collect()
    }

    /// Number of live-or-deleted committed frames plus pending puts; the id
    /// the next `put` will be assigned.
    pub fn next_frame_id(&self) -> u64 {
        self.next_frame_id
    }

    pub fn stats(&self) -> WaxStats {
        self.stats
    }

    pub fn wal_stats(&self) -> WalStats {
        WalStats {
            wal_size: self.wal_size,
            write_pos: self.wal.write_pos,
            checkpoint_pos: self.wal.checkpoint_pos,
            pending_bytes: self.wal.pending_bytes,
            committed_seq: self.wal_committed_seq,
            last_seq: self.wal.last_sequence,
            wrap_count: self.wal.wrap_count,
            checkpoint_count: self.wal.checkpoint_count,
            sentinel_write_count: self.wal.sentinel_write_count,
            write_call_count: self.wal.write_call_count,
            replay_snapshot_hit_count: self.wal_replay_snapshot_hit_count,
        }
    }

    /// Close the store, auto-committing mutations made by this process.
    /// Pending WAL recovered from a crashed process is left pending for the
    /// next explicit commit. The writer lease is released on every path.
    pub fn close(&mut self) -> Result<()> {
        let result = if self.is_open && self.dirty && self.has_local_mutations {
            self.commit()
        } else {
            Ok(())
        };
        self.is_open = false;
        self.lease.release();
        result
    }

    /// Frame status view used by engine rebuilds: live committed frames.
    pub fn live_frame_ids(&self) -> Vec<u64> {
        self.committed_frames
            .iter()
            .filter(|frame| frame.status == FrameStatus::Live)
            .map(|frame| frame.id)
            .collect()
    }
}
