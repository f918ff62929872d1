//! Commit path: fold pending WAL mutations and publish the new container
//! state through four crash fences.
//!
//! Fence order is what makes interruption safe:
//! 1. TOC written past the data end — previous footer still authoritative.
//! 2. Footer written and file truncated to `footer_offset + 64` — open's
//!    trailing scan now prefers the new generation even though both header
//!    pages still describe the old one.
//! 3. Header page A rewritten with the incremented page generation and a
//!    fresh replay snapshot.
//! 4. Header page B rewritten one page generation behind A, so a torn
//!    write to either page always leaves a valid fallback.

use std::collections::BTreeMap;

use crate::digest::sha256;
use crate::error::{Result, WaxError};
use crate::format::header::{HeaderPage, ReplaySnapshot, HEADER_PAGE_SIZE};
use crate::format::mv2v::{encode_dense_vec_segment, VecSegmentInfo};
use crate::format::toc::{
    encode_toc, FrameStatus, FrameSummary, SegmentKind, SegmentSummary, TocContents, VecManifest,
};
use crate::format::{footer::Footer, FOOTER_SIZE};
use crate::fsio::{file_size, write_at};
use crate::wal::record::WalMutation;
use crate::wal::{scan_pending, WalCursors, WalRingWriter};

use super::faults::maybe_inject_commit_crash;
use super::open::try_read_footer_at;
use super::WaxStore;

/// Walk the supersedes chain from `superseded_id`; a walk that reaches
/// `superseding_id` would close a cycle. The graph is a forest of chains,
/// so the frame count bounds termination.
fn would_create_supersede_cycle(
    frames: &[FrameSummary],
    superseded_id: u64,
    superseding_id: u64,
) -> bool {
    let mut cursor = superseded_id;
    for _ in 0..frames.len() {
        let Some(frame) = frames.get(cursor as usize) else {
            return false;
        };
        let Some(next) = frame.supersedes else {
            return false;
        };
        cursor = next;
        if cursor == superseding_id {
            return true;
        }
        if cursor as usize >= frames.len() {
            return false;
        }
    }
    true
}

fn fold_mutation(
    frames: &mut Vec<FrameSummary>,
    embeddings: &mut BTreeMap<u64, Vec<f32>>,
    embedding_dimension: &mut Option<u32>,
    mutation: &WalMutation,
) -> Result<()> {
    match mutation {
        WalMutation::PutFrame(put) => {
            if put.frame_id != frames.len() as u64 {
                return Err(WaxError::store("wal putFrame frame_id is not dense"));
            }
            frames.push(FrameSummary {
                id: put.frame_id,
                payload_offset: put.payload_offset,
                payload_length: put.payload_length,
                payload_checksum: put.canonical_checksum,
                canonical_encoding: put.canonical_encoding,
                canonical_length: (put.canonical_encoding != 0).then_some(put.canonical_length),
                stored_checksum: (put.payload_length > 0).then_some(put.stored_checksum),
                status: FrameStatus::Live,
                supersedes: None,
                superseded_by: None,
            });
        }
        WalMutation::DeleteFrame { frame_id } => {
            let frame = frames
                .get_mut(*frame_id as usize)
                .ok_or_else(|| WaxError::store("wal delete references unknown frame_id"))?;
            frame.status = FrameStatus::Deleted;
        }
        WalMutation::SupersedeFrame {
            superseded_id,
            superseding_id,
        } => {
            if *superseded_id as usize >= frames.len() || *superseding_id as usize >= frames.len() {
                return Err(WaxError::store("wal supersede references unknown frame_id"));
            }
            if superseded_id == superseding_id {
                return Err(WaxError::store("wal supersede self-reference"));
            }
            let superseded = &frames[*superseded_id as usize];
            let superseding = &frames[*superseding_id as usize];
            if superseded
                .superseded_by
                .is_some_and(|existing| existing != *superseding_id)
            {
                return Err(WaxError::store(
                    "wal supersede conflict: superseded frame already has different superseding frame",
                ));
            }
            if superseding
                .supersedes
                .is_some_and(|existing| existing != *superseded_id)
            {
                return Err(WaxError::store(
                    "wal supersede conflict: superseding frame already supersedes different frame",
                ));
            }
            if would_create_supersede_cycle(frames, *superseded_id, *superseding_id) {
                return Err(WaxError::store("wal supersede cycle detected"));
            }
            frames[*superseded_id as usize].superseded_by = Some(*superseding_id);
            frames[*superseding_id as usize].supersedes = Some(*superseded_id);
        }
        WalMutation::PutEmbedding {
            frame_id,
            dimension,
            values,
        } => {
            // Embeddings never mutate the frame TOC; they fold into the
            // journal published as the vec segment.
            if let Some(existing) = *embedding_dimension {
                if existing != *dimension {
                    return Err(WaxError::store("wal embedding dimension mismatch"));
                }
            } else {
                *embedding_dimension = Some(*dimension);
            }
            embeddings.insert(*frame_id, values.clone());
        }
    }
    Ok(())
}

impl WaxStore {
    /// Publish all pending mutations atomically. A no-op on a clean store.
    pub fn commit(&mut self) -> Result<()> {
        if !self.is_open {
            return Err(WaxError::store("store is closed"));
        }
        if !self.dirty {
            return Ok(());
        }

        let size = file_size(&self.file)?;
        let footer_slice = try_read_footer_at(&mut self.file, size, self.footer_offset)
            .ok_or_else(|| WaxError::store("current footer is missing or invalid"))?;
        let toc_summary = crate::format::toc::decode_toc(&footer_slice.toc_bytes)?;
        let mut frames = toc_summary.frames;

        let pending_scan = scan_pending(
            &mut self.file,
            self.wal_offset,
            self.wal_size,
            self.wal.checkpoint_pos,
            self.wal_committed_seq,
        )?;
        let mut embeddings = self.committed_embeddings.clone();
        let mut embedding_dimension = self.embedding_dimension;
        for pending in &pending_scan.mutations {
            fold_mutation(
                &mut frames,
                &mut embeddings,
                &mut embedding_dimension,
                &pending.mutation,
            )?;
        }

        // The new TOC goes after every committed or pending payload, and
        // never overlaps the footer that is still authoritative until
        // fence 2 — a commit with no new payloads must not clobber it.
        let mut data_end = (self.wal_offset + self.wal_size).max(self.footer_offset + FOOTER_SIZE);
        for frame in &frames {
            if frame.payload_length == 0 {
                continue;
            }
            let frame_end = frame
                .payload_offset
                .checked_add(frame.payload_length)
                .ok_or_else(|| WaxError::store("frame payload range overflow during commit"))?;
            data_end = data_end.max(frame_end);
        }

        // Auxiliary segments: staged bytes replace committed ones of the
        // same kind; the vec segment is rebuilt from the embedding journal.
        let mut aux: BTreeMap<u8, Vec<u8>> = self.committed_aux.clone();
        for (kind, bytes) in &self.staged_aux {
            aux.insert(*kind, bytes.clone());
        }
        if !embeddings.is_empty() {
            let dimension = embedding_dimension
                .ok_or_else(|| WaxError::store("embedding journal missing dimension"))?;
            let mut vectors = Vec::with_capacity(embeddings.len() * dimension as usize);
            let mut frame_ids = Vec::with_capacity(embeddings.len());
            for (frame_id, values) in &embeddings {
                frame_ids.push(*frame_id);
                vectors.extend_from_slice(values);
            }
            let info = VecSegmentInfo {
                similarity: self.embedding_similarity,
                dimension,
                vector_count: frame_ids.len() as u64,
                payload_length: vectors.len() as u64 * 4,
            };
            aux.insert(
                SegmentKind::Vec as u8,
                encode_dense_vec_segment(&info, &vectors, &frame_ids)?,
            );
        }

        let mut segments = Vec::with_capacity(aux.len());
        let mut vec_manifest: Option<VecManifest> = None;
        let mut cursor = data_end;
        for (kind_raw, bytes) in &aux {
            let kind = SegmentKind::from_u8(*kind_raw)
                .ok_or_else(|| WaxError::store("invalid staged segment kind"))?;
            let checksum = sha256(bytes);
            write_at(&mut self.file, cursor, bytes)?;
            let summary = SegmentSummary {
                id: segments.len() as u64,
                bytes_offset: cursor,
                bytes_length: bytes.len() as u64,
                checksum,
                compression: 0,
                kind,
            };
            if kind == SegmentKind::Vec {
                let dimension = embedding_dimension.unwrap_or(0);
                vec_manifest = Some(VecManifest {
                    vector_count: embeddings.len() as u64,
                    dimension,
                    bytes_offset: summary.bytes_offset,
                    bytes_length: summary.bytes_length,
                    checksum,
                    similarity: self.embedding_similarity as u8,
                });
            }
            segments.push(summary);
            cursor += bytes.len() as u64;
        }

        let toc_offset = cursor;
        let toc_bytes = encode_toc(&TocContents {
            frames: &frames,
            segments: &segments,
            vec_index: vec_manifest.as_ref(),
            ..TocContents::default()
        })?;
        let footer_offset = toc_offset + toc_bytes.len() as u64;
        let footer = Footer {
            toc_len: toc_bytes.len() as u64,
            toc_hash: toc_bytes[toc_bytes.len() - 32..].try_into().unwrap(),
            generation: self.file_generation + 1,
            wal_committed_seq: self
                .wal_committed_seq
                .max(pending_scan.state.last_sequence),
        };

        write_at(&mut self.file, toc_offset, &toc_bytes)?;
        maybe_inject_commit_crash(1)?;
        write_at(
            &mut self.file,
            footer_offset,
            &crate::format::footer::encode_footer(&footer),
        )?;
        self.file.set_len(footer_offset + FOOTER_SIZE)?;
        maybe_inject_commit_crash(2)?;

        let mut writer = WalRingWriter::with_cursors(
            &mut self.file,
            self.wal_offset,
            self.wal_size,
            WalCursors {
                write_pos: pending_scan.state.write_pos,
                checkpoint_pos: self.wal.checkpoint_pos,
                pending_bytes: pending_scan.state.pending_bytes,
                // A commit without new WAL records (aux-only) must not let
                // the sequence counter regress and get reused.
                last_sequence: self
                    .wal
                    .last_sequence
                    .max(pending_scan.state.last_sequence),
                wrap_count: self.wal.wrap_count,
                checkpoint_count: self.wal.checkpoint_count,
                sentinel_write_count: self.wal.sentinel_write_count,
                write_call_count: self.wal.write_call_count,
            },
        );
        writer.record_checkpoint();
        let wal_cursors = writer.cursors();

        let page_a = HeaderPage {
            header_page_generation: self.header_page_generation + 1,
            file_generation: footer.generation,
            footer_offset,
            wal_offset: self.wal_offset,
            wal_size: self.wal_size,
            wal_write_pos: wal_cursors.write_pos,
            wal_checkpoint_pos: wal_cursors.checkpoint_pos,
            wal_committed_seq: footer.wal_committed_seq,
            toc_checksum: footer.toc_hash,
            replay_snapshot: Some(ReplaySnapshot {
                file_generation: footer.generation,
                wal_committed_seq: footer.wal_committed_seq,
                footer_offset,
                wal_write_pos: wal_cursors.write_pos,
                wal_checkpoint_pos: wal_cursors.checkpoint_pos,
                wal_pending_bytes: wal_cursors.pending_bytes,
                wal_last_sequence: wal_cursors.last_sequence,
            }),
            ..HeaderPage::default()
        };
        let page_b = HeaderPage {
            header_page_generation: self.header_page_generation,
            ..page_a.clone()
        };

        write_at(
            &mut self.file,
            0,
            &crate::format::header::encode_header_page(&page_a)?,
        )?;
        maybe_inject_commit_crash(3)?;
        write_at(
            &mut self.file,
            HEADER_PAGE_SIZE,
            &crate::format::header::encode_header_page(&page_b)?,
        )?;
        maybe_inject_commit_crash(4)?;

        self.file_generation = footer.generation;
        self.header_page_generation = page_a.header_page_generation;
        self.wal_committed_seq = footer.wal_committed_seq;
        self.wal = wal_cursors;
        self.footer_offset = footer_offset;
        self.next_frame_id = frames.len() as u64;
        self.committed_frames = frames;
        self.committed_embeddings = embeddings;
        self.embedding_dimension = embedding_dimension;
        self.committed_aux = aux;
        self.staged_aux.clear();
        self.dirty = false;
        self.has_local_mutations = false;

        self.stats = super::WaxStats {
            generation: self.file_generation,
            frame_count: self.committed_frames.len() as u64,
            pending_frames: 0,
        };
        tracing::debug!(
            generation = self.file_generation,
            frames = self.committed_frames.len(),
            "commit published"
        );
        Ok(())
    }
}
