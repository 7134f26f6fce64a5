//! On-disk vector segment: fixed-width records behind a small header.
//!
//! Layout (all little-endian):
//! - header: magic `RMV1`, version u32, dimension u32, reserved u32
//! - records: chunk_id i64, document_id i64, then `dimension` f32 values
//!
//! Appends are fsynced; deletes rewrite through a temp file and rename. A
//! partial trailing record (crash mid-append) is ignored by readers and
//! dropped by the next rewrite.

use memmap2::Mmap;
use std::fs::{File, OpenOptions};
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use crate::error::StorageError;
use crate::types::{ChunkId, DocumentId};

const MAGIC: [u8; 4] = *b"RMV1";
const VERSION: u32 = 1;
const HEADER_LEN: usize = 16;
/// chunk_id + document_id, before the vector payload.
const RECORD_PREFIX: usize = 16;

/// One vector queued for insertion.
#[derive(Debug, Clone)]
pub struct VectorEntry {
    pub chunk_id: ChunkId,
    pub document_id: DocumentId,
    pub vector: std::sync::Arc<[f32]>,
}

/// A single collection's durable vector file.
#[derive(Debug)]
pub struct VectorSegment {
    path: PathBuf,
    dimension: usize,
}

impl VectorSegment {
    /// Create a new segment file, or validate an existing one.
    pub fn open_or_create(path: &Path, dimension: usize) -> Result<Self, StorageError> {
        if path.exists() {
            let segment = Self::open(path)?;
            if segment.dimension != dimension {
                return Err(StorageError::DimensionMismatch {
                    expected: segment.dimension,
                    got: dimension,
                });
            }
            return Ok(segment);
        }

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let mut header = Vec::with_capacity(HEADER_LEN);
        header.extend_from_slice(&MAGIC);
        header.extend_from_slice(&VERSION.to_le_bytes());
        header.extend_from_slice(&(dimension as u32).to_le_bytes());
        header.extend_from_slice(&0u32.to_le_bytes());

        let mut file = File::create(path)?;
        file.write_all(&header)?;
        file.sync_all()?;

        Ok(Self {
            path: path.to_path_buf(),
            dimension,
        })
    }

    /// Open an existing segment, reading the dimension from its header.
    pub fn open(path: &Path) -> Result<Self, StorageError> {
        let mut file = File::open(path)?;
        let mut header = [0u8; HEADER_LEN];
        file.read_exact(&mut header)
            .map_err(|_| StorageError::CorruptSegment {
                path: path.to_path_buf(),
                reason: "file shorter than header".to_string(),
            })?;

        if header[0..4] != MAGIC {
            return Err(StorageError::CorruptSegment {
                path: path.to_path_buf(),
                reason: "bad magic".to_string(),
            });
        }
        let version = u32::from_le_bytes([header[4], header[5], header[6], header[7]]);
        if version != VERSION {
            return Err(StorageError::CorruptSegment {
                path: path.to_path_buf(),
                reason: format!("unsupported version {version}"),
            });
        }
        let dimension = u32::from_le_bytes([header[8], header[9], header[10], header[11]]) as usize;
        if dimension == 0 {
            return Err(StorageError::CorruptSegment {
                path: path.to_path_buf(),
                reason: "zero dimension".to_string(),
            });
        }

        Ok(Self {
            path: path.to_path_buf(),
            dimension,
        })
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn record_len(&self) -> usize {
        RECORD_PREFIX + self.dimension * 4
    }

    /// Append records and fsync.
    pub fn append(&self, entries: &[VectorEntry]) -> Result<(), StorageError> {
        for entry in entries {
            if entry.vector.len() != self.dimension {
                return Err(StorageError::DimensionMismatch {
                    expected: self.dimension,
                    got: entry.vector.len(),
                });
            }
        }

        let file = OpenOptions::new().append(true).open(&self.path)?;
        let mut writer = BufWriter::new(file);
        for entry in entries {
            writer.write_all(&entry.chunk_id.get().to_le_bytes())?;
            writer.write_all(&entry.document_id.get().to_le_bytes())?;
            for value in entry.vector.iter() {
                writer.write_all(&value.to_le_bytes())?;
            }
        }
        writer.flush()?;
        writer.get_ref().sync_all()?;
        Ok(())
    }

    /// Scan all records, returning the `top_k` highest dot products in
    /// descending order. Stored vectors are unit length, so the dot
    /// product is the cosine similarity; the stable sort keeps ties in
    /// insertion order.
    pub fn search(&self, query: &[f32], top_k: usize) -> Result<Vec<(ChunkId, f32)>, StorageError> {
        if query.len() != self.dimension {
            return Err(StorageError::DimensionMismatch {
                expected: self.dimension,
                got: query.len(),
            });
        }

        let file = File::open(&self.path)?;
        let len = file.metadata()?.len() as usize;
        if len <= HEADER_LEN {
            return Ok(Vec::new());
        }

        let mmap = unsafe { Mmap::map(&file)? };
        let body = &mmap[HEADER_LEN..];
        let record_len = self.record_len();
        let records = body.len() / record_len;

        let mut scored: Vec<(ChunkId, f32)> = Vec::with_capacity(records);
        for r in 0..records {
            let offset = r * record_len;
            let chunk_id = read_i64(body, offset);
            let mut dot = 0.0f32;
            let vector_offset = offset + RECORD_PREFIX;
            for (i, q) in query.iter().enumerate() {
                dot += q * read_f32(body, vector_offset + i * 4);
            }
            scored.push((ChunkId::new(chunk_id), dot));
        }

        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(top_k);
        Ok(scored)
    }

    /// Rewrite the segment keeping only records the predicate rejects.
    /// Returns the number of removed records.
    pub fn delete_where(
        &self,
        mut remove: impl FnMut(ChunkId, DocumentId) -> bool,
    ) -> Result<usize, StorageError> {
        let record_len = self.record_len();
        let source = File::open(&self.path)?;
        let mut reader = BufReader::new(source);

        let mut header = [0u8; HEADER_LEN];
        reader.read_exact(&mut header)?;

        let tmp_path = self.path.with_extension("vec.tmp");
        let tmp = File::create(&tmp_path)?;
        let mut writer = BufWriter::new(tmp);
        writer.write_all(&header)?;

        let mut removed = 0usize;
        let mut record = vec![0u8; record_len];
        loop {
            match reader.read_exact(&mut record) {
                Ok(()) => {
                    let chunk_id = ChunkId::new(read_i64(&record, 0));
                    let document_id = DocumentId::new(read_i64(&record, 8));
                    if remove(chunk_id, document_id) {
                        removed += 1;
                    } else {
                        writer.write_all(&record)?;
                    }
                }
                // A torn trailing record is dropped along with EOF.
                Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
                Err(e) => return Err(e.into()),
            }
        }

        writer.flush()?;
        writer.get_ref().sync_all()?;
        std::fs::rename(&tmp_path, &self.path)?;
        Ok(removed)
    }

    /// Number of complete records in the segment.
    pub fn count(&self) -> Result<usize, StorageError> {
        let len = std::fs::metadata(&self.path)?.len() as usize;
        Ok(len.saturating_sub(HEADER_LEN) / self.record_len())
    }
}

fn read_i64(data: &[u8], offset: usize) -> i64 {
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&data[offset..offset + 8]);
    i64::from_le_bytes(bytes)
}

fn read_f32(data: &[u8], offset: usize) -> f32 {
    let mut bytes = [0u8; 4];
    bytes.copy_from_slice(&data[offset..offset + 4]);
    f32::from_le_bytes(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn entry(chunk: i64, doc: i64, vector: Vec<f32>) -> VectorEntry {
        VectorEntry {
            chunk_id: ChunkId::new(chunk),
            document_id: DocumentId::new(doc),
            vector: Arc::from(vector),
        }
    }

    #[test]
    fn test_create_append_search() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("seg.vec");
        let segment = VectorSegment::open_or_create(&path, 3).unwrap();

        segment
            .append(&[
                entry(1, 10, vec![1.0, 0.0, 0.0]),
                entry(2, 10, vec![0.0, 1.0, 0.0]),
                entry(3, 11, vec![0.7071, 0.7071, 0.0]),
            ])
            .unwrap();

        let results = segment.search(&[1.0, 0.0, 0.0], 2).unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].0, ChunkId::new(1));
        assert!((results[0].1 - 1.0).abs() < 1e-5);
        assert_eq!(results[1].0, ChunkId::new(3));
    }

    #[test]
    fn test_reopen_preserves_data() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("seg.vec");

        {
            let segment = VectorSegment::open_or_create(&path, 2).unwrap();
            segment.append(&[entry(7, 1, vec![0.6, 0.8])]).unwrap();
        }

        let segment = VectorSegment::open(&path).unwrap();
        assert_eq!(segment.dimension(), 2);
        assert_eq!(segment.count().unwrap(), 1);
        let results = segment.search(&[0.6, 0.8], 5).unwrap();
        assert_eq!(results[0].0, ChunkId::new(7));
    }

    #[test]
    fn test_ties_keep_insertion_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("seg.vec");
        let segment = VectorSegment::open_or_create(&path, 2).unwrap();

        // Identical vectors -> identical scores.
        segment
            .append(&[
                entry(5, 1, vec![1.0, 0.0]),
                entry(6, 1, vec![1.0, 0.0]),
                entry(7, 1, vec![1.0, 0.0]),
            ])
            .unwrap();

        let results = segment.search(&[1.0, 0.0], 3).unwrap();
        let ids: Vec<i64> = results.iter().map(|(id, _)| id.get()).collect();
        assert_eq!(ids, vec![5, 6, 7]);
    }

    #[test]
    fn test_delete_by_document() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("seg.vec");
        let segment = VectorSegment::open_or_create(&path, 2).unwrap();

        segment
            .append(&[
                entry(1, 10, vec![1.0, 0.0]),
                entry(2, 11, vec![0.0, 1.0]),
                entry(3, 10, vec![1.0, 0.0]),
            ])
            .unwrap();

        let removed = segment
            .delete_where(|_, doc| doc == DocumentId::new(10))
            .unwrap();
        assert_eq!(removed, 2);
        assert_eq!(segment.count().unwrap(), 1);

        let results = segment.search(&[0.0, 1.0], 10).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].0, ChunkId::new(2));
    }

    #[test]
    fn test_dimension_mismatch_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("seg.vec");
        let segment = VectorSegment::open_or_create(&path, 4).unwrap();

        let err = segment.append(&[entry(1, 1, vec![1.0, 0.0])]).unwrap_err();
        assert!(matches!(err, StorageError::DimensionMismatch { .. }));

        let err = segment.search(&[1.0], 5).unwrap_err();
        assert!(matches!(err, StorageError::DimensionMismatch { .. }));
    }

    #[test]
    fn test_open_rejects_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.vec");
        std::fs::write(&path, b"not a segment at all").unwrap();

        let err = VectorSegment::open(&path).unwrap_err();
        assert!(matches!(err, StorageError::CorruptSegment { .. }));
    }
}
