//! Append-only index file
//!
//! Consecutive 1 KiB-padded blocks, written through a buffered handle that
//! is flushed after every block. Block metadata stays in memory; a separate
//! read-only handle is opened on the first read and kept with the file.

use crate::index::synopsis::ClusterSummary;
use crate::storage::block::{BlockMeta, EncodedBlock};
use crate::storage::error::{StorageError, StorageResult};
use crate::storage::mapped::{MappedCluster, ReadOptions};
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Index file holding every flushed block of one index
pub struct IndexFile {
    path: PathBuf,
    writer: BufWriter<File>,
    reader: Option<File>,
    blocks: Vec<BlockMeta>,
    len: u64,
}

impl IndexFile {
    /// Create `<dir>/<name>.acer`
    ///
    /// An existing file is truncated: block metadata is not persisted, so
    /// old blocks could not be located again.
    pub fn create(dir: impl AsRef<Path>, name: &str) -> StorageResult<Self> {
        let path = dir.as_ref().join(format!("{}.acer", name));
        if path.exists() {
            warn!(path = %path.display(), "Index file exists and will be truncated");
        }
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&path)?;

        Ok(Self {
            path,
            writer: BufWriter::new(file),
            reader: None,
            blocks: Vec::new(),
            len: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Id the next appended block will get
    pub fn next_block_id(&self) -> u32 {
        self.blocks.len() as u32
    }

    pub fn blocks(&self) -> &[BlockMeta] {
        &self.blocks
    }

    pub fn block(&self, block_id: u32) -> Option<&BlockMeta> {
        self.blocks.get(block_id as usize)
    }

    /// Bytes written so far
    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Append a block and record its metadata
    pub fn append(&mut self, block: EncodedBlock) -> StorageResult<&BlockMeta> {
        let meta = BlockMeta {
            block_id: self.next_block_id(),
            offset: self.len,
            size: block.bytes.len() as u32,
            event_count: block.event_count,
            checksum: block.checksum,
            components: block.components,
        };

        self.writer.write_all(&block.bytes)?;
        self.writer.flush()?;
        self.len += block.bytes.len() as u64;

        debug!(
            block_id = meta.block_id,
            offset = meta.offset,
            size = meta.size,
            "Appended index block"
        );

        self.blocks.push(meta);
        self.blocks
            .last()
            .ok_or_else(|| StorageError::InvalidBlock("Block list empty after append".to_string()))
    }

    /// Open a reader over one cluster
    pub fn read_cluster(
        &mut self,
        summary: &ClusterSummary,
        attrs: &[usize],
        options: ReadOptions,
    ) -> StorageResult<MappedCluster> {
        if self.reader.is_none() {
            self.reader = Some(File::open(&self.path)?);
        }
        let meta = self.blocks.get(summary.block_id as usize).ok_or_else(|| {
            StorageError::InvalidBlock(format!("Unknown block {}", summary.block_id))
        })?;
        let file = self
            .reader
            .as_ref()
            .ok_or_else(|| StorageError::InvalidBlock("Index reader unavailable".to_string()))?;
        MappedCluster::open(file, meta, summary, attrs, options)
    }
}
