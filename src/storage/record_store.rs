//! Paged store of fixed-size event records
//!
//! Records are packed into pages of `page_size` bytes. The page being filled
//! lives in memory; a full page is appended to `<schema>.row_data` and never
//! rewritten. Reads of a flushed page map just that page and keep the most
//! recent mapping around for the next read.

use crate::storage::error::{StorageError, StorageResult};
use crate::storage::types::Rid;
use memmap2::{Mmap, MmapOptions};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Fixed-size byte-record storage addressed by [`Rid`]
pub trait RecordStore {
    /// Append a record, returning its address
    fn insert(&mut self, record: &[u8]) -> StorageResult<Rid>;

    /// Read back the record at `rid`
    fn read(&mut self, rid: Rid) -> StorageResult<Vec<u8>>;

    /// Size in bytes of every record
    fn record_size(&self) -> usize;
}

/// [`RecordStore`] over a single page file
pub struct PagedRecordStore {
    path: PathBuf,
    writer: File,
    reader: Option<File>,
    /// Most recently mapped flushed page
    mapped: Option<(u32, Mmap)>,
    page_size: usize,
    record_size: usize,
    page: Vec<u8>,
    page_id: u32,
    offset: usize,
    record_count: u64,
}

impl PagedRecordStore {
    /// Create `<dir>/<schema_name>.row_data`, truncating an existing file
    pub fn create(
        dir: impl AsRef<Path>,
        schema_name: &str,
        page_size: usize,
        record_size: usize,
    ) -> StorageResult<Self> {
        if record_size == 0 || record_size > page_size {
            return Err(StorageError::RecordStore(format!(
                "Record size {} does not fit page size {}",
                record_size, page_size
            )));
        }
        if page_size > u16::MAX as usize + 1 {
            return Err(StorageError::RecordStore(format!(
                "Page size {} exceeds addressable offset range",
                page_size
            )));
        }

        let path = dir.as_ref().join(format!("{}.row_data", schema_name));
        if path.exists() {
            warn!(path = %path.display(), "Record file exists, truncating");
        }
        let writer = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&path)?;

        debug!(
            path = %path.display(),
            page_size,
            record_size,
            "Created record store"
        );

        Ok(Self {
            path,
            writer,
            reader: None,
            mapped: None,
            page_size,
            record_size,
            page: vec![0u8; page_size],
            page_id: 0,
            offset: 0,
            record_count: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn record_count(&self) -> u64 {
        self.record_count
    }

    /// Records that fit in one page
    pub fn records_per_page(&self) -> usize {
        self.page_size / self.record_size
    }

    /// Pages already written to the file
    pub fn flushed_pages(&self) -> u32 {
        self.page_id
    }

    fn flush_page(&mut self) -> StorageResult<()> {
        self.writer.write_all(&self.page)?;
        self.writer.flush()?;
        self.page.fill(0);
        self.page_id += 1;
        self.offset = 0;
        Ok(())
    }

    fn map_page(&mut self, page_id: u32) -> StorageResult<&Mmap> {
        let cached = matches!(&self.mapped, Some((id, _)) if *id == page_id);
        if !cached {
            if self.reader.is_none() {
                self.reader = Some(File::open(&self.path)?);
            }
            let file = self
                .reader
                .as_ref()
                .ok_or_else(|| StorageError::RecordStore("Reader unavailable".to_string()))?;
            let mmap = unsafe {
                MmapOptions::new()
                    .offset(page_id as u64 * self.page_size as u64)
                    .len(self.page_size)
                    .map(file)?
            };
            self.mapped = Some((page_id, mmap));
        }
        match &self.mapped {
            Some((_, mmap)) => Ok(mmap),
            None => Err(StorageError::RecordStore("Page mapping lost".to_string())),
        }
    }
}

impl RecordStore for PagedRecordStore {
    fn insert(&mut self, record: &[u8]) -> StorageResult<Rid> {
        if record.len() != self.record_size {
            return Err(StorageError::RecordStore(format!(
                "Record is {} bytes, store holds {}-byte records",
                record.len(),
                self.record_size
            )));
        }
        if self.offset + self.record_size > self.page_size {
            self.flush_page()?;
        }

        self.page[self.offset..self.offset + self.record_size].copy_from_slice(record);
        let rid = Rid::new(self.page_id, self.offset as u16);
        self.offset += self.record_size;
        self.record_count += 1;
        Ok(rid)
    }

    fn read(&mut self, rid: Rid) -> StorageResult<Vec<u8>> {
        let start = rid.offset as usize;
        let end = start + self.record_size;

        if rid.page == self.page_id {
            if end > self.offset {
                return Err(StorageError::RecordStore(format!("No record at {}", rid)));
            }
            return Ok(self.page[start..end].to_vec());
        }
        if rid.page > self.page_id || end > self.page_size {
            return Err(StorageError::RecordStore(format!("No record at {}", rid)));
        }

        let page = self.map_page(rid.page)?;
        Ok(page[start..end].to_vec())
    }

    fn record_size(&self) -> usize {
        self.record_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn record(i: u32, size: usize) -> Vec<u8> {
        let mut r = vec![0u8; size];
        r[..4].copy_from_slice(&i.to_le_bytes());
        r[size - 1] = (i % 251) as u8;
        r
    }

    #[test]
    fn test_insert_and_read_across_pages() {
        let dir = tempdir().unwrap();
        let mut store = PagedRecordStore::create(dir.path(), "stock", 256, 24).unwrap();
        assert_eq!(store.records_per_page(), 10);

        let rids: Vec<Rid> = (0..35).map(|i| store.insert(&record(i, 24)).unwrap()).collect();
        assert_eq!(rids[0], Rid::new(0, 0));
        assert_eq!(rids[9], Rid::new(0, 216));
        assert_eq!(rids[10], Rid::new(1, 0));
        assert_eq!(store.flushed_pages(), 3);
        assert_eq!(store.record_count(), 35);

        // flushed pages and the in-memory page, in mixed order
        for &i in &[34u32, 0, 12, 33, 5, 29, 11] {
            assert_eq!(store.read(rids[i as usize]).unwrap(), record(i, 24));
        }
    }

    #[test]
    fn test_file_holds_whole_pages() {
        let dir = tempdir().unwrap();
        let mut store = PagedRecordStore::create(dir.path(), "s", 128, 40).unwrap();
        for i in 0..7 {
            store.insert(&record(i, 40)).unwrap();
        }
        let len = std::fs::metadata(store.path()).unwrap().len();
        assert_eq!(len, 2 * 128);
    }

    #[test]
    fn test_rejects_bad_sizes_and_rids() {
        let dir = tempdir().unwrap();
        assert!(PagedRecordStore::create(dir.path(), "s", 16, 32).is_err());

        let mut store = PagedRecordStore::create(dir.path(), "s", 64, 16).unwrap();
        assert!(matches!(
            store.insert(&[0u8; 8]),
            Err(StorageError::RecordStore(_))
        ));
        store.insert(&record(1, 16)).unwrap();
        assert!(store.read(Rid::new(0, 16)).is_err());
        assert!(store.read(Rid::new(4, 0)).is_err());
    }
}
