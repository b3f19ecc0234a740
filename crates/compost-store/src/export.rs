//! Point-in-time views of the log for export.

use std::fs::File;
use std::io::{Read, Take};

use bytes::Bytes;

use compost_types::Reading;

use crate::error::Result;
use crate::models::CsvRow;

/// A frozen prefix of the log.
///
/// Taken while the log is locked, then read without the lock. Appends only
/// ever extend the file and `clear()` replaces it by rename, so the first
/// `len` bytes seen through this handle never change.
#[derive(Debug)]
pub struct LogSnapshot {
    file: File,
    len: u64,
}

impl LogSnapshot {
    pub(crate) fn new(file: File, len: u64) -> Self {
        Self { file, len }
    }

    /// Number of bytes in the snapshot, header included.
    pub fn len(&self) -> u64 {
        self.len
    }

    /// Whether the snapshot is empty (never true for an initialised log).
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// A reader limited to the snapshot length.
    pub fn into_reader(self) -> Take<File> {
        self.file.take(self.len)
    }

    /// The file handle and the number of bytes that belong to the snapshot.
    pub fn into_parts(self) -> (File, u64) {
        (self.file, self.len)
    }

    /// Read the whole snapshot into memory.
    pub fn read_to_bytes(self) -> Result<Bytes> {
        let mut buf = Vec::with_capacity(self.len as usize);
        self.into_reader().read_to_end(&mut buf)?;
        Ok(Bytes::from(buf))
    }

    /// Parse the data rows with an id greater than `after_id`.
    pub fn readings_after(self, after_id: u64, limit: usize) -> Result<Vec<Reading>> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .from_reader(self.into_reader());

        let mut readings = Vec::new();
        for row in reader.deserialize::<CsvRow>() {
            if readings.len() >= limit {
                break;
            }
            let row = row?;
            if row.id > after_id {
                readings.push(Reading::from(row));
            }
        }
        Ok(readings)
    }

    /// Count data rows (lines after the header).
    pub fn row_count(self) -> Result<u64> {
        let mut reader = self.into_reader();
        let mut buf = [0u8; 8192];
        let mut newlines = 0u64;
        loop {
            let n = reader.read(&mut buf)?;
            if n == 0 {
                break;
            }
            newlines += buf[..n].iter().filter(|b| **b == b'\n').count() as u64;
        }
        Ok(newlines.saturating_sub(1))
    }
}
