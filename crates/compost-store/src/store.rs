//! Append-only durable log implementation.

use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use bytes::Bytes;
use tracing::{debug, info, warn};

use compost_types::{LogEntry, Reading, Sample};

use crate::error::{Error, Result};
use crate::export::LogSnapshot;
use crate::models::{encode_row, parse_row_id};
use crate::schema::{self, LOG_FILE_NAME};

/// How far back from the end of the file recovery looks for the last record.
const TAIL_WINDOW: u64 = 4096;

/// Tunables for a [`DurableLog`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogOptions {
    /// Upper bound on the log size in bytes, modelling a fixed flash
    /// partition. `None` means limited only by the medium.
    pub capacity_bytes: Option<u64>,
    /// Flush every append to the medium before returning.
    pub sync_writes: bool,
}

impl Default for LogOptions {
    fn default() -> Self {
        Self {
            capacity_bytes: None,
            sync_writes: true,
        }
    }
}

/// Append-only CSV log with monotonic sequence ids.
///
/// The log exclusively owns its file and the sequence counter. Every
/// [`append`](Self::append) reaches the medium before it returns; a failed
/// append leaves both the file and the counter untouched.
#[derive(Debug)]
pub struct DurableLog {
    dir: PathBuf,
    path: PathBuf,
    file: File,
    len: u64,
    last_id: u64,
    delivered_through: u64,
    options: LogOptions,
}

impl DurableLog {
    /// Open (or initialise) the log in `dir` and recover the last sequence id.
    pub fn open<P: AsRef<Path>>(dir: P, options: LogOptions) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        if !dir.exists() {
            fs::create_dir_all(&dir).map_err(|e| Error::CreateDirectory {
                path: dir.clone(),
                source: e,
            })?;
        }

        let path = dir.join(LOG_FILE_NAME);
        info!("Opening log at {}", path.display());

        if schema::remove_stale_staging(&path)? {
            warn!("Discarded staging file from an interrupted clear");
        }

        let (file, len, last_id) = recover(&dir, &path)?;
        info!("Log holds {} bytes, resuming after id {}", len, last_id);

        let delivered_through = match schema::read_cursor(&dir) {
            Some(id) if id > last_id => {
                warn!(
                    "Delivery watermark {} is past the last record {}, clamping",
                    id, last_id
                );
                if let Err(e) = schema::write_cursor(&dir, last_id) {
                    warn!("Failed to rewrite delivery watermark: {}", e);
                }
                last_id
            }
            Some(id) => id,
            None => 0,
        };

        Ok(Self {
            dir,
            path,
            file,
            len,
            last_id,
            delivered_through,
            options,
        })
    }

    /// Open the log in the default location.
    pub fn open_default() -> Result<Self> {
        Self::open(crate::default_log_dir(), LogOptions::default())
    }

    /// Re-read the trailing record and resume numbering from it.
    ///
    /// Called once by [`open`](Self::open); exposed for callers that need to
    /// resynchronise after external changes to the medium.
    pub fn recover_last_id(&mut self) -> Result<u64> {
        let (file, len, last_id) = recover(&self.dir, &self.path)?;
        self.file = file;
        self.len = len;
        self.last_id = last_id;
        self.delivered_through = self.delivered_through.min(last_id);
        Ok(last_id)
    }

    /// Append a sample, assigning it the next sequence id.
    ///
    /// # Errors
    ///
    /// [`Error::StorageFull`] or [`Error::StorageUnavailable`] if the medium
    /// rejects the write. The counter is not advanced and any partial write
    /// is cut off, so the same sample can be retried later.
    pub fn append(&mut self, sample: Sample) -> Result<LogEntry> {
        let id = self.last_id + 1;
        let reading = Reading::from_sample(id, sample);
        let row = encode_row(&reading)?;
        let needed = row.len() as u64;

        if let Some(capacity) = self.options.capacity_bytes {
            let available = capacity.saturating_sub(self.len);
            if needed > available {
                return Err(Error::StorageFull { needed, available });
            }
        }

        if let Err(e) = self.file.write_all(&row) {
            self.rollback();
            return Err(Error::from_write(&self.path, e, needed));
        }
        if self.options.sync_writes
            && let Err(e) = self.file.sync_data()
        {
            self.rollback();
            return Err(Error::from_write(&self.path, e, needed));
        }

        self.len += needed;
        self.last_id = id;
        debug!("Appended record {} ({} bytes)", id, needed);
        Ok(LogEntry::pending(reading))
    }

    /// Cut the file back to the last committed length after a failed write.
    fn rollback(&mut self) {
        if let Err(e) = self.file.set_len(self.len) {
            warn!(
                "Failed to roll back partial write in {}: {}",
                self.path.display(),
                e
            );
        }
    }

    /// Capture the current contents for export.
    ///
    /// Only the length and a fresh read handle are taken here; the bytes are
    /// read later, so the caller's lock can be released immediately.
    pub fn snapshot(&self) -> Result<LogSnapshot> {
        let file = File::open(&self.path).map_err(|source| Error::StorageUnavailable {
            path: self.path.clone(),
            source,
        })?;
        Ok(LogSnapshot::new(file, self.len))
    }

    /// The full log, header included, exactly as stored.
    pub fn export_all(&self) -> Result<Bytes> {
        self.snapshot()?.read_to_bytes()
    }

    /// Replace the log with a header-only file and reset the counter.
    ///
    /// The new file is staged and flushed first, then renamed over the live
    /// log. An interruption leaves either the old log or the new empty one.
    pub fn clear(&mut self) -> Result<()> {
        let staging = self.stage_clear()?;
        self.commit_clear(&staging)
    }

    pub(crate) fn stage_clear(&self) -> Result<PathBuf> {
        let staging = schema::staging_path(&self.path);
        schema::write_header_only(&staging)?;
        Ok(staging)
    }

    pub(crate) fn commit_clear(&mut self, staging: &Path) -> Result<()> {
        if let Err(source) = fs::rename(staging, &self.path) {
            let _ = fs::remove_file(staging);
            return Err(Error::StorageUnavailable {
                path: self.path.clone(),
                source,
            });
        }
        schema::sync_dir(&self.dir)?;

        self.file = open_append(&self.path)?;
        self.len = schema::header_len();
        let cleared = self.last_id;
        self.last_id = 0;
        if let Err(e) = self.set_delivered_through(0) {
            warn!("Failed to reset delivery watermark: {}", e);
        }
        info!("Cleared log {} (last id was {})", self.path.display(), cleared);
        Ok(())
    }

    /// Readings with an id greater than `after_id`, oldest first.
    pub fn readings_after(&self, after_id: u64, limit: usize) -> Result<Vec<Reading>> {
        if after_id >= self.last_id {
            return Ok(Vec::new());
        }
        self.snapshot()?.readings_after(after_id, limit)
    }

    /// Highest id up to which every record has been settled with the remote
    /// endpoint, either delivered or permanently rejected.
    pub fn delivered_through(&self) -> u64 {
        self.delivered_through
    }

    /// Persist the delivery watermark. Values past the last record are
    /// clamped to it.
    pub fn set_delivered_through(&mut self, id: u64) -> Result<()> {
        let id = id.min(self.last_id);
        if id == self.delivered_through {
            return Ok(());
        }
        schema::write_cursor(&self.dir, id)?;
        self.delivered_through = id;
        Ok(())
    }

    /// Records not yet settled with the remote endpoint, oldest first.
    pub fn undelivered(&self, limit: usize) -> Result<Vec<Reading>> {
        self.readings_after(self.delivered_through, limit)
    }

    /// Number of data rows in the log.
    pub fn row_count(&self) -> Result<u64> {
        self.snapshot()?.row_count()
    }

    /// The highest sequence id written so far (0 for an empty log).
    pub fn last_id(&self) -> u64 {
        self.last_id
    }

    /// Current size of the log in bytes.
    pub fn len_bytes(&self) -> u64 {
        self.len
    }

    /// Path of the live log file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Configured capacity, if any.
    pub fn capacity(&self) -> Option<u64> {
        self.options.capacity_bytes
    }

    /// Change the capacity limit.
    pub fn set_capacity(&mut self, capacity_bytes: Option<u64>) {
        self.options.capacity_bytes = capacity_bytes;
    }
}

/// Open the log for appending, creating a header-only file if needed, and
/// find the last sequence id.
fn recover(dir: &Path, path: &Path) -> Result<(File, u64, u64)> {
    let len = match fs::metadata(path) {
        Ok(meta) => meta.len(),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => 0,
        Err(source) => {
            return Err(Error::StorageUnavailable {
                path: path.to_path_buf(),
                source,
            });
        }
    };

    if len == 0 {
        info!("Initialising empty log at {}", path.display());
        let staging = schema::staging_path(path);
        schema::write_header_only(&staging)?;
        fs::rename(&staging, path).map_err(|source| Error::StorageUnavailable {
            path: path.to_path_buf(),
            source,
        })?;
        schema::sync_dir(dir)?;
        return Ok((open_append(path)?, schema::header_len(), 0));
    }

    let mut file = open_append(path)?;
    file.seek(SeekFrom::Start(0))?;
    schema::verify_header(&mut file, path)?;

    let (valid_len, last_id) = read_trailing_record(&mut file, path, len)?;
    if valid_len < len {
        warn!(
            "Truncating {} bytes of incomplete record at the end of {}",
            len - valid_len,
            path.display()
        );
        file.set_len(valid_len)
            .and_then(|()| file.sync_all())
            .map_err(|source| Error::StorageUnavailable {
                path: path.to_path_buf(),
                source,
            })?;
    }

    Ok((file, valid_len, last_id))
}

fn open_append(path: &Path) -> Result<File> {
    OpenOptions::new()
        .read(true)
        .append(true)
        .open(path)
        .map_err(|source| Error::StorageUnavailable {
            path: path.to_path_buf(),
            source,
        })
}

/// Locate the last complete line and parse its id.
///
/// Returns the length of the file up to and including that line, and the id
/// (0 when the last line is the header).
fn read_trailing_record(file: &mut File, path: &Path, len: u64) -> Result<(u64, u64)> {
    let boundary = last_newline_before(file, len)?.ok_or_else(|| Error::Corrupt {
        path: path.to_path_buf(),
        reason: "no record boundary in the file".to_string(),
    })?;
    let valid_len = boundary + 1;

    let line_start = match last_newline_before(file, boundary)? {
        Some(pos) => pos + 1,
        None => return Ok((valid_len, 0)),
    };

    file.seek(SeekFrom::Start(line_start))?;
    let mut line = Vec::with_capacity((boundary - line_start) as usize);
    Read::by_ref(file)
        .take(boundary - line_start)
        .read_to_end(&mut line)?;

    match parse_row_id(&line) {
        Some(id) => Ok((valid_len, id)),
        None => {
            warn!(
                "Last record in {} has no readable id, scanning the whole log",
                path.display()
            );
            let id = scan_max_id(file, valid_len)?;
            Ok((valid_len, id))
        }
    }
}

/// Offset of the last `\n` strictly before `end`, reading backwards one
/// window at a time.
fn last_newline_before(file: &mut File, end: u64) -> Result<Option<u64>> {
    let mut window_end = end;
    let mut buf = Vec::with_capacity(TAIL_WINDOW as usize);
    while window_end > 0 {
        let start = window_end.saturating_sub(TAIL_WINDOW);
        file.seek(SeekFrom::Start(start))?;
        buf.clear();
        Read::by_ref(file)
            .take(window_end - start)
            .read_to_end(&mut buf)?;
        if let Some(pos) = buf.iter().rposition(|b| *b == b'\n') {
            return Ok(Some(start + pos as u64));
        }
        window_end = start;
    }
    Ok(None)
}

/// Fallback: the largest readable id in the first `len` bytes.
fn scan_max_id(file: &mut File, len: u64) -> Result<u64> {
    file.seek(SeekFrom::Start(0))?;
    let reader = BufReader::new(Read::by_ref(file).take(len));
    let mut max_id = 0;
    for line in reader.split(b'\n').skip(1) {
        if let Some(id) = parse_row_id(&line?) {
            max_id = max_id.max(id);
        }
    }
    Ok(max_id)
}
