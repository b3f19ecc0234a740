//! Log file layout.
//!
//! The log is a single CSV file whose first line is the header below. A file
//! that exists but is empty has not been initialised yet; one whose first line
//! differs from the header is rejected rather than appended to.

use std::fs::{self, File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// Name of the live log inside the log directory.
pub const LOG_FILE_NAME: &str = "log.csv";

/// Name of the file holding the delivery watermark, next to the log.
pub const CURSOR_FILE_NAME: &str = "sync.cursor";

/// Suffix of the file staged by `clear()` before it replaces the live log.
pub const STAGING_SUFFIX: &str = ".staging";

/// Mandatory header row (without the line terminator).
pub const CSV_HEADER: &str = "id,timestamp,temperatura_C,humedad_porc,gas_ppm";

/// Byte length of the header row including its newline.
pub fn header_len() -> u64 {
    CSV_HEADER.len() as u64 + 1
}

/// Path of the staging file for a log path.
pub fn staging_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(STAGING_SUFFIX);
    path.with_file_name(name)
}

/// Check that `file` starts with the header row.
pub fn verify_header(file: &mut File, path: &Path) -> Result<()> {
    let mut buf = vec![0u8; CSV_HEADER.len() + 1];
    let mut read = 0;
    while read < buf.len() {
        let n = file.read(&mut buf[read..])?;
        if n == 0 {
            break;
        }
        read += n;
    }
    buf.truncate(read);

    if buf.strip_suffix(b"\n") != Some(CSV_HEADER.as_bytes()) {
        let found = String::from_utf8_lossy(&buf)
            .lines()
            .next()
            .unwrap_or_default()
            .to_string();
        return Err(Error::InvalidHeader {
            path: path.to_path_buf(),
            found,
        });
    }
    Ok(())
}

/// Write a header-only file at `path` and flush it to the medium.
pub fn write_header_only(path: &Path) -> Result<()> {
    let unavailable = |source| Error::StorageUnavailable {
        path: path.to_path_buf(),
        source,
    };

    let mut file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(path)
        .map_err(unavailable)?;
    file.write_all(CSV_HEADER.as_bytes())
        .and_then(|()| file.write_all(b"\n"))
        .map_err(|e| Error::from_write(path, e, header_len()))?;
    file.sync_all().map_err(unavailable)?;
    Ok(())
}

/// Flush directory metadata so that a rename survives power loss.
pub fn sync_dir(dir: &Path) -> Result<()> {
    #[cfg(unix)]
    {
        File::open(dir)
            .and_then(|d| d.sync_all())
            .map_err(|source| Error::StorageUnavailable {
                path: dir.to_path_buf(),
                source,
            })?;
    }
    #[cfg(not(unix))]
    let _ = dir;
    Ok(())
}

/// Remove a staging file left behind by an interrupted clear.
///
/// Returns whether a stale file was found.
pub fn remove_stale_staging(path: &Path) -> Result<bool> {
    let staging = staging_path(path);
    match fs::remove_file(&staging) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(source) => Err(Error::StorageUnavailable {
            path: staging,
            source,
        }),
    }
}

/// Read the delivery watermark stored in `dir`.
///
/// A missing or unreadable file yields `None`; the caller starts over from
/// the beginning of the log, which only costs duplicate deliveries.
pub fn read_cursor(dir: &Path) -> Option<u64> {
    let content = fs::read_to_string(dir.join(CURSOR_FILE_NAME)).ok()?;
    content.trim().parse().ok()
}

/// Replace the delivery watermark in `dir`.
pub fn write_cursor(dir: &Path, id: u64) -> Result<()> {
    let path = dir.join(CURSOR_FILE_NAME);
    let staging = staging_path(&path);
    fs::write(&staging, format!("{}\n", id))
        .and_then(|()| fs::rename(&staging, &path))
        .map_err(|source| Error::StorageUnavailable { path, source })
}
