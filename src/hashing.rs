//! Content hashing of whole mod directories.
//!
//! Entries are visited depth-first with each directory's children sorted by
//! file name, so the digest doesn't depend on the order the OS lists them.
//! Hidden entries are included. Symlinks are skipped and never followed.
//! A `modman.json` install sidecar at the root is not mod content and is
//! skipped as well.

use std::{
    fs::File,
    io::{BufReader, Read},
    path::Path,
};

use tracing::debug;
use walkdir::WalkDir;
use xxhash_rust::xxh3::Xxh3;

use crate::{
    error::{ModError, Result},
    installed::SIDECAR_FILE,
};

const READ_BUFFER_SIZE: usize = 64 * 1024;

/// Hashes every file's relative path and content below `dir`.
///
/// Any unreadable entry fails the whole hash.
pub fn hash_mod_dir(dir: &Path) -> Result<String> {
    debug!("Hashing {}", dir.display());
    let mut hasher = Xxh3::new();
    let mut buffer = vec![0u8; READ_BUFFER_SIZE];

    let walker = WalkDir::new(dir)
        .min_depth(1)
        .follow_links(false)
        .sort_by_file_name();
    for entry in walker {
        let entry = entry?;
        let file_type = entry.file_type();
        if file_type.is_symlink() {
            debug!("Skipping symlink {}", entry.path().display());
            continue;
        }
        let relative = entry
            .path()
            .strip_prefix(dir)
            .map_err(|_| ModError::InvalidArgument(entry.path().display().to_string()))?;
        if entry.depth() == 1 && relative == Path::new(SIDECAR_FILE) {
            continue;
        }
        // Separators are normalized so the digest matches across platforms.
        let relative = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");

        if file_type.is_dir() {
            hasher.update(b"d\0");
            hasher.update(relative.as_bytes());
            hasher.update(b"\0");
        } else if file_type.is_file() {
            hasher.update(b"f\0");
            hasher.update(relative.as_bytes());
            hasher.update(b"\0");
            let file = File::open(entry.path()).map_err(|e| ModError::io_with_path(e, entry.path()))?;
            let mut reader = BufReader::new(file);
            let mut length: u64 = 0;
            loop {
                let read = reader
                    .read(&mut buffer)
                    .map_err(|e| ModError::io_with_path(e, entry.path()))?;
                if read == 0 {
                    break;
                }
                hasher.update(&buffer[..read]);
                length += read as u64;
            }
            hasher.update(&length.to_le_bytes());
        }
    }

    Ok(format!("{:032x}", hasher.digest128()))
}
