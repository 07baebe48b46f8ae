//! Filesystem helpers shared by the cache and the install directory.
//!
//! New content is written into a hidden staging directory next to its
//! destination and renamed into place, so an interrupted copy never leaves a
//! half-written mod folder under its real name.

use std::{
    fs,
    io::Write,
    path::Path,
};

use serde::{de::DeserializeOwned, Serialize};
use tempfile::{NamedTempFile, TempDir};
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::{
    error::{ModError, Result},
    modinfo,
};

pub const STAGING_PREFIX: &str = ".staging-";

pub fn is_staging_name(name: &str) -> bool {
    name.starts_with(STAGING_PREFIX)
}

/// Removes a mod folder, refusing to touch anything that isn't one.
///
/// Missing paths and empty directories are fine. A non-empty directory is
/// only removed if it contains the mod metadata marker.
pub fn remove_mod_dir(path: &Path) -> Result<()> {
    let metadata = match fs::symlink_metadata(path) {
        Ok(m) => m,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(ModError::io_with_path(e, path)),
    };
    if !metadata.is_dir() {
        return Err(ModError::DestinationCollision(path.to_path_buf()));
    }
    let is_empty = fs::read_dir(path)
        .map_err(|e| ModError::io_with_path(e, path))?
        .next()
        .is_none();
    if is_empty {
        debug!("Removing empty directory {}", path.display());
        fs::remove_dir(path).map_err(|e| ModError::io_with_path(e, path))
    } else if modinfo::has_marker(path) {
        debug!("Removing mod directory {}", path.display());
        fs::remove_dir_all(path).map_err(|e| ModError::io_with_path(e, path))
    } else {
        Err(ModError::DestinationCollision(path.to_path_buf()))
    }
}

/// Copies a directory tree. Symlinks are not copied.
pub fn copy_dir_recursive(src: &Path, dst: &Path) -> Result<()> {
    debug!("Copying {} to {}", src.display(), dst.display());
    fs::create_dir_all(dst).map_err(|e| ModError::io_with_path(e, dst))?;
    for entry in WalkDir::new(src).min_depth(1).follow_links(false) {
        let entry = entry?;
        let relative = entry
            .path()
            .strip_prefix(src)
            .map_err(|_| ModError::InvalidArgument(entry.path().display().to_string()))?;
        let target = dst.join(relative);
        let file_type = entry.file_type();
        if file_type.is_dir() {
            fs::create_dir_all(&target).map_err(|e| ModError::io_with_path(e, &target))?;
        } else if file_type.is_file() {
            fs::copy(entry.path(), &target).map_err(|e| ModError::io_with_path(e, entry.path()))?;
        } else {
            warn!("Not copying {}: not a regular file", entry.path().display());
        }
    }
    Ok(())
}

/// Creates a staging directory inside `parent`.
pub fn staging_dir(parent: &Path) -> Result<TempDir> {
    fs::create_dir_all(parent).map_err(|e| ModError::io_with_path(e, parent))?;
    tempfile::Builder::new()
        .prefix(STAGING_PREFIX)
        .tempdir_in(parent)
        .map_err(|e| ModError::io_with_path(e, parent))
}

/// Replaces `dest` with the staged content.
///
/// The old `dest` is removed with [`remove_mod_dir`], so unrecognized data
/// at the destination is never deleted.
pub fn commit_staged(staging: TempDir, dest: &Path) -> Result<()> {
    remove_mod_dir(dest)?;
    fs::rename(staging.path(), dest).map_err(|e| ModError::io_with_path(e, dest))?;
    debug!("Committed {}", dest.display());
    Ok(())
}

/// Reads a JSON file. Returns `None` if it doesn't exist.
pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    let contents = match fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(ModError::io_with_path(e, path)),
    };
    serde_json::from_str(&contents)
        .map(Some)
        .map_err(|e| ModError::Json {
            message: format!("Failed to parse {}: {}", path.display(), e),
            source: Some(e),
        })
}

/// Writes a JSON file through a temp file and rename.
pub fn write_json_atomic<T: Serialize>(path: &Path, data: &T) -> Result<()> {
    let parent = path
        .parent()
        .ok_or_else(|| ModError::InvalidArgument(format!("No parent for {}", path.display())))?;
    fs::create_dir_all(parent).map_err(|e| ModError::io_with_path(e, parent))?;

    let mut temp = NamedTempFile::new_in(parent).map_err(|e| ModError::io_with_path(e, parent))?;
    serde_json::to_writer_pretty(&mut temp, data)?;
    temp.write_all(b"\n")
        .and_then(|_| temp.as_file().sync_all())
        .map_err(|e| ModError::io_with_path(e, temp.path()))?;
    temp.persist(path)
        .map_err(|e| ModError::io_with_path(e.error, path))?;
    debug!("Wrote {}", path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use tempfile::TempDir;

    #[test]
    fn test_remove_mod_dir_guards_user_data() {
        let temp = TempDir::new().unwrap();
        let user = temp.path().join("user");
        fs::create_dir(&user).unwrap();
        fs::write(user.join("notes.txt"), "keep me").unwrap();

        let err = remove_mod_dir(&user).unwrap_err();
        assert!(matches!(err, ModError::DestinationCollision(_)));
        assert!(user.join("notes.txt").exists());
    }

    #[test]
    fn test_remove_mod_dir_removes_mods_and_empty_dirs() {
        let temp = TempDir::new().unwrap();
        let mod_dir = temp.path().join("mod");
        fs::create_dir_all(mod_dir.join("sub")).unwrap();
        fs::write(mod_dir.join(modinfo::MODINFO_FILE), "name = M").unwrap();
        remove_mod_dir(&mod_dir).unwrap();
        assert!(!mod_dir.exists());

        let empty = temp.path().join("empty");
        fs::create_dir(&empty).unwrap();
        remove_mod_dir(&empty).unwrap();
        assert!(!empty.exists());

        remove_mod_dir(&temp.path().join("missing")).unwrap();
    }

    #[test]
    fn test_copy_and_commit_staged() {
        let temp = TempDir::new().unwrap();
        let src = temp.path().join("src");
        fs::create_dir_all(src.join("a/b")).unwrap();
        fs::write(src.join("a/b/file.txt"), "data").unwrap();
        fs::write(src.join(modinfo::MODINFO_FILE), "name = S").unwrap();

        let dest_parent = temp.path().join("out");
        let staging = staging_dir(&dest_parent).unwrap();
        assert!(is_staging_name(
            &staging.path().file_name().unwrap().to_string_lossy()
        ));
        copy_dir_recursive(&src, staging.path()).unwrap();
        let dest = dest_parent.join("mod");
        commit_staged(staging, &dest).unwrap();

        assert_eq!(fs::read_to_string(dest.join("a/b/file.txt")).unwrap(), "data");
        assert_eq!(fs::read_dir(&dest_parent).unwrap().count(), 1);
    }

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Sample {
        name: String,
        count: u32,
    }

    #[test]
    fn test_json_round_trip() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("nested").join("data.json");
        assert_eq!(read_json::<Sample>(&path).unwrap(), None);

        let sample = Sample {
            name: "x".into(),
            count: 3,
        };
        write_json_atomic(&path, &sample).unwrap();
        assert_eq!(read_json::<Sample>(&path).unwrap(), Some(sample));

        fs::write(&path, "{not json").unwrap();
        assert!(matches!(
            read_json::<Sample>(&path),
            Err(ModError::Json { .. })
        ));
    }
}
