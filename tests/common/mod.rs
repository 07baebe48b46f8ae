#![allow(dead_code)]

use std::{
    cell::RefCell,
    fs,
    io::Write,
    path::{Path, PathBuf},
};

use iimodman::{InstallRefreshLevel, ModCache, ModList, RefreshLevel, Reporter};
use tempfile::TempDir;

/// Reporter that records every line and gives a fixed confirmation answer.
pub struct RecordingReporter {
    pub lines: RefCell<Vec<String>>,
    pub answer: bool,
}

impl RecordingReporter {
    pub fn new(answer: bool) -> Self {
        RecordingReporter {
            lines: RefCell::new(Vec::new()),
            answer,
        }
    }

    pub fn contains(&self, needle: &str) -> bool {
        self.lines.borrow().iter().any(|l| l.contains(needle))
    }
}

impl Reporter for RecordingReporter {
    fn text_output(&self, line: &str) {
        self.lines.borrow_mut().push(line.to_string());
    }

    fn confirm(&self, prompt: &str) -> bool {
        self.lines.borrow_mut().push(prompt.to_string());
        self.answer
    }
}

/// A cache root and an install root in one temporary directory.
pub struct Fixture {
    _temp: TempDir,
    pub cache_root: PathBuf,
    pub install_root: PathBuf,
}

impl Fixture {
    pub fn new() -> Self {
        let temp = TempDir::new().unwrap();
        let cache_root = temp.path().join("cache");
        let install_root = temp.path().join("mods");
        fs::create_dir_all(&cache_root).unwrap();
        fs::create_dir_all(&install_root).unwrap();
        Fixture {
            _temp: temp,
            cache_root,
            install_root,
        }
    }

    /// Writes `{cache}/{mod_id}/{version_id}` with distinct content.
    pub fn cache_version(&self, mod_id: &str, version_id: &str, name: &str) {
        write_mod(
            &self.cache_root.join(mod_id).join(version_id),
            name,
            version_id,
        );
    }

    /// Writes a mod straight into the install folder, bypassing the cache.
    pub fn loose_install(&self, folder: &str, name: &str) {
        write_mod(&self.install_root.join(folder), name, "local");
    }

    /// Fresh cache and installed set, fully associated.
    pub fn open(&self) -> (ModCache, ModList) {
        let mut cache = ModCache::new(&self.cache_root);
        cache.refresh(RefreshLevel::Full).unwrap();
        let mut mods = ModList::new(&self.install_root);
        mods.refresh(&mut cache, InstallRefreshLevel::Full).unwrap();
        (cache, mods)
    }
}

pub fn write_mod(dir: &Path, name: &str, version: &str) {
    fs::create_dir_all(dir.join("scripts")).unwrap();
    fs::write(
        dir.join("modinfo.txt"),
        format!("name = {}\nversion = {}\n", name, version),
    )
    .unwrap();
    fs::write(
        dir.join("scripts").join("modinit.lua"),
        format!("-- {} {}\nreturn {{}}\n", name, version),
    )
    .unwrap();
}

pub fn zip_bytes(entries: &[(&str, &str)]) -> Vec<u8> {
    let mut writer = zip::ZipWriter::new(std::io::Cursor::new(Vec::new()));
    let options = zip::write::SimpleFileOptions::default();
    for (name, contents) in entries {
        writer.start_file(name.to_string(), options).unwrap();
        writer.write_all(contents.as_bytes()).unwrap();
    }
    writer.finish().unwrap().into_inner()
}
