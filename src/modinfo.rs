//! Mod metadata read from `modinfo.txt`, mod ID helpers, and version IDs.

use std::{cmp::Ordering, fmt, path::Path};

use chrono::{DateTime, NaiveDateTime, Utc};
use tracing::debug;

use crate::error::{ModError, Result};

/// Marker file that makes a directory recognizable as mod content.
pub const MODINFO_FILE: &str = "modinfo.txt";
pub const WORKSHOP_PREFIX: &str = "workshop-";

const VERSION_TIME_FORMAT: &str = "%Y-%m-%dT%H_%M_%SZ";

/// How much to trust the ID passed to [`ModInfo::parse`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdStatus {
    /// The ID came from a trusted source (cache layout, install sidecar).
    Locked,
    /// The ID is a folder name guess and may be replaced by the `workshop` key.
    Tentative,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModInfo {
    pub id: String,
    pub name: String,
    pub version: Option<String>,
}

impl ModInfo {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        ModInfo {
            id: id.into(),
            name: name.into(),
            version: None,
        }
    }

    pub fn read(dir: &Path, id: &str, status: IdStatus) -> Result<ModInfo> {
        let path = dir.join(MODINFO_FILE);
        debug!("Reading {}", path.display());
        // Older mods ship Latin-1 metadata.
        let bytes = std::fs::read(&path).map_err(|e| ModError::io_with_path(e, &path))?;
        Ok(ModInfo::parse(&String::from_utf8_lossy(&bytes), id, status))
    }

    pub fn parse(contents: &str, id: &str, status: IdStatus) -> ModInfo {
        let mut name = String::new();
        let mut version = String::new();
        let mut workshop = String::new();

        for line in contents.lines() {
            let Some((key, value)) = line.split_once('=') else {
                continue;
            };
            let key = key.trim();
            if key.is_empty() || !key.chars().all(|c| c.is_alphanumeric() || c == '_') {
                continue;
            }
            let value = value.trim();
            match key {
                "name" => name = value.to_string(),
                "version" => version = value.to_string(),
                "workshop" => {
                    workshop = if !value.is_empty() && value.chars().all(|c| c.is_ascii_digit()) {
                        value.to_string()
                    } else {
                        String::new()
                    }
                }
                _ => {}
            }
        }

        let id = if status == IdStatus::Locked || is_workshop_id(id) || workshop.is_empty() {
            id.to_string()
        } else {
            format!("{}{}", WORKSHOP_PREFIX, workshop)
        };
        if !version.is_empty() && !version.starts_with('v') {
            version.insert(0, 'v');
        }
        ModInfo {
            id,
            name,
            version: (!version.is_empty()).then_some(version),
        }
    }

    pub fn is_workshop(&self) -> bool {
        is_workshop_id(&self.id)
    }

    /// The numeric remote ID, for workshop mods.
    pub fn workshop_id(&self) -> Option<&str> {
        workshop_id(&self.id)
    }
}

impl fmt::Display for ModInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{}]", self.name, self.id)
    }
}

pub fn is_workshop_id(id: &str) -> bool {
    workshop_id(id).is_some()
}

pub fn workshop_id(id: &str) -> Option<&str> {
    id.strip_prefix(WORKSHOP_PREFIX)
        .filter(|digits| !digits.is_empty() && digits.chars().all(|c| c.is_ascii_digit()))
}

/// Returns true if `dir` contains the mod metadata marker.
pub fn has_marker(dir: &Path) -> bool {
    dir.join(MODINFO_FILE).is_file()
}

/// Filesystem-safe version ID for a remote timestamp.
pub fn format_version_id(time: &DateTime<Utc>) -> String {
    time.format(VERSION_TIME_FORMAT).to_string()
}

/// Timestamp encoded in a version ID, if it is a timestamp version.
pub fn parse_version_id(version_id: &str) -> Option<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(version_id, VERSION_TIME_FORMAT)
        .ok()
        .map(|t| t.and_utc())
}

/// Orders human version strings such as `v1.2.10` numerically.
///
/// Strings that don't start with a version number sort before ones that do,
/// and compare lexically among themselves.
pub fn compare_version_strings(left: &str, right: &str) -> Ordering {
    match (split_version(left), split_version(right)) {
        (None, None) => left.cmp(right),
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (Some((l_nums, l_rest)), Some((r_nums, r_rest))) => l_nums
            .iter()
            .zip(r_nums.iter())
            .map(|(l, r)| l.cmp(r))
            .find(|o| o.is_ne())
            .unwrap_or_else(|| l_nums.len().cmp(&r_nums.len()))
            .then_with(|| l_rest.cmp(r_rest)),
    }
}

fn split_version(version: &str) -> Option<(Vec<u64>, &str)> {
    let body = version.strip_prefix('v').unwrap_or(version);
    let mut numbers = Vec::new();
    let mut rest = body;
    loop {
        let digits = rest.chars().take_while(|c| c.is_ascii_digit()).count();
        if digits == 0 {
            break;
        }
        numbers.push(rest[..digits].parse().ok()?);
        rest = &rest[digits..];
        match rest.strip_prefix('.') {
            Some(after) if after.starts_with(|c: char| c.is_ascii_digit()) => rest = after,
            _ => break,
        }
    }
    if numbers.is_empty() {
        None
    } else {
        Some((numbers, rest.split_whitespace().next().unwrap_or("")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_parse_modinfo() {
        let info = ModInfo::parse(
            "name = Better Guards\n  version=1.2 \nauthor: nobody\nworkshop = 1234\n",
            "better-guards",
            IdStatus::Tentative,
        );
        assert_eq!(info.id, "workshop-1234");
        assert_eq!(info.name, "Better Guards");
        assert_eq!(info.version.as_deref(), Some("v1.2"));
        assert_eq!(info.to_string(), "Better Guards [workshop-1234]");
    }

    #[test]
    fn test_read_latin1_modinfo() {
        let temp = tempfile::TempDir::new().unwrap();
        std::fs::write(
            temp.path().join(MODINFO_FILE),
            b"name = Caf\xe9 Mod\nversion = 2\nworkshop = 55\n",
        )
        .unwrap();
        let info = ModInfo::read(temp.path(), "cafe", IdStatus::Tentative).unwrap();
        assert_eq!(info.id, "workshop-55");
        assert_eq!(info.name, "Caf\u{fffd} Mod");
        assert_eq!(info.version.as_deref(), Some("v2"));
    }

    #[test]
    fn test_locked_id_ignores_workshop_key() {
        let info = ModInfo::parse("name=X\nworkshop=99\n", "local", IdStatus::Locked);
        assert_eq!(info.id, "local");
        assert_eq!(info.version, None);

        let info = ModInfo::parse("workshop=abc\n", "local", IdStatus::Tentative);
        assert_eq!(info.id, "local");
    }

    #[test]
    fn test_workshop_ids() {
        assert!(is_workshop_id("workshop-123"));
        assert!(!is_workshop_id("workshop-"));
        assert!(!is_workshop_id("workshop-12a"));
        assert!(!is_workshop_id("modA"));
        assert_eq!(workshop_id("workshop-42"), Some("42"));
    }

    #[test]
    fn test_version_id_round_trip() {
        let time = Utc.with_ymd_and_hms(2021, 5, 3, 12, 34, 56).unwrap();
        let id = format_version_id(&time);
        assert_eq!(id, "2021-05-03T12_34_56Z");
        assert!(!id.contains(':'));
        assert_eq!(parse_version_id(&id), Some(time));
        assert_eq!(parse_version_id("dev"), None);
        assert_eq!(parse_version_id("000-original"), None);
    }

    #[test]
    fn test_version_ids_sort_chronologically() {
        let older = format_version_id(&Utc.with_ymd_and_hms(2020, 12, 31, 23, 0, 0).unwrap());
        let newer = format_version_id(&Utc.with_ymd_and_hms(2021, 1, 1, 1, 0, 0).unwrap());
        assert!(older < newer);
    }

    #[test]
    fn test_compare_version_strings() {
        assert_eq!(compare_version_strings("v1.2.9", "v1.2.10"), Ordering::Less);
        assert_eq!(compare_version_strings("v2", "1.9"), Ordering::Greater);
        assert_eq!(compare_version_strings("v1.2", "v1.2.0"), Ordering::Less);
        assert_eq!(compare_version_strings("beta", "v0.1"), Ordering::Less);
        assert_eq!(compare_version_strings("alpha", "beta"), Ordering::Less);
        assert_eq!(compare_version_strings("v1.0a", "v1.0b"), Ordering::Less);
        assert_eq!(compare_version_strings("v3.1", "v3.1"), Ordering::Equal);
    }
}
