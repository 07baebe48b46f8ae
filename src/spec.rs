//! Text format describing a desired set of installed mods.
//!
//! One mod per line: `{modId}:{alias}:{version}:{reserved}:{freeText}`. An
//! empty version means "latest", `-` means "keep what is installed".

use std::{collections::HashMap, fmt, path::Path};

use tracing::{debug, warn};

use crate::error::{ModError, Result};

pub const KEEP_CURRENT: &str = "-";

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum VersionTarget {
    #[default]
    Latest,
    KeepCurrent,
    Exact(String),
}

impl VersionTarget {
    pub fn parse(version: &str) -> Self {
        match version {
            "" => VersionTarget::Latest,
            KEEP_CURRENT => VersionTarget::KeepCurrent,
            other => VersionTarget::Exact(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            VersionTarget::Latest => "",
            VersionTarget::KeepCurrent => KEEP_CURRENT,
            VersionTarget::Exact(v) => v,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SpecMod {
    pub id: String,
    pub version: VersionTarget,
    pub alias: Option<String>,
    /// Informational only; not read back when parsing.
    pub name: String,
    pub version_name: Option<String>,
}

impl SpecMod {
    pub fn new(id: impl Into<String>, version: VersionTarget) -> Self {
        SpecMod {
            id: id.into(),
            version,
            ..Default::default()
        }
    }

    pub fn with_alias(mut self, alias: Option<String>) -> Self {
        self.alias = alias.filter(|a| !a.is_empty());
        self
    }

    pub fn with_name(mut self, name: impl Into<String>, version_name: Option<String>) -> Self {
        self.name = name.into();
        self.version_name = version_name;
        self
    }

    /// Parses one specification line. Returns `None` for malformed lines.
    pub fn from_spec_string(line: &str) -> Option<SpecMod> {
        let fields: Vec<&str> = line.trim().splitn(5, ':').collect();
        if fields.len() < 5 {
            warn!("Skipping malformed spec line: {}", line);
            return None;
        }
        let id = fields[0].trim();
        if id.is_empty() {
            warn!("Skipping spec line without mod ID: {}", line);
            return None;
        }
        Some(
            SpecMod::new(id, VersionTarget::parse(fields[2].trim()))
                .with_alias(Some(fields[1].trim().to_string()))
                .with_name(fields[4].trim(), None),
        )
    }

    pub fn as_spec_string(&self, versioned: bool) -> String {
        let description = match (&self.version_name, versioned) {
            (Some(version_name), true) => format!("{} [{}]", self.name, version_name),
            _ => self.name.clone(),
        };
        format!(
            "{}:{}:{}::{}",
            self.id,
            self.alias.as_deref().unwrap_or(""),
            self.version.as_str(),
            description
        )
    }

    /// Folder name the mod is installed under.
    pub fn installed_id(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.id)
    }

    pub fn without_version(&self) -> SpecMod {
        SpecMod {
            version: VersionTarget::Latest,
            version_name: None,
            ..self.clone()
        }
    }
}

impl fmt::Display for SpecMod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.name.is_empty() {
            write!(f, "[{}]", self.id)?;
        } else {
            write!(f, "{} [{}]", self.name, self.id)?;
        }
        match (&self.version, &self.version_name) {
            (_, Some(version_name)) => write!(f, " {}", version_name),
            (VersionTarget::Exact(v), None) => write!(f, " {}", v),
            _ => Ok(()),
        }
    }
}

/// An ordered list of [`SpecMod`]s, unique by mod ID.
#[derive(Debug, Clone, Default)]
pub struct ModSpec {
    mods: Vec<SpecMod>,
    index: HashMap<String, usize>,
}

impl ModSpec {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn mods(&self) -> &[SpecMod] {
        &self.mods
    }

    pub fn len(&self) -> usize {
        self.mods.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mods.is_empty()
    }

    pub fn get(&self, mod_id: &str) -> Option<&SpecMod> {
        self.index.get(mod_id).map(|&i| &self.mods[i])
    }

    pub fn contains(&self, mod_id: &str) -> bool {
        self.index.contains_key(mod_id)
    }

    /// Adds a mod, replacing any earlier entry with the same ID in place.
    pub fn push(&mut self, spec: SpecMod) {
        match self.index.get(&spec.id) {
            Some(&i) => {
                debug!("Replacing earlier spec entry for {}", spec.id);
                self.mods[i] = spec;
            }
            None => {
                self.index.insert(spec.id.clone(), self.mods.len());
                self.mods.push(spec);
            }
        }
    }

    /// Parses spec text, skipping blank, comment and malformed lines.
    pub fn append_str(&mut self, contents: &str) -> usize {
        let mut appended = 0;
        for line in contents.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            if let Some(spec) = SpecMod::from_spec_string(line) {
                self.push(spec);
                appended += 1;
            }
        }
        appended
    }

    pub fn append_file(&mut self, path: &Path) -> Result<usize> {
        debug!("Reading spec file {}", path.display());
        let contents =
            std::fs::read_to_string(path).map_err(|e| ModError::io_with_path(e, path))?;
        Ok(self.append_str(&contents))
    }

    pub fn to_spec_string(&self, versioned: bool) -> String {
        self.mods
            .iter()
            .map(|m| m.as_spec_string(versioned) + "\n")
            .collect()
    }
}

impl FromIterator<SpecMod> for ModSpec {
    fn from_iter<I: IntoIterator<Item = SpecMod>>(iter: I) -> Self {
        let mut spec = ModSpec::new();
        for m in iter {
            spec.push(m);
        }
        spec
    }
}

impl std::str::FromStr for ModSpec {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let mut spec = ModSpec::new();
        spec.append_str(s);
        Ok(spec)
    }
}
