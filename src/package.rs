//! Layout of an unpacked `.unitypackage`
//!
//! Every top-level directory is named after an asset GUID and may hold:
//!
//! - `pathname`: the asset's project-relative path on its first line
//! - `asset`: the file content
//! - `asset.meta`: the importer settings, restored as `<path>.meta`

use std::collections::BTreeMap;
use std::fs;
use std::io::Read;
use std::path::{Component, Path, PathBuf};

use tracing::debug;

use crate::error::{Error, Result};
use crate::tar::Archive;

pub const PATHNAME: &str = "pathname";
pub const ASSET: &str = "asset";
pub const ASSET_META: &str = "asset.meta";
pub const META_SUFFIX: &str = ".meta";

/// One GUID directory found in the working area.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetEntry {
    pub id: String,
    /// Normalized first line of `pathname`, if the record exists and is not blank.
    pub real_path: Option<PathBuf>,
    pub has_pathname: bool,
    pub asset: Option<PathBuf>,
    pub meta: Option<PathBuf>,
}

impl AssetEntry {
    /// Reads the entry rooted at `dir`.
    pub fn read(dir: &Path) -> Result<Self> {
        let id = dir
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();

        let mut entry = AssetEntry {
            id,
            real_path: None,
            has_pathname: false,
            asset: None,
            meta: None,
        };

        for child in fs::read_dir(dir)? {
            let child = child?;
            let path = child.path();
            match child.file_name().to_str() {
                Some(PATHNAME) => {
                    let contents = fs::read(&path)?;
                    entry.has_pathname = true;
                    entry.real_path = parse_pathname(&String::from_utf8_lossy(&contents));
                }
                Some(ASSET) => entry.asset = Some(path),
                Some(ASSET_META) => entry.meta = Some(path),
                _ => debug!("ignoring {}", path.display()),
            }
        }
        Ok(entry)
    }

    /// Entries with neither payload nor sidecar only declare a folder.
    pub fn is_placeholder(&self) -> bool {
        self.asset.is_none() && self.meta.is_none()
    }
}

/// Lists the asset entries directly under `root`, sorted by id.
pub fn scan_working_area(root: &Path) -> Result<Vec<AssetEntry>> {
    let mut dirs = Vec::new();
    for child in fs::read_dir(root).map_err(|source| Error::WorkingArea {
        path: root.to_path_buf(),
        source,
    })? {
        let child = child?;
        if child.file_type()?.is_dir() {
            dirs.push(child.path());
        }
    }
    dirs.sort();
    dirs.iter().map(|dir| AssetEntry::read(dir)).collect()
}

/// Takes the first line of a `pathname` record and normalizes it.
pub fn parse_pathname(contents: &str) -> Option<PathBuf> {
    let first = contents
        .lines()
        .next()?
        .trim_matches(|c: char| c == '\0' || c.is_whitespace());
    if first.is_empty() {
        return None;
    }
    Some(normalize_path(first))
}

/// Lexical normalization: drops `.` and empty components and folds `..` into
/// the preceding component. Leading `..` components are kept.
pub fn normalize_path(raw: &str) -> PathBuf {
    let path = Path::new(raw);
    let mut parts: Vec<Component> = Vec::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => match parts.last() {
                Some(Component::Normal(_)) => {
                    parts.pop();
                }
                Some(Component::RootDir) | Some(Component::Prefix(_)) => {}
                _ => parts.push(component),
            },
            other => parts.push(other),
        }
    }
    if parts.is_empty() {
        return PathBuf::from(".");
    }
    parts.iter().collect()
}

/// True when `path` names a file strictly inside whatever directory it is joined to.
pub fn is_contained(path: &Path) -> bool {
    let mut components = path.components().peekable();
    components.peek().is_some() && components.all(|c| matches!(c, Component::Normal(_)))
}

/// Splits a tar member name into `(id, file)` when it sits directly inside an
/// asset directory. Directory members and deeper nesting yield `None`.
pub fn split_member(name: &str) -> Option<(&str, &str)> {
    let name = name.strip_prefix("./").unwrap_or(name);
    let (id, file) = name.split_once('/')?;
    if id.is_empty() || file.is_empty() || file.contains('/') {
        return None;
    }
    Some((id, file))
}

/// What an archive declares for one asset, read without unpacking.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AssetSummary {
    pub id: String,
    pub real_path: Option<PathBuf>,
    pub has_asset: bool,
    pub has_meta: bool,
}

/// Collects an [`AssetSummary`] per asset id, sorted by id.
pub fn summarize<R: Read>(archive: Archive<R>) -> Result<Vec<AssetSummary>> {
    let mut summaries: BTreeMap<String, AssetSummary> = BTreeMap::new();
    for entry in archive {
        let entry = entry?;
        let path = entry.header.path();
        let (id, file) = if entry.header.is_dir() {
            let trimmed = path.strip_prefix("./").unwrap_or(path.as_str());
            match trimmed.trim_end_matches('/') {
                id if !id.is_empty() && !id.contains('/') => (id, ""),
                _ => continue,
            }
        } else if entry.header.is_file() {
            match split_member(&path) {
                Some(parts) => parts,
                None => continue,
            }
        } else {
            continue;
        };
        let summary = summaries.entry(id.to_string()).or_insert_with(|| AssetSummary {
            id: id.to_string(),
            ..Default::default()
        });
        match file {
            PATHNAME => summary.real_path = parse_pathname(&String::from_utf8_lossy(&entry.data)),
            ASSET => summary.has_asset = true,
            ASSET_META => summary.has_meta = true,
            _ => {}
        }
    }
    Ok(summaries.into_values().collect())
}
