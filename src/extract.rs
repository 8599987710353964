//! Rebuilds the project tree from an unpacked `.unitypackage`.

use std::fmt;
use std::fs::{self, File};
use std::io::{self, BufReader, Read};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use flate2::read::GzDecoder;
use tempfile::TempDir;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::options::ExtractOptions;
use crate::package::{self, AssetEntry, META_SUFFIX};
use crate::tar::{Archive, TarHeader};

/// Why an entry of the package produced no output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// Only a `pathname` record: the entry declares a folder.
    Placeholder,
    /// Payload or sidecar present but no `pathname` record.
    MissingPathname,
    /// A `pathname` record whose first line is blank.
    BlankPathname,
    /// The declared path would land outside the output directory.
    UnsafePath(PathBuf),
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::Placeholder => write!(f, "folder placeholder"),
            SkipReason::MissingPathname => write!(f, "no pathname record"),
            SkipReason::BlankPathname => write!(f, "blank pathname record"),
            SkipReason::UnsafePath(path) => write!(f, "unsafe path '{}'", path.display()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestoredAsset {
    pub id: String,
    pub real_path: PathBuf,
    pub asset: Option<PathBuf>,
    pub meta: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedEntry {
    pub id: String,
    pub reason: SkipReason,
}

/// Outcome of one extraction run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtractReport {
    pub unpacked_files: usize,
    pub restored: Vec<RestoredAsset>,
    pub skipped: Vec<SkippedEntry>,
}

impl ExtractReport {
    /// Number of files written to the output tree, sidecars included.
    pub fn files_written(&self) -> usize {
        self.restored
            .iter()
            .map(|r| usize::from(r.asset.is_some()) + usize::from(r.meta.is_some()))
            .sum()
    }
}

/// Transient directory holding the raw unpacked archive.
///
/// Removed when dropped, so every exit path of a run cleans it up.
pub struct WorkingArea {
    path: PathBuf,
    generated: Option<TempDir>,
}

impl WorkingArea {
    /// Uses `explicit` after clearing whatever a previous run left there, or
    /// generates a unique directory beside `output`.
    pub fn prepare(explicit: Option<&Path>, output: &Path) -> Result<Self> {
        if let Some(path) = explicit {
            if path.exists() {
                debug!("removing stale working area {}", path.display());
                fs::remove_dir_all(path).map_err(|source| Error::WorkingArea {
                    path: path.to_path_buf(),
                    source,
                })?;
            }
            fs::create_dir_all(path).map_err(|source| Error::WorkingArea {
                path: path.to_path_buf(),
                source,
            })?;
            return Ok(Self {
                path: path.to_path_buf(),
                generated: None,
            });
        }

        let parent = match output.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        let mut builder = tempfile::Builder::new();
        builder.prefix(".working-");
        // fall back to the system temp dir when the output's parent is missing
        let dir = match builder.tempdir_in(parent) {
            Ok(dir) => dir,
            Err(_) => builder.tempdir().map_err(|source| Error::WorkingArea {
                path: parent.to_path_buf(),
                source,
            })?,
        };
        Ok(Self {
            path: dir.path().to_path_buf(),
            generated: Some(dir),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Removes the directory, reporting failures that `Drop` would swallow.
    pub fn close(mut self) -> Result<()> {
        let result = match self.generated.take() {
            Some(dir) => dir.close(),
            None => fs::remove_dir_all(&self.path),
        };
        result.map_err(|source| Error::WorkingArea {
            path: self.path.clone(),
            source,
        })
    }
}

impl Drop for WorkingArea {
    fn drop(&mut self) {
        if self.generated.is_none() && self.path.exists() {
            if let Err(e) = fs::remove_dir_all(&self.path) {
                warn!("failed to remove working area {}: {}", self.path.display(), e);
            }
        }
    }
}

/// Opens a gzip-compressed tar archive for streaming.
pub fn open_package(path: &Path) -> Result<Archive<GzDecoder<BufReader<File>>>> {
    let file = File::open(path).map_err(|source| Error::OpenArchive {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(Archive::new(GzDecoder::new(BufReader::new(file))))
}

/// Writes every file and directory member of `archive` under `dest`.
///
/// Links, devices and FIFOs carry nothing a package needs and are skipped.
pub fn unpack<R: Read>(
    mut archive: Archive<R>,
    dest: &Path,
    options: &ExtractOptions,
) -> Result<usize> {
    let mut count = 0;
    while let Some(header) = archive.next_header()? {
        let name = header.path();
        let Some(relative) = member_path(&name)? else {
            continue;
        };
        let target = dest.join(relative);

        if header.is_dir() {
            fs::create_dir_all(&target).map_err(|source| Error::WorkingArea {
                path: target.clone(),
                source,
            })?;
        } else if header.is_file() {
            write_member(&mut archive, &header, &target, options)?;
            count += 1;
        } else {
            debug!(
                "skipping '{}' (typeflag {:?})",
                name,
                char::from(header.typeflag)
            );
        }
    }
    Ok(count)
}

/// Validates a member name, rejecting anything that would escape the working area.
fn member_path(name: &str) -> Result<Option<PathBuf>> {
    let normalized = package::normalize_path(name);
    if normalized == Path::new(".") {
        return Ok(None);
    }
    if !package::is_contained(&normalized) {
        return Err(Error::Decode(format!("unsafe member path '{}'", name)));
    }
    Ok(Some(normalized))
}

fn write_member<R: Read>(
    archive: &mut Archive<R>,
    header: &TarHeader,
    target: &Path,
    options: &ExtractOptions,
) -> Result<()> {
    let working_area = |source: io::Error| Error::WorkingArea {
        path: target.to_path_buf(),
        source,
    };
    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent).map_err(working_area)?;
    }
    let mut file = File::create(target).map_err(working_area)?;
    archive.copy_data(&mut file).map_err(|e| match e {
        Error::Io(source) => working_area(source),
        other => other,
    })?;
    apply_member_mode(&file, header.mode).map_err(working_area)?;
    if options.preserve_mtime {
        if let Some(modified) = header.modified() {
            file.set_modified(SystemTime::from(modified))
                .map_err(working_area)?;
        }
    }
    Ok(())
}

/// Unpacked files keep the archive's mode bits, with owner read/write forced
/// so the later move and cleanup can always reach them.
#[cfg(unix)]
fn apply_member_mode(file: &File, mode: u32) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    file.set_permissions(fs::Permissions::from_mode((mode & 0o777) | 0o600))
}

#[cfg(not(unix))]
fn apply_member_mode(_file: &File, _mode: u32) -> io::Result<()> {
    Ok(())
}

/// Moves `src` to `dst`, copying across filesystems when a rename is refused.
fn move_file(src: &Path, dst: &Path) -> io::Result<()> {
    if let Err(e) = fs::rename(src, dst) {
        debug!("rename {} failed ({}), copying instead", src.display(), e);
        let modified = fs::metadata(src)?.modified()?;
        fs::copy(src, dst)?;
        File::options().write(true).open(dst)?.set_modified(modified)?;
        fs::remove_file(src)?;
    }
    Ok(())
}

/// The unpacker may leave execute bits set; restored files get a fixed mode.
#[cfg(unix)]
fn normalize_permissions(path: &Path, mode: u32) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(mode))
}

#[cfg(not(unix))]
fn normalize_permissions(path: &Path, _mode: u32) -> io::Result<()> {
    let mut perms = fs::metadata(path)?.permissions();
    perms.set_readonly(false);
    fs::set_permissions(path, perms)
}

pub struct Extractor {
    options: ExtractOptions,
}

impl Default for Extractor {
    fn default() -> Self {
        Self::new(ExtractOptions::default())
    }
}

impl Extractor {
    pub fn new(options: ExtractOptions) -> Self {
        Self { options }
    }

    /// Extracts `archive` into `output`, which must not exist yet.
    pub fn extract(&self, archive: &Path, output: &Path) -> Result<ExtractReport> {
        if fs::symlink_metadata(output).is_ok() {
            return Err(Error::OutputExists {
                path: output.to_path_buf(),
            });
        }

        let working = WorkingArea::prepare(self.options.working_dir.as_deref(), output)?;
        debug!("working area {}", working.path().display());

        let unpacked_files = unpack(open_package(archive)?, working.path(), &self.options)?;

        fs::create_dir_all(output).map_err(|source| Error::Restore {
            path: output.to_path_buf(),
            source,
        })?;

        let mut report = ExtractReport {
            unpacked_files,
            ..Default::default()
        };
        for entry in package::scan_working_area(working.path())? {
            self.restore(entry, output, &mut report)?;
        }

        working.close()?;
        Ok(report)
    }

    fn restore(
        &self,
        entry: AssetEntry,
        output: &Path,
        report: &mut ExtractReport,
    ) -> Result<()> {
        let skip = |reason: SkipReason| SkippedEntry {
            id: entry.id.clone(),
            reason,
        };

        if entry.is_placeholder() {
            debug!("{} is a folder placeholder", entry.id);
            report.skipped.push(skip(SkipReason::Placeholder));
            return Ok(());
        }
        let Some(real_path) = entry.real_path.clone() else {
            let reason = if entry.has_pathname {
                SkipReason::BlankPathname
            } else {
                SkipReason::MissingPathname
            };
            warn!("{} has content but {}, skipping", entry.id, reason);
            report.skipped.push(skip(reason));
            return Ok(());
        };
        let contained = package::is_contained(&real_path);
        let filename = real_path.file_name().map(|name| name.to_os_string());
        let Some(filename) = filename.filter(|_| contained) else {
            warn!("{} declares unsafe path {}, skipping", entry.id, real_path.display());
            report.skipped.push(skip(SkipReason::UnsafePath(real_path)));
            return Ok(());
        };

        let dest_dir = match real_path.parent() {
            Some(parent) => output.join(parent),
            None => output.to_path_buf(),
        };
        fs::create_dir_all(&dest_dir).map_err(|source| Error::Restore {
            path: dest_dir.clone(),
            source,
        })?;

        let mut restored = RestoredAsset {
            id: entry.id.clone(),
            real_path: real_path.clone(),
            asset: None,
            meta: None,
        };

        if let Some(source) = &entry.asset {
            let dest = dest_dir.join(&filename);
            self.place(source, &dest)?;
            restored.asset = Some(dest);
        }
        if let Some(source) = &entry.meta {
            let mut meta_name = filename.clone();
            meta_name.push(META_SUFFIX);
            let dest = dest_dir.join(meta_name);
            self.place(source, &dest)?;
            restored.meta = Some(dest);
        }

        info!("{} => {}", entry.id, real_path.display());
        report.restored.push(restored);
        Ok(())
    }

    fn place(&self, source: &Path, dest: &Path) -> Result<()> {
        info!("Move {} => {}", source.display(), dest.display());
        move_file(source, dest)
            .and_then(|_| normalize_permissions(dest, self.options.file_mode))
            .map_err(|source| Error::Restore {
                path: dest.to_path_buf(),
                source,
            })
    }
}
