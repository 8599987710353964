use std::path::{Path, PathBuf};

/// Mode given to every restored file: owner read/write, group and other read.
pub const DEFAULT_FILE_MODE: u32 = 0o644;

/// Knobs for a single extraction run.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExtractOptions {
    /// Explicit working area. Any existing directory at this path is removed
    /// before unpacking. When unset a unique directory is generated next to the
    /// output directory.
    pub working_dir: Option<PathBuf>,
    pub file_mode: u32,
    /// Carry tar header modification times onto restored files.
    pub preserve_mtime: bool,
}

impl Default for ExtractOptions {
    fn default() -> Self {
        Self {
            working_dir: None,
            file_mode: DEFAULT_FILE_MODE,
            preserve_mtime: true,
        }
    }
}

impl ExtractOptions {
    pub fn working_dir(mut self, path: impl AsRef<Path>) -> Self {
        self.working_dir = Some(path.as_ref().to_path_buf());
        self
    }

    pub fn file_mode(mut self, mode: u32) -> Self {
        self.file_mode = mode;
        self
    }

    pub fn preserve_mtime(mut self, preserve: bool) -> Self {
        self.preserve_mtime = preserve;
        self
    }
}
