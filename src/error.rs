use std::io;
use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Output dir \"{}\" exists. Aborting.", path.display())]
    OutputExists { path: PathBuf },

    #[error("failed to open archive '{}': {source}", path.display())]
    OpenArchive { path: PathBuf, source: io::Error },

    #[error("archive is corrupted: {0}")]
    Decode(String),

    #[error("failed to decode archive: {0}")]
    DecodeIo(io::Error),

    #[error("working area '{}' unavailable: {source}", path.display())]
    WorkingArea { path: PathBuf, source: io::Error },

    #[error("failed to restore '{}': {source}", path.display())]
    Restore { path: PathBuf, source: io::Error },

    #[error(transparent)]
    Io(#[from] io::Error),
}

impl Error {
    /// Process exit status reported by the `extract` binary.
    pub fn exit_code(&self) -> u8 {
        match self {
            Error::OutputExists { .. } => 1,
            Error::OpenArchive { .. } | Error::Decode(_) | Error::DecodeIo(_) => 2,
            Error::WorkingArea { .. } | Error::Restore { .. } | Error::Io(_) => 3,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
