//! Extracts `.unitypackage` archives back into their project layout
//!
//! A `.unitypackage` is a gzip-compressed tar archive in which every asset
//! lives in a directory named after its GUID. This crate unpacks the archive
//! into a transient working area and moves each asset to the path recorded in
//! its `pathname` file.
//!
//! # Usage
//!
//! ## Extracting a package
//!
//! ```rust,no_run
//! use unitypack_extract::extract;
//!
//! let report = extract("Player.unitypackage", "Player").unwrap();
//! println!("restored {} files", report.files_written());
//! ```
//!
//! ## Listing the assets in a package
//!
//! ```rust,no_run
//! use unitypack_extract::list;
//!
//! match list("Player.unitypackage") {
//!     Ok(assets) => {
//!         for asset in assets {
//!             if let Some(path) = &asset.real_path {
//!                 println!("  {} ({})", path.display(), asset.id);
//!             }
//!         }
//!     }
//!     Err(e) => eprintln!("Error: {}", e),
//! }
//! ```
//!
//! ## Choosing the working area
//!
//! ```rust,no_run
//! use unitypack_extract::{ExtractOptions, Extractor};
//! use std::path::Path;
//!
//! let extractor = Extractor::new(ExtractOptions::default().working_dir(".working"));
//! extractor
//!     .extract(Path::new("Player.unitypackage"), Path::new("out"))
//!     .unwrap();
//! ```

pub mod extract;
pub mod options;
pub mod package;
pub mod tar;

mod error;

use std::path::{Path, PathBuf};

pub use error::{Error, Result};
pub use extract::{ExtractReport, Extractor, RestoredAsset, SkipReason, SkippedEntry};
pub use options::ExtractOptions;
pub use package::AssetSummary;

/// Extracts `archive` into `output` with default options.
///
/// Fails without touching the filesystem when `output` already exists.
pub fn extract(archive: impl AsRef<Path>, output: impl AsRef<Path>) -> Result<ExtractReport> {
    Extractor::default().extract(archive.as_ref(), output.as_ref())
}

/// Lists the assets declared by `archive` without unpacking it.
pub fn list(archive: impl AsRef<Path>) -> Result<Vec<AssetSummary>> {
    package::summarize(extract::open_package(archive.as_ref())?)
}

/// `./<file stem>` of the input, the output directory used when none is given.
pub fn default_output_dir(input: &Path) -> PathBuf {
    let stem = input.file_stem().unwrap_or(input.as_os_str());
    Path::new(".").join(stem)
}
