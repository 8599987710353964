use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use flate2::write::GzEncoder;
use flate2::Compression;
use unitypack_extract::tar::{write_tar, TarEntry};
use unitypack_extract::{extract, list, Error, ExtractOptions, Extractor, SkipReason};

/// One GUID directory of a package; `None` leaves the record out.
struct Asset<'a> {
    id: &'a str,
    pathname: Option<&'a str>,
    asset: Option<&'a [u8]>,
    meta: Option<&'a [u8]>,
}

fn asset<'a>(
    id: &'a str,
    pathname: Option<&'a str>,
    asset: Option<&'a [u8]>,
    meta: Option<&'a [u8]>,
) -> Asset<'a> {
    Asset {
        id,
        pathname,
        asset,
        meta,
    }
}

fn write_package(path: &Path, assets: &[Asset]) {
    let mut entries = Vec::new();
    for a in assets {
        entries.push(TarEntry::dir(a.id));
        if let Some(pathname) = a.pathname {
            entries.push(TarEntry::file(
                &format!("{}/pathname", a.id),
                pathname.as_bytes().to_vec(),
            ));
        }
        if let Some(asset) = a.asset {
            let mut entry = TarEntry::file(&format!("{}/asset", a.id), asset.to_vec());
            entry.header.mode = 0o755;
            entries.push(entry);
        }
        if let Some(meta) = a.meta {
            let mut entry = TarEntry::file(&format!("{}/asset.meta", a.id), meta.to_vec());
            entry.header.mode = 0o755;
            entries.push(entry);
        }
    }

    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(&write_tar(&entries)).unwrap();
    fs::write(path, encoder.finish().unwrap()).unwrap();
}

fn files_under(root: &Path) -> Vec<PathBuf> {
    let mut files = Vec::new();
    let mut stack = vec![root.to_path_buf()];
    while let Some(dir) = stack.pop() {
        for entry in fs::read_dir(&dir).unwrap() {
            let path = entry.unwrap().path();
            if path.is_dir() {
                stack.push(path);
            } else {
                files.push(path.strip_prefix(root).unwrap().to_path_buf());
            }
        }
    }
    files.sort();
    files
}

#[test]
fn restores_declared_path() {
    let dir = tempfile::tempdir().unwrap();
    let package = dir.path().join("Player.unitypackage");
    write_package(
        &package,
        &[asset(
            "5f1c0e3b",
            Some("Scripts/Player.cs"),
            Some(b"class Player {}"),
            None,
        )],
    );

    let output = dir.path().join("Player");
    let report = extract(&package, &output).unwrap();

    assert_eq!(files_under(&output), vec![PathBuf::from("Scripts/Player.cs")]);
    assert_eq!(
        fs::read_to_string(output.join("Scripts/Player.cs")).unwrap(),
        "class Player {}"
    );
    assert_eq!(report.restored.len(), 1);
    assert_eq!(report.restored[0].real_path, PathBuf::from("Scripts/Player.cs"));
}

#[test]
fn one_file_per_entry() {
    let dir = tempfile::tempdir().unwrap();
    let package = dir.path().join("many.unitypackage");
    write_package(
        &package,
        &[
            asset("a1", Some("Assets/A.cs\n00"), Some(b"A"), None),
            asset("b2", Some("Assets/Sub/B.png"), Some(&[0, 1, 2, 3]), None),
            asset("c3", Some("Assets/Sub/Deeper/C.txt"), Some(b""), None),
        ],
    );

    let output = dir.path().join("out");
    extract(&package, &output).unwrap();

    assert_eq!(
        files_under(&output),
        vec![
            PathBuf::from("Assets/A.cs"),
            PathBuf::from("Assets/Sub/B.png"),
            PathBuf::from("Assets/Sub/Deeper/C.txt"),
        ]
    );
    assert_eq!(fs::read(output.join("Assets/Sub/B.png")).unwrap(), [0, 1, 2, 3]);
    assert!(fs::read(output.join("Assets/Sub/Deeper/C.txt")).unwrap().is_empty());
}

#[test]
fn sidecar_gets_meta_suffix() {
    let dir = tempfile::tempdir().unwrap();
    let package = dir.path().join("meta.unitypackage");
    write_package(
        &package,
        &[
            asset("file", Some("Assets/Logo.png"), Some(b"png"), Some(b"guid: file")),
            asset("folder", Some("Assets/Art"), None, Some(b"folderAsset: yes")),
        ],
    );

    let output = dir.path().join("out");
    let report = extract(&package, &output).unwrap();

    assert_eq!(fs::read(output.join("Assets/Logo.png.meta")).unwrap(), b"guid: file");
    assert_eq!(fs::read(output.join("Assets/Art.meta")).unwrap(), b"folderAsset: yes");
    assert!(!output.join("Assets/Art").exists());
    assert_eq!(report.files_written(), 3);
}

#[test]
fn placeholder_and_pathless_entries_are_skipped() {
    let dir = tempfile::tempdir().unwrap();
    let package = dir.path().join("skip.unitypackage");
    write_package(
        &package,
        &[
            asset("aa", Some("Assets/Empty"), None, None),
            asset("bb", None, Some(b"orphan"), None),
            asset("cc", Some(" \n00"), Some(b"blank"), None),
        ],
    );

    let output = dir.path().join("out");
    let report = extract(&package, &output).unwrap();

    assert!(output.is_dir());
    assert!(files_under(&output).is_empty());
    assert!(report.restored.is_empty());
    assert_eq!(report.skipped.len(), 3);
    assert_eq!(report.skipped[0].reason, SkipReason::Placeholder);
    assert_eq!(report.skipped[1].id, "bb");
    assert_eq!(report.skipped[1].reason, SkipReason::MissingPathname);
    assert_eq!(report.skipped[2].id, "cc");
    assert_eq!(report.skipped[2].reason, SkipReason::BlankPathname);
}

#[test]
fn escaping_pathname_is_skipped() {
    let dir = tempfile::tempdir().unwrap();
    let package = dir.path().join("evil.unitypackage");
    write_package(&package, &[asset("ev", Some("Assets/../../escape.txt"), Some(b"x"), None)]);

    let output = dir.path().join("out");
    let report = extract(&package, &output).unwrap();

    assert!(!dir.path().join("escape.txt").exists());
    assert!(files_under(&output).is_empty());
    assert_eq!(
        report.skipped[0].reason,
        SkipReason::UnsafePath(PathBuf::from("../escape.txt"))
    );
}

#[test]
fn existing_output_is_left_untouched() {
    let dir = tempfile::tempdir().unwrap();
    let package = dir.path().join("p.unitypackage");
    write_package(&package, &[asset("a", Some("A.txt"), Some(b"A"), None)]);
    let output = dir.path().join("out");
    fs::create_dir(&output).unwrap();
    let before = files_under(dir.path());

    let err = extract(&package, &output).unwrap_err();

    assert!(matches!(err, Error::OutputExists { .. }));
    assert_eq!(err.exit_code(), 1);
    assert_eq!(files_under(dir.path()), before);
    assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 2);
}

#[test]
fn working_area_is_removed() {
    let dir = tempfile::tempdir().unwrap();
    let package = dir.path().join("p.unitypackage");
    write_package(&package, &[asset("a", Some("A.txt"), Some(b"A"), None)]);

    // generated next to the output
    extract(&package, dir.path().join("out")).unwrap();
    let leftovers: Vec<_> = fs::read_dir(dir.path())
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .filter(|name| name.starts_with(".working"))
        .collect();
    assert!(leftovers.is_empty(), "left behind {:?}", leftovers);

    // explicit, with debris from an interrupted run
    let working = dir.path().join(".working");
    fs::create_dir_all(working.join("stale")).unwrap();
    let extractor = Extractor::new(ExtractOptions::default().working_dir(&working));
    extractor.extract(&package, &dir.path().join("out2")).unwrap();
    assert!(!working.exists());
    assert_eq!(fs::read(dir.path().join("out2/A.txt")).unwrap(), b"A");
}

#[test]
fn corrupt_archive_cleans_up() {
    let dir = tempfile::tempdir().unwrap();
    let package = dir.path().join("broken.unitypackage");
    fs::write(&package, b"this is not gzip").unwrap();
    let working = dir.path().join(".working");
    let output = dir.path().join("out");

    let extractor = Extractor::new(ExtractOptions::default().working_dir(&working));
    let err = extractor.extract(&package, &output).unwrap_err();

    assert_eq!(err.exit_code(), 2);
    assert!(!working.exists());
    assert!(!output.exists());
}

#[test]
fn missing_archive_is_open_error() {
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("nope.unitypackage");
    let err = extract(missing, dir.path().join("out")).unwrap_err();
    assert!(matches!(err, Error::OpenArchive { .. }));
    assert_eq!(err.exit_code(), 2);
}

#[cfg(unix)]
#[test]
fn restored_files_are_not_executable() {
    use std::os::unix::fs::PermissionsExt;

    let dir = tempfile::tempdir().unwrap();
    let package = dir.path().join("perm.unitypackage");
    write_package(&package, &[asset("x", Some("bin/tool.sh"), Some(b"#!/bin/sh"), Some(b"m"))]);

    let output = dir.path().join("out");
    extract(&package, &output).unwrap();

    for file in ["bin/tool.sh", "bin/tool.sh.meta"] {
        let mode = fs::metadata(output.join(file)).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o644, "{} has mode {:o}", file, mode);
    }
}

#[cfg(unix)]
#[test]
fn restored_files_use_configured_mode() {
    use std::os::unix::fs::PermissionsExt;

    let dir = tempfile::tempdir().unwrap();
    let package = dir.path().join("perm.unitypackage");
    write_package(&package, &[asset("x", Some("A.txt"), Some(b"A"), Some(b"m"))]);

    let output = dir.path().join("out");
    let extractor = Extractor::new(ExtractOptions::default().file_mode(0o640));
    extractor.extract(&package, &output).unwrap();

    for file in ["A.txt", "A.txt.meta"] {
        let mode = fs::metadata(output.join(file)).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o640, "{} has mode {:o}", file, mode);
    }
}

#[test]
fn lists_without_extracting() {
    let dir = tempfile::tempdir().unwrap();
    let package = dir.path().join("list.unitypackage");
    write_package(
        &package,
        &[
            asset("a", Some("Assets/A.cs"), Some(b"A"), Some(b"m")),
            asset("b", Some("Assets/Folder"), None, None),
        ],
    );

    let assets = list(&package).unwrap();
    assert_eq!(assets.len(), 2);
    assert_eq!(assets[0].real_path, Some(PathBuf::from("Assets/A.cs")));
    assert!(assets[0].has_asset && assets[0].has_meta);
    assert!(!assets[1].has_asset && !assets[1].has_meta);
    assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 1);
}
