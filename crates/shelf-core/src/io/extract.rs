//! Archive extraction module
//!
//! Handles zip, tar, tar.gz and tar.zst artifacts, plus reading a single
//! file (the build descriptor) straight out of an archive without unpacking
//! the rest.

use std::fs::{self, File};
use std::io::{self, BufReader, Read};
use std::path::{Component, Path, PathBuf};

use shelf_schema::ArtifactFormat;
use thiserror::Error;
use zip::ZipArchive;
use zstd::stream::Decoder as ZstdDecoder;

/// Descriptors larger than this are not read from archives.
const MAX_EMBEDDED_FILE: u64 = 1024 * 1024;

#[derive(Error, Debug)]
pub enum ExtractError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Unsupported archive format: {0}")]
    UnsupportedFormat(String),

    #[error("Archive error: {0}")]
    Archive(String),
}

/// Detect archive format from file extension, or `Directory` for a directory.
pub fn detect_format(path: &Path) -> Option<ArtifactFormat> {
    if path.is_dir() {
        return Some(ArtifactFormat::Directory);
    }
    let path_str = path.to_string_lossy().to_lowercase();

    if path_str.ends_with(".tar.zst") || path_str.ends_with(".tzst") {
        Some(ArtifactFormat::TarZst)
    } else if path_str.ends_with(".tar.gz") || path_str.ends_with(".tgz") {
        Some(ArtifactFormat::TarGz)
    } else if path_str.ends_with(".tar") {
        Some(ArtifactFormat::Tar)
    } else if path_str.ends_with(".zip") {
        Some(ArtifactFormat::Zip)
    } else {
        None
    }
}

/// Extract an archive of a known format into `dest_dir`.
///
/// # Errors
///
/// [`ExtractError::Archive`] for a corrupt archive or an entry that would land outside `dest_dir`.
pub fn extract(
    archive_path: &Path,
    format: ArtifactFormat,
    dest_dir: &Path,
) -> Result<(), ExtractError> {
    match format {
        ArtifactFormat::Zip => extract_zip(archive_path, dest_dir),
        ArtifactFormat::TarGz => {
            let reader = BufReader::new(File::open(archive_path)?);
            extract_tar(flate2::read::GzDecoder::new(reader), dest_dir)
        }
        ArtifactFormat::TarZst => {
            let reader = BufReader::new(File::open(archive_path)?);
            extract_tar(ZstdDecoder::new(reader)?, dest_dir)
        }
        ArtifactFormat::Tar => extract_tar(BufReader::new(File::open(archive_path)?), dest_dir),
        ArtifactFormat::Directory => Err(ExtractError::UnsupportedFormat(
            "directories are used in place".to_string(),
        )),
    }
}

/// Reject absolute paths and `..` so entries cannot escape the destination.
fn sanitize(path: &Path) -> Option<PathBuf> {
    let mut clean = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Normal(part) => clean.push(part),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => return None,
        }
    }
    (!clean.as_os_str().is_empty()).then_some(clean)
}

/// Extract a tar archive from a reader
fn extract_tar<R: Read>(reader: R, dest_dir: &Path) -> Result<(), ExtractError> {
    fs::create_dir_all(dest_dir)?;

    let mut archive = tar::Archive::new(reader);
    archive.set_preserve_permissions(true);

    for entry in archive.entries()? {
        let mut entry = entry?;
        let entry_path = entry.path()?.into_owned();

        let Some(relative_path) = sanitize(&entry_path) else {
            return Err(ExtractError::Archive(format!(
                "Invalid path in archive: {}",
                entry_path.display()
            )));
        };

        // unpack_in refuses entries whose parent resolves outside dest_dir,
        // including through symlinks unpacked earlier from the same archive.
        if !entry.unpack_in(dest_dir)? {
            return Err(ExtractError::Archive(format!(
                "Entry escapes the destination: {}",
                relative_path.display()
            )));
        }
    }

    Ok(())
}

/// Extract a zip archive
fn extract_zip(archive_path: &Path, dest_dir: &Path) -> Result<(), ExtractError> {
    let file = File::open(archive_path)?;
    let mut archive = ZipArchive::new(file).map_err(|e| ExtractError::Archive(e.to_string()))?;

    fs::create_dir_all(dest_dir)?;

    for i in 0..archive.len() {
        let mut file = archive
            .by_index(i)
            .map_err(|e| ExtractError::Archive(e.to_string()))?;
        let Some(relative_path) = file.enclosed_name() else {
            return Err(ExtractError::Archive(format!(
                "Invalid path in archive: {}",
                file.name()
            )));
        };

        let absolute_path = dest_dir.join(&relative_path);
        if file.is_dir() {
            fs::create_dir_all(&absolute_path)?;
            continue;
        }
        if let Some(p) = absolute_path.parent() {
            fs::create_dir_all(p)?;
        }

        let mut outfile = File::create(&absolute_path)?;
        io::copy(&mut file, &mut outfile)?;

        #[cfg(unix)]
        if let Some(mode) = file.unix_mode() {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&absolute_path, fs::Permissions::from_mode(mode & 0o7777))?;
        }
    }

    Ok(())
}

/// The directory a build should run from: `dir` itself, or its only
/// sub-directory when the archive wraps everything in one top-level folder
/// (`benterfaces-master/`, `rsa-3.4.2/`). Hidden entries are ignored.
///
/// # Errors
///
/// Fails if `dir` cannot be read.
pub fn artifact_root(dir: &Path) -> io::Result<PathBuf> {
    let entries: Vec<_> = fs::read_dir(dir)?
        .filter_map(Result::ok)
        .filter(|e| !e.file_name().to_string_lossy().starts_with('.'))
        .collect();

    if let [only] = entries.as_slice() {
        if only.file_type()?.is_dir() {
            return Ok(only.path());
        }
    }
    Ok(dir.to_path_buf())
}

/// Whether `relative` names `file_name` at the archive root or one level
/// below it (inside a single wrapper directory).
fn is_root_level(relative: &Path, file_name: &str) -> bool {
    let parts: Vec<_> = relative.components().collect();
    match parts.as_slice() {
        [Component::Normal(name)] | [Component::Normal(_), Component::Normal(name)] => {
            *name == file_name
        }
        _ => false,
    }
}

/// Read a small file at the root of an archive or directory without
/// extracting anything else.
///
/// Entries at the very root win over entries inside a wrapper directory.
/// Returns `Ok(None)` if no such file exists.
///
/// # Errors
///
/// Fails if the archive cannot be opened or decoded.
pub fn read_embedded(
    path: &Path,
    format: ArtifactFormat,
    file_name: &str,
) -> Result<Option<String>, ExtractError> {
    match format {
        ArtifactFormat::Directory => {
            let root = artifact_root(path)?;
            for candidate in [path.join(file_name), root.join(file_name)] {
                if candidate.is_file() {
                    return Ok(Some(fs::read_to_string(candidate)?));
                }
            }
            Ok(None)
        }
        ArtifactFormat::Zip => {
            let mut archive = ZipArchive::new(File::open(path)?)
                .map_err(|e| ExtractError::Archive(e.to_string()))?;
            let mut best: Option<(usize, usize)> = None;
            for i in 0..archive.len() {
                let entry = archive
                    .by_index(i)
                    .map_err(|e| ExtractError::Archive(e.to_string()))?;
                let Some(name) = entry.enclosed_name() else {
                    continue;
                };
                if entry.is_file() && is_root_level(&name, file_name) {
                    let depth = name.components().count();
                    if best.is_none_or(|(_, d)| depth < d) {
                        best = Some((i, depth));
                    }
                }
            }
            let Some((index, _)) = best else {
                return Ok(None);
            };
            let entry = archive
                .by_index(index)
                .map_err(|e| ExtractError::Archive(e.to_string()))?;
            read_limited(entry).map(Some)
        }
        ArtifactFormat::TarGz => {
            let reader = BufReader::new(File::open(path)?);
            read_embedded_tar(flate2::read::GzDecoder::new(reader), file_name)
        }
        ArtifactFormat::TarZst => {
            let reader = BufReader::new(File::open(path)?);
            read_embedded_tar(ZstdDecoder::new(reader)?, file_name)
        }
        ArtifactFormat::Tar => read_embedded_tar(BufReader::new(File::open(path)?), file_name),
    }
}

fn read_embedded_tar<R: Read>(reader: R, file_name: &str) -> Result<Option<String>, ExtractError> {
    let mut archive = tar::Archive::new(reader);
    let mut found: Option<(usize, String)> = None;
    for entry in archive.entries()? {
        let entry = entry?;
        if !entry.header().entry_type().is_file() {
            continue;
        }
        let Some(name) = sanitize(&entry.path()?) else {
            continue;
        };
        if is_root_level(&name, file_name) {
            let depth = name.components().count();
            if found.as_ref().is_none_or(|(d, _)| depth < *d) {
                found = Some((depth, read_limited(entry)?));
            }
        }
    }
    Ok(found.map(|(_, text)| text))
}

fn read_limited<R: Read>(reader: R) -> Result<String, ExtractError> {
    let mut text = String::new();
    reader
        .take(MAX_EMBEDDED_FILE)
        .read_to_string(&mut text)?;
    Ok(text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::tempdir;

    fn write_zip(path: &Path, entries: &[(&str, &str)]) {
        let file = File::create(path).unwrap();
        let mut zip = zip::ZipWriter::new(file);
        let options = zip::write::SimpleFileOptions::default().unix_permissions(0o755);
        for (name, body) in entries {
            zip.start_file(*name, options).unwrap();
            zip.write_all(body.as_bytes()).unwrap();
        }
        zip.finish().unwrap();
    }

    fn write_tar_gz(path: &Path, entries: &[(&str, &str)]) {
        let file = File::create(path).unwrap();
        let gz = flate2::write::GzEncoder::new(file, flate2::Compression::default());
        let mut builder = tar::Builder::new(gz);
        for (name, body) in entries {
            let mut header = tar::Header::new_gnu();
            header.set_size(body.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder.append_data(&mut header, name, body.as_bytes()).unwrap();
        }
        builder.into_inner().unwrap().finish().unwrap();
    }

    #[test]
    fn test_detect_format() {
        assert_eq!(
            detect_format(Path::new("foo.tar.zst")),
            Some(ArtifactFormat::TarZst)
        );
        assert_eq!(
            detect_format(Path::new("foo.tar.gz")),
            Some(ArtifactFormat::TarGz)
        );
        assert_eq!(detect_format(Path::new("foo.tgz")), Some(ArtifactFormat::TarGz));
        assert_eq!(detect_format(Path::new("foo.ZIP")), Some(ArtifactFormat::Zip));
        assert_eq!(detect_format(Path::new("foo")), None);
    }

    #[test]
    fn test_extract_zip_keeps_mode() {
        let dir = tempdir().unwrap();
        let archive = dir.path().join("pkg.zip");
        write_zip(&archive, &[("pkg/tool", "#!/bin/sh\necho hi\n")]);

        let dest = dir.path().join("out");
        extract(&archive, ArtifactFormat::Zip, &dest).unwrap();
        let tool = dest.join("pkg/tool");
        assert!(tool.is_file());

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = fs::metadata(&tool).unwrap().permissions().mode();
            assert_ne!(mode & 0o111, 0);
        }
    }

    #[test]
    fn test_extract_tar_gz() {
        let dir = tempdir().unwrap();
        let archive = dir.path().join("pkg.tar.gz");
        write_tar_gz(&archive, &[("rsa-3.4.2/setup.txt", "x"), ("rsa-3.4.2/rsa/a.py", "y")]);

        let dest = dir.path().join("out");
        extract(&archive, ArtifactFormat::TarGz, &dest).unwrap();
        assert_eq!(fs::read_to_string(dest.join("rsa-3.4.2/rsa/a.py")).unwrap(), "y");
        assert_eq!(artifact_root(&dest).unwrap(), dest.join("rsa-3.4.2"));
    }

    #[cfg(unix)]
    #[test]
    fn test_extract_tar_refuses_symlink_escape() {
        let dir = tempdir().unwrap();
        let outside = dir.path().join("outside");
        fs::create_dir_all(&outside).unwrap();

        let archive = dir.path().join("pkg.tar");
        let mut builder = tar::Builder::new(File::create(&archive).unwrap());
        let mut link = tar::Header::new_gnu();
        link.set_entry_type(tar::EntryType::Symlink);
        link.set_size(0);
        link.set_mode(0o777);
        builder.append_link(&mut link, "link", &outside).unwrap();

        let body = b"pwned";
        let mut file = tar::Header::new_gnu();
        file.set_size(body.len() as u64);
        file.set_mode(0o644);
        file.set_cksum();
        builder.append_data(&mut file, "link/evil", &body[..]).unwrap();
        builder.into_inner().unwrap();

        let dest = dir.path().join("out");
        let result = extract(&archive, ArtifactFormat::Tar, &dest);
        assert!(result.is_err());
        assert!(!outside.join("evil").exists());
    }

    #[test]
    fn test_sanitize_rejects_escapes() {
        assert_eq!(sanitize(Path::new("a/./b")), Some(PathBuf::from("a/b")));
        assert_eq!(sanitize(Path::new("../etc/passwd")), None);
        assert_eq!(sanitize(Path::new("/abs")), None);
        assert_eq!(sanitize(Path::new(".")), None);
    }

    #[test]
    fn test_artifact_root_with_multiple_entries() {
        let dir = tempdir().unwrap();
        fs::create_dir(dir.path().join("a")).unwrap();
        fs::write(dir.path().join("b"), "").unwrap();
        assert_eq!(artifact_root(dir.path()).unwrap(), dir.path());
    }

    #[test]
    fn test_read_embedded_prefers_shallow_entry() {
        let dir = tempdir().unwrap();
        let archive = dir.path().join("pkg.zip");
        write_zip(
            &archive,
            &[
                ("wrap/shelf.toml", "inner"),
                ("shelf.toml", "outer"),
                ("wrap/deep/x/shelf.toml", "too deep"),
            ],
        );
        let text = read_embedded(&archive, ArtifactFormat::Zip, "shelf.toml").unwrap();
        assert_eq!(text.as_deref(), Some("outer"));

        let tgz = dir.path().join("pkg.tar.gz");
        write_tar_gz(&tgz, &[("wrap/shelf.toml", "wrapped"), ("wrap/a/b/shelf.toml", "no")]);
        let text = read_embedded(&tgz, ArtifactFormat::TarGz, "shelf.toml").unwrap();
        assert_eq!(text.as_deref(), Some("wrapped"));

        let missing = read_embedded(&tgz, ArtifactFormat::TarGz, "absent.toml").unwrap();
        assert_eq!(missing, None);
    }
}
