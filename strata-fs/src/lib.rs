//! Capability-based filesystem helpers shared by the Strata crates.
//!
//! Paths arrive as UTF-8 (`camino`) and are opened relative to an ambient
//! base directory (`cap-std`), so absolute and relative inputs take the same
//! code path.
#![forbid(unsafe_code)]

use camino::{Utf8Path, Utf8PathBuf};
use cap_std::{ambient_authority, fs_utf8};
use std::io;
use std::path::Component;

/// Open an existing file for reading.
pub fn open_file(path: &Utf8Path) -> io::Result<fs_utf8::File> {
    fs_utf8::File::open_ambient(path, ambient_authority())
}

/// Create (or truncate) a file, creating missing parent directories first.
pub fn create_file(path: &Utf8Path) -> io::Result<fs_utf8::File> {
    ensure_parent_dir(path)?;
    let (dir, name) = parent_dir_and_name(path)?;
    dir.create(name.as_str())
}

/// Return whether `path` exists and is a regular file.
pub fn is_file(path: &Utf8Path) -> io::Result<bool> {
    let (dir, name) = parent_dir_and_name(path)?;
    dir.metadata(name.as_str()).map(|meta| meta.is_file())
}

/// Create `path` and its ancestors as directories if they are missing.
///
/// Fails with [`io::ErrorKind::AlreadyExists`]-style errors when a component
/// exists but is not a directory.
pub fn ensure_dir(path: &Utf8Path) -> io::Result<()> {
    let (base_dir, relative) = split_ambient(path)?;
    if relative.as_os_str().is_empty() {
        return Ok(());
    }
    base_dir.create_dir_all(&relative)
}

/// Ensure the parent directory of `path` exists.
pub fn ensure_parent_dir(path: &Utf8Path) -> io::Result<()> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => ensure_dir(parent),
        _ => Ok(()),
    }
}

fn parent_dir_and_name(path: &Utf8Path) -> io::Result<(fs_utf8::Dir, String)> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Utf8Path::new("."),
    };
    let name = path
        .file_name()
        .ok_or_else(|| io::Error::other(format!("{path} does not name a file")))?
        .to_owned();
    let dir = fs_utf8::Dir::open_ambient_dir(parent, ambient_authority())?;
    Ok((dir, name))
}

/// Split a path into an ambient base directory and the remaining relative part.
fn split_ambient(path: &Utf8Path) -> io::Result<(fs_utf8::Dir, Utf8PathBuf)> {
    let std_path = path.as_std_path();

    let base = match std_path.components().next() {
        // Windows drive or UNC prefix.
        Some(Component::Prefix(prefix)) => {
            let prefix = prefix
                .as_os_str()
                .to_str()
                .ok_or_else(|| io::Error::other("non-UTF-8 path prefix"))?;
            Utf8PathBuf::from(prefix).join(std::path::MAIN_SEPARATOR.to_string())
        }
        Some(Component::RootDir) => Utf8PathBuf::from(std::path::MAIN_SEPARATOR.to_string()),
        _ => Utf8PathBuf::from("."),
    };
    let relative = if base.as_str() == "." {
        path.to_path_buf()
    } else {
        path.strip_prefix(&base)
            .map_err(|_| io::Error::other(format!("failed to strip {base} from {path}")))?
            .to_path_buf()
    };

    let dir = fs_utf8::Dir::open_ambient_dir(&base, ambient_authority())?;
    Ok((dir, relative))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::{fixture, rstest};
    use std::io::{Read, Write};
    use tempfile::TempDir;

    #[fixture]
    fn workspace() -> (TempDir, Utf8PathBuf) {
        let dir = TempDir::new().expect("create temp dir");
        let path = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).expect("utf-8 temp dir");
        (dir, path)
    }

    #[rstest]
    fn creates_nested_files(workspace: (TempDir, Utf8PathBuf)) {
        let (_guard, root) = workspace;
        let target = root.join("out/nested/features.jsonl");

        let mut file = create_file(&target).expect("create nested file");
        file.write_all(b"{}\n").expect("write file");
        drop(file);

        assert!(is_file(&target).expect("inspect file"));
        let mut contents = String::new();
        open_file(&target)
            .expect("open file")
            .read_to_string(&mut contents)
            .expect("read file");
        assert_eq!(contents, "{}\n");
    }

    #[rstest]
    fn directories_are_not_files(workspace: (TempDir, Utf8PathBuf)) {
        let (_guard, root) = workspace;
        let nested = root.join("cache");
        ensure_dir(&nested).expect("create directory");
        assert!(!is_file(&nested).expect("inspect directory"));
    }

    #[rstest]
    fn missing_files_report_not_found(workspace: (TempDir, Utf8PathBuf)) {
        let (_guard, root) = workspace;
        let err = is_file(&root.join("absent.jsonl")).expect_err("missing file");
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }
}
