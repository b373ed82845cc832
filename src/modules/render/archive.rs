use std::fs::{self, OpenOptions};
use std::io::{self, Cursor, Read};
use std::path::{Path, PathBuf};

use bytes::Bytes;
use tracing::debug;
use zip::ZipArchive;
use zip::result::ZipError;

use super::error::{RenderError, RenderResult};

enum EntryKind {
    Dir,
    File,
}

/// Unpacks a ZIP held in memory into `dest`, keeping the archive's relative paths.
///
/// All entry names are checked before anything touches the disk, so an archive
/// with a single escaping entry writes nothing at all. Existing files are never
/// replaced. At most `max_bytes` of decompressed content are written in total.
/// Returns the number of regular files written.
pub async fn extract(archive: Bytes, dest: PathBuf, max_bytes: u64) -> RenderResult<usize> {
    tokio::task::spawn_blocking(move || extract_blocking(&archive, &dest, max_bytes))
        .await
        .map_err(|e| RenderError::extraction(format!("extraction task aborted: {}", e)))?
}

fn extract_blocking(bytes: &[u8], dest: &Path, max_bytes: u64) -> RenderResult<usize> {
    let mut archive = ZipArchive::new(Cursor::new(bytes)).map_err(zip_error)?;

    let mut plan = Vec::with_capacity(archive.len());
    let mut declared: u64 = 0;
    for index in 0..archive.len() {
        let entry = archive.by_index_raw(index).map_err(zip_error)?;
        let Some(relative) = entry.enclosed_name() else {
            return Err(RenderError::extraction(format!(
                "entry '{}' points outside the archive root",
                entry.name()
            )));
        };

        let kind = if entry.is_dir() {
            EntryKind::Dir
        } else if entry.is_file() {
            declared = declared.saturating_add(entry.size());
            EntryKind::File
        } else {
            debug!(entry = entry.name(), "skipping non-regular archive entry");
            continue;
        };
        plan.push((index, relative, kind));
    }

    if declared > max_bytes {
        return Err(too_large(max_bytes));
    }

    // Declared sizes can lie, so the copy is capped as well.
    let mut remaining = max_bytes;
    let mut written = 0;
    for (index, relative, kind) in plan {
        let target = dest.join(&relative);
        match kind {
            EntryKind::Dir => fs::create_dir_all(&target).map_err(|e| write_error(&relative, e))?,
            EntryKind::File => {
                if let Some(parent) = target.parent() {
                    fs::create_dir_all(parent).map_err(|e| write_error(&relative, e))?;
                }
                let mut entry = archive.by_index(index).map_err(zip_error)?;
                let mut out = OpenOptions::new()
                    .write(true)
                    .create_new(true)
                    .open(&target)
                    .map_err(|e| write_error(&relative, e))?;
                let copied = io::copy(&mut (&mut entry).take(remaining.saturating_add(1)), &mut out)
                    .map_err(|e| write_error(&relative, e))?;
                if copied > remaining {
                    return Err(too_large(max_bytes));
                }
                remaining -= copied;
                written += 1;
            }
        }
    }

    debug!(files = written, "archive extracted");
    Ok(written)
}

fn too_large(max_bytes: u64) -> RenderError {
    RenderError::extraction(format!(
        "archive expands to more than {} bytes",
        max_bytes
    ))
}

fn zip_error(e: ZipError) -> RenderError {
    RenderError::extraction(format!("not a readable zip archive: {}", e))
}

fn write_error(relative: &Path, e: io::Error) -> RenderError {
    if e.kind() == io::ErrorKind::AlreadyExists {
        return RenderError::extraction(format!(
            "entry '{}' appears more than once",
            relative.display()
        ));
    }
    RenderError::extraction(format!("failed to write '{}': {}", relative.display(), e))
}


#[cfg(test)]
mod tests {
    use super::testing::zip_of;
    use super::*;

    const NO_LIMIT: u64 = u64::MAX;

    #[tokio::test]
    async fn writes_files_and_nested_directories() {
        let dest = tempfile::tempdir().unwrap();
        let archive = zip_of(&[
            ("a.png", b"png-a"),
            ("nested/", b""),
            ("nested/deep/b.jpg", b"jpg-b"),
        ]);

        let written = extract(archive, dest.path().to_path_buf(), NO_LIMIT).await.unwrap();

        assert_eq!(written, 2);
        assert_eq!(fs::read(dest.path().join("a.png")).unwrap(), b"png-a");
        assert_eq!(fs::read(dest.path().join("nested/deep/b.jpg")).unwrap(), b"jpg-b");
    }

    #[tokio::test]
    async fn garbage_bytes_are_not_an_archive() {
        let dest = tempfile::tempdir().unwrap();
        let err = extract(Bytes::from_static(b"definitely not a zip"), dest.path().to_path_buf(), NO_LIMIT)
            .await
            .unwrap_err();

        assert_eq!(err.label(), "extraction_failed");
    }

    #[tokio::test]
    async fn traversal_rejects_the_whole_archive() {
        let base = tempfile::tempdir().unwrap();
        let dest = base.path().join("frames");
        fs::create_dir(&dest).unwrap();
        let archive = zip_of(&[("ok.png", b"fine"), ("../evil.png", b"nope")]);

        let err = extract(archive, dest.clone(), NO_LIMIT).await.unwrap_err();

        assert_eq!(err.label(), "extraction_failed");
        assert!(!base.path().join("evil.png").exists());
        assert!(!dest.join("ok.png").exists(), "nothing may be written");
    }

    #[tokio::test]
    async fn absolute_entry_paths_are_rejected() {
        let dest = tempfile::tempdir().unwrap();
        let archive = zip_of(&[("/etc/evil.png", b"nope")]);

        let err = extract(archive, dest.path().to_path_buf(), NO_LIMIT).await.unwrap_err();
        assert_eq!(err.label(), "extraction_failed");
    }

    #[tokio::test]
    async fn existing_files_are_left_alone() {
        let dest = tempfile::tempdir().unwrap();
        fs::write(dest.path().join("keep.txt"), b"mine").unwrap();
        fs::write(dest.path().join("a.png"), b"original").unwrap();

        let err = extract(zip_of(&[("a.png", b"replacement")]), dest.path().to_path_buf(), NO_LIMIT)
            .await
            .unwrap_err();

        assert_eq!(err.label(), "extraction_failed");
        assert_eq!(fs::read(dest.path().join("a.png")).unwrap(), b"original");
        assert_eq!(fs::read(dest.path().join("keep.txt")).unwrap(), b"mine");
    }

    #[tokio::test]
    async fn expansion_beyond_the_cap_is_rejected() {
        let dest = tempfile::tempdir().unwrap();
        let zeros = vec![0u8; 64 * 1024];
        let archive = zip_of(&[("a.png", b"small"), ("b.png", zeros.as_slice())]);
        assert!(archive.len() < zeros.len(), "fixture should compress well");

        let err = extract(archive, dest.path().to_path_buf(), 1024)
            .await
            .unwrap_err();

        assert_eq!(err.label(), "extraction_failed");
        assert!(err.to_string().contains("1024"));
        assert!(!dest.path().join("b.png").exists());
    }

    #[tokio::test]
    async fn content_within_the_cap_is_extracted() {
        let dest = tempfile::tempdir().unwrap();
        let archive = zip_of(&[("a.png", b"12345"), ("b.png", b"67890")]);

        let written = extract(archive, dest.path().to_path_buf(), 10).await.unwrap();
        assert_eq!(written, 2);
    }
}
