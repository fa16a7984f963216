//! Filesystem helpers: atomic writes and zip archive handling.

use crate::error::{io_ctx, Error, Result};
use std::io::{Read, Write};
use std::path::Path;

/// Writes a file via temp file + rename so readers never see partial content.
pub fn atomic_write(path: &Path, content: &str) -> Result<()> {
    let tmp = path.with_extension("tmp");
    std::fs::write(&tmp, content).map_err(io_ctx(&tmp, "failed to write"))?;
    std::fs::rename(&tmp, path).map_err(io_ctx(path, "failed to rename into"))?;
    Ok(())
}

/// Creates a zip archive from a directory tree.
pub fn zip_directory(source: &Path, archive_path: &Path) -> Result<()> {
    let file = std::fs::File::create(archive_path)
        .map_err(io_ctx(archive_path, "failed to create"))?;
    let mut writer = zip::ZipWriter::new(file);
    let options = zip::write::SimpleFileOptions::default()
        .compression_method(zip::CompressionMethod::Deflated);

    let mut pending = vec![source.to_path_buf()];
    while let Some(dir) = pending.pop() {
        let entries = std::fs::read_dir(&dir).map_err(io_ctx(&dir, "failed to read"))?;
        for entry in entries {
            let entry = entry.map_err(io_ctx(&dir, "failed to read entry in"))?;
            let path = entry.path();
            let relative = path
                .strip_prefix(source)
                .expect("entry under source root")
                .to_string_lossy()
                .replace('\\', "/");
            if path.is_dir() {
                pending.push(path);
            } else {
                writer
                    .start_file(relative, options)
                    .map_err(|e| Error::BuildFailed(format!("zip write failed: {e}")))?;
                let mut content = Vec::new();
                std::fs::File::open(&path)
                    .and_then(|mut f| f.read_to_end(&mut content))
                    .map_err(io_ctx(&path, "failed to read"))?;
                writer
                    .write_all(&content)
                    .map_err(io_ctx(archive_path, "failed to write"))?;
            }
        }
    }
    writer
        .finish()
        .map_err(|e| Error::BuildFailed(format!("zip finalize failed: {e}")))?;
    Ok(())
}

/// Extracts a zip archive into a directory.
pub fn unzip_to(archive_path: &Path, destination: &Path) -> Result<()> {
    let file =
        std::fs::File::open(archive_path).map_err(io_ctx(archive_path, "failed to open"))?;
    let mut archive = zip::ZipArchive::new(file)
        .map_err(|e| Error::CacheCorrupt(format!("zip open failed: {e}")))?;
    archive
        .extract(destination)
        .map_err(|e| Error::CacheCorrupt(format!("zip extract failed: {e}")))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_atomic_write() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("out.conf");
        atomic_write(&path, "CONFIG_A=y\n").unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "CONFIG_A=y\n");
        assert!(!path.with_extension("tmp").exists());
    }

    #[test]
    fn test_zip_round_trip() {
        let src = TempDir::new().unwrap();
        std::fs::create_dir_all(src.path().join("nested")).unwrap();
        std::fs::write(src.path().join("a.txt"), "alpha").unwrap();
        std::fs::write(src.path().join("nested/b.txt"), "beta").unwrap();

        let out = TempDir::new().unwrap();
        let archive = out.path().join("bundle.zip");
        zip_directory(src.path(), &archive).unwrap();

        let extracted = out.path().join("extracted");
        unzip_to(&archive, &extracted).unwrap();
        assert_eq!(
            std::fs::read_to_string(extracted.join("a.txt")).unwrap(),
            "alpha"
        );
        assert_eq!(
            std::fs::read_to_string(extracted.join("nested/b.txt")).unwrap(),
            "beta"
        );
    }
}
