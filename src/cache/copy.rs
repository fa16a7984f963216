//! Recursive tree copy with a bounded worker pool and progress callbacks.
//!
//! Used to materialize cached workspaces into build directories. Progress
//! callbacks must be safe to invoke from any worker thread. Cancellation is
//! observed at file boundaries and deletes the partial destination.

use crate::cancel::CancellationToken;
use crate::error::{io_ctx, Error, Result};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

/// Snapshot of a copy in flight.
#[derive(Debug, Clone, Default)]
pub struct CopyProgress {
    pub current_file: PathBuf,
    pub files_processed: usize,
    pub total_files: usize,
    pub bytes_copied: u64,
    pub total_bytes: u64,
}

/// Callback invoked after each file completes.
pub type CopyProgressCallback = Arc<dyn Fn(&CopyProgress) + Send + Sync>;

/// Totals for a finished copy.
#[derive(Debug, Clone, Copy, Default)]
pub struct CopyStats {
    pub files_copied: usize,
    pub bytes_copied: u64,
}

/// Collects every file under `root` with its size, plus all directories.
fn collect_entries(root: &Path) -> Result<(Vec<(PathBuf, u64)>, Vec<PathBuf>, u64)> {
    let mut files = Vec::new();
    let mut dirs = Vec::new();
    let mut total_bytes = 0;
    let mut pending = vec![root.to_path_buf()];

    while let Some(dir) = pending.pop() {
        let entries = std::fs::read_dir(&dir).map_err(io_ctx(&dir, "failed to read"))?;
        for entry in entries {
            let entry = entry.map_err(io_ctx(&dir, "failed to read entry in"))?;
            let path = entry.path();
            let metadata = entry
                .metadata()
                .map_err(io_ctx(&path, "failed to stat"))?;
            if metadata.is_dir() {
                dirs.push(path.clone());
                pending.push(path);
            } else if metadata.is_file() {
                total_bytes += metadata.len();
                files.push((path, metadata.len()));
            }
            // Symlinks inside workspaces are rare and not portable; skipped.
        }
    }
    Ok((files, dirs, total_bytes))
}

/// Copies `source` into `destination` file by file.
///
/// `destination` must not exist. On cancellation the partially written
/// destination is removed and `Cancelled` is returned.
pub fn copy_tree(
    source: &Path,
    destination: &Path,
    callback: Option<CopyProgressCallback>,
    cancel: &CancellationToken,
) -> Result<CopyStats> {
    if destination.exists() {
        return Err(Error::workspace(
            "copy",
            format!("destination already exists: {}", destination.display()),
        ));
    }

    let (files, dirs, total_bytes) = collect_entries(source)?;
    let total_files = files.len();

    std::fs::create_dir_all(destination).map_err(io_ctx(destination, "failed to create"))?;
    for dir in &dirs {
        let relative = dir.strip_prefix(source).expect("dir under source root");
        let target = destination.join(relative);
        std::fs::create_dir_all(&target).map_err(io_ctx(&target, "failed to create"))?;
    }

    let workers = std::thread::available_parallelism().map_or(4, |n| n.get());
    let next_index = AtomicUsize::new(0);
    let files_processed = AtomicUsize::new(0);
    let bytes_copied = AtomicU64::new(0);
    let files = Arc::new(files);

    let outcome: Result<()> = std::thread::scope(|scope| {
        let mut handles = Vec::new();
        for _ in 0..workers.min(files.len().max(1)) {
            let files = Arc::clone(&files);
            let next_index = &next_index;
            let files_processed = &files_processed;
            let bytes_copied = &bytes_copied;
            let callback = callback.clone();
            handles.push(scope.spawn(move || -> Result<()> {
                loop {
                    cancel.check()?;
                    let index = next_index.fetch_add(1, Ordering::SeqCst);
                    let Some((path, size)) = files.get(index) else {
                        return Ok(());
                    };
                    let relative = path.strip_prefix(source).expect("file under source root");
                    let target = destination.join(relative);
                    std::fs::copy(path, &target).map_err(io_ctx(&target, "failed to copy to"))?;

                    let processed = files_processed.fetch_add(1, Ordering::SeqCst) + 1;
                    let copied = bytes_copied.fetch_add(*size, Ordering::SeqCst) + size;
                    if let Some(callback) = &callback {
                        callback(&CopyProgress {
                            current_file: relative.to_path_buf(),
                            files_processed: processed,
                            total_files,
                            bytes_copied: copied,
                            total_bytes,
                        });
                    }
                }
            }));
        }
        for handle in handles {
            handle.join().expect("copy worker panicked")?;
        }
        Ok(())
    });

    match outcome {
        Ok(()) => Ok(CopyStats {
            files_copied: files_processed.load(Ordering::SeqCst),
            bytes_copied: bytes_copied.load(Ordering::SeqCst),
        }),
        Err(err) => {
            let _ = std::fs::remove_dir_all(destination);
            Err(err)
        }
    }
}
