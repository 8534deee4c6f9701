//! Disk backends
//!
//! Free space of the file system holding a share, and a transfer executor
//! that copies data set directories between locally mounted shares.
//!
//! A copy is accepted only after the destination tree has been compared
//! with the source: same entry names, same number of children per
//! directory, same file sizes and same BLAKE3 checksums.
//!
//! A copy that runs past the timeout is cancelled between two chunks and
//! its partial destination removed before the transfer returns.

use async_trait::async_trait;
use segstore_core::{
    display_size, DataSetRecord, FreeSpaceProvider, Result, SegStoreError, Share,
    TransferExecutor,
};
use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// Bytes copied between two cancellation checks
const COPY_CHUNK: usize = 1024 * 1024;

/// Free space as reported by the file system of the share root
#[derive(Debug, Clone, Copy, Default)]
pub struct DiskFreeSpace;

impl FreeSpaceProvider for DiskFreeSpace {
    fn free_space(&self, share: &Share) -> Result<u64> {
        fs2::available_space(&share.root).map_err(|e| {
            SegStoreError::ShareNotFound(format!("{} ({:?}): {}", share.id, share.root, e))
        })
    }
}

/// Copies data sets between shares mounted on this host
#[derive(Debug, Clone)]
pub struct LocalCopyTransfer {
    timeout: Duration,
}

impl LocalCopyTransfer {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

impl Default for LocalCopyTransfer {
    fn default() -> Self {
        Self::new(Duration::from_secs(crate::DEFAULT_TRANSFER_TIMEOUT_SECS))
    }
}

#[async_trait]
impl TransferExecutor for LocalCopyTransfer {
    async fn transfer(
        &self,
        data_set: &DataSetRecord,
        source: &Share,
        destination: &Share,
    ) -> Result<u64> {
        let from = source.data_set_dir(data_set);
        let to = destination.data_set_dir(data_set);
        if from == to {
            return Err(SegStoreError::Transfer(format!(
                "source and destination of '{}' are the same: {:?}",
                data_set.id, from
            )));
        }

        info!(
            data_set = %data_set.id,
            source = %source.id,
            destination = %destination.id,
            "Start copying data set"
        );
        let start = Instant::now();
        let cancel = Arc::new(AtomicBool::new(false));
        let dest = to.clone();
        let mut task = {
            let cancel = cancel.clone();
            tokio::task::spawn_blocking(move || copy_and_verify(&from, &to, &cancel))
        };

        match tokio::time::timeout(self.timeout, &mut task).await {
            Ok(Ok(Ok(size))) => {
                info!(
                    data_set = %data_set.id,
                    size = %display_size(size),
                    elapsed_ms = start.elapsed().as_millis() as u64,
                    "Data set copied and verified"
                );
                Ok(size)
            }
            Ok(Ok(Err(e))) => Err(e),
            Ok(Err(join_error)) => Err(SegStoreError::Internal(join_error.to_string())),
            Err(_) => {
                cancel.store(true, Ordering::Relaxed);
                // Nothing of the copy may outlive the timeout
                match task.await {
                    Ok(Ok(_)) => {
                        let id = data_set.id.clone();
                        let removed =
                            tokio::task::spawn_blocking(move || remove_path(&dest, &id)).await;
                        if let Ok(Err(e)) = removed {
                            warn!(data_set = %data_set.id, error = %e, "Could not remove late copy");
                        }
                    }
                    Ok(Err(_)) => {}
                    Err(join_error) => {
                        warn!(data_set = %data_set.id, error = %join_error, "Copy task failed");
                    }
                }
                warn!(
                    data_set = %data_set.id,
                    timeout = ?self.timeout,
                    "Copy cancelled after timeout"
                );
                Err(SegStoreError::TransferTimeout(data_set.id.clone()))
            }
        }
    }

    async fn remove(&self, data_set: &DataSetRecord, share: &Share) -> Result<()> {
        let path = share.data_set_dir(data_set);
        let id = data_set.id.clone();
        tokio::task::spawn_blocking(move || remove_path(&path, &id))
            .await
            .map_err(|e| SegStoreError::Internal(e.to_string()))?
    }
}

fn remove_path(path: &Path, data_set_id: &str) -> Result<()> {
    match fs::symlink_metadata(path) {
        Ok(meta) if meta.is_dir() => fs::remove_dir_all(path)?,
        Ok(_) => fs::remove_file(path)?,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            warn!(data_set = %data_set_id, path = ?path, "Nothing to remove");
            return Ok(());
        }
        Err(e) => return Err(e.into()),
    }
    debug!(data_set = %data_set_id, path = ?path, "Removed data set copy");
    Ok(())
}

/// Copy `from` to `to` and verify the result. Returns the verified size.
/// On any failure, cancellation included, `to` is removed again.
fn copy_and_verify(from: &Path, to: &Path, cancel: &AtomicBool) -> Result<u64> {
    if !from.exists() {
        return Err(SegStoreError::DataSetNotFound(format!("{:?}", from)));
    }
    // Leftover of an earlier failed attempt
    if to.exists() {
        remove_path(to, "stale copy")?;
    }

    let copied = copy_tree(from, to, cancel).and_then(|()| verify_tree(from, to));
    if copied.is_err() && to.exists() {
        if let Err(cleanup) = remove_path(to, "incomplete copy") {
            warn!(path = ?to, error = %cleanup, "Could not remove incomplete copy");
        }
    }
    copied
}

fn check_cancelled(cancel: &AtomicBool) -> Result<()> {
    if cancel.load(Ordering::Relaxed) {
        return Err(SegStoreError::Transfer("copy cancelled".to_string()));
    }
    Ok(())
}

fn walk_error(e: walkdir::Error) -> SegStoreError {
    SegStoreError::Transfer(e.to_string())
}

fn relative(base: &Path, path: &Path) -> Result<PathBuf> {
    path.strip_prefix(base)
        .map(Path::to_path_buf)
        .map_err(|e| SegStoreError::Internal(e.to_string()))
}

/// `base` joined with `rel`, where an empty `rel` is `base` itself
fn join_relative(base: &Path, rel: &Path) -> PathBuf {
    if rel.as_os_str().is_empty() {
        base.to_path_buf()
    } else {
        base.join(rel)
    }
}

fn copy_tree(from: &Path, to: &Path, cancel: &AtomicBool) -> Result<()> {
    if let Some(parent) = to.parent() {
        fs::create_dir_all(parent)?;
    }
    for entry in WalkDir::new(from).sort_by_file_name() {
        check_cancelled(cancel)?;
        let entry = entry.map_err(walk_error)?;
        let target = join_relative(to, &relative(from, entry.path())?);
        let file_type = entry.file_type();
        if file_type.is_dir() {
            fs::create_dir_all(&target)?;
        } else if file_type.is_file() {
            copy_file(entry.path(), &target, cancel)?;
        } else {
            return Err(SegStoreError::Transfer(format!(
                "unsupported file type at {:?}",
                entry.path()
            )));
        }
    }
    Ok(())
}

fn copy_file(from: &Path, to: &Path, cancel: &AtomicBool) -> Result<()> {
    let mut reader = fs::File::open(from)?;
    let mut writer = fs::File::create(to)?;
    let mut buffer = vec![0u8; COPY_CHUNK];
    loop {
        check_cancelled(cancel)?;
        let n = reader.read(&mut buffer)?;
        if n == 0 {
            break;
        }
        writer.write_all(&buffer[..n])?;
    }
    writer.flush()?;
    fs::set_permissions(to, reader.metadata()?.permissions())?;
    Ok(())
}

/// One entry of a tree listing
#[derive(Debug, PartialEq, Eq)]
struct TreeEntry {
    path: PathBuf,
    is_dir: bool,
    children: usize,
    size: u64,
}

fn list_tree(root: &Path) -> Result<Vec<TreeEntry>> {
    let mut entries = Vec::new();
    for entry in WalkDir::new(root).sort_by_file_name() {
        let entry = entry.map_err(walk_error)?;
        let is_dir = entry.file_type().is_dir();
        let children = if is_dir {
            fs::read_dir(entry.path())?.count()
        } else {
            0
        };
        let size = if is_dir {
            0
        } else {
            entry.metadata().map_err(walk_error)?.len()
        };
        entries.push(TreeEntry {
            path: relative(root, entry.path())?,
            is_dir,
            children,
            size,
        });
    }
    Ok(entries)
}

fn checksum(path: &Path) -> Result<blake3::Hash> {
    let mut hasher = blake3::Hasher::new();
    hasher.update_mmap(path)?;
    Ok(hasher.finalize())
}

fn verify_tree(from: &Path, to: &Path) -> Result<u64> {
    let expected = list_tree(from)?;
    let actual = list_tree(to)?;
    if expected.len() != actual.len() {
        return Err(SegStoreError::Verification(format!(
            "{:?} has {} entries, {:?} has {}",
            to,
            actual.len(),
            from,
            expected.len()
        )));
    }

    let mut total = 0;
    for (e, a) in expected.iter().zip(actual.iter()) {
        if e.path != a.path || e.is_dir != a.is_dir {
            return Err(SegStoreError::Verification(format!(
                "entry {:?} of source does not match {:?} of copy",
                e.path, a.path
            )));
        }
        if e.children != a.children {
            return Err(SegStoreError::Verification(format!(
                "directory {:?} has {} children in the copy instead of {}",
                e.path, a.children, e.children
            )));
        }
        if e.size != a.size {
            return Err(SegStoreError::Verification(format!(
                "file {:?} has {} bytes in the copy instead of {}",
                e.path, a.size, e.size
            )));
        }
        if !e.is_dir && checksum(&join_relative(from, &e.path))? != checksum(&join_relative(to, &a.path))? {
            return Err(SegStoreError::Verification(format!(
                "checksum of {:?} differs",
                e.path
            )));
        }
        total += e.size;
    }
    Ok(total)
}
