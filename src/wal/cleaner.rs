//! Startup cleanup of WAL files left behind by earlier instances
//!
//! Every `WALFile.*.walfile` in the data root other than our own live
//! segment is either removed outright (nothing but a status header),
//! replayed and removed, or moved aside to `*.tmp` when its contents
//! cannot be trusted or some of its writes cannot be applied. Whatever a
//! moved-aside segment could apply has been applied and synced.

use std::fs;
use std::path::{Path, PathBuf};

use super::file::WalFile;
use super::message::ReplayState;
use crate::error::{Result, StoreError};
use crate::storage::PrimaryStore;

#[derive(Debug, Default)]
pub struct CleanupReport {
    pub removed: Vec<PathBuf>,
    pub replayed: Vec<PathBuf>,
    pub quarantined: Vec<PathBuf>,
}

/// WAL segments in `root`, oldest first
pub fn list_wal_files(root: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    if !root.exists() {
        return Ok(files);
    }
    for entry in fs::read_dir(root)? {
        let path = entry?.path();
        if path.is_file() && WalFile::is_wal_file(&path) {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

/// Replay and remove every foreign WAL file under `root`
pub fn cleanup_old_wal_files(
    root: &Path,
    skip: Option<&Path>,
    instance_id: i64,
    store: &PrimaryStore,
) -> Result<CleanupReport> {
    let mut report = CleanupReport::default();

    for path in list_wal_files(root)? {
        if skip == Some(path.as_path()) {
            continue;
        }
        match clean_one(&path, instance_id, store) {
            Ok(true) => report.replayed.push(path),
            Ok(false) => report.removed.push(path),
            Err(
                e @ (StoreError::WalCorruption(_)
                | StoreError::WalOwnership { .. }
                | StoreError::PartialWrite { .. }),
            ) => {
                let aside = path.with_extension("walfile.tmp");
                tracing::error!(path = %path.display(), error = %e, aside = %aside.display(), "cannot replay WAL file, moving it aside");
                fs::rename(&path, &aside)?;
                report.quarantined.push(aside);
            }
            Err(e) => return Err(e),
        }
    }

    if !report.replayed.is_empty() || !report.quarantined.is_empty() {
        tracing::info!(
            removed = report.removed.len(),
            replayed = report.replayed.len(),
            quarantined = report.quarantined.len(),
            "WAL cleanup finished"
        );
    }
    Ok(report)
}

/// Returns true if any transaction group had to be replayed
fn clean_one(path: &Path, instance_id: i64, store: &PrimaryStore) -> Result<bool> {
    let mut wal = WalFile::take_over(path, instance_id)?;
    let mut replayed = false;
    if !wal.is_empty()? {
        let report = wal.replay(false, store)?;
        replayed = !report.applied_tgids.is_empty();
    }
    wal.close(ReplayState::Replayed)?;
    wal.delete(instance_id)?;
    Ok(replayed)
}
