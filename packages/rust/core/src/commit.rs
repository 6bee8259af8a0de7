//! Artifact-then-ledger commit.

use std::fs::File;
use std::io::Write;
use std::path::Path;

use tracing::warn;
use uuid::Uuid;

use threadvault_shared::{Result, ThreadvaultError};
use threadvault_storage::{Ledger, LedgerTable};

/// Write `bytes` to `path` through a sibling temp file and a rename, so a
/// reader never sees a half-written file. The temp file is synced before the
/// rename; once this returns the content survives a crash.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let parent = path
        .parent()
        .ok_or_else(|| ThreadvaultError::validation(format!("no parent directory: {}", path.display())))?;
    std::fs::create_dir_all(parent).map_err(|e| ThreadvaultError::io(parent, e))?;

    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("artifact");
    let tmp = parent.join(format!(".{name}.{}.tmp", Uuid::now_v7()));

    let written = File::create(&tmp).and_then(|mut file| {
        file.write_all(bytes)?;
        file.sync_all()
    });
    if let Err(e) = written {
        let _ = std::fs::remove_file(&tmp);
        return Err(ThreadvaultError::io(&tmp, e));
    }
    std::fs::rename(&tmp, path).map_err(|e| {
        let _ = std::fs::remove_file(&tmp);
        ThreadvaultError::io(path, e)
    })
}

/// Result of the ledger half of a commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommitStatus {
    Recorded,
    /// The artifact is on disk; the next run will reconcile the key.
    LedgerWriteFailed(String),
}

/// Record a completed key. A failure is logged and reported, never raised.
pub async fn record_completion(ledger: &Ledger, table: LedgerTable, key: &str) -> CommitStatus {
    match ledger.record(table, key).await {
        Ok(()) => CommitStatus::Recorded,
        Err(e) => {
            warn!(table = table.as_str(), key, error = %e, "ledger write failed");
            CommitStatus::LedgerWriteFailed(e.to_string())
        }
    }
}

/// Write the artifact, then record the key. An artifact failure aborts
/// before the ledger is touched.
pub async fn commit_artifact(
    ledger: &Ledger,
    table: LedgerTable,
    key: &str,
    path: &Path,
    bytes: &[u8],
) -> Result<CommitStatus> {
    write_atomic(path, bytes)?;
    Ok(record_completion(ledger, table, key).await)
}
