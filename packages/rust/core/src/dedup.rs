//! Admission of candidates that are neither in the ledger nor on disk.

use std::collections::HashSet;

use serde::Serialize;
use tracing::{info, warn};

use threadvault_storage::{Ledger, LedgerTable};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DedupCounts {
    pub discovered: usize,
    pub admitted: usize,
    pub in_ledger: usize,
    pub on_disk: usize,
    /// On-disk items written back into the ledger.
    pub reconciled: usize,
    /// Repeats of a key seen earlier in the same enumeration.
    pub duplicates: usize,
}

#[derive(Debug)]
pub struct DedupOutcome<T> {
    pub admitted: Vec<T>,
    /// Keys found on disk but missing from the ledger.
    pub reconcile: Vec<String>,
    pub counts: DedupCounts,
}

/// Split `candidates` into the admitted work set and the keys to reconcile.
///
/// Checks run in order: repeat within this enumeration, ledger, disk. The
/// first candidate of a repeated key is the one that counts.
pub fn filter<T>(
    candidates: Vec<T>,
    key: impl Fn(&T) -> String,
    ledger: &HashSet<String>,
    on_disk: &HashSet<String>,
) -> DedupOutcome<T> {
    let mut counts = DedupCounts {
        discovered: candidates.len(),
        ..DedupCounts::default()
    };
    let mut seen = HashSet::new();
    let mut admitted = Vec::new();
    let mut reconcile = Vec::new();

    for candidate in candidates {
        let k = key(&candidate);
        if !seen.insert(k.clone()) {
            counts.duplicates += 1;
        } else if ledger.contains(&k) {
            counts.in_ledger += 1;
        } else if on_disk.contains(&k) {
            counts.on_disk += 1;
            reconcile.push(k);
        } else {
            admitted.push(candidate);
        }
    }
    counts.admitted = admitted.len();

    DedupOutcome {
        admitted,
        reconcile,
        counts,
    }
}

/// Record on-disk keys into the ledger. Returns how many were written.
pub async fn reconcile(ledger: &Ledger, table: LedgerTable, keys: &[String]) -> usize {
    let mut written = 0;
    for key in keys {
        match ledger.record(table, key).await {
            Ok(()) => written += 1,
            Err(e) => warn!(table = table.as_str(), key = %key, error = %e, "reconcile failed"),
        }
    }
    if written > 0 {
        info!(table = table.as_str(), written, "reconciled ledger with disk");
    }
    written
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(items: &[&str]) -> HashSet<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn ledger_and_disk_both_exclude() {
        let candidates = vec!["a", "b", "c", "d", "b"];
        let out = filter(candidates, |s| s.to_string(), &set(&["a"]), &set(&["a", "c"]));

        assert_eq!(out.admitted, vec!["b", "d"]);
        assert_eq!(out.reconcile, vec!["c".to_string()]);
        assert_eq!(
            out.counts,
            DedupCounts {
                discovered: 5,
                admitted: 2,
                in_ledger: 1,
                on_disk: 1,
                reconciled: 0,
                duplicates: 1,
            }
        );
    }

    #[test]
    fn repeated_on_disk_key_reconciles_once() {
        let out = filter(vec!["x", "x"], |s| s.to_string(), &HashSet::new(), &set(&["x"]));
        assert!(out.admitted.is_empty());
        assert_eq!(out.reconcile.len(), 1);
        assert_eq!(out.counts.duplicates, 1);
    }

    #[tokio::test]
    async fn reconcile_writes_keys() {
        let path = std::env::temp_dir().join(format!("threadvault-dedup-{}.db", uuid::Uuid::now_v7()));
        let ledger = Ledger::open(&path).await.unwrap();

        let keys = vec!["c".to_string(), "c".to_string(), "e".to_string()];
        assert_eq!(reconcile(&ledger, LedgerTable::Scraped, &keys).await, 3);
        assert_eq!(ledger.count(LedgerTable::Scraped).await.unwrap(), 2);

        let _ = std::fs::remove_file(&path);
    }
}
