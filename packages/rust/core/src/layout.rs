//! On-disk layout of the raw artifact tree: `{root}/{date}/{id}/data.json`.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use threadvault_shared::{ItemId, Result, ThreadvaultError};

/// Materialization marker of a crawled thread.
pub const DATA_FILE: &str = "data.json";
/// Downloaded images, next to [`DATA_FILE`].
pub const IMAGES_DIR: &str = "images";

/// One `{date}/{article}` directory found under the raw root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawEntry {
    pub date: String,
    pub name: String,
    pub dir: PathBuf,
}

impl RawEntry {
    /// Ledger key of the entry in the `processed` table.
    pub fn key(&self) -> String {
        format!("{}/{}", self.date, self.name)
    }

    pub fn data_file(&self) -> PathBuf {
        self.dir.join(DATA_FILE)
    }

    pub fn images_dir(&self) -> PathBuf {
        self.dir.join(IMAGES_DIR)
    }
}

impl crate::pool::Labeled for RawEntry {
    fn label(&self) -> String {
        self.key()
    }
}

#[derive(Debug, Clone)]
pub struct RawLayout {
    root: PathBuf,
}

impl RawLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn item_dir(&self, date: &str, id: &ItemId) -> PathBuf {
        self.root.join(date).join(id.as_str())
    }

    /// Names of every item directory holding a [`DATA_FILE`], across all
    /// date folders. A missing root means nothing is materialized.
    pub fn scan_materialized(&self) -> Result<HashSet<String>> {
        let mut names = HashSet::new();
        for date_dir in subdirs(&self.root)? {
            for item_dir in subdirs(&date_dir)? {
                if !item_dir.join(DATA_FILE).is_file() {
                    continue;
                }
                if let Some(name) = file_name(&item_dir) {
                    names.insert(name);
                }
            }
        }
        Ok(names)
    }

    /// Every materialized `{date}/{article}` directory, sorted by date then
    /// name. Folders left without a [`DATA_FILE`] by an interrupted crawl are
    /// not articles.
    pub fn scan_articles(&self) -> Result<Vec<RawEntry>> {
        let mut entries = Vec::new();
        for date_dir in subdirs(&self.root)? {
            let Some(date) = file_name(&date_dir) else {
                continue;
            };
            for dir in subdirs(&date_dir)? {
                if !dir.join(DATA_FILE).is_file() {
                    continue;
                }
                if let Some(name) = file_name(&dir) {
                    entries.push(RawEntry {
                        date: date.clone(),
                        name,
                        dir,
                    });
                }
            }
        }
        entries.sort_by(|a, b| a.date.cmp(&b.date).then_with(|| a.name.cmp(&b.name)));
        Ok(entries)
    }
}

fn subdirs(dir: &Path) -> Result<Vec<PathBuf>> {
    let read = match std::fs::read_dir(dir) {
        Ok(read) => read,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(ThreadvaultError::io(dir, e)),
    };

    let mut dirs = Vec::new();
    for entry in read {
        let entry = entry.map_err(|e| ThreadvaultError::io(dir, e))?;
        if entry.path().is_dir() {
            dirs.push(entry.path());
        }
    }
    Ok(dirs)
}

fn file_name(path: &Path) -> Option<String> {
    path.file_name().and_then(|n| n.to_str()).map(String::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_root() -> PathBuf {
        std::env::temp_dir().join(format!("threadvault-layout-{}", uuid::Uuid::now_v7()))
    }

    #[test]
    fn missing_root_is_empty() {
        let layout = RawLayout::new(temp_root());
        assert!(layout.scan_materialized().unwrap().is_empty());
        assert!(layout.scan_articles().unwrap().is_empty());
    }

    #[test]
    fn only_dirs_with_data_file_are_materialized() {
        let root = temp_root();
        let layout = RawLayout::new(&root);
        let done = layout.item_dir("2024-05-01", &ItemId::from_existing("done"));
        let half = layout.item_dir("2024-05-02", &ItemId::from_existing("half"));
        std::fs::create_dir_all(done.join(IMAGES_DIR)).unwrap();
        std::fs::create_dir_all(&half).unwrap();
        std::fs::write(done.join(DATA_FILE), "{}").unwrap();
        std::fs::write(root.join("stray.txt"), "").unwrap();

        let names = layout.scan_materialized().unwrap();
        assert_eq!(names, HashSet::from(["done".to_string()]));

        let _ = std::fs::remove_dir_all(&root);
    }

    #[test]
    fn articles_sorted_with_keys() {
        let root = temp_root();
        for (date, name) in [("2024-05-02", "a"), ("2024-05-01", "z"), ("2024-05-01", "b")] {
            let dir = root.join(date).join(name);
            std::fs::create_dir_all(&dir).unwrap();
            std::fs::write(dir.join(DATA_FILE), "{}").unwrap();
        }

        let keys: Vec<String> = RawLayout::new(&root)
            .scan_articles()
            .unwrap()
            .iter()
            .map(RawEntry::key)
            .collect();
        assert_eq!(keys, vec!["2024-05-01/b", "2024-05-01/z", "2024-05-02/a"]);

        let _ = std::fs::remove_dir_all(&root);
    }

    #[test]
    fn interrupted_folders_are_not_articles() {
        let root = temp_root();
        let layout = RawLayout::new(&root);
        let orphan = layout.item_dir("2024-05-01", &ItemId::from_existing("x"));
        std::fs::create_dir_all(orphan.join(IMAGES_DIR)).unwrap();
        let done = layout.item_dir("2024-05-03", &ItemId::from_existing("x"));
        std::fs::create_dir_all(&done).unwrap();
        std::fs::write(done.join(DATA_FILE), "{}").unwrap();

        let keys: Vec<String> = layout.scan_articles().unwrap().iter().map(RawEntry::key).collect();
        assert_eq!(keys, vec!["2024-05-03/x"]);

        let _ = std::fs::remove_dir_all(&root);
    }
}
