use std::collections::HashMap;
use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use crate::keys::{has_html_extension, normalize_key, strip_html_extension};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyKind {
    Exact,
    WithoutExtension,
    Normalized,
}

impl KeyKind {
    pub const ALL: [KeyKind; 3] = [Self::Exact, Self::WithoutExtension, Self::Normalized];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Exact => "exact",
            Self::WithoutExtension => "without_extension",
            Self::Normalized => "normalized",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IndexStats {
    pub files_indexed: usize,
    pub roots_scanned: usize,
    pub roots_skipped: Vec<PathBuf>,
    pub exact_keys: usize,
    pub without_extension_keys: usize,
    pub normalized_keys: usize,
    pub exact_collisions: usize,
    pub without_extension_collisions: usize,
    pub normalized_collisions: usize,
}

/// Filename lookup over an exported documentation corpus.
///
/// Built once by walking every corpus root and never mutated afterwards. Keys
/// are assumed to be unique enough in practice: when two files produce the same
/// key within a kind, the file visited last wins and the collision is only
/// counted in [`IndexStats`]. A collision can therefore route a reference to the
/// wrong page.
#[derive(Debug, Clone, Default)]
pub struct DocumentIndex {
    exact: HashMap<String, PathBuf>,
    without_extension: HashMap<String, PathBuf>,
    normalized: HashMap<String, PathBuf>,
    stats: IndexStats,
}

impl DocumentIndex {
    pub fn build<P: AsRef<Path>>(roots: &[P]) -> Self {
        let mut index = Self::default();
        for root in roots {
            let root = root.as_ref();
            if !root.is_dir() {
                index.stats.roots_skipped.push(root.to_path_buf());
                continue;
            }
            let root = std::path::absolute(root).unwrap_or_else(|_| root.to_path_buf());
            index.stats.roots_scanned += 1;
            for entry in WalkDir::new(&root)
                .follow_links(false)
                .sort_by_file_name()
                .into_iter()
                .filter_map(Result::ok)
            {
                if !entry.file_type().is_file() {
                    continue;
                }
                index.insert(entry.path());
            }
        }
        index
    }

    fn insert(&mut self, path: &Path) {
        let Some(file_name) = path.file_name().map(|name| name.to_string_lossy()) else {
            return;
        };
        if !has_html_extension(&file_name) {
            return;
        }

        let exact = file_name.to_string();
        let without_extension = strip_html_extension(&file_name).to_string();
        let normalized = normalize_key(&file_name);

        if self.exact.insert(exact, path.to_path_buf()).is_some() {
            self.stats.exact_collisions += 1;
        }
        if self
            .without_extension
            .insert(without_extension, path.to_path_buf())
            .is_some()
        {
            self.stats.without_extension_collisions += 1;
        }
        if self.normalized.insert(normalized, path.to_path_buf()).is_some() {
            self.stats.normalized_collisions += 1;
        }
        self.stats.files_indexed += 1;
    }

    /// Look up a key in one table. The stored path is re-checked on disk, so a
    /// file removed after the scan yields `None`.
    pub fn lookup(&self, key: &str, kind: KeyKind) -> Option<&Path> {
        let table = match kind {
            KeyKind::Exact => &self.exact,
            KeyKind::WithoutExtension => &self.without_extension,
            KeyKind::Normalized => &self.normalized,
        };
        table
            .get(key)
            .map(PathBuf::as_path)
            .filter(|path| path.is_file())
    }

    pub fn len(&self) -> usize {
        self.stats.files_indexed
    }

    pub fn is_empty(&self) -> bool {
        self.stats.files_indexed == 0
    }

    pub fn stats(&self) -> IndexStats {
        IndexStats {
            exact_keys: self.exact.len(),
            without_extension_keys: self.without_extension.len(),
            normalized_keys: self.normalized.len(),
            ..self.stats.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::Path;

    use tempfile::tempdir;

    use super::{DocumentIndex, KeyKind};

    fn write_file(path: &Path, content: &str) {
        let parent = path.parent().expect("parent");
        fs::create_dir_all(parent).expect("create parent");
        fs::write(path, content).expect("write file");
    }

    #[test]
    fn build_indexes_html_files_under_three_kinds() {
        let temp = tempdir().expect("tempdir");
        let root = temp.path().join("docs");
        write_file(&root.join("TS").join("Release Notes.html"), "<p>notes</p>");
        write_file(&root.join("TS").join("readme.txt"), "ignored");
        write_file(&root.join("Upper.HTML"), "<p>upper</p>");

        let index = DocumentIndex::build(&[&root]);
        assert_eq!(index.len(), 2);

        let expected = root.join("TS").join("Release Notes.html");
        assert_eq!(
            index.lookup("Release Notes.html", KeyKind::Exact),
            Some(expected.as_path())
        );
        assert_eq!(
            index.lookup("Release Notes", KeyKind::WithoutExtension),
            Some(expected.as_path())
        );
        assert_eq!(
            index.lookup("releasenotes", KeyKind::Normalized),
            Some(expected.as_path())
        );
        assert!(index.lookup("Release Notes", KeyKind::Exact).is_none());
        assert!(index.lookup("readme.txt", KeyKind::Exact).is_none());
        assert!(index.lookup("Upper", KeyKind::WithoutExtension).is_some());
    }

    #[test]
    fn build_skips_missing_roots() {
        let temp = tempdir().expect("tempdir");
        let root = temp.path().join("docs");
        write_file(&root.join("Alpha.html"), "alpha");
        let missing = temp.path().join("missing");

        let index = DocumentIndex::build(&[missing.clone(), root]);
        let stats = index.stats();
        assert_eq!(stats.files_indexed, 1);
        assert_eq!(stats.roots_scanned, 1);
        assert_eq!(stats.roots_skipped, vec![missing]);
    }

    #[test]
    fn later_duplicates_win_and_are_counted() {
        let temp = tempdir().expect("tempdir");
        let first = temp.path().join("a");
        let second = temp.path().join("b");
        write_file(&first.join("Page.html"), "first");
        write_file(&second.join("Page.html"), "second");

        let index = DocumentIndex::build(&[&first, &second]);
        assert_eq!(
            index.lookup("Page.html", KeyKind::Exact),
            Some(second.join("Page.html").as_path())
        );
        let stats = index.stats();
        assert_eq!(stats.files_indexed, 2);
        assert_eq!(stats.exact_keys, 1);
        assert_eq!(stats.exact_collisions, 1);
        assert_eq!(stats.normalized_collisions, 1);
    }

    #[test]
    fn lookup_rechecks_existence() {
        let temp = tempdir().expect("tempdir");
        let root = temp.path().join("docs");
        let page = root.join("Gone.html");
        write_file(&page, "soon gone");

        let index = DocumentIndex::build(&[&root]);
        assert!(index.lookup("Gone.html", KeyKind::Exact).is_some());
        fs::remove_file(&page).expect("remove page");
        assert!(index.lookup("Gone.html", KeyKind::Exact).is_none());
    }

    #[test]
    fn empty_index_reports_empty() {
        let index = DocumentIndex::build::<&Path>(&[]);
        assert!(index.is_empty());
        assert_eq!(KeyKind::Normalized.as_str(), "normalized");
    }
}
