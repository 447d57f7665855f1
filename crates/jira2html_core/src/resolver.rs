use std::path::PathBuf;

use crate::doc_index::{DocumentIndex, KeyKind};
use crate::keys::{decode_component, normalize_key, strip_html_extension};
use crate::redirect::resolve_redirect_chain;

pub const DEFAULT_REDIRECT_HOPS: usize = 1;

#[derive(Debug, Clone, Copy)]
pub struct ReferenceResolver<'a> {
    index: &'a DocumentIndex,
    redirect_hops: usize,
}

impl<'a> ReferenceResolver<'a> {
    pub fn new(index: &'a DocumentIndex) -> Self {
        Self {
            index,
            redirect_hops: DEFAULT_REDIRECT_HOPS,
        }
    }

    pub fn with_redirect_hops(mut self, redirect_hops: usize) -> Self {
        self.redirect_hops = redirect_hops;
        self
    }

    pub fn index(&self) -> &'a DocumentIndex {
        self.index
    }

    /// Every candidate key is tried against every index table before moving on
    /// to the next candidate.
    pub fn resolve(&self, reference: &str) -> Option<PathBuf> {
        for key in candidate_keys(reference) {
            for kind in KeyKind::ALL {
                if let Some(path) = self.index.lookup(&key, kind) {
                    return Some(resolve_redirect_chain(path, self.redirect_hops));
                }
            }
        }
        None
    }
}

/// Lookup keys for a reference, highest priority first: the decoded and
/// trimmed reference, the same without `.html`, then its normalized key.
/// Empty and repeated keys are dropped.
pub fn candidate_keys(reference: &str) -> Vec<String> {
    let raw = decode_component(reference).trim().to_string();
    if raw.is_empty() {
        return Vec::new();
    }
    let without_extension = strip_html_extension(&raw).to_string();
    let normalized = normalize_key(&raw);

    let mut keys: Vec<String> = Vec::with_capacity(3);
    for key in [raw, without_extension, normalized] {
        if !key.is_empty() && !keys.contains(&key) {
            keys.push(key);
        }
    }
    keys
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::Path;

    use tempfile::tempdir;

    use super::{ReferenceResolver, candidate_keys};
    use crate::doc_index::DocumentIndex;

    fn write_file(path: &Path, content: &str) {
        let parent = path.parent().expect("parent");
        fs::create_dir_all(parent).expect("create parent");
        fs::write(path, content).expect("write file");
    }

    #[test]
    fn candidate_keys_follow_priority_order() {
        assert_eq!(
            candidate_keys(" My%20Page.html "),
            vec!["My Page.html", "My Page", "mypage"]
        );
        assert_eq!(candidate_keys("mypage"), vec!["mypage"]);
        assert!(candidate_keys("   ").is_empty());
    }

    #[test]
    fn resolves_plus_encoded_title_through_normalized_key() {
        let temp = tempdir().expect("tempdir");
        let root = temp.path().join("docs");
        let page = root.join("Release Notes.html");
        write_file(&page, "<p>notes</p>");

        let index = DocumentIndex::build(&[&root]);
        let resolver = ReferenceResolver::new(&index);
        assert_eq!(resolver.resolve("Release+Notes"), Some(page.clone()));
        assert_eq!(resolver.resolve("Release%20Notes.html"), Some(page.clone()));
        assert_eq!(resolver.resolve("release notes"), Some(page));
    }

    #[test]
    fn resolves_numeric_page_ids() {
        let temp = tempdir().expect("tempdir");
        let root = temp.path().join("docs");
        let page = root.join("SPACE").join("123456.html");
        write_file(&page, "<p>by id</p>");

        let index = DocumentIndex::build(&[&root]);
        let resolver = ReferenceResolver::new(&index);
        assert_eq!(resolver.resolve("123456.html"), Some(page));
        assert_eq!(resolver.resolve("654321.html"), None);
    }

    #[test]
    fn unknown_reference_is_none() {
        let temp = tempdir().expect("tempdir");
        let root = temp.path().join("docs");
        write_file(&root.join("Alpha.html"), "alpha");

        let index = DocumentIndex::build(&[&root]);
        let resolver = ReferenceResolver::new(&index);
        assert_eq!(resolver.resolve("Beta"), None);
        assert_eq!(resolver.resolve(""), None);
    }

    #[test]
    fn resolved_placeholder_is_forwarded() {
        let temp = tempdir().expect("tempdir");
        let root = temp.path().join("docs");
        let target = root.join("New Home.html");
        write_file(
            &root.join("Old Home.html"),
            r#"<meta http-equiv="refresh" content="0; url=New%20Home.html">"#,
        );
        write_file(&target, "<p>moved here</p>");

        let index = DocumentIndex::build(&[&root]);
        let resolver = ReferenceResolver::new(&index);
        assert_eq!(resolver.resolve("Old Home"), Some(target));
    }

    #[test]
    fn redirect_hops_are_configurable() {
        let temp = tempdir().expect("tempdir");
        let root = temp.path().join("docs");
        write_file(
            &root.join("A.html"),
            r#"<meta http-equiv="refresh" content="0; url=B.html">"#,
        );
        write_file(
            &root.join("B.html"),
            r#"<meta http-equiv="refresh" content="0; url=C.html">"#,
        );
        write_file(&root.join("C.html"), "c");

        let index = DocumentIndex::build(&[&root]);
        let single = ReferenceResolver::new(&index);
        let multi = ReferenceResolver::new(&index).with_redirect_hops(3);
        assert_eq!(single.resolve("A"), Some(root.join("B.html")));
        assert_eq!(multi.resolve("A"), Some(root.join("C.html")));
        assert_eq!(
            ReferenceResolver::new(&index).with_redirect_hops(0).resolve("A"),
            Some(root.join("A.html"))
        );
    }
}
